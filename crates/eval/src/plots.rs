use anyhow::{Context, Result};
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::suite::SuiteReport;

pub fn generate_plots(report: &SuiteReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    plot_latency_distribution(report, &output_dir.join("latency_distribution.png"))?;
    plot_quality_by_category(report, &output_dir.join("quality_by_category.png"))?;

    Ok(())
}

/// Per-case latency, sorted, with the p50 and p95 marks.
fn plot_latency_distribution(report: &SuiteReport, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut latencies: Vec<f64> = report.cases.iter().map(|c| c.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);
    let max_latency = latencies.last().copied().unwrap_or(1.0).max(1.0);
    let n = latencies.len().max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption("Turn Latency (ms)", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n, 0f64..(max_latency * 1.2))?;

    chart
        .configure_mesh()
        .x_desc("Test case (sorted)")
        .y_desc("Latency (ms)")
        .draw()?;

    chart.draw_series(latencies.iter().enumerate().map(|(i, latency)| {
        Rectangle::new([(i as f64 + 0.1, 0.0), (i as f64 + 0.9, *latency)], BLUE.filled())
    }))?;

    for (label, value, color) in [
        ("p50", report.p50_latency_ms, GREEN),
        ("p95", report.p95_latency_ms, RED),
    ] {
        chart
            .draw_series(LineSeries::new([(0.0, value), (n, value)], color.stroke_width(2)))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %path.display(), "Saved latency plot");
    Ok(())
}

/// Intent accuracy and mean relevance side by side for each category.
fn plot_quality_by_category(report: &SuiteReport, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let categories = &report.by_category;
    let n = categories.len().max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption("Quality by Test Category", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(80)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n, 0f64..1.0f64)?;

    chart
        .configure_mesh()
        .y_desc("Score")
        .x_labels(categories.len().max(1))
        .x_label_formatter(&|x| {
            categories
                .get(*x as usize)
                .map(|c| c.category.clone())
                .unwrap_or_default()
        })
        .draw()?;

    chart
        .draw_series(categories.iter().enumerate().map(|(i, c)| {
            let x = i as f64;
            Rectangle::new([(x + 0.1, 0.0), (x + 0.45, c.intent_accuracy)], BLUE.filled())
        }))?
        .label("intent accuracy")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], BLUE.filled()));

    chart
        .draw_series(categories.iter().enumerate().filter_map(|(i, c)| {
            let x = i as f64;
            c.avg_relevance
                .map(|r| Rectangle::new([(x + 0.55, 0.0), (x + 0.9, r)], GREEN.filled()))
        }))?
        .label("avg relevance")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], GREEN.filled()));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %path.display(), "Saved quality plot");
    Ok(())
}

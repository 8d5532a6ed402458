use anyhow::{Context, Result};
use eval::{builtin_test_cases, generate_plots, AgentConfig, EvaluatedAgent, EvaluationSuite, SuiteReport};
use std::path::PathBuf;
use std::sync::Arc;
use store::EvaluationStore;
use tracing_subscriber::EnvFilter;

/// Usage: run_evaluation [category]
#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AgentConfig::from_env()?;
    if std::env::var("ENVIRONMENT").is_err() {
        config.eval.environment = "evaluation".to_string();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let category = std::env::args().nth(1);
    let output_dir = PathBuf::from(
        std::env::var("EVAL_OUTPUT_DIR").unwrap_or_else(|_| "evaluation_output".to_string()),
    );

    println!("=== Mutual Fund Agent Evaluation ===\n");

    let store = Arc::new(EvaluationStore::open(&config.database_path)?);
    if store.test_cases(None)?.is_empty() {
        let seeded = builtin_test_cases();
        for case in &seeded {
            store.save_test_case(case)?;
        }
        println!("Seeded {} built-in test cases", seeded.len());
    }
    let cases = store.test_cases(category.as_deref())?;
    println!(
        "Test set: {} cases (category: {})\n",
        cases.len(),
        category.as_deref().unwrap_or("all")
    );

    let agent = EvaluatedAgent::connect(
        &config.sources,
        &config.ollama,
        &config.retry,
        config.eval.clone(),
        store.clone(),
    )?;
    let suite = EvaluationSuite::new(Arc::new(agent));
    let report = suite.run(&cases).await?;

    print_report(&report);

    let experiment = format!(
        "{}-{}",
        category.as_deref().unwrap_or("all"),
        chrono::Utc::now().format("%Y%m%dT%H%M%S")
    );
    let notes = format!(
        "{} cases, pass rate {:.1}%, intent accuracy {:.1}%",
        report.total_cases,
        report.pass_rate * 100.0,
        report.intent_accuracy * 100.0
    );
    let experiment_id =
        store.create_threshold_experiment(&experiment, config.eval.confidence_threshold, Some(&notes))?;
    println!(
        "\n✅ Threshold {:.2} recorded as experiment #{} ({})",
        config.eval.confidence_threshold, experiment_id, experiment
    );

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let report_path = output_dir.join("evaluation_report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
    println!("\n✅ Report saved to {}", report_path.display());

    let plots_dir = output_dir.join("plots");
    generate_plots(&report, &plots_dir)?;
    println!("✅ Plots saved to {}", plots_dir.display());

    let today = chrono::Utc::now().date_naive();
    let daily = store.aggregate_day(today)?;
    println!(
        "✅ Daily metrics for {}: {} queries, pass rate {}",
        daily.date,
        daily.total_queries,
        fmt_opt(daily.pass_rate)
    );

    store.close()?;
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or("n/a".to_string(), |v| format!("{:.2}", v))
}

fn print_report(report: &SuiteReport) {
    println!("\n=== RESULTS ===\n");
    println!("  Cases: {}", report.total_cases);
    println!("  Intent Accuracy: {:.1}%", report.intent_accuracy * 100.0);
    println!("  Threshold Pass Rate: {:.1}%", report.pass_rate * 100.0);
    println!("  Avg Relevance: {}", fmt_opt(report.avg_relevance));
    println!("  Avg Faithfulness: {}", fmt_opt(report.avg_faithfulness));
    println!("  Avg Hallucination: {}", fmt_opt(report.avg_hallucination));
    println!("  Avg Answer Correctness: {}", fmt_opt(report.avg_answer_correctness));
    println!("  Avg Keyword Coverage: {}", fmt_opt(report.avg_keyword_coverage));
    println!("  Avg Latency: {:.0} ms", report.avg_latency_ms);
    println!("  P50 Latency: {:.0} ms", report.p50_latency_ms);
    println!("  P95 Latency: {:.0} ms", report.p95_latency_ms);

    println!("\n📊 BY CATEGORY:");
    for category in &report.by_category {
        println!(
            "  {:<14} {:>3} cases  intent {:>5.1}%  relevance {}",
            category.category,
            category.count,
            category.intent_accuracy * 100.0,
            fmt_opt(category.avg_relevance)
        );
    }

    let misses: Vec<_> = report.cases.iter().filter(|c| !c.intent_match).collect();
    if !misses.is_empty() {
        println!("\n❌ INTENT MISSES:");
        for case in misses {
            println!(
                "  {:?}: expected {}, got {}",
                case.query, case.expected_intent, case.predicted_intent
            );
        }
    }
}

pub mod daily;
pub mod record;
pub mod sqlite;
pub mod test_case;

pub use daily::{DailyMetricsRecord, IntentCount};
pub use record::{answer_correctness, EvaluationFilter, EvaluationRecord, EvaluationView, RELEVANCE_WEIGHT};
pub use sqlite::{EvaluationStore, IntentSummary, PerformanceSummary};
pub use test_case::{Difficulty, TestCase};

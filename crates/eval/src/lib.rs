pub mod agent;
pub mod config;
pub mod engine;
pub mod judge;
pub mod plots;
pub mod safety;
pub mod suite;
pub mod test_set;

pub use agent::{AgentReply, AgentTurn, EvaluatedAgent, EvaluationTask, Session, StoredEvaluation};
pub use config::{AgentConfig, EnvOverlay, EvalConfig};
pub use engine::{MetricsEngine, QualityScores, TurnMetadata};
pub use judge::{parse_score, Judge, Rubric};
pub use plots::generate_plots;
pub use safety::SafetyReport;
pub use suite::{CaseResult, CategoryScore, EvaluationSuite, SuiteReport};
pub use test_set::builtin_test_cases;

pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod resolver;
pub mod retry;
pub mod sources;
pub mod tools;

#[cfg(any(test, feature = "test-util"))]
pub mod stubs;

pub use error::SourceError;
pub use llm::{GenerationOracle, OllamaClient, OllamaConfig};
pub use orchestrator::{
    AnswerRecord, Clarification, Exchange, Orchestrator, OrchestratorSettings, Query,
    StageTimings, TurnOutcome, TurnState, DISCLAIMER,
};
pub use resolver::{Resolution, ResolverChain};
pub use retry::{RetryPolicy, RetrySettings};
pub use sources::{
    FundDatabase, FundRecord, HttpFundDatabase, HttpSchemeRegistry, ResolveRequest,
    SchemeRecord, SchemeRegistry, SearchSnippet, SourceConfig, SourceId, SourcePayload,
    SourceResult, SourceStep, TavilySearch, Target, WebSearch,
};
pub use tools::ToolKind;

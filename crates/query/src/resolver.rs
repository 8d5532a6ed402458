use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::llm::GenerationOracle;
use crate::retry::RetryPolicy;
use crate::sources::{
    FundDatabase, OracleSynthesisStep, PrimaryApiStep, RegulatoryScrapeStep, ResolveRequest,
    SchemeRegistry, SecondaryRegistryStep, SourceConfig, SourceId, SourceResult, SourceStep,
    WebSearch, WebSearchStep,
};

/// Every attempt made for one request, in chain order. The chain stops at
/// the first hit, so only the last attempt can be found.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub attempts: Vec<SourceResult>,
}

impl Resolution {
    pub fn hit(&self) -> Option<&SourceResult> {
        self.attempts.last().filter(|r| r.found)
    }

    /// The hit, or a miss carrying every step's error in order.
    pub fn outcome(&self) -> SourceResult {
        if let Some(hit) = self.hit() {
            return hit.clone();
        }

        let error = self
            .attempts
            .iter()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.source_id,
                    r.error.as_deref().unwrap_or("no result")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        let last = self
            .attempts
            .last()
            .map_or(SourceId::GenerationOracle, |r| r.source_id);
        let mut miss = SourceResult::miss(last, error);
        miss.latency_ms = self.attempts.iter().map(|r| r.latency_ms).sum();
        miss.retries = self.retries();
        miss
    }

    pub fn retries(&self) -> usize {
        self.attempts.iter().map(|r| r.retries).sum()
    }

    /// Wall time spent in external data APIs.
    pub fn api_ms(&self) -> f64 {
        self.attempts
            .iter()
            .filter(|r| r.source_id.is_data_api())
            .map(|r| r.latency_ms)
            .sum()
    }

    /// Wall time spent in the oracle synthesis step.
    pub fn oracle_ms(&self) -> f64 {
        self.attempts
            .iter()
            .filter(|r| !r.source_id.is_data_api())
            .map(|r| r.latency_ms)
            .sum()
    }
}

/// Ordered fallback over data sources. Steps run strictly one after
/// another; each catches its own failures.
pub struct ResolverChain {
    steps: Vec<Box<dyn SourceStep>>,
    retry: RetryPolicy,
}

impl ResolverChain {
    pub fn new(steps: Vec<Box<dyn SourceStep>>, retry: RetryPolicy) -> Self {
        Self { steps, retry }
    }

    /// Primary API, regulatory scrape, scheme registry, web search, oracle.
    pub fn standard(
        db: Arc<dyn FundDatabase>,
        registry: Arc<dyn SchemeRegistry>,
        search: Arc<dyn WebSearch>,
        oracle: Arc<dyn GenerationOracle>,
        config: &SourceConfig,
        synthesis_temperature: f32,
        retry: RetryPolicy,
    ) -> Self {
        let steps: Vec<Box<dyn SourceStep>> = vec![
            Box::new(PrimaryApiStep::new(db, config.max_fund_results)),
            Box::new(RegulatoryScrapeStep),
            Box::new(SecondaryRegistryStep::new(registry, config.max_fund_results)),
            Box::new(WebSearchStep::new(
                search,
                config.trusted_domains.clone(),
                config.max_web_results,
            )),
            Box::new(OracleSynthesisStep::new(oracle, synthesis_temperature)),
        ];
        Self::new(steps, retry)
    }

    pub fn step_ids(&self) -> Vec<SourceId> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Resolution {
        let mut attempts = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let result = self.attempt(step.as_ref(), request).await;
            let found = result.found;
            attempts.push(result);
            if found {
                break;
            }
        }

        let resolution = Resolution { attempts };
        if resolution.hit().is_none() {
            warn!(
                intent = %request.intent,
                steps = resolution.attempts.len(),
                "Resolver chain exhausted"
            );
        }
        resolution
    }

    async fn attempt(&self, step: &dyn SourceStep, request: &ResolveRequest) -> SourceResult {
        let source = step.id();
        let start = Instant::now();

        let (outcome, retries) = self
            .retry
            .retry_if(source.as_str(), || step.fetch(request), |e| e.is_transient())
            .await;

        let mut result = match outcome {
            Ok((payload, confidence)) if !payload.is_empty() => {
                SourceResult::hit(source, payload, confidence)
            }
            Ok(_) => SourceResult::miss(source, "empty result set"),
            Err(e) => SourceResult::miss(source, e.to_string()),
        };
        result.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        result.retries = retries;

        debug!(
            source = source.as_str(),
            found = result.found,
            retries = retries,
            latency_ms = result.latency_ms,
            error = result.error.as_deref().unwrap_or(""),
            "Resolver step finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::sources::{FundRecord, SchemeRecord, SourcePayload, Target};
    use crate::stubs::{StubFundDatabase, StubOracle, StubSchemeRegistry, StubWebSearch};
    use extract::Intent;

    fn fund_request(name: &str) -> ResolveRequest {
        ResolveRequest {
            intent: Intent::NavRequest,
            query: format!("nav of {}", name),
            target: Target::Fund {
                name: Some(name.to_string()),
                isin: None,
            },
        }
    }

    fn chain(
        db: &Arc<StubFundDatabase>,
        registry: &Arc<StubSchemeRegistry>,
        search: &Arc<StubWebSearch>,
        oracle: &Arc<StubOracle>,
    ) -> ResolverChain {
        ResolverChain::standard(
            db.clone(),
            registry.clone(),
            search.clone(),
            oracle.clone(),
            &SourceConfig::default(),
            0.3,
            RetryPolicy::new(2, 1, 2),
        )
    }

    #[test]
    fn test_standard_chain_order() {
        let chain = chain(
            &Arc::new(StubFundDatabase::empty()),
            &Arc::new(StubSchemeRegistry::empty()),
            &Arc::new(StubWebSearch::empty()),
            &Arc::new(StubOracle::fixed("unused")),
        );
        assert_eq!(
            chain.step_ids(),
            vec![
                SourceId::PrimaryApi,
                SourceId::RegulatoryScrape,
                SourceId::SecondaryRegistry,
                SourceId::WebSearch,
                SourceId::GenerationOracle,
            ]
        );
    }

    #[tokio::test]
    async fn test_secondary_hit_short_circuits_later_steps() {
        let db = Arc::new(StubFundDatabase::failing(SourceError::Status(404)));
        let registry = Arc::new(StubSchemeRegistry::with(vec![SchemeRecord::named(
            "Axis Bluechip Fund - Direct Growth",
        )]));
        let search = Arc::new(StubWebSearch::empty());
        let oracle = Arc::new(StubOracle::fixed("should not be used"));

        let resolution = chain(&db, &registry, &search, &oracle)
            .resolve(&fund_request("Axis Bluechip Fund"))
            .await;

        let outcome = resolution.outcome();
        assert!(outcome.found);
        assert_eq!(outcome.source_id, SourceId::SecondaryRegistry);
        assert_eq!(outcome.confidence, 0.95);
        assert_eq!(resolution.attempts.len(), 3);
        assert_eq!(search.calls(), 0);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_steps_fail_keeps_every_error() {
        let db = Arc::new(StubFundDatabase::failing(SourceError::Status(404)));
        let registry = Arc::new(StubSchemeRegistry::failing(SourceError::Status(400)));
        let search = Arc::new(StubWebSearch::failing(SourceError::Unavailable(
            "web search API key not configured".to_string(),
        )));
        let oracle = Arc::new(StubOracle::fixed("guess"));

        let resolution = chain(&db, &registry, &search, &oracle)
            .resolve(&fund_request("Nonexistent Fund"))
            .await;
        let outcome = resolution.outcome();

        assert!(!outcome.found);
        assert!(outcome.payload.is_none());
        assert_eq!(resolution.attempts.len(), 5);

        let error = outcome.error.unwrap();
        assert!(error.contains("PRIMARY_API: upstream returned HTTP 404"));
        assert!(error.contains("REGULATORY_SCRAPE: unavailable"));
        assert!(error.contains("SECONDARY_REGISTRY: upstream returned HTTP 400"));
        assert!(error.contains("WEB_SEARCH: unavailable: web search API key not configured"));
        assert!(error.contains("GENERATION_ORACLE: not applicable"));

        // A NAV question never reaches the model for its figures.
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_within_step() {
        let db = Arc::new(StubFundDatabase::flaky(
            2,
            vec![FundRecord {
                nav: Some(842.5),
                ..FundRecord::named("HDFC Top 100 Fund")
            }],
        ));
        let registry = Arc::new(StubSchemeRegistry::empty());
        let search = Arc::new(StubWebSearch::empty());
        let oracle = Arc::new(StubOracle::fixed(""));

        let resolution = chain(&db, &registry, &search, &oracle)
            .resolve(&fund_request("HDFC Top 100 Fund"))
            .await;

        assert_eq!(resolution.attempts.len(), 1);
        assert!(resolution.hit().is_some());
        assert_eq!(resolution.retries(), 2);
        assert_eq!(db.calls(), 3);
        assert_eq!(registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_oracle_answers_guidance_topics() {
        let db = Arc::new(StubFundDatabase::empty());
        let registry = Arc::new(StubSchemeRegistry::empty());
        let search = Arc::new(StubWebSearch::empty());
        let oracle = Arc::new(StubOracle::fixed("Bring your PAN and address proof."));

        let request = ResolveRequest {
            intent: Intent::KycQuery,
            query: "what documents do I need for kyc".to_string(),
            target: Target::Topic,
        };
        let resolution = chain(&db, &registry, &search, &oracle).resolve(&request).await;
        let outcome = resolution.outcome();

        assert_eq!(outcome.source_id, SourceId::GenerationOracle);
        assert_eq!(
            outcome.payload,
            Some(SourcePayload::Synthesis(
                "Bring your PAN and address proof.".to_string()
            ))
        );
        assert_eq!(db.calls(), 0);
        assert_eq!(search.calls(), 1);
        assert_eq!(oracle.calls(), 1);
    }
}

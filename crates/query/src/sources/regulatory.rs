use async_trait::async_trait;

use super::{ResolveRequest, SourceId, SourcePayload, SourceStep};
use crate::error::SourceError;

/// Placeholder link for scraping regulator filings. Keeps its position in
/// the chain so attempts are reported in the full order, but never finds
/// anything.
#[derive(Debug, Default)]
pub struct RegulatoryScrapeStep;

#[async_trait]
impl SourceStep for RegulatoryScrapeStep {
    fn id(&self) -> SourceId {
        SourceId::RegulatoryScrape
    }

    async fn fetch(&self, _request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError> {
        Err(SourceError::Unavailable(
            "regulatory filing scrape is not implemented".to_string(),
        ))
    }
}

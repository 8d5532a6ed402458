use thiserror::Error;

/// Failure of a single data source call. Transient variants are retried
/// inside the step; the rest move the chain on to the next source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("no results for {0}")]
    Empty(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("not applicable: {0}")]
    NotApplicable(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout | SourceError::Connect(_) => true,
            SourceError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_connect() {
            SourceError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Other(e.to_string())
        }
    }
}

impl From<anyhow::Error> for SourceError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<reqwest::Error>() {
            Some(inner) if inner.is_timeout() => SourceError::Timeout,
            Some(inner) if inner.is_connect() => SourceError::Connect(inner.to_string()),
            _ => SourceError::Other(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::Timeout.is_transient());
        assert!(SourceError::Connect("refused".into()).is_transient());
        assert!(SourceError::Status(503).is_transient());
        assert!(SourceError::Status(429).is_transient());
        assert!(!SourceError::Status(404).is_transient());
        assert!(!SourceError::Empty("Axis".into()).is_transient());
        assert!(!SourceError::Unavailable("scrape".into()).is_transient());
    }
}

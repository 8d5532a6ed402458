use anyhow::Result;
use eval::{AgentConfig, EnvOverlay};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    /// How long shutdown waits for in-flight evaluations before closing the store.
    pub shutdown_grace_secs: u64,
    #[serde(flatten)]
    pub agent: AgentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            shutdown_grace_secs: 10,
            agent: AgentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with process environment and `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            agent: AgentConfig::from_lookup(&lookup)?,
            ..Self::default()
        };
        let env = EnvOverlay::new(&lookup);
        env.set_string("LISTEN_ADDR", &mut config.listen_addr);
        env.parse("SHUTDOWN_GRACE_SECS", &mut config.shutdown_grace_secs)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr_and_agent_overlay() {
        let config = AppConfig::from_lookup(|key| match key {
            "LISTEN_ADDR" => Some("127.0.0.1:8080".to_string()),
            "DATABASE_PATH" => Some("/tmp/evals.db".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.shutdown_grace_secs, 10);
        assert_eq!(config.agent.database_path, "/tmp/evals.db");
        assert_eq!(config.agent.eval.confidence_threshold, 0.75);
    }

    #[test]
    fn test_invalid_agent_setting_fails() {
        let err = AppConfig::from_lookup(|key| (key == "CONFIDENCE_THRESHOLD").then(|| "high".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CONFIDENCE_THRESHOLD"));
    }
}

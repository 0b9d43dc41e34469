// mailsentry/src/config.rs
//
// Engine configuration: loaded once at startup, immutable afterwards.
//
// JSON file layout (every field optional; defaults shown by `EngineConfig::default()`):
//
//   {
//     "overall_deadline_ms": 30000,
//     "per_call_timeout_ms": 30000,
//     "default_strategy":    "majority",
//     "detectors": [
//       { "type": "rule",   "rule": "links" },
//       { "type": "remote", "name": "bert", "endpoint": "http://bert:8000", "timeout_ms": 10000 }
//     ],
//     "strategies": [
//       { "kind": "majority" },
//       { "kind": "weighted", "weights": { "links": 46, "sender": 75, "bert": 78 } },
//       { "kind": "recall_biased", "name": "recall", "roles": ["bert", "links", "sender"] }
//     ],
//     "expected_domains": [ { "brand": "paypal", "domains": ["paypal.com"] } ]
//   }
//
// Every structural problem is a ConfigError raised while the engine is built,
// never per item.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detectors::sender::{default_expected_domains, ExpectedDomain};
use crate::detectors::{
    remote, LanguageDetector, LinkDetector, RemoteDetector, SenderDetector, SharedDetector,
};
use crate::engine::ensemble::{StrategyRule, StrategySpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no detectors configured")]
    EmptyDetectorSet,
    #[error("detector '{0}' registered twice")]
    DuplicateDetector(String),
    #[error("strategy '{strategy}' references unknown detector '{detector}'")]
    UnknownDetector { strategy: String, detector: String },
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("strategy '{0}' registered twice")]
    DuplicateStrategy(String),
    #[error("no strategies configured")]
    EmptyStrategySet,
    #[error("strategy '{strategy}': weight {weight} for '{detector}' must be finite and > 0")]
    InvalidWeight { strategy: String, detector: String, weight: f64 },
    #[error("strategy '{strategy}': quorum {quorum} outside 1..={max}")]
    InvalidQuorum { strategy: String, quorum: usize, max: usize },
    #[error("strategy '{strategy}': {detail}")]
    InvalidStrategy { strategy: String, detail: String },
    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
    #[error("detector '{detector}': endpoint '{endpoint}' must be an http(s) URL")]
    InvalidEndpoint { detector: String, endpoint: String },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client build failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Links,
    Sender,
    Language,
}

impl RuleKind {
    fn default_name(self) -> &'static str {
        match self {
            Self::Links => "links",
            Self::Sender => "sender",
            Self::Language => "language",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    Rule {
        rule: RuleKind,
        #[serde(default)]
        name: Option<String>,
    },
    Remote {
        name: String,
        endpoint: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl DetectorConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Rule { rule, name } => name.as_deref().unwrap_or(rule.default_name()),
            Self::Remote { name, .. } => name.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detectors: Vec<DetectorConfig>,
    pub overall_deadline_ms: u64,
    pub per_call_timeout_ms: u64,
    pub strategies: Vec<StrategySpec>,
    pub default_strategy: String,
    pub expected_domains: Vec<ExpectedDomain>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let rule = |rule| DetectorConfig::Rule { rule, name: None };
        let spec = |rule| StrategySpec { name: None, rule };
        Self {
            detectors: vec![rule(RuleKind::Links), rule(RuleKind::Sender), rule(RuleKind::Language)],
            overall_deadline_ms: 30_000,
            per_call_timeout_ms: remote::DEFAULT_TIMEOUT.as_millis() as u64,
            strategies: vec![
                spec(StrategyRule::Majority),
                spec(StrategyRule::Unanimous),
                spec(StrategyRule::Any),
                spec(StrategyRule::Weighted { weights: Default::default() }),
            ],
            default_strategy: "majority".into(),
            expected_domains: default_expected_domains(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn overall_deadline(&self) -> Result<Duration, ConfigError> {
        match self.overall_deadline_ms {
            0 => Err(ConfigError::InvalidDeadline("overall_deadline_ms must be > 0".into())),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    pub fn per_call_timeout(&self) -> Result<Duration, ConfigError> {
        match self.per_call_timeout_ms {
            0 => Err(ConfigError::InvalidDeadline("per_call_timeout_ms must be > 0".into())),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(DetectorConfig::name).collect()
    }

    /// Instantiate the configured detectors in registration order.
    pub fn build_detectors(&self) -> Result<Vec<SharedDetector>, ConfigError> {
        if self.detectors.is_empty() {
            return Err(ConfigError::EmptyDetectorSet);
        }
        let default_timeout = self.per_call_timeout()?;
        let mut seen = HashSet::new();
        let mut out: Vec<SharedDetector> = Vec::with_capacity(self.detectors.len());

        for cfg in &self.detectors {
            let name = cfg.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateDetector(name));
            }
            let detector: SharedDetector = match cfg {
                DetectorConfig::Rule { rule: RuleKind::Links, .. } => {
                    Arc::new(LinkDetector::named(name))
                }
                DetectorConfig::Rule { rule: RuleKind::Sender, .. } => {
                    Arc::new(SenderDetector::named(name, self.expected_domains.clone()))
                }
                DetectorConfig::Rule { rule: RuleKind::Language, .. } => {
                    Arc::new(LanguageDetector::named(name))
                }
                DetectorConfig::Remote { endpoint, timeout_ms, .. } => {
                    let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(default_timeout);
                    Arc::new(RemoteDetector::new(name, endpoint.clone(), timeout)?)
                }
            };
            out.push(detector);
        }
        Ok(out)
    }
}

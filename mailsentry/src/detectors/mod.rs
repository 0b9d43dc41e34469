// mailsentry/src/detectors/mod.rs
//
// Detector contract + the built-in implementations.
//
//   links    : URL shorteners, IP-literal hosts, anchor/href mismatch   (rule)
//   sender   : sender domain vs expected-domain allowlist, lookalikes  (rule)
//   language : urgency / credential-request density, generic greeting (rule)
//   remote   : opaque HTTP scoring service behind /predict             (remote)
//
// Rule detectors never fail. Remote detectors map every transport or protocol
// problem to a DetectorError; "nothing suspicious" is always a clean Verdict.

pub mod language;
pub mod links;
pub mod remote;
pub mod sender;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::item::{DetectorError, Item, Verdict};

pub use language::LanguageDetector;
pub use links::LinkDetector;
pub use remote::RemoteDetector;
pub use sender::SenderDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Rule,   // local, deterministic, never fails
    Remote, // network-bound, may time out or fail
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => write!(f, "rule"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// One independent binary scorer.
///
/// Implementations are shared across concurrent dispatches as
/// `Arc<dyn Detector>`, so they must not hold mutable state.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Registration name; unique within an engine.
    fn name(&self) -> &str;

    fn kind(&self) -> DetectorKind {
        DetectorKind::Rule
    }

    /// Score one item. `deadline` is the latest instant the caller will wait.
    async fn analyze(&self, item: &Item, deadline: Instant) -> Result<Verdict, DetectorError>;
}

pub type SharedDetector = Arc<dyn Detector>;

/// Weighted rule-signal accumulator shared by the rule detectors.
///
/// Each fired signal adds its weight and one indicator; the total is capped at
/// 100 and compared strictly against the detector threshold.
#[derive(Debug, Default)]
pub(crate) struct RiskScore {
    score: u32,
    indicators: Vec<String>,
}

impl RiskScore {
    pub(crate) fn add(&mut self, weight: u32, indicator: impl Into<String>) {
        self.score += weight;
        self.indicators.push(indicator.into());
    }

    pub(crate) fn score(&self) -> u32 {
        self.score.min(100)
    }

    pub(crate) fn into_verdict(self, threshold: u32) -> Verdict {
        let score = self.score();
        Verdict::new(score > threshold, score, self.indicators)
    }
}

// mailsentry/src/item.rs
//
// Shared domain types flowing through the engine.
//
//   Item            → immutable input (one email)
//   Verdict         → one detector's judgment
//   DetectorError   → why a detector could not judge at all
//   DetectorResult  → verdict-or-error per registered detector, per run
//   EnsembleVerdict → the fused decision plus the exact results it came from

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

// ── Input ─────────────────────────────────────────────────────────────────────

/// A normalized email supplied by the ingestion side. Never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_html: String,
}

impl Item {
    pub fn new(
        subject: impl Into<String>,
        sender: impl Into<String>,
        body_text: impl Into<String>,
        body_html: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            sender: sender.into(),
            body_text: body_text.into(),
            body_html: body_html.into(),
        }
    }

    /// SHA256[:8] over all four fields: stable audit tag for logs and reports.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        for field in [&self.subject, &self.sender, &self.body_text, &self.body_html] {
            h.update((field.len() as u64).to_le_bytes());
            h.update(field.as_bytes());
        }
        hex::encode(&h.finalize()[..8])
    }

    /// Lowercased domain part of the sender address, if there is one.
    /// Accepts both `user@host` and `Display Name <user@host>`.
    pub fn sender_domain(&self) -> Option<String> {
        let addr = match (self.sender.rfind('<'), self.sender.rfind('>')) {
            (Some(l), Some(r)) if l < r => &self.sender[l + 1..r],
            _ => self.sender.as_str(),
        };
        let domain = addr.trim().rsplit_once('@')?.1.trim().trim_end_matches('.');
        if domain.is_empty() {
            None
        } else {
            Some(domain.to_ascii_lowercase())
        }
    }

    /// Display name of the sender (`"PayPal Support" <x@y>` → `PayPal Support`).
    pub fn sender_display_name(&self) -> Option<&str> {
        let l = self.sender.find('<')?;
        let name = self.sender[..l].trim().trim_matches('"').trim();
        (!name.is_empty()).then_some(name)
    }

    /// Subject + plain body + html body, newline separated, for text scanners.
    pub fn combined_text(&self) -> String {
        let mut s = String::with_capacity(
            self.subject.len() + self.body_text.len() + self.body_html.len() + 2,
        );
        s.push_str(&self.subject);
        s.push('\n');
        s.push_str(&self.body_text);
        s.push('\n');
        s.push_str(&self.body_html);
        s
    }
}

// ── Detector output ───────────────────────────────────────────────────────────

/// One detector's judgment. `confidence` is detector-local (0–100) and is not
/// comparable across detectors of different calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_positive: bool,
    pub confidence: u8,
    pub indicators: Vec<String>,
}

impl Verdict {
    pub fn new(is_positive: bool, confidence: u32, indicators: Vec<String>) -> Self {
        Self {
            is_positive,
            confidence: confidence.min(100) as u8,
            indicators,
        }
    }

    pub fn positive(confidence: u32) -> Self {
        Self::new(true, confidence, Vec::new())
    }

    pub fn negative(confidence: u32) -> Self {
        Self::new(false, confidence, Vec::new())
    }
}

/// Inability to evaluate at all. Recoverable: the dispatcher records it and
/// the aggregator treats the detector as abstaining.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DetectorError {
    #[error("detector timed out")]
    Timeout,
    #[error("detector endpoint unreachable")]
    Unreachable,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Outcome of one detector for one dispatch. Exactly one of `verdict` / `err`
/// is set; use the constructors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorResult {
    pub detector_name: String,
    pub verdict: Option<Verdict>,
    pub err: Option<DetectorError>,
    #[serde(rename = "latency_ms", serialize_with = "duration_ms")]
    pub latency: Duration,
}

impl DetectorResult {
    pub fn ok(detector_name: impl Into<String>, verdict: Verdict, latency: Duration) -> Self {
        Self {
            detector_name: detector_name.into(),
            verdict: Some(verdict),
            err: None,
            latency,
        }
    }

    pub fn failed(detector_name: impl Into<String>, err: DetectorError, latency: Duration) -> Self {
        Self {
            detector_name: detector_name.into(),
            verdict: None,
            err: Some(err),
            latency,
        }
    }

    pub fn from_outcome(
        detector_name: impl Into<String>,
        outcome: Result<Verdict, DetectorError>,
        latency: Duration,
    ) -> Self {
        match outcome {
            Ok(v) => Self::ok(detector_name, v, latency),
            Err(e) => Self::failed(detector_name, e, latency),
        }
    }

    pub fn is_abstention(&self) -> bool {
        self.verdict.is_none()
    }
}

fn duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ── Ensemble output ───────────────────────────────────────────────────────────

/// Final decision. `contributing` is the exact result set the strategy saw,
/// abstentions included, so a decision can be replayed for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleVerdict {
    pub is_positive: bool,
    pub aggregate_confidence: f64,
    pub strategy: String,
    pub votes_for: usize,
    pub votes_against: usize,
    pub abstentions: usize,
    pub contributing: Vec<DetectorResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_domain_handles_display_names() {
        let mut item = Item::new("", "\"PayPal\" <service@PayPal-Secure.com>", "", "");
        assert_eq!(item.sender_domain().as_deref(), Some("paypal-secure.com"));
        assert_eq!(item.sender_display_name(), Some("PayPal"));

        item.sender = "alice@example.org".into();
        assert_eq!(item.sender_domain().as_deref(), Some("example.org"));
        assert_eq!(item.sender_display_name(), None);

        item.sender = "no-address-here".into();
        assert_eq!(item.sender_domain(), None);
    }

    #[test]
    fn digest_is_stable_and_field_sensitive() {
        let a = Item::new("hi", "a@b.c", "body", "");
        let b = Item::new("hi", "a@b.c", "body", "");
        let c = Item::new("hib", "a@b.c", "ody", "");
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 16);
    }

    #[test]
    fn verdict_confidence_is_clamped() {
        assert_eq!(Verdict::positive(250).confidence, 100);
        assert_eq!(Verdict::negative(0).indicators, Vec::<String>::new());
    }

    #[test]
    fn detector_error_serializes_tagged() {
        let json = serde_json::to_value(DetectorError::ProtocolError("HTTP 503".into())).unwrap();
        assert_eq!(json["kind"], "protocol_error");
        assert_eq!(json["detail"], "HTTP 503");
        let json = serde_json::to_value(DetectorError::Timeout).unwrap();
        assert_eq!(json["kind"], "timeout");
    }

    #[test]
    fn result_carries_exactly_one_side() {
        let ok = DetectorResult::ok("a", Verdict::negative(0), Duration::from_millis(3));
        assert!(ok.verdict.is_some() && ok.err.is_none());
        let bad = DetectorResult::failed("b", DetectorError::Unreachable, Duration::ZERO);
        assert!(bad.is_abstention() && bad.err.is_some());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["latency_ms"], 3);
    }
}

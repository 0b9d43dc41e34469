// mailsentry/src/engine/ensemble.rs
//
// Ensemble aggregation: pure reduction of a DetectorResult set into one
// EnsembleVerdict.
//
// Errors are abstentions: excluded from every vote count and weight sum but
// kept in `contributing` for audit.
//
// Strategies:
//   majority          positive iff positives ≥ ceil(voters / 2)
//   unanimous         positive iff every voter is positive
//   any               positive iff at least one voter is positive
//   weighted          positive iff Σ(w·pos) / Σ(w) ≥ 0.5   (missing weight = 1.0)
//   precision_biased  positive iff any detector in `roles` is positive
//   recall_biased     positive iff roles[0] is positive,
//                     else iff ≥ quorum of roles[1..] are positive
//
// Aggregate confidence = mean confidence of the voters agreeing with the final
// label (weight-averaged for `weighted`).  All voters abstaining ⇒ negative
// with confidence 0, for every strategy.
//
// No randomness, no clock: identical input ⇒ identical output.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::item::{DetectorResult, EnsembleVerdict};

const WEIGHTED_CUTOFF: f64 = 0.5;

fn default_quorum() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyRule {
    Majority,
    Unanimous,
    Any,
    Weighted {
        #[serde(default)]
        weights: BTreeMap<String, f64>,
    },
    /// Ordered detector roles; any one of them saying positive is enough.
    PrecisionBiased { roles: Vec<String> },
    /// `roles[0]` is the highest-recall detector, the rest need a quorum.
    RecallBiased {
        roles: Vec<String>,
        #[serde(default = "default_quorum")]
        quorum: usize,
    },
}

impl StrategyRule {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Majority => "majority",
            Self::Unanimous => "unanimous",
            Self::Any => "any",
            Self::Weighted { .. } => "weighted",
            Self::PrecisionBiased { .. } => "precision_biased",
            Self::RecallBiased { .. } => "recall_biased",
        }
    }

    fn referenced_detectors(&self) -> Vec<&str> {
        match self {
            Self::Weighted { weights } => weights.keys().map(String::as_str).collect(),
            Self::PrecisionBiased { roles } | Self::RecallBiased { roles, .. } => {
                roles.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Config-file form of a strategy: optional name + the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub rule: StrategyRule,
}

impl StrategySpec {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.rule.kind_name())
    }
}

// ── Votes ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Vote<'a> {
    detector: &'a str,
    positive: bool,
    confidence: f64,
}

fn votes(results: &[DetectorResult]) -> Vec<Vote<'_>> {
    results
        .iter()
        .filter_map(|r| {
            r.verdict.as_ref().map(|v| Vote {
                detector: r.detector_name.as_str(),
                positive: v.is_positive,
                confidence: v.confidence as f64,
            })
        })
        .collect()
}

fn positive_role(votes: &[Vote<'_>], role: &str) -> bool {
    votes.iter().any(|v| v.detector == role && v.positive)
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

// ── Strategy ──────────────────────────────────────────────────────────────────

/// A named, validated aggregation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    name: String,
    rule: StrategyRule,
}

impl Strategy {
    pub fn new(name: impl Into<String>, rule: StrategyRule) -> Self {
        Self { name: name.into(), rule }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self, detector: &str) -> f64 {
        match &self.rule {
            StrategyRule::Weighted { weights } => weights.get(detector).copied().unwrap_or(1.0),
            _ => 1.0,
        }
    }

    fn decide(&self, votes: &[Vote<'_>]) -> bool {
        if votes.is_empty() {
            return false;
        }
        let positives = votes.iter().filter(|v| v.positive).count();
        match &self.rule {
            StrategyRule::Majority => positives >= (votes.len() + 1) / 2,
            StrategyRule::Unanimous => positives == votes.len(),
            StrategyRule::Any => positives > 0,
            StrategyRule::Weighted { .. } => {
                let total: f64 = votes.iter().map(|v| self.weight(v.detector)).sum();
                let pos: f64 = votes
                    .iter()
                    .filter(|v| v.positive)
                    .map(|v| self.weight(v.detector))
                    .sum();
                total > 0.0 && pos / total >= WEIGHTED_CUTOFF
            }
            StrategyRule::PrecisionBiased { roles } => roles.iter().any(|r| positive_role(votes, r)),
            StrategyRule::RecallBiased { roles, quorum } => match roles.split_first() {
                Some((primary, rest)) => {
                    positive_role(votes, primary)
                        || rest.iter().filter(|r| positive_role(votes, r)).count() >= *quorum
                }
                None => false,
            },
        }
    }

    /// Reduce one result set to a verdict. Pure.
    pub fn apply(&self, results: &[DetectorResult]) -> EnsembleVerdict {
        let votes = votes(results);
        let is_positive = self.decide(&votes);

        let (num, den) = votes
            .iter()
            .filter(|v| v.positive == is_positive)
            .fold((0.0f64, 0.0f64), |(n, d), v| {
                let w = self.weight(v.detector);
                (n + w * v.confidence, d + w)
            });
        let aggregate_confidence = if den > 0.0 { round4(num / den) } else { 0.0 };

        let votes_for = votes.iter().filter(|v| v.positive).count();
        EnsembleVerdict {
            is_positive,
            aggregate_confidence,
            strategy: self.name.clone(),
            votes_for,
            votes_against: votes.len() - votes_for,
            abstentions: results.len() - votes.len(),
            contributing: results.to_vec(),
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → strategy, in registration order. Validated against the registered
/// detector names when built; lookups of unknown names are ConfigErrors.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
}

impl StrategyRegistry {
    pub fn new<S: AsRef<str>>(specs: &[StrategySpec], detectors: &[S]) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyStrategySet);
        }
        let known: HashSet<&str> = detectors.iter().map(AsRef::as_ref).collect();
        let mut names = HashSet::new();
        let mut strategies = Vec::with_capacity(specs.len());

        for spec in specs {
            let name = spec.name().to_string();
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateStrategy(name));
            }
            for d in spec.rule.referenced_detectors() {
                if !known.contains(d) {
                    return Err(ConfigError::UnknownDetector { strategy: name, detector: d.to_string() });
                }
            }
            match &spec.rule {
                StrategyRule::Weighted { weights } => {
                    if let Some((d, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w <= 0.0) {
                        return Err(ConfigError::InvalidWeight {
                            strategy: name,
                            detector: d.clone(),
                            weight: *w,
                        });
                    }
                }
                StrategyRule::PrecisionBiased { roles } if roles.is_empty() => {
                    return Err(ConfigError::InvalidStrategy { strategy: name, detail: "roles must not be empty".into() });
                }
                StrategyRule::RecallBiased { roles, quorum } => {
                    if roles.is_empty() {
                        return Err(ConfigError::InvalidStrategy { strategy: name, detail: "roles must not be empty".into() });
                    }
                    // a lone primary never consults the quorum
                    let max = roles.len() - 1;
                    if *quorum == 0 || (max > 0 && *quorum > max) {
                        return Err(ConfigError::InvalidQuorum { strategy: name, quorum: *quorum, max });
                    }
                }
                _ => {}
            }
            strategies.push(Strategy::new(name, spec.rule.clone()));
        }
        Ok(Self { strategies })
    }

    pub fn get(&self, name: &str) -> Result<&Strategy, ConfigError> {
        self.strategies
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }
}

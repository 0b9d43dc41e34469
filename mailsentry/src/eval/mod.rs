// mailsentry/src/eval/mod.rs
//
// Offline evaluation harness.
//
// Replays a labeled corpus through the engine and scores every registered
// strategy against the ground truth:
//   1. Dispatch each item once (bounded outer parallelism, dataset order kept)
//   2. Apply every strategy to that same result set
//   3. Confusion matrix per strategy, plus per-detector matrices for context
//   4. Rank strategies by F1, then accuracy, then registration order
//
// Run:
//   mailsentry --mode eval --path emails.csv
//   mailsentry --mode eval --path emails.csv --json --limit 500

pub mod dataset;
pub mod report;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::detectors::DetectorKind;
use crate::engine::{Engine, Strategy};
use crate::item::DetectorResult;

pub use dataset::LabeledItem;

pub const DEFAULT_CONCURRENCY: usize = 4;

// ── Confusion matrix ──────────────────────────────────────────────────────────

/// Binary confusion counts. Derived metrics are percentages, 0 when their
/// denominator is 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub tp: u64,
    pub tn: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
}

fn pct(num: u64, denom: u64) -> f64 {
    if denom == 0 { 0.0 } else { num as f64 * 100.0 / denom as f64 }
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, true) => self.fn_ += 1,
            (false, false) => self.tn += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        pct(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        pct(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        pct(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn fpr(&self) -> f64 {
        pct(self.fp, self.fp + self.tn)
    }
}

// ── Scores ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StrategyScore {
    pub strategy: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fpr: f64,
    pub matrix: ConfusionMatrix,
}

impl StrategyScore {
    fn new(strategy: &str, matrix: ConfusionMatrix) -> Self {
        Self {
            strategy: strategy.to_string(),
            accuracy: matrix.accuracy(),
            precision: matrix.precision(),
            recall: matrix.recall(),
            f1: matrix.f1(),
            fpr: matrix.fpr(),
            matrix,
        }
    }
}

/// Standalone performance of one detector. Abstentions are counted apart
/// and left out of the matrix.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorScore {
    pub detector: String,
    pub kind: DetectorKind,
    pub abstentions: u64,
    pub matrix: ConfusionMatrix,
}

impl DetectorScore {
    pub fn f1(&self) -> f64 {
        self.matrix.f1()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub items: usize,
    pub positives: usize,
    pub negatives: usize,
    pub elapsed_ms: u64,
    /// Best first.
    pub strategies: Vec<StrategyScore>,
    /// Registration order.
    pub detectors: Vec<DetectorScore>,
}

impl EvalReport {
    pub fn best(&self) -> Option<&StrategyScore> {
        self.strategies.first()
    }

    /// Weighted-strategy weights from standalone detector F1, floored at 1 so
    /// that no detector is silenced outright.
    pub fn suggested_weights(&self) -> BTreeMap<String, f64> {
        self.detectors
            .iter()
            .map(|d| (d.detector.clone(), ((d.f1() * 100.0).round() / 100.0).max(1.0)))
            .collect()
    }
}

/// F1 desc, then accuracy desc. Stable sort keeps registration order on ties.
fn rank(scores: &mut [StrategyScore]) {
    scores.sort_by(|a, b| {
        b.f1.partial_cmp(&a.f1)
            .unwrap_or(Ordering::Equal)
            .then(b.accuracy.partial_cmp(&a.accuracy).unwrap_or(Ordering::Equal))
    });
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub struct Evaluator<'a> {
    engine: &'a Engine,
    concurrency: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine, concurrency: DEFAULT_CONCURRENCY }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub async fn evaluate(&self, labeled: Vec<LabeledItem>) -> EvalReport {
        let started = Instant::now();
        let engine = self.engine;
        let total = labeled.len();

        let mut tally = Tally::new(engine);
        let mut outcomes = stream::iter(labeled)
            .map(|li| async move { (li.label, engine.dispatch_all(&li.item).await) })
            .buffered(self.concurrency);

        // Score each item as it completes; results are dropped right after.
        while let Some((label, results)) = outcomes.next().await {
            tally.observe(label, &results);
            if tally.items % 500 == 0 {
                info!("scored {}/{} items", tally.items, total);
            }
        }

        let report = tally.finish(started.elapsed().as_millis() as u64);
        if let Some(best) = report.best() {
            info!(items = report.items, best = %best.strategy, f1 = best.f1, "evaluation complete");
        }
        report
    }
}

// ── Running totals ────────────────────────────────────────────────────────────

struct Tally<'a> {
    strategies: Vec<&'a Strategy>,
    per_strategy: Vec<ConfusionMatrix>,
    detectors: Vec<DetectorScore>,
    items: usize,
    positives: usize,
}

impl<'a> Tally<'a> {
    fn new(engine: &'a Engine) -> Self {
        let strategies: Vec<&Strategy> = engine.registry().iter().collect();
        let detectors = engine
            .detectors()
            .iter()
            .map(|d| DetectorScore {
                detector: d.name().to_string(),
                kind: d.kind(),
                abstentions: 0,
                matrix: ConfusionMatrix::default(),
            })
            .collect();
        Self {
            per_strategy: vec![ConfusionMatrix::default(); strategies.len()],
            strategies,
            detectors,
            items: 0,
            positives: 0,
        }
    }

    fn observe(&mut self, label: bool, results: &[DetectorResult]) {
        for (s, m) in self.strategies.iter().zip(self.per_strategy.iter_mut()) {
            m.record(s.apply(results).is_positive, label);
        }
        for (r, d) in results.iter().zip(self.detectors.iter_mut()) {
            match &r.verdict {
                Some(v) => d.matrix.record(v.is_positive, label),
                None => d.abstentions += 1,
            }
        }
        self.items += 1;
        self.positives += label as usize;
    }

    fn finish(self, elapsed_ms: u64) -> EvalReport {
        let mut scores: Vec<StrategyScore> = self
            .strategies
            .iter()
            .zip(self.per_strategy)
            .map(|(s, m)| StrategyScore::new(s.name(), m))
            .collect();
        rank(&mut scores);
        EvalReport {
            items: self.items,
            positives: self.positives,
            negatives: self.items - self.positives,
            elapsed_ms,
            strategies: scores,
            detectors: self.detectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::dispatcher::tests::{mock, Behaviour};
    use crate::engine::{StrategyRule, StrategySpec};
    use crate::item::{DetectorError, Item};

    fn labeled(labels: &[bool]) -> Vec<LabeledItem> {
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| LabeledItem {
                item: Item::new(format!("item {}", i), "", "", ""),
                label,
                phishing_type: None,
            })
            .collect()
    }

    fn specs() -> Vec<StrategySpec> {
        [StrategyRule::Majority, StrategyRule::Unanimous, StrategyRule::Any]
            .into_iter()
            .map(|rule| StrategySpec { name: None, rule })
            .collect()
    }

    fn engine(detectors: Vec<crate::detectors::SharedDetector>) -> Engine {
        Engine::new(detectors, &specs(), "majority", Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn confusion_metrics() {
        let mut m = ConfusionMatrix::default();
        assert_eq!((m.accuracy(), m.precision(), m.recall(), m.f1()), (0.0, 0.0, 0.0, 0.0));
        m.record(true, true);
        m.record(true, true);
        m.record(true, false);
        m.record(false, true);
        m.record(false, false);
        assert_eq!(m, ConfusionMatrix { tp: 2, tn: 1, fp: 1, fn_: 1 });
        assert_eq!(m.total(), 5);
        assert_eq!(m.accuracy(), 60.0);
        assert_eq!(m.fpr(), 50.0);
    }

    #[tokio::test]
    async fn tally_scores_each_item_as_it_arrives() {
        let e = engine(vec![
            mock("yes", Behaviour::Answer(true, 80)),
            mock("down", Behaviour::Fail(DetectorError::Unreachable)),
        ]);
        let mut tally = Tally::new(&e);
        let first = e.dispatch_all(&Item::new("a", "", "", "")).await;
        tally.observe(true, &first);
        assert_eq!(tally.items, 1);
        assert_eq!(tally.per_strategy[0], ConfusionMatrix { tp: 1, tn: 0, fp: 0, fn_: 0 });
        assert_eq!(tally.detectors[1].abstentions, 1);

        let second = e.dispatch_all(&Item::new("b", "", "", "")).await;
        tally.observe(false, &second);
        let report = tally.finish(0);
        assert_eq!((report.items, report.positives, report.negatives), (2, 1, 1));
        assert_eq!(report.detectors[0].matrix, ConfusionMatrix { tp: 1, tn: 0, fp: 1, fn_: 0 });
    }

    #[tokio::test]
    async fn always_positive_detector_scores_half_accuracy() {
        let e = engine(vec![mock("yes", Behaviour::Answer(true, 99))]);
        let report = Evaluator::new(&e).evaluate(labeled(&[true, false, true, false])).await;

        let majority = report.strategies.iter().find(|s| s.strategy == "majority").unwrap();
        assert_eq!(majority.matrix, ConfusionMatrix { tp: 2, tn: 0, fp: 2, fn_: 0 });
        assert_eq!(majority.accuracy, 50.0);
        assert_eq!(majority.precision, 50.0);
        assert_eq!(majority.recall, 100.0);
        assert!((majority.f1 - 66.6667).abs() < 0.001);
        assert_eq!((report.positives, report.negatives), (2, 2));
    }

    #[tokio::test]
    async fn every_item_lands_in_exactly_one_cell() {
        let e = engine(vec![
            mock("yes", Behaviour::Answer(true, 80)),
            mock("no", Behaviour::Answer(false, 20)),
            mock("down", Behaviour::Fail(DetectorError::Unreachable)),
        ]);
        let report = Evaluator::new(&e)
            .with_concurrency(2)
            .evaluate(labeled(&[true, true, false, true, false]))
            .await;
        for s in &report.strategies {
            assert_eq!(s.matrix.total(), 5, "{}", s.strategy);
        }
        let down = &report.detectors[2];
        assert_eq!(down.abstentions, 5);
        assert_eq!(down.matrix.total(), 0);
        assert_eq!(report.detectors[0].matrix.total(), 5);
    }

    #[tokio::test]
    async fn ranking_breaks_ties_by_registration_order() {
        let e = engine(vec![mock("yes", Behaviour::Answer(true, 80)), mock("no", Behaviour::Answer(false, 20))]);
        let report = Evaluator::new(&e).evaluate(labeled(&[true, false, true, false])).await;
        let order: Vec<&str> = report.strategies.iter().map(|s| s.strategy.as_str()).collect();
        // majority (1-1 tie → positive) and any score identically; unanimous never fires
        assert_eq!(order, vec!["majority", "any", "unanimous"]);
        assert_eq!(report.best().map(|s| s.strategy.as_str()), Some("majority"));
    }

    #[tokio::test]
    async fn suggested_weights_follow_detector_f1() {
        let e = engine(vec![mock("yes", Behaviour::Answer(true, 80)), mock("no", Behaviour::Answer(false, 20))]);
        let report = Evaluator::new(&e).evaluate(labeled(&[true, false, true, false])).await;
        let w = report.suggested_weights();
        assert_eq!(w["yes"], 66.67);
        assert_eq!(w["no"], 1.0);
    }
}

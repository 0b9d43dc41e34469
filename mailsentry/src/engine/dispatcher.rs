// mailsentry/src/engine/dispatcher.rs
//
// Concurrent fan-out of one item to every registered detector.
//
// Each detector runs in its own task and reports `(index, result)` over an
// mpsc channel.  The collector waits until every slot is filled or the
// overall deadline passes, whichever comes first:
//
//   slot filled by its task                → verdict or detector error
//   still pending at the overall deadline  → Timeout, task aborted
//   task died without reporting (panic)    → ProtocolError
//
// Output always has one entry per detector, in registration order, so
// downstream aggregation never sees a partial or reordered set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::detectors::SharedDetector;
use crate::item::{DetectorError, DetectorResult, Item};

const TERMINATED: &str = "detector task terminated without a verdict";

pub struct Dispatcher {
    detectors: Vec<SharedDetector>,
    overall_deadline: Duration,
    per_call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(detectors: Vec<SharedDetector>, overall_deadline: Duration, per_call_timeout: Duration) -> Self {
        Self { detectors, overall_deadline, per_call_timeout }
    }

    pub fn detectors(&self) -> &[SharedDetector] {
        &self.detectors
    }

    /// Run every detector against `item`. Never fails; failures are recorded
    /// per detector.
    pub async fn run(&self, item: Arc<Item>) -> Vec<DetectorResult> {
        let started = Instant::now();
        let deadline = started + self.overall_deadline;
        let call_deadline = deadline.min(started + self.per_call_timeout);

        let (tx, mut rx) = mpsc::channel::<(usize, DetectorResult)>(self.detectors.len().max(1));
        let handles: Vec<JoinHandle<()>> = self
            .detectors
            .iter()
            .enumerate()
            .map(|(idx, det)| {
                let det = Arc::clone(det);
                let item = Arc::clone(&item);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let t0 = Instant::now();
                    let outcome = timeout_at(call_deadline, det.analyze(&item, call_deadline))
                        .await
                        .unwrap_or(Err(DetectorError::Timeout));
                    let result = DetectorResult::from_outcome(det.name(), outcome, t0.elapsed());
                    if tx.send((idx, result)).await.is_err() {
                        debug!(detector = det.name(), "collector gone; result dropped");
                    }
                })
            })
            .collect();
        drop(tx);

        let mut slots: Vec<Option<DetectorResult>> = vec![None; self.detectors.len()];
        let mut pending = slots.len();
        while pending > 0 {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((idx, result))) => {
                    if slots[idx].is_none() {
                        pending -= 1;
                    }
                    slots[idx] = Some(result);
                }
                // every sender dropped; remaining tasks died before reporting
                Ok(None) | Err(_) => break,
            }
        }

        // A task sends before it finishes, so anything finished at this point
        // has either reported already or never will.
        let finished: Vec<bool> = handles.iter().map(JoinHandle::is_finished).collect();
        while let Ok((idx, result)) = rx.try_recv() {
            slots[idx] = Some(result);
        }

        let elapsed = started.elapsed();
        let digest = item.digest();
        let results: Vec<DetectorResult> = slots
            .into_iter()
            .zip(&self.detectors)
            .zip(handles.iter().zip(finished))
            .map(|((slot, det), (handle, finished))| match slot {
                Some(r) => r,
                None => {
                    handle.abort();
                    let err = if finished {
                        DetectorError::ProtocolError(TERMINATED.into())
                    } else {
                        DetectorError::Timeout
                    };
                    warn!(detector = det.name(), item = %digest, error = %err, "detector produced no verdict");
                    DetectorResult::failed(det.name(), err, elapsed)
                }
            })
            .collect();

        debug!(
            item = %digest,
            detectors = results.len(),
            abstentions = results.iter().filter(|r| r.is_abstention()).count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "dispatch complete"
        );
        results
    }
}

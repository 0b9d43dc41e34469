// mailsentry/src/lib.rs
//
// Multi-detector phishing classification engine.
//
//   item      : Item / Verdict / DetectorResult / EnsembleVerdict
//   detectors : Detector trait, rule adapters, remote HTTP adapter
//   engine    : concurrent dispatcher + ensemble strategies
//   eval      : labeled-corpus harness and reports
//   config    : EngineConfig + ConfigError

pub mod config;
pub mod detectors;
pub mod engine;
pub mod eval;
pub mod item;

pub use config::{ConfigError, EngineConfig};
pub use detectors::{Detector, DetectorKind, SharedDetector};
pub use engine::Engine;
pub use item::{DetectorError, DetectorResult, EnsembleVerdict, Item, Verdict};

// mailsentry/src/engine/mod.rs
//
// Engine facade: detector registry + dispatcher + strategy registry, built
// once from an EngineConfig and shared by reference afterwards.

pub mod dispatcher;
pub mod ensemble;

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, EngineConfig};
use crate::detectors::SharedDetector;
use crate::item::{DetectorResult, EnsembleVerdict, Item};

pub use dispatcher::Dispatcher;
pub use ensemble::{Strategy, StrategyRegistry, StrategyRule, StrategySpec};

pub struct Engine {
    dispatcher: Dispatcher,
    registry: StrategyRegistry,
    default_strategy: Strategy,
}

impl Engine {
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        let detectors = cfg.build_detectors()?;
        Self::new(
            detectors,
            &cfg.strategies,
            &cfg.default_strategy,
            cfg.overall_deadline()?,
            cfg.per_call_timeout()?,
        )
    }

    pub fn new(
        detectors: Vec<SharedDetector>,
        strategies: &[StrategySpec],
        default_strategy: &str,
        overall_deadline: std::time::Duration,
        per_call_timeout: std::time::Duration,
    ) -> Result<Self, ConfigError> {
        if detectors.is_empty() {
            return Err(ConfigError::EmptyDetectorSet);
        }
        if overall_deadline.is_zero() || per_call_timeout.is_zero() {
            return Err(ConfigError::InvalidDeadline("deadlines must be > 0".into()));
        }
        let names: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
        let registry = StrategyRegistry::new(strategies, &names)?;
        let default = registry.get(default_strategy)?.clone();

        info!(
            detectors = ?names,
            strategies = ?registry.names(),
            default = default_strategy,
            deadline_ms = overall_deadline.as_millis() as u64,
            "engine ready"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(detectors, overall_deadline, per_call_timeout),
            registry,
            default_strategy: default,
        })
    }

    pub fn detectors(&self) -> &[SharedDetector] {
        self.dispatcher.detectors()
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn default_strategy(&self) -> &str {
        self.default_strategy.name()
    }

    /// Raw per-detector results, one per registered detector.
    pub async fn dispatch_all(&self, item: &Item) -> Vec<DetectorResult> {
        self.dispatcher.run(Arc::new(item.clone())).await
    }

    /// Classify with the configured default strategy.
    pub async fn dispatch(&self, item: &Item) -> EnsembleVerdict {
        self.default_strategy.apply(&self.dispatch_all(item).await)
    }

    pub async fn dispatch_with(&self, item: &Item, strategy: &str) -> Result<EnsembleVerdict, ConfigError> {
        let strategy = self.registry.get(strategy)?;
        Ok(strategy.apply(&self.dispatch_all(item).await))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::dispatcher::tests::{mock, Behaviour};
    use super::*;
    use crate::item::DetectorError;

    fn specs() -> Vec<StrategySpec> {
        [StrategyRule::Majority, StrategyRule::Unanimous, StrategyRule::Any]
            .into_iter()
            .map(|rule| StrategySpec { name: None, rule })
            .collect()
    }

    fn engine(default: &str) -> Result<Engine, ConfigError> {
        Engine::new(
            vec![
                mock("a", Behaviour::Answer(true, 90)),
                mock("b", Behaviour::Answer(false, 10)),
                mock("c", Behaviour::Answer(true, 70)),
            ],
            &specs(),
            default,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn dispatch_uses_default_strategy() {
        let e = engine("majority").unwrap();
        let item = Item::new("s", "a@b.c", "x", "");
        let v = e.dispatch(&item).await;
        assert_eq!(v.strategy, "majority");
        assert!(v.is_positive);
        assert_eq!(v.aggregate_confidence, 80.0);

        let u = e.dispatch_with(&item, "unanimous").await.unwrap();
        assert!(!u.is_positive);
        assert!(matches!(e.dispatch_with(&item, "nope").await, Err(ConfigError::UnknownStrategy(_))));
    }

    #[tokio::test]
    async fn timeout_scenario_through_the_engine() {
        let e = Engine::new(
            vec![
                mock("a", Behaviour::Answer(true, 90)),
                mock("b", Behaviour::Sleep(Duration::from_secs(30), false, 10)),
                mock("c", Behaviour::Answer(true, 70)),
            ],
            &specs(),
            "majority",
            Duration::from_millis(200),
            Duration::from_secs(30),
        )
        .unwrap();
        let v = e.dispatch(&Item::default()).await;
        assert!(v.is_positive);
        assert_eq!(v.abstentions, 1);
        assert_eq!(v.contributing[1].err, Some(DetectorError::Timeout));
    }

    #[test]
    fn unknown_default_strategy_is_rejected() {
        assert!(matches!(engine("weighted"), Err(ConfigError::UnknownStrategy(n)) if n == "weighted"));
    }

    #[test]
    fn default_config_builds() {
        let e = Engine::from_config(&EngineConfig::default()).unwrap();
        assert_eq!(e.detectors().len(), 3);
        assert_eq!(e.registry().names(), vec!["majority", "unanimous", "any", "weighted"]);
    }
}

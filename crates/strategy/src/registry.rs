use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use common::{Error, Result, Strategy};

use crate::macd_cross::MacdCross;
use crate::rsi_dca::RsiDca;
use crate::source::IndicatorSource;
use crate::Algorithm;

/// Closed set of algorithms, looked up by `Strategy::algorithm`.
///
/// Names are matched case-insensitively and `-` is accepted in place of `_`.
pub struct AlgorithmRegistry {
    algorithms: HashMap<&'static str, Arc<dyn Algorithm>>,
}

impl AlgorithmRegistry {
    pub fn new(indicators: Arc<dyn IndicatorSource>) -> Self {
        let mut algorithms: HashMap<&'static str, Arc<dyn Algorithm>> = HashMap::new();
        for algorithm in [
            Arc::new(RsiDca::new(indicators.clone())) as Arc<dyn Algorithm>,
            Arc::new(MacdCross::new(indicators)) as Arc<dyn Algorithm>,
        ] {
            info!(name = algorithm.name(), "Registered algorithm");
            algorithms.insert(algorithm.name(), algorithm);
        }
        Self { algorithms }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Algorithm>> {
        let key = name.trim().to_ascii_lowercase().replace('-', "_");
        self.algorithms.get(key.as_str()).cloned()
    }

    /// Resolve the strategy's algorithm and validate its parameters against it.
    pub fn for_strategy(&self, strategy: &Strategy) -> Result<Arc<dyn Algorithm>> {
        let algorithm = self.resolve(&strategy.algorithm).ok_or_else(|| {
            Error::Config(format!(
                "strategy {} ({}): unknown algorithm '{}'",
                strategy.id, strategy.name, strategy.algorithm
            ))
        })?;
        algorithm.validate_config(strategy)?;
        Ok(algorithm)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.algorithms.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

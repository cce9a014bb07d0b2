//! Simulation configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Numeric tolerances of the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    /// Absolute tolerance for comparing simulation times.
    pub timing: f64,
    /// Amount of remaining work, relative to the total amount, below which an activity is considered done.
    pub work: f64,
    /// Relative tolerance of the max-min solver.
    pub maxmin: f64,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            timing: 1e-9,
            work: 1e-9,
            maxmin: 1e-9,
        }
    }
}

/// Parameters of the flow-level network model.
///
/// The defaults give the plain model where a transfer of `S` bytes over a route with latency `L` and bottleneck
/// bandwidth `B` takes `L + S / B` without contention. The other parameters allow to reproduce the
/// calibrated TCP models: e.g. `latency_factor = 13.01`, `bandwidth_factor = 0.97` and `weight_s = 20537`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multiplier applied to route latencies.
    pub latency_factor: f64,
    /// Fraction of the link bandwidth available to the payload.
    pub bandwidth_factor: f64,
    /// When positive, flows share bandwidth proportionally to `1 / (latency + sum(weight_s / bandwidth))`
    /// over their route instead of equally.
    pub weight_s: f64,
    /// When positive, a flow with route latency `L` is limited to `tcp_gamma / (2 * L)` (TCP window size effect).
    pub tcp_gamma: f64,
    /// Bandwidth of the loopback link used for communications inside a host.
    pub loopback_bandwidth: f64,
    /// Latency of the loopback link.
    pub loopback_latency: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_factor: 1.,
            bandwidth_factor: 1.,
            weight_s: 0.,
            tcp_gamma: 0.,
            loopback_bandwidth: 1e10,
            loopback_latency: 0.,
        }
    }
}

/// Configuration of a simulation run.
///
/// Can be built in code or loaded from JSON, missing fields take their default values:
///
/// ```rust
/// use simflow::SimulationConfig;
///
/// let config = SimulationConfig::from_json_str(r#"{"network": {"latency_factor": 13.01}}"#).unwrap();
/// assert_eq!(config.network.latency_factor, 13.01);
/// assert_eq!(config.network.bandwidth_factor, 1.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Numeric tolerances.
    pub precision: PrecisionConfig,
    /// Network model parameters.
    pub network: NetworkConfig,
    /// Default maximum number of activities using a resource simultaneously, unless set per resource.
    pub concurrency_limit: Option<usize>,
    /// Check each computed allocation against resource capacities and rate bounds.
    pub verify_allocations: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            precision: PrecisionConfig::default(),
            network: NetworkConfig::default(),
            concurrency_limit: None,
            verify_allocations: true,
        }
    }
}

impl SimulationConfig {
    /// Parses configuration from JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks that all parameters have meaningful values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("precision.timing", self.precision.timing),
            ("precision.work", self.precision.work),
            ("precision.maxmin", self.precision.maxmin),
            ("network.latency_factor", self.network.latency_factor),
            ("network.bandwidth_factor", self.network.bandwidth_factor),
            ("network.loopback_bandwidth", self.network.loopback_bandwidth),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.) {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("must be positive, got {value}"),
                });
            }
        }
        let non_negative = [
            ("network.weight_s", self.network.weight_s),
            ("network.tcp_gamma", self.network.tcp_gamma),
            ("network.loopback_latency", self.network.loopback_latency),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.) {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("must be non-negative, got {value}"),
                });
            }
        }
        if self.concurrency_limit == Some(0) {
            return Err(ConfigError::Invalid {
                name: "concurrency_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Sets the network model parameters.
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Sets the default concurrency limit of resources.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = SimulationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = SimulationConfig::from_json_str(
            r#"{"precision": {"timing": 1e-6}, "network": {"tcp_gamma": 4194304}, "concurrency_limit": 8}"#,
        )
        .unwrap();
        assert_eq!(config.precision.timing, 1e-6);
        assert_eq!(config.precision.work, 1e-9);
        assert_eq!(config.network.tcp_gamma, 4194304.);
        assert_eq!(config.concurrency_limit, Some(8));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SimulationConfig::from_json_str(r#"{"network": {"bandwidth_factor": 0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "network.bandwidth_factor",
                ..
            }
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("{\"precision\": 3}"),
            Err(ConfigError::Json(_))
        ));
    }
}

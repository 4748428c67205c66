//! Runtime Configuration
//!
//! Tunables for the propagation engine. Configuration is per thread, like
//! the rest of the engine state.

use std::cell::Cell;

/// Default cap on subscriber runs within one propagation pass.
pub const DEFAULT_MAX_DRAIN_ITERATIONS: usize = 100_000;

/// Settings for the reactive runtime on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of subscriber runs a single drain may perform before it is
    /// treated as an update loop and aborted.
    pub max_drain_iterations: usize,
}

impl RuntimeConfig {
    pub fn with_max_drain_iterations(mut self, limit: usize) -> Self {
        self.max_drain_iterations = limit.max(1);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_drain_iterations: DEFAULT_MAX_DRAIN_ITERATIONS,
        }
    }
}

thread_local! {
    static CONFIG: Cell<RuntimeConfig> = Cell::new(RuntimeConfig::default());
}

/// Replace the current thread's configuration, returning the previous one.
pub fn configure(config: RuntimeConfig) -> RuntimeConfig {
    CONFIG.with(|cell| cell.replace(config))
}

/// The configuration in effect on the current thread.
pub fn runtime_config() -> RuntimeConfig {
    CONFIG.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_returns_previous() {
        let custom = RuntimeConfig::default().with_max_drain_iterations(8);
        let previous = configure(custom);

        assert_eq!(previous, RuntimeConfig::default());
        assert_eq!(runtime_config().max_drain_iterations, 8);

        configure(previous);
        assert_eq!(runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn limit_is_at_least_one() {
        let config = RuntimeConfig::default().with_max_drain_iterations(0);
        assert_eq!(config.max_drain_iterations, 1);
    }
}

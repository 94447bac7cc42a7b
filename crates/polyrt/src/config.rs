//! Configuration Module - Runtime Tuning Parameters
//!
//! Process-wide knobs for the runtime. All parameters have defaults that
//! match the reference behavior; embedders may replace the active
//! configuration before heavy use. Structural algorithms read the active
//! configuration on entry.

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::error::{Result, RtError};

/// Main configuration for the object runtime
///
/// # Examples
///
/// ```rust
/// use polyrt::config::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     traceback_limit: 64,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum number of traceback frames retained per error.
    ///
    /// Overridable at startup through `POLYRT_TRACEBACK_LIMIT`.
    /// Default: 512
    pub traceback_limit: usize,

    /// Initial capacity of a dictionary created without a size hint
    /// (`Dict::new`).
    ///
    /// Rounded up to a multiple of the 16-slot block size.
    /// Default: 16
    pub initial_dict_capacity: usize,

    /// Absolute tolerance used by structural equality for `f32` fields.
    ///
    /// Default: 1e-6
    pub float_tolerance_f32: f64,

    /// Absolute tolerance used by structural equality for `f64` fields
    /// and `float`-tagged values.
    ///
    /// Default: 1e-8
    pub float_tolerance_f64: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let traceback_limit = std::env::var("POLYRT_TRACEBACK_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(512);
        RuntimeConfig {
            traceback_limit,
            initial_dict_capacity: 16,
            float_tolerance_f32: 1e-6,
            float_tolerance_f64: 1e-8,
        }
    }
}

impl RuntimeConfig {
    /// Check parameter consistency.
    pub fn validate(&self) -> Result<()> {
        if self.traceback_limit == 0 {
            return Err(RtError::value_error("traceback_limit must be positive"));
        }
        if self.float_tolerance_f32 < 0.0 || self.float_tolerance_f64 < 0.0 {
            return Err(RtError::value_error("float tolerances must be non-negative"));
        }
        Ok(())
    }
}

lazy_static! {
    static ref ACTIVE: RwLock<RuntimeConfig> = RwLock::new(RuntimeConfig::default());
}

/// Snapshot of the active configuration.
pub fn current() -> RuntimeConfig {
    ACTIVE.read().clone()
}

/// Replace the active configuration after validating it.
pub fn set(config: RuntimeConfig) -> Result<()> {
    config.validate()?;
    *ACTIVE.write() = config;
    Ok(())
}

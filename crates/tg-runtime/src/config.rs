use std::env;

use crate::error::{Error, Result};

/// Environment variable overriding [`BackendConfig::alignment`].
pub const ALIGNMENT_ENV: &str = "TG_ALIGNMENT";
/// Environment variable overriding [`BackendConfig::timing_by_default`].
pub const TIMING_ENV: &str = "TG_TIMING";

/// Settings threaded into a backend when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Byte alignment of every buffer the backend allocates.
    pub alignment: usize,
    /// Timing flag used by [`crate::Backend::compile_default`].
    pub timing_by_default: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            alignment: 64,
            timing_by_default: false,
        }
    }
}

impl BackendConfig {
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_timing(mut self, enabled: bool) -> Self {
        self.timing_by_default = enabled;
        self
    }

    /// # Errors
    /// Returns `Error::Config` unless the alignment is a non-zero power of two.
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "alignment must be a non-zero power of two, got {}",
                self.alignment
            )));
        }
        Ok(())
    }

    /// Defaults overridden by `TG_ALIGNMENT` and `TG_TIMING`.
    ///
    /// # Errors
    /// Fails if a variable is set but cannot be parsed, or if the resulting
    /// configuration does not validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = BackendConfig::default();
        if let Some(raw) = lookup(ALIGNMENT_ENV) {
            config.alignment = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ALIGNMENT_ENV}={raw:?} is not an integer"))
            })?;
        }
        if let Some(raw) = lookup(TIMING_ENV) {
            config.timing_by_default = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(Error::Config(format!(
                        "{TIMING_ENV}={raw:?} is not a boolean"
                    )))
                }
            };
        }
        config.validate()?;
        Ok(config)
    }
}

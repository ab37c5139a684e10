//! Name-keyed backend factory.
//!
//! `CPU` and `INTERPRETER` are registered on first use; other crates can add
//! their own backends with [`register_backend`]. Names are matched
//! case-insensitively and an optional `:<device>` suffix is ignored, so
//! `"CPU:0"` selects the `CPU` backend.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::cpu::{self, CpuBackend};
use crate::error::{Error, Result};

/// Builds a backend from a validated configuration.
pub type BackendConstructor =
    Arc<dyn Fn(BackendConfig) -> Result<Arc<dyn Backend>> + Send + Sync>;

static REGISTRY: OnceLock<RwLock<HashMap<String, BackendConstructor>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, BackendConstructor>> {
    REGISTRY.get_or_init(|| {
        let mut builtins: HashMap<String, BackendConstructor> = HashMap::new();
        builtins.insert(
            cpu::CPU.to_string(),
            Arc::new(|config: BackendConfig| -> Result<Arc<dyn Backend>> {
                let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new(config)?);
                Ok(backend)
            }),
        );
        builtins.insert(
            cpu::INTERPRETER.to_string(),
            Arc::new(|config: BackendConfig| -> Result<Arc<dyn Backend>> {
                let backend: Arc<dyn Backend> = Arc::new(CpuBackend::interpreter(config)?);
                Ok(backend)
            }),
        );
        RwLock::new(builtins)
    })
}

fn registry_key(name: &str) -> String {
    let base = name.split_once(':').map_or(name, |(base, _)| base);
    base.trim().to_ascii_uppercase()
}

/// Register (or replace) the constructor for `name`.
pub fn register_backend<F>(name: &str, constructor: F)
where
    F: Fn(BackendConfig) -> Result<Arc<dyn Backend>> + Send + Sync + 'static,
{
    let key = registry_key(name);
    debug!(backend = %key, "registering backend");
    registry().write().insert(key, Arc::new(constructor));
}

/// Create a backend with the default configuration.
///
/// # Errors
/// Returns `Error::NotFound` if no backend is registered under `name`.
pub fn create_backend(name: &str) -> Result<Arc<dyn Backend>> {
    create_backend_with_config(name, BackendConfig::default())
}

/// Create a backend with an explicit configuration.
///
/// # Errors
/// `Error::NotFound` for an unknown name, `Error::Config` for an invalid
/// configuration, or whatever the constructor reports.
pub fn create_backend_with_config(name: &str, config: BackendConfig) -> Result<Arc<dyn Backend>> {
    let constructor = registry()
        .read()
        .get(&registry_key(name))
        .cloned()
        .ok_or_else(|| Error::NotFound(name.to_string()))?;
    config.validate()?;
    constructor(config)
}

/// Names of all registered backends, sorted.
pub fn registered_backends() -> Vec<String> {
    let mut names: Vec<String> = registry().read().keys().cloned().collect();
    names.sort();
    names
}

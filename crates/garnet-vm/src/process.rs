//! The process-wide interpreter.
//!
//! Hosts that embed a single interpreter can use these functions instead of
//! owning an [`Engine`]. The engine lives behind a global mutex; every call
//! holds the lock for its whole duration, so calls from different threads
//! are serialized.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::compiler::Frontend;
use crate::config::VmConfig;
use crate::runtime::context::{ExceptionReport, ExecutionContext};
use crate::runtime::value::Value;
use crate::{Engine, Error, Result};

static ENGINE: Mutex<Option<Engine>> = Mutex::new(None);

/// Creates the process context with the default configuration. Calling it
/// again while initialized does nothing.
pub fn init() {
    init_with(VmConfig::default(), None);
}

/// Like [`init`], with a configuration and front-end.
pub fn init_with(config: VmConfig, frontend: Option<Arc<dyn Frontend>>) {
    let mut slot = ENGINE.lock();
    if slot.is_some() {
        debug!("process context already initialized");
        return;
    }
    let mut engine = Engine::with_config(config);
    if let Some(frontend) = frontend {
        engine.set_frontend(frontend);
    }
    *slot = Some(engine);
    info!("process context initialized");
}

/// Whether [`init`] has run without a matching [`deinit`].
pub fn is_initialized() -> bool {
    ENGINE.lock().is_some()
}

/// Runs exit handlers and drops the context. Returns the reports of
/// handlers that raised; empty if the context was not initialized.
pub fn deinit() -> Vec<ExceptionReport> {
    let Some(mut engine) = ENGINE.lock().take() else {
        return Vec::new();
    };
    let failures = engine.shutdown();
    info!(failed_handlers = failures.len(), "process context torn down");
    failures
}

/// Compiles and runs `code` in the process context.
pub fn evaluate(code: &str, path: &str, line: u32) -> Result<Value> {
    with_engine(|engine| engine.evaluate(code, path, line))?
}

/// Runs `f` against the process execution context.
pub fn with_context<R>(f: impl FnOnce(&mut ExecutionContext) -> R) -> Result<R> {
    with_engine(|engine| f(engine.context_mut()))
}

/// Runs `f` against the process engine.
pub fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Result<R> {
    let mut slot = ENGINE.lock();
    let engine = slot.as_mut().ok_or(Error::NotInitialized)?;
    Ok(f(engine))
}

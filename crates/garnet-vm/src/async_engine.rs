//! Asynchronous engine APIs.
//!
//! The interpreter itself is synchronous. This module puts an [`Engine`]
//! behind a [`Serializer`] so async tasks can share it, and adds feature
//! loading with non-blocking file I/O.
//!
//! # Features
//!
//! - `eval` / `eval_file` from any task
//! - `require` with `$LOAD_PATH` resolution and `$LOADED_FEATURES` tracking
//! - `ParallelCompiler` for compiling many sources on a rayon pool
//!
//! # Example
//!
//! ```ignore
//! use garnet_vm::AsyncEngine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = AsyncEngine::new().with_frontend(my_frontend());
//!     engine.require("json").await.unwrap();
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::compiler::Frontend;
use crate::config::VmConfig;
use crate::runtime::symbol::Symbol;
use crate::runtime::value::Value;
use crate::vm::Unwind;
use crate::{Engine, Error, Result};

/// Runs critical sections one at a time, in the order they were submitted.
///
/// Each section holds the serializer until it completes, including across
/// `.await` points, so a multi-step sequence appears atomic to every other
/// task using the same serializer.
pub struct Serializer<T> {
    inner: Mutex<T>,
}

impl<T> Serializer<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Waits for every earlier section to finish, then grants access.
    pub async fn enter(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    /// Runs `f` as one section.
    pub async fn run<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.enter().await;
        f(&mut guard)
    }
}

/// An engine shared between async tasks.
#[derive(Clone)]
pub struct AsyncEngine {
    engine: Arc<Serializer<Engine>>,
}

impl AsyncEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::from_engine(Engine::new())
    }

    /// Creates an engine with `config`.
    pub fn with_config(config: VmConfig) -> Self {
        Self::from_engine(Engine::with_config(config))
    }

    /// Wraps an existing engine.
    pub fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Serializer::new(engine)),
        }
    }

    /// Installs the front-end. Call before sharing the engine.
    pub async fn set_frontend(&self, frontend: Arc<dyn Frontend>) {
        self.engine.run(|engine| engine.set_frontend(frontend)).await;
    }

    /// The serializer guarding the engine, for host sequences that must not
    /// interleave with evaluation.
    pub fn serializer(&self) -> &Serializer<Engine> {
        &self.engine
    }

    /// Compiles and runs `code`.
    pub async fn eval(&self, code: &str, path: &str) -> Result<Value> {
        self.engine
            .run(|engine| engine.evaluate(code, path, 1))
            .await
    }

    /// Reads a file without holding the engine, then evaluates it.
    pub async fn eval_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).await.map_err(|source| Error::Load {
            path: path.to_path_buf(),
            source,
        })?;
        self.eval(&source, &path.to_string_lossy()).await
    }

    /// Loads `feature` once.
    ///
    /// The feature is resolved against `$LOAD_PATH` (`.rb` is appended when
    /// missing), compiled, run, and recorded in `$LOADED_FEATURES`. Returns
    /// `false` if it was already loaded. A failed load is not recorded, so a
    /// later `require` tries again. The whole sequence runs as one
    /// serializer section.
    pub async fn require(&self, feature: &str) -> Result<bool> {
        let mut engine = self.engine.enter().await;

        let candidates = candidates(&load_path(&engine), feature);
        let mut found = None;
        for candidate in candidates {
            if is_loaded(&engine, &candidate) {
                debug!(feature, path = %candidate.display(), "feature already loaded");
                return Ok(false);
            }
            if found.is_none() && fs::try_exists(&candidate).await.unwrap_or(false) {
                found = Some(candidate);
            }
        }
        let Some(path) = found else {
            return Err(load_error(&mut engine, feature));
        };

        let source = fs::read_to_string(&path).await.map_err(|source| Error::Load {
            path: path.clone(),
            source,
        })?;
        let shown = path.to_string_lossy().into_owned();
        engine.evaluate(&source, &shown, 1)?;
        mark_loaded(&mut engine, &shown);
        info!(feature, path = %shown, "feature loaded");
        Ok(true)
    }

    /// Requires each feature in order. All requests are queued at once and
    /// complete in submission order.
    pub async fn require_all(&self, features: &[&str]) -> Vec<Result<bool>> {
        let requests = features.iter().map(|feature| self.require(feature));
        futures::future::join_all(requests).await
    }
}

impl Default for AsyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn load_path(engine: &Engine) -> Vec<PathBuf> {
    let ctx = engine.context();
    let entries = ctx.global_get(Symbol::intern("$LOAD_PATH"));
    ctx.heap
        .array(entries)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| ctx.heap.str(*item))
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Paths `feature` may refer to, in lookup order.
fn candidates(load_path: &[PathBuf], feature: &str) -> Vec<PathBuf> {
    let file = if feature.ends_with(".rb") {
        feature.to_string()
    } else {
        format!("{feature}.rb")
    };
    let file = Path::new(&file);
    if file.is_absolute() {
        return vec![file.to_path_buf()];
    }
    load_path.iter().map(|dir| dir.join(file)).collect()
}

fn is_loaded(engine: &Engine, path: &Path) -> bool {
    let ctx = engine.context();
    let features = ctx.global_get(Symbol::intern("$LOADED_FEATURES"));
    let shown = path.to_string_lossy();
    ctx.heap
        .array(features)
        .is_some_and(|items| items.iter().any(|item| ctx.heap.str(*item) == Some(&*shown)))
}

fn mark_loaded(engine: &mut Engine, path: &str) {
    let ctx = engine.context_mut();
    let entry = ctx.new_string(path);
    let features = ctx.global_get(Symbol::intern("$LOADED_FEATURES"));
    if let Some(items) = ctx.heap.array_mut(features) {
        items.push(entry);
    }
}

/// `LoadError: cannot load such file -- feature`, raised to the host.
fn load_error(engine: &mut Engine, feature: &str) -> Error {
    let ctx = engine.context_mut();
    let class = ctx.core.load_error;
    let exception = ctx.new_exception(class, &format!("cannot load such file -- {feature}"));
    ctx.prepare_raise(exception);
    engine.unhandled(Unwind::Raise(exception))
}

/// Compiles many sources concurrently on a dedicated rayon pool.
#[cfg(feature = "parallel")]
pub struct ParallelCompiler {
    pool: rayon::ThreadPool,
    frontend: Arc<dyn Frontend>,
}

#[cfg(feature = "parallel")]
impl ParallelCompiler {
    /// Creates a compiler with the default number of threads.
    pub fn new(frontend: Arc<dyn Frontend>) -> Result<Self> {
        Self::build(frontend, rayon::ThreadPoolBuilder::new())
    }

    /// Creates a compiler with `threads` worker threads.
    pub fn with_threads(frontend: Arc<dyn Frontend>, threads: usize) -> Result<Self> {
        Self::build(frontend, rayon::ThreadPoolBuilder::new().num_threads(threads))
    }

    fn build(frontend: Arc<dyn Frontend>, builder: rayon::ThreadPoolBuilder) -> Result<Self> {
        let pool = builder
            .thread_name(|i| format!("garnet-compile-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create thread pool: {e}")))?;
        Ok(Self { pool, frontend })
    }

    /// Compiles each `(path, source)` pair, returning results in input order.
    pub fn compile_all(&self, sources: &[(&str, &str)]) -> Vec<Result<crate::compiler::Iseq>> {
        use rayon::prelude::*;

        self.pool.install(|| {
            sources
                .par_iter()
                .map(|(path, source)| Ok(self.frontend.compile(source, path, 1)?))
                .collect()
        })
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # garnet-vm
//!
//! A Ruby-compatible call and control-flow engine, implemented in Rust.
//!
//! ## Overview
//!
//! The engine runs instruction sequences produced by a pluggable
//! [`Frontend`](compiler::Frontend) and provides:
//! - Argument binding for required, optional, rest, post, keyword,
//!   keyword-rest, block and `...` parameters
//! - `begin`/`rescue`/`else`/`ensure` regions with `retry`, non-local
//!   `return`/`break` and `catch`/`throw`
//! - Global variables with aliasing and virtual globals
//! - Fibers with fiber-local storage
//! - A process-wide context and an async feature loader
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use garnet_vm::{Engine, compiler::IseqBuilder};
//!
//! let mut b = IseqBuilder::top();
//! b.put_int(1);
//! b.put_int(2);
//! b.send("+", 1);
//! b.leave();
//!
//! let mut engine = Engine::new();
//! let result = engine.run_iseq(b.build()?)?;
//! assert_eq!(engine.inspect(result)?, "3");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate self as garnet_vm;

#[cfg(feature = "async")]
pub mod async_engine;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod gc;
pub mod process;
pub mod runtime;
pub mod vm;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use compiler::{CompileError, Frontend, Iseq};
use vm::Unwind;

pub use config::VmConfig;
pub use runtime::context::{ExceptionReport, ExecutionContext};
pub use runtime::value::Value;

#[cfg(feature = "async")]
pub use async_engine::{AsyncEngine, Serializer};
#[cfg(all(feature = "async", feature = "parallel"))]
pub use async_engine::ParallelCompiler;

/// One interpreter session: an execution context plus the front-end that
/// compiles source for it.
pub struct Engine {
    context: ExecutionContext,
    frontend: Option<Arc<dyn Frontend>>,
}

impl Engine {
    /// Creates an engine with the default configuration and no front-end.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Creates an engine with `config`.
    pub fn with_config(config: VmConfig) -> Self {
        Self {
            context: ExecutionContext::new(config),
            frontend: None,
        }
    }

    /// Installs the front-end used by [`Engine::evaluate`].
    pub fn set_frontend(&mut self, frontend: Arc<dyn Frontend>) {
        self.frontend = Some(frontend);
    }

    /// The installed front-end.
    pub fn frontend(&self) -> Option<Arc<dyn Frontend>> {
        self.frontend.clone()
    }

    /// The execution context.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The execution context, mutably.
    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    /// Compiles `code` as if read from `path` at `line`, then runs it with
    /// `main` as self.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// engine.set_frontend(Arc::new(my_parser));
    /// let value = engine.evaluate("1 + 2", "(eval)", 1)?;
    /// ```
    pub fn evaluate(&mut self, code: &str, path: &str, line: u32) -> Result<Value> {
        let frontend = self.frontend.clone().ok_or(Error::NoFrontend)?;
        let iseq = frontend.compile(code, path, line)?;
        self.run_iseq(iseq)
    }

    /// Runs a compiled top-level body.
    pub fn run_iseq(&mut self, iseq: Iseq) -> Result<Value> {
        self.context
            .run_iseq(Arc::new(iseq))
            .map_err(|unwind| self.unhandled(unwind))
    }

    /// `value.inspect`.
    pub fn inspect(&mut self, value: Value) -> Result<String> {
        self.context
            .inspect(value)
            .map_err(|unwind| self.unhandled(unwind))
    }

    /// Runs exit handlers, returning reports for those that failed.
    pub fn shutdown(&mut self) -> Vec<ExceptionReport> {
        self.context.run_exit_handlers()
    }

    /// Converts an unwind that reached the host into an [`Error`], logging
    /// it and printing it when configured to.
    pub(crate) fn unhandled(&mut self, unwind: Unwind) -> Error {
        let Unwind::Raise(exception) = unwind else {
            return Error::Internal(format!("{unwind:?} escaped the top-level frame"));
        };
        let report = self.context.exception_report(exception);
        error!(class = %report.class, message = %report.message, "unhandled exception");
        if self.context.config().report_unhandled {
            eprint!("{}", report.render());
        }
        Error::from(report)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures reported to the host.
#[derive(Debug, Error)]
pub enum Error {
    /// A Ruby exception nobody rescued
    #[error("{message} ({class})")]
    Unhandled {
        /// Exception class name
        class: String,
        /// Exception message
        message: String,
        /// Backtrace, innermost first
        backtrace: Vec<String>,
    },
    /// Source evaluation was requested without a front-end
    #[error("no frontend installed")]
    NoFrontend,
    /// The front-end or builder rejected its input
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The process-wide context was used before `init`
    #[error("process context is not initialized")]
    NotInitialized,
    /// A feature file could not be read
    #[error("failed to read {path}")]
    Load {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Engine invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExceptionReport> for Error {
    fn from(report: ExceptionReport) -> Self {
        Error::Unhandled {
            class: report.class,
            message: report.message,
            backtrace: report.backtrace,
        }
    }
}

impl Error {
    /// The exception class name, for unhandled exceptions.
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            Error::Unhandled { class, .. } => Some(class),
            _ => None,
        }
    }
}

/// Result type for host-facing operations.
pub type Result<T> = std::result::Result<T, Error>;

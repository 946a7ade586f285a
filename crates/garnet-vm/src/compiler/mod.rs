//! Instruction sequences consumed by the engine.
//!
//! Parsing is not done here. A [`Frontend`] turns source text into an
//! [`Iseq`]; embedders and tests can also assemble one directly with
//! [`IseqBuilder`].
//!
//! # Module Structure
//!
//! - `bytecode`: instruction, call-site and region definitions
//! - `builder`: label- and region-aware iseq assembly
//! - `frontend`: the source-to-iseq compiler interface

pub mod builder;
pub mod bytecode;
pub mod frontend;

use thiserror::Error;

use crate::runtime::params::ParamError;

pub use builder::{IseqBuilder, Label, RegionId};
pub use bytecode::{
    ArgTag, BlockArg, CallInfo, ClassDefKind, Instruction, Iseq, IseqKind, Region, RescueClause,
};
pub use frontend::Frontend;

/// Failure turning source or builder input into an [`Iseq`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// Reported by a front-end
    #[error("{path}:{line}: {message}")]
    Syntax {
        /// Source path
        path: String,
        /// Source line
        line: u32,
        /// Description
        message: String,
    },
    /// Invalid parameter list
    #[error(transparent)]
    Params(#[from] ParamError),
    /// A jump to a label that was never placed
    #[error("label {0} was never placed")]
    UnplacedLabel(usize),
    /// Misuse of a protected region
    #[error("region {region}: {message}")]
    Region {
        /// Region index
        region: usize,
        /// Description
        message: &'static str,
    },
}

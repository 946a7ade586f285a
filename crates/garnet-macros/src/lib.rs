//! Declarative helper macros for the garnet Ruby engine.
//!
//! # Macros Overview
//!
//! ## Engine values
//! - [`sym!`] - Intern a symbol
//! - [`params!`] - Build a parameter spec from Ruby-like notation
//! - [`native_methods!`] - Static table of native method registrations
//!
//! ## Testing
//! - [`assert_raises!`] - Assert a Ruby exception of a given class
//! - [`assert_matches!`] - Assert a value matches a pattern
//!
//! # Examples
//!
//! ```
//! use garnet_macros::*;
//!
//! let spec = params![recv, *args, **opts].unwrap();
//! assert_eq!(spec.lead_count(), 1);
//! assert_eq!(sym!(recv), spec.params()[0].name);
//! ```

mod runtime;
mod testing;

//! The source-to-iseq interface.

use super::CompileError;
use super::bytecode::Iseq;

/// Compiles source text into a top-level [`Iseq`].
///
/// Implemented by whatever parser the embedder plugs in. Closures with the
/// same signature implement it too.
pub trait Frontend: Send + Sync {
    /// Compiles `source`, attributing it to `path` starting at `line`.
    fn compile(&self, source: &str, path: &str, line: u32) -> Result<Iseq, CompileError>;
}

impl<F> Frontend for F
where
    F: Fn(&str, &str, u32) -> Result<Iseq, CompileError> + Send + Sync,
{
    fn compile(&self, source: &str, path: &str, line: u32) -> Result<Iseq, CompileError> {
        self(source, path, line)
    }
}

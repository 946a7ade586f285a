//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use garnet_vm::compiler::{Instruction, Iseq, IseqBuilder};
use garnet_vm::{Engine, Result, Value, VmConfig};
use parking_lot::Mutex;

/// Installs a subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Captures everything `puts`/`print`/`p` write.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An engine that keeps unhandled exceptions off stderr and captures output.
pub fn engine() -> (Engine, Output) {
    init_tracing();
    let mut engine = Engine::with_config(VmConfig::default().with_report_unhandled(false));
    let output = Output::default();
    engine.context_mut().set_output(output.clone());
    (engine, output)
}

/// Builds and runs a top-level body.
pub fn run(engine: &mut Engine, b: IseqBuilder) -> Result<Value> {
    engine.run_iseq(b.build()?)
}

/// Runs a body and returns `inspect` of its value.
pub fn run_inspect(engine: &mut Engine, b: IseqBuilder) -> Result<String> {
    let value = run(engine, b)?;
    engine.inspect(value)
}

/// A default-value fragment pushing `n`.
pub fn int_default(n: i64) -> Iseq {
    let mut b = IseqBuilder::fragment();
    b.put_int(n);
    b.leave();
    b.build().expect("default fragment")
}

/// `def name ... end` on the lexical class, discarding the symbol it
/// evaluates to.
pub fn def(b: &mut IseqBuilder, name: &str, body: IseqBuilder) {
    b.define_method(name, body.build().expect("method body"));
    b.emit(Instruction::Pop);
}

/// Pushes a local of the enclosing scope `depth` levels up.
pub fn get_outer(b: &mut IseqBuilder, slot: u32, depth: u32) {
    b.emit(Instruction::GetLocal { slot, depth });
}

/// Pops into a local of the enclosing scope `depth` levels up.
pub fn set_outer(b: &mut IseqBuilder, slot: u32, depth: u32) {
    b.emit(Instruction::SetLocal { slot, depth });
}

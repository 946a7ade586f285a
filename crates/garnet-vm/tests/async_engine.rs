//! Feature loading through the async engine.

#![cfg(feature = "async")]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use garnet_macros::{assert_matches, assert_raises};
use garnet_vm::compiler::{CompileError, Instruction, Iseq, IseqBuilder};
use garnet_vm::runtime::Symbol;
use garnet_vm::{AsyncEngine, Error, Value, VmConfig};
use tempfile::TempDir;

/// Compiles `N` to `($seen ||= []) << N; N` and `raise` to a failing body.
fn frontend(source: &str, path: &str, line: u32) -> Result<Iseq, CompileError> {
    let mut b = IseqBuilder::top().with_path(path).at_line(line);
    if source.trim() == "raise" {
        b.put_self();
        b.put_str("bad feature");
        b.fcall("raise", 1);
        b.leave();
        return b.build();
    }
    let n: i64 = source.trim().parse().map_err(|_| CompileError::Syntax {
        path: path.to_string(),
        line,
        message: format!("expected an integer, got {source:?}"),
    })?;
    let have = b.label();
    b.get_global("$seen");
    b.emit(Instruction::Dup);
    b.branch_if(have);
    b.emit(Instruction::Pop);
    b.emit(Instruction::NewArray(0));
    b.emit(Instruction::Dup);
    b.set_global("$seen");
    b.place(have);
    b.put_int(n);
    b.send("<<", 1);
    b.emit(Instruction::Pop);
    b.put_int(n);
    b.leave();
    b.build()
}

async fn engine_in(dir: &Path) -> AsyncEngine {
    let config = VmConfig::default()
        .with_report_unhandled(false)
        .with_load_path(dir);
    let engine = AsyncEngine::with_config(config);
    engine.set_frontend(Arc::new(frontend)).await;
    engine
}

fn write(dir: &TempDir, name: &str, source: &str) {
    fs::write(dir.path().join(name), source).unwrap();
}

async fn inspect_global(engine: &AsyncEngine, name: &str) -> String {
    let mut engine = engine.serializer().enter().await;
    let value = engine.context().global_get(Symbol::intern(name));
    engine.inspect(value).unwrap()
}

#[tokio::test]
async fn test_require_loads_once() {
    let dir = TempDir::new().unwrap();
    write(&dir, "answer.rb", "42");
    let engine = engine_in(dir.path()).await;

    assert!(engine.require("answer").await.unwrap());
    assert!(!engine.require("answer").await.unwrap());
    assert!(!engine.require("answer.rb").await.unwrap());
    assert_eq!(inspect_global(&engine, "$seen").await, "[42]");

    let expected = dir.path().join("answer.rb");
    let features = inspect_global(&engine, "$LOADED_FEATURES").await;
    assert_eq!(features, format!("[{:?}]", expected.to_string_lossy()));
}

#[tokio::test]
async fn test_missing_feature_raises_load_error() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(dir.path()).await;
    assert_raises!(
        engine.require("nothing/here").await,
        "LoadError",
        "cannot load such file -- nothing/here"
    );
}

#[tokio::test]
async fn test_failed_load_is_not_recorded() {
    let dir = TempDir::new().unwrap();
    write(&dir, "broken.rb", "raise");
    let engine = engine_in(dir.path()).await;

    assert_raises!(engine.require("broken").await, "RuntimeError", "bad feature");
    assert_raises!(engine.require("broken").await, "RuntimeError", "bad feature");
    assert_eq!(inspect_global(&engine, "$LOADED_FEATURES").await, "[]");
}

#[tokio::test]
async fn test_compile_error_is_reported() {
    let dir = TempDir::new().unwrap();
    write(&dir, "garbage.rb", "not a number");
    let engine = engine_in(dir.path()).await;
    assert_matches!(
        engine.require("garbage").await,
        Err(Error::Compile(CompileError::Syntax { .. }))
    );
}

#[tokio::test]
async fn test_require_all_completes_in_order() {
    let dir = TempDir::new().unwrap();
    for n in 1..=4 {
        write(&dir, &format!("f{n}.rb"), &n.to_string());
    }
    let engine = engine_in(dir.path()).await;

    let results = engine.require_all(&["f1", "f2", "f1", "f3", "f4"]).await;
    let loaded: Vec<bool> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(loaded, [true, true, false, true, true]);
    assert_eq!(inspect_global(&engine, "$seen").await, "[1, 2, 3, 4]");
}

#[tokio::test]
async fn test_concurrent_evals_share_state() {
    let engine = AsyncEngine::with_config(VmConfig::default().with_report_unhandled(false));
    engine.set_frontend(Arc::new(frontend)).await;

    let tasks: Vec<_> = (1..=8)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.eval(&n.to_string(), "(eval)").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut guard = engine.serializer().enter().await;
    let seen = guard.context().global_get(Symbol::intern("$seen"));
    let size = guard.context_mut().funcall(seen, "size", &[]).unwrap();
    assert_eq!(size, Value::Integer(8));
}

#[tokio::test]
async fn test_eval_file_reports_missing_file() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(dir.path()).await;
    let missing = dir.path().join("absent.rb");
    assert_matches!(
        engine.eval_file(&missing).await,
        Err(Error::Load { path, .. }) if path == missing
    );

    write(&dir, "present.rb", "7");
    assert_eq!(
        engine.eval_file(dir.path().join("present.rb")).await.unwrap(),
        Value::Integer(7)
    );
}

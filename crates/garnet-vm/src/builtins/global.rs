//! Standard global variables.

use tracing::error;

use crate::runtime::context::ExecutionContext;
use crate::runtime::symbol::Symbol;
use crate::runtime::value::Value;

/// Each canonical name with the aliases that share its cell.
const STANDARD_ALIASES: &[(&str, &[&str])] = &[
    ("$0", &["$PROGRAM_NAME"]),
    ("$LOAD_PATH", &["$:", "$-I"]),
    ("$LOADED_FEATURES", &["$\""]),
    ("$VERBOSE", &["$-v", "$-w"]),
    ("$DEBUG", &["$-d"]),
];

pub(crate) fn install(ctx: &mut ExecutionContext) {
    ctx.define_virtual_global("$!", current_exception, None);

    let program = ctx.new_string(ctx.config.program_name.clone());
    let paths = ctx
        .config
        .load_path
        .clone()
        .into_iter()
        .map(|path| ctx.new_string(path.to_string_lossy()))
        .collect();
    let load_path = ctx.new_array(paths);
    let features = ctx.new_array(Vec::new());

    let initial = [
        ("$0", program),
        ("$LOAD_PATH", load_path),
        ("$LOADED_FEATURES", features),
        ("$VERBOSE", Value::FALSE),
        ("$DEBUG", Value::FALSE),
    ];
    for (name, value) in initial {
        if let Err(err) = ctx.global_set(Symbol::intern(name), value) {
            error!(global = name, ?err, "could not initialize global");
        }
    }
    for (canonical, aliases) in STANDARD_ALIASES {
        for alias in *aliases {
            ctx.global_alias(Symbol::intern(alias), Symbol::intern(canonical));
        }
    }
}

fn current_exception(ctx: &ExecutionContext) -> Value {
    ctx.current_exception()
}

//! Local variable environments.
//!
//! Every frame keeps its locals in an [`Env`]. Blocks get their own env whose
//! parent is the env of the frame that created them, so outer locals are
//! addressed by `(slot, depth)`.

use super::value::Value;
use crate::gc::{Arena, ArenaRef};

/// Handle to an [`Env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef(ArenaRef);

/// A frame's locals.
#[derive(Debug, Clone)]
pub struct Env {
    /// Local slots, sized by the iseq's local table
    pub slots: Vec<Value>,
    /// Enclosing env for blocks
    pub parent: Option<EnvRef>,
    /// Set once a block closes over this env; captured envs outlive their frame
    pub captured: bool,
}

/// Arena of environments.
#[derive(Default)]
pub struct EnvStore {
    envs: Arena<Env>,
}

impl EnvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an env of `size` nil slots.
    pub fn alloc(&mut self, size: usize, parent: Option<EnvRef>) -> EnvRef {
        EnvRef(self.envs.allocate(Env {
            slots: vec![Value::Nil; size],
            parent,
            captured: false,
        }))
    }

    /// Resolves a handle.
    pub fn get(&self, env: EnvRef) -> Option<&Env> {
        self.envs.get(env.0)
    }

    /// Walks `depth` parent links up from `env`.
    pub fn ancestor(&self, mut env: EnvRef, depth: u32) -> Option<EnvRef> {
        for _ in 0..depth {
            env = self.envs.get(env.0)?.parent?;
        }
        Some(env)
    }

    /// Reads a local.
    pub fn read(&self, env: EnvRef, slot: u32, depth: u32) -> Option<Value> {
        let env = self.ancestor(env, depth)?;
        self.envs.get(env.0)?.slots.get(slot as usize).copied()
    }

    /// Writes a local, growing the env if a front-end under-declared it.
    pub fn write(&mut self, env: EnvRef, slot: u32, depth: u32, value: Value) -> bool {
        let Some(env) = self.ancestor(env, depth) else {
            return false;
        };
        let Some(env) = self.envs.get_mut(env.0) else {
            return false;
        };
        let slot = slot as usize;
        if slot >= env.slots.len() {
            env.slots.resize(slot + 1, Value::Nil);
        }
        env.slots[slot] = value;
        true
    }

    /// Marks `env` and every ancestor as captured.
    pub fn capture(&mut self, env: EnvRef) {
        let mut current = Some(env);
        while let Some(handle) = current {
            match self.envs.get_mut(handle.0) {
                Some(env) if !env.captured => {
                    env.captured = true;
                    current = env.parent;
                }
                _ => break,
            }
        }
    }

    /// Frees `env` unless a block captured it.
    pub fn release_if_uncaptured(&mut self, env: EnvRef) {
        if self.envs.get(env.0).is_some_and(|e| !e.captured) {
            self.envs.release(env.0);
        }
    }

    /// Number of live envs.
    pub fn len(&self) -> usize {
        self.envs.len()
    }

    /// Returns true if no env is live.
    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }
}

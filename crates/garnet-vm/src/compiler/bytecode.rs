//! Instruction sequence definitions.

use std::sync::Arc;

use crate::runtime::params::ParamSpec;
use crate::runtime::symbol::Symbol;

/// What an instruction sequence is the body of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IseqKind {
    /// A top-level script
    Top,
    /// A method
    Method,
    /// A block
    Block,
    /// A class or module body
    Class,
    /// A default-value expression run in its method's env
    Fragment,
}

/// A compiled body: instructions plus everything needed to run them.
#[derive(Debug, Clone)]
pub struct Iseq {
    /// Method or label name
    pub name: String,
    /// Body kind
    pub kind: IseqKind,
    /// Source path, for backtraces
    pub path: Arc<str>,
    /// First source line
    pub first_line: u32,
    /// Declared parameters
    pub params: ParamSpec,
    /// Local table; parameters occupy the slots their spec names
    pub locals: Vec<Symbol>,
    /// The instructions
    pub instructions: Vec<Instruction>,
    /// Source line of each instruction
    pub lines: Vec<u32>,
    /// Protected regions referenced by `Protect`
    pub regions: Vec<Region>,
    /// Nested bodies: blocks, methods, class bodies, default values
    pub children: Vec<Arc<Iseq>>,
}

impl Iseq {
    /// Number of local slots a frame running this body needs.
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }
}

/// How an argument operand is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgTag {
    /// `f(x)`
    Positional,
    /// `f(*xs)`
    Splat,
    /// `f(k: x)`
    Keyword(Symbol),
    /// `f(**h)`
    KwSplat,
    /// `f(...)`; takes no operand, reads the enclosing method's captures
    Forward,
}

/// How a block is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockArg {
    /// No block
    None,
    /// `f { }`: the child iseq at this index
    Literal(usize),
    /// `f(&blk)`: one extra operand after the arguments
    Value,
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Method name
    pub method: Symbol,
    /// Argument tags, one per operand (except `Forward`)
    pub args: Vec<ArgTag>,
    /// Block passing
    pub block: BlockArg,
    /// Receiverless call (`foo` rather than `self.foo`)
    pub fcall: bool,
}

impl CallInfo {
    /// A call with explicit receiver and no block.
    pub fn new(method: &str, args: Vec<ArgTag>) -> Self {
        Self {
            method: Symbol::intern(method),
            args,
            block: BlockArg::None,
            fcall: false,
        }
    }

    /// `n` positional arguments.
    pub fn positional(method: &str, n: usize) -> Self {
        Self::new(method, vec![ArgTag::Positional; n])
    }

    /// Marks the call receiverless.
    pub fn fcall(mut self) -> Self {
        self.fcall = true;
        self
    }

    /// Attaches a block.
    pub fn with_block(mut self, block: BlockArg) -> Self {
        self.block = block;
        self
    }

    /// Operands consumed besides the receiver.
    pub fn operand_count(&self) -> usize {
        let args = self
            .args
            .iter()
            .filter(|t| **t != ArgTag::Forward)
            .count();
        args + usize::from(self.block == BlockArg::Value)
    }
}

/// `class` or `module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDefKind {
    /// `class Name` / `class Name < expr` (superclass operand when true)
    Class {
        /// Whether a superclass operand is on the stack
        superclass: bool,
    },
    /// `module Name`
    Module,
}

/// One rescue clause of a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescueClause {
    /// First instruction evaluating the class list
    pub test: usize,
    /// First instruction of the clause body
    pub body: usize,
    /// Local receiving the exception (`=> e`)
    pub binding: Option<u32>,
}

/// A `begin ... rescue ... else ... ensure ... end` construct.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    /// First instruction of the protected body
    pub body: usize,
    /// Rescue clauses in source order
    pub clauses: Vec<RescueClause>,
    /// First instruction of the `else` body
    pub else_body: Option<usize>,
    /// First instruction of the `ensure` body
    pub ensure: Option<usize>,
    /// Where execution continues with the region's value on the stack
    pub exit: usize,
}

/// A single instruction.
///
/// Stack effects are noted as `[inputs] -> [outputs]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// No operation
    Nop,
    /// `[] -> [nil]`
    PutNil,
    /// `[] -> [true]`
    PutTrue,
    /// `[] -> [false]`
    PutFalse,
    /// `[] -> [self]`
    PutSelf,
    /// `[] -> [n]`
    PutInteger(i64),
    /// `[] -> [f]`
    PutFloat(f64),
    /// `[] -> [:sym]`
    PutSymbol(Symbol),
    /// `[] -> [new string]`
    PutString(Arc<str>),
    /// `[v] -> []`
    Pop,
    /// `[v] -> [v, v]`
    Dup,
    /// `[a, b] -> [b, a]`
    Swap,
    /// `[] -> [local]`
    GetLocal {
        /// Slot in the target env
        slot: u32,
        /// Parent links to follow
        depth: u32,
    },
    /// `[v] -> []`
    SetLocal {
        /// Slot in the target env
        slot: u32,
        /// Parent links to follow
        depth: u32,
    },
    /// `[] -> [$g]`
    GetGlobal(Symbol),
    /// `[v] -> []`
    SetGlobal(Symbol),
    /// `alias $new $old`, `[] -> []`
    AliasGlobal {
        /// Name being bound
        new: Symbol,
        /// Existing name
        old: Symbol,
    },
    /// `[] -> [@ivar]`
    GetIvar(Symbol),
    /// `[v] -> []`
    SetIvar(Symbol),
    /// `[] -> [Const]`
    GetConst(Symbol),
    /// `[v] -> []`
    SetConst(Symbol),
    /// `[v1..vn] -> [array]`
    NewArray(u32),
    /// `[k1, v1..kn, vn] -> [hash]`
    NewHash(u32),
    /// `[recv, args.., blk?] -> [result]`
    Send(Arc<CallInfo>),
    /// `[args.., blk?] -> [result]`; `method` is ignored
    InvokeSuper(Arc<CallInfo>),
    /// Bare `super`, passing the current method's parameters. `[] -> [result]`
    ZSuper,
    /// `[args..] -> [result]`; `method` is ignored
    Yield(Arc<CallInfo>),
    /// Unconditional jump
    Jump(usize),
    /// `[cond] -> []`, jump if truthy
    BranchIf(usize),
    /// `[cond] -> []`, jump if falsy
    BranchUnless(usize),
    /// `[v] -> ...`; return `v` from this frame (`next` in blocks)
    Leave,
    /// `[v] -> ...`; `return` (non-local in blocks)
    Return,
    /// `[v] -> ...`; `break` out of the call that received the block
    Break,
    /// `[] -> [:name]`; define on the lexical class
    DefineMethod {
        /// Method name
        name: Symbol,
        /// Child iseq index
        body: usize,
    },
    /// `[recv] -> [:name]`; `def recv.name`
    DefineSingletonMethod {
        /// Method name
        name: Symbol,
        /// Child iseq index
        body: usize,
    },
    /// `[superclass?] -> [body value]`; open or create and run the body
    DefineClass {
        /// Constant name
        name: Symbol,
        /// Class or module
        kind: ClassDefKind,
        /// Child iseq index
        body: usize,
    },
    /// Enter region; the body follows
    Protect(usize),
    /// `[v] -> []`; protected body completed
    EndBody(usize),
    /// `[v] -> []`; else body completed
    EndElse(usize),
    /// `[v] -> []`; rescue body completed
    EndRescue(usize),
    /// `[v] -> []`; ensure body completed, its value discarded
    EndEnsure(usize),
    /// `[classes..] -> []`; test a rescue clause's class list
    RescueTest {
        /// Region index
        region: usize,
        /// Clause index
        clause: usize,
        /// Number of class operands; zero means StandardError
        count: u32,
    },
    /// `retry` from a rescue body
    Retry(usize),
}

//! Programmatic construction of instruction sequences.
//!
//! Front-ends (and tests) emit instructions through [`IseqBuilder`], which
//! resolves forward jumps, lays out protected regions and validates the
//! parameter list when [`IseqBuilder::build`] is called.
//!
//! ```rust,ignore
//! let mut b = IseqBuilder::method("twice");
//! let x = b.required("x");
//! b.get_local(x);
//! b.put_int(2);
//! b.send("*", 1);
//! b.leave();
//! let iseq = b.build()?;
//! ```

use std::sync::Arc;

use super::CompileError;
use super::bytecode::{
    ArgTag, BlockArg, CallInfo, ClassDefKind, Instruction, Iseq, IseqKind, Region, RescueClause,
};
use crate::runtime::params::{Param, ParamKind, ParamSpec};
use crate::runtime::symbol::Symbol;

/// A jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Handle to a region being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Body,
    Rescue,
    Else,
    Ensure,
    Closed,
}

/// Incremental [`Iseq`] builder.
pub struct IseqBuilder {
    name: String,
    kind: IseqKind,
    path: Arc<str>,
    first_line: u32,
    line: u32,
    params: Vec<Param>,
    locals: Vec<Symbol>,
    instructions: Vec<Instruction>,
    lines: Vec<u32>,
    regions: Vec<Region>,
    parts: Vec<Part>,
    children: Vec<Arc<Iseq>>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    error: Option<CompileError>,
}

impl IseqBuilder {
    /// Starts a body of the given kind.
    pub fn new(name: impl Into<String>, kind: IseqKind) -> Self {
        Self {
            name: name.into(),
            kind,
            path: Arc::from("(garnet)"),
            first_line: 1,
            line: 1,
            params: Vec::new(),
            locals: Vec::new(),
            instructions: Vec::new(),
            lines: Vec::new(),
            regions: Vec::new(),
            parts: Vec::new(),
            children: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        }
    }

    /// Top-level script body.
    pub fn top() -> Self {
        Self::new("<main>", IseqKind::Top)
    }

    /// Method body.
    pub fn method(name: &str) -> Self {
        Self::new(name, IseqKind::Method)
    }

    /// Block body.
    pub fn block() -> Self {
        Self::new("block", IseqKind::Block)
    }

    /// Class or module body.
    pub fn class_body(name: &str) -> Self {
        Self::new(format!("<class:{name}>"), IseqKind::Class)
    }

    /// Default-value expression. Locals it reads are the method's slots.
    pub fn fragment() -> Self {
        Self::new("<default>", IseqKind::Fragment)
    }

    /// Sets the source path.
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Arc::from(path);
        self
    }

    /// Sets the first source line.
    pub fn at_line(mut self, line: u32) -> Self {
        self.first_line = line;
        self.line = line;
        self
    }

    /// Attributes following instructions to `line`.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Returns the slot of local `name`, declaring it if needed.
    pub fn local(&mut self, name: &str) -> u32 {
        let name = Symbol::intern(name);
        if let Some(slot) = self.locals.iter().position(|l| *l == name) {
            return slot as u32;
        }
        self.locals.push(name);
        (self.locals.len() - 1) as u32
    }

    fn fresh_local(&mut self, name: &str) -> u32 {
        self.locals.push(Symbol::intern(name));
        (self.locals.len() - 1) as u32
    }

    /// Declares a parameter and returns its slot.
    pub fn param(&mut self, name: &str, kind: ParamKind) -> u32 {
        let slot = self.local(name);
        self.params.push(Param::new(name, kind, slot));
        slot
    }

    /// `name`
    pub fn required(&mut self, name: &str) -> u32 {
        self.param(name, ParamKind::Required)
    }

    /// `name = default`
    pub fn optional(&mut self, name: &str, default: Iseq) -> u32 {
        let index = self.child(default);
        self.param(name, ParamKind::Optional(index))
    }

    /// `*name`
    pub fn rest(&mut self, name: &str) -> u32 {
        self.param(name, ParamKind::Rest)
    }

    /// `name:`
    pub fn required_keyword(&mut self, name: &str) -> u32 {
        self.param(name, ParamKind::RequiredKeyword)
    }

    /// `name: default`
    pub fn optional_keyword(&mut self, name: &str, default: Iseq) -> u32 {
        let index = self.child(default);
        self.param(name, ParamKind::OptionalKeyword(index))
    }

    /// `**name`
    pub fn keyword_rest(&mut self, name: &str) -> u32 {
        self.param(name, ParamKind::KeywordRest)
    }

    /// `&name`
    pub fn block_param(&mut self, name: &str) -> u32 {
        self.param(name, ParamKind::Block)
    }

    /// `...`; reserves three hidden slots and returns the first.
    pub fn forward_all(&mut self) -> u32 {
        let base = self.fresh_local("*");
        self.fresh_local("**");
        self.fresh_local("&");
        self.params.push(Param::new("...", ParamKind::Forward, base));
        base
    }

    /// Adds a nested body and returns its index.
    pub fn child(&mut self, iseq: Iseq) -> usize {
        self.children.push(Arc::new(iseq));
        self.children.len() - 1
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        self.lines.push(self.line);
        index
    }

    /// Index the next instruction will get.
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Creates an unplaced label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Places `label` at the next instruction.
    pub fn place(&mut self, label: Label) {
        self.labels[label.0] = Some(self.position());
    }

    fn emit_to(&mut self, instruction: Instruction, label: Label) {
        let index = self.emit(instruction);
        self.fixups.push((index, label));
    }

    /// Jumps to `label`.
    pub fn jump(&mut self, label: Label) {
        self.emit_to(Instruction::Jump(0), label);
    }

    /// Pops and jumps to `label` if truthy.
    pub fn branch_if(&mut self, label: Label) {
        self.emit_to(Instruction::BranchIf(0), label);
    }

    /// Pops and jumps to `label` if falsy.
    pub fn branch_unless(&mut self, label: Label) {
        self.emit_to(Instruction::BranchUnless(0), label);
    }

    /// Pushes nil.
    pub fn put_nil(&mut self) {
        self.emit(Instruction::PutNil);
    }

    /// Pushes self.
    pub fn put_self(&mut self) {
        self.emit(Instruction::PutSelf);
    }

    /// Pushes an integer.
    pub fn put_int(&mut self, n: i64) {
        self.emit(Instruction::PutInteger(n));
    }

    /// Pushes a new string.
    pub fn put_str(&mut self, s: &str) {
        self.emit(Instruction::PutString(Arc::from(s)));
    }

    /// Pushes a symbol.
    pub fn put_sym(&mut self, name: &str) {
        self.emit(Instruction::PutSymbol(Symbol::intern(name)));
    }

    /// Pushes a local of this body.
    pub fn get_local(&mut self, slot: u32) {
        self.emit(Instruction::GetLocal { slot, depth: 0 });
    }

    /// Pops into a local of this body.
    pub fn set_local(&mut self, slot: u32) {
        self.emit(Instruction::SetLocal { slot, depth: 0 });
    }

    /// Pushes a constant.
    pub fn get_const(&mut self, name: &str) {
        self.emit(Instruction::GetConst(Symbol::intern(name)));
    }

    /// Pushes a global.
    pub fn get_global(&mut self, name: &str) {
        self.emit(Instruction::GetGlobal(Symbol::intern(name)));
    }

    /// Pops into a global.
    pub fn set_global(&mut self, name: &str) {
        self.emit(Instruction::SetGlobal(Symbol::intern(name)));
    }

    /// `[recv, args..] -> [result]` with `argc` positionals.
    pub fn send(&mut self, method: &str, argc: usize) {
        self.call(CallInfo::positional(method, argc));
    }

    /// Receiverless call; `self` must be pushed before the arguments.
    pub fn fcall(&mut self, method: &str, argc: usize) {
        self.call(CallInfo::positional(method, argc).fcall());
    }

    /// Emits a call with full call info.
    pub fn call(&mut self, info: CallInfo) {
        self.emit(Instruction::Send(Arc::new(info)));
    }

    /// Emits a call passing `block` as a literal block.
    pub fn call_with_block(&mut self, info: CallInfo, block: Iseq) {
        let index = self.child(block);
        self.call(info.with_block(BlockArg::Literal(index)));
    }

    /// `yield` with `argc` positionals.
    pub fn invoke_block(&mut self, argc: usize) {
        self.emit(Instruction::Yield(Arc::new(CallInfo::new(
            "yield",
            vec![ArgTag::Positional; argc],
        ))));
    }

    /// Pops the return value and leaves the frame.
    pub fn leave(&mut self) {
        self.emit(Instruction::Leave);
    }

    /// `def name` on the lexical class.
    pub fn define_method(&mut self, name: &str, body: Iseq) {
        let index = self.child(body);
        self.emit(Instruction::DefineMethod {
            name: Symbol::intern(name),
            body: index,
        });
    }

    /// `class name [< superclass]` / `module name`.
    pub fn define_class(&mut self, name: &str, kind: ClassDefKind, body: Iseq) {
        let index = self.child(body);
        self.emit(Instruction::DefineClass {
            name: Symbol::intern(name),
            kind,
            body: index,
        });
    }

    /// Opens a protected region; the body follows.
    pub fn begin(&mut self) -> RegionId {
        let index = self.regions.len();
        self.emit(Instruction::Protect(index));
        self.regions.push(Region {
            body: self.position(),
            ..Region::default()
        });
        self.parts.push(Part::Body);
        RegionId(index)
    }

    fn close_part(&mut self, region: RegionId, next: Part) -> bool {
        let Some(part) = self.parts.get(region.0).copied() else {
            self.fail(region, "unknown region");
            return false;
        };
        let allowed = match next {
            Part::Rescue => matches!(part, Part::Body | Part::Rescue),
            Part::Else => matches!(part, Part::Rescue),
            Part::Ensure | Part::Closed => !matches!(part, Part::Ensure | Part::Closed),
            Part::Body => false,
        };
        let allowed = allowed || (next == Part::Closed && part == Part::Ensure);
        if !allowed {
            self.fail(region, "clauses out of order");
            return false;
        }
        let r = region.0;
        match part {
            Part::Body => self.emit(Instruction::EndBody(r)),
            Part::Rescue => self.emit(Instruction::EndRescue(r)),
            Part::Else => self.emit(Instruction::EndElse(r)),
            Part::Ensure => self.emit(Instruction::EndEnsure(r)),
            Part::Closed => 0,
        };
        self.parts[r] = next;
        true
    }

    /// Starts a rescue clause. `classes` emits the class expressions and
    /// returns how many it pushed (zero for a bare `rescue`).
    pub fn rescue(
        &mut self,
        region: RegionId,
        binding: Option<u32>,
        classes: impl FnOnce(&mut Self) -> u32,
    ) {
        if !self.close_part(region, Part::Rescue) {
            return;
        }
        let test = self.position();
        let count = classes(self);
        let clause = self.regions[region.0].clauses.len();
        self.emit(Instruction::RescueTest {
            region: region.0,
            clause,
            count,
        });
        let body = self.position();
        self.regions[region.0]
            .clauses
            .push(RescueClause { test, body, binding });
    }

    /// Starts the `else` body.
    pub fn else_body(&mut self, region: RegionId) {
        if self.close_part(region, Part::Else) {
            self.regions[region.0].else_body = Some(self.position());
        }
    }

    /// Starts the `ensure` body.
    pub fn ensure(&mut self, region: RegionId) {
        if self.close_part(region, Part::Ensure) {
            self.regions[region.0].ensure = Some(self.position());
        }
    }

    /// Closes the region; its value is on the stack afterwards.
    pub fn end(&mut self, region: RegionId) {
        if self.close_part(region, Part::Closed) {
            self.regions[region.0].exit = self.position();
        }
    }

    /// `retry` inside a rescue body.
    pub fn retry(&mut self, region: RegionId) {
        self.emit(Instruction::Retry(region.0));
    }

    fn fail(&mut self, region: RegionId, message: &'static str) {
        self.error.get_or_insert(CompileError::Region {
            region: region.0,
            message,
        });
    }

    /// Resolves labels, validates the parameters and produces the iseq.
    ///
    /// A trailing `nil; leave` is appended when the body does not end in
    /// `leave` or a label points past the last instruction.
    pub fn build(mut self) -> Result<Iseq, CompileError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if let Some(open) = self.parts.iter().position(|p| *p != Part::Closed) {
            return Err(CompileError::Region {
                region: open,
                message: "region was not closed",
            });
        }
        let end = self.position();
        let dangling_target = self.labels.iter().any(|l| *l == Some(end));
        if dangling_target || !matches!(self.instructions.last(), Some(Instruction::Leave)) {
            self.put_nil();
            self.leave();
        }
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].ok_or(CompileError::UnplacedLabel(label.0))?;
            match &mut self.instructions[index] {
                Instruction::Jump(t) | Instruction::BranchIf(t) | Instruction::BranchUnless(t) => {
                    *t = target
                }
                _ => {}
            }
        }
        let params = ParamSpec::new(self.params)?;
        Ok(Iseq {
            name: self.name,
            kind: self.kind,
            path: self.path,
            first_line: self.first_line,
            params,
            locals: self.locals,
            instructions: self.instructions,
            lines: self.lines,
            regions: self.regions,
            children: self.children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve() {
        let mut b = IseqBuilder::top();
        let skip = b.label();
        b.emit(Instruction::PutTrue);
        b.branch_if(skip);
        b.put_int(1);
        b.leave();
        b.place(skip);
        b.put_int(2);
        b.leave();
        let iseq = b.build().unwrap();
        assert_eq!(iseq.instructions[1], Instruction::BranchIf(4));
    }

    #[test]
    fn test_appends_implicit_leave() {
        let mut b = IseqBuilder::top();
        b.put_int(1);
        b.emit(Instruction::Pop);
        let iseq = b.build().unwrap();
        assert_eq!(
            &iseq.instructions[2..],
            &[Instruction::PutNil, Instruction::Leave]
        );
    }

    #[test]
    fn test_region_layout() {
        let mut b = IseqBuilder::top();
        let e = b.local("e");
        let r = b.begin();
        b.put_int(1);
        b.rescue(r, Some(e), |b| {
            b.get_const("RuntimeError");
            1
        });
        b.put_int(2);
        b.else_body(r);
        b.put_int(3);
        b.ensure(r);
        b.put_nil();
        b.end(r);
        b.leave();
        let iseq = b.build().unwrap();

        let region = &iseq.regions[0];
        assert_eq!(iseq.instructions[0], Instruction::Protect(0));
        assert_eq!(region.body, 1);
        assert_eq!(iseq.instructions[2], Instruction::EndBody(0));
        assert_eq!(region.clauses[0].test, 3);
        assert_eq!(region.clauses[0].body, 5);
        assert_eq!(region.clauses[0].binding, Some(e));
        assert_eq!(iseq.instructions[6], Instruction::EndRescue(0));
        assert_eq!(region.else_body, Some(7));
        assert_eq!(iseq.instructions[8], Instruction::EndElse(0));
        assert_eq!(region.ensure, Some(9));
        assert_eq!(iseq.instructions[10], Instruction::EndEnsure(0));
        assert_eq!(region.exit, 11);
        assert_eq!(iseq.instructions[11], Instruction::Leave);
    }

    #[test]
    fn test_else_requires_rescue() {
        let mut b = IseqBuilder::top();
        let r = b.begin();
        b.put_nil();
        b.else_body(r);
        b.put_nil();
        b.end(r);
        assert!(matches!(b.build(), Err(CompileError::Region { .. })));
    }

    #[test]
    fn test_unclosed_region() {
        let mut b = IseqBuilder::top();
        b.begin();
        b.put_nil();
        assert!(matches!(b.build(), Err(CompileError::Region { .. })));
    }

    #[test]
    fn test_parameters_validated() {
        let mut b = IseqBuilder::method("m");
        b.required_keyword("k");
        b.required("a");
        assert!(matches!(b.build(), Err(CompileError::Params(_))));
    }

    #[test]
    fn test_forward_reserves_slots() {
        let mut b = IseqBuilder::method("m");
        let a = b.required("a");
        let base = b.forward_all();
        let iseq = b.build().unwrap();
        assert_eq!((a, base), (0, 1));
        assert_eq!(iseq.local_count(), 4);
        assert!(iseq.params.forward().is_some());
    }
}

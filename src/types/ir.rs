//! The SSA intermediate representation: functions of basic blocks of
//! three-address values, with edit primitives that keep the use counts and
//! CFG edges consistent.
//!
//! A [`Fun`] owns its [`Value`]s and [`Block`]s in index arenas; ids are
//! never reused, so `vid`/`bid` only grow and freed slots become `Invalid`
//! tombstones. Every argument edge contributes one use to its target, a
//! block's control contributes one use, and the function root contributes
//! none. Any CFG edit invalidates the cached analyses as a group.

use std::rc::Rc;
use std::sync::Arc;

use arrayvec::ArrayVec;
use bitflags::bitflags;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::analysis::{DomTree, LoopNest};
use crate::arch::{Config, Register};
use crate::pos::Pos;
use crate::symbol::Symbol;
use crate::types::ty::{TyId, TyKind, TyStore};
use crate::types::{Idx, IdxVec, mk_id};

mk_id! {
  /// An index into a function's value arena.
  ValueId,
  /// An index into a function's block arena.
  BlockId,
}

/// An SSA operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
  /// A freed value slot.
  Invalid,
  /// A boolean constant (`aux_int` is 0 or 1).
  ConstBool,
  /// An 8-bit integer constant.
  ConstI8,
  /// A 16-bit integer constant.
  ConstI16,
  /// A 32-bit integer constant.
  ConstI32,
  /// A 64-bit integer constant.
  ConstI64,
  /// A 32-bit float constant (`aux_int` holds the bit pattern).
  ConstF32,
  /// A 64-bit float constant (`aux_int` holds the bit pattern).
  ConstF64,
  /// The stack pointer.
  SP,
  /// The static base pointer.
  SB,
  /// The address of a named symbol; the argument is `SP` or `SB`.
  Addr,
  /// An incoming function argument (`aux_int` is its index).
  Arg,
  /// An SSA phi join.
  Phi,
  /// A copy of its argument.
  Copy,
  /// Integer addition.
  Add,
  /// Integer subtraction.
  Sub,
  /// Integer multiplication.
  Mul,
  /// Integer division.
  Div,
  /// Integer remainder.
  Rem,
  /// Bitwise and.
  And,
  /// Bitwise or.
  Or,
  /// Bitwise exclusive or.
  Xor,
  /// Left shift.
  Shl,
  /// Right shift.
  Shr,
  /// Arithmetic negation.
  Neg,
  /// Boolean/bitwise complement.
  Not,
  /// Equality comparison.
  Eq,
  /// Inequality comparison.
  Ne,
  /// Less-than comparison.
  Lt,
  /// Less-or-equal comparison.
  Le,
  /// Greater-than comparison.
  Gt,
  /// Greater-or-equal comparison.
  Ge,
  /// A function call (`aux` names the callee).
  Call,
}

bitflags! {
  /// Static properties of an [`Op`].
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct OpFlags: u8 {
    /// The op produces a constant; it participates in the constant cache.
    const CONSTANT = 1;
    /// The op can be recomputed at any point instead of being spilled,
    /// provided its arguments are stack/static base pointers.
    const REMATERIALIZABLE = 2;
    /// The op's first two arguments commute.
    const COMMUTATIVE = 4;
    /// The op has side effects and must not be removed even at zero uses.
    const EFFECTFUL = 8;
  }
}

impl Op {
  /// The static flags for this op.
  #[must_use] pub fn flags(self) -> OpFlags {
    match self {
      Op::ConstBool | Op::ConstI8 | Op::ConstI16 | Op::ConstI32 | Op::ConstI64
      | Op::ConstF32 | Op::ConstF64 =>
        OpFlags::CONSTANT | OpFlags::REMATERIALIZABLE,
      Op::SP | Op::SB => OpFlags::REMATERIALIZABLE,
      Op::Addr => OpFlags::REMATERIALIZABLE,
      Op::Add | Op::Mul | Op::And | Op::Or | Op::Xor | Op::Eq | Op::Ne =>
        OpFlags::COMMUTATIVE,
      Op::Call => OpFlags::EFFECTFUL,
      _ => OpFlags::empty(),
    }
  }

  /// The constant op for values of type `t`, if `t` is a constant-capable type.
  #[must_use] pub fn const_for(ts: &TyStore, t: TyId) -> Option<Op> {
    use crate::types::ty::PrimTy;
    Some(match *ts.kind(ts.unalias(t)) {
      TyKind::Prim(PrimTy::Bool) => Op::ConstBool,
      TyKind::Prim(PrimTy::I8 | PrimTy::U8) => Op::ConstI8,
      TyKind::Prim(PrimTy::I16 | PrimTy::U16) => Op::ConstI16,
      TyKind::Prim(PrimTy::I32 | PrimTy::U32 | PrimTy::Int | PrimTy::Uint) => Op::ConstI32,
      TyKind::Prim(PrimTy::I64 | PrimTy::U64) => Op::ConstI64,
      TyKind::Prim(PrimTy::F32) => Op::ConstF32,
      TyKind::Prim(PrimTy::F64) => Op::ConstF64,
      _ => return None,
    })
  }
}

/// A three-address SSA value.
#[derive(Debug)]
pub struct Value {
  /// The value's id, unique within its function and never reused.
  pub id: ValueId,
  /// The source position the value was generated from.
  pub pos: Pos,
  /// The operation.
  pub op: Op,
  /// The result type.
  pub ty: TyId,
  /// The block the value lives in.
  pub block: BlockId,
  /// Symbol payload (callee name, address symbol).
  pub aux: Option<Symbol>,
  /// Integer payload (constants, argument index).
  pub aux_int: i64,
  /// The ordered arguments. Each entry holds one use of its target.
  pub args: SmallVec<[ValueId; 2]>,
  /// The number of incoming edges from other values' `args` and block
  /// controls. The function root contributes no use.
  pub uses: u32,
  /// The physical register chosen by register allocation, if any.
  pub reg: Option<Register>,
}

/// The kind of a block's outgoing control flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockKind {
  /// One successor, no control value.
  #[default] Plain,
  /// Two successors selected by a boolean control value.
  If,
  /// No successors; the control value, if any, is the return value.
  Ret,
  /// An `If` proven to always take successor 0; the control is kept for
  /// bookkeeping until the dead-code sweep runs.
  First,
  /// A freed block slot.
  Invalid,
}

/// A three-valued branch hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Likely {
  /// No prediction.
  #[default] Unknown,
  /// Successor 0 is the likely branch.
  Yes,
  /// Successor 1 is the likely branch.
  No,
}

/// A basic block.
#[derive(Debug)]
pub struct Block {
  /// The block's id, unique within its function and never reused.
  pub id: BlockId,
  /// The control-flow kind.
  pub kind: BlockKind,
  /// The control value (branch condition or return value).
  pub control: Option<ValueId>,
  /// Successor blocks, at most two.
  pub succs: ArrayVec<BlockId, 2>,
  /// Predecessor blocks.
  pub preds: SmallVec<[BlockId; 2]>,
  /// The values of the block, in schedule order.
  pub values: Vec<ValueId>,
  /// A sealed block may not gain additional predecessors.
  pub sealed: bool,
  /// The branch hint for `If` blocks.
  pub likely: Likely,
}

pub(crate) type PostorderCache = Rc<Vec<BlockId>>;
pub(crate) type IdomCache = Rc<IdxVec<BlockId, Option<BlockId>>>;

/// The cached CFG analyses; invalidated as a group by any CFG edit.
#[derive(Debug, Default)]
pub(crate) struct Caches {
  pub(crate) postorder: Option<PostorderCache>,
  pub(crate) idom: Option<IdomCache>,
  pub(crate) sdom: Option<Rc<DomTree>>,
  pub(crate) loopnest: Option<Rc<LoopNest>>,
}

/// A function in SSA form.
pub struct Fun {
  /// The lowering configuration in effect.
  pub config: Arc<Config>,
  /// The function's type.
  pub ty: TyId,
  /// The function's name.
  pub name: Symbol,
  /// The number of incoming arguments.
  pub nargs: u32,
  /// The entry block. Invariant: `order[0] == entry`.
  pub entry: BlockId,
  /// The block layout order.
  pub order: Vec<BlockId>,
  /// Values named after source variables, for debugging.
  pub named_values: HashMap<Symbol, Vec<ValueId>>,
  /// The per-value register assignment, present once register allocation
  /// has run.
  pub reg_alloc: Option<IdxVec<ValueId, Option<Register>>>,
  values: IdxVec<ValueId, Value>,
  blocks: IdxVec<BlockId, Block>,
  consts: HashMap<(Op, i64), ValueId>,
  diags: Vec<String>,
  pub(crate) caches: Caches,
}

impl std::fmt::Debug for Fun {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "fun {}", self.name)
  }
}

impl Fun {
  /// Create a function with a fresh entry block.
  #[must_use] pub fn new(config: Arc<Config>, name: Symbol, ty: TyId, nargs: u32) -> Self {
    let mut f = Self {
      config,
      ty,
      name,
      nargs,
      entry: BlockId(0),
      order: vec![],
      named_values: HashMap::new(),
      reg_alloc: None,
      values: IdxVec::new(),
      blocks: IdxVec::new(),
      consts: HashMap::new(),
      diags: Vec::new(),
      caches: Caches::default(),
    };
    let entry = f.new_block(BlockKind::Plain);
    f.entry = entry;
    f
  }

  /// The next value id (grows monotonically).
  #[must_use] pub fn vid(&self) -> u32 { self.values.len().try_into().expect("overflow") }

  /// The next block id (grows monotonically).
  #[must_use] pub fn bid(&self) -> u32 { self.blocks.len().try_into().expect("overflow") }

  /// The value for an id.
  #[must_use] pub fn value(&self, v: ValueId) -> &Value { &self.values[v] }

  /// The block for an id.
  #[must_use] pub fn block(&self, b: BlockId) -> &Block { &self.blocks[b] }

  /// Diagnostics produced by rejected edits, for the embedder to drain.
  pub fn take_diags(&mut self) -> Vec<String> { std::mem::take(&mut self.diags) }

  /// Append a new block to the function.
  pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
    let id = self.blocks.peek();
    self.blocks.push(Block {
      id,
      kind,
      control: None,
      succs: ArrayVec::new(),
      preds: SmallVec::new(),
      values: vec![],
      sealed: false,
      likely: Likely::Unknown,
    });
    self.order.push(id);
    self.invalidate_cfg();
    id
  }

  /// Append a new value to `block`.
  pub fn new_value(&mut self, block: BlockId, op: Op, ty: TyId, pos: Pos) -> ValueId {
    let id = self.values.peek();
    self.values.push(Value {
      id,
      pos,
      op,
      ty,
      block,
      aux: None,
      aux_int: 0,
      args: SmallVec::new(),
      uses: 0,
      reg: None,
    });
    self.blocks[block].values.push(id);
    id
  }

  /// Append an argument edge `v -> arg`. Self-reference is forbidden.
  pub fn add_arg(&mut self, v: ValueId, arg: ValueId) {
    assert_ne!(v, arg, "self-referential argument");
    self.values[arg].uses += 1;
    self.values[v].args.push(arg);
  }

  /// Replace argument `i` of `v`, fixing up both use counts.
  pub fn set_arg(&mut self, v: ValueId, i: usize, arg: ValueId) {
    let old = self.values[v].args[i];
    self.values[old].uses -= 1;
    self.values[arg].uses += 1;
    self.values[v].args[i] = arg;
  }

  /// Drop all argument edges of `v`, decrementing each target's uses.
  pub fn reset_args(&mut self, v: ValueId) {
    let args = std::mem::take(&mut self.values[v].args);
    for a in args { self.values[a].uses -= 1 }
  }

  /// Change `v`'s op, dropping its arguments and payloads.
  pub fn reset(&mut self, v: ValueId, op: Op) {
    self.reset_args(v);
    let val = &mut self.values[v];
    val.op = op;
    val.aux = None;
    val.aux_int = 0;
  }

  /// Remove `v` from its block and free it. The value must be unused.
  pub fn remove_value(&mut self, v: ValueId) {
    self.reset_args(v);
    let val = &self.values[v];
    assert_eq!(val.uses, 0, "removing a value that is still used");
    let block = val.block;
    self.blocks[block].values.retain(|&w| w != v);
    self.consts.retain(|_, &mut w| w != v);
    let val = &mut self.values[v];
    val.op = Op::Invalid;
    val.aux = None;
    val.aux_int = 0;
  }

  /// Set or clear the control value of `b`, fixing up use counts.
  pub fn set_control(&mut self, b: BlockId, ctrl: Option<ValueId>) {
    if let Some(old) = self.blocks[b].control {
      self.values[old].uses -= 1;
    }
    if let Some(new) = ctrl {
      self.values[new].uses += 1;
    }
    self.blocks[b].control = ctrl;
  }

  /// Add the CFG edge `from -> to`, appending to both edge lists. A sealed
  /// target rejects the edit with a diagnostic.
  pub fn add_edge_to(&mut self, from: BlockId, to: BlockId) -> bool {
    if self.blocks[to].sealed {
      self.diags.push(format!("edge to sealed block b{to} from b{from}"));
      return false
    }
    self.blocks[from].succs.push(to);
    self.blocks[to].preds.push(from);
    self.invalidate_cfg();
    true
  }

  /// Seal `b`: no further predecessors may be added.
  pub fn seal(&mut self, b: BlockId) { self.blocks[b].sealed = true }

  /// Remove predecessor `i` of `b`. The caller maintains the successor side.
  pub fn remove_pred(&mut self, b: BlockId, i: usize) {
    self.blocks[b].preds.remove(i);
    self.invalidate_cfg();
  }

  /// Remove successor `i` of `b`. The caller maintains the predecessor side.
  pub fn remove_succ(&mut self, b: BlockId, i: usize) {
    self.blocks[b].succs.remove(i);
    self.invalidate_cfg();
  }

  /// Set the branch hint of `b`.
  pub fn set_likely(&mut self, b: BlockId, likely: Likely) {
    self.blocks[b].likely = likely;
  }

  /// Change the control-flow kind of `b`.
  pub fn set_kind(&mut self, b: BlockId, kind: BlockKind) {
    self.blocks[b].kind = kind;
    self.invalidate_cfg();
  }

  /// Rewrite the `If` block `b`, proven to take successor `taken`, to a
  /// `First` block with the taken successor at index 0.
  pub fn set_first(&mut self, b: BlockId, taken: usize) {
    let bl = &mut self.blocks[b];
    assert_eq!(bl.kind, BlockKind::If, "only If blocks become First");
    if taken == 1 {
      bl.succs.swap(0, 1);
    }
    bl.kind = BlockKind::First;
    self.invalidate_cfg();
  }

  /// Drop all cached CFG analyses.
  pub fn invalidate_cfg(&mut self) {
    self.caches = Caches::default();
  }

  /// The interned constant of type `t` with payload `c` (bit pattern for
  /// floats). Created in the entry block on first use; later calls return
  /// the identical value.
  pub fn const_val(&mut self, ts: &TyStore, t: TyId, c: i64) -> Option<ValueId> {
    let op = Op::const_for(ts, t)?;
    if let Some(&v) = self.consts.get(&(op, c)) { return Some(v) }
    let entry = self.entry;
    let v = self.new_value(entry, op, t, Pos::NONE);
    self.values[v].aux_int = c;
    self.consts.insert((op, c), v);
    Some(v)
  }

  /// The interned boolean constant.
  pub fn const_bool(&mut self, ts: &TyStore, b: bool) -> ValueId {
    self.const_val(ts, TyStore::BOOL, i64::from(b)).expect("bool is constable")
  }

  /// The interned `f64` constant.
  pub fn const_f64(&mut self, ts: &TyStore, x: f64) -> ValueId {
    self.const_val(ts, TyStore::F64, x.to_bits() as i64).expect("f64 is constable")
  }

  /// A value can be rematerialized iff its op allows it and every argument
  /// is a stack or static base pointer.
  #[must_use] pub fn rematerializable(&self, v: ValueId) -> bool {
    let val = &self.values[v];
    val.op.flags().contains(OpFlags::REMATERIALIZABLE)
      && val.args.iter().all(|&a| matches!(self.values[a].op, Op::SP | Op::SB))
  }

  /// Record that `v` carries the source-level name `name`.
  pub fn add_named_value(&mut self, name: Symbol, v: ValueId) {
    self.named_values.entry(name).or_default().push(v);
  }

  /// Remove successors of `First` blocks and any blocks that become
  /// unreachable from the entry, freeing their values.
  pub fn remove_unreachable(&mut self) {
    use bit_set::BitSet;
    // rewrite First blocks down to their single taken successor
    let first_blocks: Vec<BlockId> = self.order.iter().copied()
      .filter(|&b| self.blocks[b].kind == BlockKind::First)
      .collect();
    for b in first_blocks {
      while self.blocks[b].succs.len() > 1 {
        let dead = self.blocks[b].succs[1];
        self.blocks[b].succs.remove(1);
        if let Some(i) = self.blocks[dead].preds.iter().position(|&p| p == b) {
          self.blocks[dead].preds.remove(i);
        }
      }
      let bl = &mut self.blocks[b];
      bl.kind = BlockKind::Plain;
      if let Some(c) = bl.control.take() {
        self.values[c].uses -= 1;
      }
    }
    // mark everything reachable from the entry
    let mut reachable = BitSet::new();
    let mut stack = vec![self.entry];
    while let Some(b) = stack.pop() {
      if !reachable.insert(b.into_usize()) { continue }
      stack.extend(self.blocks[b].succs.iter().copied());
    }
    // detach and free the rest
    let dead: Vec<BlockId> = self.order.iter().copied()
      .filter(|&b| !reachable.contains(b.into_usize()))
      .collect();
    for &b in &dead {
      let succs: Vec<BlockId> = self.blocks[b].succs.drain(..).collect();
      for s in succs {
        if let Some(i) = self.blocks[s].preds.iter().position(|&p| p == b) {
          self.blocks[s].preds.remove(i);
        }
      }
      self.blocks[b].preds.clear();
      if let Some(c) = self.blocks[b].control.take() {
        self.values[c].uses -= 1;
      }
    }
    // free values innermost-uses-first: drop all argument edges, then the slots
    for &b in &dead {
      let vals = std::mem::take(&mut self.blocks[b].values);
      for v in vals {
        self.reset_args(v);
        self.consts.retain(|_, &mut w| w != v);
        let val = &mut self.values[v];
        val.op = Op::Invalid;
        val.aux = None;
        val.aux_int = 0;
      }
      self.blocks[b].kind = BlockKind::Invalid;
    }
    self.order.retain(|&b| reachable.contains(b.into_usize()));
    self.invalidate_cfg();
  }
}

impl std::fmt::Display for Fun {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "fun {} (nargs {})", self.name, self.nargs)?;
    for &b in &self.order {
      let bl = &self.blocks[b];
      write!(f, "  b{}: {:?}", b, bl.kind)?;
      if !bl.preds.is_empty() {
        write!(f, " <-")?;
        for p in &bl.preds { write!(f, " b{p}")? }
      }
      writeln!(f)?;
      for &v in &bl.values {
        let val = &self.values[v];
        write!(f, "    v{} = {:?}", v, val.op)?;
        for a in &val.args { write!(f, " v{a}")? }
        if val.aux_int != 0 { write!(f, " [{}]", val.aux_int)? }
        if let Some(aux) = val.aux { write!(f, " {{{aux}}}")? }
        writeln!(f, " (uses {})", val.uses)?;
      }
      match bl.kind {
        BlockKind::Ret => match bl.control {
          Some(c) => writeln!(f, "    ret v{c}")?,
          None => writeln!(f, "    ret")?,
        },
        _ => {
          if let Some(c) = bl.control { writeln!(f, "    ctrl v{c}")? }
          if !bl.succs.is_empty() {
            write!(f, "    ->")?;
            for s in &bl.succs { write!(f, " b{s}")? }
            writeln!(f)?;
          }
        }
      }
    }
    Ok(())
  }
}

/// A package of compiled functions.
#[derive(Debug, Default)]
pub struct Pkg {
  /// The functions, by name.
  pub funs: HashMap<Symbol, Fun>,
  /// The merged package initializer, if any `init` functions were declared.
  pub init: Option<Fun>,
}

impl Pkg {
  /// An empty package.
  #[must_use] pub fn new() -> Self { Self::default() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::Config;
  use crate::symbol::intern;

  fn new_fun() -> (TyStore, Fun) {
    let ts = TyStore::new();
    let f = Fun::new(Config::generic(), intern("test"), TyStore::VOID, 0);
    (ts, f)
  }

  #[test]
  fn use_counts_track_edges() {
    let (ts, mut f) = new_fun();
    let entry = f.entry;
    let a = f.const_val(&ts, TyStore::I32, 1).unwrap();
    let b = f.const_val(&ts, TyStore::I32, 2).unwrap();
    let add = f.new_value(entry, Op::Add, TyStore::I32, Pos::NONE);
    f.add_arg(add, a);
    f.add_arg(add, b);
    assert_eq!(f.value(a).uses, 1);
    assert_eq!(f.value(b).uses, 1);
    assert_eq!(f.value(add).uses, 0);
    let c = f.const_val(&ts, TyStore::I32, 3).unwrap();
    f.set_arg(add, 1, c);
    assert_eq!(f.value(b).uses, 0);
    assert_eq!(f.value(c).uses, 1);
    f.reset_args(add);
    assert_eq!(f.value(a).uses, 0);
    assert_eq!(f.value(c).uses, 0);
  }

  #[test]
  fn control_uses() {
    let (ts, mut f) = new_fun();
    let b = f.new_block(BlockKind::Ret);
    let v = f.const_val(&ts, TyStore::I32, 7).unwrap();
    f.set_control(b, Some(v));
    assert_eq!(f.value(v).uses, 1);
    f.set_control(b, None);
    assert_eq!(f.value(v).uses, 0);
  }

  #[test]
  fn const_interning_identity() {
    let (ts, mut f) = new_fun();
    let a = f.const_val(&ts, TyStore::I64, 42).unwrap();
    let b = f.const_val(&ts, TyStore::I64, 42).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, f.const_val(&ts, TyStore::I64, 43).unwrap());
    // same payload, different width: different op, different value
    assert_ne!(a, f.const_val(&ts, TyStore::I32, 42).unwrap());
    // constants live in the entry block
    assert_eq!(f.value(a).block, f.entry);
  }

  #[test]
  fn sealed_block_rejects_edges() {
    let (_, mut f) = new_fun();
    let a = f.new_block(BlockKind::Plain);
    let b = f.new_block(BlockKind::Plain);
    f.seal(b);
    assert!(!f.add_edge_to(a, b));
    assert!(f.block(a).succs.is_empty());
    assert!(f.block(b).preds.is_empty());
    assert_eq!(f.take_diags().len(), 1);
  }

  #[test]
  fn self_reference_forbidden() {
    let (_, mut f) = new_fun();
    let entry = f.entry;
    let v = f.new_value(entry, Op::Phi, TyStore::I32, Pos::NONE);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      f.add_arg(v, v);
    }));
    assert!(result.is_err());
  }

  #[test]
  fn remove_value_requires_unused() {
    let (ts, mut f) = new_fun();
    let entry = f.entry;
    let a = f.const_val(&ts, TyStore::I32, 1).unwrap();
    let neg = f.new_value(entry, Op::Neg, TyStore::I32, Pos::NONE);
    f.add_arg(neg, a);
    f.remove_value(neg);
    assert_eq!(f.value(neg).op, Op::Invalid);
    assert_eq!(f.value(a).uses, 0);
    assert!(!f.block(entry).values.contains(&neg));
    // the freed const slot must leave the cache so ids are not resurrected
    f.remove_value(a);
    let a2 = f.const_val(&ts, TyStore::I32, 1).unwrap();
    assert_ne!(a, a2);
  }

  #[test]
  fn rematerializable_needs_base_args() {
    let (ts, mut f) = new_fun();
    let entry = f.entry;
    let sp = f.new_value(entry, Op::SP, TyStore::I64, Pos::NONE);
    let addr = f.new_value(entry, Op::Addr, TyStore::I64, Pos::NONE);
    f.add_arg(addr, sp);
    assert!(f.rematerializable(addr));
    let k = f.const_val(&ts, TyStore::I64, 8).unwrap();
    let addr2 = f.new_value(entry, Op::Addr, TyStore::I64, Pos::NONE);
    f.add_arg(addr2, k);
    assert!(!f.rematerializable(addr2));
    let add = f.new_value(entry, Op::Add, TyStore::I64, Pos::NONE);
    assert!(!f.rematerializable(add));
  }

  #[test]
  fn first_rewrite_and_sweep() {
    let (ts, mut f) = new_fun();
    let entry = f.entry;
    let then = f.new_block(BlockKind::Ret);
    let els = f.new_block(BlockKind::Ret);
    let cond = f.const_bool(&ts, true);
    f.set_kind(entry, BlockKind::If);
    f.set_control(entry, Some(cond));
    f.add_edge_to(entry, then);
    f.add_edge_to(entry, els);
    // the optimizer proved the branch always goes to `els`
    f.set_first(entry, 1);
    assert_eq!(f.block(entry).kind, BlockKind::First);
    assert_eq!(f.block(entry).succs[0], els);
    f.remove_unreachable();
    assert_eq!(f.block(entry).kind, BlockKind::Plain);
    assert_eq!(f.block(then).kind, BlockKind::Invalid);
    assert_eq!(f.order, vec![entry, els]);
    assert_eq!(f.value(cond).uses, 0);
  }
}

//! Scopes and the [`Ent`] binding records they own.
//!
//! Scopes form a tree rooted at the universe scope, which holds the
//! predeclared types and identifiers and is read-only after construction.
//! Each scope owns its `Ent`s; identifiers point back at them weakly by
//! [`EntId`]. A name resolves by walking outer links from the use site.

use hashbrown::HashMap;

use crate::symbol::{Symbol, intern};
use crate::types::ast::NodeId;
use crate::types::ty::{TyId, TyStore};
use crate::types::{IdxVec, mk_id};

mk_id! {
  /// An index into the scope arena.
  ScopeId,
  /// An index into the binding arena.
  EntId,
}

/// What kind of construct a scope belongs to. This drives the unused-name
/// diagnostics and the assignment store rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
  /// The universe scope.
  Universe,
  /// A package scope, shared by all files of the package.
  Package,
  /// A file scope; its outer scope is the package scope.
  File,
  /// A function's top scope (parameters live here).
  Fun,
  /// A struct body; unused fields are exempt from warnings.
  Struct,
  /// Any nested block or condition scope.
  Block,
}

/// A lexical scope.
#[derive(Debug)]
pub struct Scope {
  /// The enclosing scope; `None` only for the universe.
  pub outer: Option<ScopeId>,
  /// The kind of construct this scope belongs to.
  pub kind: ScopeKind,
  /// The AST node whose body this scope is, if any.
  pub context: Option<NodeId>,
  /// The names declared directly in this scope.
  pub decls: HashMap<Symbol, EntId>,
}

/// A binding: the record a scope holds for a name.
#[derive(Debug)]
pub struct Ent {
  /// The bound name.
  pub name: Symbol,
  /// The AST node that introduced the name; `None` for predeclared names.
  pub decl: Option<NodeId>,
  /// The current value expression, for immutable-binding constant folding.
  pub value: Option<NodeId>,
  /// The binding's type, once known.
  pub ty: Option<TyId>,
  /// The owning scope.
  pub scope: ScopeId,
  /// Observed reads.
  pub nreads: u32,
  /// Observed writes (the introducing write is not counted).
  pub nwrites: u32,
}

impl Ent {
  /// A binding is immutable if it was never re-assigned after introduction.
  #[must_use] pub fn is_immutable(&self) -> bool { self.nwrites == 0 }
}

impl Default for Defs {
  fn default() -> Self { Self::new() }
}

/// The scope and binding arenas for one compilation, plus the universe.
#[derive(Debug)]
pub struct Defs {
  scopes: IdxVec<ScopeId, Scope>,
  ents: IdxVec<EntId, Ent>,
  /// The universe scope.
  pub universe: ScopeId,
}

impl Defs {
  /// Build the arenas with the universe scope installed.
  #[must_use] pub fn new() -> Self {
    let mut d = Self { scopes: IdxVec::new(), ents: IdxVec::new(), universe: ScopeId(0) };
    let universe = d.scopes.push(Scope {
      outer: None,
      kind: ScopeKind::Universe,
      context: None,
      decls: HashMap::new(),
    });
    d.universe = universe;
    for (name, ty) in [
      ("bool", TyStore::BOOL),
      ("i8", TyStore::I8), ("i16", TyStore::I16), ("i32", TyStore::I32), ("i64", TyStore::I64),
      ("u8", TyStore::U8), ("u16", TyStore::U16), ("u32", TyStore::U32), ("u64", TyStore::U64),
      ("int", TyStore::INT), ("uint", TyStore::UINT),
      ("f32", TyStore::F32), ("f64", TyStore::F64),
      ("str", TyStore::STR), ("void", TyStore::VOID),
      ("true", TyStore::BOOL), ("false", TyStore::BOOL),
    ] {
      let sym = intern(name);
      let ent = d.ents.push(Ent {
        name: sym,
        decl: None,
        value: None,
        ty: Some(ty),
        scope: universe,
        nreads: 0,
        nwrites: 0,
      });
      d.scopes[universe].decls.insert(sym, ent);
    }
    d
  }

  /// Open a new scope under `outer`.
  pub fn new_scope(&mut self, outer: ScopeId, kind: ScopeKind, context: Option<NodeId>)
      -> ScopeId {
    self.scopes.push(Scope { outer: Some(outer), kind, context, decls: HashMap::new() })
  }

  /// The scope record for an id.
  #[must_use] pub fn scope(&self, s: ScopeId) -> &Scope { &self.scopes[s] }

  /// The binding record for an id.
  #[must_use] pub fn ent(&self, e: EntId) -> &Ent { &self.ents[e] }

  /// The binding record for an id, mutably.
  pub fn ent_mut(&mut self, e: EntId) -> &mut Ent { &mut self.ents[e] }

  /// Declare `name` in `scope`. Fails with the existing binding if the name
  /// is already declared in this same scope. The caller is responsible for
  /// never declaring `_`.
  pub fn declare(&mut self, scope: ScopeId, name: Symbol, decl: NodeId,
      value: Option<NodeId>) -> Result<EntId, EntId> {
    debug_assert_ne!(name, Symbol::UNDER);
    if let Some(&prev) = self.scopes[scope].decls.get(&name) { return Err(prev) }
    let ent = self.ents.push(Ent {
      name,
      decl: Some(decl),
      value,
      ty: None,
      scope,
      nreads: 0,
      nwrites: 0,
    });
    self.scopes[scope].decls.insert(name, ent);
    Ok(ent)
  }

  /// Look `name` up in `scope` only.
  #[must_use] pub fn lookup_local(&self, scope: ScopeId, name: Symbol) -> Option<EntId> {
    self.scopes[scope].decls.get(&name).copied()
  }

  /// Resolve `name` by walking outer links from `scope`.
  #[must_use] pub fn lookup(&self, scope: ScopeId, name: Symbol) -> Option<EntId> {
    let mut s = scope;
    loop {
      if let Some(&e) = self.scopes[s].decls.get(&name) { return Some(e) }
      s = self.scopes[s].outer?;
    }
  }

  /// Count a read of the binding.
  pub fn read(&mut self, e: EntId) { self.ents[e].nreads += 1 }

  /// Count a write of the binding and update its current value.
  pub fn write(&mut self, e: EntId, value: Option<NodeId>) {
    let ent = &mut self.ents[e];
    ent.nwrites += 1;
    ent.value = value;
  }

  /// The store rule for plain `=`: true if assigning to this binding from
  /// `from` stores to it, false if the assignment must be promoted to a new
  /// declaration. Stores are legal within the binding's own function, and
  /// to package-scope targets from inside an `init` function.
  #[must_use] pub fn storable(&self, e: EntId, from: ScopeId, in_init: bool) -> bool {
    let target = self.ents[e].scope;
    if self.scopes[target].kind == ScopeKind::Universe { return false }
    let mut s = from;
    loop {
      if s == target { return true }
      let sc = &self.scopes[s];
      if sc.kind == ScopeKind::Fun {
        // the binding lives outside the current function
        return in_init && self.scopes[target].kind == ScopeKind::Package
      }
      match sc.outer {
        Some(o) => s = o,
        None => return false,
      }
    }
  }

  /// The zero-read bindings of `scope`, for unused-name diagnostics.
  /// Struct body scopes are exempt and yield nothing.
  #[must_use] pub fn unread(&self, scope: ScopeId) -> Vec<EntId> {
    let sc = &self.scopes[scope];
    if sc.kind == ScopeKind::Struct { return vec![] }
    let mut out: Vec<EntId> = sc.decls.values()
      .filter(|&&e| self.ents[e].nreads == 0)
      .copied()
      .collect();
    // deterministic diagnostic order
    out.sort_by_key(|&e| self.ents[e].decl);
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn setup() -> Defs { Defs::new() }

  #[test]
  fn universe_predeclared() {
    let d = setup();
    let e = d.lookup(d.universe, intern("int")).expect("int predeclared");
    assert_eq!(d.ent(e).ty, Some(TyStore::INT));
    assert!(d.lookup(d.universe, intern("nosuch")).is_none());
  }

  #[test]
  fn lookup_walks_outer() {
    let mut d = setup();
    let pkg = d.new_scope(d.universe, ScopeKind::Package, None);
    let file = d.new_scope(pkg, ScopeKind::File, None);
    let x = intern("x");
    let e = d.declare(pkg, x, NodeId(0), None).unwrap();
    assert_eq!(d.lookup(file, x), Some(e));
    assert_eq!(d.lookup_local(file, x), None);
  }

  #[test]
  fn redeclare_fails() {
    let mut d = setup();
    let pkg = d.new_scope(d.universe, ScopeKind::Package, None);
    let x = intern("x");
    let e = d.declare(pkg, x, NodeId(0), None).unwrap();
    assert_eq!(d.declare(pkg, x, NodeId(1), None), Err(e));
  }

  #[test]
  fn store_rule() {
    let mut d = setup();
    let pkg = d.new_scope(d.universe, ScopeKind::Package, None);
    let file = d.new_scope(pkg, ScopeKind::File, None);
    let fun = d.new_scope(file, ScopeKind::Fun, None);
    let block = d.new_scope(fun, ScopeKind::Block, None);
    let local = d.declare(fun, intern("a"), NodeId(0), None).unwrap();
    let global = d.declare(pkg, intern("g"), NodeId(1), None).unwrap();
    // same function: store
    assert!(d.storable(local, block, false));
    // package target from a plain function: promote to declaration
    assert!(!d.storable(global, block, false));
    // package target from init: store
    assert!(d.storable(global, block, true));
  }

  #[test]
  fn unused_reporting_order() {
    let mut d = setup();
    let fun = d.new_scope(d.universe, ScopeKind::Fun, None);
    let a = d.declare(fun, intern("a"), NodeId(2), None).unwrap();
    let b = d.declare(fun, intern("b"), NodeId(5), None).unwrap();
    d.read(b);
    assert_eq!(d.unread(fun), vec![a]);
    let st = d.new_scope(fun, ScopeKind::Struct, None);
    d.declare(st, intern("f"), NodeId(9), None).unwrap();
    assert!(d.unread(st).is_empty());
  }
}

//! The type model: a sum of type kinds held in a hash-consing [`TyStore`].
//!
//! Types are referred to by [`TyId`]; structurally equal types constructed
//! through the store's constructors share one id, so type equality on ids is
//! cheap and `resolve` can promise object identity for repeated calls.
//! Unresolved types are the exception: every [`TyKind::Unresolved`] is fresh
//! and carries a growable set of back-references to the AST nodes whose type
//! points at it, so a later definition can propagate.

use hashbrown::HashMap;

use crate::symbol::Symbol;
use crate::types::ast::NodeId;
use crate::types::{Idx, IdxVec, mk_id};

mk_id! {
  /// An index into the [`TyStore`]'s type table.
  TyId,
  /// An index into the [`TyStore`]'s unresolved-type table.
  UnresolvedId,
  /// A template type parameter, numbered within its template.
  TyVarId,
}

/// The primitive types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimTy {
  /// The boolean type.
  Bool,
  /// 8-bit signed integers.
  I8,
  /// 16-bit signed integers.
  I16,
  /// 32-bit signed integers.
  I32,
  /// 64-bit signed integers.
  I64,
  /// 8-bit unsigned integers.
  U8,
  /// 16-bit unsigned integers.
  U16,
  /// 32-bit unsigned integers.
  U32,
  /// 64-bit unsigned integers.
  U64,
  /// The default signed integer type (32-bit).
  Int,
  /// The default unsigned integer type (32-bit).
  Uint,
  /// 32-bit floats.
  F32,
  /// 64-bit floats.
  F64,
  /// The unit result type.
  Void,
}

impl PrimTy {
  /// The spelling of the type name.
  #[must_use] pub fn name(self) -> &'static str {
    match self {
      PrimTy::Bool => "bool",
      PrimTy::I8 => "i8",
      PrimTy::I16 => "i16",
      PrimTy::I32 => "i32",
      PrimTy::I64 => "i64",
      PrimTy::U8 => "u8",
      PrimTy::U16 => "u16",
      PrimTy::U32 => "u32",
      PrimTy::U64 => "u64",
      PrimTy::Int => "int",
      PrimTy::Uint => "uint",
      PrimTy::F32 => "f32",
      PrimTy::F64 => "f64",
      PrimTy::Void => "void",
    }
  }

  /// The bit width of a numeric primitive, 0 otherwise.
  #[must_use] pub fn bits(self) -> u32 {
    match self {
      PrimTy::I8 | PrimTy::U8 => 8,
      PrimTy::I16 | PrimTy::U16 => 16,
      PrimTy::I32 | PrimTy::U32 | PrimTy::Int | PrimTy::Uint | PrimTy::F32 => 32,
      PrimTy::I64 | PrimTy::U64 | PrimTy::F64 => 64,
      PrimTy::Bool | PrimTy::Void => 0,
    }
  }

  /// Is this a signed integer type?
  #[must_use] pub fn is_signed_int(self) -> bool {
    matches!(self, PrimTy::I8 | PrimTy::I16 | PrimTy::I32 | PrimTy::I64 | PrimTy::Int)
  }

  /// Is this an unsigned integer type?
  #[must_use] pub fn is_unsigned_int(self) -> bool {
    matches!(self, PrimTy::U8 | PrimTy::U16 | PrimTy::U32 | PrimTy::U64 | PrimTy::Uint)
  }

  /// Is this a float type?
  #[must_use] pub fn is_float(self) -> bool { matches!(self, PrimTy::F32 | PrimTy::F64) }

  /// Is this any numeric type?
  #[must_use] pub fn is_num(self) -> bool {
    !matches!(self, PrimTy::Bool | PrimTy::Void)
  }
}

/// A named field of a struct type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructField {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: TyId,
}

/// A type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
  /// A primitive type.
  Prim(PrimTy),
  /// A byte string, optionally of statically known length.
  Str(Option<u32>),
  /// The abstract family of numeric values, before a literal commits to a
  /// concrete representation.
  Num,
  /// The abstract family of integer values.
  IntLit,
  /// A function type.
  Fun {
    /// The parameter types; a trailing rest parameter keeps its [`TyKind::Rest`] wrapper.
    params: Box<[TyId]>,
    /// The result type.
    result: TyId,
  },
  /// A homogeneous list. A list of lists is the 2-dimensional list.
  List(TyId),
  /// A tuple of two or more elements (1-tuples collapse to the element,
  /// the empty tuple is its own type).
  Tuple(Box<[TyId]>),
  /// A user-declared struct type.
  Struct {
    /// The declared name.
    name: Symbol,
    /// The fields, in declaration order.
    fields: Box<[StructField]>,
  },
  /// The marker for a variadic final parameter `...T`.
  Rest(TyId),
  /// An untagged union of member types.
  Union(Box<[TyId]>),
  /// An optional value of the inner type.
  Optional(TyId),
  /// A named alias, transparent for equality but preserved in diagnostics.
  Alias {
    /// The alias name.
    name: Symbol,
    /// The aliased type.
    aliased: TyId,
  },
  /// A template type parameter.
  Var(TyVarId),
  /// A parameterized user type awaiting arguments.
  Template {
    /// The template parameter names, binding `Var(0)..Var(n)` in `base`.
    vars: Box<[Symbol]>,
    /// The underlying type, usually a struct mentioning the variables.
    base: TyId,
  },
  /// A forward reference whose definition has not been seen yet.
  Unresolved(UnresolvedId),
}

/// The record for one unresolved type: the name it is waiting on and the AST
/// nodes whose type points at it.
#[derive(Debug, Default)]
pub struct Unresolved {
  /// The name whose definition will resolve this type.
  pub name: Symbol,
  /// Nodes to re-type once the definition arrives. Stable under appends.
  pub refs: Vec<NodeId>,
  /// The resolution, once known.
  pub actual: Option<TyId>,
}

/// The type store: owns all types and canonicalizes structural ones.
#[derive(Debug)]
pub struct TyStore {
  tys: IdxVec<TyId, TyKind>,
  intern: HashMap<TyKind, TyId>,
  instances: HashMap<(TyId, Box<[TyId]>), TyId>,
  unresolved: IdxVec<UnresolvedId, Unresolved>,
}

macro_rules! prim_consts {
  ($($name:ident = $n:literal => $prim:ident;)*) => {
    $(
      #[doc = concat!("The id of the predeclared `", stringify!($prim), "` type.")]
      pub const $name: TyId = TyId($n);
    )*
    fn install_prims(&mut self) {
      $(
        let id = self.tys.push(TyKind::Prim(PrimTy::$prim));
        self.intern.insert(TyKind::Prim(PrimTy::$prim), id);
        debug_assert_eq!(id, Self::$name);
      )*
    }
  }
}

impl TyStore {
  prim_consts! {
    BOOL = 0 => Bool;
    I8 = 1 => I8;
    I16 = 2 => I16;
    I32 = 3 => I32;
    I64 = 4 => I64;
    U8 = 5 => U8;
    U16 = 6 => U16;
    U32 = 7 => U32;
    U64 = 8 => U64;
    INT = 9 => Int;
    UINT = 10 => Uint;
    F32 = 11 => F32;
    F64 = 12 => F64;
    VOID = 13 => Void;
  }

  /// The id of the unsized string type.
  pub const STR: TyId = TyId(14);
  /// The id of the abstract numeric family.
  pub const NUM: TyId = TyId(15);
  /// The id of the abstract integer family.
  pub const INT_LIT: TyId = TyId(16);

  /// Construct a store with the predeclared types installed.
  #[must_use] pub fn new() -> Self {
    let mut s = Self {
      tys: IdxVec::new(),
      intern: HashMap::new(),
      instances: HashMap::new(),
      unresolved: IdxVec::new(),
    };
    s.install_prims();
    let id = s.mk(TyKind::Str(None));
    debug_assert_eq!(id, Self::STR);
    let id = s.mk(TyKind::Num);
    debug_assert_eq!(id, Self::NUM);
    let id = s.mk(TyKind::IntLit);
    debug_assert_eq!(id, Self::INT_LIT);
    s
  }

  /// Look up the kind of a type.
  #[must_use] pub fn kind(&self, t: TyId) -> &TyKind { &self.tys[t] }

  // The canonicalizing constructor for structural kinds.
  fn mk(&mut self, kind: TyKind) -> TyId {
    if let Some(&id) = self.intern.get(&kind) { return id }
    let id = self.tys.push(kind.clone());
    self.intern.insert(kind, id);
    id
  }

  /// The canonical tuple type for `elems`. One-element tuples collapse to
  /// the element; the empty tuple is a type of its own.
  pub fn tuple_of(&mut self, elems: &[TyId]) -> TyId {
    if let [single] = *elems { return single }
    self.mk(TyKind::Tuple(elems.into()))
  }

  /// The canonical string type of the given length (`None` = unknown).
  pub fn str_of(&mut self, len: Option<u32>) -> TyId {
    self.mk(TyKind::Str(len))
  }

  /// The canonical list type with the given element.
  pub fn list_of(&mut self, elem: TyId) -> TyId {
    self.mk(TyKind::List(elem))
  }

  /// The canonical rest (variadic tail) type.
  pub fn rest_of(&mut self, elem: TyId) -> TyId {
    self.mk(TyKind::Rest(elem))
  }

  /// The canonical optional type.
  pub fn optional_of(&mut self, inner: TyId) -> TyId {
    self.mk(TyKind::Optional(inner))
  }

  /// The canonical function type.
  pub fn fun_of(&mut self, params: &[TyId], result: TyId) -> TyId {
    self.mk(TyKind::Fun { params: params.into(), result })
  }

  /// The canonical union of `members`: flattens nested unions, removes
  /// duplicates, and collapses singleton unions.
  pub fn union_of(&mut self, members: &[TyId]) -> TyId {
    let mut out: Vec<TyId> = vec![];
    for &m in members {
      match self.kind(m) {
        TyKind::Union(inner) => {
          for t in inner.clone() {
            if !out.contains(&t) { out.push(t) }
          }
        }
        _ => if !out.contains(&m) { out.push(m) },
      }
    }
    if let [single] = *out { return single }
    self.mk(TyKind::Union(out.into()))
  }

  /// A named alias of `aliased`. Aliases are canonical per (name, target).
  pub fn alias_of(&mut self, name: Symbol, aliased: TyId) -> TyId {
    self.mk(TyKind::Alias { name, aliased })
  }

  /// A template variable.
  pub fn var(&mut self, v: TyVarId) -> TyId {
    self.mk(TyKind::Var(v))
  }

  /// A fresh struct type. Struct types are nominal: two declarations with
  /// identical fields are distinct.
  pub fn struct_decl(&mut self, name: Symbol, fields: Box<[StructField]>) -> TyId {
    self.tys.push(TyKind::Struct { name, fields })
  }

  /// A template over `base` binding `vars`.
  pub fn template(&mut self, vars: Box<[Symbol]>, base: TyId) -> TyId {
    self.tys.push(TyKind::Template { vars, base })
  }

  /// A fresh unresolved type waiting on `name`.
  pub fn fresh_unresolved(&mut self, name: Symbol) -> TyId {
    let u = self.unresolved.push(Unresolved { name, refs: vec![], actual: None });
    self.tys.push(TyKind::Unresolved(u))
  }

  /// Record that `node`'s type points at the unresolved type `t`.
  /// No-op if `t` is not unresolved.
  pub fn add_unresolved_ref(&mut self, t: TyId, node: NodeId) {
    if let TyKind::Unresolved(u) = *self.kind(t) {
      let refs = &mut self.unresolved[u].refs;
      if !refs.contains(&node) { refs.push(node) }
    }
  }

  /// The unresolved record behind `t`, if it is an unresolved type.
  #[must_use] pub fn unresolved_of(&self, t: TyId) -> Option<&Unresolved> {
    match *self.kind(t) {
      TyKind::Unresolved(u) => Some(&self.unresolved[u]),
      _ => None,
    }
  }

  /// Mark the unresolved type `t` as resolved to `actual`, returning the
  /// recorded back-references for the caller to re-type.
  pub fn resolve_unresolved(&mut self, t: TyId, actual: TyId) -> Vec<NodeId> {
    match *self.kind(t) {
      TyKind::Unresolved(u) => {
        self.unresolved[u].actual = Some(actual);
        std::mem::take(&mut self.unresolved[u].refs)
      }
      _ => vec![],
    }
  }

  /// Chase alias and resolved-unresolved indirections.
  #[must_use] pub fn unalias(&self, t: TyId) -> TyId {
    match *self.kind(t) {
      TyKind::Alias { aliased, .. } => self.unalias(aliased),
      TyKind::Unresolved(u) => match self.unresolved[u].actual {
        Some(actual) => self.unalias(actual),
        None => t,
      },
      _ => t,
    }
  }

  /// Type equality, transparent to aliases and resolved forward references.
  #[must_use] pub fn same(&self, a: TyId, b: TyId) -> bool {
    self.unalias(a) == self.unalias(b)
  }

  /// Instantiate a template with the given arguments, hash-consing the
  /// result. Returns `None` if `t` is not a template or the arity is wrong.
  pub fn instantiate(&mut self, t: TyId, args: &[TyId]) -> Option<TyId> {
    let TyKind::Template { vars, base } = self.kind(t).clone() else { return None };
    if vars.len() != args.len() { return None }
    let key = (t, args.into());
    if let Some(&id) = self.instances.get(&key) { return Some(id) }
    let id = self.subst(base, args);
    self.instances.insert(key, id);
    Some(id)
  }

  // Substitute template variables by index throughout a type.
  fn subst(&mut self, t: TyId, args: &[TyId]) -> TyId {
    match self.kind(t).clone() {
      TyKind::Var(v) => args.get(v.into_usize()).copied().unwrap_or(t),
      TyKind::List(e) => {
        let e = self.subst(e, args);
        self.list_of(e)
      }
      TyKind::Rest(e) => {
        let e = self.subst(e, args);
        self.rest_of(e)
      }
      TyKind::Optional(e) => {
        let e = self.subst(e, args);
        self.optional_of(e)
      }
      TyKind::Tuple(elems) => {
        let elems: Vec<_> = elems.iter().map(|&e| self.subst(e, args)).collect();
        self.tuple_of(&elems)
      }
      TyKind::Union(ms) => {
        let ms: Vec<_> = ms.iter().map(|&m| self.subst(m, args)).collect();
        self.union_of(&ms)
      }
      TyKind::Fun { params, result } => {
        let params: Vec<_> = params.iter().map(|&p| self.subst(p, args)).collect();
        let result = self.subst(result, args);
        self.fun_of(&params, result)
      }
      TyKind::Struct { name, fields } => {
        let fields: Box<[StructField]> = fields.iter()
          .map(|f| StructField { name: f.name, ty: self.subst(f.ty, args) })
          .collect();
        self.struct_decl(name, fields)
      }
      TyKind::Alias { name, aliased } => {
        let aliased = self.subst(aliased, args);
        self.alias_of(name, aliased)
      }
      _ => t,
    }
  }

  /// Is `t` a numeric type (including the abstract families)?
  #[must_use] pub fn is_num(&self, t: TyId) -> bool {
    match *self.kind(self.unalias(t)) {
      TyKind::Prim(p) => p.is_num(),
      TyKind::Num | TyKind::IntLit => true,
      _ => false,
    }
  }

  // Rank for arithmetic widening: higher rank absorbs lower.
  fn num_rank(&self, t: TyId) -> Option<u32> {
    let p = match *self.kind(self.unalias(t)) {
      TyKind::Prim(p) if p.is_num() => p,
      TyKind::IntLit => return Some(30), // behaves as `int` until committed
      TyKind::Num => return Some(0),
      _ => return None,
    };
    Some(match p {
      PrimTy::I8 => 10,
      PrimTy::U8 => 11,
      PrimTy::I16 => 20,
      PrimTy::U16 => 21,
      PrimTy::I32 | PrimTy::Int => 30,
      PrimTy::U32 | PrimTy::Uint => 31,
      PrimTy::I64 => 40,
      PrimTy::U64 => 41,
      PrimTy::F32 => 50,
      PrimTy::F64 => 60,
      PrimTy::Bool | PrimTy::Void => unreachable!(),
    })
  }

  /// The arithmetically widest of two numeric types, for list element
  /// unification. Returns `None` when either side is not numeric.
  #[must_use] pub fn widest(&self, a: TyId, b: TyId) -> Option<TyId> {
    let (ra, rb) = (self.num_rank(a)?, self.num_rank(b)?);
    Some(if ra >= rb { self.unalias(a) } else { self.unalias(b) })
  }

  /// Does every value of `src` fit in `dst` without loss? Signedness is
  /// preserved: signed widens to wider signed, unsigned to wider unsigned
  /// or strictly wider signed, and integers and `f32` widen into floats.
  #[must_use] pub fn widens_to(&self, src: TyId, dst: TyId) -> bool {
    let s = match *self.kind(self.unalias(src)) {
      TyKind::Prim(p) if p.is_num() => p,
      TyKind::IntLit => PrimTy::Int,
      TyKind::Num => return self.is_num(dst),
      _ => return false,
    };
    let d = match *self.kind(self.unalias(dst)) {
      TyKind::Prim(p) if p.is_num() => p,
      _ => return false,
    };
    if s == d { return true }
    if d.is_float() {
      return !s.is_float() || d.bits() >= s.bits()
    }
    if s.is_float() { return false }
    match (s.is_signed_int(), d.is_signed_int()) {
      (true, true) | (false, false) => d.bits() >= s.bits(),
      (false, true) => d.bits() > s.bits(),
      (true, false) => false,
    }
  }

  /// Render a type for diagnostics.
  #[must_use] pub fn show(&self, t: TyId) -> String {
    use std::fmt::Write;
    match self.kind(t) {
      TyKind::Prim(p) => p.name().into(),
      TyKind::Str(None) => "str".into(),
      TyKind::Str(Some(n)) => format!("str<{n}>"),
      TyKind::Num => "num".into(),
      TyKind::IntLit => "int".into(),
      TyKind::Fun { params, result } => {
        let mut s = "fun(".to_owned();
        for (i, &p) in params.iter().enumerate() {
          if i > 0 { s.push_str(", ") }
          s.push_str(&self.show(p));
        }
        s.push(')');
        if *result != Self::VOID {
          let _ = write!(s, "->{}", self.show(*result));
        }
        s
      }
      TyKind::List(e) => format!("[{}]", self.show(*e)),
      TyKind::Tuple(elems) => {
        let mut s = "(".to_owned();
        for (i, &e) in elems.iter().enumerate() {
          if i > 0 { s.push_str(", ") }
          s.push_str(&self.show(e));
        }
        s.push(')');
        s
      }
      TyKind::Struct { name, fields } => {
        if *name != Symbol::UNDER { return name.as_str() }
        let mut s = "{".to_owned();
        for (i, f) in fields.iter().enumerate() {
          if i > 0 { s.push_str("; ") }
          let _ = write!(s, "{} {}", f.name, self.show(f.ty));
        }
        s.push('}');
        s
      }
      TyKind::Rest(e) => format!("...{}", self.show(*e)),
      TyKind::Union(ms) => {
        let mut s = String::new();
        for (i, &m) in ms.iter().enumerate() {
          if i > 0 { s.push('|') }
          s.push_str(&self.show(m));
        }
        s
      }
      TyKind::Optional(e) => format!("?{}", self.show(*e)),
      TyKind::Alias { name, .. } => name.as_str(),
      TyKind::Var(v) => format!("#{v}"),
      TyKind::Template { vars, base } => format!("template<{}> {}", vars.len(), self.show(*base)),
      TyKind::Unresolved(u) => format!("~{}", self.unresolved[*u].name),
    }
  }
}

impl Default for TyStore {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  #[test]
  fn tuple_collapse() {
    let mut ts = TyStore::new();
    assert_eq!(ts.tuple_of(&[TyStore::INT]), TyStore::INT);
    let t2 = ts.tuple_of(&[TyStore::INT, TyStore::BOOL]);
    let t2b = ts.tuple_of(&[TyStore::INT, TyStore::BOOL]);
    assert_eq!(t2, t2b);
    assert_ne!(t2, ts.tuple_of(&[]));
  }

  #[test]
  fn str_canonicalization() {
    let mut ts = TyStore::new();
    assert_eq!(ts.str_of(Some(5)), ts.str_of(Some(5)));
    assert_ne!(ts.str_of(Some(5)), ts.str_of(Some(6)));
    assert_eq!(ts.str_of(None), TyStore::STR);
  }

  #[test]
  fn alias_transparency() {
    let mut ts = TyStore::new();
    let a = ts.alias_of(intern("MyInt"), TyStore::INT);
    assert_ne!(a, TyStore::INT);
    assert!(ts.same(a, TyStore::INT));
    assert_eq!(ts.show(a), "MyInt");
  }

  #[test]
  fn nested_list_is_2d() {
    let mut ts = TyStore::new();
    let l = ts.list_of(TyStore::INT);
    let ll = ts.list_of(l);
    assert_eq!(ts.show(ll), "[[int]]");
  }

  #[test]
  fn widening() {
    let ts = TyStore::new();
    assert_eq!(ts.widest(TyStore::INT, TyStore::F64), Some(TyStore::F64));
    assert_eq!(ts.widest(TyStore::I8, TyStore::I64), Some(TyStore::I64));
    assert_eq!(ts.widest(TyStore::INT, TyStore::BOOL), None);
  }

  #[test]
  fn template_instantiation_hash_consed() {
    let mut ts = TyStore::new();
    let v0 = ts.var(TyVarId(0));
    let v1 = ts.var(TyVarId(1));
    let base = ts.struct_decl(intern("Pair"), Box::new([
      StructField { name: intern("a"), ty: v0 },
      StructField { name: intern("b"), ty: v1 },
    ]));
    let tmpl = ts.template(Box::new([intern("A"), intern("B")]), base);
    let i1 = ts.instantiate(tmpl, &[TyStore::INT, TyStore::F32]).unwrap();
    let i2 = ts.instantiate(tmpl, &[TyStore::INT, TyStore::F32]).unwrap();
    assert_eq!(i1, i2);
    let TyKind::Struct { fields, .. } = ts.kind(i1) else { panic!("expected struct") };
    assert_eq!(fields[0].ty, TyStore::INT);
    assert_eq!(fields[1].ty, TyStore::F32);
    assert!(ts.instantiate(tmpl, &[TyStore::INT]).is_none());
  }

  #[test]
  fn unresolved_backrefs() {
    let mut ts = TyStore::new();
    let u = ts.fresh_unresolved(intern("late"));
    ts.add_unresolved_ref(u, NodeId(7));
    ts.add_unresolved_ref(u, NodeId(7));
    ts.add_unresolved_ref(u, NodeId(9));
    let refs = ts.resolve_unresolved(u, TyStore::STR);
    assert_eq!(refs, vec![NodeId(7), NodeId(9)]);
    assert!(ts.same(u, TyStore::STR));
  }
}

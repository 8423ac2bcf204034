//! The type resolver: lazily assigns every expression a type, memoized on
//! the node.
//!
//! Resolution is idempotent: once a node's type contains no unresolved
//! component, further calls return the identical [`TyId`]. Types that still
//! contain a forward reference are recomputed on demand, and the unresolved
//! record's back-references let the binder re-type dependents eagerly once
//! the definition arrives.

use if_chain::if_chain;

use crate::diag::Reporter;
use crate::pos::FileSet;
use crate::symbol::Symbol;
use crate::token::Tok;
use crate::types::ast::{Ast, NodeId, NodeKind};
use crate::types::entity::Defs;
use crate::types::ty::{PrimTy, StructField, TyId, TyKind, TyStore};

/// The resolver context: borrowed views of the compilation state.
pub struct Resolver<'a> {
  /// The node arena.
  pub ast: &'a mut Ast,
  /// The type store.
  pub ts: &'a mut TyStore,
  /// The scope/binding arenas.
  pub defs: &'a mut Defs,
  /// The file set, for diagnostics.
  pub fs: &'a FileSet,
  /// The diagnostic sink.
  pub rep: &'a mut Reporter,
}

// A literal value, for conversion checks. Signed-magnitude integers cover
// the `-9223372036854775808..=u64::MAX` range the scanner can produce.
#[derive(Clone, Copy, Debug)]
enum LitVal {
  Int(i128),
  Float(f64),
}

impl std::fmt::Display for LitVal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LitVal::Int(v) => v.fmt(f),
      LitVal::Float(v) => v.fmt(f),
    }
  }
}

impl Resolver<'_> {
  fn error(&mut self, n: NodeId, msg: impl Into<String>) {
    let pos = self.ast.node(n).pos;
    self.rep.error(self.fs, pos, msg);
  }

  /// The type of `n`, computed on first call and memoized. Types that still
  /// contain an unresolved component are recomputed until they settle.
  pub fn resolve(&mut self, n: NodeId) -> TyId {
    if let Some(t) = self.ast.node(n).ty {
      if !self.contains_unresolved(t) { return t }
    }
    let t = self.compute(n);
    self.ast.node_mut(n).ty = Some(t);
    if self.contains_unresolved(t) {
      // remember who to re-type when the definition arrives
      for u in self.unresolved_parts(t) {
        self.ts.add_unresolved_ref(u, n);
      }
    }
    t
  }

  /// A fresh unresolved type waiting on `name`, with `n` registered for
  /// later re-typing.
  pub fn mark_unresolved(&mut self, n: NodeId, name: Symbol) -> TyId {
    let t = self.ts.fresh_unresolved(name);
    self.ts.add_unresolved_ref(t, n);
    self.ast.node_mut(n).ty = Some(t);
    t
  }

  // An `Unresolved` component keeps a type non-canonical even after its
  // definition arrives; recomputation rebuilds the type out of settled parts.
  fn contains_unresolved(&self, t: TyId) -> bool {
    match self.ts.kind(t) {
      TyKind::Unresolved(_) => true,
      TyKind::List(e) | TyKind::Rest(e) | TyKind::Optional(e) => self.contains_unresolved(*e),
      TyKind::Alias { aliased, .. } => self.contains_unresolved(*aliased),
      TyKind::Tuple(elems) => elems.clone().iter().any(|&e| self.contains_unresolved(e)),
      TyKind::Union(ms) => ms.clone().iter().any(|&m| self.contains_unresolved(m)),
      TyKind::Fun { params, result } =>
        self.contains_unresolved(*result)
          || params.clone().iter().any(|&p| self.contains_unresolved(p)),
      TyKind::Struct { fields, .. } =>
        fields.clone().iter().any(|f| self.contains_unresolved(f.ty)),
      _ => false,
    }
  }

  // A node already typed with an anonymous unresolved type has reported
  // its error; recomputation must not repeat it.
  fn poisoned(&self, n: NodeId) -> Option<TyId> {
    let t = self.ast.node(n).ty?;
    let u = self.ts.unresolved_of(t)?;
    (u.name == Symbol::UNDER && u.actual.is_none()).then_some(t)
  }

  fn unresolved_parts(&self, t: TyId) -> Vec<TyId> {
    let mut out = vec![];
    self.collect_unresolved(t, &mut out);
    out
  }

  fn collect_unresolved(&self, t: TyId, out: &mut Vec<TyId>) {
    match self.ts.kind(t) {
      TyKind::Unresolved(_) => {
        if self.ts.unresolved_of(t).is_some_and(|u| u.actual.is_none()) && !out.contains(&t) {
          out.push(t)
        }
      }
      TyKind::List(e) | TyKind::Rest(e) | TyKind::Optional(e) => self.collect_unresolved(*e, out),
      TyKind::Alias { aliased, .. } => self.collect_unresolved(*aliased, out),
      TyKind::Tuple(elems) => for &e in &elems.clone() { self.collect_unresolved(e, out) },
      TyKind::Union(ms) => for &m in &ms.clone() { self.collect_unresolved(m, out) },
      TyKind::Fun { params, result } => {
        for &p in &params.clone() { self.collect_unresolved(p, out) }
        self.collect_unresolved(*result, out);
      }
      TyKind::Struct { fields, .. } =>
        for f in &fields.clone() { self.collect_unresolved(f.ty, out) },
      _ => {}
    }
  }

  #[allow(clippy::too_many_lines)]
  fn compute(&mut self, n: NodeId) -> TyId {
    match self.ast.node(n).kind.clone() {
      NodeKind::Ident { name, ent } => match ent {
        Some(e) => {
          if let Some(t) = self.defs.ent(e).ty {
            if !self.contains_unresolved(t) { return t }
          }
          match self.defs.ent(e).value {
            Some(v) => {
              let t = self.resolve(v);
              self.defs.ent_mut(e).ty = Some(t);
              t
            }
            None => self.defs.ent(e).ty
              .unwrap_or_else(|| self.ts.fresh_unresolved(name)),
          }
        }
        None => match self.ast.node(n).ty {
          // already marked unresolved during parse
          Some(t) => t,
          None => self.ts.fresh_unresolved(name),
        },
      },
      NodeKind::IntLit { val } => Self::int_lit_type(val),
      NodeKind::FloatLit { .. } => TyStore::F64,
      NodeKind::CharLit { .. } => TyStore::INT,
      NodeKind::StrLit { val } =>
        self.ts.str_of(Some(val.len().try_into().expect("string too long"))),
      NodeKind::ListLit { elems } => {
        if elems.is_empty() {
          if let Some(t) = self.poisoned(n) { return t }
          self.error(n, "cannot infer the element type of an empty list");
          return self.ts.fresh_unresolved(Symbol::UNDER)
        }
        let elem = self.unify_list_elems(n, &elems);
        self.ts.list_of(elem)
      }
      NodeKind::TupleExpr { elems } => {
        let tys: Vec<TyId> = elems.iter().map(|&e| self.resolve(e)).collect();
        self.ts.tuple_of(&tys)
      }
      NodeKind::Block { stmts } => {
        let mut t = TyStore::VOID;
        for &s in &stmts {
          t = self.resolve(s);
        }
        t
      }
      NodeKind::Call { fun, targs, args } => self.compute_call(n, fun, &targs, &args),
      NodeKind::Sel { operand, name } => {
        let resolved_operand = self.resolve(operand);
    let ot = self.ts.unalias(resolved_operand);
        match self.ts.kind(ot).clone() {
          TyKind::Struct { fields, .. } => {
            match fields.iter().find(|f| f.name == name) {
              Some(f) => f.ty,
              None => {
                self.error(n, format!("no field {} in {}", name, self.ts.show(ot)));
                self.ts.fresh_unresolved(name)
              }
            }
          }
          TyKind::Unresolved(_) => ot,
          _ => {
            self.error(n, format!("no field {} in {}", name, self.ts.show(ot)));
            self.ts.fresh_unresolved(name)
          }
        }
      }
      NodeKind::Index { operand, index, .. } => {
        let resolved_operand = self.resolve(operand);
    let ot = self.ts.unalias(resolved_operand);
        match self.ts.kind(ot).clone() {
          TyKind::Tuple(_) => {
            if let Some(t) = self.poisoned(n) { return t }
            if self.maybe_resolve_tuple_access(n) {
              self.ast.node(n).ty.expect("tuple access sets the type")
            } else {
              self.ts.fresh_unresolved(Symbol::UNDER)
            }
          }
          TyKind::List(e) => {
            self.resolve(index);
            e
          }
          TyKind::Str(_) => {
            self.resolve(index);
            TyStore::U8
          }
          TyKind::Unresolved(_) => ot,
          _ => {
            self.error(n, format!("cannot index {}", self.ts.show(ot)));
            self.ts.fresh_unresolved(Symbol::UNDER)
          }
        }
      }
      NodeKind::Slice { operand, .. } => {
        let resolved_operand = self.resolve(operand);
    let ot = self.ts.unalias(resolved_operand);
        match self.ts.kind(ot).clone() {
          TyKind::Tuple(_) => {
            if let Some(t) = self.poisoned(n) { return t }
            if self.tuple_slice(n) {
              self.ast.node(n).ty.expect("tuple slice sets the type")
            } else {
              self.ts.fresh_unresolved(Symbol::UNDER)
            }
          }
          TyKind::List(_) => ot,
          TyKind::Str(_) => TyStore::STR,
          TyKind::Unresolved(_) => ot,
          _ => {
            self.error(n, format!("cannot slice {}", self.ts.show(ot)));
            self.ts.fresh_unresolved(Symbol::UNDER)
          }
        }
      }
      NodeKind::Convert { .. } => self.ast.node(n).ty.expect("conversions are pre-typed"),
      NodeKind::Unop { op, operand } => match op {
        Tok::Not => TyStore::BOOL,
        Tok::Inc | Tok::Dec => TyStore::VOID,
        _ => self.resolve(operand),
      },
      NodeKind::Binop { op, lhs, rhs } => {
        let lt = self.resolve(lhs);
        let rt = self.resolve(rhs);
        match op {
          Tok::EqEq | Tok::NotEq | Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge
          | Tok::AndAnd | Tok::OrOr => TyStore::BOOL,
          _ => self.ts.widest(lt, rt).unwrap_or(lt),
        }
      }
      NodeKind::FunExpr { params, result, .. } => self.compute_fun_type(&params, result),
      NodeKind::If { then, els, .. } => match els {
        None => TyStore::VOID,
        Some(els) => {
          let tt = self.resolve(then);
          let et = self.resolve(els);
          if self.ts.same(tt, et) { tt } else { self.ts.union_of(&[tt, et]) }
        }
      },
      NodeKind::Field { ty, .. } => match ty {
        Some(t) => self.type_of_type_expr(t),
        None => self.ts.fresh_unresolved(Symbol::UNDER),
      },

      // type expressions denote their type
      NodeKind::ListType { .. } | NodeKind::TupleType { .. } | NodeKind::OptionalType { .. }
      | NodeKind::RestType { .. } | NodeKind::StructType { .. } | NodeKind::TypeInst { .. } =>
        self.type_of_type_expr(n),

      NodeKind::Bad => self.ts.fresh_unresolved(Symbol::UNDER),

      // statements and declarations
      NodeKind::Assign { .. } | NodeKind::VarDecl { .. } | NodeKind::TypeDecl { .. }
      | NodeKind::ImportDecl { .. } | NodeKind::Group { .. } | NodeKind::While { .. }
      | NodeKind::For { .. } | NodeKind::Return { .. } | NodeKind::Branch { .. } =>
        TyStore::VOID,
    }
  }

  // The widest element type of a list literal, with each element then
  // lossless-converted to it (conversion wrappers are patched back into
  // the literal).
  fn unify_list_elems(&mut self, list: NodeId, elems: &[NodeId]) -> TyId {
    let mut widest = self.resolve(elems[0]);
    for &e in &elems[1..] {
      let t = self.resolve(e);
      if let Some(w) = self.ts.widest(widest, t) { widest = w }
    }
    let widest = self.normalize_lit_ty(widest);
    for (i, &e) in elems.iter().enumerate() {
      match self.convert_lossless(widest, e) {
        Some(conv) if conv != e => {
          if let NodeKind::ListLit { elems } = &mut self.ast.node_mut(list).kind {
            elems[i] = conv;
          }
        }
        Some(_) => {}
        None => {
          let t = self.resolve(e);
          self.error(e, format!(
            "cannot convert {} to {}", self.ts.show(t), self.ts.show(widest)));
        }
      }
    }
    widest
  }

  // Abstract literal families decay to their default concrete type.
  fn normalize_lit_ty(&self, t: TyId) -> TyId {
    match self.ts.kind(t) {
      TyKind::IntLit | TyKind::Num => TyStore::INT,
      _ => t,
    }
  }

  fn compute_call(&mut self, n: NodeId, fun: NodeId, targs: &[NodeId], args: &[NodeId])
      -> TyId {
    for &a in args { self.resolve(a); }
    let ft = self.resolve(fun);
    let ft_res = self.ts.unalias(ft);
    match self.ts.kind(ft_res).clone() {
      TyKind::Fun { result, .. } => result,
      TyKind::Template { .. } => {
        let targ_tys: Vec<TyId> = targs.iter().map(|&t| self.type_of_type_expr(t)).collect();
        match self.ts.instantiate(ft_res, &targ_tys) {
          Some(inst) => inst,
          None => {
            self.error(n, "wrong number of type arguments");
            self.ts.fresh_unresolved(Symbol::UNDER)
          }
        }
      }
      // calling a plain type constructs it
      TyKind::Struct { .. } => ft_res,
      TyKind::Unresolved(_) => ft_res,
      _ => {
        self.error(n, format!("cannot call {}", self.ts.show(ft)));
        self.ts.fresh_unresolved(Symbol::UNDER)
      }
    }
  }

  /// The [`TyKind::Fun`] type of a function node: parameter types (a
  /// trailing rest keeps its marker) and the signature result. This is
  /// permitted to complete while the result is still unresolved.
  pub fn compute_fun_type(&mut self, params: &[NodeId], result: Option<NodeId>) -> TyId {
    let ptys: Vec<TyId> = params.iter().map(|&p| self.resolve(p)).collect();
    let rty = match result {
      Some(r) => self.type_of_type_expr(r),
      None => TyStore::VOID,
    };
    self.ts.fun_of(&ptys, rty)
  }

  /// The type denoted by a type expression.
  pub fn type_of_type_expr(&mut self, n: NodeId) -> TyId {
    if let Some(t) = self.ast.node(n).ty {
      if !self.contains_unresolved(t) { return t }
    }
    let t = match self.ast.node(n).kind.clone() {
      NodeKind::Ident { name, ent } => match ent {
        Some(e) => match self.defs.ent(e).ty {
          Some(t) => t,
          None => self.ts.fresh_unresolved(name),
        },
        None => match self.ast.node(n).ty {
          Some(t) => t,
          None => self.ts.fresh_unresolved(name),
        },
      },
      NodeKind::ListType { elem } => {
        let e = self.type_of_type_expr(elem);
        self.ts.list_of(e)
      }
      NodeKind::TupleType { elems } => {
        let tys: Vec<TyId> = elems.iter().map(|&e| self.type_of_type_expr(e)).collect();
        self.ts.tuple_of(&tys)
      }
      NodeKind::OptionalType { inner } => {
        let i = self.type_of_type_expr(inner);
        self.ts.optional_of(i)
      }
      NodeKind::RestType { elem } => {
        let e = self.type_of_type_expr(elem);
        self.ts.rest_of(e)
      }
      NodeKind::StructType { decls } => {
        let mut fields = vec![];
        for &d in &decls {
          if_chain! {
            if let NodeKind::VarDecl { names, ty: Some(fty), .. } = self.ast.node(d).kind.clone();
            then {
              let t = self.type_of_type_expr(fty);
              for &name in &names {
                if let Some(sym) = self.ast.ident_name(name) {
                  fields.push(StructField { name: sym, ty: t });
                }
              }
            }
          }
        }
        self.ts.struct_decl(Symbol::UNDER, fields.into())
      }
      NodeKind::TypeInst { base, args } => {
        let bt = self.type_of_type_expr(base);
        let bt = self.ts.unalias(bt);
        if let TyKind::Template { .. } = self.ts.kind(bt) {
          let atys: Vec<TyId> = args.iter().map(|&a| self.type_of_type_expr(a)).collect();
          match self.ts.instantiate(bt, &atys) {
            Some(t) => t,
            None => {
              self.error(n, "wrong number of type arguments");
              self.ts.fresh_unresolved(Symbol::UNDER)
            }
          }
        } else if let TyKind::Unresolved(_) = self.ts.kind(bt) {
          bt
        } else {
          self.error(n, format!("{} is not a template", self.ts.show(bt)));
          bt
        }
      }
      NodeKind::Bad => self.ts.fresh_unresolved(Symbol::UNDER),
      _ => {
        self.error(n, "expected a type");
        self.ts.fresh_unresolved(Symbol::UNDER)
      }
    };
    self.ast.node_mut(n).ty = Some(t);
    if self.contains_unresolved(t) {
      for u in self.unresolved_parts(t) {
        self.ts.add_unresolved_ref(u, n);
      }
    }
    t
  }

  /// The default type of an integer literal: signed if it fits, unsigned
  /// otherwise; 32-bit `int`/`uint` preferred for small values.
  fn int_lit_type(val: u64) -> TyId {
    if val <= 0x7fff_ffff {
      TyStore::INT
    } else if val <= 0xffff_ffff {
      TyStore::UINT
    } else if i64::try_from(val).is_ok() {
      TyStore::I64
    } else {
      TyStore::U64
    }
  }

  // The literal value of `n`, looking through one leading negation.
  fn literal_value(&self, n: NodeId) -> Option<LitVal> {
    match self.ast.node(n).kind {
      NodeKind::IntLit { val } => Some(LitVal::Int(i128::from(val))),
      NodeKind::CharLit { val } => Some(LitVal::Int(i128::from(val))),
      NodeKind::FloatLit { val } => Some(LitVal::Float(val)),
      NodeKind::Unop { op: Tok::Sub, operand } => match self.literal_value(operand)? {
        LitVal::Int(v) => Some(LitVal::Int(-v)),
        LitVal::Float(v) => Some(LitVal::Float(-v)),
      },
      _ => None,
    }
  }

  fn int_fits(v: i128, p: PrimTy) -> bool {
    match p {
      PrimTy::I8 => i8::try_from(v).is_ok(),
      PrimTy::I16 => i16::try_from(v).is_ok(),
      PrimTy::I32 | PrimTy::Int => i32::try_from(v).is_ok(),
      PrimTy::I64 => i64::try_from(v).is_ok(),
      PrimTy::U8 => u8::try_from(v).is_ok(),
      PrimTy::U16 => u16::try_from(v).is_ok(),
      PrimTy::U32 | PrimTy::Uint => u32::try_from(v).is_ok(),
      PrimTy::U64 => u64::try_from(v).is_ok(),
      #[allow(clippy::cast_precision_loss)]
      PrimTy::F32 => (v as f32) as i128 == v,
      #[allow(clippy::cast_precision_loss)]
      PrimTy::F64 => (v as f64) as i128 == v,
      PrimTy::Bool | PrimTy::Void => false,
    }
  }

  #[allow(clippy::cast_possible_truncation)]
  fn float_fits(v: f64, p: PrimTy) -> bool {
    match p {
      PrimTy::F64 => true,
      PrimTy::F32 => f64::from(v as f32) == v || v.is_nan(),
      _ if p.is_signed_int() || p.is_unsigned_int() =>
        v.fract() == 0.0 && Self::int_fits(v as i128, p),
      _ => false,
    }
  }

  /// Numeric literal conversion. Retypes the literal in place when it fits
  /// losslessly; otherwise reports an overflow/truncation diagnostic and
  /// returns false. Non-literals are not changed.
  pub fn conv_num(&mut self, dst: TyId, n: NodeId) -> bool {
    let dstr = self.ts.unalias(dst);
    match self.ts.kind(dstr).clone() {
      // booleans pass through unconverted
      TyKind::Prim(PrimTy::Bool) => true,
      TyKind::Rest(elem) => self.conv_num(elem, n),
      TyKind::Prim(p) if p.is_num() => {
        let Some(lit) = self.literal_value(n) else {
          let t = self.resolve(n);
          return self.ts.same(t, dstr)
        };
        let src = self.resolve(n);
        let (fits, same_family) = match lit {
          LitVal::Int(v) => (Self::int_fits(v, p), !p.is_float()),
          LitVal::Float(v) => (Self::float_fits(v, p), p.is_float()),
        };
        if fits {
          self.retype_literal(n, dst);
          true
        } else {
          if same_family {
            self.error(n, format!("constant {} overflows {}", lit, self.ts.show(dst)));
          } else {
            let srcs = self.ts.show(src);
            self.error(n, format!(
              "constant {} (type {}) truncated to {}", lit, srcs, self.ts.show(dst)));
          }
          false
        }
      }
      _ => {
        match self.literal_value(n) {
          Some(lit) => {
            self.error(n, format!("invalid value {} for type {}", lit, self.ts.show(dst)));
            false
          }
          None => {
            let t = self.resolve(n);
            self.ts.same(t, dstr)
          }
        }
      }
    }
  }

  // Retype a literal (or a negation of one) in place.
  fn retype_literal(&mut self, n: NodeId, dst: TyId) {
    self.ast.node_mut(n).ty = Some(dst);
    if let NodeKind::Unop { op: Tok::Sub, operand } = self.ast.node(n).kind {
      self.retype_literal(operand, dst);
    }
  }

  /// Convert `n` to `dst` if a value-preserving conversion exists: literal
  /// retyping, an identity conversion, or a numeric widening wrapper.
  /// Returns the converted node, or `None` on incompatibility.
  pub fn convert(&mut self, dst: TyId, n: NodeId) -> Option<NodeId> {
    // a list literal adopts a list target type element by element, which
    // also gives empty literals their only way to type
    if_chain! {
      if let NodeKind::ListLit { elems } = self.ast.node(n).kind.clone();
      if let TyKind::List(delem) = *self.ts.kind(self.ts.unalias(dst));
      then {
        let mut ok = true;
        for (i, &e) in elems.iter().enumerate() {
          match self.convert_lossless(delem, e) {
            Some(c) if c != e => {
              if let NodeKind::ListLit { elems } = &mut self.ast.node_mut(n).kind {
                elems[i] = c;
              }
            }
            Some(_) => {}
            None => ok = false,
          }
        }
        self.ast.node_mut(n).ty = Some(dst);
        return ok.then_some(n)
      }
    }
    let src = self.resolve(n);
    if self.ts.same(src, dst) { return Some(n) }
    // forward references convert optimistically; the binder re-types later
    if self.contains_unresolved(src) || self.contains_unresolved(dst) {
      return Some(n)
    }
    if self.literal_value(n).is_some() {
      return self.conv_num(dst, n).then_some(n)
    }
    let (srcr, dstr) = (self.ts.unalias(src), self.ts.unalias(dst));
    match (self.ts.kind(srcr).clone(), self.ts.kind(dstr).clone()) {
      // a sized string is usable wherever an unsized one is expected
      (TyKind::Str(_), TyKind::Str(None)) => Some(n),
      // values lift into their optional type
      (_, TyKind::Optional(inner)) if self.ts.same(src, inner) =>
        Some(self.wrap_convert(n, dst)),
      _ => {
        // non-literal numerics may widen, preserving value and signedness
        if self.ts.widens_to(src, dst) {
          Some(self.wrap_convert(n, dst))
        } else {
          None
        }
      }
    }
  }

  fn wrap_convert(&mut self, n: NodeId, dst: TyId) -> NodeId {
    let node = self.ast.node(n);
    let (pos, scope) = (node.pos, node.scope);
    let conv = self.ast.alloc(pos, scope, NodeKind::Convert { operand: n });
    self.ast.node_mut(conv).ty = Some(dst);
    conv
  }

  /// Like [`Resolver::convert`], but a numeric literal must fit bit-exactly
  /// in `dst`. (For literals the two coincide; the distinction matters for
  /// future lossy conversions.)
  pub fn convert_lossless(&mut self, dst: TyId, n: NodeId) -> Option<NodeId> {
    self.convert(dst, n)
  }

  /// Constant-fold an integer expression: literals, negation, binary
  /// arithmetic, and reads of immutable bindings whose declaration has a
  /// constant initializer. Division follows the arithmetic of the
  /// expression's declared type (unsigned types divide unsigned).
  pub fn const_fold_int(&mut self, n: NodeId) -> Option<i64> {
    match self.ast.node(n).kind.clone() {
      NodeKind::IntLit { val } => i64::try_from(val).ok(),
      NodeKind::CharLit { val } => Some(i64::from(val)),
      NodeKind::Ident { ent: Some(e), .. } => {
        let ent = self.defs.ent(e);
        if !ent.is_immutable() { return None }
        let value = ent.value?;
        self.const_fold_int(value)
      }
      NodeKind::Convert { operand } => self.const_fold_int(operand),
      NodeKind::Unop { op: Tok::Sub, operand } =>
        self.const_fold_int(operand)?.checked_neg(),
      NodeKind::Binop { op, lhs, rhs } => {
        let a = self.const_fold_int(lhs)?;
        let b = self.const_fold_int(rhs)?;
        let t = self.resolve(n);
        let unsigned = match self.ts.kind(self.ts.unalias(t)) {
          TyKind::Prim(p) => p.is_unsigned_int(),
          _ => false,
        };
        if unsigned {
          let (a, b) = (a as u64, b as u64);
          let r = match op {
            Tok::Add => a.checked_add(b),
            Tok::Sub => a.checked_sub(b),
            Tok::Mul => a.checked_mul(b),
            Tok::Div => a.checked_div(b),
            Tok::Rem => a.checked_rem(b),
            Tok::And => Some(a & b),
            Tok::Or => Some(a | b),
            Tok::Xor => Some(a ^ b),
            Tok::AndNot => Some(a & !b),
            Tok::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
            Tok::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
            _ => None,
          };
          r.map(|v| v as i64)
        } else {
          match op {
            Tok::Add => a.checked_add(b),
            Tok::Sub => a.checked_sub(b),
            Tok::Mul => a.checked_mul(b),
            Tok::Div => a.checked_div(b),
            Tok::Rem => a.checked_rem(b),
            Tok::And => Some(a & b),
            Tok::Or => Some(a | b),
            Tok::Xor => Some(a ^ b),
            Tok::AndNot => Some(a & !b),
            Tok::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
            Tok::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
            _ => None,
          }
        }
      }
      _ => None,
    }
  }

  /// Constant-fold the index of a tuple access and assign the element type.
  /// Returns false (after reporting) when the index is not constant or the
  /// operand is not a tuple; out-of-range indices report and poison the
  /// node's type.
  pub fn maybe_resolve_tuple_access(&mut self, n: NodeId) -> bool {
    let NodeKind::Index { operand, index, .. } = self.ast.node(n).kind.clone() else {
      return false
    };
    let resolved_operand = self.resolve(operand);
    let ot = self.ts.unalias(resolved_operand);
    let TyKind::Tuple(elems) = self.ts.kind(ot).clone() else { return false };
    let Some(i) = self.const_fold_int(index) else {
      self.error(n, "non-constant tuple index");
      return false
    };
    match usize::try_from(i).ok().filter(|&i| i < elems.len()) {
      Some(i) => {
        let elem = elems[i];
        let node = self.ast.node_mut(n);
        node.ty = Some(elem);
        if let NodeKind::Index { folded, .. } = &mut node.kind {
          *folded = Some(u32::try_from(i).expect("checked"));
        }
        if self.contains_unresolved(elem) {
          for u in self.unresolved_parts(elem) {
            self.ts.add_unresolved_ref(u, n);
          }
        }
        true
      }
      None => {
        self.error(n, format!("out-of-bounds tuple index {i}"));
        let t = self.ts.fresh_unresolved(Symbol::UNDER);
        self.ast.node_mut(n).ty = Some(t);
        false
      }
    }
  }

  /// The tuple analogue of slicing: `xs[lo:hi]` on a tuple operand
  /// constant-folds both bounds and types the node as the sub-tuple.
  pub fn tuple_slice(&mut self, n: NodeId) -> bool {
    let NodeKind::Slice { operand, lo, hi } = self.ast.node(n).kind.clone() else {
      return false
    };
    let resolved_operand = self.resolve(operand);
    let ot = self.ts.unalias(resolved_operand);
    let TyKind::Tuple(elems) = self.ts.kind(ot).clone() else { return false };
    let fold_bound = |this: &mut Self, b: Option<NodeId>, default: usize| match b {
      None => Some(default),
      Some(b) => match this.const_fold_int(b) {
        Some(i) => usize::try_from(i).ok(),
        None => None,
      },
    };
    let Some(lo) = fold_bound(self, lo, 0) else {
      self.error(n, "non-constant tuple slice bound");
      return false
    };
    let Some(hi) = fold_bound(self, hi, elems.len()) else {
      self.error(n, "non-constant tuple slice bound");
      return false
    };
    if lo > hi || hi > elems.len() {
      self.error(n, format!("out-of-bounds tuple slice {lo}:{hi}"));
      let t = self.ts.fresh_unresolved(Symbol::UNDER);
      self.ast.node_mut(n).ty = Some(t);
      return false
    }
    let t = self.ts.tuple_of(&elems[lo..hi]);
    self.ast.node_mut(n).ty = Some(t);
    true
  }
}

//! The AST: an index arena of syntax nodes produced by the parser.
//!
//! Every node carries its source position and the scope that was in force
//! where it was parsed. Name resolution happens *during* parse where
//! possible; identifiers that could not be resolved are collected per file
//! and finished by the binder. The resolver memoizes each node's type in
//! [`Node::ty`], so downstream passes never re-derive types.

use crate::pos::Pos;
use crate::symbol::Symbol;
use crate::token::Tok;
use crate::types::entity::{EntId, ScopeId};
use crate::types::ty::TyId;
use crate::types::{IdxVec, mk_id};

mk_id! {
  /// An index into the [`Ast`] node arena.
  NodeId,
}

/// A syntax node.
#[derive(Clone, Debug)]
pub struct Node {
  /// Where the node was parsed.
  pub pos: Pos,
  /// The scope in force at the node's position.
  pub scope: ScopeId,
  /// The node kind and its children.
  pub kind: NodeKind,
  /// The node's type, memoized by the resolver. `None` until first resolved.
  pub ty: Option<TyId>,
}

/// The children and payload of a [`Node`].
#[derive(Clone, Debug)]
pub enum NodeKind {
  /// An identifier occurrence. `ent` is `None` until resolved; for the
  /// wildcard `_` it stays `None` forever.
  Ident {
    /// The interned name.
    name: Symbol,
    /// The binding this identifier refers to, once resolved.
    ent: Option<EntId>,
  },
  /// An integer literal. The scanner has already computed the magnitude.
  IntLit {
    /// The literal's magnitude.
    val: u64,
  },
  /// A floating-point literal.
  FloatLit {
    /// The literal value.
    val: f64,
  },
  /// A character literal, valued as its Unicode scalar.
  CharLit {
    /// The scalar value.
    val: u32,
  },
  /// A string literal.
  StrLit {
    /// The literal bytes, escapes already decoded.
    val: Box<[u8]>,
  },
  /// A list literal `[a, b, c]`.
  ListLit {
    /// The elements.
    elems: Box<[NodeId]>,
  },
  /// A tuple expression `(a, b)` with two or more elements, or `()`.
  /// Parenthesized single expressions never produce this node.
  TupleExpr {
    /// The elements.
    elems: Box<[NodeId]>,
  },
  /// A block `{ stmt; ... }`.
  Block {
    /// The statements in order.
    stmts: Box<[NodeId]>,
  },
  /// A call `f(args)`, possibly with template arguments `f<T,U>(args)`.
  Call {
    /// The callee expression.
    fun: NodeId,
    /// Template type arguments, empty for plain calls.
    targs: Box<[NodeId]>,
    /// The value arguments.
    args: Box<[NodeId]>,
  },
  /// A selector `a.name`.
  Sel {
    /// The operand.
    operand: NodeId,
    /// The selected name.
    name: Symbol,
  },
  /// An index operation `a[i]` or tuple access `a.0`.
  Index {
    /// The operand.
    operand: NodeId,
    /// The index expression.
    index: NodeId,
    /// Filled by the resolver when the index constant-folds on a tuple.
    folded: Option<u32>,
  },
  /// A slice `a[lo:hi]`; either bound may be omitted.
  Slice {
    /// The operand.
    operand: NodeId,
    /// The lower bound.
    lo: Option<NodeId>,
    /// The upper bound.
    hi: Option<NodeId>,
  },
  /// A numeric conversion inserted by the resolver; the target type is the
  /// node's memoized type.
  Convert {
    /// The converted expression.
    operand: NodeId,
  },
  /// A unary operation.
  Unop {
    /// The operator token.
    op: Tok,
    /// The operand.
    operand: NodeId,
  },
  /// A binary operation.
  Binop {
    /// The operator token.
    op: Tok,
    /// The left operand.
    lhs: NodeId,
    /// The right operand.
    rhs: NodeId,
  },
  /// An assignment, possibly compound (`op` is the underlying binary
  /// operator for `+=` etc., or `Tok::Assign`).
  Assign {
    /// The underlying operator.
    op: Tok,
    /// The left-hand sides.
    lhs: Box<[NodeId]>,
    /// The right-hand sides.
    rhs: Box<[NodeId]>,
    /// `decls[i]` is true if `lhs[i]` introduces a new binding rather than
    /// storing to an existing one.
    decls: Box<[bool]>,
  },
  /// A variable declaration `a, b T = x, y` (field declarations inside
  /// struct bodies use the same node).
  VarDecl {
    /// The declared names (identifier nodes).
    names: Box<[NodeId]>,
    /// The declared type expression, if written.
    ty: Option<NodeId>,
    /// The initializers, one per name, possibly empty.
    values: Box<[NodeId]>,
  },
  /// A type declaration `type T { ... }` or `type T<A,B> { ... }`.
  TypeDecl {
    /// The declared name (identifier node).
    name: NodeId,
    /// Template parameter names, empty for plain declarations.
    vars: Box<[Symbol]>,
    /// The defined type expression.
    body: NodeId,
  },
  /// An import declaration.
  ImportDecl {
    /// The import path bytes.
    path: Box<[u8]>,
    /// The explicit local name, if one was written.
    local: Option<Symbol>,
  },
  /// A parenthesized group of declarations.
  Group {
    /// The member declarations.
    decls: Box<[NodeId]>,
  },
  /// A function expression. At file level a name is required; in expression
  /// position it is optional and decorative.
  FunExpr {
    /// The function name (identifier node).
    name: Option<NodeId>,
    /// The parameters, [`NodeKind::Field`] nodes.
    params: Box<[NodeId]>,
    /// The written result type expression; `None` means `auto`.
    result: Option<NodeId>,
    /// The body: a block, or the expression of an arrow body.
    body: Option<NodeId>,
    /// True when the body was written `-> expr`.
    arrow: bool,
  },
  /// One parameter of a function signature.
  Field {
    /// The parameter name; `None` in the all-typed (names omitted) form.
    name: Option<NodeId>,
    /// The parameter type expression; filled by right-to-left propagation
    /// in the grouped form.
    ty: Option<NodeId>,
  },
  /// An if expression/statement.
  If {
    /// The condition.
    cond: NodeId,
    /// The then branch.
    then: NodeId,
    /// The else branch.
    els: Option<NodeId>,
  },
  /// A while loop.
  While {
    /// The condition.
    cond: NodeId,
    /// The body.
    body: NodeId,
  },
  /// A for loop `for init; cond; post { ... }`.
  For {
    /// The init statement.
    init: Option<NodeId>,
    /// The condition.
    cond: Option<NodeId>,
    /// The post statement.
    post: Option<NodeId>,
    /// The body.
    body: NodeId,
  },
  /// A return statement.
  Return {
    /// The returned value, if any.
    value: Option<NodeId>,
  },
  /// `break` or `continue`.
  Branch {
    /// `Tok::KwBreak` or `Tok::KwContinue`.
    tok: Tok,
  },

  // type expressions
  /// A list type `[T]`.
  ListType {
    /// The element type expression.
    elem: NodeId,
  },
  /// A tuple type `(A, B)`; 1-tuples collapse during parsing.
  TupleType {
    /// The element type expressions.
    elems: Box<[NodeId]>,
  },
  /// An optional type `?T`.
  OptionalType {
    /// The inner type expression.
    inner: NodeId,
  },
  /// A rest type `...T`, legal only on a final parameter.
  RestType {
    /// The element type expression.
    elem: NodeId,
  },
  /// A struct body `{ a A; b B }`.
  StructType {
    /// The field declarations ([`NodeKind::VarDecl`] nodes).
    decls: Box<[NodeId]>,
  },
  /// A template instantiation in type position, `T<A,B>`.
  TypeInst {
    /// The template name (identifier node).
    base: NodeId,
    /// The type arguments.
    args: Box<[NodeId]>,
  },

  /// A hole left by error recovery. Downstream passes treat it as having
  /// an unresolved type and move on.
  Bad,
}

/// The node arena for one compilation.
#[derive(Debug, Default)]
pub struct Ast {
  /// The nodes.
  pub nodes: IdxVec<NodeId, Node>,
}

impl Ast {
  /// Construct an empty arena.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Allocate a node.
  pub fn alloc(&mut self, pos: Pos, scope: ScopeId, kind: NodeKind) -> NodeId {
    self.nodes.push(Node { pos, scope, kind, ty: None })
  }

  /// The node for an id.
  #[must_use] pub fn node(&self, id: NodeId) -> &Node { &self.nodes[id] }

  /// The node for an id, mutably.
  pub fn node_mut(&mut self, id: NodeId) -> &mut Node { &mut self.nodes[id] }

  /// The name of an identifier node, or `None` for other kinds.
  #[must_use] pub fn ident_name(&self, id: NodeId) -> Option<Symbol> {
    match self.nodes[id].kind {
      NodeKind::Ident { name, .. } => Some(name),
      _ => None,
    }
  }

  /// The resolved entity of an identifier node, if any.
  #[must_use] pub fn ident_ent(&self, id: NodeId) -> Option<EntId> {
    match self.nodes[id].kind {
      NodeKind::Ident { ent, .. } => ent,
      _ => None,
    }
  }

  /// Point an identifier node at its binding.
  pub fn set_ident_ent(&mut self, id: NodeId, e: EntId) {
    if let NodeKind::Ident { ent, .. } = &mut self.nodes[id].kind {
      *ent = Some(e)
    }
  }
}

impl Ast {
  /// Print a node back to source form. Printing is deterministic and the
  /// output reparses to a structurally identical tree (comments are not
  /// represented), which is what the round-trip tests check.
  #[must_use] pub fn show(&self, n: NodeId) -> String {
    let mut s = String::new();
    self.write(&mut s, n);
    s
  }

  fn write_list(&self, s: &mut String, nodes: &[NodeId], sep: &str) {
    for (i, &n) in nodes.iter().enumerate() {
      if i > 0 { s.push_str(sep) }
      self.write(s, n);
    }
  }

  fn write_char_escaped(s: &mut String, c: u32, quote: char) {
    match char::from_u32(c) {
      Some('\n') => s.push_str("\\n"),
      Some('\t') => s.push_str("\\t"),
      Some('\r') => s.push_str("\\r"),
      Some('\0') => s.push_str("\\0"),
      Some('\\') => s.push_str("\\\\"),
      Some(c) if c == quote => {
        s.push('\\');
        s.push(c);
      }
      Some(c) if c >= ' ' => s.push(c),
      _ => {
        use std::fmt::Write;
        let _ = write!(s, "\\x{:02x}", c & 0xff);
      }
    }
  }

  #[allow(clippy::too_many_lines)]
  fn write(&self, s: &mut String, n: NodeId) {
    use std::fmt::Write;
    match &self.nodes[n].kind {
      NodeKind::Ident { name, .. } => { let _ = write!(s, "{name}"); }
      NodeKind::IntLit { val } => { let _ = write!(s, "{val}"); }
      NodeKind::FloatLit { val } => { let _ = write!(s, "{val:?}"); }
      NodeKind::CharLit { val } => {
        s.push('\'');
        Self::write_char_escaped(s, *val, '\'');
        s.push('\'');
      }
      NodeKind::StrLit { val } => {
        s.push('"');
        for chunk in String::from_utf8_lossy(val).chars() {
          Self::write_char_escaped(s, u32::from(chunk), '"');
        }
        s.push('"');
      }
      NodeKind::ListLit { elems } => {
        s.push('[');
        self.write_list(s, elems, ", ");
        s.push(']');
      }
      NodeKind::TupleExpr { elems } | NodeKind::TupleType { elems } => {
        s.push('(');
        self.write_list(s, elems, ", ");
        s.push(')');
      }
      NodeKind::Block { stmts } => {
        s.push('{');
        for &st in stmts {
          s.push(' ');
          self.write(s, st);
          s.push(';');
        }
        s.push_str(" }");
      }
      NodeKind::Call { fun, targs, args } => {
        self.write(s, *fun);
        if !targs.is_empty() {
          s.push('<');
          self.write_list(s, targs, ", ");
          s.push('>');
        }
        s.push('(');
        self.write_list(s, args, ", ");
        s.push(')');
      }
      NodeKind::Sel { operand, name } => {
        self.write(s, *operand);
        let _ = write!(s, ".{name}");
      }
      NodeKind::Index { operand, index, .. } => {
        self.write(s, *operand);
        s.push('[');
        self.write(s, *index);
        s.push(']');
      }
      NodeKind::Slice { operand, lo, hi } => {
        self.write(s, *operand);
        s.push('[');
        if let Some(lo) = lo { self.write(s, *lo) }
        s.push(':');
        if let Some(hi) = hi { self.write(s, *hi) }
        s.push(']');
      }
      // conversions are invisible in source form
      NodeKind::Convert { operand } => self.write(s, *operand),
      NodeKind::Unop { op, operand } => {
        s.push_str(op.describe());
        self.write(s, *operand);
      }
      NodeKind::Binop { op, lhs, rhs } => {
        s.push('(');
        self.write(s, *lhs);
        let _ = write!(s, " {} ", op.describe());
        self.write(s, *rhs);
        s.push(')');
      }
      NodeKind::Assign { op, lhs, rhs, .. } => {
        self.write_list(s, lhs, ", ");
        if *op == Tok::Assign {
          s.push_str(" = ");
        } else {
          let _ = write!(s, " {}= ", op.describe());
        }
        self.write_list(s, rhs, ", ");
      }
      NodeKind::VarDecl { names, ty, values } => {
        self.write_list(s, names, ", ");
        if let Some(ty) = ty {
          s.push(' ');
          self.write(s, *ty);
        }
        if !values.is_empty() {
          s.push_str(" = ");
          self.write_list(s, values, ", ");
        }
      }
      NodeKind::TypeDecl { name, vars, body } => {
        s.push_str("type ");
        self.write(s, *name);
        if !vars.is_empty() {
          s.push('<');
          for (i, v) in vars.iter().enumerate() {
            if i > 0 { s.push_str(", ") }
            let _ = write!(s, "{v}");
          }
          s.push('>');
        }
        s.push(' ');
        self.write(s, *body);
      }
      NodeKind::ImportDecl { path, local } => {
        s.push_str("import ");
        if let Some(local) = local {
          let _ = write!(s, "{local} ");
        }
        let _ = write!(s, "{:?}", String::from_utf8_lossy(path));
      }
      NodeKind::Group { decls } => {
        s.push_str("type (");
        for &d in decls {
          s.push(' ');
          // group members print without the keyword they share
          if let NodeKind::TypeDecl { name, vars, body } = &self.nodes[d].kind {
            self.write(s, *name);
            if !vars.is_empty() {
              s.push('<');
              for (i, v) in vars.iter().enumerate() {
                if i > 0 { s.push_str(", ") }
                let _ = write!(s, "{v}");
              }
              s.push('>');
            }
            s.push(' ');
            self.write(s, *body);
          } else {
            self.write(s, d);
          }
          s.push(';');
        }
        s.push_str(" )");
      }
      NodeKind::FunExpr { name, params, result, body, arrow } => {
        s.push_str("fun");
        if let Some(name) = name {
          s.push(' ');
          self.write(s, *name);
        }
        s.push('(');
        self.write_list(s, params, ", ");
        s.push(')');
        if let Some(result) = result {
          s.push(' ');
          self.write(s, *result);
        }
        match body {
          Some(b) if *arrow => {
            s.push_str(" -> ");
            self.write(s, *b);
          }
          Some(b) => {
            s.push(' ');
            self.write(s, *b);
          }
          None => {}
        }
      }
      NodeKind::Field { name, ty } => {
        if let Some(name) = name {
          self.write(s, *name);
          if ty.is_some() { s.push(' ') }
        }
        if let Some(ty) = ty {
          self.write(s, *ty);
        }
      }
      NodeKind::If { cond, then, els } => {
        s.push_str("if ");
        self.write(s, *cond);
        s.push(' ');
        self.write(s, *then);
        if let Some(els) = els {
          s.push_str(" else ");
          self.write(s, *els);
        }
      }
      NodeKind::While { cond, body } => {
        s.push_str("while ");
        self.write(s, *cond);
        s.push(' ');
        self.write(s, *body);
      }
      NodeKind::For { init, cond, post, body } => {
        s.push_str("for ");
        match (init, cond, post) {
          (None, Some(c), None) => {
            self.write(s, *c);
            s.push(' ');
          }
          (None, None, None) => {}
          _ => {
            if let Some(i) = init { self.write(s, *i) }
            s.push_str("; ");
            if let Some(c) = cond { self.write(s, *c) }
            s.push_str("; ");
            if let Some(p) = post { self.write(s, *p) }
            s.push(' ');
          }
        }
        self.write(s, *body);
      }
      NodeKind::Return { value } => {
        s.push_str("return");
        if let Some(v) = value {
          s.push(' ');
          self.write(s, *v);
        }
      }
      NodeKind::Branch { tok } => s.push_str(tok.describe()),
      NodeKind::ListType { elem } => {
        s.push('[');
        self.write(s, *elem);
        s.push(']');
      }
      NodeKind::OptionalType { inner } => {
        s.push('?');
        self.write(s, *inner);
      }
      NodeKind::RestType { elem } => {
        s.push_str("...");
        self.write(s, *elem);
      }
      NodeKind::StructType { decls } => {
        s.push('{');
        for &d in decls {
          s.push(' ');
          self.write(s, d);
          s.push(';');
        }
        s.push_str(" }");
      }
      NodeKind::TypeInst { base, args } => {
        self.write(s, *base);
        s.push('<');
        self.write_list(s, args, ", ");
        s.push('>');
      }
      NodeKind::Bad => s.push_str("/*bad*/"),
    }
  }
}

/// A parsed source file.
#[derive(Debug)]
pub struct File {
  /// The file scope (outer scope is the package scope).
  pub scope: ScopeId,
  /// The import declarations.
  pub imports: Vec<NodeId>,
  /// The top-level declarations in source order.
  pub decls: Vec<NodeId>,
  /// Identifiers that did not resolve during parse, for the binder.
  pub unresolved: Vec<NodeId>,
}

/// A package: the files that share one package scope.
#[derive(Debug)]
pub struct Package {
  /// The package name.
  pub name: Symbol,
  /// The package scope (outer scope is the universe).
  pub scope: ScopeId,
  /// The parsed files.
  pub files: Vec<File>,
}

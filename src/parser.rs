//! The parser: builds the AST from a token stream, maintaining scopes and
//! performing declaration and use-site resolution as it goes.
//!
//! Identifiers that miss every enclosing scope are collected into the
//! file's `unresolved` set for the binder. Syntax errors are reported and
//! recovered by advancing to a synchronization set; only the backtracking
//! harness converts them into a rollback, and only while it is armed.

use smallvec::SmallVec;

use crate::diag::{Reporter, code};
use crate::pos::{FileSet, Pos};
use crate::resolve::Resolver;
use crate::scanner::TokenSource;
use crate::symbol::Symbol;
use crate::token::Tok;
use crate::types::ast::{Ast, File, NodeId, NodeKind};
use crate::types::entity::{Defs, EntId, ScopeId, ScopeKind};
use crate::types::ty::{TyId, TyKind, TyStore};

/// The rollback signal of the backtracking harness. Raised only while an
/// alternative is armed; everywhere else errors report and recover in place.
#[derive(Debug)]
pub struct Backtrack;

/// The result type threaded through all parse productions.
pub type PRes<T> = Result<T, Backtrack>;

/// The parser over a token source.
pub struct Parser<'a, S: TokenSource> {
  scan: S,
  ast: &'a mut Ast,
  ts: &'a mut TyStore,
  defs: &'a mut Defs,
  fs: &'a FileSet,
  rep: &'a mut Reporter,
  scope: ScopeId,
  pkg_scope: ScopeId,
  file_scope: ScopeId,
  unresolved: Vec<NodeId>,
  // > 0 while a backtracking alternative is armed
  armed: u32,
  fun_depth: u32,
  in_init: bool,
  // one entry per enclosing function: the types registered by `return`
  inferred_rets: Vec<Vec<TyId>>,
}

impl<'a, S: TokenSource> Parser<'a, S> {
  /// Create a parser for one file. `pkg_scope` is the shared package scope.
  pub fn new(scan: S, pkg_scope: ScopeId, ast: &'a mut Ast, ts: &'a mut TyStore,
      defs: &'a mut Defs, fs: &'a FileSet, rep: &'a mut Reporter) -> Self {
    let file_scope = defs.new_scope(pkg_scope, ScopeKind::File, None);
    Self {
      scan,
      ast,
      ts,
      defs,
      fs,
      rep,
      scope: file_scope,
      pkg_scope,
      file_scope,
      unresolved: vec![],
      armed: 0,
      fun_depth: 0,
      in_init: false,
      inferred_rets: vec![],
    }
  }

  fn res(&mut self) -> Resolver<'_> {
    Resolver {
      ast: &mut *self.ast,
      ts: &mut *self.ts,
      defs: &mut *self.defs,
      fs: self.fs,
      rep: &mut *self.rep,
    }
  }

  fn tok(&self) -> Tok { self.scan.tok() }
  fn pos(&self) -> Pos { self.scan.pos() }

  fn next(&mut self) {
    self.scan.next();
    if let Some(err) = self.scan.take_error() {
      if self.armed == 0 {
        self.rep.error(self.fs, err.pos, err.k);
      }
    }
  }

  fn got(&mut self, t: Tok) -> bool {
    if self.tok() == t {
      self.next();
      true
    } else {
      false
    }
  }

  // Report a syntax error, or raise it to the backtracking harness.
  fn syntax_err(&mut self, pos: Pos, msg: impl Into<String>) -> PRes<()> {
    if self.armed > 0 { return Err(Backtrack) }
    self.rep.error(self.fs, pos, msg);
    Ok(())
  }

  fn want(&mut self, t: Tok) -> PRes<()> {
    if self.got(t) { return Ok(()) }
    let pos = self.pos();
    self.syntax_err(pos, format!(
      "expected {}, found {}", t.describe(), self.tok().describe()))?;
    Ok(())
  }

  // Consume tokens until a synchronization point. Inside a function the
  // statement starters are always part of the set.
  fn advance(&mut self, follow: &[Tok]) {
    loop {
      let t = self.tok();
      if t == Tok::Eof || follow.contains(&t) { return }
      if self.fun_depth > 0 && matches!(t,
        Tok::KwBreak | Tok::KwContinue | Tok::KwFor | Tok::KwFun | Tok::KwIf
        | Tok::KwReturn | Tok::KwType | Tok::KwWhile | Tok::Semi | Tok::RBrace) {
        return
      }
      self.next();
    }
  }

  fn alloc(&mut self, pos: Pos, kind: NodeKind) -> NodeId {
    self.ast.alloc(pos, self.scope, kind)
  }

  fn bad(&mut self, pos: Pos) -> NodeId {
    self.alloc(pos, NodeKind::Bad)
  }

  fn push_scope(&mut self, kind: ScopeKind, context: Option<NodeId>) -> ScopeId {
    let s = self.defs.new_scope(self.scope, kind, context);
    self.scope = s;
    s
  }

  fn pop_scope(&mut self) {
    let s = self.scope;
    self.scope = self.defs.scope(s).outer.expect("scope underflow");
    if self.armed > 0 { return }
    for e in self.defs.unread(s) {
      let ent = self.defs.ent(e);
      let Some(decl) = ent.decl else { continue };
      let is_param = matches!(self.ast.node(decl).kind, NodeKind::Field { .. });
      let msg = format!("{} declared and not used", ent.name);
      let pos = self.ast.node(decl).pos;
      let code = if is_param { code::E_UNUSED_PARAM } else { code::E_UNUSED_VAR };
      self.rep.warn_code(self.fs, pos, msg, code);
    }
  }

  // ---------------------------------------------------------------------
  // names

  // A use occurrence: resolve along the scope chain or defer to the binder.
  fn resolve_use(&mut self, ident: NodeId, name: Symbol) {
    if name == Symbol::UNDER { return }
    match self.defs.lookup(self.scope, name) {
      Some(e) => {
        self.ast.set_ident_ent(ident, e);
        self.defs.read(e);
      }
      None => {
        self.res().mark_unresolved(ident, name);
        self.unresolved.push(ident);
      }
    }
  }

  // Undo the use-site bookkeeping of an identifier that turned out to be a
  // binding occurrence or a pure store target: the speculative read, the
  // unresolved-set entry, and the speculative binding itself.
  fn undo_use(&mut self, ident: NodeId) {
    if let Some(e) = self.ast.ident_ent(ident) {
      let ent = self.defs.ent_mut(e);
      if ent.nreads > 0 { ent.nreads -= 1 }
    }
    self.unresolved.retain(|&n| n != ident);
    if let NodeKind::Ident { ent, .. } = &mut self.ast.node_mut(ident).kind {
      *ent = None;
    }
    self.ast.node_mut(ident).ty = None;
  }

  // A binding occurrence: declare in `scope`, diagnosing redeclaration.
  fn declare(&mut self, scope: ScopeId, ident: NodeId, name: Symbol,
      value: Option<NodeId>) -> Option<EntId> {
    if name == Symbol::UNDER { return None }
    let decl = ident;
    match self.defs.declare(scope, name, decl, value) {
      Ok(e) => {
        self.ast.set_ident_ent(ident, e);
        Some(e)
      }
      Err(_) => {
        let pos = self.ast.node(ident).pos;
        self.rep.error(self.fs, pos, format!("{name} redeclared in this scope"));
        None
      }
    }
  }

  // The scope top-level declarations land in: the package scope at file
  // level (and inside `init`), the current scope otherwise.
  fn decl_scope(&mut self) -> ScopeId {
    if self.fun_depth == 0 || self.in_init { self.pkg_scope } else { self.scope }
  }

  // ---------------------------------------------------------------------
  // files

  /// Parse one file: imports, top-level declarations, and the residual
  /// unresolved identifiers.
  pub fn parse_file(mut self) -> File {
    let mut imports = vec![];
    let mut decls = vec![];
    while self.tok() != Tok::Eof {
      if self.got(Tok::Semi) { continue }
      if self.tok() == Tok::KwImport {
        match self.parse_import() {
          Ok(n) => imports.push(n),
          Err(Backtrack) => unreachable!("unarmed parse cannot backtrack"),
        }
        continue
      }
      match self.parse_stmt() {
        Ok(n) => {
          decls.push(n);
          self.res().resolve(n);
        }
        Err(Backtrack) => unreachable!("unarmed parse cannot backtrack"),
      }
    }
    File {
      scope: self.file_scope,
      imports,
      decls,
      unresolved: self.unresolved,
    }
  }

  fn parse_import(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // import
    let mut local = None;
    if self.tok() == Tok::Name {
      local = Some(self.scan.name());
      self.next();
    } else if self.tok() == Tok::Dot {
      local = Some(Symbol::DOT);
      self.next();
    }
    let path = if self.tok() == Tok::Str {
      let p = self.scan.take_byte_value();
      self.next();
      p
    } else {
      let p = self.pos();
      self.syntax_err(p, "expected import path string")?;
      self.advance(&[Tok::Semi]);
      Box::default()
    };
    Ok(self.alloc(pos, NodeKind::ImportDecl { path, local }))
  }

  // ---------------------------------------------------------------------
  // statements

  fn parse_block(&mut self, scope: Option<ScopeId>) -> PRes<NodeId> {
    let pos = self.pos();
    self.want(Tok::LBrace)?;
    let pushed = match scope {
      Some(s) => {
        self.scope = s;
        false
      }
      None => {
        self.push_scope(ScopeKind::Block, None);
        true
      }
    };
    let mut stmts = vec![];
    while !matches!(self.tok(), Tok::RBrace | Tok::Eof) {
      if self.got(Tok::Semi) { continue }
      let stmt = self.parse_stmt()?;
      stmts.push(stmt);
    }
    if pushed {
      self.pop_scope();
    } else {
      self.scope = self.defs.scope(self.scope).outer.expect("scope underflow");
    }
    self.want(Tok::RBrace)?;
    Ok(self.alloc(pos, NodeKind::Block { stmts: stmts.into() }))
  }

  fn parse_stmt(&mut self) -> PRes<NodeId> {
    match self.tok() {
      Tok::KwFun => self.parse_fun(true),
      Tok::KwType => self.parse_type_decl(),
      Tok::KwIf => self.parse_if(),
      Tok::KwWhile => self.parse_while(),
      Tok::KwFor => self.parse_for(),
      Tok::KwReturn => self.parse_return(),
      Tok::KwBreak | Tok::KwContinue => {
        let pos = self.pos();
        let tok = self.tok();
        self.next();
        Ok(self.alloc(pos, NodeKind::Branch { tok }))
      }
      Tok::KwImport => {
        let pos = self.pos();
        self.syntax_err(pos, "import is only legal at file level")?;
        self.next();
        self.advance(&[Tok::Semi]);
        Ok(self.bad(pos))
      }
      Tok::LBrace => self.parse_block(None),
      _ => self.parse_simple_stmt(),
    }
  }

  // Expression statements, assignments, and variable declarations all
  // start with an expression list.
  fn parse_simple_stmt(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    let first = self.parse_expr()?;
    let mut lhs: SmallVec<[NodeId; 2]> = SmallVec::new();
    lhs.push(first);
    while self.got(Tok::Comma) {
      lhs.push(self.parse_expr()?);
    }
    // `x, y T = ...` and `x : T = ...` declare with an explicit type
    let explicit_ty = if self.got(Tok::Colon) || self.starts_type() {
      Some(self.parse_type()?)
    } else {
      None
    };
    if let Some(tyx) = explicit_ty {
      return self.finish_var_decl(pos, &lhs, tyx)
    }
    let t = self.tok();
    if t == Tok::Assign {
      self.next();
      return self.finish_assign(pos, &lhs)
    }
    if t.is_assign_op() {
      let op = t.assign_base().expect("compound assign has a base op");
      self.next();
      return self.finish_compound_assign(pos, &lhs, op)
    }
    if matches!(t, Tok::Inc | Tok::Dec) {
      self.next();
      return self.finish_incdec(pos, &lhs, t)
    }
    if lhs.len() > 1 {
      self.syntax_err(pos, "expected type or = in declaration")?;
      self.advance(&[Tok::Semi]);
      return Ok(self.bad(pos))
    }
    Ok(first)
  }

  fn ident_syms(&mut self, lhs: &[NodeId]) -> PRes<Vec<Symbol>> {
    let mut syms = vec![];
    for &n in lhs {
      match self.ast.ident_name(n) {
        Some(s) => syms.push(s),
        None => {
          let pos = self.ast.node(n).pos;
          self.syntax_err(pos, "expected identifier on left side of declaration")?;
          syms.push(Symbol::UNDER);
        }
      }
    }
    Ok(syms)
  }

  // `names T` / `names T = values`
  fn finish_var_decl(&mut self, pos: Pos, lhs: &[NodeId], tyx: NodeId) -> PRes<NodeId> {
    let syms = self.ident_syms(lhs)?;
    for &n in lhs { self.undo_use(n) }
    let declared = self.res().type_of_type_expr(tyx);
    let mut values: Vec<NodeId> = vec![];
    if self.got(Tok::Assign) {
      values.push(self.parse_expr()?);
      while self.got(Tok::Comma) {
        values.push(self.parse_expr()?);
      }
      if values.len() != lhs.len() {
        self.syntax_err(pos, format!(
          "assignment count mismatch: {} names but {} values", lhs.len(), values.len()))?;
      }
      for v in &mut values {
        let conv = self.res().convert_lossless(declared, *v);
        match conv {
          Some(c) => *v = c,
          // conv_num reported the details already; nothing more to say
          None => self.syntax_err(self.ast.node(*v).pos, format!(
            "cannot use this value as {}", self.ts.show(declared)))?,
        }
      }
    }
    let node = self.alloc(pos, NodeKind::VarDecl {
      names: lhs.into(),
      ty: Some(tyx),
      values: values.clone().into(),
    });
    let scope = self.decl_scope();
    for (i, (&ident, &name)) in lhs.iter().zip(&syms).enumerate() {
      let value = values.get(i).copied();
      if let Some(e) = self.declare(scope, ident, name, value) {
        self.defs.ent_mut(e).ty = Some(declared);
        self.ast.node_mut(ident).ty = Some(declared);
      }
    }
    Ok(node)
  }

  // Plain `=`: store to visible bindings, declare the rest.
  fn finish_assign(&mut self, pos: Pos, lhs: &[NodeId]) -> PRes<NodeId> {
    let mut rhs = vec![self.parse_expr()?];
    while self.got(Tok::Comma) {
      rhs.push(self.parse_expr()?);
    }
    if rhs.len() != lhs.len() {
      self.syntax_err(pos, format!(
        "assignment count mismatch: {} targets but {} values", lhs.len(), rhs.len()))?;
    }
    for &v in &rhs { self.res().resolve(v); }
    let mut decls = vec![false; lhs.len()];
    for (i, &target) in lhs.iter().enumerate() {
      let value = rhs.get(i).copied();
      let Some(name) = self.ast.ident_name(target) else {
        // index/selector target: a store, never a declaration
        continue
      };
      if name == Symbol::UNDER { continue }
      // an assignment target is not a use; drop the speculative read
      self.undo_use(target);
      let existing = self.defs.lookup(self.scope, name);
      let stored = existing.is_some_and(|e| {
        let ok = self.defs.storable(e, self.scope, self.in_init);
        if ok {
          self.ast.set_ident_ent(target, e);
          self.defs.write(e, value);
        }
        ok
      });
      if !stored {
        decls[i] = true;
        let scope = self.decl_scope();
        if let Some(e) = self.declare(scope, target, name, value) {
          if let Some(v) = value {
            let t = self.res().resolve(v);
            let t = self.normalize_decl_ty(t);
            self.defs.ent_mut(e).ty = Some(t);
            self.ast.node_mut(target).ty = Some(t);
          }
        }
      }
    }
    Ok(self.alloc(pos, NodeKind::Assign {
      op: Tok::Assign,
      lhs: lhs.into(),
      rhs: rhs.into(),
      decls: decls.into(),
    }))
  }

  // Literal families settle to a concrete type when bound to a name.
  fn normalize_decl_ty(&mut self, t: TyId) -> TyId {
    match self.ts.kind(t) {
      TyKind::IntLit | TyKind::Num => TyStore::INT,
      _ => t,
    }
  }

  // `x op= y` stores through an existing binding.
  fn finish_compound_assign(&mut self, pos: Pos, lhs: &[NodeId], op: Tok) -> PRes<NodeId> {
    if lhs.len() != 1 {
      self.syntax_err(pos, "compound assignment accepts a single target")?;
    }
    let rhs = self.parse_expr()?;
    let target = lhs[0];
    self.require_mutable_target(target, op)?;
    Ok(self.alloc(pos, NodeKind::Assign {
      op,
      lhs: lhs.into(),
      rhs: Box::new([rhs]),
      decls: vec![false; lhs.len()].into(),
    }))
  }

  fn finish_incdec(&mut self, pos: Pos, lhs: &[NodeId], t: Tok) -> PRes<NodeId> {
    if lhs.len() != 1 {
      self.syntax_err(pos, "expected a single operand")?;
    }
    let target = lhs[0];
    let op = if t == Tok::Inc { Tok::Add } else { Tok::Sub };
    self.require_mutable_target(target, t)?;
    let one = self.alloc(pos, NodeKind::IntLit { val: 1 });
    Ok(self.alloc(pos, NodeKind::Assign {
      op,
      lhs: Box::new([target]),
      rhs: Box::new([one]),
      decls: Box::new([false]),
    }))
  }

  // Compound assignment and ++/-- need a mutable integer-typed binding or
  // a store target (index/selector).
  fn require_mutable_target(&mut self, target: NodeId, op: Tok) -> PRes<()> {
    let pos = self.ast.node(target).pos;
    match self.ast.node(target).kind.clone() {
      NodeKind::Ident { name, ent } => {
        let e = ent.or_else(|| self.defs.lookup(self.scope, name));
        match e {
          Some(e) if self.defs.ent(e).decl.is_some() => {
            self.ast.set_ident_ent(target, e);
            if matches!(op, Tok::Inc | Tok::Dec) {
              let t = self.res().resolve(target);
              let tr = self.ts.unalias(t);
              let int_ok = match self.ts.kind(tr) {
                TyKind::Prim(p) => p.is_signed_int() || p.is_unsigned_int(),
                TyKind::IntLit => true,
                _ => false,
              };
              if !int_ok {
                self.syntax_err(pos, format!(
                  "cannot use {} on {}", op.describe(), self.ts.show(t)))?;
              }
            }
            self.defs.write(e, None);
            Ok(())
          }
          _ => {
            self.syntax_err(pos, format!(
              "cannot use {} on an immutable name", op.describe()))?;
            Ok(())
          }
        }
      }
      NodeKind::Index { .. } | NodeKind::Sel { .. } => Ok(()),
      _ => {
        self.syntax_err(pos, format!("invalid operand for {}", op.describe()))?;
        Ok(())
      }
    }
  }

  fn parse_if(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // if
    self.push_scope(ScopeKind::Block, None);
    let cond = self.parse_expr()?;
    let then = self.parse_block(None)?;
    let els = if self.got(Tok::KwElse) {
      Some(if self.tok() == Tok::KwIf { self.parse_if()? } else { self.parse_block(None)? })
    } else {
      None
    };
    self.pop_scope();
    Ok(self.alloc(pos, NodeKind::If { cond, then, els }))
  }

  fn parse_while(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // while
    self.push_scope(ScopeKind::Block, None);
    let cond = self.parse_expr()?;
    let body = self.parse_block(None)?;
    self.pop_scope();
    Ok(self.alloc(pos, NodeKind::While { cond, body }))
  }

  fn parse_for(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // for
    self.push_scope(ScopeKind::Block, None);
    let mut init = None;
    let mut cond = None;
    let mut post = None;
    if self.tok() != Tok::LBrace {
      let first = self.parse_simple_stmt()?;
      if self.got(Tok::Semi) {
        init = Some(first);
        if self.tok() != Tok::Semi {
          cond = Some(self.parse_expr()?);
        }
        self.want(Tok::Semi)?;
        if self.tok() != Tok::LBrace {
          post = Some(self.parse_simple_stmt()?);
        }
      } else {
        cond = Some(first);
      }
    }
    let body = self.parse_block(None)?;
    self.pop_scope();
    Ok(self.alloc(pos, NodeKind::For { init, cond, post, body }))
  }

  fn parse_return(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // return
    let value = if matches!(self.tok(), Tok::Semi | Tok::RBrace | Tok::Eof) {
      None
    } else {
      Some(self.parse_expr()?)
    };
    if self.fun_depth == 0 {
      self.syntax_err(pos, "return outside function")?;
    } else {
      let t = match value {
        Some(v) => self.res().resolve(v),
        None => TyStore::VOID,
      };
      self.add_inferred_ret_type(t);
    }
    Ok(self.alloc(pos, NodeKind::Return { value }))
  }

  fn add_inferred_ret_type(&mut self, t: TyId) {
    if let Some(rets) = self.inferred_rets.last_mut() {
      rets.push(t);
    }
  }

  // ---------------------------------------------------------------------
  // functions

  #[allow(clippy::too_many_lines)]
  fn parse_fun(&mut self, stmt_level: bool) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // fun
    let top_level = self.fun_depth == 0;
    let mut name = None;
    let mut name_sym = None;
    if matches!(self.tok(), Tok::Name | Tok::NameAt) {
      let sym = self.scan.name();
      let npos = self.pos();
      self.next();
      name = Some(self.alloc(npos, NodeKind::Ident { name: sym, ent: None }));
      name_sym = Some(sym);
    } else if top_level && stmt_level {
      self.syntax_err(pos, "top-level function requires a name")?;
    }
    let is_init = top_level && name_sym == Some(Symbol::INIT);

    let fun_scope = self.defs.new_scope(self.scope, ScopeKind::Fun, None);
    let outer_scope = self.scope;
    self.scope = fun_scope;

    let params = if self.tok() == Tok::LParen {
      self.parse_params()?
    } else {
      Box::default()
    };
    if is_init && !params.is_empty() {
      self.syntax_err(pos, "init function accepts no parameters")?;
    }

    // explicit result type, or auto until inferred
    let mut result = None;
    if !matches!(self.tok(), Tok::LBrace | Tok::Arrow | Tok::Semi | Tok::Eof) {
      result = Some(self.parse_type()?);
    }
    if is_init {
      if let Some(r) = result {
        let rt = self.res().type_of_type_expr(r);
        if !self.ts.same(rt, TyStore::VOID) {
          self.syntax_err(pos, "init function must return void")?;
        }
      }
    }

    self.fun_depth += 1;
    let was_init = self.in_init;
    self.in_init = is_init;
    self.inferred_rets.push(vec![]);

    let (body, arrow) = if self.got(Tok::Arrow) {
      (Some(self.parse_expr()?), true)
    } else if self.tok() == Tok::LBrace {
      (Some(self.parse_block(Some(fun_scope))?), false)
    } else {
      let p = self.pos();
      self.syntax_err(p, "expected function body")?;
      (None, false)
    };

    let rets = self.inferred_rets.pop().expect("balanced fun stack");
    self.in_init = was_init;
    self.fun_depth -= 1;
    self.scope = outer_scope;

    // unused-parameter diagnostics for the signature scope
    if self.armed == 0 {
      for e in self.defs.unread(fun_scope) {
        let ent = self.defs.ent(e);
        let Some(decl) = ent.decl else { continue };
        let is_param = matches!(self.ast.node(decl).kind, NodeKind::Field { .. });
        let msg = format!("{} declared and not used", ent.name);
        let dpos = self.ast.node(decl).pos;
        let c = if is_param { code::E_UNUSED_PARAM } else { code::E_UNUSED_VAR };
        self.rep.warn_code(self.fs, dpos, msg, c);
      }
    }

    let node = self.alloc(pos,
      NodeKind::FunExpr { name, params: params.clone(), result, body, arrow });
    let fun_ty = self.finish_result_type(&params, result, body, arrow, &rets)?;
    self.ast.node_mut(node).ty = Some(fun_ty);

    // a named top-level function (except init) is a package declaration;
    // an expression-level name is decorative
    if top_level && stmt_level && !is_init {
      if let (Some(ident), Some(sym)) = (name, name_sym) {
        if let Some(e) = self.declare(self.pkg_scope, ident, sym, Some(node)) {
          self.defs.ent_mut(e).ty = Some(fun_ty);
        }
      }
    }
    Ok(node)
  }

  // Close out the signature: infer the result if it was auto, and rewrite
  // a block body's trailing expression into a return.
  fn finish_result_type(&mut self, params: &[NodeId], result: Option<NodeId>,
      body: Option<NodeId>, arrow: bool, rets: &[TyId]) -> PRes<TyId> {
    let declared = result.map(|r| self.res().type_of_type_expr(r));
    let rty = match declared {
      Some(t) => {
        if !arrow && !self.ts.same(t, TyStore::VOID) {
          self.rewrite_implicit_return(body, t)?;
        }
        t
      }
      None => match body {
        // arrow body: the recorded returns, or the expression's own type
        Some(b) if arrow => {
          if rets.is_empty() {
            self.res().resolve(b)
          } else {
            let mut all = rets.to_vec();
            let bt = self.res().resolve(b);
            if !all.contains(&bt) { all.push(bt) }
            self.ts.union_of(&all)
          }
        }
        // block body: void when no return was seen
        Some(_) | None => {
          if rets.is_empty() {
            TyStore::VOID
          } else {
            self.ts.union_of(rets)
          }
        }
      },
    };
    let ptys: Vec<TyId> = params.iter().map(|&p| self.res().resolve(p)).collect();
    Ok(self.ts.fun_of(&ptys, rty))
  }

  // `fun f() i32 { 3 }`: the last expression-statement becomes
  // `return 3`, converted to the declared result type.
  fn rewrite_implicit_return(&mut self, body: Option<NodeId>, declared: TyId) -> PRes<()> {
    let Some(body) = body else { return Ok(()) };
    let NodeKind::Block { stmts } = self.ast.node(body).kind.clone() else { return Ok(()) };
    let Some(&last) = stmts.last() else { return Ok(()) };
    if matches!(self.ast.node(last).kind, NodeKind::Return { .. }) { return Ok(()) }
    let lt = self.res().resolve(last);
    if self.ts.same(lt, TyStore::VOID) { return Ok(()) }
    let pos = self.ast.node(last).pos;
    let converted = match self.res().convert_lossless(declared, last) {
      Some(c) => c,
      None => {
        self.syntax_err(pos, format!(
          "cannot use this expression as result type {}", self.ts.show(declared)))?;
        last
      }
    };
    let scope = self.ast.node(body).scope;
    let ret = self.ast.alloc(pos, scope, NodeKind::Return { value: Some(converted) });
    let mut stmts = stmts.into_vec();
    *stmts.last_mut().expect("nonempty") = ret;
    if let NodeKind::Block { stmts: s } = &mut self.ast.node_mut(body).kind {
      *s = stmts.into();
    }
    self.ast.node_mut(body).ty = None;
    Ok(())
  }

  // Parameter lists: all-typed, all-named, or grouped names sharing a
  // trailing type, with right-to-left propagation.
  fn parse_params(&mut self) -> PRes<Box<[NodeId]>> {
    self.want(Tok::LParen)?;
    let mut fields: Vec<NodeId> = vec![];
    while !matches!(self.tok(), Tok::RParen | Tok::Eof) {
      let pos = self.pos();
      let field = if matches!(self.tok(), Tok::Name | Tok::NameAt) {
        let sym = self.scan.name();
        let ident = self.alloc(pos, NodeKind::Ident { name: sym, ent: None });
        self.next();
        if self.starts_type() {
          let ty = self.parse_type()?;
          self.alloc(pos, NodeKind::Field { name: Some(ident), ty: Some(ty) })
        } else {
          // either a grouped name awaiting a type, or a type-only entry
          self.alloc(pos, NodeKind::Field { name: Some(ident), ty: None })
        }
      } else {
        let ty = self.parse_type()?;
        self.alloc(pos, NodeKind::Field { name: None, ty: Some(ty) })
      };
      fields.push(field);
      if !self.got(Tok::Comma) { break }
    }
    self.want(Tok::RParen)?;

    let any_typed = fields.iter().any(|&f|
      matches!(self.ast.node(f).kind, NodeKind::Field { ty: Some(_), .. }));
    let any_unnamed = fields.iter().any(|&f|
      matches!(self.ast.node(f).kind, NodeKind::Field { name: None, .. }));
    if any_unnamed || !any_typed {
      // all-typed mode: every bare name is itself a type; an entry that
      // carries both a name and a type makes the list mixed
      for &f in &fields {
        match self.ast.node(f).kind.clone() {
          NodeKind::Field { name: Some(ident), ty: None } => {
            if let NodeKind::Field { name, ty } = &mut self.ast.node_mut(f).kind {
              *name = None;
              *ty = Some(ident);
            }
          }
          NodeKind::Field { name: Some(_), ty: Some(_) } if any_unnamed => {
            let p = self.ast.node(f).pos;
            self.syntax_err(p, "mixed named and unnamed parameters")?;
          }
          _ => {}
        }
      }
    } else {
      // grouped form: types flow right-to-left until a typed entry
      let mut pending: Option<NodeId> = None;
      for &f in fields.iter().rev() {
        match self.ast.node(f).kind.clone() {
          NodeKind::Field { ty: Some(t), .. } => pending = Some(t),
          NodeKind::Field { ty: None, .. } => {
            if let Some(t) = pending {
              if let NodeKind::Field { ty, .. } = &mut self.ast.node_mut(f).kind {
                *ty = Some(t);
              }
            } else {
              let p = self.ast.node(f).pos;
              self.syntax_err(p, "mixed named and unnamed parameters")?;
            }
          }
          _ => {}
        }
      }
    }

    // only the final parameter may be a rest type
    for (i, &f) in fields.iter().enumerate() {
      if_chain::if_chain! {
        if let NodeKind::Field { ty: Some(t), .. } = self.ast.node(f).kind;
        if matches!(self.ast.node(t).kind, NodeKind::RestType { .. });
        if i + 1 != fields.len();
        then {
          let p = self.ast.node(f).pos;
          self.syntax_err(p, "can only use ... with the final parameter")?;
        }
      }
    }

    // declare the named parameters in the function scope
    for &f in &fields {
      if let NodeKind::Field { name: Some(ident), .. } = self.ast.node(f).kind {
        if let Some(sym) = self.ast.ident_name(ident) {
          if let Some(e) = self.declare(self.scope, ident, sym, None) {
            self.defs.ent_mut(e).decl = Some(f);
            let t = self.res().resolve(f);
            self.defs.ent_mut(e).ty = Some(t);
          }
        }
      }
    }
    Ok(fields.into())
  }

  // ---------------------------------------------------------------------
  // type declarations

  fn parse_type_decl(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.next(); // type
    // `type ( ... )` groups several declarations
    if self.got(Tok::LParen) {
      let mut decls = vec![];
      while !matches!(self.tok(), Tok::RParen | Tok::Eof) {
        if self.got(Tok::Semi) { continue }
        decls.push(self.parse_one_type_decl()?);
      }
      self.want(Tok::RParen)?;
      return Ok(self.alloc(pos, NodeKind::Group { decls: decls.into() }))
    }
    self.parse_one_type_decl()
  }

  fn parse_one_type_decl(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    let Tok::Name = self.tok() else {
      self.syntax_err(pos, "expected type name")?;
      self.advance(&[Tok::Semi]);
      return Ok(self.bad(pos))
    };
    let sym = self.scan.name();
    let ident = self.alloc(pos, NodeKind::Ident { name: sym, ent: None });
    self.next();

    // template parameters bind inside the body
    let mut vars: Vec<Symbol> = vec![];
    if self.tok() == Tok::Lt {
      self.next();
      while matches!(self.tok(), Tok::Name) {
        vars.push(self.scan.name());
        self.next();
        if !self.got(Tok::Comma) { break }
      }
      self.want(Tok::Gt)?;
    }
    let body_scope = self.push_scope(ScopeKind::Block, None);
    for (i, &v) in vars.iter().enumerate() {
      let vident = self.alloc(pos, NodeKind::Ident { name: v, ent: None });
      if let Some(e) = self.declare(body_scope, vident, v, None) {
        let vt = self.ts.var(crate::types::ty::TyVarId(
          u32::try_from(i).expect("too many template parameters")));
        self.defs.ent_mut(e).ty = Some(vt);
        self.defs.read(e); // template variables are used by instantiation
      }
    }
    let body = self.parse_type()?;
    self.pop_scope();

    let node = self.alloc(pos, NodeKind::TypeDecl {
      name: ident,
      vars: vars.clone().into(),
      body,
    });

    // compute the declared type: struct bodies become nominal types
    let body_ty = self.res().type_of_type_expr(body);
    let named_ty = match self.ts.kind(body_ty).clone() {
      TyKind::Struct { fields, .. } => self.ts.struct_decl(sym, fields),
      _ => self.ts.alias_of(sym, body_ty),
    };
    let declared_ty = if vars.is_empty() {
      named_ty
    } else {
      self.ts.template(vars.into(), named_ty)
    };
    let scope = self.decl_scope();
    if let Some(e) = self.declare(scope, ident, sym, None) {
      self.defs.ent_mut(e).ty = Some(declared_ty);
      self.defs.ent_mut(e).decl = Some(node);
    }
    self.ast.node_mut(ident).ty = Some(declared_ty);
    Ok(node)
  }

  // ---------------------------------------------------------------------
  // type expressions

  fn starts_type(&self) -> bool {
    matches!(self.tok(),
      Tok::Name | Tok::LBracket | Tok::LParen | Tok::Ellipsis | Tok::LBrace | Tok::Question)
  }

  fn parse_type(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    match self.tok() {
      Tok::Name => {
        let sym = self.scan.name();
        let ident = self.alloc(pos, NodeKind::Ident { name: sym, ent: None });
        self.next();
        self.resolve_use(ident, sym);
        // in type position `<...>` is always an instantiation
        if self.tok() == Tok::Lt {
          self.next();
          let mut args = vec![self.parse_type()?];
          while self.got(Tok::Comma) {
            args.push(self.parse_type()?);
          }
          self.want(Tok::Gt)?;
          return Ok(self.alloc(pos, NodeKind::TypeInst { base: ident, args: args.into() }))
        }
        Ok(ident)
      }
      Tok::LBracket => {
        self.next();
        let elem = self.parse_type()?;
        self.want(Tok::RBracket)?;
        Ok(self.alloc(pos, NodeKind::ListType { elem }))
      }
      Tok::LParen => {
        self.next();
        let mut elems = vec![];
        while !matches!(self.tok(), Tok::RParen | Tok::Eof) {
          elems.push(self.parse_type()?);
          if !self.got(Tok::Comma) { break }
        }
        self.want(Tok::RParen)?;
        // a parenthesized single type is the type itself
        if let [single] = *elems {
          return Ok(single)
        }
        Ok(self.alloc(pos, NodeKind::TupleType { elems: elems.into() }))
      }
      Tok::Ellipsis => {
        self.next();
        let elem = self.parse_type()?;
        Ok(self.alloc(pos, NodeKind::RestType { elem }))
      }
      Tok::Question => {
        self.next();
        let inner = self.parse_type()?;
        Ok(self.alloc(pos, NodeKind::OptionalType { inner }))
      }
      Tok::LBrace => self.parse_struct_type(),
      _ => {
        self.syntax_err(pos, format!("expected type, found {}", self.tok().describe()))?;
        self.advance(&[Tok::Semi, Tok::RParen, Tok::RBrace]);
        Ok(self.bad(pos))
      }
    }
  }

  fn parse_struct_type(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    self.want(Tok::LBrace)?;
    self.push_scope(ScopeKind::Struct, None);
    let mut decls = vec![];
    while !matches!(self.tok(), Tok::RBrace | Tok::Eof) {
      if self.got(Tok::Semi) { continue }
      let fpos = self.pos();
      let mut names = vec![];
      loop {
        if !matches!(self.tok(), Tok::Name) {
          self.syntax_err(self.pos(), "expected field name")?;
          self.advance(&[Tok::Semi, Tok::RBrace]);
          break
        }
        let sym = self.scan.name();
        let npos = self.pos();
        self.next();
        names.push(self.alloc(npos, NodeKind::Ident { name: sym, ent: None }));
        if !self.got(Tok::Comma) { break }
      }
      if names.is_empty() { continue }
      let fty = self.parse_type()?;
      let field = self.alloc(fpos, NodeKind::VarDecl {
        names: names.clone().into(),
        ty: Some(fty),
        values: Box::default(),
      });
      for &ident in &names {
        if let Some(sym) = self.ast.ident_name(ident) {
          self.declare(self.scope, ident, sym, None);
        }
      }
      decls.push(field);
    }
    self.pop_scope();
    self.want(Tok::RBrace)?;
    Ok(self.alloc(pos, NodeKind::StructType { decls: decls.into() }))
  }

  // ---------------------------------------------------------------------
  // expressions

  fn parse_expr(&mut self) -> PRes<NodeId> {
    self.parse_binary(0)
  }

  fn parse_binary(&mut self, min_prec: u8) -> PRes<NodeId> {
    let mut lhs = self.parse_unary()?;
    loop {
      let t = self.tok();
      let prec = t.prec();
      if prec == 0 || prec <= min_prec { return Ok(lhs) }
      // `Name<T,U>(args)` is ambiguous with comparison; backtrack to decide
      if t == Tok::Lt && matches!(self.ast.node(lhs).kind, NodeKind::Ident { .. }) {
        if let Some(call) = self.try_template_call(lhs)? {
          lhs = self.parse_postfix(call)?;
          continue
        }
      }
      let pos = self.pos();
      self.next();
      let rhs = self.parse_binary(prec)?;
      lhs = self.alloc(pos, NodeKind::Binop { op: t, lhs, rhs });
    }
  }

  // The backtracking harness: snapshot, arm, try the template-call parse;
  // restore and fall through to the comparison parse on failure.
  fn try_template_call(&mut self, base: NodeId) -> PRes<Option<NodeId>> {
    let cp = self.scan.checkpoint();
    let unresolved_mark = self.unresolved.len();
    let scope = self.scope;
    self.armed += 1;
    let attempt = self.parse_template_call(base);
    self.armed -= 1;
    match attempt {
      Ok(call) => Ok(Some(call)),
      Err(Backtrack) => {
        self.scan.restore(cp);
        self.unresolved.truncate(unresolved_mark);
        self.scope = scope;
        Ok(None)
      }
    }
  }

  fn parse_template_call(&mut self, base: NodeId) -> PRes<NodeId> {
    let pos = self.pos();
    self.want(Tok::Lt)?;
    let mut targs = vec![self.parse_type()?];
    while self.got(Tok::Comma) {
      targs.push(self.parse_type()?);
    }
    self.want(Tok::Gt)?;
    if self.tok() != Tok::LParen {
      let p = self.pos();
      self.syntax_err(p, "expected ( after type arguments")?;
      return Err(Backtrack)
    }
    let args = self.parse_call_args()?;
    Ok(self.alloc(pos, NodeKind::Call { fun: base, targs: targs.into(), args }))
  }

  fn parse_call_args(&mut self) -> PRes<Box<[NodeId]>> {
    self.want(Tok::LParen)?;
    let mut args = vec![];
    while !matches!(self.tok(), Tok::RParen | Tok::Eof) {
      args.push(self.parse_expr()?);
      if !self.got(Tok::Comma) { break }
    }
    self.want(Tok::RParen)?;
    Ok(args.into())
  }

  fn parse_unary(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    match self.tok() {
      Tok::Not | Tok::Sub | Tok::Add | Tok::Xor => {
        let op = self.tok();
        self.next();
        let operand = self.parse_unary()?;
        if op == Tok::Add {
          // unary plus is the identity
          return Ok(operand)
        }
        Ok(self.alloc(pos, NodeKind::Unop { op, operand }))
      }
      _ => {
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
      }
    }
  }

  fn parse_postfix(&mut self, mut e: NodeId) -> PRes<NodeId> {
    loop {
      match self.tok() {
        Tok::LParen => {
          let pos = self.pos();
          let args = self.parse_call_args()?;
          e = self.alloc(pos, NodeKind::Call { fun: e, targs: Box::default(), args });
        }
        Tok::Dot => {
          let pos = self.pos();
          self.next();
          match self.tok() {
            Tok::Name => {
              let name = self.scan.name();
              self.next();
              e = self.alloc(pos, NodeKind::Sel { operand: e, name });
            }
            t if t.is_int_lit() => {
              let ipos = self.pos();
              let val = self.scan.int_val();
              self.next();
              let idx = self.alloc(ipos, NodeKind::IntLit { val });
              e = self.alloc(pos, NodeKind::Index { operand: e, index: idx, folded: None });
            }
            _ => {
              let p = self.pos();
              self.syntax_err(p, "expected field name or tuple index after .")?;
              return Ok(e)
            }
          }
        }
        Tok::LBracket => {
          let pos = self.pos();
          self.next();
          let lo = if matches!(self.tok(), Tok::Colon) {
            None
          } else {
            Some(self.parse_expr()?)
          };
          if self.got(Tok::Colon) {
            let hi = if matches!(self.tok(), Tok::RBracket) {
              None
            } else {
              Some(self.parse_expr()?)
            };
            self.want(Tok::RBracket)?;
            e = self.alloc(pos, NodeKind::Slice { operand: e, lo, hi });
          } else {
            self.want(Tok::RBracket)?;
            let index = lo.expect("index expression");
            e = self.alloc(pos, NodeKind::Index { operand: e, index, folded: None });
          }
        }
        _ => return Ok(e),
      }
    }
  }

  fn parse_primary(&mut self) -> PRes<NodeId> {
    let pos = self.pos();
    match self.tok() {
      t if t.is_int_lit() => {
        let val = self.scan.int_val();
        self.next();
        Ok(self.alloc(pos, NodeKind::IntLit { val }))
      }
      Tok::Float => {
        let val = self.scan.floatval();
        self.next();
        Ok(self.alloc(pos, NodeKind::FloatLit { val }))
      }
      Tok::Char => {
        let val = u32::try_from(self.scan.int_val()).unwrap_or(0xfffd);
        self.next();
        Ok(self.alloc(pos, NodeKind::CharLit { val }))
      }
      Tok::Str => {
        let val = self.scan.take_byte_value();
        self.next();
        Ok(self.alloc(pos, NodeKind::StrLit { val }))
      }
      Tok::Name | Tok::NameAt => {
        let sym = self.scan.name();
        self.next();
        let ident = self.alloc(pos, NodeKind::Ident { name: sym, ent: None });
        self.resolve_use(ident, sym);
        Ok(ident)
      }
      Tok::LParen => {
        self.next();
        let mut elems = vec![];
        while !matches!(self.tok(), Tok::RParen | Tok::Eof) {
          elems.push(self.parse_expr()?);
          if !self.got(Tok::Comma) { break }
        }
        self.want(Tok::RParen)?;
        // a parenthesized single expression is the expression itself
        if let [single] = *elems {
          return Ok(single)
        }
        Ok(self.alloc(pos, NodeKind::TupleExpr { elems: elems.into() }))
      }
      Tok::LBracket => {
        self.next();
        let mut elems = vec![];
        while !matches!(self.tok(), Tok::RBracket | Tok::Eof) {
          elems.push(self.parse_expr()?);
          if !self.got(Tok::Comma) { break }
        }
        self.want(Tok::RBracket)?;
        Ok(self.alloc(pos, NodeKind::ListLit { elems: elems.into() }))
      }
      Tok::KwFun => self.parse_fun(false),
      Tok::KwIf => self.parse_if(),
      _ => {
        self.syntax_err(pos, format!("unexpected {}", self.tok().describe()))?;
        self.next();
        self.advance(&[Tok::Semi]);
        Ok(self.bad(pos))
      }
    }
  }
}

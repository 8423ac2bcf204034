//! The front-end and SSA mid-end of the Rill language: scanner, parser,
//! scope-aware name resolution, lazy type resolution, a post-parse binder
//! for forward and cross-file references, and the SSA intermediate
//! representation with its cached CFG analyses.
//!
//! The expected flow is: create a [`Compiler`], open a package, parse each
//! of its files, then [`Compiler::bind`] to link forward references. The
//! resulting AST carries memoized types on every node; back ends build
//! [`types::ir::Fun`]s against an [`arch::Config`] and use the analyses in
//! [`analysis`].
//!
//! ```
//! use rillc::Compiler;
//!
//! let mut cc = Compiler::new();
//! let mut pkg = cc.new_package("main");
//! cc.parse_file(&mut pkg, "main.rl", "fun f() i32 { 3 }");
//! assert!(cc.bind(&pkg, None));
//! assert_eq!(cc.rep.err_count(), 0);
//! ```

#![warn(missing_docs)]
#![warn(unused)]

pub mod analysis;
pub mod arch;
pub mod binder;
pub mod diag;
pub mod parser;
pub mod pos;
pub mod resolve;
pub mod scanner;
pub mod symbol;
pub mod token;
pub mod types;

pub use diag::{ErrorKind, Reporter, Severity};
pub use pos::{FileSet, Location, Pos};
pub use symbol::{Symbol, intern};

use binder::{Importer, ImportsMap};
use diag::ErrorHandler;
use parser::Parser;
use resolve::Resolver;
use scanner::{ScanMode, Scanner};
use types::ast::{Ast, Package};
use types::entity::{Defs, ScopeKind};
use types::ty::TyStore;

/// The compilation context: the file set, node arena, type store, scope
/// arenas and diagnostic sink shared by every pass. There are no hidden
/// globals besides the string interner; dropping the `Compiler` tears the
/// caches down.
pub struct Compiler {
  /// The registered source files.
  pub fs: FileSet,
  /// The AST node arena.
  pub ast: Ast,
  /// The type store and canonicalization tables.
  pub ts: TyStore,
  /// Scopes and bindings, universe included.
  pub defs: Defs,
  /// The diagnostic sink.
  pub rep: Reporter,
  /// The import cache shared across [`Compiler::bind`] calls.
  pub imports: ImportsMap,
}

impl Default for Compiler {
  fn default() -> Self { Self::new() }
}

impl Compiler {
  /// A compiler that retains diagnostics in `rep.diags`.
  #[must_use] pub fn new() -> Self {
    Self {
      fs: FileSet::new(),
      ast: Ast::new(),
      ts: TyStore::new(),
      defs: Defs::new(),
      rep: Reporter::new(),
      imports: ImportsMap::new(),
    }
  }

  /// A compiler that forwards diagnostics to `handler`.
  #[must_use] pub fn with_handler(handler: ErrorHandler) -> Self {
    Self { rep: Reporter::with_handler(handler), ..Self::new() }
  }

  /// Open a new package with its own package scope.
  pub fn new_package(&mut self, name: &str) -> Package {
    let scope = self.defs.new_scope(self.defs.universe, ScopeKind::Package, None);
    Package { name: intern(name), scope, files: vec![] }
  }

  /// Parse one source file into `pkg`. Syntax and type diagnostics go to
  /// the reporter; the file is appended even when it contains errors.
  pub fn parse_file(&mut self, pkg: &mut Package, name: &str, src: &str) {
    let id = self.fs.add_file(name, src);
    let text = self.fs.file(id).src.clone();
    let scan = Scanner::new(id, &text, ScanMode::default());
    let parser = Parser::new(scan, pkg.scope,
      &mut self.ast, &mut self.ts, &mut self.defs, &self.fs, &mut self.rep);
    let file = parser.parse_file();
    pkg.files.push(file);
  }

  /// Bind a fully parsed package: fetch imports through `importer` and
  /// link forward references. Returns false if anything failed to bind.
  pub fn bind(&mut self, pkg: &Package, importer: Option<&dyn Importer>) -> bool {
    let mut imports = std::mem::take(&mut self.imports);
    let ok = binder::bind(&mut self.resolver(), pkg, importer, &mut imports);
    self.imports = imports;
    ok
  }

  /// A resolver over this compiler's state.
  pub fn resolver(&mut self) -> Resolver<'_> {
    Resolver {
      ast: &mut self.ast,
      ts: &mut self.ts,
      defs: &mut self.defs,
      fs: &self.fs,
      rep: &mut self.rep,
    }
  }
}

//! The binder: the post-parse pass that fetches imports and links the
//! forward references the parser left in each file's `unresolved` set.
//!
//! Imports are the one place concurrency is visible in the front-end:
//! fetches run on scoped threads and join as an unordered barrier. If any
//! import fails the binder records the error, lets the rest finish, and
//! then skips name resolution entirely; the AST stays safe to inspect.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::diag::code;
use crate::resolve::Resolver;
use crate::symbol::Symbol;
use crate::types::ast::{NodeId, NodeKind, Package};

/// A fetched package, as far as binding is concerned.
#[derive(Clone, Debug)]
pub struct ImportedPkg {
  /// The package's own name, used when no local name is written.
  pub name: Symbol,
}

/// The import cache threaded through [`Importer::fetch`]. The importer
/// consults it for hits and inserts its own entry before returning.
pub type ImportsMap = HashMap<String, ImportedPkg>;

/// The import collaborator. `fetch` is the binder's only suspension point;
/// implementations may block, and are called from multiple threads.
pub trait Importer: Sync {
  /// Fetch or look up the package for `path`.
  fn fetch(&self, imports: &Mutex<ImportsMap>, path: &str) -> Result<ImportedPkg, String>;
}

struct PendingImport {
  file: usize,
  node: NodeId,
  path: String,
  local: Option<Symbol>,
}

/// Bind a parsed package: resolve imports (in parallel), then the residual
/// unresolved identifiers of each file. Returns false if anything failed;
/// an errored bind still leaves a well-formed AST.
pub fn bind(r: &mut Resolver<'_>, pkg: &Package, importer: Option<&dyn Importer>,
    imports: &mut ImportsMap) -> bool {
  let mut ok = true;

  // collect the import sites
  let mut pending: Vec<PendingImport> = vec![];
  for (i, file) in pkg.files.iter().enumerate() {
    for &node in &file.imports {
      if let NodeKind::ImportDecl { path, local } = &r.ast.node(node).kind {
        pending.push(PendingImport {
          file: i,
          node,
          path: String::from_utf8_lossy(path).into_owned(),
          local: *local,
        });
      }
    }
  }

  // fan the fetches out; the join is an unordered barrier
  let mut fetched: Vec<(usize, Result<ImportedPkg, String>)> = vec![];
  if !pending.is_empty() {
    let cache = Mutex::new(std::mem::take(imports));
    let results = Mutex::new(Vec::with_capacity(pending.len()));
    std::thread::scope(|s| {
      for (idx, imp) in pending.iter().enumerate() {
        let cache = &cache;
        let results = &results;
        s.spawn(move || {
          let outcome = match importer {
            Some(importer) => importer.fetch(cache, &imp.path),
            None => Err("no importer provided".into()),
          };
          results.lock().expect("poisoned").push((idx, outcome));
        });
      }
    });
    *imports = cache.into_inner().expect("poisoned");
    fetched = results.into_inner().expect("poisoned");
  }

  let mut failed = false;
  for (idx, outcome) in fetched {
    let imp = &pending[idx];
    let pos = r.ast.node(imp.node).pos;
    match outcome {
      Err(msg) => {
        failed = true;
        r.rep.error_code(r.fs, pos,
          format!("cannot import {:?}: {msg}", imp.path), code::E_BIND);
      }
      Ok(found) => {
        match imp.local {
          Some(Symbol::UNDER) => {} // imported for effect only
          Some(Symbol::DOT) => {
            // reserved syntax; the file-scope merge is not implemented
            failed = true;
            r.rep.error_code(r.fs, pos,
              "dot-imports are not supported".to_owned(), code::E_SUGGESTION);
          }
          local => {
            let name = local.unwrap_or(found.name);
            let scope = pkg.files[imp.file].scope;
            if r.defs.declare(scope, name, imp.node, None).is_err() {
              failed = true;
              r.rep.error_code(r.fs, pos,
                format!("{name} redeclared in this file"), code::E_BIND);
            }
          }
        }
      }
    }
  }
  if failed {
    // skip name resolution; the caller sees the partial state
    return false
  }

  // late-bound identifiers: look through the file scope, which now sees
  // imports, package-scope declarations from every file, and the universe
  for file in &pkg.files {
    for &ident in &file.unresolved {
      let Some(name) = r.ast.ident_name(ident) else { continue };
      if r.ast.ident_ent(ident).is_some() { continue }
      match r.defs.lookup(file.scope, name) {
        Some(e) => {
          r.ast.set_ident_ent(ident, e);
          r.defs.read(e);
          propagate(r, ident);
        }
        None => {
          ok = false;
          let pos = r.ast.node(ident).pos;
          r.rep.error_code(r.fs, pos, format!("{name} undefined"), code::E_BIND);
        }
      }
    }
  }
  ok
}

// Re-type everything that was waiting on this identifier's definition.
fn propagate(r: &mut Resolver<'_>, ident: NodeId) {
  let old = r.ast.node(ident).ty;
  r.ast.node_mut(ident).ty = None;
  let actual = r.resolve(ident);
  if let Some(u) = old {
    if u != actual {
      let refs = r.ts.resolve_unresolved(u, actual);
      for n in refs {
        if n == ident { continue }
        r.ast.node_mut(n).ty = None;
        r.resolve(n);
      }
    }
  }
}

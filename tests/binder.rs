//! Binder scenarios: import fan-out, the dot-import decision, and
//! resolution skipping on import failure.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rillc::binder::{ImportedPkg, Importer, ImportsMap};
use rillc::diag::{Severity, code};
use rillc::symbol::intern;
use rillc::Compiler;

struct FakeImporter {
  fetches: AtomicUsize,
}

impl FakeImporter {
  fn new() -> Self { Self { fetches: AtomicUsize::new(0) } }
}

impl Importer for FakeImporter {
  fn fetch(&self, imports: &Mutex<ImportsMap>, path: &str) -> Result<ImportedPkg, String> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if let Some(hit) = imports.lock().expect("poisoned").get(path) {
      return Ok(hit.clone())
    }
    if path.starts_with("bad/") {
      return Err("not found".into())
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    let pkg = ImportedPkg { name: intern(name) };
    imports.lock().expect("poisoned").insert(path.to_owned(), pkg.clone());
    Ok(pkg)
  }
}

#[test]
fn imports_bind_under_local_or_package_name() {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "a.rl",
    "import \"lib/strings\"\nimport ss \"lib/sort\"\nimport _ \"lib/effect\"\n");
  let importer = FakeImporter::new();
  assert!(cc.bind(&pkg, Some(&importer)));
  assert_eq!(importer.fetches.load(Ordering::SeqCst), 3);
  let file = pkg.files[0].scope;
  assert!(cc.defs.lookup_local(file, intern("strings")).is_some());
  assert!(cc.defs.lookup_local(file, intern("ss")).is_some());
  assert!(cc.defs.lookup_local(file, intern("effect")).is_none());
  // the importer's cache entries survive for the next bind
  assert!(cc.imports.contains_key("lib/strings"));
}

#[test]
fn failed_import_skips_name_resolution() {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "a.rl", "import \"bad/lib\"\nq = nosuch\n");
  let importer = FakeImporter::new();
  assert!(!cc.bind(&pkg, Some(&importer)));
  let msgs: Vec<_> = cc.rep.diags.iter().map(|d| d.msg.as_str()).collect();
  assert!(msgs.iter().any(|m| m.contains("cannot import")), "got: {msgs:?}");
  // resolution was skipped, so the undefined name is not reported
  assert!(!msgs.iter().any(|m| m.contains("undefined")), "got: {msgs:?}");
}

#[test]
fn dot_import_fails_loudly() {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "a.rl", "import . \"lib/strings\"\n");
  let importer = FakeImporter::new();
  assert!(!cc.bind(&pkg, Some(&importer)));
  let diag = cc.rep.diags.iter()
    .find(|d| d.severity == Severity::Error && d.msg.contains("dot-imports"))
    .expect("dot-import diagnostic");
  assert_eq!(diag.code, Some(code::E_SUGGESTION));
}

#[test]
fn missing_importer_fails_imports() {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "a.rl", "import \"lib/strings\"\n");
  assert!(!cc.bind(&pkg, None));
  assert!(cc.rep.diags.iter().any(|d| d.msg.contains("no importer provided")));
}

#[test]
fn cross_file_forward_references() {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "a.rl", "v = shared\n");
  cc.parse_file(&mut pkg, "b.rl", "shared = 42\n");
  assert!(cc.bind(&pkg, None));
  let e = cc.defs.lookup(pkg.scope, intern("v")).expect("v declared");
  let decl = cc.defs.ent(e).decl.unwrap();
  let t = cc.resolver().resolve(decl);
  assert_eq!(t, rillc::types::ty::TyStore::INT);
}

#[test]
fn parses_from_disk() {
  use std::io::Write;
  let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
  writeln!(tmp, "fun f() i32 {{ 3 }}").expect("write");
  let src = std::fs::read_to_string(tmp.path()).expect("read back");
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, &tmp.path().display().to_string(), &src);
  assert!(cc.bind(&pkg, None));
  assert_eq!(cc.rep.err_count(), 0);
}

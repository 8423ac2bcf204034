//! End-to-end front-end scenarios: parse, bind, and inspect types.

use rillc::diag::{Severity, code};
use rillc::symbol::intern;
use rillc::types::ast::{NodeId, NodeKind, Package};
use rillc::types::ty::{TyId, TyKind, TyStore};
use rillc::Compiler;

fn compile(src: &str) -> (Compiler, Package) {
  let mut cc = Compiler::new();
  let mut pkg = cc.new_package("main");
  cc.parse_file(&mut pkg, "test.rl", src);
  (cc, pkg)
}

fn compile_bound(src: &str) -> (Compiler, Package) {
  let (mut cc, pkg) = compile(src);
  assert!(cc.bind(&pkg, None), "bind failed: {:?}", cc.rep.diags);
  (cc, pkg)
}

// The type of a package-scope binding, through the resolver so late-bound
// parts settle.
fn ty_of(cc: &mut Compiler, pkg: &Package, name: &str) -> TyId {
  let e = cc.defs.lookup(pkg.scope, intern(name))
    .unwrap_or_else(|| panic!("{name} is not declared"));
  let decl = cc.defs.ent(e).decl.expect("user binding has a declaration");
  cc.resolver().resolve(decl)
}

fn find_nodes(cc: &Compiler, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
  cc.ast.nodes.enum_iter()
    .filter(|(_, n)| pred(&n.kind))
    .map(|(id, _)| id)
    .collect()
}

fn errors(cc: &Compiler) -> Vec<String> {
  cc.rep.diags.iter()
    .filter(|d| d.severity == Severity::Error)
    .map(|d| d.msg.clone())
    .collect()
}

#[test]
fn tuple_literal_indexing() {
  let (mut cc, pkg) = compile_bound(
    "xs = (1, 2.3, true, \"3\")\n\
     b0 = xs.0\n\
     b1 = xs.1\n\
     b2 = xs.2\n\
     b3 = xs.3\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  assert_eq!(ty_of(&mut cc, &pkg, "b0"), TyStore::INT);
  assert_eq!(ty_of(&mut cc, &pkg, "b1"), TyStore::F64);
  assert_eq!(ty_of(&mut cc, &pkg, "b2"), TyStore::BOOL);
  let str1 = cc.ts.str_of(Some(1));
  assert_eq!(ty_of(&mut cc, &pkg, "b3"), str1);
  let xs = ty_of(&mut cc, &pkg, "xs");
  let expected = cc.ts.tuple_of(&[TyStore::INT, TyStore::F64, TyStore::BOOL, str1]);
  assert_eq!(xs, expected);
}

#[test]
fn out_of_bounds_tuple_index() {
  let (cc, _) = compile_bound(
    "xs = (1, 2.3, true, \"3\")\n\
     b4 = xs.4\n");
  assert!(errors(&cc).iter().any(|m| m == "out-of-bounds tuple index 4"),
    "got: {:?}", errors(&cc));
}

#[test]
fn constant_folded_tuple_index() {
  let (mut cc, pkg) = compile_bound(
    "xs = (1, 2.3, 4.5)\n\
     z:i64 = 1\n\
     y = z\n\
     a2 = xs[y + 1]\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  assert_eq!(ty_of(&mut cc, &pkg, "a2"), TyStore::F64);
  // the index expression folded down to element 2
  let folded: Vec<_> = find_nodes(&cc,
    |k| matches!(k, NodeKind::Index { folded: Some(2), .. }));
  assert_eq!(folded.len(), 1);
}

#[test]
fn folded_index_uses_declared_type_division() {
  let (mut cc, pkg) = compile_bound(
    "xs = (1, 2.3, 4.5)\n\
     z:i64 = 1\n\
     y = z\n\
     a2 = xs[((y + 1) / 2) + 1]\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  // (1 + 1) / 2 + 1 == 2 in i64 arithmetic
  assert_eq!(ty_of(&mut cc, &pkg, "a2"), TyStore::F64);
}

#[test]
fn late_bound_tuple_type() {
  let (mut cc, pkg) = compile_bound(
    "xs2 = (1, late_str)\n\
     v = xs2.1\n\
     late_str = \"hello\"\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let str5 = cc.ts.str_of(Some(5));
  let expected = cc.ts.tuple_of(&[TyStore::INT, str5]);
  assert_eq!(ty_of(&mut cc, &pkg, "xs2"), expected);
  assert_eq!(ty_of(&mut cc, &pkg, "v"), str5);
}

#[test]
fn forward_template() {
  let (mut cc, pkg) = compile_bound(
    "fun foo { _ = T1<int,f32>(1, 2.0) }\n\
     type T1<A,B> { a A; b B }\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let calls = find_nodes(&cc, |k| matches!(k, NodeKind::Call { .. }));
  assert_eq!(calls.len(), 1);
  let call_ty = cc.resolver().resolve(calls[0]);
  let TyKind::Struct { name, fields } = cc.ts.kind(call_ty).clone() else {
    panic!("expected a struct instance, got {}", cc.ts.show(call_ty));
  };
  assert_eq!(name, intern("T1"));
  assert_eq!(fields.len(), 2);
  assert_eq!(fields[0].name, intern("a"));
  assert_eq!(fields[0].ty, TyStore::INT);
  assert_eq!(fields[1].name, intern("b"));
  assert_eq!(fields[1].ty, TyStore::F32);
  // the value arguments keep their literal defaults
  let NodeKind::Call { args, .. } = cc.ast.node(calls[0]).kind.clone() else { unreachable!() };
  let a0 = cc.resolver().resolve(args[0]);
  let a1 = cc.resolver().resolve(args[1]);
  assert_eq!(a0, TyStore::INT);
  assert_eq!(a1, TyStore::F64);
  let _ = pkg;
}

#[test]
fn implicit_return_rewriting() {
  let (mut cc, pkg) = compile_bound("fun f() i32 { 3 }\nfun g() { }\n");
  assert_eq!(errors(&cc), Vec::<String>::new());

  let f = cc.defs.lookup(pkg.scope, intern("f")).expect("f declared");
  let fun_node = cc.defs.ent(f).value.expect("function value");
  let fty = cc.resolver().resolve(fun_node);
  let TyKind::Fun { params, result } = cc.ts.kind(fty).clone() else {
    panic!("expected a function type");
  };
  assert!(params.is_empty());
  assert_eq!(result, TyStore::I32);

  // the block's last statement was rewritten to `return 3` with the
  // literal converted to i32
  let NodeKind::FunExpr { body: Some(body), .. } = cc.ast.node(fun_node).kind.clone() else {
    panic!("expected a function body");
  };
  let NodeKind::Block { stmts } = cc.ast.node(body).kind.clone() else {
    panic!("expected a block body");
  };
  let NodeKind::Return { value: Some(v) } = cc.ast.node(*stmts.last().unwrap()).kind.clone()
  else {
    panic!("last statement is not a return");
  };
  assert_eq!(cc.resolver().resolve(v), TyStore::I32);

  let g = cc.defs.lookup(pkg.scope, intern("g")).expect("g declared");
  let gty = cc.defs.ent(g).ty.expect("g typed");
  let TyKind::Fun { result, .. } = cc.ts.kind(gty).clone() else {
    panic!("expected a function type");
  };
  assert_eq!(result, TyStore::VOID);
}

#[test]
fn unused_variable_warning() {
  let (cc, _) = compile("fun h { x = 1 }\n");
  let warning = cc.rep.diags.iter()
    .find(|d| d.severity == Severity::Warn)
    .expect("expected an unused-variable warning");
  assert_eq!(warning.msg, "x declared and not used");
  assert_eq!(warning.code, Some(code::E_UNUSED_VAR));
}

#[test]
fn unused_parameter_warning() {
  let (cc, _) = compile("fun h(a int, b int) int { a }\n");
  let warnings: Vec<_> = cc.rep.diags.iter()
    .filter(|d| d.severity == Severity::Warn)
    .collect();
  assert_eq!(warnings.len(), 1);
  assert_eq!(warnings[0].msg, "b declared and not used");
  assert_eq!(warnings[0].code, Some(code::E_UNUSED_PARAM));
}

#[test]
fn ident_ent_iff_unresolved() {
  // every identifier is either resolved, `_`, or in the unresolved set
  let (cc, pkg) = compile(
    "xs = (1, missing_one)\n\
     fun foo(a int) int { a + missing_two }\n");
  let unresolved = &pkg.files[0].unresolved;
  for (id, node) in cc.ast.nodes.enum_iter() {
    if let NodeKind::Ident { name, ent } = node.kind {
      if name == intern("_") { continue }
      assert_eq!(ent.is_none(), unresolved.contains(&id),
        "identifier {name} violates the unresolved invariant");
    }
  }
  assert_eq!(unresolved.len(), 2);
}

#[test]
fn resolve_is_idempotent() {
  let (mut cc, pkg) = compile_bound("xs = (1, 2.3, \"ab\")\n");
  let e = cc.defs.lookup(pkg.scope, intern("xs")).unwrap();
  let decl = cc.defs.ent(e).decl.unwrap();
  let t1 = cc.resolver().resolve(decl);
  let t2 = cc.resolver().resolve(decl);
  assert_eq!(t1, t2);
}

#[test]
fn numeric_conversion_diagnostics() {
  let (cc, _) = compile("w:i8 = 300\n");
  assert!(errors(&cc).iter().any(|m| m.contains("constant 300 overflows i8")),
    "got: {:?}", errors(&cc));

  let (cc, _) = compile("w:i32 = 2.5\n");
  assert!(errors(&cc).iter().any(|m| m.contains("truncated to i32")),
    "got: {:?}", errors(&cc));

  let (mut cc, pkg) = compile_bound("w:f32 = 2.0\nv:i64 = 7\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  assert_eq!(ty_of(&mut cc, &pkg, "w"), TyStore::F32);
  assert_eq!(ty_of(&mut cc, &pkg, "v"), TyStore::I64);
}

#[test]
fn list_literal_widening() {
  let (mut cc, pkg) = compile_bound("ys = [1, 2.5, 3]\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let expected = cc.ts.list_of(TyStore::F64);
  assert_eq!(ty_of(&mut cc, &pkg, "ys"), expected);
}

#[test]
fn empty_list_without_context_errors() {
  let (cc, _) = compile("ys = []\n");
  assert!(errors(&cc).iter().any(|m| m.contains("empty list")),
    "got: {:?}", errors(&cc));
}

#[test]
fn template_comparison_ambiguity() {
  // `a<b,c>d` is a comparison pair, not a template call
  let (cc, _) = compile(
    "a = 1\nb = 2\nc = 3\nd = 4\n\
     fun amb { _ = (a<b,c>d) }\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let calls = find_nodes(&cc, |k| matches!(k, NodeKind::Call { .. }));
  assert!(calls.is_empty());
  let cmps = find_nodes(&cc,
    |k| matches!(k, NodeKind::Binop { op: rillc::token::Tok::Lt, .. }
      | NodeKind::Binop { op: rillc::token::Tok::Gt, .. }));
  assert_eq!(cmps.len(), 2);
}

#[test]
fn rest_parameter_only_last() {
  let (cc, _) = compile("fun v(a ...int, b int) { }\n");
  assert!(errors(&cc).iter().any(|m| m.contains("final parameter")),
    "got: {:?}", errors(&cc));
}

#[test]
fn mixed_parameters_rejected() {
  let (cc, _) = compile("fun m(a int, [f32]) { }\n");
  assert!(errors(&cc).iter().any(|m| m.contains("mixed named and unnamed parameters")),
    "got: {:?}", errors(&cc));
}

#[test]
fn error_recovery_resyncs_on_while() {
  // the stray comma is an error; the while statement after it must
  // still parse instead of being skipped over
  let (cc, _) = compile("x = 1\nfun rec { , while x > 1 { break } }\n");
  assert!(!errors(&cc).is_empty());
  let whiles = find_nodes(&cc, |k| matches!(k, NodeKind::While { .. }));
  assert_eq!(whiles.len(), 1);
  let breaks = find_nodes(&cc, |k| matches!(k, NodeKind::Branch { .. }));
  assert_eq!(breaks.len(), 1);
}

#[test]
fn redeclaration_rejected() {
  let (cc, _) = compile("fun r { x = 1; x int = 2; _ = x }\n");
  assert!(errors(&cc).iter().any(|m| m.contains("redeclared")),
    "got: {:?}", errors(&cc));
}

#[test]
fn undefined_name_reported_by_binder() {
  let (mut cc, pkg) = compile("q = nosuch\n");
  assert!(!cc.bind(&pkg, None));
  let diag = cc.rep.diags.iter()
    .find(|d| d.msg == "nosuch undefined")
    .expect("binder reports the undefined name");
  assert_eq!(diag.code, Some(code::E_BIND));
}

#[test]
fn print_reparse_fixpoint() {
  let src = "\
    type Pair<A,B> { a A; b B }\n\
    type ( Meter int; Page { no int } )\n\
    xs = (1, 2.5, \"a\\nb\", 'c')\n\
    zs = [1, 2, 3]\n\
    w = xs[0:2]\n\
    e0 = zs[0]\n\
    fun count(limit i64) i64 {\n\
      total = 0\n\
      for i = 0; i < limit; i += 1 { total += i }\n\
      while total > 100 { total -= 1 }\n\
      if total == 0 { return 0 } else { }\n\
      total\n\
    }\n\
    fun inc2(v i64) -> v + 1\n";
  let (cc, pkg) = compile(src);
  assert_eq!(errors(&cc), Vec::<String>::new());
  let print_all = |cc: &Compiler, pkg: &Package| -> String {
    let mut out = String::new();
    for &d in &pkg.files[0].decls {
      out.push_str(&cc.ast.show(d));
      out.push('\n');
    }
    out
  };
  let printed = print_all(&cc, &pkg);
  let (cc2, pkg2) = compile(&printed);
  assert_eq!(errors(&cc2), Vec::<String>::new(), "reparse of: {printed}");
  assert_eq!(printed, print_all(&cc2, &pkg2));
}

#[test]
fn optional_type_declaration() {
  let (mut cc, pkg) = compile_bound("type Name str\nlabel ?Name\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let t = ty_of(&mut cc, &pkg, "label");
  let TyKind::Optional(inner) = *cc.ts.kind(t) else {
    panic!("expected optional, got {}", cc.ts.show(t));
  };
  assert!(cc.ts.same(inner, TyStore::STR));
}

#[test]
fn type_groups_declare_all_members() {
  let (mut cc, pkg) = compile_bound(
    "type ( Meter int; Line { len Meter } )\n\
     m Meter = 5\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  assert!(cc.defs.lookup(pkg.scope, intern("Line")).is_some());
  let t = ty_of(&mut cc, &pkg, "m");
  assert!(cc.ts.same(t, TyStore::INT));
  assert_eq!(cc.ts.show(t), "Meter");
}

#[test]
fn arrow_body_infers_result() {
  let (cc, pkg) = compile_bound("fun inc(a i64) -> a + 1\n");
  assert_eq!(errors(&cc), Vec::<String>::new());
  let e = cc.defs.lookup(pkg.scope, intern("inc")).unwrap();
  let t = cc.defs.ent(e).ty.unwrap();
  let TyKind::Fun { params, result } = cc.ts.kind(t).clone() else {
    panic!("expected function type");
  };
  assert_eq!(&*params, &[TyStore::I64]);
  assert_eq!(result, TyStore::I64);
}

//! End-to-end scenarios: source text in, C translation unit out.

use std::fs;

use el2c::{CompileError, Compiler};

fn emit(src: &str) -> String {
  Compiler::new(".").compile_source("main", src).expect("compile")
}

#[test]
fn generic_identity_specializes_and_main_is_emitted() {
  let c = emit(
    "let id = fun x -> x\n\
     let main() : i64 = id(0)",
  );
  assert!(c.contains("static int64_t id_inst_I64(int64_t x);"), "{c}");
  assert!(c.contains("int64_t main(void) {"), "{c}");
  assert!(c.contains("return id_inst_I64(INT64_C(0));"), "{c}");
}

#[test]
fn option_match_compiles_to_tag_checks() {
  let c = emit(
    "type option(a) := | Some(a) | None\n\
     let main() : i64 = match Some(1) with | Some(x) -> x | None -> 0",
  );
  assert_eq!(c.matches("enum option_I64_tag {").count(), 1, "{c}");
  assert!(c.contains("OPTION_I64_SOME_TAG"), "{c}");
  assert!(c.contains(".tag == OPTION_I64_SOME_TAG"), "{c}");
  assert!(c.contains(".data.Some"), "{c}");
}

#[test]
fn mutually_recursive_functions_are_both_emitted() {
  let c = emit(
    "let even(n) = if n = 0 then true else odd(n - 1)\n\
     let odd(n) = if n = 0 then false else even(n - 1)\n\
     let main() : i64 = if even(10) then 0 else 1",
  );
  assert!(c.contains("static bool even(int64_t n);"), "{c}");
  assert!(c.contains("static bool odd(int64_t n);"), "{c}");
  assert!(c.contains("odd((n - INT64_C(1)))"), "{c}");
  assert!(c.contains("even((n - INT64_C(1)))"), "{c}");
}

#[test]
fn user_type_argument_mismatch_reports_innermost_conflict() {
  let err = Compiler::new(".").compile_source(
    "main",
    "type list(a) := | Nil | Cons((a, &list(a)))\n\
     let head(l : list(i64)) : i64 = 0\n\
     let strs() : list(&char) = Nil\n\
     let main() : i64 = head(strs())",
  ).expect_err("list(&char) must not unify with list(i64)");
  let CompileError::Unify(e) = err else { panic!("expected a type error, got {err}") };
  let (a, b) = e.innermost();
  let pair = (a.to_string(), b.to_string());
  assert!(
    pair == ("&char".into(), "i64".into()) || pair == ("i64".into(), "&char".into()),
    "innermost conflict was {pair:?}",
  );
  // the enclosing frame names the list types
  assert!(e.failed.0.to_string().contains("list"), "{e:?}");
}

#[test]
fn import_cycle_is_fatal_and_names_both_modules() {
  let dir = tempfile::tempdir().expect("tempdir");
  fs::write(dir.path().join("a.el2"), "open_file \"b.el2\"\nlet x = 1\n").expect("write");
  fs::write(dir.path().join("b.el2"), "open_file \"a.el2\"\nlet y = 2\n").expect("write");
  let err = Compiler::new(dir.path())
    .compile_file(&dir.path().join("a.el2"))
    .expect_err("cycle");
  let CompileError::ModuleCycle { from, offending } = err else {
    panic!("expected a module cycle, got {err}")
  };
  assert_eq!(from.as_str(), "A");
  assert_eq!(offending, "b.el2");
}

#[test]
fn weakened_binding_rejects_incompatible_element_types() {
  // `let r = &0` weakens to a monomorphic pointer; a use at bool fails
  let err = Compiler::new(".").compile_source(
    "main",
    "let r = &0\n\
     let main() : i64 = if *r then 1 else 0",
  ).expect_err("pointer element type is pinned by the first use");
  assert!(matches!(err, CompileError::Unify(_)), "{err}");

  // the same binding used consistently compiles
  let c = emit(
    "let r = &0\n\
     let main() : i64 = *r",
  );
  assert!(c.contains("static int64_t* r;"), "{c}");
  assert!(c.contains("return (*r);"), "{c}");
}

#[test]
fn cross_module_calls_monomorphize_the_callee() {
  let dir = tempfile::tempdir().expect("tempdir");
  fs::write(
    dir.path().join("util.el2"),
    "let id = fun x -> x\n",
  ).expect("write");
  fs::write(
    dir.path().join("main.el2"),
    "let main() : i64 = Util.id(42)\n",
  ).expect("write");
  let c = Compiler::new(dir.path())
    .compile_file(&dir.path().join("main.el2"))
    .expect("compile");
  assert!(c.contains("static int64_t Util_id_inst_I64(int64_t x);"), "{c}");
  assert!(c.contains("Util_id_inst_I64(INT64_C(42))"), "{c}");
}

#[test]
fn linked_list_program_compiles() {
  let c = emit(
    "type list(a) := | Nil | Cons((a, &list(a)))\n\
     let sum(l) : i64 = match l with\n\
       | Cons((x, rest)) -> x + sum(*rest)\n\
       | Nil -> 0\n\
     let main() : i64 =\n\
       let tail = Cons((2, &Nil)); sum(Cons((1, &tail)))",
  );
  // one instantiation of the list type, at i64
  assert!(c.contains("struct list_I64;"), "{c}");
  assert!(c.contains("LIST_I64_CONS_TAG"), "{c}");
  // the recursive call goes through the dereferenced tail pointer
  assert!(c.contains("sum("), "{c}");
}

#[test]
fn implicit_extern_reaches_libc_directly() {
  let c = emit(
    "implicit_extern put : c_int -> c_int = \"putchar\"\n\
     let main() : i64 = put(10c); 0",
  );
  assert!(c.contains("putchar(10)"), "{c}");
  assert!(!c.contains("extern int putchar"), "{c}");
}

#[test]
fn loops_lower_to_for_with_break_destination() {
  let c = emit(
    "let count() : i64 =\n\
       let p = &0;\n\
       loop (if *p = 5 then break *p else *p <- *p + 1)\n\
     let main() : i64 = count()",
  );
  assert!(c.contains("for (;;) {"), "{c}");
  assert!(c.contains("break;"), "{c}");
}

#[test]
fn struct_literals_use_designated_initializers() {
  let c = emit(
    "type point := { x : i64, y : i64 }\n\
     let main() : i64 = let p = point { y: 2, x: 1 }; p.x + p.y",
  );
  assert!(c.contains("struct point {"), "{c}");
  assert!(c.contains(".x = INT64_C(1)"), "{c}");
  assert!(c.contains(".y = INT64_C(2)"), "{c}");
  assert!(c.contains("(p).x"), "{c}");
}

#[test]
fn string_literals_are_char_pointers() {
  let c = emit(
    "implicit_extern puts : &char -> c_int = \"puts\"\n\
     let main() : i64 = puts(\"hello\"); 0",
  );
  assert!(c.contains("puts(\"hello\")"), "{c}");
}

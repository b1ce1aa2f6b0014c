/// End-to-end pipeline tests: source text through preprocess, parse, sema,
/// optimize, codegen and the VM, with program output captured in-process.
/// The cache is disabled here; its behavior has its own test file.

use pretty_assertions::assert_eq;
use std::io::Write as _;

use pscal::errors::PscalError;
use pscal::frontend::{run_source, Options};
use pscal::vm::CaptureBuffer;

fn options() -> Options {
    Options { no_cache: true, ..Options::default() }
}

fn run_program_with_args(src: &str, args: Vec<String>) -> (Result<i32, PscalError>, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("prog.cl");
    std::fs::write(&path, src).expect("write source");
    let capture = CaptureBuffer::new();
    let result = run_source(&path, args, &options(), Some(Box::new(capture.clone())));
    (result, capture.contents())
}

fn run_program(src: &str) -> (Result<i32, PscalError>, String) {
    run_program_with_args(src, Vec::new())
}

fn run_ok(src: &str) -> String {
    let (result, out) = run_program(src);
    assert_eq!(result.expect("program should succeed"), 0);
    out
}

// ── Arithmetic and folding ────────────────────────────────────────────────────

#[test]
fn constant_expression_prints_through_printf() {
    let out = run_ok("int main() { printf(\"%d\\n\", 2 + 3); return 0; }");
    assert_eq!(out, "5\n");
}

#[test]
fn dead_branch_keeps_the_live_side() {
    let out = run_ok("int main() { if (0) printf(\"no\"); else printf(\"yes\\n\"); return 0; }");
    assert_eq!(out, "yes\n");
}

#[test]
fn integer_division_follows_c_semantics() {
    let out = run_ok("int main() { printf(\"%d %d\\n\", 7 / 2, 7 % 2); return 0; }");
    assert_eq!(out, "3 1\n");
}

#[test]
fn mixed_division_produces_a_real() {
    let out = run_ok("int main() { printf(\"%f\\n\", 1 / 2.0); return 0; }");
    assert_eq!(out, "0.500000\n");
}

#[test]
fn unary_minus_and_precedence() {
    let out = run_ok("int main() { printf(\"%d\\n\", -5 + 2 * 4); return 0; }");
    assert_eq!(out, "3\n");
}

#[test]
fn bitwise_operators_work_on_integers() {
    let out = run_ok("int main() { printf(\"%d %d %d\\n\", 6 & 3, 6 | 3, 6 ^ 3); return 0; }");
    assert_eq!(out, "2 7 5\n");
}

// ── Control flow ──────────────────────────────────────────────────────────────

#[test]
fn while_loop_accumulates() {
    let out = run_ok(
        "int main() {\n  int i; int sum;\n  i = 1; sum = 0;\n  while (i <= 10) { sum = sum + i; i = i + 1; }\n  printf(\"%d\\n\", sum);\n  return 0;\n}",
    );
    assert_eq!(out, "55\n");
}

#[test]
fn for_loop_with_declaration_in_init() {
    let out = run_ok(
        "int main() {\n  int sum;\n  sum = 0;\n  for (int i = 0; i < 5; i = i + 1) { sum = sum + i; }\n  printf(\"%d\\n\", sum);\n  return 0;\n}",
    );
    assert_eq!(out, "10\n");
}

#[test]
fn do_while_runs_the_body_at_least_once() {
    let out = run_ok(
        "int main() {\n  int n;\n  n = 0;\n  do { n = n + 1; } while (n < 3);\n  printf(\"%d\\n\", n);\n  do { n = n + 10; } while (false);\n  printf(\"%d\\n\", n);\n  return 0;\n}",
    );
    assert_eq!(out, "3\n13\n");
}

#[test]
fn switch_selects_without_fallthrough() {
    let out = run_ok(
        "int main() {\n  int x;\n  x = 2;\n  switch (x) {\n    case 1: printf(\"one\\n\");\n    case 2: case 3: printf(\"few\\n\");\n    default: printf(\"many\\n\");\n  }\n  return 0;\n}",
    );
    assert_eq!(out, "few\n");
}

#[test]
fn switch_falls_back_to_default() {
    let out = run_ok(
        "int main() {\n  switch (9) {\n    case 1: printf(\"one\\n\");\n    default: printf(\"many\\n\");\n  }\n  return 0;\n}",
    );
    assert_eq!(out, "many\n");
}

#[test]
fn recursion_computes_fibonacci() {
    let out = run_ok(
        "int f(int n) { if (n < 2) return n; return f(n - 1) + f(n - 2); }\nint main() { printf(\"%d\\n\", f(10)); return 0; }",
    );
    assert_eq!(out, "55\n");
}

#[test]
fn forward_call_resolves_to_a_later_definition() {
    let out = run_ok(
        "int main() { printf(\"%d\\n\", double_it(21)); return 0; }\nint double_it(int x) { return x * 2; }",
    );
    assert_eq!(out, "42\n");
}

#[test]
fn short_circuit_skips_the_side_effect() {
    let out = run_ok(
        "int noisy() { printf(\"side\\n\"); return 1; }\nint main() {\n  if (0 && noisy()) printf(\"a\\n\");\n  if (1 || noisy()) printf(\"b\\n\");\n  return 0;\n}",
    );
    assert_eq!(out, "b\n");
}

// ── Data ──────────────────────────────────────────────────────────────────────

#[test]
fn globals_are_shared_across_functions() {
    let out = run_ok(
        "int counter = 40;\nvoid bump() { counter = counter + 1; }\nint main() { bump(); bump(); printf(\"%d\\n\", counter); return 0; }",
    );
    assert_eq!(out, "42\n");
}

#[test]
fn local_arrays_store_and_load() {
    let out = run_ok(
        "int main() {\n  int a[5];\n  for (int i = 0; i < 5; i = i + 1) { a[i] = i * i; }\n  printf(\"%d %d\\n\", a[0], a[4]);\n  return 0;\n}",
    );
    assert_eq!(out, "0 16\n");
}

#[test]
fn array_index_out_of_bounds_is_a_runtime_error() {
    let (result, _) = run_program(
        "int main() { int a[3]; a[0] = 1; printf(\"%d\\n\", a[7]); return 0; }",
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("outside bounds"), "{}", err);
}

#[test]
fn strings_concat_and_measure() {
    let out = run_ok(
        "int main() {\n  str s;\n  s = \"hello\" + \" \" + \"world\";\n  printf(\"%s %d\\n\", s, strlen(s));\n  return 0;\n}",
    );
    assert_eq!(out, "hello world 11\n");
}

#[test]
fn builtin_aliases_resolve_for_clike() {
    let out = run_ok(
        "int main() { printf(\"%s %s\\n\", toupper(\"abc\"), itoa(7)); return 0; }",
    );
    assert_eq!(out, "ABC 7\n");
}

#[test]
fn char_literals_compare_and_print() {
    let out = run_ok(
        "int main() {\n  char c;\n  c = 'A';\n  if (c == 'A') printf(\"%c%d\\n\", c, ord(c));\n  return 0;\n}",
    );
    assert_eq!(out, "A65\n");
}

#[test]
fn writeln_lowering_uses_the_dedicated_opcode() {
    let out = run_ok("int main() { writeln(\"x=\", 1 + 1); write(\"a\"); write(\"b\"); return 0; }");
    assert_eq!(out, "x=2\nab");
}

// ── Errors and exits ──────────────────────────────────────────────────────────

#[test]
fn division_by_zero_reports_kind_and_line() {
    let (result, out) = run_program(
        "int main() {\n  int x;\n  x = 5;\n  printf(\"%d\\n\", x / 0);\n  return 0;\n}",
    );
    assert_eq!(out, "");
    let err = result.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("divide by zero"), "{}", text);
    assert!(text.contains("line 4"), "{}", text);
    assert!(text.starts_with("Arithmetic error"), "{}", text);
}

#[test]
fn unknown_builtin_is_a_name_error_with_arity() {
    let (result, _) = run_program("int main() { mystery(1, 2); return 0; }");
    let err = result.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("mystery") && text.contains("2"), "{}", text);
}

#[test]
fn halt_forces_the_exit_code_and_stops_output() {
    let (result, out) = run_program("int main() { halt(7); printf(\"no\\n\"); return 0; }");
    assert_eq!(result.unwrap(), 7);
    assert_eq!(out, "");
}

#[test]
fn parse_errors_surface_before_execution() {
    let (result, _) = run_program("int main() { return 0 }");
    assert!(matches!(result.unwrap_err(), PscalError::Parse(_)));
}

#[test]
fn semantic_errors_surface_before_execution() {
    let (result, _) = run_program("int main() { return missing_var; }");
    let err = result.unwrap_err();
    assert!(matches!(err, PscalError::Semantic(_)));
    assert!(err.to_string().contains("missing_var"));
}

// ── Program arguments ─────────────────────────────────────────────────────────

#[test]
fn paramcount_and_paramstr_expose_arguments() {
    let (result, out) = run_program_with_args(
        "int main() { printf(\"%d %s %s\\n\", paramcount(), paramstr(1), paramstr(2)); return 0; }",
        vec!["alpha".into(), "beta".into()],
    );
    assert_eq!(result.unwrap(), 0);
    assert_eq!(out, "2 alpha beta\n");
}

// ── Imports ───────────────────────────────────────────────────────────────────

#[test]
fn imports_splice_declarations_and_record_deps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lib = dir.path().join("mathlib.cl");
    std::fs::write(&lib, "int triple(int x) { return x * 3; }\n").unwrap();
    let main = dir.path().join("prog.cl");
    std::fs::write(
        &main,
        "import \"mathlib.cl\";\nint main() { printf(\"%d\\n\", triple(4)); return 0; }\n",
    )
    .unwrap();

    let capture = CaptureBuffer::new();
    let result = run_source(&main, Vec::new(), &options(), Some(Box::new(capture.clone())));
    assert_eq!(result.unwrap(), 0);
    assert_eq!(capture.contents(), "12\n");

    let compiled = pscal::frontend::compile_source(&main, &options()).unwrap();
    assert_eq!(compiled.deps.len(), 1);
    assert!(compiled.deps[0].path.ends_with("mathlib.cl"));
}

#[test]
fn preprocessor_selects_defined_branches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("prog.cl");
    std::fs::write(
        &path,
        "int main() {\n#ifdef FANCY\n  printf(\"fancy\\n\");\n#else\n  printf(\"plain\\n\");\n#endif\n  return 0;\n}\n",
    )
    .unwrap();

    let capture = CaptureBuffer::new();
    let result = run_source(&path, Vec::new(), &options(), Some(Box::new(capture.clone())));
    assert_eq!(result.unwrap(), 0);
    assert_eq!(capture.contents(), "plain\n");

    let mut fancy = options();
    fancy.defines = vec!["FANCY".into()];
    let capture = CaptureBuffer::new();
    let result = run_source(&path, Vec::new(), &fancy, Some(Box::new(capture.clone())));
    assert_eq!(result.unwrap(), 0);
    assert_eq!(capture.contents(), "fancy\n");
}

// ── Threads ───────────────────────────────────────────────────────────────────

#[test]
fn spawn_opcode_runs_a_procedure_and_join_returns_its_value() {
    let out = run_ok(
        "int tick() { return 5; }\nint main() {\n  long h;\n  h = spawn tick;\n  printf(\"%d\\n\", join(h));\n  return 0;\n}",
    );
    assert_eq!(out, "5\n");
}

#[test]
fn spawned_builtin_cancels_cooperatively() {
    let out = run_ok(
        "int main() {\n  long h;\n  h = thread_spawn_named(\"compute\", \"w\", 4000000000);\n  printf(\"ok\\n\");\n  thread_cancel(h);\n  printf(\"%s\\n\", join(h));\n  return 0;\n}",
    );
    assert_eq!(out, "ok\ncancelled\n");
}

#[test]
fn pool_submission_is_fifo_and_joinable() {
    let out = run_ok(
        "int main() {\n  long a; long b;\n  a = thread_pool_submit(\"compute\", 1000);\n  b = thread_pool_submit(\"compute\", 1000);\n  join(a);\n  join(b);\n  printf(\"done\\n\");\n  return 0;\n}",
    );
    assert_eq!(out, "done\n");
}

#[test]
fn thread_status_reports_and_drops_handles() {
    let out = run_ok(
        "int main() {\n  long h;\n  h = thread_spawn_named(\"compute\", \"s\", 1000);\n  join(h);\n  printf(\"%s\\n\", thread_get_status(h, true));\n  return 0;\n}",
    );
    assert_eq!(out, "done\n");
}

// ── Dump surfaces ─────────────────────────────────────────────────────────────

#[test]
fn dump_bytecode_only_skips_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("prog.cl");
    std::fs::write(&path, "int main() { printf(\"x\\n\"); return 0; }").unwrap();
    let mut opts = options();
    opts.dump_bytecode_only = true;
    let capture = CaptureBuffer::new();
    let result = run_source(&path, Vec::new(), &opts, Some(Box::new(capture.clone())));
    assert_eq!(result.unwrap(), 0);
    // Nothing executed, so the program's own output is empty.
    assert_eq!(capture.contents(), "");
}

#[test]
fn capture_buffer_is_plumbed_through() {
    // Sanity check of the capture helper itself.
    let mut buffer = CaptureBuffer::new();
    buffer.write_all(b"abc").unwrap();
    assert_eq!(buffer.contents(), "abc");
}

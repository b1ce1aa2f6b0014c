/// Bytecode cache properties, exercised through the real frontend pipeline.
/// This file runs as its own process, so it owns the HOME environment
/// variable and points it at a scratch directory for the duration.

use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use pscal::frontend::{compile_source, run_source, Options};
use pscal::vm::CaptureBuffer;

static SCRATCH_HOME: Lazy<PathBuf> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("scratch home").into_path();
    std::env::set_var("HOME", &dir);
    dir
});

fn options() -> Options {
    let _ = &*SCRATCH_HOME;
    Options::default()
}

fn write_program(name: &str, src: &str) -> PathBuf {
    let dir = SCRATCH_HOME.join("work");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, src).unwrap();
    path
}

fn run_captured(path: &PathBuf) -> (i32, String) {
    let capture = CaptureBuffer::new();
    let code = run_source(path, Vec::new(), &options(), Some(Box::new(capture.clone())))
        .expect("program should succeed");
    (code, capture.contents())
}

#[test]
fn second_run_loads_the_cached_chunk_and_prints_the_same_output() {
    let path = write_program(
        "cached.cl",
        "int main() { printf(\"%d\\n\", 6 * 7); return 0; }",
    );

    let first = compile_source(&path, &options()).unwrap();
    assert!(!first.from_cache);
    let (code, out) = run_captured(&path);
    assert_eq!(code, 0);
    assert_eq!(out, "42\n");

    let second = compile_source(&path, &options()).unwrap();
    assert!(second.from_cache);
    assert_eq!(second.chunk.code, first.chunk.code);
    assert_eq!(second.chunk.lines, first.chunk.lines);
    assert_eq!(second.chunk.constants, first.chunk.constants);

    let (code, out) = run_captured(&path);
    assert_eq!(code, 0);
    assert_eq!(out, "42\n");
}

#[test]
fn editing_the_source_invalidates_the_cache() {
    let path = write_program(
        "edited.cl",
        "int main() { printf(\"%d\\n\", 1); return 0; }",
    );

    let (_, out) = run_captured(&path);
    assert_eq!(out, "1\n");
    assert!(compile_source(&path, &options()).unwrap().from_cache);

    sleep(Duration::from_millis(20));
    std::fs::write(&path, "int main() { printf(\"%d\\n\", 2); return 0; }").unwrap();

    let recompiled = compile_source(&path, &options()).unwrap();
    assert!(!recompiled.from_cache);
    let (_, out) = run_captured(&path);
    assert_eq!(out, "2\n");
}

#[test]
fn editing_an_import_invalidates_the_cache() {
    let lib = write_program("unit.cl", "int base() { return 10; }\n");
    let path = write_program(
        "uses_unit.cl",
        "import \"unit.cl\";\nint main() { printf(\"%d\\n\", base() + 1); return 0; }\n",
    );

    let (_, out) = run_captured(&path);
    assert_eq!(out, "11\n");
    assert!(compile_source(&path, &options()).unwrap().from_cache);

    sleep(Duration::from_millis(20));
    std::fs::write(&lib, "int base() { return 20; }\n").unwrap();

    let recompiled = compile_source(&path, &options()).unwrap();
    assert!(!recompiled.from_cache);
    let (_, out) = run_captured(&path);
    assert_eq!(out, "21\n");
}

#[test]
fn no_cache_flag_bypasses_both_load_and_save() {
    let path = write_program(
        "uncached.cl",
        "int main() { printf(\"%d\\n\", 3); return 0; }",
    );
    let mut opts = options();
    opts.no_cache = true;
    let first = compile_source(&path, &opts).unwrap();
    assert!(!first.from_cache);
    let second = compile_source(&path, &opts).unwrap();
    assert!(!second.from_cache);
}

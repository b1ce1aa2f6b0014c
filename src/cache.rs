/// Persistent bytecode cache.
///
/// Key: FNV-1a hash of the absolute source path, file placed under
/// `$HOME/.pscal_cache/<hash>.bc`. The value is the versioned .pbc blob:
/// magic, format version, compiler id, dependency descriptor, code, line
/// map, constants. A load succeeds only when the header matches, the
/// dependency descriptor matches in length and content, and the cache file
/// is at least as new as the source, every dependency and the frontend
/// binary. Writes go through a temp file and a rename, so two racing
/// processes leave the last complete write; a torn read shows up as a
/// version mismatch and falls through to recompilation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::bytecode::{parse_pbc, write_pbc, Chunk, Dependency};
use crate::errors::CacheError;

const CACHE_DIR: &str = ".pscal_cache";

// ---------------------------------------------------------------------------
// Paths and keys
// ---------------------------------------------------------------------------

fn fnv1a(path: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in path.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// `$HOME` first, `dirs` as the fallback.
fn home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    dirs::home_dir()
}

pub fn default_cache_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(CACHE_DIR))
}

pub fn cache_path_in(dir: &Path, source_path: &Path) -> PathBuf {
    let absolute = source_path
        .canonicalize()
        .unwrap_or_else(|_| source_path.to_path_buf());
    dir.join(format!("{}.bc", fnv1a(&absolute.display().to_string())))
}

/// Modification time in nanoseconds since the epoch; 0 for missing files.
pub fn mtime_of(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Build the dependency descriptor for a resolved import list.
pub fn describe_deps(paths: &[PathBuf]) -> Vec<Dependency> {
    paths
        .iter()
        .map(|p| Dependency { path: p.display().to_string(), mtime: mtime_of(p) })
        .collect()
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load(
    source_path: &Path,
    compiler_id: &str,
    frontend_path: Option<&Path>,
    deps: &[Dependency],
) -> Result<Chunk, CacheError> {
    let dir = default_cache_dir()
        .ok_or_else(|| CacheError::Io { message: "no home directory".into() })?;
    load_from_dir(&dir, source_path, compiler_id, frontend_path, deps)
}

pub fn load_from_dir(
    dir: &Path,
    source_path: &Path,
    compiler_id: &str,
    frontend_path: Option<&Path>,
    deps: &[Dependency],
) -> Result<Chunk, CacheError> {
    let cache_path = cache_path_in(dir, source_path);
    if !cache_path.exists() {
        return Err(CacheError::Io { message: "no cache file".into() });
    }

    let cache_mtime = mtime_of(&cache_path);
    let mut newest_input = mtime_of(source_path);
    for dep in deps {
        newest_input = newest_input.max(dep.mtime);
    }
    if let Some(fe) = frontend_path {
        newest_input = newest_input.max(mtime_of(fe));
    }
    if cache_mtime < newest_input {
        return Err(CacheError::Stale);
    }

    let bytes = fs::read(&cache_path).map_err(|e| CacheError::Io { message: e.to_string() })?;
    let file = parse_pbc(&bytes)?;
    if file.compiler_id != compiler_id {
        return Err(CacheError::CompilerMismatch { found: file.compiler_id });
    }
    if file.deps.len() != deps.len() {
        return Err(CacheError::DependencyMismatch);
    }
    for (stored, current) in file.deps.iter().zip(deps) {
        if stored.path != current.path {
            return Err(CacheError::DependencyMismatch);
        }
    }
    Ok(file.chunk)
}

/// Returns false when the chunk holds constants the format cannot carry; the
/// chunk stays uncacheable and nothing is written.
pub fn save(
    source_path: &Path,
    compiler_id: &str,
    deps: &[Dependency],
    chunk: &Chunk,
) -> Result<bool, CacheError> {
    let dir = default_cache_dir()
        .ok_or_else(|| CacheError::Io { message: "no home directory".into() })?;
    save_to_dir(&dir, source_path, compiler_id, deps, chunk)
}

pub fn save_to_dir(
    dir: &Path,
    source_path: &Path,
    compiler_id: &str,
    deps: &[Dependency],
    chunk: &Chunk,
) -> Result<bool, CacheError> {
    let bytes = match write_pbc(chunk, compiler_id, deps) {
        Ok(bytes) => bytes,
        Err(CacheError::Unserializable { .. }) => return Ok(false),
        Err(other) => return Err(other),
    };

    fs::create_dir_all(dir).map_err(|e| CacheError::Io { message: e.to_string() })?;
    let cache_path = cache_path_in(dir, source_path);
    let tmp_path = cache_path.with_extension(format!("tmp{}", std::process::id()));
    fs::write(&tmp_path, &bytes).map_err(|e| CacheError::Io { message: e.to_string() })?;
    fs::rename(&tmp_path, &cache_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        CacheError::Io { message: e.to_string() }
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;
    use crate::value::Value;
    use std::thread::sleep;
    use std::time::Duration;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int64(5)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(idx, 1);
        chunk.add_constant(Value::Str("greeting".into()));
        chunk.write_op(Op::Halt, 1);
        chunk
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        fs::write(&source, "int main() { return 0; }").unwrap();
        let cache_dir = tmp.path().join("cache");

        let chunk = sample_chunk();
        assert!(save_to_dir(&cache_dir, &source, "clike", &[], &chunk).unwrap());
        let loaded = load_from_dir(&cache_dir, &source, "clike", None, &[]).unwrap();
        assert_eq!(loaded.code, chunk.code);
        assert_eq!(loaded.lines, chunk.lines);
        assert_eq!(loaded.constants, chunk.constants);
    }

    #[test]
    fn touching_the_source_forces_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        fs::write(&source, "v1").unwrap();
        let cache_dir = tmp.path().join("cache");

        save_to_dir(&cache_dir, &source, "clike", &[], &sample_chunk()).unwrap();
        assert!(load_from_dir(&cache_dir, &source, "clike", None, &[]).is_ok());

        sleep(Duration::from_millis(20));
        fs::write(&source, "v2").unwrap();
        assert!(matches!(
            load_from_dir(&cache_dir, &source, "clike", None, &[]),
            Err(CacheError::Stale)
        ));
    }

    #[test]
    fn touching_a_dependency_forces_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        let unit = tmp.path().join("unit.cl");
        fs::write(&source, "main").unwrap();
        fs::write(&unit, "lib").unwrap();
        let cache_dir = tmp.path().join("cache");

        let deps = describe_deps(&[unit.clone()]);
        save_to_dir(&cache_dir, &source, "clike", &deps, &sample_chunk()).unwrap();
        assert!(load_from_dir(&cache_dir, &source, "clike", None, &deps).is_ok());

        sleep(Duration::from_millis(20));
        fs::write(&unit, "lib v2").unwrap();
        let fresh_deps = describe_deps(&[unit]);
        assert!(matches!(
            load_from_dir(&cache_dir, &source, "clike", None, &fresh_deps),
            Err(CacheError::Stale)
        ));
    }

    #[test]
    fn compiler_id_mismatch_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        fs::write(&source, "main").unwrap();
        let cache_dir = tmp.path().join("cache");

        save_to_dir(&cache_dir, &source, "clike", &[], &sample_chunk()).unwrap();
        assert!(matches!(
            load_from_dir(&cache_dir, &source, "pascal", None, &[]),
            Err(CacheError::CompilerMismatch { .. })
        ));
    }

    #[test]
    fn dependency_list_shape_must_match() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        let unit = tmp.path().join("unit.cl");
        fs::write(&source, "main").unwrap();
        fs::write(&unit, "lib").unwrap();
        let cache_dir = tmp.path().join("cache");

        save_to_dir(&cache_dir, &source, "clike", &[], &sample_chunk()).unwrap();
        let deps = describe_deps(&[unit]);
        assert!(matches!(
            load_from_dir(&cache_dir, &source, "clike", None, &deps),
            Err(CacheError::DependencyMismatch)
        ));
    }

    #[test]
    fn unserializable_constants_skip_the_write() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("prog.cl");
        fs::write(&source, "main").unwrap();
        let cache_dir = tmp.path().join("cache");

        let mut chunk = Chunk::new();
        chunk.constants.push(Value::Record(vec![]));
        assert!(!save_to_dir(&cache_dir, &source, "clike", &[], &chunk).unwrap());
        assert!(!cache_path_in(&cache_dir, &source).exists());
    }

    #[test]
    fn distinct_sources_get_distinct_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.cl");
        let b = tmp.path().join("b.cl");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        assert_ne!(cache_path_in(tmp.path(), &a), cache_path_in(tmp.path(), &b));
    }
}

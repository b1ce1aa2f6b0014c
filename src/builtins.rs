/// Builtin registry: process-wide, case-insensitive name to host function.
///
/// Every CALL_BUILTIN the VM executes resolves here; an unknown name raises
/// a NameError carrying the name and arity. Registration happens behind
/// one-time initializers and is idempotent, so frontends can call the
/// register functions as often as they like. Each entry carries a kind tag
/// so frontends can reject a function call in statement position and the
/// other way around, and a thread-safety flag that acts as the allow-list
/// for the worker builtins.
///
/// Name rewriting: frontends install alias pairs (the clike frontend maps
/// strlen/itoa/exit/remove/toupper onto the canonical names) and resolve
/// them during semantic analysis via `canonical_name`.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::errors::RuntimeError;
use crate::threads;
use crate::value::{ArrayValue, Value, VarType};
use crate::vm::Vm;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Procedure,
    Function,
}

pub type BuiltinFn = fn(&mut Vm, &mut [Value]) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub kind: BuiltinKind,
    /// Allow-listed for execution on a worker thread.
    pub thread_safe: bool,
    pub handler: BuiltinFn,
}

static REGISTRY: Lazy<RwLock<HashMap<String, Builtin>>> = Lazy::new(|| RwLock::new(HashMap::new()));
static ALIASES: Lazy<RwLock<HashMap<String, String>>> = Lazy::new(|| RwLock::new(HashMap::new()));

static CORE_INIT: Once = Once::new();
static EXT_INIT: Once = Once::new();
static CLIKE_ALIASES_INIT: Once = Once::new();

pub fn register_builtin(builtin: Builtin) {
    REGISTRY.write().entry(builtin.name.to_lowercase()).or_insert(builtin);
}

pub fn lookup(name: &str) -> Option<Builtin> {
    REGISTRY.read().get(&name.to_lowercase()).cloned()
}

pub fn register_alias(from: &str, to: &str) {
    ALIASES.write().entry(from.to_lowercase()).or_insert_with(|| to.to_lowercase());
}

/// Resolve an alias installed by a frontend; unknown names pass through.
pub fn canonical_name(name: &str) -> String {
    let key = name.to_lowercase();
    ALIASES.read().get(&key).cloned().unwrap_or(key)
}

pub fn install_clike_aliases() {
    CLIKE_ALIASES_INIT.call_once(|| {
        register_alias("strlen", "length");
        register_alias("itoa", "str");
        register_alias("exit", "halt");
        register_alias("remove", "erase");
        register_alias("toupper", "upcase");
    });
}

/// Names registered by `register_extended_builtins`, for --dump-ext-builtins.
pub fn extended_builtin_names() -> Vec<&'static str> {
    vec!["compute", "getcurrentdir", "realtimeclock", "reversestring", "swap"]
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arity_error(name: &str, expected: u8, found: usize) -> RuntimeError {
    RuntimeError::ArityMismatch { name: name.into(), expected, found: found as u8, line: 0 }
}

fn bad(name: &str, message: impl Into<String>) -> RuntimeError {
    RuntimeError::BadArgument { name: name.into(), message: message.into(), line: 0 }
}

fn want(args: &[Value], n: u8, name: &str) -> Result<(), RuntimeError> {
    if args.len() != n as usize {
        return Err(arity_error(name, n, args.len()));
    }
    Ok(())
}

fn str_arg(args: &[Value], i: usize, name: &str) -> Result<String, RuntimeError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(Value::Char(c)) => Ok(c.to_string()),
        Some(other) => Err(bad(name, format!("argument {} must be a string, got {}", i + 1, other.type_name()))),
        None => Err(bad(name, format!("missing argument {}", i + 1))),
    }
}

fn int_arg(args: &[Value], i: usize, name: &str) -> Result<i64, RuntimeError> {
    args.get(i)
        .ok_or_else(|| bad(name, format!("missing argument {}", i + 1)))?
        .as_i64()
}

// ---------------------------------------------------------------------------
// Core builtins
// ---------------------------------------------------------------------------

fn builtin_printf(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(arity_error("printf", 1, 0));
    }
    let fmt = str_arg(args, 0, "printf")?;
    let mut out = String::with_capacity(fmt.len());
    let mut next = 1usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('d') | Some('i') => {
                let v = args.get(next).ok_or_else(|| bad("printf", "too few arguments for format"))?;
                out.push_str(&v.as_i64()?.to_string());
                next += 1;
            }
            Some('f') => {
                let v = args.get(next).ok_or_else(|| bad("printf", "too few arguments for format"))?;
                out.push_str(&format!("{:.6}", v.as_f64()?));
                next += 1;
            }
            Some('s') => {
                let v = args.get(next).ok_or_else(|| bad("printf", "too few arguments for format"))?;
                out.push_str(&v.display());
                next += 1;
            }
            Some('c') => {
                let v = args.get(next).ok_or_else(|| bad("printf", "too few arguments for format"))?;
                match v {
                    Value::Char(c) => out.push(*c),
                    other => {
                        let ord = other.as_i64()?;
                        if let Some(c) = u32::try_from(ord).ok().and_then(char::from_u32) {
                            out.push(c);
                        }
                    }
                }
                next += 1;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    vm.write_out(&out);
    Ok(Value::Int64(0))
}

/// Reads one line and stores its whitespace-separated fields through the
/// pointer arguments, converting each to the target slot's current type.
fn builtin_readln(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| RuntimeError::Io { message: e.to_string(), line: 0 })?;
    let line = line.trim_end_matches(['\n', '\r']);

    if args.len() == 1 {
        if let Value::Pointer(cell) = &args[0] {
            let mut slot = cell.lock();
            if matches!(&*slot, Value::Str(_)) {
                *slot = Value::Str(line.to_string());
                return Ok(Value::Int64(0));
            }
        }
    }

    let mut fields = line.split_whitespace();
    for (i, arg) in args.iter().enumerate() {
        let cell = match arg {
            Value::Pointer(cell) => cell,
            other => {
                return Err(bad(
                    "readln",
                    format!("argument {} must be a VAR target, got {}", i + 1, other.type_name()),
                ))
            }
        };
        let field = match fields.next() {
            Some(f) => f,
            None => break,
        };
        let mut slot = cell.lock();
        let target_type = slot.var_type();
        let parsed = match target_type {
            t if t.is_integer() => field
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| bad("readln", format!("'{}' is not an integer", field)))?
                .convert_to(t)?,
            t if t.is_real() => field
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| bad("readln", format!("'{}' is not a number", field)))?,
            VarType::Char => Value::Char(field.chars().next().unwrap_or('\0')),
            _ => Value::Str(field.to_string()),
        };
        *slot = parsed;
    }
    Ok(Value::Int64(0))
}

fn builtin_halt(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    let code = match args.len() {
        0 => 0,
        1 => int_arg(args, 0, "halt")? as i32,
        n => return Err(arity_error("halt", 1, n)),
    };
    vm.request_exit(code);
    Ok(Value::Nil)
}

fn builtin_length(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "length")?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count() as i64,
        Value::Char(_) => 1,
        Value::Array(arr) => arr.elements.len() as i64,
        Value::MemoryStream(bytes) => bytes.len() as i64,
        other => return Err(bad("length", format!("cannot take length of {}", other.type_name()))),
    };
    Ok(Value::Int64(len))
}

fn builtin_str(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "str")?;
    Ok(Value::Str(args[0].display()))
}

fn builtin_upcase(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "upcase")?;
    Ok(match &args[0] {
        Value::Char(c) => Value::Char(c.to_ascii_uppercase()),
        other => Value::Str(other.display().to_uppercase()),
    })
}

fn builtin_lowcase(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "lowcase")?;
    Ok(match &args[0] {
        Value::Char(c) => Value::Char(c.to_ascii_lowercase()),
        other => Value::Str(other.display().to_lowercase()),
    })
}

fn builtin_erase(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "erase")?;
    let path = str_arg(args, 0, "erase")?;
    std::fs::remove_file(&path)
        .map_err(|e| RuntimeError::Io { message: format!("erase '{}': {}", path, e), line: 0 })?;
    Ok(Value::Int64(0))
}

fn builtin_abs(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "abs")?;
    Ok(if args[0].is_real() {
        Value::Real(args[0].as_f64()?.abs())
    } else {
        Value::Int64(args[0].as_i64()?.abs())
    })
}

fn builtin_sqrt(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "sqrt")?;
    let v = args[0].as_f64()?;
    if v < 0.0 {
        return Err(bad("sqrt", "argument must not be negative"));
    }
    Ok(Value::Real(v.sqrt()))
}

fn builtin_ord(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "ord")?;
    Ok(Value::Int64(args[0].as_i64()?))
}

fn builtin_chr(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "chr")?;
    let ord = int_arg(args, 0, "chr")?;
    let c = u32::try_from(ord)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| bad("chr", format!("{} is not a character code", ord)))?;
    Ok(Value::Char(c))
}

fn builtin_copy(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 3, "copy")?;
    let s = str_arg(args, 0, "copy")?;
    let start = int_arg(args, 1, "copy")?.max(1) as usize;
    let count = int_arg(args, 2, "copy")?.max(0) as usize;
    let out: String = s.chars().skip(start - 1).take(count).collect();
    Ok(Value::Str(out))
}

fn builtin_pos(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 2, "pos")?;
    let needle = str_arg(args, 0, "pos")?;
    let hay = str_arg(args, 1, "pos")?;
    let at = hay
        .find(&needle)
        .map(|byte_at| hay[..byte_at].chars().count() as i64 + 1)
        .unwrap_or(0);
    Ok(Value::Int64(at))
}

/// Blocking sleep that stays responsive to cancellation.
fn builtin_delay(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "delay")?;
    let mut remaining = int_arg(args, 0, "delay")?.max(0) as u64;
    while remaining > 0 {
        if vm.abort_requested.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RuntimeError::Aborted { line: 0 });
        }
        let slice = remaining.min(10);
        std::thread::sleep(std::time::Duration::from_millis(slice));
        remaining -= slice;
    }
    Ok(Value::Int64(0))
}

fn builtin_paramcount(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 0, "paramcount")?;
    Ok(Value::Int64(vm.args.len() as i64))
}

fn builtin_paramstr(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "paramstr")?;
    let i = int_arg(args, 0, "paramstr")?;
    if i == 0 {
        return Ok(Value::Str(std::env::args().next().unwrap_or_default()));
    }
    let arg = vm
        .args
        .get((i - 1) as usize)
        .cloned()
        .ok_or_else(|| bad("paramstr", format!("no parameter {}", i)))?;
    Ok(Value::Str(arg))
}

/// Array construction for declared locals: (low, high, element type tag).
fn builtin_mkarray(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 3, "__mkarray")?;
    let low = int_arg(args, 0, "__mkarray")?;
    let high = int_arg(args, 1, "__mkarray")?;
    let tag = int_arg(args, 2, "__mkarray")? as u8;
    let elem = VarType::from_tag(tag).unwrap_or(VarType::Int64);
    let arr = ArrayValue::new(vec![(low, high)], elem)
        .ok_or_else(|| bad("__mkarray", format!("invalid bounds {}..{}", low, high)))?;
    Ok(Value::Array(Box::new(arr)))
}

// ── Thread family ───────────────────────────────────────────────────────────

fn builtin_thread_spawn_named(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    if args.len() < 2 {
        return Err(arity_error("thread_spawn_named", 2, args.len()));
    }
    let builtin = str_arg(args, 0, "thread_spawn_named")?;
    let name = str_arg(args, 1, "thread_spawn_named")?;
    let rest: Vec<Value> = args[2..].to_vec();
    let handle = threads::spawn_named(vm, &builtin, &name, rest)?;
    Ok(Value::Int64(handle))
}

fn builtin_thread_pool_submit(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(arity_error("thread_pool_submit", 1, 0));
    }
    let builtin = str_arg(args, 0, "thread_pool_submit")?;
    let rest: Vec<Value> = args[1..].to_vec();
    let handle = threads::pool_submit(vm, &builtin, rest)?;
    Ok(Value::Int64(handle))
}

fn builtin_thread_join(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "thread_join")?;
    threads::join(int_arg(args, 0, "thread_join")?)
}

fn builtin_thread_cancel(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "thread_cancel")?;
    Ok(Value::Boolean(threads::cancel(int_arg(args, 0, "thread_cancel")?)?))
}

fn builtin_thread_pause(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "thread_pause")?;
    Ok(Value::Boolean(threads::pause(int_arg(args, 0, "thread_pause")?)?))
}

fn builtin_thread_resume(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "thread_resume")?;
    Ok(Value::Boolean(threads::resume(int_arg(args, 0, "thread_resume")?)?))
}

fn builtin_thread_get_status(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    let (handle, drop_handle) = match args.len() {
        1 => (int_arg(args, 0, "thread_get_status")?, false),
        2 => (
            int_arg(args, 0, "thread_get_status")?,
            args[1].as_bool().unwrap_or(false),
        ),
        n => return Err(arity_error("thread_get_status", 1, n)),
    };
    Ok(Value::Str(threads::get_status(handle, drop_handle)?))
}

fn builtin_thread_stats(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 0, "thread_stats")?;
    Ok(Value::Str(threads::stats()))
}

// ── Shell lowering dispatch ─────────────────────────────────────────────────
//
// The shell frontend compiles commands and control flow into calls against
// these names. Only the dispatch and the basic execution primitive are part
// of the core; the combinators operate over already-computed exit statuses.

fn builtin_shell_exec(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(arity_error("__shell_exec", 1, 0));
    }
    let program = str_arg(args, 0, "__shell_exec")?;
    let mut cmd = std::process::Command::new(&program);
    for (i, _) in args.iter().enumerate().skip(1) {
        cmd.arg(str_arg(args, i, "__shell_exec")?);
    }
    let status = cmd
        .status()
        .map_err(|e| RuntimeError::Io { message: format!("exec '{}': {}", program, e), line: 0 })?;
    Ok(Value::Int64(status.code().unwrap_or(-1) as i64))
}

fn builtin_shell_and(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 2, "__shell_and")?;
    let a = int_arg(args, 0, "__shell_and")?;
    Ok(Value::Int64(if a == 0 { int_arg(args, 1, "__shell_and")? } else { a }))
}

fn builtin_shell_or(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 2, "__shell_or")?;
    let a = int_arg(args, 0, "__shell_or")?;
    Ok(Value::Int64(if a != 0 { int_arg(args, 1, "__shell_or")? } else { 0 }))
}

fn builtin_shell_passthrough(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    Ok(args.last().cloned().unwrap_or(Value::Int64(0)))
}

// ── Extended builtins (--dump-ext-builtins) ─────────────────────────────────

/// Abortable busy computation for exercising the worker model.
fn builtin_compute(vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "compute")?;
    let n = int_arg(args, 0, "compute")?.max(0);
    let mut acc: i64 = 0;
    for k in 0..n {
        if k % 1024 == 0 {
            if vm.abort_requested.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RuntimeError::Aborted { line: 0 });
            }
            while vm.paused.load(std::sync::atomic::Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(1));
                if vm.abort_requested.load(std::sync::atomic::Ordering::SeqCst) {
                    return Err(RuntimeError::Aborted { line: 0 });
                }
            }
        }
        acc = acc.wrapping_add(k ^ (k << 1));
    }
    Ok(Value::Int64(acc))
}

fn builtin_reversestring(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 1, "reversestring")?;
    let s = str_arg(args, 0, "reversestring")?;
    Ok(Value::Str(s.chars().rev().collect()))
}

fn builtin_getcurrentdir(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 0, "getcurrentdir")?;
    let dir = std::env::current_dir()
        .map_err(|e| RuntimeError::Io { message: e.to_string(), line: 0 })?;
    Ok(Value::Str(dir.display().to_string()))
}

fn builtin_realtimeclock(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 0, "realtimeclock")?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RuntimeError::Io { message: e.to_string(), line: 0 })?;
    Ok(Value::Real(now.as_secs_f64()))
}

/// Exchanges the targets of two VAR parameters.
fn builtin_swap(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, RuntimeError> {
    want(args, 2, "swap")?;
    match (&args[0], &args[1]) {
        (Value::Pointer(a), Value::Pointer(b)) => {
            if !std::sync::Arc::ptr_eq(a, b) {
                let mut ga = a.lock();
                let mut gb = b.lock();
                std::mem::swap(&mut *ga, &mut *gb);
            }
            Ok(Value::Int64(0))
        }
        _ => Err(bad("swap", "both arguments must be VAR targets")),
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub fn register_core_builtins() {
    CORE_INIT.call_once(|| {
        use BuiltinKind::{Function, Procedure};
        let entries: &[(&'static str, BuiltinKind, bool, BuiltinFn)] = &[
            ("printf", Procedure, false, builtin_printf),
            ("readln", Procedure, false, builtin_readln),
            ("halt", Procedure, false, builtin_halt),
            ("erase", Procedure, false, builtin_erase),
            ("delay", Procedure, true, builtin_delay),
            ("length", Function, true, builtin_length),
            ("str", Function, true, builtin_str),
            ("upcase", Function, true, builtin_upcase),
            ("lowcase", Function, true, builtin_lowcase),
            ("abs", Function, true, builtin_abs),
            ("sqrt", Function, true, builtin_sqrt),
            ("ord", Function, true, builtin_ord),
            ("chr", Function, true, builtin_chr),
            ("copy", Function, true, builtin_copy),
            ("pos", Function, true, builtin_pos),
            ("paramcount", Function, false, builtin_paramcount),
            ("paramstr", Function, false, builtin_paramstr),
            ("__mkarray", Function, true, builtin_mkarray),
            ("thread_spawn_named", Function, false, builtin_thread_spawn_named),
            ("thread_pool_submit", Function, false, builtin_thread_pool_submit),
            ("thread_join", Function, false, builtin_thread_join),
            ("thread_cancel", Procedure, false, builtin_thread_cancel),
            ("thread_pause", Procedure, false, builtin_thread_pause),
            ("thread_resume", Procedure, false, builtin_thread_resume),
            ("thread_get_status", Function, false, builtin_thread_get_status),
            ("thread_stats", Function, false, builtin_thread_stats),
            ("__shell_exec", Function, false, builtin_shell_exec),
            ("__shell_and", Function, false, builtin_shell_and),
            ("__shell_or", Function, false, builtin_shell_or),
            ("__shell_pipeline", Function, false, builtin_shell_passthrough),
            ("__shell_subshell", Function, false, builtin_shell_passthrough),
            ("__shell_loop", Function, false, builtin_shell_passthrough),
            ("__shell_if", Function, false, builtin_shell_passthrough),
            ("__shell_case", Function, false, builtin_shell_passthrough),
            ("__shell_define_function", Function, false, builtin_shell_passthrough),
        ];
        for &(name, kind, thread_safe, handler) in entries {
            register_builtin(Builtin { name, kind, thread_safe, handler });
        }
    });
}

pub fn register_extended_builtins() {
    EXT_INIT.call_once(|| {
        use BuiltinKind::{Function, Procedure};
        let entries: &[(&'static str, BuiltinKind, bool, BuiltinFn)] = &[
            ("compute", Function, true, builtin_compute),
            ("reversestring", Function, true, builtin_reversestring),
            ("getcurrentdir", Function, false, builtin_getcurrentdir),
            ("realtimeclock", Function, true, builtin_realtimeclock),
            ("swap", Procedure, true, builtin_swap),
        ];
        for &(name, kind, thread_safe, handler) in entries {
            register_builtin(Builtin { name, kind, thread_safe, handler });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Chunk;
    use crate::symbols::SymbolTable;
    use crate::vm::CaptureBuffer;
    use std::sync::Arc;

    fn test_vm() -> (Vm, CaptureBuffer) {
        let capture = CaptureBuffer::new();
        let vm = Vm::new(Arc::new(Chunk::new()), Arc::new(SymbolTable::new()))
            .with_output(Box::new(capture.clone()));
        (vm, capture)
    }

    #[test]
    fn registration_is_idempotent() {
        register_core_builtins();
        register_extended_builtins();
        let before = REGISTRY.read().len();
        register_extended_builtins();
        register_core_builtins();
        assert_eq!(REGISTRY.read().len(), before);
        assert!(lookup("LENGTH").is_some());
    }

    #[test]
    fn clike_aliases_canonicalize() {
        register_core_builtins();
        install_clike_aliases();
        assert_eq!(canonical_name("strlen"), "length");
        assert_eq!(canonical_name("ToUpper"), "upcase");
        assert_eq!(canonical_name("exit"), "halt");
        assert_eq!(canonical_name("itoa"), "str");
        assert_eq!(canonical_name("remove"), "erase");
        assert_eq!(canonical_name("unknown_name"), "unknown_name");
    }

    #[test]
    fn printf_formats_c_style() {
        register_core_builtins();
        let (mut vm, capture) = test_vm();
        let mut args = vec![
            Value::string("%d + %s = %d%%\n"),
            Value::Int64(2),
            Value::string("three"),
            Value::Int64(5),
        ];
        builtin_printf(&mut vm, &mut args).unwrap();
        assert_eq!(capture.contents(), "2 + three = 5%\n");
    }

    #[test]
    fn string_builtins_cover_the_pascal_surface() {
        register_core_builtins();
        let (mut vm, _) = test_vm();
        assert_eq!(
            builtin_length(&mut vm, &mut [Value::string("hello")]).unwrap(),
            Value::Int64(5)
        );
        assert_eq!(
            builtin_copy(&mut vm, &mut [Value::string("hello"), Value::Int64(2), Value::Int64(3)])
                .unwrap(),
            Value::string("ell")
        );
        assert_eq!(
            builtin_pos(&mut vm, &mut [Value::string("ll"), Value::string("hello")]).unwrap(),
            Value::Int64(3)
        );
        assert_eq!(
            builtin_upcase(&mut vm, &mut [Value::string("abc")]).unwrap(),
            Value::string("ABC")
        );
        assert_eq!(builtin_chr(&mut vm, &mut [Value::Int64(65)]).unwrap(), Value::Char('A'));
        assert_eq!(builtin_ord(&mut vm, &mut [Value::Char('A')]).unwrap(), Value::Int64(65));
    }

    #[test]
    fn halt_sets_the_exit_code() {
        let (mut vm, _) = test_vm();
        builtin_halt(&mut vm, &mut [Value::Int64(3)]).unwrap();
        assert!(vm.exit_requested.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn swap_exchanges_pointer_targets() {
        let (mut vm, _) = test_vm();
        let a = Value::pointer_to(Value::Int64(1));
        let b = Value::pointer_to(Value::Int64(2));
        builtin_swap(&mut vm, &mut [a.clone(), b.clone()]).unwrap();
        if let (Value::Pointer(a), Value::Pointer(b)) = (&a, &b) {
            assert_eq!(*a.lock(), Value::Int64(2));
            assert_eq!(*b.lock(), Value::Int64(1));
        }
    }

    #[test]
    fn mkarray_builds_bounded_arrays() {
        let (mut vm, _) = test_vm();
        let v = builtin_mkarray(
            &mut vm,
            &mut [Value::Int64(0), Value::Int64(9), Value::Int64(VarType::Int64.tag() as i64)],
        )
        .unwrap();
        match v {
            Value::Array(arr) => {
                assert_eq!(arr.elements.len(), 10);
                assert_eq!(arr.dims, vec![(0, 9)]);
            }
            other => panic!("expected array, got {}", other.type_name()),
        }
    }

    #[test]
    fn arity_errors_name_the_builtin() {
        let (mut vm, _) = test_vm();
        let err = builtin_length(&mut vm, &mut []).unwrap_err();
        assert!(err.to_string().contains("length"));
        assert_eq!(err.kind(), "Argument error");
    }
}

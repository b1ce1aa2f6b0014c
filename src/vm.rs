/// Register-less stack virtual machine.
///
/// EXECUTION MODEL
/// ───────────────
/// * value stack grows upward, call frames on their own Vec
/// * a frame's base points at its first argument; locals follow the
///   arguments in the same region, so GET_LOCAL(i) is stack[base + i]
/// * RETURN moves the optional value above the locals region to the caller
///   stack; a frame that has no value above its locals returns nil, which
///   keeps call statements balanced with a single POP
/// * a slot primed with INIT_LOCAL_POINTER holds its value boxed in a shared
///   cell; GET_LOCAL and SET_LOCAL read and write through the cell and
///   GET_LOCAL_ADDRESS clones the cell, which is the whole VAR-parameter
///   story
/// * globals bind lazily by name through the 16-bit name constant, behind a
///   single lock shared with worker threads
/// * the abort and exit flags are polled once per instruction, so
///   cancellation lands at instruction boundaries
///
/// Numeric rules: integers promote to the wider operand, an integer/real mix
/// forces real, DIV on two integers produces a real, INT_DIV and MOD are
/// integer-only, any zero divisor raises an arithmetic error.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::builtins;
use crate::bytecode::{Chunk, Op};
use crate::errors::RuntimeError;
use crate::symbols::SymbolTable;
use crate::threads;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Output sink (tests capture it, the CLI uses stdout)
// ---------------------------------------------------------------------------

/// Clonable in-memory sink for capturing program output in tests.
#[derive(Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn new() -> CaptureBuffer {
        CaptureBuffer::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Call frames
// ---------------------------------------------------------------------------

/// Sentinel return address for the entry frame of a worker running a
/// procedure body directly.
const RETURN_TO_HOST: usize = usize::MAX;

#[derive(Debug)]
struct Frame {
    return_ip: usize,
    base: usize,
    locals_total: usize,
    name: String,
}

// ---------------------------------------------------------------------------
// VM
// ---------------------------------------------------------------------------

pub struct Vm {
    chunk: Arc<Chunk>,
    procedures: Arc<SymbolTable>,
    pub globals: Arc<Mutex<HashMap<String, Value>>>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    ip: usize,
    /// Program arguments exposed through paramcount/paramstr.
    pub args: Vec<String>,
    pub abort_requested: Arc<AtomicBool>,
    pub exit_requested: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
    exit_code: i32,
    trace_head: u32,
    pub verbose: bool,
    term_initialized: bool,
    output: Box<dyn Write + Send>,
}

impl Vm {
    pub fn new(chunk: Arc<Chunk>, procedures: Arc<SymbolTable>) -> Vm {
        Vm {
            chunk,
            procedures,
            globals: Arc::new(Mutex::new(HashMap::new())),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            ip: 0,
            args: Vec::new(),
            abort_requested: Arc::new(AtomicBool::new(false)),
            exit_requested: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            exit_code: 0,
            trace_head: 0,
            verbose: false,
            term_initialized: false,
            output: Box::new(io::stdout()),
        }
    }

    /// Worker clone sharing chunk, procedure table and globals with the
    /// parent but owning its own stack, ip and flags.
    pub fn worker_of(parent: &Vm) -> Vm {
        let mut vm = Vm::new(Arc::clone(&parent.chunk), Arc::clone(&parent.procedures));
        vm.globals = Arc::clone(&parent.globals);
        vm.args = parent.args.clone();
        vm
    }

    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Vm {
        self.output = output;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Vm {
        self.args = args;
        self
    }

    pub fn with_trace_head(mut self, count: u32) -> Vm {
        self.trace_head = count;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Vm {
        self.verbose = verbose;
        self
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn write_out(&mut self, text: &str) {
        let _ = self.output.write_all(text.as_bytes());
    }

    pub fn flush_out(&mut self) {
        let _ = self.output.flush();
    }

    /// Terminal state is claimed lazily on first output.
    fn ensure_terminal(&mut self) {
        if !self.term_initialized {
            self.term_initialized = true;
        }
    }

    /// Forced initialization, driven by PSCAL_INIT_TERM in the bootstrap.
    pub fn init_terminal(&mut self) {
        self.ensure_terminal();
    }

    pub fn request_exit(&mut self, code: i32) {
        self.exit_code = code;
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    fn line(&self) -> i32 {
        self.chunk.line_at(self.ip.saturating_sub(1))
    }

    // ── Stack primitives ────────────────────────────────────────────────────

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| RuntimeError::BadArgument {
            name: "vm".into(),
            message: "value stack underflow".into(),
            line: self.line(),
        })
    }

    fn read_byte(&mut self) -> u8 {
        let b = self.chunk.code[self.ip];
        self.ip += 1;
        b
    }

    fn read_short(&mut self) -> u16 {
        let v = self.chunk.read_short(self.ip);
        self.ip += 2;
        v
    }

    fn name_constant(&self, idx: u16) -> Result<String, RuntimeError> {
        match self.chunk.constants.get(idx as usize) {
            Some(Value::Str(s)) => Ok(s.clone()),
            _ => Err(RuntimeError::BadArgument {
                name: "vm".into(),
                message: format!("constant {} is not a name", idx),
                line: self.line(),
            }),
        }
    }

    // ── Entry points ────────────────────────────────────────────────────────

    /// Run the whole program from the chunk start. Returns the exit code.
    pub fn run(&mut self) -> Result<i32, RuntimeError> {
        self.ip = 0;
        let result = self.dispatch();
        if let Err(err) = &result {
            self.unwind_report(err);
        }
        result
    }

    /// Run a single procedure body at `addr` to completion; used by workers
    /// spawned through the THREAD_SPAWN opcode.
    pub fn run_procedure(&mut self, addr: u16) -> Result<Value, RuntimeError> {
        let locals_total = self
            .procedures
            .iter()
            .find(|s| s.is_defined && s.bytecode_address == addr)
            .map(|s| s.arity as usize + s.locals_count as usize)
            .unwrap_or(0);
        let name = self
            .procedures
            .iter()
            .find(|s| s.is_defined && s.bytecode_address == addr)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("@{}", addr));

        self.frames.push(Frame {
            return_ip: RETURN_TO_HOST,
            base: self.stack.len(),
            locals_total,
            name,
        });
        for _ in 0..locals_total {
            self.push(Value::Nil);
        }
        self.ip = addr as usize;
        self.dispatch()?;
        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    fn unwind_report(&mut self, err: &RuntimeError) {
        if self.verbose && !err.is_abort() {
            for frame in self.frames.iter().rev() {
                eprintln!("  in {} (base={})", frame.name, frame.base);
            }
        }
        self.frames.clear();
        self.stack.clear();
    }

    // ── Dispatch loop ───────────────────────────────────────────────────────

    fn dispatch(&mut self) -> Result<i32, RuntimeError> {
        loop {
            if self.abort_requested.load(Ordering::SeqCst) {
                return Err(RuntimeError::Aborted { line: self.line() });
            }
            if self.exit_requested.load(Ordering::SeqCst) {
                return Ok(self.exit_code);
            }
            while self.paused.load(Ordering::SeqCst) {
                if self.abort_requested.load(Ordering::SeqCst) {
                    return Err(RuntimeError::Aborted { line: self.line() });
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            if self.ip >= self.chunk.code.len() {
                return Ok(self.exit_code);
            }

            if self.trace_head > 0 {
                self.trace_head -= 1;
                let op_name = Op::from_byte(self.chunk.code[self.ip])
                    .map(Op::name)
                    .unwrap_or("<bad>");
                let top = self
                    .stack
                    .last()
                    .map(|v| v.display())
                    .unwrap_or_else(|| "-".into());
                eprintln!(
                    "{:6} {:18} depth={:<4} top={}",
                    self.ip,
                    op_name,
                    self.stack.len(),
                    top
                );
            }

            let byte = self.read_byte();
            let op = Op::from_byte(byte).ok_or_else(|| RuntimeError::BadArgument {
                name: "vm".into(),
                message: format!("illegal opcode {}", byte),
                line: self.line(),
            })?;

            match op {
                Op::Constant => {
                    let idx = self.read_byte() as usize;
                    let v = self.chunk.constants.get(idx).cloned().ok_or_else(|| {
                        RuntimeError::BadArgument {
                            name: "vm".into(),
                            message: format!("constant index {} out of range", idx),
                            line: self.line(),
                        }
                    })?;
                    self.push(v);
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let v = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| RuntimeError::BadArgument {
                            name: "vm".into(),
                            message: "value stack underflow".into(),
                            line: self.line(),
                        })?;
                    self.push(v);
                }

                Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::IntDiv | Op::Mod => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let v = self.arith(op, lhs, rhs)?;
                    self.push(v);
                }
                Op::Negate => {
                    let v = self.pop()?;
                    let out = if v.is_real() {
                        Value::Real(-v.as_f64().map_err(|e| e.with_line(self.line()))?)
                    } else {
                        Value::Int64(-v.as_i64().map_err(|e| e.with_line(self.line()))?)
                    };
                    self.push(out);
                }
                Op::Not => {
                    let v = self.pop()?;
                    let out = match v {
                        Value::Boolean(b) => Value::Boolean(!b),
                        other => Value::Boolean(
                            other.as_i64().map_err(|e| e.with_line(self.line()))? == 0,
                        ),
                    };
                    self.push(out);
                }
                Op::And | Op::Or | Op::Xor => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let v = self.logic(op, lhs, rhs)?;
                    self.push(v);
                }

                Op::Equal | Op::NotEqual => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let eq = lhs == rhs;
                    self.push(Value::Boolean(if op == Op::Equal { eq } else { !eq }));
                }
                Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let ord = lhs.compare(&rhs).map_err(|e| e.with_line(self.line()))?;
                    let v = match op {
                        Op::Less => ord.is_lt(),
                        Op::LessEqual => ord.is_le(),
                        Op::Greater => ord.is_gt(),
                        _ => ord.is_ge(),
                    };
                    self.push(Value::Boolean(v));
                }

                Op::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let at = self.frame_slot(slot)?;
                    let v = match &self.stack[at] {
                        Value::Pointer(cell) => cell.lock().clone(),
                        v => v.clone(),
                    };
                    self.push(v);
                }
                Op::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let at = self.frame_slot(slot)?;
                    let v = self.pop()?;
                    match &self.stack[at] {
                        Value::Pointer(cell) => *cell.lock() = v,
                        _ => self.stack[at] = v,
                    }
                }
                Op::GetLocalAddress => {
                    let slot = self.read_byte() as usize;
                    let at = self.frame_slot(slot)?;
                    // Promote on demand; the codegen normally primes the slot
                    // with INIT_LOCAL_POINTER at function entry.
                    if !matches!(self.stack[at], Value::Pointer(_)) {
                        let current = std::mem::replace(&mut self.stack[at], Value::Nil);
                        self.stack[at] = Value::pointer_to(current);
                    }
                    let ptr = self.stack[at].clone();
                    self.push(ptr);
                }
                Op::InitLocalPointer => {
                    let slot = self.read_byte() as usize;
                    let at = self.frame_slot(slot)?;
                    if !matches!(self.stack[at], Value::Pointer(_)) {
                        let current = std::mem::replace(&mut self.stack[at], Value::Nil);
                        self.stack[at] = Value::pointer_to(current);
                    }
                }

                Op::GetGlobal => {
                    let idx = self.read_short();
                    let name = self.name_constant(idx)?;
                    let v = self.globals.lock().get(&name.to_lowercase()).cloned();
                    match v {
                        Some(v) => self.push(v),
                        None => {
                            return Err(RuntimeError::UndefinedGlobal {
                                name,
                                line: self.line(),
                            })
                        }
                    }
                }
                Op::SetGlobal => {
                    let idx = self.read_short();
                    let name = self.name_constant(idx)?;
                    let v = self.pop()?;
                    self.globals.lock().insert(name.to_lowercase(), v);
                }

                Op::GetField => {
                    let idx = self.read_short();
                    let field = self.name_constant(idx)?;
                    let record = self.pop()?;
                    let v = match &record {
                        Value::Record(fields) => fields
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(&field))
                            .map(|(_, v)| v.clone()),
                        Value::Pointer(cell) => match &*cell.lock() {
                            Value::Record(fields) => fields
                                .iter()
                                .find(|(k, _)| k.eq_ignore_ascii_case(&field))
                                .map(|(_, v)| v.clone()),
                            _ => None,
                        },
                        _ => None,
                    };
                    match v {
                        Some(v) => self.push(v),
                        None => {
                            return Err(RuntimeError::UnknownField {
                                name: field,
                                line: self.line(),
                            })
                        }
                    }
                }
                Op::SetField => {
                    let idx = self.read_short();
                    let field = self.name_constant(idx)?;
                    let value = self.pop()?;
                    let target = self.pop()?;
                    let cell = match target {
                        Value::Pointer(cell) => cell,
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "pointer to record".into(),
                                found: other.type_name().into(),
                                line: self.line(),
                            })
                        }
                    };
                    let mut guard = cell.lock();
                    match &mut *guard {
                        Value::Record(fields) => {
                            match fields.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&field)) {
                                Some((_, slot)) => {
                                    *slot = value.clone();
                                }
                                None => {
                                    return Err(RuntimeError::UnknownField {
                                        name: field,
                                        line: self.line(),
                                    })
                                }
                            }
                        }
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "record".into(),
                                found: other.type_name().into(),
                                line: self.line(),
                            })
                        }
                    }
                    drop(guard);
                    self.push(value);
                }
                Op::GetElement => {
                    let index = self.pop()?.as_i64().map_err(|e| e.with_line(self.line()))?;
                    let array = self.pop()?;
                    let v = self.array_get(&array, index)?;
                    self.push(v);
                }
                Op::SetElement => {
                    let value = self.pop()?;
                    let index = self.pop()?.as_i64().map_err(|e| e.with_line(self.line()))?;
                    let target = self.pop()?;
                    let cell = match target {
                        Value::Pointer(cell) => cell,
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "pointer to array".into(),
                                found: other.type_name().into(),
                                line: self.line(),
                            })
                        }
                    };
                    let mut guard = cell.lock();
                    match &mut *guard {
                        Value::Array(arr) => {
                            let (low, high) = arr.dims[0];
                            let at = arr.flat_index(&[index]).ok_or_else(|| {
                                RuntimeError::IndexOutOfBounds {
                                    index,
                                    low,
                                    high,
                                    line: self.line(),
                                }
                            })?;
                            arr.elements[at] = value.clone();
                        }
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "array".into(),
                                found: other.type_name().into(),
                                line: self.line(),
                            })
                        }
                    }
                    drop(guard);
                    self.push(value);
                }

                Op::Jump => {
                    let offset = self.read_short() as i16;
                    self.ip = (self.ip as i64 + offset as i64) as usize;
                }
                Op::JumpIfFalse => {
                    let offset = self.read_short() as i16;
                    let cond = self.pop()?;
                    let truthy = match cond {
                        Value::Boolean(b) => b,
                        other => other.as_i64().map_err(|e| e.with_line(self.line()))? != 0,
                    };
                    if !truthy {
                        self.ip = (self.ip as i64 + offset as i64) as usize;
                    }
                }
                Op::Loop => {
                    let dist = self.read_short() as usize;
                    if dist > self.ip {
                        return Err(RuntimeError::BadArgument {
                            name: "vm".into(),
                            message: "loop target before chunk start".into(),
                            line: self.line(),
                        });
                    }
                    self.ip -= dist;
                }

                Op::Call => {
                    let name_idx = self.read_short();
                    let addr = self.read_short();
                    let arity = self.read_byte();
                    let name = self.name_constant(name_idx)?;
                    let sym = self.procedures.lookup(&name).cloned().ok_or_else(|| {
                        RuntimeError::UnknownProcedure { name: name.clone(), line: self.line() }
                    })?;
                    if sym.arity != arity {
                        return Err(RuntimeError::ArityMismatch {
                            name,
                            expected: sym.arity,
                            found: arity,
                            line: self.line(),
                        });
                    }
                    if self.stack.len() < arity as usize {
                        return Err(RuntimeError::BadArgument {
                            name,
                            message: "argument stack underflow".into(),
                            line: self.line(),
                        });
                    }
                    let base = self.stack.len() - arity as usize;
                    self.frames.push(Frame {
                        return_ip: self.ip,
                        base,
                        locals_total: arity as usize + sym.locals_count as usize,
                        name,
                    });
                    for _ in 0..sym.locals_count {
                        self.push(Value::Nil);
                    }
                    self.ip = addr as usize;
                }
                Op::CallBuiltin => {
                    let name_idx = self.read_short();
                    let arity = self.read_byte();
                    let name = self.name_constant(name_idx)?;
                    let handler = builtins::lookup(&name).ok_or_else(|| {
                        RuntimeError::UnknownBuiltin {
                            name: name.clone(),
                            arity,
                            line: self.line(),
                        }
                    })?;
                    if self.stack.len() < arity as usize {
                        return Err(RuntimeError::BadArgument {
                            name,
                            message: "argument stack underflow".into(),
                            line: self.line(),
                        });
                    }
                    let split = self.stack.len() - arity as usize;
                    let mut args: Vec<Value> = self.stack.split_off(split);
                    let result =
                        (handler.handler)(self, &mut args).map_err(|e| e.with_line(self.line()))?;
                    self.push(result);
                }
                Op::Return => {
                    match self.frames.pop() {
                        None => return Ok(self.exit_code),
                        Some(frame) => {
                            let ret = if self.stack.len() > frame.base + frame.locals_total {
                                self.pop()?
                            } else {
                                Value::Nil
                            };
                            self.stack.truncate(frame.base);
                            self.push(ret);
                            if frame.return_ip == RETURN_TO_HOST {
                                return Ok(self.exit_code);
                            }
                            self.ip = frame.return_ip;
                        }
                    }
                }
                Op::Halt => return Ok(self.exit_code),

                Op::Write | Op::WriteLn => {
                    self.ensure_terminal();
                    let count = self.read_byte() as usize;
                    let split = self.stack.len() - count;
                    let args = self.stack.split_off(split);
                    let mut text = String::new();
                    for v in &args {
                        text.push_str(&v.display());
                    }
                    if op == Op::WriteLn {
                        text.push('\n');
                    }
                    self.write_out(&text);
                }

                Op::ThreadSpawn => {
                    let addr = self.read_short();
                    let handle = threads::spawn_bytecode(self, addr)
                        .map_err(|e| e.with_line(self.line()))?;
                    self.push(Value::Int64(handle));
                }
                Op::ThreadJoin => {
                    let handle = self.pop()?.as_i64().map_err(|e| e.with_line(self.line()))?;
                    let v = threads::join(handle).map_err(|e| e.with_line(self.line()))?;
                    self.push(v);
                }
            }
        }
    }

    fn frame_slot(&self, slot: usize) -> Result<usize, RuntimeError> {
        let frame = self.frames.last().ok_or_else(|| RuntimeError::BadArgument {
            name: "vm".into(),
            message: "local access outside any frame".into(),
            line: self.line(),
        })?;
        let at = frame.base + slot;
        if at >= self.stack.len() {
            return Err(RuntimeError::BadArgument {
                name: "vm".into(),
                message: format!("local slot {} outside the frame", slot),
                line: self.line(),
            });
        }
        Ok(at)
    }

    fn array_get(&self, array: &Value, index: i64) -> Result<Value, RuntimeError> {
        let fetch = |arr: &crate::value::ArrayValue| -> Result<Value, RuntimeError> {
            let (low, high) = arr.dims[0];
            let at = arr
                .flat_index(&[index])
                .ok_or(RuntimeError::IndexOutOfBounds { index, low, high, line: self.line() })?;
            Ok(arr.elements[at].clone())
        };
        match array {
            Value::Array(arr) => fetch(arr),
            Value::Pointer(cell) => match &*cell.lock() {
                Value::Array(arr) => fetch(arr),
                other => Err(RuntimeError::TypeMismatch {
                    expected: "array".into(),
                    found: other.type_name().into(),
                    line: self.line(),
                }),
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let low = 1i64;
                let high = chars.len() as i64;
                if index < low || index > high {
                    return Err(RuntimeError::IndexOutOfBounds {
                        index,
                        low,
                        high,
                        line: self.line(),
                    });
                }
                Ok(Value::Char(chars[(index - 1) as usize]))
            }
            other => Err(RuntimeError::TypeMismatch {
                expected: "array".into(),
                found: other.type_name().into(),
                line: self.line(),
            }),
        }
    }

    // ── Arithmetic and logic helpers ────────────────────────────────────────

    fn arith(&self, op: Op, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        let line = self.line();
        match op {
            Op::IntDiv | Op::Mod => {
                let a = lhs.as_i64().map_err(|e| e.with_line(line))?;
                let b = rhs.as_i64().map_err(|e| e.with_line(line))?;
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero { line });
                }
                Ok(Value::Int64(if op == Op::IntDiv { a / b } else { a % b }))
            }
            Op::Divide => {
                let a = lhs.as_f64().map_err(|e| e.with_line(line))?;
                let b = rhs.as_f64().map_err(|e| e.with_line(line))?;
                if b == 0.0 {
                    return Err(RuntimeError::DivisionByZero { line });
                }
                Ok(Value::Real(a / b))
            }
            Op::Add => match (&lhs, &rhs) {
                (Value::Str(_), _) | (_, Value::Str(_)) | (Value::Char(_), Value::Char(_)) => {
                    Ok(Value::Str(format!("{}{}", lhs.display(), rhs.display())))
                }
                _ => self.numeric(op, lhs, rhs),
            },
            _ => self.numeric(op, lhs, rhs),
        }
    }

    fn numeric(&self, op: Op, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        let line = self.line();
        if lhs.is_real() || rhs.is_real() {
            let a = lhs.as_f64().map_err(|e| e.with_line(line))?;
            let b = rhs.as_f64().map_err(|e| e.with_line(line))?;
            let v = match op {
                Op::Add => a + b,
                Op::Subtract => a - b,
                Op::Multiply => a * b,
                _ => unreachable!("non-arith opcode in numeric()"),
            };
            Ok(Value::Real(v))
        } else {
            let a = lhs.as_i64().map_err(|e| e.with_line(line))?;
            let b = rhs.as_i64().map_err(|e| e.with_line(line))?;
            let v = match op {
                Op::Add => a.wrapping_add(b),
                Op::Subtract => a.wrapping_sub(b),
                Op::Multiply => a.wrapping_mul(b),
                _ => unreachable!("non-arith opcode in numeric()"),
            };
            Ok(Value::Int64(v))
        }
    }

    fn logic(&self, op: Op, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        let line = self.line();
        match (&lhs, &rhs) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(match op {
                Op::And => *a && *b,
                Op::Or => *a || *b,
                _ => *a != *b,
            })),
            _ if lhs.is_intlike() && rhs.is_intlike() => {
                let a = lhs.as_i64().map_err(|e| e.with_line(line))?;
                let b = rhs.as_i64().map_err(|e| e.with_line(line))?;
                Ok(Value::Int64(match op {
                    Op::And => a & b,
                    Op::Or => a | b,
                    _ => a ^ b,
                }))
            }
            _ => Err(RuntimeError::TypeMismatch {
                expected: lhs.type_name().into(),
                found: rhs.type_name().into(),
                line,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal handling: SIGINT sets the foreground VM's abort flag
// ---------------------------------------------------------------------------

static SIGNAL_FLAG: OnceCell<Arc<AtomicBool>> = OnceCell::new();

/// Map SIGINT onto this VM's abort flag. The handler itself only stores into
/// an atomic, so it is async-signal-safe. Installation happens once per
/// process; later VMs re-point the shared flag semantics by sharing the
/// returned flag.
pub fn install_interrupt_handler(vm: &Vm) {
    let flag = SIGNAL_FLAG.get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        #[cfg(unix)]
        {
            let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag));
        }
        flag
    });
    // Bridge the process-level flag into the VM's own flag so the dispatch
    // loop sees the interrupt at the next instruction boundary. The weak
    // handle lets the bridge exit once the VM is gone.
    let process_flag = Arc::clone(flag);
    let vm_flag = Arc::downgrade(&vm.abort_requested);
    std::thread::spawn(move || loop {
        let flag = match vm_flag.upgrade() {
            Some(flag) => flag,
            None => return,
        };
        if process_flag.load(Ordering::SeqCst) {
            flag.store(true, Ordering::SeqCst);
            return;
        }
        drop(flag);
        std::thread::sleep(std::time::Duration::from_millis(20));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Symbol;
    use crate::value::VarType;

    fn run_chunk(chunk: Chunk) -> (Result<i32, RuntimeError>, String) {
        let capture = CaptureBuffer::new();
        let mut vm = Vm::new(Arc::new(chunk), Arc::new(SymbolTable::new()))
            .with_output(Box::new(capture.clone()));
        let result = vm.run();
        (result, capture.contents())
    }

    #[test]
    fn writes_constants_through_writeln() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int64(5)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(idx, 1);
        chunk.write_op(Op::WriteLn, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(Op::Halt, 1);
        let (result, out) = run_chunk(chunk);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "5\n");
    }

    #[test]
    fn integer_add_stays_integer_and_mix_forces_real() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Int64(2)) as u8;
        let b = chunk.add_constant(Value::Real(0.5)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(a, 1);
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(b, 1);
        chunk.write_op(Op::Add, 1);
        chunk.write_op(Op::WriteLn, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(Op::Halt, 1);
        let (result, out) = run_chunk(chunk);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "2.5\n");
    }

    #[test]
    fn int_div_by_zero_reports_the_source_line() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Int64(1)) as u8;
        let z = chunk.add_constant(Value::Int64(0)) as u8;
        chunk.write_op(Op::Constant, 9);
        chunk.write_byte(a, 9);
        chunk.write_op(Op::Constant, 9);
        chunk.write_byte(z, 9);
        chunk.write_op(Op::IntDiv, 9);
        chunk.write_op(Op::Halt, 9);
        let (result, _) = run_chunk(chunk);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("divide by zero"));
        assert_eq!(err.line(), 9);
    }

    #[test]
    fn missing_global_is_a_name_error() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::string("nowhere")) as u16;
        chunk.write_op(Op::GetGlobal, 3);
        chunk.emit_short(idx, 3);
        chunk.write_op(Op::Halt, 3);
        let (result, _) = run_chunk(chunk);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("nowhere"));
        assert_eq!(err.kind(), "Name error");
    }

    #[test]
    fn globals_round_trip_case_insensitively() {
        let mut chunk = Chunk::new();
        let name_set = chunk.add_constant(Value::string("Counter")) as u16;
        let name_get = chunk.add_constant(Value::string("COUNTER")) as u16;
        let v = chunk.add_constant(Value::Int64(11)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(v, 1);
        chunk.write_op(Op::SetGlobal, 1);
        chunk.emit_short(name_set, 1);
        chunk.write_op(Op::GetGlobal, 2);
        chunk.emit_short(name_get, 2);
        chunk.write_op(Op::WriteLn, 2);
        chunk.write_byte(1, 2);
        chunk.write_op(Op::Halt, 2);
        let (result, out) = run_chunk(chunk);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "11\n");
    }

    #[test]
    fn call_and_return_move_the_result_to_the_caller() {
        // main: CALL f(2, 3); WRITELN; HALT   f: GET_LOCAL 0; GET_LOCAL 1; ADD; RETURN
        let mut chunk = Chunk::new();
        let fname = chunk.add_constant(Value::string("f")) as u16;
        let two = chunk.add_constant(Value::Int64(2)) as u8;
        let three = chunk.add_constant(Value::Int64(3)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(two, 1);
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(three, 1);
        chunk.write_op(Op::Call, 1);
        chunk.emit_short(fname, 1);
        let addr_at = chunk.code.len();
        chunk.emit_short(0, 1);
        chunk.write_byte(2, 1);
        chunk.write_op(Op::WriteLn, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(Op::Halt, 1);

        let f_addr = chunk.code.len() as u16;
        chunk.patch_short(addr_at, f_addr);
        chunk.write_op(Op::GetLocal, 2);
        chunk.write_byte(0, 2);
        chunk.write_op(Op::GetLocal, 2);
        chunk.write_byte(1, 2);
        chunk.write_op(Op::Add, 2);
        chunk.write_op(Op::Return, 2);

        let mut procs = SymbolTable::new();
        let mut sym = Symbol::procedure("f", VarType::Int64, 2, 0);
        sym.bytecode_address = f_addr;
        procs.insert(sym);

        let capture = CaptureBuffer::new();
        let mut vm =
            Vm::new(Arc::new(chunk), Arc::new(procs)).with_output(Box::new(capture.clone()));
        assert_eq!(vm.run().unwrap(), 0);
        assert_eq!(capture.contents(), "5\n");
    }

    #[test]
    fn void_return_still_pushes_a_value_for_the_caller() {
        // CALL p(); POP; HALT    p: RETURN
        let mut chunk = Chunk::new();
        let pname = chunk.add_constant(Value::string("p")) as u16;
        chunk.write_op(Op::Call, 1);
        chunk.emit_short(pname, 1);
        let addr_at = chunk.code.len();
        chunk.emit_short(0, 1);
        chunk.write_byte(0, 1);
        chunk.write_op(Op::Pop, 1);
        chunk.write_op(Op::Halt, 1);
        let p_addr = chunk.code.len() as u16;
        chunk.patch_short(addr_at, p_addr);
        chunk.write_op(Op::Return, 2);

        let mut procs = SymbolTable::new();
        let mut sym = Symbol::procedure("p", VarType::Void, 0, 0);
        sym.bytecode_address = p_addr;
        procs.insert(sym);
        let mut vm = Vm::new(Arc::new(chunk), Arc::new(procs));
        assert_eq!(vm.run().unwrap(), 0);
    }

    #[test]
    fn abort_flag_stops_an_infinite_loop() {
        // loop: JUMP back to itself
        let mut chunk = Chunk::new();
        chunk.write_op(Op::Loop, 1);
        chunk.emit_short(3, 1);
        let mut vm = Vm::new(Arc::new(chunk), Arc::new(SymbolTable::new()));
        let flag = Arc::clone(&vm.abort_requested);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
        });
        let err = vm.run().unwrap_err();
        assert!(err.is_abort());
    }

    #[test]
    fn pointer_slots_share_writes_through_the_cell() {
        // Frame with one local, promoted. Write 42 through SET_LOCAL, read
        // back through the pointer pushed by GET_LOCAL_ADDRESS.
        let mut chunk = Chunk::new();
        let fname = chunk.add_constant(Value::string("f")) as u16;
        let v42 = chunk.add_constant(Value::Int64(42)) as u8;
        chunk.write_op(Op::Call, 1);
        chunk.emit_short(fname, 1);
        let addr_at = chunk.code.len();
        chunk.emit_short(0, 1);
        chunk.write_byte(0, 1);
        chunk.write_op(Op::WriteLn, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(Op::Halt, 1);
        let f_addr = chunk.code.len() as u16;
        chunk.patch_short(addr_at, f_addr);
        chunk.write_op(Op::InitLocalPointer, 2);
        chunk.write_byte(0, 2);
        chunk.write_op(Op::Constant, 3);
        chunk.write_byte(v42, 3);
        chunk.write_op(Op::SetLocal, 3);
        chunk.write_byte(0, 3);
        chunk.write_op(Op::GetLocal, 4);
        chunk.write_byte(0, 4);
        chunk.write_op(Op::Return, 4);

        let mut procs = SymbolTable::new();
        let mut sym = Symbol::procedure("f", VarType::Int64, 0, 1);
        sym.bytecode_address = f_addr;
        procs.insert(sym);

        let capture = CaptureBuffer::new();
        let mut vm =
            Vm::new(Arc::new(chunk), Arc::new(procs)).with_output(Box::new(capture.clone()));
        assert_eq!(vm.run().unwrap(), 0);
        assert_eq!(capture.contents(), "42\n");
    }
}

/// Bytecode instruction set and chunk.
///
/// One-byte opcodes followed by zero or more operands:
///
///   CONSTANT           u8 constant-pool index
///   GET/SET_LOCAL      u8 slot
///   GET_GLOBAL etc.    u16 name-constant index (LE)
///   JUMP/JUMP_IF_FALSE i16 LE offset, relative to the byte after the operand
///   LOOP               u16 LE back-distance, subtracted from the ip
///   CALL               u16 name, u16 address, u8 arity
///   CALL_BUILTIN       u16 name, u8 arity
///   WRITE/WRITE_LN     u8 argument count
///
/// A chunk is append-only during codegen and frozen afterwards. `lines` is a
/// parallel array with one source line per code byte so a runtime error at
/// instruction index i can name its line. On disk every scalar is
/// little-endian.

use std::fmt::Write as _;

use crate::errors::CacheError;
use crate::symbols::SymbolTable;
use crate::value::{Value, VarType};

pub const PBC_MAGIC: &[u8; 4] = b"PSBC";
pub const PBC_VERSION: u32 = 1;

pub const ASM_BEGIN: &str = "== PSCALASM BEGIN v1 ==";
pub const ASM_END: &str = "== PSCALASM END ==";

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Constant = 0,
    Pop = 1,
    Dup = 2,

    Add = 3,
    Subtract = 4,
    Multiply = 5,
    Divide = 6,
    IntDiv = 7,
    Mod = 8,
    Negate = 9,
    Not = 10,
    And = 11,
    Or = 12,
    Xor = 13,

    Equal = 14,
    NotEqual = 15,
    Less = 16,
    LessEqual = 17,
    Greater = 18,
    GreaterEqual = 19,

    GetLocal = 20,
    SetLocal = 21,
    GetLocalAddress = 22,
    InitLocalPointer = 23,
    GetGlobal = 24,
    SetGlobal = 25,
    GetField = 26,
    SetField = 27,
    GetElement = 28,
    SetElement = 29,

    Jump = 30,
    JumpIfFalse = 31,
    Loop = 32,

    Call = 33,
    CallBuiltin = 34,
    Return = 35,
    Halt = 36,

    Write = 37,
    WriteLn = 38,

    ThreadSpawn = 39,
    ThreadJoin = 40,
}

impl Op {
    pub fn from_byte(b: u8) -> Option<Op> {
        if b <= Op::ThreadJoin as u8 {
            // Discriminants are dense from 0.
            Some(unsafe { std::mem::transmute::<u8, Op>(b) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Constant => "CONSTANT",
            Op::Pop => "POP",
            Op::Dup => "DUP",
            Op::Add => "ADD",
            Op::Subtract => "SUB",
            Op::Multiply => "MUL",
            Op::Divide => "DIV",
            Op::IntDiv => "INT_DIV",
            Op::Mod => "MOD",
            Op::Negate => "NEGATE",
            Op::Not => "NOT",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Xor => "XOR",
            Op::Equal => "EQUAL",
            Op::NotEqual => "NOT_EQUAL",
            Op::Less => "LESS",
            Op::LessEqual => "LESS_EQUAL",
            Op::Greater => "GREATER",
            Op::GreaterEqual => "GREATER_EQUAL",
            Op::GetLocal => "GET_LOCAL",
            Op::SetLocal => "SET_LOCAL",
            Op::GetLocalAddress => "GET_LOCAL_ADDRESS",
            Op::InitLocalPointer => "INIT_LOCAL_POINTER",
            Op::GetGlobal => "GET_GLOBAL",
            Op::SetGlobal => "SET_GLOBAL",
            Op::GetField => "GET_FIELD",
            Op::SetField => "SET_FIELD",
            Op::GetElement => "GET_ELEMENT",
            Op::SetElement => "SET_ELEMENT",
            Op::Jump => "JUMP",
            Op::JumpIfFalse => "JUMP_IF_FALSE",
            Op::Loop => "LOOP",
            Op::Call => "CALL",
            Op::CallBuiltin => "CALL_BUILTIN",
            Op::Return => "RETURN",
            Op::Halt => "HALT",
            Op::Write => "WRITE",
            Op::WriteLn => "WRITE_LN",
            Op::ThreadSpawn => "THREAD_SPAWN",
            Op::ThreadJoin => "THREAD_JOIN",
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<i32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk::default()
    }

    pub fn write_op(&mut self, op: Op, line: i32) {
        self.write_byte(op as u8, line);
    }

    pub fn write_byte(&mut self, byte: u8, line: i32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Append a little-endian u16 operand.
    pub fn emit_short(&mut self, value: u16, line: i32) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(lo, line);
        self.write_byte(hi, line);
    }

    /// Patch a previously emitted 16-bit operand in place.
    pub fn patch_short(&mut self, at: usize, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.code[at] = lo;
        self.code[at + 1] = hi;
    }

    pub fn read_short(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.code[at], self.code[at + 1]])
    }

    /// Append a constant, sharing the slot of an equal scalar already in the
    /// pool. Heap aggregates always get a fresh slot.
    pub fn add_constant(&mut self, value: Value) -> usize {
        let scalar = !matches!(
            value,
            Value::Record(_) | Value::Array(_) | Value::Pointer(_) | Value::MemoryStream(_) | Value::File(_)
        );
        if scalar {
            if let Some(idx) = self.constants.iter().position(|c| *c == value) {
                return idx;
            }
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn line_at(&self, ip: usize) -> i32 {
        self.lines.get(ip).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Dependency descriptor (cache key material, stored in the file header)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub path: String,
    pub mtime: i64,
}

// ---------------------------------------------------------------------------
// On-disk serialization (cache files and .pbc files share this layout)
// ---------------------------------------------------------------------------

pub fn constant_serializable(v: &Value) -> bool {
    matches!(
        v,
        Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Byte(_)
            | Value::Boolean(_)
            | Value::Single(_)
            | Value::Real(_)
            | Value::Char(_)
            | Value::Str(_)
            | Value::Nil
            | Value::Enum { .. }
    )
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, v: &Value) -> Result<(), CacheError> {
    out.push(v.var_type().tag());
    match v {
        // Integer kinds share an 8-byte payload; the tag restores the width.
        Value::Int8(x) => out.extend_from_slice(&(*x as i64).to_le_bytes()),
        Value::Int16(x) => out.extend_from_slice(&(*x as i64).to_le_bytes()),
        Value::Int32(x) => out.extend_from_slice(&(*x as i64).to_le_bytes()),
        Value::Int64(x) => out.extend_from_slice(&x.to_le_bytes()),
        Value::Byte(x) => out.extend_from_slice(&(*x as i64).to_le_bytes()),
        Value::Boolean(b) => out.push(*b as u8),
        Value::Single(x) => out.extend_from_slice(&x.to_le_bytes()),
        Value::Real(x) => out.extend_from_slice(&x.to_le_bytes()),
        Value::Char(c) => out.extend_from_slice(&(*c as u32).to_le_bytes()),
        Value::Str(s) => write_str(out, s),
        Value::Nil => {}
        Value::Enum { name, ordinal } => {
            write_str(out, name);
            out.extend_from_slice(&ordinal.to_le_bytes());
        }
        other => {
            return Err(CacheError::Unserializable { type_name: other.type_name().into() })
        }
    }
    Ok(())
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        if self.pos + n > self.bytes.len() {
            return Err(CacheError::Io { message: "truncated bytecode file".into() });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CacheError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CacheError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, CacheError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, CacheError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32, CacheError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64, CacheError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_string(&mut self) -> Result<String, CacheError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CacheError::Io { message: "invalid UTF-8 in bytecode file".into() })
    }
}

fn read_value(r: &mut Reader) -> Result<Value, CacheError> {
    let tag = r.read_u8()?;
    let vt = VarType::from_tag(tag)
        .ok_or_else(|| CacheError::Io { message: format!("unknown constant tag {}", tag) })?;
    Ok(match vt {
        VarType::Int8 => Value::Int8(r.read_i64()? as i8),
        VarType::Int16 => Value::Int16(r.read_i64()? as i16),
        VarType::Int32 => Value::Int32(r.read_i64()? as i32),
        VarType::Int64 => Value::Int64(r.read_i64()?),
        VarType::Byte => Value::Byte(r.read_i64()? as u8),
        VarType::Boolean => Value::Boolean(r.read_u8()? != 0),
        VarType::Single => Value::Single(r.read_f32()?),
        VarType::Real | VarType::Extended => Value::Real(r.read_f64()?),
        VarType::Char => {
            let scalar = r.read_u32()?;
            Value::Char(char::from_u32(scalar).ok_or_else(|| CacheError::Io {
                message: format!("invalid char scalar {}", scalar),
            })?)
        }
        VarType::Str => Value::Str(r.read_string()?),
        VarType::Nil => Value::Nil,
        VarType::Enum => {
            let name = r.read_string()?;
            let ordinal = r.read_i32()?;
            Value::Enum { name, ordinal }
        }
        _ => return Err(CacheError::Io { message: format!("unreadable constant tag {}", tag) }),
    })
}

/// Serialize a full bytecode file: magic, version, compiler id, dependency
/// descriptor, code, line map, constants.
pub fn write_pbc(
    chunk: &Chunk,
    compiler_id: &str,
    deps: &[Dependency],
) -> Result<Vec<u8>, CacheError> {
    for c in &chunk.constants {
        if !constant_serializable(c) {
            return Err(CacheError::Unserializable { type_name: c.type_name().into() });
        }
    }
    let mut out = Vec::with_capacity(chunk.code.len() * 6 + 64);
    out.extend_from_slice(PBC_MAGIC);
    out.extend_from_slice(&PBC_VERSION.to_le_bytes());
    write_str(&mut out, compiler_id);
    out.extend_from_slice(&(deps.len() as u32).to_le_bytes());
    for dep in deps {
        write_str(&mut out, &dep.path);
        out.extend_from_slice(&dep.mtime.to_le_bytes());
    }
    out.extend_from_slice(&(chunk.code.len() as u32).to_le_bytes());
    out.extend_from_slice(&chunk.code);
    for line in &chunk.lines {
        out.extend_from_slice(&line.to_le_bytes());
    }
    out.extend_from_slice(&(chunk.constants.len() as u32).to_le_bytes());
    for c in &chunk.constants {
        write_value(&mut out, c)?;
    }
    Ok(out)
}

pub struct PbcFile {
    pub compiler_id: String,
    pub deps: Vec<Dependency>,
    pub chunk: Chunk,
}

pub fn parse_pbc(bytes: &[u8]) -> Result<PbcFile, CacheError> {
    let mut r = Reader::new(bytes);
    let magic = [r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?];
    if &magic != PBC_MAGIC {
        return Err(CacheError::BadMagic);
    }
    let version = r.read_u32()?;
    if version != PBC_VERSION {
        return Err(CacheError::BadVersion { found: version });
    }
    let compiler_id = r.read_string()?;
    let dep_count = r.read_u32()? as usize;
    let mut deps = Vec::with_capacity(dep_count);
    for _ in 0..dep_count {
        let path = r.read_string()?;
        let mtime = r.read_i64()?;
        deps.push(Dependency { path, mtime });
    }
    let code_len = r.read_u32()? as usize;
    let mut chunk = Chunk::new();
    chunk.code = r.take(code_len)?.to_vec();
    chunk.lines = Vec::with_capacity(code_len);
    for _ in 0..code_len {
        chunk.lines.push(r.read_i32()?);
    }
    let const_count = r.read_u32()? as usize;
    chunk.constants = Vec::with_capacity(const_count);
    for _ in 0..const_count {
        chunk.constants.push(read_value(&mut r)?);
    }
    Ok(PbcFile { compiler_id, deps, chunk })
}

// ---------------------------------------------------------------------------
// Disassembly
// ---------------------------------------------------------------------------

/// Render one instruction; returns the ip of the next one.
pub fn disassemble_instruction(chunk: &Chunk, ip: usize, out: &mut String) -> usize {
    let line = chunk.line_at(ip);
    let op = match Op::from_byte(chunk.code[ip]) {
        Some(op) => op,
        None => {
            let _ = writeln!(out, "{:4} {:4} <bad opcode {}>", ip, line, chunk.code[ip]);
            return ip + 1;
        }
    };
    let _ = write!(out, "{:4} {:4} {}", ip, line, op.name());
    let mut next = ip + 1;
    match op {
        Op::Constant => {
            let idx = chunk.code[next] as usize;
            let text = chunk
                .constants
                .get(idx)
                .map(|c| c.display())
                .unwrap_or_else(|| "<bad index>".into());
            let _ = write!(out, " {} ({})", idx, text);
            next += 1;
        }
        Op::GetLocal | Op::SetLocal | Op::GetLocalAddress | Op::InitLocalPointer => {
            let _ = write!(out, " {}", chunk.code[next]);
            next += 1;
        }
        Op::Write | Op::WriteLn => {
            let _ = write!(out, " {}", chunk.code[next]);
            next += 1;
        }
        Op::GetGlobal | Op::SetGlobal | Op::GetField | Op::SetField => {
            let idx = chunk.read_short(next) as usize;
            let name = chunk
                .constants
                .get(idx)
                .map(|c| c.display())
                .unwrap_or_else(|| "<bad index>".into());
            let _ = write!(out, " {} '{}'", idx, name);
            next += 2;
        }
        Op::Jump | Op::JumpIfFalse => {
            let offset = chunk.read_short(next) as i16;
            let target = (next as i64 + 2) + offset as i64;
            let _ = write!(out, " {} -> {}", offset, target);
            next += 2;
        }
        Op::Loop => {
            let dist = chunk.read_short(next);
            let target = (next as i64 + 2) - dist as i64;
            let _ = write!(out, " {} -> {}", dist, target);
            next += 2;
        }
        Op::Call => {
            let name_idx = chunk.read_short(next) as usize;
            let addr = chunk.read_short(next + 2);
            let arity = chunk.code[next + 4];
            let name = chunk
                .constants
                .get(name_idx)
                .map(|c| c.display())
                .unwrap_or_else(|| "<bad index>".into());
            let _ = write!(out, " '{}' @{} arity={}", name, addr, arity);
            next += 5;
        }
        Op::CallBuiltin => {
            let name_idx = chunk.read_short(next) as usize;
            let arity = chunk.code[next + 2];
            let name = chunk
                .constants
                .get(name_idx)
                .map(|c| c.display())
                .unwrap_or_else(|| "<bad index>".into());
            let _ = write!(out, " '{}' arity={}", name, arity);
            next += 3;
        }
        Op::ThreadSpawn => {
            let _ = write!(out, " @{}", chunk.read_short(next));
            next += 2;
        }
        _ => {}
    }
    let _ = writeln!(out);
    next
}

/// Full chunk listing. When a procedure table is supplied, a header line is
/// printed before each procedure entry point.
pub fn disassemble(chunk: &Chunk, name: &str, procedures: Option<&SymbolTable>) -> String {
    let mut headers: Vec<(usize, String)> = Vec::new();
    if let Some(table) = procedures {
        for sym in table.iter() {
            if sym.is_defined {
                headers.push((
                    sym.bytecode_address as usize,
                    format!(
                        "-- procedure {} (arity={}, locals={}) --",
                        sym.name, sym.arity, sym.locals_count
                    ),
                ));
            }
        }
        headers.sort();
    }

    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);
    let mut ip = 0;
    while ip < chunk.code.len() {
        for (addr, header) in &headers {
            if *addr == ip {
                let _ = writeln!(out, "{}", header);
            }
        }
        ip = disassemble_instruction(chunk, ip, &mut out);
    }
    out
}

/// Walk the instruction stream and collect the (procedure name, address)
/// pairs carried by CALL instructions. Used to rebind the procedure table
/// after a chunk is loaded from cache, where codegen never ran.
pub fn scan_call_targets(chunk: &Chunk) -> Vec<(String, u16)> {
    let mut targets = Vec::new();
    let mut ip = 0;
    while ip < chunk.code.len() {
        let op = match Op::from_byte(chunk.code[ip]) {
            Some(op) => op,
            None => break,
        };
        ip += 1;
        match op {
            Op::Call => {
                if ip + 5 > chunk.code.len() {
                    break;
                }
                let name_idx = chunk.read_short(ip) as usize;
                let addr = chunk.read_short(ip + 2);
                if let Some(Value::Str(name)) = chunk.constants.get(name_idx) {
                    targets.push((name.clone(), addr));
                }
                ip += 5;
            }
            Op::Constant
            | Op::GetLocal
            | Op::SetLocal
            | Op::GetLocalAddress
            | Op::InitLocalPointer
            | Op::Write
            | Op::WriteLn => ip += 1,
            Op::GetGlobal
            | Op::SetGlobal
            | Op::GetField
            | Op::SetField
            | Op::Jump
            | Op::JumpIfFalse
            | Op::Loop
            | Op::ThreadSpawn => ip += 2,
            Op::CallBuiltin => ip += 3,
            _ => {}
        }
    }
    targets
}

// ---------------------------------------------------------------------------
// PSCALASM hex block (byte-exact round trip through pscald/pscalasm)
// ---------------------------------------------------------------------------

pub fn emit_asm_block(bytes: &[u8]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", ASM_BEGIN);
    let _ = writeln!(out, "bytes: {}", bytes.len());
    let _ = writeln!(out, "hex:");
    for row in bytes.chunks(32) {
        for b in row {
            let _ = write!(out, "{:02x}", b);
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "{}", ASM_END);
    out
}

pub fn parse_asm_block(text: &str) -> Option<Vec<u8>> {
    let mut in_block = false;
    let mut in_hex = false;
    let mut expected: Option<usize> = None;
    let mut bytes = Vec::new();

    for line in text.lines() {
        if !in_block {
            if line.contains(ASM_BEGIN) {
                in_block = true;
            }
            continue;
        }
        if line.contains(ASM_END) {
            break;
        }
        if let Some(rest) = line.strip_prefix("bytes:") {
            expected = rest.trim().parse().ok();
            continue;
        }
        if line.starts_with("hex:") {
            in_hex = true;
            continue;
        }
        if !in_hex {
            continue;
        }
        let mut nibbles = line.chars().filter(|c| c.is_ascii_hexdigit());
        while let Some(hi) = nibbles.next() {
            let lo = nibbles.next()?;
            let hi = hi.to_digit(16)? as u8;
            let lo = lo.to_digit(16)? as u8;
            bytes.push((hi << 4) | lo);
        }
    }

    if !in_block {
        return None;
    }
    if let Some(n) = expected {
        if n != bytes.len() {
            return None;
        }
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_short_round_trips_forward_jump_offsets() {
        let mut chunk = Chunk::new();
        chunk.write_op(Op::JumpIfFalse, 1);
        let site = chunk.code.len();
        chunk.emit_short(0xFFFF, 1);
        chunk.write_op(Op::Pop, 1);
        chunk.write_op(Op::Pop, 1);
        let offset = chunk.code.len() - (site + 2);
        chunk.patch_short(site, offset as u16);

        // Decoded target equals jump_site + 2 + offset.
        let decoded = chunk.read_short(site) as i16 as i64;
        assert_eq!(site as i64 + 2 + decoded, chunk.code.len() as i64);
    }

    #[test]
    fn scalar_constants_are_deduplicated() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Int64(42));
        let b = chunk.add_constant(Value::Int64(42));
        let c = chunk.add_constant(Value::Str("x".into()));
        let d = chunk.add_constant(Value::Str("x".into()));
        assert_eq!(a, b);
        assert_eq!(c, d);
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn pbc_round_trip_is_byte_and_value_exact() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int64(7)) as u8;
        chunk.write_op(Op::Constant, 3);
        chunk.write_byte(idx, 3);
        chunk.add_constant(Value::Real(1.5));
        chunk.add_constant(Value::Str("hello".into()));
        chunk.add_constant(Value::Enum { name: "red".into(), ordinal: 0 });
        chunk.add_constant(Value::Char('x'));
        chunk.add_constant(Value::Boolean(true));
        chunk.add_constant(Value::Int8(-5));
        chunk.write_op(Op::Halt, 4);

        let deps = vec![Dependency { path: "/tmp/u.cl".into(), mtime: 1234 }];
        let bytes = write_pbc(&chunk, "clike", &deps).unwrap();
        let parsed = parse_pbc(&bytes).unwrap();
        assert_eq!(parsed.compiler_id, "clike");
        assert_eq!(parsed.deps, deps);
        assert_eq!(parsed.chunk.code, chunk.code);
        assert_eq!(parsed.chunk.lines, chunk.lines);
        assert_eq!(parsed.chunk.constants, chunk.constants);
    }

    #[test]
    fn pbc_rejects_unserializable_constants() {
        let mut chunk = Chunk::new();
        chunk.constants.push(Value::Record(vec![]));
        assert!(matches!(
            write_pbc(&chunk, "clike", &[]),
            Err(CacheError::Unserializable { .. })
        ));
    }

    #[test]
    fn pbc_rejects_bad_magic_and_version() {
        let mut chunk = Chunk::new();
        chunk.write_op(Op::Halt, 1);
        let mut bytes = write_pbc(&chunk, "clike", &[]).unwrap();
        bytes[0] = b'X';
        assert!(matches!(parse_pbc(&bytes), Err(CacheError::BadMagic)));

        let mut bytes = write_pbc(&chunk, "clike", &[]).unwrap();
        bytes[4] = 99;
        assert!(matches!(parse_pbc(&bytes), Err(CacheError::BadVersion { found: 99 })));
    }

    #[test]
    fn asm_block_round_trips_byte_exact() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let block = emit_asm_block(&bytes);
        let parsed = parse_asm_block(&block).unwrap();
        assert_eq!(parsed, bytes);
    }

    #[test]
    fn asm_block_rejects_length_mismatch() {
        let block = format!("{}\nbytes: 4\nhex:\nffff\n{}\n", ASM_BEGIN, ASM_END);
        assert!(parse_asm_block(&block).is_none());
    }

    #[test]
    fn disassembly_emits_procedure_headers() {
        use crate::symbols::Symbol;
        use crate::value::VarType;

        let mut chunk = Chunk::new();
        chunk.write_op(Op::Halt, 1);
        let entry = chunk.code.len() as u16;
        chunk.write_op(Op::Return, 2);

        let mut procs = SymbolTable::new();
        let mut sym = Symbol::procedure("greet", VarType::Void, 2, 1);
        sym.bytecode_address = entry;
        procs.insert(sym);

        let text = disassemble(&chunk, "t", Some(&procs));
        assert!(text.contains("-- procedure greet (arity=2, locals=1) --"));
    }

    #[test]
    fn scan_recovers_call_targets() {
        let mut chunk = Chunk::new();
        let fname = chunk.add_constant(Value::string("fib")) as u16;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(0, 1);
        chunk.write_op(Op::Call, 1);
        chunk.emit_short(fname, 1);
        chunk.emit_short(42, 1);
        chunk.write_byte(1, 1);
        chunk.write_op(Op::Halt, 1);
        assert_eq!(scan_call_targets(&chunk), vec![("fib".to_string(), 42)]);
    }

    #[test]
    fn disassembly_names_opcodes_and_targets() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int64(5)) as u8;
        chunk.write_op(Op::Constant, 1);
        chunk.write_byte(idx, 1);
        chunk.write_op(Op::JumpIfFalse, 1);
        chunk.emit_short(1, 1);
        chunk.write_op(Op::Pop, 2);
        chunk.write_op(Op::Halt, 2);
        let text = disassemble(&chunk, "test", None);
        assert!(text.contains("CONSTANT 0 (5)"));
        assert!(text.contains("JUMP_IF_FALSE 1 -> 6"));
        assert!(text.contains("HALT"));
    }
}

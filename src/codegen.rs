/// AST to bytecode compiler.
///
/// A single walker descends the tree and appends to one chunk. Expressions
/// push exactly one Value; statements leave the stack depth unchanged. The
/// program prologue is `CALL main` with the address and arity patched once
/// every function body is emitted, followed by `HALT`.
///
/// Calls to procedures that are not yet compiled go through a pending patch
/// list keyed by name and are resolved after the last body; an entry that
/// never resolves is an unresolved-call error. Locals whose address is taken
/// anywhere in the function are promoted to pointer cells at entry via
/// INIT_LOCAL_POINTER, which is what makes VAR-style arguments and element
/// stores work against stack slots.

use crate::ast::{verify, Node, NodeKind, TokenType};
use crate::bytecode::{Chunk, Op};
use crate::errors::CompileError;
use crate::symbols::SymbolTables;
use crate::value::{Value, VarType};

// ---------------------------------------------------------------------------
// Per-function compilation context
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FuncContext {
    /// Slot order: parameters first, then declarations in source order.
    locals: Vec<String>,
    types: Vec<VarType>,
    /// Declared bounds and element type for array slots.
    arrays: Vec<Option<(i64, VarType)>>,
    param_count: u8,
    /// Slots promoted to pointer cells at entry.
    pointer_slots: Vec<u8>,
}

impl FuncContext {
    fn add_local(&mut self, name: &str, vt: VarType) -> u8 {
        self.locals.push(name.to_lowercase());
        self.types.push(vt);
        self.arrays.push(None);
        (self.locals.len() - 1) as u8
    }

    fn resolve(&self, name: &str) -> Option<u8> {
        let key = name.to_lowercase();
        self.locals.iter().position(|n| *n == key).map(|i| i as u8)
    }
}

// ---------------------------------------------------------------------------
// Codegen driver
// ---------------------------------------------------------------------------

pub struct Codegen<'t> {
    chunk: Chunk,
    tables: &'t mut SymbolTables,
    /// (address-operand position, procedure name, source line)
    pending_calls: Vec<(usize, String, i32)>,
    line: i32,
}

pub fn compile(program: &Node, tables: &mut SymbolTables) -> Result<Chunk, CompileError> {
    verify(program)?;
    let mut cg = Codegen { chunk: Chunk::new(), tables, pending_calls: Vec::new(), line: 0 };
    cg.compile_program(program)?;
    Ok(cg.chunk)
}

impl<'t> Codegen<'t> {
    // ── Emission helpers ────────────────────────────────────────────────────

    fn emit(&mut self, op: Op) {
        self.chunk.write_op(op, self.line);
    }

    fn emit_byte(&mut self, byte: u8) {
        self.chunk.write_byte(byte, self.line);
    }

    fn add_constant(&mut self, value: Value) -> Result<usize, CompileError> {
        let idx = self.chunk.add_constant(value);
        if idx > u16::MAX as usize {
            return Err(CompileError::ConstantPoolOverflow { line: self.line });
        }
        Ok(idx)
    }

    /// CONSTANT carries an 8-bit index; name operands get 16 bits.
    fn emit_literal(&mut self, value: Value) -> Result<(), CompileError> {
        let idx = self.add_constant(value)?;
        if idx > u8::MAX as usize {
            return Err(CompileError::ConstantIndexTooWide { line: self.line });
        }
        self.emit(Op::Constant);
        self.emit_byte(idx as u8);
        Ok(())
    }

    fn emit_name(&mut self, op: Op, name: &str) -> Result<(), CompileError> {
        let idx = self.add_constant(Value::string(name))? as u16;
        self.emit(op);
        self.chunk.emit_short(idx, self.line);
        Ok(())
    }

    /// Emit a forward jump with a placeholder offset; returns the patch site.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        let at = self.chunk.code.len();
        self.chunk.emit_short(0xFFFF, self.line);
        at
    }

    fn patch_jump(&mut self, at: usize) -> Result<(), CompileError> {
        let offset = self.chunk.code.len() - (at + 2);
        if offset > i16::MAX as usize {
            return Err(CompileError::JumpTooFar { line: self.line });
        }
        self.chunk.patch_short(at, offset as u16);
        Ok(())
    }

    fn emit_loop(&mut self, loop_start: usize) -> Result<(), CompileError> {
        // Distance is measured from the byte after the operand back to the
        // loop head: opcode + two operand bytes.
        let dist = self.chunk.code.len() + 3 - loop_start;
        if dist > u16::MAX as usize {
            return Err(CompileError::JumpTooFar { line: self.line });
        }
        self.emit(Op::Loop);
        self.chunk.emit_short(dist as u16, self.line);
        Ok(())
    }

    fn track_line(&mut self, node: &Node) {
        let line = node.line();
        if line > 0 {
            self.line = line;
        }
    }

    // ── Program and functions ───────────────────────────────────────────────

    fn compile_program(&mut self, program: &Node) -> Result<(), CompileError> {
        // Top-level variable declarations become globals, stored before main
        // is entered.
        for decl in &program.children {
            if decl.kind == NodeKind::VarDecl {
                self.track_line(decl);
                if let Some(init) = &decl.left {
                    let mut ctx = FuncContext::default();
                    self.compile_expression(init, &mut ctx)?;
                } else {
                    self.emit_literal(Value::default_for(decl.var_type))?;
                }
                self.emit_name(Op::SetGlobal, decl.lexeme())?;
            }
        }

        // Prologue: call main so its locals get a real frame, then halt.
        let main_name = self.add_constant(Value::string("main"))? as u16;
        self.emit(Op::Call);
        self.chunk.emit_short(main_name, self.line);
        let main_addr_patch = self.chunk.code.len();
        self.chunk.emit_short(0, self.line);
        let main_arity_patch = self.chunk.code.len();
        self.emit_byte(0);
        self.emit(Op::Halt);

        let mut saw_main = false;
        for decl in &program.children {
            match decl.kind {
                NodeKind::FunDecl | NodeKind::ProcDecl => {
                    self.compile_function(decl)?;
                    if decl.lexeme().eq_ignore_ascii_case("main") {
                        saw_main = true;
                    }
                }
                _ => {}
            }
        }

        if !saw_main {
            return Err(CompileError::UnresolvedCall { name: "main".into(), line: 0 });
        }

        // Resolve forward calls now that every body has an address.
        let pending = std::mem::take(&mut self.pending_calls);
        for (at, name, line) in pending {
            match self.tables.procedures.lookup(&name) {
                Some(sym) if sym.is_defined => {
                    let addr = sym.bytecode_address;
                    self.chunk.patch_short(at, addr);
                }
                _ => return Err(CompileError::UnresolvedCall { name, line }),
            }
        }

        let main_sym = self
            .tables
            .procedures
            .lookup("main")
            .filter(|s| s.is_defined)
            .ok_or(CompileError::UnresolvedCall { name: "main".into(), line: 0 })?;
        let (addr, arity) = (main_sym.bytecode_address, main_sym.arity);
        self.chunk.patch_short(main_addr_patch, addr);
        self.chunk.code[main_arity_patch] = arity;
        Ok(())
    }

    fn compile_function(&mut self, func: &Node) -> Result<(), CompileError> {
        self.track_line(func);
        let name = func.lexeme().to_string();
        let body = match &func.right {
            Some(body) => body,
            None => return Ok(()), // forward declaration, body comes later
        };

        let mut ctx = FuncContext::default();
        if let Some(params) = &func.left {
            for p in &params.children {
                ctx.add_local(p.lexeme(), p.var_type);
                ctx.param_count += 1;
            }
        }
        collect_locals(body, &mut ctx);
        if ctx.locals.len() > u8::MAX as usize {
            return Err(CompileError::TooManyLocals { name, line: self.line });
        }
        collect_address_taken(body, &mut ctx);

        let address = self.chunk.code.len() as u16;
        {
            let sym = self
                .tables
                .procedures
                .lookup_mut(&name)
                .ok_or_else(|| CompileError::UnresolvedCall { name: name.clone(), line: self.line })?;
            sym.bytecode_address = address;
            sym.arity = ctx.param_count;
            sym.locals_count = (ctx.locals.len() - ctx.param_count as usize) as u8;
            sym.is_defined = true;
        }

        // Typed defaults for declared locals; parameters arrive initialized.
        // Array slots build their payload through the __mkarray builtin so
        // the constant pool stays serializable.
        for slot in (ctx.param_count as usize)..ctx.locals.len() {
            if let Some((count, elem)) = ctx.arrays[slot] {
                self.emit_literal(Value::Int64(0))?;
                self.emit_literal(Value::Int64(count - 1))?;
                self.emit_literal(Value::Int64(elem.tag() as i64))?;
                let idx = self.add_constant(Value::string("__mkarray"))? as u16;
                self.emit(Op::CallBuiltin);
                self.chunk.emit_short(idx, self.line);
                self.emit_byte(3);
            } else {
                let vt = ctx.types[slot];
                self.emit_literal(Value::default_for(vt))?;
            }
            self.emit(Op::SetLocal);
            self.emit_byte(slot as u8);
        }
        // Promote address-taken slots after their defaults are in place.
        for &slot in &ctx.pointer_slots.clone() {
            self.emit(Op::InitLocalPointer);
            self.emit_byte(slot);
        }

        self.compile_statement(body, &mut ctx)?;
        self.emit(Op::Return);
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────────────

    fn compile_statement(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        self.track_line(node);
        match node.kind {
            NodeKind::Compound | NodeKind::Block => {
                for child in &node.children {
                    self.compile_statement(child, ctx)?;
                }
            }
            // Declarations were collected up front; only their initializers
            // execute in place.
            NodeKind::VarDecl => {
                if let Some(init) = &node.left {
                    let slot = ctx.resolve(node.lexeme()).ok_or_else(|| {
                        CompileError::Verifier {
                            message: format!("undeclared local '{}'", node.lexeme()),
                            line: node.line(),
                        }
                    })?;
                    self.compile_expression(init, ctx)?;
                    self.emit(Op::SetLocal);
                    self.emit_byte(slot);
                }
            }
            NodeKind::ExprStmt => {
                if let Some(expr) = &node.left {
                    self.compile_expression(expr, ctx)?;
                    self.emit(Op::Pop);
                }
            }
            NodeKind::Return => {
                if let Some(expr) = &node.left {
                    self.compile_expression(expr, ctx)?;
                }
                self.emit(Op::Return);
            }
            NodeKind::If => {
                let cond = node.left.as_ref().unwrap();
                self.compile_expression(cond, ctx)?;
                let else_jump = self.emit_jump(Op::JumpIfFalse);
                self.compile_statement(node.right.as_ref().unwrap(), ctx)?;
                if let Some(else_branch) = &node.extra {
                    let end_jump = self.emit_jump(Op::Jump);
                    self.patch_jump(else_jump)?;
                    self.compile_statement(else_branch, ctx)?;
                    self.patch_jump(end_jump)?;
                } else {
                    self.patch_jump(else_jump)?;
                }
            }
            NodeKind::While => {
                let loop_start = self.chunk.code.len();
                self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
                let exit_jump = self.emit_jump(Op::JumpIfFalse);
                self.compile_statement(node.right.as_ref().unwrap(), ctx)?;
                self.emit_loop(loop_start)?;
                self.patch_jump(exit_jump)?;
            }
            NodeKind::Repeat => {
                // do { body } while (cond)
                let loop_start = self.chunk.code.len();
                self.compile_statement(node.left.as_ref().unwrap(), ctx)?;
                self.compile_expression(node.right.as_ref().unwrap(), ctx)?;
                let exit_jump = self.emit_jump(Op::JumpIfFalse);
                self.emit_loop(loop_start)?;
                self.patch_jump(exit_jump)?;
            }
            NodeKind::For => {
                if let Some(init) = &node.left {
                    self.compile_statement(init, ctx)?;
                }
                let loop_start = self.chunk.code.len();
                let exit_jump = match &node.right {
                    Some(cond) => {
                        self.compile_expression(cond, ctx)?;
                        Some(self.emit_jump(Op::JumpIfFalse))
                    }
                    None => None,
                };
                if let Some(body) = node.children.first() {
                    self.compile_statement(body, ctx)?;
                }
                if let Some(update) = &node.extra {
                    self.compile_statement(update, ctx)?;
                }
                self.emit_loop(loop_start)?;
                if let Some(at) = exit_jump {
                    self.patch_jump(at)?;
                }
            }
            NodeKind::Case => self.compile_case(node, ctx)?,
            NodeKind::Write | NodeKind::WriteLn => {
                for arg in &node.children {
                    self.compile_expression(arg, ctx)?;
                }
                let op = if node.kind == NodeKind::Write { Op::Write } else { Op::WriteLn };
                self.emit(op);
                self.emit_byte(node.children.len() as u8);
            }
            NodeKind::Read | NodeKind::ReadLn => {
                for lvalue in &node.children {
                    self.compile_lvalue_address(lvalue, ctx)?;
                }
                let idx = self.add_constant(Value::string("readln"))? as u16;
                self.emit(Op::CallBuiltin);
                self.chunk.emit_short(idx, self.line);
                self.emit_byte(node.children.len() as u8);
                self.emit(Op::Pop);
            }
            NodeKind::Import | NodeKind::UsesClause | NodeKind::NoOp => {}
            NodeKind::FunDecl | NodeKind::ProcDecl => {
                // Nested declarations are hoisted by the frontend.
            }
            _ => {
                // Expression used in statement position.
                self.compile_expression(node, ctx)?;
                self.emit(Op::Pop);
            }
        }
        Ok(())
    }

    /// Case lowers to a compare-and-jump chain. The subject stays on the
    /// stack across the label tests and is popped on entry to a branch body.
    fn compile_case(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
        let mut end_jumps = Vec::new();
        let mut default_branch: Option<&Node> = None;

        for branch in &node.children {
            if branch.children.is_empty() {
                default_branch = Some(branch);
                continue;
            }
            // Multiple labels per branch share one body.
            let mut body_jumps = Vec::new();
            let mut next_label_jump = None;
            for (i, label) in branch.children.iter().enumerate() {
                if let Some(at) = next_label_jump.take() {
                    self.patch_jump(at)?;
                }
                self.emit(Op::Dup);
                self.compile_expression(label, ctx)?;
                self.emit(Op::Equal);
                if i + 1 < branch.children.len() {
                    // On a miss try the next label of the same branch.
                    self.emit(Op::Not);
                    let hit = self.emit_jump(Op::JumpIfFalse);
                    body_jumps.push(hit);
                    next_label_jump = None;
                } else {
                    next_label_jump = Some(self.emit_jump(Op::JumpIfFalse));
                }
            }
            for at in body_jumps {
                self.patch_jump(at)?;
            }
            self.emit(Op::Pop);
            if let Some(body) = &branch.right {
                self.compile_statement(body, ctx)?;
            }
            end_jumps.push(self.emit_jump(Op::Jump));
            if let Some(at) = next_label_jump {
                self.patch_jump(at)?;
            }
        }

        self.emit(Op::Pop);
        if let Some(branch) = default_branch {
            if let Some(body) = &branch.right {
                self.compile_statement(body, ctx)?;
            }
        }
        for at in end_jumps {
            self.patch_jump(at)?;
        }
        Ok(())
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    fn compile_expression(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        self.track_line(node);
        match node.kind {
            NodeKind::Number => {
                if node.var_type.is_real() {
                    self.emit_literal(Value::Real(node.r_val))?;
                } else {
                    self.emit_literal(Value::Int64(node.i_val))?;
                }
            }
            NodeKind::StringLit => self.emit_literal(Value::string(node.lexeme()))?,
            NodeKind::CharLit => {
                let c = node.lexeme().chars().next().unwrap_or('\0');
                self.emit_literal(Value::Char(c))?;
            }
            NodeKind::BooleanLit => self.emit_literal(Value::Boolean(node.b_val))?,
            NodeKind::NilLit => self.emit_literal(Value::Nil)?,
            NodeKind::EnumValue => {
                self.emit_literal(Value::Enum {
                    name: node.lexeme().to_string(),
                    ordinal: node.i_val as i32,
                })?;
            }
            NodeKind::Variable => {
                let name = node.lexeme();
                if let Some(slot) = ctx.resolve(name) {
                    self.emit(Op::GetLocal);
                    self.emit_byte(slot);
                } else if let Some(value) =
                    self.tables.constants.lookup(name).and_then(|s| s.value.clone())
                {
                    self.emit_literal(value)?;
                } else {
                    self.emit_name(Op::GetGlobal, name)?;
                }
            }
            NodeKind::AddressOf => {
                self.compile_lvalue_address(node.left.as_ref().unwrap(), ctx)?;
            }
            NodeKind::FieldAccess => {
                self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
                self.emit_name(Op::GetField, node.lexeme())?;
            }
            NodeKind::ArrayAccess => {
                self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
                self.compile_expression(node.right.as_ref().unwrap(), ctx)?;
                self.emit(Op::GetElement);
            }
            NodeKind::Assign => self.compile_assign(node, ctx)?,
            NodeKind::BinaryOp => self.compile_binary(node, ctx)?,
            NodeKind::UnaryOp => {
                let op = node.token_type().unwrap();
                self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
                match op {
                    TokenType::Minus => self.emit(Op::Negate),
                    TokenType::Not => self.emit(Op::Not),
                    TokenType::Plus => {}
                    _ => {
                        return Err(CompileError::Verifier {
                            message: format!("unsupported unary operator {}", op.name()),
                            line: self.line,
                        })
                    }
                }
            }
            NodeKind::Call => self.compile_call(node, ctx)?,
            NodeKind::ThreadSpawn => {
                let name = node.lexeme().to_string();
                self.emit(Op::ThreadSpawn);
                let at = self.chunk.code.len();
                self.chunk.emit_short(0xFFFF, self.line);
                self.pending_calls.push((at, name, self.line));
            }
            NodeKind::ThreadJoin => {
                self.compile_expression(node.left.as_ref().unwrap(), ctx)?;
                self.emit(Op::ThreadJoin);
            }
            other => {
                return Err(CompileError::Verifier {
                    message: format!("{} is not an expression", other.name()),
                    line: self.line,
                })
            }
        }
        Ok(())
    }

    /// Assignment is an expression whose value is the assigned value, so the
    /// enclosing expression statement stays balanced with a single POP.
    fn compile_assign(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        let target = node.left.as_ref().unwrap();
        match target.kind {
            NodeKind::Variable => {
                self.compile_expression(node.right.as_ref().unwrap(), ctx)?;
                self.emit(Op::Dup);
                let name = target.lexeme();
                if let Some(slot) = ctx.resolve(name) {
                    self.emit(Op::SetLocal);
                    self.emit_byte(slot);
                } else {
                    self.emit_name(Op::SetGlobal, name)?;
                }
            }
            NodeKind::ArrayAccess => {
                // pointer-to-array, index, value; SET_ELEMENT stores through
                // the cell and the value is re-read for the expression result
                self.compile_lvalue_address(target.left.as_ref().unwrap(), ctx)?;
                self.compile_expression(target.right.as_ref().unwrap(), ctx)?;
                self.compile_expression(node.right.as_ref().unwrap(), ctx)?;
                self.emit(Op::SetElement);
            }
            NodeKind::FieldAccess => {
                self.compile_lvalue_address(target.left.as_ref().unwrap(), ctx)?;
                self.compile_expression(node.right.as_ref().unwrap(), ctx)?;
                self.emit_name(Op::SetField, target.lexeme())?;
            }
            _ => {
                return Err(CompileError::Verifier {
                    message: "assignment target is not an lvalue".into(),
                    line: self.line,
                })
            }
        }
        Ok(())
    }

    fn compile_binary(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        let op = node.token_type().unwrap();
        let left = node.left.as_ref().unwrap();
        let right = node.right.as_ref().unwrap();

        // Logical and/or short-circuit regardless of operand kind; the
        // explicitly bitwise operators map to the And/Or/Xor opcodes.
        match op {
            TokenType::And => {
                self.compile_expression(left, ctx)?;
                self.emit(Op::Dup);
                let end = self.emit_jump(Op::JumpIfFalse);
                self.emit(Op::Pop);
                self.compile_expression(right, ctx)?;
                self.patch_jump(end)?;
                return Ok(());
            }
            TokenType::Or => {
                self.compile_expression(left, ctx)?;
                self.emit(Op::Dup);
                self.emit(Op::Not);
                let end = self.emit_jump(Op::JumpIfFalse);
                self.emit(Op::Pop);
                self.compile_expression(right, ctx)?;
                self.patch_jump(end)?;
                return Ok(());
            }
            _ => {}
        }

        self.compile_expression(left, ctx)?;
        self.compile_expression(right, ctx)?;
        let bc = match op {
            TokenType::Plus => Op::Add,
            TokenType::Minus => Op::Subtract,
            TokenType::Star => Op::Multiply,
            TokenType::Slash => Op::Divide,
            TokenType::IntDiv => Op::IntDiv,
            TokenType::Mod => Op::Mod,
            TokenType::Equal => Op::Equal,
            TokenType::NotEqual => Op::NotEqual,
            TokenType::Less => Op::Less,
            TokenType::LessEqual => Op::LessEqual,
            TokenType::Greater => Op::Greater,
            TokenType::GreaterEqual => Op::GreaterEqual,
            TokenType::Ampersand => Op::And,
            TokenType::Pipe => Op::Or,
            TokenType::Xor => Op::Xor,
            other => {
                return Err(CompileError::Verifier {
                    message: format!("unsupported binary operator {}", other.name()),
                    line: self.line,
                })
            }
        };
        self.emit(bc);
        Ok(())
    }

    fn compile_call(&mut self, node: &Node, ctx: &mut FuncContext) -> Result<(), CompileError> {
        let name = node.lexeme().to_string();
        for arg in &node.children {
            self.compile_expression(arg, ctx)?;
        }
        let argc = node.children.len() as u8;

        let is_procedure = self.tables.procedures.contains(&name);
        if is_procedure {
            let name_idx = self.add_constant(Value::string(&name))? as u16;
            self.emit(Op::Call);
            self.chunk.emit_short(name_idx, self.line);
            let addr_at = self.chunk.code.len();
            match self.tables.procedures.lookup(&name) {
                Some(sym) if sym.is_defined => {
                    let addr = sym.bytecode_address;
                    self.chunk.emit_short(addr, self.line);
                }
                _ => {
                    self.chunk.emit_short(0xFFFF, self.line);
                    self.pending_calls.push((addr_at, name, self.line));
                }
            }
            self.emit_byte(argc);
        } else {
            // Everything else dispatches through the builtin registry; an
            // unknown name surfaces as a runtime NameError with its arity.
            let name_idx = self.add_constant(Value::string(name.to_lowercase()))? as u16;
            self.emit(Op::CallBuiltin);
            self.chunk.emit_short(name_idx, self.line);
            self.emit_byte(argc);
        }
        Ok(())
    }

    /// Push the pointer cell of an lvalue (VAR-parameter convention).
    fn compile_lvalue_address(
        &mut self,
        node: &Node,
        ctx: &mut FuncContext,
    ) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::Variable => {
                let slot = ctx.resolve(node.lexeme()).ok_or_else(|| CompileError::Verifier {
                    message: format!(
                        "cannot take the address of non-local '{}'",
                        node.lexeme()
                    ),
                    line: node.line(),
                })?;
                self.emit(Op::GetLocalAddress);
                self.emit_byte(slot);
            }
            NodeKind::AddressOf => {
                self.compile_lvalue_address(node.left.as_ref().unwrap(), ctx)?;
            }
            _ => {
                return Err(CompileError::Verifier {
                    message: "expression is not addressable".into(),
                    line: node.line(),
                })
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Local collection passes
// ---------------------------------------------------------------------------

fn collect_locals(node: &Node, ctx: &mut FuncContext) {
    if node.kind == NodeKind::VarDecl {
        let slot = ctx.add_local(node.lexeme(), node.var_type);
        if node.var_type == VarType::Array {
            if let Some(type_ref) = &node.extra {
                if type_ref.kind == NodeKind::TypeRef {
                    ctx.arrays[slot as usize] = Some((type_ref.i_val, type_ref.var_type));
                    // Element stores go through the slot's pointer cell.
                    if !ctx.pointer_slots.contains(&slot) {
                        ctx.pointer_slots.push(slot);
                    }
                }
            }
        }
        // Initializer expressions cannot declare further locals.
        return;
    }
    if let Some(n) = &node.left {
        collect_locals(n, ctx);
    }
    if let Some(n) = &node.right {
        collect_locals(n, ctx);
    }
    if let Some(n) = &node.extra {
        collect_locals(n, ctx);
    }
    for n in &node.children {
        collect_locals(n, ctx);
    }
}

fn mark_pointer(ctx: &mut FuncContext, name: &str) {
    if let Some(slot) = ctx.resolve(name) {
        if !ctx.pointer_slots.contains(&slot) {
            ctx.pointer_slots.push(slot);
        }
    }
}

/// A slot needs promotion when its address escapes: readln targets, explicit
/// address-of, and element/field stores into it.
fn collect_address_taken(node: &Node, ctx: &mut FuncContext) {
    match node.kind {
        NodeKind::Read | NodeKind::ReadLn => {
            for target in &node.children {
                if target.kind == NodeKind::Variable {
                    mark_pointer(ctx, target.lexeme());
                }
            }
        }
        NodeKind::AddressOf => {
            if let Some(target) = &node.left {
                if target.kind == NodeKind::Variable {
                    mark_pointer(ctx, target.lexeme());
                }
            }
        }
        NodeKind::Assign => {
            if let Some(target) = &node.left {
                if matches!(target.kind, NodeKind::ArrayAccess | NodeKind::FieldAccess) {
                    if let Some(base) = &target.left {
                        if base.kind == NodeKind::Variable {
                            mark_pointer(ctx, base.lexeme());
                        }
                    }
                }
            }
        }
        _ => {}
    }
    if let Some(n) = &node.left {
        collect_address_taken(n, ctx);
    }
    if let Some(n) = &node.right {
        collect_address_taken(n, ctx);
    }
    if let Some(n) = &node.extra {
        collect_address_taken(n, ctx);
    }
    for n in &node.children {
        collect_address_taken(n, ctx);
    }
}

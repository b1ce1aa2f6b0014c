/// Semantic annotation for the C-like frontend.
///
/// Fills in the pieces the shared pipeline requires: every expression node
/// gets a static type, procedures land in the procedure table with arity and
/// locals count before codegen runs, builtin aliases are canonicalized, and
/// the io pseudo-calls are rewritten into their dedicated node kinds
/// (write/writeln into Write/WriteLn, scanf/readln into ReadLn over bare
/// lvalues). Division of two integers is re-tagged as integer division here
/// so the C surface keeps C semantics while `/` stays real division for
/// float operands.

use std::collections::HashMap;

use crate::ast::{Node, NodeKind, TokenType};
use crate::builtins;
use crate::errors::SemanticError;
use crate::symbols::{Symbol, SymbolTables};
use crate::value::VarType;

#[derive(Clone, Copy)]
struct LocalInfo {
    vt: VarType,
    elem: Option<VarType>,
}

struct Scope {
    locals: HashMap<String, LocalInfo>,
}

impl Scope {
    fn insert(&mut self, name: &str, vt: VarType, elem: Option<VarType>) {
        self.locals.insert(name.to_lowercase(), LocalInfo { vt, elem });
    }

    fn get(&self, name: &str) -> Option<LocalInfo> {
        self.locals.get(&name.to_lowercase()).copied()
    }
}

pub fn analyze(program: &mut Node, tables: &mut SymbolTables) -> Result<(), SemanticError> {
    builtins::install_clike_aliases();

    // Pass 1: hoist globals and procedure signatures so forward calls and
    // mutual recursion resolve.
    for decl in &program.children {
        match decl.kind {
            NodeKind::VarDecl => {
                tables.globals.insert(Symbol::variable(decl.lexeme(), decl.var_type));
            }
            NodeKind::FunDecl | NodeKind::ProcDecl => {
                let name = decl.lexeme().to_string();
                let arity = decl.left.as_ref().map(|p| p.children.len()).unwrap_or(0) as u8;
                // The program prologue calls main with no arguments.
                if name.eq_ignore_ascii_case("main") && arity != 0 {
                    return Err(SemanticError::ArityMismatch {
                        name,
                        expected: 0,
                        found: arity as usize,
                        line: decl.line(),
                    });
                }
                let locals = count_locals(decl.right.as_ref());
                // Every declaration in this surface carries a body, so any
                // prior entry is a redefinition.
                if tables.procedures.contains(&name) {
                    return Err(SemanticError::Redefinition { name, line: decl.line() });
                }
                tables
                    .procedures
                    .insert(Symbol::procedure(&name, decl.var_type, arity, locals));
                // The address is assigned in codegen; until then the symbol
                // counts as declared but not defined.
                if let Some(sym) = tables.procedures.lookup_mut(&name) {
                    sym.is_defined = false;
                }
            }
            _ => {}
        }
    }

    // Pass 2: annotate bodies.
    for decl in &mut program.children {
        match decl.kind {
            NodeKind::VarDecl => {
                if let Some(init) = decl.left.as_deref_mut() {
                    let mut scope = Scope { locals: HashMap::new() };
                    annotate_expr(init, &mut scope, tables)?;
                }
            }
            NodeKind::FunDecl | NodeKind::ProcDecl => annotate_function(decl, tables)?,
            _ => {}
        }
    }
    Ok(())
}

fn count_locals(body: Option<&Box<Node>>) -> u8 {
    fn walk(node: &Node, count: &mut usize) {
        if node.kind == NodeKind::VarDecl {
            *count += 1;
            return;
        }
        if let Some(n) = &node.left {
            walk(n, count);
        }
        if let Some(n) = &node.right {
            walk(n, count);
        }
        if let Some(n) = &node.extra {
            walk(n, count);
        }
        for n in &node.children {
            walk(n, count);
        }
    }
    let mut count = 0;
    if let Some(body) = body {
        walk(body, &mut count);
    }
    count.min(u8::MAX as usize) as u8
}

fn annotate_function(func: &mut Node, tables: &mut SymbolTables) -> Result<(), SemanticError> {
    let mut scope = Scope { locals: HashMap::new() };
    if let Some(params) = &func.left {
        for p in &params.children {
            scope.insert(p.lexeme(), p.var_type, None);
        }
    }
    if let Some(body) = func.right.as_deref_mut() {
        annotate_stmt(body, &mut scope, tables)?;
    }
    Ok(())
}

fn annotate_stmt(
    node: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
) -> Result<(), SemanticError> {
    match node.kind {
        NodeKind::Compound | NodeKind::Block => {
            for child in &mut node.children {
                annotate_stmt(child, scope, tables)?;
            }
        }
        NodeKind::VarDecl => {
            let elem = node.extra.as_ref().filter(|t| t.kind == NodeKind::TypeRef).map(|t| t.var_type);
            scope.insert(node.lexeme(), node.var_type, elem);
            if let Some(init) = node.left.as_deref_mut() {
                annotate_expr(init, scope, tables)?;
            }
        }
        NodeKind::ExprStmt => {
            if let Some(expr) = node.left.as_deref_mut() {
                rewrite_io_call(expr, scope, tables)?;
            }
            // The rewrite may have replaced the expression with a statement
            // kind; hoist it so codegen sees the dedicated node.
            if let Some(inner) = node.left.as_deref() {
                if matches!(inner.kind, NodeKind::Write | NodeKind::WriteLn | NodeKind::ReadLn) {
                    let inner = *node.left.take().unwrap();
                    *node = inner;
                    return Ok(());
                }
            }
            if let Some(expr) = node.left.as_deref_mut() {
                annotate_expr_at(expr, scope, tables, true)?;
            }
        }
        NodeKind::Return => {
            if let Some(expr) = node.left.as_deref_mut() {
                annotate_expr(expr, scope, tables)?;
            }
        }
        NodeKind::If | NodeKind::While => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            annotate_stmt(node.right.as_deref_mut().unwrap(), scope, tables)?;
            if let Some(else_branch) = node.extra.as_deref_mut() {
                annotate_stmt(else_branch, scope, tables)?;
            }
        }
        NodeKind::Repeat => {
            annotate_stmt(node.left.as_deref_mut().unwrap(), scope, tables)?;
            annotate_expr(node.right.as_deref_mut().unwrap(), scope, tables)?;
        }
        NodeKind::For => {
            if let Some(init) = node.left.as_deref_mut() {
                annotate_stmt(init, scope, tables)?;
            }
            if let Some(cond) = node.right.as_deref_mut() {
                annotate_expr(cond, scope, tables)?;
            }
            if let Some(update) = node.extra.as_deref_mut() {
                annotate_stmt(update, scope, tables)?;
            }
            for child in &mut node.children {
                annotate_stmt(child, scope, tables)?;
            }
        }
        NodeKind::Case => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            for branch in &mut node.children {
                for label in &mut branch.children {
                    annotate_expr(label, scope, tables)?;
                }
                if let Some(body) = branch.right.as_deref_mut() {
                    annotate_stmt(body, scope, tables)?;
                }
            }
        }
        NodeKind::Write | NodeKind::WriteLn | NodeKind::Read | NodeKind::ReadLn => {
            for child in &mut node.children {
                annotate_expr(child, scope, tables)?;
            }
        }
        NodeKind::NoOp | NodeKind::Import | NodeKind::UsesClause => {}
        _ => {
            annotate_expr(node, scope, tables)?;
        }
    }
    Ok(())
}

/// Rewrites write/writeln/scanf/readln pseudo-calls into their dedicated
/// node kinds. Only applies in statement position.
fn rewrite_io_call(
    expr: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
) -> Result<(), SemanticError> {
    if expr.kind != NodeKind::Call {
        return Ok(());
    }
    let name = expr.lexeme().to_lowercase();
    let kind = match name.as_str() {
        "write" => NodeKind::Write,
        "writeln" => NodeKind::WriteLn,
        "scanf" | "readln" => NodeKind::ReadLn,
        _ => return Ok(()),
    };
    if tables.procedures.contains(&name) {
        return Ok(()); // user-defined procedure shadows the pseudo-call
    }

    let mut node = Node::new(kind, expr.token.take());
    for mut arg in std::mem::take(&mut expr.children) {
        if kind == NodeKind::ReadLn {
            // scanf passes &x; readln passes x. Either way the codegen wants
            // the bare lvalue.
            let target = if arg.kind == NodeKind::AddressOf {
                *arg.left.take().unwrap()
            } else {
                arg
            };
            if target.kind != NodeKind::Variable {
                return Err(SemanticError::BadLValue { line: target.line() });
            }
            node.push_child(target);
        } else {
            annotate_expr(&mut arg, scope, tables)?;
            node.push_child(arg);
        }
    }
    if kind == NodeKind::ReadLn {
        for child in &mut node.children {
            annotate_expr(child, scope, tables)?;
        }
    }
    *expr = node;
    Ok(())
}

fn annotate_expr(
    node: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
) -> Result<(), SemanticError> {
    annotate_expr_at(node, scope, tables, false)
}

fn annotate_expr_at(
    node: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
    statement_pos: bool,
) -> Result<(), SemanticError> {
    match node.kind {
        NodeKind::Number
        | NodeKind::StringLit
        | NodeKind::CharLit
        | NodeKind::BooleanLit
        | NodeKind::NilLit
        | NodeKind::EnumValue => {}
        NodeKind::Variable => {
            let name = node.lexeme().to_string();
            if let Some(info) = scope.get(&name) {
                node.set_type(info.vt);
            } else if let Some(sym) = tables.globals.lookup(&name) {
                node.set_type(sym.var_type);
            } else if let Some(sym) = tables.constants.lookup(&name) {
                node.set_type(sym.var_type);
            } else {
                return Err(SemanticError::UndefinedVariable { name, line: node.line() });
            }
        }
        NodeKind::AddressOf => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            node.set_type(VarType::Pointer);
        }
        NodeKind::ArrayAccess => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            annotate_expr(node.right.as_deref_mut().unwrap(), scope, tables)?;
            let base = node.left.as_deref().unwrap();
            let elem = match base.var_type {
                VarType::Str => VarType::Char,
                VarType::Array => {
                    if base.kind == NodeKind::Variable {
                        scope.get(base.lexeme()).and_then(|i| i.elem).unwrap_or(VarType::Int64)
                    } else {
                        VarType::Int64
                    }
                }
                _ => VarType::Int64,
            };
            node.set_type(elem);
        }
        NodeKind::FieldAccess => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            node.set_type(VarType::Int64);
        }
        NodeKind::Assign => {
            let target = node.left.as_deref_mut().unwrap();
            if !matches!(
                target.kind,
                NodeKind::Variable | NodeKind::ArrayAccess | NodeKind::FieldAccess
            ) {
                return Err(SemanticError::BadLValue { line: target.line() });
            }
            annotate_expr(target, scope, tables)?;
            annotate_expr(node.right.as_deref_mut().unwrap(), scope, tables)?;
            let vt = node.left.as_deref().unwrap().var_type;
            node.set_type(vt);
        }
        NodeKind::UnaryOp => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            let vt = match node.token_type() {
                Some(TokenType::Not) => VarType::Boolean,
                _ => node.left.as_deref().unwrap().var_type,
            };
            node.set_type(vt);
        }
        NodeKind::BinaryOp => annotate_binary(node, scope, tables)?,
        NodeKind::Call => annotate_call(node, scope, tables, statement_pos)?,
        NodeKind::ThreadSpawn => {
            let name = node.lexeme().to_string();
            match tables.procedures.lookup(&name) {
                Some(sym) if sym.arity == 0 => {}
                Some(sym) => {
                    return Err(SemanticError::ArityMismatch {
                        name,
                        expected: 0,
                        found: sym.arity as usize,
                        line: node.line(),
                    })
                }
                None => {
                    return Err(SemanticError::UndefinedFunction { name, line: node.line() })
                }
            }
            node.set_type(VarType::Int64);
        }
        NodeKind::ThreadJoin => {
            annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
            node.set_type(VarType::Int64);
        }
        _ => {}
    }
    Ok(())
}

fn annotate_binary(
    node: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
) -> Result<(), SemanticError> {
    annotate_expr(node.left.as_deref_mut().unwrap(), scope, tables)?;
    annotate_expr(node.right.as_deref_mut().unwrap(), scope, tables)?;
    let lt = node.left.as_deref().unwrap().var_type;
    let rt = node.right.as_deref().unwrap().var_type;
    let both_int = lt.is_integer() && rt.is_integer();

    let vt = match node.token_type().unwrap() {
        TokenType::Plus => {
            if lt == VarType::Str || rt == VarType::Str {
                VarType::Str
            } else if both_int {
                VarType::Int64
            } else {
                VarType::Real
            }
        }
        TokenType::Minus | TokenType::Star => {
            if both_int {
                VarType::Int64
            } else {
                VarType::Real
            }
        }
        TokenType::Slash => {
            if both_int {
                // C semantics: integer division stays integral.
                if let Some(token) = &mut node.token {
                    token.ttype = TokenType::IntDiv;
                }
                VarType::Int64
            } else {
                VarType::Real
            }
        }
        TokenType::IntDiv | TokenType::Mod => VarType::Int64,
        TokenType::Equal
        | TokenType::NotEqual
        | TokenType::Less
        | TokenType::LessEqual
        | TokenType::Greater
        | TokenType::GreaterEqual
        | TokenType::And
        | TokenType::Or => VarType::Boolean,
        TokenType::Ampersand | TokenType::Pipe => VarType::Int64,
        TokenType::Xor => {
            if lt == VarType::Boolean && rt == VarType::Boolean {
                VarType::Boolean
            } else {
                VarType::Int64
            }
        }
        _ => VarType::Int64,
    };
    node.set_type(vt);
    Ok(())
}

/// Result types for builtins whose value is not integer-shaped.
fn builtin_result_type(name: &str) -> VarType {
    match name {
        "str" | "copy" | "upcase" | "lowcase" | "reversestring" | "paramstr"
        | "getcurrentdir" | "thread_get_status" | "thread_stats" => VarType::Str,
        "sqrt" | "realtimeclock" => VarType::Real,
        "chr" => VarType::Char,
        _ => VarType::Int64,
    }
}

fn annotate_call(
    node: &mut Node,
    scope: &mut Scope,
    tables: &mut SymbolTables,
    statement_pos: bool,
) -> Result<(), SemanticError> {
    let raw_name = node.lexeme().to_string();

    if let Some(sym) = tables.procedures.lookup(&raw_name) {
        let (arity, ret) = (sym.arity as usize, sym.var_type);
        if node.children.len() != arity {
            return Err(SemanticError::ArityMismatch {
                name: raw_name,
                expected: arity,
                found: node.children.len(),
                line: node.line(),
            });
        }
        if !statement_pos && ret == VarType::Void {
            return Err(SemanticError::ProcedureAsValue { name: raw_name, line: node.line() });
        }
        for arg in &mut node.children {
            annotate_expr(arg, scope, tables)?;
        }
        node.set_type(if ret == VarType::Void { VarType::Int64 } else { ret });
        return Ok(());
    }

    // Builtin path: canonicalize the alias into the token so codegen emits
    // the registry name.
    let canonical = builtins::canonical_name(&raw_name);
    if canonical != raw_name.to_lowercase() {
        if let Some(token) = &mut node.token {
            token.lexeme = canonical.clone();
        }
    }
    if let Some(builtin) = builtins::lookup(&canonical) {
        if !statement_pos && builtin.kind == builtins::BuiltinKind::Procedure {
            // readln and friends have no value; halt is the one exception
            // callers legitimately ignore everywhere.
            if canonical != "halt" {
                return Err(SemanticError::ProcedureAsValue {
                    name: raw_name,
                    line: node.line(),
                });
            }
        }
    }
    for arg in &mut node.children {
        // Address-of arguments stay unannotated pointers for VAR passing.
        annotate_expr(arg, scope, tables)?;
    }
    node.set_type(builtin_result_type(&canonical));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use std::path::PathBuf;

    fn analyzed(src: &str) -> (Node, SymbolTables) {
        builtins::register_core_builtins();
        builtins::register_extended_builtins();
        let tokens = Lexer::new(src).tokenize().unwrap();
        let mut program = Parser::new(tokens, PathBuf::from("."), Vec::new())
            .parse_program()
            .unwrap();
        let mut tables = SymbolTables::new();
        analyze(&mut program, &mut tables).unwrap();
        (program, tables)
    }

    fn analyze_err(src: &str) -> SemanticError {
        builtins::register_core_builtins();
        let tokens = Lexer::new(src).tokenize().unwrap();
        let mut program = Parser::new(tokens, PathBuf::from("."), Vec::new())
            .parse_program()
            .unwrap();
        let mut tables = SymbolTables::new();
        analyze(&mut program, &mut tables).unwrap_err()
    }

    #[test]
    fn procedures_register_arity_and_locals() {
        let (_, tables) = analyzed("int f(int a, int b) { int x; int y; return a; } int main() { return f(1, 2); }");
        let sym = tables.procedures.lookup("f").unwrap();
        assert_eq!(sym.arity, 2);
        assert_eq!(sym.locals_count, 2);
        assert_eq!(sym.var_type, VarType::Int32);
    }

    #[test]
    fn integer_division_is_retagged() {
        let (program, _) = analyzed("int main() { return 7 / 2; }");
        let ret = &program.children[0].right.as_ref().unwrap().children[0];
        let div = ret.left.as_ref().unwrap();
        assert_eq!(div.token_type(), Some(TokenType::IntDiv));
        assert_eq!(div.var_type, VarType::Int64);
    }

    #[test]
    fn float_division_stays_real() {
        let (program, _) = analyzed("int main() { double x; x = 7.0 / 2; return 0; }");
        let body = program.children[0].right.as_ref().unwrap();
        let assign = body.children[1].left.as_ref().unwrap();
        let div = assign.right.as_ref().unwrap();
        assert_eq!(div.token_type(), Some(TokenType::Slash));
        assert_eq!(div.var_type, VarType::Real);
    }

    #[test]
    fn printf_stays_a_call_but_writeln_rewrites() {
        let (program, _) = analyzed(
            "int main() { printf(\"x\"); writeln(1, 2); return 0; }",
        );
        let body = program.children[0].right.as_ref().unwrap();
        assert_eq!(body.children[0].kind, NodeKind::ExprStmt);
        assert_eq!(body.children[1].kind, NodeKind::WriteLn);
        assert_eq!(body.children[1].children.len(), 2);
    }

    #[test]
    fn scanf_rewrites_to_readln_over_bare_lvalues() {
        let (program, _) = analyzed("int main() { int x; scanf(&x); return x; }");
        let body = program.children[0].right.as_ref().unwrap();
        assert_eq!(body.children[1].kind, NodeKind::ReadLn);
        assert_eq!(body.children[1].children[0].kind, NodeKind::Variable);
    }

    #[test]
    fn alias_canonicalization_rewrites_the_callee() {
        let (program, _) = analyzed("int main() { str s; s = \"ab\"; return strlen(s); }");
        let body = program.children[0].right.as_ref().unwrap();
        let ret = body.children.last().unwrap();
        let call = ret.left.as_ref().unwrap();
        assert_eq!(call.lexeme(), "length");
    }

    #[test]
    fn undefined_variable_is_reported() {
        let err = analyze_err("int main() { return nope; }");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn redefinition_is_reported() {
        let err = analyze_err("int f() { return 1; } int f() { return 2; } int main() { return 0; }");
        assert!(matches!(err, SemanticError::Redefinition { .. }));
    }

    #[test]
    fn call_arity_is_checked_for_user_functions() {
        let err = analyze_err("int f(int a) { return a; } int main() { return f(); }");
        assert!(matches!(err, SemanticError::ArityMismatch { .. }));
    }

    #[test]
    fn void_function_rejected_in_value_position() {
        let err = analyze_err(
            "void p() { return; } int main() { int x; x = p(); return x; }",
        );
        assert!(matches!(err, SemanticError::ProcedureAsValue { .. }));
    }
}

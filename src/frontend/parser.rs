/// Recursive-descent parser for the C-like surface, producing the shared
/// AST. `import "file";` splices the imported file's declarations into the
/// current program and records the resolved path in the dependency list that
/// feeds the bytecode cache. Import search order: the importing file's
/// directory, then CLIKE_LIB_DIR.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::ast::{Node, NodeKind, Token, TokenType};
use crate::errors::ParseError;
use crate::frontend::lexer::Lexer;
use crate::preproc::preprocess;
use crate::value::VarType;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source_dir: PathBuf,
    defines: Vec<String>,
    pub deps: Vec<PathBuf>,
    visited_imports: HashSet<PathBuf>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, source_dir: PathBuf, defines: Vec<String>) -> Parser {
        Parser {
            tokens,
            pos: 0,
            source_dir,
            defines,
            deps: Vec::new(),
            visited_imports: HashSet::new(),
        }
    }

    // ── Token plumbing ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_type(&self) -> TokenType {
        self.peek().ttype
    }

    fn peek_ahead(&self, n: usize) -> TokenType {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.ttype)
            .unwrap_or(TokenType::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&mut self, ttype: TokenType) -> bool {
        if self.peek_type() == ttype {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ttype: TokenType, what: &str) -> Result<Token, ParseError> {
        if self.peek_type() == ttype {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: what.into(),
                found: format!("'{}'", self.peek().lexeme),
                line: self.peek().line,
            })
        }
    }

    fn type_keyword(&self) -> Option<VarType> {
        Some(match self.peek_type() {
            TokenType::KwInt => VarType::Int32,
            TokenType::KwLong => VarType::Int64,
            TokenType::KwFloat => VarType::Single,
            TokenType::KwDouble => VarType::Real,
            TokenType::KwChar => VarType::Char,
            TokenType::KwStr => VarType::Str,
            TokenType::KwVoid => VarType::Void,
            _ => return None,
        })
    }

    // ── Program level ───────────────────────────────────────────────────────

    pub fn parse_program(&mut self) -> Result<Node, ParseError> {
        let mut program = Node::new(NodeKind::Program, None);
        while self.peek_type() != TokenType::Eof {
            if self.peek_type() == TokenType::KwImport {
                self.parse_import(&mut program)?;
                continue;
            }
            let decl = self.parse_top_decl()?;
            program.push_child(decl);
        }
        program.unit_deps = self.deps.iter().map(|p| p.display().to_string()).collect();
        Ok(program)
    }

    fn parse_import(&mut self, program: &mut Node) -> Result<(), ParseError> {
        let kw = self.expect(TokenType::KwImport, "'import'")?;
        let path_token = self.expect(TokenType::StringConst, "import path string")?;
        self.expect(TokenType::Semicolon, "';'")?;

        let resolved = self.resolve_import(&path_token.lexeme).ok_or_else(|| {
            ParseError::ImportNotFound { path: path_token.lexeme.clone(), line: kw.line }
        })?;
        if !self.visited_imports.insert(resolved.clone()) {
            return Ok(()); // already spliced in
        }
        self.deps.push(resolved.clone());

        let text = std::fs::read_to_string(&resolved).map_err(|_| ParseError::ImportNotFound {
            path: path_token.lexeme.clone(),
            line: kw.line,
        })?;
        let text = preprocess(&text, &self.defines)?;
        let tokens = Lexer::new(&text).tokenize()?;
        let mut sub = Parser::new(
            tokens,
            resolved.parent().map(Path::to_path_buf).unwrap_or_default(),
            self.defines.clone(),
        );
        sub.visited_imports = std::mem::take(&mut self.visited_imports);
        let unit = sub.parse_program()?;
        self.visited_imports = sub.visited_imports;
        for dep in sub.deps {
            if !self.deps.contains(&dep) {
                self.deps.push(dep);
            }
        }
        for child in unit.children {
            program.push_child(child);
        }
        Ok(())
    }

    fn resolve_import(&self, path: &str) -> Option<PathBuf> {
        let local = self.source_dir.join(path);
        if local.is_file() {
            return local.canonicalize().ok();
        }
        if let Ok(lib_dir) = std::env::var("CLIKE_LIB_DIR") {
            let in_lib = Path::new(&lib_dir).join(path);
            if in_lib.is_file() {
                return in_lib.canonicalize().ok();
            }
        }
        None
    }

    fn parse_top_decl(&mut self) -> Result<Node, ParseError> {
        let vt = self.type_keyword().ok_or_else(|| ParseError::UnexpectedToken {
            expected: "type keyword".into(),
            found: format!("'{}'", self.peek().lexeme),
            line: self.peek().line,
        })?;
        self.advance();
        let name = self.expect(TokenType::Identifier, "identifier")?;

        if self.peek_type() == TokenType::LParen {
            return self.parse_function(vt, name);
        }

        // Global scalar declaration with optional initializer.
        if self.peek_type() == TokenType::LBracket {
            return Err(ParseError::UnexpectedToken {
                expected: "';' (arrays must be declared inside a function)".into(),
                found: "'['".into(),
                line: name.line,
            });
        }
        let mut decl = Node::new(NodeKind::VarDecl, Some(name));
        decl.set_type(vt);
        if self.check(TokenType::Assign) {
            let init = self.parse_expression()?;
            decl.set_left(init);
        }
        self.expect(TokenType::Semicolon, "';'")?;
        Ok(decl)
    }

    fn parse_function(&mut self, ret: VarType, name: Token) -> Result<Node, ParseError> {
        self.expect(TokenType::LParen, "'('")?;
        let mut params = Node::new(NodeKind::Block, None);
        if self.peek_type() != TokenType::RParen {
            loop {
                if self.peek_type() == TokenType::KwVoid && self.peek_ahead(1) == TokenType::RParen
                {
                    self.advance();
                    break;
                }
                let pt = self.type_keyword().ok_or_else(|| ParseError::UnexpectedToken {
                    expected: "parameter type".into(),
                    found: format!("'{}'", self.peek().lexeme),
                    line: self.peek().line,
                })?;
                self.advance();
                let pname = self.expect(TokenType::Identifier, "parameter name")?;
                let mut param = Node::new(NodeKind::Param, Some(pname));
                param.set_type(pt);
                params.push_child(param);
                if !self.check(TokenType::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenType::RParen, "')'")?;
        let body = self.parse_compound()?;

        let mut func = Node::new(NodeKind::FunDecl, Some(name));
        func.set_type(ret);
        func.set_left(params);
        func.set_right(body);
        Ok(func)
    }

    // ── Statements ──────────────────────────────────────────────────────────

    fn parse_compound(&mut self) -> Result<Node, ParseError> {
        let open = self.expect(TokenType::LBrace, "'{'")?;
        let mut block = Node::new(NodeKind::Compound, Some(open));
        while self.peek_type() != TokenType::RBrace {
            if self.peek_type() == TokenType::Eof {
                return Err(ParseError::UnexpectedEof {
                    context: "block".into(),
                    line: self.peek().line,
                });
            }
            block.push_child(self.parse_statement()?);
        }
        self.expect(TokenType::RBrace, "'}'")?;
        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        if self.type_keyword().is_some() {
            return self.parse_var_decl();
        }
        match self.peek_type() {
            TokenType::LBrace => self.parse_compound(),
            TokenType::KwIf => self.parse_if(),
            TokenType::KwWhile => self.parse_while(),
            TokenType::KwDo => self.parse_do_while(),
            TokenType::KwFor => self.parse_for(),
            TokenType::KwSwitch => self.parse_switch(),
            TokenType::KwReturn => {
                let kw = self.advance();
                let mut node = Node::new(NodeKind::Return, Some(kw));
                if self.peek_type() != TokenType::Semicolon {
                    let value = self.parse_expression()?;
                    node.set_left(value);
                }
                self.expect(TokenType::Semicolon, "';'")?;
                Ok(node)
            }
            TokenType::Semicolon => {
                let token = self.advance();
                Ok(Node::new(NodeKind::NoOp, Some(token)))
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenType::Semicolon, "';'")?;
                let mut stmt = Node::new(NodeKind::ExprStmt, None);
                stmt.set_left(expr);
                Ok(stmt)
            }
        }
    }

    fn parse_var_decl(&mut self) -> Result<Node, ParseError> {
        let vt = self.type_keyword().unwrap();
        self.advance();
        let name = self.expect(TokenType::Identifier, "identifier")?;
        let mut decl = Node::new(NodeKind::VarDecl, Some(name));

        if self.check(TokenType::LBracket) {
            let size = self.expect(TokenType::IntegerConst, "array size")?;
            let count: i64 = size.lexeme.parse().map_err(|_| ParseError::InvalidNumber {
                text: size.lexeme.clone(),
                line: size.line,
            })?;
            self.expect(TokenType::RBracket, "']'")?;
            let mut type_ref = Node::new(NodeKind::TypeRef, Some(size));
            type_ref.set_type(vt);
            type_ref.i_val = count;
            decl.set_type(VarType::Array);
            decl.set_extra(type_ref);
        } else {
            decl.set_type(vt);
            if self.check(TokenType::Assign) {
                let init = self.parse_expression()?;
                decl.set_left(init);
            }
        }
        self.expect(TokenType::Semicolon, "';'")?;
        Ok(decl)
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let kw = self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen, "')'")?;
        let then_branch = self.parse_statement()?;
        let mut node = Node::new(NodeKind::If, Some(kw));
        node.set_left(cond);
        node.set_right(then_branch);
        if self.check(TokenType::KwElse) {
            let else_branch = self.parse_statement()?;
            node.set_extra(else_branch);
        }
        Ok(node)
    }

    fn parse_while(&mut self) -> Result<Node, ParseError> {
        let kw = self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen, "')'")?;
        let body = self.parse_statement()?;
        let mut node = Node::new(NodeKind::While, Some(kw));
        node.set_left(cond);
        node.set_right(body);
        Ok(node)
    }

    fn parse_do_while(&mut self) -> Result<Node, ParseError> {
        let kw = self.advance();
        let body = self.parse_statement()?;
        self.expect(TokenType::KwWhile, "'while'")?;
        self.expect(TokenType::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenType::RParen, "')'")?;
        self.expect(TokenType::Semicolon, "';'")?;
        let mut node = Node::new(NodeKind::Repeat, Some(kw));
        node.set_left(body);
        node.set_right(cond);
        Ok(node)
    }

    fn parse_for(&mut self) -> Result<Node, ParseError> {
        let kw = self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let mut node = Node::new(NodeKind::For, Some(kw));

        if !self.check(TokenType::Semicolon) {
            if self.type_keyword().is_some() {
                let init = self.parse_var_decl()?;
                node.set_left(init);
            } else {
                let expr = self.parse_expression()?;
                self.expect(TokenType::Semicolon, "';'")?;
                let mut stmt = Node::new(NodeKind::ExprStmt, None);
                stmt.set_left(expr);
                node.set_left(stmt);
            }
        }
        if self.peek_type() != TokenType::Semicolon {
            let cond = self.parse_expression()?;
            node.set_right(cond);
        }
        self.expect(TokenType::Semicolon, "';'")?;
        if self.peek_type() != TokenType::RParen {
            let update = self.parse_expression()?;
            let mut stmt = Node::new(NodeKind::ExprStmt, None);
            stmt.set_left(update);
            node.set_extra(stmt);
        }
        self.expect(TokenType::RParen, "')'")?;
        let body = self.parse_statement()?;
        node.push_child(body);
        Ok(node)
    }

    fn parse_switch(&mut self) -> Result<Node, ParseError> {
        let kw = self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let subject = self.parse_expression()?;
        self.expect(TokenType::RParen, "')'")?;
        self.expect(TokenType::LBrace, "'{'")?;

        let mut node = Node::new(NodeKind::Case, Some(kw));
        node.set_left(subject);

        while self.peek_type() != TokenType::RBrace {
            let mut branch = Node::new(NodeKind::CaseBranch, None);
            if self.check(TokenType::KwDefault) {
                self.expect(TokenType::Colon, "':'")?;
            } else {
                // One or more `case <literal>:` labels sharing a body.
                loop {
                    self.expect(TokenType::KwCase, "'case' or 'default'")?;
                    let label = self.parse_expression()?;
                    self.expect(TokenType::Colon, "':'")?;
                    branch.push_child(label);
                    if self.peek_type() != TokenType::KwCase {
                        break;
                    }
                }
            }
            let mut body = Node::new(NodeKind::Compound, None);
            while !matches!(
                self.peek_type(),
                TokenType::KwCase | TokenType::KwDefault | TokenType::RBrace
            ) {
                body.push_child(self.parse_statement()?);
            }
            branch.set_right(body);
            node.push_child(branch);
        }
        self.expect(TokenType::RBrace, "'}'")?;
        Ok(node)
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    pub fn parse_expression(&mut self) -> Result<Node, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, ParseError> {
        let target = self.parse_or()?;
        if self.peek_type() == TokenType::Assign {
            let token = self.advance();
            let value = self.parse_assignment()?;
            let mut node = Node::new(NodeKind::Assign, Some(token));
            node.set_left(target);
            node.set_right(value);
            return Ok(node);
        }
        Ok(target)
    }

    fn binary_ladder(
        &mut self,
        operators: &[TokenType],
        next: fn(&mut Parser) -> Result<Node, ParseError>,
    ) -> Result<Node, ParseError> {
        let mut left = next(self)?;
        while operators.contains(&self.peek_type()) {
            let token = self.advance();
            let right = next(self)?;
            let mut node = Node::new(NodeKind::BinaryOp, Some(token));
            node.set_left(left);
            node.set_right(right);
            left = node;
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Or], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::And], Parser::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Pipe], Parser::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Xor], Parser::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Ampersand], Parser::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Equal, TokenType::NotEqual], Parser::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(
            &[
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
            ],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(&[TokenType::Plus, TokenType::Minus], Parser::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        self.binary_ladder(
            &[TokenType::Star, TokenType::Slash, TokenType::Mod],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        match self.peek_type() {
            TokenType::Not | TokenType::Minus | TokenType::Plus => {
                let token = self.advance();
                let operand = self.parse_unary()?;
                let mut node = Node::new(NodeKind::UnaryOp, Some(token));
                node.set_left(operand);
                Ok(node)
            }
            TokenType::Ampersand => {
                let token = self.advance();
                let operand = self.parse_unary()?;
                let mut node = Node::new(NodeKind::AddressOf, Some(token));
                node.set_type(VarType::Pointer);
                node.set_left(operand);
                Ok(node)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_type() {
                TokenType::LParen if expr.kind == NodeKind::Variable => {
                    self.advance();
                    let mut call = Node::new(NodeKind::Call, expr.token.take());
                    if self.peek_type() != TokenType::RParen {
                        loop {
                            call.push_child(self.parse_expression()?);
                            if !self.check(TokenType::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RParen, "')'")?;
                    expr = call;
                }
                TokenType::LBracket => {
                    let token = self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenType::RBracket, "']'")?;
                    let mut access = Node::new(NodeKind::ArrayAccess, Some(token));
                    access.set_left(expr);
                    access.set_right(index);
                    expr = access;
                }
                TokenType::Dot => {
                    self.advance();
                    let field = self.expect(TokenType::Identifier, "field name")?;
                    let mut access = Node::new(NodeKind::FieldAccess, Some(field));
                    access.set_left(expr);
                    expr = access;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.peek_type() {
            TokenType::IntegerConst => {
                let token = self.advance();
                let value: i64 = token.lexeme.parse().map_err(|_| ParseError::InvalidNumber {
                    text: token.lexeme.clone(),
                    line: token.line,
                })?;
                let mut node = Node::new(NodeKind::Number, Some(token));
                node.i_val = value;
                node.set_type(VarType::Int64);
                Ok(node)
            }
            TokenType::HexConst => {
                let token = self.advance();
                let value = i64::from_str_radix(&token.lexeme, 16).map_err(|_| {
                    ParseError::InvalidNumber { text: token.lexeme.clone(), line: token.line }
                })?;
                let mut node = Node::new(NodeKind::Number, Some(token));
                node.i_val = value;
                node.set_type(VarType::Int64);
                Ok(node)
            }
            TokenType::RealConst => {
                let token = self.advance();
                let value: f64 = token.lexeme.parse().map_err(|_| ParseError::InvalidNumber {
                    text: token.lexeme.clone(),
                    line: token.line,
                })?;
                let mut node = Node::new(NodeKind::Number, Some(token));
                node.r_val = value;
                node.set_type(VarType::Real);
                Ok(node)
            }
            TokenType::StringConst => {
                let token = self.advance();
                let mut node = Node::new(NodeKind::StringLit, Some(token));
                node.set_type(VarType::Str);
                Ok(node)
            }
            TokenType::CharConst => {
                let token = self.advance();
                let mut node = Node::new(NodeKind::CharLit, Some(token));
                node.set_type(VarType::Char);
                Ok(node)
            }
            TokenType::True | TokenType::False => {
                let token = self.advance();
                let mut node = Node::new(NodeKind::BooleanLit, Some(token.clone()));
                node.b_val = token.ttype == TokenType::True;
                node.set_type(VarType::Boolean);
                Ok(node)
            }
            TokenType::Identifier => {
                let token = self.advance();
                Ok(Node::new(NodeKind::Variable, Some(token)))
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenType::RParen, "')'")?;
                Ok(expr)
            }
            TokenType::KwSpawn => {
                self.advance();
                let name = self.expect(TokenType::Identifier, "procedure name")?;
                let mut node = Node::new(NodeKind::ThreadSpawn, Some(name));
                node.set_type(VarType::Int64);
                Ok(node)
            }
            TokenType::KwJoin => {
                let kw = self.advance();
                self.expect(TokenType::LParen, "'('")?;
                let handle = self.parse_expression()?;
                self.expect(TokenType::RParen, "')'")?;
                let mut node = Node::new(NodeKind::ThreadJoin, Some(kw));
                node.set_left(handle);
                Ok(node)
            }
            TokenType::Eof => Err(ParseError::UnexpectedEof {
                context: "expression".into(),
                line: self.peek().line,
            }),
            _ => Err(ParseError::UnexpectedToken {
                expected: "expression".into(),
                found: format!("'{}'", self.peek().lexeme),
                line: self.peek().line,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Node {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens, PathBuf::from("."), Vec::new())
            .parse_program()
            .unwrap()
    }

    #[test]
    fn parses_a_minimal_program() {
        let program = parse("int main() { return 0; }");
        assert_eq!(program.kind, NodeKind::Program);
        assert_eq!(program.children.len(), 1);
        let main = &program.children[0];
        assert_eq!(main.kind, NodeKind::FunDecl);
        assert_eq!(main.lexeme(), "main");
        assert_eq!(main.var_type, VarType::Int32);
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse("int main() { return 1 + 2 * 3; }");
        let ret = &program.children[0].right.as_ref().unwrap().children[0];
        let add = ret.left.as_ref().unwrap();
        assert_eq!(add.token_type(), Some(TokenType::Plus));
        let rhs = add.right.as_ref().unwrap();
        assert_eq!(rhs.token_type(), Some(TokenType::Star));
    }

    #[test]
    fn if_else_fills_all_three_children() {
        let program = parse("int main() { if (1) return 1; else return 2; }");
        let stmt = &program.children[0].right.as_ref().unwrap().children[0];
        assert_eq!(stmt.kind, NodeKind::If);
        assert!(stmt.left.is_some() && stmt.right.is_some() && stmt.extra.is_some());
    }

    #[test]
    fn array_declarations_carry_a_type_ref() {
        let program = parse("int main() { int a[10]; a[0] = 1; return a[0]; }");
        let decl = &program.children[0].right.as_ref().unwrap().children[0];
        assert_eq!(decl.kind, NodeKind::VarDecl);
        assert_eq!(decl.var_type, VarType::Array);
        let type_ref = decl.extra.as_ref().unwrap();
        assert_eq!(type_ref.i_val, 10);
        assert_eq!(type_ref.var_type, VarType::Int32);
    }

    #[test]
    fn address_of_builds_an_addressof_node() {
        let program = parse("int main() { int x; scanf(&x); return x; }");
        let stmt = &program.children[0].right.as_ref().unwrap().children[1];
        let call = stmt.left.as_ref().unwrap();
        assert_eq!(call.kind, NodeKind::Call);
        assert_eq!(call.children[0].kind, NodeKind::AddressOf);
    }

    #[test]
    fn switch_collects_branches_and_default() {
        let program = parse(
            "int main() { switch (2) { case 1: return 1; case 2: case 3: return 23; default: return 0; } }",
        );
        let sw = &program.children[0].right.as_ref().unwrap().children[0];
        assert_eq!(sw.kind, NodeKind::Case);
        assert_eq!(sw.children.len(), 3);
        assert_eq!(sw.children[1].children.len(), 2);
        assert!(sw.children[2].children.is_empty());
    }

    #[test]
    fn spawn_and_join_parse_into_thread_nodes() {
        let program = parse("int main() { long h; h = spawn worker; return join(h); }");
        let body = program.children[0].right.as_ref().unwrap();
        let assign = body.children[1].left.as_ref().unwrap();
        assert_eq!(assign.right.as_ref().unwrap().kind, NodeKind::ThreadSpawn);
        let ret = &body.children[2];
        assert_eq!(ret.left.as_ref().unwrap().kind, NodeKind::ThreadJoin);
    }

    #[test]
    fn missing_semicolon_is_reported_with_line() {
        let tokens = Lexer::new("int main() {\n return 0\n}").tokenize().unwrap();
        let err = Parser::new(tokens, PathBuf::from("."), Vec::new())
            .parse_program()
            .unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }
}

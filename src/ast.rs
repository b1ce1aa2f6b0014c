/// Language-neutral AST shared by every frontend.
///
/// Ownership is exclusive and top-down: a node owns its token, its three
/// distinguished children (left/right/extra) and its ordered child list.
/// The C original kept a non-owning parent back-pointer; here single
/// ownership makes "a child's parent is its textual parent" true by
/// construction, and the structural verifier checks the properties the type
/// system cannot: annotations present, mandatory children in place, literal
/// fields in agreement with their token.

use serde_json::{json, Value as Json};

use crate::errors::CompileError;
use crate::value::VarType;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Literals
    IntegerConst,
    HexConst,
    RealConst,
    StringConst,
    CharConst,
    True,
    False,
    Identifier,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    IntDiv,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Xor,
    Not,
    Assign,
    Ampersand,
    Pipe,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    // Keywords shared by the clike surface
    KwInt,
    KwLong,
    KwFloat,
    KwDouble,
    KwChar,
    KwStr,
    KwVoid,
    KwIf,
    KwElse,
    KwWhile,
    KwDo,
    KwFor,
    KwSwitch,
    KwCase,
    KwDefault,
    KwReturn,
    KwImport,
    KwSpawn,
    KwJoin,

    Eof,
}

impl TokenType {
    pub fn name(self) -> &'static str {
        match self {
            TokenType::IntegerConst => "INTEGER_CONST",
            TokenType::HexConst => "HEX_CONST",
            TokenType::RealConst => "REAL_CONST",
            TokenType::StringConst => "STRING_CONST",
            TokenType::CharConst => "CHAR_CONST",
            TokenType::True => "TRUE",
            TokenType::False => "FALSE",
            TokenType::Identifier => "IDENTIFIER",
            TokenType::Plus => "PLUS",
            TokenType::Minus => "MINUS",
            TokenType::Star => "STAR",
            TokenType::Slash => "SLASH",
            TokenType::IntDiv => "INT_DIV",
            TokenType::Mod => "MOD",
            TokenType::Equal => "EQUAL",
            TokenType::NotEqual => "NOT_EQUAL",
            TokenType::Less => "LESS",
            TokenType::LessEqual => "LESS_EQUAL",
            TokenType::Greater => "GREATER",
            TokenType::GreaterEqual => "GREATER_EQUAL",
            TokenType::And => "AND",
            TokenType::Or => "OR",
            TokenType::Xor => "XOR",
            TokenType::Not => "NOT",
            TokenType::Assign => "ASSIGN",
            TokenType::Ampersand => "AMPERSAND",
            TokenType::Pipe => "PIPE",
            TokenType::LParen => "LPAREN",
            TokenType::RParen => "RPAREN",
            TokenType::LBrace => "LBRACE",
            TokenType::RBrace => "RBRACE",
            TokenType::LBracket => "LBRACKET",
            TokenType::RBracket => "RBRACKET",
            TokenType::Comma => "COMMA",
            TokenType::Semicolon => "SEMICOLON",
            TokenType::Colon => "COLON",
            TokenType::Dot => "DOT",
            TokenType::KwInt => "KW_INT",
            TokenType::KwLong => "KW_LONG",
            TokenType::KwFloat => "KW_FLOAT",
            TokenType::KwDouble => "KW_DOUBLE",
            TokenType::KwChar => "KW_CHAR",
            TokenType::KwStr => "KW_STR",
            TokenType::KwVoid => "KW_VOID",
            TokenType::KwIf => "KW_IF",
            TokenType::KwElse => "KW_ELSE",
            TokenType::KwWhile => "KW_WHILE",
            TokenType::KwDo => "KW_DO",
            TokenType::KwFor => "KW_FOR",
            TokenType::KwSwitch => "KW_SWITCH",
            TokenType::KwCase => "KW_CASE",
            TokenType::KwDefault => "KW_DEFAULT",
            TokenType::KwReturn => "KW_RETURN",
            TokenType::KwImport => "KW_IMPORT",
            TokenType::KwSpawn => "KW_SPAWN",
            TokenType::KwJoin => "KW_JOIN",
            TokenType::Eof => "EOF",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub ttype: TokenType,
    pub lexeme: String,
    pub line: i32,
    pub column: i32,
}

impl Token {
    pub fn new(ttype: TokenType, lexeme: impl Into<String>, line: i32, column: i32) -> Token {
        Token { ttype, lexeme: lexeme.into(), line, column }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    Block,
    Compound,
    VarDecl,
    ConstDecl,
    ProcDecl,
    FunDecl,
    Param,
    UsesClause,
    Import,
    If,
    While,
    Repeat,
    For,
    Case,
    CaseBranch,
    Assign,
    BinaryOp,
    UnaryOp,
    Number,
    StringLit,
    BooleanLit,
    CharLit,
    NilLit,
    Variable,
    FieldAccess,
    ArrayAccess,
    AddressOf,
    Deref,
    Call,
    Write,
    WriteLn,
    Read,
    ReadLn,
    Return,
    ExprStmt,
    ThreadSpawn,
    ThreadJoin,
    TypeRef,
    TypeDecl,
    EnumDecl,
    EnumValue,
    RecordDecl,
    NoOp,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Program => "PROGRAM",
            NodeKind::Block => "BLOCK",
            NodeKind::Compound => "COMPOUND",
            NodeKind::VarDecl => "VAR_DECL",
            NodeKind::ConstDecl => "CONST_DECL",
            NodeKind::ProcDecl => "PROC_DECL",
            NodeKind::FunDecl => "FUNC_DECL",
            NodeKind::Param => "PARAM",
            NodeKind::UsesClause => "USES_CLAUSE",
            NodeKind::Import => "IMPORT",
            NodeKind::If => "IF",
            NodeKind::While => "WHILE",
            NodeKind::Repeat => "REPEAT",
            NodeKind::For => "FOR",
            NodeKind::Case => "CASE",
            NodeKind::CaseBranch => "CASE_BRANCH",
            NodeKind::Assign => "ASSIGN",
            NodeKind::BinaryOp => "BINARY_OP",
            NodeKind::UnaryOp => "UNARY_OP",
            NodeKind::Number => "NUMBER",
            NodeKind::StringLit => "STRING",
            NodeKind::BooleanLit => "BOOLEAN",
            NodeKind::CharLit => "CHAR",
            NodeKind::NilLit => "NIL",
            NodeKind::Variable => "VARIABLE",
            NodeKind::FieldAccess => "FIELD_ACCESS",
            NodeKind::ArrayAccess => "ARRAY_ACCESS",
            NodeKind::AddressOf => "ADDRESS_OF",
            NodeKind::Deref => "DEREF",
            NodeKind::Call => "CALL",
            NodeKind::Write => "WRITE",
            NodeKind::WriteLn => "WRITELN",
            NodeKind::Read => "READ",
            NodeKind::ReadLn => "READLN",
            NodeKind::Return => "RETURN",
            NodeKind::ExprStmt => "EXPR_STMT",
            NodeKind::ThreadSpawn => "THREAD_SPAWN",
            NodeKind::ThreadJoin => "THREAD_JOIN",
            NodeKind::TypeRef => "TYPE_REF",
            NodeKind::TypeDecl => "TYPE_DECL",
            NodeKind::EnumDecl => "ENUM_DECL",
            NodeKind::EnumValue => "ENUM_VALUE",
            NodeKind::RecordDecl => "RECORD_DECL",
            NodeKind::NoOp => "NOOP",
        }
    }

    /// Kinds that must carry a type annotation when codegen sees them.
    pub fn is_expression(self) -> bool {
        matches!(
            self,
            NodeKind::BinaryOp
                | NodeKind::UnaryOp
                | NodeKind::Number
                | NodeKind::StringLit
                | NodeKind::BooleanLit
                | NodeKind::CharLit
                | NodeKind::Variable
                | NodeKind::FieldAccess
                | NodeKind::ArrayAccess
                | NodeKind::AddressOf
                | NodeKind::Deref
        )
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Option<Token>,
    pub var_type: VarType,
    pub left: Option<Box<Node>>,
    pub right: Option<Box<Node>>,
    pub extra: Option<Box<Node>>,
    pub children: Vec<Node>,
    /// Resolved unit/import dependency paths, threaded into the cache key.
    pub unit_deps: Vec<String>,
    /// Pre-parsed literal payloads for Number/BooleanLit nodes.
    pub i_val: i64,
    pub b_val: bool,
    pub r_val: f64,
}

impl Node {
    pub fn new(kind: NodeKind, token: Option<Token>) -> Node {
        Node {
            kind,
            token,
            var_type: VarType::Unknown,
            left: None,
            right: None,
            extra: None,
            children: Vec::new(),
            unit_deps: Vec::new(),
            i_val: 0,
            b_val: false,
            r_val: 0.0,
        }
    }

    pub fn set_left(&mut self, child: Node) {
        self.left = Some(Box::new(child));
    }

    pub fn set_right(&mut self, child: Node) {
        self.right = Some(Box::new(child));
    }

    pub fn set_extra(&mut self, child: Node) {
        self.extra = Some(Box::new(child));
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn set_type(&mut self, vt: VarType) {
        self.var_type = vt;
    }

    pub fn line(&self) -> i32 {
        self.token.as_ref().map(|t| t.line).unwrap_or(0)
    }

    pub fn lexeme(&self) -> &str {
        self.token.as_ref().map(|t| t.lexeme.as_str()).unwrap_or("")
    }

    pub fn token_type(&self) -> Option<TokenType> {
        self.token.as_ref().map(|t| t.ttype)
    }

    // ── Debug JSON dump (--dump-ast-json) ───────────────────────────────────

    pub fn to_json(&self) -> Json {
        let mut children = Vec::new();
        if let Some(n) = &self.left {
            children.push(n.to_json());
        }
        if let Some(n) = &self.right {
            children.push(n.to_json());
        }
        if let Some(n) = &self.extra {
            children.push(n.to_json());
        }
        for n in &self.children {
            children.push(n.to_json());
        }
        let token = self.token.as_ref().map(|t| {
            json!({
                "tokenType": t.ttype.name(),
                "lexeme": t.lexeme,
                "line": t.line,
            })
        });
        json!({
            "node_type": self.kind.name(),
            "token": token,
            "var_type": self.var_type.name(),
            "children": children,
        })
    }
}

// ---------------------------------------------------------------------------
// Structural verifier, run at entry to the optimizer and to codegen
// ---------------------------------------------------------------------------

pub fn verify(root: &Node) -> Result<(), CompileError> {
    verify_node(root)
}

fn structural(message: impl Into<String>, node: &Node) -> CompileError {
    CompileError::Verifier { message: message.into(), line: node.line() }
}

fn verify_node(node: &Node) -> Result<(), CompileError> {
    if node.kind.is_expression() && node.var_type == VarType::Unknown {
        return Err(CompileError::UnannotatedNode {
            kind: node.kind.name().into(),
            line: node.line(),
        });
    }
    match node.kind {
        NodeKind::BinaryOp => {
            if node.token.is_none() || node.left.is_none() || node.right.is_none() {
                return Err(structural("binary operator missing operands", node));
            }
        }
        NodeKind::UnaryOp => {
            if node.token.is_none() || node.left.is_none() {
                return Err(structural("unary operator missing operand", node));
            }
        }
        NodeKind::If | NodeKind::While => {
            if node.left.is_none() || node.right.is_none() {
                return Err(structural("control-flow node missing condition or body", node));
            }
        }
        NodeKind::Repeat => {
            if node.left.is_none() || node.right.is_none() {
                return Err(structural("repeat node missing body or condition", node));
            }
        }
        NodeKind::Assign => {
            if node.left.is_none() || node.right.is_none() {
                return Err(structural("assignment missing target or value", node));
            }
        }
        NodeKind::Case => {
            if node.left.is_none() {
                return Err(structural("case statement missing its subject", node));
            }
        }
        NodeKind::ThreadJoin => {
            if node.left.is_none() {
                return Err(structural("join missing its handle expression", node));
            }
        }
        NodeKind::Number => {
            if node.token.is_none() {
                return Err(structural("number literal without token", node));
            }
        }
        _ => {}
    }
    if let Some(n) = &node.left {
        verify_node(n)?;
    }
    if let Some(n) = &node.right {
        verify_node(n)?;
    }
    if let Some(n) = &node.extra {
        verify_node(n)?;
    }
    for n in &node.children {
        verify_node(n)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_lit(v: i64, line: i32) -> Node {
        let mut n = Node::new(
            NodeKind::Number,
            Some(Token::new(TokenType::IntegerConst, v.to_string(), line, 1)),
        );
        n.i_val = v;
        n.set_type(VarType::Int64);
        n
    }

    #[test]
    fn verifier_accepts_a_well_formed_tree() {
        let mut add = Node::new(
            NodeKind::BinaryOp,
            Some(Token::new(TokenType::Plus, "+", 1, 3)),
        );
        add.set_left(int_lit(2, 1));
        add.set_right(int_lit(3, 1));
        add.set_type(VarType::Int64);
        assert!(verify(&add).is_ok());
    }

    #[test]
    fn verifier_rejects_missing_annotation() {
        let mut add = Node::new(
            NodeKind::BinaryOp,
            Some(Token::new(TokenType::Plus, "+", 4, 3)),
        );
        add.set_left(int_lit(2, 4));
        add.set_right(int_lit(3, 4));
        let err = verify(&add).unwrap_err();
        assert!(err.to_string().contains("line 4"));
    }

    #[test]
    fn verifier_rejects_missing_operand() {
        let mut add = Node::new(
            NodeKind::BinaryOp,
            Some(Token::new(TokenType::Plus, "+", 2, 3)),
        );
        add.set_left(int_lit(2, 2));
        add.set_type(VarType::Int64);
        assert!(verify(&add).is_err());
    }

    #[test]
    fn json_dump_has_the_contractual_keys() {
        let n = int_lit(42, 9);
        let j = n.to_json();
        assert_eq!(j["node_type"], "NUMBER");
        assert_eq!(j["token"]["lexeme"], "42");
        assert_eq!(j["token"]["line"], 9);
        assert_eq!(j["var_type"], "int64");
        assert!(j["children"].as_array().unwrap().is_empty());
    }
}

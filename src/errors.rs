/// Error types for the shared compilation and execution pipeline.
/// Every stage has its own enum; runtime errors carry the chunk line so the
/// VM can report `<kind> at line <N>: <message>` from the parallel line map.

use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Frontend errors (raised before the core pipeline runs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ParseError {
    UnexpectedCharacter { ch: char, line: i32 },
    UnterminatedString { line: i32 },
    InvalidNumber { text: String, line: i32 },
    UnexpectedToken { expected: String, found: String, line: i32 },
    UnexpectedEof { context: String, line: i32 },
    ImportNotFound { path: String, line: i32 },
    PreprocError { message: String, line: i32 },
}

impl ParseError {
    pub fn line(&self) -> i32 {
        match self {
            ParseError::UnexpectedCharacter { line, .. }
            | ParseError::UnterminatedString { line }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEof { line, .. }
            | ParseError::ImportNotFound { line, .. }
            | ParseError::PreprocError { line, .. } => *line,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedCharacter { ch, line } => {
                write!(f, "Parse error at line {}: unexpected character '{}'", line, ch)
            }
            ParseError::UnterminatedString { line } => {
                write!(f, "Parse error at line {}: unterminated string literal", line)
            }
            ParseError::InvalidNumber { text, line } => {
                write!(f, "Parse error at line {}: invalid number '{}'", line, text)
            }
            ParseError::UnexpectedToken { expected, found, line } => {
                write!(f, "Parse error at line {}: expected {}, found {}", line, expected, found)
            }
            ParseError::UnexpectedEof { context, line } => {
                write!(f, "Parse error at line {}: unexpected end of file in {}", line, context)
            }
            ParseError::ImportNotFound { path, line } => {
                write!(f, "Parse error at line {}: cannot resolve import '{}'", line, path)
            }
            ParseError::PreprocError { message, line } => {
                write!(f, "Parse error at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone)]
pub enum SemanticError {
    UndefinedVariable { name: String, line: i32 },
    UndefinedFunction { name: String, line: i32 },
    Redefinition { name: String, line: i32 },
    ArityMismatch { name: String, expected: usize, found: usize, line: i32 },
    TypeMismatch { expected: String, found: String, line: i32 },
    FunctionAsStatement { name: String, line: i32 },
    ProcedureAsValue { name: String, line: i32 },
    BadLValue { line: i32 },
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::UndefinedVariable { name, line } => {
                write!(f, "Semantic error at line {}: undefined variable '{}'", line, name)
            }
            SemanticError::UndefinedFunction { name, line } => {
                write!(f, "Semantic error at line {}: undefined function '{}'", line, name)
            }
            SemanticError::Redefinition { name, line } => {
                write!(f, "Semantic error at line {}: redefinition of '{}'", line, name)
            }
            SemanticError::ArityMismatch { name, expected, found, line } => {
                write!(
                    f,
                    "Semantic error at line {}: '{}' expects {} argument(s), got {}",
                    line, name, expected, found
                )
            }
            SemanticError::TypeMismatch { expected, found, line } => {
                write!(
                    f,
                    "Semantic error at line {}: type mismatch, expected {} but found {}",
                    line, expected, found
                )
            }
            SemanticError::FunctionAsStatement { name, line } => {
                write!(
                    f,
                    "Semantic error at line {}: function '{}' used in statement position",
                    line, name
                )
            }
            SemanticError::ProcedureAsValue { name, line } => {
                write!(
                    f,
                    "Semantic error at line {}: procedure '{}' used where a value is required",
                    line, name
                )
            }
            SemanticError::BadLValue { line } => {
                write!(f, "Semantic error at line {}: expression is not assignable", line)
            }
        }
    }
}

impl std::error::Error for SemanticError {}

// ---------------------------------------------------------------------------
// Codegen errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CompileError {
    UnannotatedNode { kind: String, line: i32 },
    UnresolvedCall { name: String, line: i32 },
    ConstantPoolOverflow { line: i32 },
    ConstantIndexTooWide { line: i32 },
    JumpTooFar { line: i32 },
    TooManyLocals { name: String, line: i32 },
    Verifier { message: String, line: i32 },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnannotatedNode { kind, line } => {
                write!(f, "Compile error at line {}: {} node has no type annotation", line, kind)
            }
            CompileError::UnresolvedCall { name, line } => {
                write!(f, "Compile error at line {}: call to undefined procedure '{}'", line, name)
            }
            CompileError::ConstantPoolOverflow { line } => {
                write!(f, "Compile error at line {}: constant pool overflow (limit 65535)", line)
            }
            CompileError::ConstantIndexTooWide { line } => {
                write!(
                    f,
                    "Compile error at line {}: literal constant index exceeds 255",
                    line
                )
            }
            CompileError::JumpTooFar { line } => {
                write!(f, "Compile error at line {}: jump offset out of 16-bit range", line)
            }
            CompileError::TooManyLocals { name, line } => {
                write!(
                    f,
                    "Compile error at line {}: too many locals in '{}' (limit 255)",
                    line, name
                )
            }
            CompileError::Verifier { message, line } => {
                write!(f, "Compile error at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for CompileError {}

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    TypeMismatch { expected: String, found: String, line: i32 },
    DivisionByZero { line: i32 },
    InvalidCast { from: String, to: String, line: i32 },
    IndexOutOfBounds { index: i64, low: i64, high: i64, line: i32 },
    UndefinedGlobal { name: String, line: i32 },
    UnknownBuiltin { name: String, arity: u8, line: i32 },
    UnknownProcedure { name: String, line: i32 },
    UnknownField { name: String, line: i32 },
    ArityMismatch { name: String, expected: u8, found: u8, line: i32 },
    BadArgument { name: String, message: String, line: i32 },
    Io { message: String, line: i32 },
    Aborted { line: i32 },
}

impl RuntimeError {
    /// The taxonomy name used in the single-line stderr report.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::TypeMismatch { .. } | RuntimeError::UnknownField { .. } => "Type error",
            RuntimeError::DivisionByZero { .. }
            | RuntimeError::InvalidCast { .. }
            | RuntimeError::IndexOutOfBounds { .. } => "Arithmetic error",
            RuntimeError::UndefinedGlobal { .. }
            | RuntimeError::UnknownBuiltin { .. }
            | RuntimeError::UnknownProcedure { .. } => "Name error",
            RuntimeError::ArityMismatch { .. } | RuntimeError::BadArgument { .. } => {
                "Argument error"
            }
            RuntimeError::Io { .. } => "IO error",
            RuntimeError::Aborted { .. } => "Abort",
        }
    }

    pub fn line(&self) -> i32 {
        match self {
            RuntimeError::TypeMismatch { line, .. }
            | RuntimeError::DivisionByZero { line }
            | RuntimeError::InvalidCast { line, .. }
            | RuntimeError::IndexOutOfBounds { line, .. }
            | RuntimeError::UndefinedGlobal { line, .. }
            | RuntimeError::UnknownBuiltin { line, .. }
            | RuntimeError::UnknownProcedure { line, .. }
            | RuntimeError::UnknownField { line, .. }
            | RuntimeError::ArityMismatch { line, .. }
            | RuntimeError::BadArgument { line, .. }
            | RuntimeError::Io { line, .. }
            | RuntimeError::Aborted { line } => *line,
        }
    }

    /// Abort is reported but never printed to stderr.
    pub fn is_abort(&self) -> bool {
        matches!(self, RuntimeError::Aborted { .. })
    }

    /// Re-stamp the line once the dispatch loop knows the current instruction.
    pub fn with_line(mut self, new_line: i32) -> Self {
        let slot = match &mut self {
            RuntimeError::TypeMismatch { line, .. }
            | RuntimeError::DivisionByZero { line }
            | RuntimeError::InvalidCast { line, .. }
            | RuntimeError::IndexOutOfBounds { line, .. }
            | RuntimeError::UndefinedGlobal { line, .. }
            | RuntimeError::UnknownBuiltin { line, .. }
            | RuntimeError::UnknownProcedure { line, .. }
            | RuntimeError::UnknownField { line, .. }
            | RuntimeError::ArityMismatch { line, .. }
            | RuntimeError::BadArgument { line, .. }
            | RuntimeError::Io { line, .. }
            | RuntimeError::Aborted { line } => line,
        };
        if *slot <= 0 {
            *slot = new_line;
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}: ", self.kind(), self.line())?;
        match self {
            RuntimeError::TypeMismatch { expected, found, .. } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            RuntimeError::DivisionByZero { .. } => write!(f, "divide by zero"),
            RuntimeError::InvalidCast { from, to, .. } => {
                write!(f, "cannot convert {} to {}", from, to)
            }
            RuntimeError::IndexOutOfBounds { index, low, high, .. } => {
                write!(f, "index {} outside bounds {}..{}", index, low, high)
            }
            RuntimeError::UndefinedGlobal { name, .. } => {
                write!(f, "undefined global '{}'", name)
            }
            RuntimeError::UnknownBuiltin { name, arity, .. } => {
                write!(f, "unknown builtin '{}' with arity {}", name, arity)
            }
            RuntimeError::UnknownProcedure { name, .. } => {
                write!(f, "unknown procedure '{}'", name)
            }
            RuntimeError::UnknownField { name, .. } => {
                write!(f, "record has no field '{}'", name)
            }
            RuntimeError::ArityMismatch { name, expected, found, .. } => {
                write!(f, "'{}' expects {} argument(s), got {}", name, expected, found)
            }
            RuntimeError::BadArgument { name, message, .. } => {
                write!(f, "'{}': {}", name, message)
            }
            RuntimeError::Io { message, .. } => write!(f, "{}", message),
            RuntimeError::Aborted { .. } => write!(f, "execution aborted"),
        }
    }
}

impl std::error::Error for RuntimeError {}

// ---------------------------------------------------------------------------
// Cache errors are downgraded to warnings by the bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CacheError {
    BadMagic,
    BadVersion { found: u32 },
    CompilerMismatch { found: String },
    DependencyMismatch,
    Stale,
    Unserializable { type_name: String },
    Io { message: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::BadMagic => write!(f, "cache file has wrong magic"),
            CacheError::BadVersion { found } => write!(f, "cache format version {} not supported", found),
            CacheError::CompilerMismatch { found } => {
                write!(f, "cache was produced by compiler '{}'", found)
            }
            CacheError::DependencyMismatch => write!(f, "cache dependency list does not match"),
            CacheError::Stale => write!(f, "cache is older than an input"),
            CacheError::Unserializable { type_name } => {
                write!(f, "constant of type {} is not cacheable", type_name)
            }
            CacheError::Io { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CacheError {}

// ---------------------------------------------------------------------------
// Top-level wrapper returned by the bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PscalError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Semantic(#[from] SemanticError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_report_names_kind_and_line() {
        let err = RuntimeError::DivisionByZero { line: 7 };
        assert_eq!(err.to_string(), "Arithmetic error at line 7: divide by zero");
        assert_eq!(err.kind(), "Arithmetic error");
        assert_eq!(err.line(), 7);
    }

    #[test]
    fn with_line_only_fills_missing_lines() {
        let err = RuntimeError::DivisionByZero { line: 0 }.with_line(12);
        assert_eq!(err.line(), 12);
        let err = RuntimeError::DivisionByZero { line: 3 }.with_line(12);
        assert_eq!(err.line(), 3);
    }

    #[test]
    fn abort_is_not_a_printable_error() {
        assert!(RuntimeError::Aborted { line: 1 }.is_abort());
        assert!(!RuntimeError::DivisionByZero { line: 1 }.is_abort());
    }
}

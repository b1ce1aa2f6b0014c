/// PSCAL shared compilation and execution pipeline.
///
/// Module layout:
///   - value    — tagged-union runtime Value with owning heap payloads
///   - ast      — language-neutral AST, structural verifier, JSON dump
///   - symbols  — case-insensitive symbol / constant / procedure tables
///   - preproc  — conditional preprocessor (#ifdef family)
///   - opt      — AST constant folding + dead-branch elimination
///   - bytecode — opcode set, chunk, (dis)assembly, .pbc serialization
///   - codegen  — AST → bytecode compiler
///   - builtins — process-wide builtin registry (CALL_BUILTIN targets)
///   - cache    — persistent bytecode cache under ~/.pscal_cache
///   - vm       — register-less stack VM
///   - threads  — cooperative worker model behind the thread builtins
///   - frontend — the C-like surface: lexer, parser, sema, bootstrap
///   - errors   — error taxonomy shared by every stage

// ── Core pipeline ────────────────────────────────────────────────────────────
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod opt;
pub mod preproc;
pub mod symbols;
pub mod value;

// ── Runtime ──────────────────────────────────────────────────────────────────
pub mod builtins;
pub mod cache;
pub mod threads;
pub mod vm;

// ── Frontend & shared plumbing ───────────────────────────────────────────────
pub mod errors;
pub mod frontend;

// ── Re-exports for convenience ───────────────────────────────────────────────
pub use ast::{Node, NodeKind, Token, TokenType};
pub use bytecode::{Chunk, Op};
pub use errors::{PscalError, RuntimeError};
pub use frontend::{run_source, Options};
pub use symbols::{Symbol, SymbolTable, SymbolTables};
pub use value::{Value, VarType};
pub use vm::{CaptureBuffer, Vm};

/// Runtime Value for the shared VM.
///
/// One tagged union covers every frontend. Scalar payloads are inline;
/// strings, records, arrays and memory streams are owning heap payloads, so
/// `Clone` is the deep-copy primitive and a Rust move is the shallow move.
/// Sharing only happens through the Pointer kind, which backs VAR parameters
/// and address-of.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::RuntimeError;

// ---------------------------------------------------------------------------
// Static types shared by the AST, the symbol tables and the constant pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Int8,
    Int16,
    Int32,
    Int64,
    Byte,
    Boolean,
    Single,
    Real,
    /// Extended precision maps to f64 at runtime; the tag survives so error
    /// messages keep the declared name.
    Extended,
    Char,
    Str,
    Nil,
    Enum,
    Pointer,
    Record,
    Array,
    MemoryStream,
    File,
    Void,
    Unknown,
}

impl VarType {
    pub fn name(self) -> &'static str {
        match self {
            VarType::Int8 => "int8",
            VarType::Int16 => "int16",
            VarType::Int32 => "int32",
            VarType::Int64 => "int64",
            VarType::Byte => "byte",
            VarType::Boolean => "boolean",
            VarType::Single => "single",
            VarType::Real => "real",
            VarType::Extended => "extended",
            VarType::Char => "char",
            VarType::Str => "string",
            VarType::Nil => "nil",
            VarType::Enum => "enum",
            VarType::Pointer => "pointer",
            VarType::Record => "record",
            VarType::Array => "array",
            VarType::MemoryStream => "memorystream",
            VarType::File => "file",
            VarType::Void => "void",
            VarType::Unknown => "unknown",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            VarType::Int8 | VarType::Int16 | VarType::Int32 | VarType::Int64 | VarType::Byte
        )
    }

    pub fn is_real(self) -> bool {
        matches!(self, VarType::Single | VarType::Real | VarType::Extended)
    }

    /// One-byte tag used by the on-disk constant serializers.
    pub fn tag(self) -> u8 {
        match self {
            VarType::Int8 => 0,
            VarType::Int16 => 1,
            VarType::Int32 => 2,
            VarType::Int64 => 3,
            VarType::Byte => 4,
            VarType::Boolean => 5,
            VarType::Single => 6,
            VarType::Real => 7,
            VarType::Extended => 8,
            VarType::Char => 9,
            VarType::Str => 10,
            VarType::Nil => 11,
            VarType::Enum => 12,
            VarType::Pointer => 13,
            VarType::Record => 14,
            VarType::Array => 15,
            VarType::MemoryStream => 16,
            VarType::File => 17,
            VarType::Void => 18,
            VarType::Unknown => 19,
        }
    }

    pub fn from_tag(tag: u8) -> Option<VarType> {
        Some(match tag {
            0 => VarType::Int8,
            1 => VarType::Int16,
            2 => VarType::Int32,
            3 => VarType::Int64,
            4 => VarType::Byte,
            5 => VarType::Boolean,
            6 => VarType::Single,
            7 => VarType::Real,
            8 => VarType::Extended,
            9 => VarType::Char,
            10 => VarType::Str,
            11 => VarType::Nil,
            12 => VarType::Enum,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Heap payloads
// ---------------------------------------------------------------------------

/// N-dimensional array with per-dimension inclusive bounds.
/// Invariant: `dims.len() >= 1` and the product of the extents equals
/// `elements.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub dims: Vec<(i64, i64)>,
    pub elem_type: VarType,
    pub elements: Vec<Value>,
}

impl ArrayValue {
    pub fn new(dims: Vec<(i64, i64)>, elem_type: VarType) -> Option<ArrayValue> {
        if dims.is_empty() {
            return None;
        }
        let mut count: i64 = 1;
        for &(lo, hi) in &dims {
            if hi < lo {
                return None;
            }
            count = count.checked_mul(hi - lo + 1)?;
        }
        let fill = Value::default_for(elem_type);
        Some(ArrayValue {
            dims,
            elem_type,
            elements: vec![fill; count as usize],
        })
    }

    /// Row-major flat offset for a full index vector.
    pub fn flat_index(&self, indices: &[i64]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut offset: i64 = 0;
        for (&idx, &(lo, hi)) in indices.iter().zip(&self.dims) {
            if idx < lo || idx > hi {
                return None;
            }
            offset = offset * (hi - lo + 1) + (idx - lo);
        }
        Some(offset as usize)
    }
}

#[derive(Debug)]
pub struct FileState {
    pub path: String,
    pub handle: Option<fs::File>,
}

impl Drop for FileState {
    fn drop(&mut self) {
        // Dropping the inner fs::File closes the descriptor.
        self.handle.take();
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Byte(u8),
    Boolean(bool),
    Single(f32),
    Real(f64),
    Char(char),
    Str(String),
    Nil,
    Enum { name: String, ordinal: i32 },
    /// Shared cell backing VAR parameters and address-of. The target must
    /// outlive every pointer to it; the Arc enforces that.
    Pointer(Arc<Mutex<Value>>),
    Record(Vec<(String, Value)>),
    Array(Box<ArrayValue>),
    MemoryStream(Vec<u8>),
    File(Arc<Mutex<FileState>>),
}

impl Value {
    // ── Constructors ────────────────────────────────────────────────────────

    pub fn int(v: i64) -> Value {
        Value::Int64(v)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn pointer_to(v: Value) -> Value {
        Value::Pointer(Arc::new(Mutex::new(v)))
    }

    /// Zero/empty value for a declared type; used when reserving local slots.
    pub fn default_for(vt: VarType) -> Value {
        match vt {
            VarType::Int8 => Value::Int8(0),
            VarType::Int16 => Value::Int16(0),
            VarType::Int32 => Value::Int32(0),
            VarType::Int64 => Value::Int64(0),
            VarType::Byte => Value::Byte(0),
            VarType::Boolean => Value::Boolean(false),
            VarType::Single => Value::Single(0.0),
            VarType::Real | VarType::Extended => Value::Real(0.0),
            VarType::Char => Value::Char('\0'),
            VarType::Str => Value::Str(String::new()),
            VarType::MemoryStream => Value::MemoryStream(Vec::new()),
            _ => Value::Nil,
        }
    }

    // ── Predicates ──────────────────────────────────────────────────────────

    pub fn is_intlike(&self) -> bool {
        matches!(
            self,
            Value::Int8(_)
                | Value::Int16(_)
                | Value::Int32(_)
                | Value::Int64(_)
                | Value::Byte(_)
                | Value::Boolean(_)
                | Value::Char(_)
        )
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Value::Single(_) | Value::Real(_))
    }

    pub fn is_numeric(&self) -> bool {
        self.is_intlike() || self.is_real()
    }

    pub fn var_type(&self) -> VarType {
        match self {
            Value::Int8(_) => VarType::Int8,
            Value::Int16(_) => VarType::Int16,
            Value::Int32(_) => VarType::Int32,
            Value::Int64(_) => VarType::Int64,
            Value::Byte(_) => VarType::Byte,
            Value::Boolean(_) => VarType::Boolean,
            Value::Single(_) => VarType::Single,
            Value::Real(_) => VarType::Real,
            Value::Char(_) => VarType::Char,
            Value::Str(_) => VarType::Str,
            Value::Nil => VarType::Nil,
            Value::Enum { .. } => VarType::Enum,
            Value::Pointer(_) => VarType::Pointer,
            Value::Record(_) => VarType::Record,
            Value::Array(_) => VarType::Array,
            Value::MemoryStream(_) => VarType::MemoryStream,
            Value::File(_) => VarType::File,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.var_type().name()
    }

    // ── Coercions ───────────────────────────────────────────────────────────

    /// Widening to i64. Booleans and chars coerce by ordinal; reals do not.
    pub fn as_i64(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int8(v) => Ok(*v as i64),
            Value::Int16(v) => Ok(*v as i64),
            Value::Int32(v) => Ok(*v as i64),
            Value::Int64(v) => Ok(*v),
            Value::Byte(v) => Ok(*v as i64),
            Value::Boolean(b) => Ok(*b as i64),
            Value::Char(c) => Ok(*c as i64),
            Value::Enum { ordinal, .. } => Ok(*ordinal as i64),
            other => Err(RuntimeError::TypeMismatch {
                expected: "integer".into(),
                found: other.type_name().into(),
                line: 0,
            }),
        }
    }

    /// Widening to f64. Exact for integer widths up to 32 bits; 64-bit
    /// integers may round but never fail.
    pub fn as_f64(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Single(v) => Ok(*v as f64),
            Value::Real(v) => Ok(*v),
            other if other.is_intlike() => Ok(other.as_i64()? as f64),
            other => Err(RuntimeError::TypeMismatch {
                expected: "real".into(),
                found: other.type_name().into(),
                line: 0,
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(RuntimeError::TypeMismatch {
                expected: "boolean".into(),
                found: other.type_name().into(),
                line: 0,
            }),
        }
    }

    pub fn as_str_lossy(&self) -> String {
        self.display()
    }

    /// Sign-preserving conversion to a declared type; used by assignments
    /// through typed slots and by `readln` targets.
    pub fn convert_to(&self, vt: VarType) -> Result<Value, RuntimeError> {
        let fail = || RuntimeError::InvalidCast {
            from: self.type_name().into(),
            to: vt.name().into(),
            line: 0,
        };
        Ok(match vt {
            VarType::Int8 => Value::Int8(i8::try_from(self.as_i64()?).map_err(|_| fail())?),
            VarType::Int16 => Value::Int16(i16::try_from(self.as_i64()?).map_err(|_| fail())?),
            VarType::Int32 => Value::Int32(i32::try_from(self.as_i64()?).map_err(|_| fail())?),
            VarType::Int64 => Value::Int64(self.as_i64()?),
            VarType::Byte => Value::Byte(u8::try_from(self.as_i64()?).map_err(|_| fail())?),
            VarType::Boolean => Value::Boolean(self.as_bool()?),
            VarType::Single => Value::Single(self.as_f64()? as f32),
            VarType::Real | VarType::Extended => Value::Real(self.as_f64()?),
            VarType::Char => match self {
                Value::Char(c) => Value::Char(*c),
                Value::Str(s) if s.chars().count() == 1 => {
                    Value::Char(s.chars().next().unwrap())
                }
                _ => {
                    let ord = self.as_i64()?;
                    let c = u32::try_from(ord).ok().and_then(char::from_u32).ok_or_else(fail)?;
                    Value::Char(c)
                }
            },
            VarType::Str => Value::Str(self.display()),
            _ => return Err(fail()),
        })
    }

    // ── Comparison with numeric promotion ───────────────────────────────────

    pub fn compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        if self.is_numeric() && other.is_numeric() {
            if self.is_real() || other.is_real() {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal));
            }
            return Ok(self.as_i64()?.cmp(&other.as_i64()?));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Char(b)) => Ok(a.as_str().cmp(b.to_string().as_str())),
            (Value::Char(a), Value::Str(b)) => Ok(a.to_string().as_str().cmp(b.as_str())),
            (Value::Enum { ordinal: a, .. }, Value::Enum { ordinal: b, .. }) => Ok(a.cmp(b)),
            (Value::Nil, Value::Nil) => Ok(Ordering::Equal),
            _ => Err(RuntimeError::TypeMismatch {
                expected: self.type_name().into(),
                found: other.type_name().into(),
                line: 0,
            }),
        }
    }

    // ── Formatting (Write/WriteLn rules) ────────────────────────────────────

    pub fn display(&self) -> String {
        match self {
            Value::Int8(v) => v.to_string(),
            Value::Int16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Single(v) => format_real(*v as f64),
            Value::Real(v) => format_real(*v),
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.clone(),
            Value::Nil => "nil".to_string(),
            Value::Enum { name, .. } => name.clone(),
            Value::Pointer(cell) => cell.lock().display(),
            Value::Record(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display()))
                    .collect();
                format!("({})", parts.join("; "))
            }
            Value::Array(arr) => {
                let parts: Vec<String> = arr.elements.iter().map(|v| v.display()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::MemoryStream(bytes) => format!("<stream:{} bytes>", bytes.len()),
            Value::File(f) => format!("<file:{}>", f.lock().path),
        }
    }
}

/// Whole reals print with a trailing `.0` so integer and real output stay
/// distinguishable.
fn format_real(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Structural equality with numeric promotion; never errors. Pointers are
/// identical only when they share the cell.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return self.compare(other) == Ok(Ordering::Equal);
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (
                Value::Enum { name: an, ordinal: ao },
                Value::Enum { name: bn, ordinal: bo },
            ) => an == bn && ao == bo,
            (Value::Pointer(a), Value::Pointer(b)) => Arc::ptr_eq(a, b),
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::MemoryStream(a), Value::MemoryStream(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_promotion_compares_across_kinds() {
        assert_eq!(
            Value::Int8(3).compare(&Value::Real(3.0)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            Value::Byte(200).compare(&Value::Int16(-1)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn mismatched_kinds_report_both_types() {
        let err = Value::Str("a".into()).as_i64().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("integer") && msg.contains("string"), "{}", msg);
    }

    #[test]
    fn deep_copy_is_independent() {
        let original = Value::Record(vec![("x".into(), Value::Int64(1))]);
        let mut copy = original.clone();
        if let Value::Record(fields) = &mut copy {
            fields[0].1 = Value::Int64(2);
        }
        assert_eq!(original, Value::Record(vec![("x".into(), Value::Int64(1))]));
    }

    #[test]
    fn pointer_clone_shares_the_target() {
        let p = Value::pointer_to(Value::Int64(1));
        let q = p.clone();
        if let Value::Pointer(cell) = &p {
            *cell.lock() = Value::Int64(9);
        }
        if let Value::Pointer(cell) = &q {
            assert_eq!(*cell.lock(), Value::Int64(9));
        }
    }

    #[test]
    fn array_invariant_holds() {
        let arr = ArrayValue::new(vec![(1, 3), (0, 1)], VarType::Int64).unwrap();
        assert_eq!(arr.elements.len(), 6);
        assert_eq!(arr.flat_index(&[1, 0]), Some(0));
        assert_eq!(arr.flat_index(&[3, 1]), Some(5));
        assert_eq!(arr.flat_index(&[4, 0]), None);
        assert!(ArrayValue::new(vec![], VarType::Int64).is_none());
        assert!(ArrayValue::new(vec![(2, 1)], VarType::Int64).is_none());
    }

    #[test]
    fn width_preserving_conversion() {
        let v = Value::Int64(127).convert_to(VarType::Int8).unwrap();
        assert!(matches!(v, Value::Int8(127)));
        assert!(Value::Int64(128).convert_to(VarType::Int8).is_err());
        assert!(matches!(
            Value::Int64(255).convert_to(VarType::Byte).unwrap(),
            Value::Byte(255)
        ));
    }

    #[test]
    fn reals_print_with_decimal_point() {
        assert_eq!(Value::Real(3.0).display(), "3.0");
        assert_eq!(Value::Real(2.5).display(), "2.5");
        assert_eq!(Value::Int64(3).display(), "3");
    }
}

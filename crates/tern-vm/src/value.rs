//! JavaScript values and the primitive conversions.
//!
//! Conversions here never run script code: objects convert to primitives
//! through their built-in string form, not through user `valueOf` or
//! `toString` methods.

use std::fmt;
use std::rc::Rc;

use tern_bytecode::{Constant, Identifier, number_to_string};

use crate::object::ObjectRef;
use crate::scope::ScopeRef;

/// Immutable string payload
pub type JsString = Rc<str>;

/// A register value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// IEEE-754 number
    Number(f64),
    /// String
    String(JsString),
    /// Heap object
    Object(ObjectRef),
    /// Scope chain node held in a scope register
    Scope(ScopeRef),
    /// Snapshot of keys for `for-in`
    Enumerator(Rc<[Identifier]>),
}

impl Value {
    /// String value from text
    pub fn string(s: &str) -> Self {
        Self::String(Rc::from(s))
    }

    /// Value of a constant-pool entry
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Undefined => Self::Undefined,
            Constant::Null => Self::Null,
            Constant::Bool(b) => Self::Bool(*b),
            Constant::Number(n) => Self::Number(*n),
            Constant::String(s) => Self::string(s.as_str()),
        }
    }

    /// `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `null` or `undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Number payload
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Scope payload
    pub fn as_scope(&self) -> Option<&ScopeRef> {
        match self {
            Self::Scope(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is a callable object
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(ObjectRef::is_callable)
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::Scope(_) | Self::Enumerator(_) => true,
        }
    }

    /// ToNumber
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Object(_) => string_to_number(&self.to_js_string()),
            Self::Scope(_) | Self::Enumerator(_) => f64::NAN,
        }
    }

    /// ToInt32
    pub fn to_int32(&self) -> i32 {
        to_uint32(self.to_number()) as i32
    }

    /// ToUint32
    pub fn to_uint32(&self) -> u32 {
        to_uint32(self.to_number())
    }

    /// ToString
    pub fn to_js_string(&self) -> JsString {
        match self {
            Self::String(s) => Rc::clone(s),
            other => Rc::from(other.to_display_string()),
        }
    }

    /// ToString as an owned Rust string
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::String(s) => s.to_string(),
            Self::Object(o) => o.default_string(),
            Self::Scope(_) => "[scope]".to_string(),
            Self::Enumerator(_) => "[enumerator]".to_string(),
        }
    }

    /// Property key for this value
    pub fn to_property_key(&self) -> Identifier {
        match self {
            Self::String(s) => Identifier::new(s),
            other => Identifier::new(&other.to_display_string()),
        }
    }

    /// ToPrimitive without hints: objects become their string form
    pub fn to_primitive(&self) -> Value {
        match self {
            Self::Object(_) => Self::String(self.to_js_string()),
            other => other.clone(),
        }
    }

    /// `typeof` result
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(o) if o.is_callable() => "function",
            Self::Object(_) | Self::Scope(_) | Self::Enumerator(_) => "object",
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Scope(a), Self::Scope(b)) => Rc::ptr_eq(a, b),
            (Self::Enumerator(a), Self::Enumerator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined | Self::Null, Self::Undefined | Self::Null) => true,
            (Self::Undefined | Self::Null, _) | (_, Self::Undefined | Self::Null) => false,
            (Self::Number(a), Self::String(_)) => *a == other.to_number(),
            (Self::String(_), Self::Number(b)) => self.to_number() == *b,
            (Self::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Self::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Self::Object(_), Self::Number(_) | Self::String(_)) => {
                self.to_primitive().loose_equals(other)
            }
            (Self::Number(_) | Self::String(_), Self::Object(_)) => {
                self.loose_equals(&other.to_primitive())
            }
            _ => self.strict_equals(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&number_to_string(*n)),
            Self::String(s) => write!(f, "{:?}", &**s),
            Self::Object(o) if o.is_callable() => write!(f, "[function {}]", o.function_name()),
            Self::Object(o) => write!(f, "[object {}]", o.class_name()),
            Self::Scope(_) => f.write_str("[scope]"),
            Self::Enumerator(keys) => write!(f, "[enumerator; {}]", keys.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}'
}

/// StringToNumber
pub fn string_to_number(s: &str) -> f64 {
    let text = s.trim_matches(is_js_whitespace);
    if text.is_empty() {
        return 0.0;
    }
    let radix = match text.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &text[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        let mut value = 0.0f64;
        for c in digits.chars() {
            match c.to_digit(radix) {
                Some(d) => value = value * radix as f64 + d as f64,
                None => return f64::NAN,
            }
        }
        return value;
    }
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    if unsigned == "Infinity" {
        return if text.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    if !unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToUint32 of a number
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert_eq!(string_to_number(".5"), 0.5);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert!(string_to_number("0x").is_nan());
    }

    #[test]
    fn test_int32_wraps() {
        assert_eq!(Value::Number(4_294_967_297.0).to_int32(), 1);
        assert_eq!(Value::Number(-1.0).to_uint32(), u32::MAX);
        assert_eq!(Value::Number(2_147_483_648.0).to_int32(), i32::MIN);
        assert_eq!(Value::Number(f64::NAN).to_int32(), 0);
    }

    #[test]
    fn test_debug_names_objects_and_functions() {
        let mut rt = crate::VmRuntime::default();
        rt.run("function foo() {} var o = {};").unwrap();
        assert_eq!(format!("{:?}", rt.get_global("foo")), "[function foo]");
        assert!(format!("{:?}", rt.get_global("o")).starts_with("[object "));
        assert_eq!(format!("{:?}", Value::string("a")), "\"a\"");
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::Number(1.0).loose_equals(&Value::string("1")));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(!Value::Number(f64::NAN).loose_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_typeof_and_truthiness() {
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::string("").type_of(), "string");
        assert!(!Value::string("").to_boolean());
        assert!(!Value::Number(-0.0).to_boolean());
        assert!(Value::string("0").to_boolean());
    }
}

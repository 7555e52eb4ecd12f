//! Dynamic configuration values.
//!
//! [`Value`] mirrors the shape of a Lua table tree so that configuration can
//! cross between Rust and the embedded Lua state without losing structure.
//! Objects keep insertion order, which keeps validation output and merged
//! configs deterministic.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Error type returned by user callbacks (event handlers, config functions,
/// validators bridged from Lua).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Ordered map used for object values.
pub type Object = IndexMap<String, Value>;

type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, CallbackError>;

/// A callable stored inside a [`Value`].
///
/// Functions are shared, not copied: cloning a `FunctionRef` yields a handle
/// to the same callable, and equality is identity.
#[derive(Clone)]
pub struct FunctionRef(Rc<NativeFn>);

impl FunctionRef {
    /// Wrap a native closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CallbackError> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke the function.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, CallbackError> {
        (self.0)(args)
    }

    /// Whether two handles point at the same callable.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A dynamic value that can be passed between Rust and the Lua host.
///
/// `Null` plays the role of Lua `nil`: an object key mapped to `Null` is
/// treated as absent by validation, defaulting and merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null/nil value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Integer value.
    Integer(i64),

    /// Floating point value.
    Float(f64),

    /// String value.
    String(String),

    /// Array/list value.
    Array(Vec<Value>),

    /// Object/table/map value.
    Object(Object),

    /// Callable value (Lua functions, native callbacks).
    #[serde(skip)]
    Function(FunctionRef),
}

impl Value {
    /// Create an empty object.
    pub fn object() -> Self {
        Self::Object(Object::new())
    }

    /// Build an object from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Wrap a native closure as a function value.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CallbackError> + 'static,
    {
        Self::Function(FunctionRef::new(f))
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Lua-style type name (`nil`, `boolean`, `number`, `string`, `table`, `function`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "nil",
            Self::Bool(_) => "boolean",
            Self::Integer(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) | Self::Object(_) => "table",
            Self::Function(_) => "function",
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get this value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get this value as an object.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Mutable access to an object value.
    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Try to get this value as a function.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Elements of a sequence. An empty object counts as an empty sequence,
    /// since an empty Lua table is both.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Array(arr) => Some(arr),
            Self::Object(obj) if obj.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Look up a key on an object value. Missing keys and `Null` both yield `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()
            .and_then(|obj| obj.get(key))
            .filter(|v| !v.is_null())
    }

    /// Follow a dotted path (`"lsp.servers.lua"`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, key| current.get(key))
    }

    /// Lua truthiness: everything except `nil` and `false`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Self::Integer(u as i64)
    }
}

impl From<usize> for Value {
    fn from(u: usize) -> Self {
        Self::Integer(u as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(arr: Vec<T>) -> Self {
        Self::Array(arr.into_iter().map(Into::into).collect())
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Self::Object(obj)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Self::Function(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_follow_lua() {
        assert_eq!(Value::Null.type_name(), "nil");
        assert_eq!(Value::from(1).type_name(), "number");
        assert_eq!(Value::from(1.5).type_name(), "number");
        assert_eq!(Value::from(vec![1, 2]).type_name(), "table");
        assert_eq!(Value::object().type_name(), "table");
        assert_eq!(Value::function(|_| Ok(Value::Null)).type_name(), "function");
    }

    #[test]
    fn test_get_treats_null_as_absent() {
        let v = Value::from_pairs([("a", Value::Null), ("b", Value::from(2))]);
        assert!(v.get("a").is_none());
        assert_eq!(v.get("b").and_then(Value::as_i64), Some(2));
    }

    #[test]
    fn test_get_path() {
        let v = Value::from_pairs([(
            "lsp",
            Value::from_pairs([("servers", Value::from_pairs([("lua", true)]))]),
        )]);
        assert_eq!(v.get_path("lsp.servers.lua"), Some(&Value::Bool(true)));
        assert!(v.get_path("lsp.missing.lua").is_none());
    }

    #[test]
    fn test_function_equality_is_identity() {
        let f = FunctionRef::new(|args| Ok(Value::from(args.len())));
        let g = FunctionRef::new(|args| Ok(Value::from(args.len())));
        assert_eq!(Value::Function(f.clone()), Value::Function(f.clone()));
        assert_ne!(Value::Function(f.clone()), Value::Function(g));
        assert_eq!(f.call(vec![Value::Null, Value::Null]).unwrap(), Value::from(2));
    }

    #[test]
    fn test_empty_object_is_a_sequence() {
        assert_eq!(Value::object().as_sequence().map(<[Value]>::len), Some(0));
        assert!(Value::from_pairs([("k", 1)]).as_sequence().is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::from(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }
}

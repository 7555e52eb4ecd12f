//! Named configuration schemas.
//!
//! A schema is an ordered map of field names to [`FieldSpec`]s. Feature
//! modules define a schema once at startup and then use [`SchemaRegistry::merge`]
//! to turn user options into a complete, defaulted configuration, or
//! [`SchemaRegistry::validate`] to report every problem with a config at once.
//!
//! Field iteration always follows definition order, so validation output is
//! deterministic.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};
use crate::merge::deep_merge;
use crate::value::{Object, Value};

/// Ordered field definitions of a schema (or of a nested table field).
pub type Fields = IndexMap<String, FieldSpec>;

/// Build a [`Fields`] map from `(name, spec)` pairs, keeping their order.
pub fn fields<I, K>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, FieldSpec)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Expected type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Table,
    Function,
    Array,
    Any,
}

impl FieldType {
    /// Parse a Lua-side type name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "table" => Self::Table,
            "function" => Self::Function,
            "array" => Self::Array,
            "any" => Self::Any,
            _ => return None,
        })
    }

    /// Name used in error messages and on the Lua side.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Table => "table",
            Self::Function => "function",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    /// Basic type check, without nested fields, items or validators.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => matches!(value, Value::String(_)),
            Self::Number => matches!(value, Value::Integer(_) | Value::Float(_)),
            Self::Boolean => matches!(value, Value::Bool(_)),
            Self::Table => matches!(value, Value::Object(_) | Value::Array(_)),
            Self::Function => matches!(value, Value::Function(_)),
            Self::Array => value.as_sequence().is_some(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ValidatorFn = dyn Fn(&Value) -> Result<(), Option<String>>;

/// Custom field check, run after the basic type check passed.
///
/// `Err(Some(msg))` reports `msg`; `Err(None)` reports a generic message.
#[derive(Clone)]
pub struct Validator(Rc<ValidatorFn>);

impl Validator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), Option<String>> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn check(&self, value: &Value) -> Result<(), Option<String>> {
        (self.0)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

/// Definition of a single field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Expected type.
    pub ty: FieldType,

    /// Whether the field must be present.
    pub required: bool,

    /// Value inserted when the field is absent.
    pub default: Option<Value>,

    /// Nested fields, only meaningful for [`FieldType::Table`].
    pub fields: Option<Fields>,

    /// Element spec, only meaningful for [`FieldType::Array`].
    pub items: Option<Box<FieldSpec>>,

    /// Optional custom check.
    pub validator: Option<Validator>,
}

impl FieldSpec {
    /// Create an optional field of the given type with no default.
    pub fn new(ty: FieldType) -> Self {
        Self {
            ty,
            required: false,
            default: None,
            fields: None,
            items: None,
            validator: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn table() -> Self {
        Self::new(FieldType::Table)
    }

    pub fn function() -> Self {
        Self::new(FieldType::Function)
    }

    pub fn array(items: FieldSpec) -> Self {
        Self::new(FieldType::Array).with_items(items)
    }

    pub fn any() -> Self {
        Self::new(FieldType::Any)
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set nested fields (table fields).
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Set the element spec (array fields).
    pub fn with_items(mut self, items: FieldSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Attach a custom validator.
    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), Option<String>> + 'static,
    {
        self.validator = Some(Validator::new(f));
        self
    }

    fn nested(&self) -> Option<&Fields> {
        match self.ty {
            FieldType::Table => self.fields.as_ref(),
            _ => None,
        }
    }
}

/// Error for one field: either a message or the errors of a nested table/array.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    Message(String),
    Nested(ValidationErrors),
}

impl FieldError {
    /// The message, if this is a leaf error.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Message(msg) => Some(msg),
            Self::Nested(_) => None,
        }
    }

    /// The nested errors, if this is a table/array error.
    pub fn nested(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Message(_) => None,
            Self::Nested(errors) => Some(errors),
        }
    }
}

/// Every problem found while validating a config, keyed by field name.
///
/// Array element errors are keyed `[n]` (1-based) inside the array field's
/// nested map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    errors: IndexMap<String, FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    fn single(key: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.insert_message(key, message);
        errors
    }

    fn insert_message(&mut self, key: &str, message: impl Into<String>) {
        self.errors
            .insert(key.to_string(), FieldError::Message(message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn get(&self, key: &str) -> Option<&FieldError> {
        self.errors.get(key)
    }

    /// Message for a top-level field, if it is a leaf error.
    pub fn message(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldError::message)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldError)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flatten to `(path, message)` pairs, e.g. `("lsp.servers[2]", "...")`.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        for (key, error) in &self.errors {
            let path = if prefix.is_empty() {
                key.clone()
            } else if key.starts_with('[') {
                format!("{prefix}{key}")
            } else {
                format!("{prefix}.{key}")
            };
            match error {
                FieldError::Message(msg) => out.push((path, msg.clone())),
                FieldError::Nested(nested) => nested.flatten_into(&path, out),
            }
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (path, msg)) in self.flatten().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{path}: {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Registry of named schemas. Schemas are immutable once defined.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RefCell<IndexMap<String, Rc<Fields>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a schema. Fails on an empty or already used name.
    pub fn define(&self, name: &str, fields: Fields) -> SchemaResult<()> {
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        let mut schemas = self.schemas.borrow_mut();
        if schemas.contains_key(name) {
            return Err(SchemaError::AlreadyDefined {
                name: name.to_string(),
            });
        }
        debug!(schema = name, fields = fields.len(), "defined schema");
        schemas.insert(name.to_string(), Rc::new(fields));
        Ok(())
    }

    /// A copy of the schema's fields.
    pub fn get(&self, name: &str) -> Option<Fields> {
        self.lookup(name).map(|fields| (*fields).clone())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.schemas.borrow().contains_key(name)
    }

    /// Defined schema names, in definition order.
    pub fn names(&self) -> Vec<String> {
        self.schemas.borrow().keys().cloned().collect()
    }

    // The borrow is released before any validator runs, so validators may
    // call back into the registry.
    fn lookup(&self, name: &str) -> Option<Rc<Fields>> {
        self.schemas.borrow().get(name).cloned()
    }

    /// Validate `config` against a schema, collecting every field error.
    pub fn validate(&self, name: &str, config: &Value) -> Result<(), ValidationErrors> {
        let Some(fields) = self.lookup(name) else {
            return Err(ValidationErrors::single(
                "_schema",
                format!("schema '{name}' is not defined"),
            ));
        };
        if config.is_null() {
            return Err(ValidationErrors::single("_config", "config is nil"));
        }

        let mut errors = ValidationErrors::new();
        validate_fields(&fields, config.as_object(), &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            debug!(schema = name, errors = errors.len(), "config failed validation");
            Err(errors)
        }
    }

    /// Fill absent fields with their defaults. Unknown schemas yield an empty object.
    pub fn apply_defaults(&self, name: &str, config: &Value) -> Value {
        let Some(fields) = self.lookup(name) else {
            return Value::object();
        };
        let mut out = config.as_object().cloned().unwrap_or_default();
        fill_defaults(&fields, &mut out);
        Value::Object(out)
    }

    /// Schema defaults with `user` deep-merged on top (user values win).
    pub fn merge(&self, name: &str, user: &Value) -> Value {
        let defaults = self.apply_defaults(name, &Value::object());
        deep_merge(&defaults, user)
    }
}

fn validate_fields(fields: &Fields, config: Option<&Object>, errors: &mut ValidationErrors) {
    for (key, spec) in fields {
        let value = config.and_then(|obj| obj.get(key)).filter(|v| !v.is_null());
        match value {
            None if spec.required => errors.insert_message(key, "required field is missing"),
            None => {}
            Some(value) => {
                if let Some(error) = validate_value(spec, value) {
                    errors.errors.insert(key.clone(), error);
                }
            }
        }
    }
}

fn validate_value(spec: &FieldSpec, value: &Value) -> Option<FieldError> {
    if !spec.ty.matches(value) {
        return Some(FieldError::Message(format!(
            "type mismatch: expected {}, got {}",
            spec.ty,
            value.type_name()
        )));
    }

    let mut nested = ValidationErrors::new();
    if let Some(inner) = spec.nested() {
        validate_fields(inner, value.as_object(), &mut nested);
    }
    if let (FieldType::Array, Some(items)) = (spec.ty, &spec.items) {
        for (i, item) in value.as_sequence().unwrap_or_default().iter().enumerate() {
            if let Some(error) = validate_value(items, item) {
                nested.errors.insert(format!("[{}]", i + 1), error);
            }
        }
    }
    if !nested.is_empty() {
        return Some(FieldError::Nested(nested));
    }

    let validator = spec.validator.as_ref()?;
    validator.check(value).err().map(|msg| {
        FieldError::Message(msg.unwrap_or_else(|| "custom validation failed".to_string()))
    })
}

fn fill_defaults(fields: &Fields, obj: &mut Object) {
    for (key, spec) in fields {
        if let Some(existing) = obj.get_mut(key).filter(|v| !v.is_null()) {
            if let (Some(inner), Value::Object(existing)) = (spec.nested(), existing) {
                fill_defaults(inner, existing);
            }
            continue;
        }

        match (spec.nested(), &spec.default) {
            (Some(inner), None | Some(Value::Object(_))) => {
                let mut table = spec
                    .default
                    .as_ref()
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                fill_defaults(inner, &mut table);
                if spec.default.is_some() || !table.is_empty() {
                    obj.insert(key.clone(), Value::Object(table));
                }
            }
            (_, Some(default)) => {
                obj.insert(key.clone(), default.clone());
            }
            (_, None) => {}
        }
    }
}

//! Conversions between Lua values and [`Value`].

use std::ffi::c_void;

use mlua::{FromLua, IntoLua, Lua, Table, Value as LuaValue, Variadic};

use nvframe_core::{CallbackError, FunctionRef, Object, Value};

/// A [`Value`] crossing the Lua boundary.
///
/// Implements `IntoLua`/`FromLua` so it can be used directly as a function
/// argument or return type without holding a separate `Lua` handle.
#[derive(Debug, Clone, Default)]
pub struct Bridged(pub Value);

impl IntoLua for Bridged {
    fn into_lua(self, lua: &Lua) -> mlua::Result<LuaValue> {
        value_to_lua(lua, &self.0)
    }
}

impl FromLua for Bridged {
    fn from_lua(value: LuaValue, _lua: &Lua) -> mlua::Result<Self> {
        lua_to_value(value).map(Bridged)
    }
}

/// Deepest table nesting [`lua_to_value`] follows before giving up.
pub const MAX_DEPTH: usize = 128;

/// Convert a Lua value to our Value type.
///
/// Tables whose keys are exactly `1..n` become arrays, every other table an
/// object with string keys (numeric keys are stringified). Functions are
/// wrapped so Rust code can call them. Userdata and threads become `Null`.
///
/// A table that contains itself, directly or through its children, is an
/// error, as is nesting deeper than [`MAX_DEPTH`]. The same table reached
/// along two separate paths is converted twice.
pub fn lua_to_value(value: LuaValue) -> mlua::Result<Value> {
    convert(value, &mut Vec::new())
}

// `path` holds the tables currently being converted, outermost first.
fn convert(value: LuaValue, path: &mut Vec<*const c_void>) -> mlua::Result<Value> {
    Ok(match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(b),
        LuaValue::Integer(i) => Value::Integer(i),
        LuaValue::Number(n) => Value::Float(n),
        LuaValue::String(s) => Value::String(s.to_string_lossy()),
        LuaValue::Table(t) => {
            let ptr = t.to_pointer();
            if path.contains(&ptr) {
                return Err(mlua::Error::runtime(
                    "cannot convert a table that contains itself",
                ));
            }
            if path.len() >= MAX_DEPTH {
                return Err(mlua::Error::runtime(format!(
                    "table nesting exceeds {MAX_DEPTH} levels"
                )));
            }
            path.push(ptr);
            let converted = table_to_value(t, path);
            path.pop();
            converted?
        }
        LuaValue::Function(f) => Value::Function(wrap_function(f)),
        _ => Value::Null,
    })
}

fn table_to_value(table: Table, path: &mut Vec<*const c_void>) -> mlua::Result<Value> {
    let len = table.raw_len();
    let mut entries = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        entries.push(pair?);
    }

    // Distinct keys, all within 1..=len, and len of them: no holes, no extras.
    let is_sequence = len > 0
        && entries.len() == len
        && entries.iter().all(|(k, _)| match k {
            LuaValue::Integer(i) => usize::try_from(*i).is_ok_and(|i| (1..=len).contains(&i)),
            _ => false,
        });
    if is_sequence {
        let mut arr = Vec::with_capacity(len);
        for i in 1..=len {
            arr.push(convert(table.raw_get::<LuaValue>(i)?, path)?);
        }
        return Ok(Value::Array(arr));
    }

    let mut obj = Object::new();
    for (k, v) in entries {
        let key = match k {
            LuaValue::String(s) => s.to_string_lossy(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            _ => continue,
        };
        obj.insert(key, convert(v, path)?);
    }
    Ok(Value::Object(obj))
}

/// Convert our Value type to a Lua value.
pub fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Integer(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.raw_set(i + 1, value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(obj) => {
            let table = lua.create_table()?;
            for (k, v) in obj {
                table.raw_set(k.as_str(), value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Function(f) => {
            let f = f.clone();
            let func = lua.create_function(move |_, args: Variadic<Bridged>| {
                let args = args.iter().map(|b| b.0.clone()).collect();
                f.call(args)
                    .map(Bridged)
                    .map_err(|e| mlua::Error::runtime(e.to_string()))
            })?;
            Ok(LuaValue::Function(func))
        }
    }
}

/// Wrap a Lua function so it can live inside a [`Value`].
pub fn wrap_function(func: mlua::Function) -> FunctionRef {
    FunctionRef::new(move |args| {
        let args: Variadic<Bridged> = args.into_iter().map(Bridged).collect();
        func.call::<Bridged>(args)
            .map(|ret| ret.0)
            .map_err(callback_error)
    })
}

/// Lua failure as a callback error carrying the clean message.
pub fn callback_error(err: mlua::Error) -> CallbackError {
    error_message(&err).into()
}

/// Human-readable message of a Lua error, without the wrapping added by
/// callbacks and without the stack traceback.
pub fn error_message(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => format!("syntax error: {message}"),
        mlua::Error::CallbackError { cause, .. } => return error_message(cause),
        mlua::Error::WithContext { cause, .. } => return error_message(cause),
        other => other.to_string(),
    };
    match message.find("\nstack traceback:") {
        Some(at) => message[..at].to_string(),
        None => message,
    }
}

/// Lua truthiness of a raw Lua value.
pub fn is_truthy(value: &LuaValue) -> bool {
    !matches!(value, LuaValue::Nil | LuaValue::Boolean(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_becomes_array() {
        let lua = Lua::new();
        let v: LuaValue = lua.load("return { 'a', 'b', 'c' }").eval().unwrap();
        assert_eq!(lua_to_value(v).unwrap(), Value::from(vec!["a", "b", "c"]));
    }

    #[test]
    fn test_holes_become_object() {
        let lua = Lua::new();
        let v: LuaValue = lua.load("return { [1] = 'a', [3] = 'c' }").eval().unwrap();
        let value = lua_to_value(v).unwrap();
        assert_eq!(value.get("1"), Some(&Value::from("a")));
        assert_eq!(value.get("3"), Some(&Value::from("c")));
    }

    #[test]
    fn test_mixed_table_with_hole_keeps_every_key() {
        let lua = Lua::new();
        let v: LuaValue = lua
            .load("return { [1] = 'a', [3] = 'c', x = 1 }")
            .eval()
            .unwrap();
        let value = lua_to_value(v).unwrap();
        assert!(value.as_object().is_some());
        assert_eq!(value.get("1"), Some(&Value::from("a")));
        assert_eq!(value.get("3"), Some(&Value::from("c")));
        assert_eq!(value.get("x"), Some(&Value::from(1)));
    }

    #[test]
    fn test_self_referencing_table_is_an_error() {
        let lua = Lua::new();
        let v: LuaValue = lua
            .load("local cfg = { name = 'lua_ls' }; cfg.self = cfg; return cfg")
            .eval()
            .unwrap();
        let err = lua_to_value(v).unwrap_err();
        assert!(error_message(&err).contains("contains itself"));

        let v: LuaValue = lua
            .load("local M = {}; M.__index = M; return { list = { M } }")
            .eval()
            .unwrap();
        assert!(lua_to_value(v).is_err());
    }

    #[test]
    fn test_shared_table_is_not_a_cycle() {
        let lua = Lua::new();
        let v: LuaValue = lua
            .load("local shared = { 'lua' }; return { a = shared, b = shared }")
            .eval()
            .unwrap();
        let value = lua_to_value(v).unwrap();
        assert_eq!(value.get("a"), value.get("b"));
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let lua = Lua::new();
        let v: LuaValue = lua
            .load("local t = {}; for _ = 1, 500 do t = { t } end; return t")
            .eval()
            .unwrap();
        let err = lua_to_value(v).unwrap_err();
        assert!(error_message(&err).contains("nesting"));
    }

    #[test]
    fn test_nested_round_trip() {
        let lua = Lua::new();
        let original = Value::from_pairs([
            ("name", Value::from("lua_ls")),
            ("filetypes", Value::from(vec!["lua"])),
            (
                "settings",
                Value::from_pairs([("diagnostics", Value::from_pairs([("enable", true)]))]),
            ),
            ("timeout", Value::from(2.5)),
        ]);
        let lua_value = value_to_lua(&lua, &original).unwrap();
        assert_eq!(lua_to_value(lua_value).unwrap(), original);
    }

    #[test]
    fn test_lua_function_is_callable_from_rust() {
        let lua = Lua::new();
        let v: LuaValue = lua
            .load("return function(a, b) return a + b end")
            .eval()
            .unwrap();
        let value = lua_to_value(v).unwrap();
        let f = value.as_function().unwrap();
        assert_eq!(f.call(vec![Value::from(2), Value::from(3)]).unwrap(), Value::from(5));
    }

    #[test]
    fn test_native_function_is_callable_from_lua() {
        let lua = Lua::new();
        let double = Value::function(|args| {
            Ok(Value::from(args[0].as_i64().unwrap_or_default() * 2))
        });
        lua.globals()
            .set("double", value_to_lua(&lua, &double).unwrap())
            .unwrap();
        let out: i64 = lua.load("return double(21)").eval().unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn test_error_message_strips_wrapping() {
        let lua = Lua::new();
        let err = lua
            .load("error('plain failure', 0)")
            .exec()
            .unwrap_err();
        assert_eq!(error_message(&err), "plain failure");

        let err = lua.load("return {").exec().unwrap_err();
        assert!(error_message(&err).starts_with("syntax error"));
    }
}

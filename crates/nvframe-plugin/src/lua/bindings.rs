//! Rust-to-Lua bindings: the `nvim.core.*` modules.
//!
//! Each module is registered in `package.preload` and built on first
//! `require`. Functions hold weak references to the framework components so
//! the Lua state never keeps them alive.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::{Rc, Weak};

use mlua::{Function, Lua, MultiValue, Table, Value as LuaValue};
use tracing::{debug, error, info, trace, warn};

use nvframe_core::{
    FieldError, FieldSpec, FieldType, Fields, SchemaError, SchemaRegistry, SchemaResult,
    ValidationErrors, Value, deep_merge,
};

use crate::events::{EventBus, SubscribeOptions, SubscriberInfo, SubscriptionId};
use crate::loader::{LoadOptions, ModuleLoader};
use crate::registry::{PluginDescriptor, PluginFilter, PluginInfo, PluginRegistry};
use crate::types::{ModuleError, ModuleResult};

use super::convert::{Bridged, callback_error, error_message, is_truthy, lua_to_value, value_to_lua};

pub const CONFIG_SCHEMA_MODULE: &str = "nvim.core.config_schema";
pub const EVENTS_MODULE: &str = "nvim.core.events";
pub const MODULE_LOADER_MODULE: &str = "nvim.core.module_loader";
pub const PLUGIN_MODULE: &str = "nvim.core.plugin";
pub const UTILS_MODULE: &str = "nvim.core.utils";

/// `true`, or `false, message`.
type Status = (bool, Option<String>);

/// Payloads of emits made from Lua, tagged with their bus dispatch depth.
///
/// Lua subscribers receive the emitted value itself rather than a converted
/// copy when the emit they are reached from is on top of this stack.
type Payloads = Rc<RefCell<Vec<(usize, LuaValue)>>>;

/// Register every `nvim.core.*` module with the loader's Lua state.
pub fn install(
    schemas: &Rc<SchemaRegistry>,
    events: &Rc<EventBus>,
    loader: &Rc<ModuleLoader>,
    plugins: &Rc<PluginRegistry>,
) -> ModuleResult<()> {
    let lua = loader.lua();

    let weak = Rc::downgrade(schemas);
    loader.preload_function(
        CONFIG_SCHEMA_MODULE,
        lua.create_function(move |lua, _: MultiValue| create_schema_api(lua, &weak))?,
    )?;

    let weak = Rc::downgrade(events);
    let payloads = Payloads::default();
    loader.preload_function(
        EVENTS_MODULE,
        lua.create_function(move |lua, _: MultiValue| {
            create_events_api(lua, &weak, &payloads)
        })?,
    )?;

    let weak = Rc::downgrade(loader);
    loader.preload_function(
        MODULE_LOADER_MODULE,
        lua.create_function(move |lua, _: MultiValue| create_loader_api(lua, &weak))?,
    )?;

    let weak = Rc::downgrade(plugins);
    loader.preload_function(
        PLUGIN_MODULE,
        lua.create_function(move |lua, _: MultiValue| create_plugin_api(lua, &weak))?,
    )?;

    loader.preload_function(
        UTILS_MODULE,
        lua.create_function(|lua, _: MultiValue| create_utils_api(lua))?,
    )?;

    debug!("installed nvim.core Lua modules");
    Ok(())
}

fn upgrade<T>(weak: &Weak<T>) -> mlua::Result<Rc<T>> {
    weak.upgrade()
        .ok_or_else(|| mlua::Error::runtime("nvframe: framework has been dropped"))
}

fn status<E: Display>(result: Result<(), E>) -> Status {
    match result {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    }
}

fn refuse(message: impl Into<String>) -> Status {
    (false, Some(message.into()))
}

fn non_empty_string(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::String(s) => {
            let s = s.to_string_lossy();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

fn module_error(err: ModuleError) -> mlua::Error {
    mlua::Error::runtime(err.to_string())
}

/// A table argument as a [`Value`]; `nil` becomes an empty object.
fn table_arg(value: LuaValue) -> Result<Value, String> {
    match lua_to_value(value) {
        Ok(Value::Null) => Ok(Value::object()),
        Ok(value) => Ok(value),
        Err(err) => Err(error_message(&err)),
    }
}

/// A converted table, or `nil, message`.
fn table_or_message(
    lua: &Lua,
    result: Result<Value, String>,
) -> mlua::Result<(LuaValue, Option<String>)> {
    match result {
        Ok(value) => Ok((value_to_lua(lua, &value)?, None)),
        Err(message) => Ok((LuaValue::Nil, Some(message))),
    }
}

fn create_schema_api(lua: &Lua, schemas: &Weak<SchemaRegistry>) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    let weak = schemas.clone();
    let define = lua.create_function(move |_, (name, fields): (LuaValue, LuaValue)| {
        let schemas = upgrade(&weak)?;
        let Some(name) = non_empty_string(&name) else {
            return Ok(refuse("schema name must be a non-empty string"));
        };
        let LuaValue::Table(fields) = fields else {
            return Ok(refuse(format!("schema '{name}': fields must be a table")));
        };
        Ok(status(
            parse_fields(&name, "", &fields).and_then(|fields| schemas.define(&name, fields)),
        ))
    })?;
    api.set("define", define)?;

    let weak = schemas.clone();
    let get = lua.create_function(move |lua, name: LuaValue| {
        let schemas = upgrade(&weak)?;
        match non_empty_string(&name).and_then(|name| schemas.get(&name)) {
            Some(fields) => Ok(LuaValue::Table(fields_to_lua(lua, &fields)?)),
            None => Ok(LuaValue::Nil),
        }
    })?;
    api.set("get", get)?;

    let weak = schemas.clone();
    let validate = lua.create_function(move |lua, (name, config): (LuaValue, LuaValue)| {
        let schemas = upgrade(&weak)?;
        let name = non_empty_string(&name).unwrap_or_default();
        let config = match lua_to_value(config) {
            Ok(config) => config,
            Err(err) => {
                let errors = lua.create_table()?;
                errors.set("_config", error_message(&err))?;
                return Ok((false, LuaValue::Table(errors)));
            }
        };
        match schemas.validate(&name, &config) {
            Ok(()) => Ok((true, LuaValue::Nil)),
            Err(errors) => Ok((false, LuaValue::Table(errors_to_lua(lua, &errors)?))),
        }
    })?;
    api.set("validate", validate)?;

    let weak = schemas.clone();
    let apply_defaults =
        lua.create_function(move |lua, (name, config): (LuaValue, LuaValue)| {
            let schemas = upgrade(&weak)?;
            let name = non_empty_string(&name).unwrap_or_default();
            let result = table_arg(config).map(|config| schemas.apply_defaults(&name, &config));
            table_or_message(lua, result)
        })?;
    api.set("apply_defaults", apply_defaults)?;

    let weak = schemas.clone();
    let merge = lua.create_function(move |lua, (name, user): (LuaValue, LuaValue)| {
        let schemas = upgrade(&weak)?;
        let name = non_empty_string(&name).unwrap_or_default();
        let result = table_arg(user).map(|user| schemas.merge(&name, &user));
        table_or_message(lua, result)
    })?;
    api.set("merge", merge)?;

    Ok(api)
}

fn invalid(schema: &str, field: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::InvalidField {
        schema: schema.to_string(),
        field: field.to_string(),
        message: message.into(),
    }
}

fn parse_fields(schema: &str, prefix: &str, table: &Table) -> SchemaResult<Fields> {
    let mut entries = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, spec) = pair.map_err(|e| invalid(schema, prefix, error_message(&e)))?;
        let Some(key) = non_empty_string(&key) else {
            return Err(invalid(schema, prefix, "field names must be non-empty strings"));
        };
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let LuaValue::Table(spec) = spec else {
            return Err(invalid(schema, &path, "field spec must be a table"));
        };
        entries.push((key, parse_field_spec(schema, &path, &spec)?));
    }
    // Lua tables are unordered; sort so validation output is stable.
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries.into_iter().collect())
}

fn parse_field_spec(schema: &str, path: &str, table: &Table) -> SchemaResult<FieldSpec> {
    let get = |key: &str| {
        table
            .get::<LuaValue>(key)
            .map_err(|e| invalid(schema, path, error_message(&e)))
    };

    let ty = match get("type")? {
        LuaValue::Nil => FieldType::Any,
        LuaValue::String(s) => {
            let name = s.to_string_lossy();
            FieldType::parse(&name)
                .ok_or_else(|| invalid(schema, path, format!("unknown field type '{name}'")))?
        }
        other => {
            return Err(invalid(
                schema,
                path,
                format!("field type must be a string, got {}", other.type_name()),
            ));
        }
    };

    let mut spec = FieldSpec::new(ty);
    if is_truthy(&get("required")?) {
        spec = spec.required();
    }

    let default = lua_to_value(get("default")?).map_err(|e| invalid(schema, path, error_message(&e)))?;
    if !default.is_null() {
        spec = spec.with_default(default);
    }

    match get("fields")? {
        LuaValue::Nil => {}
        LuaValue::Table(nested) => spec = spec.with_fields(parse_fields(schema, path, &nested)?),
        _ => return Err(invalid(schema, path, "nested fields must be a table")),
    }

    match get("items")? {
        LuaValue::Nil => {}
        LuaValue::Table(items) => {
            spec = spec.with_items(parse_field_spec(schema, &format!("{path}[]"), &items)?)
        }
        _ => return Err(invalid(schema, path, "items must be a field spec table")),
    }

    match get("validator")? {
        LuaValue::Nil => {}
        LuaValue::Function(validator) => {
            spec = spec.with_validator(move |value| run_validator(&validator, value))
        }
        _ => return Err(invalid(schema, path, "validator must be a function")),
    }

    Ok(spec)
}

fn run_validator(validator: &Function, value: &Value) -> Result<(), Option<String>> {
    match validator.call::<(LuaValue, Option<String>)>(Bridged(value.clone())) {
        Ok((ok, _)) if is_truthy(&ok) => Ok(()),
        Ok((_, message)) => Err(message),
        Err(err) => Err(Some(format!("validator raised: {}", error_message(&err)))),
    }
}

fn fields_to_lua(lua: &Lua, fields: &Fields) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for (name, spec) in fields {
        table.set(name.as_str(), field_spec_to_lua(lua, spec)?)?;
    }
    Ok(table)
}

fn field_spec_to_lua(lua: &Lua, spec: &FieldSpec) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("type", spec.ty.as_str())?;
    table.set("required", spec.required)?;
    if let Some(default) = &spec.default {
        table.set("default", value_to_lua(lua, default)?)?;
    }
    if let Some(fields) = &spec.fields {
        table.set("fields", fields_to_lua(lua, fields)?)?;
    }
    if let Some(items) = &spec.items {
        table.set("items", field_spec_to_lua(lua, items)?)?;
    }
    if let Some(validator) = &spec.validator {
        let validator = validator.clone();
        let func = lua.create_function(move |_, value: Bridged| {
            Ok(match validator.check(&value.0) {
                Ok(()) => (true, None),
                Err(message) => (false, message),
            })
        })?;
        table.set("validator", func)?;
    }
    Ok(table)
}

/// Errors as a Lua table; array element keys become integer indices.
fn errors_to_lua(lua: &Lua, errors: &ValidationErrors) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for (key, error) in errors.iter() {
        let value = match error {
            FieldError::Message(msg) => LuaValue::String(lua.create_string(msg)?),
            FieldError::Nested(nested) => LuaValue::Table(errors_to_lua(lua, nested)?),
        };
        let index = key
            .strip_prefix('[')
            .and_then(|k| k.strip_suffix(']'))
            .and_then(|k| k.parse::<i64>().ok());
        match index {
            Some(index) => table.raw_set(index, value)?,
            None => table.raw_set(key, value)?,
        }
    }
    Ok(table)
}

fn create_events_api(
    lua: &Lua,
    events: &Weak<EventBus>,
    payloads: &Payloads,
) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    let weak = events.clone();
    let stack = Rc::clone(payloads);
    let on = lua.create_function(
        move |_, (event, callback, opts): (LuaValue, LuaValue, Option<Table>)| {
            let events = upgrade(&weak)?;
            let Some(event) = non_empty_string(&event) else {
                return Err(mlua::Error::runtime(
                    "InvalidArgument: event name must be a non-empty string",
                ));
            };
            let LuaValue::Function(callback) = callback else {
                return Err(mlua::Error::runtime(
                    "InvalidArgument: callback must be a function",
                ));
            };

            let mut options = SubscribeOptions::default();
            if let Some(opts) = opts {
                options.priority = opts.get::<Option<i32>>("priority")?.unwrap_or(0);
                options.once = is_truthy(&opts.get::<LuaValue>("once")?);
            }

            let bus = Rc::downgrade(&events);
            let stack = Rc::clone(&stack);
            let id = events.on(
                &event,
                move |data| {
                    let depth = bus.upgrade().map_or(0, |bus| bus.emit_depth());
                    let original = match stack.borrow().last() {
                        Some((at, value)) if *at == depth => Some(value.clone()),
                        _ => None,
                    };
                    let result = match original {
                        Some(value) => callback.call::<()>(value),
                        None => callback.call::<()>(Bridged(data.clone())),
                    };
                    result.map_err(callback_error)
                },
                options,
            );
            Ok(id.id())
        },
    )?;
    api.set("on", on)?;

    let weak = events.clone();
    let stack = Rc::clone(payloads);
    let emit = lua.create_function(move |_, (event, data): (String, LuaValue)| {
        let events = upgrade(&weak)?;
        // Rust subscribers get a converted copy; Lua subscribers get `data`.
        let converted = lua_to_value(data.clone()).unwrap_or_else(|err| {
            debug!(event = %event, error = %error_message(&err), "payload not convertible");
            Value::Null
        });
        stack.borrow_mut().push((events.emit_depth() + 1, data));
        let report = events.emit(&event, converted);
        stack.borrow_mut().pop();
        Ok(report.invoked)
    })?;
    api.set("emit", emit)?;

    let weak = events.clone();
    let off = lua.create_function(move |_, target: LuaValue| {
        let events = upgrade(&weak)?;
        match target {
            LuaValue::Integer(id) => {
                Ok(u64::try_from(id).map_or(0, |id| events.off(SubscriptionId::new(id))))
            }
            LuaValue::String(event) => Ok(events.off(event.to_string_lossy())),
            other => Err(mlua::Error::runtime(format!(
                "off expects a subscription id or an event name, got {}",
                other.type_name()
            ))),
        }
    })?;
    api.set("off", off)?;

    let weak = events.clone();
    let clear = lua.create_function(move |_, event: Option<String>| {
        upgrade(&weak)?.clear(event.as_deref());
        Ok(())
    })?;
    api.set("clear", clear)?;

    let weak = events.clone();
    let get_subscribers = lua.create_function(move |lua, event: Option<String>| {
        let events = upgrade(&weak)?;
        match event {
            Some(event) => subscribers_to_lua(lua, events.get_subscribers(&event)),
            None => {
                let all = lua.create_table()?;
                for (event, subs) in events.all_subscribers() {
                    all.raw_set(event, subscribers_to_lua(lua, subs)?)?;
                }
                Ok(all)
            }
        }
    })?;
    api.set("get_subscribers", get_subscribers)?;

    Ok(api)
}

fn subscribers_to_lua(lua: &Lua, subs: Vec<SubscriberInfo>) -> mlua::Result<Table> {
    let list = lua.create_table()?;
    for (i, sub) in subs.into_iter().enumerate() {
        let entry = lua.create_table()?;
        entry.set("id", sub.id.id())?;
        entry.set("event", sub.event)?;
        entry.set("priority", sub.priority)?;
        entry.set("once", sub.once)?;
        list.raw_set(i + 1, entry)?;
    }
    Ok(list)
}

fn create_loader_api(lua: &Lua, loader: &Weak<ModuleLoader>) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    let weak = loader.clone();
    let load = lua.create_function(move |_, (name, opts): (String, Option<Table>)| {
        let loader = upgrade(&weak)?;
        let mut options = LoadOptions::default();
        if let Some(opts) = opts {
            options.force = is_truthy(&opts.get::<LuaValue>("force")?);
            options.call_setup = is_truthy(&opts.get::<LuaValue>("call_setup")?);
        }
        loader.load(&name, options).map_err(module_error)
    })?;
    api.set("load", load)?;

    let weak = loader.clone();
    let reload = lua.create_function(move |_, name: String| {
        upgrade(&weak)?.reload(&name).map_err(module_error)
    })?;
    api.set("reload", reload)?;

    let weak = loader.clone();
    let unload = lua.create_function(move |_, name: String| {
        upgrade(&weak)?.unload(&name).map_err(module_error)
    })?;
    api.set("unload", unload)?;

    let weak = loader.clone();
    let is_loaded = lua.create_function(move |_, name: LuaValue| {
        let loader = upgrade(&weak)?;
        Ok(non_empty_string(&name).is_some_and(|name| loader.is_loaded(&name)))
    })?;
    api.set("is_loaded", is_loaded)?;

    let weak = loader.clone();
    let get_loaded_modules = lua.create_function(move |_, pattern: Option<String>| {
        upgrade(&weak)?
            .get_loaded_modules(pattern.as_deref())
            .map_err(module_error)
    })?;
    api.set("get_loaded_modules", get_loaded_modules)?;

    Ok(api)
}

fn create_plugin_api(lua: &Lua, plugins: &Weak<PluginRegistry>) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    let weak = plugins.clone();
    let register = lua.create_function(move |_, (name, descriptor): (LuaValue, LuaValue)| {
        let plugins = upgrade(&weak)?;
        let Some(name) = non_empty_string(&name) else {
            return Ok(refuse("plugin name must be a non-empty string"));
        };
        let LuaValue::Table(descriptor) = descriptor else {
            return Ok(refuse(format!("plugin '{name}': descriptor must be a table")));
        };
        match parse_descriptor(&descriptor) {
            Ok(descriptor) => Ok(status(plugins.register(&name, descriptor))),
            Err(message) => {
                warn!(plugin = %name, error = %message, "rejected plugin descriptor");
                Ok(refuse(format!("plugin '{name}': {message}")))
            }
        }
    })?;
    api.set("register", register)?;

    let weak = plugins.clone();
    let load = lua.create_function(move |_, name: LuaValue| {
        let plugins = upgrade(&weak)?;
        match non_empty_string(&name) {
            Some(name) => Ok(status(plugins.load(&name))),
            None => Ok(refuse("plugin name must be a non-empty string")),
        }
    })?;
    api.set("load", load)?;

    let weak = plugins.clone();
    let get = lua.create_function(move |lua, name: LuaValue| {
        let plugins = upgrade(&weak)?;
        match non_empty_string(&name).and_then(|name| plugins.get(&name)) {
            Some(info) => Ok(LuaValue::Table(plugin_to_lua(lua, &info)?)),
            None => Ok(LuaValue::Nil),
        }
    })?;
    api.set("get", get)?;

    let weak = plugins.clone();
    let list = lua.create_function(move |lua, filter: Option<Table>| {
        let plugins = upgrade(&weak)?;
        let mut by = PluginFilter::default();
        if let Some(filter) = filter {
            by.loaded = filter.get::<Option<bool>>("loaded")?;
            by.lazy = filter.get::<Option<bool>>("lazy")?;
        }
        let out = lua.create_table()?;
        for (i, info) in plugins.list(by).iter().enumerate() {
            out.raw_set(i + 1, plugin_to_lua(lua, info)?)?;
        }
        Ok(out)
    })?;
    api.set("list", list)?;

    let weak = plugins.clone();
    let unregister = lua.create_function(move |_, name: LuaValue| {
        let plugins = upgrade(&weak)?;
        match non_empty_string(&name) {
            Some(name) => Ok(status(plugins.unregister(&name))),
            None => Ok(refuse("plugin name must be a non-empty string")),
        }
    })?;
    api.set("unregister", unregister)?;

    let weak = plugins.clone();
    let is_loaded = lua.create_function(move |_, name: LuaValue| {
        let plugins = upgrade(&weak)?;
        Ok(non_empty_string(&name).is_some_and(|name| plugins.is_loaded(&name)))
    })?;
    api.set("is_loaded", is_loaded)?;

    Ok(api)
}

fn string_list(value: LuaValue) -> Option<Vec<String>> {
    let value = lua_to_value(value).ok()?;
    value
        .as_sequence()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn parse_descriptor(table: &Table) -> Result<PluginDescriptor, String> {
    let field = |key: &str| table.get::<LuaValue>(key).map_err(|e| error_message(&e));
    let text = |key: &str| -> Result<Option<String>, String> {
        match field(key)? {
            LuaValue::Nil => Ok(None),
            LuaValue::String(s) => Ok(Some(s.to_string_lossy())),
            other => Err(format!("{key} must be a string, got {}", other.type_name())),
        }
    };
    let triggers = |key: &str| -> Result<Vec<String>, String> {
        match field(key)? {
            LuaValue::Nil => Ok(Vec::new()),
            LuaValue::String(s) => Ok(vec![s.to_string_lossy()]),
            value @ LuaValue::Table(_) => string_list(value)
                .ok_or_else(|| format!("{key} must be a string or a list of strings")),
            _ => Err(format!("{key} must be a string or a list of strings")),
        }
    };

    let mut descriptor = PluginDescriptor::new();
    descriptor.dependencies = match field("dependencies")? {
        LuaValue::Nil => Vec::new(),
        value @ LuaValue::Table(_) => {
            string_list(value).ok_or("dependencies must be a list of plugin names")?
        }
        _ => return Err("dependencies must be a list of plugin names".to_string()),
    };

    match field("config")? {
        LuaValue::Nil => {}
        LuaValue::Function(config) => {
            descriptor = descriptor.with_config(move || config.call::<()>(()).map_err(callback_error));
        }
        _ => return Err("config must be a function".to_string()),
    }

    descriptor.module = text("module")?;
    descriptor.lazy = is_truthy(&field("lazy")?);
    descriptor.event = triggers("event")?;
    descriptor.cmd = triggers("cmd")?;
    descriptor.ft = triggers("ft")?;
    descriptor.description = text("description")?;
    descriptor.author = text("author")?;
    descriptor.version = text("version")?;
    descriptor.url = text("url")?;
    Ok(descriptor)
}

fn plugin_to_lua(lua: &Lua, info: &PluginInfo) -> mlua::Result<Table> {
    let d = &info.descriptor;
    let table = lua.create_table()?;
    table.set("name", info.name.as_str())?;
    table.set("state", info.state.as_str())?;
    table.set("loaded", info.is_loaded())?;
    table.set("lazy", d.lazy)?;
    table.set("dependencies", d.dependencies.clone())?;
    table.set("event", d.event.clone())?;
    table.set("cmd", d.cmd.clone())?;
    table.set("ft", d.ft.clone())?;
    table.set("module", d.module.clone())?;
    table.set("description", d.description.clone())?;
    table.set("author", d.author.clone())?;
    table.set("version", d.version.clone())?;
    table.set("url", d.url.clone())?;
    Ok(table)
}

fn create_utils_api(lua: &Lua) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    let merge = lua.create_function(|lua, (base, overlay): (LuaValue, LuaValue)| {
        let result = table_arg(base)
            .and_then(|base| Ok(deep_merge(&base, &table_arg(overlay)?)));
        table_or_message(lua, result)
    })?;
    api.set("deep_merge", merge)?;

    let log = lua.create_function(|_, (level, message): (String, String)| {
        match level.to_ascii_lowercase().as_str() {
            "trace" => trace!(target: "lua", "{}", message),
            "debug" => debug!(target: "lua", "{}", message),
            "warn" | "warning" => warn!(target: "lua", "{}", message),
            "error" => error!(target: "lua", "{}", message),
            _ => info!(target: "lua", "{}", message),
        }
        Ok(())
    })?;
    api.set("log", log)?;

    Ok(api)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        schemas: Rc<SchemaRegistry>,
        events: Rc<EventBus>,
        loader: Rc<ModuleLoader>,
        plugins: Rc<PluginRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let events = Rc::new(EventBus::new());
            let loader = Rc::new(ModuleLoader::new().with_events(Rc::clone(&events)));
            let plugins = Rc::new(
                PluginRegistry::new(Rc::clone(&events)).with_loader(Rc::clone(&loader)),
            );
            let schemas = Rc::new(SchemaRegistry::new());
            install(&schemas, &events, &loader, &plugins).unwrap();
            Self {
                schemas,
                events,
                loader,
                plugins,
            }
        }

        fn eval<T: mlua::FromLuaMulti>(&self, source: &str) -> T {
            self.loader.lua().load(source).eval().unwrap()
        }
    }

    #[test]
    fn test_schema_define_and_merge_from_lua() {
        let h = Harness::new();
        let port: i64 = h.eval(
            r#"
            local schema = require("nvim.core.config_schema")
            assert(schema.define("net", {
                host = { type = "string", default = "localhost" },
                port = { type = "number", default = 3000 },
            }))
            local merged = schema.merge("net", { port = 8080 })
            assert(merged.host == "localhost")
            return merged.port
            "#,
        );
        assert_eq!(port, 8080);
        assert!(h.schemas.is_defined("net"));
    }

    #[test]
    fn test_schema_failures_are_booleans() {
        let h = Harness::new();
        let (ok, msg): (bool, String) = h.eval(
            r#"
            local schema = require("nvim.core.config_schema")
            schema.define("x", { a = { type = "string" } })
            return schema.define("x", { a = { type = "string" } })
            "#,
        );
        assert!(!ok);
        assert!(msg.contains("already defined"));

        let (ok, msg): (bool, String) = h.eval(
            r#"return require("nvim.core.config_schema").define("y", { a = { type = "float" } })"#,
        );
        assert!(!ok);
        assert!(msg.contains("float"));

        let (ok, _): (bool, Option<String>) =
            h.eval(r#"return require("nvim.core.config_schema").define("z", nil)"#);
        assert!(!ok);
    }

    #[test]
    fn test_validate_returns_error_table() {
        let h = Harness::new();
        let message: String = h.eval(
            r#"
            local schema = require("nvim.core.config_schema")
            schema.define("lsp", {
                servers = { type = "array", items = { type = "string" } },
                timeout = {
                    type = "number",
                    validator = function(v) return v > 0, "timeout must be positive" end,
                },
            })
            local ok, errors = schema.validate("lsp", { servers = { "lua_ls", 42 }, timeout = -1 })
            assert(not ok)
            assert(errors.servers[2]:find("type mismatch"))
            return errors.timeout
            "#,
        );
        assert_eq!(message, "timeout must be positive");
    }

    #[test]
    fn test_events_from_lua() {
        let h = Harness::new();
        let order: String = h.eval(
            r#"
            local events = require("nvim.core.events")
            local seen = {}
            events.on("ping", function() table.insert(seen, "low") end)
            events.on("ping", function() table.insert(seen, "high") end, { priority = 10 })
            events.on("ping", function() table.insert(seen, "once") end, { once = true })
            events.emit("ping")
            events.emit("ping")
            return table.concat(seen, ",")
            "#,
        );
        assert_eq!(order, "high,low,once,high,low");
        assert_eq!(h.events.get_subscribers("ping").len(), 2);
    }

    #[test]
    fn test_events_reject_bad_arguments() {
        let h = Harness::new();
        let result: mlua::Result<()> = h
            .loader
            .lua()
            .load(r#"require("nvim.core.events").on("", function() end)"#)
            .exec();
        assert!(error_message(&result.unwrap_err()).contains("InvalidArgument"));

        let result: mlua::Result<()> = h
            .loader
            .lua()
            .load(r#"require("nvim.core.events").on("x", 42)"#)
            .exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_plugins_from_lua() {
        let h = Harness::new();
        let order: String = h.eval(
            r#"
            local plugin = require("nvim.core.plugin")
            local events = require("nvim.core.events")
            local seen = {}
            for _, e in ipairs({ "plugin:before_load", "plugin:loaded", "plugin:configured" }) do
                events.on(e, function(data) table.insert(seen, e .. ":" .. data.name) end)
            end
            assert(plugin.register("plenary", {}))
            assert(plugin.register("telescope", {
                dependencies = { "plenary" },
                cmd = "Telescope",
                config = function() end,
            }))
            assert(plugin.load("telescope"))
            assert(plugin.get("telescope").loaded)
            return table.concat(seen, " ")
            "#,
        );
        assert_eq!(
            order,
            "plugin:before_load:telescope plugin:before_load:plenary plugin:loaded:plenary \
             plugin:loaded:telescope plugin:configured:telescope"
        );
        assert_eq!(
            h.plugins.get("telescope").unwrap().descriptor.cmd,
            vec!["Telescope"]
        );
    }

    #[test]
    fn test_malformed_descriptor() {
        let h = Harness::new();
        let (ok, msg): (bool, String) = h.eval(
            r#"return require("nvim.core.plugin").register("bad", { dependencies = "plenary" })"#,
        );
        assert!(!ok);
        assert!(msg.contains("dependencies"));

        let (ok, _): (bool, String) =
            h.eval(r#"return require("nvim.core.plugin").register("bad", 42)"#);
        assert!(!ok);
        assert!(!h.plugins.is_registered("bad"));
    }

    #[test]
    fn test_module_loader_from_lua() {
        let h = Harness::new();
        h.loader.preload("user.opts", "return { tabstop = 4 }").unwrap();
        let same: bool = h.eval(
            r#"
            local loader = require("nvim.core.module_loader")
            local a = loader.load("user.opts")
            local b = loader.load("user.opts")
            assert(loader.is_loaded("user.opts"))
            assert(not loader.is_loaded(""))
            return a == b
            "#,
        );
        assert!(same);

        let err = h
            .loader
            .lua()
            .load(r#"require("nvim.core.module_loader").load("does.not.exist")"#)
            .exec()
            .unwrap_err();
        assert!(error_message(&err).contains("not found"));
    }

    #[test]
    fn test_self_referencing_config_fails_cleanly() {
        let h = Harness::new();
        let (ok, message, merged, merge_err): (bool, String, LuaValue, String) = h.eval(
            r#"
            local schema = require("nvim.core.config_schema")
            schema.define("lsp", { name = { type = "string" } })
            local cfg = { name = "lua_ls" }
            cfg.self = cfg
            local ok, errors = schema.validate("lsp", cfg)
            local merged, merge_err = schema.merge("lsp", cfg)
            return ok, errors._config, merged, merge_err
            "#,
        );
        assert!(!ok);
        assert!(message.contains("contains itself"));
        assert!(merged.is_nil());
        assert!(merge_err.contains("contains itself"));

        let (merged, err): (LuaValue, String) = h.eval(
            r#"
            local M = {}
            M.__index = M
            return require("nvim.core.utils").deep_merge({ a = 1 }, M)
            "#,
        );
        assert!(merged.is_nil());
        assert!(err.contains("contains itself"));
    }

    #[test]
    fn test_emit_hands_lua_subscribers_the_same_table() {
        let h = Harness::new();
        let shared: bool = h.eval(
            r#"
            local events = require("nvim.core.events")
            local seen
            events.on("buf", function(d) d.hits = d.hits + 1 end)
            events.on("buf", function(d) d.hits = d.hits + 1; seen = d end)
            local payload = { hits = 0 }
            events.emit("buf", payload)
            return seen == payload and payload.hits == 2
            "#,
        );
        assert!(shared);

        let cyclic: bool = h.eval(
            r#"
            local events = require("nvim.core.events")
            local M = {}
            M.__index = M
            local got
            events.on("module", function(d) got = d end)
            assert(events.emit("module", M) == 1)
            return got == M and got.__index == M
            "#,
        );
        assert!(cyclic);
    }

    #[test]
    fn test_nested_framework_events_carry_their_own_payload() {
        let h = Harness::new();
        let seen: String = h.eval(
            r#"
            local events = require("nvim.core.events")
            local plugin = require("nvim.core.plugin")
            plugin.register("mini", {})
            local seen = {}
            events.on("plugin:loaded", function(d) table.insert(seen, d.name) end)
            events.on("boot", function(d)
                table.insert(seen, d.stage)
                plugin.load("mini")
            end)
            events.emit("boot", { stage = "start" })
            return table.concat(seen, ",")
            "#,
        );
        assert_eq!(seen, "start,mini");
    }

    #[test]
    fn test_get_subscribers_without_event_lists_all() {
        let h = Harness::new();
        let (ping, pong, missing): (i64, i64, bool) = h.eval(
            r#"
            local events = require("nvim.core.events")
            events.on("ping", function() end)
            events.on("ping", function() end, { priority = 5 })
            events.on("pong", function() end)
            local all = events.get_subscribers()
            return #all.ping, #all.pong, all.other == nil
            "#,
        );
        assert_eq!((ping, pong), (2, 1));
        assert!(missing);
    }

    #[test]
    fn test_plugin_calls_with_bad_names() {
        let h = Harness::new();
        let (load_ok, load_msg, unreg_ok, unreg_msg, got, loaded): (
            bool,
            String,
            bool,
            String,
            LuaValue,
            bool,
        ) = h.eval(
            r#"
            local plugin = require("nvim.core.plugin")
            local load_ok, load_msg = plugin.load(nil)
            local unreg_ok, unreg_msg = plugin.unregister(42)
            return load_ok, load_msg, unreg_ok, unreg_msg, plugin.get(nil), plugin.is_loaded({})
            "#,
        );
        assert!(!load_ok && !unreg_ok && !loaded);
        assert!(load_msg.contains("non-empty string"));
        assert!(unreg_msg.contains("non-empty string"));
        assert!(got.is_nil());
    }

    #[test]
    fn test_utils_deep_merge() {
        let h = Harness::new();
        let (a, b): (i64, i64) = h.eval(
            r#"
            local utils = require("nvim.core.utils")
            local merged = utils.deep_merge({ ui = { a = 1, b = 1 } }, { ui = { b = 2 } })
            utils.log("debug", "merged")
            return merged.ui.a, merged.ui.b
            "#,
        );
        assert_eq!((a, b), (1, 2));
    }
}

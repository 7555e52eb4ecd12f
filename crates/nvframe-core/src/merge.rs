//! Deep merge for configuration values.

use crate::value::Value;

/// Merge `overlay` on top of `base`, returning a new value.
///
/// Objects are merged key by key at every level with `overlay` winning.
/// Arrays and scalars in `overlay` replace the base wholesale. A `Null` in
/// `overlay` never erases a base value (it is Lua `nil`, i.e. "not set").
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    deep_merge_into(&mut merged, overlay);
    merged
}

/// In-place variant of [`deep_merge`].
pub fn deep_merge_into(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (_, Value::Null) => {}
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(key) {
                    Some(existing) if !existing.is_null() => deep_merge_into(existing, value),
                    _ if value.is_null() => {}
                    _ => {
                        dst.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

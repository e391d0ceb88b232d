use serde_json::Value;

use crate::error::{Error, Result};
use crate::value::{remove_path, set_path};

/// Apply an update spec (`4.2`). Only `$set` and `$unset` are recognized;
/// any other top-level operator key is ignored (no-op), matching the
/// source's behavior for this subset. `_id` is protected from both — it
/// must never change.
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<()> {
    let obj = update
        .as_object()
        .ok_or_else(|| Error::BadRequest("update spec must be a JSON object".into()))?;
    for (op, arg) in obj {
        match op.as_str() {
            "$set" => apply_set(doc, arg)?,
            "$unset" => apply_unset(doc, arg)?,
            _ => {}
        }
    }
    Ok(())
}

fn apply_set(doc: &mut Value, arg: &Value) -> Result<()> {
    let fields = arg
        .as_object()
        .ok_or_else(|| Error::BadRequest("$set requires an object of field -> value".into()))?;
    for (path, value) in fields {
        if path == "_id" {
            continue;
        }
        set_path(doc, path, value.clone());
    }
    Ok(())
}

fn apply_unset(doc: &mut Value, arg: &Value) -> Result<()> {
    let fields = arg
        .as_object()
        .ok_or_else(|| Error::BadRequest("$unset requires an object of field -> anything".into()))?;
    for path in fields.keys() {
        if path == "_id" {
            continue;
        }
        remove_path(doc, path);
    }
    Ok(())
}

use serde_json::Value;

use crate::document::{remove_field, resolve_field, set_field};
use crate::error::{Error, Result};

/// Apply every operator in `update` to `doc`, in order.
///
/// `update` maps operator names to `{field path: operand}` objects.
/// `$set`/`$unset` carry the lock protocol, `$addToSet` maintains the
/// touched-collection set on transaction records, and the rest serve
/// caller writes issued inside a transaction. An empty update is
/// rejected rather than silently matched-and-ignored.
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<()> {
    let operators = update
        .as_object()
        .filter(|obj| !obj.is_empty())
        .ok_or_else(|| Error::InvalidQuery("update must be a non-empty object".into()))?;

    for (name, fields) in operators {
        let fields = fields
            .as_object()
            .ok_or_else(|| Error::InvalidQuery(format!("{name} value must be an object")))?;
        for (path, operand) in fields {
            apply_op(doc, name, path, operand)?;
        }
    }
    Ok(())
}

fn apply_op(doc: &mut Value, name: &str, path: &str, operand: &Value) -> Result<()> {
    match name {
        "$set" => set_field(doc, path, operand.clone()),
        "$unset" => remove_field(doc, path),
        "$inc" => {
            let step = operand.as_f64().ok_or_else(|| {
                Error::InvalidQuery(format!("$inc on '{path}' needs a numeric operand"))
            })?;
            let base = match resolve_field(doc, path) {
                Value::Null => 0.0,
                current => current.as_f64().ok_or_else(|| {
                    Error::InvalidQuery(format!("$inc target '{path}' is not numeric"))
                })?,
            };
            set_field(doc, path, number_to_value(base + step));
        }
        "$push" => mutate_array(doc, name, path, |arr| arr.push(operand.clone()))?,
        "$addToSet" => mutate_array(doc, name, path, |arr| {
            if !arr.contains(operand) {
                arr.push(operand.clone());
            }
        })?,
        "$pull" => {
            // Pulling from a missing field is a no-op, not array creation.
            if !matches!(resolve_field(doc, path), Value::Null) {
                mutate_array(doc, name, path, |arr| arr.retain(|el| el != operand))?;
            }
        }
        unknown => {
            return Err(Error::InvalidQuery(format!(
                "unknown update operator: {unknown}"
            )));
        }
    }
    Ok(())
}

/// Run an array edit against the field, creating the array when the
/// field is missing. Any other existing type is an error.
fn mutate_array(
    doc: &mut Value,
    name: &str,
    path: &str,
    edit: impl FnOnce(&mut Vec<Value>),
) -> Result<()> {
    let mut arr = match resolve_field(doc, path) {
        Value::Null => Vec::new(),
        Value::Array(arr) => arr,
        _ => {
            return Err(Error::InvalidQuery(format!(
                "{name} requires '{path}' to be an array"
            )));
        }
    };
    edit(&mut arr);
    set_field(doc, path, Value::Array(arr));
    Ok(())
}

/// Keep whole results as JSON integers; only genuine fractions become
/// floats.
fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

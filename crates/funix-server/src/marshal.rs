//! Request payload → keyword arguments, and cell fan-out.

use funix_schema::{FunctionSchema, Kind, Role, TypeDescriptor};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::error::MarshalError;
use crate::fetch::Fetch;
use crate::function::{ArgValue, DataFrame, Kwargs};

/// Key carrying the shared secret. Never passed to the function.
pub const SECRET_FIELD: &str = "__funix_secret";

/// Reconstruct keyword arguments from a request object.
///
/// Config arguments are cast to their resolved type, falling back to the raw
/// value when the cast fails. Column and cell arguments pass through; cells are
/// split later by [`fan_out`].
pub async fn marshal(
    schema: &FunctionSchema,
    mut request: Map<String, Value>,
    fetch: &dyn Fetch,
) -> Result<Kwargs, MarshalError> {
    request.remove(SECRET_FIELD);
    let mut kwargs = Kwargs::new();

    for argument in &schema.arguments {
        let name = argument.name.as_str();

        if let Some(columns) = schema.plan.frames.get(name) {
            let frame = regroup_frame(name, columns, &mut request)?;
            kwargs.insert(name, ArgValue::Frame(frame));
            continue;
        }

        let value = match request.remove(name) {
            Some(value) => value,
            None => match &argument.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };

        if schema.plan.is_upload(name) {
            kwargs.insert(name, dereference(name, value, fetch).await?);
            continue;
        }

        let value = match argument.role {
            Role::Config => match cast(&value, &argument.descriptor) {
                Some(cast) => cast,
                None => {
                    warn!(
                        argument = name,
                        type_name = %argument.descriptor.type_name,
                        "cast failed; passing raw value"
                    );
                    value
                }
            },
            Role::Column | Role::Cell => value,
        };
        kwargs.insert(name, ArgValue::Json(value));
    }

    if !request.is_empty() {
        let extra: Vec<&String> = request.keys().collect();
        debug!(?extra, "ignoring unknown request keys");
    }
    Ok(kwargs)
}

/// Columns arrive as sibling top-level keys; an object of columns under the
/// argument's own name is accepted too.
fn regroup_frame(
    name: &str,
    columns: &[String],
    request: &mut Map<String, Value>,
) -> Result<DataFrame, MarshalError> {
    let own = request.remove(name);
    let mut frame = DataFrame::new();
    for column in columns {
        let values = match request.remove(column) {
            Some(values) => values,
            None => match own.as_ref().and_then(|o| o.get(column)) {
                Some(values) => values.clone(),
                None => continue,
            },
        };
        let Value::Array(values) = values else {
            return Err(MarshalError::BadFrame {
                argument: name.to_string(),
                reason: format!("column `{column}` is not a list"),
            });
        };
        frame = frame.with_column(column.clone(), values);
    }
    Ok(frame)
}

async fn dereference(
    name: &str,
    value: Value,
    fetch: &dyn Fetch,
) -> Result<ArgValue, MarshalError> {
    let fetch_one = |uri: String| async move {
        fetch.fetch(&uri).await.map_err(|error| MarshalError::Fetch {
            argument: name.to_string(),
            error,
        })
    };
    match value {
        Value::String(uri) if !uri.is_empty() => Ok(ArgValue::Bytes(fetch_one(uri).await?)),
        Value::Array(items) if !items.is_empty() => {
            let mut files = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(uri) if !uri.is_empty() => {
                        files.push(ArgValue::Bytes(fetch_one(uri).await?))
                    }
                    other => files.push(ArgValue::Json(other)),
                }
            }
            Ok(ArgValue::List(files))
        }
        other => Ok(ArgValue::Json(other)),
    }
}

/// Cast a JSON value to a descriptor. `None` means the cast failed.
pub fn cast(value: &Value, descriptor: &TypeDescriptor) -> Option<Value> {
    if value.is_null() {
        return descriptor.optional.then_some(Value::Null);
    }
    match descriptor.kind {
        Kind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        Kind::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        Kind::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        Kind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            _ => None,
        },
        Kind::Array => match value {
            Value::Array(items) => Some(Value::Array(cast_elements(items, descriptor))),
            Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
                Value::Array(items) => Some(Value::Array(cast_elements(&items, descriptor))),
                _ => None,
            },
            _ => None,
        },
        Kind::Object => match value {
            Value::Object(object) => Some(Value::Object(cast_fields(object, descriptor))),
            Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
                Value::Object(object) => Some(Value::Object(cast_fields(&object, descriptor))),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Element-wise cast; elements that fail keep their raw value.
fn cast_elements(items: &[Value], descriptor: &TypeDescriptor) -> Vec<Value> {
    let element = descriptor.element.as_deref();
    let members = descriptor.members.as_deref();
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let target = members.and_then(|m| m.get(i)).or(element);
            target.and_then(|t| cast(item, t)).unwrap_or_else(|| item.clone())
        })
        .collect()
}

fn cast_fields(object: &Map<String, Value>, descriptor: &TypeDescriptor) -> Map<String, Value> {
    let Some(fields) = &descriptor.fields else {
        return object.clone();
    };
    object
        .iter()
        .map(|(name, value)| {
            let cast = fields
                .get(name)
                .and_then(|field| cast(value, field))
                .unwrap_or_else(|| value.clone());
            (name.clone(), cast)
        })
        .collect()
}

/// Split cell arguments into one keyword set per index.
///
/// Every cell argument must be present, be a list, and have the same length
/// as the first one. Upload cells arrive already dereferenced, one file per
/// entry.
pub fn fan_out(schema: &FunctionSchema, kwargs: &Kwargs) -> Result<Vec<Kwargs>, MarshalError> {
    let mut cells: Vec<(&str, Vec<ArgValue>)> = Vec::with_capacity(schema.plan.cells.len());
    for argument in schema.arguments.iter().filter(|a| a.role == Role::Cell) {
        let name = argument.name.as_str();
        let items = match kwargs.value(name) {
            None | Some(ArgValue::Json(Value::Null)) => {
                return Err(MarshalError::MissingCell(name.to_string()));
            }
            Some(ArgValue::Json(Value::Array(items))) => items
                .iter()
                .map(|item| {
                    let value = cast(item, &argument.descriptor).unwrap_or_else(|| item.clone());
                    ArgValue::Json(value)
                })
                .collect(),
            Some(ArgValue::List(items)) => items.clone(),
            Some(_) => return Err(MarshalError::CellNotList(name.to_string())),
        };
        cells.push((name, items));
    }

    let Some((_, first)) = cells.first() else {
        return Ok(vec![kwargs.clone()]);
    };
    let rows = first.len();
    for (name, items) in &cells {
        if items.len() != rows {
            return Err(MarshalError::CellLengthMismatch {
                argument: name.to_string(),
                expected: rows,
                found: items.len(),
            });
        }
    }

    Ok((0..rows)
        .map(|row| {
            let mut call = Kwargs::new();
            for argument in &schema.arguments {
                let name = argument.name.as_str();
                if let Some((_, items)) = cells.iter().find(|(cell, _)| *cell == name) {
                    call.insert(name, items[row].clone());
                } else if let Some(value) = kwargs.value(name) {
                    call.insert(name, value.clone());
                }
            }
            call
        })
        .collect())
}

//! A minimal JSON-Schema subset validator.
//!
//! Supports exactly the shapes a tool's `input_schema` uses in practice:
//! `object` (with `properties`/`required`), `string`, `number`, `integer`,
//! `array` (with `items`), and `boolean`. Anything else in a schema is
//! accepted without complaint — this is deliberately not a general
//! JSON-Schema engine (design note §9: "Implementers may use any
//! JSON-Schema subset supporting objects, strings, numbers, arrays,
//! booleans, and `required`").

use serde_json::Value;

/// Validate `input` against `schema`. Returns the first violation found,
/// or `Ok(())` if none.
pub fn validate(schema: &Value, input: &Value) -> Result<(), String> {
    validate_at("$", schema, input)
}

fn validate_at(path: &str, schema: &Value, input: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        // A non-object schema (e.g. `true`/`{}`) accepts anything.
        return Ok(());
    };

    if let Some(ty) = schema_obj.get("type").and_then(Value::as_str) {
        check_type(path, ty, input)?;
    }

    if input.is_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for field in required {
                let Some(field_name) = field.as_str() else {
                    continue;
                };
                if input.get(field_name).is_none() {
                    return Err(format!("{path}: missing required field `{field_name}`"));
                }
            }
        }

        if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
            if let Some(input_obj) = input.as_object() {
                for (prop_name, prop_schema) in properties {
                    if let Some(prop_value) = input_obj.get(prop_name) {
                        validate_at(&format!("{path}.{prop_name}"), prop_schema, prop_value)?;
                    }
                }
            }
        }
    }

    if let Value::Array(items) = input {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_at(&format!("{path}[{i}]"), item_schema, item)?;
            }
        }
    }

    Ok(())
}

fn check_type(path: &str, ty: &str, input: &Value) -> Result<(), String> {
    let matches = match ty {
        "object" => input.is_object(),
        "string" => input.is_string(),
        "number" => input.is_number(),
        "integer" => input.is_i64() || input.is_u64(),
        "array" => input.is_array(),
        "boolean" => input.is_boolean(),
        "null" => input.is_null(),
        _ => true, // unrecognized type keyword: don't fail closed on it
    };
    if matches {
        Ok(())
    } else {
        Err(format!("{path}: expected type `{ty}`, got `{input}`"))
    }
}

//! Output schemas for oracle responses
//!
//! A schema is a list of typed field descriptors built at call time (the
//! extraction schema depends on the config). The same descriptor drives both
//! the JSON Schema sent to the oracle and validation of what comes back.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String {
        max_length: Option<usize>,
    },
    StringList {
        max_items: Option<usize>,
    },
    Enum {
        values: Vec<String>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Boolean,
    Object(OutputSchema),
    ObjectList {
        item: OutputSchema,
        min_items: usize,
        max_items: Option<usize>,
    },
    IntegerList {
        min: Option<i64>,
        max: Option<i64>,
        min_items: usize,
        max_items: Option<usize>,
    },
}

impl FieldKind {
    pub fn string() -> Self {
        FieldKind::String { max_length: None }
    }

    pub fn bounded_string(max_length: usize) -> Self {
        FieldKind::String {
            max_length: Some(max_length),
        }
    }

    pub fn string_list() -> Self {
        FieldKind::StringList { max_items: None }
    }

    pub fn enumeration<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        FieldKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Number in [0, 1]
    pub fn confidence() -> Self {
        FieldKind::Number {
            min: Some(0.0),
            max: Some(1.0),
        }
    }

    pub fn integer_range(min: i64, max: i64) -> Self {
        FieldKind::Integer {
            min: Some(min),
            max: Some(max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field
    pub fn field(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add a field that may be absent or null
    pub fn optional_field(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
        });
        self
    }

    /// Render as a strict JSON Schema object.
    ///
    /// Every property is listed in `required`; optional fields accept `null`.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut property = kind_schema(&field.kind);
            if let Value::Object(map) = &mut property {
                if !field.description.is_empty() {
                    map.insert("description".to_string(), json!(field.description));
                }
                if !field.required {
                    if let Some(ty) = map.get("type").cloned() {
                        map.insert("type".to_string(), json!([ty, "null"]));
                    }
                    if let Some(Value::Array(values)) = map.get_mut("enum") {
                        values.push(Value::Null);
                    }
                }
            }
            properties.insert(field.name.clone(), property);
        }

        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check `value` against every field constraint
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_object(self, value, "")
    }
}

fn kind_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String { max_length } => {
            let mut schema = json!({ "type": "string" });
            if let Some(max) = max_length {
                schema["maxLength"] = json!(max);
            }
            schema
        }
        FieldKind::StringList { max_items } => {
            let mut schema = json!({ "type": "array", "items": { "type": "string" } });
            if let Some(max) = max_items {
                schema["maxItems"] = json!(max);
            }
            schema
        }
        FieldKind::Enum { values } => json!({ "type": "string", "enum": values }),
        FieldKind::Number { min, max } => {
            let mut schema = json!({ "type": "number" });
            if let Some(min) = min {
                schema["minimum"] = json!(min);
            }
            if let Some(max) = max {
                schema["maximum"] = json!(max);
            }
            schema
        }
        FieldKind::Integer { min, max } => {
            let mut schema = json!({ "type": "integer" });
            if let Some(min) = min {
                schema["minimum"] = json!(min);
            }
            if let Some(max) = max {
                schema["maximum"] = json!(max);
            }
            schema
        }
        FieldKind::Boolean => json!({ "type": "boolean" }),
        FieldKind::Object(schema) => schema.to_json_schema(),
        FieldKind::ObjectList {
            item,
            min_items,
            max_items,
        } => {
            let mut schema = json!({
                "type": "array",
                "items": item.to_json_schema(),
                "minItems": min_items,
            });
            if let Some(max) = max_items {
                schema["maxItems"] = json!(max);
            }
            schema
        }
        FieldKind::IntegerList {
            min,
            max,
            min_items,
            max_items,
        } => {
            let mut schema = json!({
                "type": "array",
                "items": kind_schema(&FieldKind::Integer { min: *min, max: *max }),
                "minItems": min_items,
            });
            if let Some(max) = max_items {
                schema["maxItems"] = json!(max);
            }
            schema
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn validate_object(schema: &OutputSchema, value: &Value, path: &str) -> Result<(), String> {
    let object = value.as_object().ok_or_else(|| {
        format!(
            "{}: expected object",
            if path.is_empty() { "$" } else { path }
        )
    })?;

    for field in &schema.fields {
        let field_path = join_path(path, &field.name);
        match object.get(&field.name) {
            None | Some(Value::Null) if !field.required => continue,
            None | Some(Value::Null) => {
                return Err(format!("{}: required field missing", field_path));
            }
            Some(field_value) => validate_kind(&field.kind, field_value, &field_path)?,
        }
    }
    Ok(())
}

fn validate_kind(kind: &FieldKind, value: &Value, path: &str) -> Result<(), String> {
    match kind {
        FieldKind::String { max_length } => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{}: expected string", path))?;
            if let Some(max) = max_length {
                let len = s.chars().count();
                if len > *max {
                    return Err(format!("{}: length {} exceeds {}", path, len, max));
                }
            }
            Ok(())
        }
        FieldKind::StringList { max_items } => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{}: expected array", path))?;
            check_count(items.len(), 0, *max_items, path)?;
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    return Err(format!("{}[{}]: expected string", path, i));
                }
            }
            Ok(())
        }
        FieldKind::Enum { values } => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{}: expected string", path))?;
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!("{}: '{}' is not one of {:?}", path, s, values))
            }
        }
        FieldKind::Number { min, max } => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("{}: expected number", path))?;
            if !n.is_finite() {
                return Err(format!("{}: not a finite number", path));
            }
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{}: {} is below {}", path, n, min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{}: {} is above {}", path, n, max));
                }
            }
            Ok(())
        }
        FieldKind::Integer { min, max } => {
            let n = as_integer(value).ok_or_else(|| format!("{}: expected integer", path))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{}: {} is below {}", path, n, min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{}: {} is above {}", path, n, max));
                }
            }
            Ok(())
        }
        FieldKind::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(format!("{}: expected boolean", path))
            }
        }
        FieldKind::Object(schema) => validate_object(schema, value, path),
        FieldKind::ObjectList {
            item,
            min_items,
            max_items,
        } => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{}: expected array", path))?;
            check_count(items.len(), *min_items, *max_items, path)?;
            for (i, element) in items.iter().enumerate() {
                validate_object(item, element, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        FieldKind::IntegerList {
            min,
            max,
            min_items,
            max_items,
        } => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{}: expected array", path))?;
            check_count(items.len(), *min_items, *max_items, path)?;
            let element_kind = FieldKind::Integer {
                min: *min,
                max: *max,
            };
            for (i, element) in items.iter().enumerate() {
                validate_kind(&element_kind, element, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
    }
}

fn check_count(len: usize, min: usize, max: Option<usize>, path: &str) -> Result<(), String> {
    if len < min {
        return Err(format!("{}: {} items, expected at least {}", path, len, min));
    }
    if let Some(max) = max {
        if len > max {
            return Err(format!("{}: {} items, expected at most {}", path, len, max));
        }
    }
    Ok(())
}

/// Integers may arrive as floats with no fractional part
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment_schema() -> OutputSchema {
        OutputSchema::new("assignment")
            .field("category_index", "1-based category", FieldKind::integer_range(1, 4))
            .field("confidence", "", FieldKind::confidence())
            .field("reasoning", "", FieldKind::bounded_string(20))
    }

    #[test]
    fn accepts_valid_value() {
        let value = json!({"category_index": 2, "confidence": 0.75, "reasoning": "fits"});
        assert!(assignment_schema().validate(&value).is_ok());
    }

    #[test]
    fn rejects_out_of_range_index_and_confidence() {
        let schema = assignment_schema();
        let err = schema
            .validate(&json!({"category_index": 5, "confidence": 0.5, "reasoning": "x"}))
            .unwrap_err();
        assert!(err.starts_with("category_index"));

        let err = schema
            .validate(&json!({"category_index": 1, "confidence": 1.2, "reasoning": "x"}))
            .unwrap_err();
        assert!(err.starts_with("confidence"));
    }

    #[test]
    fn rejects_overlong_string_and_missing_field() {
        let schema = assignment_schema();
        let long = "x".repeat(21);
        assert!(schema
            .validate(&json!({"category_index": 1, "confidence": 0.5, "reasoning": long}))
            .is_err());
        assert!(schema
            .validate(&json!({"category_index": 1, "confidence": 0.5}))
            .unwrap_err()
            .contains("required"));
    }

    #[test]
    fn integer_accepts_whole_floats() {
        let value = json!({"category_index": 3.0, "confidence": 1, "reasoning": ""});
        assert!(assignment_schema().validate(&value).is_ok());
        let value = json!({"category_index": 2.5, "confidence": 1, "reasoning": ""});
        assert!(assignment_schema().validate(&value).is_err());
    }

    #[test]
    fn object_list_enforces_counts_and_nested_paths() {
        let item = OutputSchema::new("category")
            .field("name", "", FieldKind::bounded_string(10))
            .field(
                "representative_indices",
                "",
                FieldKind::IntegerList {
                    min: Some(1),
                    max: Some(3),
                    min_items: 1,
                    max_items: Some(2),
                },
            );
        let schema = OutputSchema::new("discovery").field(
            "categories",
            "",
            FieldKind::ObjectList {
                item,
                min_items: 2,
                max_items: Some(2),
            },
        );

        let ok = json!({"categories": [
            {"name": "a", "representative_indices": [1]},
            {"name": "b", "representative_indices": [2, 3]},
        ]});
        assert!(schema.validate(&ok).is_ok());

        let too_few = json!({"categories": [{"name": "a", "representative_indices": [1]}]});
        assert!(schema.validate(&too_few).unwrap_err().contains("at least 2"));

        let bad_index = json!({"categories": [
            {"name": "a", "representative_indices": [1]},
            {"name": "b", "representative_indices": [4]},
        ]});
        let err = schema.validate(&bad_index).unwrap_err();
        assert!(err.starts_with("categories[1].representative_indices[0]"));
    }

    #[test]
    fn optional_fields_accept_null_and_render_nullable() {
        let schema = OutputSchema::new("extraction")
            .field("primary_intent", "", FieldKind::string())
            .optional_field("channel", "", FieldKind::enumeration(["web", "app"]));

        assert!(schema.validate(&json!({"primary_intent": "x"})).is_ok());
        assert!(schema
            .validate(&json!({"primary_intent": "x", "channel": null}))
            .is_ok());
        assert!(schema
            .validate(&json!({"primary_intent": "x", "channel": "fax"}))
            .is_err());

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["properties"]["channel"]["type"], json!(["string", "null"]));
        assert_eq!(rendered["required"], json!(["primary_intent", "channel"]));
        assert_eq!(rendered["additionalProperties"], json!(false));
    }
}

//! # Schema Validation
//!
//! Purpose: Let every model plug in a validator that checks (and may
//! normalize) a document right before it is written.
//!
//! ## Design Principles
//! 1. **Two Capabilities**: [`Validator`] runs inline, [`AsyncValidator`]
//!    may suspend. [`ValidatorHandle`] hides which one a model carries.
//! 2. **Issues, Not Errors**: validators report human-readable issues; the
//!    model layer wraps them into `DocError::ValidationFailed` unchanged.
//! 3. **Normalizing**: validators receive the document mutably, so defaults
//!    can be filled in and undeclared properties dropped.
//!
//! ## Built-in Schema
//!
//! [`JsonSchema`] understands the subset of JSON Schema models rely on:
//! `type`, `properties`, `required`, `default`, `additionalProperties`,
//! `items` and `enum`. Compiling a schema injects the reserved metadata
//! properties of the model, and the `$async` flag (default on) selects the
//! capability it is registered with.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use docbase_common::{DocError, DocResult};

use crate::model::FieldNames;

/// A validator that completes without suspending.
pub trait Validator: Send + Sync {
    fn validate(&self, document: &mut Map<String, Value>) -> Result<(), Vec<String>>;
}

/// A validator that may suspend, e.g. to consult another service.
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn validate(&self, document: &mut Map<String, Value>) -> Result<(), Vec<String>>;
}

/// The validator registered with a model.
#[derive(Clone)]
pub enum ValidatorHandle {
    Sync(Arc<dyn Validator>),
    Async(Arc<dyn AsyncValidator>),
}

impl ValidatorHandle {
    /// A validator accepting every document unchanged.
    pub fn accept_all() -> Self {
        ValidatorHandle::Sync(Arc::new(AcceptAll))
    }

    /// Registers `schema` under the capability its `$async` flag selects.
    pub fn from_schema(schema: JsonSchema) -> Self {
        if schema.is_async() {
            ValidatorHandle::Async(Arc::new(schema))
        } else {
            ValidatorHandle::Sync(Arc::new(schema))
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, ValidatorHandle::Async(_))
    }

    /// Validates `document` on behalf of `model`.
    pub async fn validate(&self, model: &str, document: &mut Map<String, Value>) -> DocResult<()> {
        let outcome = match self {
            ValidatorHandle::Sync(validator) => validator.validate(document),
            ValidatorHandle::Async(validator) => validator.validate(document).await,
        };
        outcome.map_err(|issues| DocError::ValidationFailed {
            model: model.to_string(),
            issues,
        })
    }
}

struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _document: &mut Map<String, Value>) -> Result<(), Vec<String>> {
        Ok(())
    }
}

/// Validation behaviour shared by every schema of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaOptions {
    /// Capability used when a schema has no `$async` flag.
    pub async_default: bool,
    /// Fill missing properties from their `default`.
    pub use_defaults: bool,
    /// Drop properties rejected by `additionalProperties: false` instead of
    /// reporting them.
    pub remove_additional: bool,
    /// Report missing `required` properties.
    pub check_required: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        SchemaOptions {
            async_default: true,
            use_defaults: true,
            remove_additional: true,
            check_required: true,
        }
    }
}

/// A compiled schema.
#[derive(Debug, Clone)]
pub struct JsonSchema {
    root: Value,
    is_async: bool,
    options: SchemaOptions,
}

impl JsonSchema {
    /// Compiles `schema` for a model whose reserved fields are `fields`.
    ///
    /// Without `properties` the schema receives the metadata properties and
    /// the metadata `required` list. Otherwise the metadata properties are
    /// added, and an existing `required` list is prefixed with the metadata
    /// fields.
    pub fn compile(schema: Value, fields: &FieldNames, options: &SchemaOptions) -> DocResult<Self> {
        let mut root = match schema {
            Value::Object(root) => root,
            other => {
                return Err(DocError::InvalidArgument(format!(
                    "schema must be an object, got {}",
                    type_name(&other)
                )))
            }
        };

        let meta = meta_properties(fields);
        let meta_required: Vec<Value> = [
            &fields.uuid,
            &fields.type_name,
            &fields.created_on,
            &fields.updated_on,
        ]
        .iter()
        .map(|name| Value::String((*name).clone()))
        .collect();

        let declared_required = root
            .get("required")
            .and_then(Value::as_array)
            .cloned();
        let had_properties = match root.get_mut("properties") {
            Some(Value::Object(properties)) => {
                properties.extend(meta);
                true
            }
            Some(_) => {
                return Err(DocError::InvalidArgument(
                    "schema properties must be an object".to_string(),
                ))
            }
            None => {
                root.insert("properties".to_string(), Value::Object(meta));
                false
            }
        };

        if !had_properties || declared_required.is_some() {
            let mut required = meta_required;
            required.extend(declared_required.unwrap_or_default());
            root.insert("required".to_string(), Value::Array(required));
        }

        let is_async = root
            .get("$async")
            .and_then(Value::as_bool)
            .unwrap_or(options.async_default);
        root.insert("$async".to_string(), Value::Bool(is_async));

        Ok(JsonSchema {
            root: Value::Object(root),
            is_async,
            options: options.clone(),
        })
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// The compiled schema, including the injected metadata properties.
    pub fn schema(&self) -> &Value {
        &self.root
    }

    fn check(&self, document: &mut Map<String, Value>) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        self.check_object(&self.root, document, "", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    fn check_value(&self, schema: &Value, value: &mut Value, path: &str, issues: &mut Vec<String>) {
        if let Some(expected) = schema.get("type") {
            if !type_matches(expected, value) {
                issues.push(format!(
                    "{} should be {}",
                    display_path(path),
                    expected_name(expected)
                ));
                return;
            }
        }

        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.contains(value) {
                issues.push(format!("{} is not an allowed value", display_path(path)));
            }
        }

        match value {
            Value::Object(fields) => self.check_object(schema, fields, path, issues),
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items") {
                    for (idx, item) in items.iter_mut().enumerate() {
                        self.check_value(item_schema, item, &format!("{}[{}]", path, idx), issues);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_object(
        &self,
        schema: &Value,
        fields: &mut Map<String, Value>,
        path: &str,
        issues: &mut Vec<String>,
    ) {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(properties) = properties {
            if self.options.use_defaults {
                for (name, property) in properties {
                    if fields.contains_key(name) {
                        continue;
                    }
                    if let Some(default) = property.get("default") {
                        fields.insert(name.clone(), default.clone());
                    }
                }
            }

            for (name, property) in properties {
                if let Some(value) = fields.get_mut(name) {
                    self.check_value(property, value, &join_path(path, name), issues);
                }
            }
        }

        if self.options.check_required {
            if let Some(Value::Array(required)) = schema.get("required") {
                for name in required.iter().filter_map(Value::as_str) {
                    if !fields.contains_key(name) {
                        issues.push(format!("{} is required", join_path(path, name)));
                    }
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            let extra: Vec<String> = fields
                .keys()
                .filter(|name| !properties.map_or(false, |known| known.contains_key(*name)))
                .cloned()
                .collect();
            for name in extra {
                if self.options.remove_additional {
                    fields.remove(&name);
                } else {
                    issues.push(format!("{} is not allowed", join_path(path, &name)));
                }
            }
        }
    }
}

impl Validator for JsonSchema {
    fn validate(&self, document: &mut Map<String, Value>) -> Result<(), Vec<String>> {
        self.check(document)
    }
}

#[async_trait]
impl AsyncValidator for JsonSchema {
    async fn validate(&self, document: &mut Map<String, Value>) -> Result<(), Vec<String>> {
        self.check(document)
    }
}

fn meta_properties(fields: &FieldNames) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert(fields.uuid.clone(), json!({"type": "string"}));
    meta.insert(fields.type_name.clone(), json!({"type": "string"}));
    meta.insert(fields.created_on.clone(), json!({"type": "integer"}));
    meta.insert(fields.updated_on.clone(), json!({"type": "integer"}));
    meta.insert(fields.created_by.clone(), json!({"type": "string", "default": ""}));
    meta.insert(fields.updated_by.clone(), json!({"type": "string", "default": ""}));
    meta
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => is_type(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| is_type(name, value)),
        _ => true,
    }
}

fn is_type(name: &str, value: &Value) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => false,
    }
}

fn expected_name(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "document"
    } else {
        path
    }
}

//! # Environment
//!
//! Purpose: Own everything one client instance needs: the connection
//! manager, the gateway over it, and the registry of model types.
//!
//! ## Design Principles
//! 1. **Explicit Registry**: models live in the environment that defined
//!    them; two environments never share models or buckets.
//! 2. **Descriptor, Not Subclass**: a [`ModelDefinition`] (bucket, type name,
//!    field names, schema or validator) is all a document type needs.
//! 3. **Shared Validation Settings**: schemas compiled here all use the
//!    environment's [`EnvironmentOptions`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use docbase_common::{ClusterSettings, Connector, DocError, DocResult};

use crate::connection::ConnectionManager;
use crate::gateway::KVGateway;
use crate::model::{FieldNames, Model, ModelContext};
use crate::schema::{JsonSchema, SchemaOptions, ValidatorHandle};

/// Validation settings of an environment.
pub type EnvironmentOptions = SchemaOptions;

/// Description of one document type.
#[derive(Clone)]
pub struct ModelDefinition {
    bucket: String,
    name: String,
    fields: FieldNames,
    schema: Option<Value>,
    validator: Option<ValidatorHandle>,
}

impl ModelDefinition {
    /// Documents of type `name` stored in `bucket`, without validation.
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        ModelDefinition {
            bucket: bucket.into(),
            name: name.into(),
            fields: FieldNames::default(),
            schema: None,
            validator: None,
        }
    }

    pub fn fields(mut self, fields: FieldNames) -> Self {
        self.fields = fields;
        self
    }

    /// Validates documents against `schema`, compiled by the environment.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self.validator = None;
        self
    }

    /// Validates documents with a custom validator.
    pub fn validator(mut self, validator: ValidatorHandle) -> Self {
        self.validator = Some(validator);
        self.schema = None;
        self
    }
}

/// A client instance: connections, gateway and model registry.
pub struct Environment {
    gateway: KVGateway,
    options: EnvironmentOptions,
    models: RwLock<HashMap<String, Model>>,
}

impl Environment {
    /// Creates an environment with default validation settings. Nothing is
    /// dialed until the first operation.
    pub fn new(settings: ClusterSettings, connector: Arc<dyn Connector>) -> Self {
        Environment::with_options(settings, connector, EnvironmentOptions::default())
    }

    pub fn with_options(
        settings: ClusterSettings,
        connector: Arc<dyn Connector>,
        options: EnvironmentOptions,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(settings, connector));
        Environment {
            gateway: KVGateway::new(connections),
            options,
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        self.gateway.connections()
    }

    pub fn gateway(&self) -> &KVGateway {
        &self.gateway
    }

    /// Registers a model. Redefining a name replaces the earlier model;
    /// handles already given out keep working with their old definition.
    pub fn define_model(&self, definition: ModelDefinition) -> DocResult<Model> {
        if definition.name.is_empty() {
            return Err(DocError::InvalidArgument(
                "model name must not be empty".to_string(),
            ));
        }

        let validator = match (definition.validator, definition.schema) {
            (Some(validator), _) => validator,
            (None, Some(schema)) => ValidatorHandle::from_schema(JsonSchema::compile(
                schema,
                &definition.fields,
                &self.options,
            )?),
            (None, None) => ValidatorHandle::accept_all(),
        };

        let context = ModelContext {
            bucket: definition.bucket,
            type_name: definition.name.clone(),
            fields: definition.fields,
        };
        info!(model = %context.type_name, bucket = %context.bucket, async_validation = validator.is_async(), "model registered");

        let model = Model::new(context, self.gateway.clone(), validator);
        self.models.write().insert(definition.name, model.clone());
        Ok(model)
    }

    /// Returns a registered model.
    pub fn model(&self, name: &str) -> DocResult<Model> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DocError::ModelNotFound(name.to_string()))
    }

    /// Names of the registered models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Disconnects every bucket opened by this environment.
    pub fn release(&self) {
        self.connections().release();
    }
}

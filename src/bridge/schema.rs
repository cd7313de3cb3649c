use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::context::VariableContext;
use super::resolver::FieldResolver;
use crate::error::{Error, Result};
use crate::types::HostValue;

/// Where a schema field's value comes from. Read from the `x-source`
/// extension of a JSON schema property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldSource {
    pub path: Option<String>,
    pub field: Option<String>,
    pub transform: Option<String>,
    pub computed: bool,
    pub function: Option<String>,
    pub requires: Vec<String>,
    pub preload: Vec<String>,
    pub relation: Option<String>,
    pub nullable: bool,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
}

/// The `x-data-source` extension: which table/entity backs the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSource {
    pub table: String,
    pub entity: String,
    pub preload: Vec<String>,
}

/// The `x-formula-context` extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaContext {
    pub category: String,
    pub entities: Vec<String>,
    pub permissions: Vec<String>,
    pub tags: Vec<String>,
}

/// A registered schema: field sources keyed by field name plus the raw
/// document used for data validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    pub id: String,
    pub fields: BTreeMap<String, FieldSource>,
    pub data_source: Option<DataSource>,
    pub formula_context: Option<FormulaContext>,
    document: Json,
}

impl SchemaDefinition {
    /// Build a definition from a JSON schema document.
    ///
    /// Properties without `x-source` read the property name as a direct
    /// path.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when the document is not an object or an extension
    /// has the wrong shape.
    pub fn from_json(id: impl Into<String>, document: Json) -> Result<Self> {
        let id = id.into();
        let root = document
            .as_object()
            .ok_or_else(|| Error::schema(format!("schema '{id}' must be a JSON object")))?;

        let mut fields = BTreeMap::new();
        if let Some(properties) = root.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| Error::schema(format!("schema '{id}': properties must be an object")))?;
            for (name, property) in properties {
                fields.insert(name.clone(), field_source(&id, name, property)?);
            }
        }

        let data_source = extension(&id, root, "x-data-source")?;
        let formula_context = extension(&id, root, "x-formula-context")?;

        Ok(Self {
            id,
            fields,
            data_source,
            formula_context,
            document,
        })
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSource> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn document(&self) -> &Json {
        &self.document
    }

    /// Whether the schema applies to the given entity tag, via either its
    /// data source or its formula context.
    #[must_use]
    pub fn applies_to(&self, entity: &str) -> bool {
        self.data_source
            .as_ref()
            .is_some_and(|ds| ds.entity.eq_ignore_ascii_case(entity))
            || self
                .formula_context
                .as_ref()
                .is_some_and(|fc| fc.entities.iter().any(|e| e.eq_ignore_ascii_case(entity)))
    }
}

fn field_source(id: &str, name: &str, property: &Json) -> Result<FieldSource> {
    let declared_type = property.get("type").and_then(Json::as_str).map(str::to_owned);
    match property.get("x-source") {
        Some(raw) => {
            let mut source: FieldSource = serde_json::from_value(raw.clone()).map_err(|e| {
                Error::schema(format!("schema '{id}': invalid x-source for '{name}': {e}"))
            })?;
            if source.field_type.is_none() {
                source.field_type = declared_type;
            }
            Ok(source)
        }
        None => Ok(FieldSource {
            path: Some(name.to_owned()),
            field_type: declared_type,
            ..FieldSource::default()
        }),
    }
}

fn extension<T: for<'de> Deserialize<'de>>(
    id: &str,
    root: &Map<String, Json>,
    key: &str,
) -> Result<Option<T>> {
    root.get(key)
        .map(|raw| {
            serde_json::from_value(raw.clone())
                .map_err(|e| Error::schema(format!("schema '{id}': invalid {key}: {e}")))
        })
        .transpose()
}

/// Registry of schema definitions keyed by id.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<SchemaDefinition>>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register a schema, replacing any previous one with the
    /// same id.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] for malformed JSON or extensions.
    pub fn register_schema(&self, id: &str, json: &str) -> Result<Arc<SchemaDefinition>> {
        let document: Json = serde_json::from_str(json)
            .map_err(|e| Error::schema(format!("schema '{id}' is not valid JSON: {e}")))?;
        let definition = Arc::new(SchemaDefinition::from_json(id, document)?);
        log::debug!(
            "registered schema '{id}' with {} fields",
            definition.fields.len()
        );
        self.schemas
            .write()
            .insert(id.to_owned(), Arc::clone(&definition));
        Ok(definition)
    }

    #[must_use]
    pub fn get_schema(&self, id: &str) -> Option<Arc<SchemaDefinition>> {
        self.schemas.read().get(id).cloned()
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn list_schemas(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schemas.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Schemas whose data source or formula context names `entity`, sorted
    /// by id.
    #[must_use]
    pub fn schemas_for_entity(&self, entity: &str) -> Vec<Arc<SchemaDefinition>> {
        let mut matches: Vec<Arc<SchemaDefinition>> = self
            .schemas
            .read()
            .values()
            .filter(|s| s.applies_to(entity))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// Check `data` against the schema document. Every violation is
    /// reported in one error.
    ///
    /// Supported keywords: `type`, `required`, `properties`, `items`, `enum`,
    /// `minimum`, `maximum`, `minLength`, `maxLength`.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] for an unknown id or invalid data.
    pub fn validate_data(&self, id: &str, data: &Json) -> Result<()> {
        let schema = self
            .get_schema(id)
            .ok_or_else(|| Error::schema(format!("unknown schema '{id}'")))?;
        let mut errors = Vec::new();
        validate(schema.document(), data, "$", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::schema(format!(
                "data does not match schema '{id}': {}",
                errors.join("; ")
            )))
        }
    }
}

fn validate(schema: &Json, data: &Json, at: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Json::String(t) => vec![t.as_str()],
            Json::Array(ts) => ts.iter().filter_map(Json::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, data)) {
            errors.push(format!(
                "{at}: expected {}, got {}",
                allowed.join(" or "),
                json_type(data)
            ));
            return;
        }
    }

    if let Some(Json::Array(options)) = schema.get("enum") {
        if !options.contains(data) {
            errors.push(format!("{at}: value is not one of the allowed values"));
        }
    }

    if let Some(n) = data.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Json::as_f64) {
            if n < min {
                errors.push(format!("{at}: {n} is less than minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Json::as_f64) {
            if n > max {
                errors.push(format!("{at}: {n} is greater than maximum {max}"));
            }
        }
    }

    if let Some(s) = data.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Json::as_u64) {
            if len < min {
                errors.push(format!("{at}: length {len} is less than minLength {min}"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Json::as_u64) {
            if len > max {
                errors.push(format!("{at}: length {len} is greater than maxLength {max}"));
            }
        }
    }

    if let Some(object) = data.as_object() {
        if let Some(Json::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Json::as_str) {
                if !object.contains_key(key) {
                    errors.push(format!("{at}: missing required field '{key}'"));
                }
            }
        }
        if let Some(Json::Object(properties)) = schema.get("properties") {
            for (key, sub) in properties {
                if let Some(value) = object.get(key) {
                    validate(sub, value, &format!("{at}.{key}"), errors);
                }
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), data.as_array()) {
        for (i, item) in array.iter().enumerate() {
            validate(items, item, &format!("{at}[{i}]"), errors);
        }
    }
}

fn type_matches(expected: &str, data: &Json) -> bool {
    match expected {
        "object" => data.is_object(),
        "array" => data.is_array(),
        "string" => data.is_string(),
        "number" => data.is_number(),
        "integer" => data.is_i64() || data.is_u64(),
        "boolean" => data.is_boolean(),
        "null" => data.is_null(),
        _ => true,
    }
}

fn json_type(data: &Json) -> &'static str {
    match data {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Wraps a context so that `field(name)` goes through the schema's field
/// sources. Resolved fields are cached for the lifetime of the wrapper.
pub struct SchemaAwareContext<C> {
    inner: C,
    schema: Arc<SchemaDefinition>,
    resolver: Arc<FieldResolver>,
    cache: Mutex<HashMap<String, HostValue>>,
}

impl<C: VariableContext> SchemaAwareContext<C> {
    #[must_use]
    pub fn new(inner: C, schema: Arc<SchemaDefinition>, resolver: Arc<FieldResolver>) -> Self {
        Self {
            inner,
            schema,
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    #[must_use]
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: VariableContext> VariableContext for SchemaAwareContext<C> {
    fn entity(&self) -> &HostValue {
        self.inner.entity()
    }

    fn field(&self, path: &str) -> Result<HostValue> {
        if let Some(hit) = self.cache.lock().get(path) {
            return Ok(hit.clone());
        }
        let value = match self.schema.field(path) {
            Some(source) => self.resolver.resolve(source, &self.inner)?,
            None => self.inner.field(path)?,
        };
        self.cache.lock().insert(path.to_owned(), value.clone());
        Ok(value)
    }

    fn computed(&self, function: &str) -> Result<HostValue> {
        self.inner.computed(function)
    }

    fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.inner.metadata();
        metadata.insert("schema".to_owned(), self.schema.id.clone());
        metadata
    }
}

impl<C> fmt::Debug for SchemaAwareContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaAwareContext")
            .field("schema", &self.schema.id)
            .field("cached", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

use std::sync::Arc;

use super::context::ComputedRegistry;
use super::resolver::FieldResolver;
use super::schema::{FieldSource, SchemaDefinition};
use crate::error::Result;
use crate::types::{Variable, VariableRegistry, VariableSource, ValueType};

/// Registers one variable per schema field.
///
/// Each variable resolves its field source through a shared
/// [`FieldResolver`], so it works against any [`VariableContext`](super::VariableContext).
/// A dotted field name such as `origin.zip` is also registered as
/// `originzip` when that name is neither a field of the schema nor already
/// registered.
#[derive(Debug, Clone)]
pub struct SchemaVariables {
    resolver: Arc<FieldResolver>,
    computed: Option<Arc<ComputedRegistry>>,
}

impl SchemaVariables {
    #[must_use]
    pub fn new(resolver: Arc<FieldResolver>) -> Self {
        Self {
            resolver,
            computed: None,
        }
    }

    /// Consult `computed` for the declared result type of computed fields.
    #[must_use]
    pub fn with_computed(mut self, computed: Arc<ComputedRegistry>) -> Self {
        self.computed = Some(computed);
        self
    }

    /// Register every field of `schema` into `registry` and return the names
    /// registered, aliases included.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateVariable`](crate::Error::DuplicateVariable) when a
    /// field name is already taken. Fields registered before the clash stay
    /// registered.
    pub fn register(
        &self,
        registry: &VariableRegistry,
        schema: &SchemaDefinition,
    ) -> Result<Vec<Arc<str>>> {
        let source_tag = schema
            .data_source
            .as_ref()
            .map_or(VariableSource::Custom, |ds| VariableSource::from_tag(&ds.entity));

        let mut registered = Vec::new();
        for (name, field) in &schema.fields {
            let value_type = self.infer_type(field);
            registry.register(self.variable(name, field, value_type, source_tag))?;
            registered.push(Arc::from(name.as_str()));
        }

        // aliases go last so a real field never loses its name to one
        for (name, field) in schema.fields.iter().filter(|(name, _)| name.contains('.')) {
            let alias: String = name.chars().filter(|c| *c != '.').collect();
            if schema.fields.contains_key(&alias) || registry.contains(&alias) {
                log::debug!("schema '{}': alias '{alias}' for '{name}' is taken", schema.id);
                continue;
            }
            let variable = self.variable(&alias, field, self.infer_type(field), source_tag);
            // another registration may have claimed the alias since the check
            if registry.register(variable).is_ok() {
                registered.push(Arc::from(alias.as_str()));
            }
        }
        log::debug!(
            "schema '{}' registered {} variables",
            schema.id,
            registered.len()
        );
        Ok(registered)
    }

    fn variable(
        &self,
        name: &str,
        field: &FieldSource,
        value_type: ValueType,
        source: VariableSource,
    ) -> Variable {
        let resolver = Arc::clone(&self.resolver);
        let field = field.clone();
        let description = match (&field.path, &field.function) {
            (_, Some(function)) if field.computed => format!("computed by {function}"),
            (Some(path), _) => format!("read from {path}"),
            _ => String::new(),
        };
        Variable::new(name, move |ctx| resolver.resolve(&field, ctx)?.to_value())
            .value_type(value_type)
            .source(source)
            .description(description)
    }

    /// `*ToFloat64` transforms give numbers, computed functions use their
    /// declared type, otherwise the JSON `type` hint decides.
    fn infer_type(&self, field: &FieldSource) -> ValueType {
        if field
            .transform
            .as_deref()
            .is_some_and(|t| t.ends_with("ToFloat64"))
        {
            return ValueType::Number;
        }
        if field.computed {
            let declared = field
                .function
                .as_deref()
                .zip(self.computed.as_ref())
                .and_then(|(function, registry)| registry.value_type(function));
            return match declared {
                Some(ValueType::Bool) => ValueType::Bool,
                _ => ValueType::Any,
            };
        }
        match field.field_type.as_deref() {
            Some("number" | "integer") => ValueType::Number,
            Some("boolean") => ValueType::Bool,
            Some("string") => ValueType::String,
            Some("array") => ValueType::Array,
            _ => ValueType::Any,
        }
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::value::{Value, ValueType};
use crate::bridge::VariableContext;
use crate::error::{Error, Result};

/// Produces a variable's value from the host context.
pub type Resolver = Arc<dyn Fn(&dyn VariableContext) -> Result<Value> + Send + Sync>;

/// Checks a resolved value before it is used.
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Which kind of host entity a variable reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableSource {
    Shipment,
    Environment,
    Hazmat,
    Equipment,
    Custom,
}

impl VariableSource {
    /// Map an entity tag onto a source; unrecognised tags are `Custom`.
    #[must_use]
    pub fn from_tag(tag: &str) -> VariableSource {
        match tag.to_ascii_lowercase().as_str() {
            "shipment" => VariableSource::Shipment,
            "environment" => VariableSource::Environment,
            "hazmat" => VariableSource::Hazmat,
            "equipment" => VariableSource::Equipment,
            _ => VariableSource::Custom,
        }
    }
}

impl fmt::Display for VariableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VariableSource::Shipment => "shipment",
            VariableSource::Environment => "environment",
            VariableSource::Hazmat => "hazmat",
            VariableSource::Equipment => "equipment",
            VariableSource::Custom => "custom",
        })
    }
}

/// A named value formulas can reference by identifier.
///
/// # Example
///
/// ```
/// use formulary::{Value, ValueType, Variable, VariableSource};
///
/// let fuel = Variable::new("fuel_surcharge", |_ctx| Ok(Value::Number(12.5)))
///     .description("current fuel surcharge")
///     .value_type(ValueType::Number)
///     .source(VariableSource::Environment);
/// assert_eq!(fuel.name(), "fuel_surcharge");
/// ```
#[derive(Clone)]
pub struct Variable {
    name: Arc<str>,
    description: String,
    value_type: ValueType,
    source: VariableSource,
    resolver: Resolver,
    validator: Option<Validator>,
}

impl Variable {
    #[must_use]
    pub fn new(
        name: &str,
        resolver: impl Fn(&dyn VariableContext) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name),
            description: String::new(),
            value_type: ValueType::Any,
            source: VariableSource::Custom,
            resolver: Arc::new(resolver),
            validator: None,
        }
    }

    /// A variable that reads `path` from the host context.
    #[must_use]
    pub fn field(name: &str, path: &str) -> Self {
        let path = path.to_owned();
        Self::new(name, move |ctx| ctx.field(&path)?.to_value())
    }

    /// A variable with a fixed value.
    #[must_use]
    pub fn constant(name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let value_type = value.value_type();
        Self::new(name, move |_| Ok(value.clone())).value_type(value_type)
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    #[must_use]
    pub fn source(mut self, source: VariableSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn validator(
        mut self,
        validator: impl Fn(&Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn describe(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn kind(&self) -> ValueType {
        self.value_type
    }

    #[must_use]
    pub fn origin(&self) -> VariableSource {
        self.source
    }

    /// Run the resolver, then the validator.
    ///
    /// # Errors
    ///
    /// Resolver failures are wrapped in [`Error::VariableResolution`] and
    /// validator failures in [`Error::VariableValidation`].
    pub fn resolve(&self, ctx: &dyn VariableContext) -> Result<Value> {
        let value = (self.resolver)(ctx).map_err(|e| Error::VariableResolution {
            name: self.name.to_string(),
            source: Box::new(e),
        })?;
        if let Some(validate) = &self.validator {
            validate(&value).map_err(|e| Error::VariableValidation {
                name: self.name.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(value)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("source", &self.source)
            .field("validated", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_name: HashMap<Arc<str>, Arc<Variable>>,
    by_source: HashMap<VariableSource, Vec<Arc<str>>>,
}

/// Maps variable names to their definitions, with a secondary index by
/// [`VariableSource`]. Names are unique.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    entries: RwLock<Entries>,
}

static GLOBAL: Lazy<Arc<VariableRegistry>> = Lazy::new(|| Arc::new(VariableRegistry::new()));

impl VariableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    #[must_use]
    pub fn global() -> Arc<VariableRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Register a variable.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateVariable`] when the name is taken.
    pub fn register(&self, variable: Variable) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.by_name.contains_key(variable.name()) {
            return Err(Error::DuplicateVariable {
                name: variable.name().to_owned(),
            });
        }
        let name = variable.name_arc();
        entries
            .by_source
            .entry(variable.origin())
            .or_default()
            .push(Arc::clone(&name));
        entries.by_name.insert(name, Arc::new(variable));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Variable>> {
        self.entries.read().by_name.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().by_name.contains_key(name)
    }

    /// Variables registered with the given source, in registration order.
    #[must_use]
    pub fn by_source(&self, source: VariableSource) -> Vec<Arc<Variable>> {
        let entries = self.entries.read();
        entries
            .by_source
            .get(&source)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| entries.by_name.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.entries.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

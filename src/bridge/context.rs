use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{HostValue, Record, ValueType};

/// Host data an evaluation reads from.
///
/// Implementations are shared across batch worker threads, so they must be
/// `Send + Sync`.
pub trait VariableContext: Send + Sync {
    /// The root entity formulas are evaluated against.
    fn entity(&self) -> &HostValue;

    /// Read a `.`-separated field path.
    ///
    /// # Errors
    ///
    /// Fails when an intermediate segment is missing or has no attributes.
    fn field(&self, path: &str) -> Result<HostValue>;

    /// Run a named computed function against the entity.
    ///
    /// # Errors
    ///
    /// Fails for unknown functions and propagates the function's own errors.
    fn computed(&self, function: &str) -> Result<HostValue>;

    /// Free-form key/value annotations (tenant, request id, ...).
    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// A computed function: a pure function of the root entity.
pub type ComputedFn = Arc<dyn Fn(&HostValue) -> Result<HostValue> + Send + Sync>;

#[derive(Clone)]
struct ComputedEntry {
    value_type: ValueType,
    call: ComputedFn,
}

/// Named computed functions available to [`EntityContext::computed`].
#[derive(Default)]
pub struct ComputedRegistry {
    functions: RwLock<HashMap<String, ComputedEntry>>,
}

impl ComputedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any existing one with the same name.
    /// `value_type` is the declared result type used by the schema bridge.
    pub fn register(
        &self,
        name: impl Into<String>,
        value_type: ValueType,
        f: impl Fn(&HostValue) -> Result<HostValue> + Send + Sync + 'static,
    ) {
        self.functions.write().insert(
            name.into(),
            ComputedEntry {
                value_type,
                call: Arc::new(f),
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ComputedFn> {
        self.functions.read().get(name).map(|e| Arc::clone(&e.call))
    }

    #[must_use]
    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.functions.read().get(name).map(|e| e.value_type)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a function by name. The lock is released before the call.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFunction`] when `name` is not registered.
    pub fn call(&self, name: &str, entity: &HostValue) -> Result<HostValue> {
        let f = self.get(name).ok_or_else(|| Error::UnknownFunction {
            name: name.to_owned(),
        })?;
        f(entity)
    }
}

impl fmt::Debug for ComputedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Default [`VariableContext`]: walks field paths through records and
/// [`Entity`](crate::Entity) objects.
///
/// # Example
///
/// ```
/// use formulary::{EntityContext, HostValue, Record, VariableContext};
///
/// let ctx = EntityContext::new(Record::new().set("shipment.weight", 1200_i64));
/// assert_eq!(ctx.field("shipment.weight").unwrap(), HostValue::I64(1200));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EntityContext {
    entity: HostValue,
    computed: Option<Arc<ComputedRegistry>>,
    metadata: HashMap<String, String>,
}

impl EntityContext {
    #[must_use]
    pub fn new(entity: impl Into<HostValue>) -> Self {
        Self {
            entity: entity.into(),
            computed: None,
            metadata: HashMap::new(),
        }
    }

    /// A context with a null entity, for formulas without variables.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_computed(mut self, registry: Arc<ComputedRegistry>) -> Self {
        self.computed = Some(registry);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl VariableContext for EntityContext {
    fn entity(&self) -> &HostValue {
        &self.entity
    }

    fn field(&self, path: &str) -> Result<HostValue> {
        let mut current = self.entity.clone();
        for segment in path.split('.') {
            if current.is_null() {
                return Ok(HostValue::Null);
            }
            current = match current.attribute(segment) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    return Err(Error::UnknownVariable {
                        name: path.to_owned(),
                    })
                }
                Err(err) => return Err(err),
            };
        }
        Ok(current)
    }

    fn computed(&self, function: &str) -> Result<HostValue> {
        match &self.computed {
            Some(registry) => registry.call(function, &self.entity),
            None => Err(Error::UnknownFunction {
                name: function.to_owned(),
            }),
        }
    }

    fn metadata(&self) -> HashMap<String, String> {
        self.metadata.clone()
    }
}

impl From<Record> for EntityContext {
    fn from(record: Record) -> Self {
        EntityContext::new(record)
    }
}

use std::collections::HashMap;

use super::host::HostValue;

/// Nested map of host values addressed by dot-separated paths.
///
/// Supports nested paths like `"shipment.origin.zip"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, HostValue>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value at a dot-separated path. Creates intermediate records as needed.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<HostValue>) -> Self {
        self.insert(path, value.into());
        self
    }

    /// Insert a value at a dot-separated path (mutable reference version).
    pub fn insert(&mut self, path: &str, value: HostValue) {
        let segments: Vec<&str> = path.split('.').collect();
        Self::insert_recursive(&mut self.fields, &segments, value);
    }

    /// Insert a single field without splitting on dots.
    pub fn insert_field(&mut self, name: impl Into<String>, value: HostValue) {
        self.fields.insert(name.into(), value);
    }

    /// Look up a direct field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.fields.get(name)
    }

    /// Look up a value by dot-separated path through nested records.
    /// Returns `None` if any segment is missing or is not a record.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&HostValue> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            match current {
                HostValue::Record(record) => current = record.fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert_recursive(map: &mut HashMap<String, HostValue>, segments: &[&str], value: HostValue) {
        match segments {
            [] => {}
            [last] => {
                map.insert((*last).to_owned(), value);
            }
            [first, rest @ ..] => {
                let entry = map
                    .entry((*first).to_owned())
                    .or_insert_with(|| HostValue::Record(Record::new()));
                match entry {
                    HostValue::Record(nested) => {
                        Self::insert_recursive(&mut nested.fields, rest, value);
                    }
                    _ => {
                        let mut nested = Record::new();
                        Self::insert_recursive(&mut nested.fields, rest, value);
                        *entry = HostValue::Record(nested);
                    }
                }
            }
        }
    }
}

//! Data source collaborator: raw per-field values by sample index

use std::collections::BTreeMap;

use crate::error::{Error, Result, SampleError};
use crate::sampler::SampleIndex;
use crate::value::{Record, Value};

/// Raw per-field data addressed by sample index
pub trait DataSource: Send + Sync {
    /// Number of rows shared by all fields
    fn len(&self) -> usize;

    /// Whether the source has no rows
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the fields this source provides
    fn field_names(&self) -> Vec<String>;

    /// Raw value of one field at one index
    fn get(&self, field: &str, index: usize) -> std::result::Result<Value, SampleError>;

    /// Resolve a (possibly composite) draw; composite draws become lists
    fn fetch(&self, field: &str, index: &SampleIndex) -> std::result::Result<Value, SampleError> {
        match index {
            SampleIndex::One(index) => self.get(field, *index),
            SampleIndex::Many(indices) => indices
                .iter()
                .map(|index| self.fetch(field, index))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::List),
        }
    }

    /// Fetch every requested field for one draw
    fn fetch_record(
        &self,
        fields: &[String],
        index: &SampleIndex,
    ) -> std::result::Result<Record, SampleError> {
        fields
            .iter()
            .map(|field| Ok((field.clone(), self.fetch(field, index)?)))
            .collect()
    }
}

/// A data source holding every field in memory.
///
/// Rows may be missing (`None`), which surfaces as [`SampleError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    fields: BTreeMap<String, Vec<Option<Value>>>,
    len: Option<usize>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dense field
    pub fn with_field<V: Into<Value>>(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.with_sparse_field(name, values.into_iter().map(|v| Some(v.into())))
    }

    /// Add a field where some rows have no data
    pub fn with_sparse_field(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<Value>>,
    ) -> Result<Self> {
        let name = name.into();
        let values: Vec<_> = values.into_iter().collect();

        match self.len {
            Some(len) if len != values.len() => {
                return Err(Error::Construction(format!(
                    "field '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    len
                )));
            }
            _ => self.len = Some(values.len()),
        }

        if self.fields.insert(name.clone(), values).is_some() {
            return Err(Error::Construction(format!("field '{name}' added twice")));
        }
        Ok(self)
    }
}

impl DataSource for MemorySource {
    fn len(&self) -> usize {
        self.len.unwrap_or(0)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn get(&self, field: &str, index: usize) -> std::result::Result<Value, SampleError> {
        self.fields
            .get(field)
            .and_then(|values| values.get(index))
            .and_then(Option::clone)
            .ok_or_else(|| SampleError::NotFound {
                field: field.to_owned(),
                index,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemorySource {
        MemorySource::new()
            .with_field("label", [0i64, 1, 2])
            .unwrap()
            .with_sparse_field("path", [Some("a".into()), None, Some("c".into())])
            .unwrap()
    }

    #[test]
    fn test_get_and_missing_rows() {
        let source = source();
        assert_eq!(source.len(), 3);
        assert_eq!(source.get("label", 1).unwrap(), Value::Int(1));
        assert!(matches!(
            source.get("path", 1),
            Err(SampleError::NotFound { index: 1, .. })
        ));
        assert!(source.get("label", 3).is_err());
        assert!(source.get("unknown", 0).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = MemorySource::new()
            .with_field("a", [1i64, 2])
            .unwrap()
            .with_field("b", [1i64])
            .unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }

    #[test]
    fn test_composite_draws_resolve_to_lists() {
        let source = source();
        let index = SampleIndex::Many(vec![SampleIndex::One(2), SampleIndex::One(0)]);
        assert_eq!(
            source.fetch("label", &index).unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(0)])
        );
    }

    #[test]
    fn test_fetch_record() {
        let source = source();
        let record = source
            .fetch_record(&["label".to_owned(), "path".to_owned()], &SampleIndex::One(2))
            .unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["path"], Value::from("c"));
    }
}

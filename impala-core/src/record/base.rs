//! Base implementation of records for logging.
use crate::error::ImpalaError;
use std::collections::HashMap;

/// Represents possible types of values that can be stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value, typically used for losses.
    Scalar(f32),
}

/// A container for storing key-value pairs of various data types.
///
/// # Examples
///
/// ```rust
/// use impala_core::record::{Record, RecordValue};
///
/// let mut record = Record::from_scalar("pi_loss", 0.5);
/// record.insert("entropy_loss", RecordValue::Scalar(-1.38));
///
/// let loss = record.get_scalar("pi_loss").unwrap();
/// assert_eq!(loss, 0.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Merges another record into this one in place.
    ///
    /// Values of `record` overwrite values with the same key.
    pub fn merge_inplace(&mut self, record: Record) {
        self.0.extend(record.0);
    }

    /// Gets a scalar value from the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not exist.
    pub fn get_scalar(&self, k: &str) -> Result<f32, ImpalaError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            None => Err(ImpalaError::RecordKeyError(k.to_string())),
        }
    }

    /// Checks if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_scalar_missing_key() {
        let record = Record::from_slice(&[("v_loss", RecordValue::Scalar(1.0))]);
        assert_eq!(record.get_scalar("v_loss").unwrap(), 1.0);
        assert!(matches!(
            record.get_scalar("missing"),
            Err(ImpalaError::RecordKeyError(_))
        ));
    }

    #[test]
    fn test_merge_inplace_overwrites() {
        let mut a = Record::from_scalar("x", 1.0);
        let b = Record::from_slice(&[
            ("x", RecordValue::Scalar(2.0)),
            ("y", RecordValue::Scalar(3.0)),
        ]);
        a.merge_inplace(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get_scalar("x").unwrap(), 2.0);
        assert_eq!(a.get_scalar("y").unwrap(), 3.0);
    }
}

//! Verification helpers for store state left behind by the harness

use sonic_qos_common::{ConfigStore, DbId, HarnessError};
use std::collections::HashMap;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Store error: {0}")]
    Store(#[from] HarnessError),

    #[error("Expected key '{key}' not found in {db}")]
    KeyNotFound { db: DbId, key: String },

    #[error("Expected field '{field}' not found in key '{key}'")]
    FieldNotFound { key: String, field: String },

    #[error("Value mismatch for {key}:{field}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        key: String,
        field: String,
        expected: String,
        actual: String,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Asserts on the contents of any [`ConfigStore`].
pub struct StoreVerifier<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> StoreVerifier<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    /// Verify that a key exists
    pub async fn assert_key_exists(&self, db: DbId, key: &str) -> VerifyResult<()> {
        if self.store.hgetall(db, key).await?.is_empty() {
            return Err(VerificationError::KeyNotFound {
                db,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that a hash field has a specific value
    pub async fn assert_field_value(
        &self,
        db: DbId,
        key: &str,
        field: &str,
        expected: &str,
    ) -> VerifyResult<()> {
        match self.store.get(db, key, field).await? {
            None => Err(VerificationError::FieldNotFound {
                key: key.to_string(),
                field: field.to_string(),
            }),
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(VerificationError::ValueMismatch {
                key: key.to_string(),
                field: field.to_string(),
                expected: expected.to_string(),
                actual,
            }),
        }
    }

    /// Verify that all fields match expected values
    pub async fn assert_all_fields(
        &self,
        db: DbId,
        key: &str,
        expected: &HashMap<String, String>,
    ) -> VerifyResult<()> {
        let actual = self.store.hgetall(db, key).await?;
        for (field, expected_value) in expected {
            match actual.get(field) {
                None => {
                    return Err(VerificationError::FieldNotFound {
                        key: key.to_string(),
                        field: field.clone(),
                    })
                }
                Some(v) if v == expected_value => {}
                Some(v) => {
                    return Err(VerificationError::ValueMismatch {
                        key: key.to_string(),
                        field: field.clone(),
                        expected: expected_value.clone(),
                        actual: v.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_assert_field_value() {
        let store = MemoryStore::new("dut").with_hash(
            DbId::ConfigDb,
            "SCHEDULER|scheduler.0",
            [("weight", "14")],
        );
        let verifier = StoreVerifier::new(&store);

        verifier
            .assert_field_value(DbId::ConfigDb, "SCHEDULER|scheduler.0", "weight", "14")
            .await
            .unwrap();

        let err = verifier
            .assert_field_value(DbId::ConfigDb, "SCHEDULER|scheduler.0", "weight", "15")
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ValueMismatch { .. }));

        let err = verifier
            .assert_key_exists(DbId::ConfigDb, "SCHEDULER|scheduler.1")
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::KeyNotFound { .. }));
    }
}

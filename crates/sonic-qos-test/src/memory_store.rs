//! In-memory [`ConfigStore`] for unit and scenario tests.

use async_trait::async_trait;
use sonic_qos_common::{ConfigStore, DbId, FieldValues, HarnessError, HarnessResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Store operation, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    HGetAll,
    Keys,
    HSet,
}

/// Hash-of-hashes per database, guarded by a mutex.
///
/// Every access is counted per `(op, db, key)` so tests can check that a
/// lookup was memoized.
pub struct MemoryStore {
    label: String,
    data: Mutex<BTreeMap<(DbId, String), FieldValues>>,
    calls: Mutex<HashMap<(StoreOp, DbId, String), usize>>,
    fail_on: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Builder form of [`set_hash`](Self::set_hash).
    pub fn with_hash<I, K, V>(self, db: DbId, key: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.set_hash(db, key, fields);
        self
    }

    /// Merges `fields` into the hash at `key`.
    pub fn set_hash<I, K, V>(&self, db: DbId, key: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = self.data.lock().unwrap();
        let entry = data.entry((db, key.to_string())).or_default();
        for (k, v) in fields {
            entry.insert(k.into(), v.into());
        }
    }

    pub fn set_field(&self, db: DbId, key: &str, field: &str, value: &str) {
        self.set_hash(db, key, [(field, value)]);
    }

    /// Reads a field without counting the access.
    pub fn peek(&self, db: DbId, key: &str, field: &str) -> Option<String> {
        self.data
            .lock()
            .unwrap()
            .get(&(db, key.to_string()))
            .and_then(|fvs| fvs.get(field).cloned())
    }

    /// Makes every access to keys containing `needle` fail with a database error.
    pub fn fail_on_key(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    /// Number of times `op` was issued for `key` in `db`.
    pub fn call_count(&self, op: StoreOp, db: DbId, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(op, db, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of times `op` was issued, across all keys.
    pub fn total_calls(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|((o, _, _), _)| *o == op)
            .map(|(_, n)| *n)
            .sum()
    }

    fn record(&self, op: StoreOp, db: DbId, key: &str) -> HarnessResult<()> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((op, db, key.to_string()))
            .or_insert(0) += 1;

        match self.fail_on.lock().unwrap().as_deref() {
            Some(needle) if key.contains(needle) => Err(HarnessError::database(
                format!("{:?}", op).to_lowercase(),
                format!("injected failure for {}", key),
            )),
            _ => Ok(()),
        }
    }
}

/// Redis-style glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[async_trait]
impl ConfigStore for MemoryStore {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get(&self, db: DbId, key: &str, field: &str) -> HarnessResult<Option<String>> {
        self.record(StoreOp::Get, db, key)?;
        Ok(self.peek(db, key, field))
    }

    async fn hgetall(&self, db: DbId, key: &str) -> HarnessResult<FieldValues> {
        self.record(StoreOp::HGetAll, db, key)?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(&(db, key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn keys(&self, db: DbId, pattern: &str) -> HarnessResult<Vec<String>> {
        self.record(StoreOp::Keys, db, pattern)?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, k)| *d == db && glob_match(pattern, k))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> HarnessResult<()> {
        self.record(StoreOp::HSet, db, key)?;
        self.set_field(db, key, field, value);
        Ok(())
    }
}

//! Key-value configuration/state store abstraction.
//!
//! SONiC keeps its configuration and live state in numbered Redis
//! databases. Applied (live) tables join table and key with `:`, while
//! configuration tables use `|`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::HarnessResult;

/// Field/value map of one hash.
pub type FieldValues = BTreeMap<String, String>;

/// SONiC Redis database identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DbId {
    /// Application database (APPL_DB) - applied state written by managers.
    ApplDb,
    /// ASIC database (ASIC_DB) - SAI object state, including VIDTORID.
    AsicDb,
    /// Counters database (COUNTERS_DB) - counter and name maps.
    CountersDb,
    /// Configuration database (CONFIG_DB).
    ConfigDb,
    /// State database (STATE_DB).
    StateDb,
}

impl DbId {
    /// All databases, in index order.
    pub const ALL: [DbId; 5] = [
        DbId::ApplDb,
        DbId::AsicDb,
        DbId::CountersDb,
        DbId::ConfigDb,
        DbId::StateDb,
    ];

    /// Returns the database name as used in Redis/SONiC.
    pub fn name(&self) -> &'static str {
        match self {
            DbId::ApplDb => "APPL_DB",
            DbId::AsicDb => "ASIC_DB",
            DbId::CountersDb => "COUNTERS_DB",
            DbId::ConfigDb => "CONFIG_DB",
            DbId::StateDb => "STATE_DB",
        }
    }

    /// Returns the database ID number.
    pub fn id(&self) -> u8 {
        match self {
            DbId::ApplDb => 0,
            DbId::AsicDb => 1,
            DbId::CountersDb => 2,
            DbId::ConfigDb => 4,
            DbId::StateDb => 6,
        }
    }

    /// Returns the table/key separator used in this database.
    pub fn separator(&self) -> char {
        match self {
            DbId::ConfigDb | DbId::StateDb => '|',
            DbId::ApplDb | DbId::AsicDb | DbId::CountersDb => ':',
        }
    }

    /// Joins `table` and key parts with this database's separator.
    ///
    /// ```
    /// use sonic_qos_common::DbId;
    ///
    /// assert_eq!(DbId::ConfigDb.key("BUFFER_PG", &["Ethernet0", "3-4"]), "BUFFER_PG|Ethernet0|3-4");
    /// assert_eq!(DbId::ApplDb.key("BUFFER_PG_TABLE", &["Ethernet0", "3-4"]), "BUFFER_PG_TABLE:Ethernet0:3-4");
    /// ```
    pub fn key(&self, table: &str, parts: &[&str]) -> String {
        let sep = self.separator();
        let mut key = table.to_string();
        for part in parts {
            key.push(sep);
            key.push_str(part);
        }
        key
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Read/write access to one ASIC's databases.
///
/// Missing keys and fields are not errors: `get` returns `None` and
/// `hgetall` returns an empty map, exactly like Redis does.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Human-readable label for logs (`str-dut-01/asic0`).
    fn label(&self) -> &str;

    /// HGET.
    async fn get(&self, db: DbId, key: &str, field: &str) -> HarnessResult<Option<String>>;

    /// HGETALL.
    async fn hgetall(&self, db: DbId, key: &str) -> HarnessResult<FieldValues>;

    /// KEYS with a glob pattern.
    async fn keys(&self, db: DbId, pattern: &str) -> HarnessResult<Vec<String>>;

    /// HSET of a single field.
    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> HarnessResult<()>;
}

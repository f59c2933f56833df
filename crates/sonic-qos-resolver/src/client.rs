//! Typed access to one ASIC's configuration and state databases.
//!
//! [`ConfigDbClient`] wraps a [`ConfigStore`] and owns the only piece of
//! cached state in the resolver: whether buffer tables are read from the
//! applied (APPL_DB) or configured (CONFIG_DB) side. The flag is computed on
//! first use and reused for the lifetime of the client.

use crate::error::{QosError, QosResult};
use crate::tables::{self, metadata_fields};
use sonic_qos_common::{CommandRunner, ConfigStore, DbId, FieldValues, HarnessError};
use sonic_qos_types::{AsicInstance, Device};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Which binding table a buffer lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTableKind {
    /// Ingress priority groups (`BUFFER_PG`).
    PriorityGroup,
    /// Egress queues (`BUFFER_QUEUE`).
    Queue,
}

/// Database and key naming for buffer tables under one buffer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferScheme {
    pub db: DbId,
    pub pg_table: &'static str,
    pub queue_table: &'static str,
    pub profile_table: &'static str,
    pub pool_table: &'static str,
}

impl BufferScheme {
    pub const APPLIED: BufferScheme = BufferScheme {
        db: DbId::ApplDb,
        pg_table: tables::APP_BUFFER_PG_TABLE,
        queue_table: tables::APP_BUFFER_QUEUE_TABLE,
        profile_table: tables::APP_BUFFER_PROFILE_TABLE,
        pool_table: tables::APP_BUFFER_POOL_TABLE,
    };

    pub const CONFIGURED: BufferScheme = BufferScheme {
        db: DbId::ConfigDb,
        pg_table: tables::CFG_BUFFER_PG_TABLE,
        queue_table: tables::CFG_BUFFER_QUEUE_TABLE,
        profile_table: tables::CFG_BUFFER_PROFILE_TABLE,
        pool_table: tables::CFG_BUFFER_POOL_TABLE,
    };

    pub fn binding_table(&self, kind: BufferTableKind) -> &'static str {
        match kind {
            BufferTableKind::PriorityGroup => self.pg_table,
            BufferTableKind::Queue => self.queue_table,
        }
    }

    /// `BUFFER_PG_TABLE:Ethernet0:3-4` / `BUFFER_PG|Ethernet0|3-4`.
    pub fn binding_key(&self, kind: BufferTableKind, port: &str, range: &str) -> String {
        self.db.key(self.binding_table(kind), &[port, range])
    }

    /// Table prefix of profile keys, separator included.
    pub fn profile_prefix(&self) -> String {
        format!("{}{}", self.profile_table, self.db.separator())
    }

    pub fn pool_prefix(&self) -> String {
        format!("{}{}", self.pool_table, self.db.separator())
    }

    pub fn pool_key(&self, pool: &str) -> String {
        self.db.key(self.pool_table, &[pool])
    }
}

/// A device together with one of its ASICs.
#[derive(Debug, Clone, Copy)]
pub struct AsicContext<'a> {
    pub device: &'a Device,
    pub asic: &'a AsicInstance,
}

impl<'a> AsicContext<'a> {
    pub fn new(device: &'a Device, asic: &'a AsicInstance) -> Self {
        Self { device, asic }
    }

    /// Looks up ASIC `index` on `device`.
    pub fn lookup(device: &'a Device, index: u32) -> QosResult<Self> {
        let asic = device.asic(index).ok_or_else(|| {
            QosError::from(HarnessError::internal(format!(
                "{} has no asic{}",
                device.hostname, index
            )))
        })?;
        Ok(Self::new(device, asic))
    }

    /// Queue-level key of `port`.
    ///
    /// VOQ chassis configure queues per system port, keyed
    /// `<hostname><sep><namespace or Asic0><sep><port>`; other devices use
    /// the bare port name.
    pub fn queue_port_key(&self, sep: char, port: &str) -> String {
        if self.device.is_voq() {
            format!(
                "{}{}{}{}{}",
                self.device.hostname,
                sep,
                self.asic.namespace_or_asic(),
                sep,
                port
            )
        } else {
            port.to_string()
        }
    }
}

/// Strips the brackets of a legacy `[TABLE|name]` reference.
pub fn strip_brackets(value: &str) -> &str {
    value.trim_start_matches('[').trim_end_matches(']')
}

/// Turns a stored object reference into a full key.
///
/// Legacy images store `[BUFFER_PROFILE|name]`, which already carries the
/// table; newer images store the bare name, which gets `prefix` prepended.
pub fn qualify_reference(value: &str, prefix: &str) -> String {
    if value.starts_with('[') {
        strip_brackets(value).to_string()
    } else {
        format!("{}{}", prefix, value)
    }
}

/// Bare object name of a reference in either form.
pub fn bare_reference<'a>(value: &'a str, prefixes: &[&str]) -> &'a str {
    let stripped = strip_brackets(value);
    prefixes
        .iter()
        .find_map(|p| stripped.strip_prefix(p))
        .unwrap_or(stripped)
}

/// Typed database access for one ASIC.
pub struct ConfigDbClient {
    store: Arc<dyn ConfigStore>,
    buffer_model: OnceCell<Option<String>>,
}

impl ConfigDbClient {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            buffer_model: OnceCell::new(),
        }
    }

    pub fn label(&self) -> &str {
        self.store.label()
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    /// Returns true if buffer tables are read from APPL_DB.
    ///
    /// `DEVICE_METADATA|localhost` `buffer_model` is read once; any non-empty
    /// value means the buffer manager publishes applied state.
    pub async fn is_buffer_in_applied_state(&self) -> QosResult<bool> {
        let model = self
            .buffer_model
            .get_or_try_init(|| async {
                let key = DbId::ConfigDb.key(
                    tables::CFG_DEVICE_METADATA_TABLE,
                    &[tables::LOCALHOST_KEY],
                );
                let model = self
                    .store
                    .get(DbId::ConfigDb, &key, metadata_fields::BUFFER_MODEL)
                    .await?
                    .filter(|m| !m.is_empty());
                info!(
                    asic = %self.label(),
                    "Buffer model is {}, buffer tables will be fetched from {}",
                    model.as_deref().unwrap_or("not defined"),
                    if model.is_some() { "APPL_DB" } else { "CONFIG_DB" }
                );
                Ok::<_, QosError>(model)
            })
            .await?;
        Ok(model.is_some())
    }

    pub async fn buffer_scheme(&self) -> QosResult<BufferScheme> {
        Ok(if self.is_buffer_in_applied_state().await? {
            BufferScheme::APPLIED
        } else {
            BufferScheme::CONFIGURED
        })
    }

    pub async fn get(&self, db: DbId, key: &str, field: &str) -> QosResult<Option<String>> {
        debug!(asic = %self.label(), "HGET {} {} {}", db, key, field);
        Ok(self.store.get(db, key, field).await?)
    }

    /// HGET that treats an absent value as a buffer resolution failure.
    pub async fn get_required(&self, db: DbId, key: &str, field: &str) -> QosResult<String> {
        self.get(db, key, field)
            .await?
            .ok_or_else(|| QosError::buffer_resolution(key, format!("field '{}' missing", field)))
    }

    pub async fn hgetall(&self, db: DbId, key: &str) -> QosResult<FieldValues> {
        debug!(asic = %self.label(), "HGETALL {} {}", db, key);
        Ok(self.store.hgetall(db, key).await?)
    }

    /// KEYS, sorted for deterministic iteration.
    pub async fn keys(&self, db: DbId, pattern: &str) -> QosResult<Vec<String>> {
        debug!(asic = %self.label(), "KEYS {} {}", db, pattern);
        let mut keys = self.store.keys(db, pattern).await?;
        keys.sort();
        Ok(keys)
    }

    pub async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> QosResult<()> {
        debug!(asic = %self.label(), "HSET {} {} {} {}", db, key, field, value);
        Ok(self.store.hset(db, key, field, value).await?)
    }
}

/// Clients and command runners for every device in the testbed.
#[derive(Default)]
pub struct DutHandles {
    clients: HashMap<(String, u32), Arc<ConfigDbClient>>,
    runners: HashMap<String, Arc<dyn CommandRunner>>,
}

impl DutHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_asic(&mut self, hostname: &str, asic: u32, store: Arc<dyn ConfigStore>) {
        self.clients.insert(
            (hostname.to_string(), asic),
            Arc::new(ConfigDbClient::new(store)),
        );
    }

    pub fn insert_runner(&mut self, hostname: &str, runner: Arc<dyn CommandRunner>) {
        self.runners.insert(hostname.to_string(), runner);
    }

    pub fn client(&self, hostname: &str, asic: u32) -> QosResult<Arc<ConfigDbClient>> {
        self.clients
            .get(&(hostname.to_string(), asic))
            .cloned()
            .ok_or_else(|| {
                HarnessError::internal(format!("no store registered for {}/asic{}", hostname, asic))
                    .into()
            })
    }

    pub fn runner(&self, hostname: &str) -> QosResult<Arc<dyn CommandRunner>> {
        self.runners.get(hostname).cloned().ok_or_else(|| {
            HarnessError::internal(format!("no command runner registered for {}", hostname))
                .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_qos_test::{MemoryStore, StoreOp};

    #[test]
    fn test_reference_forms() {
        assert_eq!(
            qualify_reference("[BUFFER_PROFILE|pg_lossless_100000_5m_profile]", "BUFFER_PROFILE|"),
            "BUFFER_PROFILE|pg_lossless_100000_5m_profile"
        );
        assert_eq!(
            qualify_reference("pg_lossless_100000_5m_profile", "BUFFER_PROFILE_TABLE:"),
            "BUFFER_PROFILE_TABLE:pg_lossless_100000_5m_profile"
        );
        assert_eq!(
            bare_reference("[BUFFER_POOL|ingress_lossless_pool]", &["BUFFER_POOL|"]),
            "ingress_lossless_pool"
        );
        assert_eq!(
            bare_reference("ingress_lossless_pool", &["BUFFER_POOL|"]),
            "ingress_lossless_pool"
        );
    }

    #[test]
    fn test_scheme_keys() {
        let applied = BufferScheme::APPLIED;
        assert_eq!(
            applied.binding_key(BufferTableKind::Queue, "Ethernet0", "0-2"),
            "BUFFER_QUEUE_TABLE:Ethernet0:0-2"
        );
        assert_eq!(applied.profile_prefix(), "BUFFER_PROFILE_TABLE:");
        let configured = BufferScheme::CONFIGURED;
        assert_eq!(
            configured.binding_key(BufferTableKind::PriorityGroup, "Ethernet0", "3-4"),
            "BUFFER_PG|Ethernet0|3-4"
        );
        assert_eq!(configured.pool_key("egress_lossy_pool"), "BUFFER_POOL|egress_lossy_pool");
    }

    #[test]
    fn test_queue_port_key() {
        let mut device = sonic_qos_test::DeviceBuilder::new("lc1", "broadcom").build();
        let asic = device.asics[0].clone();
        assert_eq!(AsicContext::new(&device, &asic).queue_port_key(':', "Ethernet0"), "Ethernet0");

        device.switch_type = sonic_qos_types::SwitchType::Voq;
        assert_eq!(
            AsicContext::new(&device, &asic).queue_port_key(':', "Ethernet0"),
            "lc1:Asic0:Ethernet0"
        );
        let ns = AsicInstance::new(1, Some("asic1".to_string()));
        assert_eq!(
            AsicContext::new(&device, &ns).queue_port_key('|', "Ethernet8"),
            "lc1|asic1|Ethernet8"
        );
    }

    #[tokio::test]
    async fn test_buffer_model_is_read_once() {
        let store = Arc::new(MemoryStore::new("dut").with_hash(
            DbId::ConfigDb,
            "DEVICE_METADATA|localhost",
            [("buffer_model", "traditional")],
        ));
        let client = ConfigDbClient::new(store.clone());

        assert!(client.is_buffer_in_applied_state().await.unwrap());
        assert!(client.is_buffer_in_applied_state().await.unwrap());
        assert_eq!(client.buffer_scheme().await.unwrap(), BufferScheme::APPLIED);
        assert_eq!(
            store.call_count(StoreOp::Get, DbId::ConfigDb, "DEVICE_METADATA|localhost"),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_buffer_model_means_config_db() {
        let client = ConfigDbClient::new(Arc::new(MemoryStore::new("dut")));
        assert!(!client.is_buffer_in_applied_state().await.unwrap());
        assert_eq!(client.buffer_scheme().await.unwrap(), BufferScheme::CONFIGURED);
    }

    #[tokio::test]
    async fn test_handles_report_missing_registration() {
        let mut handles = DutHandles::new();
        handles.insert_asic("dut", 0, Arc::new(MemoryStore::new("dut")));
        assert!(handles.client("dut", 0).is_ok());
        assert!(handles.client("dut", 1).is_err());
        assert!(handles.runner("dut").is_err());
    }
}

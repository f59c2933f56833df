//! Direct Redis backend for [`ConfigStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::store::{ConfigStore, DbId, FieldValues};

/// Connection settings for one ASIC's Redis instance.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis server hostname or IP
    pub host: String,
    /// Redis server port
    pub port: u16,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the Redis connection URI for `db`.
    fn uri(&self, db: DbId) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db.id())
    }
}

/// One connection manager per SONiC database on a single Redis server.
pub struct RedisStore {
    label: String,
    connections: HashMap<DbId, ConnectionManager>,
}

impl RedisStore {
    /// Connects to every SONiC database on the server.
    pub async fn connect(label: impl Into<String>, config: &RedisConfig) -> HarnessResult<Self> {
        let label = label.into();
        let mut connections = HashMap::new();

        for db in DbId::ALL {
            let uri = config.uri(db);
            let client = redis::Client::open(uri.clone())
                .map_err(|e| HarnessError::database("connect", format!("{}: {}", uri, e)))?;
            let connection = client.get_connection_manager().await.map_err(|e| {
                HarnessError::database("connect", format!("{}: {}", uri, e))
            })?;
            connections.insert(db, connection);
        }

        info!(
            "Connected to Redis at {}:{} for {}",
            config.host, config.port, label
        );

        Ok(Self { label, connections })
    }

    fn connection(&self, db: DbId) -> HarnessResult<ConnectionManager> {
        self.connections
            .get(&db)
            .cloned()
            .ok_or_else(|| HarnessError::internal(format!("no connection for {}", db)))
    }
}

#[async_trait]
impl ConfigStore for RedisStore {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get(&self, db: DbId, key: &str, field: &str) -> HarnessResult<Option<String>> {
        debug!("{}: HGET {} {} {}", self.label, db, key, field);
        let mut conn = self.connection(db)?;
        conn.hget(key, field)
            .await
            .map_err(|e| HarnessError::database("hget", format!("{} {}: {}", key, field, e)))
    }

    async fn hgetall(&self, db: DbId, key: &str) -> HarnessResult<FieldValues> {
        debug!("{}: HGETALL {} {}", self.label, db, key);
        let mut conn = self.connection(db)?;
        conn.hgetall(key)
            .await
            .map_err(|e| HarnessError::database("hgetall", format!("{}: {}", key, e)))
    }

    async fn keys(&self, db: DbId, pattern: &str) -> HarnessResult<Vec<String>> {
        debug!("{}: KEYS {} {}", self.label, db, pattern);
        let mut conn = self.connection(db)?;
        conn.keys(pattern)
            .await
            .map_err(|e| HarnessError::database("keys", format!("{}: {}", pattern, e)))
    }

    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> HarnessResult<()> {
        debug!("{}: HSET {} {} {} {}", self.label, db, key, field, value);
        let mut conn = self.connection(db)?;
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| HarnessError::database("hset", format!("{} {}: {}", key, field, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_uri() {
        let config = RedisConfig::new("10.0.0.1", 6379);
        assert_eq!(config.uri(DbId::ConfigDb), "redis://10.0.0.1:6379/4");
        assert_eq!(config.uri(DbId::AsicDb), "redis://10.0.0.1:6379/1");
    }
}

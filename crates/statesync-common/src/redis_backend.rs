//! Redis backend for the staged store.
//!
//! Entries live as one hash per key under `TABLE|key`. Change notifications
//! ride on Redis keyspace notifications, so the server must run with
//! `notify-keyspace-events` covering generic and hash events (`Kgh$`).

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::fvs::{FieldValue, FieldValues};
use crate::store::{KeyspaceEvent, StateStore};

/// Placeholder written for entries with no attributes (a Redis hash cannot
/// be empty). Stripped on read.
const NULL_FIELD: &str = "NULL";

/// Staged database selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedisDb {
    /// APPL_DB (database 0) - application state between pipeline stages
    ApplDb = 0,
    /// CONFIG_DB (database 4) - persisted configuration
    ConfigDb = 4,
    /// STATE_DB (database 6) - operational state and restart records
    StateDb = 6,
}

/// Redis-backed [`StateStore`].
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    db: RedisDb,
}

impl RedisStore {
    /// Connects to one staged database.
    pub async fn connect(host: &str, port: u16, db: RedisDb) -> Result<Self> {
        let uri = format!("redis://{}:{}/{}", host, port, db as u8);

        let client = redis::Client::open(uri.as_str())
            .map_err(|e| StoreError::Unreachable(format!("{}: {}", uri, e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unreachable(format!("{}: {}", uri, e)))?;

        info!(host, port, db = db as u8, "connected to staged store");
        Ok(Self { client, manager, db })
    }

    fn entry_key(table: &str, key: &str) -> String {
        format!("{}|{}", table, key)
    }
}

fn backend_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get_keys(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}|*", table);
        let raw: Vec<String> = conn.keys(&pattern).await.map_err(backend_err)?;

        let mut keys: Vec<String> = raw
            .iter()
            .filter_map(|k| k.split_once('|').map(|(_, key)| key.to_string()))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_entry(&self, table: &str, key: &str) -> Result<Option<FieldValues>> {
        let mut conn = self.manager.clone();
        let map: HashMap<String, String> = conn
            .hgetall(Self::entry_key(table, key))
            .await
            .map_err(backend_err)?;

        if map.is_empty() {
            return Ok(None);
        }
        let mut entry: FieldValues = map
            .into_iter()
            .filter(|(f, _)| f != NULL_FIELD)
            .collect();
        entry.sort();
        Ok(Some(entry))
    }

    async fn set_entry(&self, table: &str, key: &str, fvs: &[FieldValue]) -> Result<()> {
        let mut conn = self.manager.clone();
        let entry_key = Self::entry_key(table, key);

        let items: Vec<(String, String)> = if fvs.is_empty() {
            vec![(NULL_FIELD.to_string(), NULL_FIELD.to_string())]
        } else {
            fvs.to_vec()
        };

        // Full replace: drop the old hash before writing the new fields.
        let mut pipe = redis::pipe();
        pipe.atomic().del(&entry_key).hset_multiple(&entry_key, &items);
        let _: () = pipe.query_async(&mut conn).await.map_err(backend_err)?;

        debug!(table, key, fields = items.len(), "set entry");
        Ok(())
    }

    async fn del_entry(&self, table: &str, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(Self::entry_key(table, key))
            .await
            .map_err(backend_err)?;
        debug!(table, key, "deleted entry");
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> Result<mpsc::UnboundedReceiver<KeyspaceEvent>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let pattern = format!("__keyspace@{}__:{}|*", self.db as u8, table);
        pubsub.psubscribe(&pattern).await.map_err(backend_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let table = table.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let Some((_, key)) = channel.split_once('|') else {
                    warn!(table, channel, "unparseable keyspace channel");
                    continue;
                };
                let command: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(table, error = %e, "unparseable keyspace payload");
                        continue;
                    }
                };
                let event = match command.as_str() {
                    "del" | "expired" => KeyspaceEvent::del(key),
                    _ => KeyspaceEvent::set(key),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!(table, "keyspace subscription closed");
        });

        Ok(rx)
    }
}

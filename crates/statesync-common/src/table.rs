//! Typed table handles.
//!
//! A [`Table`] binds a store handle to one table name; an optional
//! [`TableSchema`] pins the allowed attribute names so that a typo in a
//! producer fails at the write site instead of surfacing as a silently
//! ignored field downstream.

use tokio::sync::mpsc;

use crate::error::{Result, StoreError};
use crate::fvs::{FieldValue, FieldValues};
use crate::store::{KeyspaceEvent, StoreHandle};

/// Fixed schema for a table: its name and the attribute names it accepts.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    attributes: Vec<String>,
}

impl TableSchema {
    /// Creates a schema accepting exactly the listed attribute names.
    pub fn new(name: impl Into<String>, attributes: &[&str]) -> Self {
        Self {
            name: name.into(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates an attribute set against the schema.
    pub fn check(&self, fvs: &[FieldValue]) -> Result<()> {
        for (field, _) in fvs {
            if !self.attributes.iter().any(|a| a == field) {
                return Err(StoreError::SchemaViolation {
                    table: self.name.clone(),
                    attribute: field.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A store handle scoped to a single table.
#[derive(Clone)]
pub struct Table {
    store: StoreHandle,
    name: String,
    schema: Option<TableSchema>,
}

impl Table {
    /// Creates an unchecked table handle.
    pub fn new(store: StoreHandle, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            schema: None,
        }
    }

    /// Creates a schema-checked table handle.
    pub fn with_schema(store: StoreHandle, schema: TableSchema) -> Self {
        Self {
            store,
            name: schema.name().to_string(),
            schema: Some(schema),
        }
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying store handle.
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Enumerates all keys in the table.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.get_keys(&self.name).await
    }

    /// Reads the entry for `key`.
    pub async fn get(&self, key: &str) -> Result<Option<FieldValues>> {
        self.store.get_entry(&self.name, key).await
    }

    /// Replaces the entry for `key`, checking the schema if one is bound.
    pub async fn set(&self, key: &str, fvs: &[FieldValue]) -> Result<()> {
        if let Some(schema) = &self.schema {
            schema.check(fvs)?;
        }
        self.store.set_entry(&self.name, key, fvs).await
    }

    /// Removes the entry for `key`.
    pub async fn del(&self, key: &str) -> Result<()> {
        self.store.del_entry(&self.name, key).await
    }

    /// Subscribes to change notifications for this table.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<KeyspaceEvent>> {
        self.store.subscribe(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fvs::fvs;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn table_scopes_operations() {
        let store = MemoryStore::handle();
        let neigh = Table::new(store.clone(), "NEIGH_TABLE");
        let route = Table::new(store, "ROUTE_TABLE");

        neigh.set("Ethernet0:fe80::1", &fvs(&[("neigh", "00:01")])).await.unwrap();

        assert_eq!(neigh.keys().await.unwrap().len(), 1);
        assert!(route.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_rejects_unknown_attribute() {
        let store = MemoryStore::handle();
        let schema = TableSchema::new("ROUTE_TABLE", &["nexthop", "ifname"]);
        let table = Table::with_schema(store, schema);

        table
            .set("10.0.0.0/24", &fvs(&[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")]))
            .await
            .unwrap();

        let err = table
            .set("10.0.0.0/24", &fvs(&[("nexthoop", "10.0.0.1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaViolation { .. }));
    }
}

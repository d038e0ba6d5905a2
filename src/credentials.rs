/// Credential store: the opaque, incrementally-mutated key material backing
/// a user's chat-network identity. One record per user, flat JSON blob,
/// merge-on-save semantics.
use crate::db::DbPool;
use crate::error::StoreError;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identity credentials plus the protocol's key table (category → id → blob).
/// The contents are owned by the transport; the store never inspects them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMaterial {
    #[serde(default)]
    pub creds: Option<Value>,
    #[serde(default)]
    pub keys: BTreeMap<String, BTreeMap<String, Value>>,
}

impl KeyMaterial {
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Fresh material has no identity yet; a transport seeing it starts pairing.
    pub fn is_fresh(&self) -> bool {
        self.creds.is_none()
    }

    /// Merge a partial update into this material.
    ///
    /// `creds` replaces the identity document when present. For each key
    /// category: `None` drops the whole category; otherwise the supplied ids
    /// extend it, with a `null` value removing that id.
    pub fn apply(&mut self, update: &KeyMaterialUpdate) {
        if let Some(creds) = &update.creds {
            self.creds = Some(creds.clone());
        }
        for (category, change) in &update.keys {
            match change {
                None => {
                    self.keys.remove(category);
                }
                Some(entries) => {
                    let slot = self.keys.entry(category.clone()).or_default();
                    for (id, value) in entries {
                        if value.is_null() {
                            slot.remove(id);
                        } else {
                            slot.insert(id.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }
}

/// A partial key-material write, as signalled by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMaterialUpdate {
    #[serde(default)]
    pub creds: Option<Value>,
    #[serde(default)]
    pub keys: BTreeMap<String, Option<BTreeMap<String, Value>>>,
}

impl KeyMaterialUpdate {
    pub fn with_creds(creds: Value) -> Self {
        Self {
            creds: Some(creds),
            ..Self::default()
        }
    }

    pub fn with_key(category: &str, id: &str, value: Value) -> Self {
        let mut update = Self::default();
        update
            .keys
            .entry(category.to_string())
            .or_insert_with(|| Some(BTreeMap::new()))
            .get_or_insert_with(BTreeMap::new)
            .insert(id.to_string(), value);
        update
    }

    pub fn clearing_category(category: &str) -> Self {
        let mut update = Self::default();
        update.keys.insert(category.to_string(), None);
        update
    }
}

/// SQLite-backed credential store.
#[derive(Clone)]
pub struct CredentialStore {
    pool: DbPool,
}

impl CredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load a user's key material.
    ///
    /// Absence and deserialization failure are not errors: both read as
    /// "no existing session" and seed fresh material. A placeholder record is
    /// created when none exists.
    pub async fn load(&self, user_id: &str) -> Result<KeyMaterial, StoreError> {
        let conn = self.pool.lock().await;

        let stored: Option<Option<String>> = conn
            .query_row(
                "SELECT data FROM credential_records WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            None => {
                conn.execute(
                    "INSERT OR IGNORE INTO credential_records (user_id, data) VALUES (?1, NULL)",
                    params![user_id],
                )?;
                Ok(KeyMaterial::fresh())
            }
            Some(None) => Ok(KeyMaterial::fresh()),
            Some(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(material) => Ok(material),
                Err(err) => {
                    log::warn!("discarding unreadable key material for {user_id}: {err}");
                    Ok(KeyMaterial::fresh())
                }
            },
        }
    }

    /// Merge a partial update onto the stored material and persist the result.
    /// The read-merge-write runs under one lock hold, so concurrent saves for
    /// the same user serialize; the returned future completes only after the
    /// blob is written.
    pub async fn save(&self, user_id: &str, update: &KeyMaterialUpdate) -> Result<(), StoreError> {
        let conn = self.pool.lock().await;

        let stored: Option<Option<String>> = conn
            .query_row(
                "SELECT data FROM credential_records WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut material = stored
            .flatten()
            .and_then(|blob| serde_json::from_str(&blob).ok())
            .unwrap_or_else(KeyMaterial::fresh);
        material.apply(update);

        let blob = serde_json::to_string(&material)?;
        conn.execute(
            "INSERT INTO credential_records (user_id, data) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET data = excluded.data",
            params![user_id, blob],
        )?;

        Ok(())
    }

    /// Remove the persisted record. Used exactly once per session, on
    /// transport-confirmed logout.
    pub async fn clear(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.pool.lock().await;

        conn.execute(
            "DELETE FROM credential_records WHERE user_id = ?1",
            params![user_id],
        )?;

        Ok(())
    }
}

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::info;

use crate::error::Result;
use crate::storage::{decode_json, parse_timestamp};
use crate::types::Profile;

/// The identity of an input shape: the sorted, de-duplicated column names and their digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileKey {
    pub hash: String,
    pub json_keys: Vec<String>,
}

impl ProfileKey {
    /// Build the key for a set of column names. Order and repetition do not matter.
    /// Returns `None` for an empty key set, which gets no profile.
    pub fn from_keys<I, S>(keys: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let json_keys: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if json_keys.is_empty() {
            return None;
        }

        Some(Self {
            hash: profile_hash(&json_keys),
            json_keys,
        })
    }
}

/// Stable digest of an already sorted key list
pub fn profile_hash(sorted_keys: &[String]) -> String {
    // JSON encoding keeps keys containing separators unambiguous
    let canonical = serde_json::to_string(sorted_keys).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Profile lookups and assignment over a store connection (or an open transaction).
///
/// `assign` is a plain read-then-write: two writers racing on the same new
/// hash could both try to insert it. Loads are single-writer, so this is not
/// guarded further; the UNIQUE constraint on `profile_hash` turns the race
/// into a failed file load rather than a duplicate profile.
pub struct ProfileRegistry<'c> {
    conn: &'c Connection,
}

impl<'c> ProfileRegistry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Find or create the profile for `json_keys`, counting one more contact against it
    pub fn assign(&self, json_keys: &[String]) -> Result<Option<i64>> {
        let Some(key) = ProfileKey::from_keys(json_keys.iter().cloned()) else {
            return Ok(None);
        };

        if let Some(profile_id) = self.get_by_hash(&key.hash)?.map(|p| p.id) {
            self.conn.execute(
                "UPDATE contact_profiles SET contact_count = contact_count + 1 WHERE id = ?1",
                params![profile_id],
            )?;
            return Ok(Some(profile_id));
        }

        self.conn.execute(
            "INSERT INTO contact_profiles (profile_hash, json_keys, contact_count, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![
                key.hash,
                serde_json::to_string(&key.json_keys)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        let profile_id = self.conn.last_insert_rowid();
        info!("Created new profile_id: {} for hash: {}", profile_id, key.hash);
        Ok(Some(profile_id))
    }

    pub fn get_by_hash(&self, hash: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn
            .query_row(
                "SELECT id, profile_hash, json_keys, contact_count, created_at
                 FROM contact_profiles WHERE profile_hash = ?1",
                params![hash],
                map_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// All profiles, most used first
    pub fn list(&self) -> Result<Vec<Profile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, profile_hash, json_keys, contact_count, created_at
             FROM contact_profiles ORDER BY contact_count DESC, id ASC",
        )?;
        let profiles = stmt
            .query_map([], map_profile)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }
}

fn map_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        profile_hash: row.get(1)?,
        json_keys: decode_json(row.get::<_, String>(2)?)?,
        contact_count: row.get(3)?,
        created_at: parse_timestamp(row.get::<_, String>(4)?)?,
    })
}

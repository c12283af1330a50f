use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::constants::{CONTACTS_TABLE, PROFILES_TABLE, STATUS_ACTIVE, STATUS_USED};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::profile::ProfileRegistry;
use crate::types::{CanonicalRecord, Contact, EtlRun, KnownContact, Profile, RunStatus};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS contact_profiles (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        profile_hash   TEXT NOT NULL UNIQUE,
        json_keys      TEXT NOT NULL,
        contact_count  INTEGER NOT NULL DEFAULT 1,
        created_at     TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS contacts (
        id                        INTEGER PRIMARY KEY AUTOINCREMENT,
        company_name              TEXT NOT NULL,
        url                       TEXT,
        phone_number              TEXT UNIQUE,
        is_b2b                    INTEGER,
        industry                  TEXT,
        customer_target_segments  TEXT,
        additional_info           TEXT NOT NULL DEFAULT '{}',
        tags                      TEXT NOT NULL DEFAULT '[]',
        status                    TEXT NOT NULL DEFAULT 'active',
        last_used                 TEXT,
        profile_id                INTEGER REFERENCES contact_profiles(id),
        created_at                TEXT NOT NULL,
        updated_at                TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS etl_runs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        status           TEXT NOT NULL,
        tag_used         TEXT,
        files_processed  TEXT NOT NULL DEFAULT '[]',
        contacts_added   INTEGER NOT NULL DEFAULT 0,
        started_at       TEXT NOT NULL,
        finished_at      TEXT
    );
"#;

const CONTACT_COLUMNS: &str = "id, company_name, url, phone_number, is_b2b, industry, \
     customer_target_segments, additional_info, tags, status, last_used, profile_id, \
     created_at, updated_at";

/// Persistence operations the load pipeline depends on
pub trait ContactStore {
    /// Identity columns of every persisted contact, used to seed dedup
    fn known_contacts(&self) -> Result<Vec<KnownContact>>;

    /// Insert a batch of accepted records, assigning each its profile.
    /// All-or-nothing: on error nothing from the batch is kept.
    fn persist_batch(&mut self, records: &[CanonicalRecord]) -> Result<usize>;

    /// Open an audit record in the `running` state
    fn start_run(&mut self, tag: Option<&str>) -> Result<EtlRun>;

    /// Write the terminal state of a run
    fn finish_run(&mut self, run: &EtlRun) -> Result<()>;
}

/// SQLite-backed contact store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open the store named by a `DATABASE_URL` value. Accepts a plain path
    /// or a `sqlite://` / `sqlite:` prefixed one.
    pub fn open_url(database_url: &str) -> Result<Self> {
        let path = url_path(database_url);
        if path == ":memory:" {
            return Self::open_in_memory();
        }
        Self::open(path)
    }

    /// Open an existing store without creating files or schema.
    /// Returns `None` when the database file does not exist.
    pub fn open_url_read_only(database_url: &str) -> Result<Option<Self>> {
        let path = url_path(database_url);
        if path == ":memory:" {
            return Self::open_in_memory().map(Some);
        }
        if !Path::new(path).is_file() {
            debug!("No database file at {}", path);
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Some(Self { conn }))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // Reporting

    /// Most recently created contacts first
    pub fn recent_contacts(&self, limit: usize) -> Result<Vec<Contact>> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let contacts = stmt
            .query_map(params![limit as i64], map_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    pub fn all_contacts(&self) -> Result<Vec<Contact>> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let contacts = stmt
            .query_map([], map_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    pub fn contact_by_id(&self, id: i64) -> Result<Option<Contact>> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1");
        let contact = self
            .conn
            .query_row(&sql, params![id], map_contact)
            .optional()?;
        Ok(contact)
    }

    pub fn contact_by_phone(&self, phone: &str) -> Result<Option<Contact>> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone_number = ?1");
        let contact = self
            .conn
            .query_row(&sql, params![phone], map_contact)
            .optional()?;
        Ok(contact)
    }

    pub fn count_contacts(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Profiles, most used first
    pub fn profiles(&self) -> Result<Vec<Profile>> {
        ProfileRegistry::new(&self.conn).list()
    }

    pub fn run_by_id(&self, id: i64) -> Result<Option<EtlRun>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, status, tag_used, files_processed, contacts_added, started_at, finished_at
                 FROM etl_runs WHERE id = ?1",
                params![id],
                map_run,
            )
            .optional()?;
        Ok(run)
    }

    // Maintenance

    /// Count how many of `phones` belong to a persisted contact
    pub fn count_by_phones(&self, phones: &BTreeSet<String>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM contacts WHERE phone_number = ?1")?;
        let mut found = 0usize;
        for phone in phones {
            let count: i64 = stmt.query_row(params![phone], |row| row.get(0))?;
            found += count as usize;
        }
        Ok(found)
    }

    /// Mark contacts as used and append `tag` to their tags, skipping
    /// contacts that already carry it. One transaction for the whole set.
    pub fn mark_used(&mut self, phones: &BTreeSet<String>, tag: &str) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut updated = 0usize;
        {
            let mut stmt = tx.prepare(
                "UPDATE contacts
                 SET status = ?1,
                     last_used = ?2,
                     updated_at = ?2,
                     tags = json_insert(tags, '$[#]', ?3)
                 WHERE phone_number = ?4
                   AND NOT EXISTS (SELECT 1 FROM json_each(contacts.tags) WHERE json_each.value = ?3)",
            )?;
            for phone in phones {
                let changed = stmt.execute(params![STATUS_USED, now, tag, phone])?;
                if changed > 0 {
                    debug!("Marked contact with phone {} as used", phone);
                }
                updated += changed;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Delete every contact and profile. Run history is kept.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        warn!("Deleting all records from '{}' table...", CONTACTS_TABLE);
        tx.execute("DELETE FROM contacts", [])?;
        warn!("Deleting all records from '{}' table...", PROFILES_TABLE);
        tx.execute("DELETE FROM contact_profiles", [])?;
        tx.commit()?;
        Ok(())
    }
}

impl ContactStore for SqliteStore {
    fn known_contacts(&self) -> Result<Vec<KnownContact>> {
        let mut stmt = self
            .conn
            .prepare("SELECT company_name, phone_number FROM contacts")?;
        let contacts = stmt
            .query_map([], |row| {
                Ok(KnownContact {
                    company_name: row.get(0)?,
                    phone_number: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Loaded {} known contacts", contacts.len());
        Ok(contacts)
    }

    fn persist_batch(&mut self, records: &[CanonicalRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let registry = ProfileRegistry::new(&tx);
            let mut insert = tx.prepare(
                "INSERT INTO contacts (
                    company_name, url, phone_number, is_b2b, industry, customer_target_segments,
                    additional_info, tags, status, profile_id, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            )?;

            for record in records {
                let company_name = record.company_name.as_deref().ok_or_else(|| {
                    EtlError::Persistence("refusing to insert a contact without a company name".to_string())
                })?;
                let profile_id = registry.assign(&record.json_keys())?;

                insert.execute(params![
                    company_name,
                    record.url,
                    record.phone_number,
                    record.is_b2b,
                    record.industry,
                    record.customer_target_segments,
                    serde_json::to_string(&record.additional_info)?,
                    serde_json::to_string(&record.tags)?,
                    STATUS_ACTIVE,
                    profile_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        info!("Inserted {} contacts", records.len());
        Ok(records.len())
    }

    fn start_run(&mut self, tag: Option<&str>) -> Result<EtlRun> {
        let mut run = EtlRun::new(tag.map(str::to_string));
        self.conn.execute(
            "INSERT INTO etl_runs (status, tag_used, files_processed, contacts_added, started_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                run.status.as_str(),
                run.tag_used,
                serde_json::to_string(&run.files_processed)?,
                run.started_at.to_rfc3339()
            ],
        )?;
        run.id = Some(self.conn.last_insert_rowid());
        info!("Started ETL run {:?}", run.id);
        Ok(run)
    }

    fn finish_run(&mut self, run: &EtlRun) -> Result<()> {
        let id = run
            .id
            .ok_or_else(|| EtlError::Persistence("cannot finish a run that was never started".to_string()))?;

        let changed = self.conn.execute(
            "UPDATE etl_runs
             SET status = ?1, files_processed = ?2, contacts_added = ?3, finished_at = ?4
             WHERE id = ?5",
            params![
                run.status.as_str(),
                serde_json::to_string(&run.files_processed)?,
                run.contacts_added as i64,
                run.finished_at.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        if changed == 0 {
            return Err(EtlError::Persistence(format!("ETL run {id} does not exist")));
        }
        info!("ETL run {} finished with status '{}'", id, run.status);
        Ok(())
    }
}

fn map_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        company_name: row.get(1)?,
        url: row.get(2)?,
        phone_number: row.get(3)?,
        is_b2b: row.get(4)?,
        industry: row.get(5)?,
        customer_target_segments: row.get(6)?,
        additional_info: decode_json(row.get(7)?)?,
        tags: decode_json(row.get(8)?)?,
        status: row.get(9)?,
        last_used: row
            .get::<_, Option<String>>(10)?
            .map(parse_timestamp)
            .transpose()?,
        profile_id: row.get(11)?,
        created_at: parse_timestamp(row.get(12)?)?,
        updated_at: parse_timestamp(row.get(13)?)?,
    })
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<EtlRun> {
    let status: String = row.get(1)?;
    let status = status
        .parse::<RunStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.to_string().into()))?;
    let contacts_added: i64 = row.get(4)?;

    Ok(EtlRun::restore(
        row.get(0)?,
        status,
        row.get(2)?,
        decode_json(row.get(3)?)?,
        contacts_added.max(0) as usize,
        parse_timestamp(row.get(5)?)?,
        row.get::<_, Option<String>>(6)?
            .map(parse_timestamp)
            .transpose()?,
    ))
}

/// Strip the optional `sqlite:` scheme from a `DATABASE_URL` value
fn url_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Decode a JSON text column
pub(crate) fn decode_json<T: DeserializeOwned>(text: String) -> rusqlite::Result<T> {
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Decode an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

//! The SQLite-backed annotation store.
//!
//! One [`SqlAnnotationStore`] owns one connection for its lifetime and is
//! used by one logical caller; there is no internal locking beyond the
//! schema-snapshot cache. Loading, querying, fragment extraction and
//! diff-based saving all live here.

pub mod bootstrap;
mod fragment;
mod load;
mod query;
pub mod schema_loader;
mod save;
pub mod validator;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;
use crate::schema::{Layer, Schema};

pub use validator::{DefaultValidator, GraphValidator, ValidationPolicy};

/// A store of annotation graphs over a SQLite database.
pub struct SqlAnnotationStore {
    conn: Connection,
    schema_cache: RwLock<Option<Arc<Schema>>>,
    validation: ValidationPolicy,
    validator: Box<dyn GraphValidator>,
}

impl SqlAnnotationStore {
    /// Opens (creating if necessary) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<SqlAnnotationStore> {
        let conn = Connection::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opening annotation store");
        SqlAnnotationStore::from_connection(conn)
    }

    /// Opens an in-memory store; used by tests and scratch work.
    pub fn open_in_memory() -> Result<SqlAnnotationStore> {
        SqlAnnotationStore::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<SqlAnnotationStore> {
        conn.pragma_update(None, "foreign_keys", true)?;
        register_regexp(&conn)?;
        bootstrap::create_base_tables(&conn)?;
        Ok(SqlAnnotationStore {
            conn,
            schema_cache: RwLock::new(None),
            validation: ValidationPolicy::default(),
            validator: Box::new(DefaultValidator),
        })
    }

    /// Replaces the structural validator.
    pub fn with_validator(mut self, validator: Box<dyn GraphValidator>) -> SqlAnnotationStore {
        self.validator = validator;
        self
    }

    /// Sets how validation problems affect saves.
    pub fn set_validation_policy(&mut self, policy: ValidationPolicy) {
        self.validation = policy;
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub(crate) fn validation_policy(&self) -> ValidationPolicy {
        self.validation
    }

    pub(crate) fn validator(&self) -> &dyn GraphValidator {
        self.validator.as_ref()
    }

    /// The schema snapshot, built lazily and memoized until
    /// [`invalidate_schema`](Self::invalidate_schema) is called. Every
    /// caller shares the same immutable snapshot.
    pub fn get_schema(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.schema_cache.read().clone() {
            return Ok(schema);
        }
        let schema = Arc::new(schema_loader::load_schema(&self.conn)?);
        *self.schema_cache.write() = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Drops the memoized schema snapshot; the next call to
    /// [`get_schema`](Self::get_schema) rebuilds it from the registries.
    pub fn invalidate_schema(&self) {
        *self.schema_cache.write() = None;
    }

    /// Registers a layer definition, creating backing storage as needed.
    pub fn register_layer(&self, layer: &Layer) -> Result<()> {
        bootstrap::register_layer(&self.conn, layer)?;
        self.invalidate_schema();
        Ok(())
    }

    /// Registers a transcript-attribute definition.
    pub fn register_transcript_attribute(&self, attribute: &str, label: &str) -> Result<()> {
        bootstrap::register_attribute(&self.conn, "transcript", attribute, label)?;
        self.invalidate_schema();
        Ok(())
    }

    /// Registers a participant-attribute definition.
    pub fn register_participant_attribute(&self, attribute: &str, label: &str) -> Result<()> {
        bootstrap::register_attribute(&self.conn, "speaker", attribute, label)?;
        self.invalidate_schema();
        Ok(())
    }

    /// Adds a corpus, ignoring duplicates.
    pub fn add_corpus(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO corpus (corpus_name) VALUES (?1)",
            [name],
        )?;
        Ok(())
    }

    /// Adds a transcript type, ignoring duplicates.
    pub fn add_transcript_type(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO transcript_type (transcript_type) VALUES (?1)",
            [name],
        )?;
        Ok(())
    }

    /// Adds an episode (transcript family), ignoring duplicates.
    pub fn add_episode(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO transcript_family (name) VALUES (?1)",
            [name],
        )?;
        Ok(())
    }
}

/// Registers the `REGEXP` scalar so `MATCHES` comparisons execute. SQLite
/// passes the pattern first and the candidate text second; NULL text never
/// matches.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let re = Regex::new(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(text.map(|t| re.is_match(&t)).unwrap_or(false))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TemporalScope;

    #[test]
    fn schema_snapshot_is_memoized_until_invalidated() {
        let store = SqlAnnotationStore::open_in_memory().unwrap();
        let first = store.get_schema().unwrap();
        let second = store.get_schema().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store
            .register_layer(&Layer::temporal(
                "turn",
                "Turns",
                TemporalScope::Meta,
                "participant",
                11,
            ))
            .unwrap();
        let third = store.get_schema().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.layer("turn").is_some());
    }

    #[test]
    fn regexp_is_available() {
        let store = SqlAnnotationStore::open_in_memory().unwrap();
        let matched: bool = store
            .conn()
            .query_row("SELECT 'Ada Lovelace' REGEXP 'Ada.*'", [], |r| r.get(0))
            .unwrap();
        assert!(matched);
    }
}

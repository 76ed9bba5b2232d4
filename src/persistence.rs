//! Database persistence layer for the ledger and its documents

use crate::blockchain::{Payload, Record};
use crate::documents::{Comment, Document, Post, Seal, User};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Abstraction for persistence backends. Implementations must store a sealed
/// record and the document it belongs to atomically.
pub trait Persistence: Send + Sync {
    /// All stored records ordered by height, genesis first.
    fn load_records(&self) -> Result<Vec<Record>>;
    fn save_record(&self, height: u64, record: &Record) -> Result<()>;
    fn commit_sealed(&self, height: u64, record: &Record, document: &Document) -> Result<()>;
    fn find_user(&self, id: &str) -> Result<Option<User>>;
    /// True if either the username or the email is already taken.
    fn user_exists(&self, username: &str, email: &str) -> Result<bool>;
    fn find_post(&self, id: &str) -> Result<Option<Post>>;
    fn count_documents(&self) -> Result<DocumentCounts>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentCounts {
    pub users: u64,
    pub posts: u64,
    pub comments: u64,
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::DatabaseError("Mutex poisoned".to_string())
}

fn nonce_to_sql(nonce: u64) -> Result<i64> {
    i64::try_from(nonce).map_err(|_| LedgerError::DatabaseError(format!("nonce {} does not fit in INTEGER", nonce)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::DatabaseError(format!("Invalid stored timestamp {}: {}", s, e)))
}

fn parse_payload(json: &str) -> Result<Payload> {
    serde_json::from_str(json)
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to deserialize payload: {}", e)))
}

/// Maps unique-constraint failures on document inserts to `DuplicateDocument`.
fn document_insert_error(kind: &str, err: rusqlite::Error) -> LedgerError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            LedgerError::DuplicateDocument(format!("{}: {}", kind, err))
        }
        _ => LedgerError::DatabaseError(format!("Failed to save {}: {}", kind, err)),
    }
}

/// Raw columns shared by every sealed row.
struct SealColumns {
    digest: String,
    previous_digest: String,
    payload: String,
}

impl SealColumns {
    fn read(row: &Row, offset: usize) -> rusqlite::Result<Self> {
        Ok(SealColumns {
            digest: row.get(offset)?,
            previous_digest: row.get(offset + 1)?,
            payload: row.get(offset + 2)?,
        })
    }

    fn into_seal(self) -> Result<Seal> {
        Ok(Seal {
            digest: self.digest,
            previous_digest: self.previous_digest,
            payload: parse_payload(&self.payload)?,
        })
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                height INTEGER PRIMARY KEY,
                digest TEXT NOT NULL,
                previous_digest TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                digest TEXT NOT NULL,
                previous_digest TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                digest TEXT NOT NULL,
                previous_digest TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                user_id TEXT NOT NULL,
                post TEXT NOT NULL,
                digest TEXT NOT NULL,
                previous_digest TEXT NOT NULL,
                payload TEXT NOT NULL
            );",
        )
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(poisoned)
    }

    fn insert_record(conn: &Connection, height: u64, record: &Record) -> Result<()> {
        conn.execute(
            "INSERT INTO records (height, digest, previous_digest, timestamp, nonce, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                height as i64,
                record.digest,
                record.previous_digest,
                record.canonical_timestamp(),
                nonce_to_sql(record.nonce)?,
                record.payload.canonical_json(),
            ],
        )
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to save record {}: {}", height, e)))?;
        Ok(())
    }

    fn insert_document(conn: &Connection, document: &Document) -> Result<()> {
        let seal = document.seal();
        let payload = seal.payload.canonical_json();
        let result = match document {
            Document::User(u) => conn.execute(
                "INSERT INTO users (id, username, email, digest, previous_digest, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![u.id, u.username, u.email, seal.digest, seal.previous_digest, payload],
            ),
            Document::Post(p) => conn.execute(
                "INSERT INTO posts (id, owner, digest, previous_digest, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![p.id, p.owner, seal.digest, seal.previous_digest, payload],
            ),
            Document::Comment(c) => conn.execute(
                "INSERT INTO comments (id, owner, user_id, post, digest, previous_digest, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![c.id, c.owner, c.user_id, c.post, seal.digest, seal.previous_digest, payload],
            ),
        };
        result.map_err(|e| document_insert_error(document.kind(), e))?;
        Ok(())
    }

    fn count(conn: &Connection, table: &str) -> Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl Persistence for Database {
    fn load_records(&self) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT height, digest, previous_digest, timestamp, nonce, payload
                 FROM records ORDER BY height ASC",
            )
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to query records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (height, digest, previous_digest, timestamp, nonce, payload) =
                row.map_err(|e| LedgerError::DatabaseError(format!("Failed to read record: {}", e)))?;

            if height != records.len() as i64 {
                return Err(LedgerError::DatabaseError(format!(
                    "Record heights are not contiguous: expected {}, found {}",
                    records.len(),
                    height
                )));
            }

            records.push(Record {
                payload: parse_payload(&payload)?,
                previous_digest,
                timestamp: parse_timestamp(&timestamp)?,
                nonce: u64::try_from(nonce)
                    .map_err(|_| LedgerError::DatabaseError(format!("Negative nonce at height {}", height)))?,
                digest,
            });
        }

        Ok(records)
    }

    fn save_record(&self, height: u64, record: &Record) -> Result<()> {
        let conn = self.conn()?;
        Database::insert_record(&conn, height, record)
    }

    fn commit_sealed(&self, height: u64, record: &Record, document: &Document) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        Database::insert_record(&tx, height, record)?;
        Database::insert_document(&tx, document)?;

        tx.commit()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn find_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, username, email, digest, previous_digest, payload FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, SealColumns::read(row, 3)?)),
            )
            .optional()?;

        row.map(|(id, username, email, seal)| {
            Ok(User {
                id,
                username,
                email,
                seal: seal.into_seal()?,
            })
        })
        .transpose()
    }

    fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
            params![username, email],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn find_post(&self, id: &str) -> Result<Option<Post>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, owner, digest, previous_digest, payload FROM posts WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, SealColumns::read(row, 2)?)),
            )
            .optional()?;

        row.map(|(id, owner, seal)| {
            Ok(Post {
                id,
                owner,
                seal: seal.into_seal()?,
            })
        })
        .transpose()
    }

    fn count_documents(&self) -> Result<DocumentCounts> {
        let conn = self.conn()?;
        Ok(DocumentCounts {
            users: Database::count(&conn, "users")?,
            posts: Database::count(&conn, "posts")?,
            comments: Database::count(&conn, "comments")?,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<Record>,
    users: HashMap<String, User>,
    posts: HashMap<String, Post>,
    comments: HashMap<String, Comment>,
}

impl MemoryState {
    fn check_height(&self, height: u64) -> Result<()> {
        if height != self.records.len() as u64 {
            return Err(LedgerError::DatabaseError(format!(
                "Record height {} does not follow stored height {}",
                height,
                self.records.len()
            )));
        }
        Ok(())
    }

    fn check_document(&self, document: &Document) -> Result<()> {
        let taken = match document {
            Document::User(u) => {
                self.users.contains_key(&u.id)
                    || self.users.values().any(|other| other.username == u.username || other.email == u.email)
            }
            Document::Post(p) => self.posts.contains_key(&p.id),
            Document::Comment(c) => self.comments.contains_key(&c.id),
        };
        if taken {
            return Err(LedgerError::DuplicateDocument(format!("{} {}", document.kind(), document.id())));
        }
        Ok(())
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(poisoned)
    }
}

impl Persistence for InMemoryPersistence {
    fn load_records(&self) -> Result<Vec<Record>> {
        Ok(self.state()?.records.clone())
    }

    fn save_record(&self, height: u64, record: &Record) -> Result<()> {
        let mut state = self.state()?;
        state.check_height(height)?;
        state.records.push(record.clone());
        Ok(())
    }

    fn commit_sealed(&self, height: u64, record: &Record, document: &Document) -> Result<()> {
        let mut state = self.state()?;
        state.check_height(height)?;
        state.check_document(document)?;

        state.records.push(record.clone());
        match document.clone() {
            Document::User(u) => {
                state.users.insert(u.id.clone(), u);
            }
            Document::Post(p) => {
                state.posts.insert(p.id.clone(), p);
            }
            Document::Comment(c) => {
                state.comments.insert(c.id.clone(), c);
            }
        }
        Ok(())
    }

    fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state()?.users.get(id).cloned())
    }

    fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        Ok(self
            .state()?
            .users
            .values()
            .any(|u| u.username == username || u.email == email))
    }

    fn find_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.state()?.posts.get(id).cloned())
    }

    fn count_documents(&self) -> Result<DocumentCounts> {
        let state = self.state()?;
        Ok(DocumentCounts {
            users: state.users.len() as u64,
            posts: state.posts.len() as u64,
            comments: state.comments.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Ledger, PayloadValue};
    use crate::documents::{new_object_id, user_payload};

    fn sealed_user(ledger: &mut Ledger, username: &str, email: &str) -> (u64, Record, Document) {
        let id = new_object_id();
        let record = ledger.append(user_payload(&id)).unwrap();
        let document = Document::User(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            seal: Seal::from(&record),
        });
        ((ledger.len() - 1) as u64, record, document)
    }

    fn backends() -> Vec<Box<dyn Persistence>> {
        vec![
            Box::new(Database::open(":memory:").unwrap()),
            Box::new(InMemoryPersistence::new()),
        ]
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
    }

    #[test]
    fn test_records_round_trip() {
        for store in backends() {
            let mut ledger = Ledger::new(1).unwrap();
            store.save_record(0, ledger.genesis()).unwrap();
            for i in 0..3 {
                let record = ledger
                    .append(Payload::new().with("from", "A").with("to", "B").with("amount", i))
                    .unwrap();
                store.save_record(i as u64 + 1, &record).unwrap();
            }

            let loaded = store.load_records().unwrap();
            assert_eq!(loaded, ledger.records());
            let restored = Ledger::from_records(loaded, 1).unwrap();
            assert!(restored.validate());
        }
    }

    #[test]
    fn test_float_payloads_reload() {
        assert!(PayloadValue::float(f64::NAN).is_none());
        assert!(PayloadValue::float(f64::INFINITY).is_none());

        for store in backends() {
            let mut ledger = Ledger::new(0).unwrap();
            store.save_record(0, ledger.genesis()).unwrap();
            let payload = Payload::new()
                .with("ratio", PayloadValue::float(0.1).unwrap())
                .with("tiny", PayloadValue::float(-3.0e-9).unwrap());
            let record = ledger.append(payload).unwrap();
            store.save_record(1, &record).unwrap();

            let restored = Ledger::from_records(store.load_records().unwrap(), 0).unwrap();
            assert_eq!(restored.records(), ledger.records());
            assert!(restored.validate());
        }
    }

    #[test]
    fn test_commit_sealed_stores_both() {
        for store in backends() {
            let mut ledger = Ledger::new(0).unwrap();
            store.save_record(0, ledger.genesis()).unwrap();
            let (height, record, document) = sealed_user(&mut ledger, "ada", "ada@example.com");
            store.commit_sealed(height, &record, &document).unwrap();

            let user = store.find_user(document.id()).unwrap().unwrap();
            assert_eq!(user.seal.digest, record.digest);
            assert_eq!(user.seal.payload, record.payload);
            assert!(store.user_exists("ada", "other@example.com").unwrap());
            assert!(store.user_exists("other", "ada@example.com").unwrap());
            assert!(!store.user_exists("other", "other@example.com").unwrap());
            assert_eq!(store.load_records().unwrap().len(), 2);
            assert_eq!(store.count_documents().unwrap(), DocumentCounts { users: 1, posts: 0, comments: 0 });
        }
    }

    #[test]
    fn test_duplicate_user_rolls_back_record() {
        for store in backends() {
            let mut ledger = Ledger::new(0).unwrap();
            store.save_record(0, ledger.genesis()).unwrap();
            let (height, record, document) = sealed_user(&mut ledger, "ada", "ada@example.com");
            store.commit_sealed(height, &record, &document).unwrap();

            let (height, record, document) = sealed_user(&mut ledger, "ada", "second@example.com");
            let result = store.commit_sealed(height, &record, &document);
            assert!(matches!(result, Err(LedgerError::DuplicateDocument(_))));
            assert_eq!(store.load_records().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_duplicate_height_rejected() {
        for store in backends() {
            let ledger = Ledger::new(0).unwrap();
            store.save_record(0, ledger.genesis()).unwrap();
            assert!(store.save_record(0, ledger.genesis()).is_err());
        }
    }

    #[test]
    fn test_missing_documents() {
        for store in backends() {
            assert_eq!(store.find_user("nope").unwrap(), None);
            assert_eq!(store.find_post("nope").unwrap(), None);
            assert!(store.load_records().unwrap().is_empty());
        }
    }
}

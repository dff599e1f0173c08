//! Allowlist database
//!
//! Provides persistence for the users allowed to sign in.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("User already exists: {0}")]
    DuplicateUser(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        conn.execute(SEED_ADMIN, params![Utc::now().to_rfc3339()])?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// All users ordered by name
    pub fn list_users(&self) -> DbResult<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, role FROM users ORDER BY name, id")?;
        let users = stmt
            .query_map([], parse_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn get_user(&self, id: &str) -> DbResult<User> {
        let conn = self.conn();
        get_user(&conn, id)
    }

    /// Look up an allowlisted user, updating the stored name when a
    /// different non-empty one is supplied
    pub fn login(&self, id: &str, name: Option<&str>) -> DbResult<User> {
        let conn = self.conn();
        let user = get_user(&conn, id)?;

        match name.filter(|n| !n.is_empty()) {
            Some(name) if user.name.as_deref() != Some(name) => {
                conn.execute("UPDATE users SET name = ?1 WHERE id = ?2", params![name, id])?;
                tracing::info!(user_id = %id, "Updated user name on login");
                Ok(User {
                    name: Some(name.to_string()),
                    ..user
                })
            }
            _ => Ok(user),
        }
    }

    pub fn add_user(&self, id: &str, name: Option<&str>, role: Role) -> DbResult<User> {
        let conn = self.conn();
        let name = name.filter(|n| !n.is_empty());

        let result = conn.execute(
            "INSERT INTO users (id, name, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, role, Utc::now().to_rfc3339()],
        );
        match result {
            Ok(_) => Ok(User {
                id: id.to_string(),
                name: name.map(String::from),
                role,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DbError::DuplicateUser(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a row was deleted
    pub fn remove_user(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

fn get_user(conn: &Connection, id: &str) -> DbResult<User> {
    conn.query_row(
        "SELECT id, name, role FROM users WHERE id = ?1",
        params![id],
        parse_user,
    )
    .optional()?
    .ok_or_else(|| DbError::UserNotFound(id.to_string()))
}

fn parse_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
    })
}

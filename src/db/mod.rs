/// Database layer for persistent storage.
/// Holds the user directory; credential records live in `crate::credentials`.

pub mod init;

use crate::models::User;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DbPool = Arc<Mutex<Connection>>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// How fresh a login must be for the HTTP layer to skip re-pairing.
pub const LOGIN_FRESHNESS_MS: i64 = 1000 * 60 * 60 * 24 * 7 * 3; // 3 weeks

/// How fresh a login must be to qualify for a background refresh.
pub const REFRESH_FRESHNESS_MS: i64 = 1000 * 60 * 60 * 24 * 10; // 10 days

/// Database operations
pub struct Database;

impl Database {
    /// Insert a new user into the directory
    pub async fn insert_user(pool: &DbPool, user: &User) -> SqliteResult<()> {
        let conn = pool.lock().await;

        conn.execute(
            "INSERT INTO users (user_id, name, company_id, phone_number, last_auth)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.user_id,
                user.name,
                user.company_id,
                user.phone_number,
                user.last_auth
            ],
        )?;

        Ok(())
    }

    /// Get a user by id
    pub async fn get_user(pool: &DbPool, user_id: &str) -> SqliteResult<Option<User>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(
            "SELECT user_id, name, company_id, phone_number, last_auth
             FROM users WHERE user_id = ?1",
        )?;

        let user = stmt
            .query_row(params![user_id], |row| {
                Ok(User {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    company_id: row.get(2)?,
                    phone_number: row.get(3)?,
                    last_auth: row.get(4)?,
                })
            })
            .optional()?;

        Ok(user)
    }

    /// Check whether a user id exists in the directory
    pub async fn user_exists(pool: &DbPool, user_id: &str) -> SqliteResult<bool> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare("SELECT 1 FROM users WHERE user_id = ?1")?;
        let found = stmt
            .query_row(params![user_id], |_| Ok(()))
            .optional()?
            .is_some();

        Ok(found)
    }

    /// Record a confirmed chat-network authentication for a user
    pub async fn set_last_auth(pool: &DbPool, user_id: &str) -> SqliteResult<()> {
        let conn = pool.lock().await;
        let now = Utc::now().timestamp_millis();

        conn.execute(
            "UPDATE users SET last_auth = ?1 WHERE user_id = ?2",
            params![now, user_id],
        )?;

        Ok(())
    }

    /// Users whose last authentication is younger than the given window
    pub async fn users_with_fresh_last_auth(
        pool: &DbPool,
        window_ms: i64,
    ) -> SqliteResult<Vec<User>> {
        let conn = pool.lock().await;
        let cutoff = Utc::now().timestamp_millis() - window_ms;

        let mut stmt = conn.prepare(
            "SELECT user_id, name, company_id, phone_number, last_auth
             FROM users WHERE last_auth > ?1 ORDER BY user_id",
        )?;

        let users = stmt
            .query_map(params![cutoff], |row| {
                Ok(User {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    company_id: row.get(2)?,
                    phone_number: row.get(3)?,
                    last_auth: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }
}

/// Database schema initialization.
/// Sets up SQLite WAL mode and creates tables on startup.
use rusqlite::{Connection, Result as SqliteResult};

/// Initialize database connection with WAL mode and schema
pub fn initialize_database(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode (for file-based DB only, ignore error for in-memory)
    let _ = conn.execute("PRAGMA journal_mode = WAL", []);
    let _ = conn.execute("PRAGMA synchronous = NORMAL", []);

    create_schema(conn)?;

    Ok(())
}

/// Create all database tables
fn create_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            company_id TEXT UNIQUE NOT NULL,
            phone_number TEXT NOT NULL,
            last_auth INTEGER
        );

        CREATE TABLE IF NOT EXISTS credential_records (
            user_id TEXT PRIMARY KEY,
            data TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_users_last_auth ON users(last_auth);
        "#,
    )?;

    Ok(())
}

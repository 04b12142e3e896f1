//! Session database schema migrations.

use rusqlite::{params, Connection};
use tracing::info;

use intake_core::error::{IntakeError, Result};

/// Ordered schema steps. A step runs once, when the recorded version is below
/// its own.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "session_records",
    "CREATE TABLE IF NOT EXISTS session_records (
        key         TEXT PRIMARY KEY NOT NULL,
        payload     TEXT NOT NULL,
        written_at  INTEGER NOT NULL,
        expires_at  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_session_records_expires_at
        ON session_records (expires_at);",
)];

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> IntakeError + '_ {
    move |e| IntakeError::Storage(format!("{}: {}", context, e))
}

/// Bring `conn` up to the latest schema version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(storage_err("Creating schema_migrations"))?;

    let applied: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(storage_err("Reading schema version"))?;

    for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > applied) {
        conn.execute_batch(sql)
            .map_err(storage_err("Applying session schema"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )
        .map_err(storage_err("Recording schema version"))?;
        info!(version, name, "Session schema migrated");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_table() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM session_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}

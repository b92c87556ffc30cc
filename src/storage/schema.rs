//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            schedule TEXT NOT NULL,
            target TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS job_executions (
            id INTEGER PRIMARY KEY,
            job_id TEXT NOT NULL,
            status_code INTEGER,
            duration_ms INTEGER NOT NULL,
            success INTEGER NOT NULL,
            executed_at TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_job_executions_job
            ON job_executions(job_id, executed_at);",
    )?;

    // Migration: 'kind' arrived after the first jobs table
    let has_kind: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('jobs') WHERE name='kind'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_kind == 0 {
        conn.execute("ALTER TABLE jobs ADD COLUMN kind TEXT NOT NULL DEFAULT 'http'", [])?;
    }

    Ok(())
}

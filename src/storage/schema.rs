//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ts (
            tid INTEGER PRIMARY KEY,
            dt TEXT NOT NULL,
            source TEXT NOT NULL,
            grp TEXT NOT NULL,
            host TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS area (
            defid INTEGER PRIMARY KEY,
            host TEXT NOT NULL,
            area TEXT NOT NULL,
            UNIQUE (host, area)
        );

        CREATE TABLE IF NOT EXISTS filter (
            qid INTEGER PRIMARY KEY,
            dts TEXT NOT NULL,
            dte TEXT NOT NULL,
            source TEXT NOT NULL,
            grp TEXT NOT NULL,
            host TEXT NOT NULL,
            stat TEXT NOT NULL,
            val REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (dts, dte, source, grp, host)
        );

        CREATE INDEX IF NOT EXISTS idx_ts_dt ON ts(dt);
        CREATE INDEX IF NOT EXISTS idx_ts_event ON ts(source, grp, host, dt);
        CREATE INDEX IF NOT EXISTS idx_area_area ON area(area);
        CREATE INDEX IF NOT EXISTS idx_filter_dts ON filter(dts);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

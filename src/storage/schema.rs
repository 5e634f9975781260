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

        CREATE TABLE IF NOT EXISTS load_tests (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            num_users INTEGER NOT NULL CHECK (num_users > 0),
            ramp_up INTEGER NOT NULL DEFAULT 0,
            target_url TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (end_time > start_time)
        );

        CREATE TABLE IF NOT EXISTS test_results (
            id INTEGER PRIMARY KEY,
            test_id INTEGER NOT NULL,
            tps REAL NOT NULL,
            avg_response_time REAL NOT NULL,
            min_response_time REAL NOT NULL,
            max_response_time REAL NOT NULL,
            success_count INTEGER NOT NULL,
            failure_count INTEGER NOT NULL,
            error_rate REAL NOT NULL,
            availability REAL NOT NULL,
            rps REAL NOT NULL,
            dns_time REAL NOT NULL DEFAULT 0,
            connect_time REAL NOT NULL DEFAULT 0,
            ttfb REAL NOT NULL DEFAULT 0,
            content_download_time REAL NOT NULL DEFAULT 0,
            duration_secs REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (test_id) REFERENCES load_tests(id)
        );

        CREATE INDEX IF NOT EXISTS idx_load_tests_status ON load_tests(status, start_time);
        CREATE INDEX IF NOT EXISTS idx_load_tests_owner ON load_tests(owner_id);
        CREATE INDEX IF NOT EXISTS idx_test_results_test ON test_results(test_id);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}

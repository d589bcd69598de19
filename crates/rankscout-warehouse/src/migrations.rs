use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_discovery_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS discovery_cache (
    fingerprint TEXT PRIMARY KEY,
    item_ids TEXT NOT NULL,
    id_count BIGINT NOT NULL,
    stored_at BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_discovery_runs",
        sql: r#"
CREATE TABLE IF NOT EXISTS discovery_runs (
    run_id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    id_source TEXT NOT NULL,
    ids_considered BIGINT NOT NULL,
    candidates BIGINT NOT NULL,
    partial_failures BIGINT NOT NULL,
    cancelled BOOLEAN NOT NULL,
    finished_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discovery_cache_stored_at ON discovery_cache(stored_at);
CREATE INDEX IF NOT EXISTS idx_discovery_runs_fingerprint ON discovery_runs(fingerprint, finished_at);
"#,
    },
];

/// Applies pending migrations in order, recording each in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}

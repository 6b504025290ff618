use anyhow::Result;
use rusqlite::Connection;

use super::schema;
use crate::registry::Registry;

/// Check and apply migrations for the SQLite backend.
///
/// Class and relation tables are always (re)declared so that classes added
/// to the registry after the database was created get their tables.
pub fn check_and_migrate(conn: &Connection, registry: &Registry) -> Result<()> {
    // Check if schema_version table exists
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);

    if !table_exists {
        // Fresh install: apply the full schema.
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        conn.execute_batch(schema::CREATE_INDEXES_SQL)?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![schema::SCHEMA_VERSION, now, "Initial schema"],
        )?;
    } else {
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < schema::SCHEMA_VERSION {
            apply_migrations(conn, current_version)?;
        }
    }

    apply_class_tables(conn, registry)
}

fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    if from_version < 1 {
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        conn.execute_batch(schema::CREATE_INDEXES_SQL)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![1, now, "Initial schema"],
        )?;
    }

    Ok(())
}

fn apply_class_tables(conn: &Connection, registry: &Registry) -> Result<()> {
    for spec in registry.classes() {
        conn.execute_batch(&schema::class_table_sql(spec))?;
    }
    for relation in registry.relations() {
        conn.execute_batch(&schema::relation_table_sql(relation))?;
    }
    Ok(())
}

use rusqlite::{Connection, OptionalExtension};

use crate::errors::ModelError;

pub const BASE_SCHEMA_VERSION: i64 = 1;

struct MigrationStep {
    target_version: i64,
    statements: &'static [&'static str],
}

const MIGRATION_STEPS: &[MigrationStep] = &[MigrationStep {
    target_version: 2,
    statements: &["CREATE INDEX IF NOT EXISTS idx_model_blobs_updated ON model_blobs(updated_at)"],
}];

pub const SCHEMA_VERSION: i64 = BASE_SCHEMA_VERSION + MIGRATION_STEPS.len() as i64;

pub fn ensure_schema(conn: &Connection) -> Result<(), ModelError> {
    ensure_base_schema(conn)?;
    ensure_meta(conn)?;
    run_pending_migrations(conn)?;
    Ok(())
}

fn ensure_base_schema(conn: &Connection) -> Result<(), ModelError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS model_blobs (
            id         TEXT PRIMARY KEY,
            body       TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS netmodel_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| ModelError::store(e.to_string()))
}

pub fn read_schema_version(conn: &Connection) -> Result<i64, ModelError> {
    conn.query_row(
        "SELECT schema_version FROM netmodel_meta WHERE id=1",
        [],
        |row| row.get(0),
    )
    .map_err(|e| ModelError::store(e.to_string()))
}

/// Applies every migration step newer than the stored version in one
/// transaction and returns the resulting version.
pub fn run_pending_migrations(conn: &Connection) -> Result<i64, ModelError> {
    let current = read_schema_version(conn)?;
    let mut statements: Vec<&'static str> = Vec::new();
    let mut target = current;
    for step in MIGRATION_STEPS {
        if step.target_version > current {
            target = step.target_version;
            statements.extend_from_slice(step.statements);
        }
    }
    if statements.is_empty() {
        return Ok(current);
    }
    conn.execute("BEGIN IMMEDIATE", [])
        .map_err(|e| ModelError::store(e.to_string()))?;
    let result: Result<(), ModelError> = (|| {
        for sql in statements.iter().copied() {
            conn.execute(sql, []).map_err(|e| ModelError::store(e.to_string()))?;
        }
        conn.execute("UPDATE netmodel_meta SET schema_version=?1 WHERE id=1", [target])
            .map_err(|e| ModelError::store(e.to_string()))?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])
                .map_err(|e| ModelError::store(e.to_string()))?;
        }
        Err(err) => {
            let _ = conn.execute("ROLLBACK", []);
            return Err(err);
        }
    }
    Ok(target)
}

fn ensure_meta(conn: &Connection) -> Result<(), ModelError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT schema_version FROM netmodel_meta WHERE id=1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ModelError::store(e.to_string()))?;
    match version {
        Some(existing) if existing > SCHEMA_VERSION => {
            return Err(ModelError::store(format!(
                "store schema version {existing} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        Some(_) => {}
        None => {
            conn.execute(
                "INSERT INTO netmodel_meta(id, schema_version) VALUES(1, ?1)",
                [BASE_SCHEMA_VERSION],
            )
            .map_err(|e| ModelError::store(e.to_string()))?;
        }
    }
    Ok(())
}

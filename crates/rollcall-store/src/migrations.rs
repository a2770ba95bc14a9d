use crate::DbError;
use rusqlite::{Connection, Transaction};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`] inside one transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<(), DbError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::SchemaTooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply(&tx, version)?;
        tracing::debug!(version, "applied schema migration");
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply(tx: &Transaction<'_>, version: i32) -> Result<(), DbError> {
    match version {
        1 => tx.execute_batch(include_str!("schema_v1.sql"))?,
        other => {
            return Err(DbError::SchemaTooNew {
                found: other,
                supported: CURRENT_SCHEMA_VERSION,
            })
        }
    }
    Ok(())
}

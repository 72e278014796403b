//! Temporarily removing a table's self-referencing foreign key.
//!
//! SQLite cannot drop a constraint in place, so the table is rebuilt: rows
//! are staged into a scratch table, the table is recreated from edited DDL
//! and the rows are copied back. Both rebuilds run on the caller's
//! transaction, which means a rollback brings the original definition back.

use regex::Regex;
use sqlx::SqliteConnection;
use tracing::info;

use super::{quote_ident, TransferError};
use crate::catalog::SelfReference;
use crate::logging::preview;

/// What is needed to put a dropped constraint back.
#[derive(Debug, Clone)]
pub struct DroppedConstraint {
    pub reference: SelfReference,
    original_ddl: String,
    index_ddl: Vec<String>,
}

/// Removes the `CONSTRAINT <name> FOREIGN KEY (...) REFERENCES t (...)`
/// clause from a `CREATE TABLE` statement. `None` when the clause is absent.
pub fn strip_constraint(ddl: &str, constraint: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is),\s*CONSTRAINT\s+"?{}"?\s+FOREIGN\s+KEY\s*\([^)]*\)\s*REFERENCES\s+"?\w+"?\s*\([^)]*\)"#,
        regex::escape(constraint)
    );
    let re = Regex::new(&pattern).ok()?;
    if !re.is_match(ddl) {
        return None;
    }
    Some(re.replace(ddl, "").into_owned())
}

async fn table_ddl(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Option<(String, Vec<String>)>, sqlx::Error> {
    let ddl: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(ddl) = ddl else {
        return Ok(None);
    };
    let index_ddl: Vec<String> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master \
         WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Some((ddl, index_ddl)))
}

async fn rebuild(
    conn: &mut SqliteConnection,
    table: &str,
    ddl: &str,
    index_ddl: &[String],
) -> Result<(), sqlx::Error> {
    let ident = quote_ident(table);
    let stage = quote_ident(&format!("{table}__stage"));
    let statements = [
        format!("DROP TABLE IF EXISTS {stage}"),
        format!("CREATE TABLE {stage} AS SELECT * FROM {ident}"),
        format!("DROP TABLE {ident}"),
        ddl.to_string(),
    ];
    for sql in statements.iter().chain(index_ddl) {
        info!(target: "galleryvault", event = "constraint_rebuild_stmt", table, sql = %preview(sql));
        sqlx::query(sql).execute(&mut *conn).await?;
    }
    sqlx::query(&format!("INSERT INTO {ident} SELECT * FROM {stage}"))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("DROP TABLE {stage}"))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Rebuilds `reference.table` without its self-referencing constraint.
/// Returns `None` (and changes nothing) when the table or the constraint is
/// not present.
pub async fn drop_self_reference(
    conn: &mut SqliteConnection,
    reference: &SelfReference,
) -> Result<Option<DroppedConstraint>, TransferError> {
    let fail = |source| TransferError::ConstraintDrop {
        table: reference.table.to_string(),
        constraint: reference.constraint.to_string(),
        source,
    };
    let Some((original_ddl, index_ddl)) = table_ddl(conn, reference.table).await.map_err(fail)?
    else {
        return Ok(None);
    };
    let Some(stripped) = strip_constraint(&original_ddl, reference.constraint) else {
        info!(target: "galleryvault", event = "constraint_absent", table = reference.table, constraint = reference.constraint);
        return Ok(None);
    };
    rebuild(conn, reference.table, &stripped, &index_ddl)
        .await
        .map_err(fail)?;
    info!(target: "galleryvault", event = "constraint_dropped", table = reference.table, constraint = reference.constraint);
    Ok(Some(DroppedConstraint {
        reference: *reference,
        original_ddl,
        index_ddl,
    }))
}

/// Rebuilds the table with its original definition.
pub async fn restore_self_reference(
    conn: &mut SqliteConnection,
    dropped: &DroppedConstraint,
) -> Result<(), TransferError> {
    let reference = &dropped.reference;
    rebuild(conn, reference.table, &dropped.original_ddl, &dropped.index_ddl)
        .await
        .map_err(|source| TransferError::ConstraintRestore {
            table: reference.table.to_string(),
            constraint: reference.constraint.to_string(),
            source,
        })?;
    info!(target: "galleryvault", event = "constraint_restored", table = reference.table, constraint = reference.constraint);
    Ok(())
}

/// Number of foreign keys on `table` that point back at itself.
pub async fn self_reference_count(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM pragma_foreign_key_list(?1) WHERE \"table\" = ?1")
        .bind(table)
        .fetch_one(&mut *conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::self_reference;
    use crate::store::open_memory;

    #[test]
    fn strips_only_the_named_clause() {
        let ddl = "CREATE TABLE Album (\n  AlbumId INTEGER PRIMARY KEY,\n  FKAlbumParentId INTEGER,\n  FKGalleryId INTEGER NOT NULL REFERENCES Gallery (GalleryId),\n  CONSTRAINT fk_album_parent FOREIGN KEY (FKAlbumParentId) REFERENCES Album (AlbumId)\n)";
        let stripped = strip_constraint(ddl, "fk_album_parent").unwrap();
        assert!(!stripped.contains("fk_album_parent"));
        assert!(stripped.contains("REFERENCES Gallery (GalleryId)"));
        assert!(stripped.trim_end().ends_with(')'));
        assert_eq!(strip_constraint(&stripped, "fk_album_parent"), None);
    }

    #[tokio::test]
    async fn drop_and_restore_round_trip_keeps_rows_and_indexes() {
        let pool = open_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO Album (AlbumId, FKGalleryId, FKAlbumParentId, DirectoryName, DateAdded, \
             CreatedBy, LastModifiedBy, DateLastModified, OwnedBy, OwnerRoleName) \
             VALUES (1, -1, NULL, 'root', '2024-01-01T00:00:00Z', 'a', 'a', '2024-01-01T00:00:00Z', '', '')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        let reference = self_reference("Album").unwrap();
        assert_eq!(self_reference_count(&mut conn, "Album").await.unwrap(), 1);

        let dropped = drop_self_reference(&mut conn, reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(self_reference_count(&mut conn, "Album").await.unwrap(), 0);

        restore_self_reference(&mut conn, &dropped).await.unwrap();
        assert_eq!(self_reference_count(&mut conn, "Album").await.unwrap(), 1);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Album")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let indexes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'Album' AND sql IS NOT NULL",
        )
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(indexes, 2);
    }
}

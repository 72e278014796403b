//! Find/replace edits on stored template text.
//!
//! A patch is considered applied once the replacement text is present, so
//! running it twice (or over seed rows that already carry the new text)
//! changes nothing.

use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::MigrationError;
use crate::transfer::quote_ident;

#[derive(Debug, Clone, Copy)]
pub struct TemplatePatch {
    pub table: &'static str,
    pub id_column: &'static str,
    /// Restricts the patch to rows where `column = value`.
    pub filter: Option<(&'static str, &'static str)>,
    pub column: &'static str,
    pub find: &'static str,
    pub replace: &'static str,
}

/// Returns the patched text, or `None` when there is nothing to do.
pub fn apply_patch(text: &str, find: &str, replace: &str) -> Option<String> {
    if text.contains(replace) || !text.contains(find) {
        return None;
    }
    Some(text.replace(find, replace))
}

/// Applies `patch` to every matching row and returns how many changed.
pub async fn apply_store_patch(
    conn: &mut SqliteConnection,
    patch: &TemplatePatch,
) -> Result<u64, MigrationError> {
    let table = quote_ident(patch.table);
    let id = quote_ident(patch.id_column);
    let column = quote_ident(patch.column);

    let rows = match patch.filter {
        Some((filter_column, filter_value)) => {
            sqlx::query(&format!(
                "SELECT {id} AS id, {column} AS body FROM {table} WHERE {} = ?1",
                quote_ident(filter_column)
            ))
            .bind(filter_value)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {id} AS id, {column} AS body FROM {table}"))
                .fetch_all(&mut *conn)
                .await?
        }
    };

    let mut changed = 0;
    for row in rows {
        let row_id: i64 = row.try_get("id")?;
        let body: Option<String> = row.try_get("body")?;
        let Some(patched) = body.as_deref().and_then(|b| apply_patch(b, patch.find, patch.replace))
        else {
            debug!(target: "galleryvault", event = "template_patch_skip", table = patch.table, id = row_id);
            continue;
        };
        sqlx::query(&format!("UPDATE {table} SET {column} = ?1 WHERE {id} = ?2"))
            .bind(patched)
            .bind(row_id)
            .execute(&mut *conn)
            .await?;
        changed += 1;
    }
    info!(target: "galleryvault", event = "template_patched", table = patch.table, column = patch.column, rows = changed);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn patch_is_idempotent() {
        let once = apply_patch("<p>x</p>", "<p>x</p>", "<div><p>x</p></div>").unwrap();
        assert_eq!(once, "<div><p>x</p></div>");
        assert_eq!(apply_patch(&once, "<p>x</p>", "<div><p>x</p></div>"), None);
    }

    #[test]
    fn missing_anchor_is_left_alone() {
        assert_eq!(apply_patch("<span/>", "<p>x</p>", "<p>y</p>"), None);
    }

    #[tokio::test]
    async fn store_patch_respects_filter() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TABLE T (Id INTEGER PRIMARY KEY, Kind TEXT, Body TEXT)")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO T VALUES (1, 'Header', 'Seach'), (2, 'Album', 'Seach'), (3, 'Header', NULL)")
            .execute(&mut *conn)
            .await
            .unwrap();
        let patch = TemplatePatch {
            table: "T",
            id_column: "Id",
            filter: Some(("Kind", "Header")),
            column: "Body",
            find: "Seach",
            replace: "Search",
        };
        assert_eq!(apply_store_patch(&mut conn, &patch).await.unwrap(), 1);
        assert_eq!(apply_store_patch(&mut conn, &patch).await.unwrap(), 0);
        let bodies: Vec<Option<String>> = sqlx::query_scalar("SELECT Body FROM T ORDER BY Id")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        assert_eq!(
            bodies,
            vec![Some("Search".into()), Some("Seach".into()), None]
        );
    }
}

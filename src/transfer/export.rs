use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::{quote_ident, ExportOptions, TransferError};
use crate::archive::value::{parse_fraction, parse_timestamp};
use crate::archive::{Archive, Column, ColumnKind, Table, Value};
use crate::catalog::{self, TableKind};
use crate::ledger;

struct ColumnInfo {
    column: Column,
    pk: i64,
}

async fn table_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<ColumnInfo>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        let declared: String = row.try_get("type")?;
        let not_null: i64 = row.try_get("notnull")?;
        let pk: i64 = row.try_get("pk")?;
        columns.push(ColumnInfo {
            column: Column::new(
                name,
                ColumnKind::from_declared_type(&declared),
                not_null == 0 && pk == 0,
            ),
            pk,
        });
    }
    Ok(columns)
}

fn read_value(
    row: &SqliteRow,
    table: &str,
    idx: usize,
    column: &Column,
) -> Result<Value, TransferError> {
    let decode = |message: String| TransferError::Decode {
        table: table.to_string(),
        column: column.name.clone(),
        message,
    };
    let value = match column.kind {
        ColumnKind::Integer => row.try_get::<Option<i64>, _>(idx)?.map(Value::Integer),
        ColumnKind::Boolean => row
            .try_get::<Option<i64>, _>(idx)?
            .map(|flag| Value::Boolean(flag != 0)),
        ColumnKind::String => row.try_get::<Option<String>, _>(idx)?.map(Value::String),
        ColumnKind::Binary => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(Value::Binary),
        ColumnKind::Timestamp => match row.try_get::<Option<String>, _>(idx)? {
            Some(text) => Some(Value::Timestamp(parse_timestamp(&text).map_err(decode)?)),
            None => None,
        },
        ColumnKind::Fraction => match row.try_get::<Option<String>, _>(idx)? {
            Some(text) => {
                let (numerator, denominator) = parse_fraction(&text)
                    .ok_or_else(|| decode(format!("not a fraction: {text:?}")))?;
                Some(Value::Fraction {
                    numerator,
                    denominator,
                })
            }
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

async fn export_table(conn: &mut SqliteConnection, name: &str) -> Result<Table, TransferError> {
    let info = table_columns(conn, name).await?;
    let mut keys: Vec<&ColumnInfo> = info.iter().filter(|c| c.pk > 0).collect();
    keys.sort_by_key(|c| c.pk);
    let order_by = if keys.is_empty() {
        "rowid".to_string()
    } else {
        keys.iter()
            .map(|c| quote_ident(&c.column.name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let select_list = info
        .iter()
        .map(|c| quote_ident(&c.column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {select_list} FROM {} ORDER BY {order_by}",
        quote_ident(name)
    );

    let columns: Vec<Column> = info.into_iter().map(|c| c.column).collect();
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    let mut table = Table::new(name, columns.clone());
    for row in &rows {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            values.push(read_value(row, name, idx, column)?);
        }
        table.push_row(values)?;
    }
    Ok(table)
}

/// Reads the selected table groups into an archive. Read-only.
pub async fn export(pool: &SqlitePool, options: &ExportOptions) -> Result<Archive, TransferError> {
    let mut conn = pool.acquire().await?;
    let version = ledger::get_version(&mut conn).await?;

    let mut names: Vec<&'static str> = Vec::new();
    if let Some(settings) = ledger::settings_table(&mut conn).await? {
        names.push(settings);
    }
    for kind in options.kinds() {
        for name in catalog::tables_for(version, kind) {
            if !names.contains(name) {
                names.push(*name);
            }
        }
    }
    if !options.kinds().contains(&TableKind::Gallery) {
        info!(target: "galleryvault", event = "export_membership_only");
    }

    let mut archive = Archive::new();
    for name in names {
        if !ledger::table_exists(&mut conn, name).await? {
            warn!(target: "galleryvault", event = "export_table_missing", table = %name);
            continue;
        }
        let table = export_table(&mut conn, name).await?;
        info!(target: "galleryvault", event = "export_table", table = %name, rows = table.len());
        archive.put_table(table);
    }
    Ok(archive)
}

//! SQLite storage backend.
//!
//! # Responsibility
//! - Render `Filter` trees into parameterized SQL.
//! - Map SQLite storage classes to `Value` and back.
//! - Provide the migration primitives pivot tables need.
//!
//! # Invariants
//! - Every identifier is validated and double-quoted before reaching SQL text.
//! - Every value is bound as a parameter, never interpolated.
//! - `atomically` uses a savepoint, so it nests inside caller transactions.
//! - Tuple filters render as one row-value `IN (VALUES ...)` term, so their
//!   expression depth does not grow with the number of tuples. The bound
//!   parameter count still does: a single read is limited to the
//!   connection's `SQLITE_LIMIT_VARIABLE_NUMBER` (32766 for the bundled
//!   library).

use super::{ColumnDef, IndexDef, Migrator, Storage, StorageError, StorageResult};
use crate::filter::{Filter, FindOptions};
use crate::schema::{is_valid_identifier, FieldType};
use crate::value::{Row, Value};
use log::{trace, warn};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

const SAVEPOINT_NAME: &str = "rowlink_atomic";

/// SQLite-backed storage over a borrowed connection.
pub struct SqliteStorage<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStorage<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    fn query_rows(&self, sql: &str, params: Vec<SqlValue>) -> StorageResult<Vec<Row>> {
        trace!("event=sql_query module=storage backend=sqlite sql={sql}");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = stmt.query(params_from_iter(params))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let mut item = Row::new();
            for (index, column) in columns.iter().enumerate() {
                item.insert(column.clone(), from_sql_value(row.get_ref(index)?));
            }
            items.push(item);
        }
        Ok(items)
    }

    fn execute(&self, sql: &str, params: Vec<SqlValue>) -> StorageResult<usize> {
        trace!("event=sql_exec module=storage backend=sqlite sql={sql}");
        Ok(self.conn.execute(sql, params_from_iter(params))?)
    }
}

impl Storage for SqliteStorage<'_> {
    fn find(
        &self,
        table: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StorageResult<Vec<Row>> {
        let columns = if options.fields.is_empty() {
            "*".to_string()
        } else {
            options
                .fields
                .iter()
                .map(|field| quote(field))
                .collect::<StorageResult<Vec<_>>>()?
                .join(", ")
        };

        let mut params = Vec::new();
        let mut sql = format!("SELECT {columns} FROM {} WHERE ", quote(table)?);
        render_filter(filter, &mut sql, &mut params)?;

        if !options.order_by.is_empty() {
            let order = options
                .order_by
                .iter()
                .map(|order| {
                    let direction = if order.descending { "DESC" } else { "ASC" };
                    quote(&order.column).map(|column| format!("{column} {direction}"))
                })
                .collect::<StorageResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(to_i64(limit)?));
            if options.offset > 0 {
                sql.push_str(" OFFSET ?");
                params.push(SqlValue::Integer(to_i64(options.offset)?));
            }
        } else if options.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(SqlValue::Integer(to_i64(options.offset)?));
        }

        self.query_rows(&sql, params)
    }

    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {} WHERE ", quote(table)?);
        render_filter(filter, &mut sql, &mut params)?;
        trace!("event=sql_query module=storage backend=sqlite sql={sql}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn insert(&self, table: &str, row: &Row) -> StorageResult<()> {
        if row.is_empty() {
            self.execute(&format!("INSERT INTO {} DEFAULT VALUES", quote(table)?), Vec::new())?;
            return Ok(());
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (column, value) in row {
            columns.push(quote(column)?);
            params.push(to_sql_value(value)?);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(table)?,
            columns.join(", ")
        );
        self.execute(&sql, params)?;
        Ok(())
    }

    fn update(&self, table: &str, data: &Row, filter: &Filter) -> StorageResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut assignments = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len());
        for (column, value) in data {
            assignments.push(format!("{} = ?", quote(column)?));
            params.push(to_sql_value(value)?);
        }
        let mut sql = format!(
            "UPDATE {} SET {} WHERE ",
            quote(table)?,
            assignments.join(", ")
        );
        render_filter(filter, &mut sql, &mut params)?;
        self.execute(&sql, params)
    }

    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {} WHERE ", quote(table)?);
        render_filter(filter, &mut sql, &mut params)?;
        self.execute(&sql, params)
    }

    fn migrator(&self) -> Option<&dyn Migrator> {
        Some(self)
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>,
    {
        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME};"))
            .map_err(StorageError::from)?;

        match work() {
            Ok(value) => {
                if let Err(err) = self
                    .conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME};"))
                {
                    self.rollback_savepoint();
                    return Err(StorageError::from(err).into());
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback_savepoint();
                Err(err)
            }
        }
    }
}

impl SqliteStorage<'_> {
    fn rollback_savepoint(&self) {
        if let Err(err) = self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {SAVEPOINT_NAME}; RELEASE SAVEPOINT {SAVEPOINT_NAME};"
        )) {
            warn!(
                "event=savepoint_rollback module=storage backend=sqlite status=error error={err}"
            );
        }
    }
}

impl Migrator for SqliteStorage<'_> {
    fn has_table(&self, table: &str) -> StorageResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> StorageResult<()> {
        let definitions = columns
            .iter()
            .map(|column| -> StorageResult<String> {
                let null = if column.nullable { "" } else { " NOT NULL" };
                Ok(format!(
                    "{} {}{null}",
                    quote(&column.name)?,
                    sql_type(column.field_type)
                ))
            })
            .collect::<StorageResult<Vec<_>>>()?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(table)?,
            definitions.join(", ")
        );
        self.execute(&sql, Vec::new())?;
        Ok(())
    }

    fn has_column(&self, table: &str, column: &str) -> StorageResult<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({});", quote(table)?))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let current: String = row.get(1)?;
            if current == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> StorageResult<()> {
        // SQLite cannot add a NOT NULL column without a default.
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote(table)?,
            quote(&column.name)?,
            sql_type(column.field_type)
        );
        self.execute(&sql, Vec::new())?;
        Ok(())
    }

    fn has_index(&self, table: &str, index: &str) -> StorageResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'index' AND name = ?1 AND tbl_name = ?2
            );",
            [index, table],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn create_index(&self, table: &str, index: &IndexDef) -> StorageResult<()> {
        let columns = index
            .columns
            .iter()
            .map(|column| quote(column))
            .collect::<StorageResult<Vec<_>>>()?;
        let unique = if index.unique { "UNIQUE " } else { "" };
        let sql = format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&index.name)?,
            quote(table)?,
            columns.join(", ")
        );
        self.execute(&sql, Vec::new())?;
        Ok(())
    }
}

fn quote(identifier: &str) -> StorageResult<String> {
    if !is_valid_identifier(identifier) {
        return Err(StorageError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(format!("\"{identifier}\""))
}

fn render_filter(filter: &Filter, sql: &mut String, params: &mut Vec<SqlValue>) -> StorageResult<()> {
    match filter {
        Filter::All => sql.push_str("1 = 1"),
        Filter::Eq(column, Value::Null) | Filter::IsNull(column) => {
            sql.push_str(&format!("{} IS NULL", quote(column)?));
        }
        Filter::Eq(column, value) => {
            sql.push_str(&format!("{} = ?", quote(column)?));
            params.push(to_sql_value(value)?);
        }
        Filter::In(_, values) if values.is_empty() => sql.push_str("0 = 1"),
        Filter::In(column, values) => {
            let placeholders = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!("{} IN ({placeholders})", quote(column)?));
            for value in values {
                params.push(to_sql_value(value)?);
            }
        }
        Filter::InTuples { tuples, .. } if tuples.is_empty() => sql.push_str("0 = 1"),
        Filter::InTuples { columns, tuples } => render_tuples(columns, tuples, sql, params)?,
        Filter::And(parts) => render_group(parts, " AND ", "1 = 1", sql, params)?,
        Filter::Or(parts) => render_group(parts, " OR ", "0 = 1", sql, params)?,
        Filter::Raw { sql: raw, params: raw_params } => {
            sql.push('(');
            sql.push_str(raw);
            sql.push(')');
            for value in raw_params {
                params.push(to_sql_value(value)?);
            }
        }
    }
    Ok(())
}

fn render_tuples(
    columns: &[String],
    tuples: &[Vec<Value>],
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> StorageResult<()> {
    let quoted = columns
        .iter()
        .map(|column| quote(column))
        .collect::<StorageResult<Vec<_>>>()?;
    let row = format!("({})", vec!["?"; columns.len()].join(", "));

    sql.push_str(&format!("({}) IN (VALUES ", quoted.join(", ")));
    for (index, tuple) in tuples.iter().enumerate() {
        if tuple.len() != columns.len() {
            return Err(StorageError::InvalidData(format!(
                "key tuple has {} values for {} columns",
                tuple.len(),
                columns.len()
            )));
        }
        if index > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&row);
        for value in tuple {
            params.push(to_sql_value(value)?);
        }
    }
    sql.push(')');
    Ok(())
}

fn render_group(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> StorageResult<()> {
    if parts.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    sql.push('(');
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            sql.push_str(separator);
        }
        render_filter(part, sql, params)?;
    }
    sql.push(')');
    Ok(())
}

fn to_sql_value(value: &Value) -> StorageResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(value) => Ok(SqlValue::Integer(i64::from(*value))),
        Value::Int(value) => Ok(SqlValue::Integer(*value)),
        Value::Float(value) => Ok(SqlValue::Real(*value)),
        Value::Text(value) => Ok(SqlValue::Text(value.clone())),
        Value::Bytes(value) => Ok(SqlValue::Blob(value.clone())),
        Value::Map(_) | Value::List(_) => Err(StorageError::InvalidData(
            "nested map/list values cannot be bound as sqlite parameters".to_string(),
        )),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Int(value),
        ValueRef::Real(value) => Value::Float(value),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer
        | FieldType::UnsignedInteger
        | FieldType::Bool
        | FieldType::Timestamp => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Text | FieldType::Uuid => "TEXT",
        FieldType::Bytes => "BLOB",
    }
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("paging value {value} exceeds i64")))
}

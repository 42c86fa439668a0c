//! PostgreSQL backend: document and index-row tables in a schema named from
//! `BLUEPRINT_SCHEMA` env (default `blueprint`).

use crate::contract::ResourceContract;
use crate::error::EngineError;
use crate::index::{self, IndexPredicate, IndexRow, IndexValue};
use crate::store::{DocumentStore, IndexService, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Schema name for engine tables. From env `BLUEPRINT_SCHEMA`, default
/// `blueprint`. Must be a valid PostgreSQL identifier.
pub fn engine_schema() -> String {
    std::env::var("BLUEPRINT_SCHEMA").unwrap_or_else(|_| "blueprint".into())
}

fn qualified(table: &str) -> String {
    format!("{}.{}", engine_schema(), table)
}

/// Create the schema if needed, then the `documents` and `index_rows` tables.
/// Call once before constructing a [`PgStore`].
pub async fn ensure_engine_tables(pool: &PgPool) -> Result<(), EngineError> {
    let schema = engine_schema();
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(pool)
        .await?;

    let documents = qualified("documents");
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            resource TEXT NOT NULL,
            id TEXT NOT NULL,
            document JSONB NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            version TEXT NOT NULL,
            PRIMARY KEY (resource, id)
        )
        "#,
        documents
    );
    sqlx::query(&ddl).execute(pool).await?;

    let index_rows = qualified("index_rows");
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            resource TEXT NOT NULL,
            record_id TEXT NOT NULL,
            field TEXT NOT NULL,
            text_value TEXT,
            number_value DOUBLE PRECISION,
            timestamp_value TIMESTAMPTZ,
            flag_value BOOLEAN,
            guid_value UUID,
            PRIMARY KEY (resource, record_id, field)
        )
        "#,
        index_rows
    );
    sqlx::query(&ddl).execute(pool).await?;

    let lookup = format!(
        "CREATE INDEX IF NOT EXISTS ix_index_rows_lookup ON {} (resource, field)",
        index_rows
    );
    sqlx::query(&lookup).execute(pool).await?;
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn replace_rows(
        tx: &mut sqlx::PgConnection,
        resource: &str,
        id: &str,
        rows: &[IndexRow],
    ) -> Result<(), EngineError> {
        let table = qualified("index_rows");
        sqlx::query(&format!("DELETE FROM {} WHERE resource = $1 AND record_id = $2", table))
            .bind(resource)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let insert = format!(
            "INSERT INTO {} (resource, record_id, field, text_value, number_value, timestamp_value, flag_value, guid_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            table
        );
        for row in rows {
            let (mut text, mut number, mut timestamp, mut flag, mut guid) =
                (None::<String>, None::<f64>, None::<DateTime<Utc>>, None::<bool>, None::<Uuid>);
            match &row.value {
                IndexValue::Text(s) => text = Some(s.clone()),
                IndexValue::Number(n) => number = Some(*n),
                IndexValue::Timestamp(t) => timestamp = Some(*t),
                IndexValue::Flag(b) => flag = Some(*b),
                IndexValue::Id(u) => guid = Some(*u),
            }
            sqlx::query(&insert)
                .bind(resource)
                .bind(id)
                .bind(&row.field)
                .bind(text)
                .bind(number)
                .bind(timestamp)
                .bind(flag)
                .bind(guid)
                .execute(&mut *tx)
                .await?;
        }
        Ok(())
    }

    async fn ids_compare(
        &self,
        resource: &str,
        field: &str,
        op: &str,
        operand: &IndexValue,
    ) -> Result<HashSet<String>, EngineError> {
        let sql = format!(
            "SELECT i.record_id FROM {} i JOIN {} d ON d.resource = i.resource AND d.id = i.record_id \
             WHERE i.resource = $1 AND i.field = $2 AND NOT d.deleted AND i.{} {} $3",
            qualified("index_rows"),
            qualified("documents"),
            slot_column(operand),
            op
        );
        tracing::debug!(sql = %sql, "index query");
        let q = sqlx::query_as::<_, (String,)>(&sql).bind(resource.to_string()).bind(field.to_string());
        let rows = match operand {
            IndexValue::Text(s) => q.bind(s.clone()).fetch_all(&self.pool).await?,
            IndexValue::Number(n) => q.bind(*n).fetch_all(&self.pool).await?,
            IndexValue::Timestamp(t) => q.bind(*t).fetch_all(&self.pool).await?,
            IndexValue::Flag(b) => q.bind(*b).fetch_all(&self.pool).await?,
            IndexValue::Id(u) => q.bind(*u).fetch_all(&self.pool).await?,
        };
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn ids_like(
        &self,
        resource: &str,
        field: &str,
        pattern: String,
    ) -> Result<HashSet<String>, EngineError> {
        let sql = format!(
            "SELECT i.record_id FROM {} i JOIN {} d ON d.resource = i.resource AND d.id = i.record_id \
             WHERE i.resource = $1 AND i.field = $2 AND NOT d.deleted AND i.text_value ILIKE $3",
            qualified("index_rows"),
            qualified("documents"),
        );
        tracing::debug!(sql = %sql, "index query");
        let rows = sqlx::query_as::<_, (String,)>(&sql)
            .bind(resource.to_string())
            .bind(field.to_string())
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn ids_plain(&self, sql: String, resource: &str, field: &str) -> Result<HashSet<String>, EngineError> {
        tracing::debug!(sql = %sql, "index query");
        let rows = sqlx::query_as::<_, (String,)>(&sql)
            .bind(resource.to_string())
            .bind(field.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn slot_column(value: &IndexValue) -> &'static str {
    match value {
        IndexValue::Text(_) => "text_value",
        IndexValue::Number(_) => "number_value",
        IndexValue::Timestamp(_) => "timestamp_value",
        IndexValue::Flag(_) => "flag_value",
        IndexValue::Id(_) => "guid_value",
    }
}

/// Escape `%`, `_`, and `\` so a user term matches literally inside LIKE.
fn like_escape(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, sqlx::Error> {
    let document: Value = row.try_get("document")?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        resource: row.try_get("resource")?,
        document: document.as_object().cloned().unwrap_or_default(),
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

const RECORD_COLUMNS: &str = "resource, id, document, deleted, created_at, updated_at, version";

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE resource = $1 AND id = $2 AND NOT deleted",
            RECORD_COLUMNS,
            qualified("documents")
        );
        let row = sqlx::query(&sql).bind(resource).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| record_from_row(&r)).transpose().map_err(EngineError::from)
    }

    async fn get_raw(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE resource = $1 AND id = $2",
            RECORD_COLUMNS,
            qualified("documents")
        );
        let row = sqlx::query(&sql).bind(resource).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| record_from_row(&r)).transpose().map_err(EngineError::from)
    }

    async fn list(
        &self,
        resource: &str,
        candidates: Option<&HashSet<String>>,
    ) -> Result<Vec<StoredRecord>, EngineError> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE resource = $1 AND NOT deleted",
            RECORD_COLUMNS,
            qualified("documents")
        );
        let rows = if let Some(ids) = candidates {
            sql.push_str(" AND id = ANY($2)");
            let ids: Vec<String> = ids.iter().cloned().collect();
            sqlx::query(&sql).bind(resource).bind(ids).fetch_all(&self.pool).await?
        } else {
            sqlx::query(&sql).bind(resource).fetch_all(&self.pool).await?
        };
        rows.iter().map(|r| record_from_row(r).map_err(EngineError::from)).collect()
    }

    async fn upsert(
        &self,
        resource: &str,
        id: &str,
        document: Map<String, Value>,
        index_rows: Vec<IndexRow>,
        expected_version: Option<&str>,
    ) -> Result<StoredRecord, EngineError> {
        let documents = qualified("documents");
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, DateTime<Utc>)> = sqlx::query_as(&format!(
            "SELECT version, created_at FROM {} WHERE resource = $1 AND id = $2 FOR UPDATE",
            documents
        ))
        .bind(resource)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(expected) = expected_version {
            let matches = current.as_ref().map(|(v, _)| v == expected).unwrap_or(false);
            if !matches {
                return Err(EngineError::ConcurrencyConflict {
                    resource: resource.to_string(),
                    id: id.to_string(),
                });
            }
        }

        let now = Utc::now();
        let created_at = current.map(|(_, c)| c).unwrap_or(now);
        let version = Uuid::new_v4().to_string();
        let sql = format!(
            "INSERT INTO {} (resource, id, document, deleted, created_at, updated_at, version) \
             VALUES ($1, $2, $3, FALSE, $4, $5, $6) \
             ON CONFLICT (resource, id) DO UPDATE SET \
             document = EXCLUDED.document, deleted = FALSE, updated_at = EXCLUDED.updated_at, version = EXCLUDED.version",
            documents
        );
        tracing::debug!(sql = %sql, resource = %resource, id = %id, "upsert");
        sqlx::query(&sql)
            .bind(resource)
            .bind(id)
            .bind(Value::Object(document.clone()))
            .bind(created_at)
            .bind(now)
            .bind(&version)
            .execute(&mut *tx)
            .await?;

        Self::replace_rows(&mut tx, resource, id, &index_rows).await?;
        tx.commit().await?;

        Ok(StoredRecord {
            id: id.to_string(),
            resource: resource.to_string(),
            document,
            deleted: false,
            created_at,
            updated_at: now,
            version,
        })
    }

    async fn soft_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError> {
        let sql = format!(
            "UPDATE {} SET deleted = TRUE WHERE resource = $1 AND id = $2 AND NOT deleted",
            qualified("documents")
        );
        let result = sqlx::query(&sql).bind(resource).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE resource = $1 AND record_id = $2",
            qualified("index_rows")
        ))
        .bind(resource)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(&format!("DELETE FROM {} WHERE resource = $1 AND id = $2", qualified("documents")))
            .bind(resource)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl IndexService for PgStore {
    async fn rebuild_index(
        &self,
        resource: &str,
        id: &str,
        contract: &ResourceContract,
        document: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let rows = index::project_rows(contract, document);
        let mut tx = self.pool.begin().await?;
        Self::replace_rows(&mut tx, resource, id, &rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ids_matching(
        &self,
        resource: &str,
        field: &str,
        predicate: &IndexPredicate,
    ) -> Result<HashSet<String>, EngineError> {
        match predicate {
            IndexPredicate::Eq(v) => self.ids_compare(resource, field, "=", v).await,
            IndexPredicate::Neq(v) => self.ids_compare(resource, field, "<>", v).await,
            IndexPredicate::Gt(v) => self.ids_compare(resource, field, ">", v).await,
            IndexPredicate::Gte(v) => self.ids_compare(resource, field, ">=", v).await,
            IndexPredicate::Lt(v) => self.ids_compare(resource, field, "<", v).await,
            IndexPredicate::Lte(v) => self.ids_compare(resource, field, "<=", v).await,
            IndexPredicate::Contains(t) => {
                self.ids_like(resource, field, format!("%{}%", like_escape(t))).await
            }
            IndexPredicate::StartsWith(t) => {
                self.ids_like(resource, field, format!("{}%", like_escape(t))).await
            }
            IndexPredicate::EndsWith(t) => {
                self.ids_like(resource, field, format!("%{}", like_escape(t))).await
            }
            IndexPredicate::In(values) => {
                // Operands parse from one field type, but a mixed set still
                // resolves correctly: one query per slot, results unioned.
                let mut out = HashSet::new();
                for v in values {
                    out.extend(self.ids_compare(resource, field, "=", v).await?);
                }
                Ok(out)
            }
            IndexPredicate::IsNull(true) => {
                let sql = format!(
                    "SELECT d.id FROM {} d WHERE d.resource = $1 AND NOT d.deleted AND NOT EXISTS \
                     (SELECT 1 FROM {} i WHERE i.resource = d.resource AND i.record_id = d.id AND i.field = $2)",
                    qualified("documents"),
                    qualified("index_rows"),
                );
                self.ids_plain(sql, resource, field).await
            }
            IndexPredicate::IsNull(false) => {
                let sql = format!(
                    "SELECT i.record_id FROM {} i JOIN {} d ON d.resource = i.resource AND d.id = i.record_id \
                     WHERE i.resource = $1 AND i.field = $2 AND NOT d.deleted",
                    qualified("index_rows"),
                    qualified("documents"),
                );
                self.ids_plain(sql, resource, field).await
            }
        }
    }

    async fn sort_keys(
        &self,
        resource: &str,
        field: &str,
        ids: &HashSet<String>,
    ) -> Result<HashMap<String, IndexValue>, EngineError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT record_id, text_value, number_value, timestamp_value, flag_value, guid_value \
             FROM {} WHERE resource = $1 AND field = $2 AND record_id = ANY($3)",
            qualified("index_rows")
        );
        let id_list: Vec<String> = ids.iter().cloned().collect();
        let rows = sqlx::query(&sql)
            .bind(resource)
            .bind(field)
            .bind(id_list)
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let record_id: String = row.try_get("record_id").map_err(EngineError::from)?;
            if let Some(value) = value_from_slots(&row)? {
                out.insert(record_id, value);
            }
        }
        Ok(out)
    }
}

fn value_from_slots(row: &PgRow) -> Result<Option<IndexValue>, EngineError> {
    if let Some(s) = row.try_get::<Option<String>, _>("text_value").map_err(EngineError::from)? {
        return Ok(Some(IndexValue::Text(s)));
    }
    if let Some(n) = row.try_get::<Option<f64>, _>("number_value").map_err(EngineError::from)? {
        return Ok(Some(IndexValue::Number(n)));
    }
    if let Some(t) = row.try_get::<Option<DateTime<Utc>>, _>("timestamp_value").map_err(EngineError::from)? {
        return Ok(Some(IndexValue::Timestamp(t)));
    }
    if let Some(b) = row.try_get::<Option<bool>, _>("flag_value").map_err(EngineError::from)? {
        return Ok(Some(IndexValue::Flag(b)));
    }
    if let Some(u) = row.try_get::<Option<Uuid>, _>("guid_value").map_err(EngineError::from)? {
        return Ok(Some(IndexValue::Id(u)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::like_escape;

    #[test]
    fn like_escape_keeps_wildcards_literal() {
        assert_eq!(like_escape("50%_done\\x"), "50\\%\\_done\\\\x");
    }
}

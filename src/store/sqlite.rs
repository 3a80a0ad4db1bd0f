use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use super::{CURRENT_SCHEMA, Document, EntityStore, Filter, UpdateOutcome};
use crate::error::AppError;
use crate::models::{EntityKind, Pid};

/// Entity store keeping every collection in one SQLite `documents` table,
/// one JSON body per row.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        let store = Self::new(pool);
        store.apply_schema().await?;
        Ok(store)
    }

    /// A private in-memory database. The single connection is kept alive for
    /// the life of the pool so the data is not dropped between queries.
    pub async fn in_memory() -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.apply_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self))]
    pub async fn apply_schema(&self) -> Result<(), AppError> {
        info!("Applying document schema");
        sqlx::raw_sql(CURRENT_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn push_conditions(
    builder: &mut QueryBuilder<'_, Sqlite>,
    filter: &Filter,
) -> Result<(), AppError> {
    for (field, value) in filter.conditions() {
        builder.push(format!(" AND json_extract(body, '$.{}')", field));

        match value {
            Value::Null => {
                builder.push(" IS NULL");
            }
            Value::Bool(flag) => {
                builder.push(" = ").push_bind(i64::from(*flag));
            }
            Value::Number(number) => match number.as_i64() {
                Some(int) => {
                    builder.push(" = ").push_bind(int);
                }
                None => {
                    builder.push(" = ").push_bind(number.as_f64().unwrap_or_default());
                }
            },
            Value::String(text) => {
                builder.push(" = ").push_bind(text.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(AppError::Internal(format!(
                    "Unsupported filter value for field '{}'",
                    field
                )));
            }
        }
    }

    Ok(())
}

fn parse_body(body: &str) -> Result<Document, AppError> {
    Ok(serde_json::from_str(body)?)
}

#[rocket::async_trait]
impl EntityStore for SqliteStore {
    async fn find_by_id(&self, kind: EntityKind, pid: Pid) -> Result<Option<Document>, AppError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE kind = ? AND pid = ?")
                .bind(kind.as_str())
                .bind(pid.to_string())
                .fetch_optional(&self.pool)
                .await?;

        body.as_deref().map(parse_body).transpose()
    }

    async fn find_by_filter(
        &self,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<Vec<Document>, AppError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT body FROM documents WHERE kind = ");
        builder.push_bind(kind.as_str());
        push_conditions(&mut builder, filter)?;
        builder.push(" ORDER BY seq");

        let bodies: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        bodies.iter().map(|body| parse_body(body)).collect()
    }

    async fn insert(&self, kind: EntityKind, mut doc: Document) -> Result<Pid, AppError> {
        let pid = Pid::generate();
        doc.insert("pid".to_string(), pid.into());
        let body = serde_json::to_string(&doc)?;

        sqlx::query("INSERT INTO documents (pid, kind, body) VALUES (?, ?, ?)")
            .bind(pid.to_string())
            .bind(kind.as_str())
            .bind(body)
            .execute(&self.pool)
            .await?;

        debug!(kind = %kind.as_str(), pid = %pid, "Inserted document");
        Ok(pid)
    }

    async fn update_by_id(
        &self,
        kind: EntityKind,
        pid: Pid,
        changes: Document,
    ) -> Result<UpdateOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE kind = ? AND pid = ?")
                .bind(kind.as_str())
                .bind(pid.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let Some(body) = body else {
            return Ok(UpdateOutcome::default());
        };

        let mut doc = parse_body(&body)?;
        let mut modified = false;

        for (field, value) in changes {
            if field == "pid" {
                continue;
            }
            if doc.get(&field) != Some(&value) {
                doc.insert(field, value);
                modified = true;
            }
        }

        if modified {
            sqlx::query("UPDATE documents SET body = ? WHERE kind = ? AND pid = ?")
                .bind(serde_json::to_string(&doc)?)
                .bind(kind.as_str())
                .bind(pid.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(modified),
        })
    }

    async fn delete_by_filter(&self, kind: EntityKind, filter: &Filter) -> Result<u64, AppError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM documents WHERE kind = ");
        builder.push_bind(kind.as_str());
        push_conditions(&mut builder, filter)?;

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

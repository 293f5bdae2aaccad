//! PostgreSQL document store.
//!
//! Every collection lives in one `documents` table keyed by `(collection, id)`
//! with a JSONB body. Equality filters are pushed down as JSONB containment;
//! ordering is applied in process so it matches the in-memory backend exactly.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::{
    generate_id, CollectionPath, DocPath, Document, DocumentModifier,
    DocumentStore, QueryFilter, StoreError, StoreResult,
};

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Wraps an existing pool and makes sure the schema exists.
    pub async fn connect(pool: PgPool) -> StoreResult<Self> {
        crate::db::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn containment(filter: &QueryFilter) -> Value {
    let mut obj = Map::new();
    for (field, value) in &filter.equals {
        obj.insert(field.clone(), value.clone());
    }
    Value::Object(obj)
}

fn require_object(data: &Value) -> StoreResult<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(StoreError::Malformed("document body must be an object".to_string()))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(&self, path: &DocPath) -> StoreResult<Document> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(path.collection.as_str())
                .bind(&path.id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(data,)| Document::new(path.id.clone(), data))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>> {
        let rows: Vec<(String, Value)> = sqlx::query_as(
            "SELECT id, data FROM documents WHERE collection = $1 AND data @> $2 ORDER BY id",
        )
        .bind(collection.as_str())
        .bind(containment(filter))
        .fetch_all(&self.pool)
        .await?;

        let mut docs: Vec<Document> = rows
            .into_iter()
            .map(|(id, data)| Document::new(id, data))
            .collect();
        filter.sort(&mut docs);
        Ok(docs)
    }

    async fn add_document(&self, collection: &CollectionPath, data: Value) -> StoreResult<DocPath> {
        require_object(&data)?;
        let id = generate_id();
        sqlx::query("INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(collection.child(id))
    }

    async fn set_document(&self, path: &DocPath, data: Value, merge: bool) -> StoreResult<()> {
        require_object(&data)?;
        let sql = if merge {
            r#"
            INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
            ON CONFLICT (collection, id)
            DO UPDATE SET data = documents.data || EXCLUDED.data, updated_at = NOW()
            "#
        } else {
            r#"
            INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
            ON CONFLICT (collection, id)
            DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            "#
        };
        sqlx::query(sql)
            .bind(path.collection.as_str())
            .bind(&path.id)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_document(&self, path: &DocPath, fields: Map<String, Value>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET data = data || $3, updated_at = NOW() WHERE collection = $1 AND id = $2",
        )
        .bind(path.collection.as_str())
        .bind(&path.id)
        .bind(Value::Object(fields))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn delete_document(&self, path: &DocPath) -> StoreResult<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(path.collection.as_str())
            .bind(&path.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_delete(&self, paths: &[DocPath]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(path.collection.as_str())
                .bind(&path.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn modify_document(
        &self,
        path: &DocPath,
        modify: DocumentModifier,
    ) -> StoreResult<Value> {
        let mut tx = self.pool.begin().await?;
        // `FOR UPDATE` locks nothing while the row is absent; serialize first
        // writes to the same path on a transaction-scoped advisory lock.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || '/' || $2, 0))")
            .bind(path.collection.as_str())
            .bind(&path.id)
            .execute(&mut *tx)
            .await?;
        let current: Option<(Value,)> = sqlx::query_as(
            "SELECT data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(path.collection.as_str())
        .bind(&path.id)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping `tx` on error rolls back.
        let next = modify(current.map(|(v,)| v))?;
        require_object(&next)?;

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
            ON CONFLICT (collection, id)
            DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(path.collection.as_str())
        .bind(&path.id)
        .bind(&next)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn health_check(&self) -> StoreResult<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

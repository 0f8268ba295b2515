use serde_json::json;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{source::Source, DEFAULT_TENANT};

/// Candidate list width for the HNSW search operator.
const EF_SEARCH: usize = 100;

stored_object!(TextChunk, "text_chunk", {
    source_id: String,
    tenant_id: String,
    title: String,
    text: String,
    embedding: Vec<f32>
});

/// One retrieval hit, scored by cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub source: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

impl TextChunk {
    pub fn new(
        source_id: String,
        tenant_id: String,
        title: String,
        text: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            tenant_id,
            title,
            text,
            embedding,
        }
    }

    /// Top-k similarity search, isolated to `tenant_id`. Chunks persisted
    /// without a tenant count as belonging to the reserved `demo` tenant.
    pub async fn search(
        db: &SurrealDbClient,
        tenant_id: &str,
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "serde_helpers::deserialize_flexible_id")]
            id: String,
            text: String,
            title: String,
            source_id: String,
            #[serde(deserialize_with = "serde_helpers::deserialize_datetime")]
            created_at: DateTime<Utc>,
            score: f32,
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT
                id,
                text,
                title,
                source_id,
                created_at,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {table}
            WHERE (tenant_id ?? $fallback) = $tenant
              AND embedding <|{k},{ef}|> $embedding
            ORDER BY score DESC
            LIMIT {k};
            "#,
            table = Self::table_name(),
            k = k,
            ef = EF_SEARCH
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_vector))
            .bind(("tenant", tenant_id.to_string()))
            .bind(("fallback", DEFAULT_TENANT.to_string()))
            .await?;

        let rows: Vec<Row> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| SearchHit {
                id: r.id,
                text: r.text,
                source: r.title,
                score: r.score,
                metadata: json!({
                    "source_id": r.source_id,
                    "created_at": r.created_at.to_rfc3339(),
                }),
            })
            .collect())
    }

    /// Persists a new source and all of its chunks in one transaction, so a
    /// failed ingest leaves nothing behind. Returns the fresh source id.
    pub async fn upsert_chunks(
        db: &SurrealDbClient,
        tenant_id: &str,
        title: &str,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        expected_dimension: usize,
    ) -> Result<String, AppError> {
        if chunks.len() != embeddings.len() {
            return Err(AppError::Validation(format!(
                "chunk/embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected_dimension) {
            return Err(AppError::Validation(format!(
                "embedding dimension {} does not match the configured {expected_dimension}",
                bad.len()
            )));
        }

        let source = Source::new(tenant_id.to_string(), title.to_string(), chunks.len());
        let source_id = source.id.clone();

        let rows: Vec<TextChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| {
                TextChunk::new(
                    source_id.clone(),
                    tenant_id.to_string(),
                    title.to_string(),
                    text,
                    embedding,
                )
            })
            .collect();

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "CREATE type::thing('{source_table}', $source_id) CONTENT $source;",
                source_table = Source::table_name(),
            ))
            .query(format!(
                "INSERT INTO {chunk_table} $chunks;",
                chunk_table = Self::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("source_id", source_id.clone()))
            .bind(("source", source))
            .bind(("chunks", rows))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(source_id)
    }

    pub async fn delete_by_source_id(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(format!(
            "DELETE {} WHERE source_id = $source_id",
            Self::table_name()
        ))
        .bind(("source_id", source_id.to_string()))
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db(dimension: usize) -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized("idx_chunk_embedding", dimension)
            .await
            .expect("Failed to initialize schema");
        db
    }

    #[tokio::test]
    async fn test_upsert_creates_source_and_chunks() {
        let db = test_db(3).await;

        let source_id = TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Doc1",
            vec!["first chunk".to_string(), "second chunk".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            3,
        )
        .await
        .expect("upsert should succeed");

        let source: Option<Source> = db.get_item(&source_id).await.expect("get source");
        let source = source.expect("source should exist");
        assert_eq!(source.tenant_id, "tenant_a");
        assert_eq!(source.title, "Doc1");
        assert_eq!(source.chunk_count, 2);

        let chunks: Vec<TextChunk> = db.get_all_stored_items().await.expect("get chunks");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.source_id == source_id));
        assert!(chunks.iter().all(|c| c.tenant_id == "tenant_a"));
    }

    #[tokio::test]
    async fn test_upsert_rejects_count_mismatch() {
        let db = test_db(3).await;

        let result = TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Doc1",
            vec!["only chunk".to_string()],
            vec![],
            3,
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));

        let chunks: Vec<TextChunk> = db.get_all_stored_items().await.expect("get chunks");
        assert!(chunks.is_empty(), "failed upsert must persist nothing");
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let db = test_db(3).await;

        let result = TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Doc1",
            vec!["chunk".to_string()],
            vec![vec![1.0, 0.0]],
            3,
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let db = test_db(3).await;

        TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Doc1",
            vec!["chunk one".to_string(), "chunk two".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            3,
        )
        .await
        .expect("upsert");

        let hits = TextChunk::search(&db, "tenant_a", vec![0.0, 1.0, 0.0], 2)
            .await
            .expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "chunk two");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].source, "Doc1");
    }

    #[tokio::test]
    async fn test_search_is_tenant_isolated() {
        let db = test_db(3).await;

        TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "DocA",
            vec!["tenant a chunk".to_string()],
            vec![vec![1.0, 0.0, 0.0]],
            3,
        )
        .await
        .expect("upsert a");
        TextChunk::upsert_chunks(
            &db,
            "tenant_b",
            "DocB",
            vec!["tenant b chunk".to_string()],
            vec![vec![1.0, 0.0, 0.0]],
            3,
        )
        .await
        .expect("upsert b");

        let hits = TextChunk::search(&db, "tenant_a", vec![1.0, 0.0, 0.0], 10)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "tenant a chunk");

        let hits_other = TextChunk::search(&db, "tenant_c", vec![1.0, 0.0, 0.0], 10)
            .await
            .expect("search");
        assert!(hits_other.is_empty());
    }

    #[tokio::test]
    async fn test_search_treats_missing_tenant_as_demo() {
        let db = test_db(3).await;

        // A legacy chunk persisted without a tenant.
        db.client
            .query(
                "CREATE text_chunk CONTENT {
                    source_id: 'legacy',
                    title: 'Legacy',
                    text: 'legacy chunk',
                    embedding: [1.0, 0.0, 0.0],
                    created_at: time::now(),
                    updated_at: time::now()
                };",
            )
            .await
            .expect("raw create");

        let hits = TextChunk::search(&db, "demo", vec![1.0, 0.0, 0.0], 5)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "legacy chunk");

        let hits_other = TextChunk::search(&db, "other", vec![1.0, 0.0, 0.0], 5)
            .await
            .expect("search");
        assert!(hits_other.is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let db = test_db(3).await;

        let texts: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();
        let embeddings: Vec<Vec<f32>> = (0..5).map(|i| vec![1.0, i as f32 * 0.1, 0.0]).collect();

        TextChunk::upsert_chunks(&db, "tenant_a", "Doc", texts, embeddings, 3)
            .await
            .expect("upsert");

        let hits = TextChunk::search(&db, "tenant_a", vec![1.0, 0.0, 0.0], 3)
            .await
            .expect("search");
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_by_source_id() {
        let db = test_db(3).await;

        let kept = TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Keep",
            vec!["kept chunk".to_string()],
            vec![vec![1.0, 0.0, 0.0]],
            3,
        )
        .await
        .expect("upsert kept");
        let dropped = TextChunk::upsert_chunks(
            &db,
            "tenant_a",
            "Drop",
            vec!["dropped chunk".to_string()],
            vec![vec![0.0, 1.0, 0.0]],
            3,
        )
        .await
        .expect("upsert dropped");

        TextChunk::delete_by_source_id(&dropped, &db)
            .await
            .expect("delete");

        let remaining: Vec<TextChunk> = db.get_all_stored_items().await.expect("get chunks");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_id, kept);
    }
}

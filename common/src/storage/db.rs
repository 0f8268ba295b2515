use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // The embedded engines have no root user to sign in as
        if !address.starts_with("mem:") {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the vector index and the lookup indexes every query path
    /// relies on. The HNSW index is redefined so a changed embedding
    /// dimension takes effect on restart.
    pub async fn ensure_initialized(
        &self,
        vector_index_name: &str,
        embedding_dimension: usize,
    ) -> Result<(), AppError> {
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE {vector_index_name} ON text_chunk FIELDS embedding HNSW DIMENSION {embedding_dimension}"
            ))
            .await?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_tenant ON text_chunk FIELDS tenant_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_source_tenant ON source FIELDS tenant_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_message_conversation ON message FIELDS conversation_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_tenant ON ingest_job FIELDS tenant_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_user ON ingest_job FIELDS user_id")
            .await?;

        Ok(())
    }

    /// Operation to store an object, requires the struct to implement StoredObject
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to retrieve all objects from a table
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to delete a single object by its ID
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

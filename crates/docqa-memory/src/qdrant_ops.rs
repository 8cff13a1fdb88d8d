//! Qdrant-backed [`VectorStore`] for durable mode.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, value::Kind,
};
use tokio::sync::Mutex;

use crate::vector_store::{
    ChunkPayload, ScoredVectorPoint, VectorPoint, VectorStore, VectorStoreError, rank_points,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Thin wrapper over [`Qdrant`] holding one writer lock per collection.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
    writers: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given gRPC URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url).build().map_err(Box::new)?;
        Ok(Self {
            client,
            writers: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    fn writer(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writers.entry(collection.to_owned()).or_default())
    }

    /// Drop the lock entry for a removed collection unless it was replaced meanwhile.
    fn forget_writer(&self, collection: &str, writer: &Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        if writers.get(collection).is_some_and(|w| Arc::ptr_eq(w, writer)) {
            writers.remove(collection);
        }
    }

    /// Round-trip to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached.
    pub async fn health_check(&self) -> QdrantResult<()> {
        self.client.health_check().await.map_err(Box::new)?;
        Ok(())
    }

    /// Create a cosine collection with a keyword index on `document_id`.
    ///
    /// Idempotent: no-op if the collection already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached or collection creation fails.
    pub async fn ensure_collection(&self, collection: &str, vector_size: u64) -> QdrantResult<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
            )
            .await
            .map_err(Box::new)?;
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                collection,
                "document_id",
                FieldType::Keyword,
            ))
            .await
            .map_err(Box::new)?;
        tracing::debug!(collection, vector_size, "created Qdrant collection");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached.
    pub async fn collection_exists(&self, collection: &str) -> QdrantResult<bool> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(Box::new)
    }

    async fn upsert_chunks(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), VectorStoreError> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        let dimension = first.vector.len();
        if let Some(bad) = points.iter().find(|p| p.vector.len() != dimension) {
            return Err(VectorStoreError::Dimension {
                collection: collection.to_owned(),
                expected: dimension,
                actual: bad.vector.len(),
            });
        }

        let writer = self.writer(collection);
        let _guard = writer.lock().await;

        self.ensure_collection(collection, dimension as u64)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;

        let qdrant_points = points
            .into_iter()
            .map(|p| {
                let payload = payload_to_qdrant(&p.payload)?;
                Ok(PointStruct::new(p.id, p.vector, payload))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, qdrant_points).wait(true))
            .await
            .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
        Ok(())
    }

    async fn search_chunks(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> Result<Vec<ScoredVectorPoint>, VectorStoreError> {
        if !self
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?
        {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(collection, vector, limit).with_payload(true))
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

        let mut scored = response
            .result
            .into_iter()
            .map(scored_point_to_vector)
            .collect::<Result<Vec<_>, _>>()?;
        rank_points(&mut scored);
        Ok(scored)
    }

    async fn delete_chunks(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        let writer = self.writer(collection);
        let _guard = writer.lock().await;
        if !self
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::Delete(e.to_string()))?
        {
            return Ok(());
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(Filter::must([Condition::matches(
                        "document_id",
                        document_id.to_owned(),
                    )]))
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let writer = self.writer(collection);
        let _guard = writer.lock().await;
        if self
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?
        {
            self.client
                .delete_collection(collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        }
        self.forget_writer(collection, &writer);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        let mut names: Vec<String> = response.collections.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, collection: &str) -> Result<u64, VectorStoreError> {
        if !self
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?
        {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        Ok(response.result.map_or(0, |r| r.count))
    }
}

impl VectorStore for QdrantOps {
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.upsert_chunks(&collection, points).await })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.search_chunks(&collection, vector, limit).await })
    }

    fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let document_id = document_id.to_owned();
        Box::pin(async move { self.delete_chunks(&collection, &document_id).await })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.drop_collection(&collection).await })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move { self.collection_names().await })
    }

    fn collection_size(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.count(&collection).await })
    }

    fn backend(&self) -> &'static str {
        "qdrant"
    }
}

fn payload_to_qdrant(
    payload: &ChunkPayload,
) -> Result<HashMap<String, qdrant_client::qdrant::Value>, VectorStoreError> {
    let json = serde_json::to_value(payload)
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    serde_json::from_value(json).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn scored_point_to_vector(point: ScoredPoint) -> Result<ScoredVectorPoint, VectorStoreError> {
    let fields: serde_json::Map<String, serde_json::Value> = point
        .payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json_val = match v.kind? {
                Kind::StringValue(s) => serde_json::Value::String(s),
                Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
                Kind::DoubleValue(d) => {
                    serde_json::Number::from_f64(d).map(serde_json::Value::Number)?
                }
                Kind::BoolValue(b) => serde_json::Value::Bool(b),
                _ => return None,
            };
            Some((k, json_val))
        })
        .collect();
    let payload: ChunkPayload = serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;

    let id = match point.id.and_then(|pid| pid.point_id_options) {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    };

    Ok(ScoredVectorPoint {
        id,
        score: point.score,
        payload,
    })
}

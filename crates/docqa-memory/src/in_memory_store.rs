use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::vector_store::{
    ScoredVectorPoint, VectorPoint, VectorStore, VectorStoreError, rank_points,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Points = HashMap<String, VectorPoint>;

/// One collection: writers serialize on `write_lock` and publish a fresh
/// snapshot; readers clone the current `Arc` and never see a half-applied batch.
struct CollectionSlot {
    write_lock: Mutex<()>,
    snapshot: RwLock<Arc<Points>>,
    dimension: RwLock<Option<usize>>,
}

impl CollectionSlot {
    fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            dimension: RwLock::new(None),
        }
    }

    fn current(&self) -> Result<Arc<Points>, VectorStoreError> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&*s))
            .map_err(|e| VectorStoreError::Collection(e.to_string()))
    }

    fn publish(&self, points: Points) -> Result<(), VectorStoreError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        *guard = Arc::new(points);
        Ok(())
    }
}

/// Process-local vector index for ephemeral mode and tests.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Arc<CollectionSlot>>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, collection: &str) -> Result<Option<Arc<CollectionSlot>>, VectorStoreError> {
        let cols = self
            .collections
            .read()
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        Ok(cols.get(collection).cloned())
    }

    fn slot_or_create(&self, collection: &str) -> Result<Arc<CollectionSlot>, VectorStoreError> {
        let mut cols = self
            .collections
            .write()
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        Ok(Arc::clone(
            cols.entry(collection.to_owned())
                .or_insert_with(|| Arc::new(CollectionSlot::new())),
        ))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let slot = self.slot_or_create(&collection)?;
            let _writer = slot.write_lock.lock().await;

            let expected = {
                let mut dim = slot
                    .dimension
                    .write()
                    .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
                *dim.get_or_insert(points[0].vector.len())
            };
            if let Some(bad) = points.iter().find(|p| p.vector.len() != expected) {
                return Err(VectorStoreError::Dimension {
                    collection,
                    expected,
                    actual: bad.vector.len(),
                });
            }

            let mut next = Points::clone(&*slot.current()?);
            for p in points {
                next.insert(p.id.clone(), p);
            }
            slot.publish(next)
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let Some(slot) = self.slot(&collection)? else {
                return Ok(Vec::new());
            };
            let snapshot = slot.current()?;

            let mut scored: Vec<ScoredVectorPoint> = snapshot
                .values()
                .map(|p| ScoredVectorPoint {
                    id: p.id.clone(),
                    score: cosine_similarity(&vector, &p.vector),
                    payload: p.payload.clone(),
                })
                .collect();

            rank_points(&mut scored);
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let document_id = document_id.to_owned();
        Box::pin(async move {
            let Some(slot) = self.slot(&collection)? else {
                return Ok(());
            };
            let _writer = slot.write_lock.lock().await;
            let mut next = Points::clone(&*slot.current()?);
            next.retain(|_, p| p.payload.document_id != document_id);
            slot.publish(next)
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let removed = {
                let mut cols = self
                    .collections
                    .write()
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                cols.remove(&collection)
            };
            // Wait out an in-flight writer so the drop is not raced by a late publish.
            if let Some(slot) = removed {
                let _writer = slot.write_lock.lock().await;
            }
            Ok(())
        })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let mut names: Vec<String> = cols.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn collection_size(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            match self.slot(&collection)? {
                Some(slot) => Ok(u64::try_from(slot.current()?.len()).unwrap_or(u64::MAX)),
                None => Ok(0),
            }
        })
    }

    fn backend(&self) -> &'static str {
        "in-memory"
    }
}

//! Qdrant-backed [`VectorStore`].

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, GetPointsBuilder, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
    value::Kind,
};
use uuid::Uuid;

use crate::error::VectorStoreError;
use crate::vector_store::{
    BoxFuture, Metadata, QueryHit, VectorRecord, VectorStore, rank_hits,
};

/// Namespace for deriving point UUIDs from logical record ids.
const POINT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x1e, 0x4a, 0x2f, 0x93, 0x0b, 0x4d, 0x71, 0xa5, 0x28, 0x3e, 0x90, 0x5f, 0x12, 0xc4, 0x7d,
]);

const ID_FIELD: &str = "id";
const DOCUMENT_FIELD: &str = "document";
const METADATA_FIELD: &str = "metadata";

/// Qdrant only accepts integer or UUID point ids, so string ids are hashed
/// into a stable UUID v5 and the original id travels in the payload.
#[must_use]
pub fn point_uuid(id: &str) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, id.as_bytes()).to_string()
}

#[derive(Clone)]
pub struct QdrantStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore").finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Create a client for the Qdrant instance at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    async fn exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))
    }
}

fn record_to_point(record: VectorRecord) -> Result<PointStruct, VectorStoreError> {
    let mut body = serde_json::Map::new();
    body.insert(ID_FIELD.into(), serde_json::Value::String(record.id.clone()));
    if let Some(doc) = record.document {
        body.insert(DOCUMENT_FIELD.into(), serde_json::Value::String(doc));
    }
    body.insert(
        METADATA_FIELD.into(),
        serde_json::Value::Object(record.metadata.into_iter().collect()),
    );
    let payload: HashMap<String, QdrantValue> =
        serde_json::from_value(serde_json::Value::Object(body))?;
    Ok(PointStruct::new(point_uuid(&record.id), record.vector, payload))
}

fn kind_to_json(kind: Kind) -> serde_json::Value {
    match kind {
        Kind::NullValue(_) => serde_json::Value::Null,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::ListValue(list) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Kind::StructValue(st) => serde_json::Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

fn value_to_json(value: QdrantValue) -> serde_json::Value {
    value.kind.map_or(serde_json::Value::Null, kind_to_json)
}

fn payload_to_hit(mut payload: HashMap<String, QdrantValue>, similarity: f32) -> Option<QueryHit> {
    let id = match payload.remove(ID_FIELD)?.kind? {
        Kind::StringValue(s) => s,
        _ => return None,
    };
    let document = payload
        .remove(DOCUMENT_FIELD)
        .and_then(|v| v.kind)
        .and_then(|k| match k {
            Kind::StringValue(s) => Some(s),
            _ => None,
        });
    let metadata: Metadata = match payload.remove(METADATA_FIELD).map(value_to_json) {
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => Metadata::new(),
    };
    Some(QueryHit {
        id,
        similarity,
        document,
        metadata,
    })
}

impl VectorStore for QdrantStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if self.exists(&collection).await? {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            tracing::info!(%collection, vector_size, "created qdrant collection");
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.exists(&collection).await })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self.exists(&collection).await? {
                return Ok(());
            }
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }
            let points = records
                .into_iter()
                .map(record_to_point)
                .collect::<Result<Vec<_>, _>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self.exists(&collection).await? {
                return Ok(Vec::new());
            }
            let response = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&collection, vector, search_limit(top_k))
                        .with_payload(true),
                )
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let mut hits: Vec<QueryHit> = response
                .result
                .into_iter()
                .filter_map(|p| payload_to_hit(p.payload, p.score))
                .collect();
            rank_hits(&mut hits, usize::try_from(top_k).unwrap_or(usize::MAX));
            Ok(hits)
        })
    }

    fn get(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() || !self.exists(&collection).await? {
                return Ok(Vec::new());
            }
            let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(point_uuid(id))).collect();
            let response = self
                .client
                .get_points(GetPointsBuilder::new(&collection, point_ids).with_payload(true))
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let mut by_id: HashMap<String, QueryHit> = response
                .result
                .into_iter()
                .filter_map(|p| payload_to_hit(p.payload, 0.0))
                .map(|h| (h.id.clone(), h))
                .collect();
            Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self.exists(&collection).await? {
                return Ok(0);
            }
            let response = self
                .client
                .count(CountPointsBuilder::new(&collection).exact(true))
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            Ok(response.result.map_or(0, |r| r.count))
        })
    }
}

/// Extra points requested so that hits tied at the `top_k` boundary are
/// ordered by id locally instead of by server order.
const SEARCH_SLACK: u64 = 8;

fn search_limit(top_k: u64) -> u64 {
    top_k.saturating_mul(2).max(top_k.saturating_add(SEARCH_SLACK))
}

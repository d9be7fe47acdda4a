use crate::request::TranslogLocation;
use async_trait::async_trait;
use bytes::Bytes;

/// Errors surfaced by the shard write engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("version conflict for document '{id}': expected {expected}, current {current}")]
    VersionConflict {
        id: String,
        expected: i64,
        current: i64,
    },
    #[error("document '{id}' is missing")]
    DocumentMissing { id: String },
    #[error("document '{id}' exists but its source is not retrievable")]
    DocumentSourceMissing { id: String },
    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EngineError::VersionConflict { .. })
    }
}

/// How the expected version is interpreted by the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VersionType {
    Internal,
    External,
}

/// A live document as loaded from the shard.
#[derive(Debug, Clone, PartialEq)]
pub struct Doc {
    pub id: String,
    pub source: Option<Bytes>,
    pub version: i64,
    pub seq_no: i64,
    pub primary_term: i64,
}

/// The outcome of one engine index operation.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexResult {
    Success {
        seq_no: i64,
        version: i64,
        location: TranslogLocation,
    },
    Failure {
        error: EngineError,
        version: i64,
    },
    /// The operation introduces fields the installed mapping does not
    /// cover; the caller must push the delta to the master and retry.
    MappingUpdateRequired { delta: Bytes },
}

/// The narrow contract the executor consumes from the storage engine and
/// its translog. Implementations live with the Lucene-side engine; tests
/// substitute an in-memory shard.
#[async_trait]
pub trait ShardWriteEngine: Send + Sync {
    async fn apply_index_operation_on_primary(
        &self,
        id: &str,
        version: i64,
        version_type: VersionType,
        source: &Bytes,
        seq_no: i64,
        primary_term: i64,
        is_retry: bool,
    ) -> IndexResult;

    async fn apply_index_operation_on_replica(
        &self,
        id: &str,
        seq_no: i64,
        version: i64,
        source: &Bytes,
    ) -> IndexResult;

    /// Wrap an error which occurred outside the engine as a failed result.
    fn get_failed_index_result(&self, error: EngineError, version: i64) -> IndexResult {
        IndexResult::Failure { error, version }
    }

    async fn lookup_doc(
        &self,
        id: &str,
        version: i64,
        version_type: VersionType,
        seq_no: i64,
        primary_term: i64,
    ) -> Result<Option<Doc>, EngineError>;
}

/// Pushes required mapping deltas to the master and awaits acknowledgement.
#[async_trait]
pub trait SchemaUpdateClient: Send + Sync {
    async fn update_mapping_on_master(&self, index: &str, delta: &Bytes) -> Result<(), EngineError>;
}

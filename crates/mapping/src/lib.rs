//! The per-index document schema ("mapping") and its service: parsing raw
//! JSON mappings into an immutable mapper tree, merging incoming mappings
//! with the installed one under validation limits, and exposing field-type
//! and analyzer lookups to the write path.
//!
//! The service is the single writer of the installed mapping. Readers
//! obtain an immutable snapshot and are never blocked by a merge; the
//! snapshot (mapping, field-type lookup, and object-mapper index together)
//! is replaced atomically when a merge installs.

mod analysis;
pub use analysis::{Analyzer, AnalyzerKind, AnalyzerRegistry, DispatchAnalyzer, FieldLookup};

mod field;
pub use field::{AliasMapper, FieldKind, FieldMapper, FieldType, Mapper, ObjectMapper};

mod document;
pub use document::{
    is_metadata_field, validate_type_name, DocumentMapping, MetadataMapper, DOC_TYPE, META_FIELDS,
};

mod limits;
pub use limits::{MappingLimits, DEPTH_LIMIT_SETTING, TOTAL_FIELDS_LIMIT_SETTING};

mod lookup;
pub use lookup::{simple_match, FieldTypeLookup};

mod service;
pub use service::{IndexMetadata, MappingService, MergeReason, Snapshot};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid type name '{name}': {reason}")]
    InvalidTypeName { name: String, reason: String },
    #[error("failed to parse mapping for field '{field}': {message}")]
    MapperParsing { field: String, message: String },
    #[error("cannot merge mapping for field '{field}': {message}")]
    MergeConflict { field: String, message: String },
    #[error("limit of total fields [{limit}] in index has been exceeded")]
    TotalFieldsLimitExceeded { limit: u64 },
    #[error("limit of mapping depth [{limit}] has been exceeded due to object field '{path}'")]
    DepthLimitExceeded { limit: u64, path: String },
    #[error("mapping for index '{index}' must have routing required, because the index is partitioned")]
    RoutingRequired { index: String },
    #[error("alias '{alias}' collides with a concrete field of the same name")]
    AliasCollision { alias: String },
    #[error("alias '{alias}' refers to a field '{target}' which does not exist")]
    AliasTargetMissing { alias: String, target: String },
    #[error("invalid value for setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },
    #[error("a request carries {count} mapping types, but an index holds exactly one")]
    MultipleTypes { count: usize },
    #[error("mapping version went backwards: installed {current}, incoming {incoming}")]
    VersionWentBackwards { current: u64, incoming: u64 },
    #[error("internal mapping inconsistency: {0}")]
    Inconsistency(String),
    #[error("mapping source is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("mapping source failed to decompress")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}

pub type Result<T> = std::result::Result<T, Error>;

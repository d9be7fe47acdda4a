//! The per-shard upsert write path: the versioned wire request carrying a
//! batch of INSERT-or-UPDATE items, source generation under table
//! constraints, and the executor which resolves each item against the
//! primary and replays the resulting writes on replicas.

mod codec;
pub use codec::CodecError;

mod engine;
pub use engine::{
    Doc, EngineError, IndexResult, SchemaUpdateClient, ShardWriteEngine, VersionType,
};

mod executor;
pub use executor::{ReplicaError, UpsertExecutor, MAX_RETRY_LIMIT};

pub mod expr;
pub use expr::{Expr, Func};

mod request;
pub use request::{
    versions, DuplicateKeyAction, Failure, Item, ItemResult, ShardId, ShardResponse,
    ShardWriteRequest, TranslogLocation,
};

mod sourcegen;
pub use sourcegen::{
    source_bytes, GeneratedValidation, InsertSourceGen, SourceGenError, UpdateSourceGen,
};

mod table;
pub use table::{CheckConstraint, ColumnKind, ColumnSchema, Reference, TableSchema};

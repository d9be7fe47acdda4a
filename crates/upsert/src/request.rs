use crate::expr::Expr;
use crate::table::Reference;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Optimistic-concurrency sentinels shared with the engine.
pub mod versions {
    /// Accept whatever version is live.
    pub const MATCH_ANY: i64 = -3;
    /// Succeed only if no live document exists.
    pub const MATCH_DELETED: i64 = -4;
    /// The server assigns the sequence number.
    pub const UNASSIGNED_SEQ_NO: i64 = -2;
    /// No primary term has been observed.
    pub const UNASSIGNED_PRIMARY_TERM: i64 = 0;
}

/// A shard of an index.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShardId {
    pub index: String,
    pub shard: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

/// What to do when an insert collides with a live document.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DuplicateKeyAction {
    Ignore,
    Overwrite,
    UpdateOrFail,
}

impl DuplicateKeyAction {
    pub(crate) fn ordinal(&self) -> u64 {
        match self {
            DuplicateKeyAction::Ignore => 0,
            DuplicateKeyAction::Overwrite => 1,
            DuplicateKeyAction::UpdateOrFail => 2,
        }
    }

    pub(crate) fn from_ordinal(ordinal: u64) -> Option<Self> {
        Some(match ordinal {
            0 => DuplicateKeyAction::Ignore,
            1 => DuplicateKeyAction::Overwrite,
            2 => DuplicateKeyAction::UpdateOrFail,
            _ => return None,
        })
    }
}

/// One INSERT-or-UPDATE item of a shard write request.
///
/// `seq_no`, `primary_term` and `version` carry the caller's concurrency
/// expectations in; after a successful primary apply they hold what the
/// engine assigned, and `source` holds the authoritative payload the
/// replicas index. A failed item has its `source` nulled so replicas skip
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    /// Positionally aligned with the request's `update_columns`.
    pub update_assignments: Option<Vec<Expr>>,
    /// Positionally aligned with the request's `insert_columns`.
    pub insert_values: Option<Vec<Value>>,
    pub version: i64,
    pub seq_no: i64,
    pub primary_term: i64,
    pub source: Option<Bytes>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            update_assignments: None,
            insert_values: None,
            version: versions::MATCH_ANY,
            seq_no: versions::UNASSIGNED_SEQ_NO,
            primary_term: versions::UNASSIGNED_PRIMARY_TERM,
            source: None,
        }
    }

    pub fn with_assignments(mut self, assignments: Vec<Expr>) -> Self {
        self.update_assignments = Some(assignments);
        self
    }

    pub fn with_insert_values(mut self, values: Vec<Value>) -> Self {
        self.insert_values = Some(values);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Whether a version conflict may be retried for this item: the caller
    /// pinned neither a sequence number nor a concrete version.
    pub fn retry_on_conflict(&self) -> bool {
        self.seq_no == versions::UNASSIGNED_SEQ_NO && self.version == versions::MATCH_ANY
    }
}

/// A batch of upsert items addressed to one shard's primary.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardWriteRequest {
    pub shard_id: ShardId,
    pub job_id: Uuid,
    pub continue_on_error: bool,
    pub validate_constraints: bool,
    pub duplicate_key_action: DuplicateKeyAction,
    pub session_settings: BTreeMap<String, String>,
    /// Names assigned by `Item::update_assignments`, positionally.
    pub update_columns: Option<Vec<String>>,
    /// Columns streamed by `Item::insert_values`, positionally.
    pub insert_columns: Option<Vec<Reference>>,
    /// Evaluated against each successfully written document.
    pub return_values: Option<Vec<Expr>>,
    pub items: Vec<Item>,
}

impl ShardWriteRequest {
    pub fn new(shard_id: ShardId, job_id: Uuid) -> Self {
        Self {
            shard_id,
            job_id,
            continue_on_error: false,
            validate_constraints: true,
            duplicate_key_action: DuplicateKeyAction::UpdateOrFail,
            session_settings: BTreeMap::new(),
            update_columns: None,
            insert_columns: None,
            return_values: None,
            items: Vec::new(),
        }
    }

    /// A request must name update columns, insert columns, or both.
    pub fn is_well_formed(&self) -> bool {
        self.update_columns.is_some() || self.insert_columns.is_some()
    }
}

/// A durable position in the shard's write-ahead log. Positions assigned
/// to successive writes are non-decreasing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct TranslogLocation {
    pub generation: u64,
    pub offset: u64,
}

/// A per-item failure surfaced in the shard response.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub id: String,
    pub message: String,
    pub version_conflict: bool,
}

/// The outcome of one item, in input order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Success {
        location: TranslogLocation,
        seq_no: i64,
        version: i64,
        return_values: Option<Vec<Value>>,
    },
    /// A duplicate key under `DuplicateKeyAction::Ignore`: not an error,
    /// and nothing for replicas to do.
    Skipped,
    Failure(Failure),
}

impl ItemResult {
    pub fn location(&self) -> Option<TranslogLocation> {
        match self {
            ItemResult::Success { location, .. } => Some(*location),
            _ => None,
        }
    }
}

/// The per-shard response: one entry per processed item, in input order,
/// plus a batch-fatal failure slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardResponse {
    pub results: Vec<ItemResult>,
    pub failure: Option<Failure>,
}

impl ShardResponse {
    pub fn successes(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, ItemResult::Success { .. }))
            .count()
    }
}

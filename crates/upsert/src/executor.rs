use crate::engine::{EngineError, IndexResult, SchemaUpdateClient, ShardWriteEngine, VersionType};
use crate::request::{
    versions, Failure, Item, ItemResult, ShardResponse, ShardWriteRequest, TranslogLocation,
};
use crate::sourcegen::{source_bytes, GeneratedValidation, InsertSourceGen, UpdateSourceGen};
use crate::table::TableSchema;
use crate::DuplicateKeyAction;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upper bound on version-conflict retries of a single item. A busy key
/// under heavy contention will practically never reach it; an item which
/// does surfaces its last conflict.
pub const MAX_RETRY_LIMIT: u64 = 100_000;

/// A replicated write which cannot be applied until the replica has seen
/// a mapping update. Retriable: the caller re-sends once the mapping has
/// propagated.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("replica requires a mapping update before applying a replicated write")]
    RetryOnReplica { delta: Bytes },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Executes shard write requests against the primary (resolving each item
/// through its insert/update state machine) and replays primary-generated
/// sources on replicas.
pub struct UpsertExecutor<E, C> {
    table: Arc<TableSchema>,
    engine: Arc<E>,
    schema_client: Arc<C>,
    kill_flag: Arc<AtomicBool>,
}

impl<E, C> UpsertExecutor<E, C>
where
    E: ShardWriteEngine,
    C: SchemaUpdateClient,
{
    pub fn new(
        table: Arc<TableSchema>,
        engine: Arc<E>,
        schema_client: Arc<C>,
        kill_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            table,
            engine,
            schema_client,
            kill_flag,
        }
    }

    /// Execute `request` on the primary. Items are applied in input order;
    /// successful items have their assigned seq-no, version and generated
    /// source recorded back onto the item for replication, and failed
    /// items have their source nulled so replicas skip them.
    pub async fn execute(&self, request: &mut ShardWriteRequest) -> ShardResponse {
        let mut response = ShardResponse::default();

        if !request.is_well_formed() {
            response.failure = Some(Failure {
                id: String::new(),
                message: "request names neither update nor insert columns".to_string(),
                version_conflict: false,
            });
            return response;
        }

        let validation = if request.validate_constraints {
            GeneratedValidation::ValueMatch
        } else {
            GeneratedValidation::None
        };

        for index in 0..request.items.len() {
            // The kill flag is polled between items; in-flight operations
            // are never interrupted.
            if self.kill_flag.load(Ordering::Relaxed) {
                tracing::debug!(shard = %request.shard_id, "upsert batch was killed");
                response.failure = Some(Failure {
                    id: request.items[index].id.clone(),
                    message: "the operation was interrupted".to_string(),
                    version_conflict: false,
                });
                break;
            }

            let mut item = std::mem::replace(&mut request.items[index], Item::new(""));
            let outcome = self.execute_item(request, &mut item, validation).await;
            request.items[index] = item;

            match outcome {
                Ok(result) => response.results.push(result),
                Err(failure) => {
                    request.items[index].source = None;
                    response.results.push(ItemResult::Failure(failure.clone()));
                    if !request.continue_on_error {
                        response.failure = Some(failure);
                        break;
                    }
                }
            }
        }
        response
    }

    /// Resolve one item: try the insert path when insert values are
    /// present, fall back to (or start with) the update path, and retry
    /// version conflicts while the item permits it.
    async fn execute_item(
        &self,
        request: &ShardWriteRequest,
        item: &mut Item,
        validation: GeneratedValidation,
    ) -> Result<ItemResult, Failure> {
        let mut inserting = item.insert_values.is_some();
        let mut retries: u64 = 0;
        let mut is_retry = false;

        loop {
            let doc = if inserting {
                self.generate_insert(request, item, validation)?
            } else {
                self.generate_update(request, item).await?
            };

            // Return values never observe engine-assigned state, so they
            // evaluate against the document about to be written.
            let return_values = evaluate_return_values(request, item, &doc)?;

            let source = source_bytes(&doc);
            let (version, seq_no, primary_term) = if inserting {
                let version = match request.duplicate_key_action {
                    DuplicateKeyAction::Overwrite => versions::MATCH_ANY,
                    _ => versions::MATCH_DELETED,
                };
                (
                    version,
                    versions::UNASSIGNED_SEQ_NO,
                    versions::UNASSIGNED_PRIMARY_TERM,
                )
            } else {
                (versions::MATCH_ANY, item.seq_no, item.primary_term)
            };

            let result = self
                .apply_with_schema_sync(&item.id, version, seq_no, primary_term, &source, is_retry)
                .await;

            match result {
                IndexResult::Success {
                    seq_no,
                    version,
                    location,
                } => {
                    item.seq_no = seq_no;
                    item.version = version;
                    item.source = Some(source);
                    return Ok(ItemResult::Success {
                        location,
                        seq_no,
                        version,
                        return_values,
                    });
                }
                IndexResult::Failure { error, .. } if error.is_version_conflict() => {
                    if inserting && request.duplicate_key_action == DuplicateKeyAction::Ignore {
                        item.source = None;
                        return Ok(ItemResult::Skipped);
                    }
                    if inserting && item.update_assignments.is_some() {
                        // A live duplicate: switch this item to the update
                        // path and resolve against the current document.
                        inserting = false;
                        is_retry = true;
                        continue;
                    }
                    if !inserting && item.retry_on_conflict() {
                        retries += 1;
                        if retries >= MAX_RETRY_LIMIT {
                            tracing::warn!(
                                id = %item.id,
                                retries,
                                "item exhausted its version-conflict retries"
                            );
                            return Err(item_failure(&item.id, &error));
                        }
                        is_retry = true;
                        continue;
                    }
                    return Err(item_failure(&item.id, &error));
                }
                IndexResult::Failure { error, .. } => {
                    return Err(item_failure(&item.id, &error));
                }
                IndexResult::MappingUpdateRequired { .. } => {
                    unreachable!("apply_with_schema_sync resolves mapping updates")
                }
            }
        }
    }

    fn generate_insert(
        &self,
        request: &ShardWriteRequest,
        item: &Item,
        validation: GeneratedValidation,
    ) -> Result<Value, Failure> {
        let columns = request.insert_columns.as_deref().unwrap_or_default();
        let values = item.insert_values.as_deref().unwrap_or_default();
        InsertSourceGen::new(&self.table, columns, validation)
            .generate(values)
            .map_err(|err| Failure {
                id: item.id.clone(),
                message: err.to_string(),
                version_conflict: false,
            })
    }

    /// Load the current document and produce the updated payload. Missing
    /// documents and concurrent-version disagreements fail the item.
    async fn generate_update(
        &self,
        request: &ShardWriteRequest,
        item: &Item,
    ) -> Result<Value, Failure> {
        let doc = self
            .engine
            .lookup_doc(
                &item.id,
                versions::MATCH_ANY,
                VersionType::Internal,
                item.seq_no,
                item.primary_term,
            )
            .await
            .map_err(|err| item_failure(&item.id, &err))?;

        let Some(doc) = doc else {
            return Err(item_failure(
                &item.id,
                &EngineError::DocumentMissing {
                    id: item.id.clone(),
                },
            ));
        };
        let Some(current_source) = &doc.source else {
            return Err(item_failure(
                &item.id,
                &EngineError::DocumentSourceMissing {
                    id: item.id.clone(),
                },
            ));
        };
        if item.version != versions::MATCH_ANY && doc.version != item.version {
            return Err(item_failure(
                &item.id,
                &EngineError::VersionConflict {
                    id: item.id.clone(),
                    expected: item.version,
                    current: doc.version,
                },
            ));
        }

        let current: Value = serde_json::from_slice(current_source).map_err(|err| Failure {
            id: item.id.clone(),
            message: format!("stored source is not valid JSON: {err}"),
            version_conflict: false,
        })?;

        let update_columns = request.update_columns.as_deref().unwrap_or_default();
        let assignments = item.update_assignments.as_deref().unwrap_or_default();
        let insert_values = item.insert_values.as_deref().unwrap_or_default();

        UpdateSourceGen::new(&self.table, update_columns)
            .generate(&current, assignments, insert_values)
            .map_err(|err| Failure {
                id: item.id.clone(),
                message: err.to_string(),
                version_conflict: false,
            })
    }

    /// Apply one index operation, transparently resolving mapping updates:
    /// the required delta is pushed to the master and the operation is
    /// re-applied once the update is acknowledged. The item's attempt
    /// accounting never observes these round-trips.
    async fn apply_with_schema_sync(
        &self,
        id: &str,
        version: i64,
        seq_no: i64,
        primary_term: i64,
        source: &Bytes,
        is_retry: bool,
    ) -> IndexResult {
        loop {
            let result = self
                .engine
                .apply_index_operation_on_primary(
                    id,
                    version,
                    VersionType::Internal,
                    source,
                    seq_no,
                    primary_term,
                    is_retry,
                )
                .await;

            let IndexResult::MappingUpdateRequired { delta } = result else {
                return result;
            };

            tracing::debug!(id, table = %self.table.name, "awaiting mapping update on master");
            if let Err(err) = self
                .schema_client
                .update_mapping_on_master(&self.table.name, &delta)
                .await
            {
                return self.engine.get_failed_index_result(err, versions::MATCH_ANY);
            }
        }
    }

    /// Replay primary-resolved items on a replica. Items whose source the
    /// primary nulled are skipped; a required mapping update aborts with a
    /// retriable error carrying the delta.
    pub async fn execute_on_replica(
        &self,
        request: &ShardWriteRequest,
    ) -> Result<Vec<TranslogLocation>, ReplicaError> {
        let mut locations = Vec::new();

        for item in &request.items {
            let Some(source) = &item.source else {
                continue;
            };

            match self
                .engine
                .apply_index_operation_on_replica(&item.id, item.seq_no, item.version, source)
                .await
            {
                IndexResult::Success { location, .. } => locations.push(location),
                IndexResult::MappingUpdateRequired { delta } => {
                    return Err(ReplicaError::RetryOnReplica { delta });
                }
                IndexResult::Failure { error, .. } => return Err(error.into()),
            }
        }
        Ok(locations)
    }
}

fn evaluate_return_values(
    request: &ShardWriteRequest,
    item: &Item,
    doc: &Value,
) -> Result<Option<Vec<Value>>, Failure> {
    let Some(exprs) = &request.return_values else {
        return Ok(None);
    };
    let inputs = item.insert_values.as_deref().unwrap_or_default();
    let scope = crate::expr::Scope { row: doc, inputs };

    exprs
        .iter()
        .map(|expr| expr.eval(scope))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
        .map_err(|err| Failure {
            id: item.id.clone(),
            message: err.to_string(),
            version_conflict: false,
        })
}

fn item_failure(id: &str, error: &EngineError) -> Failure {
    Failure {
        id: id.to_string(),
        message: error.to_string(),
        version_conflict: error.is_version_conflict(),
    }
}

use crate::{
    field::path_depth, AnalyzerKind, AnalyzerRegistry, DispatchAnalyzer, DocumentMapping, Error,
    FieldLookup, FieldType, FieldTypeLookup, MappingLimits, Mapper, ObjectMapper, Result,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Why a merge is being applied. Limits are enforced for live updates
/// only; recovery replays whatever is already durable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MergeReason {
    Update,
    Recovery,
}

/// The cluster-state view of an index's installed mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    pub mapping_version: u64,
    /// Compressed canonical mapping source.
    pub source: Bytes,
}

/// A consistent, immutable view of the installed mapping. The mapping,
/// the field-type lookup, and the object-mapper index are replaced as one
/// unit; readers holding a snapshot are never invalidated by a merge.
#[derive(Debug)]
pub struct Snapshot {
    pub mapping: Option<Arc<DocumentMapping>>,
    pub field_types: Arc<FieldTypeLookup>,
    pub object_mappers: BTreeMap<String, Arc<ObjectMapper>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            mapping: None,
            field_types: Arc::new(FieldTypeLookup::new()),
            object_mappers: BTreeMap::new(),
        }
    }
}

/// MappingService owns the installed mapping of one index and is its only
/// writer. Merges are serialized; the merge critical section touches only
/// in-memory mapping structures and installs by atomically replacing the
/// snapshot reference.
pub struct MappingService {
    state: Arc<State>,
}

struct State {
    index: String,
    /// A routing-partitioned index requires `_routing.required`.
    partitioned: bool,
    analyzers: Arc<AnalyzerRegistry>,
    limits: Mutex<MappingLimits>,
    /// Serializes merge/install. Readers never take this.
    merge_lock: Mutex<()>,
    current: Mutex<Arc<Snapshot>>,
}

impl FieldLookup for State {
    fn field_type(&self, full_name: &str) -> Option<Arc<FieldType>> {
        self.current.lock().unwrap().field_types.get(full_name)
    }
}

impl MappingService {
    pub fn new(
        index: impl Into<String>,
        partitioned: bool,
        analyzers: AnalyzerRegistry,
        limits: MappingLimits,
    ) -> Self {
        Self {
            state: Arc::new(State {
                index: index.into(),
                partitioned,
                analyzers: Arc::new(analyzers),
                limits: Mutex::new(limits),
                merge_lock: Mutex::new(()),
                current: Mutex::new(Arc::new(Snapshot::empty())),
            }),
        }
    }

    pub fn index(&self) -> &str {
        &self.state.index
    }

    /// The current consistent view. Cheap; clones an Arc.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.current.lock().unwrap().clone()
    }

    pub fn mapping(&self) -> Option<Arc<DocumentMapping>> {
        self.snapshot().mapping.clone()
    }

    pub fn field_type(&self, full_name: &str) -> Option<Arc<FieldType>> {
        self.snapshot().field_types.get(full_name)
    }

    pub fn match_pattern(&self, pattern: &str) -> Vec<String> {
        self.snapshot().field_types.matching(pattern)
    }

    pub fn object_mapper(&self, path: &str) -> Option<Arc<ObjectMapper>> {
        self.snapshot().object_mappers.get(path).cloned()
    }

    pub fn is_metadata_field(&self, name: &str) -> bool {
        crate::is_metadata_field(name)
    }

    pub fn index_analyzer(&self) -> DispatchAnalyzer {
        self.dispatch(AnalyzerKind::Index)
    }

    pub fn search_analyzer(&self) -> DispatchAnalyzer {
        self.dispatch(AnalyzerKind::Search)
    }

    pub fn search_quote_analyzer(&self) -> DispatchAnalyzer {
        self.dispatch(AnalyzerKind::SearchQuote)
    }

    fn dispatch(&self, kind: AnalyzerKind) -> DispatchAnalyzer {
        DispatchAnalyzer::new(kind, self.state.clone(), self.state.analyzers.clone())
    }

    pub fn limits(&self) -> MappingLimits {
        *self.state.limits.lock().unwrap()
    }

    /// Apply a dynamic settings change to the mapping limits.
    pub fn update_limits(&self, limits: MappingLimits) {
        *self.state.limits.lock().unwrap() = limits;
    }

    /// Merge a batch of raw type mappings into the installed mapping.
    ///
    /// An index holds exactly one type; a batch with more than one entry is
    /// rejected, but only after its first entry has been parsed, so a parse
    /// error in that entry wins over the multi-type violation.
    pub fn merge(
        &self,
        batch: &[(String, serde_json::Value)],
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapping>> {
        let _guard = self.state.merge_lock.lock().unwrap();

        let Some((type_name, raw)) = batch.first() else {
            return Err(Error::Inconsistency("empty mapping batch".to_string()));
        };
        let incoming = DocumentMapping::parse(type_name, raw)?;
        if batch.len() > 1 {
            return Err(Error::MultipleTypes { count: batch.len() });
        }

        self.apply(incoming, reason)
    }

    /// Merge a single raw type mapping. See [`MappingService::merge`].
    pub fn merge_one(
        &self,
        type_name: &str,
        raw: &serde_json::Value,
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapping>> {
        let _guard = self.state.merge_lock.lock().unwrap();
        let incoming = DocumentMapping::parse(type_name, raw)?;
        self.apply(incoming, reason)
    }

    /// Bring the installed mapping up to date with cluster metadata,
    /// merging under `Recovery` rules. Returns whether the caller must
    /// push a refreshed mapping back to the master: true iff the merged
    /// mapping re-serializes differently from the incoming content.
    pub fn update_from_metadata(
        &self,
        current: &IndexMetadata,
        new: &IndexMetadata,
    ) -> Result<bool> {
        if current.mapping_version == new.mapping_version {
            if current.source != new.source {
                return Err(Error::Inconsistency(
                    "mapping source changed without a mapping version bump".to_string(),
                ));
            }
            return Ok(false);
        }
        if new.mapping_version < current.mapping_version {
            return Err(Error::VersionWentBackwards {
                current: current.mapping_version,
                incoming: new.mapping_version,
            });
        }

        let _guard = self.state.merge_lock.lock().unwrap();
        let incoming = DocumentMapping::parse_compressed(&new.source)?;
        let previous = self
            .snapshot()
            .mapping
            .as_ref()
            .map(|m| m.content_source().clone());

        let merged = self.apply(incoming, MergeReason::Recovery)?;

        if previous.as_deref() == Some(merged.content_source().as_ref()) {
            return Err(Error::Inconsistency(
                "mapping version increased without a content change".to_string(),
            ));
        }
        Ok(merged.content_source() != &new.source)
    }

    /// Merge `incoming` with the installed mapping, validate, and install.
    /// Caller holds the merge lock. On any error the previous snapshot
    /// stays installed, untouched.
    fn apply(&self, incoming: DocumentMapping, reason: MergeReason) -> Result<Arc<DocumentMapping>> {
        let prev = self.snapshot();

        let merged = match &prev.mapping {
            Some(current) => current.merge(&incoming)?,
            None => incoming,
        };

        let field_mappers: Vec<_> = merged.field_mappers().into_iter().cloned().collect();
        let alias_mappers: Vec<_> = merged.alias_mappers().into_iter().cloned().collect();
        let object_mappers = merged.object_mappers();

        if reason == MergeReason::Update {
            let limits = self.limits();

            // Metadata mappers are not user fields and earn back a slot
            // each: objects + fields - metadata + aliases.
            let total = (object_mappers.len() + field_mappers.len() + alias_mappers.len())
                .saturating_sub(merged.metadata().len());
            if total as u64 > limits.total_fields_limit {
                return Err(Error::TotalFieldsLimitExceeded {
                    limit: limits.total_fields_limit,
                });
            }

            let mut too_deep = None;
            merged.visit_mappers(&mut |mapper: &Mapper| {
                if too_deep.is_none() && path_depth(mapper.full_name()) > limits.depth_limit {
                    too_deep = Some(mapper.full_name().to_string());
                }
            });
            if let Some(path) = too_deep {
                return Err(Error::DepthLimitExceeded {
                    limit: limits.depth_limit,
                    path,
                });
            }
        }

        if self.state.partitioned && !merged.routing_required() {
            return Err(Error::RoutingRequired {
                index: self.state.index.clone(),
            });
        }

        // Cross-checks (field conflicts, alias collisions and targets) run
        // in the copy-on-add of the lookup; unchanged fields carry their
        // installed Arc forward, preserving reference identity.
        let field_types = Arc::new(
            prev.field_types
                .with_addition(&field_mappers, &alias_mappers)?,
        );

        // Installed mappings must round-trip bit-identically through their
        // own content source; a violation is an internal inconsistency.
        let reparsed = DocumentMapping::parse_compressed(merged.content_source())?;
        if reparsed.canonical_bytes() != merged.canonical_bytes() {
            return Err(Error::Inconsistency(
                "merged mapping does not round-trip through its content source".to_string(),
            ));
        }

        let merged = Arc::new(merged);
        let snapshot = Arc::new(Snapshot {
            mapping: Some(merged.clone()),
            field_types,
            object_mappers,
        });
        *self.state.current.lock().unwrap() = snapshot;

        tracing::debug!(
            index = %self.state.index,
            ?reason,
            fields = field_mappers.len(),
            "installed merged mapping"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Analyzer, FieldKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service() -> MappingService {
        MappingService::new(
            "t1",
            false,
            AnalyzerRegistry::new(Analyzer::new("standard")),
            MappingLimits::default(),
        )
    }

    fn service_with_limits(limits: MappingLimits) -> MappingService {
        MappingService::new(
            "t1",
            false,
            AnalyzerRegistry::new(Analyzer::new("standard")),
            limits,
        )
    }

    #[test]
    fn merge_installs_and_exposes_lookups() {
        let svc = service();
        svc.merge_one(
            "_doc",
            &json!({"properties": {
                "a": {"type": "long"},
                "o": {"properties": {"b": {"type": "text"}}},
            }}),
            MergeReason::Update,
        )
        .unwrap();

        assert_eq!(svc.field_type("a").unwrap().kind, FieldKind::Long);
        assert_eq!(svc.field_type("o.b").unwrap().kind, FieldKind::Text);
        assert!(svc.field_type("missing").is_none());
        assert_eq!(svc.object_mapper("o").unwrap().full_path, "o");
        assert_eq!(svc.match_pattern("o.*"), vec!["o.b".to_string()]);
    }

    #[test]
    fn lookup_returns_the_installed_type_identity() {
        let svc = service();
        let installed = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap();

        // Merge in an unrelated field; 'a' must keep its identity.
        svc.merge_one(
            "_doc",
            &json!({"properties": {"b": {"type": "text"}}}),
            MergeReason::Update,
        )
        .unwrap();

        for mapper in installed.field_mappers() {
            let looked_up = svc.field_type(mapper.full_name()).unwrap();
            assert!(Arc::ptr_eq(&mapper.field_type, &looked_up));
        }
    }

    #[test]
    fn field_count_limit_applies_to_updates_only() {
        let limits = MappingLimits {
            total_fields_limit: 3,
            ..MappingLimits::default()
        };
        let raw = json!({"properties": {
            "a": {"type": "long"},
            "b": {"type": "long"},
            "c": {"type": "long"},
            "d": {"type": "long"},
        }});

        let svc = service_with_limits(limits);
        let err = svc.merge_one("_doc", &raw, MergeReason::Update).unwrap_err();
        assert!(matches!(err, Error::TotalFieldsLimitExceeded { limit: 3 }));
        // The failed merge installed nothing.
        assert!(svc.mapping().is_none());

        svc.merge_one("_doc", &raw, MergeReason::Recovery).unwrap();
        assert_eq!(svc.mapping().unwrap().field_mappers().len(), 4);
    }

    #[test]
    fn metadata_mappers_do_not_count_against_the_field_limit() {
        let limits = MappingLimits {
            total_fields_limit: 5,
            ..MappingLimits::default()
        };

        // Six user fields with two metadata mappers net out to four.
        let raw = json!({
            "_routing": {"required": true},
            "_ttl": {"enabled": true},
            "properties": {
                "a": {"type": "long"},
                "b": {"type": "long"},
                "c": {"type": "long"},
                "d": {"type": "long"},
                "e": {"type": "long"},
                "f": {"type": "long"},
            },
        });
        let svc = service_with_limits(limits);
        svc.merge_one("_doc", &raw, MergeReason::Update).unwrap();
        assert_eq!(svc.mapping().unwrap().field_mappers().len(), 6);

        // Two more fields push the net count past the limit.
        let more = json!({"properties": {
            "g": {"type": "long"},
            "h": {"type": "long"},
        }});
        let err = svc.merge_one("_doc", &more, MergeReason::Update).unwrap_err();
        assert!(matches!(err, Error::TotalFieldsLimitExceeded { limit: 5 }));
    }

    #[test]
    fn depth_limit_applies_to_updates_only() {
        let limits = MappingLimits {
            depth_limit: 3,
            ..MappingLimits::default()
        };

        let deep = json!({"properties": {
            "a": {"properties": {"b": {"properties": {"c": {"type": "long"}}}}},
        }});
        let svc = service_with_limits(limits);
        let err = svc.merge_one("_doc", &deep, MergeReason::Update).unwrap_err();
        assert!(
            matches!(&err, Error::DepthLimitExceeded { limit: 3, path } if path == "a.b.c"),
            "got: {err}"
        );

        let shallow = json!({"properties": {
            "a": {"properties": {"b": {"type": "long"}}},
        }});
        svc.merge_one("_doc", &shallow, MergeReason::Update).unwrap();

        // Recovery replays the deep mapping regardless.
        let svc = service_with_limits(limits);
        svc.merge_one("_doc", &deep, MergeReason::Recovery).unwrap();
    }

    #[test]
    fn partitioned_index_requires_routing() {
        let svc = MappingService::new(
            "parted",
            true,
            AnalyzerRegistry::new(Analyzer::new("standard")),
            MappingLimits::default(),
        );

        let err = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(matches!(err, Error::RoutingRequired { index } if index == "parted"));

        svc.merge_one(
            "_doc",
            &json!({
                "_routing": {"required": true},
                "properties": {"a": {"type": "long"}},
            }),
            MergeReason::Update,
        )
        .unwrap();
    }

    #[test]
    fn failed_merge_retains_previous_mapping() {
        let svc = service();
        svc.merge_one(
            "_doc",
            &json!({"properties": {"a": {"type": "long"}}}),
            MergeReason::Update,
        )
        .unwrap();

        let err = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"a": {"type": "text"}, "b": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MergeConflict { .. }));

        assert_eq!(svc.field_type("a").unwrap().kind, FieldKind::Long);
        assert!(svc.field_type("b").is_none());
    }

    #[test]
    fn multi_type_batches_are_rejected_after_parsing_the_first() {
        let svc = service();
        let batch = vec![
            ("_doc".to_string(), json!({"properties": {"a": {"type": "long"}}})),
            ("other".to_string(), json!({"properties": {}})),
        ];
        let err = svc.merge(&batch, MergeReason::Update).unwrap_err();
        assert!(matches!(err, Error::MultipleTypes { count: 2 }));

        // A parse error in the first entry wins over the multi-type guard.
        let batch = vec![
            ("_doc".to_string(), json!({"properties": {"a": {"type": "nope"}}})),
            ("other".to_string(), json!({"properties": {}})),
        ];
        let err = svc.merge(&batch, MergeReason::Update).unwrap_err();
        assert!(matches!(err, Error::MapperParsing { .. }));
    }

    #[test]
    fn analyzer_dispatch_follows_the_live_mapping() {
        let svc = MappingService::new(
            "t1",
            false,
            AnalyzerRegistry::new(Analyzer::new("standard")).with(Analyzer::new("simple")),
            MappingLimits::default(),
        );
        let index_analyzer = svc.index_analyzer();

        // Obtained before any merge, the dispatcher still observes later
        // mapping installs.
        assert_eq!(index_analyzer.resolve("title").name(), "standard");
        svc.merge_one(
            "_doc",
            &json!({"properties": {"title": {"type": "text", "analyzer": "simple"}}}),
            MergeReason::Update,
        )
        .unwrap();
        assert_eq!(index_analyzer.resolve("title").name(), "simple");
        assert_eq!(svc.search_analyzer().resolve("title").name(), "simple");
        assert_eq!(svc.search_analyzer().resolve("unmapped").name(), "standard");
    }

    #[test]
    fn limits_are_dynamic() {
        let svc = service();
        svc.merge_one(
            "_doc",
            &json!({"properties": {"a": {"type": "long"}, "b": {"type": "long"}}}),
            MergeReason::Update,
        )
        .unwrap();

        svc.update_limits(MappingLimits {
            total_fields_limit: 2,
            ..MappingLimits::default()
        });

        let err = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"c": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TotalFieldsLimitExceeded { limit: 2 }));
    }

    #[test]
    fn update_from_metadata_version_rules() {
        let svc = service();
        let installed = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Recovery,
            )
            .unwrap();

        let current = IndexMetadata {
            mapping_version: 3,
            source: installed.content_source().clone(),
        };

        // Same version, same content: nothing to do.
        assert!(!svc.update_from_metadata(&current, &current.clone()).unwrap());

        // Same version, different content: inconsistency.
        let tampered = IndexMetadata {
            mapping_version: 3,
            source: Bytes::from_static(b"bogus"),
        };
        assert!(matches!(
            svc.update_from_metadata(&current, &tampered),
            Err(Error::Inconsistency(_))
        ));

        // Version went backwards.
        let older = IndexMetadata {
            mapping_version: 2,
            source: current.source.clone(),
        };
        assert!(matches!(
            svc.update_from_metadata(&current, &older),
            Err(Error::VersionWentBackwards { .. })
        ));

        // A canonical incoming source merges and needs no refresh.
        let richer = DocumentMapping::parse(
            "_doc",
            &json!({"properties": {"a": {"type": "long"}, "b": {"type": "text"}}}),
        )
        .unwrap();
        let newer = IndexMetadata {
            mapping_version: 4,
            source: richer.content_source().clone(),
        };
        assert!(!svc.update_from_metadata(&current, &newer).unwrap());
        assert!(svc.field_type("b").is_some());
    }

    #[test]
    fn update_from_metadata_flags_non_canonical_sources() {
        let svc = service();
        let installed = svc
            .merge_one(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Recovery,
            )
            .unwrap();
        let current = IndexMetadata {
            mapping_version: 1,
            source: installed.content_source().clone(),
        };

        // An incoming source with non-canonical formatting parses fine but
        // re-serializes differently, which must demand a refresh.
        let loose = serde_json::to_vec_pretty(
            &json!({"_doc": {"properties": {"a": {"type": "long"}, "b": {"type": "text"}}}}),
        )
        .unwrap();
        let newer = IndexMetadata {
            mapping_version: 2,
            source: Bytes::from(lz4_flex::block::compress_prepend_size(&loose)),
        };

        assert!(svc.update_from_metadata(&current, &newer).unwrap());
    }
}

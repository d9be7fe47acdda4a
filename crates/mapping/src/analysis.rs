use crate::FieldType;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The three analysis positions a field may configure independently.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AnalyzerKind {
    Index,
    Search,
    SearchQuote,
}

/// A named analysis chain. Tokenization itself lives in the engine; the
/// mapping layer deals in named handles, so per-field dispatch and the
/// fallback to the shared default are decided before any text is touched.
#[derive(Debug, Eq, PartialEq)]
pub struct Analyzer {
    name: String,
}

impl Analyzer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The set of analyzers available to an index, with a shared default.
/// The registry is injected at service construction and shared immutably.
#[derive(Debug)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<String, Arc<Analyzer>>,
    default: Arc<Analyzer>,
}

impl AnalyzerRegistry {
    pub fn new(default: Analyzer) -> Self {
        let default = Arc::new(default);
        let mut analyzers = BTreeMap::new();
        analyzers.insert(default.name().to_string(), default.clone());
        Self { analyzers, default }
    }

    pub fn with(mut self, analyzer: Analyzer) -> Self {
        self.analyzers
            .insert(analyzer.name().to_string(), Arc::new(analyzer));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Analyzer>> {
        self.analyzers.get(name).cloned()
    }

    pub fn default_analyzer(&self) -> Arc<Analyzer> {
        self.default.clone()
    }
}

/// FieldLookup is the narrow view of the installed mapping that analyzer
/// dispatch requires. The mapping service implements it over its current
/// snapshot, so a long-lived DispatchAnalyzer always observes the live
/// mapping without holding a reference cycle into the service.
pub trait FieldLookup: Send + Sync {
    fn field_type(&self, full_name: &str) -> Option<Arc<FieldType>>;
}

/// An analyzer which dispatches per field through the installed mapping,
/// falling back to the registry default for unmapped fields and fields
/// without a configured analyzer.
pub struct DispatchAnalyzer {
    kind: AnalyzerKind,
    lookup: Arc<dyn FieldLookup>,
    registry: Arc<AnalyzerRegistry>,
}

impl DispatchAnalyzer {
    pub fn new(
        kind: AnalyzerKind,
        lookup: Arc<dyn FieldLookup>,
        registry: Arc<AnalyzerRegistry>,
    ) -> Self {
        Self {
            kind,
            lookup,
            registry,
        }
    }

    pub fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    pub fn resolve(&self, field: &str) -> Arc<Analyzer> {
        let named = self
            .lookup
            .field_type(field)
            .and_then(|ft| ft.analyzer(self.kind).map(str::to_string))
            .and_then(|name| self.registry.get(&name));

        named.unwrap_or_else(|| self.registry.default_analyzer())
    }
}

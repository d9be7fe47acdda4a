use crate::{AnalyzerKind, Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// FieldKind is the concrete value type of a leaf field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldKind {
    Boolean,
    Long,
    Double,
    Keyword,
    Text,
    Date,
    Binary,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Keyword => "keyword",
            FieldKind::Text => "text",
            FieldKind::Date => "date",
            FieldKind::Binary => "binary",
        }
    }

    pub fn parse(field: &str, s: &str) -> Result<Self> {
        match s {
            "boolean" => Ok(FieldKind::Boolean),
            "long" => Ok(FieldKind::Long),
            "double" => Ok(FieldKind::Double),
            "keyword" => Ok(FieldKind::Keyword),
            "text" => Ok(FieldKind::Text),
            "date" => Ok(FieldKind::Date),
            "binary" => Ok(FieldKind::Binary),
            other => Err(Error::MapperParsing {
                field: field.to_string(),
                message: format!("unknown field type '{other}'"),
            }),
        }
    }
}

/// FieldType is the immutable, installed description of a leaf field.
/// Once part of an installed mapping it is never mutated; merges which
/// leave a field unchanged carry the same `Arc` forward, which is what
/// makes the lookup's reference-identity invariant hold.
#[derive(Debug, PartialEq)]
pub struct FieldType {
    pub full_name: String,
    pub kind: FieldKind,
    pub index_analyzer: Option<String>,
    pub search_analyzer: Option<String>,
    pub search_quote_analyzer: Option<String>,
    /// Whether SQL NULL is an accepted value. Primary-key and routing
    /// columns are implicitly non-nullable regardless of this flag.
    pub nullable: bool,
    /// The field's value is computed from a generated expression.
    pub generated: bool,
    /// The field carries a default expression applied on omission.
    pub has_default: bool,
}

impl FieldType {
    /// The analyzer name for the given analysis kind, following the
    /// conventional fallback chain: a missing search analyzer falls back to
    /// the index analyzer, and a missing search-quote analyzer falls back
    /// to the search analyzer.
    pub fn analyzer(&self, kind: AnalyzerKind) -> Option<&str> {
        let index = self.index_analyzer.as_deref();
        let search = self.search_analyzer.as_deref().or(index);
        match kind {
            AnalyzerKind::Index => index,
            AnalyzerKind::Search => search,
            AnalyzerKind::SearchQuote => self.search_quote_analyzer.as_deref().or(search),
        }
    }
}

/// A leaf field of the mapper tree.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    pub field_type: Arc<FieldType>,
}

impl FieldMapper {
    pub fn full_name(&self) -> &str {
        &self.field_type.full_name
    }
}

/// An alias resolving to a concrete field elsewhere in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasMapper {
    pub full_name: String,
    pub target: String,
}

/// An interior object of the mapper tree, holding named children in
/// deterministic order.
#[derive(Debug, Clone)]
pub struct ObjectMapper {
    pub full_path: String,
    pub children: BTreeMap<String, Mapper>,
}

impl ObjectMapper {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            children: BTreeMap::new(),
        }
    }

    /// Nesting depth of this object: the root is depth 1, a top-level
    /// object is depth 2, and each dotted step adds one.
    pub fn depth(&self) -> u64 {
        path_depth(&self.full_path)
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

/// Depth of a dotted mapper path. The empty path is the root.
pub(crate) fn path_depth(path: &str) -> u64 {
    if path.is_empty() {
        return 1;
    }
    path.bytes().filter(|b| *b == b'.').count() as u64 + 2
}

/// Mapper is one node of the mapping tree. Object nodes are `Arc`-shared
/// with the service's flat path index, and merges reuse untouched subtrees.
#[derive(Debug, Clone)]
pub enum Mapper {
    Object(Arc<ObjectMapper>),
    Field(FieldMapper),
    Alias(AliasMapper),
}

impl Mapper {
    pub fn full_name(&self) -> &str {
        match self {
            Mapper::Object(o) => &o.full_path,
            Mapper::Field(f) => f.full_name(),
            Mapper::Alias(a) => &a.full_name,
        }
    }

    /// Merge an incoming definition of the same path into this one,
    /// returning the merged node. An unchanged field keeps its installed
    /// `Arc<FieldType>`; a contradictory redefinition is a conflict, and
    /// the installed mapping is left untouched by the caller.
    pub fn merge(&self, incoming: &Mapper) -> Result<Mapper> {
        match (self, incoming) {
            (Mapper::Object(old), Mapper::Object(new)) => {
                let mut children = old.children.clone();
                for (name, new_child) in &new.children {
                    let merged = match children.get(name) {
                        Some(old_child) => old_child.merge(new_child)?,
                        None => new_child.clone(),
                    };
                    children.insert(name.clone(), merged);
                }
                Ok(Mapper::Object(Arc::new(ObjectMapper {
                    full_path: old.full_path.clone(),
                    children,
                })))
            }
            (Mapper::Field(old), Mapper::Field(new)) => {
                if old.field_type == new.field_type {
                    Ok(Mapper::Field(old.clone()))
                } else {
                    Err(Error::MergeConflict {
                        field: old.full_name().to_string(),
                        message: format!(
                            "mapper [{}] has different definitions: [{:?}] vs [{:?}]",
                            old.full_name(),
                            old.field_type,
                            new.field_type,
                        ),
                    })
                }
            }
            (Mapper::Alias(old), Mapper::Alias(new)) => {
                if old.target == new.target {
                    Ok(Mapper::Alias(old.clone()))
                } else {
                    Err(Error::MergeConflict {
                        field: old.full_name.clone(),
                        message: format!(
                            "alias [{}] cannot be changed from target [{}] to [{}]",
                            old.full_name, old.target, new.target,
                        ),
                    })
                }
            }
            (old, new) => Err(Error::MergeConflict {
                field: old.full_name().to_string(),
                message: format!(
                    "cannot change mapper [{}] from {} to {}",
                    old.full_name(),
                    old.variant_name(),
                    new.variant_name(),
                ),
            }),
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Mapper::Object(_) => "object",
            Mapper::Field(_) => "concrete field",
            Mapper::Alias(_) => "alias",
        }
    }
}

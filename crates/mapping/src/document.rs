use crate::{
    AliasMapper, Error, FieldKind, FieldMapper, FieldType, Mapper, ObjectMapper, Result,
};
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The reserved metadata field names, exactly as surfaced to clients.
/// Note this is the wire-visible reservation set, not the list of metadata
/// mappers an index runs: `_seq_no`, `_version`, `_source` and
/// `_field_names` are handled internally yet are absent here on purpose.
pub const META_FIELDS: &[&str] = &[
    "_id",
    "_type",
    "_routing",
    "_index",
    "_size",
    "_timestamp",
    "_ttl",
    "_ignored",
];

pub fn is_metadata_field(name: &str) -> bool {
    META_FIELDS.contains(&name)
}

/// The single type name an index may carry.
pub const DOC_TYPE: &str = "_doc";

/// Validate a mapping type name against the reservation rules.
pub fn validate_type_name(name: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidTypeName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }
    if name.chars().count() > 255 {
        return Err(invalid("must not be longer than 255 characters".to_string()));
    }
    if let Some(bad) = name.chars().find(|c| *c == '#' || *c == ',') {
        return Err(invalid(format!("must not contain '{bad}'")));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with a '.'".to_string()));
    }
    if name.starts_with('_') && name != DOC_TYPE {
        return Err(invalid(format!(
            "must not start with '_', unless it is '{DOC_TYPE}'"
        )));
    }
    Ok(())
}

/// A metadata mapper: a reserved `_`-prefixed entry of the mapping root
/// whose parameters are carried opaquely (and canonically ordered).
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMapper {
    pub name: String,
    pub params: BTreeMap<String, Value>,
}

impl MetadataMapper {
    /// Whether this `_routing` mapper requires a routing value on writes.
    pub fn required(&self) -> bool {
        matches!(self.params.get("required"), Some(Value::Bool(true)))
    }
}

/// DocumentMapping is an installed, immutable document schema: the mapper
/// tree, the metadata mappers, and the canonical content source.
///
/// The content source is the compressed canonical JSON serialization, and
/// it round-trips: parsing a mapping's content source yields a mapping
/// whose own content source is byte-equal.
#[derive(Debug)]
pub struct DocumentMapping {
    type_name: String,
    root: Arc<ObjectMapper>,
    metadata: BTreeMap<String, MetadataMapper>,
    source: Bytes,
}

impl DocumentMapping {
    /// Parse a raw JSON mapping body for the given type name.
    pub fn parse(type_name: &str, raw: &Value) -> Result<Self> {
        validate_type_name(type_name)?;

        let Value::Object(body) = raw else {
            return Err(Error::MapperParsing {
                field: type_name.to_string(),
                message: "mapping body must be an object".to_string(),
            });
        };

        let mut metadata = BTreeMap::new();
        let mut root = ObjectMapper::new("");

        for (key, value) in body {
            if key == "properties" {
                root = parse_object("", value)?;
            } else if key.starts_with('_') {
                let Value::Object(params) = value else {
                    return Err(Error::MapperParsing {
                        field: key.clone(),
                        message: "metadata mapper parameters must be an object".to_string(),
                    });
                };
                metadata.insert(
                    key.clone(),
                    MetadataMapper {
                        name: key.clone(),
                        params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    },
                );
            } else {
                return Err(Error::MapperParsing {
                    field: key.clone(),
                    message: "unsupported mapping key".to_string(),
                });
            }
        }

        let mut mapping = Self {
            type_name: type_name.to_string(),
            root: Arc::new(root),
            metadata,
            source: Bytes::new(),
        };
        mapping.source = compress(&mapping.canonical_bytes());
        Ok(mapping)
    }

    /// Parse a compressed content source, recovering the type name from its
    /// self-describing wrapper.
    pub fn parse_compressed(source: &[u8]) -> Result<Self> {
        let raw = decompress(source)?;
        let wrapper: Value = serde_json::from_slice(&raw)?;

        let Value::Object(wrapper) = &wrapper else {
            return Err(Error::MapperParsing {
                field: DOC_TYPE.to_string(),
                message: "mapping source must be a single-keyed object".to_string(),
            });
        };
        let mut entries = wrapper.iter();
        let (Some((type_name, body)), None) = (entries.next(), entries.next()) else {
            return Err(Error::MapperParsing {
                field: DOC_TYPE.to_string(),
                message: "mapping source must hold exactly one type".to_string(),
            });
        };
        Self::parse(type_name, body)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn root(&self) -> &Arc<ObjectMapper> {
        &self.root
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataMapper> {
        &self.metadata
    }

    pub fn routing_required(&self) -> bool {
        self.metadata
            .get("_routing")
            .map(MetadataMapper::required)
            .unwrap_or(false)
    }

    /// The compressed canonical serialization of this mapping.
    pub fn content_source(&self) -> &Bytes {
        &self.source
    }

    /// The canonical (uncompressed) serialization: a single-keyed wrapper
    /// of the type name over the body, with deterministic key order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut body = serde_json::Map::new();
        for (name, meta) in &self.metadata {
            body.insert(
                name.clone(),
                Value::Object(meta.params.clone().into_iter().collect()),
            );
        }
        body.insert("properties".to_string(), serialize_children(&self.root));

        let mut wrapper = serde_json::Map::new();
        wrapper.insert(self.type_name.clone(), Value::Object(body));

        serde_json::to_vec(&Value::Object(wrapper)).expect("mapping serialization is infallible")
    }

    /// Merge an incoming mapping into this one, producing the merged
    /// mapping. Conflicts surface as errors and leave `self` untouched.
    pub fn merge(&self, incoming: &DocumentMapping) -> Result<DocumentMapping> {
        let merged_root = Mapper::Object(self.root.clone())
            .merge(&Mapper::Object(incoming.root.clone()))?;
        let Mapper::Object(root) = merged_root else {
            unreachable!("merging two objects yields an object");
        };

        let mut metadata = self.metadata.clone();
        for (name, meta) in &incoming.metadata {
            metadata.insert(name.clone(), meta.clone());
        }

        let mut merged = Self {
            type_name: self.type_name.clone(),
            root,
            metadata,
            source: Bytes::new(),
        };
        merged.source = compress(&merged.canonical_bytes());
        Ok(merged)
    }

    /// Walk every mapper of the tree in depth-first, name-sorted order.
    pub fn visit_mappers<'s>(&'s self, visit: &mut dyn FnMut(&'s Mapper)) {
        fn walk<'s>(object: &'s ObjectMapper, visit: &mut dyn FnMut(&'s Mapper)) {
            for child in object.children.values() {
                visit(child);
                if let Mapper::Object(inner) = child {
                    walk(inner, visit);
                }
            }
        }
        walk(&self.root, visit)
    }

    /// All concrete field mappers of the tree.
    pub fn field_mappers(&self) -> Vec<&FieldMapper> {
        let mut out = Vec::new();
        self.visit_mappers(&mut |mapper| {
            if let Mapper::Field(f) = mapper {
                out.push(f);
            }
        });
        out
    }

    /// All alias mappers of the tree.
    pub fn alias_mappers(&self) -> Vec<&AliasMapper> {
        let mut out = Vec::new();
        self.visit_mappers(&mut |mapper| {
            if let Mapper::Alias(a) = mapper {
                out.push(a);
            }
        });
        out
    }

    /// All object mappers of the tree, excluding the root, keyed by path.
    pub fn object_mappers(&self) -> BTreeMap<String, Arc<ObjectMapper>> {
        let mut out = BTreeMap::new();
        self.visit_mappers(&mut |mapper| {
            if let Mapper::Object(o) = mapper {
                out.insert(o.full_path.clone(), o.clone());
            }
        });
        out
    }
}

fn compress(raw: &[u8]) -> Bytes {
    Bytes::from(lz4_flex::block::compress_prepend_size(raw))
}

fn decompress(source: &[u8]) -> Result<Vec<u8>> {
    Ok(lz4_flex::block::decompress_size_prepended(source)?)
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Parse a "properties" value into an object mapper at `path`.
fn parse_object(path: &str, properties: &Value) -> Result<ObjectMapper> {
    let Value::Object(properties) = properties else {
        return Err(Error::MapperParsing {
            field: if path.is_empty() { "properties" } else { path }.to_string(),
            message: "'properties' must be an object".to_string(),
        });
    };

    let mut object = ObjectMapper::new(path);
    for (name, definition) in properties {
        let child_path = join_path(path, name);
        let child = parse_mapper(&child_path, definition)?;
        object.children.insert(name.clone(), child);
    }
    Ok(object)
}

fn parse_mapper(path: &str, definition: &Value) -> Result<Mapper> {
    let parse_err = |message: String| Error::MapperParsing {
        field: path.to_string(),
        message,
    };

    let Value::Object(definition) = definition else {
        return Err(parse_err("field definition must be an object".to_string()));
    };

    let type_of = match definition.get("type") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(parse_err("'type' must be a string".to_string())),
        None => None,
    };

    // An explicit object type, or bare "properties", nests.
    if type_of == Some("object") || (type_of.is_none() && definition.contains_key("properties")) {
        for key in definition.keys() {
            if key != "type" && key != "properties" {
                return Err(parse_err(format!("unsupported object mapping key '{key}'")));
            }
        }
        let empty = Value::Object(serde_json::Map::new());
        let properties = definition.get("properties").unwrap_or(&empty);
        return Ok(Mapper::Object(Arc::new(parse_object(path, properties)?)));
    }

    if type_of == Some("alias") {
        for key in definition.keys() {
            if key != "type" && key != "path" {
                return Err(parse_err(format!("unsupported alias mapping key '{key}'")));
            }
        }
        let Some(Value::String(target)) = definition.get("path") else {
            return Err(parse_err("alias requires a string 'path'".to_string()));
        };
        return Ok(Mapper::Alias(AliasMapper {
            full_name: path.to_string(),
            target: target.clone(),
        }));
    }

    let Some(type_of) = type_of else {
        return Err(parse_err("field definition requires a 'type'".to_string()));
    };
    let kind = FieldKind::parse(path, type_of)?;

    let mut field = FieldType {
        full_name: path.to_string(),
        kind,
        index_analyzer: None,
        search_analyzer: None,
        search_quote_analyzer: None,
        nullable: true,
        generated: false,
        has_default: false,
    };

    for (key, value) in definition {
        match (key.as_str(), value) {
            ("type", _) => (),
            ("analyzer", Value::String(s)) => field.index_analyzer = Some(s.clone()),
            ("search_analyzer", Value::String(s)) => field.search_analyzer = Some(s.clone()),
            ("search_quote_analyzer", Value::String(s)) => {
                field.search_quote_analyzer = Some(s.clone())
            }
            ("nullable", Value::Bool(b)) => field.nullable = *b,
            ("generated", Value::Bool(b)) => field.generated = *b,
            ("default", Value::Bool(b)) => field.has_default = *b,
            ("analyzer" | "search_analyzer" | "search_quote_analyzer", _) => {
                return Err(parse_err(format!("'{key}' must be a string")))
            }
            ("nullable" | "generated" | "default", _) => {
                return Err(parse_err(format!("'{key}' must be a boolean")))
            }
            (other, _) => return Err(parse_err(format!("unsupported mapping key '{other}'"))),
        }
    }

    Ok(Mapper::Field(FieldMapper {
        field_type: Arc::new(field),
    }))
}

/// Serialize an object's children as a canonical "properties" value.
fn serialize_children(object: &ObjectMapper) -> Value {
    let mut properties = serde_json::Map::new();
    for (name, child) in &object.children {
        properties.insert(name.clone(), serialize_mapper(child));
    }
    Value::Object(properties)
}

fn serialize_mapper(mapper: &Mapper) -> Value {
    let mut def = serde_json::Map::new();
    match mapper {
        Mapper::Object(o) => {
            def.insert("properties".to_string(), serialize_children(o));
        }
        Mapper::Alias(a) => {
            def.insert("path".to_string(), Value::String(a.target.clone()));
            def.insert("type".to_string(), Value::String("alias".to_string()));
        }
        Mapper::Field(f) => {
            let ft = &f.field_type;
            def.insert(
                "type".to_string(),
                Value::String(ft.kind.as_str().to_string()),
            );
            if let Some(a) = &ft.index_analyzer {
                def.insert("analyzer".to_string(), Value::String(a.clone()));
            }
            if let Some(a) = &ft.search_analyzer {
                def.insert("search_analyzer".to_string(), Value::String(a.clone()));
            }
            if let Some(a) = &ft.search_quote_analyzer {
                def.insert("search_quote_analyzer".to_string(), Value::String(a.clone()));
            }
            if !ft.nullable {
                def.insert("nullable".to_string(), Value::Bool(false));
            }
            if ft.generated {
                def.insert("generated".to_string(), Value::Bool(true));
            }
            if ft.has_default {
                def.insert("default".to_string(), Value::Bool(true));
            }
        }
    }
    Value::Object(def)
}

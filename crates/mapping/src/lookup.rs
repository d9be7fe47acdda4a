use crate::{AliasMapper, Error, FieldMapper, FieldType, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Match `input` against a simple glob `pattern` supporting `*` only.
pub fn simple_match(pattern: &str, input: &str) -> bool {
    let (pattern, input) = (pattern.as_bytes(), input.as_bytes());
    let (mut p, mut i) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while i < input.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, i));
            p += 1;
        } else if p < pattern.len() && pattern[p] == input[i] {
            p += 1;
            i += 1;
        } else if let Some((star_p, star_i)) = star {
            // Backtrack: widen what the last '*' swallowed.
            p = star_p + 1;
            i = star_i + 1;
            star = Some((star_p, star_i + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// FieldTypeLookup maps full field names to their installed types, with
/// aliases resolving to their target's type.
///
/// Instances are immutable and shared. A merge extends the lookup through
/// `with_addition`, which returns a new instance: readers holding the old
/// one keep a consistent view, and unchanged fields carry the same
/// `Arc<FieldType>` into the new instance, so a type reference obtained
/// from any live mapping is identical to what the live lookup returns.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeLookup {
    field_types: BTreeMap<String, Arc<FieldType>>,
    aliases: BTreeMap<String, String>,
}

impl FieldTypeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a copy of this lookup extended with a batch of field and
    /// alias mappers, verifying cross-checks: aliases may not collide with
    /// concrete fields, alias targets must exist, and a field may not be
    /// redefined with a different type.
    pub fn with_addition(
        &self,
        field_mappers: &[FieldMapper],
        alias_mappers: &[AliasMapper],
    ) -> Result<FieldTypeLookup> {
        let mut next = self.clone();

        for mapper in field_mappers {
            let name = mapper.full_name();
            if next.aliases.contains_key(name) {
                return Err(Error::AliasCollision {
                    alias: name.to_string(),
                });
            }
            match next.field_types.get(name) {
                Some(existing) if **existing == *mapper.field_type => {
                    // Unchanged: retain the installed Arc.
                }
                Some(_) => {
                    return Err(Error::MergeConflict {
                        field: name.to_string(),
                        message: "field is already defined with a different type".to_string(),
                    });
                }
                None => {
                    next.field_types
                        .insert(name.to_string(), mapper.field_type.clone());
                }
            }
        }

        for alias in alias_mappers {
            if next.field_types.contains_key(&alias.full_name) {
                return Err(Error::AliasCollision {
                    alias: alias.full_name.clone(),
                });
            }
            if !next.field_types.contains_key(&alias.target) {
                return Err(Error::AliasTargetMissing {
                    alias: alias.full_name.clone(),
                    target: alias.target.clone(),
                });
            }
            match next.aliases.get(&alias.full_name) {
                Some(existing) if *existing != alias.target => {
                    return Err(Error::MergeConflict {
                        field: alias.full_name.clone(),
                        message: format!(
                            "alias already targets [{existing}], cannot retarget to [{}]",
                            alias.target,
                        ),
                    });
                }
                _ => {
                    next.aliases
                        .insert(alias.full_name.clone(), alias.target.clone());
                }
            }
        }

        Ok(next)
    }

    /// The installed type for a full field name, resolving aliases.
    pub fn get(&self, full_name: &str) -> Option<Arc<FieldType>> {
        if let Some(ft) = self.field_types.get(full_name) {
            return Some(ft.clone());
        }
        self.aliases
            .get(full_name)
            .and_then(|target| self.field_types.get(target))
            .cloned()
    }

    /// Expand a simple glob over known field and alias names. A pattern
    /// without a wildcard is returned verbatim, whether or not it is known.
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') {
            return vec![pattern.to_string()];
        }
        self.field_types
            .keys()
            .chain(self.aliases.keys())
            .filter(|name| simple_match(pattern, name))
            .cloned()
            .collect()
    }

    pub fn field_count(&self) -> usize {
        self.field_types.len()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.field_types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldKind;

    fn field(name: &str, kind: FieldKind) -> FieldMapper {
        FieldMapper {
            field_type: Arc::new(FieldType {
                full_name: name.to_string(),
                kind,
                index_analyzer: None,
                search_analyzer: None,
                search_quote_analyzer: None,
                nullable: true,
                generated: false,
                has_default: false,
            }),
        }
    }

    fn alias(name: &str, target: &str) -> AliasMapper {
        AliasMapper {
            full_name: name.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn simple_match_cases() {
        assert!(simple_match("*", ""));
        assert!(simple_match("*", "anything"));
        assert!(simple_match("a*", "a.b.c"));
        assert!(simple_match("*.c", "a.b.c"));
        assert!(simple_match("a*c", "a.b.c"));
        assert!(simple_match("a.b.c", "a.b.c"));
        assert!(!simple_match("a.b", "a.b.c"));
        assert!(!simple_match("b*", "a.b.c"));
        assert!(!simple_match("", "a"));
        assert!(simple_match("", ""));
        assert!(simple_match("a**b", "ab"));
    }

    #[test]
    fn copy_on_add_leaves_original_untouched() {
        let base = FieldTypeLookup::new()
            .with_addition(&[field("a", FieldKind::Long)], &[])
            .unwrap();
        let extended = base
            .with_addition(&[field("b", FieldKind::Text)], &[])
            .unwrap();

        assert!(base.get("b").is_none());
        assert!(extended.get("b").is_some());
        // The shared field keeps reference identity across instances.
        assert!(Arc::ptr_eq(
            &base.get("a").unwrap(),
            &extended.get("a").unwrap()
        ));
    }

    #[test]
    fn aliases_resolve_and_cross_check() {
        let lookup = FieldTypeLookup::new()
            .with_addition(&[field("name", FieldKind::Text)], &[alias("n", "name")])
            .unwrap();

        assert!(Arc::ptr_eq(
            &lookup.get("n").unwrap(),
            &lookup.get("name").unwrap()
        ));

        let err = lookup
            .with_addition(&[], &[alias("broken", "missing")])
            .unwrap_err();
        assert!(matches!(err, Error::AliasTargetMissing { .. }));

        let err = lookup
            .with_addition(&[field("n", FieldKind::Long)], &[])
            .unwrap_err();
        assert!(matches!(err, Error::AliasCollision { .. }));

        let err = lookup
            .with_addition(&[], &[alias("name", "name")])
            .unwrap_err();
        assert!(matches!(err, Error::AliasCollision { .. }));
    }

    #[test]
    fn pattern_expansion() {
        let lookup = FieldTypeLookup::new()
            .with_addition(
                &[
                    field("user.name", FieldKind::Text),
                    field("user.age", FieldKind::Long),
                    field("tag", FieldKind::Keyword),
                ],
                &[],
            )
            .unwrap();

        assert_eq!(
            lookup.matching("user.*"),
            vec!["user.age".to_string(), "user.name".to_string()]
        );
        // No wildcard: returned verbatim, even when unknown.
        assert_eq!(lookup.matching("nope"), vec!["nope".to_string()]);
        assert_eq!(lookup.matching("t*"), vec!["tag".to_string()]);
    }
}

use crate::expr::{EvalError, Expr, Scope};
use crate::table::{Reference, TableSchema};
use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SourceGenError {
    #[error("\"{column}\" must not be null")]
    NotNull { column: String },
    #[error("failed CHECK constraint \"{name}\"")]
    CheckViolated { name: String },
    #[error(
        "given value {given} for generated column '{column}' does not match calculated value {actual}"
    )]
    GeneratedMismatch {
        column: String,
        given: Value,
        actual: Value,
    },
    #[error("{got} assignments were sent for {expected} update columns")]
    AssignmentMismatch { expected: usize, got: usize },
    #[error("{got} insert values were sent for {expected} insert columns")]
    ValueMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Whether user-supplied values for generated columns are checked against
/// the value the shard would compute. The coordinator skips the check when
/// it already computed them itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GeneratedValidation {
    None,
    ValueMatch,
}

/// Serialize a generated document as its canonical payload bytes.
pub fn source_bytes(doc: &Value) -> Bytes {
    Bytes::from(serde_json::to_vec(doc).expect("a JSON document always serializes"))
}

/// Builds the canonical document payload for an insert from the ordered
/// values of one item, enforcing defaults, generated columns, NOT NULL,
/// and CHECK constraints.
pub struct InsertSourceGen<'a> {
    table: &'a TableSchema,
    columns: &'a [Reference],
    validation: GeneratedValidation,
}

impl<'a> InsertSourceGen<'a> {
    pub fn new(
        table: &'a TableSchema,
        columns: &'a [Reference],
        validation: GeneratedValidation,
    ) -> Self {
        Self {
            table,
            columns,
            validation,
        }
    }

    /// Generate the document for `values`, aligned with the insert columns.
    pub fn generate(&self, values: &[Value]) -> Result<Value, SourceGenError> {
        if values.len() != self.columns.len() {
            return Err(SourceGenError::ValueMismatch {
                expected: self.columns.len(),
                got: values.len(),
            });
        }

        let mut doc = Value::Object(serde_json::Map::new());
        for (reference, value) in self.columns.iter().zip(values) {
            insert_at(&mut doc, &reference.name, value.clone());
        }

        self.check_constraints(&mut doc, values)?;
        Ok(doc)
    }

    /// Enforce the table's rules against the assembled document: fill
    /// defaults and generated columns, verify provided generated values
    /// under `ValueMatch`, then NOT NULL and CHECK constraints.
    pub fn check_constraints(
        &self,
        doc: &mut Value,
        values: &[Value],
    ) -> Result<(), SourceGenError> {
        // Defaults apply to columns the insert does not target; a targeted
        // column keeps its value, an explicit NULL included.
        for column in &self.table.columns {
            if let Some(default) = &column.default {
                let targeted = self.columns.iter().any(|r| r.name == column.name());
                if !targeted {
                    let computed = default.eval(Scope {
                        row: doc,
                        inputs: values,
                    })?;
                    insert_at(doc, column.name(), computed);
                }
            }
        }

        // Generated columns evaluate against the filled-in row.
        let snapshot = doc.clone();
        for column in &self.table.columns {
            let Some(generated) = &column.generated else {
                continue;
            };
            let computed = generated.eval(Scope {
                row: &snapshot,
                inputs: values,
            })?;

            match lookup(doc, column.name()) {
                Some(given) if self.validation == GeneratedValidation::ValueMatch => {
                    if *given != computed {
                        return Err(SourceGenError::GeneratedMismatch {
                            column: column.name().to_string(),
                            given: given.clone(),
                            actual: computed,
                        });
                    }
                }
                Some(_) => (),
                None => insert_at(doc, column.name(), computed),
            }
        }

        check_not_null(self.table, doc)?;
        check_constraints(self.table, doc, values)
    }
}

/// Builds the updated document payload for an update item: assignments
/// evaluate against the current document, unassigned columns keep their
/// current value, generated columns recompute, and constraints are checked
/// against the post-update row.
pub struct UpdateSourceGen<'a> {
    table: &'a TableSchema,
    update_columns: &'a [String],
}

impl<'a> UpdateSourceGen<'a> {
    pub fn new(table: &'a TableSchema, update_columns: &'a [String]) -> Self {
        Self {
            table,
            update_columns,
        }
    }

    pub fn generate(
        &self,
        current: &Value,
        assignments: &[Expr],
        insert_values: &[Value],
    ) -> Result<Value, SourceGenError> {
        if assignments.len() != self.update_columns.len() {
            return Err(SourceGenError::AssignmentMismatch {
                expected: self.update_columns.len(),
                got: assignments.len(),
            });
        }

        // All assignments observe the pre-update row.
        let mut doc = current.clone();
        let scope = Scope {
            row: current,
            inputs: insert_values,
        };
        for (column, assignment) in self.update_columns.iter().zip(assignments) {
            let value = assignment.eval(scope)?;
            insert_at(&mut doc, column, value);
        }

        let snapshot = doc.clone();
        for column in &self.table.columns {
            if let Some(generated) = &column.generated {
                let computed = generated.eval(Scope {
                    row: &snapshot,
                    inputs: insert_values,
                })?;
                insert_at(&mut doc, column.name(), computed);
            }
        }

        check_not_null(self.table, &doc)?;
        check_constraints(self.table, &doc, insert_values)?;
        Ok(doc)
    }
}

fn check_not_null(table: &TableSchema, doc: &Value) -> Result<(), SourceGenError> {
    for column in &table.columns {
        if table.is_not_null(column.name()) && is_absent(doc, column.name()) {
            return Err(SourceGenError::NotNull {
                column: column.name().to_string(),
            });
        }
    }
    Ok(())
}

fn check_constraints(
    table: &TableSchema,
    doc: &Value,
    inputs: &[Value],
) -> Result<(), SourceGenError> {
    for check in &table.checks {
        let outcome = check.expr.eval(Scope { row: doc, inputs })?;
        // Ternary logic: only a definite false fails the constraint.
        if outcome == Value::Bool(false) {
            return Err(SourceGenError::CheckViolated {
                name: check.name.clone(),
            });
        }
    }
    Ok(())
}

fn lookup<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    crate::expr::lookup_path(doc, path).filter(|v| !v.is_null())
}

fn is_absent(doc: &Value, path: &str) -> bool {
    lookup(doc, path).is_none()
}

/// Set a dotted path within a document, creating interior objects.
fn insert_at(doc: &mut Value, path: &str, value: Value) {
    let mut node = doc;
    let mut steps = path.split('.').peekable();
    while let Some(step) = steps.next() {
        if !node.is_object() {
            *node = Value::Object(serde_json::Map::new());
        }
        let map = node.as_object_mut().expect("node was just made an object");
        if steps.peek().is_none() {
            map.insert(step.to_string(), value);
            return;
        }
        node = map
            .entry(step.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Func;
    use crate::table::{ColumnKind, ColumnSchema};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn table() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnSchema::plain("id", ColumnKind::Text),
                ColumnSchema::plain("qty", ColumnKind::Long).not_null(),
                ColumnSchema::plain("price", ColumnKind::Double),
                ColumnSchema::plain("total", ColumnKind::Double).generated(Expr::Call {
                    func: Func::Multiply,
                    args: vec![
                        Expr::Column("qty".to_string()),
                        Expr::Column("price".to_string()),
                    ],
                }),
                ColumnSchema::plain("state", ColumnKind::Text).with_default(Expr::Literal(
                    json!("pending"),
                )),
            ],
        )
        .with_primary_keys(&["id"])
        .with_check(
            "qty_positive",
            Expr::Call {
                func: Func::Gt,
                args: vec![Expr::Column("qty".to_string()), Expr::Literal(json!(0))],
            },
        )
    }

    fn insert_columns() -> Vec<Reference> {
        vec![
            Reference::new("id", ColumnKind::Text),
            Reference::new("qty", ColumnKind::Long),
            Reference::new("price", ColumnKind::Double),
        ]
    }

    #[test]
    fn insert_fills_defaults_and_generated_columns() {
        let table = table();
        let columns = insert_columns();
        let gen = InsertSourceGen::new(&table, &columns, GeneratedValidation::ValueMatch);

        let doc = gen.generate(&[json!("o-1"), json!(3), json!(2.5)]).unwrap();
        assert_eq!(
            doc,
            json!({"id": "o-1", "qty": 3, "price": 2.5, "total": 7.5, "state": "pending"})
        );
    }

    #[test]
    fn insert_enforces_not_null_including_primary_keys() {
        let table = table();
        let columns = insert_columns();
        let gen = InsertSourceGen::new(&table, &columns, GeneratedValidation::ValueMatch);

        let err = gen
            .generate(&[json!("o-1"), Value::Null, json!(1.0)])
            .unwrap_err();
        assert!(matches!(err, SourceGenError::NotNull { column } if column == "qty"));

        // The primary key is implicitly NOT NULL.
        let err = gen
            .generate(&[Value::Null, json!(1), json!(1.0)])
            .unwrap_err();
        assert!(matches!(err, SourceGenError::NotNull { column } if column == "id"));
    }

    #[test]
    fn insert_enforces_check_constraints() {
        let table = table();
        let columns = insert_columns();
        let gen = InsertSourceGen::new(&table, &columns, GeneratedValidation::ValueMatch);

        let err = gen
            .generate(&[json!("o-1"), json!(0), json!(1.0)])
            .unwrap_err();
        assert!(matches!(err, SourceGenError::CheckViolated { name } if name == "qty_positive"));
    }

    #[test]
    fn provided_generated_values_are_matched_or_trusted() {
        let table = table();
        let columns = vec![
            Reference::new("id", ColumnKind::Text),
            Reference::new("qty", ColumnKind::Long),
            Reference::new("price", ColumnKind::Double),
            Reference::new("total", ColumnKind::Double),
        ];

        let strict = InsertSourceGen::new(&table, &columns, GeneratedValidation::ValueMatch);
        let values = [json!("o-1"), json!(3), json!(2.0), json!(6.0)];
        assert_eq!(strict.generate(&values).unwrap()["total"], json!(6.0));

        let bad = [json!("o-1"), json!(3), json!(2.0), json!(99.0)];
        let err = strict.generate(&bad).unwrap_err();
        assert!(matches!(err, SourceGenError::GeneratedMismatch { column, .. } if column == "total"));

        // Without value matching the provided value is trusted as-is.
        let lax = InsertSourceGen::new(&table, &columns, GeneratedValidation::None);
        assert_eq!(lax.generate(&bad).unwrap()["total"], json!(99.0));
    }

    #[test]
    fn update_assignments_observe_the_pre_update_row() {
        let table = TableSchema::new(
            "t",
            vec![
                ColumnSchema::plain("a", ColumnKind::Long),
                ColumnSchema::plain("b", ColumnKind::Long),
            ],
        );
        let update_columns = vec!["a".to_string(), "b".to_string()];
        let gen = UpdateSourceGen::new(&table, &update_columns);

        let current = json!({"a": 1, "b": 10, "keep": "yes"});
        // b := a + 1 must see the old a, not the assigned one.
        let doc = gen
            .generate(
                &current,
                &[
                    Expr::Literal(json!(100)),
                    Expr::Call {
                        func: Func::Add,
                        args: vec![Expr::Column("a".to_string()), Expr::Literal(json!(1))],
                    },
                ],
                &[],
            )
            .unwrap();

        assert_eq!(doc, json!({"a": 100, "b": 2, "keep": "yes"}));
    }

    #[test]
    fn update_recomputes_generated_and_checks_post_update_row() {
        let table = table();
        let update_columns = vec!["qty".to_string()];
        let gen = UpdateSourceGen::new(&table, &update_columns);

        let current = json!({"id": "o-1", "qty": 3, "price": 2.5, "total": 7.5, "state": "pending"});
        let doc = gen
            .generate(&current, &[Expr::Literal(json!(4))], &[])
            .unwrap();
        assert_eq!(doc["total"], json!(10.0));

        let err = gen
            .generate(&current, &[Expr::Literal(json!(-1))], &[])
            .unwrap_err();
        assert!(matches!(err, SourceGenError::CheckViolated { .. }));
    }

    #[test]
    fn update_assignments_may_reference_insert_values() {
        let table = TableSchema::new("t", vec![ColumnSchema::plain("qty", ColumnKind::Long)]);
        let update_columns = vec!["qty".to_string()];
        let gen = UpdateSourceGen::new(&table, &update_columns);

        // qty := qty + excluded.qty, as an ON CONFLICT assignment streams it.
        let doc = gen
            .generate(
                &json!({"qty": 10}),
                &[Expr::Call {
                    func: Func::Add,
                    args: vec![Expr::Column("qty".to_string()), Expr::Input(0)],
                }],
                &[json!(5)],
            )
            .unwrap();
        assert_eq!(doc, json!({"qty": 15}));
    }

    #[test]
    fn dotted_paths_nest_objects() {
        let mut doc = json!({});
        insert_at(&mut doc, "a.b.c", json!(1));
        insert_at(&mut doc, "a.d", json!(2));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}, "d": 2}}));
    }
}

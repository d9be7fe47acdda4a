use crate::expr::Expr;

/// The wire-level value type of a column, used to pick its value streamer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ColumnKind {
    Boolean,
    Long,
    Double,
    Text,
    /// Self-describing JSON; the fallback for object and array columns.
    Json,
}

impl ColumnKind {
    pub(crate) fn discriminant(&self) -> u8 {
        match self {
            ColumnKind::Boolean => 0,
            ColumnKind::Long => 1,
            ColumnKind::Double => 2,
            ColumnKind::Text => 3,
            ColumnKind::Json => 4,
        }
    }

    pub(crate) fn from_discriminant(d: u8) -> Option<Self> {
        Some(match d {
            0 => ColumnKind::Boolean,
            1 => ColumnKind::Long,
            2 => ColumnKind::Double,
            3 => ColumnKind::Text,
            4 => ColumnKind::Json,
            _ => return None,
        })
    }
}

/// A resolved column reference as carried by a write request: the dotted
/// column name plus the value type its values stream as.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reference {
    pub name: String,
    pub kind: ColumnKind,
}

impl Reference {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Per-column schema the source generators enforce.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub reference: Reference,
    pub nullable: bool,
    /// A generated column: its value is computed, not supplied.
    pub generated: Option<Expr>,
    /// Applied when an insert omits the column.
    pub default: Option<Expr>,
}

impl ColumnSchema {
    pub fn plain(name: &str, kind: ColumnKind) -> Self {
        Self {
            reference: Reference::new(name, kind),
            nullable: true,
            generated: None,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn generated(mut self, expr: Expr) -> Self {
        self.generated = Some(expr);
        self
    }

    pub fn with_default(mut self, expr: Expr) -> Self {
        self.default = Some(expr);
        self
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

/// A named CHECK constraint evaluated against the written row.
#[derive(Debug, Clone)]
pub struct CheckConstraint {
    pub name: String,
    pub expr: Expr,
}

/// The table-level schema a shard enforces on its write path.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_keys: Vec<String>,
    pub routing_column: Option<String>,
    pub checks: Vec<CheckConstraint>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_keys: Vec::new(),
            routing_column: None,
            checks: Vec::new(),
        }
    }

    pub fn with_primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_routing(mut self, column: &str) -> Self {
        self.routing_column = Some(column.to_string());
        self
    }

    pub fn with_check(mut self, name: &str, expr: Expr) -> Self {
        self.checks.push(CheckConstraint {
            name: name.to_string(),
            expr,
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// NOT NULL applies when declared, and implicitly to primary-key and
    /// routing columns.
    pub fn is_not_null(&self, name: &str) -> bool {
        if self.primary_keys.iter().any(|k| k == name) {
            return true;
        }
        if self.routing_column.as_deref() == Some(name) {
            return true;
        }
        self.column(name).map(|c| !c.nullable).unwrap_or(false)
    }
}

use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EvalError {
    #[error("expression input #{0} is out of range")]
    InputOutOfRange(usize),
    #[error("cannot apply {func} to {value}")]
    BadArgument { func: &'static str, value: Value },
    #[error("{func} expects {expected} arguments, got {got}")]
    BadArity {
        func: &'static str,
        expected: usize,
        got: usize,
    },
}

/// The builtin functions an expression may apply. The set is closed so it
/// can be streamed by discriminant; the planner resolves anything richer
/// before it reaches the shard.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Func {
    Concat,
    Add,
    Subtract,
    Multiply,
    Lower,
    Upper,
    Coalesce,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl Func {
    pub(crate) fn discriminant(&self) -> u8 {
        match self {
            Func::Concat => 0,
            Func::Add => 1,
            Func::Subtract => 2,
            Func::Multiply => 3,
            Func::Lower => 4,
            Func::Upper => 5,
            Func::Coalesce => 6,
            Func::Eq => 7,
            Func::NotEq => 8,
            Func::Gt => 9,
            Func::GtEq => 10,
            Func::Lt => 11,
            Func::LtEq => 12,
        }
    }

    pub(crate) fn from_discriminant(d: u8) -> Option<Self> {
        Some(match d {
            0 => Func::Concat,
            1 => Func::Add,
            2 => Func::Subtract,
            3 => Func::Multiply,
            4 => Func::Lower,
            5 => Func::Upper,
            6 => Func::Coalesce,
            7 => Func::Eq,
            8 => Func::NotEq,
            9 => Func::Gt,
            10 => Func::GtEq,
            11 => Func::Lt,
            12 => Func::LtEq,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Func::Concat => "concat",
            Func::Add => "add",
            Func::Subtract => "subtract",
            Func::Multiply => "multiply",
            Func::Lower => "lower",
            Func::Upper => "upper",
            Func::Coalesce => "coalesce",
            Func::Eq => "eq",
            Func::NotEq => "neq",
            Func::Gt => "gt",
            Func::GtEq => "gte",
            Func::Lt => "lt",
            Func::LtEq => "lte",
        }
    }
}

/// A planner-resolved expression, evaluated on the shard against a current
/// document row and the positional insert values of the item.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant.
    Literal(Value),
    /// A dotted path into the evaluated row.
    Column(String),
    /// A positional reference into the item's insert values, the way an
    /// ON CONFLICT assignment addresses the excluded row.
    Input(usize),
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

/// The evaluation context: the row under evaluation plus the item's
/// positional insert values.
#[derive(Debug, Copy, Clone)]
pub struct Scope<'s> {
    pub row: &'s Value,
    pub inputs: &'s [Value],
}

impl Expr {
    pub fn eval(&self, scope: Scope<'_>) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(path) => Ok(lookup_path(scope.row, path).cloned().unwrap_or(Value::Null)),
            Expr::Input(index) => scope
                .inputs
                .get(*index)
                .cloned()
                .ok_or(EvalError::InputOutOfRange(*index)),
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|a| a.eval(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                apply(*func, args)
            }
        }
    }
}

/// Resolve a dotted path against a JSON row.
pub fn lookup_path<'v>(row: &'v Value, path: &str) -> Option<&'v Value> {
    let mut node = row;
    for step in path.split('.') {
        node = node.as_object()?.get(step)?;
    }
    Some(node)
}

fn apply(func: Func, mut args: Vec<Value>) -> Result<Value, EvalError> {
    use Func::*;

    let arity = |expected: usize| -> Result<(), EvalError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(EvalError::BadArity {
                func: func.name(),
                expected,
                got: args.len(),
            })
        }
    };

    match func {
        Coalesce => Ok(args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null)),

        Concat => {
            let mut out = String::new();
            for v in &args {
                match v {
                    // SQL concat treats NULL as the empty string.
                    Value::Null => (),
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }

        Lower | Upper => {
            arity(1)?;
            match args.pop().unwrap() {
                Value::Null => Ok(Value::Null),
                Value::String(s) => Ok(Value::String(if func == Lower {
                    s.to_lowercase()
                } else {
                    s.to_uppercase()
                })),
                other => Err(EvalError::BadArgument {
                    func: func.name(),
                    value: other,
                }),
            }
        }

        Add | Subtract | Multiply => {
            arity(2)?;
            let rhs = args.pop().unwrap();
            let lhs = args.pop().unwrap();
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            match (numeric(func, lhs)?, numeric(func, rhs)?) {
                (Num::Int(l), Num::Int(r)) => {
                    let v = match func {
                        Add => l.wrapping_add(r),
                        Subtract => l.wrapping_sub(r),
                        Multiply => l.wrapping_mul(r),
                        _ => unreachable!(),
                    };
                    Ok(Value::from(v))
                }
                (l, r) => {
                    let (l, r) = (l.as_f64(), r.as_f64());
                    let v = match func {
                        Add => l + r,
                        Subtract => l - r,
                        Multiply => l * r,
                        _ => unreachable!(),
                    };
                    Ok(serde_json::Number::from_f64(v)
                        .map(Value::Number)
                        .unwrap_or(Value::Null))
                }
            }
        }

        Eq | NotEq | Gt | GtEq | Lt | LtEq => {
            arity(2)?;
            let rhs = args.pop().unwrap();
            let lhs = args.pop().unwrap();
            // SQL ternary logic: comparisons against NULL are NULL.
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            let ord = compare(func, &lhs, &rhs)?;
            let b = match func {
                Eq => ord == std::cmp::Ordering::Equal,
                NotEq => ord != std::cmp::Ordering::Equal,
                Gt => ord == std::cmp::Ordering::Greater,
                GtEq => ord != std::cmp::Ordering::Less,
                Lt => ord == std::cmp::Ordering::Less,
                LtEq => ord != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(Value::Bool(b))
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Float(f) => *f,
        }
    }
}

fn numeric(func: Func, v: Value) -> Result<Num, EvalError> {
    match &v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Num::Int(i))
            } else {
                Ok(Num::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        _ => Err(EvalError::BadArgument {
            func: func.name(),
            value: v,
        }),
    }
}

fn compare(func: Func, lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, EvalError> {
    use std::cmp::Ordering;
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => {
            let (l, r) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            Ok(l.partial_cmp(&r).unwrap_or(Ordering::Equal))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Ok(l.cmp(r)),
        _ => Err(EvalError::BadArgument {
            func: func.name(),
            value: lhs.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope<'s>(row: &'s Value, inputs: &'s [Value]) -> Scope<'s> {
        Scope { row, inputs }
    }

    #[test]
    fn columns_resolve_dotted_paths_and_missing_is_null() {
        let row = json!({"a": 1, "o": {"b": "x"}});
        assert_eq!(
            Expr::Column("o.b".to_string()).eval(scope(&row, &[])).unwrap(),
            json!("x")
        );
        assert_eq!(
            Expr::Column("missing".to_string())
                .eval(scope(&row, &[]))
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn inputs_are_positional_and_bounded() {
        let row = json!({});
        let inputs = vec![json!(7)];
        assert_eq!(Expr::Input(0).eval(scope(&row, &inputs)).unwrap(), json!(7));
        assert_eq!(
            Expr::Input(1).eval(scope(&row, &inputs)).unwrap_err(),
            EvalError::InputOutOfRange(1)
        );
    }

    #[test]
    fn arithmetic_and_null_propagation() {
        let row = json!({"n": 2});
        let double = Expr::Call {
            func: Func::Multiply,
            args: vec![Expr::Column("n".to_string()), Expr::Literal(json!(3))],
        };
        assert_eq!(double.eval(scope(&row, &[])).unwrap(), json!(6));

        let with_null = Expr::Call {
            func: Func::Add,
            args: vec![Expr::Literal(Value::Null), Expr::Literal(json!(1))],
        };
        assert_eq!(with_null.eval(scope(&row, &[])).unwrap(), Value::Null);

        let bad = Expr::Call {
            func: Func::Add,
            args: vec![Expr::Literal(json!("x")), Expr::Literal(json!(1))],
        };
        assert!(bad.eval(scope(&row, &[])).is_err());
    }

    #[test]
    fn comparisons_follow_ternary_logic() {
        let row = json!({});
        let gt = |l: Value, r: Value| Expr::Call {
            func: Func::Gt,
            args: vec![Expr::Literal(l), Expr::Literal(r)],
        };
        assert_eq!(gt(json!(2), json!(1)).eval(scope(&row, &[])).unwrap(), json!(true));
        assert_eq!(
            gt(json!(1), json!(2)).eval(scope(&row, &[])).unwrap(),
            json!(false)
        );
        assert_eq!(
            gt(Value::Null, json!(2)).eval(scope(&row, &[])).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn concat_and_case_functions() {
        let row = json!({"first": "Ada", "last": "Lovelace"});
        let full = Expr::Call {
            func: Func::Concat,
            args: vec![
                Expr::Column("first".to_string()),
                Expr::Literal(json!(" ")),
                Expr::Column("last".to_string()),
            ],
        };
        assert_eq!(full.eval(scope(&row, &[])).unwrap(), json!("Ada Lovelace"));

        let upper = Expr::Call {
            func: Func::Upper,
            args: vec![Expr::Column("first".to_string())],
        };
        assert_eq!(upper.eval(scope(&row, &[])).unwrap(), json!("ADA"));
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        let row = json!({});
        let expr = Expr::Call {
            func: Func::Coalesce,
            args: vec![
                Expr::Literal(Value::Null),
                Expr::Literal(json!("fallback")),
                Expr::Literal(json!("unused")),
            ],
        };
        assert_eq!(expr.eval(scope(&row, &[])).unwrap(), json!("fallback"));
    }
}

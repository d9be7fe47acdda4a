use crate::expr::{Expr, Func};
use crate::request::{DuplicateKeyAction, Item, ShardId, ShardWriteRequest};
use crate::table::{ColumnKind, Reference};
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;
use wire::{Decoder, Encoder, ProtocolVersion};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Wire(#[from] wire::Error),
    #[error("invalid JSON in wire payload")]
    Json(#[from] serde_json::Error),
    #[error("value {value} cannot stream as {kind:?} for column '{column}'")]
    BadValue {
        column: String,
        kind: ColumnKind,
        value: Value,
    },
    #[error("item carries {got} insert values but the request names {expected} insert columns")]
    ValueCountMismatch { expected: usize, got: usize },
    #[error("job id must be 16 bytes, got {0}")]
    BadJobId(usize),
    #[error("mode bitfield {bits:#x} must carry exactly one duplicate-key action")]
    BadModeBits { bits: u64 },
}

// Mode bitfield, packed since V_4_2_0.
const MODE_CONTINUE_ON_ERROR: u64 = 1 << 0;
const MODE_VALIDATE_CONSTRAINTS: u64 = 1 << 1;
const MODE_DUPLICATE_KEY_IGNORE: u64 = 1 << 2;
const MODE_DUPLICATE_KEY_OVERWRITE: u64 = 1 << 3;
const MODE_DUPLICATE_KEY_UPDATE_OR_FAIL: u64 = 1 << 4;

impl ShardWriteRequest {
    /// Serialize for a peer speaking `version`. The mode flags pack into a
    /// single bitfield since 4.2.0 and stream as discrete fields before
    /// it; either form decodes to the same request semantics.
    pub fn encode(&self, version: ProtocolVersion) -> Result<Bytes, CodecError> {
        let mut enc = Encoder::new();

        enc.put_str(&self.shard_id.index);
        enc.put_uvarint(self.shard_id.shard as u64);
        enc.put_bytes(self.job_id.as_bytes());

        match &self.update_columns {
            Some(columns) => {
                enc.put_uvarint(columns.len() as u64);
                for column in columns {
                    enc.put_str(column);
                }
            }
            None => enc.put_uvarint(0),
        }

        match &self.insert_columns {
            Some(columns) => {
                enc.put_uvarint(columns.len() as u64);
                for reference in columns {
                    enc.put_str(&reference.name);
                    enc.put_u8(reference.kind.discriminant());
                }
            }
            None => enc.put_uvarint(0),
        }

        if version.at_least(ProtocolVersion::V_4_2_0) {
            let mut bits = match self.duplicate_key_action {
                DuplicateKeyAction::Ignore => MODE_DUPLICATE_KEY_IGNORE,
                DuplicateKeyAction::Overwrite => MODE_DUPLICATE_KEY_OVERWRITE,
                DuplicateKeyAction::UpdateOrFail => MODE_DUPLICATE_KEY_UPDATE_OR_FAIL,
            };
            if self.continue_on_error {
                bits |= MODE_CONTINUE_ON_ERROR;
            }
            if self.validate_constraints {
                bits |= MODE_VALIDATE_CONSTRAINTS;
            }
            enc.put_uvarint(bits);
        } else {
            enc.put_bool(self.continue_on_error);
            enc.put_uvarint(self.duplicate_key_action.ordinal());
            enc.put_bool(self.validate_constraints);
        }

        enc.put_uvarint(self.session_settings.len() as u64);
        for (key, value) in &self.session_settings {
            enc.put_str(key);
            enc.put_str(value);
        }

        enc.put_uvarint(self.items.len() as u64);
        for item in &self.items {
            encode_item(&mut enc, item, self.insert_columns.as_deref())?;
        }

        if version.at_least(ProtocolVersion::V_4_2_0) {
            match &self.return_values {
                Some(exprs) => {
                    enc.put_uvarint(exprs.len() as u64);
                    for expr in exprs {
                        encode_expr(&mut enc, expr)?;
                    }
                }
                None => enc.put_uvarint(0),
            }
        }

        Ok(enc.into_bytes())
    }

    /// Decode a request serialized by a peer speaking `version`.
    pub fn decode(input: &[u8], version: ProtocolVersion) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(input);

        let index = dec.str()?.to_string();
        let shard = dec.uvarint()? as u32;
        let job_bytes = dec.bytes()?;
        let job_id = Uuid::from_slice(job_bytes).map_err(|_| CodecError::BadJobId(job_bytes.len()))?;

        let update_columns = match dec.uvarint()? {
            0 => None,
            n => {
                let mut columns = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    columns.push(dec.str()?.to_string());
                }
                Some(columns)
            }
        };

        let insert_columns = match dec.uvarint()? {
            0 => None,
            n => {
                let mut columns = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let name = dec.str()?.to_string();
                    let kind = dec.u8()?;
                    let kind =
                        ColumnKind::from_discriminant(kind).ok_or(wire::Error::UnknownDiscriminant {
                            kind: "column kind",
                            value: kind as u64,
                        })?;
                    columns.push(Reference { name, kind });
                }
                Some(columns)
            }
        };

        let (continue_on_error, validate_constraints, duplicate_key_action) =
            if version.at_least(ProtocolVersion::V_4_2_0) {
                let bits = dec.uvarint()?;
                let action = match bits
                    & (MODE_DUPLICATE_KEY_IGNORE
                        | MODE_DUPLICATE_KEY_OVERWRITE
                        | MODE_DUPLICATE_KEY_UPDATE_OR_FAIL)
                {
                    MODE_DUPLICATE_KEY_IGNORE => DuplicateKeyAction::Ignore,
                    MODE_DUPLICATE_KEY_OVERWRITE => DuplicateKeyAction::Overwrite,
                    MODE_DUPLICATE_KEY_UPDATE_OR_FAIL => DuplicateKeyAction::UpdateOrFail,
                    _ => return Err(CodecError::BadModeBits { bits }),
                };
                (
                    bits & MODE_CONTINUE_ON_ERROR != 0,
                    bits & MODE_VALIDATE_CONSTRAINTS != 0,
                    action,
                )
            } else {
                let continue_on_error = dec.bool()?;
                let ordinal = dec.uvarint()?;
                let action =
                    DuplicateKeyAction::from_ordinal(ordinal).ok_or(wire::Error::UnknownDiscriminant {
                        kind: "duplicate key action",
                        value: ordinal,
                    })?;
                let validate_constraints = dec.bool()?;
                (continue_on_error, validate_constraints, action)
            };

        let mut session_settings = BTreeMap::new();
        for _ in 0..dec.uvarint()? {
            let key = dec.str()?.to_string();
            let value = dec.str()?.to_string();
            session_settings.insert(key, value);
        }

        let item_count = dec.uvarint()?;
        let mut items = Vec::with_capacity(item_count as usize);
        for _ in 0..item_count {
            items.push(decode_item(&mut dec, insert_columns.as_deref())?);
        }

        let return_values = if version.at_least(ProtocolVersion::V_4_2_0) {
            match dec.uvarint()? {
                0 => None,
                n => {
                    let mut exprs = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        exprs.push(decode_expr(&mut dec)?);
                    }
                    Some(exprs)
                }
            }
        } else {
            None
        };

        dec.finish()?;

        Ok(Self {
            shard_id: ShardId::new(index, shard),
            job_id,
            continue_on_error,
            validate_constraints,
            duplicate_key_action,
            session_settings,
            update_columns,
            insert_columns,
            return_values,
            items,
        })
    }
}

fn encode_item(
    enc: &mut Encoder,
    item: &Item,
    insert_columns: Option<&[Reference]>,
) -> Result<(), CodecError> {
    enc.put_str(&item.id);
    enc.put_varint(item.version);
    enc.put_varint(item.seq_no);
    enc.put_varint(item.primary_term);

    match &item.update_assignments {
        Some(assignments) => {
            enc.put_bool(true);
            enc.put_uvarint(assignments.len() as u64);
            for expr in assignments {
                encode_expr(enc, expr)?;
            }
        }
        None => enc.put_bool(false),
    }

    match &item.insert_values {
        Some(values) => {
            let columns = insert_columns.unwrap_or_default();
            if values.len() != columns.len() {
                return Err(CodecError::ValueCountMismatch {
                    expected: columns.len(),
                    got: values.len(),
                });
            }
            enc.put_uvarint(values.len() as u64);
            for (value, reference) in values.iter().zip(columns) {
                encode_value(enc, value, reference)?;
            }
        }
        None => enc.put_uvarint(0),
    }

    match &item.source {
        Some(source) => {
            enc.put_bool(true);
            enc.put_bytes(source);
        }
        None => enc.put_bool(false),
    }
    Ok(())
}

fn decode_item(
    dec: &mut Decoder<'_>,
    insert_columns: Option<&[Reference]>,
) -> Result<Item, CodecError> {
    let id = dec.str()?.to_string();
    let version = dec.varint()?;
    let seq_no = dec.varint()?;
    let primary_term = dec.varint()?;

    let update_assignments = if dec.bool()? {
        let count = dec.uvarint()?;
        let mut exprs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exprs.push(decode_expr(dec)?);
        }
        Some(exprs)
    } else {
        None
    };

    let insert_values = match dec.uvarint()? {
        0 => None,
        n => {
            let columns = insert_columns.unwrap_or_default();
            if n as usize != columns.len() {
                return Err(CodecError::ValueCountMismatch {
                    expected: columns.len(),
                    got: n as usize,
                });
            }
            let mut values = Vec::with_capacity(n as usize);
            for reference in columns {
                values.push(decode_value(dec, reference)?);
            }
            Some(values)
        }
    };

    let source = if dec.bool()? {
        Some(Bytes::copy_from_slice(dec.bytes()?))
    } else {
        None
    };

    Ok(Item {
        id,
        update_assignments,
        insert_values,
        version,
        seq_no,
        primary_term,
        source,
    })
}

/// Stream one value with the streamer its column's type selects.
/// Every value is guarded by a null byte; NULLs carry no payload.
fn encode_value(enc: &mut Encoder, value: &Value, reference: &Reference) -> Result<(), CodecError> {
    if value.is_null() {
        enc.put_bool(false);
        return Ok(());
    }
    enc.put_bool(true);

    let bad = || CodecError::BadValue {
        column: reference.name.clone(),
        kind: reference.kind,
        value: value.clone(),
    };

    match reference.kind {
        ColumnKind::Boolean => enc.put_bool(value.as_bool().ok_or_else(bad)?),
        ColumnKind::Long => enc.put_varint(value.as_i64().ok_or_else(bad)?),
        ColumnKind::Double => enc.put_f64(value.as_f64().ok_or_else(bad)?),
        ColumnKind::Text => enc.put_str(value.as_str().ok_or_else(bad)?),
        ColumnKind::Json => enc.put_bytes(&serde_json::to_vec(value)?),
    }
    Ok(())
}

fn decode_value(dec: &mut Decoder<'_>, reference: &Reference) -> Result<Value, CodecError> {
    if !dec.bool()? {
        return Ok(Value::Null);
    }
    Ok(match reference.kind {
        ColumnKind::Boolean => Value::Bool(dec.bool()?),
        ColumnKind::Long => Value::from(dec.varint()?),
        ColumnKind::Double => serde_json::Number::from_f64(dec.f64()?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnKind::Text => Value::String(dec.str()?.to_string()),
        ColumnKind::Json => serde_json::from_slice(dec.bytes()?)?,
    })
}

// Expression stream tags.
const EXPR_LITERAL: u8 = 0;
const EXPR_COLUMN: u8 = 1;
const EXPR_INPUT: u8 = 2;
const EXPR_CALL: u8 = 3;

fn encode_expr(enc: &mut Encoder, expr: &Expr) -> Result<(), CodecError> {
    match expr {
        Expr::Literal(value) => {
            enc.put_u8(EXPR_LITERAL);
            enc.put_bytes(&serde_json::to_vec(value)?);
        }
        Expr::Column(path) => {
            enc.put_u8(EXPR_COLUMN);
            enc.put_str(path);
        }
        Expr::Input(index) => {
            enc.put_u8(EXPR_INPUT);
            enc.put_uvarint(*index as u64);
        }
        Expr::Call { func, args } => {
            enc.put_u8(EXPR_CALL);
            enc.put_u8(func.discriminant());
            enc.put_uvarint(args.len() as u64);
            for arg in args {
                encode_expr(enc, arg)?;
            }
        }
    }
    Ok(())
}

fn decode_expr(dec: &mut Decoder<'_>) -> Result<Expr, CodecError> {
    let tag = dec.u8()?;
    Ok(match tag {
        EXPR_LITERAL => Expr::Literal(serde_json::from_slice(dec.bytes()?)?),
        EXPR_COLUMN => Expr::Column(dec.str()?.to_string()),
        EXPR_INPUT => Expr::Input(dec.uvarint()? as usize),
        EXPR_CALL => {
            let discriminant = dec.u8()?;
            let func = Func::from_discriminant(discriminant).ok_or(
                wire::Error::UnknownDiscriminant {
                    kind: "expression function",
                    value: discriminant as u64,
                },
            )?;
            let count = dec.uvarint()?;
            let mut args = Vec::with_capacity(count as usize);
            for _ in 0..count {
                args.push(decode_expr(dec)?);
            }
            Expr::Call { func, args }
        }
        other => {
            return Err(wire::Error::UnknownDiscriminant {
                kind: "expression",
                value: other as u64,
            }
            .into())
        }
    })
}

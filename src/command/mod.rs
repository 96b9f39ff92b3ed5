//! Command codec
//!
//! Translates an [`Operation`] to and from the opaque byte payload the
//! consensus engine carries in its log entries. Decoding never panics on
//! untrusted input: size is bounded and trailing bytes are rejected.


use bincode::Options;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_COMMAND_BYTES;
use crate::constants::OP_DELETE;
use crate::constants::OP_INSERT;
use crate::constants::OP_UPDATE;
use crate::DecodeError;
use crate::EncodeError;

/// Decoded intent carried inside a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { key: String, value: String },
    Delete { key: String },
    /// Upsert: the store writes the value whether or not the key exists.
    Update { key: String, value: String },
}

/// On-the-wire layout. The tag is decoded separately from the body so an
/// unrecognized tag can be told apart from a corrupt payload.
#[derive(Serialize, Deserialize)]
struct WireCommand {
    op: u8,
    key: String,
    value: Option<String>,
}

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_COMMAND_BYTES)
        .reject_trailing_bytes()
}

impl Operation {
    pub fn insert(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Operation::Insert {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Operation::Delete { key: key.into() }
    }

    pub fn update(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Operation::Update {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Operation::Insert { key, .. } | Operation::Delete { key } | Operation::Update { key, .. } => key,
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Delete { .. } => "delete",
            Operation::Update { .. } => "update",
        }
    }

    /// Fails only when the command would not fit the codec's size limit.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let wire = match self {
            Operation::Insert { key, value } => WireCommand {
                op: OP_INSERT,
                key: key.clone(),
                value: Some(value.clone()),
            },
            Operation::Delete { key } => WireCommand {
                op: OP_DELETE,
                key: key.clone(),
                value: None,
            },
            Operation::Update { key, value } => WireCommand {
                op: OP_UPDATE,
                key: key.clone(),
                value: Some(value.clone()),
            },
        };
        codec_options().serialize(&wire).map_err(|e| EncodeError::TooLarge {
            limit: MAX_COMMAND_BYTES,
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireCommand = codec_options()
            .deserialize(bytes)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match (wire.op, wire.value) {
            (OP_INSERT, Some(value)) => Ok(Operation::Insert { key: wire.key, value }),
            (OP_UPDATE, Some(value)) => Ok(Operation::Update { key: wire.key, value }),
            (OP_DELETE, None) => Ok(Operation::Delete { key: wire.key }),
            (OP_INSERT | OP_UPDATE, None) => Err(DecodeError::Malformed(format!(
                "operation {} without a value",
                wire.op
            ))),
            (OP_DELETE, Some(_)) => Err(DecodeError::Malformed("delete carries a value".to_string())),
            (op, _) => Err(DecodeError::UnknownOp(op)),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Logged value references.
//!
//! A [`LoggedVar`] is how an action record refers to a value: either nothing,
//! a small inline value that needs no heap identity, or the [`PtrId`] of a
//! heap entity that replay resolves through the inflate map.
use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::ident::PtrId;

/// Values small enough to be logged without a heap identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum InlineValue {
    /// The `undefined` value.
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A tagged small integer.
    Int(i32),
}

/// Reference to a value inside an action record or snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum LoggedVar {
    /// No value (the "null var" of a record that produced nothing).
    #[default]
    Absent,
    /// Value carried inline.
    Inline(InlineValue),
    /// Heap entity identified by its recorded identity.
    Ptr(PtrId),
}

impl LoggedVar {
    /// `true` when no value is recorded.
    #[must_use]
    pub fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Recorded identity if this var refers to a heap entity.
    #[must_use]
    pub fn ptr(self) -> Option<PtrId> {
        match self {
            Self::Ptr(id) => Some(id),
            _ => None,
        }
    }
}

impl From<PtrId> for LoggedVar {
    fn from(id: PtrId) -> Self {
        Self::Ptr(id)
    }
}

impl From<InlineValue> for LoggedVar {
    fn from(value: InlineValue) -> Self {
        Self::Inline(value)
    }
}

const TAG_ABSENT: u8 = 0;
const TAG_UNDEFINED: u8 = 1;
const TAG_NULL: u8 = 2;
const TAG_FALSE: u8 = 3;
const TAG_TRUE: u8 = 4;
const TAG_INT: u8 = 5;
const TAG_PTR: u8 = 6;

impl Encode for LoggedVar {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        match *self {
            Self::Absent => writer.write_u8(TAG_ABSENT),
            Self::Inline(InlineValue::Undefined) => writer.write_u8(TAG_UNDEFINED),
            Self::Inline(InlineValue::Null) => writer.write_u8(TAG_NULL),
            Self::Inline(InlineValue::Bool(false)) => writer.write_u8(TAG_FALSE),
            Self::Inline(InlineValue::Bool(true)) => writer.write_u8(TAG_TRUE),
            Self::Inline(InlineValue::Int(n)) => {
                writer.write_u8(TAG_INT);
                writer.write_i32_le(n);
            }
            Self::Ptr(id) => {
                writer.write_u8(TAG_PTR);
                writer.write_u64_le(id.raw());
            }
        }
        Ok(())
    }
}

impl Decode for LoggedVar {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(match reader.read_u8()? {
            TAG_ABSENT => Self::Absent,
            TAG_UNDEFINED => Self::Inline(InlineValue::Undefined),
            TAG_NULL => Self::Inline(InlineValue::Null),
            TAG_FALSE => Self::Inline(InlineValue::Bool(false)),
            TAG_TRUE => Self::Inline(InlineValue::Bool(true)),
            TAG_INT => Self::Inline(InlineValue::Int(reader.read_i32_le()?)),
            TAG_PTR => Self::Ptr(PtrId(reader.read_u64_le()?)),
            _ => return Err(CodecError::InvalidEnum),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_bytes, encode_to_vec};

    #[test]
    fn ptr_vars_encode_tag_then_identity() {
        let bytes = encode_to_vec(&LoggedVar::Ptr(PtrId(0x0102))).unwrap();
        assert_eq!(bytes, vec![TAG_PTR, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn absent_is_a_single_byte() {
        assert_eq!(encode_to_vec(&LoggedVar::Absent).unwrap(), vec![TAG_ABSENT]);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            decode_from_bytes::<LoggedVar>(&[0xEE]),
            Err(CodecError::InvalidEnum)
        );
    }

    #[test]
    fn negative_ints_survive_decoding() {
        let bytes = encode_to_vec(&LoggedVar::Inline(InlineValue::Int(-5))).unwrap();
        assert_eq!(
            decode_from_bytes::<LoggedVar>(&bytes).unwrap(),
            LoggedVar::Inline(InlineValue::Int(-5))
        );
    }
}

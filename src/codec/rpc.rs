//! RPC packets: a call name plus its argument list, as carried over a socket.

use super::value::Value;
use super::wire::{self, DecodeError};

/// One remote procedure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcPacket {
    pub name: String,
    pub args: Vec<Value>,
}

impl RpcPacket {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Encoded as a string value followed by a list value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.name.len() + 16);
        wire::encode_into(&mut buf, &Value::String(self.name.clone()));
        buf.push(wire::TAG_LIST_BEGIN);
        for arg in &self.args {
            wire::encode_into(&mut buf, arg);
        }
        buf.push(wire::TAG_LIST_END);
        buf
    }

    pub fn decode(input: &[u8]) -> Result<Self, DecodeError> {
        let (name, rest) = wire::decode_prefix(input)?;
        let name = match name {
            Value::String(s) => s,
            _ => return Err(DecodeError::UnknownTag(input[0])),
        };
        let args = match wire::decode(rest)? {
            Value::List(items) => items,
            _ => return Err(DecodeError::UnknownTag(rest[0])),
        };
        Ok(Self { name, args })
    }
}

//! Dynamic-value codec.
//!
//! RPC arguments travel between modules as [`Value`] lists. The same values are
//! serialized with the tagged binary format in [`wire`] when a call crosses a
//! socket, so both paths share one closed set of value kinds.

pub mod rpc;
mod value;
pub mod wire;

pub use rpc::RpcPacket;
pub use value::Value;
pub use wire::{decode, decode_args, encode, encode_args, DecodeError};

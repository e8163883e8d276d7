//! Length-prefixed bincode frames and the call/reply envelopes they carry.

use super::RpcError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest frame accepted from a peer.
pub const MAX_FRAME: u64 = 64 << 20;

/// One method invocation: which method, its parameter types, and the encoded
/// tuple of argument values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub interface: String,
    pub method: String,
    pub params: Vec<String>,
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Encoded return value.
    Return(Vec<u8>),
    /// Encoded failure raised by the target itself.
    Raised(Vec<u8>),
    /// The call never reached the target, or the target could not complete it.
    Failed(RpcError),
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RpcError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|err| RpcError::Codec(err.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RpcError> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|err| RpcError::Codec(err.to_string()))?;
    if read != bytes.len() {
        return Err(RpcError::Codec(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

pub fn write_frame<W: Write, T: Serialize + ?Sized>(
    stream: &mut W,
    value: &T,
) -> Result<(), RpcError> {
    let buf = encode(value)?;
    // frame length
    stream.write_all(&(buf.len() as u64).to_be_bytes())?;
    // frame body
    stream.write_all(&buf)?;
    stream.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(stream: &mut R) -> Result<T, RpcError> {
    let mut len = 0u64.to_be_bytes();
    stream.read_exact(&mut len)?;
    let len = u64::from_be_bytes(len);
    if len > MAX_FRAME {
        return Err(RpcError::Codec(format!("frame of {} bytes is too large", len)));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf)?;
    decode(&buf)
}

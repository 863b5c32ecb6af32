// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client command frames.
//!
//! Each frame on the command ring starts with a 4-byte message type id;
//! the rest is a fixed-layout little-endian body with length-prefixed
//! strings. Decoding validates every length before field access and
//! rejects short or oversized frames with `MALFORMED_COMMAND`. Encoders
//! are the client side of the same contract and are exercised by the
//! driver's own tests.

use crate::error::DriverError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const ADD_PUBLICATION: u32 = 0x01;
pub const ADD_EXCLUSIVE_PUBLICATION: u32 = 0x02;
pub const REMOVE_PUBLICATION: u32 = 0x03;
pub const ADD_SUBSCRIPTION: u32 = 0x04;
pub const REMOVE_SUBSCRIPTION: u32 = 0x05;
pub const CLIENT_KEEPALIVE: u32 = 0x06;
pub const ADD_DESTINATION: u32 = 0x07;
pub const REMOVE_DESTINATION: u32 = 0x08;

/// Registration-id value on `ADD_SUBSCRIPTION` meaning "network scope".
pub const NO_REGISTRATION_ID: i64 = -1;

const MAX_CHANNEL_LENGTH: usize = 4096;

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    AddPublication {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
        exclusive: bool,
    },
    RemovePublication {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    AddSubscription {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        registration_id: i64,
        channel: String,
    },
    RemoveSubscription {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    ClientKeepalive {
        client_id: i64,
    },
    AddDestination {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
        channel: String,
    },
    RemoveDestination {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
        channel: String,
    },
}

impl ClientCommand {
    /// Decode one frame. The frame must be consumed exactly; trailing
    /// bytes are treated as framing corruption.
    pub fn decode(mut frame: Bytes) -> Result<Self, DriverError> {
        let type_id = get_u32(&mut frame)?;
        let command = match type_id {
            ADD_PUBLICATION | ADD_EXCLUSIVE_PUBLICATION => Self::AddPublication {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                stream_id: get_i32(&mut frame)?,
                channel: get_string(&mut frame)?,
                exclusive: type_id == ADD_EXCLUSIVE_PUBLICATION,
            },
            REMOVE_PUBLICATION => Self::RemovePublication {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
            },
            ADD_SUBSCRIPTION => Self::AddSubscription {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                stream_id: get_i32(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
                channel: get_string(&mut frame)?,
            },
            REMOVE_SUBSCRIPTION => Self::RemoveSubscription {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
            },
            CLIENT_KEEPALIVE => Self::ClientKeepalive { client_id: get_i64(&mut frame)? },
            ADD_DESTINATION => Self::AddDestination {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
                channel: get_string(&mut frame)?,
            },
            REMOVE_DESTINATION => Self::RemoveDestination {
                client_id: get_i64(&mut frame)?,
                correlation_id: get_i64(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
                channel: get_string(&mut frame)?,
            },
            other => {
                return Err(DriverError::malformed(format!("unknown command type {other:#x}")))
            }
        };

        if !frame.is_empty() {
            return Err(DriverError::malformed(format!(
                "{} trailing bytes after command",
                frame.len()
            )));
        }
        Ok(command)
    }

    /// Client id the command was issued by.
    pub fn client_id(&self) -> i64 {
        match self {
            Self::AddPublication { client_id, .. }
            | Self::RemovePublication { client_id, .. }
            | Self::AddSubscription { client_id, .. }
            | Self::RemoveSubscription { client_id, .. }
            | Self::ClientKeepalive { client_id }
            | Self::AddDestination { client_id, .. }
            | Self::RemoveDestination { client_id, .. } => *client_id,
        }
    }

    /// Correlation id echoed in events; keepalive has none.
    pub fn correlation_id(&self) -> Option<i64> {
        match self {
            Self::ClientKeepalive { .. } => None,
            Self::AddPublication { correlation_id, .. }
            | Self::RemovePublication { correlation_id, .. }
            | Self::AddSubscription { correlation_id, .. }
            | Self::RemoveSubscription { correlation_id, .. }
            | Self::AddDestination { correlation_id, .. }
            | Self::RemoveDestination { correlation_id, .. } => Some(*correlation_id),
        }
    }
}

pub fn encode_add_publication(
    client_id: i64,
    correlation_id: i64,
    stream_id: i32,
    channel: &str,
    exclusive: bool,
) -> Bytes {
    let type_id = if exclusive { ADD_EXCLUSIVE_PUBLICATION } else { ADD_PUBLICATION };
    let mut buf = BytesMut::new();
    buf.put_u32_le(type_id);
    buf.put_i64_le(client_id);
    buf.put_i64_le(correlation_id);
    buf.put_i32_le(stream_id);
    put_string(&mut buf, channel);
    buf.freeze()
}

pub fn encode_remove_publication(client_id: i64, correlation_id: i64, registration_id: i64) -> Bytes {
    encode_remove(REMOVE_PUBLICATION, client_id, correlation_id, registration_id)
}

pub fn encode_add_subscription(
    client_id: i64,
    correlation_id: i64,
    stream_id: i32,
    registration_id: i64,
    channel: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(ADD_SUBSCRIPTION);
    buf.put_i64_le(client_id);
    buf.put_i64_le(correlation_id);
    buf.put_i32_le(stream_id);
    buf.put_i64_le(registration_id);
    put_string(&mut buf, channel);
    buf.freeze()
}

pub fn encode_remove_subscription(
    client_id: i64,
    correlation_id: i64,
    registration_id: i64,
) -> Bytes {
    encode_remove(REMOVE_SUBSCRIPTION, client_id, correlation_id, registration_id)
}

pub fn encode_client_keepalive(client_id: i64) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(CLIENT_KEEPALIVE);
    buf.put_i64_le(client_id);
    buf.freeze()
}

pub fn encode_destination(
    add: bool,
    client_id: i64,
    correlation_id: i64,
    registration_id: i64,
    channel: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(if add { ADD_DESTINATION } else { REMOVE_DESTINATION });
    buf.put_i64_le(client_id);
    buf.put_i64_le(correlation_id);
    buf.put_i64_le(registration_id);
    put_string(&mut buf, channel);
    buf.freeze()
}

fn encode_remove(type_id: u32, client_id: i64, correlation_id: i64, registration_id: i64) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(type_id);
    buf.put_i64_le(client_id);
    buf.put_i64_le(correlation_id);
    buf.put_i64_le(registration_id);
    buf.freeze()
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

pub(crate) fn get_u32(frame: &mut Bytes) -> Result<u32, DriverError> {
    if frame.len() < 4 {
        return Err(short_frame());
    }
    Ok(frame.get_u32_le())
}

pub(crate) fn get_i32(frame: &mut Bytes) -> Result<i32, DriverError> {
    if frame.len() < 4 {
        return Err(short_frame());
    }
    Ok(frame.get_i32_le())
}

pub(crate) fn get_i64(frame: &mut Bytes) -> Result<i64, DriverError> {
    if frame.len() < 8 {
        return Err(short_frame());
    }
    Ok(frame.get_i64_le())
}

pub(crate) fn get_string(frame: &mut Bytes) -> Result<String, DriverError> {
    let len = get_u32(frame)? as usize;
    if len > MAX_CHANNEL_LENGTH {
        return Err(DriverError::malformed(format!("string length {len} exceeds bound")));
    }
    if frame.len() < len {
        return Err(short_frame());
    }
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DriverError::malformed("string is not utf-8"))
}

fn short_frame() -> DriverError {
    DriverError::malformed("frame too short")
}

/// Best-effort correlation id from a frame that failed to decode, so the
/// error event can still be matched by the issuing client. Every command
/// except keepalive carries it at the same offset.
pub fn correlation_hint(frame: &[u8]) -> i64 {
    match frame.get(12..20) {
        Some(raw) => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            i64::from_le_bytes(bytes)
        }
        None => 0,
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;

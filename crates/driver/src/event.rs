// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver event frames on the client broadcast channel.
//!
//! Same framing discipline as commands: a 4-byte type id then a fixed
//! little-endian body. The conductor encodes; clients (and the driver's
//! tests) decode.

use crate::command::{get_i32, get_i64, get_string, get_u32, put_string};
use crate::error::{DriverError, ErrorCode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const ON_ERROR: u32 = 0x80;
pub const ON_AVAILABLE_IMAGE: u32 = 0x81;
pub const ON_PUBLICATION_READY: u32 = 0x82;
pub const ON_OPERATION_SUCCESS: u32 = 0x83;
pub const ON_UNAVAILABLE_IMAGE: u32 = 0x84;
pub const ON_SUBSCRIPTION_READY: u32 = 0x85;

/// Position counter binding for one subscriber of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberPosition {
    pub counter_id: i32,
    pub subscription_registration_id: i64,
}

/// A decoded driver event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    PublicationReady {
        correlation_id: i64,
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        position_limit_counter_id: i32,
        is_exclusive: bool,
        log_file: String,
    },
    SubscriptionReady {
        correlation_id: i64,
        channel_status_indicator_id: i32,
    },
    OperationSuccess {
        correlation_id: i64,
    },
    AvailableImage {
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        subscriber_positions: Vec<SubscriberPosition>,
        log_file: String,
        source_identity: String,
    },
    UnavailableImage {
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    },
    Error {
        correlation_id: i64,
        code: ErrorCode,
        message: String,
    },
}

impl DriverEvent {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::PublicationReady {
                correlation_id,
                registration_id,
                stream_id,
                session_id,
                position_limit_counter_id,
                is_exclusive,
                log_file,
            } => {
                buf.put_u32_le(ON_PUBLICATION_READY);
                buf.put_i64_le(*correlation_id);
                buf.put_i64_le(*registration_id);
                buf.put_i32_le(*stream_id);
                buf.put_i32_le(*session_id);
                buf.put_i32_le(*position_limit_counter_id);
                buf.put_u8(u8::from(*is_exclusive));
                put_string(&mut buf, log_file);
            }
            Self::SubscriptionReady { correlation_id, channel_status_indicator_id } => {
                buf.put_u32_le(ON_SUBSCRIPTION_READY);
                buf.put_i64_le(*correlation_id);
                buf.put_i32_le(*channel_status_indicator_id);
            }
            Self::OperationSuccess { correlation_id } => {
                buf.put_u32_le(ON_OPERATION_SUCCESS);
                buf.put_i64_le(*correlation_id);
            }
            Self::AvailableImage {
                correlation_id,
                session_id,
                stream_id,
                subscriber_positions,
                log_file,
                source_identity,
            } => {
                buf.put_u32_le(ON_AVAILABLE_IMAGE);
                buf.put_i64_le(*correlation_id);
                buf.put_i32_le(*session_id);
                buf.put_i32_le(*stream_id);
                buf.put_u32_le(subscriber_positions.len() as u32);
                for position in subscriber_positions {
                    buf.put_i32_le(position.counter_id);
                    buf.put_i64_le(position.subscription_registration_id);
                }
                put_string(&mut buf, log_file);
                put_string(&mut buf, source_identity);
            }
            Self::UnavailableImage { correlation_id, stream_id, channel } => {
                buf.put_u32_le(ON_UNAVAILABLE_IMAGE);
                buf.put_i64_le(*correlation_id);
                buf.put_i32_le(*stream_id);
                put_string(&mut buf, channel);
            }
            Self::Error { correlation_id, code, message } => {
                buf.put_u32_le(ON_ERROR);
                buf.put_i64_le(*correlation_id);
                buf.put_u32_le(code.code());
                put_string(&mut buf, message);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self, DriverError> {
        let type_id = get_u32(&mut frame)?;
        let event = match type_id {
            ON_PUBLICATION_READY => Self::PublicationReady {
                correlation_id: get_i64(&mut frame)?,
                registration_id: get_i64(&mut frame)?,
                stream_id: get_i32(&mut frame)?,
                session_id: get_i32(&mut frame)?,
                position_limit_counter_id: get_i32(&mut frame)?,
                is_exclusive: get_u8(&mut frame)? != 0,
                log_file: get_string(&mut frame)?,
            },
            ON_SUBSCRIPTION_READY => Self::SubscriptionReady {
                correlation_id: get_i64(&mut frame)?,
                channel_status_indicator_id: get_i32(&mut frame)?,
            },
            ON_OPERATION_SUCCESS => Self::OperationSuccess { correlation_id: get_i64(&mut frame)? },
            ON_AVAILABLE_IMAGE => {
                let correlation_id = get_i64(&mut frame)?;
                let session_id = get_i32(&mut frame)?;
                let stream_id = get_i32(&mut frame)?;
                let count = get_u32(&mut frame)? as usize;
                let mut subscriber_positions = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    subscriber_positions.push(SubscriberPosition {
                        counter_id: get_i32(&mut frame)?,
                        subscription_registration_id: get_i64(&mut frame)?,
                    });
                }
                Self::AvailableImage {
                    correlation_id,
                    session_id,
                    stream_id,
                    subscriber_positions,
                    log_file: get_string(&mut frame)?,
                    source_identity: get_string(&mut frame)?,
                }
            }
            ON_UNAVAILABLE_IMAGE => Self::UnavailableImage {
                correlation_id: get_i64(&mut frame)?,
                stream_id: get_i32(&mut frame)?,
                channel: get_string(&mut frame)?,
            },
            ON_ERROR => Self::Error {
                correlation_id: get_i64(&mut frame)?,
                code: ErrorCode::from_code(get_u32(&mut frame)?),
                message: get_string(&mut frame)?,
            },
            other => return Err(DriverError::malformed(format!("unknown event type {other:#x}"))),
        };

        if !frame.is_empty() {
            return Err(DriverError::malformed(format!("{} trailing bytes after event", frame.len())));
        }
        Ok(event)
    }

    /// Correlation id the event echoes.
    pub fn correlation_id(&self) -> i64 {
        match self {
            Self::PublicationReady { correlation_id, .. }
            | Self::SubscriptionReady { correlation_id, .. }
            | Self::OperationSuccess { correlation_id }
            | Self::AvailableImage { correlation_id, .. }
            | Self::UnavailableImage { correlation_id, .. }
            | Self::Error { correlation_id, .. } => *correlation_id,
        }
    }
}

fn get_u8(frame: &mut Bytes) -> Result<u8, DriverError> {
    if frame.is_empty() {
        return Err(DriverError::malformed("frame too short"));
    }
    Ok(frame.get_u8())
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

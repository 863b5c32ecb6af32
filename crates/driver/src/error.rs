// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried on `ON_ERROR` broadcast frames.
///
/// Clients branch on the code; the detail string is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    GenericError,
    InvalidChannel,
    UnknownSubscription,
    UnknownPublication,
    MalformedCommand,
    ResourceExhausted,
}

impl ErrorCode {
    /// Wire value written into `ON_ERROR` frames.
    pub fn code(&self) -> u32 {
        match self {
            Self::GenericError => 0,
            Self::InvalidChannel => 1,
            Self::UnknownSubscription => 2,
            Self::UnknownPublication => 3,
            Self::MalformedCommand => 4,
            Self::ResourceExhausted => 5,
        }
    }

    /// Decode a wire value; unknown values map to `GenericError`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::InvalidChannel,
            2 => Self::UnknownSubscription,
            3 => Self::UnknownPublication,
            4 => Self::MalformedCommand,
            5 => Self::ResourceExhausted,
            _ => Self::GenericError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenericError => "GENERIC_ERROR",
            Self::InvalidChannel => "INVALID_CHANNEL",
            Self::UnknownSubscription => "UNKNOWN_SUBSCRIPTION",
            Self::UnknownPublication => "UNKNOWN_PUBLICATION",
            Self::MalformedCommand => "MALFORMED_COMMAND",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure produced while handling a client command.
///
/// Never unwinds across the conductor tick boundary: handlers return this
/// and the conductor converts it into an `ON_ERROR` frame plus an error
/// counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: ErrorCode,
    pub detail: String,
}

impl DriverError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: detail.into() }
    }

    pub fn invalid_channel(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidChannel, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedCommand, detail)
    }

    pub fn generic(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenericError, detail)
    }

    pub fn resource_exhausted(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceExhausted, detail)
    }

    pub fn unknown_publication(registration_id: i64) -> Self {
        Self::new(
            ErrorCode::UnknownPublication,
            format!("unknown publication: {registration_id}"),
        )
    }

    pub fn unknown_subscription(registration_id: i64) -> Self {
        Self::new(
            ErrorCode::UnknownSubscription,
            format!("unknown subscription: {registration_id}"),
        )
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.detail)
    }
}

impl std::error::Error for DriverError {}

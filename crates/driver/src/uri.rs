// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel URI parsing.
//!
//! Grammar: `aeron:udp?k=v(|k=v)*`, `aeron:ipc(?k=v(|k=v)*)?`, and
//! `aeron-spy:<inner-uri>`. Unknown params are ignored; malformed input
//! yields `INVALID_CHANNEL`. The parsed [`ChannelUri`] is the canonical
//! descriptor the registries key on.

use crate::error::{DriverError, ErrorCode};

const SPY_PREFIX: &str = "aeron-spy:";
const SCHEME: &str = "aeron:";

/// Frame alignment for term offsets.
pub const FRAME_ALIGNMENT: u32 = 32;

/// Term length bounds; must be a power of two.
pub const TERM_MIN_LENGTH: u32 = 64 * 1024;
pub const TERM_MAX_LENGTH: u32 = 1024 * 1024 * 1024;

/// MTU bounds; must be a multiple of [`FRAME_ALIGNMENT`].
pub const MTU_MIN_LENGTH: u32 = 64;
pub const MTU_MAX_LENGTH: u32 = 65504;

/// Transport named by the URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Udp,
    Ipc,
}

/// Parsed channel descriptor.
///
/// Two descriptors are canonically equal iff all normalized fields match;
/// param order in the source string is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUri {
    pub media: Media,
    /// Spy on a co-located publication; never opens a receive endpoint.
    pub spy: bool,
    pub endpoint: Option<String>,
    pub control: Option<String>,
    reliable: Option<bool>,
    pub mtu: Option<u32>,
    pub term_length: Option<u32>,
    pub init_term_id: Option<i32>,
    pub term_id: Option<i32>,
    pub term_offset: Option<u32>,
    pub session_id: Option<i32>,
    pub tags: Option<String>,
}

impl ChannelUri {
    pub fn parse(uri: &str) -> Result<Self, DriverError> {
        let (spy, rest) = match uri.strip_prefix(SPY_PREFIX) {
            Some(inner) => (true, inner),
            None => (false, uri),
        };

        let rest = rest
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid(uri, "missing aeron: scheme"))?;

        let (media_str, params_str) = match rest.split_once('?') {
            Some((m, p)) => (m, Some(p)),
            None => (rest, None),
        };

        let media = match media_str {
            "udp" => Media::Udp,
            "ipc" => Media::Ipc,
            other => return Err(invalid(uri, &format!("unknown media '{other}'"))),
        };

        if spy && media != Media::Udp {
            return Err(invalid(uri, "spy is only valid for udp channels"));
        }

        let mut chan = Self {
            media,
            spy,
            endpoint: None,
            control: None,
            reliable: None,
            mtu: None,
            term_length: None,
            init_term_id: None,
            term_id: None,
            term_offset: None,
            session_id: None,
            tags: None,
        };

        if let Some(params_str) = params_str {
            if params_str.is_empty() {
                return Err(invalid(uri, "empty param list after '?'"));
            }
            for param in params_str.split('|') {
                let (key, value) = param
                    .split_once('=')
                    .ok_or_else(|| invalid(uri, &format!("param '{param}' is not k=v")))?;
                if value.is_empty() {
                    return Err(invalid(uri, &format!("param '{key}' has empty value")));
                }
                chan.apply_param(uri, key, value)?;
            }
        }

        chan.validate(uri)?;
        Ok(chan)
    }

    fn apply_param(&mut self, uri: &str, key: &str, value: &str) -> Result<(), DriverError> {
        match key {
            "endpoint" => self.endpoint = Some(value.to_string()),
            "control" => self.control = Some(value.to_string()),
            "reliable" => {
                self.reliable = Some(match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(invalid(uri, "reliable must be true or false")),
                });
            }
            "mtu" => self.mtu = Some(parse_u32(uri, key, value)?),
            "term-length" => self.term_length = Some(parse_u32(uri, key, value)?),
            "init-term-id" => self.init_term_id = Some(parse_i32(uri, key, value)?),
            "term-id" => self.term_id = Some(parse_i32(uri, key, value)?),
            "term-offset" => self.term_offset = Some(parse_u32(uri, key, value)?),
            "session-id" => self.session_id = Some(parse_i32(uri, key, value)?),
            "tags" => self.tags = Some(value.to_string()),
            // Unknown params are ignored per the wire contract.
            _ => {}
        }
        Ok(())
    }

    fn validate(&self, uri: &str) -> Result<(), DriverError> {
        if self.media == Media::Udp && self.endpoint.is_none() && self.control.is_none() {
            return Err(invalid(uri, "udp channel requires endpoint or control"));
        }
        if self.media == Media::Ipc && (self.endpoint.is_some() || self.control.is_some()) {
            return Err(invalid(uri, "ipc channel cannot carry an address"));
        }

        if let Some(term_length) = self.term_length {
            if !term_length.is_power_of_two()
                || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length)
            {
                return Err(invalid(uri, "term-length must be a power of two in bounds"));
            }
        }
        if let Some(mtu) = self.mtu {
            if mtu % FRAME_ALIGNMENT != 0 || !(MTU_MIN_LENGTH..=MTU_MAX_LENGTH).contains(&mtu) {
                return Err(invalid(uri, "mtu out of range or misaligned"));
            }
        }

        // Replay params come as a complete set or not at all.
        let replay_parts =
            [self.init_term_id.is_some(), self.term_id.is_some(), self.term_offset.is_some()];
        if replay_parts.iter().any(|p| *p) && !replay_parts.iter().all(|p| *p) {
            return Err(invalid(
                uri,
                "init-term-id, term-id, and term-offset must be supplied together",
            ));
        }
        if let Some(term_offset) = self.term_offset {
            if term_offset % FRAME_ALIGNMENT != 0 {
                return Err(invalid(uri, "term-offset must be frame aligned"));
            }
            if let Some(term_length) = self.term_length {
                if term_offset > term_length {
                    return Err(invalid(uri, "term-offset beyond term-length"));
                }
            }
        }
        Ok(())
    }

    /// Reliability flag; defaults to true when unset.
    pub fn reliable(&self) -> bool {
        self.reliable.unwrap_or(true)
    }

    /// Whether the reliability flag was given explicitly.
    pub fn has_reliable_param(&self) -> bool {
        self.reliable.is_some()
    }

    /// Whether replay positioning params are present (validated complete).
    pub fn has_replay_params(&self) -> bool {
        self.init_term_id.is_some()
    }

    pub fn is_udp(&self) -> bool {
        self.media == Media::Udp
    }

    pub fn is_ipc(&self) -> bool {
        self.media == Media::Ipc
    }

    /// Canonical key for the UDP endpoint this channel sends to or
    /// receives on. Stream-level params do not participate; two channels
    /// that differ only in mtu or term-length share an endpoint.
    pub fn endpoint_key(&self) -> String {
        let endpoint = self.endpoint.as_deref().unwrap_or("");
        match self.control.as_deref() {
            Some(control) => format!("udp:{endpoint}#{control}"),
            None => format!("udp:{endpoint}"),
        }
    }
}

fn parse_u32(uri: &str, key: &str, value: &str) -> Result<u32, DriverError> {
    value.parse::<u32>().map_err(|_| invalid(uri, &format!("param '{key}' is not a u32")))
}

fn parse_i32(uri: &str, key: &str, value: &str) -> Result<i32, DriverError> {
    value.parse::<i32>().map_err(|_| invalid(uri, &format!("param '{key}' is not an i32")))
}

fn invalid(uri: &str, why: &str) -> DriverError {
    DriverError::new(ErrorCode::InvalidChannel, format!("invalid channel '{uri}': {why}"))
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod tests;

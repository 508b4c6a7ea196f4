// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Message link parsing
//!
//! A link such as `https://discord.com/channels/<guild>/<thread>/<message>`
//! is read positionally from its last three segments. Parsing is pure;
//! resolving the ids to live objects happens in the intake through the
//! gallery gateway.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::gallery::Snowflake;

/// Why a message link could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected container, thread and message ids but found {0} segment(s)")]
    TooFewSegments(usize),

    #[error("`{segment}` is not a valid {field} id")]
    InvalidSegment { field: &'static str, segment: String },
}

/// Identifies one submitted message: (container, thread, message)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionReference {
    pub container_id: Snowflake,
    pub thread_id: Snowflake,
    pub message_id: Snowflake,
}

impl SubmissionReference {
    /// Parse a message link
    pub fn parse(link: &str) -> Result<Self, ParseError> {
        let link = link.trim().trim_start_matches('<').trim_end_matches('>');
        let link = link.split(['?', '#']).next().unwrap_or_default();

        let segments: Vec<&str> = link.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 3 {
            return Err(ParseError::TooFewSegments(segments.len()));
        }

        let tail = &segments[segments.len() - 3..];
        Ok(Self {
            container_id: parse_id("container", tail[0])?,
            thread_id: parse_id("thread", tail[1])?,
            message_id: parse_id("message", tail[2])?,
        })
    }
}

fn parse_id(field: &'static str, segment: &str) -> Result<Snowflake, ParseError> {
    segment.parse().map_err(|_| ParseError::InvalidSegment {
        field,
        segment: segment.to_string(),
    })
}

impl FromStr for SubmissionReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubmissionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.container_id, self.thread_id, self.message_id)
    }
}

//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use crate::{EnvelopeError, Result};

/// Internal topics reserved by the platform.
pub struct PlatformTopics;

impl PlatformTopics {
    /// Ask the broker how many subscribers a topic has.
    pub const REQUEST_SUBSCRIBER_COUNT: &'static str = "ɵREQUEST_SUBSCRIBER_COUNT";
    /// A gateway broadcasts its connect request to this topic to discover the broker.
    pub const CLIENT_CONNECT: &'static str = "ɵCLIENT_CONNECT";
    /// A gateway announces its disposal on this topic.
    pub const CLIENT_DISCONNECT: &'static str = "ɵCLIENT_DISCONNECT";
    /// A client asks its gateway about the gateway and the broker.
    pub const REQUEST_GATEWAY_INFO: &'static str = "ɵGATEWAY_INFO";
    /// Platform state of the host; the last state is retained.
    pub const HOST_PLATFORM_STATE: &'static str = "ɵHOST_PLATFORM_STATE";
}

const SEPARATOR: char = '/';
const WILDCARD_PREFIX: char = ':';

/// Check that a topic is well formed.
///
/// Segments are separated by `/` and must not be empty. A segment starting
/// with `:` is a named wildcard, which is only allowed when subscribing.
pub fn validate_topic(topic: &str, allow_wildcards: bool) -> Result<()> {
    let invalid = |reason| EnvelopeError::InvalidTopic {
        topic: topic.to_owned(),
        reason,
    };
    if topic.is_empty() {
        return Err(invalid("topic must not be empty"));
    }
    for segment in topic.split(SEPARATOR) {
        if segment.is_empty() {
            return Err(invalid("topic must not contain empty segments"));
        }
        if let Some(name) = segment.strip_prefix(WILDCARD_PREFIX) {
            if !allow_wildcards {
                return Err(invalid("wildcard segments are not allowed here"));
            }
            if name.is_empty() {
                return Err(invalid("wildcard segment needs a name"));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Exact(String),
    Wildcard(String),
}

/// Matches concrete topics against a subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl TopicMatcher {
    /// Compile a pattern such as `person/:id/address`.
    pub fn new(pattern: &str) -> Result<Self> {
        validate_topic(pattern, true)?;
        let segments = pattern
            .split(SEPARATOR)
            .map(|segment| match segment.strip_prefix(WILDCARD_PREFIX) {
                Some(name) => Segment::Wildcard(name.to_owned()),
                None => Segment::Exact(segment.to_owned()),
            })
            .collect();
        Ok(Self {
            pattern: pattern.to_owned(),
            segments,
        })
    }

    /// Pattern the matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern contains wildcard segments.
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Wildcard(_)))
    }

    /// Match a concrete topic, returning the wildcard values on success.
    pub fn matches(&self, topic: &str) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        let mut parts = topic.split(SEPARATOR);
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Exact(expected) if expected == part => {}
                Segment::Exact(_) => return None,
                Segment::Wildcard(_) if part.is_empty() => return None,
                Segment::Wildcard(name) => {
                    params.insert(name.clone(), part.to_owned());
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// Whether the topic matches the pattern.
    pub fn is_match(&self, topic: &str) -> bool {
        self.matches(topic).is_some()
    }
}

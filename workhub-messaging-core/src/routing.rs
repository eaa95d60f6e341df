// workhub-messaging-core/src/routing.rs
//! Routing-key addressing.
//!
//! Every event on a shared exchange is addressed as
//! `source.entity.action_destination`, e.g. `user.worker.create_offre`.
//! The key is the only addressing mechanism: consumers bind on
//! `source.entity.*` and then filter on the destination token themselves.

use std::fmt;
use std::str::FromStr;

use crate::MessagingError;

pub const SEGMENT_SEPARATOR: char = '.';
pub const ACTION_SEPARATOR: char = '_';

/// Decoded addressing triple (with the third segment split into action and destination).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub source: String,
    pub entity: String,
    pub action: String,
    pub destination: String,
}

impl RoutingKey {
    pub fn new(
        source: &str,
        entity: &str,
        action: &str,
        destination: &str,
    ) -> Result<Self, MessagingError> {
        for segment in [source, entity, action, destination] {
            validate_segment(segment)?;
        }
        Ok(Self {
            source: source.to_string(),
            entity: entity.to_string(),
            action: action.to_string(),
            destination: destination.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{}{ACTION_SEPARATOR}{}",
            self.source, self.entity, self.action, self.destination
        )
    }

    /// Parses a received key. Segments after the third are ignored.
    pub fn decode(key: &str) -> Result<Self, MessagingError> {
        let malformed = |reason| MessagingError::MalformedKey {
            key: key.to_string(),
            reason,
        };

        let parts: Vec<&str> = key.split(SEGMENT_SEPARATOR).collect();
        if parts.len() < 3 {
            return Err(malformed("fewer than three segments"));
        }

        let halves: Vec<&str> = parts[2].split(ACTION_SEPARATOR).collect();
        if halves.len() != 2 {
            return Err(malformed("third segment must hold exactly one underscore"));
        }

        let (source, entity) = (parts[0], parts[1]);
        let (action, destination) = (halves[0], halves[1]);
        if [source, entity, action, destination]
            .iter()
            .any(|s| s.is_empty())
        {
            return Err(malformed("empty segment"));
        }

        Ok(Self {
            source: source.to_string(),
            entity: entity.to_string(),
            action: action.to_string(),
            destination: destination.to_string(),
        })
    }

    pub fn is_addressed_to(&self, service: &str) -> bool {
        self.destination == service
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for RoutingKey {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

pub fn encode(
    source: &str,
    entity: &str,
    action: &str,
    destination: &str,
) -> Result<String, MessagingError> {
    RoutingKey::new(source, entity, action, destination).map(|rk| rk.encode())
}

pub fn decode(key: &str) -> Result<RoutingKey, MessagingError> {
    RoutingKey::decode(key)
}

fn validate_segment(segment: &str) -> Result<(), MessagingError> {
    let invalid = |reason| MessagingError::InvalidAddress {
        segment: segment.to_string(),
        reason,
    };

    if segment.is_empty() {
        return Err(invalid("empty segment"));
    }
    if segment.contains(SEGMENT_SEPARATOR) || segment.contains(ACTION_SEPARATOR) {
        return Err(invalid("contains a separator character"));
    }
    // wildcards and whitespace would change how the broker matches the key
    if segment
        .chars()
        .any(|c| c == '*' || c == '#' || c.is_whitespace())
    {
        return Err(invalid("contains a wildcard or whitespace"));
    }
    Ok(())
}

/// Binding pattern for every action on one entity class of a source: `source.entity.*`.
pub fn entity_binding(source: &str, entity: &str) -> String {
    format!("{source}{SEGMENT_SEPARATOR}{entity}{SEGMENT_SEPARATOR}*")
}

/// Binding pattern for a whole source namespace: `source.#`.
pub fn namespace_binding(source: &str) -> String {
    format!("{source}{SEGMENT_SEPARATOR}#")
}

/// AMQP topic matching: `*` matches exactly one word, `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(SEGMENT_SEPARATOR).collect();
    let words: Vec<&str> = routing_key.split(SEGMENT_SEPARATOR).collect();
    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| match_words(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first() == Some(literal) && match_words(rest, &words[1..])
        }
    }
}

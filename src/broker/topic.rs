//! Topic names and subscription filters.
//!
//! Both are parsed once at intake and then matched structurally, segment by
//! segment. `+` and `#` are only wildcards when they occupy a whole filter
//! segment; topics may not contain them at all.

use std::fmt;
use std::str::FromStr;

use crate::broker::errors::{FilterError, TopicError};

pub const SEPARATOR: char = '/';
pub const SINGLE_LEVEL: &str = "+";
pub const MULTI_LEVEL: &str = "#";

fn has_wildcard(segment: &str) -> bool {
    segment.contains(|c| c == '+' || c == '#')
}

// ==========================================
// TOPIC PATH
// ==========================================

/// A concrete topic a message is published to, e.g. `sensors/room1/temp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    raw: String,
    segments: Vec<String>,
}

impl TopicPath {
    /// Empty levels (`a//b`, `/a`) are kept as empty segments.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::Empty);
        }

        let segments: Vec<String> = topic.split(SEPARATOR).map(str::to_string).collect();
        if let Some(segment) = segments.iter().find(|s| has_wildcard(s)) {
            return Err(TopicError::Wildcard {
                segment: segment.clone(),
            });
        }

        Ok(Self {
            raw: topic.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for TopicPath {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ==========================================
// TOPIC FILTER
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterSegment {
    Literal(String),
    /// `+`: exactly one level.
    SingleLevel,
    /// `#`: this level and everything below it, including nothing.
    MultiLevel,
}

/// A subscription pattern, e.g. `sensors/+/temp` or `logs/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<FilterSegment>,
}

impl TopicFilter {
    pub fn parse(pattern: &str) -> Result<Self, FilterError> {
        if pattern.is_empty() {
            return Err(FilterError::Empty);
        }

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (position, part) in parts.into_iter().enumerate() {
            let segment = match part {
                SINGLE_LEVEL => FilterSegment::SingleLevel,
                MULTI_LEVEL if position == last => FilterSegment::MultiLevel,
                MULTI_LEVEL => return Err(FilterError::MultiLevelNotLast { position }),
                literal if has_wildcard(literal) => {
                    return Err(FilterError::MixedWildcard {
                        segment: literal.to_string(),
                    })
                }
                literal => FilterSegment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[FilterSegment] {
        &self.segments
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, FilterSegment::Literal(_)))
    }

    /// Pure structural match of this filter against a concrete topic.
    pub fn matches(&self, path: &TopicPath) -> bool {
        let mut levels = path.segments().iter();

        for segment in &self.segments {
            match segment {
                // Parsing guarantees '#' is last.
                FilterSegment::MultiLevel => return true,
                FilterSegment::SingleLevel => {
                    if levels.next().is_none() {
                        return false;
                    }
                }
                FilterSegment::Literal(expected) => match levels.next() {
                    Some(level) if level == expected => {}
                    _ => return false,
                },
            }
        }

        levels.next().is_none()
    }
}

impl FromStr for TopicFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(filter: &str, topic: &str) -> bool {
        let filter = TopicFilter::parse(filter).expect("valid filter");
        let topic = TopicPath::parse(topic).expect("valid topic");
        filter.matches(&topic)
    }

    #[test]
    fn hash_matches_every_topic() {
        for topic in ["a", "a/b", "a/b/c/d", "/leading", "trailing/", "x//y"] {
            assert!(matches("#", topic), "'#' should match '{}'", topic);
        }
    }

    #[test]
    fn trailing_hash_matches_parent_and_descendants() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c"));
        assert!(!matches("a/#", "b"));
        assert!(!matches("a/#", "ab/c"));
    }

    #[test]
    fn plus_consumes_exactly_one_level() {
        assert!(matches("a/+/c", "a/x/c"));
        assert!(!matches("a/+/c", "a/x/y/c"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(matches("+", "anything"));
        assert!(!matches("+", "two/levels"));
        assert!(matches("a/+", "a/"));
    }

    #[test]
    fn literals_compare_exact_bytes() {
        assert!(matches("Sensors/Temp", "Sensors/Temp"));
        assert!(!matches("sensors/temp", "Sensors/Temp"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
    }

    #[test]
    fn plus_then_hash() {
        assert!(matches("+/#", "a"));
        assert!(matches("+/#", "a/b/c"));
        assert!(matches("a/+/#", "a/b"));
        assert!(!matches("a/+/#", "a"));
    }

    #[test]
    fn matching_is_deterministic() {
        let filter = TopicFilter::parse("home/+/status").unwrap();
        let topic = TopicPath::parse("home/kitchen/status").unwrap();
        let first = filter.matches(&topic);
        for _ in 0..10 {
            assert_eq!(filter.matches(&topic), first);
        }
    }

    #[test]
    fn wildcard_text_inside_a_segment_is_rejected() {
        assert_eq!(
            TopicFilter::parse("a/lit+eral"),
            Err(FilterError::MixedWildcard {
                segment: "lit+eral".to_string()
            })
        );
        assert_eq!(
            TopicFilter::parse("a/b#"),
            Err(FilterError::MixedWildcard {
                segment: "b#".to_string()
            })
        );
        assert_eq!(
            TopicPath::parse("a/lit+eral"),
            Err(TopicError::Wildcard {
                segment: "lit+eral".to_string()
            })
        );
        assert!(TopicPath::parse("a/#").is_err());
    }

    #[test]
    fn hash_must_be_last() {
        assert_eq!(
            TopicFilter::parse("a/#/b"),
            Err(FilterError::MultiLevelNotLast { position: 1 })
        );
        assert_eq!(
            TopicFilter::parse("#/a"),
            Err(FilterError::MultiLevelNotLast { position: 0 })
        );
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert_eq!(TopicFilter::parse(""), Err(FilterError::Empty));
        assert_eq!(TopicPath::parse(""), Err(TopicError::Empty));
    }

    #[test]
    fn parsed_segments() {
        let filter = TopicFilter::parse("a/+/#").unwrap();
        assert_eq!(
            filter.segments(),
            &[
                FilterSegment::Literal("a".to_string()),
                FilterSegment::SingleLevel,
                FilterSegment::MultiLevel,
            ]
        );
        assert!(filter.has_wildcards());
        assert!(!TopicFilter::parse("a/b").unwrap().has_wildcards());
        assert_eq!(TopicPath::parse("x//y").unwrap().segments(), &["x", "", "y"]);
    }
}

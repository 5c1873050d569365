//! Feed payload: what the producer enqueues and the worker validates.
//!
//! The queue itself never looks inside a payload. Validation happens once, at
//! the worker boundary, and yields an explicit `Validation` instead of an
//! error so that "bad data" and "broken infrastructure" never share a path.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A feed entry as the producer saw it. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl FeedItem {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
        }
    }

    /// Check required fields. Blank strings count as missing.
    pub fn validate(self) -> Validation {
        let title = self.title.filter(|s| !s.trim().is_empty());
        let body = self.body.filter(|s| !s.trim().is_empty());
        match (title, body) {
            (Some(title), Some(body)) => Validation::Valid(ValidFeedItem { title, body }),
            (None, None) => Validation::Invalid(InvalidReason::MissingTitleAndBody),
            (None, Some(_)) => Validation::Invalid(InvalidReason::MissingTitle),
            (Some(_), None) => Validation::Invalid(InvalidReason::MissingBody),
        }
    }
}

/// A feed entry with both fields present. Only `FeedItem::validate` builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidFeedItem {
    title: String,
    body: String,
}

impl ValidFeedItem {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(ValidFeedItem),
    Invalid(InvalidReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    MissingTitle,
    MissingBody,
    MissingTitleAndBody,
    /// The stored payload is not a feed item at all.
    Undecodable(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::MissingTitle => f.write_str("missing title"),
            InvalidReason::MissingBody => f.write_str("missing body"),
            InvalidReason::MissingTitleAndBody => f.write_str("missing title and body"),
            InvalidReason::Undecodable(detail) => write!(f, "undecodable payload: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn complete_item_is_valid() {
        let v = FeedItem::new("Title 1", "Body 1").validate();
        match v {
            Validation::Valid(item) => {
                assert_eq!(item.title(), "Title 1");
                assert_eq!(item.body(), "Body 1");
            }
            Validation::Invalid(reason) => panic!("expected valid, got {reason}"),
        }
    }

    #[rstest]
    #[case(Some("t"), None, InvalidReason::MissingBody)]
    #[case(Some("t"), Some(""), InvalidReason::MissingBody)]
    #[case(Some("t"), Some("   "), InvalidReason::MissingBody)]
    #[case(None, Some("b"), InvalidReason::MissingTitle)]
    #[case(Some(""), Some("b"), InvalidReason::MissingTitle)]
    #[case(None, None, InvalidReason::MissingTitleAndBody)]
    fn missing_fields_are_reported(
        #[case] title: Option<&str>,
        #[case] body: Option<&str>,
        #[case] expected: InvalidReason,
    ) {
        let item = FeedItem {
            title: title.map(str::to_string),
            body: body.map(str::to_string),
        };
        assert_eq!(item.validate(), Validation::Invalid(expected));
    }

    #[test]
    fn absent_fields_deserialize_as_none() {
        let item: FeedItem = serde_json::from_str(r#"{"title":"only a title"}"#).unwrap();
        assert_eq!(item.title.as_deref(), Some("only a title"));
        assert!(item.body.is_none());
    }
}

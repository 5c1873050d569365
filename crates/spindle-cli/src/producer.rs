//! Producers the CLI can enqueue from.

use std::path::PathBuf;

use async_trait::async_trait;
use spindle_core::domain::FeedItem;
use spindle_core::ports::{Producer, ProducerError};
use tokio::io::AsyncReadExt;

/// Where a JSON batch comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Stdin,
}

impl Source {
    /// `-` means stdin.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Source::Stdin
        } else {
            Source::File(PathBuf::from(arg))
        }
    }
}

/// Reads a JSON array of `{ "title": ..., "body": ... }` objects.
///
/// Entries without a title are dropped here, the same way a feed reader
/// skips untitled entries. Entries with a title but no body are kept; the
/// worker rejects those.
pub struct JsonFileProducer {
    source: Source,
}

impl JsonFileProducer {
    pub fn new(source: Source) -> Self {
        Self { source }
    }

    async fn read(&self) -> Result<String, ProducerError> {
        match &self.source {
            Source::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ProducerError::Fetch(format!("{}: {e}", path.display()))),
            Source::Stdin => {
                let mut raw = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut raw)
                    .await
                    .map_err(|e| ProducerError::Fetch(format!("stdin: {e}")))?;
                Ok(raw)
            }
        }
    }
}

#[async_trait]
impl Producer for JsonFileProducer {
    async fn fetch(&self) -> Result<Vec<FeedItem>, ProducerError> {
        let raw = self.read().await?;
        if raw.trim().is_empty() {
            return Err(ProducerError::NoData);
        }
        let entries: Vec<FeedItem> =
            serde_json::from_str(&raw).map_err(|e| ProducerError::Parse(e.to_string()))?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.title.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .collect())
    }
}

/// `count` numbered sample entries, for trying the queue out.
pub struct SampleProducer {
    count: usize,
}

impl SampleProducer {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl Producer for SampleProducer {
    async fn fetch(&self) -> Result<Vec<FeedItem>, ProducerError> {
        Ok((1..=self.count)
            .map(|i| FeedItem::new(format!("Title {i}"), format!("Body {i}")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_titled_entries_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "First", "body": "one"},
                {"body": "untitled"},
                {"title": "  ", "body": "blank title"},
                {"title": "No body"}
            ]"#,
        )
        .unwrap();

        let items = JsonFileProducer::new(Source::File(path)).fetch().await.unwrap();
        let titles: Vec<_> = items.iter().filter_map(|i| i.title.as_deref()).collect();
        assert_eq!(titles, vec!["First", "No body"]);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileProducer::new(Source::File(path)).fetch().await.unwrap_err();
        assert!(matches!(err, ProducerError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let err = JsonFileProducer::new(Source::File("/nonexistent/feed.json".into()))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, ProducerError::Fetch(_)));
    }

    #[tokio::test]
    async fn sample_producer_numbers_entries() {
        let items = SampleProducer::new(3).fetch().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], FeedItem::new("Title 3", "Body 3"));
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(Source::from_arg("-"), Source::Stdin);
        assert_eq!(Source::from_arg("a.json"), Source::File("a.json".into()));
    }
}

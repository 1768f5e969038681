use async_trait::async_trait;

use crate::{common::errors::Result, protocol::Track};

/// How a candidate is picked from the recommendation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Random,
    /// Results are ordered by relevance; take the head.
    First,
}

/// Turns the last played track into a query for something related.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// `sourceName` of the tracks this recommender understands.
    fn source(&self) -> &str;

    fn selection(&self) -> Selection {
        Selection::Random
    }

    /// Search prefix for the returned query when it is not a URL.
    fn search_source(&self) -> Option<&str> {
        None
    }

    async fn recommend(&self, previous: &Track) -> Result<Option<String>>;
}

/// YouTube's auto-generated radio for the previous video.
pub struct YoutubeMix;

#[async_trait]
impl Recommender for YoutubeMix {
    fn source(&self) -> &str {
        "youtube"
    }

    fn search_source(&self) -> Option<&str> {
        Some("ytmsearch")
    }

    async fn recommend(&self, previous: &Track) -> Result<Option<String>> {
        let id = &previous.info.identifier;
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "https://www.youtube.com/watch?v={}&list=RD{}",
            id, id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tracks::tests::track;

    #[tokio::test]
    async fn youtube_mix_builds_radio_url() {
        let url = YoutubeMix
            .recommend(&track("abc", "t", "a", 1))
            .await
            .unwrap();
        assert_eq!(
            url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc&list=RDabc")
        );
        assert_eq!(YoutubeMix.selection(), Selection::Random);
    }
}

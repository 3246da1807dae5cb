//! Upstream sources of per-block student view data.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use coursegraph_shared::{Block, BlockContent, CourseGraphError, Result};

/// User-Agent string for student view data requests.
const USER_AGENT: &str = concat!("coursegraph/", env!("CARGO_PKG_VERSION"));

/// Supplies the student view data of a single block.
///
/// Implementations are called concurrently from `collect`; a failure is
/// local to the block it was requested for.
#[async_trait]
pub trait StudentViewSource: Send + Sync {
    /// Human-readable source name for tracing.
    fn name(&self) -> &str;

    async fn student_view_data(&self, block: &Block) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Authored content
// ---------------------------------------------------------------------------

/// Derives student view data from the authored content of the export itself.
///
/// Video blocks render their renditions; generic blocks may carry a
/// pre-rendered `student_view_data` field. Anything else has no data.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthoredContentSource;

#[async_trait]
impl StudentViewSource for AuthoredContentSource {
    fn name(&self) -> &str {
        "authored"
    }

    async fn student_view_data(&self, block: &Block) -> Result<Value> {
        match &block.content {
            BlockContent::Video(video) => Ok(video.student_view_data()),
            BlockContent::Generic(generic) => generic
                .fields
                .get("student_view_data")
                .cloned()
                .ok_or_else(|| no_data(block)),
            BlockContent::Container(_) => Err(no_data(block)),
        }
    }
}

fn no_data(block: &Block) -> CourseGraphError {
    CourseGraphError::Source(format!("block {} has no student view data", block.key))
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Fetches `GET {base}/blocks/{block_key}/student_view_data` as JSON.
pub struct HttpStudentViewSource {
    client: Client,
    base_url: Url,
}

impl HttpStudentViewSource {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CourseGraphError::Source(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// The key is pushed as one percent-encoded path segment.
    fn endpoint(&self, block: &Block) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                CourseGraphError::config(format!("source URL '{}' cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .push("blocks")
            .push(&block.key.to_string())
            .push("student_view_data");
        Ok(url)
    }
}

#[async_trait]
impl StudentViewSource for HttpStudentViewSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn student_view_data(&self, block: &Block) -> Result<Value> {
        let url = self.endpoint(block)?;
        debug!(%url, "fetching student view data");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CourseGraphError::Source(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CourseGraphError::Source(format!("{url}: HTTP {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CourseGraphError::Source(format!("{url}: invalid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_shared::{BlockKey, EncodedVideo, GenericBlock, VideoBlock};
    use serde_json::json;

    fn video_block() -> Block {
        let mut video = VideoBlock::default();
        video.encoded_videos.insert(
            "mp4".into(),
            EncodedVideo {
                url: "http://origin/a.mp4".into(),
                file_size: 0,
            },
        );
        Block::video(BlockKey::new("video", "a"), None, video)
    }

    #[tokio::test]
    async fn authored_source_renders_videos() {
        let data = AuthoredContentSource
            .student_view_data(&video_block())
            .await
            .expect("video data");
        assert_eq!(data["encoded_videos"]["mp4"]["url"], "http://origin/a.mp4");
    }

    #[tokio::test]
    async fn authored_source_generic_and_container() {
        let mut generic = GenericBlock::default();
        generic
            .fields
            .insert("student_view_data".into(), json!({"html": "<p>hi</p>"}));
        let block = Block::generic(BlockKey::new("html", "h"), None, generic);
        let data = AuthoredContentSource.student_view_data(&block).await.unwrap();
        assert_eq!(data["html"], "<p>hi</p>");

        let container = Block::container(BlockKey::new("chapter", "c"), None);
        let err = AuthoredContentSource
            .student_view_data(&container)
            .await
            .unwrap_err();
        assert!(err.is_block_local());
    }

    #[tokio::test]
    async fn http_source_fetches_json() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/blocks/video@a/student_view_data"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(json!({"encoded_videos": {"mp4": {"url": "http://origin/a.mp4"}}})),
            )
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let source = HttpStudentViewSource::new(base, Duration::from_secs(5)).unwrap();
        let data = source.student_view_data(&video_block()).await.unwrap();
        assert_eq!(data["encoded_videos"]["mp4"]["url"], "http://origin/a.mp4");
    }

    #[tokio::test]
    async fn http_source_encodes_key_as_one_segment() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(
                "/api/blocks/video@a%2Fb%3Fc%23d/student_view_data",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        let source = HttpStudentViewSource::new(base, Duration::from_secs(5)).unwrap();
        let block = Block::container(BlockKey::new("video", "a/b?c#d"), None);
        let data = source.student_view_data(&block).await.unwrap();
        assert_eq!(data["ok"], true);
    }

    #[tokio::test]
    async fn http_source_reports_status_errors() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let source = HttpStudentViewSource::new(base, Duration::from_secs(5)).unwrap();
        let err = source.student_view_data(&video_block()).await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(err.is_block_local());
    }
}

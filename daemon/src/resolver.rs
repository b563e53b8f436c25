/// Liveness probing and stream transport, behind trait seams so the capture
/// worker can be exercised with scripted implementations in tests.
///
/// The production resolver asks the platform's cam API whether a model is
/// live and, if so, assembles the HLS playlist URL for its edge server. The
/// production reader is a plain HTTP byte stream over that locator; actual
/// demuxing is the transport's problem, not ours.
use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;

/// Opaque handle for a fetchable live stream (an HLS playlist URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocator {
    pub url: String,
}

impl StreamLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Answers "is this model live right now, and where is its stream?".
///
/// `Ok(None)` means cleanly offline. `Err` is reserved for transport/auth
/// failures; callers treat those like offline but log them.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn probe(&self, model: &str) -> Result<Option<StreamLocator>>;
}

/// A stream opened from a locator. `read` yields at most `max` bytes per
/// call and an empty buffer at end of stream.
#[async_trait]
pub trait ByteSource: Send {
    async fn read(&mut self, max: usize) -> Result<Bytes>;
}

/// Turns a locator into a readable byte stream.
#[async_trait]
pub trait StreamReader: Send + Sync {
    async fn open(&self, locator: &StreamLocator) -> Result<Box<dyn ByteSource>>;
}

// ── Production implementations ────────────────────────────────────────────────

const CAM_API_BASE: &str = "https://stripchat.com/api/front/v2/models/username";
const HLS_SERVER_KEY: &str = "flashphoner-hls";

/// Relevant slice of the cam API response. Fields the probe does not consult
/// are left out; absent fields read as "not live".
#[derive(Debug, Deserialize)]
struct CamResponse {
    cam: Option<CamInfo>,
}

#[derive(Debug, Deserialize)]
struct CamInfo {
    #[serde(rename = "isCamAvailable", default)]
    is_cam_available: bool,
    #[serde(rename = "streamName")]
    stream_name: Option<String>,
    #[serde(rename = "viewServers", default)]
    view_servers: HashMap<String, String>,
}

impl CamInfo {
    /// Builds the HLS playlist URL when the cam is live on an HLS edge.
    fn hls_url(&self) -> Option<String> {
        if !self.is_cam_available {
            return None;
        }
        let stream = self.stream_name.as_deref()?;
        let server = self.view_servers.get(HLS_SERVER_KEY)?;
        Some(format!("https://b-{server}.doppiocdn.com/hls/{stream}/{stream}.m3u8"))
    }
}

/// Probes the cam API over HTTP.
pub struct CamApiResolver {
    client: reqwest::Client,
}

impl CamApiResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamResolver for CamApiResolver {
    async fn probe(&self, model: &str) -> Result<Option<StreamLocator>> {
        let url = format!("{CAM_API_BASE}/{model}/cam");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Probe request failed for '{model}'"))?;
        let body: CamResponse = response
            .json()
            .await
            .with_context(|| format!("Probe response for '{model}' was not valid JSON"))?;

        Ok(body.cam.and_then(|cam| cam.hls_url()).map(StreamLocator::new))
    }
}

/// Opens the locator URL as a streaming HTTP response.
pub struct HttpStreamReader {
    client: reqwest::Client,
}

impl HttpStreamReader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamReader for HttpStreamReader {
    async fn open(&self, locator: &StreamLocator) -> Result<Box<dyn ByteSource>> {
        let response = self
            .client
            .get(&locator.url)
            .send()
            .await
            .with_context(|| format!("Failed to open stream: {}", locator.url))?
            .error_for_status()
            .with_context(|| format!("Stream rejected: {}", locator.url))?;
        Ok(Box::new(HttpByteSource { response, buffer: BytesMut::new(), done: false }))
    }
}

/// Re-chunks the HTTP body into the fixed-size reads the copy loop expects.
struct HttpByteSource {
    response: reqwest::Response,
    buffer: BytesMut,
    done: bool,
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn read(&mut self, max: usize) -> Result<Bytes> {
        while self.buffer.is_empty() && !self.done {
            match self.response.chunk().await.context("Stream read failed")? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.done = true,
            }
        }
        let take = self.buffer.len().min(max);
        Ok(self.buffer.split_to(take).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_cam(server: Option<&str>) -> CamInfo {
        let mut view_servers = HashMap::new();
        if let Some(server) = server {
            view_servers.insert(HLS_SERVER_KEY.to_string(), server.to_string());
        }
        CamInfo {
            is_cam_available: true,
            stream_name: Some("stream42".to_string()),
            view_servers,
        }
    }

    #[test]
    fn hls_url_built_from_live_cam() {
        let cam = live_cam(Some("edge7"));
        assert_eq!(
            cam.hls_url().unwrap(),
            "https://b-edge7.doppiocdn.com/hls/stream42/stream42.m3u8"
        );
    }

    #[test]
    fn hls_url_requires_cam_available() {
        let mut cam = live_cam(Some("edge7"));
        cam.is_cam_available = false;
        assert!(cam.hls_url().is_none());
    }

    #[test]
    fn hls_url_requires_hls_edge_server() {
        let cam = live_cam(None);
        assert!(cam.hls_url().is_none());
    }

    #[test]
    fn hls_url_requires_stream_name() {
        let mut cam = live_cam(Some("edge7"));
        cam.stream_name = None;
        assert!(cam.hls_url().is_none());
    }

    #[test]
    fn cam_response_tolerates_missing_fields() {
        let offline: CamResponse = serde_json::from_str("{}").unwrap();
        assert!(offline.cam.is_none());

        let sparse: CamResponse = serde_json::from_str(r#"{"cam": {}}"#).unwrap();
        assert!(sparse.cam.unwrap().hls_url().is_none());
    }
}

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::error::ChapterError;
use crate::models::{
    Attachment, Branch, ChapterContent, ChapterMeta, ContentNode, RawChapter, WorkData,
};

/// Catalog API origin.
pub const API_BASE: &str = "https://api.lib.social/api";
/// Site origin, prepended to relative attachment URLs.
pub const SITE_BASE: &str = "https://ranobelib.me";

/// Metadata fields requested alongside the work record.
const WORK_FIELDS: &[&str] = &[
    "authors",
    "summary",
    "genres",
    "chap_count",
    "releaseDate",
    "franchise",
    "rate",
];

/// Everything the pipeline needs from the remote side. `LibClient` is the
/// production implementation; tests substitute a stub.
pub trait RemoteSource: Send + Sync {
    /// Work metadata. Non-200 responses become `None` ("not found or needs
    /// authorization"), which the caller treats as fatal.
    fn work(&self, slug: &str) -> impl Future<Output = Result<Option<WorkData>>> + Send;

    /// Translation branches. `None` means "use the default branch".
    fn branches(&self, work_id: &str) -> impl Future<Output = Result<Option<Vec<Branch>>>> + Send;

    /// The ordered chapter list. `None` is fatal to the caller.
    fn chapter_list(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<Vec<ChapterMeta>>>> + Send;

    /// One chapter payload. Any failure is chapter-scoped.
    fn chapter(
        &self,
        slug: &str,
        branch_id: &str,
        meta: &ChapterMeta,
    ) -> impl Future<Output = Result<RawChapter, ChapterError>> + Send;

    /// Raw bytes plus HTTP status, for images and the cover.
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<(u16, Vec<u8>)>> + Send;
}

/// Thin `reqwest` wrapper around the lib.social JSON API. Every payload
/// arrives wrapped in a `{"data": ...}` envelope.
pub struct LibClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ChapterDto {
    #[serde(deserialize_with = "crate::models::num_string")]
    id: String,
    #[serde(deserialize_with = "crate::models::num_string")]
    number: String,
    #[serde(deserialize_with = "crate::models::num_string")]
    volume: String,
    content: serde_json::Value,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

impl LibClient {
    pub fn new() -> Result<Self> {
        Self::with_base(API_BASE)
    }

    pub fn with_base(base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base: base.into(),
        })
    }
}

impl RemoteSource for LibClient {
    async fn work(&self, slug: &str) -> Result<Option<WorkData>> {
        let query = WORK_FIELDS
            .iter()
            .map(|f| format!("fields[]={f}"))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/manga/{}?{}", self.base, slug, query);

        let response = self.http.get(&url).send().await.context("work metadata")?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), slug, "work metadata unavailable");
            return Ok(None);
        }
        let envelope: Envelope<WorkData> =
            response.json().await.context("decoding work metadata")?;
        Ok(Some(envelope.data))
    }

    async fn branches(&self, work_id: &str) -> Result<Option<Vec<Branch>>> {
        let url = format!("{}/branches/{}?team_defaults=1", self.base, work_id);
        let response = self.http.get(&url).send().await.context("branch list")?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), work_id, "branch list unavailable");
            return Ok(None);
        }
        let envelope: Envelope<Vec<Branch>> =
            response.json().await.context("decoding branch list")?;
        Ok(Some(envelope.data))
    }

    async fn chapter_list(&self, slug: &str) -> Result<Option<Vec<ChapterMeta>>> {
        let url = format!("{}/manga/{}/chapters", self.base, slug);
        let response = self.http.get(&url).send().await.context("chapter list")?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), slug, "chapter list unavailable");
            return Ok(None);
        }
        let envelope: Envelope<Vec<ChapterMeta>> =
            response.json().await.context("decoding chapter list")?;
        Ok(Some(envelope.data))
    }

    async fn chapter(
        &self,
        slug: &str,
        branch_id: &str,
        meta: &ChapterMeta,
    ) -> Result<RawChapter, ChapterError> {
        let fetch_error = || ChapterError::Fetch {
            volume: meta.volume.clone(),
            number: meta.number.clone(),
        };

        let url = format!(
            "{}/manga/{}/chapter?branch_id={}&number={}&volume={}",
            self.base, slug, branch_id, meta.number, meta.volume
        );
        let response = self.http.get(&url).send().await.map_err(|e| {
            tracing::debug!(error = %e, url, "chapter request failed");
            fetch_error()
        })?;
        if !response.status().is_success() {
            return Err(fetch_error());
        }
        let envelope: Envelope<ChapterDto> = response.json().await.map_err(|e| {
            tracing::debug!(error = %e, url, "chapter payload undecodable");
            fetch_error()
        })?;
        let dto = envelope.data;

        Ok(RawChapter {
            id: dto.id,
            number: dto.number,
            volume: dto.volume,
            content: classify_content(dto.content),
            attachments: dto.attachments,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?;
        Ok((status, bytes.to_vec()))
    }
}

/// Decide which of the two known content shapes a chapter payload carries.
pub(crate) fn classify_content(content: serde_json::Value) -> ChapterContent {
    match content {
        serde_json::Value::String(s) if is_markup(&s) => ChapterContent::Markup(s),
        serde_json::Value::Object(mut obj) => match obj.remove("content") {
            Some(nodes) => serde_json::from_value::<Vec<ContentNode>>(nodes)
                .map(ChapterContent::Structured)
                .unwrap_or(ChapterContent::Unknown),
            None => ChapterContent::Unknown,
        },
        _ => ChapterContent::Unknown,
    }
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?[^>]+)>").expect("tag pattern"));

const KNOWN_TAGS: &[&str] = &[
    "html", "head", "body", "title", "meta", "link", "script", "style", "div", "span", "p", "a",
    "img", "ul", "ol", "li", "table", "tr", "td", "th", "form", "input", "button", "h1", "h2",
    "h3", "h4", "h5", "h6", "br", "hr",
];

/// A string counts as markup only if it contains at least one tag from the
/// known HTML set; angle brackets around arbitrary words do not qualify.
pub(crate) fn is_markup(text: &str) -> bool {
    TAG_RE.captures_iter(text).any(|cap| {
        let tag = cap[1].trim_matches('/');
        let name = tag.split_whitespace().next().unwrap_or("");
        KNOWN_TAGS.contains(&name.to_ascii_lowercase().as_str())
    })
}

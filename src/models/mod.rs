use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// Chapter numbers and volumes come back from the API either as JSON numbers
/// or as strings, and they are not necessarily integral ("10.5" is a valid
/// chapter number). They are never used arithmetically, so both shapes are
/// normalized to their display string.
pub(crate) fn num_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) if n.fract() == 0.0 => format!("{}", n as i64),
        Raw::Num(n) => n.to_string(),
        Raw::Str(s) => s,
    })
}

/// One entry of the work's chapter list. Ordering is defined by the list the
/// API returns; chapters are never re-sorted by volume or number.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChapterMeta {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "num_string")]
    pub number: String,
    #[serde(deserialize_with = "num_string")]
    pub volume: String,
}

impl ChapterMeta {
    /// The canonical chapter heading. A pure function of (volume, number,
    /// name); the same composition is used for document headings and,
    /// width-padded, for log lines.
    pub fn title(&self) -> String {
        format!("Volume {}. Chapter {}. {}", self.volume, self.number, self.name)
    }

    /// Same composition as [`title`](Self::title), with the numeric fields
    /// right-aligned to the widest value across the requested range.
    pub fn padded_title(&self, widths: &RangeWidths) -> String {
        format!(
            "Volume {:>vw$}. Chapter {:>nw$}. {}",
            self.volume,
            self.number,
            self.name,
            vw = widths.volume,
            nw = widths.number,
        )
    }
}

/// Field widths for aligned chapter listings, computed once per requested
/// range: the position width from the range length, the number width from
/// the longest chapter number, the volume width from the last volume.
#[derive(Debug, Clone, Copy)]
pub struct RangeWidths {
    pub index: usize,
    pub number: usize,
    pub volume: usize,
}

impl RangeWidths {
    pub fn of(range: &[ChapterMeta]) -> Self {
        Self {
            index: range.len().to_string().len(),
            number: range.iter().map(|c| c.number.len()).max().unwrap_or(0),
            volume: range.last().map(|c| c.volume.len()).unwrap_or(0),
        }
    }
}

/// An image attached to a structured-form chapter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub filename: String,
    pub name: String,
    pub extension: String,
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// One node of a structured-form chapter body. Anything the converter does
/// not understand deserializes as `Other` and is ignored during
/// normalization.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentNode {
    Paragraph {
        #[serde(default)]
        content: Vec<InlineNode>,
    },
    Image {
        attrs: ImageAttrs,
    },
    HorizontalRule,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InlineNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageAttrs {
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageEntry {
    pub image: String,
}

/// The two content shapes a chapter payload may carry, plus the error shape.
/// A string payload with at least one recognizable markup tag is `Markup`;
/// an object carrying a node list is `Structured`; everything else is
/// `Unknown` and rejected at normalization time.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterContent {
    Markup(String),
    Structured(Vec<ContentNode>),
    Unknown,
}

/// One fetched chapter payload, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChapter {
    pub id: String,
    pub number: String,
    pub volume: String,
    pub content: ChapterContent,
    pub attachments: Vec<Attachment>,
}

/// An image extracted from chapter content, addressed inside the container
/// by a locally unique id rather than its remote URL. All derived fields are
/// computed here; the value is immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub id: String,
    pub name: String,
    pub url: String,
    pub extension: String,
    pub static_path: String,
    pub media_type: String,
}

impl ImageResource {
    pub fn new(chapter_id: &str, filename: &str, name: &str, url: String, extension: &str) -> Self {
        let id = format!("{chapter_id}_{filename}");
        Self {
            static_path: format!("static/{id}"),
            media_type: format!("image/{extension}"),
            id,
            name: name.to_string(),
            url,
            extension: extension.to_string(),
        }
    }
}

/// One semantic content block. Blocks are produced strictly in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(String),
    Image { resource_id: String },
    Rule,
}

/// A fully assembled chapter, owned by the book after assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub file_name: String,
    pub blocks: Vec<Block>,
    /// Keyed by display name; ids are unique within the chapter.
    pub resources: HashMap<String, ImageResource>,
}

/// The book aggregate. Created empty at prepare, populated append-only
/// during fill, series metadata fixed at finalize, then read-only for save.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub title: String,
    pub language: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub summary: String,
    pub series: String,
    pub cover: Option<Cover>,
    pub chapters: Vec<Chapter>,
    /// Volume of the first chapter of the *requested* range, fixed before
    /// any fetch attempt. May reference a volume absent from the artifact
    /// if that chapter later fails.
    pub min_volume: String,
    pub max_volume: String,
    pub series_note: String,
}

impl Book {
    /// Artifact file stem: the title with colons stripped.
    pub fn sanitized_title(&self) -> String {
        self.title.replace(':', "")
    }
}

/// Eagerly fetched cover image bytes plus the file name derived from the
/// remote URL.
#[derive(Debug, Clone, Default)]
pub struct Cover {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Work ("ranobe") metadata as returned by the catalog endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkData {
    #[serde(deserialize_with = "num_string")]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "rus_name")]
    pub localized_name: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub authors: Vec<Named>,
    #[serde(default)]
    pub genres: Vec<Named>,
    #[serde(default)]
    pub franchise: Vec<Named>,
    #[serde(default)]
    pub cover: Option<CoverRef>,
    #[serde(default, rename = "chap_count")]
    pub chapter_count: Option<u32>,
    #[serde(default, rename = "releaseDate")]
    pub release_date: Option<String>,
    #[serde(default, rename = "rate")]
    pub rating: Option<serde_json::Value>,
}

impl WorkData {
    /// Localized name when present, canonical name otherwise.
    pub fn title(&self) -> &str {
        self.localized_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Named {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoverRef {
    #[serde(default)]
    pub default: String,
}

/// One translation branch of a work.
#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    #[serde(deserialize_with = "num_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub teams: Vec<Named>,
}

impl Branch {
    pub fn display(&self) -> String {
        let teams = self
            .teams
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(" & ");
        format!("{}. Translators: {}", self.name, teams)
    }
}

/// What the fill/save stages emit towards the caller: human-readable log
/// lines and progress ticks, in chapter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Log(String),
    Progress(u32),
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<Event>;

/// Send a log line, ignoring a dropped receiver.
pub fn log(events: &EventSink, line: impl Into<String>) {
    let _ = events.send(Event::Log(line.into()));
}

/// Advance the caller's progress bar by one tick.
pub fn tick(events: &EventSink) {
    let _ = events.send(Event::Progress(1));
}

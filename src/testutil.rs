//! Shared in-memory stand-in for the remote catalog, used by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::error::ChapterError;
use crate::models::{Branch, ChapterContent, ChapterMeta, RawChapter, WorkData};
use crate::services::api::RemoteSource;

/// Keyed by `(number, volume)`.
pub type ChapterKey = (String, String);

#[derive(Default)]
pub struct StubSource {
    pub work: Option<WorkData>,
    pub branches: Option<Vec<Branch>>,
    pub chapter_list: Option<Vec<ChapterMeta>>,
    pub chapters: HashMap<ChapterKey, RawChapter>,
    /// URL -> (status, body) for image and cover requests.
    pub images: HashMap<String, (u16, Vec<u8>)>,
}

impl StubSource {
    pub fn add_chapter(&mut self, meta: &ChapterMeta, raw: RawChapter) {
        self.chapters
            .insert((meta.number.clone(), meta.volume.clone()), raw);
    }

    /// Register a chapter whose payload is a single markup paragraph.
    pub fn add_markup_chapter(&mut self, meta: &ChapterMeta, body: &str) {
        let raw = RawChapter {
            id: format!("id-{}-{}", meta.volume, meta.number),
            number: meta.number.clone(),
            volume: meta.volume.clone(),
            content: ChapterContent::Markup(format!("<p>{body}</p>")),
            attachments: vec![],
        };
        self.add_chapter(meta, raw);
    }
}

pub fn meta(name: &str, number: &str, volume: &str) -> ChapterMeta {
    ChapterMeta {
        name: name.into(),
        number: number.into(),
        volume: volume.into(),
    }
}

impl RemoteSource for StubSource {
    async fn work(&self, _slug: &str) -> Result<Option<WorkData>> {
        Ok(self.work.clone())
    }

    async fn branches(&self, _work_id: &str) -> Result<Option<Vec<Branch>>> {
        Ok(self.branches.clone())
    }

    async fn chapter_list(&self, _slug: &str) -> Result<Option<Vec<ChapterMeta>>> {
        Ok(self.chapter_list.clone())
    }

    async fn chapter(
        &self,
        _slug: &str,
        _branch_id: &str,
        meta: &ChapterMeta,
    ) -> Result<RawChapter, ChapterError> {
        self.chapters
            .get(&(meta.number.clone(), meta.volume.clone()))
            .cloned()
            .ok_or_else(|| ChapterError::Fetch {
                volume: meta.volume.clone(),
                number: meta.number.clone(),
            })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        match self.images.get(url) {
            Some((status, body)) => Ok((*status, body.clone())),
            None => Ok((404, Vec::new())),
        }
    }
}

/// Wraps a stub and raises the shared flag while serving each chapter, so
/// the chapter completes but the loop finds the flag set on its next
/// iteration. Lets interruption tests stop after a known prefix.
pub struct CancelOnFetch {
    pub inner: StubSource,
    pub flag: Arc<AtomicBool>,
}

impl RemoteSource for CancelOnFetch {
    async fn work(&self, slug: &str) -> Result<Option<WorkData>> {
        self.inner.work(slug).await
    }

    async fn branches(&self, work_id: &str) -> Result<Option<Vec<Branch>>> {
        self.inner.branches(work_id).await
    }

    async fn chapter_list(&self, slug: &str) -> Result<Option<Vec<ChapterMeta>>> {
        self.inner.chapter_list(slug).await
    }

    async fn chapter(
        &self,
        slug: &str,
        branch_id: &str,
        meta: &ChapterMeta,
    ) -> Result<RawChapter, ChapterError> {
        self.flag.store(true, Ordering::Relaxed);
        self.inner.chapter(slug, branch_id, meta).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        self.inner.fetch_bytes(url).await
    }
}

/// Drain every event currently buffered in the channel.
pub fn drain_events(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<crate::models::Event>,
) -> Vec<crate::models::Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// The log lines among the drained events.
pub fn log_lines(events: &[crate::models::Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            crate::models::Event::Log(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

/// Total progress ticks among the drained events.
pub fn progress_total(events: &[crate::models::Event]) -> u32 {
    events
        .iter()
        .map(|e| match e {
            crate::models::Event::Progress(n) => *n,
            _ => 0,
        })
        .sum()
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};

use crate::error::ChapterError;
use crate::models::{
    Book, Chapter, ChapterMeta, Cover, EventSink, RangeWidths, WorkData, log, tick,
};
use crate::services::api::RemoteSource;
use crate::services::content;

/// Default pause between chapter requests, to stay friendly with the remote
/// rate limits.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Assemble one chapter: fetch the raw payload, normalize it, attach its
/// resources. Each failure is isolated to this chapter.
pub async fn assemble_chapter<S: RemoteSource>(
    source: &S,
    slug: &str,
    branch_id: &str,
    meta: &ChapterMeta,
) -> Result<Chapter, ChapterError> {
    let raw = source.chapter(slug, branch_id, meta).await?;
    let normalized = content::normalize(&raw)?;
    Ok(Chapter {
        title: meta.title(),
        file_name: format!("{}_{}.xhtml", meta.number, meta.volume),
        blocks: normalized.blocks,
        resources: normalized.resources,
    })
}

/// Book assembly lifecycle. Reaching `Cancelled` is only possible from
/// `Filling`; the half-filled book is still finalized and saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Preparing,
    Filling,
    Cancelled,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Completed,
    Cancelled,
}

/// Drives chapter assembly over an ordered range, accumulating the book
/// aggregate. The book is exclusively owned here until [`into_book`]
/// releases it, immutable, to the serializer.
///
/// [`into_book`]: BookAssembler::into_book
pub struct BookAssembler<'a, S: RemoteSource> {
    source: &'a S,
    events: EventSink,
    cancel: Arc<AtomicBool>,
    delay: Duration,
    book: Book,
    state: AssemblerState,
}

impl<'a, S: RemoteSource> BookAssembler<'a, S> {
    pub fn new(source: &'a S, events: EventSink, cancel: Arc<AtomicBool>, delay: Duration) -> Self {
        Self {
            source,
            events,
            cancel,
            delay,
            book: Book::default(),
            state: AssemblerState::Idle,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Construct the empty book from the work's front matter. The cover is
    /// fetched eagerly, unlike chapter images; a cover failure is fatal to
    /// the run.
    pub async fn prepare(&mut self, work: &WorkData) -> Result<()> {
        self.state = AssemblerState::Preparing;
        log(&self.events, "Preparing the book...");

        let cover = match &work.cover {
            Some(cover_ref) if !cover_ref.default.is_empty() => {
                let (status, bytes) = self.source.fetch_bytes(&cover_ref.default).await?;
                if status != 200 {
                    bail!("failed to fetch the cover image (HTTP {status})");
                }
                let file_name = cover_ref
                    .default
                    .rsplit('/')
                    .next()
                    .unwrap_or("cover")
                    .to_string();
                Some(Cover { file_name, bytes })
            }
            _ => None,
        };

        self.book = Book {
            title: work.title().to_string(),
            language: "ru".into(),
            authors: work.authors.iter().map(|a| a.name.clone()).collect(),
            genres: work.genres.iter().map(|g| g.name.clone()).collect(),
            summary: work.summary.clone(),
            series: work
                .franchise
                .first()
                .map(|f| f.name.clone())
                .unwrap_or_else(|| work.name.clone()),
            cover,
            ..Book::default()
        };

        log(&self.events, "Prepared the book.");
        Ok(())
    }

    /// Download the requested range in order. Series bounds are fixed from
    /// the first and last element of the range *before* any fetch attempt;
    /// failed chapters are skipped, never retried, and never reordered.
    pub async fn fill(&mut self, slug: &str, branch_id: &str, range: &[ChapterMeta]) -> FillOutcome {
        self.state = AssemblerState::Filling;

        if let (Some(first), Some(last)) = (range.first(), range.last()) {
            self.book.min_volume = first.volume.clone();
            self.book.max_volume = last.volume.clone();
        }

        let widths = RangeWidths::of(range);
        log(
            &self.events,
            format!("Starting to download chapters: {}", range.len()),
        );

        for (position, meta) in range.iter().enumerate() {
            tokio::time::sleep(self.delay).await;

            if self.cancel.load(Ordering::Relaxed) {
                self.state = AssemblerState::Cancelled;
                break;
            }

            match assemble_chapter(self.source, slug, branch_id, meta).await {
                Ok(chapter) => {
                    self.book.chapters.push(chapter);
                    log(
                        &self.events,
                        format!(
                            "Downloaded {:>iw$}: {}",
                            position + 1,
                            meta.padded_title(&widths),
                            iw = widths.index,
                        ),
                    );
                    tick(&self.events);
                }
                Err(err) => {
                    log(&self.events, format!("{err}. Skipping chapter."));
                }
            }
        }

        if self.state == AssemblerState::Cancelled {
            FillOutcome::Cancelled
        } else {
            FillOutcome::Completed
        }
    }

    /// Fix the series-range note. No chapters may be appended afterwards.
    pub fn finalize(&mut self) {
        self.book.series_note = format!(
            "Volumes {} to {}",
            self.book.min_volume, self.book.max_volume
        );
        self.state = AssemblerState::Finalized;
    }

    /// Release the finished aggregate; it is treated as immutable from here.
    pub fn into_book(self) -> Book {
        self.book
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::models::{ChapterMeta, EventSink, WorkData, log};
use crate::services::api::RemoteSource;
use crate::services::book::{BookAssembler, DEFAULT_DELAY, FillOutcome};
use crate::services::{epub, fb2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Epub,
    Fb2,
}

/// Stages of one download run. Each stage hands off to exactly one
/// successor; cancellation during `Fill` jumps straight to `Save` so the
/// partial book is still written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prepare,
    Fill,
    Finalize,
    Save,
}

/// End-to-end run: prepare front matter, fill chapters, finalize, serialize.
/// Emits progress over the event channel so a caller can render it live.
pub struct Pipeline<'a, S: RemoteSource> {
    source: &'a S,
    format: OutputFormat,
    events: EventSink,
    cancel: Arc<AtomicBool>,
    delay: Duration,
}

impl<'a, S: RemoteSource> Pipeline<'a, S> {
    pub fn new(
        source: &'a S,
        format: OutputFormat,
        events: EventSink,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self::with_delay(source, format, events, cancel, DEFAULT_DELAY)
    }

    pub fn with_delay(
        source: &'a S,
        format: OutputFormat,
        events: EventSink,
        cancel: Arc<AtomicBool>,
        delay: Duration,
    ) -> Self {
        Self {
            source,
            format,
            events,
            cancel,
            delay,
        }
    }

    /// Run the whole pipeline and return the path of the written artifact.
    ///
    /// Preconditions are checked up front: the chapter range must be
    /// non-empty and `dest` must be an existing directory. After that, only
    /// cover fetch and serialization failures abort the run; chapter
    /// failures are skipped inside `Fill`.
    pub async fn run(
        &self,
        work: &WorkData,
        slug: &str,
        branch_id: &str,
        range: &[ChapterMeta],
        dest: &Path,
    ) -> Result<PathBuf> {
        if range.is_empty() {
            bail!("no chapters selected, nothing to download");
        }
        if !dest.is_dir() {
            bail!("output directory {} does not exist", dest.display());
        }

        let mut assembler = BookAssembler::new(
            self.source,
            self.events.clone(),
            Arc::clone(&self.cancel),
            self.delay,
        );

        let mut stage = Stage::Prepare;
        loop {
            stage = match stage {
                Stage::Prepare => {
                    assembler.prepare(work).await?;
                    Stage::Fill
                }
                Stage::Fill => match assembler.fill(slug, branch_id, range).await {
                    FillOutcome::Completed => Stage::Finalize,
                    FillOutcome::Cancelled => {
                        log(&self.events, "Download cancelled, saving what we have.");
                        assembler.finalize();
                        Stage::Save
                    }
                },
                Stage::Finalize => {
                    assembler.finalize();
                    Stage::Save
                }
                Stage::Save => break,
            };
        }

        let book = assembler.into_book();
        log(&self.events, "Saving the book...");
        match self.format {
            OutputFormat::Epub => epub::serialize(&book, self.source, dest, &self.events).await,
            OutputFormat::Fb2 => fb2::serialize(&book, dest, &self.events).await,
        }
    }
}

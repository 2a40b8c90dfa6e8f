mod error;
mod models;
mod services;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

use models::{Event, RangeWidths};
use services::api::{LibClient, RemoteSource};
use services::pipeline::{OutputFormat, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Epub,
    Fb2,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Epub => OutputFormat::Epub,
            Format::Fb2 => OutputFormat::Fb2,
        }
    }
}

/// Download a ranobe from ranobelib.me and pack it into an e-book.
#[derive(Debug, Parser)]
#[command(name = "ranobe2ebook", version)]
struct Cli {
    /// Work URL (or its slug directly)
    url: String,

    /// Output container format
    #[arg(short, long, value_enum, default_value = "epub")]
    format: Format,

    /// Directory the artifact is written into
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Translation branch id (default: the first listed branch)
    #[arg(short, long)]
    branch: Option<String>,

    /// 1-based index of the first chapter to download
    #[arg(short, long, default_value_t = 1)]
    start: usize,

    /// How many chapters to download (default: all remaining)
    #[arg(short, long)]
    count: Option<usize>,

    /// Pause between chapter requests, in seconds
    #[arg(short, long, default_value_t = 0.5)]
    delay: f64,

    /// List branches and chapters instead of downloading
    #[arg(short, long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let slug = slug_from_url(&cli.url);
    let client = LibClient::new()?;

    let Some(work) = client.work(slug).await? else {
        bail!("work {slug} not found, or it requires authorization");
    };

    let branches = client.branches(&work.id).await?.unwrap_or_default();

    let Some(chapters) = client.chapter_list(slug).await? else {
        bail!("no chapter list for {slug}");
    };

    if cli.list {
        println!(
            "{} ({} chapters)",
            work.title(),
            work.chapter_count.map_or(chapters.len(), |n| n as usize)
        );
        if let Some(date) = &work.release_date {
            println!("released {date}");
        }
        if let Some(rating) = &work.rating {
            println!("rating {rating}");
        }
        for branch in &branches {
            println!("branch {}: {}", branch.id, branch.display());
        }
        let widths = RangeWidths::of(&chapters);
        for (i, meta) in chapters.iter().enumerate() {
            println!(
                "{:>iw$}: {}",
                i + 1,
                meta.padded_title(&widths),
                iw = widths.index
            );
        }
        return Ok(());
    }

    let branch_id = match cli.branch {
        Some(id) => id,
        None => branches
            .first()
            .map(|b| b.id.clone())
            .unwrap_or_else(|| "0".to_string()),
    };

    if cli.start < 1 || cli.start > chapters.len() {
        bail!(
            "start index {} out of range, the work has {} chapters",
            cli.start,
            chapters.len()
        );
    }
    let from = cli.start - 1;
    let to = match cli.count {
        Some(count) => (from + count).min(chapters.len()),
        None => chapters.len(),
    };
    let range = &chapters[from..to];
    let total = range.len();

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut done: u32 = 0;
        while let Some(event) = rx.recv().await {
            match event {
                Event::Log(line) => println!("{line}"),
                Event::Progress(step) => {
                    done += step;
                    println!("[{done}/{total}]");
                }
            }
        }
    });

    let pipeline = Pipeline::with_delay(
        &client,
        cli.format.into(),
        events,
        cancel,
        Duration::from_secs_f64(cli.delay),
    );
    let result = pipeline.run(&work, slug, &branch_id, range, &cli.out).await;

    // Closes the channel so the printer drains and exits.
    drop(pipeline);
    printer.await.context("event printer task")?;

    result.map(|_| ())
}

/// The API slug is the last path segment of the work URL, query string
/// excluded. A bare slug passes through unchanged.
fn slug_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

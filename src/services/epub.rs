use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use epub_builder::{EpubBuilder, EpubContent, MetadataOpf, ZipLibrary};

use crate::models::{Block, Book, Chapter, EventSink, log};
use crate::services::api::RemoteSource;
use crate::services::images;

/// Serialize the finished book into an EPUB container: one XHTML
/// sub-document per chapter, an inline table of contents, and one embedded
/// binary per image resource. Image bytes are fetched here, not earlier;
/// a failed image is logged and omitted, the chapter text is unaffected.
pub async fn serialize<S: RemoteSource>(
    book: &Book,
    source: &S,
    dir: &Path,
    events: &EventSink,
) -> Result<PathBuf> {
    let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(|e| anyhow!(e))?)
        .map_err(|e| anyhow!(e))?;

    builder
        .metadata("title", book.title.as_str())
        .map_err(|e| anyhow!(e))?;
    builder
        .metadata("lang", book.language.as_str())
        .map_err(|e| anyhow!(e))?;
    for author in &book.authors {
        builder
            .metadata("author", author.as_str())
            .map_err(|e| anyhow!(e))?;
    }
    builder
        .metadata("subject", book.genres.join(" "))
        .map_err(|e| anyhow!(e))?;
    builder
        .metadata("description", book.summary.replace('\n', "<p>"))
        .map_err(|e| anyhow!(e))?;
    builder
        .metadata("generator", "ranobe2ebook")
        .map_err(|e| anyhow!(e))?;
    builder.add_metadata_opf(Box::new(MetadataOpf {
        name: "series".into(),
        content: book.series.clone(),
    }));
    builder.add_metadata_opf(Box::new(MetadataOpf {
        name: "series_index".into(),
        content: book.series_note.clone(),
    }));

    if let Some(cover) = &book.cover {
        let mime = images::mime_for(&cover.file_name);
        builder
            .add_cover_image(&cover.file_name, cover.bytes.as_slice(), mime)
            .map_err(|e| anyhow!(e))?;
    }

    builder.inline_toc();

    for chapter in &book.chapters {
        let xhtml = render_chapter(book, chapter);
        builder
            .add_content(
                EpubContent::new(chapter.file_name.as_str(), xhtml.as_bytes())
                    .title(chapter.title.as_str()),
            )
            .map_err(|e| anyhow!(e))?;

        for resource in chapter.resources.values() {
            match images::fetch_image(source, resource).await {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    builder
                        .add_resource(&resource.static_path, bytes.as_slice(), &resource.media_type)
                        .map_err(|e| anyhow!(e))?;
                }
                Err(err) => log(events, err.to_string()),
            }
        }
    }

    let file_name = format!("{}.epub", book.sanitized_title());
    let path = dir.join(&file_name);

    // ZIP compression is CPU-bound; keep it off the async workers.
    let path_for_write = path.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&path_for_write)
            .with_context(|| format!("creating {}", path_for_write.display()))?;
        builder.generate(file).map_err(|e| anyhow!(e))?;
        Ok(())
    })
    .await
    .context("epub writer task")??;

    log(events, format!("Book {} saved in EPUB format.", book.title));
    log(
        events,
        format!("Created {} in {}.", file_name, dir.display()),
    );
    Ok(path)
}

/// One chapter as an XHTML sub-document: heading first, then the blocks in
/// order, image references rewritten to the container-local static paths.
fn render_chapter(book: &Book, chapter: &Chapter) -> String {
    let mut body = format!("<h1>{}</h1>", html_escape::encode_text(&chapter.title));
    for block in &chapter.blocks {
        match block {
            Block::Paragraph(text) => {
                body.push_str("<p>");
                body.push_str(&html_escape::encode_text(text));
                body.push_str("</p>");
            }
            Block::Image { resource_id } => {
                body.push_str(&format!("<img src=\"static/{resource_id}\"/>"));
            }
            Block::Rule => body.push_str("<hr/>"),
        }
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{}">
<head>
    <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8" />
    <title>{}</title>
</head>
<body>
{}
</body>
</html>"#,
        book.language,
        html_escape::encode_text(&chapter.title),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cover, ImageResource};
    use crate::testutil::StubSource;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn sample_book() -> Book {
        let chapter = Chapter {
            title: "Volume 1. Chapter 1. Start".into(),
            file_name: "1_1.xhtml".into(),
            blocks: vec![
                Block::Paragraph("Once <upon> a time".into()),
                Block::Rule,
                Block::Paragraph("The end".into()),
            ],
            resources: HashMap::new(),
        };
        Book {
            title: "Test: Book".into(),
            language: "ru".into(),
            authors: vec!["Author".into()],
            genres: vec!["Drama".into()],
            summary: "summary".into(),
            series: "Test".into(),
            cover: Some(Cover {
                file_name: "cover.jpg".into(),
                bytes: jpeg_cover(),
            }),
            chapters: vec![chapter],
            min_volume: "1".into(),
            max_volume: "1".into(),
            series_note: "Volumes 1 to 1".into(),
        }
    }

    fn jpeg_cover() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2,
            2,
            image::Rgb([10, 20, 30]),
        ));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn writes_one_artifact_named_after_the_sanitized_title() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let path = serialize(&sample_book(), &source, dir.path(), &tx)
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "Test Book.epub");
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);
    }

    #[tokio::test]
    async fn image_failures_are_logged_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::default(); // every image request 404s

        let mut book = sample_book();
        let resource =
            ImageResource::new("ch1", "pic.png", "pic", "http://cdn/pic.png".into(), "png");
        book.chapters[0].blocks.push(Block::Image {
            resource_id: resource.id.clone(),
        });
        book.chapters[0]
            .resources
            .insert(resource.name.clone(), resource);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let path = serialize(&book, &source, dir.path(), &tx).await.unwrap();
        assert!(path.exists());

        let lines = crate::testutil::log_lines(&crate::testutil::drain_events(&mut rx));
        assert!(
            lines.iter().any(|l| l.contains("skipping image")),
            "expected an image skip log, got {lines:?}"
        );
    }

    #[test]
    fn rendered_chapter_escapes_text_and_keeps_block_order() {
        let book = sample_book();
        let xhtml = render_chapter(&book, &book.chapters[0]);
        let h1 = xhtml.find("<h1>").unwrap();
        let p1 = xhtml.find("Once &lt;upon&gt; a time").unwrap();
        let hr = xhtml.find("<hr/>").unwrap();
        let p2 = xhtml.find("The end").unwrap();
        assert!(h1 < p1 && p1 < hr && hr < p2);
    }

    #[test]
    fn rendered_images_point_at_static_paths() {
        let chapter = Chapter {
            title: "t".into(),
            file_name: "1_1.xhtml".into(),
            blocks: vec![Block::Image {
                resource_id: "ch1_pic.png".into(),
            }],
            resources: HashMap::new(),
        };
        let book = Book::default();
        let xhtml = render_chapter(&book, &chapter);
        assert!(xhtml.contains("<img src=\"static/ch1_pic.png\"/>"));
    }
}

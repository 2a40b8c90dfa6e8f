use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};

use crate::models::{Block, Book, EventSink, log};
use crate::services::images;

const FB2_NS: &str = "http://www.gribuser.ru/xml/fictionbook/2.0";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Serialize the finished book into a single FB2 document. FB2 is one XML
/// file; the cover travels inline as a base64 `<binary>` element and each
/// chapter becomes one `<section>`. Chapter image blocks are not carried
/// over, horizontal rules are rendered as `<empty-line/>`.
pub async fn serialize(book: &Book, dir: &Path, events: &EventSink) -> Result<PathBuf> {
    let xml = render(book)?;

    let file_name = format!("{}.fb2", book.sanitized_title());
    let path = dir.join(&file_name);
    tokio::fs::write(&path, xml)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    log(events, format!("Book {} saved in FB2 format.", book.title));
    log(
        events,
        format!("Created {} in {}.", file_name, dir.display()),
    );
    Ok(path)
}

fn render(book: &Book) -> Result<Vec<u8>> {
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("FictionBook");
    root.push_attribute(("xmlns", FB2_NS));
    root.push_attribute(("xmlns:l", XLINK_NS));
    w.write_event(XmlEvent::Start(root))?;

    write_description(&mut w, book)?;
    write_body(&mut w, book)?;

    if let Some(cover) = &book.cover {
        let mut binary = BytesStart::new("binary");
        binary.push_attribute(("id", cover.file_name.as_str()));
        binary.push_attribute(("content-type", images::mime_for(&cover.file_name)));
        w.write_event(XmlEvent::Start(binary))?;
        w.write_event(XmlEvent::Text(BytesText::new(&BASE64.encode(&cover.bytes))))?;
        w.write_event(XmlEvent::End(BytesEnd::new("binary")))?;
    }

    w.write_event(XmlEvent::End(BytesEnd::new("FictionBook")))?;
    Ok(w.into_inner().into_inner())
}

fn write_description(w: &mut Writer<Cursor<Vec<u8>>>, book: &Book) -> Result<()> {
    w.write_event(XmlEvent::Start(BytesStart::new("description")))?;

    w.write_event(XmlEvent::Start(BytesStart::new("title-info")))?;
    for genre in &book.genres {
        write_text_element(w, "genre", genre)?;
    }
    for author in &book.authors {
        w.write_event(XmlEvent::Start(BytesStart::new("author")))?;
        write_text_element(w, "first-name", author)?;
        w.write_event(XmlEvent::End(BytesEnd::new("author")))?;
    }
    write_text_element(w, "book-title", &book.title)?;
    w.write_event(XmlEvent::Start(BytesStart::new("annotation")))?;
    for line in book.summary.lines() {
        write_text_element(w, "p", line)?;
    }
    w.write_event(XmlEvent::End(BytesEnd::new("annotation")))?;
    if let Some(cover) = &book.cover {
        w.write_event(XmlEvent::Start(BytesStart::new("coverpage")))?;
        let mut image = BytesStart::new("image");
        image.push_attribute(("l:href", format!("#{}", cover.file_name).as_str()));
        w.write_event(XmlEvent::Empty(image))?;
        w.write_event(XmlEvent::End(BytesEnd::new("coverpage")))?;
    }
    write_text_element(w, "lang", &book.language)?;
    let mut sequence = BytesStart::new("sequence");
    sequence.push_attribute(("name", book.title.as_str()));
    sequence.push_attribute(("number", book.series_note.as_str()));
    w.write_event(XmlEvent::Empty(sequence))?;
    w.write_event(XmlEvent::End(BytesEnd::new("title-info")))?;

    w.write_event(XmlEvent::Start(BytesStart::new("document-info")))?;
    write_text_element(w, "program-used", "ranobe2ebook")?;
    w.write_event(XmlEvent::End(BytesEnd::new("document-info")))?;

    w.write_event(XmlEvent::End(BytesEnd::new("description")))?;
    Ok(())
}

fn write_body(w: &mut Writer<Cursor<Vec<u8>>>, book: &Book) -> Result<()> {
    w.write_event(XmlEvent::Start(BytesStart::new("body")))?;

    w.write_event(XmlEvent::Start(BytesStart::new("title")))?;
    write_text_element(w, "p", &book.title)?;
    w.write_event(XmlEvent::End(BytesEnd::new("title")))?;

    for chapter in &book.chapters {
        w.write_event(XmlEvent::Start(BytesStart::new("section")))?;
        w.write_event(XmlEvent::Start(BytesStart::new("title")))?;
        write_text_element(w, "p", &chapter.title)?;
        w.write_event(XmlEvent::End(BytesEnd::new("title")))?;

        for block in &chapter.blocks {
            match block {
                Block::Paragraph(text) => write_text_element(w, "p", text)?,
                Block::Rule => {
                    w.write_event(XmlEvent::Empty(BytesStart::new("empty-line")))?;
                }
                Block::Image { .. } => {}
            }
        }
        w.write_event(XmlEvent::End(BytesEnd::new("section")))?;
    }

    w.write_event(XmlEvent::End(BytesEnd::new("body")))?;
    Ok(())
}

fn write_text_element(w: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) -> Result<()> {
    w.write_event(XmlEvent::Start(BytesStart::new(tag)))?;
    w.write_event(XmlEvent::Text(BytesText::new(text)))?;
    w.write_event(XmlEvent::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Cover};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn sample_book() -> Book {
        Book {
            title: "Re:Title".into(),
            language: "ru".into(),
            authors: vec!["Author One".into()],
            genres: vec!["fantasy".into()],
            summary: "line one\nline two".into(),
            series: "Re:Title".into(),
            cover: Some(Cover {
                file_name: "cover.jpg".into(),
                bytes: vec![1, 2, 3],
            }),
            chapters: vec![Chapter {
                title: "Volume 1. Chapter 1. Start".into(),
                file_name: "1_1.xhtml".into(),
                blocks: vec![
                    Block::Paragraph("A < B".into()),
                    Block::Image {
                        resource_id: "c_1.png".into(),
                    },
                    Block::Rule,
                ],
                resources: HashMap::new(),
            }],
            min_volume: "1".into(),
            max_volume: "3".into(),
            series_note: "Volumes 1 to 3".into(),
        }
    }

    fn rendered() -> String {
        String::from_utf8(render(&sample_book()).unwrap()).unwrap()
    }

    #[test]
    fn document_carries_namespaces_and_metadata() {
        let xml = rendered();
        assert!(xml.contains("xmlns=\"http://www.gribuser.ru/xml/fictionbook/2.0\""));
        assert!(xml.contains("xmlns:l=\"http://www.w3.org/1999/xlink\""));
        assert!(xml.contains("<book-title>Re:Title</book-title>"));
        assert!(xml.contains("<first-name>Author One</first-name>"));
        assert!(xml.contains("<genre>fantasy</genre>"));
        assert!(xml.contains("<lang>ru</lang>"));
    }

    #[test]
    fn sequence_note_spans_the_downloaded_volumes() {
        let xml = rendered();
        assert!(xml.contains("<sequence name=\"Re:Title\" number=\"Volumes 1 to 3\"/>"));
    }

    #[test]
    fn cover_is_embedded_as_base64_binary() {
        let xml = rendered();
        assert!(xml.contains("<image l:href=\"#cover.jpg\"/>"));
        assert!(xml.contains("<binary id=\"cover.jpg\" content-type=\"image/jpeg\">AQID</binary>"));
    }

    #[test]
    fn cover_content_type_follows_the_file_extension() {
        let mut book = sample_book();
        book.cover = Some(Cover {
            file_name: "cover.png".into(),
            bytes: vec![1, 2, 3],
        });
        let xml = String::from_utf8(render(&book).unwrap()).unwrap();
        assert!(xml.contains("<binary id=\"cover.png\" content-type=\"image/png\">"));
    }

    #[test]
    fn chapters_become_sections_without_images() {
        let xml = rendered();
        assert!(xml.contains("<p>Volume 1. Chapter 1. Start</p>"));
        assert!(xml.contains("<p>A &lt; B</p>"));
        assert!(xml.contains("<empty-line/>"));
        assert!(!xml.contains("c_1.png"));
        assert!(!xml.contains("<hr"));
    }

    #[test]
    fn annotation_splits_summary_lines() {
        let xml = rendered();
        assert!(xml.contains("<p>line one</p>"));
        assert!(xml.contains("<p>line two</p>"));
    }

    #[tokio::test]
    async fn artifact_name_is_the_colon_stripped_title() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let path = serialize(&sample_book(), dir.path(), &tx).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "ReTitle.fb2");
        assert!(std::fs::read_to_string(&path).unwrap().contains("<body>"));
    }
}

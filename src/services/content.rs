use std::collections::HashMap;

use scraper::{ElementRef, Html};

use crate::error::ChapterError;
use crate::models::{Block, ChapterContent, ContentNode, ImageResource, RawChapter};
use crate::services::api::SITE_BASE;

/// Normalized chapter content: semantic blocks in source order plus the
/// image resources they reference.
#[derive(Debug, Default)]
pub struct Normalized {
    pub blocks: Vec<Block>,
    pub resources: HashMap<String, ImageResource>,
}

/// Convert one raw chapter payload into semantic blocks. Markup and
/// structured payloads produce the same model; an unknown payload shape is a
/// chapter-scoped error and yields no blocks at all.
pub fn normalize(raw: &RawChapter) -> Result<Normalized, ChapterError> {
    match &raw.content {
        ChapterContent::Markup(markup) => Ok(from_markup(&raw.id, markup)),
        ChapterContent::Structured(nodes) => from_nodes(raw, nodes),
        ChapterContent::Unknown => Err(ChapterError::UnknownKind),
    }
}

/// Markup form: a recursive walk over the parsed fragment. `img` elements
/// are rewritten to local resource references; `hr` becomes a rule; any
/// other element free of embedded media becomes one paragraph carrying its
/// full descendant text (inline formatting flattened, nothing dropped).
/// Only elements that still contain media are descended into further.
fn from_markup(chapter_id: &str, markup: &str) -> Normalized {
    let fragment = Html::parse_fragment(markup);
    let mut out = Normalized::default();
    visit_children(chapter_id, fragment.root_element(), &mut out);
    out
}

fn visit_children(chapter_id: &str, element: ElementRef, out: &mut Normalized) {
    for child in element.children() {
        if let Some(child) = ElementRef::wrap(child) {
            visit(chapter_id, child, out);
        }
    }
}

fn visit(chapter_id: &str, element: ElementRef, out: &mut Normalized) {
    match element.value().name() {
        "img" => {
            let Some(src) = element.value().attr("src") else {
                return;
            };
            let filename = src.rsplit('/').next().unwrap_or(src);
            let name = filename.split('.').next().unwrap_or(filename);
            let extension = filename.rsplit('.').next().unwrap_or(filename);
            let resource =
                ImageResource::new(chapter_id, filename, name, src.to_string(), extension);
            out.blocks.push(Block::Image {
                resource_id: resource.id.clone(),
            });
            out.resources.insert(resource.name.clone(), resource);
        }
        "hr" => out.blocks.push(Block::Rule),
        _ => {
            let holds_media = element
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|e| matches!(e.value().name(), "img" | "hr"));
            if holds_media {
                visit_children(chapter_id, element, out);
            } else {
                out.blocks.push(Block::Paragraph(element.text().collect()));
            }
        }
    }
}

/// Structured form: the resource map is built first from the attachment
/// list, then the node list is walked in order. An image node pointing at an
/// attachment that was never listed abandons the chapter.
fn from_nodes(raw: &RawChapter, nodes: &[ContentNode]) -> Result<Normalized, ChapterError> {
    let mut out = Normalized::default();

    for attachment in &raw.attachments {
        let resource = ImageResource::new(
            &raw.id,
            &attachment.filename,
            &attachment.name,
            format!("{SITE_BASE}{}", attachment.url),
            &attachment.extension,
        );
        out.resources.insert(attachment.name.clone(), resource);
    }

    for node in nodes {
        match node {
            ContentNode::Image { attrs } => {
                let name = attrs
                    .images
                    .last()
                    .map(|entry| entry.image.as_str())
                    .ok_or_else(|| ChapterError::MissingAttachment(String::new()))?;
                let resource = out
                    .resources
                    .get(name)
                    .ok_or_else(|| ChapterError::MissingAttachment(name.to_string()))?;
                out.blocks.push(Block::Image {
                    resource_id: resource.id.clone(),
                });
            }
            ContentNode::Paragraph { content } => {
                let text = content
                    .first()
                    .filter(|inline| inline.kind == "text")
                    .and_then(|inline| inline.text.clone())
                    .unwrap_or_default();
                out.blocks.push(Block::Paragraph(text));
            }
            ContentNode::HorizontalRule => out.blocks.push(Block::Rule),
            ContentNode::Other => {}
        }
    }

    Ok(out)
}

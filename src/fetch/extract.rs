//! Content-region extraction and sanitization for fetched wiki pages.

use scraper::{ElementRef, Html, Selector};

use crate::dom::{Document, NodeId};

/// Primary container used by published note pages.
const PRIMARY_SELECTORS: &[&str] = &[".markdown-preview-sizer"];
const ALTERNATE_SELECTORS: &[&str] = &[
    ".markdown-preview-view",
    ".markdown-rendered",
    ".publish-renderer",
];
const SEMANTIC_SELECTORS: &[&str] = &["main", "article", "[role=\"main\"]", "#content", ".content"];

const EXECUTABLE_TAGS: &[&str] = &["script", "noscript", "iframe", "object", "embed"];
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction", "xlink:href"];
const MEDIA_TAGS: &[&str] = &["img", "svg", "video", "audio", "picture", "table"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    Primary,
    Alternate,
    Semantic,
    ParagraphDensity,
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRegion {
    /// Sanitized inner HTML of the region.
    pub html: String,
    pub title: Option<String>,
    pub source: RegionSource,
}

/// Returns `None` when not even the page body holds anything to show.
pub fn extract_region(raw_html: &str) -> Option<ExtractedRegion> {
    let parsed = Html::parse_document(raw_html);
    let (region, source) = find_region(&parsed)?;

    let mut fragment = Document::new();
    let body = fragment.body();
    let region_id = fragment.import_element(body, region);
    sanitize(&mut fragment, region_id);

    if !has_visible_content(&fragment, region_id) {
        return None;
    }

    let title = match source {
        RegionSource::Body => None,
        _ => extract_title(&parsed),
    };

    Some(ExtractedRegion {
        html: fragment.inner_html(region_id).trim().to_owned(),
        title,
        source,
    })
}

fn find_region(document: &Html) -> Option<(ElementRef<'_>, RegionSource)> {
    let tiers = [
        (PRIMARY_SELECTORS, RegionSource::Primary),
        (ALTERNATE_SELECTORS, RegionSource::Alternate),
        (SEMANTIC_SELECTORS, RegionSource::Semantic),
    ];
    for (selectors, source) in tiers {
        if let Some(element) = first_match(document, selectors) {
            return Some((element, source));
        }
    }

    if let Some(element) = densest_paragraph_container(document) {
        return Some((element, RegionSource::ParagraphDensity));
    }

    let body = Selector::parse("body").ok()?;
    document
        .select(&body)
        .next()
        .map(|element| (element, RegionSource::Body))
}

fn first_match<'a>(document: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        document.select(&selector).next()
    })
}

/// The element with the most direct `<p>` children, if any has at least one.
fn densest_paragraph_container(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("body *").ok()?;
    let mut best: Option<(usize, ElementRef<'_>)> = None;

    for element in document.select(&selector) {
        let paragraphs = element
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == "p")
            .count();
        if paragraphs > 0 && best.as_ref().is_none_or(|(count, _)| paragraphs > *count) {
            best = Some((paragraphs, element));
        }
    }

    best.map(|(_, element)| element)
}

/// `<title>` first, then the first `<h1>`, whitespace collapsed.
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        let element = document.select(&selector).next()?;
        let text = collapse_whitespace(&element.text().collect::<String>());
        (!text.is_empty()).then_some(text)
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes everything that could execute when the fragment is displayed.
pub fn sanitize(document: &mut Document, root: NodeId) {
    for node in document.select(root, |element| EXECUTABLE_TAGS.contains(&element.name())) {
        document.detach(node);
    }

    for node in document.select(root, |_| true) {
        let Some(element) = document.element(node) else {
            continue;
        };
        let unsafe_attrs: Vec<String> = element
            .attrs()
            .filter(|(name, value)| {
                name.to_ascii_lowercase().starts_with("on")
                    || (URL_ATTRS.contains(&name.to_ascii_lowercase().as_str())
                        && is_script_url(value))
            })
            .map(|(name, _)| name.to_owned())
            .collect();
        for name in unsafe_attrs {
            document.remove_attr(node, &name);
        }
    }
}

fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control())
        .collect();
    let lower = compact.to_ascii_lowercase();
    lower.starts_with("javascript:") || lower.starts_with("vbscript:")
}

fn has_visible_content(document: &Document, root: NodeId) -> bool {
    if !document.text_content(root).trim().is_empty() {
        return true;
    }
    !document
        .select(root, |element| MEDIA_TAGS.contains(&element.name()))
        .is_empty()
}

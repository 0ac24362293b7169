use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::dom::{Document, Element, NodeId};

pub const INTERNAL_LINK_CLASS: &str = "internal-link";
pub const BRACKET_LINK_CLASS: &str = "bracket-link";
pub const EXTERNAL_LINK_CLASS: &str = "external-link";
pub const PROCESSED_ATTR: &str = "data-hover-processed";
pub const ALIAS_ATTR: &str = "data-href";
pub const ORIGINAL_TEXT_ATTR: &str = "data-original-text";
pub const PAGE_SUFFIX: &str = ".html";

const SKIPPED_TEXT_PARENTS: &[&str] = &["script", "style", "textarea", "code", "pre", "a"];

static BRACKET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("bracket pattern is valid"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// A reference from the current page (or a popup) to another wiki page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerLink {
    pub node: NodeId,
    pub text: String,
    pub href: Option<String>,
    pub alias: Option<String>,
}

impl TriggerLink {
    pub fn from_node(document: &Document, node: NodeId) -> Option<Self> {
        let element = document.element(node)?;
        let href = element
            .attr("href")
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
            .map(str::to_owned);
        let alias = element
            .attr(ALIAS_ATTR)
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(str::to_owned);

        if href.is_none() && alias.is_none() {
            return None;
        }

        Some(Self {
            node,
            text: document.text_content(node),
            href,
            alias,
        })
    }

    /// The target to hand to the URL resolver: the explicit `href` without
    /// fragment or query, else the slugified alias.
    pub fn raw_target(&self) -> String {
        if let Some(href) = &self.href {
            let without_fragment = href.split('#').next().unwrap_or_default();
            let without_query = without_fragment.split('?').next().unwrap_or_default();
            if !without_query.is_empty() {
                return without_query.to_owned();
            }
        }

        self.alias
            .as_deref()
            .map(resource_path_for_alias)
            .unwrap_or_default()
    }
}

/// Lower-cases and replaces whitespace runs with `-`.
pub fn slugify(alias: &str) -> String {
    WHITESPACE_RUN
        .replace_all(alias.trim(), "-")
        .to_lowercase()
}

pub fn resource_path_for_alias(alias: &str) -> String {
    let slug = slugify(alias);
    if slug.ends_with(PAGE_SUFFIX) {
        slug
    } else {
        format!("{slug}{PAGE_SUFFIX}")
    }
}

/// Finds trigger links under a subtree and converts `[[Name]]` text into
/// link elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkDiscoverer;

impl LinkDiscoverer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the links wired during this call. Links already carrying the
    /// processed marker are skipped, so repeated calls are idempotent.
    pub fn discover(&self, document: &mut Document, root: NodeId) -> Vec<NodeId> {
        let bracket_links = self.convert_bracket_references(document, root);

        let mut wired = Vec::new();
        for node in document.select(root, is_trigger_candidate) {
            if document.attr(node, PROCESSED_ATTR).is_some() {
                continue;
            }
            if TriggerLink::from_node(document, node).is_none() {
                continue;
            }
            document.set_attr(node, PROCESSED_ATTR, "true");
            wired.push(node);
        }

        if !wired.is_empty() || bracket_links > 0 {
            debug!(
                root = root.index(),
                wired = wired.len(),
                bracket_links,
                "discovered trigger links"
            );
        }
        wired
    }

    fn convert_bracket_references(&self, document: &mut Document, root: NodeId) -> usize {
        let snapshot: &Document = document;
        let candidates: Vec<NodeId> = std::iter::once(root)
            .chain(snapshot.descendants(root))
            .filter(|id| {
                snapshot
                    .text(*id)
                    .is_some_and(|text| text.contains("[[") && text.contains("]]"))
            })
            .filter(|id| !inside_skipped_parent(snapshot, *id))
            .collect();

        let mut created = 0;
        for text_node in candidates {
            created += split_text_node(document, text_node);
        }
        created
    }
}

fn is_trigger_candidate(element: &Element) -> bool {
    if element.has_class(INTERNAL_LINK_CLASS) || element.attr(ALIAS_ATTR).is_some() {
        return true;
    }
    if element.name() != "a" || element.has_class(EXTERNAL_LINK_CLASS) {
        return false;
    }
    element.attr("href").is_some_and(is_relative_href)
}

fn is_relative_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty()
        && !href.starts_with('#')
        && !href.starts_with('/')
        && !href.starts_with("http")
        && !has_scheme(href)
}

pub(crate) fn has_scheme(href: &str) -> bool {
    href.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
    })
}

fn inside_skipped_parent(document: &Document, node: NodeId) -> bool {
    document.ancestors(node).any(|ancestor| {
        document
            .element(ancestor)
            .is_some_and(|element| SKIPPED_TEXT_PARENTS.contains(&element.name()))
    })
}

fn split_text_node(document: &mut Document, text_node: NodeId) -> usize {
    let Some(parent) = document.parent(text_node) else {
        return 0;
    };
    let text = document.text(text_node).unwrap_or_default().to_owned();

    let mut fragments = Vec::new();
    let mut last_index = 0;
    for captures in BRACKET_PATTERN.captures_iter(&text) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() > last_index {
            fragments.push(document.create_text(&text[last_index..whole.start()]));
        }
        fragments.push(create_bracket_link(document, name.as_str()));
        last_index = whole.end();
    }

    if fragments.is_empty() {
        return 0;
    }
    if last_index < text.len() {
        fragments.push(document.create_text(&text[last_index..]));
    }

    let snapshot: &Document = document;
    let links = fragments
        .iter()
        .filter(|id| snapshot.element(**id).is_some())
        .count();
    for fragment in fragments {
        document.insert_before(parent, fragment, text_node);
    }
    document.detach(text_node);
    links
}

fn create_bracket_link(document: &mut Document, name: &str) -> NodeId {
    let link = document.create_element("a");
    document.add_class(link, INTERNAL_LINK_CLASS);
    document.add_class(link, BRACKET_LINK_CLASS);
    document.set_attr(link, "href", &resource_path_for_alias(name));
    document.set_attr(link, ALIAS_ATTR, name);
    document.set_attr(link, ORIGINAL_TEXT_ATTR, &format!("[[{name}]]"));
    let label = document.create_text(name);
    document.append_child(link, label);
    link
}

//! Pure classification and extraction helpers.
//!
//! Path bucketing (page vs fragment vs PDF vs SVG vs generic media),
//! content-type labelling, and the markdown parsers that discover
//! linked-content references in rendered page markup.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::LinkedKind;

/// `:iconname:` tokens that are documentation markup, not icon references.
const ICON_DENYLIST: &[&str] = &["note", "tip", "info", "warning", "caution", "important"];

fn inline_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Covers both [text](url) and ![alt](url); the optional title after the
    // url is ignored.
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)[^)]*\)").unwrap())
}

fn autolink_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<((?:https?://|/)[^>\s]+)>").unwrap())
}

fn icon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([a-z0-9][a-z0-9_-]*):").unwrap())
}

/// Strip query and fragment, and give page-like paths their default
/// content extension.
pub fn normalize_path(path: &str) -> String {
    let end = path
        .find(['?', '#'])
        .unwrap_or(path.len());
    let mut path = path[..end].to_string();

    if path.ends_with('/') {
        path.push_str("index.md");
    } else {
        let last = path.rsplit('/').next().unwrap_or("");
        if !last.contains('.') {
            path.push_str(".md");
        }
    }
    path
}

fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next()?;
    let dot = last.rfind('.')?;
    Some(&last[dot + 1..])
}

/// Whether the path is a content page (markdown source).
pub fn is_page(path: &str) -> bool {
    match extension(path) {
        None => true,
        Some(ext) => ext.eq_ignore_ascii_case("md"),
    }
}

pub fn is_fragment(path: &str) -> bool {
    path.contains("/fragments/")
}

pub fn is_pdf(path: &str) -> bool {
    extension(path).is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

pub fn is_svg(path: &str) -> bool {
    extension(path).is_some_and(|e| e.eq_ignore_ascii_case("svg"))
}

/// Whether the path is linked content: a fragment, PDF, or SVG.
pub fn is_linked_content_path(path: &str) -> bool {
    is_fragment(path) || is_pdf(path) || is_svg(path)
}

/// The linked-content category of a path, if it is one.
pub fn linked_kind(path: &str) -> Option<LinkedKind> {
    if is_pdf(path) {
        Some(LinkedKind::Pdf)
    } else if is_svg(path) {
        Some(LinkedKind::Svg)
    } else if is_fragment(path) {
        Some(LinkedKind::Fragment)
    } else {
        None
    }
}

/// Map a MIME content type to the persisted "category > subtype" label.
pub fn detect_media_type(content_type: &str) -> String {
    let bare = content_type.split(';').next().unwrap_or("").trim();
    match bare.split_once('/') {
        Some((category, subtype)) if !category.is_empty() && !subtype.is_empty() => {
            format!("{category} > {subtype}")
        }
        _ => "unknown".to_string(),
    }
}

/// Display name for an asset: the upload filename when known, otherwise the
/// basename of its URL or path.
pub fn extract_name(original_filename: Option<&str>, url: &str) -> String {
    if let Some(name) = original_filename {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end]
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Reduce a link target to a site path: absolute URLs lose scheme and host,
/// and query/fragment are stripped.
fn path_of_url(url: &str) -> Option<String> {
    let rest = if let Some(stripped) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        let slash = stripped.find('/')?;
        &stripped[slash..]
    } else if url.starts_with('/') {
        url
    } else {
        return None;
    };

    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

fn all_link_paths(markdown: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut push = |url: &str| {
        if let Some(path) = path_of_url(url) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    };

    for cap in inline_link_re().captures_iter(markdown) {
        push(&cap[1]);
    }
    for cap in autolink_re().captures_iter(markdown) {
        push(&cap[1]);
    }
    paths
}

/// Extract link targets from markdown whose path ends with `suffix`
/// (e.g. ".pdf"). Matches inline links, images, and bare `<url>` autolinks.
pub fn extract_links(markdown: &str, suffix: &str) -> Vec<String> {
    let suffix = suffix.to_ascii_lowercase();
    all_link_paths(markdown)
        .into_iter()
        .filter(|p| p.to_ascii_lowercase().ends_with(&suffix))
        .collect()
}

/// Extract fragment references: any link target under a /fragments/ path.
pub fn extract_fragment_references(markdown: &str) -> Vec<String> {
    all_link_paths(markdown)
        .into_iter()
        .filter(|p| is_fragment(p))
        .collect()
}

/// Resolve `:iconname:` shorthand to the icon SVG paths it renders as.
pub fn extract_icon_references(markdown: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for cap in icon_re().captures_iter(markdown) {
        let name = &cap[1];
        if ICON_DENYLIST.contains(&name) {
            continue;
        }
        let path = format!("/icons/{name}.svg");
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

//! Sanitization of member-supplied rich text.
//!
//! Bodies of articles, posts and comments are stored as sanitized HTML; titles are stored as
//! plain text. Everything goes through [`ammonia`], which parses the input as HTML5 and rebuilds
//! it from an allowlist.

use std::collections::HashSet;

use ammonia::Builder;

/// Tags allowed in rich-text bodies
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "em", "ul", "ol", "li", "blockquote", "code", "pre", "a", "h2", "h3", "h4", "img",
];

const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

const LINK_REL: &str = "noopener noreferrer nofollow";

pub const MAX_SLUG_LENGTH: usize = 80;

/// Clean rich text down to the allowed tags. Links get a `rel` that stops them passing referrer
/// or ranking, and only `http`, `https` and `mailto` URLs survive.
pub fn sanitize_html(input: &str) -> String {
    Builder::default()
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .url_schemes(ALLOWED_URL_SCHEMES.iter().copied().collect::<HashSet<_>>())
        .link_rel(Some(LINK_REL))
        .clean(input)
        .to_string()
}

/// Strip every tag and collapse whitespace. The result is plain text, not HTML.
pub fn plain_text(input: &str) -> String {
    let stripped = Builder::empty().clean(input).to_string();
    let unescaped = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&");

    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// URL slug from a title: lowercase ASCII alphanumerics joined by single dashes
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len().min(MAX_SLUG_LENGTH));
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LENGTH {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LENGTH);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() { "untitled".to_string() } else { slug.to_string() }
}

/// Plain-text preview of an HTML body, cut at a word boundary
pub fn excerpt(html: &str, max_chars: usize) -> String {
    let text = plain_text(html);
    if text.chars().count() <= max_chars {
        return text;
    }

    let cut: String = text.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end_matches([',', '.', ';', ':']))
}

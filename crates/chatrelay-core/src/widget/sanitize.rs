//! Allow-list HTML sanitizer for assistant replies.
//!
//! Replies that look like markup are re-serialized from a parsed tree keeping
//! only known-safe tags and attributes. Everything else is escaped text.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(\s[^<>]*)?/?>").expect("static regex"));

const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "div", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "img", "li", "ol", "p", "pre", "s", "span", "strong", "table", "tbody", "td", "th",
    "thead", "tr", "u", "ul",
];

/// Tags dropped together with everything inside them.
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "svg", "math",
    "form", "textarea", "select", "button", "input",
];

const VOID_TAGS: &[&str] = &["br", "hr", "img"];

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title"],
        "img" => &["src", "alt", "title"],
        "td" | "th" => &["colspan", "rowspan"],
        _ => &[],
    }
}

fn safe_url(value: &str, allow_mailto: bool) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.starts_with("https://") || v.starts_with("http://") || (allow_mailto && v.starts_with("mailto:"))
}

/// Escape text for inclusion in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Whether a reply contains something that looks like an HTML tag.
pub fn looks_like_html(text: &str) -> bool {
    HTML_TAG.is_match(text)
}

/// Keep only allow-listed tags and attributes; escape all text.
pub fn sanitize_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), &mut out);
    out
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&escape_html(text));
        } else if let Some(child_el) = ElementRef::wrap(child) {
            write_element(child_el, out);
        }
    }
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let tag = element.value().name().to_ascii_lowercase();
    if DROPPED_TAGS.contains(&tag.as_str()) {
        return;
    }
    if !ALLOWED_TAGS.contains(&tag.as_str()) {
        // Unknown wrappers are unwrapped; their content survives.
        write_children(element, out);
        return;
    }

    out.push('<');
    out.push_str(&tag);
    for (name, value) in element.value().attrs() {
        let name = name.to_ascii_lowercase();
        if !allowed_attrs(&tag).contains(&name.as_str()) {
            continue;
        }
        if (name == "href" && !safe_url(value, true)) || (name == "src" && !safe_url(value, false))
        {
            continue;
        }
        out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
    }
    if tag == "a" {
        out.push_str(" target=\"_blank\" rel=\"noopener noreferrer\"");
    }
    out.push('>');

    if VOID_TAGS.contains(&tag.as_str()) {
        return;
    }
    write_children(element, out);
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

/// Markup for an assistant reply: sanitized HTML if the reply looks like
/// markup, otherwise escaped text with line breaks preserved.
pub fn render_reply(reply: &str) -> String {
    if looks_like_html(reply) {
        sanitize_html(reply)
    } else {
        escape_html(reply).replace("\r\n", "\n").replace('\n', "<br>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_escaped() {
        assert_eq!(render_reply("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(render_reply("line one\nline two"), "line one<br>line two");
    }

    #[test]
    fn test_allowed_markup_kept() {
        assert_eq!(
            sanitize_html("<p>Hello <strong>there</strong></p>"),
            "<p>Hello <strong>there</strong></p>"
        );
        assert_eq!(sanitize_html("a<br>b"), "a<br>b");
    }

    #[test]
    fn test_scripts_and_handlers_removed() {
        let out = sanitize_html("<p onclick=\"steal()\">hi</p><script>alert(1)</script>");
        assert_eq!(out, "<p>hi</p>");

        let out = render_reply("<img src=\"x\" onerror=\"alert(1)\">");
        assert!(!out.contains("onerror"));
        assert!(!out.contains("src"));
    }

    #[test]
    fn test_links_restricted() {
        let out = sanitize_html("<a href=\"javascript:alert(1)\">x</a>");
        assert!(!out.contains("javascript"));

        let out = sanitize_html("<a href=\"https://example.com\">site</a>");
        assert_eq!(
            out,
            "<a href=\"https://example.com\" target=\"_blank\" rel=\"noopener noreferrer\">site</a>"
        );
    }

    #[test]
    fn test_unknown_tags_unwrapped() {
        assert_eq!(sanitize_html("<custom>kept <em>text</em></custom>"), "kept <em>text</em>");
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("<b>x</b>"));
        assert!(looks_like_html("before <br/> after"));
        assert!(!looks_like_html("2 < 3 and 5 > 4"));
        assert!(!looks_like_html("plain"));
    }
}

//! Lightweight tag scanning for the XML documents inside an EPUB.
//!
//! OPF, SMIL and XHTML documents are read with a handful of cached regexes:
//! tags are matched independent of namespace prefix, attribute values are
//! entity-decoded, and comments are blanked out (byte length preserved) so
//! commented-out markup never produces tags.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

fn re_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        // Quoted attribute values are consumed whole; `>` is legal inside them
        Regex::new(
            r#"<(/)?(?:[A-Za-z_][\w.-]*:)?([A-Za-z_][\w.-]*)((?:\s(?:"[^"]*"|'[^']*'|[^<>"'])*?)?)(/)?\s*>"#,
        )
        .unwrap()
    })
}

fn re_attr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

fn re_comment() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap())
}

fn re_entity() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z]+);").unwrap())
}

/// A start, end or empty-element tag found in a document.
#[derive(Debug, Clone)]
pub(crate) struct Tag<'a> {
    pub closing: bool,
    /// Local name, namespace prefix removed
    pub name: &'a str,
    pub self_closing: bool,
    /// Byte offset of `<`
    pub start: usize,
    /// Byte offset just past `>`
    pub end: usize,
    attrs: &'a str,
}

impl<'a> Tag<'a> {
    fn from_captures(caps: Captures<'a>, offset: usize) -> Self {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        Tag {
            closing: caps.get(1).is_some(),
            name: caps.get(2).map_or("", |m| m.as_str()),
            self_closing: caps.get(4).is_some(),
            start: whole.0 + offset,
            end: whole.1 + offset,
            attrs: caps.get(3).map_or("", |m| m.as_str()),
        }
    }

    pub fn is_start(&self, name: &str) -> bool {
        !self.closing && self.name == name
    }

    /// Entity-decoded value of the attribute with exactly this (qualified) name.
    pub fn attr(&self, name: &str) -> Option<String> {
        re_attr().captures_iter(self.attrs).find_map(|caps| {
            if &caps[1] != name {
                return None;
            }
            let raw = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            Some(unescape(raw).into_owned())
        })
    }
}

/// All tags of `source`, in document order.
pub(crate) fn tags(source: &str) -> impl Iterator<Item = Tag<'_>> {
    re_tag()
        .captures_iter(source)
        .map(|caps| Tag::from_captures(caps, 0))
}

/// Markup between `open` and its matching end tag. Nested elements with the
/// same name are balanced. `None` when the element is never closed.
pub(crate) fn inner_markup<'a>(source: &'a str, open: &Tag<'_>) -> Option<&'a str> {
    if open.self_closing {
        return Some("");
    }
    element_body(source, open.name, open.end)
}

/// Markup from `body_start` up to the end tag closing an element `name`
/// whose start tag ends at `body_start`.
pub(crate) fn element_body<'a>(source: &'a str, name: &str, body_start: usize) -> Option<&'a str> {
    let rest = source.get(body_start..)?;
    let mut depth = 1usize;
    for caps in re_tag().captures_iter(rest) {
        let tag = Tag::from_captures(caps, body_start);
        if tag.name != name || tag.self_closing {
            continue;
        }
        if tag.closing {
            depth -= 1;
            if depth == 0 {
                return source.get(body_start..tag.start);
            }
        } else {
            depth += 1;
        }
    }
    None
}

/// Replace comments with spaces of the same byte length.
pub(crate) fn strip_comments(source: &str) -> Cow<'_, str> {
    re_comment().replace_all(source, |caps: &Captures<'_>| " ".repeat(caps[0].len()))
}

/// Decode the predefined XML entities, `&nbsp;` and numeric character references.
pub(crate) fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    re_entity().replace_all(s, |caps: &Captures<'_>| {
        let body = &caps[1];
        let decoded = if let Some(hex) = body
            .strip_prefix("#x")
            .or_else(|| body.strip_prefix("#X"))
        {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match body {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => None,
            }
        };
        match decoded {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_ignore_namespace_prefix() {
        let doc = r#"<smil:par id="p1"><smil:text src="a.xhtml#s1"/></smil:par>"#;
        let found: Vec<_> = tags(doc).collect();

        assert_eq!(found.len(), 3);
        assert!(found[0].is_start("par"));
        assert_eq!(found[0].attr("id").as_deref(), Some("p1"));
        assert!(found[1].self_closing);
        assert_eq!(found[1].attr("src").as_deref(), Some("a.xhtml#s1"));
        assert!(found[2].closing);
    }

    #[test]
    fn test_attr_quotes_and_entities() {
        let doc = r#"<item href='a&amp;b.xhtml' media-type="application/xhtml+xml" />"#;
        let tag = tags(doc).next().unwrap();

        assert_eq!(tag.attr("href").as_deref(), Some("a&b.xhtml"));
        assert_eq!(tag.attr("media-type").as_deref(), Some("application/xhtml+xml"));
        assert_eq!(tag.attr("type"), None);
    }

    #[test]
    fn test_gt_inside_quoted_attribute() {
        let doc = r#"<span id="s1" title="a > b" data-x='<c>'>Hello there.</span>"#;
        let found: Vec<_> = tags(doc).collect();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].attr("title").as_deref(), Some("a > b"));
        assert_eq!(found[0].attr("data-x").as_deref(), Some("<c>"));
        assert_eq!(inner_markup(doc, &found[0]), Some("Hello there."));
    }

    #[test]
    fn test_self_closing_after_quoted_slash() {
        let doc = r#"<audio src="../a/b.mp3" clipEnd="1s"/>"#;
        let tag = tags(doc).next().unwrap();

        assert!(tag.self_closing);
        assert_eq!(tag.attr("src").as_deref(), Some("../a/b.mp3"));
    }

    #[test]
    fn test_inner_markup_balances_nested_elements() {
        let doc = r#"<p><span id="a">one <span>two</span> three</span><span>x</span></p>"#;
        let open = tags(doc).find(|t| t.attr("id").as_deref() == Some("a")).unwrap();

        assert_eq!(
            inner_markup(doc, &open),
            Some("one <span>two</span> three")
        );
    }

    #[test]
    fn test_inner_markup_unclosed() {
        let doc = r#"<span id="a">dangling"#;
        let open = tags(doc).next().unwrap();
        assert_eq!(inner_markup(doc, &open), None);
    }

    #[test]
    fn test_strip_comments_preserves_offsets() {
        let doc = "a<!-- <par/> -->b";
        let stripped = strip_comments(doc);

        assert_eq!(stripped.len(), doc.len());
        assert_eq!(tags(&stripped).count(), 0);
        assert!(stripped.starts_with('a') && stripped.ends_with('b'));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("a &lt;b&gt; &amp; c"), "a <b> & c");
        assert_eq!(unescape("it&#8217;s &#x41;"), "it\u{2019}s A");
        assert_eq!(unescape("&unknown;"), "&unknown;");
    }
}

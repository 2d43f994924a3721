//! Reduces server-supplied rich text and URLs to what is safe to hand to a renderer.

use url::Url;

/// Inline tags that survive sanitising. Attributes are always dropped.
const ALLOWED_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "br", "span", "code", "mark", "small", "sub", "sup",
];
const VOID_TAGS: &[&str] = &["br"];
/// Tags removed together with everything up to their closing tag.
const DROP_CONTENT_TAGS: &[&str] = &["script", "style"];

const URL_SCHEMES: &[&str] = &["http", "https"];
const MAX_ENTITY_LEN: usize = 10;

struct ParsedTag {
    name: String,
    closing: bool,
    len: usize,
}

/// Keeps the allowed inline tags (without attributes) and the text of everything
/// else. Unknown tags are stripped, `<script>`/`<style>` are removed with their
/// content, stray `<`, `>` and `&` are escaped, and unclosed tags are closed at
/// the end so the output is always well nested.
pub fn sanitize_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut open: Vec<&'static str> = Vec::new();
    let mut rest = input;

    while let Some(pos) = rest.find(['<', '>', '&']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("<!--") {
            rest = match tail[4..].find("-->") {
                Some(end) => &tail[4 + end + 3..],
                None => "",
            };
            continue;
        }

        if tail.starts_with('<') {
            let Some(tag) = parse_tag(tail) else {
                out.push_str("&lt;");
                rest = &tail[1..];
                continue;
            };
            rest = &tail[tag.len..];

            if let Some(allowed) = ALLOWED_TAGS.iter().find(|t| **t == tag.name) {
                if VOID_TAGS.contains(allowed) {
                    out.push_str("<br>");
                } else if !tag.closing {
                    out.push('<');
                    out.push_str(allowed);
                    out.push('>');
                    open.push(*allowed);
                } else if let Some(idx) = open.iter().rposition(|t| t == allowed) {
                    for name in open.drain(idx..).rev() {
                        push_closing(&mut out, name);
                    }
                }
            } else if !tag.closing && DROP_CONTENT_TAGS.contains(&tag.name.as_str()) {
                rest = skip_past_closing(rest, &tag.name);
            }
            continue;
        }

        if tail.starts_with('>') {
            out.push_str("&gt;");
            rest = &tail[1..];
            continue;
        }

        match entity_len(tail) {
            Some(len) => {
                out.push_str(&tail[..len]);
                rest = &tail[len..];
            }
            None => {
                out.push_str("&amp;");
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    for name in open.into_iter().rev() {
        push_closing(&mut out, name);
    }
    out
}

fn push_closing(out: &mut String, name: &str) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn parse_tag(tail: &str) -> Option<ParsedTag> {
    let end = tail.find('>')?;
    let inner = &tail[1..end];
    let (closing, body) = match inner.strip_prefix('/') {
        Some(body) => (true, body),
        None => (false, inner),
    };
    let name_len = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    if name_len == 0 || !body.as_bytes()[0].is_ascii_alphabetic() {
        return None;
    }
    let after_name = &body[name_len..];
    if !after_name.is_empty() && !after_name.starts_with([' ', '\t', '\n', '\r', '/']) {
        return None;
    }
    Some(ParsedTag {
        name: body[..name_len].to_ascii_lowercase(),
        closing,
        len: end + 1,
    })
}

fn skip_past_closing<'a>(rest: &'a str, name: &str) -> &'a str {
    let needle = format!("</{name}");
    let lower = rest.to_ascii_lowercase();
    match lower.find(&needle) {
        Some(start) => match rest[start..].find('>') {
            Some(end) => &rest[start + end + 1..],
            None => "",
        },
        None => "",
    }
}

/// Length of a well-formed character reference at the start of `tail`, if any.
fn entity_len(tail: &str) -> Option<usize> {
    let semi = tail
        .bytes()
        .take(MAX_ENTITY_LEN + 2)
        .position(|b| b == b';')?;
    let body = &tail[1..semi];
    let valid = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else if let Some(dec) = body.strip_prefix('#') {
        !dec.is_empty() && dec.chars().all(|c| c.is_ascii_digit())
    } else {
        !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric())
    };
    valid.then_some(semi + 1)
}

/// Parses `raw` as an absolute URL and accepts it only for http(s).
pub fn checked_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    URL_SCHEMES.contains(&url.scheme()).then_some(url)
}

/// Like [`checked_url`], but also accepts inline raster images (`data:image/...`).
/// SVG is excluded since it can carry script.
pub fn checked_avatar_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        "data" => {
            let media = url.path().to_ascii_lowercase();
            (media.starts_with("image/") && !media.starts_with("image/svg")).then_some(url)
        }
        _ => None,
    }
}

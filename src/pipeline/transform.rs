//! Content transformation seam.
//!
//! The real source-to-source rewriters (JS/HTML/CSS) live outside this crate
//! behind [`ContentTransformer`]. The built-in implementation only performs
//! the page injection the proxy itself is responsible for: the session
//! bootstrap script and the session's injectable resources, placed at the
//! top of the document head.

use bytes::Bytes;
use thiserror::Error;

use super::context::ContentKind;
use crate::session::Session;

/// Context passed to the transformer for one response body.
pub struct TransformContext<'a> {
    pub dest_url: &'a str,
    pub charset: Option<&'a str>,
    pub session: &'a Session,
}

#[derive(Debug, Error)]
#[error("Failed to process {kind} content from \"{url}\": {cause}")]
pub struct TransformError {
    pub kind: ContentKind,
    pub url: String,
    pub cause: String,
}

/// Pure content rewriter: `rewrite(content, kind, context) -> content`.
/// Implementations must not perform IO.
pub trait ContentTransformer: Send + Sync {
    fn transform(
        &self,
        content: Bytes,
        kind: ContentKind,
        ctx: &TransformContext<'_>,
    ) -> Result<Bytes, TransformError>;
}

/// Endpoint path of the session bootstrap script.
pub const TASK_SCRIPT_PATH: &str = "/task.js";

/// Default transformer: injects the session runtime into pages and passes
/// every other content kind through unchanged.
pub struct HeadInjectionTransformer;

impl ContentTransformer for HeadInjectionTransformer {
    fn transform(
        &self,
        content: Bytes,
        kind: ContentKind,
        ctx: &TransformContext<'_>,
    ) -> Result<Bytes, TransformError> {
        if kind != ContentKind::Page {
            return Ok(content);
        }

        let html = String::from_utf8(content.to_vec()).map_err(|_| TransformError {
            kind,
            url: ctx.dest_url.to_string(),
            cause: "page body is not valid UTF-8".to_string(),
        })?;

        Ok(Bytes::from(inject_into_head(&html, &injection_markup(ctx))))
    }
}

fn injection_markup(ctx: &TransformContext<'_>) -> String {
    let mut markup = String::new();
    for style in &ctx.session.injectable.styles {
        markup.push_str(&format!(
            "<link rel=\"stylesheet\" type=\"text/css\" class=\"injected-resource\" href=\"{}\">",
            style
        ));
    }
    markup.push_str(&format!(
        "<script class=\"injected-resource\" src=\"{}\"></script>",
        TASK_SCRIPT_PATH
    ));
    for script in &ctx.session.injectable.scripts {
        markup.push_str(&format!(
            "<script class=\"injected-resource\" src=\"{}\"></script>",
            script
        ));
    }
    markup
}

/// Place markup immediately after the opening `<head>` tag, creating the
/// position as early as possible when the document has no head.
fn inject_into_head(html: &str, markup: &str) -> String {
    if let Some(idx) = find_tag_end(html, "head") {
        let mut out = String::with_capacity(html.len() + markup.len());
        out.push_str(&html[..idx]);
        out.push_str(markup);
        out.push_str(&html[idx..]);
        return out;
    }
    if let Some(idx) = find_tag_end(html, "html") {
        let mut out = String::with_capacity(html.len() + markup.len());
        out.push_str(&html[..idx]);
        out.push_str(markup);
        out.push_str(&html[idx..]);
        return out;
    }
    format!("{}{}", markup, html)
}

/// Byte offset just past the opening tag `<name ...>`, case-insensitive.
fn find_tag_end(html: &str, name: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", name);
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&open) {
        let start = search_from + rel;
        let after = start + open.len();
        // Require a real tag boundary so `<header>` does not match `<head>`.
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                let end = lower[after..].find('>')?;
                return Some(after + end + 1);
            }
            _ => search_from = after,
        }
    }
    None
}

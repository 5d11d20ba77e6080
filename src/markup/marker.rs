//! Embed markers: `<div data-material="ID">…</div>` wrappers inside documents

use super::{ordered_elements, parse, render, Rewrite, RewritePlan};

/// Attribute carrying the embedded material's id
pub const MARKER_ATTR: &str = "data-material";

/// Markup embedding `body` for material `id`
pub fn embed_marker(id: i64, body: &str) -> String {
    format!("<div {}=\"{}\">{}</div>", MARKER_ATTR, id, body)
}

fn marker_id(element: &scraper::node::Element) -> Option<i64> {
    if element.name() != "div" {
        return None;
    }
    element.attr(MARKER_ATTR)?.trim().parse().ok()
}

/// Material ids referenced by markers in `html`, de-duplicated, in document order
pub fn scan_embeds(html: &str) -> Vec<i64> {
    let fragment = parse(html);
    let mut ids = Vec::new();
    for (_, element) in ordered_elements(&fragment) {
        if let Some(id) = marker_id(element.value()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Replace the inside of every marker for `id` with `body`.
///
/// Returns `None` when the document holds no marker for that material. The
/// marker wrapper and its attributes are kept so later runs find it again.
pub fn replace_embeds(html: &str, id: i64, body: &str) -> Option<String> {
    let plan = {
        let fragment = parse(html);
        let mut plan = RewritePlan::new();
        for (ordinal, element) in ordered_elements(&fragment) {
            if marker_id(element.value()) == Some(id) {
                plan.push(ordinal, Rewrite::ReplaceInner(body.to_string()));
            }
        }
        plan
    };

    if plan.is_empty() {
        return None;
    }
    Some(render(html, &plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_embeds_dedupes_in_order() {
        let html = format!(
            "<p>x</p>{}{}{}<span data-material=\"9\">not a marker</span>",
            embed_marker(3, "a"),
            embed_marker(1, "b"),
            embed_marker(3, "c"),
        );
        assert_eq!(scan_embeds(&html), vec![3, 1]);
    }

    #[test]
    fn test_scan_embeds_ignores_bad_ids() {
        assert!(scan_embeds(r#"<div data-material="abc">x</div>"#).is_empty());
    }

    #[test]
    fn test_replace_embeds_only_touches_matching_marker() {
        let html = format!(
            "<h1>Title</h1>{}<p>mid</p>{}",
            embed_marker(1, "<p>old one</p>"),
            embed_marker(2, "<p>two</p>")
        );
        let replaced = replace_embeds(&html, 1, "<p>new one</p>").unwrap();
        assert_eq!(
            replaced,
            format!(
                "<h1>Title</h1>{}<p>mid</p>{}",
                embed_marker(1, "<p>new one</p>"),
                embed_marker(2, "<p>two</p>")
            )
        );
    }

    #[test]
    fn test_replace_embeds_without_marker() {
        assert!(replace_embeds("<p>plain</p>", 5, "x").is_none());
    }

    #[test]
    fn test_replace_embeds_preserves_wrapper_attributes() {
        let html = r#"<div class="boxed" data-material="4"><p>old</p></div>"#;
        let replaced = replace_embeds(html, 4, "<p>new</p>").unwrap();
        assert_eq!(
            replaced,
            r#"<div class="boxed" data-material="4"><p>new</p></div>"#
        );
        assert_eq!(replace_embeds(&replaced, 4, "<p>new</p>").unwrap(), replaced);
    }

    #[test]
    fn test_replace_embeds_keeps_inline_svg_untouched() {
        let svg = r##"<p><svg><use xlink:href="#icon-cart"></use></svg></p>"##;
        let html = format!("{}{}", svg, embed_marker(1, "<p>old</p>"));
        let replaced = replace_embeds(&html, 1, "<p>new</p>").unwrap();
        assert_eq!(replaced, format!("{}{}", svg, embed_marker(1, "<p>new</p>")));
    }
}

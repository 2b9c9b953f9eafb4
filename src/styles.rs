//! Style attribute cleaner.
//!
//! The MJML compiler emits `style=""` on elements whose inline styles all
//! resolved to nothing. Some email clients treat an empty style attribute as
//! a reset, so compiled output must never contain one.
//!
//! The document is streamed through [`lol_html`], which only touches the
//! attributes a handler removes: every other byte (attribute order, quoting,
//! whitespace, comments) is reproduced exactly.

use lol_html::errors::RewritingError;
use lol_html::{RewriteStrSettings, element, rewrite_str};

/// Remove every `style` attribute whose value is the empty string.
///
/// Idempotent: a cleaned document contains no empty style attribute, so a
/// second pass leaves it unchanged.
pub fn remove_empty_styles(html: &str) -> Result<String, RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("[style]", |el| {
                if el.get_attribute("style").is_some_and(|v| v.is_empty()) {
                    el.remove_attribute("style");
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_empty_style() {
        let out = remove_empty_styles(r#"<div style="">x</div>"#).unwrap();
        assert_eq!(out, "<div>x</div>");
    }

    #[test]
    fn keeps_non_empty_style() {
        let html = r#"<td style="padding:0;">x</td>"#;
        assert_eq!(remove_empty_styles(html).unwrap(), html);
    }

    #[test]
    fn other_attributes_are_byte_identical() {
        let html = r#"<table role="presentation" style="" border="0" cellpadding="0" align="center"><tr><td class="" style="">a</td></tr></table>"#;
        let out = remove_empty_styles(html).unwrap();
        assert_eq!(
            out,
            r#"<table role="presentation" border="0" cellpadding="0" align="center"><tr><td class="">a</td></tr></table>"#
        );
    }

    #[test]
    fn handles_every_occurrence() {
        let html = r#"<p style="">a</p><p style="">b</p><img src="x.png" style="" />"#;
        let out = remove_empty_styles(html).unwrap();
        assert!(!out.contains(r#"style="""#));
        assert!(out.contains(r#"src="x.png""#));
    }

    #[test]
    fn text_that_looks_like_an_attribute_is_untouched() {
        let html = r#"<p>write style="" to reset</p>"#;
        assert_eq!(remove_empty_styles(html).unwrap(), html);
    }

    #[test]
    fn conditional_comments_are_preserved() {
        let html = "<!--[if mso | IE]><table style=\"\"><tr><td><![endif]--><div style=\"\">x</div>";
        let out = remove_empty_styles(html).unwrap();
        assert!(out.starts_with("<!--[if mso | IE]><table style=\"\"><tr><td><![endif]-->"));
        assert!(out.ends_with("<div>x</div>"));
    }

    #[test]
    fn is_idempotent() {
        let html = r#"<!doctype html><html><body style=""><div style="" id="a"><span style="color:red">x</span></div></body></html>"#;
        let once = remove_empty_styles(html).unwrap();
        let twice = remove_empty_styles(&once).unwrap();
        assert_eq!(once, twice);
    }
}

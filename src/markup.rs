//! MJML source inspection ahead of compilation.
//!
//! [`validate`] checks a document against the MJML component rules: every
//! `mj-*` tag must be known, sit under a parent that accepts it, and carry
//! only the attributes its component declares. [`strip_includes`] drops
//! `mj-include` directives when includes are ignored.
//!
//! Content of ending tags (`mj-text`, `mj-button`, `mj-raw`, ...) is raw
//! HTML and is not inspected.

/// Attributes every body component accepts.
const GLOBAL_ATTRIBUTES: &[&str] = &["mj-class", "css-class"];

const PADDING: &[&str] = &[
    "padding",
    "padding-top",
    "padding-bottom",
    "padding-left",
    "padding-right",
];

const COLUMN_LIKE: &[&str] = &["mj-column", "mj-hero"];

const SECTION_ATTRIBUTES: &[&str] = &[
    "background-color",
    "background-url",
    "background-repeat",
    "background-size",
    "background-position",
    "background-position-x",
    "background-position-y",
    "border",
    "border-bottom",
    "border-left",
    "border-radius",
    "border-right",
    "border-top",
    "direction",
    "full-width",
    "text-align",
    "gap",
];

struct Component {
    tag: &'static str,
    /// Tags this component may appear under. Empty for the root.
    parents: &'static [&'static str],
    attributes: &'static [&'static str],
    padded: bool,
    /// Content is raw HTML up to the closing tag.
    ending: bool,
}

const fn component(
    tag: &'static str,
    parents: &'static [&'static str],
    attributes: &'static [&'static str],
) -> Component {
    Component {
        tag,
        parents,
        attributes,
        padded: false,
        ending: false,
    }
}

const fn padded(mut c: Component) -> Component {
    c.padded = true;
    c
}

const fn ending(mut c: Component) -> Component {
    c.ending = true;
    c
}

const COMPONENTS: &[Component] = &[
    component("mjml", &[], &["owa", "lang", "dir"]),
    component("mj-head", &["mjml"], &[]),
    component("mj-body", &["mjml"], &["width", "background-color"]),
    // Head
    component("mj-attributes", &["mj-head"], &[]),
    component("mj-breakpoint", &["mj-head"], &["width"]),
    component("mj-font", &["mj-head"], &["name", "href"]),
    component("mj-html-attributes", &["mj-head"], &[]),
    component("mj-selector", &["mj-html-attributes"], &["path"]),
    ending(component("mj-html-attribute", &["mj-selector"], &["name"])),
    ending(component("mj-preview", &["mj-head"], &[])),
    ending(component("mj-title", &["mj-head"], &[])),
    ending(component("mj-style", &["mj-head"], &["inline"])),
    ending(component(
        "mj-raw",
        &[
            "mjml",
            "mj-head",
            "mj-body",
            "mj-wrapper",
            "mj-section",
            "mj-group",
            "mj-column",
            "mj-hero",
            "mj-accordion",
            "mj-accordion-element",
            "mj-navbar",
            "mj-social",
        ],
        &["position"],
    )),
    // Layout
    padded(component("mj-wrapper", &["mj-body"], SECTION_ATTRIBUTES)),
    padded(component("mj-section", &["mj-body", "mj-wrapper"], SECTION_ATTRIBUTES)),
    component(
        "mj-group",
        &["mj-section"],
        &["background-color", "direction", "vertical-align", "width"],
    ),
    padded(component(
        "mj-column",
        &["mj-section", "mj-group"],
        &[
            "background-color",
            "border",
            "border-bottom",
            "border-left",
            "border-radius",
            "border-right",
            "border-top",
            "direction",
            "inner-background-color",
            "inner-border",
            "inner-border-bottom",
            "inner-border-left",
            "inner-border-radius",
            "inner-border-right",
            "inner-border-top",
            "padding",
            "vertical-align",
            "width",
        ],
    )),
    padded(component(
        "mj-hero",
        &["mj-body", "mj-wrapper"],
        &[
            "background-color",
            "background-height",
            "background-position",
            "background-url",
            "background-width",
            "border-radius",
            "container-background-color",
            "height",
            "inner-background-color",
            "inner-padding",
            "inner-padding-top",
            "inner-padding-bottom",
            "inner-padding-left",
            "inner-padding-right",
            "mode",
            "vertical-align",
            "width",
        ],
    )),
    // Content
    padded(ending(component(
        "mj-text",
        COLUMN_LIKE,
        &[
            "align",
            "background-color",
            "color",
            "container-background-color",
            "font-family",
            "font-size",
            "font-style",
            "font-weight",
            "height",
            "letter-spacing",
            "line-height",
            "text-decoration",
            "text-transform",
            "vertical-align",
        ],
    ))),
    padded(ending(component(
        "mj-button",
        COLUMN_LIKE,
        &[
            "align",
            "background-color",
            "border",
            "border-bottom",
            "border-left",
            "border-radius",
            "border-right",
            "border-top",
            "color",
            "container-background-color",
            "font-family",
            "font-size",
            "font-style",
            "font-weight",
            "height",
            "href",
            "inner-padding",
            "letter-spacing",
            "line-height",
            "name",
            "rel",
            "target",
            "text-align",
            "text-decoration",
            "text-transform",
            "title",
            "vertical-align",
            "width",
        ],
    ))),
    padded(component(
        "mj-image",
        COLUMN_LIKE,
        &[
            "align",
            "alt",
            "border",
            "border-bottom",
            "border-left",
            "border-radius",
            "border-right",
            "border-top",
            "container-background-color",
            "fluid-on-mobile",
            "font-size",
            "height",
            "href",
            "max-height",
            "name",
            "rel",
            "sizes",
            "src",
            "srcset",
            "target",
            "title",
            "usemap",
            "width",
        ],
    )),
    padded(component(
        "mj-divider",
        COLUMN_LIKE,
        &[
            "align",
            "border-color",
            "border-style",
            "border-width",
            "container-background-color",
            "width",
        ],
    )),
    padded(component(
        "mj-spacer",
        COLUMN_LIKE,
        &[
            "border",
            "border-bottom",
            "border-left",
            "border-right",
            "border-top",
            "container-background-color",
            "height",
        ],
    )),
    padded(ending(component(
        "mj-table",
        COLUMN_LIKE,
        &[
            "align",
            "border",
            "cellpadding",
            "cellspacing",
            "color",
            "container-background-color",
            "font-family",
            "font-size",
            "font-weight",
            "line-height",
            "role",
            "table-layout",
            "vertical-align",
            "width",
        ],
    ))),
    padded(component(
        "mj-social",
        COLUMN_LIKE,
        &[
            "align",
            "border-radius",
            "color",
            "container-background-color",
            "font-family",
            "font-size",
            "font-style",
            "font-weight",
            "icon-height",
            "icon-padding",
            "icon-size",
            "inner-padding",
            "line-height",
            "mode",
            "table-layout",
            "text-decoration",
            "text-padding",
        ],
    )),
    padded(ending(component(
        "mj-social-element",
        &["mj-social"],
        &[
            "align",
            "alt",
            "background-color",
            "border-radius",
            "color",
            "font-family",
            "font-size",
            "font-style",
            "font-weight",
            "href",
            "icon-height",
            "icon-padding",
            "icon-size",
            "line-height",
            "name",
            "rel",
            "sizes",
            "src",
            "srcset",
            "target",
            "text-decoration",
            "text-padding",
            "title",
            "vertical-align",
        ],
    ))),
    padded(component(
        "mj-navbar",
        COLUMN_LIKE,
        &[
            "align",
            "base-url",
            "hamburger",
            "ico-align",
            "ico-close",
            "ico-color",
            "ico-font-family",
            "ico-font-size",
            "ico-line-height",
            "ico-open",
            "ico-padding",
            "ico-padding-top",
            "ico-padding-bottom",
            "ico-padding-left",
            "ico-padding-right",
            "ico-text-decoration",
            "ico-text-transform",
        ],
    )),
    padded(ending(component(
        "mj-navbar-link",
        &["mj-navbar"],
        &[
            "color",
            "font-family",
            "font-size",
            "font-style",
            "font-weight",
            "href",
            "letter-spacing",
            "line-height",
            "name",
            "rel",
            "target",
            "text-decoration",
            "text-transform",
        ],
    ))),
    padded(component(
        "mj-accordion",
        COLUMN_LIKE,
        &[
            "border",
            "container-background-color",
            "font-family",
            "icon-align",
            "icon-height",
            "icon-position",
            "icon-unwrapped-alt",
            "icon-unwrapped-url",
            "icon-width",
            "icon-wrapped-alt",
            "icon-wrapped-url",
        ],
    )),
    component(
        "mj-accordion-element",
        &["mj-accordion"],
        &[
            "background-color",
            "border",
            "font-family",
            "icon-align",
            "icon-height",
            "icon-position",
            "icon-unwrapped-alt",
            "icon-unwrapped-url",
            "icon-width",
            "icon-wrapped-alt",
            "icon-wrapped-url",
        ],
    ),
    padded(ending(component(
        "mj-accordion-title",
        &["mj-accordion-element"],
        &["background-color", "color", "font-family", "font-size"],
    ))),
    padded(ending(component(
        "mj-accordion-text",
        &["mj-accordion-element"],
        &[
            "background-color",
            "color",
            "font-family",
            "font-size",
            "font-weight",
            "letter-spacing",
            "line-height",
        ],
    ))),
    padded(component(
        "mj-carousel",
        COLUMN_LIKE,
        &[
            "align",
            "border-radius",
            "container-background-color",
            "icon-width",
            "left-icon",
            "right-icon",
            "tb-border",
            "tb-border-radius",
            "tb-hover-border-color",
            "tb-selected-border-color",
            "tb-width",
            "thumbnails",
        ],
    )),
    component(
        "mj-carousel-image",
        &["mj-carousel"],
        &[
            "alt",
            "border-radius",
            "href",
            "rel",
            "src",
            "target",
            "tb-border",
            "tb-border-radius",
            "thumbnails-src",
            "title",
        ],
    ),
];

/// Allowed anywhere; resolved or stripped before compilation.
const INCLUDE: &str = "mj-include";
const INCLUDE_ATTRIBUTES: &[&str] = &["path", "type", "css-inline"];

/// Children are attribute defaults, not rendered components.
const ATTRIBUTES_BLOCK: &str = "mj-attributes";

fn lookup(tag: &str) -> Option<&'static Component> {
    COMPONENTS.iter().find(|c| c.tag == tag)
}

fn is_raw(tag: &str) -> bool {
    tag == INCLUDE || lookup(tag).is_some_and(|c| c.ending)
}

/// One tag found while scanning.
#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open {
        name: &'a str,
        attributes: Vec<&'a str>,
        /// Byte range, through the closing tag for raw components.
        start: usize,
        end: usize,
        self_closing: bool,
    },
    Close {
        name: &'a str,
    },
}

/// Index of the `>` closing the tag that starts at `tag[0] == '<'`,
/// skipping quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

/// Attribute names inside the body of a start tag (after the tag name).
fn attribute_names(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut names = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !is_name_byte(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && is_name_byte(bytes[i]) {
            i += 1;
        }
        names.push(&body[start..i]);
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&q @ (b'"' | b'\'')) => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != q {
                        i += 1;
                    }
                    i += 1;
                }
                _ => {
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                }
            }
        }
    }
    names
}

/// Tags of an MJML document in source order. Comments, declarations and
/// the content of raw components are skipped.
fn scan(src: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(rel) = src[pos..].find('<') {
        let start = pos + rel;
        let rest = &src[start..];

        if rest.starts_with("<!--") {
            pos = start + rest.find("-->").map_or(rest.len(), |e| e + 3);
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = start + rest.find('>').map_or(rest.len(), |e| e + 1);
            continue;
        }
        let Some(end) = tag_end(rest) else {
            break;
        };
        let inner = &rest[1..end];

        if let Some(closing) = inner.strip_prefix('/') {
            tokens.push(Token::Close {
                name: closing.trim(),
            });
            pos = start + end + 1;
            continue;
        }

        let name_len = inner.bytes().take_while(|&b| is_name_byte(b)).count();
        if name_len == 0 {
            pos = start + 1;
            continue;
        }
        let name = &inner[..name_len];
        let self_closing = inner.trim_end().ends_with('/');
        let mut tag_close = start + end + 1;

        if is_raw(name) && !self_closing {
            let closing = format!("</{name}");
            tag_close = match src[tag_close..].find(&closing) {
                Some(at) => {
                    let after = tag_close + at;
                    after + src[after..].find('>').map_or(src.len() - after, |e| e + 1)
                }
                None => src.len(),
            };
        }

        tokens.push(Token::Open {
            name,
            attributes: attribute_names(inner[name_len..].trim_end_matches('/')),
            start,
            end: tag_close,
            self_closing,
        });
        pos = tag_close;
    }
    tokens
}

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

/// Check `markup` against the MJML component rules. Returns one finding per
/// violation, each prefixed with its line number.
pub fn validate(markup: &str) -> Vec<String> {
    let mut findings = Vec::new();
    let mut stack: Vec<&str> = Vec::new();

    for token in scan(markup) {
        match token {
            Token::Open {
                name,
                attributes,
                start,
                self_closing,
                ..
            } => {
                let line = line_of(markup, start);
                let parent = stack.last().copied();
                let in_defaults = stack.contains(&ATTRIBUTES_BLOCK);

                if name == INCLUDE {
                    for attr in attributes {
                        if !INCLUDE_ATTRIBUTES.contains(&attr) {
                            findings.push(format!(
                                "line {line}: attribute `{attr}` is not allowed on <{name}>"
                            ));
                        }
                    }
                } else if in_defaults {
                    if name != "mj-all" && name != "mj-class" && lookup(name).is_none() {
                        findings.push(format!("line {line}: unknown element <{name}>"));
                    }
                } else {
                    match lookup(name) {
                        None => findings.push(format!("line {line}: unknown element <{name}>")),
                        Some(component) => {
                            check_parent(component, parent, line, &mut findings);
                            check_attributes(component, &attributes, line, &mut findings);
                        }
                    }
                }

                if !self_closing && !is_raw(name) {
                    stack.push(name);
                }
            }
            Token::Close { name } => {
                // Mismatched closing tags are the parser's to report.
                if let Some(at) = stack.iter().rposition(|open| *open == name) {
                    stack.truncate(at);
                }
            }
        }
    }
    findings
}

fn check_parent(
    component: &Component,
    parent: Option<&str>,
    line: usize,
    findings: &mut Vec<String>,
) {
    let tag = component.tag;
    match parent {
        None if component.parents.is_empty() => {}
        None => findings.push(format!("line {line}: <{tag}> cannot be the root element")),
        Some(parent) if component.parents.contains(&parent) => {}
        Some(parent) => findings.push(format!(
            "line {line}: <{tag}> cannot be a child of <{parent}>"
        )),
    }
}

fn check_attributes(
    component: &Component,
    attributes: &[&str],
    line: usize,
    findings: &mut Vec<String>,
) {
    for attr in attributes {
        let allowed = component.attributes.contains(attr)
            || (component.padded && PADDING.contains(attr))
            || (component.tag != "mjml" && GLOBAL_ATTRIBUTES.contains(attr));
        if !allowed {
            findings.push(format!(
                "line {line}: attribute `{attr}` is not allowed on <{}>",
                component.tag
            ));
        }
    }
}

/// Remove every `mj-include` directive, keeping the rest of the document.
pub fn strip_includes(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut copied = 0;
    for token in scan(markup) {
        if let Token::Open {
            name: INCLUDE,
            start,
            end,
            ..
        } = token
        {
            out.push_str(&markup[copied..start]);
            copied = end;
        }
    }
    out.push_str(&markup[copied..]);
    out
}

use roxmltree::{Document, Node, NodeType};

use crate::error::RenderError;
use crate::tags::TagSet;

/// Highlight classes emitted by the tool, translated to the host's code
/// block style names. Unmapped classes pass through unchanged.
const CLASS_MAP: &[(&str, &str)] = &[
    ("comment", "co1"),
    ("keywordtype", "kw0"),
    ("keywordflow", "kw1"),
    ("preprocessor", "co2"),
    ("stringliteral", "st0"),
];

fn map_class(class: &str) -> &str {
    CLASS_MAP
        .iter()
        .find(|(from, _)| *from == class)
        .map(|(_, to)| *to)
        .unwrap_or(class)
}

/// Convert the tool's raw XML output into display markup.
///
/// The output is deterministic: identical XML and tag configuration
/// always produce byte-identical markup, so the rendered artifact can be
/// cached by content address.
pub fn render(xml: &str, line_numbers: bool, tags: &TagSet) -> Result<String, RenderError> {
    let doc = Document::parse(xml)?;

    let listing = doc
        .descendants()
        .find(|node| node.has_tag_name("programlisting"))
        .ok_or(RenderError::MissingListing)?;

    let mut out = String::new();

    if line_numbers {
        out.push_str("<ol>");
    }

    for line in listing
        .children()
        .filter(|node| node.is_element() && node.has_tag_name("codeline"))
    {
        if line.children().next().is_none() {
            continue;
        }

        if line_numbers {
            out.push_str("<li class=\"li1\"><div>");
        }

        render_children(line, &mut out, tags);

        if line_numbers {
            out.push_str("</div></li>");
        } else {
            out.push('\n');
        }
    }

    if line_numbers {
        out.push_str("</ol>");
    }

    Ok(out)
}

/// Walk the children of a code line recursively.
///
/// `highlight` becomes a styled span, `sp` a literal space, `ref` a
/// hyperlink into external documentation, and plain text is escaped and
/// appended as-is.
fn render_children(element: Node, out: &mut String, tags: &TagSet) {
    for node in element.children() {
        match node.node_type() {
            NodeType::Element => match node.tag_name().name() {
                "highlight" => {
                    out.push_str("<span");
                    if let Some(class) = node.attribute("class") {
                        out.push_str(" class=\"");
                        out.push_str(map_class(class));
                        out.push('"');
                    }
                    out.push('>');
                    render_children(node, out, tags);
                    out.push_str("</span>");
                }
                "sp" => out.push(' '),
                "ref" => {
                    out.push_str("<a");
                    if let (Some(external), Some(refid)) =
                        (node.attribute("external"), node.attribute("refid"))
                    {
                        out.push_str(" href=\"");
                        out.push_str(&escape(&resolve_ref(
                            external,
                            refid,
                            node.attribute("kindref"),
                            tags,
                        )));
                        out.push('"');
                    }
                    out.push('>');
                    out.push_str(&escape(&text_content(node)));
                    out.push_str("</a>");
                }
                _ => {}
            },
            NodeType::Text => {
                if let Some(text) = node.text() {
                    out.push_str(&escape(text));
                }
            }
            _ => {}
        }
    }
}

/// Resolve a reference node to a documentation URL.
///
/// The `external` attribute names the tag file defining the symbol; the
/// matching entry's documentation base URL becomes the prefix. Member
/// references carry `<page>_<anchor>` ids where the tool inserts one
/// disambiguation character after the underscore that is not part of the
/// anchor. Everything else (compounds, direct pages) is the page name
/// itself.
fn resolve_ref(external: &str, refid: &str, kindref: Option<&str>, tags: &TagSet) -> String {
    let mut out = String::new();

    if let Some(base) = tags.base_url_for(external) {
        out.push_str(base);
    }

    if kindref == Some("member") {
        if let Some(pos) = refid.rfind('_') {
            out.push_str(&refid[..pos]);
            out.push_str(".html#");
            out.push_str(refid.get(pos + 2..).unwrap_or(""));
        } else {
            out.push_str(refid);
            out.push_str(".html");
        }
    } else {
        out.push_str(refid);
        if !refid.ends_with(".html") {
            out.push_str(".html");
        }
    }

    out
}

fn text_content(node: Node) -> String {
    node.descendants()
        .filter(|node| node.is_text())
        .filter_map(|node| node.text())
        .collect()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

//! Serialization of element trees back to XML text.
//!
//! Output is deterministic: attributes in stored order, double quotes,
//! self-closing empty elements written as `<name ... />`, and one child
//! element per line.

use crate::types::{XmlChild, XmlChildren, XmlElement};
use quick_xml::escape::{escape, partial_escape};
use std::fmt::Write as _;

const DEFAULT_INDENT: &str = "    ";

impl XmlElement {
    /// Write this element with four-space indentation, starting at column 0.
    pub fn to_xml_string(&self) -> String {
        self.to_xml_string_indented(DEFAULT_INDENT, 0)
    }

    /// Write this element as if it sat at nesting `depth`.
    ///
    /// The first line carries no leading indentation (the caller places it);
    /// every following line is indented by `indent` repeated per level.
    pub fn to_xml_string_indented(&self, indent: &str, depth: usize) -> String {
        let mut out = String::new();
        write_element(&mut out, self, indent, depth);
        out
    }
}

fn write_element(out: &mut String, el: &XmlElement, indent: &str, depth: usize) {
    let name = el.qualified_name();
    out.push('<');
    out.push_str(&name);
    for attr in &el.attributes {
        out.push(' ');
        if let Some(prefix) = &attr.prefix {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape(attr.value.as_str()));
        out.push('"');
    }

    match &el.children {
        XmlChildren::Empty => out.push_str(" />"),
        XmlChildren::Text { content, .. } => {
            out.push('>');
            out.push_str(&partial_escape(content.as_str()));
            let _ = write!(out, "</{}>", name);
        }
        XmlChildren::Elements(children) => {
            out.push('>');
            for child in children {
                newline(out, indent, depth + 1);
                write_element(out, child, indent, depth + 1);
            }
            newline(out, indent, depth);
            let _ = write!(out, "</{}>", name);
        }
        XmlChildren::Mixed(children) => {
            out.push('>');
            for child in children {
                match child {
                    XmlChild::Element(e) => write_element(out, e, indent, depth + 1),
                    XmlChild::Text { content, .. } => {
                        out.push_str(&partial_escape(content.as_str()))
                    }
                }
            }
            let _ = write!(out, "</{}>", name);
        }
    }
}

fn newline(out: &mut String, indent: &str, depth: usize) {
    out.push('\n');
    for _ in 0..depth {
        out.push_str(indent);
    }
}

#[cfg(test)]
mod tests {
    use crate::{XmlElement, parse};

    #[test]
    fn test_write_nested() {
        let el = XmlElement::build("appSettings")
            .with_child(
                XmlElement::build("add")
                    .with_attribute("key", "a")
                    .with_attribute("value", "1"),
            )
            .with_child(XmlElement::build("clear"));

        insta::assert_snapshot!(el.to_xml_string(), @r#"
        <appSettings>
            <add key="a" value="1" />
            <clear />
        </appSettings>
        "#);
    }

    #[test]
    fn test_write_indented_at_depth() {
        let el = XmlElement::build("section").with_child(XmlElement::build("child"));
        assert_eq!(
            el.to_xml_string_indented("  ", 2),
            "<section>\n      <child />\n    </section>"
        );
    }

    #[test]
    fn test_write_escapes() {
        let el = XmlElement::build("note")
            .with_attribute("title", "\"quoted\" <x>")
            .with_text("a < b & c");
        assert_eq!(
            el.to_xml_string(),
            "<note title=\"&quot;quoted&quot; &lt;x&gt;\">a &lt; b &amp; c</note>"
        );
    }

    #[test]
    fn test_parse_then_write_keeps_structure() {
        let doc = parse(r#"<a x="1"><b>text</b><c y="2"/></a>"#).unwrap();
        insta::assert_snapshot!(doc.root.to_xml_string(), @r#"
        <a x="1">
            <b>text</b>
            <c y="2" />
        </a>
        "#);
    }
}

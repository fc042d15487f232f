//! XML parser that builds [`XmlDocument`] trees.

use crate::source::{LineIndex, Provenance};
use crate::{Error, Result, XmlAttribute, XmlChild, XmlChildren, XmlDocument, XmlElement, XmlErrorKind};
use quick_xml::Reader;
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use std::ops::Range;
use std::sync::Arc;

/// Parse XML from a string with no file name.
///
/// # Example
///
/// ```rust
/// use strata_xml::parse;
///
/// let doc = parse("<root><child/></root>").unwrap();
/// assert_eq!(doc.root.name, "root");
/// ```
pub fn parse(content: &str) -> Result<XmlDocument> {
    parse_file(content, "")
}

/// Parse XML from a string, tagging every node with `file_name`.
///
/// # Errors
///
/// Returns an error if the XML is malformed, has no root element, has more
/// than one root element, or carries text after the root element.
pub fn parse_file(content: &str, file_name: &str) -> Result<XmlDocument> {
    let mut parser = XmlParser::new(content, Arc::from(file_name));
    parser.parse()
}

/// Event loop state; `stack` holds the open elements.
struct XmlParser<'a> {
    source: &'a str,
    reader: Reader<&'a [u8]>,
    file: Arc<str>,
    index: LineIndex,

    stack: Vec<BuildNode>,
    seen_root: bool,
}

/// An open element whose closing tag has not been read yet.
struct BuildNode {
    name: String,
    prefix: Option<String>,
    attributes: Vec<XmlAttribute>,

    /// Byte offset of the `<` of the start tag.
    start_offset: usize,

    /// Byte offset just past the `>` of the start tag.
    start_tag_end: usize,

    children: Vec<XmlChild>,
}

impl<'a> XmlParser<'a> {
    fn new(source: &'a str, file: Arc<str>) -> Self {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;

        Self {
            source,
            reader,
            file,
            index: LineIndex::new(source),
            stack: Vec::new(),
            seen_root: false,
        }
    }

    fn parse(&mut self) -> Result<XmlDocument> {
        let mut root: Option<XmlElement> = None;

        loop {
            // Offset of the event's first byte
            let event_start = self.reader.buffer_position() as usize;

            match self.reader.read_event() {
                Ok(Event::Start(e)) => {
                    if self.stack.is_empty() && root.is_some() {
                        return Err(Error::new(
                            XmlErrorKind::SecondRoot,
                            Some(self.provenance(event_start..event_start)),
                        ));
                    }
                    self.handle_start(e, event_start)?;
                }
                Ok(Event::End(e)) => {
                    let element = self.handle_end(e, event_start)?;
                    self.attach(element, &mut root)?;
                }
                Ok(Event::Empty(e)) => {
                    let element = self.handle_empty(e, event_start)?;
                    self.attach(element, &mut root)?;
                }
                Ok(Event::Text(e)) => {
                    self.handle_text(e, event_start)?;
                }
                Ok(Event::CData(e)) => {
                    self.handle_cdata(e, event_start)?;
                }
                Ok(Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => {
                    let offset = self.reader.error_position() as usize;
                    return Err(Error::from(e).at(self.provenance(offset..offset)));
                }
            }
        }

        if let Some(node) = self.stack.last() {
            return Err(Error::new(
                XmlErrorKind::Unclosed {
                    element: node.name.clone(),
                },
                Some(self.provenance(node.start_offset..node.start_tag_end)),
            ));
        }

        let root = root.ok_or(Error::new(XmlErrorKind::NoRoot, None))?;

        Ok(XmlDocument::new(
            root,
            self.file.clone(),
            Arc::from(self.source),
            self.index.clone(),
        ))
    }

    /// Hand a finished element to its parent, or make it the root.
    fn attach(&mut self, element: XmlElement, root: &mut Option<XmlElement>) -> Result<()> {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(XmlChild::Element(element)),
            None => {
                if root.is_some() {
                    return Err(Error::new(XmlErrorKind::SecondRoot, Some(element.provenance.clone())));
                }
                self.seen_root = true;
                *root = Some(element);
            }
        }
        Ok(())
    }

    fn handle_start(&mut self, e: BytesStart<'_>, event_start: usize) -> Result<()> {
        let (name, prefix) = split_name(e.name().as_ref());
        let attributes = self.parse_attributes(&e, event_start)?;

        self.stack.push(BuildNode {
            name,
            prefix,
            attributes,
            start_offset: event_start,
            start_tag_end: self.reader.buffer_position() as usize,
            children: Vec::new(),
        });

        Ok(())
    }

    fn handle_end(&mut self, e: BytesEnd<'_>, event_start: usize) -> Result<XmlElement> {
        let end_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
        let end_local_name = end_name.split(':').next_back().unwrap_or(&end_name);

        let node = self.stack.pop().ok_or_else(|| {
            Error::new(
                XmlErrorKind::StrayClose { name: end_name.clone() },
                Some(self.provenance(event_start..event_start)),
            )
        })?;

        if node.name != end_local_name {
            return Err(Error::new(
                XmlErrorKind::MismatchedClose {
                    open: node.name.clone(),
                    close: end_local_name.to_string(),
                },
                Some(self.provenance(node.start_offset..node.start_tag_end)),
            ));
        }

        let end_offset = self.reader.buffer_position() as usize;

        Ok(XmlElement {
            name: node.name,
            prefix: node.prefix,
            attributes: node.attributes,
            children: finalize_children(node.children),
            provenance: self.provenance(node.start_offset..end_offset),
            start_tag: node.start_offset..node.start_tag_end,
            content_span: Some(node.start_tag_end..event_start),
        })
    }

    fn handle_empty(&mut self, e: BytesStart<'_>, event_start: usize) -> Result<XmlElement> {
        let (name, prefix) = split_name(e.name().as_ref());
        let attributes = self.parse_attributes(&e, event_start)?;
        let end_offset = self.reader.buffer_position() as usize;

        Ok(XmlElement {
            name,
            prefix,
            attributes,
            children: XmlChildren::Empty,
            provenance: self.provenance(event_start..end_offset),
            start_tag: event_start..end_offset,
            content_span: None,
        })
    }

    fn handle_text(&mut self, e: BytesText<'_>, event_start: usize) -> Result<()> {
        let end_offset = self.reader.buffer_position() as usize;
        let text = e.unescape().map_err(|err| {
            Error::syntax(format!("bad text content: {}", err)).at(self.provenance(event_start..end_offset))
        })?;

        if text.trim().is_empty() {
            return Ok(());
        }

        // The reported span starts at the first non-whitespace byte
        let leading = self
            .source
            .get(event_start..end_offset)
            .map_or(0, |raw| raw.len() - raw.trim_start().len());
        let provenance = self.provenance(event_start + leading..end_offset);

        match self.stack.last_mut() {
            Some(node) => {
                node.children.push(XmlChild::Text {
                    content: text.into_owned(),
                    provenance,
                });
                Ok(())
            }
            None if self.seen_root => Err(Error::new(XmlErrorKind::TrailingContent, Some(provenance))),
            None => Err(Error::new(XmlErrorKind::TextBeforeRoot, Some(provenance))),
        }
    }

    fn handle_cdata(&mut self, e: BytesCData<'_>, event_start: usize) -> Result<()> {
        let text = String::from_utf8_lossy(e.as_ref()).to_string();
        let end_offset = self.reader.buffer_position() as usize;
        let provenance = self.provenance(event_start..end_offset);

        match self.stack.last_mut() {
            Some(node) => {
                node.children.push(XmlChild::Text {
                    content: text,
                    provenance,
                });
                Ok(())
            }
            None => Err(Error::new(XmlErrorKind::TrailingContent, Some(provenance))),
        }
    }

    fn parse_attributes(&self, e: &BytesStart<'_>, tag_start: usize) -> Result<Vec<XmlAttribute>> {
        let mut attributes = Vec::new();

        // The tag content starts after '<'
        let content_start = tag_start + 1;
        let tag_str = String::from_utf8_lossy(e.as_ref());

        // Each attribute is searched for after the previous one's value
        let mut cursor = e.name().as_ref().len();

        for attr_result in e.attributes() {
            let attr = attr_result?;

            let full_name = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let (name, prefix) = split_name(attr.key.as_ref());

            let value = attr.unescape_value().map_err(|err| {
                Error::syntax(format!("bad attribute value: {}", err)).at(self.provenance(tag_start..tag_start))
            })?;

            let span = find_attribute_span(&tag_str, cursor, &full_name)
                .unwrap_or(cursor..cursor + full_name.len());
            cursor = span.end.min(tag_str.len());

            attributes.push(XmlAttribute {
                name,
                prefix,
                value: value.into_owned(),
                provenance: self.provenance(content_start + span.start..content_start + span.end),
            });
        }

        Ok(attributes)
    }

    fn provenance(&self, span: Range<usize>) -> Provenance {
        Provenance::new(self.file.clone(), &self.index, self.source, span)
    }
}

/// Split `prefix:local` into the local name and optional prefix.
fn split_name(raw: &[u8]) -> (String, Option<String>) {
    let full_name = String::from_utf8_lossy(raw);
    match full_name.split_once(':') {
        Some((prefix, local)) => (local.to_string(), Some(prefix.to_string())),
        None => (full_name.to_string(), None),
    }
}

/// Locate `name="value"` in the tag text at or after `from`.
///
/// Returns the span from the first byte of the name through the closing quote,
/// relative to the start of the tag text.
fn find_attribute_span(tag_str: &str, from: usize, name: &str) -> Option<Range<usize>> {
    let mut search = from;
    loop {
        let rel = tag_str.get(search..)?.find(name)?;
        let start = search + rel;
        let preceded_by_space = tag_str[..start]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let after = &tag_str[start + name.len()..];
        let trimmed = after.trim_start();
        if preceded_by_space && trimmed.starts_with('=') {
            let value_part = trimmed[1..].trim_start();
            let value_offset = tag_str.len() - value_part.len();
            let quote = value_part.chars().next()?;
            let end = if quote == '"' || quote == '\'' {
                value_part[1..]
                    .find(quote)
                    .map_or(tag_str.len(), |p| value_offset + 1 + p + 1)
            } else {
                value_part
                    .find(|c: char| c.is_whitespace() || c == '/')
                    .map_or(tag_str.len(), |p| value_offset + p)
            };
            return Some(start..end);
        }
        search = start + name.len();
    }
}

fn finalize_children(children: Vec<XmlChild>) -> XmlChildren {
    if children.is_empty() {
        return XmlChildren::Empty;
    }

    let all_elements = children.iter().all(|c| matches!(c, XmlChild::Element(_)));

    if all_elements {
        let elements = children
            .into_iter()
            .filter_map(|c| match c {
                XmlChild::Element(e) => Some(e),
                XmlChild::Text { .. } => None,
            })
            .collect();
        return XmlChildren::Elements(elements);
    }

    if children.len() == 1 {
        if let Some(XmlChild::Text {
            content,
            provenance,
        }) = children.into_iter().next()
        {
            return XmlChildren::Text {
                content,
                provenance,
            };
        }
        return XmlChildren::Empty;
    }

    XmlChildren::Mixed(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_element() {
        let doc = parse("<root/>").unwrap();
        assert_eq!(doc.root.name, "root");
        assert!(doc.root.is_empty());
        assert_eq!(doc.root.content_span, None);
    }

    #[test]
    fn test_parse_nested_elements_drops_indentation() {
        let doc = parse("<root>\n  <child/>\n  <child/>\n</root>").unwrap();
        assert!(matches!(doc.root.children, XmlChildren::Elements(ref e) if e.len() == 2));
    }

    #[test]
    fn test_parse_text_content() {
        let doc = parse("<root>Hello, world!</root>").unwrap();
        assert!(doc.root.has_text());
        assert_eq!(doc.root.text(), Some("Hello, world!"));
    }

    #[test]
    fn test_parse_namespace_prefix() {
        let doc = parse(r#"<enc:EncryptedData xmlns:enc="urn:x"/>"#).unwrap();
        assert_eq!(doc.root.name, "EncryptedData");
        assert_eq!(doc.root.prefix.as_deref(), Some("enc"));
        assert_eq!(doc.root.attributes[0].prefix.as_deref(), Some("xmlns"));
        assert_eq!(doc.root.attributes[0].name, "enc");
    }

    #[test]
    fn test_line_numbers() {
        let text = "<?xml version=\"1.0\"?>\n<configuration>\n  <appSettings>\n    <add key=\"a\"\n         value=\"1\" />\n  </appSettings>\n</configuration>\n";
        let doc = parse_file(text, "app.config").unwrap();
        assert_eq!(doc.root.provenance.line, 2);

        let settings = doc.root.get_child("appSettings").unwrap();
        assert_eq!(settings.provenance.line, 3);
        assert_eq!(settings.provenance.column, 3);
        assert_eq!(&*settings.provenance.file, "app.config");

        let add = settings.get_child("add").unwrap();
        assert_eq!(add.provenance.line, 4);
        assert_eq!(add.get_attribute_full("value").unwrap().provenance.line, 5);
    }

    #[test]
    fn test_raw_returns_exact_source() {
        let text = "<configuration><appSettings  file='x.config' ><add key=\"k\"/></appSettings></configuration>";
        let doc = parse(text).unwrap();
        let settings = doc.root.get_child("appSettings").unwrap();
        assert_eq!(
            doc.raw(settings),
            "<appSettings  file='x.config' ><add key=\"k\"/></appSettings>"
        );
        assert_eq!(
            doc.slice(settings.start_tag.clone()),
            "<appSettings  file='x.config' >"
        );
        assert_eq!(
            doc.slice(settings.content_span.clone().unwrap()),
            "<add key=\"k\"/>"
        );
    }

    #[test]
    fn test_attribute_span_skips_name_prefix_matches() {
        let text = r#"<add keyName="x" key="y"/>"#;
        let doc = parse(text).unwrap();
        let key = doc.root.get_attribute_full("key").unwrap();
        assert_eq!(doc.slice(key.provenance.span.clone()), r#"key="y""#);
        let key_name = doc.root.get_attribute_full("keyName").unwrap();
        assert_eq!(doc.slice(key_name.provenance.span.clone()), r#"keyName="x""#);
    }

    #[test]
    fn test_entities_are_unescaped() {
        let doc = parse(r#"<add value="a &amp; b &lt;c&gt;"/>"#).unwrap();
        assert_eq!(doc.root.get_attribute("value"), Some("a & b <c>"));
    }

    #[test]
    fn test_empty_document_error() {
        assert_eq!(parse("").unwrap_err().kind, XmlErrorKind::NoRoot);
        assert_eq!(parse("<!-- only -->").unwrap_err().kind, XmlErrorKind::NoRoot);
    }

    #[test]
    fn test_multiple_roots_error() {
        let err = parse("<a/>\n<b/>").unwrap_err();
        assert_eq!(err.kind, XmlErrorKind::SecondRoot);
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn test_trailing_text_error() {
        let err = parse("<a/>\n\ntrailing").unwrap_err();
        assert_eq!(err.kind, XmlErrorKind::TrailingContent);
        assert_eq!(err.line(), 3);
    }

    #[test]
    fn test_trailing_comment_is_allowed() {
        let doc = parse("<a/>\n<!-- done -->\n").unwrap();
        assert_eq!(doc.root.name, "a");
    }

    #[test]
    fn test_mismatched_tags_error() {
        let err = parse("<root></wrong>").unwrap_err();
        // quick-xml checks end names itself
        assert!(
            matches!(err.kind, XmlErrorKind::MismatchedClose { .. } | XmlErrorKind::Syntax(_)),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_unclosed_element_error() {
        let err = parse("<root>\n  <child>").unwrap_err();
        assert_eq!(
            err.kind,
            XmlErrorKind::Unclosed {
                element: "child".to_string()
            }
        );
        assert_eq!(err.to_string(), "the file ends before </child> was found");
        assert_eq!(err.line(), 2);
    }
}

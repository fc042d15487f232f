//! Core types for source-tracked XML trees.

use crate::source::{LineIndex, Provenance};
use std::ops::Range;
use std::sync::Arc;

/// A parsed XML document together with the text it was parsed from.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub root: XmlElement,

    /// File name used in every provenance of this document.
    pub file: Arc<str>,

    /// The full document text.
    pub text: Arc<str>,

    index: LineIndex,
}

impl XmlDocument {
    pub(crate) fn new(root: XmlElement, file: Arc<str>, text: Arc<str>, index: LineIndex) -> Self {
        Self {
            root,
            file,
            text,
            index,
        }
    }

    /// The exact source text of `element`.
    ///
    /// Returns an empty string for elements that were not parsed from this
    /// document.
    pub fn raw(&self, element: &XmlElement) -> &str {
        self.slice(element.provenance.span.clone())
    }

    /// A byte range of the document text, or `""` when out of bounds.
    pub fn slice(&self, span: Range<usize>) -> &str {
        self.text.get(span).unwrap_or("")
    }

    /// Provenance for an arbitrary byte offset in this document.
    pub fn provenance_at(&self, offset: usize) -> Provenance {
        Provenance::new(self.file.clone(), &self.index, &self.text, offset..offset)
    }

    /// Leading whitespace of the line on which `offset` sits.
    pub fn indentation_at(&self, offset: usize) -> &str {
        let start = self.index.row_start(self.index.row(offset));
        let line = self.text.get(start..).unwrap_or("");
        let end = line
            .find(|c: char| c != ' ' && c != '\t')
            .unwrap_or(line.len());
        &line[..end]
    }
}

/// One element of a parsed or built tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name; configuration files rarely use prefixes.
    pub name: String,

    /// Namespace prefix, if any.
    pub prefix: Option<String>,

    /// Attributes in document order.
    pub attributes: Vec<XmlAttribute>,

    /// Child content of this element.
    pub children: XmlChildren,

    /// Location of the whole element, from `<` to the end of the closing tag.
    pub provenance: Provenance,

    /// Byte range of the opening tag (the whole element when self-closing).
    pub start_tag: Range<usize>,

    /// Byte range between the opening and closing tag; `None` when self-closing.
    pub content_span: Option<Range<usize>>,
}

/// An attribute and where it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,

    /// Namespace prefix, if any.
    pub prefix: Option<String>,

    /// Unescaped value.
    pub value: String,

    /// Location from the start of the name to the closing quote.
    pub provenance: Provenance,
}

/// What an element contains.
///
/// Whitespace-only text between child elements is dropped during parsing, so
/// a configuration element with indented children is `Elements`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlChildren {
    Elements(Vec<XmlElement>),

    /// Text only, as in `<CipherValue>...</CipherValue>`.
    Text {
        content: String,
        provenance: Provenance,
    },

    Mixed(Vec<XmlChild>),

    /// Self-closing, or nothing but whitespace.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlChild {
    Element(XmlElement),
    Text {
        content: String,
        provenance: Provenance,
    },
}

impl XmlElement {
    /// Start an in-memory element with no provenance.
    pub fn build(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            attributes: Vec::new(),
            children: XmlChildren::Empty,
            provenance: Provenance::default(),
            start_tag: 0..0,
            content_span: None,
        }
    }

    /// Builder form of [`XmlElement::set_attribute`].
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder form of [`XmlElement::push_child`].
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.push_child(child);
        self
    }

    /// Replace all content with a text node.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children = XmlChildren::Text {
            content: text.into(),
            provenance: Provenance::default(),
        };
        self
    }

    /// Set an attribute, replacing an existing one of the same name in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(attr) = self.attributes.iter_mut().find(|a| a.name == name) {
            attr.value = value;
        } else {
            self.attributes.push(XmlAttribute {
                name,
                prefix: None,
                value,
                provenance: Provenance::default(),
            });
        }
    }

    /// Remove an attribute by name, returning its value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(idx).value)
    }

    /// Append a child element, converting the content kind as needed.
    pub fn push_child(&mut self, child: XmlElement) {
        match &mut self.children {
            XmlChildren::Elements(elements) => elements.push(child),
            XmlChildren::Mixed(children) => children.push(XmlChild::Element(child)),
            XmlChildren::Empty => self.children = XmlChildren::Elements(vec![child]),
            XmlChildren::Text { .. } => {
                let XmlChildren::Text {
                    content,
                    provenance,
                } = std::mem::replace(&mut self.children, XmlChildren::Empty)
                else {
                    return;
                };
                self.children = XmlChildren::Mixed(vec![
                    XmlChild::Text {
                        content,
                        provenance,
                    },
                    XmlChild::Element(child),
                ]);
            }
        }
    }

    /// `prefix:name`, or just the name.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// The attribute with its provenance, for error positions.
    pub fn get_attribute_full(&self, name: &str) -> Option<&XmlAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_elements(&self) -> bool {
        match &self.children {
            XmlChildren::Elements(e) => !e.is_empty(),
            XmlChildren::Mixed(c) => c.iter().any(|c| matches!(c, XmlChild::Element(_))),
            _ => false,
        }
    }

    /// Whether any direct text child is more than whitespace.
    pub fn has_text(&self) -> bool {
        match &self.children {
            XmlChildren::Text { content, .. } => !content.trim().is_empty(),
            XmlChildren::Mixed(children) => children.iter().any(
                |c| matches!(c, XmlChild::Text { content, .. } if !content.trim().is_empty()),
            ),
            _ => false,
        }
    }

    /// Provenance of the first non-whitespace text child, if any.
    pub fn text_provenance(&self) -> Option<&Provenance> {
        match &self.children {
            XmlChildren::Text { provenance, .. } => Some(provenance),
            XmlChildren::Mixed(children) => children.iter().find_map(|c| match c {
                XmlChild::Text {
                    content,
                    provenance,
                } if !content.trim().is_empty() => Some(provenance),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.children, XmlChildren::Empty)
    }

    /// The text of a text-only element.
    pub fn text(&self) -> Option<&str> {
        match &self.children {
            XmlChildren::Text { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn get_children(&self, name: &str) -> Vec<&XmlElement> {
        self.all_children()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    /// First child element with the given name.
    pub fn get_child(&self, name: &str) -> Option<&XmlElement> {
        self.all_children().into_iter().find(|e| e.name == name)
    }

    /// Child elements in document order; text is skipped.
    pub fn all_children(&self) -> Vec<&XmlElement> {
        match &self.children {
            XmlChildren::Elements(elements) => elements.iter().collect(),
            XmlChildren::Mixed(children) => children
                .iter()
                .filter_map(|c| match c {
                    XmlChild::Element(e) => Some(e),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }
}

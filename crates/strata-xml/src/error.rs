//! Parse errors, each with the position it was detected at.

use crate::source::Provenance;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// What made a document unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlErrorKind {
    /// Reported by quick-xml (bad markup, bad entity, bad attribute).
    Syntax(String),
    /// The input ended inside `element`.
    Unclosed { element: String },
    /// `</close>` where `</open>` was required.
    MismatchedClose { open: String, close: String },
    /// A closing tag with no open element.
    StrayClose { name: String },
    /// Text before the document element.
    TextBeforeRoot,
    /// No element at all.
    NoRoot,
    /// A second top-level element.
    SecondRoot,
    /// Non-whitespace, non-comment content after the document element.
    TrailingContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: XmlErrorKind,
    pub location: Option<Provenance>,
}

impl Error {
    pub fn new(kind: XmlErrorKind, location: Option<Provenance>) -> Self {
        Self { kind, location }
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::new(XmlErrorKind::Syntax(message.into()), None)
    }

    pub(crate) fn at(mut self, location: Provenance) -> Self {
        self.location = Some(location);
        self
    }

    pub fn location(&self) -> Option<&Provenance> {
        self.location.as_ref()
    }

    /// 1-based line of the error, or 0 when unknown.
    pub fn line(&self) -> usize {
        self.location().map_or(0, |p| p.line)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            XmlErrorKind::Syntax(message) => write!(f, "malformed XML: {}", message),
            XmlErrorKind::Unclosed { element } => {
                write!(f, "the file ends before </{}> was found", element)
            }
            XmlErrorKind::MismatchedClose { open, close } => {
                write!(f, "</{}> does not close <{}>", close, open)
            }
            XmlErrorKind::StrayClose { name } => write!(f, "</{}> has no matching start tag", name),
            XmlErrorKind::TextBeforeRoot => f.write_str("text is not allowed before the root element"),
            XmlErrorKind::NoRoot => f.write_str("the document has no root element"),
            XmlErrorKind::SecondRoot => f.write_str("the document has more than one root element"),
            XmlErrorKind::TrailingContent => f.write_str("only comments may follow the root element"),
        }
    }
}

impl std::error::Error for Error {}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::syntax(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::syntax(format!("bad attribute: {}", err))
    }
}

//! Line-annotated XML parsing for Strata configuration files.
//!
//! This crate wraps [`quick-xml`] to provide a tree of [`XmlElement`]s where
//! every element and attribute carries a [`Provenance`]: the file it came from,
//! the 1-based line and column where it starts, and its byte span in the
//! document text. The span lets callers pull out the exact source text of one
//! element (a configuration section, say) and splice a replacement back in
//! without touching the rest of the file.
//!
//! # Example
//!
//! ```rust
//! use strata_xml::parse_file;
//!
//! let text = "<configuration>\n  <appSettings>\n    <add key=\"a\" value=\"1\"/>\n  </appSettings>\n</configuration>";
//! let doc = parse_file(text, "app.config").unwrap();
//!
//! let settings = doc.root.get_children("appSettings");
//! assert_eq!(settings.len(), 1);
//! assert_eq!(settings[0].provenance.line, 2);
//! assert!(doc.raw(settings[0]).starts_with("<appSettings>"));
//! ```
//!
//! Trees can also be built in memory and written back out:
//!
//! ```rust
//! use strata_xml::XmlElement;
//!
//! let el = XmlElement::build("add")
//!     .with_attribute("key", "a")
//!     .with_attribute("value", "x & y");
//! assert_eq!(el.to_xml_string(), "<add key=\"a\" value=\"x &amp; y\" />");
//! ```

pub mod error;
pub mod parser;
pub mod source;
pub mod types;
pub mod writer;

pub use error::{Error, Result, XmlErrorKind};
pub use parser::{parse, parse_file};
pub use source::{LineIndex, Provenance};
pub use types::{XmlAttribute, XmlChild, XmlChildren, XmlDocument, XmlElement};

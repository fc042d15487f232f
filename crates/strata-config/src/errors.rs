//! Configuration errors and their aggregation.
//!
//! Every problem found while reading configuration is recorded as a
//! [`ConfigError`] with a scope:
//!
//! - [`ErrorScope::Global`]: the file's declarations or structure are broken.
//!   Any global error makes the whole pass unusable.
//! - [`ErrorScope::Local`]: one section is broken; other sections still work.
//! - [`ErrorScope::NonSpecific`]: the file has a problem not tied to one
//!   section (an unrecognized section, for instance) that is still reported
//!   for every section read through that file.
//!
//! [`ErrorAggregator`] collects errors and decides which ones to report.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use strata_xml::Provenance;
use thiserror::Error;

use crate::runtime::AccessError;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    Local,
    Global,
    NonSpecific,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The file is not well-formed XML.
    Xml,
    /// Problem with the file's structure (root element, `<configSections>` placement).
    Structure,
    /// Invalid or conflicting section declaration.
    Declaration,
    /// Invalid `<location>` block.
    Location,
    /// Definition of a section that was never declared.
    UnrecognizedSection,
    /// Definition at a level the declaration does not allow.
    DefinitionNotAllowed,
    /// Section defined twice in one scope of one file.
    DuplicateSection,
    /// Section locked by an ancestor's override mode.
    SectionLocked,
    /// Invalid lock list.
    LockList,
    /// Attempt to change something an ancestor locked.
    Locked,
    /// Attribute value failed conversion or validation.
    InvalidValue,
    UnrecognizedAttribute,
    UnrecognizedElement,
    /// Child element appears more than once.
    DuplicateElement,
    /// Text content where only elements are allowed.
    TextContent,
    /// Required attribute missing.
    Required,
    /// Invalid collection operation.
    Collection,
    /// Problem with a `configSource` reference or its file.
    ConfigSource,
    /// Problem decrypting or encrypting a protected section.
    Protection,
    /// The section's type is not registered.
    SectionType,
    /// File could not be read or written.
    Io,
}

/// A single configuration error with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<Arc<str>>,
    /// 1-based line, 0 when unknown.
    pub line: usize,
    pub scope: ErrorScope,
    /// Config key of the section the error belongs to, if any.
    pub section: Option<String>,
}

impl ConfigError {
    pub fn new(kind: ErrorKind, scope: ErrorScope, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: 0,
            scope,
            section: None,
        }
    }

    pub fn local(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorScope::Local, message)
    }

    pub fn global(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorScope::Global, message)
    }

    pub fn non_specific(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorScope::NonSpecific, message)
    }

    /// Attach a source location. Unknown provenance leaves the error unchanged.
    pub fn at(mut self, provenance: &Provenance) -> Self {
        if provenance.is_known() || !provenance.file.is_empty() {
            self.file = Some(provenance.file.clone());
            self.line = provenance.line;
        }
        self
    }

    pub fn in_file(mut self, file: Arc<str>, line: usize) -> Self {
        self.file = Some(file);
        self.line = line;
        self
    }

    pub fn for_section(mut self, config_key: impl Into<String>) -> Self {
        self.section = Some(config_key.into());
        self
    }

    pub fn is_local(&self) -> bool {
        self.scope == ErrorScope::Local
    }

    pub fn is_global(&self) -> bool {
        self.scope == ErrorScope::Global
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) if self.line > 0 => write!(f, "{}({}): {}", file, self.line, self.message),
            Some(file) => write!(f, "{}: {}", file, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A non-empty set of configuration errors, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors {
    errors: Vec<ConfigError>,
}

impl ConfigErrors {
    pub fn new(errors: Vec<ConfigError>) -> Self {
        Self { errors }
    }

    pub fn single(error: ConfigError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn into_vec(self) -> Vec<ConfigError> {
        self.errors
    }

    /// The first error; the aggregate is never constructed empty by this crate.
    pub fn first(&self) -> Option<&ConfigError> {
        self.errors.first()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigError> {
        self.errors.iter()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl<'a> IntoIterator for &'a ConfigErrors {
    type Item = &'a ConfigError;
    type IntoIter = std::slice::Iter<'a, ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Collects errors for one evaluation pass.
///
/// When any global error is present, only global errors are reported: a
/// broken declaration makes every local result suspect.
#[derive(Debug, Clone, Default)]
pub struct ErrorAggregator {
    errors: Vec<ConfigError>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ConfigError) {
        tracing::warn!(scope = ?error.scope, "{}", error);
        self.errors.push(error);
    }

    pub fn add_errors(&mut self, errors: impl IntoIterator<Item = ConfigError>) {
        for error in errors {
            self.add_error(error);
        }
    }

    /// Drop the local errors recorded for one section.
    pub fn reset_local(&mut self, config_key: &str) {
        self.errors
            .retain(|e| !(e.is_local() && e.section.as_deref() == Some(config_key)));
    }

    pub fn has_global(&self) -> bool {
        self.errors.iter().any(ConfigError::is_global)
    }

    /// The errors that would be reported by [`ErrorAggregator::throw_if_errors`].
    pub fn reportable(&self, ignore_local: bool) -> Vec<ConfigError> {
        if self.has_global() {
            return self
                .errors
                .iter()
                .filter(|e| e.is_global())
                .cloned()
                .collect();
        }
        self.errors
            .iter()
            .filter(|e| !(ignore_local && e.is_local()))
            .cloned()
            .collect()
    }

    pub fn throw_if_errors(&self, ignore_local: bool) -> std::result::Result<(), ConfigErrors> {
        let errors = self.reportable(ignore_local);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors::new(errors))
        }
    }

    /// Every recorded error, unfiltered.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ConfigError> {
        self.errors
    }
}

/// Fatal errors from the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors found while evaluating.
    #[error("{0}")]
    Config(#[from] ConfigErrors),

    /// The file was modified by someone else after it was loaded.
    #[error("{} has been changed since it was loaded", file.display())]
    FileChangedSinceLoad { file: PathBuf },

    #[error(transparent)]
    Access(#[from] AccessError),

    /// No declaration exists for the requested section.
    #[error("section '{0}' is not declared")]
    UndeclaredSection(String),

    /// The config path is not known to the host.
    #[error("unknown configuration path '{0}'")]
    UnknownPath(String),

    /// The requested level has no file.
    #[error("no configuration file at level '{0}'")]
    NoFile(String),

    /// Invalid edit through the configuration API.
    #[error("{0}")]
    Edit(ConfigError),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(ConfigErrors::single(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! One parsed configuration file.

use std::path::PathBuf;
use std::sync::Arc;

use strata_xml::{XmlDocument, XmlElement};

use crate::errors::{ConfigError, ErrorKind};
use crate::path::ConfigLevel;
use crate::runtime::{AccessError, FileAccessor, VersionToken};

pub const ROOT_ELEMENT: &str = "configuration";
pub const CONFIG_SECTIONS: &str = "configSections";
pub const LOCATION: &str = "location";

/// Text written for a level whose file does not exist yet.
pub const EMPTY_FILE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<configuration>\n</configuration>\n";

/// A configuration file as loaded from its [`FileAccessor`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Index of the file's level in the host.
    pub level: usize,
    pub path: PathBuf,
    pub name: Arc<str>,
    /// `None` when the file does not exist or could not be parsed.
    pub document: Option<XmlDocument>,
    /// Version at load; `None` when the file did not exist.
    pub version: Option<VersionToken>,
    /// Global errors: unreadable file, malformed XML, wrong root element.
    pub errors: Vec<ConfigError>,
}

impl ConfigFile {
    pub fn load(files: &dyn FileAccessor, level: usize, config_level: &ConfigLevel) -> Self {
        let path = config_level.file.clone();
        let name = config_level.file_name();
        let mut file = ConfigFile {
            level,
            path,
            name,
            document: None,
            version: None,
            errors: Vec::new(),
        };

        let version = match files.version(&file.path) {
            Ok(version) => version,
            Err(err) => {
                file.errors.push(access_error(&file.name, &err));
                return file;
            }
        };
        let Some(version) = version else {
            tracing::debug!(file = %file.name, "configuration file does not exist");
            return file;
        };
        file.version = Some(version);

        let text = match files.read(&file.path) {
            Ok(text) => text,
            Err(err) => {
                file.errors.push(access_error(&file.name, &err));
                return file;
            }
        };
        tracing::debug!(file = %file.name, bytes = text.len(), "loaded configuration file");

        match strata_xml::parse_file(&text, &file.name) {
            Ok(doc) => {
                if doc.root.name != ROOT_ELEMENT {
                    file.errors.push(
                        ConfigError::global(
                            ErrorKind::Structure,
                            format!(
                                "Configuration system failed to initialize: the root element must be <{}>",
                                ROOT_ELEMENT
                            ),
                        )
                        .at(&doc.root.provenance),
                    );
                } else {
                    file.document = Some(doc);
                }
            }
            Err(err) => {
                let error = ConfigError::global(ErrorKind::Xml, err.to_string());
                let error = match err.location() {
                    Some(location) => error.at(location),
                    None => error.in_file(file.name.clone(), 0),
                };
                file.errors.push(error);
            }
        }
        file
    }

    pub fn exists(&self) -> bool {
        self.version.is_some()
    }

    pub fn root(&self) -> Option<&XmlElement> {
        self.document.as_ref().map(|d| &d.root)
    }

    pub fn text(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.text.as_ref())
    }
}

pub(crate) fn access_error(file: &Arc<str>, err: &AccessError) -> ConfigError {
    ConfigError::global(ErrorKind::Io, err.to_string()).in_file(file.clone(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ConfigHost;
    use crate::runtime::MemoryFileAccessor;

    fn level() -> ConfigLevel {
        ConfigHost::new("machine.config").levels()[0].clone()
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let files = MemoryFileAccessor::new();
        let file = ConfigFile::load(&files, 0, &level());
        assert!(!file.exists());
        assert!(file.errors.is_empty());
        assert!(file.root().is_none());
    }

    #[test]
    fn test_wrong_root_is_global() {
        let files = MemoryFileAccessor::new().with_file("machine.config", "<settings />");
        let file = ConfigFile::load(&files, 0, &level());
        assert_eq!(file.errors.len(), 1);
        assert!(file.errors[0].is_global());
        assert_eq!(file.errors[0].kind, ErrorKind::Structure);
    }

    #[test]
    fn test_malformed_xml_is_global_with_line() {
        let files =
            MemoryFileAccessor::new().with_file("machine.config", "<configuration>\n  <a>\n</configuration>");
        let file = ConfigFile::load(&files, 0, &level());
        assert_eq!(file.errors[0].kind, ErrorKind::Xml);
        assert!(file.errors[0].is_global());
        assert_eq!(file.errors[0].file.as_deref(), Some("machine.config"));
    }

    #[test]
    fn test_permission_denied() {
        let files = MemoryFileAccessor::new();
        files.deny("machine.config");
        let file = ConfigFile::load(&files, 0, &level());
        assert_eq!(file.errors[0].kind, ErrorKind::Io);
        assert!(file.errors[0].message.contains("permission denied"));
    }
}

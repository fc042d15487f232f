//! Finding section definitions in a file, at the root and inside
//! `<location>` blocks.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_xml::{XmlElement, XmlErrorKind};

use crate::directory::{FactoryResolution, OverrideMode, parse_bool};
use crate::errors::{ConfigError, ErrorKind};
use crate::file::{CONFIG_SECTIONS, ConfigFile, LOCATION};
use crate::merge::config_key_tag;
use crate::path::{ConfigHost, ConfigPath};
use crate::runtime::{FileAccessor, VersionToken};

pub const CONFIG_SOURCE: &str = "configSource";
pub const PROTECTION_PROVIDER: &str = "configProtectionProvider";

/// Where a definition sits: the file root or a `<location>` block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    /// Relative path of the block; `""` for the file root.
    pub path: String,
    pub override_mode: OverrideMode,
    pub inherit_in_child_apps: bool,
}

impl LocationKey {
    /// The file root scope.
    pub fn root() -> Self {
        Self {
            path: String::new(),
            override_mode: OverrideMode::Inherit,
            inherit_in_child_apps: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty() && self.override_mode == OverrideMode::Inherit && self.inherit_in_child_apps
    }
}

impl Default for LocationKey {
    fn default() -> Self {
        Self::root()
    }
}

/// Normalize a `<location path>`: `"."` and `""` mean the file's own scope.
pub fn normalize_location_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// One section definition in one file.
#[derive(Debug, Clone)]
pub struct SectionXmlInfo {
    pub config_key: String,
    pub file: Arc<str>,
    pub level: usize,
    pub line: usize,
    pub location: LocationKey,
    /// Whether the definition is inside a `<location>` element.
    pub in_location: bool,
    /// Config path the definition applies to.
    pub target: ConfigPath,
    /// Exact source text of the element.
    pub raw_xml: String,
    pub span: Range<usize>,
    pub config_source: Option<String>,
    pub protection_provider: Option<String>,
    pub element: XmlElement,
}

/// Definitions of one file, and the problems found while scanning it.
#[derive(Debug, Clone, Default)]
pub struct FileSections {
    pub sections: Vec<SectionXmlInfo>,
    pub errors: Vec<ConfigError>,
}

impl FileSections {
    /// The definition of `config_key` in scope `location`.
    pub fn find(&self, config_key: &str, location: &LocationKey) -> Option<&SectionXmlInfo> {
        self.sections
            .iter()
            .find(|s| s.config_key == config_key && &s.location == location)
    }
}

/// Scan `file` for section definitions.
///
/// `factories` must be the resolution through this file.
pub fn scan_sections(file: &ConfigFile, factories: &FactoryResolution, host: &ConfigHost) -> FileSections {
    let mut out = FileSections::default();
    let (Some(doc), Some(level)) = (&file.document, host.level(file.level)) else {
        return out;
    };
    let mut scanner = Scanner {
        file,
        factories,
        host,
        level_path: level.path.clone(),
        seen: HashSet::new(),
        out: &mut out,
        text: &doc.text,
    };

    for child in doc.root.all_children() {
        match child.name.as_str() {
            CONFIG_SECTIONS => {}
            LOCATION => scanner.location(child),
            _ => scanner.definition(child, "", &LocationKey::root(), false),
        }
    }
    out
}

struct Scanner<'a> {
    file: &'a ConfigFile,
    factories: &'a FactoryResolution,
    host: &'a ConfigHost,
    level_path: ConfigPath,
    seen: HashSet<(String, String)>,
    out: &'a mut FileSections,
    text: &'a str,
}

impl Scanner<'_> {
    fn location(&mut self, el: &XmlElement) {
        let mut key = LocationKey::root();
        let mut valid = true;

        if el.get_attribute("overrideMode").is_some() && el.get_attribute("allowOverride").is_some() {
            self.global(
                "The 'overrideMode' and 'allowOverride' attributes cannot be used together on one <location> element",
                el,
            );
            valid = false;
        }
        for attr in &el.attributes {
            match attr.name.as_str() {
                "path" => key.path = normalize_location_path(&attr.value),
                "overrideMode" => match OverrideMode::parse(&attr.value) {
                    Some(mode) => key.override_mode = mode,
                    None => {
                        self.global(&format!("Invalid overrideMode '{}'", attr.value), el);
                        valid = false;
                    }
                },
                "allowOverride" => match parse_bool(&attr.value) {
                    Some(true) => key.override_mode = OverrideMode::Allow,
                    Some(false) => key.override_mode = OverrideMode::Deny,
                    None => {
                        self.global(&format!("Invalid allowOverride '{}'", attr.value), el);
                        valid = false;
                    }
                },
                "inheritInChildApplications" => match parse_bool(&attr.value) {
                    Some(value) => key.inherit_in_child_apps = value,
                    None => {
                        self.global(&format!("Invalid inheritInChildApplications '{}'", attr.value), el);
                        valid = false;
                    }
                },
                other => {
                    self.global(&format!("Unrecognized attribute '{}'", other), el);
                    valid = false;
                }
            }
        }
        if !valid {
            return;
        }

        for child in el.all_children() {
            match child.name.as_str() {
                LOCATION => self.global("<location> elements may not be nested", child),
                CONFIG_SECTIONS => self.global(
                    &format!("<{}> may not appear inside a <location> element", CONFIG_SECTIONS),
                    child,
                ),
                _ => self.definition(child, "", &key, true),
            }
        }
    }

    fn definition(&mut self, el: &XmlElement, group: &str, location: &LocationKey, in_location: bool) {
        let config_key = if group.is_empty() {
            el.name.clone()
        } else {
            format!("{}/{}", group, el.name)
        };
        let factories = self.factories;
        let Some(factory) = factories.get(&config_key) else {
            self.out.errors.push(
                ConfigError::non_specific(
                    ErrorKind::UnrecognizedSection,
                    format!("Unrecognized configuration section {}", config_key),
                )
                .at(&el.provenance),
            );
            return;
        };
        if factory.is_group {
            for child in el.all_children() {
                self.definition(child, &config_key, location, in_location);
            }
            return;
        }

        let local = |kind: ErrorKind, message: String| {
            ConfigError::local(kind, message)
                .at(&el.provenance)
                .for_section(config_key.clone())
        };

        if !self.seen.insert((config_key.clone(), location.path.clone())) {
            let err = local(
                ErrorKind::DuplicateSection,
                "Sections must only appear once per config file".to_string(),
            );
            self.out.errors.push(err);
            return;
        }

        let target = self.level_path.join(&location.path);
        if in_location && !factory.allow_location && !location.path.is_empty() {
            let err = local(
                ErrorKind::DefinitionNotAllowed,
                format!("The section '{}' cannot be defined inside a <location> element", config_key),
            );
            self.out.errors.push(err);
            return;
        }
        let level_kind = self.host.level(self.file.level).map(|l| l.kind);
        if !factory.allow_definition.allows(&target)
            || level_kind.is_some_and(|kind| !factory.allow_exe_definition.allows(kind))
        {
            let err = local(
                ErrorKind::DefinitionNotAllowed,
                format!("It is an error to use the section '{}' at this level", config_key),
            );
            self.out.errors.push(err);
            return;
        }

        let span = el.provenance.span.clone();
        self.out.sections.push(SectionXmlInfo {
            config_key: config_key.clone(),
            file: self.file.name.clone(),
            level: self.file.level,
            line: el.provenance.line,
            location: location.clone(),
            in_location,
            target,
            raw_xml: self.text.get(span.clone()).unwrap_or("").to_string(),
            span,
            config_source: el.get_attribute(CONFIG_SOURCE).map(str::to_string),
            protection_provider: el.get_attribute(PROTECTION_PROVIDER).map(str::to_string),
            element: el.clone(),
        });
    }

    fn global(&mut self, message: &str, el: &XmlElement) {
        self.out
            .errors
            .push(ConfigError::global(ErrorKind::Location, message).at(&el.provenance));
    }
}

/// An external file read for a `configSource` reference.
#[derive(Debug, Clone)]
pub struct ExternalSource {
    pub path: PathBuf,
    pub version: Option<VersionToken>,
    pub element: XmlElement,
}

/// Path of a `configSource` file, relative to the referencing file.
pub fn config_source_path(referencing_file: &Path, source: &str) -> PathBuf {
    match referencing_file.parent() {
        Some(dir) => dir.join(source),
        None => PathBuf::from(source),
    }
}

/// Read and check the external file a definition points at.
pub fn resolve_config_source(
    info: &SectionXmlInfo,
    referencing_file: &Path,
    files: &dyn FileAccessor,
) -> Result<ExternalSource, ConfigError> {
    let Some(source) = info.config_source.as_deref() else {
        return Err(ConfigError::local(ErrorKind::ConfigSource, "No configSource attribute"));
    };
    let local = |message: String| {
        ConfigError::local(ErrorKind::ConfigSource, message)
            .at(&info.element.provenance)
            .for_section(info.config_key.clone())
    };

    if source.trim().is_empty() || Path::new(source).is_absolute() {
        return Err(local(format!("The configSource attribute must be a relative physical path: '{}'", source)));
    }
    if info.element.has_elements() {
        return Err(local(
            "A section using 'configSource' may contain no other attributes or elements".to_string(),
        ));
    }

    let path = config_source_path(referencing_file, source);
    let version = files.version(&path).ok().flatten();
    let text = files.read(&path).map_err(|err| {
        ConfigError::local(ErrorKind::Io, format!("Unable to open configSource file '{}': {}", source, err))
            .at(&info.element.provenance)
            .for_section(info.config_key.clone())
    })?;
    let name = path.to_string_lossy().to_string();
    let doc = strata_xml::parse_file(&text, &name).map_err(|err| match &err.kind {
        XmlErrorKind::TrailingContent | XmlErrorKind::SecondRoot => local("The format of a configSource file must be an element containing the name of the section".to_string()),
        _ => local(format!("The configSource file '{}' is invalid: {}", source, err)),
    })?;

    let tag = config_key_tag(&info.config_key);
    if doc.root.name != tag {
        return Err(local(format!(
            "The root element of the configSource file must match the section name '{}'; found <{}> (invalid root)",
            tag, doc.root.name
        )));
    }
    tracing::debug!(section = %info.config_key, file = %name, "resolved configSource");
    Ok(ExternalSource {
        path,
        version,
        element: doc.root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::resolve_factories;
    use crate::runtime::MemoryFileAccessor;

    fn scan(machine: &str) -> FileSections {
        let host = ConfigHost::new("machine.config");
        let files = MemoryFileAccessor::new().with_file("machine.config", machine);
        let file = ConfigFile::load(&files, 0, &host.levels()[0]);
        let factories = resolve_factories([&file]);
        assert!(factories.errors.is_empty(), "{:?}", factories.errors);
        scan_sections(&file, &factories, &host)
    }

    #[test]
    fn test_finds_root_and_location_definitions() {
        let found = scan(
            r#"<configuration>
  <appSettings>
    <add key="a" value="1" />
  </appSettings>
  <location path="app/admin" overrideMode="Deny" inheritInChildApplications="false">
    <appSettings />
  </location>
  <location path=".">
    <connectionStrings />
  </location>
</configuration>"#,
        );
        assert!(found.errors.is_empty(), "{:?}", found.errors);
        assert_eq!(found.sections.len(), 3);

        let root = &found.sections[0];
        assert_eq!(root.line, 2);
        assert_eq!(root.target.as_str(), "machine");
        assert!(root.raw_xml.starts_with("<appSettings>"));
        assert!(root.raw_xml.ends_with("</appSettings>"));

        let admin = &found.sections[1];
        assert_eq!(admin.target.as_str(), "machine/app/admin");
        assert_eq!(admin.location.override_mode, OverrideMode::Deny);
        assert!(!admin.location.inherit_in_child_apps);
        assert!(admin.in_location);

        let dot = &found.sections[2];
        assert_eq!(dot.target.as_str(), "machine");
        assert_eq!(dot.location.path, "");
    }

    #[test]
    fn test_duplicate_in_scope_is_local() {
        let found = scan(
            r#"<configuration>
  <appSettings />
  <location path=".">
    <appSettings />
  </location>
  <location path="x"><appSettings /></location>
</configuration>"#,
        );
        assert_eq!(found.sections.len(), 2);
        assert_eq!(found.errors.len(), 1);
        assert!(found.errors[0].is_local());
        assert_eq!(found.errors[0].kind, ErrorKind::DuplicateSection);
        assert_eq!(found.errors[0].line, 4);
    }

    #[test]
    fn test_unrecognized_section_is_non_specific() {
        let found = scan(r#"<configuration><mystery /></configuration>"#);
        assert_eq!(found.errors.len(), 1);
        assert_eq!(found.errors[0].scope, crate::errors::ErrorScope::NonSpecific);
    }

    #[test]
    fn test_location_errors_are_global() {
        let found = scan(
            r#"<configuration>
  <location path="a" overrideMode="Allow" allowOverride="true"><appSettings /></location>
  <location path="b"><location path="c" /></location>
</configuration>"#,
        );
        let kinds: Vec<_> = found.errors.iter().map(|e| (e.kind, e.is_global(), e.line)).collect();
        assert_eq!(
            kinds,
            [(ErrorKind::Location, true, 2), (ErrorKind::Location, true, 3)]
        );
        assert!(found.sections.is_empty());
    }

    #[test]
    fn test_config_source_root_must_match() {
        let found = scan(r#"<configuration><appSettings configSource="settings.config" /></configuration>"#);
        let info = &found.sections[0];
        assert_eq!(info.config_source.as_deref(), Some("settings.config"));

        let files = MemoryFileAccessor::new().with_file("settings.config", "<connectionStrings />");
        let err = resolve_config_source(info, Path::new("machine.config"), &files).unwrap_err();
        assert!(err.is_local());
        assert!(err.message.contains("invalid root"));

        files.insert("settings.config", "<appSettings><add key=\"k\" value=\"v\" /></appSettings>");
        let source = resolve_config_source(info, Path::new("machine.config"), &files).unwrap();
        assert_eq!(source.element.all_children().len(), 1);
        assert!(source.version.is_some());

        files.insert("settings.config", "<appSettings /> trailing");
        let err = resolve_config_source(info, Path::new("machine.config"), &files).unwrap_err();
        assert!(err.message.contains("format"));

        files.remove(Path::new("settings.config"));
        let err = resolve_config_source(info, Path::new("machine.config"), &files).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_location_path_normalization() {
        assert_eq!(normalize_location_path("."), "");
        assert_eq!(normalize_location_path(" /app/ "), "app");
        assert!(LocationKey::root().is_root());
    }
}

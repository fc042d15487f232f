//! Editing one configuration file.
//!
//! A [`Configuration`] is a snapshot of one level's file taken at open.
//! Sections are loaded on first access with the merged value seen by the
//! file and the value its ancestors produce. Saving writes back only the
//! difference, spliced into the original text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use strata_xml::XmlElement;

use crate::directory::{FactoryRecord, OverrideMode};
use crate::errors::{ConfigError, ConfigErrors, Error, ErrorKind, Result};
use crate::file::EMPTY_FILE;
use crate::merge::{config_key_tag, merge};
use crate::path::{ConfigPath, LevelKind};
use crate::protection::{PROTECTED_DATA_SECTION, encrypt_section};
use crate::runtime::{FileAccessor, VersionToken};
use crate::section::{CONFIG_SOURCE, LocationKey, SectionXmlInfo, config_source_path};
use crate::system::{ConfigSystem, LoadedLevel};
use crate::unmerge::SaveMode;
use crate::update::{DefinitionUpdate, UpdateCoordinator};
use crate::value::{ElementValue, SectionValue};

/// Where in its file a section definition is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationSettings {
    pub override_mode: OverrideMode,
    pub inherit_in_child_apps: bool,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            override_mode: OverrideMode::Inherit,
            inherit_in_child_apps: true,
        }
    }
}

impl From<&LocationKey> for LocationSettings {
    fn from(key: &LocationKey) -> Self {
        Self {
            override_mode: key.override_mode,
            inherit_in_child_apps: key.inherit_in_child_apps,
        }
    }
}

#[derive(Debug)]
struct EditableSection {
    value: SectionValue,
    parent: Option<ElementValue>,
    /// This file's root-scope definition.
    existing: Option<SectionXmlInfo>,
    location: LocationKey,
    removed: bool,
    protection: Option<String>,
    protection_changed: bool,
    config_source: Option<String>,
    config_source_changed: bool,
    /// External file behind `configSource` and its version at load.
    external: Option<(PathBuf, Option<VersionToken>)>,
    override_locked: bool,
}

impl EditableSection {
    fn moved(&self) -> bool {
        self.existing
            .as_ref()
            .is_some_and(|e| e.location != self.location)
    }

    fn changed(&self) -> bool {
        self.value.root.is_dirty()
            || self.moved()
            || self.protection_changed
            || self.config_source_changed
            || (self.existing.is_none() && self.location != LocationKey::root())
    }
}

/// An editable view of one level's configuration file.
#[derive(Debug)]
pub struct Configuration<'s> {
    system: &'s ConfigSystem,
    kind: LevelKind,
    level: usize,
    path: ConfigPath,
    file: PathBuf,
    loaded: Arc<LoadedLevel>,
    /// Every chain file's version at open.
    versions: Vec<(PathBuf, Option<VersionToken>)>,
    sections: IndexMap<String, EditableSection>,
    declarations: Vec<FactoryRecord>,
}

impl ConfigSystem {
    /// Open the file of one level for editing.
    pub fn open_configuration(&self, kind: LevelKind) -> Result<Configuration<'_>> {
        let level = self
            .host()
            .level_index(kind)
            .ok_or_else(|| Error::NoFile(kind.as_str().to_string()))?;
        let config_level = self
            .host()
            .level(level)
            .ok_or_else(|| Error::NoFile(kind.as_str().to_string()))?;
        let chain: Vec<usize> = (0..=level).collect();
        let loaded = self.load_levels(&chain);

        let mut global: Vec<ConfigError> = Vec::new();
        for l in &loaded {
            global.extend(l.file.errors.iter().filter(|e| e.is_global()).cloned());
            global.extend(l.sections.errors.iter().filter(|e| e.is_global()).cloned());
        }
        let Some(this) = loaded.last().cloned() else {
            return Err(Error::NoFile(kind.as_str().to_string()));
        };
        global.extend(this.factories.errors.iter().filter(|e| e.is_global()).cloned());
        if !global.is_empty() {
            global.dedup();
            return Err(ConfigErrors::new(global).into());
        }

        tracing::debug!(level = kind.as_str(), file = %config_level.file.display(), "opened configuration");
        Ok(Configuration {
            system: self,
            kind,
            level,
            path: config_level.path.clone(),
            file: config_level.file.clone(),
            versions: loaded
                .iter()
                .map(|l| (l.file.path.clone(), l.file.version))
                .collect(),
            loaded: this,
            sections: IndexMap::new(),
            declarations: Vec::new(),
        })
    }
}

impl<'s> Configuration<'s> {
    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn path(&self) -> &ConfigPath {
        &self.path
    }

    pub fn file_path(&self) -> &Path {
        &self.file
    }

    pub fn has_file(&self) -> bool {
        self.loaded.file.exists()
    }

    /// Config keys of every section declared for this file.
    pub fn section_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .loaded
            .factories
            .sections()
            .map(|f| f.config_key.clone())
            .collect();
        for record in &self.declarations {
            if !keys.contains(&record.config_key) {
                keys.push(record.config_key.clone());
            }
        }
        keys
    }

    /// The section as this file sees it.
    pub fn section(&mut self, config_key: &str) -> Result<&SectionValue> {
        Ok(&self.load(config_key)?.value)
    }

    /// The section's root element for editing.
    pub fn section_mut(&mut self, config_key: &str) -> Result<&mut ElementValue> {
        let section = self.load(config_key)?;
        if section.override_locked {
            return Err(Error::Edit(locked_section(config_key)));
        }
        Ok(&mut section.value.root)
    }

    /// The merged value this file's ancestors give the section, if any
    /// ancestor defines it.
    pub fn parent_value(&mut self, config_key: &str) -> Result<Option<&ElementValue>> {
        Ok(self.load(config_key)?.parent.as_ref())
    }

    /// Declare a new section in this file's `<configSections>`.
    pub fn declare_section(&mut self, mut record: FactoryRecord) -> Result<()> {
        let declaration_error = |message: String| Error::Edit(ConfigError::local(ErrorKind::Declaration, message));
        if record.is_group {
            return Err(declaration_error(format!(
                "'{}' is a group; declare the sections inside it instead",
                record.config_key
            )));
        }
        if record.type_name.as_deref().is_none_or(str::is_empty) {
            return Err(declaration_error(format!("The section '{}' must specify a type", record.config_key)));
        }
        if let Some(existing) = self.loaded.factories.get(&record.config_key) {
            if existing.is_group || existing.type_name != record.type_name {
                return Err(declaration_error(format!(
                    "Section or group name '{}' is already defined with a different type",
                    record.config_key
                )));
            }
            return Ok(());
        }
        record.level = Some(self.level);
        record.declared_in = None;
        self.declarations.retain(|r| r.config_key != record.config_key);
        self.sections.shift_remove(&record.config_key);
        self.declarations.push(record);
        Ok(())
    }

    /// Remove this file's definition of the section.
    pub fn remove_section(&mut self, config_key: &str) -> Result<()> {
        let section = self.load(config_key)?;
        if section.override_locked {
            return Err(Error::Edit(locked_section(config_key)));
        }
        section.removed = true;
        Ok(())
    }

    /// Move the section's definition to the block with these settings.
    pub fn set_location(&mut self, config_key: &str, settings: LocationSettings) -> Result<()> {
        let section = self.load(config_key)?;
        section.location = LocationKey {
            path: String::new(),
            override_mode: settings.override_mode,
            inherit_in_child_apps: settings.inherit_in_child_apps,
        };
        section.removed = false;
        Ok(())
    }

    /// Keep the section in an external file, or inline it again with `None`.
    pub fn set_config_source(&mut self, config_key: &str, source: Option<&str>) -> Result<()> {
        let file = self.file.clone();
        let section = self.load(config_key)?;
        let source = source.map(str::trim).filter(|s| !s.is_empty());
        if let Some(source) = source
            && Path::new(source).is_absolute()
        {
            return Err(Error::Edit(ConfigError::local(
                ErrorKind::ConfigSource,
                format!("The configSource attribute must be a relative path: '{}'", source),
            )));
        }
        if section.config_source.as_deref() != source {
            section.config_source = source.map(str::to_string);
            section.config_source_changed = true;
            section.external = section
                .config_source
                .as_deref()
                .map(|s| (config_source_path(&file, s), None));
        }
        Ok(())
    }

    /// Encrypt the section with a named provider on save. An empty name
    /// selects the default provider.
    pub fn protect_section(&mut self, config_key: &str, provider: &str) -> Result<()> {
        if config_key == PROTECTED_DATA_SECTION {
            return Err(Error::Edit(ConfigError::local(
                ErrorKind::Protection,
                format!("The '{}' section cannot itself be protected", PROTECTED_DATA_SECTION),
            )));
        }
        let settings = self.system.protected_data_settings(&self.path);
        settings
            .resolve(provider, self.system.providers())
            .map_err(|e| Error::Edit(e.for_section(config_key)))?;
        let name = match provider {
            "" => settings.default_provider.unwrap_or_default(),
            name => name.to_string(),
        };
        let section = self.load(config_key)?;
        if section.protection.as_deref() != Some(name.as_str()) {
            section.protection = Some(name);
            section.protection_changed = true;
        }
        Ok(())
    }

    pub fn unprotect_section(&mut self, config_key: &str) -> Result<()> {
        let section = self.load(config_key)?;
        if section.protection.take().is_some() {
            section.protection_changed = true;
        }
        Ok(())
    }

    pub fn is_protected(&mut self, config_key: &str) -> Result<bool> {
        Ok(self.load(config_key)?.protection.is_some())
    }

    fn load(&mut self, config_key: &str) -> Result<&mut EditableSection> {
        if !self.sections.contains_key(config_key) {
            let section = self.load_section(config_key)?;
            self.sections.insert(config_key.to_string(), section);
        }
        self.sections
            .get_mut(config_key)
            .ok_or_else(|| Error::UndeclaredSection(config_key.to_string()))
    }

    fn load_section(&self, config_key: &str) -> Result<EditableSection> {
        if let Some(record) = self.declarations.iter().find(|r| r.config_key == config_key) {
            return self.new_section(record);
        }

        let (evaluated, parent) = self.system.file_view(self.level, config_key)?;
        if !evaluated.errors.is_empty() {
            return Err(ConfigErrors::new(evaluated.errors).into());
        }
        let existing = self
            .loaded
            .sections
            .sections
            .iter()
            .find(|s| s.config_key == config_key && s.location.path.is_empty())
            .cloned();
        let config_source = existing.as_ref().and_then(|e| e.config_source.clone());
        let external = config_source.as_deref().map(|source| {
            let path = config_source_path(&self.file, source);
            let version = evaluated
                .dependencies
                .iter()
                .find(|d| d.path == path)
                .and_then(|d| d.version);
            (path, version)
        });
        let protection = existing.as_ref().and_then(|e| e.protection_provider.clone());

        Ok(EditableSection {
            value: (*evaluated.value).clone(),
            parent,
            location: existing.as_ref().map(|e| e.location.clone()).unwrap_or_default(),
            existing,
            removed: false,
            protection,
            protection_changed: false,
            config_source,
            config_source_changed: false,
            external,
            override_locked: self.system.is_override_locked(self.level, config_key)?,
        })
    }

    fn new_section(&self, record: &FactoryRecord) -> Result<EditableSection> {
        let type_name = record.type_name.as_deref().unwrap_or_default();
        let section_type = self.system.registry().get(type_name).ok_or_else(|| {
            Error::Edit(ConfigError::local(
                ErrorKind::SectionType,
                format!("The section type '{}' is not registered", type_name),
            ))
        })?;
        let outcome = merge(&record.config_key, &section_type.schema, &[], 1);
        Ok(EditableSection {
            value: SectionValue::new(record.config_key.clone(), outcome.value),
            parent: None,
            existing: None,
            location: LocationKey::root(),
            removed: false,
            protection: None,
            protection_changed: false,
            config_source: None,
            config_source_changed: false,
            external: None,
            override_locked: false,
        })
    }

    /// Write changed sections back to this level's file.
    pub fn save(&mut self, mode: SaveMode) -> Result<()> {
        let file = self.file.clone();
        self.write_to(&file, mode)?;

        let system = self.system;
        let files = system.files();
        let mut written = vec![file];
        written.extend(self.sections.values().filter_map(|s| s.external.as_ref().map(|e| e.0.clone())));
        for path in &written {
            let version = files.version(path)?;
            system.notify_file_changed(path, version);
        }
        *self = system.open_configuration(self.kind)?;
        Ok(())
    }

    /// Write this configuration to another file. The snapshot stays open
    /// against the original file.
    pub fn save_as(&mut self, target: &Path, mode: SaveMode) -> Result<()> {
        self.write_to(target, mode)?;
        for section in self.sections.values_mut() {
            section.value.root.clear_dirty();
        }
        Ok(())
    }

    fn check_versions(&self) -> Result<()> {
        let files = self.system.files();
        let externals = self
            .sections
            .values()
            .filter(|s| !s.config_source_changed)
            .filter_map(|s| s.external.as_ref());
        for (path, version) in self.versions.iter().chain(externals) {
            if files.version(path)? != *version {
                return Err(Error::FileChangedSinceLoad { file: path.clone() });
            }
        }
        Ok(())
    }

    fn write_to(&mut self, target: &Path, mode: SaveMode) -> Result<()> {
        self.check_versions()?;

        let doc = match &self.loaded.file.document {
            Some(doc) => doc.clone(),
            None => strata_xml::parse_file(EMPTY_FILE, &self.loaded.file.name)
                .map_err(|e| Error::Edit(ConfigError::global(ErrorKind::Xml, e.to_string())))?,
        };

        let mut coordinator = UpdateCoordinator::new();
        for record in &self.declarations {
            coordinator.record_declaration(record.clone());
        }
        let mut externals: Vec<(PathBuf, String)> = Vec::new();
        for (config_key, section) in &self.sections {
            self.plan_section(config_key, section, mode, &mut coordinator, &mut externals)?;
        }

        let files = self.system.files();
        for (path, text) in &externals {
            files.write(path, text)?;
        }
        coordinator.complete_updates(&doc, &self.loaded.factories);
        if coordinator.is_empty() && self.loaded.file.exists() && target == self.file {
            tracing::debug!(file = %target.display(), "nothing to save");
            return Ok(());
        }
        let text = coordinator.render(&doc);
        files.write(target, &text)?;
        tracing::info!(
            file = %target.display(),
            mode = mode.as_str(),
            sections = coordinator.location_updates().iter().map(|l| l.updates.len()).sum::<usize>(),
            "saved configuration"
        );
        Ok(())
    }

    fn plan_section(
        &self,
        config_key: &str,
        section: &EditableSection,
        mode: SaveMode,
        coordinator: &mut UpdateCoordinator,
        externals: &mut Vec<(PathBuf, String)>,
    ) -> Result<()> {
        if section.removed {
            if let Some(existing) = &section.existing {
                coordinator.record_section_update(
                    &existing.location,
                    DefinitionUpdate::remove(config_key, existing.span.clone()),
                );
            }
            return Ok(());
        }
        let write = match mode {
            SaveMode::Full => section.existing.is_some() || section.changed(),
            SaveMode::Minimal | SaveMode::Modified => section.changed(),
        };
        if !write {
            return Ok(());
        }
        if section.override_locked {
            return Err(Error::Edit(locked_section(config_key)));
        }

        let tag = config_key_tag(config_key);
        let unmerged = section
            .value
            .root
            .unmerge(section.parent.as_ref(), mode)
            .map_err(|e| Error::Edit(e.for_section(config_key)))?;
        let mut element = match unmerged {
            Some(element) => element,
            None if section.config_source.is_some() || section.protection.is_some() => XmlElement::build(tag),
            None => {
                if let Some(existing) = &section.existing {
                    coordinator.record_section_update(
                        &existing.location,
                        DefinitionUpdate::remove(config_key, existing.span.clone()),
                    );
                }
                return Ok(());
            }
        };

        if let Some(name) = &section.protection {
            let settings = self.system.protected_data_settings(&self.path);
            let provider = settings
                .resolve(name, self.system.providers())
                .map_err(|e| Error::Edit(e.for_section(config_key)))?;
            element = encrypt_section(&element, name, provider.as_ref())
                .map_err(|e| Error::Edit(e.for_section(config_key)))?;
        }

        if let Some((external_path, _)) = &section.external {
            externals.push((external_path.clone(), format!("{}\n", element.to_xml_string())));
            let reference_unchanged = !section.config_source_changed && !section.moved() && section.existing.is_some();
            if reference_unchanged {
                return Ok(());
            }
            let source = section.config_source.as_deref().unwrap_or_default();
            element = XmlElement::build(tag).with_attribute(CONFIG_SOURCE, source);
        }

        let xml = element.to_xml_string();
        match &section.existing {
            Some(existing) if existing.location == section.location => {
                coordinator.record_section_update(
                    &section.location,
                    DefinitionUpdate::write(config_key, Some(existing.span.clone()), xml),
                );
            }
            Some(existing) => {
                coordinator.record_section_update(
                    &existing.location,
                    DefinitionUpdate::remove(config_key, existing.span.clone()),
                );
                let mut update = DefinitionUpdate::write(config_key, None, xml);
                update.moved = true;
                coordinator.record_section_update(&section.location, update);
            }
            None => {
                coordinator.record_section_update(&section.location, DefinitionUpdate::write(config_key, None, xml));
            }
        }
        Ok(())
    }
}

fn locked_section(config_key: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::SectionLocked,
        "This configuration section cannot be used at this path. This happens when the section is locked at a parent level",
    )
    .for_section(config_key)
}

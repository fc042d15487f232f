//! The configuration system: parsed files, resolved declarations and
//! evaluated sections, cached per (config path, section).
//!
//! Files are loaded on first use and kept until a change notification
//! drops them. Each section record is evaluated at most once; concurrent
//! readers of the same record wait for the first evaluation to finish.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use indexmap::IndexMap;
use strata_xml::XmlElement;

use crate::directory::{FactoryRecord, FactoryResolution, OverrideMode, resolve_factories};
use crate::errors::{ConfigError, ConfigErrors, Error, ErrorAggregator, ErrorKind, ErrorScope, Result};
use crate::file::ConfigFile;
use crate::merge::{MergeInput, merge};
use crate::path::{ConfigHost, ConfigPath};
use crate::protection::{
    PROTECTED_DATA_SECTION, ProtectedDataSettings, ProviderRegistry, decrypt_section,
};
use crate::runtime::{FileAccessor, NativeFileAccessor, VersionToken};
use crate::schema::SchemaRegistry;
use crate::section::{
    FileSections, LocationKey, PROTECTION_PROVIDER, SectionXmlInfo, resolve_config_source,
    scan_sections,
};
use crate::value::{ElementValue, SectionValue};

/// State of a lazily evaluated cache slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    Unevaluated,
    Value(T),
}

impl<T> Slot<T> {
    pub fn is_evaluated(&self) -> bool {
        matches!(self, Slot::Value(_))
    }

    pub fn value(self) -> Option<T> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Unevaluated => None,
        }
    }
}

/// One level's file with the declarations and definitions derived from it.
#[derive(Debug)]
pub(crate) struct LoadedLevel {
    pub file: ConfigFile,
    /// Declarations through this level.
    pub factories: FactoryResolution,
    pub sections: FileSections,
}

/// A file read while evaluating a section, other than the level files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dependency {
    pub path: PathBuf,
    pub version: Option<VersionToken>,
}

/// Result of evaluating one section.
#[derive(Debug, Clone)]
pub(crate) struct Evaluated {
    pub value: Arc<SectionValue>,
    /// Reportable local and non-specific errors.
    pub errors: Vec<ConfigError>,
    pub dependencies: Vec<Dependency>,
}

type RuntimeObject = Arc<dyn Any + Send + Sync>;

struct SectionRecord {
    config_key: String,
    type_name: String,
    levels: Vec<usize>,
    merged: OnceLock<std::result::Result<Evaluated, ConfigErrors>>,
    runtime: OnceLock<std::result::Result<RuntimeObject, ConfigErrors>>,
}

#[derive(Default)]
struct CacheState {
    levels: HashMap<usize, Arc<LoadedLevel>>,
    records: HashMap<(ConfigPath, String), Arc<SectionRecord>>,
}

/// Which definitions count as "this level" during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    /// Definitions targeting the queried path are set here.
    Path,
    /// Only the root-scope definition of one file is set here.
    File(usize),
    /// Everything above the root-scope definition of one file.
    ParentOfFile(usize),
}

/// Entry point for reading a configuration hierarchy.
pub struct ConfigSystem {
    host: ConfigHost,
    registry: Arc<SchemaRegistry>,
    providers: ProviderRegistry,
    files: Arc<dyn FileAccessor>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for ConfigSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSystem")
            .field("host", &self.host)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl ConfigSystem {
    pub fn new(host: ConfigHost, registry: Arc<SchemaRegistry>, files: Arc<dyn FileAccessor>) -> Self {
        Self {
            host,
            registry,
            providers: ProviderRegistry::new(),
            files,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// A system over real files with the built-in section types.
    pub fn native(host: ConfigHost) -> Self {
        Self::new(
            host,
            Arc::new(SchemaRegistry::with_builtins()),
            Arc::new(NativeFileAccessor),
        )
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn host(&self) -> &ConfigHost {
        &self.host
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn files(&self) -> &dyn FileAccessor {
        self.files.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load (or fetch cached) level files for `chain`, root first.
    pub(crate) fn load_levels(&self, chain: &[usize]) -> Vec<Arc<LoadedLevel>> {
        let mut state = self.lock();
        let mut loaded: Vec<Arc<LoadedLevel>> = Vec::new();
        for &index in chain {
            if let Some(level) = state.levels.get(&index) {
                loaded.push(level.clone());
                continue;
            }
            let Some(config_level) = self.host.level(index) else {
                continue;
            };
            let file = ConfigFile::load(self.files.as_ref(), index, config_level);
            let factories = resolve_factories(
                loaded
                    .iter()
                    .map(|l| &l.file)
                    .chain(std::iter::once(&file)),
            );
            let sections = scan_sections(&file, &factories, &self.host);
            let level = Arc::new(LoadedLevel {
                file,
                factories,
                sections,
            });
            state.levels.insert(index, level.clone());
            loaded.push(level);
        }
        loaded
    }

    fn check_path(&self, path: &ConfigPath) -> Result<Vec<usize>> {
        if path.segments().next() != Some(ConfigPath::MACHINE) {
            return Err(Error::UnknownPath(path.to_string()));
        }
        Ok(self.host.chain(path))
    }

    /// Declarations visible at `path`, groups included.
    pub fn resolve_factories(&self, path: &ConfigPath) -> Result<IndexMap<String, FactoryRecord>> {
        let chain = self.check_path(path)?;
        let loaded = self.load_levels(&chain);
        Ok(loaded
            .last()
            .map(|l| l.factories.factories.clone())
            .unwrap_or_default())
    }

    /// Declared sections (not groups) visible at `path`.
    pub fn declared_sections(&self, path: &ConfigPath) -> Result<Vec<FactoryRecord>> {
        Ok(self
            .resolve_factories(path)?
            .into_values()
            .filter(|f| !f.is_group)
            .collect())
    }

    /// The definition of `config_key` in one file and location scope.
    pub fn extract_section(
        &self,
        level: usize,
        config_key: &str,
        location: &LocationKey,
    ) -> Option<SectionXmlInfo> {
        let chain: Vec<usize> = (0..=level).collect();
        let loaded = self.load_levels(&chain);
        loaded
            .iter()
            .find(|l| l.file.level == level)
            .and_then(|l| l.sections.find(config_key, location).cloned())
    }

    fn lookup(&self, path: &ConfigPath, config_key: &str) -> Result<(Vec<Arc<LoadedLevel>>, FactoryRecord)> {
        let chain = self.check_path(path)?;
        let loaded = self.load_levels(&chain);
        let factory = loaded
            .last()
            .and_then(|l| l.factories.get(config_key))
            .filter(|f| !f.is_group)
            .cloned()
            .ok_or_else(|| Error::UndeclaredSection(config_key.to_string()))?;
        Ok((loaded, factory))
    }

    fn record(&self, path: &ConfigPath, config_key: &str) -> Result<Arc<SectionRecord>> {
        let (loaded, factory) = self.lookup(path, config_key)?;
        let mut state = self.lock();
        let key = (path.clone(), config_key.to_string());
        if let Some(record) = state.records.get(&key) {
            tracing::debug!(path = %path, section = config_key, "section cache hit");
            return Ok(record.clone());
        }
        tracing::debug!(path = %path, section = config_key, "section cache miss");
        let record = Arc::new(SectionRecord {
            config_key: config_key.to_string(),
            type_name: factory.type_name.clone().unwrap_or_default(),
            levels: loaded.iter().map(|l| l.file.level).collect(),
            merged: OnceLock::new(),
            runtime: OnceLock::new(),
        });
        state.records.insert(key, record.clone());
        Ok(record)
    }

    fn merged(&self, path: &ConfigPath, record: &SectionRecord) -> std::result::Result<Evaluated, ConfigErrors> {
        record
            .merged
            .get_or_init(|| match self.lookup(path, &record.config_key) {
                Ok((loaded, factory)) => self.evaluate_with(path, &loaded, &factory, View::Path),
                Err(err) => Err(ConfigErrors::single(ConfigError::local(
                    ErrorKind::UnrecognizedSection,
                    err.to_string(),
                ))),
            })
            .clone()
    }

    /// The merged value of a section, or its errors.
    pub fn get_raw_merged_value(&self, path: &ConfigPath, config_key: &str) -> Result<Arc<SectionValue>> {
        let record = self.record(path, config_key)?;
        let evaluated = self.merged(path, &record)?;
        if !evaluated.errors.is_empty() {
            return Err(ConfigErrors::new(evaluated.errors).into());
        }
        Ok(evaluated.value)
    }

    /// The runtime object of a section: the section type's object, or the
    /// merged [`SectionValue`] when the type has no hook.
    pub fn get_section(&self, path: &ConfigPath, config_key: &str) -> Result<Arc<dyn Any + Send + Sync>> {
        let record = self.record(path, config_key)?;
        let runtime = record.runtime.get_or_init(|| {
            let evaluated = self.merged(path, &record)?;
            if !evaluated.errors.is_empty() {
                return Err(ConfigErrors::new(evaluated.errors));
            }
            let section_type = self.registry.get(&record.type_name).ok_or_else(|| {
                ConfigErrors::single(unregistered_type(&record.config_key, &record.type_name))
            })?;
            Ok(section_type.create_runtime(&evaluated.value))
        });
        Ok(runtime.clone()?)
    }

    /// [`ConfigSystem::get_section`] downcast to a concrete runtime type.
    pub fn get_section_as<T: Any + Send + Sync>(&self, path: &ConfigPath, config_key: &str) -> Result<Arc<T>> {
        let object = self.get_section(path, config_key)?;
        object.downcast::<T>().map_err(|_| {
            Error::Edit(ConfigError::local(
                ErrorKind::SectionType,
                format!("The section '{}' has a different runtime type", config_key),
            ))
        })
    }

    /// Cached merged value of a section without evaluating it.
    pub fn peek_section(&self, path: &ConfigPath, config_key: &str) -> Slot<std::result::Result<Arc<SectionValue>, ConfigErrors>> {
        let state = self.lock();
        let key = (path.clone(), config_key.to_string());
        match state.records.get(&key).and_then(|r| r.merged.get()) {
            Some(result) => Slot::Value(result.clone().map(|e| e.value)),
            None => Slot::Unevaluated,
        }
    }

    /// Every reportable error of a section at `path`.
    pub fn section_errors(&self, path: &ConfigPath, config_key: &str) -> Result<Vec<ConfigError>> {
        let record = self.record(path, config_key)?;
        Ok(match self.merged(path, &record) {
            Ok(evaluated) => evaluated.errors,
            Err(errors) => errors.into_vec(),
        })
    }

    /// Errors of every declared section at `path`, without duplicates.
    pub fn check(&self, path: &ConfigPath) -> Result<Vec<ConfigError>> {
        let mut all: Vec<ConfigError> = Vec::new();
        for factory in self.declared_sections(path)? {
            for err in self.section_errors(path, &factory.config_key)? {
                if !all.contains(&err) {
                    all.push(err);
                }
            }
        }
        Ok(all)
    }

    /// Tell the system a file may have changed.
    ///
    /// Drops the file's parsed state and every cached section read through
    /// it when `version` differs from the version seen at load. Returns
    /// whether anything was dropped.
    pub fn notify_file_changed(&self, file: &Path, version: Option<VersionToken>) -> bool {
        let mut state = self.lock();
        let mut dropped = false;

        if let Some(index) = self.host.level_for_file(file) {
            let stale = state
                .levels
                .get(&index)
                .is_some_and(|l| l.file.version != version);
            if stale {
                state.levels.retain(|&i, _| i < index);
                state.records.retain(|_, r| r.levels.iter().all(|&i| i < index));
                dropped = true;
            }
        }

        let before = state.records.len();
        state.records.retain(|_, record| match record.merged.get() {
            Some(Ok(evaluated)) => !evaluated
                .dependencies
                .iter()
                .any(|d| d.path == file && d.version != version),
            _ => true,
        });
        dropped |= state.records.len() != before;

        if dropped {
            tracing::debug!(file = %file.display(), "invalidated cached configuration");
        }
        dropped
    }

    /// Drop every cached file and section.
    pub fn clear_cache(&self) {
        let mut state = self.lock();
        state.levels.clear();
        state.records.clear();
    }

    /// Evaluate a section for a view, without touching the section cache.
    pub(crate) fn evaluate(&self, path: &ConfigPath, config_key: &str, view: View) -> Result<Evaluated> {
        let (loaded, factory) = self.lookup(path, config_key)?;
        Ok(self.evaluate_with(path, &loaded, &factory, view)?)
    }

    fn evaluate_with(
        &self,
        path: &ConfigPath,
        loaded: &[Arc<LoadedLevel>],
        factory: &FactoryRecord,
        view: View,
    ) -> std::result::Result<Evaluated, ConfigErrors> {
        let config_key = factory.config_key.as_str();
        let mut errors = ErrorAggregator::new();
        for level in loaded {
            errors.add_errors(level.file.errors.iter().cloned());
            errors.add_errors(
                level
                    .sections
                    .errors
                    .iter()
                    .filter(|e| e.scope != ErrorScope::Local || e.section.as_deref() == Some(config_key))
                    .cloned(),
            );
        }
        if let Some(deepest) = loaded.last() {
            errors.add_errors(deepest.factories.errors.iter().cloned());
        }
        if errors.has_global() {
            errors.throw_if_errors(false)?;
        }

        let type_name = factory.type_name.as_deref().unwrap_or_default();
        let Some(section_type) = self.registry.get(type_name) else {
            errors.add_error(unregistered_type(config_key, type_name));
            return Err(ConfigErrors::new(errors.reportable(false)));
        };

        let definitions = self.applicable_definitions(path, loaded, factory, &mut errors);
        let is_here = |def: &SectionXmlInfo| match view {
            View::Path => def.target.depth() >= path.depth(),
            View::File(level) | View::ParentOfFile(level) => def.level == level && def.location.path.is_empty(),
        };

        let mut elements: Vec<(XmlElement, bool)> = Vec::new();
        let mut dependencies = Vec::new();
        let mut sources = Vec::new();
        for def in definitions {
            let here = is_here(def);
            if here && matches!(view, View::ParentOfFile(_)) {
                continue;
            }
            match self.resolve_definition(def, path) {
                Ok((element, dependency)) => {
                    sources.push(def.element.provenance.clone());
                    dependencies.extend(dependency);
                    elements.push((element, here));
                }
                Err(err) => errors.add_error(err),
            }
        }

        let inputs: Vec<MergeInput<'_>> = elements
            .iter()
            .map(|(element, here)| MergeInput {
                element,
                depth: usize::from(*here),
            })
            .collect();
        let outcome = merge(config_key, &section_type.schema, &inputs, 1);
        errors.add_errors(outcome.errors);

        let mut value = SectionValue::new(config_key, outcome.value);
        value.sources = sources;
        Ok(Evaluated {
            value: Arc::new(value),
            errors: errors.reportable(false),
            dependencies,
        })
    }

    /// Definitions that apply to `path`, in merge order, with definitions
    /// below an override-mode lock removed.
    fn applicable_definitions<'a>(
        &self,
        path: &ConfigPath,
        loaded: &'a [Arc<LoadedLevel>],
        factory: &FactoryRecord,
        errors: &mut ErrorAggregator,
    ) -> Vec<&'a SectionXmlInfo> {
        let app_depth = self.host.application_depth(path);
        let mut definitions: Vec<&SectionXmlInfo> = loaded
            .iter()
            .flat_map(|l| l.sections.sections.iter())
            .filter(|s| s.config_key == factory.config_key && s.target.is_ancestor_or_self(path))
            .filter(|s| s.location.inherit_in_child_apps || app_depth.is_none_or(|d| d <= s.target.depth()))
            .collect();
        definitions.sort_by_key(|s| (s.target.depth(), s.level));

        let mut mode = factory.override_mode_default;
        let mut established = factory.declaring_level();
        let mut allowed = Vec::with_capacity(definitions.len());
        for def in definitions {
            if mode == OverrideMode::Deny && def.level > established {
                errors.add_error(
                    ConfigError::local(
                        ErrorKind::SectionLocked,
                        "This configuration section cannot be used at this path. This happens when the section is locked at a parent level",
                    )
                    .at(&def.element.provenance)
                    .for_section(&factory.config_key),
                );
                continue;
            }
            if def.location.override_mode != OverrideMode::Inherit {
                mode = def.location.override_mode;
                established = def.level;
            }
            allowed.push(def);
        }
        allowed
    }

    /// The plain element for a definition: external source read and
    /// protection removed.
    fn resolve_definition(
        &self,
        def: &SectionXmlInfo,
        path: &ConfigPath,
    ) -> std::result::Result<(XmlElement, Option<Dependency>), ConfigError> {
        let mut element = def.element.clone();
        let mut dependency = None;

        if def.config_source.is_some() {
            let referencing = self
                .host
                .level(def.level)
                .map(|l| l.file.clone())
                .unwrap_or_default();
            let source = resolve_config_source(def, &referencing, self.files.as_ref())?;
            dependency = Some(Dependency {
                path: source.path,
                version: source.version,
            });
            element = source.element;
        }

        if let Some(provider_name) = element.get_attribute(PROTECTION_PROVIDER).map(str::to_string) {
            if def.config_key == PROTECTED_DATA_SECTION {
                return Err(ConfigError::local(
                    ErrorKind::Protection,
                    format!("The '{}' section cannot itself be protected", PROTECTED_DATA_SECTION),
                )
                .at(&def.element.provenance)
                .for_section(&def.config_key));
            }
            let settings = self.protected_data_settings(path);
            let provider = settings
                .resolve(&provider_name, &self.providers)
                .map_err(|e| e.at(&def.element.provenance).for_section(&def.config_key))?;
            element = decrypt_section(&def.config_key, &element, provider.as_ref())?;
        }
        Ok((element, dependency))
    }

    pub(crate) fn protected_data_settings(&self, path: &ConfigPath) -> ProtectedDataSettings {
        match self.get_raw_merged_value(path, PROTECTED_DATA_SECTION) {
            Ok(value) => ProtectedDataSettings::from_value(&value.root),
            Err(err) => {
                tracing::debug!(path = %path, "no usable {}: {}", PROTECTED_DATA_SECTION, err);
                ProtectedDataSettings::default()
            }
        }
    }

    /// Whether an override-mode lock above `level` forbids defining the
    /// section in that level's file.
    pub(crate) fn is_override_locked(&self, level: usize, config_key: &str) -> Result<bool> {
        let path = self
            .host
            .level(level)
            .map(|l| l.path.clone())
            .ok_or_else(|| Error::NoFile(level.to_string()))?;
        let (loaded, factory) = self.lookup(&path, config_key)?;
        let above: Vec<Arc<LoadedLevel>> = loaded.into_iter().filter(|l| l.file.level < level).collect();
        let mut ignored = ErrorAggregator::new();
        let mut mode = factory.override_mode_default;
        let mut established = factory.declaring_level();
        for def in self.applicable_definitions(&path, &above, &factory, &mut ignored) {
            if def.location.override_mode != OverrideMode::Inherit {
                mode = def.location.override_mode;
                established = def.level;
            }
        }
        Ok(mode == OverrideMode::Deny && level > established)
    }

    /// Merged value of a section as seen from one file, and the value the
    /// file's ancestors produce (`None` when nothing above defines it).
    pub(crate) fn file_view(
        &self,
        level: usize,
        config_key: &str,
    ) -> Result<(Evaluated, Option<ElementValue>)> {
        let path = self
            .host
            .level(level)
            .map(|l| l.path.clone())
            .ok_or_else(|| Error::NoFile(level.to_string()))?;
        let here = self.evaluate(&path, config_key, View::File(level))?;
        let parent = self.evaluate(&path, config_key, View::ParentOfFile(level))?;
        let parent = (!parent.value.sources.is_empty()).then(|| parent.value.root.clone());
        Ok((here, parent))
    }
}

fn unregistered_type(config_key: &str, type_name: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::SectionType,
        format!(
            "An error occurred creating the configuration section handler for {}: type '{}' is not registered",
            config_key, type_name
        ),
    )
    .for_section(config_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::AppSettings;
    use crate::runtime::MemoryFileAccessor;
    use crate::value::ValueOrigin;

    fn system(machine: &str, app: &str) -> (ConfigSystem, Arc<MemoryFileAccessor>) {
        let files = Arc::new(
            MemoryFileAccessor::new()
                .with_file("machine.config", machine)
                .with_file("app.config", app),
        );
        let host = ConfigHost::new("machine.config").with_application("app.config");
        let system = ConfigSystem::new(host, Arc::new(SchemaRegistry::with_builtins()), files.clone());
        (system, files)
    }

    fn app() -> ConfigPath {
        ConfigPath::new("machine/app")
    }

    #[test]
    fn test_app_settings_merge_across_levels() {
        let (system, _) = system(
            r#"<configuration><appSettings><add key="a" value="1" /><add key="b" value="2" /></appSettings></configuration>"#,
            r#"<configuration><appSettings><add key="b" value="3" /></appSettings></configuration>"#,
        );
        let settings = system.get_section_as::<AppSettings>(&app(), "appSettings").unwrap();
        assert_eq!(settings.iter().collect::<Vec<_>>(), [("a", "1"), ("b", "3")]);

        let machine = system
            .get_section_as::<AppSettings>(&ConfigPath::machine(), "appSettings")
            .unwrap();
        assert_eq!(machine.get("b"), Some("2"));
    }

    #[test]
    fn test_location_value_is_set_here() {
        let (system, _) = system(
            r#"<configuration>
  <configSections><section name="demo" type="Demo" /></configSections>
  <demo a="1" />
  <location path="app"><demo a="2" /></location>
</configuration>"#,
            "<configuration />",
        );
        let mut registry = SchemaRegistry::with_builtins();
        registry.register(crate::schema::SectionType::new(
            "Demo",
            crate::schema::ElementSchema::new().with_property(crate::schema::PropertyDef::text("a")),
        ));
        let system = ConfigSystem::new(system.host.clone(), Arc::new(registry), system.files.clone());

        let value = system.get_raw_merged_value(&app(), "demo").unwrap();
        let a = value.root.property("a").unwrap();
        assert_eq!(a.text().as_deref(), Some("2"));
        assert_eq!(a.origin, ValueOrigin::SetHere);
        assert!(a.modified);
        assert_eq!(value.sources.len(), 2);
    }

    #[test]
    fn test_undeclared_and_unknown_path() {
        let (system, _) = system("<configuration />", "<configuration />");
        assert!(matches!(
            system.get_section(&app(), "nothing"),
            Err(Error::UndeclaredSection(_))
        ));
        assert!(matches!(
            system.get_section(&ConfigPath::new("elsewhere"), "appSettings"),
            Err(Error::UnknownPath(_))
        ));
    }

    #[test]
    fn test_errors_are_cached_until_invalidated() {
        let (system, files) = system(
            "<configuration />",
            r#"<configuration><appSettings bogus="1" /></configuration>"#,
        );
        for _ in 0..2 {
            let err = system.get_section(&app(), "appSettings").unwrap_err();
            let Error::Config(errors) = err else {
                panic!("expected configuration errors");
            };
            assert_eq!(errors.len(), 1);
            assert_eq!(errors.errors()[0].kind, ErrorKind::UnrecognizedAttribute);
        }

        files.insert("app.config", r#"<configuration><appSettings /></configuration>"#);
        let version = files.version(Path::new("app.config")).unwrap();
        assert!(system.notify_file_changed(Path::new("app.config"), version));
        assert!(!system.notify_file_changed(Path::new("app.config"), version));
        assert!(system.get_section(&app(), "appSettings").is_ok());
    }

    #[test]
    fn test_global_error_suppresses_local() {
        let (system, _) = system(
            r#"<configuration><configSections><section name="x" /></configSections></configuration>"#,
            r#"<configuration><appSettings bogus="1" /></configuration>"#,
        );
        let errors = system.section_errors(&app(), "appSettings").unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_global());
    }

    #[test]
    fn test_override_mode_deny_locks_section() {
        let (system, _) = system(
            r#"<configuration><location path="." overrideMode="Deny"><appSettings><add key="a" value="1" /></appSettings></location></configuration>"#,
            r#"<configuration><appSettings><add key="b" value="2" /></appSettings></configuration>"#,
        );
        let errors = system.section_errors(&app(), "appSettings").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::SectionLocked);
        assert_eq!(errors[0].file.as_deref(), Some("app.config"));
    }

    #[test]
    fn test_inherit_in_child_applications_false() {
        let (system, _) = system(
            r#"<configuration><location path="." inheritInChildApplications="false"><appSettings><add key="m" value="1" /></appSettings></location></configuration>"#,
            "<configuration />",
        );
        let app_settings = system.get_section_as::<AppSettings>(&app(), "appSettings").unwrap();
        assert!(app_settings.is_empty());
        let machine = system
            .get_section_as::<AppSettings>(&ConfigPath::machine(), "appSettings")
            .unwrap();
        assert_eq!(machine.get("m"), Some("1"));
    }

    #[test]
    fn test_peek_and_check() {
        let (system, _) = system("<configuration />", "<configuration><mystery /></configuration>");
        assert!(!system.peek_section(&app(), "appSettings").is_evaluated());
        let errors = system.check(&app()).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::UnrecognizedSection);
        assert!(system.peek_section(&app(), "appSettings").is_evaluated());
    }

    #[test]
    fn test_concurrent_readers_share_one_evaluation() {
        let (system, _) = system(
            r#"<configuration><appSettings><add key="a" value="1" /></appSettings></configuration>"#,
            "<configuration />",
        );
        let system = Arc::new(system);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let system = system.clone();
                std::thread::spawn(move || system.get_raw_merged_value(&app(), "appSettings").unwrap())
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}

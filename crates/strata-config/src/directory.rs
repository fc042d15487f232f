//! Section declarations: which section names exist, what type backs them
//! and where they may be defined.
//!
//! Declarations come from `<configSections>` of every file from the machine
//! level down. A file may repeat an ancestor's declaration only when it is
//! compatible (same kind, same or omitted type).

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use strata_xml::{Provenance, XmlElement};

use crate::errors::{ConfigError, ErrorKind};
use crate::file::{CONFIG_SECTIONS, ConfigFile};
use crate::path::{ConfigPath, LevelKind};

/// Levels (by config path) at which a section may be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllowDefinition {
    #[default]
    Everywhere,
    MachineOnly,
    MachineToApplication,
}

impl AllowDefinition {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "Everywhere" => Some(Self::Everywhere),
            "MachineOnly" => Some(Self::MachineOnly),
            "MachineToApplication" => Some(Self::MachineToApplication),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Everywhere => "Everywhere",
            Self::MachineOnly => "MachineOnly",
            Self::MachineToApplication => "MachineToApplication",
        }
    }

    /// Whether a definition for `target` is allowed.
    pub fn allows(self, target: &ConfigPath) -> bool {
        match self {
            Self::Everywhere => true,
            Self::MachineOnly => target.depth() <= 1,
            Self::MachineToApplication => target.depth() <= 2,
        }
    }
}

/// File levels at which a section may be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllowExeDefinition {
    MachineOnly,
    #[default]
    MachineToApplication,
    MachineToRoamingUser,
    MachineToLocalUser,
}

impl AllowExeDefinition {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "MachineOnly" => Some(Self::MachineOnly),
            "MachineToApplication" => Some(Self::MachineToApplication),
            "MachineToRoamingUser" => Some(Self::MachineToRoamingUser),
            "MachineToLocalUser" => Some(Self::MachineToLocalUser),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MachineOnly => "MachineOnly",
            Self::MachineToApplication => "MachineToApplication",
            Self::MachineToRoamingUser => "MachineToRoamingUser",
            Self::MachineToLocalUser => "MachineToLocalUser",
        }
    }

    pub fn allows(self, kind: LevelKind) -> bool {
        let deepest = match self {
            Self::MachineOnly => LevelKind::Machine,
            Self::MachineToApplication => LevelKind::Application,
            Self::MachineToRoamingUser => LevelKind::RoamingUser,
            Self::MachineToLocalUser => LevelKind::LocalUser,
        };
        kind <= deepest
    }
}

/// Override mode of a `<location>` block or a section declaration's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverrideMode {
    #[default]
    Inherit,
    Allow,
    Deny,
}

impl OverrideMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Inherit" => Some(Self::Inherit),
            "Allow" => Some(Self::Allow),
            "Deny" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inherit => "Inherit",
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

impl fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved section or section group declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryRecord {
    pub config_key: String,
    pub name: String,
    /// Config key of the enclosing group, `""` at the top level.
    pub group: String,
    pub is_group: bool,
    pub type_name: Option<String>,
    pub allow_location: bool,
    pub allow_definition: AllowDefinition,
    pub allow_exe_definition: AllowExeDefinition,
    pub override_mode_default: OverrideMode,
    pub require_permission: bool,
    pub restart_on_external_changes: bool,
    /// Where the declaration appeared; `None` for built-in declarations.
    pub declared_in: Option<Provenance>,
    /// Level index of the declaring file; `None` for built-in declarations.
    pub level: Option<usize>,
}

impl FactoryRecord {
    pub fn section(config_key: impl Into<String>, type_name: impl Into<String>) -> Self {
        let config_key = config_key.into();
        let (group, name) = match config_key.rsplit_once('/') {
            Some((group, name)) => (group.to_string(), name.to_string()),
            None => (String::new(), config_key.clone()),
        };
        Self {
            config_key,
            name,
            group,
            is_group: false,
            type_name: Some(type_name.into()),
            allow_location: true,
            allow_definition: AllowDefinition::default(),
            allow_exe_definition: AllowExeDefinition::MachineToLocalUser,
            override_mode_default: OverrideMode::Allow,
            require_permission: true,
            restart_on_external_changes: true,
            declared_in: None,
            level: None,
        }
    }

    fn group(config_key: String, name: String, group: String) -> Self {
        Self {
            is_group: true,
            type_name: None,
            group,
            name,
            ..Self::section(config_key, "")
        }
    }

    /// Whether a redeclaration agrees with this record.
    fn is_compatible(&self, other: &FactoryRecord) -> bool {
        self.is_group == other.is_group
            && match (&self.type_name, &other.type_name) {
                (_, None) => true,
                (Some(mine), Some(theirs)) => mine == theirs,
                (None, Some(_)) => self.is_group,
            }
    }

    /// Level index the override-mode default is established at.
    pub fn declaring_level(&self) -> usize {
        self.level.unwrap_or(0)
    }
}

/// Declarations every hierarchy has without writing them.
pub fn builtin_factories() -> Vec<FactoryRecord> {
    vec![
        FactoryRecord::section("appSettings", "AppSettingsSection"),
        FactoryRecord::section("connectionStrings", "ConnectionStringsSection"),
        FactoryRecord {
            allow_exe_definition: AllowExeDefinition::MachineToApplication,
            ..FactoryRecord::section("configProtectedData", "ProtectedConfigurationSection")
        },
    ]
}

/// Factories visible through a chain of files plus the errors found.
#[derive(Debug, Clone, Default)]
pub struct FactoryResolution {
    pub factories: IndexMap<String, FactoryRecord>,
    pub errors: Vec<ConfigError>,
}

impl FactoryResolution {
    pub fn get(&self, config_key: &str) -> Option<&FactoryRecord> {
        self.factories.get(config_key)
    }

    /// Declared sections, excluding groups.
    pub fn sections(&self) -> impl Iterator<Item = &FactoryRecord> {
        self.factories.values().filter(|f| !f.is_group)
    }
}

/// Resolve declarations from `files`, root first.
pub fn resolve_factories<'a>(files: impl IntoIterator<Item = &'a ConfigFile>) -> FactoryResolution {
    let mut resolution = FactoryResolution::default();
    for record in builtin_factories() {
        resolution.factories.insert(record.config_key.clone(), record);
    }

    for file in files {
        let (declared, errors) = file_declarations(file);
        resolution.errors.extend(errors);

        let mut seen_in_file = HashSet::new();
        for record in declared {
            let at = record.declared_in.clone().unwrap_or_default();
            if !seen_in_file.insert(record.config_key.clone()) {
                resolution.errors.push(
                    ConfigError::global(
                        ErrorKind::Declaration,
                        format!("Sections must only appear once per config file. '{}' is declared twice", record.config_key),
                    )
                    .at(&at),
                );
                continue;
            }
            match resolution.factories.get(&record.config_key) {
                Some(existing) if !existing.is_compatible(&record) => {
                    resolution.errors.push(
                        ConfigError::global(
                            ErrorKind::Declaration,
                            format!(
                                "Section or group name '{}' is already defined with a different type",
                                record.config_key
                            ),
                        )
                        .at(&at),
                    );
                }
                Some(_) => {}
                None if !record.is_group && record.type_name.is_none() => {
                    resolution.errors.push(
                        ConfigError::global(
                            ErrorKind::Declaration,
                            format!("The section '{}' must specify a type", record.config_key),
                        )
                        .at(&at),
                    );
                }
                None => {
                    tracing::debug!(section = %record.config_key, file = %file.name, "declared section");
                    resolution.factories.insert(record.config_key.clone(), record);
                }
            }
        }
    }
    resolution
}

/// Declarations written in one file, in document order.
fn file_declarations(file: &ConfigFile) -> (Vec<FactoryRecord>, Vec<ConfigError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    let Some(root) = file.root() else {
        return (records, errors);
    };

    let children = root.all_children();
    for (i, child) in children.iter().enumerate() {
        if child.name != CONFIG_SECTIONS {
            continue;
        }
        if i != 0 {
            errors.push(
                ConfigError::global(
                    ErrorKind::Structure,
                    format!("Only one <{}> element allowed per config file and if present must be the first child of the root <configuration> element", CONFIG_SECTIONS),
                )
                .at(&child.provenance),
            );
            continue;
        }
        collect_declarations(child, "", file.level, &mut records, &mut errors);
    }
    (records, errors)
}

fn collect_declarations(
    parent: &XmlElement,
    group: &str,
    level: usize,
    records: &mut Vec<FactoryRecord>,
    errors: &mut Vec<ConfigError>,
) {
    for el in parent.all_children() {
        match el.name.as_str() {
            "section" | "sectionGroup" => {
                let Some(name) = el.get_attribute("name").filter(|n| !n.trim().is_empty()) else {
                    errors.push(
                        ConfigError::global(ErrorKind::Declaration, "Required attribute 'name' not found")
                            .at(&el.provenance),
                    );
                    continue;
                };
                let config_key = if group.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", group, name)
                };
                if el.name == "section" {
                    match parse_section(el, config_key, group, level) {
                        Ok(record) => records.push(record),
                        Err(err) => errors.push(err),
                    }
                } else {
                    let mut record = FactoryRecord::group(config_key.clone(), name.to_string(), group.to_string());
                    record.type_name = el.get_attribute("type").map(str::to_string);
                    record.declared_in = Some(el.provenance.clone());
                    record.level = Some(level);
                    records.push(record);
                    collect_declarations(el, &config_key, level, records, errors);
                }
            }
            "remove" | "clear" => errors.push(
                ConfigError::global(
                    ErrorKind::Declaration,
                    format!("<{}> is not supported inside <{}>", el.name, CONFIG_SECTIONS),
                )
                .at(&el.provenance),
            ),
            other => errors.push(
                ConfigError::global(
                    ErrorKind::Declaration,
                    format!("Unrecognized element '{}'", other),
                )
                .at(&el.provenance),
            ),
        }
    }
}

fn parse_section(
    el: &XmlElement,
    config_key: String,
    group: &str,
    level: usize,
) -> Result<FactoryRecord, ConfigError> {
    let mut record = FactoryRecord::section(config_key, "");
    record.group = group.to_string();
    record.type_name = None;
    record.allow_exe_definition = AllowExeDefinition::default();
    record.declared_in = Some(el.provenance.clone());
    record.level = Some(level);

    for attr in &el.attributes {
        let invalid = || {
            ConfigError::global(
                ErrorKind::Declaration,
                format!("The value '{}' is not valid for the attribute '{}'", attr.value, attr.name),
            )
            .at(&attr.provenance)
        };
        match attr.name.as_str() {
            "name" => {}
            "type" => record.type_name = Some(attr.value.clone()),
            "allowLocation" => record.allow_location = parse_bool(&attr.value).ok_or_else(invalid)?,
            "allowDefinition" => {
                record.allow_definition = AllowDefinition::parse(&attr.value).ok_or_else(invalid)?
            }
            "allowExeDefinition" => {
                record.allow_exe_definition =
                    AllowExeDefinition::parse(&attr.value).ok_or_else(invalid)?
            }
            "overrideModeDefault" => {
                record.override_mode_default = OverrideMode::parse(&attr.value)
                    .filter(|m| *m != OverrideMode::Inherit)
                    .ok_or_else(invalid)?
            }
            "requirePermission" => record.require_permission = parse_bool(&attr.value).ok_or_else(invalid)?,
            "restartOnExternalChanges" => {
                record.restart_on_external_changes = parse_bool(&attr.value).ok_or_else(invalid)?
            }
            other => {
                return Err(ConfigError::global(
                    ErrorKind::Declaration,
                    format!("Unrecognized attribute '{}'", other),
                )
                .at(&attr.provenance));
            }
        }
    }
    Ok(record)
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

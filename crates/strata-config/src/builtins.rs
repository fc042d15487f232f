//! Section types every hierarchy knows.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::schema::{CollectionKind, CollectionSchema, ElementSchema, PropertyDef, SectionType};
use crate::value::SectionValue;

pub const APP_SETTINGS_TYPE: &str = "AppSettingsSection";
pub const CONNECTION_STRINGS_TYPE: &str = "ConnectionStringsSection";
pub const PROTECTED_CONFIGURATION_TYPE: &str = "ProtectedConfigurationSection";

/// Runtime object for `appSettings`: an ordered, read-only key/value map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSettings {
    values: IndexMap<String, String>,
}

impl AppSettings {
    pub fn from_section(section: &SectionValue) -> Self {
        let values = section
            .root
            .collection()
            .map(|c| {
                c.items()
                    .iter()
                    .map(|item| (item.key.clone(), item.value.get_text("value").unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn app_settings() -> SectionType {
    let item = ElementSchema::new()
        .with_property(PropertyDef::text("key").key().required())
        .with_property(PropertyDef::text("value").default_text(""));
    let schema = ElementSchema::new()
        .with_property(PropertyDef::text("file").default_text(""))
        .with_collection(CollectionSchema::new(CollectionKind::AddRemoveClearMap, item).allow_duplicates());
    SectionType::new(APP_SETTINGS_TYPE, schema)
        .with_runtime(|value| Arc::new(AppSettings::from_section(value)))
}

pub fn connection_strings() -> SectionType {
    let item = ElementSchema::new()
        .with_property(PropertyDef::text("name").key().required())
        .with_property(PropertyDef::text("connectionString").required())
        .with_property(PropertyDef::text("providerName").default_text(""));
    let schema = ElementSchema::new()
        .with_collection(CollectionSchema::new(CollectionKind::AddRemoveClearMap, item));
    SectionType::new(CONNECTION_STRINGS_TYPE, schema)
}

pub fn protected_configuration() -> SectionType {
    let provider = ElementSchema::new()
        .with_property(PropertyDef::text("name").key().required())
        .with_property(PropertyDef::text("type").required());
    let schema = ElementSchema::new()
        .with_property(PropertyDef::text("defaultProvider").default_text(""))
        .with_element(
            "providers",
            ElementSchema::new()
                .with_collection(CollectionSchema::new(CollectionKind::AddRemoveClearMap, provider)),
        );
    SectionType::new(PROTECTED_CONFIGURATION_TYPE, schema)
}

pub(crate) fn section_types() -> Vec<SectionType> {
    vec![app_settings(), connection_strings(), protected_configuration()]
}

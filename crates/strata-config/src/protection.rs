//! Encrypted sections.
//!
//! A protected definition carries `configProtectionProvider="name"` and a
//! single `<EncryptedData>` child. The name resolves through the merged
//! `configProtectedData` section to a provider type, and the type to a
//! [`ProtectionProvider`] registered by the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use strata_xml::XmlElement;
use thiserror::Error;

use crate::errors::{ConfigError, ErrorKind};
use crate::merge::config_key_tag;
use crate::section::PROTECTION_PROVIDER;
use crate::value::ElementValue;

pub const PROTECTED_DATA_SECTION: &str = "configProtectedData";
pub const ENCRYPTED_DATA: &str = "EncryptedData";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProtectionError {
    pub message: String,
}

impl ProtectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Encrypts and decrypts section XML.
pub trait ProtectionProvider: Send + Sync {
    /// Decrypt an `<EncryptedData>` element into the section's XML text.
    fn decrypt(&self, encrypted: &XmlElement) -> Result<String, ProtectionError>;

    /// Encrypt section XML text into `<EncryptedData>` XML text.
    fn encrypt(&self, section_xml: &str) -> Result<String, ProtectionError>;
}

/// Provider implementations by type name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProtectionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, provider: Arc<dyn ProtectionProvider>) {
        self.providers.insert(type_name.into(), provider);
    }

    pub fn with_provider(mut self, type_name: impl Into<String>, provider: Arc<dyn ProtectionProvider>) -> Self {
        self.register(type_name, provider);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ProtectionProvider>> {
        self.providers.get(type_name).cloned()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry").field("providers", &names).finish()
    }
}

/// Provider settings read from a merged `configProtectedData` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedDataSettings {
    pub default_provider: Option<String>,
    /// Provider name to type name.
    pub providers: IndexMap<String, String>,
}

impl ProtectedDataSettings {
    pub fn from_value(root: &ElementValue) -> Self {
        let default_provider = root
            .get_text("defaultProvider")
            .filter(|s| !s.is_empty());
        let providers = root
            .element("providers")
            .and_then(ElementValue::collection)
            .map(|c| {
                c.items()
                    .iter()
                    .filter_map(|item| Some((item.key.clone(), item.value.get_text("type")?)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            default_provider,
            providers,
        }
    }

    /// Find the provider for `name` (or the default provider when empty).
    pub fn resolve(
        &self,
        name: &str,
        registry: &ProviderRegistry,
    ) -> Result<Arc<dyn ProtectionProvider>, ConfigError> {
        let name = if name.is_empty() {
            self.default_provider.as_deref().unwrap_or_default()
        } else {
            name
        };
        let not_found = || {
            ConfigError::local(
                ErrorKind::Protection,
                format!("The protection provider '{}' was not found", name),
            )
        };
        let type_name = self.providers.get(name).ok_or_else(not_found)?;
        registry.get(type_name).ok_or_else(not_found)
    }
}

/// Decrypt a protected definition into the plain section element.
pub fn decrypt_section(
    config_key: &str,
    protected: &XmlElement,
    provider: &dyn ProtectionProvider,
) -> Result<XmlElement, ConfigError> {
    let error = |message: String| {
        ConfigError::local(ErrorKind::Protection, message)
            .at(&protected.provenance)
            .for_section(config_key)
    };
    let encrypted = protected
        .get_child(ENCRYPTED_DATA)
        .ok_or_else(|| error(format!("The protected section '{}' has no <{}> element", config_key, ENCRYPTED_DATA)))?;
    let text = provider
        .decrypt(encrypted)
        .map_err(|e| error(format!("Failed to decrypt using provider: {}", e)))?;
    let doc = strata_xml::parse_file(&text, &protected.provenance.file)
        .map_err(|e| error(format!("The decrypted section is not valid XML: {}", e)))?;

    let tag = config_key_tag(config_key);
    if doc.root.name != tag {
        return Err(error(format!(
            "The decrypted section root must be <{}>, found <{}>",
            tag, doc.root.name
        )));
    }
    Ok(doc.root)
}

/// Encrypt a plain section element into its protected form.
pub fn encrypt_section(
    section: &XmlElement,
    provider_name: &str,
    provider: &dyn ProtectionProvider,
) -> Result<XmlElement, ConfigError> {
    let error = |message: String| ConfigError::local(ErrorKind::Protection, message);
    let ciphertext = provider
        .encrypt(&section.to_xml_string())
        .map_err(|e| error(format!("Failed to encrypt using provider '{}': {}", provider_name, e)))?;
    let encrypted = strata_xml::parse(&ciphertext)
        .map_err(|e| error(format!("The provider returned invalid XML: {}", e)))?;
    Ok(XmlElement::build(section.name.clone())
        .with_attribute(PROTECTION_PROVIDER, provider_name)
        .with_child(encrypted.root))
}

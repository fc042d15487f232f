//! Merged configuration values with per-value origin and lock state.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use strata_xml::Provenance;

use crate::errors::{ConfigError, ErrorKind};
use crate::locks::{ItemLock, LOCK_ALL, LockList};
use crate::schema::{CollectionKind, CollectionSchema, ElementSchema, PropertyDef, ScalarValue};

/// Where a value's current setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueOrigin {
    /// Schema default; no level set it.
    Default,
    /// Set at an ancestor level.
    Inherited,
    /// Set at the level being viewed.
    SetHere,
}

/// One attribute property after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    pub value: Option<ScalarValue>,
    /// Attribute text that failed conversion; written back unchanged.
    pub raw: Option<String>,
    pub origin: ValueOrigin,
    /// The value differs from the schema default.
    pub modified: bool,
    /// An ancestor locked this attribute.
    pub locked: bool,
    /// Locked because an ancestor locked the element holding it.
    pub xml_parent_inherited: bool,
    /// Changed through the editing API.
    pub dirty: bool,
    pub source: Option<Provenance>,
}

impl ConfigValue {
    pub(crate) fn default_for(def: &PropertyDef) -> Self {
        Self {
            value: def.default.clone(),
            raw: None,
            origin: ValueOrigin::Default,
            modified: false,
            locked: false,
            xml_parent_inherited: false,
            dirty: false,
            source: None,
        }
    }

    pub fn inherited(&self) -> bool {
        self.origin == ValueOrigin::Inherited
    }

    /// Text to write for this value: the raw text if conversion failed.
    pub fn text(&self) -> Option<String> {
        match (&self.raw, &self.value) {
            (Some(raw), _) => Some(raw.clone()),
            (None, Some(value)) => Some(value.to_string()),
            (None, None) => None,
        }
    }

    pub(crate) fn same_value(&self, other: &ConfigValue) -> bool {
        self.value == other.value && self.raw == other.raw
    }
}

/// A merged element: attributes, child elements, an optional collection and
/// the lock lists in effect.
#[derive(Debug, Clone)]
pub struct ElementValue {
    pub(crate) name: String,
    pub(crate) schema: Arc<ElementSchema>,
    pub(crate) properties: IndexMap<String, ConfigValue>,
    pub(crate) elements: IndexMap<String, ElementValue>,
    pub(crate) collection: Option<CollectionValue>,
    pub(crate) attribute_locks: LockList,
    pub(crate) element_locks: LockList,
    pub(crate) item_lock: ItemLock,
    /// Appeared in the XML of some level.
    pub(crate) present: bool,
    /// An ancestor locked this element (element lock or `lockItem`).
    pub(crate) locked_by_parent: bool,
    pub(crate) dirty: bool,
    pub(crate) source: Option<Provenance>,
}

impl ElementValue {
    /// A value holding only schema defaults.
    pub fn from_schema(name: impl Into<String>, schema: Arc<ElementSchema>) -> Self {
        let properties = schema
            .properties()
            .iter()
            .map(|def| (def.name.clone(), ConfigValue::default_for(def)))
            .collect();
        let elements = schema
            .elements()
            .iter()
            .map(|child| {
                (
                    child.name.clone(),
                    ElementValue::from_schema(child.name.clone(), child.schema.clone()),
                )
            })
            .collect();
        let collection = schema.collection().cloned().map(CollectionValue::new);

        Self {
            name: name.into(),
            schema,
            properties,
            elements,
            collection,
            attribute_locks: LockList::new(),
            element_locks: LockList::new(),
            item_lock: ItemLock::default(),
            present: false,
            locked_by_parent: false,
            dirty: false,
            source: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<ElementSchema> {
        &self.schema
    }

    pub fn property(&self, name: &str) -> Option<&ConfigValue> {
        self.properties.get(name)
    }

    /// The converted value of an attribute property.
    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.properties.get(name).and_then(|p| p.value.as_ref())
    }

    /// The value of a property as written in XML.
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.properties.get(name).and_then(ConfigValue::text)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn element(&self, name: &str) -> Option<&ElementValue> {
        self.elements.get(name)
    }

    pub fn elements(&self) -> impl Iterator<Item = (&str, &ElementValue)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn collection(&self) -> Option<&CollectionValue> {
        self.collection.as_ref()
    }

    pub fn attribute_locks(&self) -> &LockList {
        &self.attribute_locks
    }

    pub fn element_locks(&self) -> &LockList {
        &self.element_locks
    }

    /// Attributes locked for levels below the one being viewed.
    pub fn locked_attributes(&self) -> Vec<String> {
        self.attribute_locks
            .locked_names(self.properties.keys().map(String::as_str))
    }

    pub fn is_item_locked(&self) -> bool {
        self.item_lock.locked
    }

    pub fn is_locked_by_parent(&self) -> bool {
        self.locked_by_parent || self.item_lock.locked_by_parent()
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn source(&self) -> Option<&Provenance> {
        self.source.as_ref()
    }

    /// Whether this element or anything under it was edited.
    pub fn is_dirty(&self) -> bool {
        self.dirty
            || self.properties.values().any(|p| p.dirty)
            || self.elements.values().any(ElementValue::is_dirty)
            || self.collection.as_ref().is_some_and(CollectionValue::is_dirty)
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
        for prop in self.properties.values_mut() {
            prop.dirty = false;
        }
        for child in self.elements.values_mut() {
            child.clear_dirty();
        }
        if let Some(collection) = &mut self.collection {
            collection.dirty = false;
            for item in &mut collection.items {
                item.value.clear_dirty();
            }
        }
    }

    /// Compare merged values only, ignoring origins, flags and locks.
    pub fn value_eq(&self, other: &ElementValue) -> bool {
        self.properties.len() == other.properties.len()
            && self.properties.iter().all(|(name, prop)| {
                other
                    .properties
                    .get(name)
                    .is_some_and(|o| prop.same_value(o))
            })
            && self.elements.len() == other.elements.len()
            && self.elements.iter().all(|(name, child)| {
                other
                    .elements
                    .get(name)
                    .is_some_and(|o| child.value_eq(o))
            })
            && match (&self.collection, &other.collection) {
                (Some(a), Some(b)) => a.value_eq(b),
                (None, None) => true,
                _ => false,
            }
    }

    /// Key of this element as a collection item: key properties joined by `,`.
    pub fn item_key(&self) -> String {
        self.schema
            .key_properties()
            .map(|def| self.get_text(&def.name).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Validate names for an attribute lock list.
    pub(crate) fn check_attribute_lock_names(
        &self,
        names: &[String],
        exclusion: bool,
    ) -> Result<(), String> {
        for name in names {
            if name == LOCK_ALL && !exclusion {
                continue;
            }
            match self.schema.property(name) {
                None => {
                    return Err(format!(
                        "The attribute '{}' is not valid in the locked list for this section",
                        name
                    ));
                }
                Some(def) if def.is_required && !exclusion => {
                    return Err(format!(
                        "The attribute '{}' is required and cannot be locked",
                        name
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Validate names for an element lock list.
    pub(crate) fn check_element_lock_names(
        &self,
        names: &[String],
        exclusion: bool,
    ) -> Result<(), String> {
        for name in names {
            if (name == LOCK_ALL && !exclusion) || self.schema.is_lockable_element(name) {
                continue;
            }
            return Err(format!(
                "The element '{}' is not valid in the locked list for this section",
                name
            ));
        }
        Ok(())
    }

    // --- editing ---------------------------------------------------------

    /// Set an attribute from text, as if this level wrote it.
    pub fn set(&mut self, name: &str, text: &str) -> Result<(), ConfigError> {
        let def = self.schema.property(name).cloned().ok_or_else(|| {
            ConfigError::local(
                ErrorKind::UnrecognizedAttribute,
                format!("Unrecognized attribute '{}'", name),
            )
        })?;
        self.check_editable()?;
        let prop = self
            .properties
            .entry(def.name.clone())
            .or_insert_with(|| ConfigValue::default_for(&def));
        if prop.locked {
            return Err(locked_attribute_error(name));
        }
        let value = def.convert(text).map_err(|msg| invalid_value_error(name, &msg))?;
        prop.modified = def.default.as_ref() != Some(&value);
        prop.value = Some(value);
        prop.raw = None;
        prop.origin = ValueOrigin::SetHere;
        prop.dirty = true;
        Ok(())
    }

    /// Mutable access to a child element.
    pub fn element_mut(&mut self, name: &str) -> Result<&mut ElementValue, ConfigError> {
        let child = self.elements.get_mut(name).ok_or_else(|| {
            ConfigError::local(
                ErrorKind::UnrecognizedElement,
                format!("Unrecognized element '{}'", name),
            )
        })?;
        if child.is_locked_by_parent() {
            return Err(locked_element_error(name));
        }
        Ok(child)
    }

    /// Add (or replace) a collection item from attribute pairs.
    pub fn add_item(&mut self, attributes: &[(&str, &str)]) -> Result<(), ConfigError> {
        self.check_editable()?;
        let add_name = self.collection_schema()?.add_name.clone();
        self.check_verb(&add_name)?;

        let mut el = strata_xml::XmlElement::build(add_name);
        for (name, value) in attributes {
            el.set_attribute(*name, *value);
        }

        let mut errors = Vec::new();
        let mut ctx = crate::merge::ApplyContext::new(&mut errors, "", ValueOrigin::SetHere);
        ctx.editing = true;
        if let Some(collection) = &mut self.collection {
            collection.apply_add(&el, &mut ctx);
            collection.dirty = true;
        }
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove a collection item by key. Returns whether an item was removed.
    pub fn remove_item(&mut self, key: &str) -> Result<bool, ConfigError> {
        self.check_editable()?;
        let verb = self.collection_schema()?.remove_name.clone();
        if !self.collection_schema()?.kind.supports_remove_and_clear() {
            return Err(ConfigError::local(
                ErrorKind::Collection,
                "This collection does not support removing items",
            ));
        }
        self.check_verb(&verb)?;
        let Some(collection) = &mut self.collection else {
            return Ok(false);
        };
        collection.remove_key(key)
    }

    /// Remove every collection item.
    pub fn clear_items(&mut self) -> Result<(), ConfigError> {
        self.check_editable()?;
        let verb = self.collection_schema()?.clear_name.clone();
        if !self.collection_schema()?.kind.supports_remove_and_clear() {
            return Err(ConfigError::local(
                ErrorKind::Collection,
                "This collection does not support clearing",
            ));
        }
        self.check_verb(&verb)?;
        match &mut self.collection {
            Some(collection) => collection.clear_all(),
            None => Ok(()),
        }
    }

    /// Mutable access to the collection item with `key`.
    pub fn item_mut(&mut self, key: &str) -> Result<&mut ElementValue, ConfigError> {
        let collection = self.collection.as_mut().ok_or_else(no_collection_error)?;
        let item = collection
            .items
            .iter_mut()
            .find(|i| i.key == key)
            .ok_or_else(|| {
                ConfigError::local(
                    ErrorKind::Collection,
                    format!("The entry '{}' does not exist", key),
                )
            })?;
        if item.value.is_locked_by_parent() {
            return Err(locked_entry_error(key));
        }
        item.origin = ValueOrigin::SetHere;
        collection.dirty = true;
        Ok(&mut item.value)
    }

    pub fn lock_attributes(&mut self, names: &[&str]) -> Result<(), ConfigError> {
        let names = owned(names);
        self.check_attribute_lock_names(&names, false)
            .map_err(lock_list_error)?;
        self.attribute_locks.add_inclusion(names);
        self.dirty = true;
        Ok(())
    }

    pub fn lock_all_attributes_except(&mut self, names: &[&str]) -> Result<(), ConfigError> {
        let names = owned(names);
        self.check_attribute_lock_names(&names, true)
            .map_err(lock_list_error)?;
        self.attribute_locks.add_exclusion(names);
        self.dirty = true;
        Ok(())
    }

    pub fn lock_elements(&mut self, names: &[&str]) -> Result<(), ConfigError> {
        let names = owned(names);
        self.check_element_lock_names(&names, false)
            .map_err(lock_list_error)?;
        self.element_locks.add_inclusion(names);
        self.dirty = true;
        Ok(())
    }

    pub fn lock_all_elements_except(&mut self, names: &[&str]) -> Result<(), ConfigError> {
        let names = owned(names);
        self.check_element_lock_names(&names, true)
            .map_err(lock_list_error)?;
        self.element_locks.add_exclusion(names);
        self.dirty = true;
        Ok(())
    }

    /// Lock or unlock this element for descendants (`lockItem`).
    pub fn set_item_lock(&mut self, locked: bool) -> Result<(), ConfigError> {
        if self.item_lock.locked_by_parent() {
            return Err(locked_element_error(&self.name));
        }
        self.item_lock.locked = locked;
        self.dirty = true;
        Ok(())
    }

    fn check_editable(&self) -> Result<(), ConfigError> {
        if self.is_locked_by_parent() {
            Err(locked_element_error(&self.name))
        } else {
            Ok(())
        }
    }

    fn check_verb(&self, verb: &str) -> Result<(), ConfigError> {
        if self.element_locks.is_locked_by_parent(verb) {
            Err(locked_element_error(verb))
        } else {
            Ok(())
        }
    }

    fn collection_schema(&self) -> Result<&CollectionSchema, ConfigError> {
        self.collection
            .as_ref()
            .map(|c| &c.schema)
            .ok_or_else(no_collection_error)
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn locked_attribute_error(name: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::Locked,
        format!(
            "The attribute '{}' has been locked in a higher level configuration",
            name
        ),
    )
}

pub(crate) fn locked_element_error(name: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::Locked,
        format!(
            "The element '{}' has been locked in a higher level configuration",
            name
        ),
    )
}

pub(crate) fn locked_entry_error(key: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::Locked,
        format!(
            "The entry '{}' has been locked in a higher level configuration",
            key
        ),
    )
}

pub(crate) fn invalid_value_error(name: &str, message: &str) -> ConfigError {
    ConfigError::local(
        ErrorKind::InvalidValue,
        format!(
            "The value of the property '{}' cannot be parsed. The error is: {}",
            name, message
        ),
    )
}

fn lock_list_error(message: String) -> ConfigError {
    ConfigError::local(ErrorKind::LockList, message)
}

fn no_collection_error() -> ConfigError {
    ConfigError::local(ErrorKind::Collection, "This element has no collection")
}

/// One keyed collection item.
#[derive(Debug, Clone)]
pub struct CollectionItem {
    pub key: String,
    pub value: ElementValue,
    pub origin: ValueOrigin,
}

/// Merged items of a collection, in effective order.
#[derive(Debug, Clone)]
pub struct CollectionValue {
    pub(crate) schema: CollectionSchema,
    pub(crate) items: Vec<CollectionItem>,
    /// `<clear/>` appeared at the current level.
    pub(crate) cleared_here: bool,
    /// Insert position for items added at the current level (alternate maps).
    pub(crate) local_insert: usize,
    /// Keys added at the current level.
    pub(crate) added_here: HashSet<String>,
    pub(crate) dirty: bool,
}

impl CollectionValue {
    pub(crate) fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            items: Vec::new(),
            cleared_here: false,
            local_insert: 0,
            added_here: HashSet::new(),
            dirty: false,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.schema.kind
    }

    pub fn items(&self) -> &[CollectionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&ElementValue> {
        self.items.iter().find(|i| i.key == key).map(|i| &i.value)
    }

    pub fn was_cleared_here(&self) -> bool {
        self.cleared_here
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.items.iter().any(|i| i.value.is_dirty())
    }

    pub(crate) fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|i| i.key == key)
    }

    pub(crate) fn value_eq(&self, other: &CollectionValue) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.key == b.key && a.value.value_eq(&b.value))
    }

    pub(crate) fn remove_key(&mut self, key: &str) -> Result<bool, ConfigError> {
        let Some(idx) = self.position(key) else {
            return Ok(false);
        };
        if self.items[idx].value.is_locked_by_parent() {
            return Err(locked_entry_error(key));
        }
        self.items.remove(idx);
        if idx < self.local_insert {
            self.local_insert -= 1;
        }
        self.added_here.remove(key);
        self.dirty = true;
        Ok(true)
    }

    pub(crate) fn clear_all(&mut self) -> Result<(), ConfigError> {
        if let Some(locked) = self.items.iter().find(|i| i.value.is_locked_by_parent()) {
            return Err(locked_entry_error(&locked.key));
        }
        self.items.clear();
        self.cleared_here = true;
        self.local_insert = 0;
        self.added_here.clear();
        self.dirty = true;
        Ok(())
    }
}

/// The merged value of one section at one config path.
#[derive(Debug, Clone)]
pub struct SectionValue {
    pub config_key: String,
    pub root: ElementValue,
    /// Definitions that contributed, root first.
    pub sources: Vec<Provenance>,
}

impl SectionValue {
    pub fn new(config_key: impl Into<String>, root: ElementValue) -> Self {
        Self {
            config_key: config_key.into(),
            root,
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, PropertyDef, ValueKind};

    fn schema() -> Arc<ElementSchema> {
        Arc::new(
            ElementSchema::new()
                .with_property(PropertyDef::text("name").required())
                .with_property(
                    PropertyDef::new("size", ValueKind::Integer { min: 0, max: 100 })
                        .default_text("10"),
                )
                .with_element(
                    "child",
                    ElementSchema::new().with_property(PropertyDef::boolean("on")),
                )
                .with_collection(CollectionSchema::new(
                    CollectionKind::AddRemoveClearMap,
                    ElementSchema::new()
                        .with_property(PropertyDef::text("key").key().required())
                        .with_property(PropertyDef::text("value")),
                )),
        )
    }

    #[test]
    fn test_defaults() {
        let value = ElementValue::from_schema("section", schema());
        assert_eq!(value.get("size"), Some(&ScalarValue::Integer(10)));
        assert_eq!(value.property("size").unwrap().origin, ValueOrigin::Default);
        assert_eq!(value.get("name"), None);
        assert!(value.element("child").is_some());
        assert!(value.collection().unwrap().is_empty());
        assert!(!value.is_dirty());
    }

    #[test]
    fn test_set_marks_dirty_and_modified() {
        let mut value = ElementValue::from_schema("section", schema());
        value.set("size", "10").unwrap();
        let prop = value.property("size").unwrap();
        assert!(prop.dirty);
        assert!(!prop.modified);
        assert_eq!(prop.origin, ValueOrigin::SetHere);

        value.set("size", "11").unwrap();
        assert!(value.property("size").unwrap().modified);
        assert!(value.is_dirty());
    }

    #[test]
    fn test_set_rejects_bad_values_and_names() {
        let mut value = ElementValue::from_schema("section", schema());
        assert_eq!(value.set("size", "500").unwrap_err().kind, ErrorKind::InvalidValue);
        assert_eq!(
            value.set("nope", "1").unwrap_err().kind,
            ErrorKind::UnrecognizedAttribute
        );
    }

    #[test]
    fn test_lock_names_are_validated() {
        let mut value = ElementValue::from_schema("section", schema());
        assert!(value.lock_attributes(&["size"]).is_ok());
        assert_eq!(
            value.lock_attributes(&["name"]).unwrap_err().kind,
            ErrorKind::LockList
        );
        assert!(value.lock_elements(&["child", "add", "clear"]).is_ok());
        assert!(value.lock_elements(&["other"]).is_err());
        assert_eq!(value.locked_attributes(), ["size"]);
    }

    #[test]
    fn test_collection_edits() {
        let mut value = ElementValue::from_schema("section", schema());
        value.add_item(&[("key", "a"), ("value", "1")]).unwrap();
        value.add_item(&[("key", "b"), ("value", "2")]).unwrap();
        assert_eq!(value.collection().unwrap().keys(), ["a", "b"]);

        value.item_mut("a").unwrap().set("value", "9").unwrap();
        assert_eq!(
            value.collection().unwrap().get("a").unwrap().get_text("value").as_deref(),
            Some("9")
        );

        assert!(value.remove_item("a").unwrap());
        assert!(!value.remove_item("zzz").unwrap());
        value.clear_items().unwrap();
        assert!(value.collection().unwrap().is_empty());
        assert!(value.collection().unwrap().was_cleared_here());
    }

    #[test]
    fn test_add_item_requires_key() {
        let mut value = ElementValue::from_schema("section", schema());
        let err = value.add_item(&[("value", "1")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Collection);
    }

    #[test]
    fn test_value_eq_ignores_origin() {
        let mut a = ElementValue::from_schema("section", schema());
        let b = ElementValue::from_schema("section", schema());
        a.set("size", "10").unwrap();
        assert!(a.value_eq(&b));
        a.set("size", "12").unwrap();
        assert!(!a.value_eq(&b));
    }
}

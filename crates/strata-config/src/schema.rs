//! Section schemas: typed properties, child elements and collections.
//!
//! A section type is described once, as data, and registered in a
//! [`SchemaRegistry`] that is passed by reference into the engine.
//!
//! ```rust
//! use strata_config::{ElementSchema, PropertyDef, SchemaRegistry, SectionType, ValueKind};
//!
//! let schema = ElementSchema::new()
//!     .with_property(PropertyDef::text("endpoint").required())
//!     .with_property(PropertyDef::new("retries", ValueKind::Integer { min: 0, max: 10 }).default_text("3"));
//!
//! let mut registry = SchemaRegistry::with_builtins();
//! registry.register(SectionType::new("ClientSection", schema));
//! assert!(registry.get("ClientSection").is_some());
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::value::SectionValue;

/// A converted attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Duration(Duration),
}

impl ScalarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScalarValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ScalarValue::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Text(s) => f.write_str(s),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Boolean(b) => write!(f, "{}", b),
            ScalarValue::Duration(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// How attribute text converts to a [`ScalarValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    /// Inclusive range.
    Integer { min: i64, max: i64 },
    /// `true` / `false`, case-insensitive.
    Boolean,
    /// One of a fixed set of words, matched case-insensitively and stored as declared.
    Choice(Vec<String>),
    /// `[d.]hh:mm[:ss[.fffffff]]`, or a whole number of days.
    Duration,
}

impl ValueKind {
    pub fn choice<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueKind::Choice(options.into_iter().map(Into::into).collect())
    }

    /// Convert attribute text, returning a message on failure.
    pub fn parse(&self, text: &str) -> Result<ScalarValue, String> {
        match self {
            ValueKind::Text => Ok(ScalarValue::Text(text.to_string())),
            ValueKind::Integer { min, max } => {
                let value: i64 = text
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid integer", text))?;
                if value < *min || value > *max {
                    return Err(format!(
                        "The value must be inside the range {}-{}",
                        min, max
                    ));
                }
                Ok(ScalarValue::Integer(value))
            }
            ValueKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ScalarValue::Boolean(true)),
                "false" => Ok(ScalarValue::Boolean(false)),
                _ => Err(format!("'{}' is not a valid boolean", text)),
            },
            ValueKind::Choice(options) => options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(text.trim()))
                .map(|o| ScalarValue::Text(o.clone()))
                .ok_or_else(|| {
                    format!(
                        "The value '{}' is not valid. Valid values are: {}",
                        text,
                        options.join(", ")
                    )
                }),
            ValueKind::Duration => parse_duration(text)
                .map(ScalarValue::Duration)
                .ok_or_else(|| format!("'{}' is not a valid time span", text)),
        }
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let days: u64 = text.parse().ok()?;
        return Some(Duration::from_secs(days.checked_mul(86_400)?));
    }

    let (days, clock) = match text.split_once('.') {
        Some((d, rest)) if !d.contains(':') => (d.parse::<u64>().ok()?, rest),
        _ => (0, text),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    let (seconds, nanos) = match parts.get(2) {
        None => (0, 0),
        Some(s) => match s.split_once('.') {
            Some((whole, frac)) => {
                if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let padded = format!("{:0<9}", frac);
                (whole.parse::<u64>().ok()?, padded.parse::<u32>().ok()?)
            }
            None => (s.parse::<u64>().ok()?, 0),
        },
    };
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }
    let secs = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)?;
    Some(Duration::new(secs, nanos))
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if d.subsec_nanos() > 0 {
        // 100ns ticks
        out.push_str(&format!(".{:07}", d.subsec_nanos() / 100));
    }
    out
}

/// Extra check applied after conversion.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(&ScalarValue) -> Result<(), String> + Send + Sync>);

impl Validator {
    pub fn new(f: impl Fn(&ScalarValue) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Validator(Arc::new(f))
    }

    pub fn check(&self, value: &ScalarValue) -> Result<(), String> {
        (self.0)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

/// One attribute property of an element.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub kind: ValueKind,
    pub default: Option<ScalarValue>,
    pub is_key: bool,
    pub is_required: bool,
    pub validator: Option<Validator>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            is_key: false,
            is_required: false,
            validator: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ValueKind::Integer {
                min: i64::MIN,
                max: i64::MAX,
            },
        )
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn with_default(mut self, value: ScalarValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Set the default from text; text the kind rejects leaves no default.
    pub fn default_text(mut self, text: &str) -> Self {
        self.default = self.kind.parse(text).ok();
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Convert and validate attribute text for this property.
    pub fn convert(&self, text: &str) -> Result<ScalarValue, String> {
        let value = self.kind.parse(text)?;
        if let Some(validator) = &self.validator {
            validator.check(&value)?;
        }
        Ok(value)
    }
}

/// How a collection combines items across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// `<add>`, `<remove>`, `<clear/>`; a re-added key keeps its position.
    AddRemoveClearMap,
    /// Like `AddRemoveClearMap`, but items added at a level come before inherited ones.
    AddRemoveClearMapAlternate,
    /// `<add>` only; a re-added key keeps its position.
    BasicMap,
}

impl CollectionKind {
    pub fn supports_remove_and_clear(self) -> bool {
        !matches!(self, CollectionKind::BasicMap)
    }
}

/// Collection of keyed items nested directly inside an element.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub kind: CollectionKind,
    pub item: Arc<ElementSchema>,
    pub add_name: String,
    pub remove_name: String,
    pub clear_name: String,
    /// Reject a second `<add>` of one key within one level.
    pub throw_on_duplicate: bool,
}

impl CollectionSchema {
    pub fn new(kind: CollectionKind, item: ElementSchema) -> Self {
        Self {
            kind,
            item: Arc::new(item),
            add_name: "add".to_string(),
            remove_name: "remove".to_string(),
            clear_name: "clear".to_string(),
            throw_on_duplicate: true,
        }
    }

    pub fn allow_duplicates(mut self) -> Self {
        self.throw_on_duplicate = false;
        self
    }

    pub fn with_add_name(mut self, name: impl Into<String>) -> Self {
        self.add_name = name.into();
        self
    }

    /// Element names that act on the collection at this kind.
    pub fn verbs(&self) -> Vec<&str> {
        if self.kind.supports_remove_and_clear() {
            vec![
                self.add_name.as_str(),
                self.remove_name.as_str(),
                self.clear_name.as_str(),
            ]
        } else {
            vec![self.add_name.as_str()]
        }
    }
}

/// A child element property.
#[derive(Debug, Clone)]
pub struct ChildElementDef {
    pub name: String,
    pub schema: Arc<ElementSchema>,
}

/// The shape of one element: attributes, child elements and an optional
/// default collection.
#[derive(Debug, Clone, Default)]
pub struct ElementSchema {
    properties: Vec<PropertyDef>,
    elements: Vec<ChildElementDef>,
    collection: Option<CollectionSchema>,
}

impl ElementSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.retain(|p| p.name != property.name);
        self.properties.push(property);
        self
    }

    pub fn with_element(mut self, name: impl Into<String>, schema: ElementSchema) -> Self {
        let name = name.into();
        self.elements.retain(|e| e.name != name);
        self.elements.push(ChildElementDef {
            name,
            schema: Arc::new(schema),
        });
        self
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Attribute properties, in declaration order.
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn elements(&self) -> &[ChildElementDef] {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&ChildElementDef> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn collection(&self) -> Option<&CollectionSchema> {
        self.collection.as_ref()
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_key)
    }

    /// Whether `name` can be named in an element lock list.
    pub fn is_lockable_element(&self, name: &str) -> bool {
        self.element(name).is_some()
            || self
                .collection
                .as_ref()
                .is_some_and(|c| c.verbs().contains(&name))
    }
}

/// Builds the object handed out by `get_section`.
pub type RuntimeFactory =
    Arc<dyn Fn(&Arc<SectionValue>) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// A registered section type.
#[derive(Clone)]
pub struct SectionType {
    pub type_name: String,
    pub schema: Arc<ElementSchema>,
    runtime: Option<RuntimeFactory>,
}

impl SectionType {
    pub fn new(type_name: impl Into<String>, schema: ElementSchema) -> Self {
        Self {
            type_name: type_name.into(),
            schema: Arc::new(schema),
            runtime: None,
        }
    }

    pub fn with_runtime(
        mut self,
        factory: impl Fn(&Arc<SectionValue>) -> Arc<dyn Any + Send + Sync> + Send + Sync + 'static,
    ) -> Self {
        self.runtime = Some(Arc::new(factory));
        self
    }

    /// The runtime object for a merged value; without a hook, the value itself.
    pub fn create_runtime(&self, value: &Arc<SectionValue>) -> Arc<dyn Any + Send + Sync> {
        match &self.runtime {
            Some(factory) => factory(value),
            None => Arc::clone(value) as Arc<dyn Any + Send + Sync>,
        }
    }
}

impl fmt::Debug for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionType")
            .field("type_name", &self.type_name)
            .field("schema", &self.schema)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Section types by type name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, SectionType>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `appSettings`, `connectionStrings` and
    /// `configProtectedData` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for section_type in crate::builtins::section_types() {
            registry.register(section_type);
        }
        registry
    }

    pub fn register(&mut self, section_type: SectionType) {
        self.types
            .insert(section_type.type_name.clone(), section_type);
    }

    pub fn get(&self, type_name: &str) -> Option<&SectionType> {
        self.types.get(type_name)
    }
}

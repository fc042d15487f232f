//! Folding section XML from root to leaf into one [`ElementValue`].
//!
//! Each input is one level. Before a level is applied, everything merged so
//! far becomes inherited and every lock becomes parent-defined; then the
//! level's XML is applied on top, subject to those locks.

use std::collections::HashSet;
use std::sync::Arc;

use strata_xml::{Provenance, XmlElement};

use crate::errors::{ConfigError, ErrorKind};
use crate::locks::{
    LOCK_ALL_ATTRIBUTES_EXCEPT, LOCK_ALL_ELEMENTS_EXCEPT, LOCK_ATTRIBUTES, LOCK_ELEMENTS,
    LOCK_ITEM, is_lock_keyword, parse_lock_list,
};
use crate::schema::{CollectionKind, ElementSchema};
use crate::value::{
    CollectionItem, CollectionValue, ElementValue, ValueOrigin, invalid_value_error,
    locked_attribute_error, locked_element_error, locked_entry_error,
};

/// Attributes of a section element that the engine consumes itself.
pub(crate) const SECTION_ROOT_ATTRIBUTES: &[&str] = &["configSource", "configProtectionProvider"];

/// One level's definition of a section.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub element: &'a XmlElement,
    /// Depth of the config path the definition applies to.
    pub depth: usize,
}

/// Result of [`merge`]: the value is usable even when errors were recorded.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub value: ElementValue,
    pub errors: Vec<ConfigError>,
}

/// Merge `inputs` (root first) as seen from a config path of `query_depth`.
///
/// Values from inputs at `query_depth` are [`ValueOrigin::SetHere`]; values
/// from shallower inputs are [`ValueOrigin::Inherited`].
pub fn merge(
    config_key: &str,
    schema: &Arc<ElementSchema>,
    inputs: &[MergeInput<'_>],
    query_depth: usize,
) -> MergeOutcome {
    let mut value = ElementValue::from_schema(config_key_tag(config_key), schema.clone());
    let mut errors = Vec::new();

    for input in inputs {
        value.begin_level();
        let origin = if input.depth >= query_depth {
            ValueOrigin::SetHere
        } else {
            ValueOrigin::Inherited
        };
        let mut ctx = ApplyContext::new(&mut errors, config_key, origin);
        value.apply_xml(input.element, &mut ctx, true);
    }
    if inputs.last().is_none_or(|last| last.depth < query_depth) {
        value.begin_level();
    }

    let mut ctx = ApplyContext::new(&mut errors, config_key, ValueOrigin::Inherited);
    value.check_required(&mut ctx);

    tracing::debug!(
        section = config_key,
        inputs = inputs.len(),
        errors = errors.len(),
        "merged section"
    );
    MergeOutcome { value, errors }
}

/// Element name of a section: the last segment of its config key.
pub fn config_key_tag(config_key: &str) -> &str {
    config_key.rsplit('/').next().unwrap_or(config_key)
}

/// State threaded through one level's application.
pub(crate) struct ApplyContext<'a> {
    errors: &'a mut Vec<ConfigError>,
    config_key: &'a str,
    pub(crate) origin: ValueOrigin,
    /// Changes come from the editing API rather than a file.
    pub(crate) editing: bool,
}

impl<'a> ApplyContext<'a> {
    pub(crate) fn new(
        errors: &'a mut Vec<ConfigError>,
        config_key: &'a str,
        origin: ValueOrigin,
    ) -> Self {
        Self {
            errors,
            config_key,
            origin,
            editing: false,
        }
    }

    fn error(&mut self, err: ConfigError, at: &Provenance) {
        let mut err = err.at(at);
        if !self.config_key.is_empty() {
            err = err.for_section(self.config_key);
        }
        self.errors.push(err);
    }
}

fn is_namespace_attribute(name: &str, prefix: Option<&str>) -> bool {
    name == "xmlns" || prefix == Some("xmlns")
}

impl ElementValue {
    /// Start a new level: current values become inherited, locks become
    /// parent-defined and lock flags are recomputed.
    pub(crate) fn begin_level(&mut self) {
        self.attribute_locks.begin_level();
        self.element_locks.begin_level();
        self.item_lock.begin_level();

        let element_locked = self.locked_by_parent || self.item_lock.locked;
        for (name, prop) in self.properties.iter_mut() {
            if prop.origin == ValueOrigin::SetHere {
                prop.origin = ValueOrigin::Inherited;
            }
            prop.xml_parent_inherited = element_locked;
            prop.locked = element_locked || self.attribute_locks.is_locked(name);
        }

        for (name, child) in self.elements.iter_mut() {
            child.locked_by_parent = element_locked || self.element_locks.is_locked(name);
            child.begin_level();
        }

        if let Some(collection) = &mut self.collection {
            collection.begin_level(element_locked);
        }
    }

    /// Apply one level's XML for this element.
    pub(crate) fn apply_xml(&mut self, xml: &XmlElement, ctx: &mut ApplyContext<'_>, is_section_root: bool) {
        if self.is_locked_by_parent() {
            ctx.error(locked_element_error(&xml.name), &xml.provenance);
            return;
        }
        self.present = true;
        self.source = Some(xml.provenance.clone());
        if ctx.editing {
            self.dirty = true;
        }

        self.apply_locks(xml, ctx);

        for attr in &xml.attributes {
            if is_lock_keyword(&attr.name) || is_namespace_attribute(&attr.name, attr.prefix.as_deref()) {
                continue;
            }
            if is_section_root && SECTION_ROOT_ATTRIBUTES.contains(&attr.name.as_str()) {
                continue;
            }
            let Some(def) = self.schema.property(&attr.name).cloned() else {
                ctx.error(
                    ConfigError::local(
                        ErrorKind::UnrecognizedAttribute,
                        format!("Unrecognized attribute '{}'", attr.name),
                    ),
                    &attr.provenance,
                );
                continue;
            };
            let Some(prop) = self.properties.get_mut(&def.name) else {
                continue;
            };

            let converted = def.convert(&attr.value);
            if prop.locked {
                let same = match &converted {
                    Ok(v) => prop.raw.is_none() && prop.value.as_ref() == Some(v),
                    Err(_) => prop.raw.as_deref() == Some(attr.value.as_str()),
                };
                if !same {
                    ctx.error(locked_attribute_error(&attr.name), &attr.provenance);
                }
                continue;
            }

            match converted {
                Ok(value) => {
                    prop.modified = def.default.as_ref() != Some(&value);
                    prop.value = Some(value);
                    prop.raw = None;
                }
                Err(message) => {
                    ctx.error(invalid_value_error(&attr.name, &message), &attr.provenance);
                    prop.raw = Some(attr.value.clone());
                    prop.modified = true;
                }
            }
            prop.origin = ctx.origin;
            prop.source = Some(attr.provenance.clone());
            if ctx.editing {
                prop.dirty = true;
            }
        }

        if xml.has_text() {
            let at = xml.text_provenance().unwrap_or(&xml.provenance).clone();
            ctx.error(
                ConfigError::local(
                    ErrorKind::TextContent,
                    "The configuration section cannot contain a CDATA or text element",
                ),
                &at,
            );
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for child in xml.all_children() {
            if let Some(child_value) = self.elements.get_mut(&child.name) {
                if !seen.insert(child.name.as_str()) {
                    ctx.error(
                        ConfigError::local(
                            ErrorKind::DuplicateElement,
                            format!("The element <{}> may only appear once in this section", child.name),
                        ),
                        &child.provenance,
                    );
                    continue;
                }
                if self.element_locks.is_locked_by_parent(&child.name) {
                    ctx.error(locked_element_error(&child.name), &child.provenance);
                    continue;
                }
                child_value.apply_xml(child, ctx, false);
                continue;
            }

            let verb = self
                .collection
                .as_ref()
                .and_then(|c| c.verb(&child.name));
            match verb {
                Some(verb) => {
                    if self.element_locks.is_locked_by_parent(&child.name) {
                        ctx.error(locked_element_error(&child.name), &child.provenance);
                        continue;
                    }
                    if let Some(collection) = &mut self.collection {
                        match verb {
                            Verb::Add => collection.apply_add(child, ctx),
                            Verb::Remove => collection.apply_remove(child, ctx),
                            Verb::Clear => collection.apply_clear(child, ctx),
                        }
                    }
                }
                None => ctx.error(
                    ConfigError::local(
                        ErrorKind::UnrecognizedElement,
                        format!("Unrecognized element '{}'", child.name),
                    ),
                    &child.provenance,
                ),
            }
        }
    }

    fn apply_locks(&mut self, xml: &XmlElement, ctx: &mut ApplyContext<'_>) {
        for (inclusion, exclusion, attributes) in [
            (LOCK_ATTRIBUTES, LOCK_ALL_ATTRIBUTES_EXCEPT, true),
            (LOCK_ELEMENTS, LOCK_ALL_ELEMENTS_EXCEPT, false),
        ] {
            let included = xml.get_attribute_full(inclusion);
            let excluded = xml.get_attribute_full(exclusion);
            if let (Some(_), Some(attr)) = (included, excluded) {
                ctx.error(
                    ConfigError::local(
                        ErrorKind::LockList,
                        format!(
                            "The attributes '{}' and '{}' cannot both appear on one element",
                            inclusion, exclusion
                        ),
                    ),
                    &attr.provenance,
                );
                continue;
            }

            for (attr, is_exclusion) in [(included, false), (excluded, true)] {
                let Some(attr) = attr else { continue };
                let names = parse_lock_list(&attr.value).and_then(|names| {
                    let checked = if attributes {
                        self.check_attribute_lock_names(&names, is_exclusion)
                    } else {
                        self.check_element_lock_names(&names, is_exclusion)
                    };
                    checked.map(|()| names)
                });
                let names = match names {
                    Ok(names) => names,
                    Err(message) => {
                        ctx.error(ConfigError::local(ErrorKind::LockList, message), &attr.provenance);
                        continue;
                    }
                };
                let list = if attributes {
                    &mut self.attribute_locks
                } else {
                    &mut self.element_locks
                };
                if is_exclusion {
                    list.add_exclusion(names);
                } else {
                    list.add_inclusion(names);
                }
            }
        }

        if let Some(attr) = xml.get_attribute_full(LOCK_ITEM) {
            match attr.value.trim().to_ascii_lowercase().as_str() {
                "true" => self.item_lock.locked = true,
                "false" => {}
                _ => ctx.error(
                    ConfigError::local(
                        ErrorKind::LockList,
                        format!("The value of '{}' must be 'true' or 'false'", LOCK_ITEM),
                    ),
                    &attr.provenance,
                ),
            }
        }
    }

    /// Record an error for every required attribute still missing.
    pub(crate) fn check_required(&self, ctx: &mut ApplyContext<'_>) {
        let at = self.source.clone().unwrap_or_default();
        for def in self.schema.properties() {
            if !def.is_required {
                continue;
            }
            let missing = self
                .properties
                .get(&def.name)
                .is_none_or(|p| p.value.is_none() && p.raw.is_none());
            if missing {
                ctx.error(
                    ConfigError::local(
                        ErrorKind::Required,
                        format!("Required attribute '{}' not found", def.name),
                    ),
                    &at,
                );
            }
        }
        for child in self.elements.values().filter(|c| c.present) {
            child.check_required(ctx);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Add,
    Remove,
    Clear,
}

impl CollectionValue {
    fn verb(&self, name: &str) -> Option<Verb> {
        if name == self.schema.add_name {
            Some(Verb::Add)
        } else if !self.schema.kind.supports_remove_and_clear() {
            None
        } else if name == self.schema.remove_name {
            Some(Verb::Remove)
        } else if name == self.schema.clear_name {
            Some(Verb::Clear)
        } else {
            None
        }
    }

    pub(crate) fn begin_level(&mut self, owner_locked: bool) {
        self.cleared_here = false;
        self.local_insert = 0;
        self.added_here.clear();
        for item in &mut self.items {
            if item.origin == ValueOrigin::SetHere {
                item.origin = ValueOrigin::Inherited;
            }
            item.value.locked_by_parent = owner_locked;
            item.value.begin_level();
        }
    }

    /// Key text from an `<add>` or `<remove>` element; records an error if a
    /// key attribute is missing.
    fn key_from_xml(&self, xml: &XmlElement, ctx: &mut ApplyContext<'_>) -> Option<String> {
        let mut parts = Vec::new();
        for def in self.schema.item.key_properties() {
            match xml.get_attribute(&def.name) {
                Some(value) => parts.push(value.to_string()),
                None => {
                    ctx.error(
                        ConfigError::local(
                            ErrorKind::Collection,
                            format!("Required key attribute '{}' is missing", def.name),
                        ),
                        &xml.provenance,
                    );
                    return None;
                }
            }
        }
        Some(parts.join(","))
    }

    pub(crate) fn apply_add(&mut self, xml: &XmlElement, ctx: &mut ApplyContext<'_>) {
        let Some(key) = self.key_from_xml(xml, ctx) else {
            return;
        };

        let existing = self.position(&key);
        if let Some(idx) = existing {
            let item = &self.items[idx];
            if item.value.is_locked_by_parent() {
                ctx.error(locked_entry_error(&key), &xml.provenance);
                return;
            }
            if self.schema.throw_on_duplicate && self.added_here.contains(&key) {
                ctx.error(
                    ConfigError::local(
                        ErrorKind::Collection,
                        format!("The entry '{}' has already been added", key),
                    ),
                    &xml.provenance,
                );
                return;
            }
        }

        let mut value = match existing {
            Some(idx) => self.items[idx].value.clone(),
            None => ElementValue::from_schema(self.schema.add_name.clone(), self.schema.item.clone()),
        };
        let errors_before = ctx.errors.len();
        value.apply_xml(xml, ctx, false);
        if existing.is_none() {
            value.check_required(ctx);
            if ctx.errors[errors_before..]
                .iter()
                .any(|e| e.kind == ErrorKind::Required)
            {
                return;
            }
        }

        self.added_here.insert(key.clone());
        let item = CollectionItem {
            key,
            value,
            origin: ctx.origin,
        };
        match (existing, self.schema.kind) {
            (Some(idx), CollectionKind::AddRemoveClearMapAlternate) if idx >= self.local_insert => {
                self.items.remove(idx);
                self.items.insert(self.local_insert, item);
                self.local_insert += 1;
            }
            (Some(idx), _) => self.items[idx] = item,
            (None, CollectionKind::AddRemoveClearMapAlternate) => {
                self.items.insert(self.local_insert, item);
                self.local_insert += 1;
            }
            (None, _) => self.items.push(item),
        }
        if ctx.editing {
            self.dirty = true;
        }
    }

    fn apply_remove(&mut self, xml: &XmlElement, ctx: &mut ApplyContext<'_>) {
        for attr in &xml.attributes {
            let is_key = self
                .schema
                .item
                .property(&attr.name)
                .is_some_and(|def| def.is_key);
            if !is_key && !is_namespace_attribute(&attr.name, attr.prefix.as_deref()) {
                ctx.error(
                    ConfigError::local(
                        ErrorKind::UnrecognizedAttribute,
                        format!("Unrecognized attribute '{}'", attr.name),
                    ),
                    &attr.provenance,
                );
            }
        }
        let Some(key) = self.key_from_xml(xml, ctx) else {
            return;
        };
        if let Err(err) = self.remove_key(&key) {
            ctx.error(err, &xml.provenance);
        }
    }

    fn apply_clear(&mut self, xml: &XmlElement, ctx: &mut ApplyContext<'_>) {
        if let Some(attr) = xml.attributes.first() {
            ctx.error(
                ConfigError::local(
                    ErrorKind::UnrecognizedAttribute,
                    format!("Unrecognized attribute '{}'", attr.name),
                ),
                &attr.provenance,
            );
        }
        if let Err(err) = self.clear_all() {
            ctx.error(err, &xml.provenance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, PropertyDef, ScalarValue, ValueKind};

    fn schema() -> Arc<ElementSchema> {
        Arc::new(
            ElementSchema::new()
                .with_property(PropertyDef::text("a"))
                .with_property(PropertyDef::text("value"))
                .with_property(PropertyDef::new("count", ValueKind::Integer { min: 0, max: 9 }).default_text("1"))
                .with_element("child", ElementSchema::new().with_property(PropertyDef::boolean("on")))
                .with_collection(CollectionSchema::new(
                    CollectionKind::AddRemoveClearMap,
                    ElementSchema::new()
                        .with_property(PropertyDef::text("key").key().required())
                        .with_property(PropertyDef::text("value")),
                )),
        )
    }

    fn parse(text: &str, file: &str) -> XmlElement {
        strata_xml::parse_file(text, file).unwrap().root
    }

    fn run(levels: &[&str]) -> MergeOutcome {
        let elements: Vec<XmlElement> = levels
            .iter()
            .enumerate()
            .map(|(i, text)| parse(text, &format!("level{}.config", i)))
            .collect();
        let inputs: Vec<MergeInput<'_>> = elements
            .iter()
            .enumerate()
            .map(|(i, element)| MergeInput { element, depth: i + 1 })
            .collect();
        merge("test", &schema(), &inputs, levels.len())
    }

    fn messages(outcome: &MergeOutcome) -> Vec<String> {
        outcome.errors.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_child_overrides_root_and_is_set_here() {
        let outcome = run(&[r#"<test a="1" />"#, r#"<test a="2" />"#]);
        assert!(outcome.errors.is_empty());
        let prop = outcome.value.property("a").unwrap();
        assert_eq!(prop.value, Some(ScalarValue::Text("2".into())));
        assert_eq!(prop.origin, ValueOrigin::SetHere);
        assert!(prop.modified);
        assert_eq!(prop.source.as_ref().unwrap().file.as_ref(), "level1.config");
    }

    #[test]
    fn test_values_from_above_are_inherited() {
        let outcome = run(&[r#"<test a="1" />"#, r#"<test />"#]);
        let prop = outcome.value.property("a").unwrap();
        assert_eq!(prop.origin, ValueOrigin::Inherited);
        assert_eq!(outcome.value.property("count").unwrap().origin, ValueOrigin::Default);
    }

    #[test]
    fn test_locked_attribute_rejects_different_value() {
        let outcome = run(&[
            r#"<test value="1" lockAttributes="value" />"#,
            r#"<test value="3" />"#,
        ]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Locked);
        assert_eq!(outcome.errors[0].file.as_deref(), Some("level1.config"));
        assert_eq!(outcome.value.get_text("value").as_deref(), Some("1"));
        assert!(outcome.value.property("value").unwrap().locked);
    }

    #[test]
    fn test_locked_attribute_tolerates_same_value() {
        let outcome = run(&[
            r#"<test value="1" lockAttributes="value" />"#,
            r#"<test value="1" />"#,
        ]);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_locks_do_not_restrict_their_own_level() {
        let outcome = run(&[r#"<test lockAttributes="a" a="5" />"#]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.value.get_text("a").as_deref(), Some("5"));
    }

    #[test]
    fn test_exclusion_combines_with_ancestor_inclusion() {
        let outcome = run(&[
            r#"<test lockAttributes="a" />"#,
            r#"<test lockAllAttributesExcept="a,value" />"#,
            r#"<test />"#,
        ]);
        assert!(outcome.errors.is_empty(), "{:?}", messages(&outcome));
        assert_eq!(outcome.value.locked_attributes(), ["a", "count"]);
    }

    #[test]
    fn test_lock_list_validation() {
        let outcome = run(&[r#"<test lockAttributes="nope" lockElements=" , " />"#]);
        let kinds: Vec<_> = outcome.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ErrorKind::LockList, ErrorKind::LockList]);

        let outcome = run(&[r#"<test lockAttributes="a" lockAllAttributesExcept="value" />"#]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("cannot both appear"));
    }

    #[test]
    fn test_invalid_value_keeps_raw_text() {
        let outcome = run(&[r#"<test count="lots" />"#]);
        assert_eq!(outcome.errors[0].kind, ErrorKind::InvalidValue);
        let prop = outcome.value.property("count").unwrap();
        assert_eq!(prop.raw.as_deref(), Some("lots"));
        assert_eq!(prop.value, Some(ScalarValue::Integer(1)));
        assert_eq!(outcome.value.get_text("count").as_deref(), Some("lots"));
    }

    #[test]
    fn test_structural_errors() {
        let outcome = run(&[r#"<test bogus="1"><child /><child /><other />text</test>"#]);
        let kinds: Vec<_> = outcome.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                ErrorKind::UnrecognizedAttribute,
                ErrorKind::TextContent,
                ErrorKind::DuplicateElement,
                ErrorKind::UnrecognizedElement,
            ]
        );
    }

    #[test]
    fn test_clear_then_add_leaves_only_new_key() {
        let outcome = run(&[
            r#"<test><add key="x" value="1" /><add key="y" value="2" /></test>"#,
            r#"<test><clear /><add key="k" value="3" /></test>"#,
        ]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.value.collection().unwrap().keys(), ["k"]);
    }

    #[test]
    fn test_readd_replaces_in_place_and_inherits_attributes() {
        let outcome = run(&[
            r#"<test><add key="x" value="1" /><add key="y" value="2" /></test>"#,
            r#"<test><add key="x" /></test>"#,
        ]);
        let collection = outcome.value.collection().unwrap();
        assert_eq!(collection.keys(), ["x", "y"]);
        assert_eq!(collection.get("x").unwrap().get_text("value").as_deref(), Some("1"));
        assert_eq!(collection.items()[0].origin, ValueOrigin::SetHere);
    }

    #[test]
    fn test_duplicate_add_in_one_level() {
        let outcome = run(&[r#"<test><add key="x" /><add key="x" /></test>"#]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("already been added"));
    }

    #[test]
    fn test_missing_key_and_missing_remove() {
        let outcome = run(&[r#"<test><add value="1" /><remove key="absent" /></test>"#]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Collection);
    }

    #[test]
    fn test_locked_item_cannot_be_removed_or_cleared() {
        let outcome = run(&[
            r#"<test><add key="x" lockItem="true" /></test>"#,
            r#"<test><remove key="x" /><clear /><add key="x" value="2" /></test>"#,
        ]);
        let kinds: Vec<_> = outcome.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ErrorKind::Locked, ErrorKind::Locked, ErrorKind::Locked]);
        assert_eq!(outcome.value.collection().unwrap().keys(), ["x"]);
    }

    #[test]
    fn test_element_lock_blocks_verbs_and_children() {
        let outcome = run(&[
            r#"<test lockElements="add,child" />"#,
            r#"<test><add key="x" /><child on="true" /><clear /></test>"#,
        ]);
        let kinds: Vec<_> = outcome.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ErrorKind::Locked, ErrorKind::Locked]);
        let child = outcome.value.element("child").unwrap();
        assert!(child.is_locked_by_parent());
        assert!(child.property("on").unwrap().xml_parent_inherited);
    }

    #[test]
    fn test_alternate_puts_local_items_first() {
        let schema = Arc::new(ElementSchema::new().with_collection(CollectionSchema::new(
            CollectionKind::AddRemoveClearMapAlternate,
            ElementSchema::new().with_property(PropertyDef::text("name").key()),
        )));
        let root = parse(r#"<s><add name="a" /><add name="b" /></s>"#, "root");
        let child = parse(r#"<s><add name="c" /><add name="b" /><add name="d" /></s>"#, "child");
        let inputs = [
            MergeInput { element: &root, depth: 1 },
            MergeInput { element: &child, depth: 2 },
        ];
        let outcome = merge("s", &schema, &inputs, 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.value.collection().unwrap().keys(), ["c", "b", "d", "a"]);
    }

    #[test]
    fn test_required_checked_after_fold() {
        let schema = Arc::new(ElementSchema::new().with_property(PropertyDef::text("name").required()));
        let root = parse(r#"<s />"#, "root");
        let child = parse(r#"<s name="x" />"#, "child");

        let one = merge("s", &schema, &[MergeInput { element: &root, depth: 1 }], 1);
        assert_eq!(one.errors[0].kind, ErrorKind::Required);

        let both = merge(
            "s",
            &schema,
            &[
                MergeInput { element: &root, depth: 1 },
                MergeInput { element: &child, depth: 2 },
            ],
            2,
        );
        assert!(both.errors.is_empty());
    }

    #[test]
    fn test_query_below_last_input_marks_locks_parent_defined() {
        let root = parse(r#"<test lockAttributes="a" a="1" />"#, "root");
        let outcome = merge("test", &schema(), &[MergeInput { element: &root, depth: 1 }], 2);
        assert!(outcome.value.property("a").unwrap().locked);
        assert!(outcome.value.attribute_locks().is_locked_by_parent("a"));
    }
}

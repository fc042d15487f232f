//! Turning a merged value back into the XML one level has to write.

use strata_xml::XmlElement;

use crate::errors::{ConfigError, ErrorKind};
use crate::locks::{
    LOCK_ALL, LOCK_ALL_ATTRIBUTES_EXCEPT, LOCK_ALL_ELEMENTS_EXCEPT, LOCK_ATTRIBUTES,
    LOCK_ELEMENTS, LOCK_ITEM, LockList, format_lock_list,
};
use crate::value::{CollectionValue, ElementValue, ValueOrigin};

/// Which values a level writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum SaveMode {
    /// Values that differ from the parent level, plus required values.
    Minimal,
    /// Values set or edited at this level, plus required values.
    #[default]
    Modified,
    /// Every value, including defaults.
    Full,
}

impl SaveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveMode::Minimal => "minimal",
            SaveMode::Modified => "modified",
            SaveMode::Full => "full",
        }
    }
}

impl std::str::FromStr for SaveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(SaveMode::Minimal),
            "modified" => Ok(SaveMode::Modified),
            "full" => Ok(SaveMode::Full),
            _ => Err(format!("unknown save mode '{}'", s)),
        }
    }
}

impl ElementValue {
    /// The XML for this level given the merged value of the level above.
    ///
    /// Returns `None` when the level has nothing to write.
    pub fn unmerge(
        &self,
        parent: Option<&ElementValue>,
        mode: SaveMode,
    ) -> Result<Option<XmlElement>, ConfigError> {
        let mut out = XmlElement::build(self.name.clone());
        let has_data = self.unmerge_into(parent, mode, &mut out)?;
        Ok(has_data.then_some(out))
    }

    fn unmerge_into(
        &self,
        parent: Option<&ElementValue>,
        mode: SaveMode,
        out: &mut XmlElement,
    ) -> Result<bool, ConfigError> {
        if self.is_locked_by_parent() {
            return Ok(false);
        }
        let mut has_data = false;

        for def in self.schema.properties() {
            let Some(prop) = self.properties.get(&def.name) else {
                continue;
            };
            let Some(text) = prop.text() else {
                continue;
            };
            if prop.locked && !def.is_key {
                if def.is_required {
                    return Err(ConfigError::local(
                        ErrorKind::Locked,
                        format!(
                            "The required attribute '{}' is locked by a parent and cannot be written",
                            def.name
                        ),
                    ));
                }
                continue;
            }

            let emit = def.is_key
                || match mode {
                    SaveMode::Full => true,
                    SaveMode::Modified => {
                        def.is_required
                            || prop.dirty
                            || prop.origin == ValueOrigin::SetHere
                            || (parent.is_none() && prop.inherited() && prop.modified)
                    }
                    SaveMode::Minimal => {
                        let differs = match parent.and_then(|p| p.properties.get(&def.name)) {
                            Some(inherited) => !prop.same_value(inherited),
                            None => prop.raw.is_some() || prop.value != def.default,
                        };
                        def.is_required || differs
                    }
                };
            if emit {
                out.set_attribute(def.name.clone(), text);
                has_data = true;
            }
        }

        let include_touched = mode == SaveMode::Modified;
        has_data |= write_lock_list(
            out,
            &self.attribute_locks,
            include_touched,
            LOCK_ATTRIBUTES,
            LOCK_ALL_ATTRIBUTES_EXCEPT,
        );
        has_data |= write_lock_list(
            out,
            &self.element_locks,
            include_touched,
            LOCK_ELEMENTS,
            LOCK_ALL_ELEMENTS_EXCEPT,
        );
        if self.item_lock.locked && !self.item_lock.defined_in_parent {
            out.set_attribute(LOCK_ITEM, "true");
            has_data = true;
        }

        for (name, child) in &self.elements {
            if child.locked_by_parent {
                continue;
            }
            let inherited = parent.and_then(|p| p.elements.get(name));
            let mut child_out = XmlElement::build(name.clone());
            if child.unmerge_into(inherited, mode, &mut child_out)? {
                out.push_child(child_out);
                has_data = true;
            }
        }

        if let Some(collection) = &self.collection {
            let inherited = parent.and_then(|p| p.collection.as_ref());
            has_data |= collection.unmerge_into(inherited, mode, out)?;
        }

        Ok(has_data)
    }

    fn has_local_locks(&self) -> bool {
        !self.attribute_locks.local_inclusions(false).is_empty()
            || self.attribute_locks.local_exclusion().is_some()
            || !self.element_locks.local_inclusions(false).is_empty()
            || self.element_locks.local_exclusion().is_some()
            || (self.item_lock.locked && !self.item_lock.defined_in_parent)
    }
}

fn write_lock_list(
    out: &mut XmlElement,
    locks: &LockList,
    include_touched: bool,
    inclusion_attr: &str,
    exclusion_attr: &str,
) -> bool {
    let mut inclusions = locks.local_inclusions(include_touched);
    let mut wrote = false;
    if let Some(exceptions) = locks.local_exclusion() {
        if exceptions.is_empty() {
            if !inclusions.contains(&LOCK_ALL) {
                inclusions.push(LOCK_ALL);
            }
        } else {
            out.set_attribute(exclusion_attr, format_lock_list(exceptions.iter().map(String::as_str)));
            wrote = true;
        }
    }
    if !inclusions.is_empty() {
        out.set_attribute(inclusion_attr, format_lock_list(inclusions));
        wrote = true;
    }
    wrote
}

impl CollectionValue {
    fn unmerge_into(
        &self,
        parent: Option<&CollectionValue>,
        mode: SaveMode,
        out: &mut XmlElement,
    ) -> Result<bool, ConfigError> {
        let mut has_data = false;

        if self.cleared_here {
            out.push_child(XmlElement::build(self.schema.clear_name.clone()));
            has_data = true;
        } else if let Some(parent) = parent.filter(|_| self.schema.kind.supports_remove_and_clear()) {
            for removed in parent.items.iter().filter(|i| self.position(&i.key).is_none()) {
                let mut remove = XmlElement::build(self.schema.remove_name.clone());
                for def in self.schema.item.key_properties() {
                    if let Some(text) = removed.value.get_text(&def.name) {
                        remove.set_attribute(def.name.clone(), text);
                    }
                }
                out.push_child(remove);
                has_data = true;
            }
        }

        for item in &self.items {
            let inherited = if self.cleared_here {
                None
            } else {
                parent.and_then(|p| p.get(&item.key))
            };
            let touched = item.origin == ValueOrigin::SetHere || item.value.is_dirty();
            let emit = match mode {
                SaveMode::Full => !item.value.is_locked_by_parent(),
                SaveMode::Modified => touched,
                SaveMode::Minimal => {
                    touched
                        && !(inherited.is_some_and(|p| p.value_eq(&item.value))
                            && !item.value.has_local_locks())
                }
            };
            if !emit {
                continue;
            }
            let mut add = XmlElement::build(self.schema.add_name.clone());
            item.value.unmerge_into(inherited, mode, &mut add)?;
            out.push_child(add);
            has_data = true;
        }

        Ok(has_data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::merge::{MergeInput, merge};
    use crate::schema::{CollectionKind, CollectionSchema, ElementSchema, PropertyDef, ValueKind};

    fn schema() -> Arc<ElementSchema> {
        Arc::new(
            ElementSchema::new()
                .with_property(PropertyDef::text("a"))
                .with_property(PropertyDef::text("b"))
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

    struct Levels {
        elements: Vec<XmlElement>,
    }

    impl Levels {
        fn new(levels: &[&str]) -> Self {
            let elements = levels
                .iter()
                .map(|text| strata_xml::parse(text).unwrap().root)
                .collect();
            Self { elements }
        }

        /// Merge the first `count` levels as seen from level `count`.
        fn merged(&self, count: usize) -> ElementValue {
            let inputs: Vec<_> = self.elements[..count]
                .iter()
                .enumerate()
                .map(|(i, element)| MergeInput { element, depth: i + 1 })
                .collect();
            let outcome = merge("test", &schema(), &inputs, count);
            assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
            outcome.value
        }
    }

    fn unmerged(levels: &Levels, mode: SaveMode) -> String {
        let count = levels.elements.len();
        let parent = levels.merged(count - 1);
        let value = levels.merged(count);
        value
            .unmerge(Some(&parent), mode)
            .unwrap()
            .map(|el| el.to_xml_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_minimal_skips_parent_equal_values() {
        let levels = Levels::new(&[r#"<test a="1" b="2" />"#, r#"<test a="1" b="3" />"#]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Minimal), @r#"<test b="3" />"#);
    }

    #[test]
    fn test_modified_writes_everything_set_here() {
        let levels = Levels::new(&[r#"<test a="1" b="2" />"#, r#"<test a="1" b="3" />"#]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Modified), @r#"<test a="1" b="3" />"#);
    }

    #[test]
    fn test_full_writes_defaults() {
        let levels = Levels::new(&[r#"<test a="1" />"#, r#"<test />"#]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Full), @r#"<test a="1" count="1" />"#);
    }

    #[test]
    fn test_nothing_to_write() {
        let levels = Levels::new(&[r#"<test a="1" />"#, r#"<test />"#]);
        assert_eq!(unmerged(&levels, SaveMode::Minimal), "");
        assert_eq!(unmerged(&levels, SaveMode::Modified), "");
    }

    #[test]
    fn test_only_local_locks_are_written() {
        let levels = Levels::new(&[
            r#"<test lockAttributes="a" />"#,
            r#"<test lockAttributes="a,b" lockElements="child" />"#,
        ]);
        insta::assert_snapshot!(
            unmerged(&levels, SaveMode::Minimal),
            @r#"<test lockAttributes="b" lockElements="child" />"#
        );
        insta::assert_snapshot!(
            unmerged(&levels, SaveMode::Modified),
            @r#"<test lockAttributes="a,b" lockElements="child" />"#
        );
    }

    #[test]
    fn test_parent_locked_attributes_are_skipped() {
        let levels = Levels::new(&[r#"<test a="1" lockAttributes="a" />"#, r#"<test b="2" />"#]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Full), @r#"<test b="2" count="1" />"#);
    }

    #[test]
    fn test_collection_clear_and_remove() {
        let levels = Levels::new(&[
            r#"<test><add key="x" value="1" /><add key="y" value="2" /></test>"#,
            r#"<test><remove key="y" /><add key="z" value="3" /></test>"#,
        ]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Modified), @r#"
        <test>
            <remove key="y" />
            <add key="z" value="3" />
        </test>
        "#);

        let levels = Levels::new(&[
            r#"<test><add key="x" value="1" /></test>"#,
            r#"<test><clear /><add key="x" value="1" /></test>"#,
        ]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Minimal), @r#"
        <test>
            <clear />
            <add key="x" value="1" />
        </test>
        "#);
    }

    #[test]
    fn test_minimal_skips_parent_equal_items() {
        let levels = Levels::new(&[
            r#"<test><add key="x" value="1" /></test>"#,
            r#"<test><add key="x" value="1" /><add key="w" /></test>"#,
        ]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Minimal), @r#"
        <test>
            <add key="w" />
        </test>
        "#);
    }

    #[test]
    fn test_child_elements_only_with_data() {
        let levels = Levels::new(&[r#"<test />"#, r#"<test><child on="true" /></test>"#]);
        insta::assert_snapshot!(unmerged(&levels, SaveMode::Minimal), @r#"
        <test>
            <child on="true" />
        </test>
        "#);
    }

    #[test]
    fn test_full_round_trip_matches_merge() {
        let levels = Levels::new(&[
            r#"<test a="1" lockElements="clear"><add key="x" value="1" lockItem="true" /><add key="y" /></test>"#,
            r#"<test b="2" count="4"><child on="false" /><remove key="y" /><add key="z" value="3" /></test>"#,
        ]);
        let original = levels.merged(2);
        let written = unmerged(&levels, SaveMode::Full);

        let reparsed = Levels::new(&[
            r#"<test a="1" lockElements="clear"><add key="x" value="1" lockItem="true" /><add key="y" /></test>"#,
            written.as_str(),
        ]);
        assert!(reparsed.merged(2).value_eq(&original), "{}", written);
    }

    #[test]
    fn test_save_mode_parse() {
        assert_eq!("Minimal".parse::<SaveMode>(), Ok(SaveMode::Minimal));
        assert!("partial".parse::<SaveMode>().is_err());
        assert_eq!(SaveMode::default(), SaveMode::Modified);
    }
}

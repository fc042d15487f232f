//! Planning and applying the text edits a save makes to one file.
//!
//! Updates are grouped by the `<location>` block they belong to. A block
//! only receives definitions whose path, override mode and
//! inheritInChildApplications setting all match; anything else goes into
//! a new block. Untouched text is carried over byte for byte.

use std::ops::Range;

use indexmap::IndexMap;
use strata_xml::{XmlDocument, XmlElement};

use crate::directory::{AllowDefinition, AllowExeDefinition, FactoryRecord, FactoryResolution, OverrideMode, parse_bool};
use crate::file::{CONFIG_SECTIONS, LOCATION};
use crate::section::{LocationKey, normalize_location_path};

const INDENT: &str = "    ";

/// A change to one section definition in one location block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionUpdate {
    pub config_key: String,
    /// The definition came here from another block.
    pub moved: bool,
    /// Span of the definition being replaced or removed.
    pub existing: Option<Range<usize>>,
    /// New definition XML; `None` removes the definition.
    pub xml: Option<String>,
}

impl DefinitionUpdate {
    pub fn write(config_key: impl Into<String>, existing: Option<Range<usize>>, xml: String) -> Self {
        Self {
            config_key: config_key.into(),
            moved: false,
            existing,
            xml: Some(xml),
        }
    }

    pub fn remove(config_key: impl Into<String>, existing: Range<usize>) -> Self {
        Self {
            config_key: config_key.into(),
            moved: false,
            existing: Some(existing),
            xml: None,
        }
    }

    fn is_insert(&self) -> bool {
        self.existing.is_none() && self.xml.is_some()
    }
}

/// All updates for one location block.
#[derive(Debug, Clone)]
pub struct LocationUpdates {
    pub location: LocationKey,
    pub updates: Vec<DefinitionUpdate>,
    /// The block's element in the file; the root element for the root
    /// scope, `None` when the block has to be created.
    pub block: Option<XmlElement>,
}

impl LocationUpdates {
    pub fn is_new(&self) -> bool {
        self.block.is_none()
    }
}

/// Collects the updates of one save and turns them into file text.
#[derive(Debug, Clone, Default)]
pub struct UpdateCoordinator {
    locations: Vec<LocationUpdates>,
    declarations: Vec<FactoryRecord>,
    completed: bool,
}

impl UpdateCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_section_update(&mut self, location: &LocationKey, update: DefinitionUpdate) {
        match self.locations.iter_mut().find(|l| &l.location == location) {
            Some(group) => group.updates.push(update),
            None => self.locations.push(LocationUpdates {
                location: location.clone(),
                updates: vec![update],
                block: None,
            }),
        }
    }

    pub fn record_declaration(&mut self, record: FactoryRecord) {
        if !self.declarations.iter().any(|r| r.config_key == record.config_key) {
            self.declarations.push(record);
        }
    }

    /// Drop declarations the file already sees and find the existing
    /// block for each location.
    pub fn complete_updates(&mut self, doc: &XmlDocument, declared: &FactoryResolution) {
        self.declarations.retain(|record| {
            declared.get(&record.config_key).is_none_or(|existing| {
                existing.is_group != record.is_group || existing.type_name != record.type_name
            })
        });
        for group in &mut self.locations {
            group.block = if group.location.is_root() {
                Some(doc.root.clone())
            } else {
                doc.root
                    .get_children(LOCATION)
                    .into_iter()
                    .find(|el| location_key(el) == group.location)
                    .cloned()
            };
        }
        self.locations.retain(|l| !l.updates.is_empty());
        self.completed = true;
    }

    pub fn location_updates(&self) -> &[LocationUpdates] {
        &self.locations
    }

    pub fn declarations(&self) -> &[FactoryRecord] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.declarations.is_empty()
    }

    /// The file text with every update applied.
    pub fn render(&self, doc: &XmlDocument) -> String {
        debug_assert!(self.completed, "render before complete_updates");
        let text: &str = &doc.text;
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        let mut root_first: Vec<String> = Vec::new();
        let mut root_last: Vec<String> = Vec::new();

        self.render_declarations(doc, &mut edits, &mut root_first);

        for group in &self.locations {
            let inserts: Vec<String> = group
                .updates
                .iter()
                .filter(|u| u.is_insert())
                .filter_map(|u| u.xml.clone())
                .collect();

            if let Some(block) = group.block.as_ref().filter(|_| !group.location.is_root())
                && inserts.is_empty()
                && block_emptied(block, &group.updates)
            {
                edits.push((whole_lines(text, block.provenance.span.clone()), String::new()));
                continue;
            }

            for update in &group.updates {
                let Some(span) = update.existing.clone() else {
                    continue;
                };
                match &update.xml {
                    Some(xml) => {
                        let indent = doc.indentation_at(span.start);
                        edits.push((span, reindent(xml, indent)));
                    }
                    None => edits.push((whole_lines(text, span), String::new())),
                }
            }

            if inserts.is_empty() {
                continue;
            }
            match &group.block {
                Some(_) if group.location.is_root() => root_last.extend(inserts),
                Some(block) => edits.extend(insert_into(doc, block, Vec::new(), inserts)),
                None => root_last.push(new_block(&group.location, &inserts)),
            }
        }

        if !root_first.is_empty() || !root_last.is_empty() {
            edits.extend(insert_into(doc, &doc.root, root_first, root_last));
        }
        apply_edits(text, edits)
    }

    fn render_declarations(&self, doc: &XmlDocument, edits: &mut Vec<(Range<usize>, String)>, root_first: &mut Vec<String>) {
        if self.declarations.is_empty() {
            return;
        }
        let sections = doc.root.get_child(CONFIG_SECTIONS);

        // Keyed by the span start of the existing container element.
        let mut placed: IndexMap<usize, (&XmlElement, Vec<XmlElement>)> = IndexMap::new();
        let mut fresh: Vec<XmlElement> = Vec::new();
        for record in &self.declarations {
            let groups: Vec<&str> = if record.group.is_empty() {
                Vec::new()
            } else {
                record.group.split('/').collect()
            };
            let leaf = declaration_element(record);
            let Some(sections) = sections else {
                place(&mut fresh, &groups, leaf);
                continue;
            };
            let (container, rest) = deepest_group(sections, &groups);
            let entry = placed
                .entry(container.provenance.span.start)
                .or_insert_with(|| (container, Vec::new()));
            place(&mut entry.1, rest, leaf);
        }

        if !fresh.is_empty() {
            let mut block = XmlElement::build(CONFIG_SECTIONS);
            for el in fresh {
                block.push_child(el);
            }
            root_first.push(block.to_xml_string());
        }
        for (container, items) in placed.into_values() {
            let items = items.iter().map(XmlElement::to_xml_string).collect();
            edits.extend(insert_into(doc, container, Vec::new(), items));
        }
    }
}

/// The block key a `<location>` element stands for. Invalid attribute
/// values are ignored here; scanning reports them.
pub fn location_key(el: &XmlElement) -> LocationKey {
    let mut key = LocationKey::root();
    if let Some(path) = el.get_attribute("path") {
        key.path = normalize_location_path(path);
    }
    if let Some(mode) = el.get_attribute("overrideMode").and_then(OverrideMode::parse) {
        key.override_mode = mode;
    } else if let Some(allow) = el.get_attribute("allowOverride").and_then(parse_bool) {
        key.override_mode = if allow { OverrideMode::Allow } else { OverrideMode::Deny };
    }
    if let Some(inherit) = el.get_attribute("inheritInChildApplications").and_then(parse_bool) {
        key.inherit_in_child_apps = inherit;
    }
    key
}

/// `<section>` element for a declaration, with non-default attributes only.
pub fn declaration_element(record: &FactoryRecord) -> XmlElement {
    if record.is_group {
        let mut el = XmlElement::build("sectionGroup").with_attribute("name", record.name.as_str());
        if let Some(type_name) = &record.type_name {
            el = el.with_attribute("type", type_name.as_str());
        }
        return el;
    }
    let mut el = XmlElement::build("section")
        .with_attribute("name", record.name.as_str())
        .with_attribute("type", record.type_name.as_deref().unwrap_or_default());
    if !record.allow_location {
        el = el.with_attribute("allowLocation", "false");
    }
    if record.allow_definition != AllowDefinition::default() {
        el = el.with_attribute("allowDefinition", record.allow_definition.as_str());
    }
    if record.allow_exe_definition != AllowExeDefinition::default() {
        el = el.with_attribute("allowExeDefinition", record.allow_exe_definition.as_str());
    }
    if record.override_mode_default != OverrideMode::Allow {
        el = el.with_attribute("overrideModeDefault", record.override_mode_default.as_str());
    }
    if !record.require_permission {
        el = el.with_attribute("requirePermission", "false");
    }
    if !record.restart_on_external_changes {
        el = el.with_attribute("restartOnExternalChanges", "false");
    }
    el
}

fn deepest_group<'a, 'g>(sections: &'a XmlElement, groups: &'g [&'g str]) -> (&'a XmlElement, &'g [&'g str]) {
    let mut container = sections;
    let mut depth = 0;
    for name in groups {
        let next = container
            .get_children("sectionGroup")
            .into_iter()
            .find(|g| g.get_attribute("name") == Some(*name));
        match next {
            Some(group) => {
                container = group;
                depth += 1;
            }
            None => break,
        }
    }
    (container, &groups[depth..])
}

/// Put `leaf` under the chain of `groups`, reusing group elements
/// already created in `items`.
fn place(items: &mut Vec<XmlElement>, groups: &[&str], leaf: XmlElement) {
    let Some((first, rest)) = groups.split_first() else {
        items.push(leaf);
        return;
    };
    let position = items
        .iter()
        .position(|el| el.name == "sectionGroup" && el.get_attribute("name") == Some(*first));
    let index = match position {
        Some(index) => index,
        None => {
            items.push(XmlElement::build("sectionGroup").with_attribute("name", *first));
            items.len() - 1
        }
    };
    let mut children: Vec<XmlElement> = items[index].all_children().into_iter().cloned().collect();
    place(&mut children, rest, leaf);
    let mut group = XmlElement::build("sectionGroup");
    group.attributes = items[index].attributes.clone();
    for child in children {
        group.push_child(child);
    }
    items[index] = group;
}

fn block_emptied(block: &XmlElement, updates: &[DefinitionUpdate]) -> bool {
    let removed: Vec<usize> = updates
        .iter()
        .filter(|u| u.xml.is_none())
        .filter_map(|u| u.existing.as_ref().map(|s| s.start))
        .collect();
    !removed.is_empty()
        && block
            .all_children()
            .iter()
            .all(|child| removed.contains(&child.provenance.span.start))
}

fn new_block(location: &LocationKey, definitions: &[String]) -> String {
    let path = if location.path.is_empty() { "." } else { location.path.as_str() };
    let mut el = XmlElement::build(LOCATION).with_attribute("path", path);
    if location.override_mode != OverrideMode::Inherit {
        el = el.with_attribute("overrideMode", location.override_mode.as_str());
    }
    if !location.inherit_in_child_apps {
        el = el.with_attribute("inheritInChildApplications", "false");
    }
    let mut out = open_tag(&el);
    for xml in definitions {
        out.push('\n');
        out.push_str(INDENT);
        out.push_str(&reindent(xml, INDENT));
    }
    out.push_str("\n</");
    out.push_str(LOCATION);
    out.push('>');
    out
}

fn open_tag(el: &XmlElement) -> String {
    let xml = el.to_xml_string();
    match xml.strip_suffix(" />") {
        Some(head) => format!("{}>", head),
        None => xml,
    }
}

/// Edits that add `first` at the start and `last` at the end of `block`.
fn insert_into(doc: &XmlDocument, block: &XmlElement, first: Vec<String>, last: Vec<String>) -> Vec<(Range<usize>, String)> {
    let text: &str = &doc.text;
    let block_indent = doc.indentation_at(block.provenance.span.start).to_string();
    let child_indent = match block.all_children().first() {
        Some(child) => doc.indentation_at(child.provenance.span.start).to_string(),
        None => format!("{}{}", block_indent, INDENT),
    };
    let line = |xml: &str| format!("{}{}", child_indent, reindent(xml, &child_indent));

    let Some(content) = block.content_span.clone() else {
        let head = text
            .get(block.start_tag.clone())
            .unwrap_or_default()
            .trim_end()
            .trim_end_matches("/>")
            .trim_end();
        let mut out = format!("{}>", head);
        for xml in first.iter().chain(&last) {
            out.push('\n');
            out.push_str(&line(xml));
        }
        out.push('\n');
        out.push_str(&block_indent);
        out.push_str(&format!("</{}>", block.qualified_name()));
        return vec![(block.provenance.span.clone(), out)];
    };

    let mut edits = Vec::new();
    if !first.is_empty() {
        let mut out = String::new();
        for xml in &first {
            out.push('\n');
            out.push_str(&line(xml));
        }
        edits.push((content.start..content.start, out));
    }
    if !last.is_empty() {
        let close = content.end;
        let line_start = text[..close].rfind('\n').map_or(0, |i| i + 1);
        if line_start > content.start && text[line_start..close].trim().is_empty() {
            let mut out = String::new();
            for xml in &last {
                out.push_str(&line(xml));
                out.push('\n');
            }
            edits.push((line_start..line_start, out));
        } else {
            let mut out = String::new();
            for xml in &last {
                out.push('\n');
                out.push_str(&line(xml));
            }
            out.push('\n');
            out.push_str(&block_indent);
            edits.push((close..close, out));
        }
    }
    edits
}

/// Prefix every line after the first with `indent`.
pub(crate) fn reindent(xml: &str, indent: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    for (i, line) in xml.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(indent);
            }
        }
        out.push_str(line);
    }
    out
}

/// Widen `span` to whole lines when nothing else shares them.
fn whole_lines(text: &str, span: Range<usize>) -> Range<usize> {
    let line_start = text[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[span.end..]
        .find('\n')
        .map_or(text.len(), |i| span.end + i);
    if text[line_start..span.start].trim().is_empty() && text[span.end..line_end].trim().is_empty() {
        line_start..(line_end + 1).min(text.len())
    } else {
        span
    }
}

fn apply_edits(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start).then(b.0.end.cmp(&a.0.end)));
    let mut out = text.to_string();
    for (range, replacement) in edits {
        out.replace_range(range, &replacement);
    }
    out
}

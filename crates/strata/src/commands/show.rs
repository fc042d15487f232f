//! Show command implementation

use anyhow::Result;
use serde_json::{Map, Value, json};
use strata_config::{ElementValue, SaveMode, ValueOrigin};

use super::Context;

pub fn execute(context: &Context, config_key: &str) -> Result<()> {
    let value = context.system.get_raw_merged_value(&context.path, config_key)?;
    if context.json {
        let sources: Vec<String> = value.sources.iter().map(ToString::to_string).collect();
        return context.print_json(&json!({
            "section": value.config_key,
            "path": context.path.as_str(),
            "sources": sources,
            "value": element_json(&value.root),
        }));
    }

    for source in &value.sources {
        println!("<!-- {} -->", source);
    }
    match value.root.unmerge(None, SaveMode::Full)? {
        Some(xml) => println!("{}", xml.to_xml_string()),
        None => println!("<{} />", value.root.name()),
    }
    Ok(())
}

fn origin_str(origin: ValueOrigin) -> &'static str {
    match origin {
        ValueOrigin::Default => "default",
        ValueOrigin::Inherited => "inherited",
        ValueOrigin::SetHere => "here",
    }
}

/// Merged value as JSON: attributes with their origin and lock state, child
/// elements, then collection items.
pub(crate) fn element_json(element: &ElementValue) -> Value {
    let mut out = Map::new();

    let mut attributes = Map::new();
    for (name, property) in element.properties() {
        let Some(text) = property.text() else {
            continue;
        };
        let mut entry = json!({ "value": text, "origin": origin_str(property.origin) });
        if property.locked {
            entry["locked"] = Value::Bool(true);
        }
        attributes.insert(name.to_string(), entry);
    }
    out.insert("attributes".into(), Value::Object(attributes));

    let elements: Map<String, Value> = element
        .elements()
        .filter(|(_, child)| child.is_present() || child.properties().any(|(_, p)| p.text().is_some()))
        .map(|(name, child)| (name.to_string(), element_json(child)))
        .collect();
    if !elements.is_empty() {
        out.insert("elements".into(), Value::Object(elements));
    }

    if let Some(collection) = element.collection() {
        let items = collection
            .items()
            .iter()
            .map(|item| {
                let mut value = element_json(&item.value);
                value["key"] = Value::String(item.key.clone());
                value["origin"] = Value::String(origin_str(item.origin).into());
                value
            })
            .collect();
        out.insert("items".into(), Value::Array(items));
    }

    let locked = element.locked_attributes();
    if !locked.is_empty() {
        out.insert("lockedAttributes".into(), json!(locked));
    }
    if element.is_item_locked() {
        out.insert("lockItem".into(), Value::Bool(true));
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_config::{ConfigHost, ConfigPath, ConfigSystem, MemoryFileAccessor, SchemaRegistry};

    #[test]
    fn test_element_json_reports_item_origins() {
        let files = MemoryFileAccessor::new()
            .with_file(
                "machine.config",
                r#"<configuration><appSettings><add key="mode" value="prod" /></appSettings></configuration>"#,
            )
            .with_file(
                "app.config",
                r#"<configuration><appSettings><add key="name" value="demo" /></appSettings></configuration>"#,
            );
        let host = ConfigHost::new("machine.config").with_application("app.config");
        let system = ConfigSystem::new(host, Arc::new(SchemaRegistry::with_builtins()), Arc::new(files));
        let value = system
            .get_raw_merged_value(&ConfigPath::new("machine/app"), "appSettings")
            .unwrap();

        let json = element_json(&value.root);
        let items = json["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["key"], "mode");
        assert_eq!(items[0]["origin"], "inherited");
        assert_eq!(items[1]["key"], "name");
        assert_eq!(items[1]["origin"], "here");
        assert_eq!(items[1]["attributes"]["value"]["value"], "demo");
    }
}

//! Unmerge command implementation

use anyhow::{Result, bail};
use serde_json::json;
use strata_config::SaveMode;
use tracing::info;

use super::Context;

pub fn execute(context: &Context, config_key: &str, mode: SaveMode) -> Result<()> {
    if context.has_location {
        bail!("--location does not apply to unmerge; it works on a whole level's file");
    }
    let mut config = context.system.open_configuration(context.level)?;
    let value = config.section(config_key)?.root.clone();
    let parent = config.parent_value(config_key)?.cloned();
    let xml = value
        .unmerge(parent.as_ref(), mode)?
        .map(|element| element.to_xml_string());

    if context.json {
        return context.print_json(&json!({
            "section": config_key,
            "level": context.level.as_str(),
            "mode": mode.as_str(),
            "xml": xml,
        }));
    }
    match xml {
        Some(xml) => println!("{}", xml),
        None => info!(section = config_key, level = %context.level, "nothing to write"),
    }
    Ok(())
}

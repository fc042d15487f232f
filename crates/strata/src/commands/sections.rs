//! Sections command implementation

use anyhow::Result;
use serde::Serialize;
use strata_config::FactoryRecord;

use super::Context;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SectionReport<'a> {
    config_key: &'a str,
    #[serde(rename = "type")]
    type_name: Option<&'a str>,
    allow_definition: &'static str,
    allow_exe_definition: &'static str,
    allow_location: bool,
    override_mode_default: &'static str,
    declared_in: Option<String>,
}

impl<'a> From<&'a FactoryRecord> for SectionReport<'a> {
    fn from(record: &'a FactoryRecord) -> Self {
        Self {
            config_key: &record.config_key,
            type_name: record.type_name.as_deref(),
            allow_definition: record.allow_definition.as_str(),
            allow_exe_definition: record.allow_exe_definition.as_str(),
            allow_location: record.allow_location,
            override_mode_default: record.override_mode_default.as_str(),
            declared_in: record.declared_in.as_ref().map(ToString::to_string),
        }
    }
}

pub fn execute(context: &Context) -> Result<()> {
    let mut records = context.system.declared_sections(&context.path)?;
    records.sort_by(|a, b| a.config_key.cmp(&b.config_key));

    if context.json {
        let reports: Vec<SectionReport<'_>> = records.iter().map(SectionReport::from).collect();
        return context.print_json(&reports);
    }
    for record in &records {
        println!(
            "{:<32} {:<24} {}",
            record.config_key,
            record.type_name.as_deref().unwrap_or("-"),
            record
                .declared_in
                .as_ref()
                .map_or_else(|| "(built-in)".to_string(), ToString::to_string),
        );
    }
    Ok(())
}

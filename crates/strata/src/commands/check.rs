//! Check command implementation

use anyhow::{Result, bail};
use serde::Serialize;
use strata_config::{ConfigError, ErrorScope};
use tracing::info;

use super::Context;

#[derive(Debug, Serialize)]
pub(crate) struct ErrorReport {
    kind: String,
    scope: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
}

impl From<&ConfigError> for ErrorReport {
    fn from(error: &ConfigError) -> Self {
        Self {
            kind: format!("{:?}", error.kind),
            scope: match error.scope {
                ErrorScope::Local => "local",
                ErrorScope::Global => "global",
                ErrorScope::NonSpecific => "non-specific",
            },
            message: error.message.clone(),
            file: error.file.as_deref().map(str::to_string),
            line: (error.line > 0).then_some(error.line),
            section: error.section.clone(),
        }
    }
}

pub fn execute(context: &Context) -> Result<()> {
    let errors = context.system.check(&context.path)?;
    if context.json {
        let reports: Vec<ErrorReport> = errors.iter().map(ErrorReport::from).collect();
        context.print_json(&reports)?;
    } else {
        for error in &errors {
            match &error.section {
                Some(section) => println!("{} [{}]", error, section),
                None => println!("{}", error),
            }
        }
    }

    if !errors.is_empty() {
        bail!("{} configuration error(s) at {}", errors.len(), context.path);
    }
    info!(path = %context.path, "no configuration errors");
    Ok(())
}

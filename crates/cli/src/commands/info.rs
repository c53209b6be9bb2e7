//! protocols and functions

use anyhow::Result;
use serde::Serialize;
use tspec_core::registry::{ProtocolInfo, ProtocolSource};
use tspec_core::variables::{builtin_functions, BuiltinFunction};
use tspec_core::Engine;

use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Serialize)]
struct ProtocolRow {
    #[serde(flatten)]
    info: ProtocolInfo,
    healthy: bool,
    health: String,
}

impl TableDisplay for ProtocolRow {
    fn headers() -> Vec<&'static str> {
        vec!["PROTOCOL", "SOURCE", "PLUGIN", "HEALTH"]
    }

    fn row(&self) -> Vec<String> {
        let source = match self.info.source {
            ProtocolSource::Builtin => "builtin",
            ProtocolSource::Registered => "registered",
            ProtocolSource::Plugin => "plugin",
        };
        vec![
            self.info.name.clone(),
            source.to_string(),
            self.info.plugin.clone().unwrap_or_else(|| "-".to_string()),
            format!("{} {}", output::status_label(self.healthy), self.health),
        ]
    }
}

impl TableDisplay for BuiltinFunction {
    fn headers() -> Vec<&'static str> {
        vec!["FUNCTION", "USAGE", "DESCRIPTION"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.to_string(),
            format!("${{{}}}", self.signature),
            self.description.to_string(),
        ]
    }
}

/// List registered protocols with their health
pub async fn protocols(engine: &Engine, format: OutputFormat) -> Result<i32> {
    let registry = engine.registry();
    let mut rows = Vec::new();
    for info in registry.describe_protocols() {
        let health = registry.health_check(&info.name).await;
        rows.push(ProtocolRow {
            info,
            healthy: health.healthy,
            health: health.message,
        });
    }
    output::print_list(&rows, format);
    Ok(0)
}

pub fn functions(format: OutputFormat) -> Result<i32> {
    output::print_list(builtin_functions(), format);
    Ok(0)
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Serialization used for exported units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Yaml,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "yaml",
            ExportFormat::Json => "json",
        }
    }

    /// Render a unit document as text
    pub fn render(&self, unit: &serde_json::Value) -> Result<String> {
        match self {
            ExportFormat::Yaml => serde_yaml::to_string(unit).context("Failed to render YAML"),
            ExportFormat::Json => {
                let mut text = serde_json::to_string_pretty(unit).context("Failed to render JSON")?;
                text.push('\n');
                Ok(text)
            }
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::parse_unit_str;
    use serde_json::json;
    use std::path::Path;

    #[test]
    fn test_rendered_units_parse_back() {
        let unit = json!({"Widget": {"meta": {"storageName": "widgets"}, "data": [{"name": "Gadget", "price": 10}]}});

        for format in [ExportFormat::Yaml, ExportFormat::Json] {
            let text = format.render(&unit).unwrap();
            let locator = format!("widgets.{}", format.extension());
            let parsed = parse_unit_str(Path::new(&locator), &text).unwrap();
            assert_eq!(parsed.entity_name, "Widget");
            assert_eq!(parsed.records().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_yaml_keeps_field_order() {
        let unit = json!({"Widget": {"data": {"zeta": 1, "alpha": 2}}});
        let text = ExportFormat::Yaml.render(&unit).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }
}

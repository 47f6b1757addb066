use serde::Deserialize;
use serde_json::Value;

/// AuroraVision `PlantEnergy.json` summary.
#[derive(Debug, Deserialize)]
pub struct PlantEnergy {
    pub status: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub field: Option<String>,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start_label: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl Field {
    pub fn is(&self, field: &str) -> bool {
        self.field.as_deref() == Some(field)
    }
}

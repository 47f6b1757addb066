use super::as_f64;
use crate::model::PowerStatus;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub current_power: Option<Value>,
    pub daily_energy: Option<Value>,
    /* older portal releases report daily energy under this name */
    pub day_power: Option<Value>,
}

#[derive(Deserialize)]
pub struct TotalRealKpi {
    #[serde(default)]
    pub success: bool,
    pub data: Option<Data>,
}

impl TotalRealKpi {
    /// `None` when the portal answered without usable data.
    pub fn into_power_status(self) -> Option<PowerStatus> {
        if !self.success {
            return None;
        }
        let data = self.data?;
        let current_power_kw = data.current_power.as_ref().and_then(as_f64)?;

        Some(PowerStatus {
            current_power_kw,
            energy_today_kwh: data.daily_energy.as_ref().and_then(as_f64),
            total_power_today_kwh: data.day_power.as_ref().and_then(as_f64),
        })
    }
}

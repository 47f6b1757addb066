mod get_kpi_station;
mod get_station_real_kpi;
mod get_stations_list;
mod plant_energy;
mod power_status;

pub use get_kpi_station::GetKpiStation;
pub use get_station_real_kpi::GetStationRealKpi;
pub use get_stations_list::GetStationsList;
pub use plant_energy::{Field, PlantEnergy};
pub use power_status::TotalRealKpi;

use num_derive::FromPrimitive;
use serde_json::Value;

/* `failCode` values of the northbound API that need distinct handling */
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum FailCode {
    UserMustRelogin = 305,
    AccessFrequencyIsTooHigh = 407,
}

/// Read a numeric value that providers send either as a JSON number or as a numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

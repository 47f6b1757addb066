use serde::Deserialize;
use serde_json::{Map, Value};

/// Shared shape of `getKpiStationHour` and `getKpiStationDay` records.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub station_code: String,
    /* milliseconds since epoch */
    #[serde(default)]
    pub collect_time: i64,
    #[serde(default)]
    pub data_item_map: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct GetKpiStation {
    pub data: Option<Vec<Data>>,
}

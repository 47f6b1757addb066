use serde::Deserialize;
use serde_json::{Map, Value};

/* `dataItemMap` keys vary between installations, so it is kept loosely typed */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub station_code: String,
    #[serde(default)]
    pub data_item_map: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct GetStationRealKpi {
    pub data: Option<Vec<Data>>,
}

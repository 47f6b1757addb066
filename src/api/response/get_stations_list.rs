use serde::Deserialize;

#[derive(Deserialize)]
pub struct Data {
    #[serde(rename = "stationCode")]
    pub station_code: String,
    #[serde(rename = "stationName", default)]
    pub station_name: String,
    /* MWp */
    #[serde(default)]
    pub capacity: f64,
}

#[derive(Deserialize)]
pub struct GetStationsList {
    pub data: Vec<Data>,
}

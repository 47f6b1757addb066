use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

type KWh = f64;
type KW = f64;

/// FusionSolar northbound API account.
#[derive(Debug, Clone)]
pub struct Api {
    pub api_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoggedInApi {
    pub api_url: String,
    pub xsrf_token: String,
    pub client: reqwest::Client,
}

/// AuroraVision account and the endpoints it is queried through.
#[derive(Debug, Clone)]
pub struct AuroraApi {
    pub login_url: String,
    pub data_url: String,
    pub timezone: String,
    pub username: String,
    pub password: String,
}

/// Cookie-authenticated AuroraVision client; clones share one cookie store.
#[derive(Debug, Clone)]
pub struct AuroraSession {
    pub client: reqwest::Client,
}

/// FusionSolar web portal account.
#[derive(Debug, Clone)]
pub struct PortalAccount {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Station {
    /* kWp */
    pub capacity: KW,
    pub name: String,
    pub code: String,
}

/// One station record of the real-time, hourly or daily KPI endpoints.
#[derive(Debug, Clone)]
pub struct StationKpi {
    pub code: String,
    pub collect_time: i64,
    pub data_item_map: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerStatus {
    pub current_power_kw: KW,
    pub energy_today_kwh: Option<KWh>,
    pub total_power_today_kwh: Option<KWh>,
}

/// Portal transport state persisted between process runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSession {
    pub base_url: String,
    pub cookies: String,
    pub roarand: Option<String>,
    pub saved_at: DateTime<Utc>,
}

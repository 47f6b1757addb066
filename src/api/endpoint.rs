pub type Endpoint = str;

/* FusionSolar northbound API (thirdData) */
pub const LOGIN: &Endpoint = "/login";
pub const LOGOUT: &Endpoint = "/logout";
pub const STATIONS: &Endpoint = "/getStationList";
pub const STATION_REAL_KPI: &Endpoint = "/getStationRealKpi";
pub const STATION_HOUR_KPI: &Endpoint = "/getKpiStationHour";
pub const STATION_DAY_KPI: &Endpoint = "/getKpiStationDay";

/* FusionSolar web portal */
pub const PORTAL_LOGIN: &Endpoint = "/unisso/v3/validateUser.action";
pub const PORTAL_LOGOUT: &Endpoint = "/unisso/logout";
pub const PORTAL_VERIFY_CODE: &Endpoint = "/unisso/verifycode";
pub const PORTAL_POWER_STATUS: &Endpoint = "/rest/pvms/web/station/v1/station/total-real-kpi";
pub const PORTAL_SESSION_ALIVE: &Endpoint = "/rest/dpcloud/auth/v1/is-session-alive";
pub const PORTAL_KEEP_ALIVE: &Endpoint = "/rest/dpcloud/auth/v1/keep-alive";

/* AuroraVision */
pub const AURORA_LOGIN_URL: &str = "https://www.auroravision.net/ums/v1/login?setCookie=true";
pub const AURORA_PLANT_ENERGY_URL: &str =
    "https://easyview.auroravision.net/easyview/services/gmi/summary/PlantEnergy.json";

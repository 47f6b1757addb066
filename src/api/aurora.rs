use super::{map_api_err, response::PlantEnergy, Error, REQUEST_TIMEOUT};
use crate::model::{AuroraApi, AuroraSession};
use reqwest::header::{self, HeaderMap, HeaderValue};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const ACCEPT: &str = "application/json, text/plain, */*";
const API_VERSION: &str = "2.1.52";

pub fn api(username: String, password: String) -> AuroraApi {
    AuroraApi {
        login_url: String::from(super::endpoint::AURORA_LOGIN_URL),
        data_url: String::from(super::endpoint::AURORA_PLANT_ENERGY_URL),
        timezone: String::from("Europe/Rome"),
        username,
        password,
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers
}

pub async fn login(api: &AuroraApi) -> Result<AuroraSession, Error> {
    if api.username.is_empty() || api.password.is_empty() {
        return Err(Error::LoginError(String::from(
            "missing AuroraVision credentials",
        )));
    }

    let client = reqwest::ClientBuilder::new()
        .cookie_store(true)
        .default_headers(browser_headers())
        .timeout(REQUEST_TIMEOUT)
        .build()
        .or(Err(Error::InternalError))?;

    let response = client
        .get(&api.login_url)
        .basic_auth(&api.username, Some(&api.password))
        .send()
        .await
        .map_err(|e| Error::LoginError(e.to_string()))?;

    match response.status() {
        http::StatusCode::OK => Ok(AuroraSession { client }),
        status => Err(Error::LoginError(format!(
            "server responded {}",
            status.as_u16()
        ))),
    }
}

/// Fetch today's energy summary of `entity_id`.
///
/// 401/403 surface as `Error::SessionExpired` so callers can drop the cookie session; other
/// non-200 statuses surface as `Error::HttpStatus`.
pub async fn plant_energy(
    session: &AuroraSession,
    api: &AuroraApi,
    entity_id: &str,
) -> Result<PlantEnergy, Error> {
    let response = session
        .client
        .get(&api.data_url)
        .query(&[
            ("eids", entity_id),
            ("tz", api.timezone.as_str()),
            ("nDays", "0"),
            ("v", API_VERSION),
        ])
        .send()
        .await
        .map_err(map_api_err)?;

    match response.status() {
        http::StatusCode::OK => {}
        http::StatusCode::UNAUTHORIZED | http::StatusCode::FORBIDDEN => {
            return Err(Error::SessionExpired(response.status().as_u16()))
        }
        status => return Err(Error::HttpStatus(status.as_u16())),
    }

    let text = response
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

    log::trace!("entity: {}, response_text: {}", entity_id, text);

    serde_json::from_str(&text).map_err(|e| Error::InvalidResponse(text, e.to_string()))
}

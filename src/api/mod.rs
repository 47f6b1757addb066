pub mod aurora;
pub mod endpoint;
pub mod error;
pub mod portal;
pub mod response;

use crate::model;
use chrono::{DateTime, Local};
pub use error::Error;
use reqwest::Response;
use response::{GetKpiStation, GetStationRealKpi, GetStationsList};
use serde_json::{json, Value};
use std::time::Duration;

const XSRF_TOKEN: &str = "XSRF-TOKEN";

/// Upper bound for every provider request; no call may stall a polling cycle.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn api(api_url: String, username: String, password: String) -> model::Api {
    model::Api {
        api_url,
        username,
        password,
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, Error> {
    reqwest::ClientBuilder::new()
        .cookie_store(true)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .or(Err(Error::InternalError))
}

fn extract_xsrf_token(response: Response) -> Result<String, Error> {
    response
        .cookies()
        .find(|cookie| cookie.name() == XSRF_TOKEN)
        .ok_or_else(|| {
            Error::LoginError(format!(
                "No XSRF-TOKEN received (server responded {})",
                response.status()
            ))
        })
        .map(|cookie| String::from(cookie.value()))
}

/// Map Non-200 API response to Error
pub(crate) fn map_api_err(error: reqwest::Error) -> Error {
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) => Error::LoginError(error.to_string()),
        _ if error.is_timeout() => Error::ApiError(format!("request timed out: {}", error)),
        _ => Error::ApiError(error.to_string()),
    }
}

/// Process value of valid HTTP response (2xx) to identify potential API-level error indicated
/// with non-true `success`. Return specific or generic error in that case or carry the `value`
/// forward if it is identified as successful response.
fn map_response_status(value: Value) -> Result<Value, Error> {
    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let fail_code = value.get("failCode").and_then(Value::as_u64);

    if success {
        Ok(value)
    } else {
        match fail_code.and_then(num::FromPrimitive::from_u64) {
            /* {"data":"ACCESS_FREQUENCY_IS_TOO_HIGH","failCode":407,"params":null,"success":false} */
            Some(response::FailCode::AccessFrequencyIsTooHigh) => {
                Err(Error::RateExceeded(value.to_string()))
            }
            Some(response::FailCode::UserMustRelogin) => Err(Error::LoginError(value.to_string())),
            _ => Err(Error::ApiError(value.to_string())),
        }
    }
}

pub async fn login(api: &model::Api) -> Result<model::LoggedInApi, Error> {
    if api.username.is_empty() || api.password.is_empty() {
        return Err(Error::LoginError(String::from(
            "missing northbound credentials",
        )));
    }

    let client = http_client()?;
    let url = format!("{}{}", api.api_url, endpoint::LOGIN);

    let request_body = json!({
        "userName": api.username,
        "systemCode": api.password,
    });

    client
        .post(url)
        .json(&request_body)
        .send()
        .await
        .map_err(map_api_err)
        .map(extract_xsrf_token)?
        .map(|token| model::LoggedInApi {
            api_url: api.api_url.to_owned(),
            xsrf_token: token,
            client,
        })
}

async fn post(
    api: &model::LoggedInApi,
    endpoint: &endpoint::Endpoint,
    data: Option<&Value>,
) -> Result<Value, Error> {
    let url = format!("{}{}", api.api_url, endpoint);

    let request = match data {
        Some(data) => api.client.post(url.clone()).json(data),
        None => api.client.post(url.clone()),
    }
    .header(XSRF_TOKEN, api.xsrf_token.to_owned());

    let text = request
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

    log::trace!("endpoint: {}, data: {:?}, response_text: {}", endpoint, data, text);

    serde_json::from_str::<Value>(&text)
        .map_err(|e| Error::InvalidResponse(text, e.to_string()))
        .and_then(map_response_status)
}

pub async fn logout(api: &model::LoggedInApi) -> Result<(), Error> {
    let request_body = json!({ "xsrfToken": api.xsrf_token });

    post(api, endpoint::LOGOUT, Some(&request_body))
        .await
        .map(|_| ())
}

pub async fn stations(api: &model::LoggedInApi) -> Result<Vec<model::Station>, Error> {
    post(api, endpoint::STATIONS, None)
        .await
        .map(serde_json::from_value::<GetStationsList>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|response| {
            response
                .data
                .into_iter()
                .map(|sta_resp| model::Station {
                    code: sta_resp.station_code,
                    name: sta_resp.station_name,
                    /* convert MWp to kWp */
                    capacity: sta_resp.capacity * 1000.0,
                })
                .collect()
        })
}

/// Read real-time KPI of specified stations.
pub async fn station_real_kpi(
    api: &model::LoggedInApi,
    codes: &[String],
) -> Result<Vec<model::StationKpi>, Error> {
    let request_body = json!({ "stationCodes": codes.join(",") });

    post(api, endpoint::STATION_REAL_KPI, Some(&request_body))
        .await
        .map(serde_json::from_value::<GetStationRealKpi>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|response| {
            response
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|resp| model::StationKpi {
                    code: resp.station_code,
                    collect_time: 0,
                    data_item_map: resp.data_item_map,
                })
                .collect()
        })
}

/// Hourly KPI of specified stations for the day containing `at`.
pub async fn station_hour_kpi(
    api: &model::LoggedInApi,
    codes: &[String],
    at: DateTime<Local>,
) -> Result<Vec<model::StationKpi>, Error> {
    station_kpi_history(api, endpoint::STATION_HOUR_KPI, codes, at).await
}

/// Daily KPI of specified stations for the month containing `at`.
pub async fn station_day_kpi(
    api: &model::LoggedInApi,
    codes: &[String],
    at: DateTime<Local>,
) -> Result<Vec<model::StationKpi>, Error> {
    station_kpi_history(api, endpoint::STATION_DAY_KPI, codes, at).await
}

async fn station_kpi_history(
    api: &model::LoggedInApi,
    endpoint: &endpoint::Endpoint,
    codes: &[String],
    at: DateTime<Local>,
) -> Result<Vec<model::StationKpi>, Error> {
    let request_body = json!({
        "stationCodes": codes.join(","),
        "collectTime": at.timestamp_millis(),
    });

    post(api, endpoint, Some(&request_body))
        .await
        .map(serde_json::from_value::<GetKpiStation>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|response| {
            response
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|resp| model::StationKpi {
                    code: resp.station_code,
                    collect_time: resp.collect_time,
                    data_item_map: resp.data_item_map,
                })
                .collect()
        })
}

use super::endpoint::{self, Endpoint};
use super::response::TotalRealKpi;
use super::{map_api_err, Error, REQUEST_TIMEOUT};
use crate::model::{CachedSession, PortalAccount, PowerStatus};
use chrono::Utc;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Response, Url};
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};

const ROARAND: &str = "roarand";
const CAPTCHA_REQUIRED: &str = "411";

/// Turns a CAPTCHA image into its text.
pub trait CaptchaSolver: Send + Sync {
    fn solve(&self, image: &[u8]) -> Result<String, Error>;
}

pub struct Portal {
    account: PortalAccount,
    base: Url,
    cookies: Arc<Jar>,
    client: reqwest::Client,
    roarand: RwLock<Option<String>>,
}

fn timestamp() -> String {
    Utc::now().timestamp_millis().to_string()
}

/* `errorCode` arrives as null, a string or a number depending on the region */
fn error_code(value: &Value) -> Option<String> {
    match value.get("errorCode")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.to_owned()),
        other => Some(other.to_string()),
    }
}

impl Portal {
    pub fn new(account: PortalAccount) -> Result<Self, Error> {
        let base = Url::parse(&account.base_url)
            .map_err(|e| Error::Config(format!("invalid portal URL {}: {}", account.base_url, e)))?;
        let cookies = Arc::new(Jar::default());
        let client = reqwest::ClientBuilder::new()
            .cookie_provider(cookies.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .or(Err(Error::InternalError))?;

        Ok(Portal {
            account,
            base,
            cookies,
            client,
            roarand: RwLock::new(None),
        })
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("{}{}", self.account.base_url.trim_end_matches('/'), endpoint)
    }

    fn roarand(&self) -> Option<String> {
        self.roarand
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_roarand(&self, token: Option<String>) {
        *self.roarand.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Load a previously exported transport state into this client.
    pub fn restore(&self, cached: &CachedSession) {
        cached
            .cookies
            .split(';')
            .map(str::trim)
            .filter(|cookie| !cookie.is_empty())
            .for_each(|cookie| self.cookies.add_cookie_str(cookie, &self.base));
        self.set_roarand(cached.roarand.clone());
    }

    pub fn export(&self) -> CachedSession {
        let cookies = self
            .cookies
            .cookies(&self.base)
            .and_then(|value| value.to_str().ok().map(String::from))
            .unwrap_or_default();

        CachedSession {
            base_url: self.account.base_url.to_owned(),
            cookies,
            roarand: self.roarand(),
            saved_at: Utc::now(),
        }
    }

    async fn get(&self, endpoint: &Endpoint, query: &[(&str, String)]) -> Result<Response, Error> {
        let mut request = self.client.get(self.url(endpoint)).query(query);
        if let Some(token) = self.roarand() {
            request = request.header(ROARAND, token);
        }
        request.send().await.map_err(map_api_err)
    }

    async fn json(response: Response) -> Result<Value, Error> {
        let text = response
            .text()
            .await
            .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;
        log::trace!("portal response_text: {}", text);
        serde_json::from_str(&text).map_err(|e| Error::InvalidResponse(text, e.to_string()))
    }

    async fn validate_user(&self, verify_code: Option<&str>) -> Result<Value, Error> {
        let mut body = json!({
            "organizationName": "",
            "username": self.account.username,
            "password": self.account.password,
        });
        if let Some(code) = verify_code {
            body["verifycode"] = Value::from(code);
        }

        let response = self
            .client
            .post(self.url(endpoint::PORTAL_LOGIN))
            .query(&[("timeStamp", timestamp())])
            .json(&body)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| Error::LoginError(e.to_string()))?;

        Self::json(response).await
    }

    async fn captcha_image(&self) -> Result<Vec<u8>, Error> {
        self.get(endpoint::PORTAL_VERIFY_CODE, &[("timestamp", timestamp())])
            .await?
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::LoginError(format!("unable to read CAPTCHA image: {}", e)))
    }

    /// Authenticate with username and password, answering one CAPTCHA challenge if asked.
    pub async fn login(&self, solver: Option<&dyn CaptchaSolver>) -> Result<(), Error> {
        if self.account.username.is_empty() || self.account.password.is_empty() {
            return Err(Error::LoginError(String::from(
                "missing FusionSolar credentials",
            )));
        }

        let mut verify_code: Option<String> = None;
        let response = loop {
            let response = self.validate_user(verify_code.as_deref()).await?;
            match error_code(&response) {
                None => break response,
                Some(code) if code == CAPTCHA_REQUIRED && verify_code.is_none() => {
                    let solver = solver.ok_or(Error::CaptchaRequired)?;
                    log::info!("FusionSolar login challenged with a CAPTCHA");
                    let image = self.captcha_image().await?;
                    verify_code = Some(solver.solve(&image)?);
                }
                Some(code) => {
                    let message = response
                        .get("errorMsg")
                        .and_then(Value::as_str)
                        .unwrap_or("(no error message received)");
                    return Err(Error::LoginError(format!("Error {}: {}", code, message)));
                }
            }
        };

        /* multi-region accounts finish the SSO handshake on a region-specific URL */
        if let Some(redirect) = response
            .get("respMultiRegionName")
            .and_then(|v| v.get(1))
            .and_then(Value::as_str)
        {
            self.client
                .get(self.url(redirect))
                .send()
                .await
                .map_err(|e| Error::LoginError(e.to_string()))?;
        }

        self.keep_alive().await
    }

    pub async fn logout(&self) -> Result<(), Error> {
        self.get(endpoint::PORTAL_LOGOUT, &[]).await.map(|_| ())
    }

    /// Current plant power; `Ok(None)` when the portal answers without data.
    pub async fn power_status(&self) -> Result<Option<PowerStatus>, Error> {
        let now = timestamp();
        let response = self
            .get(
                endpoint::PORTAL_POWER_STATUS,
                &[
                    ("queryTime", now.clone()),
                    ("timeZone", String::from("1")),
                    ("_", now),
                ],
            )
            .await?;

        match response.status() {
            status if status.is_success() => {}
            http::StatusCode::UNAUTHORIZED | http::StatusCode::FORBIDDEN => {
                return Err(Error::SessionExpired(response.status().as_u16()))
            }
            status => return Err(Error::HttpStatus(status.as_u16())),
        }

        let value = Self::json(response).await?;
        serde_json::from_value::<TotalRealKpi>(value)
            .or(Err(Error::UnexpectedApiResponse))
            .map(TotalRealKpi::into_power_status)
    }

    /// Whether the portal still considers this session alive. Portals without the
    /// endpoint report the session as alive.
    pub async fn is_session_active(&self) -> Result<bool, Error> {
        let response = self.get(endpoint::PORTAL_SESSION_ALIVE, &[]).await?;
        if response.status() == http::StatusCode::NOT_FOUND {
            return Ok(true);
        }

        let value = Self::json(response).await?;
        Ok(value.get("code").and_then(Value::as_i64) == Some(0))
    }

    /// Extend the session and refresh the `roarand` token. A no-op on portals without the
    /// endpoint.
    pub async fn keep_alive(&self) -> Result<(), Error> {
        let response = self.get(endpoint::PORTAL_KEEP_ALIVE, &[]).await?;
        if response.status() == http::StatusCode::NOT_FOUND {
            return Ok(());
        }

        let value = Self::json(response).await?;
        if value.get("code").and_then(Value::as_i64) != Some(0) {
            return Err(Error::ApiError(format!("keep-alive rejected: {}", value)));
        }
        if let Some(token) = value.get("payload").and_then(Value::as_str) {
            self.set_roarand(Some(token.to_owned()));
        }
        Ok(())
    }
}

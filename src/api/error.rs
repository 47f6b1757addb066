use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("login failed: {0}")]
    LoginError(String),
    #[error("API error: {0}")]
    ApiError(String),
    /// HTTP 401/403 from a provider that authenticates with a session cookie.
    #[error("session expired (HTTP {0})")]
    SessionExpired(u16),
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    #[error("API frequency limit exceeded: {0}")]
    RateExceeded(String),
    #[error("unexpected API response")]
    UnexpectedApiResponse,
    #[error("invalid API response ({1})")]
    InvalidResponse(String, String),
    #[error("data unavailable")]
    DataUnavailable,
    #[error("login requires a CAPTCHA solver")]
    CaptchaRequired,
    #[error("session cache error: {0}")]
    Cache(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("plant not found: {0}")]
    PlantNotFound(String),
    #[error("internal error")]
    InternalError,
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = match self {
            Error::PlantNotFound(_) => Status::NotFound,
            Error::RateExceeded(_) => Status::TooManyRequests,
            Error::LoginError(_) => Status::Forbidden,
            _ => Status::InternalServerError,
        };
        let body = serde_json::json!({ "error": self.to_string() }).to_string();

        Response::build()
            .status(status)
            .sized_body(body.len(), Cursor::new(body))
            .header(ContentType::JSON)
            .ok()
    }
}

use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Postgres SQLSTATE raised by an exclusion constraint violation.
pub const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("API error ({status}): {message}")]
    Http {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl DatabaseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DatabaseError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_exclusion_violation(&self) -> bool {
        matches!(self, DatabaseError::Http { code: Some(code), .. } if code == EXCLUSION_VIOLATION)
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

pub struct PostgrestClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl PostgrestClient {
    pub fn new(config: &AppConfig) -> Result<Self, DatabaseError> {
        Self::with_credentials(&config.supabase_url, &config.supabase_anon_key, config.api_key())
    }

    pub fn with_credentials(base_url: &str, anon_key: &str, bearer: &str) -> Result<Self, DatabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", header_value(anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", bearer))?);

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, DatabaseError>
    where
        T: DeserializeOwned,
    {
        self.send(method, path, body, None).await
    }

    /// Like [`request`](Self::request) but asks PostgREST to echo the
    /// affected rows back, which is how writes return their result.
    pub async fn request_returning<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, DatabaseError>
    where
        T: DeserializeOwned,
    {
        self.send(method, path, body, Some("return=representation")).await
    }

    async fn send<T>(&self, method: Method, path: &str, body: Option<Value>, prefer: Option<&'static str>) -> Result<T, DatabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url)
            .headers(self.headers.clone());

        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(parse_error(status, &error_text));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<T>(&bytes)
            .map_err(|e| DatabaseError::Decode(e.to_string()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, DatabaseError> {
    HeaderValue::from_str(value)
        .map_err(|e| DatabaseError::Configuration(format!("invalid header value: {}", e)))
}

fn parse_error(status: StatusCode, body: &str) -> DatabaseError {
    match serde_json::from_str::<PostgrestErrorBody>(body) {
        Ok(parsed) => {
            let message = match (parsed.message, parsed.details) {
                (Some(message), Some(details)) => format!("{} ({})", message, details),
                (Some(message), None) => message,
                (None, Some(details)) => details,
                (None, None) => body.to_string(),
            };
            DatabaseError::Http { status, code: parsed.code, message }
        }
        Err(_) => DatabaseError::Http {
            status,
            code: None,
            message: body.to_string(),
        },
    }
}

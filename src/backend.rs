use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SOS_TRIGGER_PATH: &str = "api/v1/sos/trigger";
const RESCUE_STATIONS_PATH: &str = "api/v1/rescue-stations";
const CONTACTS_PATH: &str = "api/v1/profile/contacts";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned status {0}")]
    Status(u16),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("client error: {0}")]
    Client(String),
}

/// SOS trigger body, shared by live submission and queued-log replay.
#[derive(Clone, Debug, Serialize)]
pub struct SosTriggerRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub user_id: String,
    pub medical_notes: String,
    pub contact_email: Vec<String>,
}

/// Station directory record as the backend ships it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StationRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
    #[serde(rename = "Address")]
    pub address: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContactPayload {
    pub name: String,
    pub phone: String,
    pub relation_type: String,
    pub email: String,
}

/// The remote endpoints the sync engine talks to. A trait seam so tests can
/// swap in a scripted double.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn trigger_sos(&self, request: &SosTriggerRequest) -> Result<(), BackendError>;

    async fn fetch_rescue_stations(&self) -> Result<Vec<StationRecord>, BackendError>;

    async fn push_contact(&self, contact: &ContactPayload) -> Result<(), BackendError>;
}

/// HTTP client for the real backend. Every request carries the configured
/// timeout; a missing token simply sends unauthenticated requests (the SOS
/// and directory endpoints accept them).
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl HttpBackend {
    /// `base_url` should end with a trailing slash so endpoint paths join
    /// under it rather than replacing its last segment.
    pub fn new(
        base_url: Url,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Client(e.to_string()))
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(e.to_string())
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(BackendError::Status(status.as_u16()))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn trigger_sos(&self, request: &SosTriggerRequest) -> Result<(), BackendError> {
        let url = self.endpoint(SOS_TRIGGER_PATH)?;
        let response = self
            .with_auth(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(&response)
    }

    async fn fetch_rescue_stations(&self) -> Result<Vec<StationRecord>, BackendError> {
        let url = self.endpoint(RESCUE_STATIONS_PATH)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(&response)?;

        response
            .json::<Vec<StationRecord>>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn push_contact(&self, contact: &ContactPayload) -> Result<(), BackendError> {
        let url = self.endpoint(CONTACTS_PATH)?;
        let response = self
            .with_auth(self.client.post(url))
            .json(contact)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(&response)
    }
}

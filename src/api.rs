// Backend API client
// Every data-bearing operation is a thin HTTP call; the backend owns the business rules.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::models::{Id, Listing, OrderRequest, OrderResponse, PeakRateInterval, RoomVariant, Single};
use crate::pricing::peak_rates_for;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Client error: {0}")]
    ClientError(String),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::ApiResponseError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

// Token pair returned by the credential and federated exchanges
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

// The refresh exchange only guarantees a new access token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ProviderTokenBody<'a> {
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutBody<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

// Authentication endpoints consumed by the session manager.
#[async_trait]
pub trait AuthApi: Send + Sync + 'static {
    async fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, ApiError>;

    async fn google_login(&self, id_token: &str) -> Result<IssuedTokens, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ApiError>;

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError>;
}

// Rental catalogue and ordering endpoints.
#[async_trait]
pub trait RentalApi: Send + Sync + 'static {
    async fn room_variant(&self, id: Id) -> Result<RoomVariant, ApiError>;

    async fn room_variants_for_property(&self, property_id: Id) -> Result<Vec<RoomVariant>, ApiError>;

    // The backend lists every peak rate; filtering by room happens here.
    async fn peak_rates(&self, room_variant_id: Id) -> Result<Vec<PeakRateInterval>, ApiError>;

    async fn submit_order(
        &self,
        order: &OrderRequest,
        access_token: &str,
    ) -> Result<OrderResponse, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ApiError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout_ms)
            } else {
                ApiError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
            tracing::debug!(status = status.as_u16(), %message, "backend rejected request");
            return Err(ApiError::ApiResponseError {
                status_code: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, ApiError> {
        let request = self
            .client
            .post(self.url("/api/v1/auth/login"))
            .json(&CredentialsBody { email, password });
        self.send::<Single<IssuedTokens>>(request)
            .await
            .map(Single::into_inner)
    }

    async fn google_login(&self, id_token: &str) -> Result<IssuedTokens, ApiError> {
        let request = self
            .client
            .post(self.url("/api/v1/auth/google-login"))
            .json(&ProviderTokenBody { token: id_token });
        self.send::<Single<IssuedTokens>>(request)
            .await
            .map(Single::into_inner)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ApiError> {
        let request = self
            .client
            .post(self.url("/api/v1/auth/refresh"))
            .bearer_auth(refresh_token);
        self.send::<Single<RefreshedToken>>(request)
            .await
            .map(Single::into_inner)
    }

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url("/api/v1/auth/logout"))
            .bearer_auth(access_token)
            .json(&LogoutBody {
                access_token,
                refresh_token,
            });
        self.execute(request).await.map(|_| ())
    }
}

#[async_trait]
impl RentalApi for HttpBackend {
    async fn room_variant(&self, id: Id) -> Result<RoomVariant, ApiError> {
        let request = self.client.get(self.url(&format!("/api/room-variants/{id}")));
        self.send::<Single<RoomVariant>>(request)
            .await
            .map(Single::into_inner)
    }

    async fn room_variants_for_property(&self, property_id: Id) -> Result<Vec<RoomVariant>, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/api/room-variants/property/{property_id}")));
        self.send::<Listing<RoomVariant>>(request)
            .await
            .map(Listing::into_vec)
    }

    async fn peak_rates(&self, room_variant_id: Id) -> Result<Vec<PeakRateInterval>, ApiError> {
        let request = self.client.get(self.url("/peak-rates"));
        let all = self
            .send::<Listing<PeakRateInterval>>(request)
            .await?
            .into_vec();
        Ok(peak_rates_for(room_variant_id, &all))
    }

    async fn submit_order(
        &self,
        order: &OrderRequest,
        access_token: &str,
    ) -> Result<OrderResponse, ApiError> {
        let request = self
            .client
            .post(self.url("/orders"))
            .bearer_auth(access_token)
            .json(order);
        let response = self.execute(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(OrderResponse {
                id: None,
                status: None,
                total_price: None,
            });
        }
        response
            .json::<Single<OrderResponse>>()
            .await
            .map(Single::into_inner)
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }
}

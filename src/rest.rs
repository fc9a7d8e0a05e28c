//! Exchange REST collaborator for the user-data listen-key lifecycle
//! (spec §4.6, §6). Generalizes the teacher's `binance::client::BinanceClient`
//! listen-key operations (`create_listen_key`, `keepalive_listen_key`,
//! `close_listen_key`) behind the trait the WebSocket manager consumes.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::RestError;

const LISTEN_KEY_MISSING: i64 = -1125;
const REST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// The three operations the user-data stream invokes on the REST
/// collaborator (spec §1 non-goal: only this surface is in scope).
#[async_trait]
pub trait ExchangeRestClient: Send + Sync {
    async fn start_user_data_stream(&self) -> Result<String, RestError>;
    async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), RestError>;
    async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), RestError>;
}

/// Documented response wrapper (spec §6): `{code, message, data?}`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ListenKeyData {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

fn check_code(code: i64, message: &str) -> Result<(), RestError> {
    if code == LISTEN_KEY_MISSING {
        Err(RestError::ListenKeyMissing)
    } else if code != 0 {
        Err(RestError::Api {
            code,
            message: message.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Binance user-data-stream REST client. Listen-key operations only need
/// the API-key header, not a signature, so this drops the teacher's
/// HMAC-SHA256 request signing (see DESIGN.md).
pub struct BinanceRestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BinanceRestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .build()
            .map_err(RestError::Http)?;
        Ok(BinanceRestClient {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ExchangeRestClient for BinanceRestClient {
    async fn start_user_data_stream(&self) -> Result<String, RestError> {
        let url = format!("{}/api/v3/userDataStream", self.base_url);
        let resp: ApiResponse<ListenKeyData> = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?
            .json()
            .await?;
        check_code(resp.code, &resp.message)?;
        resp.data
            .map(|d| d.listen_key)
            .ok_or_else(|| RestError::Api {
                code: resp.code,
                message: "missing listenKey in response".into(),
            })
    }

    async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), RestError> {
        let url = format!("{}/api/v3/userDataStream", self.base_url);
        let resp: ApiResponse<ListenKeyData> = self
            .http
            .put(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key)])
            .send()
            .await?
            .json()
            .await?;
        check_code(resp.code, &resp.message)
    }

    async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), RestError> {
        let url = format!("{}/api/v3/userDataStream", self.base_url);
        let result: Result<ApiResponse<serde_json::Value>, reqwest::Error> = async {
            self.http
                .delete(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .query(&[("listenKey", listen_key)])
                .send()
                .await?
                .json()
                .await
        }
        .await;
        match result {
            Ok(resp) => check_code(resp.code, &resp.message),
            Err(e) => {
                warn!(error = %e, "closeUserDataStream failed, treating as best-effort");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_zero_is_ok() {
        assert!(check_code(0, "").is_ok());
    }

    #[test]
    fn code_negative_1125_is_listen_key_missing() {
        assert!(matches!(
            check_code(-1125, "key missing"),
            Err(RestError::ListenKeyMissing)
        ));
    }

    #[test]
    fn other_nonzero_code_is_api_error() {
        let err = check_code(-1, "generic error").unwrap_err();
        assert!(matches!(err, RestError::Api { code: -1, .. }));
    }
}

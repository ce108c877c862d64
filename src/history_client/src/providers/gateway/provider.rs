use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Url};
use shared_utils::env::get_env_var;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::request::{HistoryPage, ListHistoryRequest},
    providers::{
        ApiSnafu, ClientBuildSnafu, DecodeSnafu, HistoryProvider, InvalidEndpointSnafu,
        MissingEnvVarSnafu, ProviderError, ProviderInitError, ReqwestSnafu,
        gateway::response::GatewayResponse, validate_request,
    },
};

/// Environment variable holding the gateway base URL.
pub const ENDPOINT_ENV: &str = "METER_HISTORY_ENDPOINT";

const LIST_PATH: &str = "v1/meterReadings";

pub struct GatewayProvider {
    client: Client,
    base: Url,
}

impl GatewayProvider {
    /// Creates a provider for the gateway at `endpoint`
    /// (e.g. `https://bms.example.com/api/`).
    pub fn new(endpoint: &str) -> Result<Self, ProviderInitError> {
        let mut base = Url::parse(endpoint).map_err(|e| {
            InvalidEndpointSnafu {
                endpoint,
                message: e.to_string(),
            }
            .build()
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return InvalidEndpointSnafu {
                endpoint,
                message: format!("unsupported scheme {}", base.scheme()),
            }
            .fail();
        }
        // `Url::join` drops the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("meter-history/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self { client, base })
    }

    /// Creates a provider from the `METER_HISTORY_ENDPOINT` environment variable.
    pub fn from_env() -> Result<Self, ProviderInitError> {
        let endpoint = get_env_var(ENDPOINT_ENV).context(MissingEnvVarSnafu)?;
        Self::new(&endpoint)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Full URL (path + query) for one page request.
    pub fn request_url(&self, req: &ListHistoryRequest) -> Url {
        let mut url = self
            .base
            .join(LIST_PATH)
            .expect("static relative path joins onto an http(s) base");
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("name", &req.name);
            q.append_pair(
                "period.startTime",
                &req.period
                    .start_time
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            );
            q.append_pair(
                "period.endTime",
                &req.period.end_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
            q.append_pair("pageSize", &req.page_size.to_string());
            if let Some(token) = &req.page_token {
                q.append_pair("pageToken", token);
            }
        }
        url
    }
}

#[async_trait]
impl HistoryProvider for GatewayProvider {
    async fn list_history(&self, req: ListHistoryRequest) -> Result<HistoryPage, ProviderError> {
        validate_request(&req)?;

        let url = self.request_url(&req);
        debug!(name = %req.name, token = ?req.page_token, "requesting history page");

        let response = self.client.get(url).send().await.context(ReqwestSnafu)?;
        let status = response.status();
        let body = response.text().await.context(ReqwestSnafu)?;

        if !status.is_success() {
            let message = if body.is_empty() {
                "Unknown API error".to_string()
            } else {
                body
            };
            return ApiSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        let parsed: GatewayResponse = serde_json::from_str(&body).context(DecodeSnafu)?;
        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serial_test::serial;

    use super::*;
    use crate::models::request::Period;

    fn req(token: Option<&str>) -> ListHistoryRequest {
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 2, 1, 1, 0, 0).unwrap();
        let mut r = ListHistoryRequest::first_page("site/meter 1", Period::new(start, end), 1000);
        r.page_token = token.map(str::to_string);
        r
    }

    #[test]
    fn builds_query_against_base_path() {
        let p = GatewayProvider::new("https://bms.example.com/api").unwrap();
        assert_eq!(p.base_url().as_str(), "https://bms.example.com/api/");

        let url = p.request_url(&req(Some("tok")));
        assert_eq!(url.path(), "/api/v1/meterReadings");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("name".into(), "site/meter 1".into()),
                ("period.startTime".into(), "2025-02-01T00:00:00.000Z".into()),
                ("period.endTime".into(), "2025-02-01T01:00:00.000Z".into()),
                ("pageSize".into(), "1000".into()),
                ("pageToken".into(), "tok".into()),
            ]
        );
    }

    #[test]
    fn first_page_has_no_token() {
        let p = GatewayProvider::new("http://localhost:8080/").unwrap();
        let url = p.request_url(&req(None));
        assert!(url.query_pairs().all(|(k, _)| k != "pageToken"));
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(
            GatewayProvider::new("not a url"),
            Err(ProviderInitError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            GatewayProvider::new("ftp://bms.example.com"),
            Err(ProviderInitError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    #[serial]
    fn from_env_requires_endpoint() {
        // SAFETY: env mutation is serialized through `#[serial]`.
        unsafe {
            std::env::remove_var(ENDPOINT_ENV);
        }
        assert!(matches!(
            GatewayProvider::from_env(),
            Err(ProviderInitError::MissingEnvVar { .. })
        ));

        unsafe {
            std::env::set_var(ENDPOINT_ENV, "http://127.0.0.1:9000/gw");
        }
        let p = GatewayProvider::from_env().unwrap();
        assert_eq!(p.base_url().as_str(), "http://127.0.0.1:9000/gw/");

        unsafe {
            std::env::remove_var(ENDPOINT_ENV);
        }
    }
}

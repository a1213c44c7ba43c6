use std::io::Read;
use std::time::Duration;

use pulse_protocol::{Heartbeat, BULK_ENDPOINT_PATH, MAX_RESPONSE_BYTES};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use super::{ApiResponse, AttemptResult, HeartbeatSender, TransportFailure};
use crate::config::PulseConfig;
use crate::error::PulseError;
use crate::osname::os_name;

const UNKNOWN_PLUGIN: &str = "unknown-plugin";

/// Blocking HTTP client for the bulk heartbeat endpoint.
pub struct ApiClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(config: &PulseConfig, plugin: Option<&str>) -> Result<Self, PulseError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .user_agent(user_agent(plugin))
            .build()
            .map_err(|err| PulseError::HttpClient(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", config.api_url.trim_end_matches('/'), BULK_ENDPOINT_PATH),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl HeartbeatSender for ApiClient {
    fn send(&self, heartbeats: &[Heartbeat]) -> AttemptResult {
        let mut request = self.http.post(&self.endpoint).json(heartbeats);
        if let Some(key) = &self.api_key {
            request = request.basic_auth(key, None::<&str>);
        } else {
            tracing::warn!("No API key configured; sending unauthenticated request");
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            count = heartbeats.len(),
            "Sending heartbeat batch"
        );

        let response = match request.send() {
            Ok(response) => response,
            Err(err) => return AttemptResult::Transport(transport_failure(&err)),
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());

        let mut body = String::new();
        if let Err(err) = response
            .take(MAX_RESPONSE_BYTES as u64)
            .read_to_string(&mut body)
        {
            // Status already tells us the outcome; a broken body only loses
            // the per-item detail.
            tracing::debug!(status, error = %err, "Failed to read response body");
            body.clear();
        }

        AttemptResult::Response(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

fn transport_failure(err: &reqwest::Error) -> TransportFailure {
    let message = err.to_string();
    if err.is_timeout() {
        TransportFailure::Timeout(message)
    } else if err.is_connect() {
        TransportFailure::Connect(message)
    } else {
        TransportFailure::Other(message)
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub fn user_agent(plugin: Option<&str>) -> String {
    let plugin = plugin
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(UNKNOWN_PLUGIN);
    format!(
        "pulse/{} ({}) {}",
        env!("CARGO_PKG_VERSION"),
        os_name(),
        plugin
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_user_agent_names_plugin() {
        let ua = user_agent(Some("vim/9.1 vim-pulse/1.0"));
        assert!(ua.starts_with("pulse/"));
        assert!(ua.ends_with("vim/9.1 vim-pulse/1.0"));
        assert!(user_agent(None).ends_with(UNKNOWN_PLUGIN));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let config = PulseConfig {
            api_url: "http://localhost:9/api/v1/".to_string(),
            ..PulseConfig::default()
        };
        let client = ApiClient::new(&config, None).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://localhost:9/api/v1/users/current/heartbeats.bulk"
        );
    }
}

//! One timed HTTP call against the target API.
//!
//! Each virtual user owns an [`ApiClient`] holding its own
//! [`reqwest::Client`](https://docs.rs/reqwest/*/reqwest/struct.Client.html), so
//! connection reuse stays local to the user. [`ApiClient::probe`] issues exactly one
//! request, reads the whole response body, and always returns a [`MetricRecord`]
//! together with either the body or a typed [`ActionFailure`].

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{ApiTable, Endpoint};
use crate::metrics::MetricRecord;
use crate::scenario::ActionFailure;
use crate::{util, MarqueeError};

/// Description of one call: which endpoint, its path parameters, query and body.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub endpoint: Endpoint,
    pub params: Vec<(&'static str, String)>,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}
impl Call {
    pub fn new(endpoint: Endpoint) -> Self {
        Call {
            endpoint,
            params: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Fill a `:name` placeholder in the endpoint's path template.
    pub fn param(mut self, name: &'static str, value: &str) -> Self {
        self.params.push((name, value.to_string()));
        self
    }

    /// Append a query string parameter.
    pub fn query<T: ToString>(mut self, name: &'static str, value: T) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    /// Send a JSON request body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// The outcome of one call: its metric record, and the body if the call succeeded.
#[derive(Debug)]
pub struct Probe {
    pub record: MetricRecord,
    pub result: Result<Vec<u8>, ActionFailure>,
}

/// A virtual user's connection to the target API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    api: Arc<ApiTable>,
}
impl ApiClient {
    /// Build a client for `base_url` whose every request gives up after `timeout`.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        api: Arc<ApiTable>,
    ) -> Result<ApiClient, MarqueeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            api,
        })
    }

    /// Attach a bearer token to every following request.
    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    /// Issue one call and time it until its response body has been read.
    ///
    /// Produces exactly one record on every path. A call that never reaches the server,
    /// or whose body can't be read, is a transport failure carrying the error message; a
    /// call answered with a status the endpoint doesn't expect is recorded with an empty
    /// error.
    pub async fn probe(&self, call: &Call) -> Probe {
        let spec = self.api.spec(call.endpoint);
        let params: Vec<(&str, &str)> = call
            .params
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        let url = format!("{}{}", self.base_url, spec.resolve(&params));

        let mut request = self.client.request(spec.method.clone(), &url);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let (status_code, result) = match request.send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                // Read the body even when the status is wrong, releasing the connection.
                match response.bytes().await {
                    Ok(body) if spec.accepts(status_code) => (status_code, Ok(body.to_vec())),
                    Ok(_) => (status_code, Err(ActionFailure::UnexpectedStatus(status_code))),
                    Err(e) => (status_code, Err(ActionFailure::Transport(e.to_string()))),
                }
            }
            Err(e) => (0, Err(ActionFailure::Transport(e.to_string()))),
        };
        let duration = started.elapsed();

        let error = match &result {
            Err(ActionFailure::Transport(message)) => {
                debug!("{} {}: {}", spec.method, url, message);
                message.clone()
            }
            _ => {
                debug!("{} {}: status_code {}", spec.method, url, status_code);
                String::new()
            }
        };

        Probe {
            record: MetricRecord {
                timestamp: Utc::now(),
                scenario: spec.scenario.to_string(),
                endpoint: spec.path.clone(),
                method: spec.method.to_string(),
                status_code,
                duration,
                success: result.is_ok(),
                error,
            },
            result,
        }
    }
}

/// Confirm the target answers at all before any virtual user starts.
///
/// Any HTTP response, whatever its status, counts as reachable.
pub async fn preflight(base_url: &str, timeout: Duration) -> Result<(), MarqueeError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    match client.get(base_url).send().await {
        Ok(response) => {
            info!(
                "preflight: {} answered {}",
                base_url,
                response.status().as_u16()
            );
            Ok(())
        }
        Err(e) => Err(MarqueeError::Unreachable {
            host: base_url.to_string(),
            detail: util::truncate_string(&e.to_string(), 200),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &server.base_url(),
            Duration::from_secs(5),
            Arc::new(ApiTable::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/movies/abc")
                    .query_param("limit", "5")
                    .header("authorization", "Bearer secret");
                then.status(200).body(r#"{"movie":{}}"#);
            })
            .await;

        let mut client = client(&server);
        client.set_token("secret");
        let probe = client
            .probe(&Call::new(Endpoint::GetMovie).param("id", "abc").query("limit", 5))
            .await;

        mock.assert_async().await;
        assert_eq!(probe.record.scenario, "movies");
        assert_eq!(probe.record.endpoint, "/movies/:id");
        assert_eq!(probe.record.method, "GET");
        assert_eq!(probe.record.status_code, 200);
        assert!(probe.record.success);
        assert!(probe.record.error.is_empty());
        assert_eq!(probe.result.unwrap(), br#"{"movie":{}}"#.to_vec());
    }

    #[tokio::test]
    async fn unexpected_status_is_not_a_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/interactions");
                then.status(500).body("boom");
            })
            .await;

        let probe = client(&server)
            .probe(&Call::new(Endpoint::RecordInteraction).json(json!({"type": "view"})))
            .await;
        assert_eq!(probe.record.status_code, 500);
        assert!(!probe.record.success);
        assert!(probe.record.error.is_empty());
        assert_eq!(probe.result, Err(ActionFailure::UnexpectedStatus(500)));
    }

    #[tokio::test]
    async fn any_expected_status_succeeds() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/interactions")
                    .json_body(json!({"movieId": "m1", "type": "like"}));
                then.status(201);
            })
            .await;

        let probe = client(&server)
            .probe(
                &Call::new(Endpoint::RecordInteraction)
                    .json(json!({"movieId": "m1", "type": "like"})),
            )
            .await;
        assert_eq!(probe.record.status_code, 201);
        assert!(probe.record.success);
    }

    #[tokio::test]
    async fn transport_failure() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(
            &format!("http://{}", address),
            Duration::from_secs(2),
            Arc::new(ApiTable::default()),
        )
        .unwrap();
        let probe = client.probe(&Call::new(Endpoint::Profile)).await;
        assert_eq!(probe.record.status_code, 0);
        assert!(!probe.record.success);
        assert!(!probe.record.error.is_empty());
        assert!(matches!(probe.result, Err(ActionFailure::Transport(_))));

        assert!(matches!(
            preflight(&format!("http://{}", address), Duration::from_secs(2)).await,
            Err(MarqueeError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn preflight_accepts_any_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(404);
            })
            .await;
        assert!(preflight(&server.url("/api"), Duration::from_secs(2)).await.is_ok());
    }
}

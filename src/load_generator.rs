use crate::{
    errors::{HarnessError, HarnessResult},
    stats::LatencySample,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of a user creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPayload {
    pub name: String,
    pub email: String,
    pub password: String,
}
impl UserPayload {
    pub fn for_index(i: usize) -> Self {
        Self {
            name: format!("Test User {i}"),
            email: format!("user{i}@example.com"),
            password: format!("user{i}somethingsomething"),
        }
    }
}

/// Joins a base url and a route segment with exactly one slash between them.
pub fn target_url(base_url: &str, route: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}

/// Issues POST requests one after another and records the latency of each successful one.
#[derive(Debug, Clone, Default)]
pub struct LoadGenerator {
    client: reqwest::Client,
}
impl LoadGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Sends `request_count` requests to `target_url`, the i-th carrying `request_factory(i)` as
    /// its JSON body. Each request is awaited before the next is sent.
    ///
    /// A request counts as successful when it completes within `per_request_timeout` with a
    /// status below 400; anything else is logged and left out of the sample.
    ///
    /// # Returns
    ///
    /// The sample, or `NoSuccessfulRequests` if not a single request succeeded.
    pub async fn run<F, B>(
        &self,
        target_url: &str,
        request_count: usize,
        request_factory: F,
        per_request_timeout: Duration,
    ) -> HarnessResult<LatencySample>
    where
        F: Fn(usize) -> B,
        B: Serialize,
    {
        let mut sample = LatencySample::with_capacity(request_count);

        for i in 0..request_count {
            let body = request_factory(i);
            let start = Instant::now();
            match self.send(target_url, &body, per_request_timeout).await {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    debug!("request {} took {:?}", i, elapsed);
                    sample.record_success(elapsed);
                }
                Err(reason) => {
                    warn!("{}", HarnessError::RequestFailure { index: i, reason });
                    sample.record_failure();
                }
            }
        }

        info!(
            "{}/{} requests to {} succeeded",
            sample.succeeded(),
            sample.attempted(),
            target_url
        );

        if sample.succeeded() == 0 {
            return Err(HarnessError::NoSuccessfulRequests {
                attempted: sample.attempted(),
            });
        }
        Ok(sample)
    }

    async fn send<B: Serialize>(
        &self,
        target_url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(), String> {
        let resp = self
            .client
            .post(target_url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = resp.status();
        // drain the body so the timing covers the whole response
        resp.bytes().await.map_err(|err| err.to_string())?;

        if status.is_client_error() || status.is_server_error() {
            return Err(format!("status {status}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    #[derive(Default)]
    struct Stub {
        emails: Mutex<Vec<String>>,
    }

    async fn create_user(
        State(stub): State<Arc<Stub>>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let email = body["email"].as_str().unwrap_or_default().to_string();
        let mut emails = stub.emails.lock().expect("stub lock");
        emails.push(email);

        // every other request fails
        if emails.len() % 2 == 0 {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::CREATED
        }
    }

    /// Odd users take longer to create than any sane request timeout.
    async fn create_user_slowly(Json(body): Json<serde_json::Value>) -> StatusCode {
        let index = body["email"]
            .as_str()
            .and_then(|email| email.strip_prefix("user"))
            .and_then(|rest| rest.split('@').next())
            .and_then(|i| i.parse::<usize>().ok())
            .unwrap_or_default();
        if index % 2 == 1 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        StatusCode::CREATED
    }

    async fn spawn_stub() -> anyhow::Result<(SocketAddr, Arc<Stub>)> {
        let stub = Arc::new(Stub::default());
        let app = Router::new()
            .route("/user", post(create_user))
            .route("/slow/user", post(create_user_slowly))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });
        Ok((addr, stub))
    }

    #[test]
    fn target_url_joins_with_one_slash() {
        assert_eq!(
            target_url("http://localhost:9000/balancer/", "/user"),
            "http://localhost:9000/balancer/user"
        );
        assert_eq!(target_url("http://h:1", "users"), "http://h:1/users");
    }

    #[test]
    fn payload_is_derived_from_index() -> anyhow::Result<()> {
        let json = serde_json::to_value(UserPayload::for_index(7))?;
        assert_eq!(json["name"], "Test User 7");
        assert_eq!(json["email"], "user7@example.com");
        assert_eq!(json["password"], "user7somethingsomething");
        Ok(())
    }

    #[tokio::test]
    async fn failed_requests_are_counted_but_not_sampled() -> anyhow::Result<()> {
        let (addr, stub) = spawn_stub().await?;
        let url = target_url(&format!("http://{addr}"), "user");

        let sample = LoadGenerator::new()
            .run(&url, 6, UserPayload::for_index, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        assert_eq!(sample.attempted(), 6);
        assert_eq!(sample.succeeded(), 3);
        assert!(sample.latencies_ms().iter().all(|l| *l >= 0.0));

        let emails = stub.emails.lock().expect("stub lock").clone();
        assert_eq!(
            emails,
            (0..6).map(|i| format!("user{i}@example.com")).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_requests_are_counted_but_not_sampled() -> anyhow::Result<()> {
        let (addr, _) = spawn_stub().await?;
        let url = target_url(&format!("http://{addr}"), "slow/user");
        let timeout = Duration::from_millis(200);

        let started = Instant::now();
        let sample = LoadGenerator::new()
            .run(&url, 6, UserPayload::for_index, timeout)
            .await?;

        assert_eq!(sample.attempted(), 6);
        assert_eq!(sample.succeeded(), 3);
        assert!(sample.latencies_ms().iter().all(|l| *l < 2000.0));
        // bounded by the timeouts, not by the slow handler
        assert!(started.elapsed() < Duration::from_millis(6 * 200 + 1000));
        Ok(())
    }

    #[tokio::test]
    async fn zero_requests_is_no_successful_requests() {
        let res = LoadGenerator::new()
            .run(
                "http://127.0.0.1:9/user",
                0,
                UserPayload::for_index,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await;
        assert!(matches!(
            res,
            Err(HarnessError::NoSuccessfulRequests { attempted: 0 })
        ));
    }

    #[tokio::test]
    async fn unreachable_target_fails_every_request() -> anyhow::Result<()> {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };
        let url = format!("http://127.0.0.1:{port}/user");

        let res = LoadGenerator::new()
            .run(&url, 3, UserPayload::for_index, Duration::from_millis(500))
            .await;
        assert!(matches!(
            res,
            Err(HarnessError::NoSuccessfulRequests { attempted: 3 })
        ));
        Ok(())
    }
}

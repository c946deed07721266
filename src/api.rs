use std::collections::HashMap;
use std::slice;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use tarka_dns::config::{Config, ProviderConfig};
use tarka_dns::{relative_name, Record, RecordProvider, TarkaProvider};

pub struct AppState {
    targets: HashMap<String, HookTarget>,
    request_timeout: Duration,
}

struct HookTarget {
    config: ProviderConfig,
    provider: Box<dyn RecordProvider>,
}

#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Body sent by ACME clients speaking the "httpreq" hook protocol.
#[derive(Deserialize)]
struct ChallengeRequest {
    fqdn: String,
    value: String,
}

pub fn create_router(config: &Config) -> anyhow::Result<Router> {
    let mut targets = HashMap::new();
    for provider_config in &config.providers {
        let provider = TarkaProvider::new(provider_config)
            .with_context(|| format!("Failed to set up provider: {}", provider_config.name))?;
        targets.insert(
            provider_config.name.clone(),
            HookTarget {
                config: provider_config.clone(),
                provider: Box::new(provider),
            },
        );
    }

    let state = Arc::new(AppState {
        targets,
        request_timeout: config.server.request_timeout(),
    });

    Ok(Router::new()
        .route("/acme/{provider}/present", post(present))
        .route("/acme/{provider}/cleanup", post(cleanup))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(access_log))
        .with_state(state))
}

async fn access_log(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    // The query string may carry the hook key, keep it out of the log
    let path = request.uri().path().to_string();
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(request).await;

    info!(
        target: "access",
        "{} {} {} {} {:.3}ms",
        method,
        path,
        ip,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    response
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error,
        }),
    )
        .into_response()
}

impl AppState {
    fn authorize(&self, provider_name: &str, query: &KeyQuery) -> Result<&HookTarget, Response> {
        let target = self.targets.get(provider_name).ok_or_else(|| {
            error_response(
                StatusCode::NOT_FOUND,
                format!("Provider not found: {}", provider_name),
            )
        })?;

        if let Some(ref config_key) = target.config.key {
            let request_key = query.key.as_deref().unwrap_or("");
            if request_key != config_key {
                warn!("Invalid key for provider: {}", provider_name);
                return Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    "Invalid key".to_string(),
                ));
            }
        }

        Ok(target)
    }

    /// Key check first, so a wrong key never learns anything about the body.
    fn challenge(
        &self,
        provider_name: &str,
        query: &KeyQuery,
        body: Result<Json<ChallengeRequest>, JsonRejection>,
    ) -> Result<(&HookTarget, Record), Response> {
        let target = self.authorize(provider_name, query)?;
        let Json(request) = body.map_err(|rejection| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            )
        })?;
        let record = target.challenge_record(request)?;
        Ok((target, record))
    }
}

impl HookTarget {
    fn challenge_record(&self, request: ChallengeRequest) -> Result<Record, Response> {
        let name = relative_name(&request.fqdn, &self.config.zone).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!(
                    "{} is not inside zone {}",
                    request.fqdn, self.config.zone
                ),
            )
        })?;
        Ok(Record::txt(name, request.value, self.config.ttl()))
    }
}

async fn present(
    State(state): State<Arc<AppState>>,
    Path(provider_name): Path<String>,
    Query(query): Query<KeyQuery>,
    body: Result<Json<ChallengeRequest>, JsonRejection>,
) -> Response {
    let (target, record) = match state.challenge(&provider_name, &query, body) {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    let zone = target.config.zone.as_str();
    let append = target
        .provider
        .append_records(zone, slice::from_ref(&record));

    match tokio::time::timeout(state.request_timeout, append).await {
        Ok(Ok(records)) => {
            info!(
                "[{}] Presented {} TXT record(s) for {} in {}",
                target.provider.id(),
                records.len(),
                record.name,
                zone
            );
            let wait = target.config.propagation_wait();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            (
                StatusCode::OK,
                Json(ApiResponse {
                    success: true,
                    message: format!("Created TXT record {} in {}", record.name, zone),
                }),
            )
                .into_response()
        }
        Ok(Err(e)) => {
            error!("[{}] Present failed: {}", target.provider.id(), e);
            error_response(StatusCode::BAD_GATEWAY, format!("Present failed: {}", e))
        }
        Err(_) => {
            error!(
                "[{}] Present timed out after {:?}",
                target.provider.id(),
                state.request_timeout
            );
            error_response(StatusCode::GATEWAY_TIMEOUT, "Present timed out".to_string())
        }
    }
}

async fn cleanup(
    State(state): State<Arc<AppState>>,
    Path(provider_name): Path<String>,
    Query(query): Query<KeyQuery>,
    body: Result<Json<ChallengeRequest>, JsonRejection>,
) -> Response {
    let (target, record) = match state.challenge(&provider_name, &query, body) {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    let zone = target.config.zone.as_str();
    match target
        .provider
        .delete_records(zone, slice::from_ref(&record))
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: format!("TXT record {} in {} left to expire", record.name, zone),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("[{}] Cleanup failed: {}", target.provider.id(), e);
            error_response(StatusCode::BAD_GATEWAY, format!("Cleanup failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request as PanelRequest, ResponseTemplate};

    use tarka_dns::provider::tarka::session::AUTH_COOKIE;

    use super::*;

    const KEY: &str = "hook-secret";
    const RECORD_EDIT: &str = "/custdata/domain-rr-edit.php";

    async fn panel(login_status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custdata/login.php"))
            .respond_with(
                ResponseTemplate::new(login_status)
                    .insert_header("set-cookie", format!("{}=hook-session; Path=/", AUTH_COOKIE)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(RECORD_EDIT))
            .respond_with(ResponseTemplate::new(200).set_body_string("Record added"))
            .mount(&server)
            .await;
        server
    }

    /// Serves the hook API on an ephemeral port and returns its base URL.
    async fn serve(panel: &MockServer, propagation_wait_secs: u64) -> String {
        let config = Config::parse(&format!(
            r#"
            [[providers]]
            name = "tarka"
            zone = "example.com"
            key = "{}"
            username = "testuser"
            password = "testpass"
            domain_id = "123"
            base_url = "{}/custdata"
            ttl_secs = 120
            propagation_wait_secs = {}
            "#,
            KEY,
            panel.uri(),
            propagation_wait_secs
        ))
        .unwrap();

        let app = create_router(&config).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{}", addr)
    }

    fn challenge() -> Value {
        json!({ "fqdn": "_acme-challenge.example.com.", "value": "token-value" })
    }

    async fn post_json(url: String, body: &Value) -> reqwest::Response {
        reqwest::Client::new().post(url).json(body).send().await.unwrap()
    }

    async fn post_raw(url: String, body: &'static str) -> reqwest::Response {
        reqwest::Client::new()
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    async fn panel_requests(server: &MockServer) -> Vec<PanelRequest> {
        server.received_requests().await.unwrap_or_default()
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = post_json(
            format!("{}/acme/other/present?key={}", base, KEY),
            &challenge(),
        )
        .await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn wrong_key_is_unauthorized() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = post_json(format!("{}/acme/tarka/present?key=nope", base), &challenge()).await;
        assert_eq!(response.status(), 401);

        let response = post_json(format!("{}/acme/tarka/cleanup", base), &challenge()).await;
        assert_eq!(response.status(), 401);

        // The key is checked before the body is looked at
        let response = post_raw(format!("{}/acme/tarka/present?key=nope", base), "{not json").await;
        assert_eq!(response.status(), 401);

        assert!(panel_requests(&panel).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;
        let url = format!("{}/acme/tarka/present?key={}", base, KEY);

        let response = post_raw(url.clone(), "{not json").await;
        assert_eq!(response.status(), 400);

        let response = post_json(url.clone(), &json!({ "fqdn": "_acme-challenge.example.com." })).await;
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);

        let response = reqwest::Client::new().post(url).body("fqdn=x").send().await.unwrap();
        assert_eq!(response.status(), 400);

        let response = post_raw(format!("{}/acme/tarka/cleanup?key={}", base, KEY), "[]").await;
        assert_eq!(response.status(), 400);

        assert!(panel_requests(&panel).await.is_empty());
    }

    #[tokio::test]
    async fn fqdn_outside_zone_is_bad_request() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = post_json(
            format!("{}/acme/tarka/present?key={}", base, KEY),
            &json!({ "fqdn": "_acme-challenge.example.net.", "value": "token-value" }),
        )
        .await;
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("example.com"));

        assert!(panel_requests(&panel).await.is_empty());
    }

    #[tokio::test]
    async fn present_submits_name_relative_to_zone() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = post_json(
            format!("{}/acme/tarka/present?key={}", base, KEY),
            &challenge(),
        )
        .await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);

        let submitted: Vec<String> = panel_requests(&panel)
            .await
            .into_iter()
            .filter(|r| r.url.path() == RECORD_EDIT)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].contains("&name=_acme-challenge&ttl=120&"), "{}", submitted[0]);
        assert!(submitted[0].contains("&data=token-value&"), "{}", submitted[0]);
        assert!(!submitted[0].contains("example.com"), "{}", submitted[0]);
    }

    #[tokio::test]
    async fn present_waits_for_propagation_before_answering() {
        let panel = panel(200).await;
        let base = serve(&panel, 1).await;

        let start = Instant::now();
        let response = post_json(
            format!("{}/acme/tarka/present?key={}", base, KEY),
            &challenge(),
        )
        .await;
        assert_eq!(response.status(), 200);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn panel_failure_is_bad_gateway() {
        let panel = panel(401).await;
        let base = serve(&panel, 0).await;

        let response = post_json(
            format!("{}/acme/tarka/present?key={}", base, KEY),
            &challenge(),
        )
        .await;
        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("401"), "{}", body);
    }

    #[tokio::test]
    async fn cleanup_leaves_panel_untouched() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = post_json(
            format!("{}/acme/tarka/cleanup?key={}", base, KEY),
            &challenge(),
        )
        .await;
        assert_eq!(response.status(), 200);
        assert!(panel_requests(&panel).await.is_empty());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let panel = panel(200).await;
        let base = serve(&panel, 0).await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }
}

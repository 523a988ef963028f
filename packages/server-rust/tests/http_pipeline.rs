//! End-to-end HTTP pipeline: hooks, JWT auth, retry, codecs and finalizers
//! driven through an axum router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::Router;
use courier_core::{
    chain, endpoint_fn, user_id, Context, EndpointError, Failer, Headerer, Outcome,
    RegisteredClaims, SharedError, StatusCoder,
};
use courier_server::middleware::{auth, JwtVerifier, LoggingLayer, RetryLayer, StaticSecret};
use courier_server::transport::http::{decode_json_request, HttpServer, JsonEncoder};
use courier_server::transport::{logging, request_id};
use http::request::Parts;
use http::{Request, StatusCode};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower::ServiceExt;

const SECRET: &[u8] = b"integration-secret";

#[derive(Debug, Clone, Deserialize)]
struct GetPetRequest {
    id: String,
}

#[derive(Debug, thiserror::Error)]
#[error("pet not found")]
struct NotFound;

#[derive(Debug, Serialize)]
struct GetPetResponse {
    id: String,
    owner: String,
    #[serde(skip)]
    outcome: Outcome,
}

impl Failer for GetPetResponse {
    fn failed(&self) -> Option<SharedError> {
        self.outcome.failed()
    }
}

impl StatusCoder for GetPetResponse {}
impl Headerer for GetPetResponse {}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token(sub: &str, exp: u64) -> String {
    let claims = RegisteredClaims {
        sub: Some(sub.to_string()),
        exp: Some(exp),
        ..RegisteredClaims::default()
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

struct Harness {
    router: Router,
    invoked: Arc<AtomicUsize>,
    finals: Arc<Mutex<Vec<StatusCode>>>,
}

fn harness() -> Harness {
    let invoked = Arc::new(AtomicUsize::new(0));
    let finals: Arc<Mutex<Vec<StatusCode>>> = Arc::default();

    let counter = Arc::clone(&invoked);
    let get_pet = endpoint_fn(move |ctx: Context, req: GetPetRequest| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let owner = user_id(&ctx)?;
            let outcome = if req.id == "42" {
                Outcome::ok()
            } else {
                Outcome::failed(NotFound)
            };
            Ok::<_, EndpointError>(GetPetResponse {
                id: req.id,
                owner,
                outcome,
            })
        }
    });

    let verifier = JwtVerifier::<RegisteredClaims>::new(StaticSecret::new(SECRET), Algorithm::HS256);
    let endpoint = chain([
        LoggingLayer::new("get_pet").middleware(),
        verifier.middleware(),
        RetryLayer::new(2, Duration::from_secs(1)).middleware(),
    ])
    .apply(get_pet);

    let recorded = Arc::clone(&finals);
    let server = HttpServer::builder(endpoint, decode_json_request::<GetPetRequest>, JsonEncoder)
        .before(request_id::http_to_context)
        .before(logging::http_before)
        .before(auth::http_to_context)
        .finalizer(logging::http_finalizer)
        .finalizer(move |ctx: &Context, status: StatusCode, _parts: &Parts| {
            assert!(ctx.request_id().is_some());
            recorded.lock().push(status);
        })
        .build();

    Harness {
        router: Router::new().route_service("/pets", server),
        invoked,
        finals,
    }
}

async fn post(router: &Router, bearer: Option<&str>, body: &'static str) -> (StatusCode, serde_json::Value) {
    let mut req = Request::post("/pets").header("content-type", "application/json");
    if let Some(token) = bearer {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let resp = router
        .clone()
        .oneshot(req.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn authenticated_request_succeeds() {
    let h = harness();
    let (status, body) = post(&h.router, Some(&token("alice", now() + 600)), r#"{"id":"42"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "id": "42", "owner": "alice" }));
    assert_eq!(h.invoked.load(Ordering::SeqCst), 1);
    assert_eq!(*h.finals.lock(), vec![StatusCode::OK]);
}

#[tokio::test]
async fn business_failure_is_never_2xx() {
    let h = harness();
    let (status, body) = post(&h.router, Some(&token("alice", now() + 600)), r#"{"id":"7"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, serde_json::json!({ "error": "pet not found" }));
    assert_eq!(*h.finals.lock(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
}

#[tokio::test]
async fn missing_token_never_reaches_endpoint() {
    let h = harness();
    let (status, body) = post(&h.router, None, r#"{"id":"42"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, serde_json::json!({ "error": "token up for parsing was not passed through the context" }));
    assert_eq!(h.invoked.load(Ordering::SeqCst), 0);
    assert_eq!(*h.finals.lock(), vec![StatusCode::UNAUTHORIZED]);
}

#[tokio::test]
async fn expired_token_is_rejected_without_retry() {
    let h = harness();
    let (status, body) = post(&h.router, Some(&token("alice", now() - 600)), r#"{"id":"42"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, serde_json::json!({ "error": "JWT Token is expired" }));
    assert_eq!(h.invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_body_finalizes_once_with_400() {
    let h = harness();
    let (status, _) = post(&h.router, Some(&token("alice", now() + 600)), "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.invoked.load(Ordering::SeqCst), 0);
    assert_eq!(*h.finals.lock(), vec![StatusCode::BAD_REQUEST]);
}

//! gRPC adapter with JWT auth in front of a retried, load-balanced pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use courier_core::{
    chain, endpoint_fn, user_id, BoxEndpoint, Context, EndpointError, Failer, RegisteredClaims,
};
use courier_server::middleware::{auth, JwtVerifier, Retry, StaticSecret};
use courier_server::transport::grpc::{decode_to_object, encode_object, Code, GrpcRequest, GrpcServer};
use courier_server::transport::{logging, request_id};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

const SECRET: &[u8] = b"grpc-secret";

#[derive(Debug, Clone)]
struct WhoAmI;

#[derive(Debug)]
struct Identity {
    user: String,
    replica: usize,
}

impl Failer for Identity {}

fn token(alg: Algorithm) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 600;
    let claims = RegisteredClaims {
        sub: Some("bob".to_string()),
        exp: Some(exp),
        ..RegisteredClaims::default()
    };
    jsonwebtoken::encode(&Header::new(alg), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn call(token: &str) -> GrpcRequest {
    let mut request = tonic::Request::new(WhoAmI);
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    GrpcRequest::from_tonic(request)
}

/// Replica `i` fails while `i < healthy_from`.
fn replica(i: usize, healthy_from: usize, calls: &Arc<AtomicUsize>) -> BoxEndpoint<WhoAmI, Identity> {
    let calls = Arc::clone(calls);
    courier_core::boxed(endpoint_fn(move |ctx: Context, WhoAmI| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if i < healthy_from {
                return Err(EndpointError::Internal(anyhow::anyhow!("replica {i} down")));
            }
            Ok(Identity {
                user: user_id(&ctx)?,
                replica: i,
            })
        }
    }))
}

fn server(healthy_from: usize, calls: &Arc<AtomicUsize>) -> GrpcServer<WhoAmI, Identity> {
    let pool: Vec<_> = (0..3).map(|i| replica(i, healthy_from, calls)).collect();
    let verifier = JwtVerifier::<RegisteredClaims>::new(StaticSecret::new(SECRET), Algorithm::HS256);
    let endpoint = chain([verifier.middleware()]).apply(Retry::new(pool, 3, Duration::from_secs(1)));

    GrpcServer::builder(endpoint, decode_to_object::<WhoAmI>, encode_object::<Identity>)
        .before(request_id::grpc_to_context)
        .before(logging::grpc_before)
        .before(auth::grpc_to_context)
        .finalizer(logging::grpc_finalizer)
        .build()
}

#[tokio::test]
async fn third_replica_answers_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let reply = server(2, &calls).serve(call(&token(Algorithm::HS256))).await.unwrap();
    let identity = reply.into_tonic::<Identity>().unwrap().into_inner();

    assert_eq!(identity.user, "bob");
    assert_eq!(identity.replica, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn wrong_algorithm_never_reaches_pool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let status = server(0, &calls).serve(call(&token(Algorithm::HS384))).await.unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), r#"{"error":"unexpected signing method"}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_pool_reports_last_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let status = server(3, &calls).serve(call(&token(Algorithm::HS256))).await.unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), r#"{"error":"internal error: replica 2 down"}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

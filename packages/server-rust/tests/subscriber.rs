//! Message-bus subscriber: ack/nack outcomes, hook ordering and
//! exactly-once finalization on every exit path.

use std::sync::Arc;

use courier_core::message::CORRELATION_ID_KEY;
use courier_core::{endpoint_fn, Context, EndpointError, Failer, Message, SharedError};
use courier_server::transport::message::{
    decode_json_message, encode_response, Disposition, Subscriber,
};
use courier_server::transport::{logging, request_id};
use parking_lot::Mutex;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PetAdopted {
    id: String,
}

#[derive(Debug, thiserror::Error)]
#[error("pet not found")]
struct NotFound;

#[derive(Debug, thiserror::Error)]
#[error("cannot encode")]
struct Unencodable;

/// Response whose failure slot the endpoint fills in.
#[derive(Debug)]
struct Adoption {
    err: Option<SharedError>,
}

impl Failer for Adoption {
    fn failed(&self) -> Option<SharedError> {
        self.err.clone()
    }
}

type Trace = Arc<Mutex<Vec<String>>>;

fn subscriber(trace: &Trace) -> Subscriber<PetAdopted, Adoption> {
    let before = Arc::clone(trace);
    let after = Arc::clone(trace);
    let finals = Arc::clone(trace);
    let endpoint_trace = Arc::clone(trace);

    Subscriber::builder(
        endpoint_fn(move |ctx: Context, event: PetAdopted| {
            let trace = Arc::clone(&endpoint_trace);
            async move {
                assert!(ctx.request_id().is_some());
                trace.lock().push(format!("endpoint:{}", event.id));
                match event.id.as_str() {
                    "42" => Ok(Adoption { err: None }),
                    "boom" => Err(EndpointError::Internal(anyhow::anyhow!("store down"))),
                    _ => Ok(Adoption {
                        err: Some(Arc::new(NotFound)),
                    }),
                }
            }
        }),
        decode_json_message::<PetAdopted>,
        encode_response::<Adoption>,
    )
    .before(request_id::message_to_context)
    .before(request_id::correlation_id_to_context)
    .before(logging::message_before)
    .before(move |ctx: Context, _msg: &Message| {
        before.lock().push("before".to_string());
        ctx
    })
    .after(move |ctx: Context| {
        after.lock().push("after".to_string());
        ctx
    })
    .finalizer(logging::message_finalizer)
    .finalizer(move |ctx: &Context, _msg: &Message, d: Disposition<'_>| {
        let corr = ctx.correlation_id().unwrap_or("-");
        finals.lock().push(format!("final:{}:{corr}", d.as_str()));
    })
    .build()
}

fn count_finals(trace: &Trace) -> usize {
    trace.lock().iter().filter(|e| e.starts_with("final:")).count()
}

#[tokio::test]
async fn found_pet_acks() {
    let trace: Trace = Arc::default();
    let msg = Message::new(&br#"{"id":"42"}"#[..]).with_metadata(CORRELATION_ID_KEY, "corr-1");

    subscriber(&trace).handle(&msg).await.unwrap();

    assert_eq!(
        *trace.lock(),
        vec!["before", "endpoint:42", "after", "final:acked:corr-1"]
    );
}

#[tokio::test]
async fn missing_pet_returns_not_found() {
    let trace: Trace = Arc::default();
    let msg = Message::new(&br#"{"id":"7"}"#[..]);

    let err = subscriber(&trace).handle(&msg).await.unwrap_err();

    assert!(err.business_error::<NotFound>().is_some());
    assert_eq!(err.to_string(), "pet not found");
    assert_eq!(trace.lock().last().map(String::as_str), Some("final:failed:-"));
    assert_eq!(count_finals(&trace), 1);
}

#[tokio::test]
async fn decode_failure_finalizes_once() {
    let trace: Trace = Arc::default();
    let err = subscriber(&trace)
        .handle(&Message::new(&b"garbage"[..]))
        .await
        .unwrap_err();

    assert!(matches!(err, EndpointError::Decode(_)));
    assert_eq!(*trace.lock(), vec!["before", "final:failed:-"]);
}

#[tokio::test]
async fn invoke_failure_finalizes_once() {
    let trace: Trace = Arc::default();
    let err = subscriber(&trace)
        .handle(&Message::new(&br#"{"id":"boom"}"#[..]))
        .await
        .unwrap_err();

    assert!(matches!(err, EndpointError::Internal(_)));
    assert_eq!(*trace.lock(), vec!["before", "endpoint:boom", "final:failed:-"]);
}

#[tokio::test]
async fn encode_failure_finalizes_once() {
    let trace: Trace = Arc::default();
    let finals = Arc::clone(&trace);
    let subscriber = Subscriber::builder(
        endpoint_fn(|_ctx: Context, _event: PetAdopted| async { Ok::<_, EndpointError>(()) }),
        decode_json_message::<PetAdopted>,
        |_ctx: &Context, _msg: &Message, (): ()| -> Result<(), EndpointError> {
            Err(EndpointError::encode(Unencodable))
        },
    )
    .finalizer(move |_ctx: &Context, _msg: &Message, d: Disposition<'_>| {
        finals.lock().push(format!("final:{}", d.as_str()));
    })
    .build();

    let err = subscriber
        .handle(&Message::new(&br#"{"id":"42"}"#[..]))
        .await
        .unwrap_err();

    assert!(matches!(err, EndpointError::Encode(_)));
    assert_eq!(*trace.lock(), vec!["final:failed"]);
}

#[tokio::test]
async fn concurrent_messages_get_independent_contexts() {
    let trace: Trace = Arc::default();
    let subscriber = subscriber(&trace);

    let a = Message::new(&br#"{"id":"42"}"#[..]).with_metadata(CORRELATION_ID_KEY, "a");
    let b = Message::new(&br#"{"id":"42"}"#[..]).with_metadata(CORRELATION_ID_KEY, "b");
    let (ra, rb) = tokio::join!(subscriber.handle(&a), subscriber.handle(&b));
    ra.unwrap();
    rb.unwrap();

    let mut finals: Vec<String> = trace
        .lock()
        .iter()
        .filter(|e| e.starts_with("final:"))
        .cloned()
        .collect();
    finals.sort();
    assert_eq!(finals, vec!["final:acked:a", "final:acked:b"]);
}

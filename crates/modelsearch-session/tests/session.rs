//! 会话层端到端验证：去重、扇出、中途附加、失败回放与关闭。
//!
//! 所有场景都经进程内通道驱动，远端调用次数由 `MemoryChannel` 计数。

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future::join_all};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;

use modelsearch_pipeline::{PipelineBuilder, Step};
use modelsearch_session::{
    ClientConfig, Operation, ProxyEvent, RequestDescriptor, RequestId, RequestState, ResultProxy,
    SearchOptions, Session, SessionError,
};
use modelsearch_transport::{
    Message, ResponseStream, TransportError,
    mem::{self, MemoryDialer, ScriptFeed},
};

const PATIENCE: Duration = Duration::from_secs(5);

fn result(n: u64) -> Message {
    Message::new("GetSearchResultsResponse", json!({ "solution": n }))
}

fn search(problem: &str) -> RequestDescriptor {
    let template = PipelineBuilder::new("template")
        .input("dataset")
        .step(Step::chained("d3m.primitives.data_transformation.denormalize.Common"))
        .step(Step::chained("d3m.primitives.classification.random_forest.SKlearn"))
        .compile()
        .expect("compile");
    RequestDescriptor::search_solutions(
        &template,
        &SearchOptions {
            problem: problem.into(),
            time_bound_minutes: 5,
            ..SearchOptions::default()
        },
    )
}

async fn open(dialer: &MemoryDialer) -> Session {
    Session::connect(dialer, &ClientConfig::new("mem://search"))
        .await
        .expect("connect")
}

/// 拨号器首次调用交出可逐条推送的流，之后的调用得到空流。
fn fed_dialer() -> (MemoryDialer, ScriptFeed) {
    let (feed, responses) = mem::feed();
    let slot: Arc<Mutex<Option<ResponseStream>>> = Arc::new(Mutex::new(Some(responses)));
    let dialer = MemoryDialer::new(move |_| {
        slot.lock()
            .take()
            .unwrap_or_else(|| mem::script(Vec::new()))
    });
    (dialer, feed)
}

async fn next_event(proxy: &mut ResultProxy) -> Option<ProxyEvent> {
    tokio::time::timeout(PATIENCE, proxy.recv())
        .await
        .expect("event within deadline")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_dispatch_once() {
    let dialer = MemoryDialer::new(|_| mem::script(vec![Ok(result(1)), Ok(result(2))]));
    let session = open(&dialer).await;

    let tasks = (0..16).map(|_| {
        let session = session.clone();
        tokio::spawn(async move {
            let proxy = session.get_or_dispatch(&search("iris")).expect("dispatch");
            let id = proxy.request_id().clone();
            (id, proxy.collect().await)
        })
    });
    let outcomes = join_all(tasks).await;

    assert_eq!(dialer.channel().stream_calls(), 1);
    assert_eq!(session.len(), 1);
    let known = session.known_identifiers();
    for outcome in outcomes {
        let (id, outcome) = outcome.expect("task");
        assert!(known.contains(&id));
        assert_eq!(outcome.results, vec![result(1), result(2)]);
        assert!(outcome.errors.is_empty());
        assert!(outcome.completed);
    }
}

#[tokio::test]
async fn completed_request_replays_to_late_attachers() {
    let dialer = MemoryDialer::new(|_| mem::script(vec![Ok(result(1)), Ok(result(2))]));
    let session = open(&dialer).await;
    let descriptor = search("iris");

    let first = session.get_or_dispatch(&descriptor).expect("dispatch").collect().await;
    assert_eq!(first.results, vec![result(1), result(2)]);
    assert_eq!(session.request_state(descriptor.id()), Some(RequestState::Completed));

    let replay = session.attach(descriptor.id()).expect("attach").collect().await;
    assert_eq!(replay, first);

    let deduplicated = session.get_or_dispatch(&search("iris")).expect("dedup");
    assert_eq!(deduplicated.request_id(), descriptor.id());
    assert_eq!(deduplicated.collect().await, first);
    assert_eq!(dialer.channel().total_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn mid_stream_attach_sees_no_gap_and_no_duplicate() {
    let (dialer, feed) = fed_dialer();
    let session = open(&dialer).await;
    let descriptor = search("iris");

    let mut early = session.get_or_dispatch(&descriptor).expect("dispatch");
    assert!(feed.emit(result(1)));
    assert_eq!(next_event(&mut early).await, Some(ProxyEvent::Result(result(1))));
    assert_eq!(session.request_state(descriptor.id()), Some(RequestState::Pending));

    let late = session.attach(descriptor.id()).expect("attach");
    assert!(feed.emit(result(2)));
    feed.finish();

    assert_eq!(next_event(&mut early).await, Some(ProxyEvent::Result(result(2))));
    assert_eq!(next_event(&mut early).await, Some(ProxyEvent::Done));
    assert_eq!(early.recv().await, None);

    let late = tokio::time::timeout(PATIENCE, late.collect()).await.expect("late");
    assert_eq!(late.results, vec![result(1), result(2)]);
    assert!(late.completed);
}

#[tokio::test]
async fn unknown_identifier_is_rejected() {
    let dialer = MemoryDialer::new(|_| mem::script(Vec::new()));
    let session = open(&dialer).await;
    let err = session.attach(&RequestId::from("missing")).expect_err("unknown");
    assert!(matches!(err, SessionError::UnknownRequest { ref id } if id.as_str() == "missing"));
    assert!(session.is_empty());
}

#[tokio::test]
async fn failed_stream_delivers_error_then_done_and_replays_it() {
    let dialer = MemoryDialer::new(|_| {
        mem::script(vec![
            Ok(result(1)),
            Err(TransportError::stream("solver crashed")),
            Ok(result(2)),
        ])
    });
    let session = open(&dialer).await;
    let descriptor = search("iris");

    let mut proxy = session.get_or_dispatch(&descriptor).expect("dispatch");
    assert_eq!(next_event(&mut proxy).await, Some(ProxyEvent::Result(result(1))));
    assert_eq!(
        next_event(&mut proxy).await,
        Some(ProxyEvent::Error(TransportError::stream("solver crashed")))
    );
    assert_eq!(next_event(&mut proxy).await, Some(ProxyEvent::Done));
    assert_eq!(session.request_state(descriptor.id()), Some(RequestState::Failed));

    let replay = session.attach(descriptor.id()).expect("attach").collect().await;
    assert_eq!(replay.results, vec![result(1)]);
    assert_eq!(replay.errors, vec![TransportError::stream("solver crashed")]);
    assert!(replay.completed);
    assert_eq!(dialer.channel().stream_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_attached_at_any_point_see_the_full_sequence() {
    let (dialer, feed) = fed_dialer();
    let session = open(&dialer).await;
    let descriptor = search("iris");
    let id = descriptor.id().clone();
    let first = session.get_or_dispatch(&descriptor).expect("dispatch");

    let mut subscribers = Vec::new();
    for n in 0..32 {
        let session = session.clone();
        let id = id.clone();
        subscribers.push(tokio::spawn(async move {
            session.attach(&id).expect("attach").collect().await
        }));
        assert!(feed.emit(result(n)));
        tokio::task::yield_now().await;
    }
    feed.finish();

    let expected: Vec<Message> = (0..32).map(result).collect();
    assert_eq!(first.collect().await.results, expected);
    let outcomes = tokio::time::timeout(PATIENCE, join_all(subscribers))
        .await
        .expect("subscribers within deadline");
    for outcome in outcomes {
        let outcome = outcome.expect("task");
        assert_eq!(outcome.results, expected);
        assert!(outcome.completed);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_terminates_pending_requests() {
    let dialer = MemoryDialer::new(|_| futures::stream::pending().boxed());
    let session = open(&dialer).await;
    let streaming = search("iris");
    let unary = RequestDescriptor::describe_solution("solution-7");

    let mut streaming_proxy = session.get_or_dispatch(&streaming).expect("stream");
    let mut unary_proxy = session.get_or_dispatch(&unary).expect("unary");
    tokio::task::yield_now().await;
    session.shutdown().await;

    for proxy in [&mut streaming_proxy, &mut unary_proxy] {
        assert_eq!(
            next_event(proxy).await,
            Some(ProxyEvent::Error(TransportError::Closed))
        );
        assert_eq!(next_event(proxy).await, Some(ProxyEvent::Done));
    }
    assert!(dialer.channel().is_closed());
    assert_eq!(session.request_state(streaming.id()), Some(RequestState::Failed));
    assert_eq!(session.request_state(unary.id()), Some(RequestState::Failed));
}

#[tokio::test]
async fn unary_operations_yield_a_single_result() {
    let dialer = MemoryDialer::new(|request| {
        let reply = Message::new("EndSearchResponse", json!({ "echo": request.body() }));
        mem::script(vec![Ok(reply)])
    });
    let session = open(&dialer).await;
    let descriptor = RequestDescriptor::end_search("search-1");
    assert_eq!(descriptor.operation(), Operation::EndSearch);

    let outcome = session.get_or_dispatch(&descriptor).expect("dispatch").collect().await;
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].kind(), "EndSearchResponse");
    assert_eq!(dialer.channel().unary_calls(), 1);
    assert_eq!(dialer.channel().stream_calls(), 0);
}

#[tokio::test]
async fn malformed_pipeline_never_reaches_the_service() {
    let dialer = MemoryDialer::new(|_| mem::script(Vec::new()));
    let session = open(&dialer).await;
    let builder = PipelineBuilder::new("broken").input("dataset").step(Step::new("a"));

    let err = RequestDescriptor::from_builder(Operation::CreatePipeline, &builder)
        .map_err(SessionError::from)
        .expect_err("structural");
    assert!(matches!(err, SessionError::Structural(_)));
    assert!(session.is_empty());
    assert_eq!(dialer.channel().total_calls(), 0);
}

#[tokio::test]
async fn identifier_reuse_with_a_different_payload_conflicts() {
    let dialer = MemoryDialer::new(|_| mem::script(vec![Ok(result(1))]));
    let session = open(&dialer).await;

    let original = search("iris").with_id("client-42");
    session.get_or_dispatch(&original).expect("dispatch").collect().await;

    let other = search("digits").with_id("client-42");
    assert!(matches!(
        session.get_or_dispatch(&other),
        Err(SessionError::IdentifierConflict { ref id }) if id.as_str() == "client-42"
    ));

    let same_payload = search("iris").with_id("client-43");
    let proxy = session.get_or_dispatch(&same_payload).expect("dedup");
    assert_eq!(proxy.request_id().as_str(), "client-42");
    assert_eq!(session.len(), 1);
}

#[tokio::test]
async fn refused_dial_fails_session_construction() {
    let dialer = MemoryDialer::refusing("connection refused");
    let err = Session::connect(&dialer, &ClientConfig::new("mem://down"))
        .await
        .expect_err("refused");
    assert!(matches!(err, SessionError::Transport(TransportError::Dial { .. })));

    let err = Session::connect(&dialer, &ClientConfig::new(""))
        .await
        .expect_err("invalid");
    assert!(matches!(err, SessionError::Config(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn attach_point_never_changes_the_observed_sequence(
        total in 0usize..24,
        split in 0usize..24,
    ) {
        let split = split.min(total);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let (early, late, replay) = runtime.block_on(async move {
            let (dialer, feed) = fed_dialer();
            let session = open(&dialer).await;
            let descriptor = search("iris");
            let mut early = session.get_or_dispatch(&descriptor).expect("dispatch");

            let mut seen = Vec::new();
            for n in 0..split {
                feed.emit(result(n as u64));
                match next_event(&mut early).await {
                    Some(ProxyEvent::Result(message)) => seen.push(message),
                    other => panic!("unexpected event {other:?}"),
                }
            }
            let late = session.attach(descriptor.id()).expect("attach");
            for n in split..total {
                feed.emit(result(n as u64));
            }
            feed.finish();

            seen.extend(early.collect().await.results);
            let late = late.collect().await.results;
            let replay = session.attach(descriptor.id()).expect("replay").collect().await.results;
            (seen, late, replay)
        });
        let expected: Vec<Message> = (0..total as u64).map(result).collect();
        prop_assert_eq!(&early, &expected);
        prop_assert_eq!(&late, &expected);
        prop_assert_eq!(&replay, &expected);
    }
}

//! Resume, rerun, eager runs and settling of a thread view against a mock
//! backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use core_test_support::ai;
use core_test_support::config_for_server;
use core_test_support::human;
use core_test_support::mount_history;
use core_test_support::mount_run_stream;
use core_test_support::mount_state;
use core_test_support::received_json;
use core_test_support::sse_body;
use core_test_support::to_json;
use core_test_support::wait_for_state;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use studio_core::ApiClient;
use studio_core::Phase;
use studio_core::StreamSession;
use studio_core::StudioErr;
use studio_core::ThreadView;
use studio_protocol::Message;
use studio_protocol::RunRequest;
use studio_protocol::Thread;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn tool_call(id: &str, arguments: &str) -> Message {
    serde_json::from_value(json!({
        "id": id,
        "type": "ai",
        "content": "",
        "additional_kwargs": {
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "search", "arguments": arguments}
            }]
        },
        "example": false
    }))
    .expect("tool call message")
}

fn snapshot(values: &[Message], resumeable: bool, checkpoint: &str) -> Value {
    json!({
        "values": to_json(values),
        "resumeable": resumeable,
        "config": {"configurable": {"thread_ts": checkpoint}},
    })
}

struct Harness {
    server: MockServer,
    client: ApiClient,
    session: StreamSession,
    view: ThreadView,
}

async fn paused_thread() -> Harness {
    let server = MockServer::start().await;
    let values = vec![human("m1", "find rust crates"), tool_call("m2", r#"{"query":"rust"}"#)];
    mount_state(&server, "t1", &values, true).await;
    mount_history(&server, "t1", json!([snapshot(&values, true, "c1")])).await;

    let config = config_for_server(&server);
    let client = ApiClient::new(&config);
    let session = StreamSession::new("t1", &config);
    let mut view = ThreadView::new(Thread::new("t1", "a1"));
    view.load(&client).await.expect("load thread");
    Harness {
        server,
        client,
        session,
        view,
    }
}

#[tokio::test]
async fn permit_posts_edited_transcript_then_resumes() {
    let Harness {
        server,
        client,
        mut session,
        mut view,
    } = paused_thread().await;
    Mock::given(method("POST"))
        .and(path("/threads/t1/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    mount_run_stream(&server, String::new()).await;

    let mut editor = view.begin_edit(1).expect("editor");
    editor
        .tool_call_arguments_mut(0)
        .expect("arguments")
        .set_value(0, json!("tokio"))
        .expect("edit");
    assert!(view.commit_edit(editor));
    assert!(view.can_permit(&session.state()));

    assert!(view.permit_tool_execution(&client, &mut session).await.expect("permit"));

    let edited = vec![human("m1", "find rust crates"), tool_call("m2", r#"{"query":"tokio"}"#)];
    assert_eq!(
        received_json(&server, "/threads/t1/state").await,
        vec![json!({ "messages": to_json(&edited) })]
    );
    let mut rx = session.subscribe();
    wait_for_state(&mut rx, |s| s.phase == Phase::Done).await;
    let runs = received_json(&server, "/runs/stream").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["input"], Value::Null);
    assert!(runs[0].get("config").is_none());
}

#[tokio::test]
async fn rejected_permit_surfaces_detail_and_does_not_start() {
    let Harness {
        server,
        client,
        mut session,
        mut view,
    } = paused_thread().await;
    Mock::given(method("POST"))
        .and(path("/threads/t1/state"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"detail": "Last message must be a tool call"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs/stream"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let before = view.transcript().to_vec();

    let err = view
        .permit_tool_execution(&client, &mut session)
        .await
        .expect_err("rejected");
    assert!(matches!(err, StudioErr::Request { .. }));
    assert_eq!(
        session.state().error_message.as_deref(),
        Some("Last message must be a tool call")
    );
    assert_eq!(session.state().stream, None);
    assert_eq!(view.transcript(), before.as_slice());
}

#[tokio::test]
async fn permit_requires_a_resumeable_thread() {
    let server = MockServer::start().await;
    mount_state(&server, "t1", &[human("m1", "hi")], false).await;
    mount_history(&server, "t1", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/threads/t1/state"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let config = config_for_server(&server);
    let client = ApiClient::new(&config);
    let mut session = StreamSession::new("t1", &config);
    let mut view = ThreadView::new(Thread::new("t1", "a1"));
    view.load(&client).await.expect("load");

    assert!(!view.permit_tool_execution(&client, &mut session).await.expect("no-op"));
}

#[tokio::test]
async fn eager_failure_body_becomes_the_error() {
    let Harness {
        server,
        client,
        session,
        view,
    } = paused_thread().await;
    Mock::given(method("POST"))
        .and(path("/runs/eager"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let before = view.transcript().to_vec();

    let err = view
        .run_eager(&client, &session, json!({"question": "why"}), None)
        .await
        .expect_err("500");
    assert_eq!(err.to_string(), "boom");
    assert_eq!(session.state().error_message.as_deref(), Some("boom"));
    assert_eq!(view.transcript(), before.as_slice());
}

#[tokio::test]
async fn rerun_continues_from_the_selected_checkpoint() {
    let server = MockServer::start().await;
    let first = vec![human("h1", "hello")];
    let second = vec![human("h1", "hello"), ai("a1", "hi")];
    let third = vec![human("h1", "hello"), ai("a1", "hi"), human("h2", "more"), ai("a2", "sure")];
    mount_state(&server, "t1", &third, false).await;
    mount_history(
        &server,
        "t1",
        json!([
            snapshot(&first, true, "c1"),
            snapshot(&second, true, "c2"),
            snapshot(&second, false, "c2b"),
            snapshot(&third, true, "c3"),
        ]),
    )
    .await;
    mount_run_stream(&server, sse_body(&[("data", to_json(&first))])).await;

    let config = config_for_server(&server);
    let client = ApiClient::new(&config);
    let mut session = StreamSession::new("t1", &config);
    let mut view = ThreadView::new(Thread::new("t1", "a1"));
    view.load(&client).await.expect("load");
    assert_eq!(view.timeline().len(), 3);
    assert_eq!(view.active_index(), 2);
    assert!(!view.can_rerun());

    assert!(view.select_checkpoint(0, &session));
    assert_eq!(view.transcript(), first.as_slice());
    assert!(view.rerun(&client, &mut session).await.expect("rerun"));
    let mut rx = session.subscribe();
    wait_for_state(&mut rx, |s| s.phase == Phase::Done).await;

    let runs = received_json(&server, "/runs/stream").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["input"], to_json(&first));
    assert_eq!(runs[0]["config"], json!({"configurable": {"thread_ts": "c1"}}));

    let history_fetches = server
        .received_requests()
        .await
        .expect("requests")
        .iter()
        .filter(|r| r.url.path() == "/threads/t1/history")
        .count();
    assert_eq!(history_fetches, 2);
    // The reloaded timeline changed length, so the view follows the latest.
    assert_eq!(view.active_index(), view.timeline().len() - 1);
}

#[tokio::test]
async fn settled_stream_is_replaced_by_server_state() {
    let server = MockServer::start().await;
    let transcript = vec![human("h1", "hello"), ai("a1", "hi there")];
    mount_state(&server, "t1", &transcript, true).await;
    mount_history(&server, "t1", json!([])).await;
    mount_run_stream(&server, sse_body(&[("data", to_json(&transcript))])).await;

    let config = config_for_server(&server);
    let client = ApiClient::new(&config);
    let mut session = StreamSession::new("t1", &config);
    let mut rx = session.subscribe();
    let mut view = ThreadView::new(Thread::new("t1", "a1"));

    session.start(
        &client,
        RunRequest {
            input: Some(vec![human("h1", "hello")]),
            assistant_id: "a1".to_string(),
            thread_id: "t1".to_string(),
            config: None,
        },
    );
    assert!(!view.observe(&session.state()).settled);
    let state = wait_for_state(&mut rx, |s| s.phase == Phase::Done).await;
    let observed = view.observe(&state);
    assert!(observed.settled);
    assert_eq!(view.transcript(), transcript.as_slice());

    view.settle(&client, &mut session).await.expect("settle");
    assert!(view.resumeable());
    assert_eq!(view.baseline(), transcript.as_slice());
    assert_eq!(session.state().stream.and_then(|s| s.messages), None);
    assert_eq!(view.transcript(), transcript.as_slice());
}

#[tokio::test]
async fn explicit_navigation_survives_refresh_until_timeline_grows() {
    let server = MockServer::start().await;
    let first = vec![human("h1", "hello")];
    let second = vec![human("h1", "hello"), ai("a1", "hi")];
    let third = vec![human("h1", "hello"), ai("a1", "hi"), human("h2", "more")];
    mount_state(&server, "t1", &second, false).await;
    Mock::given(method("GET"))
        .and(path("/threads/t1/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            snapshot(&first, true, "c1"),
            snapshot(&second, true, "c2"),
        ])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_history(
        &server,
        "t1",
        json!([
            snapshot(&first, true, "c1"),
            snapshot(&second, true, "c2"),
            snapshot(&third, true, "c3"),
        ]),
    )
    .await;

    let config = config_for_server(&server);
    let client = ApiClient::new(&config);
    let session = StreamSession::new("t1", &config);
    let mut view = ThreadView::new(Thread::new("t1", "a1"));
    view.load(&client).await.expect("load");
    assert_eq!(view.active_index(), 1);

    assert!(view.select_checkpoint(0, &session));
    view.refresh_history(&client).await.expect("unchanged refresh");
    assert_eq!(view.timeline().len(), 2);
    assert_eq!(view.active_index(), 0);

    view.refresh_history(&client).await.expect("grown refresh");
    assert_eq!(view.timeline().len(), 3);
    assert_eq!(view.active_index(), 2);
}

async fn two_checkpoint_thread(server: &MockServer) -> (ApiClient, StreamSession, ThreadView) {
    let first = vec![human("h1", "hello")];
    let second = vec![human("h1", "hello"), ai("a1", "hi")];
    mount_state(server, "t1", &second, false).await;
    mount_history(
        server,
        "t1",
        json!([snapshot(&first, true, "c1"), snapshot(&second, true, "c2")]),
    )
    .await;
    mount_run_stream(server, String::new()).await;

    let config = config_for_server(server);
    let client = ApiClient::new(&config);
    let session = StreamSession::new("t1", &config);
    let mut view = ThreadView::new(Thread::new("t1", "a1"));
    view.load(&client).await.expect("load");
    (client, session, view)
}

#[tokio::test]
async fn state_run_sends_raw_state_with_checkpoint_config() {
    let server = MockServer::start().await;
    let (client, mut session, mut view) = two_checkpoint_thread(&server).await;

    assert!(view.select_checkpoint(0, &session));
    view.start_state_run(&client, &mut session, Some(json!({"count": 1, "notes": ["a"]})));
    assert!(session.is_inflight());
    let mut rx = session.subscribe();
    wait_for_state(&mut rx, |s| s.phase == Phase::Done).await;

    let runs = received_json(&server, "/runs/stream").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["input"], json!({"count": 1, "notes": ["a"]}));
    assert_eq!(runs[0]["config"], json!({"configurable": {"thread_ts": "c1"}}));
    assert_eq!(runs[0]["assistant_id"], "a1");
}

#[tokio::test]
async fn resume_with_values_overwrites_checkpoint_then_continues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/t1/state"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"configurable": {"thread_ts": "c1-forked"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (client, mut session, mut view) = two_checkpoint_thread(&server).await;

    // Nothing to overwrite at the latest checkpoint.
    assert!(
        !view
            .resume_with_values(&client, &mut session, json!({"count": 5}))
            .await
            .expect("refused")
    );

    assert!(view.select_checkpoint(0, &session));
    assert!(
        view.resume_with_values(&client, &mut session, json!({"count": 5}))
            .await
            .expect("resume")
    );
    assert_eq!(
        received_json(&server, "/threads/t1/state").await,
        vec![json!({
            "values": {"count": 5},
            "config": {"configurable": {"thread_ts": "c1"}},
        })]
    );

    let mut rx = session.subscribe();
    wait_for_state(&mut rx, |s| s.phase == Phase::Done).await;
    let runs = received_json(&server, "/runs/stream").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["input"], Value::Null);
    assert_eq!(runs[0]["config"], json!({"configurable": {"thread_ts": "c1-forked"}}));
}

#[tokio::test]
async fn rejected_state_overwrite_surfaces_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/t1/state"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "bad values"})))
        .mount(&server)
        .await;
    let (client, mut session, mut view) = two_checkpoint_thread(&server).await;

    assert!(view.select_checkpoint(0, &session));
    let err = view
        .resume_with_values(&client, &mut session, json!({"count": "x"}))
        .await
        .expect_err("rejected");
    assert!(matches!(err, StudioErr::Request { .. }));
    assert_eq!(session.state().error_message.as_deref(), Some("bad values"));
    assert!(!session.is_inflight());
    assert!(received_json(&server, "/runs/stream").await.is_empty());
}

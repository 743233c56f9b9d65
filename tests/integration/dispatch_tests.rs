//! Integration tests for the dispatcher
//!
//! These tests use wiremock to create mock HTTP servers and drive the full
//! dispatch cycle end-to-end: admission, retries, lifecycle and hooks.

use ripple_fetch::storage::{
    ensure_items_table, record_item, Query, SqliteStorage, Storage, ITEMS_TABLE,
};
use ripple_fetch::{Dispatcher, ProxySetting, RunState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Polls `condition` every 10ms until it holds or `timeout` elapses
async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

/// Dispatcher with counting item/error hooks
fn counting_dispatcher() -> (Dispatcher, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let items = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let dispatcher = Dispatcher::new();
    let item_counter = items.clone();
    let error_counter = errors.clone();
    dispatcher
        .on_item(move |_, _| {
            item_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |_, _| {
            error_counter.fetch_add(1, Ordering::SeqCst);
        });

    (dispatcher, items, errors)
}

#[tokio::test]
async fn test_concurrency_limit_holds_back_third_task() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .set_delay(Duration::from_millis(600)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let (dispatcher, items, _) = counting_dispatcher();
    dispatcher.set_concurrency(2).add_tasks([
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
        format!("{}/c", server.uri()),
    ]);
    dispatcher.start();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(request_count(&server).await, 2);
    assert_eq!(dispatcher.in_flight(), 2);
    assert_eq!(dispatcher.task_count(), 1);

    let finished = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 3, Duration::from_secs(5)).await
    };
    assert!(finished);
    assert_eq!(request_count(&server).await, 3);
    let idle = {
        let dispatcher = dispatcher.clone();
        wait_for(move || dispatcher.is_idle(), Duration::from_secs(1)).await
    };
    assert!(idle);
    dispatcher.stop();
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .set_delay(Duration::from_millis(80)),
        )
        .mount(&server)
        .await;

    let (dispatcher, items, errors) = counting_dispatcher();
    dispatcher
        .set_concurrency(3)
        .set_retries(1)
        .set_retry_backoff(Duration::from_millis(100))
        .add_task(format!("{}/flaky", server.uri()))
        .add_tasks((0..12).map(|i| format!("{}/page/{}", server.uri(), i)));
    dispatcher.start();

    let mut peak = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while items.load(Ordering::SeqCst) + errors.load(Ordering::SeqCst) < 13 {
        assert!(Instant::now() < deadline, "dispatch did not finish in time");
        let in_flight = dispatcher.in_flight();
        assert!(in_flight <= 3, "{} attempts in flight", in_flight);
        peak = peak.max(in_flight);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(peak, 3);
    assert_eq!(items.load(Ordering::SeqCst), 12);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    // 12 pages plus two attempts at the flaky one
    assert_eq!(request_count(&server).await, 14);
    dispatcher.stop();
}

#[tokio::test]
async fn test_retries_then_single_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let reported = statuses.clone();
    let started = Instant::now();

    let dispatcher = Dispatcher::new();
    dispatcher
        .set_retries(2)
        .on_error(move |error, id| {
            reported
                .lock()
                .unwrap()
                .push((error.status(), id.to_string(), started.elapsed()));
        })
        .add_task(format!("{}/broken", server.uri()))
        .start();

    // The failed attempt frees its slot while the backoff runs
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(dispatcher.pending_retries(), 1);
    assert!(!dispatcher.is_idle());

    let done = {
        let statuses = statuses.clone();
        wait_for(move || !statuses.lock().unwrap().is_empty(), Duration::from_secs(5)).await
    };
    assert!(done);

    // No further reports once the budget is spent
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    let (status, id, elapsed) = &statuses[0];
    assert_eq!(*status, Some(500));
    assert_eq!(id, &format!("{}/broken", server.uri()));
    assert!(*elapsed >= Duration::from_millis(1900), "error after {:?}", elapsed);
    assert_eq!(request_count(&server).await, 3);
    assert!(dispatcher.is_idle());
    dispatcher.stop();
}

#[tokio::test]
async fn test_end_hook_fires_repeatedly_on_empty_queue() {
    let ends = Arc::new(AtomicUsize::new(0));
    let counter = ends.clone();

    let dispatcher = Dispatcher::new();
    dispatcher
        .on_end(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .start();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(ends.load(Ordering::SeqCst) >= 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let fired = ends.load(Ordering::SeqCst);
    assert!((2..=4).contains(&fired), "end hook fired {} times", fired);

    // Stopping silences it
    dispatcher.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_stop = ends.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(ends.load(Ordering::SeqCst), after_stop);
}

#[tokio::test]
async fn test_task_added_while_running_dispatches_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/late"))
        .respond_with(ResponseTemplate::new(200).set_body_string("late"))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, items, _) = counting_dispatcher();
    dispatcher.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let added = Instant::now();
    dispatcher.add_task(format!("{}/late", server.uri()));
    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await
    };
    assert!(fetched);
    // Well before the next empty-queue poll
    assert!(added.elapsed() < Duration::from_millis(800));
    dispatcher.stop();
}

#[tokio::test]
async fn test_paused_tasks_wait_for_resume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(2)
        .mount(&server)
        .await;

    let (dispatcher, items, _) = counting_dispatcher();
    dispatcher.start().pause();
    assert_eq!(dispatcher.state(), RunState::Paused);

    dispatcher.add_tasks([format!("{}/one", server.uri()), format!("{}/two", server.uri())]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(request_count(&server).await, 0);
    assert_eq!(dispatcher.task_count(), 2);

    dispatcher.resume();
    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 2, Duration::from_secs(3)).await
    };
    assert!(fetched);
    assert_eq!(dispatcher.task_count(), 0);
    dispatcher.stop();
}

#[tokio::test]
async fn test_pending_retry_survives_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recovers"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovers"))
        .respond_with(ResponseTemplate::new(200).set_body_string("back"))
        .mount(&server)
        .await;

    let (dispatcher, items, errors) = counting_dispatcher();
    dispatcher
        .set_retries(1)
        .set_retry_backoff(Duration::from_millis(200))
        .add_task(format!("{}/recovers", server.uri()))
        .start();

    let parked = {
        let dispatcher = dispatcher.clone();
        wait_for(move || dispatcher.pending_retries() == 1, Duration::from_secs(2)).await
    };
    assert!(parked);
    dispatcher.stop();

    // The backoff elapses while stopped; nothing is dispatched
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(request_count(&server).await, 1);
    assert_eq!(dispatcher.pending_retries(), 1);

    dispatcher.start();
    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await
    };
    assert!(fetched);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    let idle = {
        let dispatcher = dispatcher.clone();
        wait_for(move || dispatcher.is_idle(), Duration::from_secs(1)).await
    };
    assert!(idle);
    dispatcher.stop();
}

#[tokio::test]
async fn test_gate_rejection_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/allowed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, items, errors) = counting_dispatcher();
    dispatcher
        .before_request(|id| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            !id.ends_with("/blocked")
        })
        .add_tasks([
            format!("{}/blocked", server.uri()),
            format!("{}/allowed", server.uri()),
        ])
        .start();

    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await
    };
    assert!(fetched);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(items.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    dispatcher.stop();
}

#[tokio::test]
async fn test_headers_and_cookies_reach_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("cookie", "session=abc; theme=dark"))
        .and(header("accept-language", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(1)
        .mount(&server)
        .await;

    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = bodies.clone();

    let dispatcher = Dispatcher::new();
    dispatcher
        .set_cookies("session=abc; theme=dark")
        .set_headers([("Accept-Language", "en")])
        .on_item(move |content, _| sink.lock().unwrap().push(content))
        .add_task(format!("{}/private", server.uri()))
        .start();

    let fetched = {
        let bodies = bodies.clone();
        wait_for(move || !bodies.lock().unwrap().is_empty(), Duration::from_secs(2)).await
    };
    assert!(fetched);
    assert_eq!(*bodies.lock().unwrap(), vec!["secret".to_string()]);
    dispatcher.stop();
}

#[tokio::test]
async fn test_requests_route_through_proxy() {
    // The mock server stands in for an HTTP forward proxy
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("proxied"))
        .expect(2)
        .mount(&proxy)
        .await;

    let (dispatcher, items, errors) = counting_dispatcher();
    dispatcher
        .set_concurrency(2)
        .set_proxy(ProxySetting::Pool(vec![proxy.uri(), proxy.uri()]))
        .add_tasks(["http://origin.invalid/a", "http://origin.invalid/b"])
        .start();

    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 2, Duration::from_secs(3)).await
    };
    assert!(fetched);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    dispatcher.stop();
}

#[tokio::test]
async fn test_items_persisted_to_storage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>stored</p>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::new(&dir.path().join("items.db")).unwrap();
    ensure_items_table(&mut storage).unwrap();
    let storage = Arc::new(Mutex::new(storage));

    let sink = storage.clone();
    let dispatcher = Dispatcher::new();
    dispatcher
        .set_concurrency(2)
        .on_item(move |content, id| {
            record_item(&mut *sink.lock().unwrap(), id, &content).unwrap();
        })
        .add_tasks([format!("{}/x", server.uri()), format!("{}/y", server.uri())])
        .start();

    let stored = {
        let storage = storage.clone();
        wait_for(
            move || {
                storage
                    .lock()
                    .unwrap()
                    .count(ITEMS_TABLE, &Default::default())
                    .unwrap()
                    == 2
            },
            Duration::from_secs(3),
        )
        .await
    };
    assert!(stored);
    dispatcher.stop();

    let storage = storage.lock().unwrap();
    let rows = storage
        .select(ITEMS_TABLE, &Query::new().order_by("url", Default::default()))
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].get("url"),
        Some(&rusqlite::types::Value::Text(format!("{}/x", server.uri())))
    );
    assert_eq!(
        rows[1].get("content"),
        Some(&rusqlite::types::Value::Text("<p>stored</p>".to_string()))
    );
}

#[tokio::test]
async fn test_end_hook_fires_while_every_slot_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(3000)),
        )
        .mount(&server)
        .await;

    let ends = Arc::new(AtomicUsize::new(0));
    let counter = ends.clone();

    let dispatcher = Dispatcher::new();
    dispatcher
        .set_concurrency(1)
        .on_end(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .add_task(format!("{}/slow", server.uri()))
        .start();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(dispatcher.in_flight(), 1);
    assert_eq!(dispatcher.task_count(), 0);
    assert!(ends.load(Ordering::SeqCst) >= 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(dispatcher.in_flight(), 1);
    let fired = ends.load(Ordering::SeqCst);
    assert!(fired >= 2, "end hook fired {} times", fired);
    assert!(!dispatcher.is_idle());
    dispatcher.stop();
}

#[tokio::test]
async fn test_slow_gate_does_not_hold_up_other_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(3)
        .mount(&server)
        .await;

    let (dispatcher, items, _) = counting_dispatcher();
    dispatcher
        .set_concurrency(3)
        .before_request(|id| async move {
            if id.ends_with("/g") {
                tokio::time::sleep(Duration::from_millis(2000)).await;
            }
            true
        })
        .add_tasks([
            format!("{}/a", server.uri()),
            format!("{}/g", server.uri()),
            format!("{}/b", server.uri()),
        ])
        .start();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(items.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(dispatcher.task_count(), 0);
    // The gated task is neither queued nor in flight, but the run is not done
    assert!(!dispatcher.is_idle());

    let fetched = {
        let items = items.clone();
        wait_for(move || items.load(Ordering::SeqCst) == 3, Duration::from_secs(3)).await
    };
    assert!(fetched);
    let idle = {
        let dispatcher = dispatcher.clone();
        wait_for(move || dispatcher.is_idle(), Duration::from_secs(1)).await
    };
    assert!(idle);
    dispatcher.stop();
}

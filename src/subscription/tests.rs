//! Delivery loop and subscription lifecycle tests.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rstest::{fixture, rstest};
use tokio::{runtime::Handle, sync::mpsc, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_test::traced_test;

use super::*;
use crate::transport::test_support::RecordingTransport;

const WAIT: Duration = Duration::from_secs(2);

type Failures = Arc<Mutex<Vec<(Sid, &'static str)>>>;

/// A subscription table wired to a recording transport, without a connection.
struct Harness {
    table: Arc<SubscriptionTable>,
    transport: Arc<RecordingTransport>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    failures: Failures,
}

impl Harness {
    fn subscribe(&self, handler: Option<MessageHandler>, max: u64) -> AsyncSubscription {
        let failures = Arc::clone(&self.failures);
        let hook: HandlerFailureHook = Arc::new(move |sid, failure: &HandlerFailure| {
            failures.lock().expect("failures lock").push((sid, failure.kind()));
        });
        let connection: Arc<dyn Transport> = self.transport.clone();
        let shared = SubscriptionShared::new(SubscriptionParts {
            sid: self.table.next_sid(),
            subject: "orders.created".into(),
            queue_group: None,
            options: None,
            handler,
            max,
            connection,
            table: Arc::downgrade(&self.table),
            context: WorkerContext {
                runtime: Handle::current(),
                tracker: self.tracker.clone(),
                shutdown: self.shutdown.clone(),
                on_failure: Some(hook),
            },
        });
        self.table.insert(Arc::clone(&shared));
        AsyncSubscription::from_shared(shared)
    }

    fn failures(&self) -> Vec<(Sid, &'static str)> { self.failures.lock().expect("failures lock").clone() }

    async fn stop(self) {
        self.shutdown.cancel();
        self.tracker.close();
        timeout(WAIT, self.tracker.wait()).await.expect("workers stop");
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        table: Arc::new(SubscriptionTable::default()),
        transport: Arc::new(RecordingTransport::default()),
        tracker: TaskTracker::new(),
        shutdown: CancellationToken::new(),
        failures: Arc::default(),
    }
}

fn message(sid: Sid, n: u32) -> Message { Message::new("orders.created", sid, n.to_string()) }

/// Handler forwarding each payload to a channel the test reads from.
fn recording_handler() -> (MessageHandler, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |delivery: Delivery| {
        let tx = tx.clone();
        async move {
            let payload = String::from_utf8_lossy(delivery.message().payload()).into_owned();
            let _ = tx.send(payload);
            Ok(())
        }
    });
    (handler, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv()).await.expect("delivery in time").expect("channel open")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition reached");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_arrive_in_order_one_at_a_time(harness: Harness) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = {
        let in_flight = Arc::clone(&in_flight);
        handler_fn(move |delivery: Delivery| {
            let in_flight = Arc::clone(&in_flight);
            let tx = tx.clone();
            async move {
                assert!(!in_flight.swap(true, Ordering::SeqCst), "concurrent delivery");
                tokio::task::yield_now().await;
                let _ = tx.send(delivery.into_message().into_payload());
                in_flight.store(false, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");

    for n in 0..100 {
        assert!(sub.shared().deliver(message(sub.sid(), n)));
    }
    for n in 0..100 {
        let payload = timeout(WAIT, rx.recv()).await.expect("in time").expect("open");
        assert_eq!(payload, n.to_string().as_bytes());
    }
    assert_eq!(sub.delivered(), 100);
    assert!(harness.failures().is_empty(), "{:?}", harness.failures());
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn limit_of_one_delivers_once_then_invalidates(harness: Harness) {
    let (handler, mut rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 1);
    let sid = sub.sid();
    assert!(sub.shared().deliver(message(sid, 1)));
    assert!(sub.shared().deliver(message(sid, 2)));

    sub.start().expect("start");
    assert_eq!(next(&mut rx).await, "1");
    wait_until(|| !sub.is_started()).await;

    assert!(!sub.is_valid());
    assert_eq!(sub.delivered(), 1);
    assert!(rx.try_recv().is_err());
    assert_eq!(harness.table.len(), 0);
    assert!(!sub.shared().deliver(message(sid, 3)));
    assert_eq!(
        harness.transport.frames(),
        vec![
            OutboundFrame::Subscribe {
                sid,
                subject: "orders.created".into(),
                queue_group: None,
            },
            OutboundFrame::Unsubscribe { sid, max: None },
        ]
    );
    harness.stop().await;
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn failing_handler_does_not_stop_delivery(harness: Harness) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |delivery: Delivery| {
        let tx = tx.clone();
        async move {
            let payload = String::from_utf8_lossy(delivery.message().payload()).into_owned();
            let _ = tx.send(payload.clone());
            match payload.as_str() {
                "3" => Err(io::Error::other("cannot process 3").into()),
                "4" => panic!("handler blew up on 4"),
                _ => Ok(()),
            }
        }
    });
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");

    for n in 1..=5 {
        sub.shared().deliver(message(sub.sid(), n));
    }
    for n in 1..=5 {
        assert_eq!(next(&mut rx).await, n.to_string());
    }
    wait_until(|| harness.failures().len() == 2).await;

    assert_eq!(harness.failures(), vec![(sub.sid(), "error"), (sub.sid(), "panic")]);
    assert!(sub.is_valid());
    assert!(logs_contain("message handler failed"));
    assert!(logs_contain("cannot process 3"));
    assert!(logs_contain("handler blew up on 4"));
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn messages_without_handler_are_dropped(harness: Harness) {
    let sub = harness.subscribe(None, 0);
    sub.start().expect("start");
    sub.shared().deliver(message(sub.sid(), 1));
    wait_until(|| sub.pending() == 0).await;

    let (handler, mut rx) = recording_handler();
    sub.set_handler(handler);
    sub.shared().deliver(message(sub.sid(), 2));

    assert_eq!(next(&mut rx).await, "2");
    assert_eq!(sub.delivered(), 1);
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn replacing_handler_applies_to_next_message(harness: Harness) {
    let (first, mut first_rx) = recording_handler();
    let (second, mut second_rx) = recording_handler();
    let sub = harness.subscribe(Some(first), 0);
    sub.start().expect("start");

    sub.shared().deliver(message(sub.sid(), 1));
    assert_eq!(next(&mut first_rx).await, "1");
    sub.set_handler(second);
    sub.shared().deliver(message(sub.sid(), 2));

    assert_eq!(next(&mut second_rx).await, "2");
    assert!(first_rx.try_recv().is_err());
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn start_is_idempotent(harness: Harness) {
    let (handler, _rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);

    sub.start().expect("first start");
    sub.start().expect("second start");

    assert!(sub.is_started());
    assert_eq!(harness.transport.frames().len(), 1);
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn start_after_unsubscribe_fails(harness: Harness) {
    let (handler, _rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");

    sub.unsubscribe().expect("unsubscribe");
    sub.unsubscribe().expect("second unsubscribe is a no-op");

    let err = sub.start().expect_err("invalid subscription");
    assert!(matches!(err, SubscriptionError::InvalidState { sid } if sid == sub.sid()));
    let unsubscribes = harness
        .transport
        .frames()
        .into_iter()
        .filter(|frame| matches!(frame, OutboundFrame::Unsubscribe { .. }))
        .count();
    assert_eq!(unsubscribes, 1);
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn failed_announcement_leaves_worker_stopped(harness: Harness) {
    let (handler, _rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    harness.transport.close();

    let err = sub.start().expect_err("transport closed");
    assert!(matches!(err, SubscriptionError::Transport(_)));
    assert!(!sub.is_started());
    assert!(sub.is_valid());
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn close_interrupts_idle_worker(harness: Harness) {
    let (handler, _rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");

    sub.close();
    harness.tracker.close();
    timeout(WAIT, harness.tracker.wait())
        .await
        .expect("worker exits without a pending message");
    assert!(!sub.is_valid());
    assert!(!sub.is_started());
}

#[rstest]
#[tokio::test]
async fn lowering_limit_below_delivered_tears_down(harness: Harness) {
    let (handler, mut rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");
    for n in 1..=3 {
        sub.shared().deliver(message(sub.sid(), n));
        assert_eq!(next(&mut rx).await, n.to_string());
    }

    sub.auto_unsubscribe(2).expect("auto unsubscribe");

    assert!(!sub.is_valid());
    assert_eq!(
        harness.transport.frames().last(),
        Some(&OutboundFrame::Unsubscribe { sid: sub.sid(), max: None })
    );
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn auto_unsubscribe_tells_server_remaining_limit(harness: Harness) {
    let (handler, mut rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");

    sub.auto_unsubscribe(2).expect("auto unsubscribe");
    assert_eq!(sub.max_messages(), 2);
    assert_eq!(
        harness.transport.frames().last(),
        Some(&OutboundFrame::Unsubscribe { sid: sub.sid(), max: Some(2) })
    );

    for n in 1..=3 {
        sub.shared().deliver(message(sub.sid(), n));
    }
    assert_eq!(next(&mut rx).await, "1");
    assert_eq!(next(&mut rx).await, "2");
    wait_until(|| !sub.is_valid()).await;
    assert_eq!(sub.delivered(), 2);
    harness.stop().await;
}

#[rstest]
#[tokio::test]
async fn restarted_worker_resumes_queued_messages(harness: Harness) {
    let (handler, mut rx) = recording_handler();
    let sub = harness.subscribe(Some(handler), 0);
    sub.start().expect("start");
    sub.shared().deliver(message(sub.sid(), 1));
    assert_eq!(next(&mut rx).await, "1");

    assert!(sub.shared().disable());
    assert!(!sub.shared().disable());
    sub.shared().deliver(message(sub.sid(), 2));
    assert!(sub.shared().enable());

    assert_eq!(next(&mut rx).await, "2");
    harness.stop().await;
}

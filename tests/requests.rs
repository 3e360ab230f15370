//! Request/reply round trips and request expiry.

use std::time::Duration;

use rstest::rstest;
use streamlink::{
    CancelAction,
    CancelReason,
    ConnectionConfig,
    Message,
    NO_RESPONDERS_STATUS,
    REPLY_SID,
    RequestError,
    RequestOptions,
};
use tokio::time::Instant;

mod common;

use common::{Harness, harness};

#[rstest]
#[tokio::test]
async fn concurrent_requests_resolve_with_their_own_replies(mut harness: Harness) {
    let first = harness
        .connection
        .request("svc.a", "1", RequestOptions::default())
        .expect("first");
    let first_inbox = harness.next_reply_subject().await;
    let second = harness
        .connection
        .request("svc.b", "2", RequestOptions::default())
        .expect("second");
    let second_inbox = harness.next_reply_subject().await;
    assert_ne!(first_inbox, second_inbox);

    // Replies arrive out of order.
    assert!(harness.reply(&second_inbox, "two"));
    assert!(harness.reply(&first_inbox, "one"));

    let second = second.await.expect("second reply").expect("message");
    let first = first.await.expect("first reply").expect("message");
    assert_eq!(first.payload().as_ref(), b"one");
    assert_eq!(second.payload().as_ref(), b"two");
    assert_eq!(harness.connection.pending_requests(), 0);
}

#[rstest]
#[tokio::test]
async fn reply_interest_precedes_first_request(mut harness: Harness) {
    let _pending = harness
        .connection
        .request("svc.a", "", RequestOptions::default())
        .expect("request");

    match harness.next_frame().await {
        streamlink::OutboundFrame::Subscribe { sid, subject, .. } => {
            assert_eq!(sid, REPLY_SID);
            assert!(subject.starts_with("_INBOX."));
            assert!(subject.ends_with(".*"));
        }
        other => panic!("expected reply interest, got {other:?}"),
    }
}

#[rstest]
#[case::report(CancelAction::Report, true, Err(RequestError::TimedOut))]
#[case::cancel_reports_timeout(CancelAction::Cancel, true, Err(RequestError::TimedOut))]
#[case::cancel_generic(
    CancelAction::Cancel,
    false,
    Err(RequestError::Cancelled(CancelReason::TimedOut))
)]
#[case::complete(CancelAction::Complete, true, Ok(None))]
#[tokio::test(start_paused = true)]
async fn expiry_honours_cancel_action(
    #[case] action: CancelAction,
    #[case] timeout_error: bool,
    #[case] expected: Result<Option<Message>, RequestError>,
) {
    let harness = Harness::new(ConnectionConfig::default());
    let start = Instant::now();
    let handle = harness
        .connection
        .request(
            "svc.slow",
            "",
            RequestOptions::default()
                .timeout(Duration::from_millis(50))
                .cancel_action(action)
                .timeout_error(timeout_error),
        )
        .expect("request");

    assert_eq!(handle.await, expected);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(60), "expired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(70), "expired late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn connection_default_timeout_applies() {
    let harness = Harness::new(ConnectionConfig::default().request_timeout(Duration::from_millis(200)));
    let start = Instant::now();
    let handle = harness
        .connection
        .request("svc.slow", "", RequestOptions::default())
        .expect("request");

    assert_eq!(handle.await, Err(RequestError::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(210));
    assert!(start.elapsed() < Duration::from_millis(220));
}

#[rstest]
#[tokio::test]
async fn reply_after_expiry_is_dropped(mut harness: Harness) {
    let handle = harness
        .connection
        .request(
            "svc.slow",
            "",
            RequestOptions::default().timeout(Duration::from_millis(1)),
        )
        .expect("request");
    let inbox = harness.next_reply_subject().await;

    assert_eq!(handle.await, Err(RequestError::TimedOut));
    assert!(!harness.reply(&inbox, "late"));
}

#[rstest]
#[tokio::test]
async fn no_responders_status_fails_request(mut harness: Harness) {
    let handle = harness
        .connection
        .request("svc.none", "", RequestOptions::default().cancel_action(CancelAction::Report))
        .expect("request");
    let inbox = harness.next_reply_subject().await;

    harness
        .connection
        .process_inbound(Message::new(inbox, REPLY_SID, "").with_status(NO_RESPONDERS_STATUS));

    assert_eq!(handle.await, Err(RequestError::NoResponders));
}

#[rstest]
#[tokio::test]
async fn shutdown_settles_every_request(harness: Harness) {
    let handles: Vec<_> = (0..8)
        .map(|n| {
            harness
                .connection
                .request(
                    &format!("svc.{n}"),
                    "",
                    RequestOptions::default().cancel_action(CancelAction::Report),
                )
                .expect("request")
        })
        .collect();

    harness.connection.shutdown().await;

    for handle in handles {
        assert_eq!(handle.await, Err(RequestError::ConnectionClosing));
    }
    assert_eq!(
        harness
            .connection
            .request("svc.late", "", RequestOptions::default())
            .err(),
        Some(RequestError::ConnectionClosed)
    );
}

//! The per-subscription delivery loop.
//!
//! One worker drains one dispatch queue, invoking the handler inline so a
//! subscription never sees two of its messages at once. Cancellation only
//! interrupts the wait for the next entry; a handler already running finishes
//! first.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{HandlerFailure, MessageHandler, SubscriptionShared};
use crate::{
    message::Delivery,
    metrics::{self, DropReason},
    panic::panic_message,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Break,
}

/// Drain the subscription's queue until `shutdown` fires or the loop decides
/// to stop on its own.
pub(super) async fn run(shared: Arc<SubscriptionShared>, shutdown: CancellationToken) {
    // A previous worker may still be finishing a handler; waiting for the
    // receiver keeps delivery serial across restarts.
    let mut receiver = tokio::select! {
        biased;

        () = shutdown.cancelled() => return,
        receiver = Arc::clone(shared.receiver()).lock_owned() => receiver,
    };
    trace!(sid = %shared.sid(), subject = shared.subject(), "delivery worker started");

    loop {
        let delivery = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        if process(&shared, delivery).await == Flow::Break {
            break;
        }
    }
    if !shared.is_valid() {
        receiver.close();
    }
    trace!(sid = %shared.sid(), "delivery worker stopped");
}

async fn process(shared: &SubscriptionShared, delivery: Delivery) -> Flow {
    let snapshot = shared.snapshot();
    let Some(handler) = snapshot.handler else {
        trace!(sid = %shared.sid(), "no handler registered, message dropped");
        metrics::inc_dropped(DropReason::NoHandler);
        return Flow::Continue;
    };
    if !snapshot.attached {
        return Flow::Break;
    }

    let max = snapshot.max;
    let Some(count) = shared.claim_delivery(max) else {
        // The ceiling was lowered below what has already been delivered.
        shared.close();
        return Flow::Break;
    };
    invoke(shared, &handler, delivery).await;

    if max != 0 && count == max {
        debug!(sid = %shared.sid(), max, "delivery limit reached, unsubscribing");
        shared.close();
        return Flow::Break;
    }
    Flow::Continue
}

/// Run the handler, containing any error or panic it produces.
async fn invoke(shared: &SubscriptionShared, handler: &MessageHandler, delivery: Delivery) {
    metrics::inc_delivered();
    let outcome = AssertUnwindSafe(async { handler(delivery).await })
        .catch_unwind()
        .await;
    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => HandlerFailure::Error(error),
        Err(payload) => HandlerFailure::Panic(panic_message(payload.as_ref())),
    };

    let sid = shared.sid();
    warn!(
        sid = %sid,
        subject = shared.subject(),
        kind = failure.kind(),
        error = %failure,
        "message handler failed"
    );
    metrics::inc_handler_failures(failure.kind());

    if let Some(hook) = shared.failure_hook()
        && let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(sid, &failure)))
    {
        warn!(sid = %sid, panic = %panic_message(panic.as_ref()), "handler failure hook panicked");
    }
}

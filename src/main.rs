//! Loopback demo of the `streamlink` delivery engine.
//!
//! Outbound frames are routed straight back to the connection by an
//! in-process router standing in for a server.

mod cli;

use std::{collections::HashMap, time::Duration};

use clap::Parser;
use streamlink::{
    Connection,
    ConnectionConfig,
    Delivery,
    HandlerError,
    Message,
    NO_RESPONDERS_STATUS,
    OutboundFrame,
    REPLY_SID,
    RequestOptions,
    Sid,
    handler_fn,
    outbound::{self, OutboundReceiver},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable structured logging for the demo.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let (sender, receiver) = outbound::channel(outbound::DEFAULT_CAPACITY);
    let connection = Connection::builder()
        .config(ConnectionConfig::default().request_timeout(Duration::from_millis(cli.timeout_ms)))
        .on_handler_failure(|sid, failure| tracing::warn!(%sid, %failure, "handler failed"))
        .build(sender)?;
    let router = tokio::spawn(route(receiver, connection.clone()));

    let events = connection
        .subscription("demo.events")
        .max_messages(cli.max)
        .handler(handler_fn(|delivery: Delivery| async move {
            let message = delivery.message();
            info!(subject = message.subject(), bytes = message.payload().len(), "event received");
            Ok(())
        }))
        .start()?;
    connection.subscribe(
        "demo.echo",
        handler_fn(|delivery: Delivery| async move {
            let reply = delivery.message().payload().to_ascii_uppercase();
            delivery.respond(reply)?;
            Ok::<(), HandlerError>(())
        }),
    )?;

    for n in 0..cli.messages {
        connection.publish("demo.events", format!("event {n}"))?;
    }

    let reply = connection
        .request("demo.echo", "hello", RequestOptions::default())?
        .await?;
    if let Some(reply) = reply {
        println!("echo replied: {}", String::from_utf8_lossy(reply.payload()));
    }
    match connection
        .request("demo.nobody", "hello", RequestOptions::default())?
        .await
    {
        Ok(_) => println!("unexpected reply from demo.nobody"),
        Err(error) => println!("demo.nobody: {error}"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "demo.events delivered {} of {} messages",
        events.delivered(),
        cli.messages
    );
    connection.shutdown().await;
    router.abort();
    Ok(())
}

/// Play the server: feed published frames back to matching subscriptions.
async fn route(mut frames: OutboundReceiver, connection: Connection) {
    let mut interest: HashMap<String, Sid> = HashMap::new();
    while let Some(frame) = frames.recv().await {
        match frame {
            OutboundFrame::Subscribe { sid, subject, .. } => {
                interest.insert(subject, sid);
            }
            OutboundFrame::Unsubscribe { sid, max: None } => interest.retain(|_, s| *s != sid),
            OutboundFrame::Unsubscribe { .. } => {}
            OutboundFrame::Publish {
                subject,
                reply_to,
                payload,
            } => {
                let sid = interest
                    .iter()
                    .find(|(pattern, _)| matches_subject(pattern, &subject))
                    .map(|(_, sid)| *sid);
                match (sid, reply_to) {
                    (Some(sid), reply_to) => {
                        let mut message = Message::new(subject, sid, payload);
                        if let Some(reply_to) = reply_to {
                            message = message.with_reply_to(reply_to);
                        }
                        connection.process_inbound(message);
                    }
                    (None, Some(reply_to)) => {
                        let status = Message::new(reply_to, REPLY_SID, "").with_status(NO_RESPONDERS_STATUS);
                        connection.process_inbound(status);
                    }
                    (None, None) => {}
                }
            }
        }
    }
}

/// Exact match, or a trailing `*` standing for one final token.
fn matches_subject(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => subject
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('.')),
        None => pattern == subject,
    }
}

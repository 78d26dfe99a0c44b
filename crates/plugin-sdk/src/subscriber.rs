//! Consumes the plugin's private event stream.
//!
//! The manager republishes each domain event to `manager:<plugin id>`. A
//! plugin reads that stream through a consumer group named after the plugin,
//! so replicas share the work.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio_util::sync::CancellationToken;

use crate::contract::{EventEnvelope, plugin_stream_key};
use crate::error::PluginError;
use crate::plugin::Plugin;

const BLOCK_MS: usize = 2000;

/// Run the event loop until `shutdown` is cancelled.
///
/// Handler failures are logged and the entry is acknowledged anyway; the
/// manager does not redeliver.
pub async fn run<P: Plugin>(
    plugin: Arc<P>,
    redis_url: &str,
    consumer: &str,
    shutdown: CancellationToken,
) -> Result<(), PluginError> {
    let meta = plugin.metadata();
    let stream = plugin_stream_key(meta.id);
    let group = meta.name.clone();

    let client = redis::Client::open(redis_url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;

    let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(&stream, &group, "0").await;
    match created {
        Ok(()) => {}
        Err(e) if e.code() == Some("BUSYGROUP") => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!(stream = %stream, group = %group, "consuming plugin events");

    let opts = StreamReadOptions::default()
        .group(&group, consumer)
        .count(16)
        .block(BLOCK_MS);

    while !shutdown.is_cancelled() {
        let result = tokio::select! {
            () = shutdown.cancelled() => break,
            r = read_group(&mut conn, &stream, &opts) => r,
        };
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "stream read failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let Some(reply) = reply else { continue };
        for key in reply.keys {
            for entry in key.ids {
                handle_entry(plugin.as_ref(), entry.get::<Vec<u8>>("body")).await;
                let acked: redis::RedisResult<i64> = conn.xack(&stream, &group, &[&entry.id]).await;
                if let Err(e) = acked {
                    tracing::warn!(id = %entry.id, error = %e, "failed to ack event");
                }
            }
        }
    }

    tracing::info!(stream = %stream, "event consumer stopped");
    Ok(())
}

async fn read_group(
    conn: &mut redis::aio::MultiplexedConnection,
    stream: &str,
    opts: &StreamReadOptions,
) -> redis::RedisResult<Option<StreamReadReply>> {
    conn.xread_options(&[stream], &[">"], opts).await
}

async fn handle_entry<P: Plugin>(plugin: &P, body: Option<Vec<u8>>) {
    let Some(body) = body else {
        tracing::warn!("stream entry without body");
        return;
    };

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(error = %e, "malformed event envelope");
            return;
        }
    };

    let event = envelope.event.clone();
    let team_id = envelope.team_id;
    if let Err(e) = plugin.handle_event(envelope).await {
        tracing::warn!(event = %event, team_id, error = %e, "event handler failed");
    } else {
        tracing::debug!(event = %event, team_id, "event handled");
    }
}

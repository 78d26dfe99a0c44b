#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Redis Streams bus tests.
//!
//! Need `REDIS_URL`; each test returns early when it is unset. Stream keys
//! are randomized so tests can share one server.

use formloom_manager::bus::{Consumer, Delivery, Disposition, Publisher, RedisConsumer, RedisPublisher};
use formloom_plugin_sdk::contract::stream_key;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamPendingReply;
use uuid::Uuid;

const ROUTING_KEY: &str = "events";
const GROUP: &str = "router";

struct Streams {
    client: redis::Client,
    conn: MultiplexedConnection,
    exchange: String,
    dead_letter: String,
}

impl Streams {
    fn inbound(&self) -> String {
        stream_key(&self.exchange, ROUTING_KEY)
    }

    async fn consumer(&self, name: &str) -> RedisConsumer {
        RedisConsumer::connect(&self.client, &self.exchange, ROUTING_KEY, GROUP, name)
            .await
            .unwrap()
            .with_dead_letter_stream(self.dead_letter.clone())
    }

    async fn publish(&self, body: &[u8]) {
        RedisPublisher::new(self.client.clone())
            .publish(&self.exchange, ROUTING_KEY, body)
            .await
            .unwrap();
    }

    async fn pending(&mut self) -> usize {
        let inbound = self.inbound();
        let reply: StreamPendingReply = self.conn.xpending(&inbound, GROUP).await.unwrap();
        reply.count()
    }

    async fn cleanup(mut self) {
        let inbound = self.inbound();
        let _: () = self.conn.del(&[inbound, self.dead_letter.clone()]).await.unwrap();
    }
}

async fn streams() -> Option<Streams> {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").ok()?;
    let client = redis::Client::open(url).expect("Invalid REDIS_URL");
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to REDIS_URL");
    let exchange = format!("test-{}", Uuid::new_v4().simple());
    let dead_letter = format!("{exchange}:dead");
    Some(Streams {
        client,
        conn,
        exchange,
        dead_letter,
    })
}

async fn next_delivery(consumer: &mut RedisConsumer) -> Delivery {
    for _ in 0..5 {
        if let Some(delivery) = consumer.next().await.unwrap() {
            return delivery;
        }
    }
    panic!("no entry arrived on the inbound stream");
}

#[tokio::test]
async fn rejected_entry_is_dead_lettered_and_acknowledged() {
    let Some(mut streams) = streams().await else {
        return;
    };
    let mut consumer = streams.consumer("router-1").await;
    streams.publish(br#"{"event":"sub","team_id":7,"data":{}}"#).await;

    let delivery = next_delivery(&mut consumer).await;
    consumer
        .settle(&delivery, &Disposition::reject("no enabled subscribers"))
        .await
        .unwrap();

    assert_eq!(streams.pending().await, 0);
    let dead: usize = streams.conn.xlen(&streams.dead_letter).await.unwrap();
    assert_eq!(dead, 1);
    streams.cleanup().await;
}

#[tokio::test]
async fn failed_dead_letter_copy_still_acknowledges() {
    let Some(mut streams) = streams().await else {
        return;
    };
    // A plain string under the dead-letter key makes every XADD to it fail.
    let _: () = streams
        .conn
        .set(&streams.dead_letter, "not a stream")
        .await
        .unwrap();

    let mut consumer = streams.consumer("router-1").await;
    streams.publish(b"not json").await;

    let delivery = next_delivery(&mut consumer).await;
    let settled = consumer
        .settle(&delivery, &Disposition::reject("malformed envelope"))
        .await;

    assert!(settled.is_err());
    assert_eq!(streams.pending().await, 0);

    // A restarted consumer drains its pending entries first; the rejected
    // entry must not come back.
    let mut restarted = streams.consumer("router-1").await;
    assert!(restarted.next().await.unwrap().is_none());
    streams.cleanup().await;
}

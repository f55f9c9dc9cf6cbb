//! `async-nats`-backed `Transport`: commands publish through JetStream for
//! at-least-once delivery, acks are consumed over a plain core subscription.
//! `subscribe_with_reconnect` wraps the initial subscribe in a bounded
//! exponential backoff loop, capped rather than infinite so a permanently
//! unreachable NATS cluster surfaces as a startup failure instead of
//! spinning forever.

use std::time::Duration;

use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;

const RECONNECT_MAX_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(200);
const RECONNECT_FACTOR: u32 = 2;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()>;
    async fn subscribe_with_reconnect(
        &self,
        subject: String,
    ) -> anyhow::Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Option<Vec<u8>>;
}

pub struct NatsTransport {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsTransport {
    pub async fn connect(nats_url: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(nats_url).await?;
        let jetstream = jetstream::new(client.clone());
        tracing::info!(url = nats_url, "connected to NATS");
        Ok(Self { client, jetstream })
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()> {
        self.jetstream
            .publish(subject, payload.into())
            .await?
            .await?;
        Ok(())
    }

    async fn subscribe_with_reconnect(
        &self,
        subject: String,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        let mut attempt = 0u32;
        let mut delay = RECONNECT_BASE_DELAY;

        loop {
            match self.client.subscribe(subject.clone()).await {
                Ok(subscriber) => {
                    return Ok(Box::new(NatsSubscription { subscriber }));
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= RECONNECT_MAX_ATTEMPTS {
                        return Err(anyhow::anyhow!(
                            "failed to subscribe to {subject} after {attempt} attempts: {err}"
                        ));
                    }
                    tracing::warn!(
                        subject = %subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "NATS subscribe failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= RECONNECT_FACTOR;
                }
            }
        }
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<Vec<u8>> {
        self.subscriber.next().await.map(|msg| msg.payload.to_vec())
    }
}

//! MQTT-backed telemetry subscriptions

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::source::{TelemetryConnector, TelemetryError, TelemetrySource};

/// MQTT keep-alive interval
const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Time allowed for unsubscribe/disconnect to reach the broker
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Broker connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Limit for connecting and subscribing
    pub connect_timeout: Duration,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("tasprov-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Subscribes to telemetry on an MQTT broker, one session per subscription
#[derive(Debug, Clone)]
pub struct MqttConnector {
    broker: BrokerConfig,
}

impl MqttConnector {
    pub fn new(broker: BrokerConfig) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl TelemetryConnector for MqttConnector {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TelemetrySource>, TelemetryError> {
        let (client, mut eventloop) = AsyncClient::new(self.broker.options(), 10);

        debug!(host = %self.broker.host, port = self.broker.port, "Connecting to MQTT broker");

        timeout(self.broker.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TelemetryError::Connect("timed out waiting for CONNACK".to_string()))??;

        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TelemetryError::Subscribe(e.to_string()))?;

        timeout(self.broker.connect_timeout, wait_for_suback(&mut eventloop, topic))
            .await
            .map_err(|_| TelemetryError::Subscribe("timed out waiting for SUBACK".to_string()))??;

        info!(topic = %topic, "Subscribed to telemetry");

        Ok(Box::new(MqttSubscription {
            client,
            eventloop,
            topic: topic.to_string(),
        }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TelemetryError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TelemetryError::Connect(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(TelemetryError::Connect(e.to_string())),
        }
    }
}

async fn wait_for_suback(eventloop: &mut EventLoop, topic: &str) -> Result<(), TelemetryError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                return if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    Err(TelemetryError::Subscribe(format!(
                        "broker rejected subscription to {}",
                        topic
                    )))
                } else {
                    Ok(())
                };
            }
            Ok(_) => {}
            Err(e) => return Err(TelemetryError::Subscribe(e.to_string())),
        }
    }
}

/// A live subscription; the broker session ends when this is closed or dropped
pub struct MqttSubscription {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

#[async_trait]
impl TelemetrySource for MqttSubscription {
    async fn next_payload(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TelemetryError> {
        let deadline = Instant::now() + wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match timeout(remaining, self.eventloop.poll()).await {
                Err(_) => return Ok(None),
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) if publish.topic == self.topic => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "Telemetry message");
                    return Ok(Some(publish.payload.to_vec()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(TelemetryError::Stream(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.client.unsubscribe(self.topic.clone()).await;
        let _ = self.client.disconnect().await;

        // Drive the event loop until the disconnect has gone out
        let eventloop = &mut self.eventloop;
        let _ = timeout(CLOSE_GRACE, async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        debug!(topic = %self.topic, "Telemetry subscription closed");
    }
}

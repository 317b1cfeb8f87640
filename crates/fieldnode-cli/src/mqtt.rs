use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use fieldnode_core::config::MqttConfig;
use fieldnode_core::{MqttMessage, MqttTransport, TransportError};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet, Publish, QoS};
use serde_json::json;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 20;

pub struct RumqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: bool,
    topics: BTreeSet<String>,
    backlog: VecDeque<MqttMessage>,
}

pub fn options(mqtt: &MqttConfig, client_id: &str) -> Result<MqttOptions> {
    let (host, port) = mqtt.broker_endpoint()?;
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs.max(5)));
    let offline = json!({"client_id": client_id, "status": "offline"}).to_string();
    options.set_last_will(LastWill::new(&mqtt.status_topic, offline.into_bytes(), QoS::AtLeastOnce, false));
    Ok(options)
}

pub fn to_message(publish: &Publish) -> MqttMessage {
    MqttMessage {
        topic: publish.topic.clone(),
        payload: publish.payload.to_vec(),
    }
}

impl RumqttTransport {
    pub fn new(options: MqttOptions) -> Self {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            connected: false,
            topics: BTreeSet::new(),
            backlog: VecDeque::new(),
        }
    }

    fn lost(&mut self, err: rumqttc::ConnectionError) -> TransportError {
        if self.connected {
            warn!(%err, "broker connection lost");
        }
        self.connected = false;
        TransportError::Io(err.to_string())
    }

    async fn resubscribe(&mut self) {
        for topic in &self.topics {
            if let Err(err) = self.client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                warn!(%topic, %err, "re-subscribe failed");
            }
        }
    }
}

fn client_error(err: rumqttc::ClientError) -> TransportError {
    TransportError::Io(err.to_string())
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Io(format!("broker refused: {:?}", ack.code)));
                    }
                    self.connected = true;
                    info!(session_present = ack.session_present, "mqtt connected");
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => self.backlog.push_back(to_message(&publish)),
                Ok(_) => {}
                Err(err) => return Err(self.lost(err)),
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(client_error)?;
        self.topics.insert(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(client_error)
    }

    async fn next_message(&mut self) -> Result<Option<MqttMessage>, TransportError> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(Some(message));
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "mqtt message");
                    return Ok(Some(to_message(&publish)));
                }
                // The event loop reconnects by itself; a fresh session needs the topics again.
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt reconnected");
                    self.connected = true;
                    self.resubscribe().await;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("broker closed the session");
                    self.connected = false;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(err) => return Err(self.lost(err)),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

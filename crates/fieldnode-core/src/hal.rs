use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    #[error("adc channel {0} not configured")]
    ChannelUnavailable(u8),
    #[error("adc read timeout")]
    Timeout,
    #[error("adc error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("association rejected: {0}")]
    Rejected(String),
    #[error("association timeout")]
    Timeout,
    #[error("radio error: {0}")]
    Radio(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("timeout")]
    Timeout,
    #[error("transport error: {0}")]
    Io(String),
    #[error("invalid payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("type mismatch for {namespace}/{key}")]
    TypeMismatch { namespace: String, key: String },
    #[error("storage io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("status indicator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AnalogFrontend: Send + Sync {
    async fn read_raw(&self, channel: u8) -> Result<u16, HardwareError>;
    fn to_millivolts(&self, raw: u16) -> f32;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub pass: String,
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn connect(&self, credentials: &WifiCredentials) -> Result<(), NetworkError>;
    fn is_connected(&self) -> bool;
    fn local_address(&self) -> Option<IpAddr>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MqttTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
    /// Next inbound message. `Ok(None)` means the session ended and the
    /// caller should reconnect.
    async fn next_message(&mut self) -> Result<Option<MqttMessage>, TransportError>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl KvValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KvValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KvValue::Float(v) => Some(*v),
            KvValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KvValue::Bool(v) => Some(*v),
            KvValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Namespaced key-value store. Writes become durable on `commit`.
pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<KvValue>, StorageError>;
    fn set(&self, namespace: &str, key: &str, value: KvValue) -> Result<(), StorageError>;
    fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError>;
    fn commit(&self) -> Result<(), StorageError>;
}

pub type Namespaces = BTreeMap<String, BTreeMap<String, KvValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn scaled(self, brightness: u8) -> Rgb {
        let scale = |c: u8| ((u16::from(c) * u16::from(brightness)) / 255) as u8;
        Rgb(scale(self.0), scale(self.1), scale(self.2))
    }
}

pub trait StatusSink: Send {
    fn show(&mut self, color: Rgb) -> Result<(), IndicatorError>;
}

pub trait ResourceProbe: Send + Sync {
    fn free_heap(&self) -> Option<u64>;
    fn free_stack(&self) -> Option<u32>;
}

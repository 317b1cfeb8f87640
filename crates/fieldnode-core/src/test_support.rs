use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::NodeConfig;
use crate::connectivity::Link;
use crate::context::{Collaborators, NodeContext, NodeParts};
use crate::hal::{
    AnalogFrontend, HardwareError, HttpResponse, HttpTransport, IndicatorError, MqttMessage, MqttTransport,
    Network, NetworkError, ResourceProbe, Rgb, StatusSink, TransportError, WifiCredentials,
};
use crate::sensor::SensorKind;
use crate::storage::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Get(String),
    Post(String, Value),
}

#[derive(Clone)]
pub struct ScriptedHttp {
    requests: Arc<Mutex<Vec<Request>>>,
    script: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    default_status: u16,
    default_body: Arc<Mutex<String>>,
}

impl ScriptedHttp {
    pub fn ok() -> Self {
        Self::with_default(200)
    }

    pub fn with_default(status: u16) -> Self {
        Self {
            requests: Arc::default(),
            script: Arc::default(),
            default_status: status,
            default_body: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.script.lock().expect("script lock").push_back(response);
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn set_default_body(&self, body: &str) {
        *self.default_body.lock().expect("body lock") = body.to_string();
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Post(url, body) => Some((url, body)),
                Request::Get(_) => None,
            })
            .collect()
    }

    fn answer(&self) -> Result<HttpResponse, TransportError> {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(HttpResponse {
                    status: self.default_status,
                    body: self.default_body.lock().expect("body lock").clone(),
                })
            })
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().expect("requests lock").push(Request::Get(url.to_string()));
        self.answer()
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(Request::Post(url.to_string(), body.clone()));
        self.answer()
    }
}

#[derive(Clone, Default)]
pub struct FakeAdc {
    values: Arc<Mutex<BTreeMap<u8, u16>>>,
    failures_left: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
}

impl FakeAdc {
    pub fn with(channel: u8, raw: u16) -> Self {
        let adc = Self::default();
        adc.set(channel, raw);
        adc
    }

    pub fn set(&self, channel: u8, raw: u16) {
        self.values.lock().expect("values lock").insert(channel, raw);
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalogFrontend for FakeAdc {
    async fn read_raw(&self, channel: u8) -> Result<u16, HardwareError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HardwareError::Timeout);
        }
        self.values
            .lock()
            .expect("values lock")
            .get(&channel)
            .copied()
            .ok_or(HardwareError::ChannelUnavailable(channel))
    }

    fn to_millivolts(&self, raw: u16) -> f32 {
        f32::from(raw) * 3300.0 / 4095.0
    }
}

#[derive(Clone, Default)]
pub struct FakeNetwork {
    pub accept: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    last_credentials: Arc<Mutex<Option<WifiCredentials>>>,
}

impl FakeNetwork {
    pub fn accepting() -> Self {
        let network = Self::default();
        network.accept.store(true, Ordering::SeqCst);
        network
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn last_credentials(&self) -> Option<WifiCredentials> {
        self.last_credentials.lock().expect("credentials lock").clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn connect(&self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_credentials.lock().expect("credentials lock") = Some(credentials.clone());
        if self.accept.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(NetworkError::Rejected("no ap".to_string()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.is_connected().then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 20)))
    }
}

pub struct FakeMqtt {
    inbound: tokio::sync::mpsc::UnboundedReceiver<MqttMessage>,
    published: Arc<Mutex<Vec<MqttMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connected: bool,
}

#[derive(Clone)]
pub struct BrokerSide {
    pub inject: tokio::sync::mpsc::UnboundedSender<MqttMessage>,
    pub published: Arc<Mutex<Vec<MqttMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
}

impl BrokerSide {
    pub fn send(&self, topic: &str, payload: &str) {
        self.inject
            .send(MqttMessage {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            })
            .expect("client alive");
    }
}

pub fn fake_mqtt() -> (FakeMqtt, BrokerSide) {
    let (inject, inbound) = tokio::sync::mpsc::unbounded_channel();
    let published = Arc::new(Mutex::new(Vec::new()));
    let subscriptions = Arc::new(Mutex::new(Vec::new()));
    (
        FakeMqtt {
            inbound,
            published: published.clone(),
            subscriptions: subscriptions.clone(),
            connected: false,
        },
        BrokerSide {
            inject,
            published,
            subscriptions,
        },
    )
}

#[async_trait]
impl MqttTransport for FakeMqtt {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().expect("subs lock").push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.published.lock().expect("published lock").push(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<MqttMessage>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub struct NullSink;

impl StatusSink for NullSink {
    fn show(&mut self, _color: Rgb) -> Result<(), IndicatorError> {
        Ok(())
    }
}

pub struct StaticProbe(pub u64);

impl ResourceProbe for StaticProbe {
    fn free_heap(&self) -> Option<u64> {
        Some(self.0)
    }

    fn free_stack(&self) -> Option<u32> {
        Some(4096)
    }
}

#[derive(Clone)]
pub struct Rig {
    pub http: ScriptedHttp,
    pub adc: FakeAdc,
    pub network: FakeNetwork,
    pub store: Arc<MemoryStore>,
    pub free_heap: u64,
}

impl Rig {
    pub fn new() -> Self {
        let adc = FakeAdc::with(SensorKind::Humidity.channel(), 2000);
        adc.set(SensorKind::Light.channel(), 200);
        Self {
            http: ScriptedHttp::ok(),
            adc,
            network: FakeNetwork::accepting(),
            store: Arc::new(MemoryStore::new()),
            free_heap: 200_000,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            adc: Arc::new(self.adc.clone()),
            network: Arc::new(self.network.clone()),
            http: Arc::new(self.http.clone()),
            mqtt: None,
            store: self.store.clone(),
            status_sink: Some(Box::new(NullSink)),
            probe: Arc::new(StaticProbe(self.free_heap)),
        }
    }

    pub fn build(&self, config: NodeConfig) -> (Arc<NodeContext>, NodeParts) {
        NodeContext::build(config, self.collaborators())
    }
}

pub fn fast_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.backend.data_url = "http://backend.test/api/v1/process-data".to_string();
    config.backend.config_url = "http://backend.test/api/v1/sensors/serial/".to_string();
    config.backend.error_log_url = "http://backend.test/api/v1/error-logs".to_string();
    config.backend.timeout_ms = 1_000;
    config.timing.sample_period_secs = 1;
    config.timing.default_interval_secs = 1;
    config.timing.backoff_stages_secs = vec![5, 10, 30];
    config.wifi.attempt_timeout_secs = 1;
    config.wifi.retry_delay_ms = 100;
    config.wifi.cooldown_secs = 3;
    config.wifi.poll_secs = 1;
    config
}

pub fn go_online(ctx: &NodeContext) {
    ctx.connectivity.set(Link {
        connected: true,
        address: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 20))),
    });
}

use std::f32::consts::PI;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fieldnode_core::{
    AnalogFrontend, HardwareError, IndicatorError, Network, NetworkError, ResourceProbe, Rgb, SensorKind,
    StatusSink, WifiCredentials,
};
use sysinfo::System;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

const ADC_FULL_SCALE: f32 = 4095.0;
const ADC_REFERENCE_MV: f32 = 3300.0;

pub struct SimulatedAdc {
    started: Instant,
    reads: AtomicU64,
    fail_every: u64,
}

impl SimulatedAdc {
    pub fn new(fail_every: u64) -> Self {
        Self {
            started: Instant::now(),
            reads: AtomicU64::new(0),
            fail_every,
        }
    }

    pub(crate) fn sample_at(channel: u8, elapsed: Duration) -> Option<u16> {
        let (centre, swing, period_s) = if channel == SensorKind::Humidity.channel() {
            (2000.0, 600.0, 900.0)
        } else if channel == SensorKind::Light.channel() {
            (2000.0, 1700.0, 3600.0)
        } else {
            return None;
        };
        let phase = 2.0 * PI * elapsed.as_secs_f32() / period_s;
        let raw = (centre + swing * phase.sin()).clamp(0.0, ADC_FULL_SCALE);
        Some(raw.round() as u16)
    }
}

#[async_trait]
impl AnalogFrontend for SimulatedAdc {
    async fn read_raw(&self, channel: u8) -> Result<u16, HardwareError> {
        let count = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && count % self.fail_every == 0 {
            debug!(channel, count, "simulated adc timeout");
            return Err(HardwareError::Timeout);
        }
        Self::sample_at(channel, self.started.elapsed()).ok_or(HardwareError::ChannelUnavailable(channel))
    }

    fn to_millivolts(&self, raw: u16) -> f32 {
        f32::from(raw) * ADC_REFERENCE_MV / ADC_FULL_SCALE
    }
}

#[derive(Default)]
pub struct SimulatedNetwork {
    connected: AtomicBool,
}

#[async_trait]
impl Network for SimulatedNetwork {
    async fn connect(&self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        sleep(Duration::from_millis(200)).await;
        if credentials.ssid.is_empty() {
            return Err(NetworkError::Rejected("empty ssid".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(ssid = %credentials.ssid, "simulated association");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.is_connected().then_some(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[derive(Default)]
pub struct LogSink {
    last: Option<Rgb>,
}

impl StatusSink for LogSink {
    fn show(&mut self, color: Rgb) -> Result<(), IndicatorError> {
        if self.last != Some(color) {
            trace!(r = color.0, g = color.1, b = color.2, "status led");
            self.last = Some(color);
        }
        Ok(())
    }
}

pub struct ProcessProbe {
    system: Mutex<System>,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ResourceProbe for ProcessProbe {
    fn free_heap(&self) -> Option<u64> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();
        Some(system.available_memory())
    }

    fn free_stack(&self) -> Option<u32> {
        None
    }
}

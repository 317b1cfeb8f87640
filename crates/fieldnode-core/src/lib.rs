pub mod backoff;
pub mod config;
pub mod config_sync;
pub mod connectivity;
pub mod context;
pub mod dedup;
pub mod error_event;
pub mod hal;
pub mod node;
pub mod queue;
pub mod reporter;
pub mod sensor;
pub mod sensor_config;
pub mod startup;
pub mod status;
pub mod storage;
pub mod supervisor;
pub mod worker;
pub mod workers;

#[cfg(test)]
mod dedup_tests;
#[cfg(test)]
mod startup_tests;
#[cfg(test)]
mod test_support;

pub use config::{ConfigError, NodeConfig};
pub use context::{Collaborators, NodeContext};
pub use error_event::{ErrorEvent, ErrorSource, Severity};
pub use hal::{
    AnalogFrontend, HardwareError, HttpResponse, HttpTransport, IndicatorError, KvStore, KvValue, MqttMessage,
    MqttTransport, Network, NetworkError, ResourceProbe, Rgb, StatusSink, StorageError, TransportError,
    WifiCredentials,
};
pub use node::{NodeRuntime, EXIT_RESTART};
pub use sensor::{SensorKind, SensorReading};
pub use startup::{StartupError, StartupReport};
pub use storage::MemoryStore;

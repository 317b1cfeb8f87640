use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    Sensor(Option<i32>),
    Controller(Option<i32>),
    Actuator(Option<i32>),
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Sensor,
    Controller,
    Actuator,
    System,
}

impl ErrorSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ErrorSource::Sensor(_) => SourceKind::Sensor,
            ErrorSource::Controller(_) => SourceKind::Controller,
            ErrorSource::Actuator(_) => SourceKind::Actuator,
            ErrorSource::System => SourceKind::System,
        }
    }

    pub fn id(&self) -> Option<i32> {
        match self {
            ErrorSource::Sensor(id) | ErrorSource::Controller(id) | ErrorSource::Actuator(id) => *id,
            ErrorSource::System => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorSource::Sensor(_) => "sensor",
            ErrorSource::Controller(_) => "controller",
            ErrorSource::Actuator(_) => "actuator",
            ErrorSource::System => "system",
        }
    }

    fn id_field(&self) -> Option<&'static str> {
        match self {
            ErrorSource::Sensor(_) => Some("id_sensor"),
            ErrorSource::Controller(_) => Some("id_controller_station"),
            ErrorSource::Actuator(_) => Some("id_actuator"),
            ErrorSource::System => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub error_code: String,
    pub severity: Severity,
    pub message: String,
    pub details: Value,
    pub origin_address: String,
    pub device_serial: String,
    pub created_at: DateTime<Utc>,
    pub sent: bool,
}

impl ErrorEvent {
    pub fn new(
        source: ErrorSource,
        error_code: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            error_code: error_code.into(),
            severity,
            message: message.into(),
            details: Value::Object(Map::new()),
            origin_address: String::new(),
            device_serial: String::new(),
            created_at: Utc::now(),
            sent: false,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_origin(mut self, address: impl Into<String>, serial: impl Into<String>) -> Self {
        self.origin_address = address.into();
        self.device_serial = serial.into();
        self
    }

    pub fn system_for_sensors(
        sensor_ids: &[i32],
        error_code: &str,
        severity: Severity,
        message: &str,
        details: Value,
    ) -> Vec<ErrorEvent> {
        sensor_ids
            .iter()
            .map(|id| {
                ErrorEvent::new(ErrorSource::Sensor(Some(*id)), error_code, severity, message)
                    .with_details(details.clone())
            })
            .collect()
    }

    pub fn to_payload(&self, occurrence_count: u32) -> Value {
        let mut details = match &self.details {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        if occurrence_count > 1 {
            details.insert("occurrence_count".to_string(), json!(occurrence_count));
        }

        let mut body = Map::new();
        body.insert("source_type".to_string(), json!(self.source.type_name()));
        if let (Some(field), Some(id)) = (self.source.id_field(), self.source.id()) {
            body.insert(field.to_string(), json!(id));
        }
        body.insert("error_code".to_string(), json!(self.error_code));
        body.insert("severity".to_string(), json!(self.severity.as_str()));
        body.insert("message".to_string(), json!(self.message));
        body.insert("details".to_string(), Value::Object(details));
        body.insert("ip_address".to_string(), json!(self.origin_address));
        body.insert("device_serial".to_string(), json!(self.device_serial));
        Value::Object(body)
    }
}

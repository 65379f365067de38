use crate::domain::error::StreamError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A peripheral seen during a scan session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub identifier: String,
    pub display_name: Option<String>,
    pub is_synthetic: bool,
}

impl DiscoveredDevice {
    pub const SYNTHETIC_ID: &'static str = "simulated-accelerometer";

    pub fn new(identifier: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.filter(|name| !name.is_empty()),
            is_synthetic: false,
        }
    }

    /// The stand-in device offered when a scan window finds nothing.
    pub fn synthetic() -> Self {
        Self {
            identifier: Self::SYNTHETIC_ID.to_string(),
            display_name: Some("Simulated Accelerometer".to_string()),
            is_synthetic: true,
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown")
    }
}

/// One accelerometer reading, roughly in units of g.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    pub const ZERO: AccelSample = AccelSample {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// GATT capabilities advertised by a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProperties {
    pub notify: bool,
    pub indicate: bool,
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl CharProperties {
    pub fn can_subscribe(&self) -> bool {
        self.notify || self.indicate
    }

    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// Snapshot of one characteristic taken at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub properties: CharProperties,
}

impl CharacteristicDescriptor {
    pub fn new(service_id: Uuid, characteristic_id: Uuid, properties: CharProperties) -> Self {
        Self {
            service_id,
            characteristic_id,
            properties,
        }
    }
}

/// A ranked characteristic worth trying to stream from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCandidate {
    pub descriptor: CharacteristicDescriptor,
    pub score: i32,
    pub sibling_writers: Vec<CharacteristicDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: usize },
    Disconnecting,
}

/// Events flowing from the BLE thread to the shell.
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceFound(DiscoveredDevice),
    ScanFinished,
    ConnectionStatus(ConnectionStatus),
    StreamingChanged(bool),
    Sample(AccelSample),
    SessionCleared,
    Error(StreamError),
    LogMessage(StatusMessage),
}

/// Requests from the shell to the BLE thread.
#[derive(Debug, Clone)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(DiscoveredDevice),
    Disconnect,
    StartStreaming,
    StopStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Home,
    Settings,
    Debug,
}

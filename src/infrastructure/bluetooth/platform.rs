//! BLE Platform Capability
//!
//! The engine never talks to a radio directly. Everything it needs from the
//! host Bluetooth stack goes through [`BlePlatform`], which the WinRT
//! backend implements on Windows and a scripted fake implements in tests.

use crate::domain::error::StreamError;
use crate::domain::models::CharacteristicDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bluetooth is powered off: {0}")]
    PoweredOff(String),

    #[error("no bluetooth LE backend: {0}")]
    Unsupported(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("not connected")]
    NotConnected,

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("operation timed out")]
    Timeout,
}

impl From<PlatformError> for StreamError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::PermissionDenied(msg) => StreamError::PermissionDenied(msg),
            PlatformError::PoweredOff(msg) | PlatformError::Unsupported(msg) => {
                StreamError::RadioUnavailable(msg)
            }
            PlatformError::NotConnected => StreamError::NotConnected,
            other => StreamError::Platform(other.to_string()),
        }
    }
}

/// Identity of one live link. Never reused by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    id: HandleId,
    device_id: String,
}

impl ConnectionHandle {
    pub fn new(id: HandleId, device_id: impl Into<String>) -> Self {
        Self {
            id,
            device_id: device_id.into(),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// One advertisement report. Backends may repeat identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub identifier: String,
    pub local_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

pub type NotificationCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;
pub type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// A live notify/indicate subscription. Released on drop.
pub struct Subscription {
    characteristic: Uuid,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(characteristic: Uuid, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            characteristic,
            release: Some(Box::new(release)),
        }
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!("Releasing subscription on {}", self.characteristic);
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("characteristic", &self.characteristic)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Host Bluetooth LE central operations.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Begin continuous discovery. Duplicate reports are not filtered.
    async fn start_scan(
        &self,
        service_filter: Option<Uuid>,
    ) -> Result<mpsc::UnboundedReceiver<Advertisement>, PlatformError>;

    async fn stop_scan(&self) -> Result<(), PlatformError>;

    async fn connect(
        &self,
        device_id: &str,
        options: &ConnectOptions,
    ) -> Result<ConnectionHandle, PlatformError>;

    async fn cancel_connection(&self, handle: &ConnectionHandle) -> Result<(), PlatformError>;

    /// Invoke `callback` once when the link behind `handle` drops.
    fn on_unexpected_disconnect(
        &self,
        handle: &ConnectionHandle,
        callback: DisconnectCallback,
    ) -> Result<(), PlatformError>;

    /// Ask for a larger transfer unit; returns the negotiated size.
    async fn request_mtu(&self, handle: &ConnectionHandle, mtu: u16) -> Result<u16, PlatformError>;

    async fn request_high_priority(&self, handle: &ConnectionHandle) -> Result<(), PlatformError>;

    /// Enumerate every service and characteristic, bypassing caches.
    async fn discover_services_and_characteristics(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<Vec<CharacteristicDescriptor>, PlatformError>;

    async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        callback: NotificationCallback,
    ) -> Result<Subscription, PlatformError>;

    async fn write(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let sub = Subscription::new(Uuid::nil(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let counter = released.clone();
        {
            let _sub = Subscription::new(Uuid::nil(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_platform_error_mapping() {
        assert_eq!(
            StreamError::from(PlatformError::PoweredOff("radio off".into())),
            StreamError::RadioUnavailable("radio off".into())
        );
        assert_eq!(
            StreamError::from(PlatformError::PermissionDenied("consent".into())),
            StreamError::PermissionDenied("consent".into())
        );
        assert!(matches!(
            StreamError::from(PlatformError::Timeout),
            StreamError::Platform(_)
        ));
    }
}

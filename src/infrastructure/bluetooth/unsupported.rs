//! Backend for targets without a Bluetooth LE implementation.

use crate::domain::models::CharacteristicDescriptor;
use crate::infrastructure::bluetooth::platform::{
    Advertisement, BlePlatform, ConnectOptions, ConnectionHandle, DisconnectCallback,
    NotificationCallback, PlatformError, Subscription,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct UnsupportedPlatform;

impl UnsupportedPlatform {
    fn error() -> PlatformError {
        PlatformError::Unsupported(format!(
            "{} has no bluetooth LE backend; use the simulated device",
            std::env::consts::OS
        ))
    }
}

#[async_trait]
impl BlePlatform for UnsupportedPlatform {
    async fn start_scan(
        &self,
        _service_filter: Option<Uuid>,
    ) -> Result<mpsc::UnboundedReceiver<Advertisement>, PlatformError> {
        Err(Self::error())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn connect(
        &self,
        _device_id: &str,
        _options: &ConnectOptions,
    ) -> Result<ConnectionHandle, PlatformError> {
        Err(Self::error())
    }

    async fn cancel_connection(&self, _handle: &ConnectionHandle) -> Result<(), PlatformError> {
        Ok(())
    }

    fn on_unexpected_disconnect(
        &self,
        _handle: &ConnectionHandle,
        _callback: DisconnectCallback,
    ) -> Result<(), PlatformError> {
        Err(Self::error())
    }

    async fn request_mtu(&self, _handle: &ConnectionHandle, _mtu: u16) -> Result<u16, PlatformError> {
        Err(Self::error())
    }

    async fn request_high_priority(&self, _handle: &ConnectionHandle) -> Result<(), PlatformError> {
        Err(Self::error())
    }

    async fn discover_services_and_characteristics(
        &self,
        _handle: &ConnectionHandle,
    ) -> Result<Vec<CharacteristicDescriptor>, PlatformError> {
        Err(Self::error())
    }

    async fn subscribe(
        &self,
        _handle: &ConnectionHandle,
        _service: Uuid,
        _characteristic: Uuid,
        _callback: NotificationCallback,
    ) -> Result<Subscription, PlatformError> {
        Err(Self::error())
    }

    async fn write(
        &self,
        _handle: &ConnectionHandle,
        _service: Uuid,
        _characteristic: Uuid,
        _bytes: &[u8],
        _with_response: bool,
    ) -> Result<(), PlatformError> {
        Err(Self::error())
    }
}

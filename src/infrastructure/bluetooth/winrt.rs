//! WinRT Bluetooth LE backend.
//!
//! Devices are identified by their 48-bit address printed as 12 hex digits.
//! GATT objects are cached per link at discovery time so subscriptions and
//! writes can address characteristics by UUID.

use crate::domain::models::{CharProperties, CharacteristicDescriptor};
use crate::infrastructure::bluetooth::platform::{
    Advertisement, BlePlatform, ConnectOptions, ConnectionHandle, DisconnectCallback, HandleId,
    NotificationCallback, PlatformError, Subscription,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{GUID, HRESULT};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStatus, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
    BluetoothLEPreferredConnectionParameters,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

const E_ACCESSDENIED: HRESULT = HRESULT(0x8007_0005_u32 as i32);

impl From<windows::core::Error> for PlatformError {
    fn from(e: windows::core::Error) -> Self {
        if e.code() == E_ACCESSDENIED {
            PlatformError::PermissionDenied(e.to_string())
        } else {
            PlatformError::Gatt(e.to_string())
        }
    }
}

fn format_address(address: u64) -> String {
    format!("{:012X}", address)
}

fn parse_address(identifier: &str) -> Result<u64, PlatformError> {
    u64::from_str_radix(identifier, 16)
        .map_err(|_| PlatformError::DeviceNotFound(identifier.to_string()))
}

fn to_guid(id: Uuid) -> GUID {
    GUID::from_u128(id.as_u128())
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn check(status: GattCommunicationStatus, what: &str) -> Result<(), PlatformError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else if status == GattCommunicationStatus::AccessDenied {
        Err(PlatformError::PermissionDenied(what.to_string()))
    } else if status == GattCommunicationStatus::Unreachable {
        Err(PlatformError::NotConnected)
    } else {
        Err(PlatformError::Gatt(format!("{}: {:?}", what, status)))
    }
}

struct LinkEntry {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    status_token: Option<i64>,
    characteristics: HashMap<(Uuid, Uuid), GattCharacteristic>,
}

#[derive(Default)]
struct Inner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    links: HashMap<HandleId, LinkEntry>,
    next_handle: u64,
}

#[derive(Default)]
pub struct WinRtPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl WinRtPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_link<T>(
        &self,
        handle: &ConnectionHandle,
        f: impl FnOnce(&mut LinkEntry) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PlatformError::Gatt("state lock poisoned".to_string()))?;
        let entry = inner
            .links
            .get_mut(&handle.id())
            .ok_or(PlatformError::NotConnected)?;
        f(entry)
    }

    fn characteristic(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, PlatformError> {
        self.with_link(handle, |entry| {
            entry
                .characteristics
                .get(&(service, characteristic))
                .cloned()
                .ok_or_else(|| PlatformError::Gatt(format!("unknown characteristic {}", characteristic)))
        })
    }
}

#[async_trait]
impl BlePlatform for WinRtPlatform {
    async fn start_scan(
        &self,
        service_filter: Option<Uuid>,
    ) -> Result<mpsc::UnboundedReceiver<Advertisement>, PlatformError> {
        self.stop_scan().await?;

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;
        if let Some(uuid) = service_filter {
            watcher
                .AdvertisementFilter()?
                .Advertisement()?
                .ServiceUuids()?
                .Append(to_guid(uuid))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let local_name = args
                        .Advertisement()
                        .and_then(|adv| adv.LocalName())
                        .map(|name| name.to_string())
                        .ok()
                        .filter(|name| !name.is_empty());
                    let _ = tx.send(Advertisement {
                        identifier: format_address(args.BluetoothAddress()?),
                        local_name,
                    });
                }
                Ok(())
            },
        );
        watcher.Received(&handler)?;
        watcher.Start()?;

        if watcher.Status()? == BluetoothLEAdvertisementWatcherStatus::Aborted {
            return Err(PlatformError::PoweredOff(
                "advertisement watcher aborted".to_string(),
            ));
        }

        info!("Advertisement watcher started");
        if let Ok(mut inner) = self.inner.lock() {
            inner.watcher = Some(watcher);
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        let watcher = self.inner.lock().ok().and_then(|mut inner| inner.watcher.take());
        if let Some(watcher) = watcher {
            debug!("Stopping advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        options: &ConnectOptions,
    ) -> Result<ConnectionHandle, PlatformError> {
        let address = parse_address(device_id)?;
        info!("Connecting to Bluetooth device: {}", device_id);

        let open = async {
            let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?
                .await
                .map_err(|_| PlatformError::DeviceNotFound(device_id.to_string()))?;

            let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
                Ok(session) => {
                    session.SetMaintainConnection(true)?;
                    Some(session)
                }
                Err(e) => {
                    warn!("GattSession unavailable: {}", e);
                    None
                }
            };

            // WinRT links come up lazily on the first GATT access.
            let services = device
                .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                .await?;
            check(services.Status()?, "service enumeration")?;
            Ok::<_, PlatformError>((device, session))
        };

        let (device, session) = tokio::time::timeout(options.timeout, open)
            .await
            .map_err(|_| PlatformError::Timeout)??;

        if device.ConnectionStatus()? != BluetoothConnectionStatus::Connected {
            return Err(PlatformError::NotConnected);
        }

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PlatformError::Gatt("state lock poisoned".to_string()))?;
        inner.next_handle += 1;
        let id = HandleId(inner.next_handle);
        inner.links.insert(
            id,
            LinkEntry {
                device,
                session,
                status_token: None,
                characteristics: HashMap::new(),
            },
        );
        Ok(ConnectionHandle::new(id, device_id))
    }

    async fn cancel_connection(&self, handle: &ConnectionHandle) -> Result<(), PlatformError> {
        let entry = self
            .inner
            .lock()
            .ok()
            .and_then(|mut inner| inner.links.remove(&handle.id()));
        let Some(entry) = entry else {
            return Ok(());
        };
        if let Some(token) = entry.status_token {
            let _ = entry.device.RemoveConnectionStatusChanged(token);
        }
        if let Some(session) = entry.session {
            let _ = session.Close();
        }
        entry.device.Close()?;
        info!("Closed link {}", handle.id());
        Ok(())
    }

    fn on_unexpected_disconnect(
        &self,
        handle: &ConnectionHandle,
        callback: DisconnectCallback,
    ) -> Result<(), PlatformError> {
        let pending = Mutex::new(Some(callback));
        let handler = TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    if let Some(callback) = pending.lock().ok().and_then(|mut p| p.take()) {
                        callback();
                    }
                }
            }
            Ok(())
        });
        self.with_link(handle, |entry| {
            entry.status_token = Some(entry.device.ConnectionStatusChanged(&handler)?);
            Ok(())
        })
    }

    async fn request_mtu(&self, handle: &ConnectionHandle, _mtu: u16) -> Result<u16, PlatformError> {
        // Windows negotiates the MTU itself; report what it settled on.
        let session = self.with_link(handle, |entry| Ok(entry.session.clone()))?;
        match session {
            Some(session) => Ok(session.MaxPduSize()?),
            None => Err(PlatformError::Gatt("no GATT session".to_string())),
        }
    }

    async fn request_high_priority(&self, handle: &ConnectionHandle) -> Result<(), PlatformError> {
        let device = self.with_link(handle, |entry| Ok(entry.device.clone()))?;
        let parameters = BluetoothLEPreferredConnectionParameters::ThroughputOptimized()?;
        let _request = device.RequestPreferredConnectionParameters(&parameters)?;
        Ok(())
    }

    async fn discover_services_and_characteristics(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<Vec<CharacteristicDescriptor>, PlatformError> {
        let device = self.with_link(handle, |entry| Ok(entry.device.clone()))?;

        let services_result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check(services_result.Status()?, "service enumeration")?;
        let services = services_result.Services()?;

        let mut descriptors = Vec::new();
        let mut found = HashMap::new();
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let service_id = to_uuid(service.Uuid()?);

            let chars_result = match service
                .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    debug!("Skipping service {}: {}", service_id, e);
                    continue;
                }
            };
            if let Err(e) = check(chars_result.Status()?, "characteristic enumeration") {
                debug!("Skipping service {}: {}", service_id, e);
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            for j in 0..characteristics.Size()? {
                let c = characteristics.GetAt(j)?;
                let characteristic_id = to_uuid(c.Uuid()?);
                let props = c.CharacteristicProperties()?;
                let properties = CharProperties {
                    notify: props.contains(GattCharacteristicProperties::Notify),
                    indicate: props.contains(GattCharacteristicProperties::Indicate),
                    read: props.contains(GattCharacteristicProperties::Read),
                    write: props.contains(GattCharacteristicProperties::Write),
                    write_without_response: props
                        .contains(GattCharacteristicProperties::WriteWithoutResponse),
                };
                descriptors.push(CharacteristicDescriptor::new(
                    service_id,
                    characteristic_id,
                    properties,
                ));
                found.insert((service_id, characteristic_id), c);
            }
        }

        info!(
            "Found {} characteristics in {} services",
            descriptors.len(),
            services.Size()?
        );
        self.with_link(handle, |entry| {
            entry.characteristics = found;
            Ok(())
        })?;
        Ok(descriptors)
    }

    async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        callback: NotificationCallback,
    ) -> Result<Subscription, PlatformError> {
        let c = self.characteristic(handle, service, characteristic)?;
        let props = c.CharacteristicProperties()?;
        let mode = if props.contains(GattCharacteristicProperties::Notify) {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::Indicate
        };

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let reader = DataReader::FromBuffer(&args.CharacteristicValue()?)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    callback(bytes);
                }
                Ok(())
            },
        );
        let token = c.ValueChanged(&handler)?;

        let status = c
            .WriteClientCharacteristicConfigurationDescriptorAsync(mode)?
            .await?;
        if let Err(e) = check(status, "enable notifications") {
            let _ = c.RemoveValueChanged(token);
            return Err(e);
        }

        Ok(Subscription::new(characteristic, move || {
            let _ = c.RemoveValueChanged(token);
            let _ = c.WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            );
        }))
    }

    async fn write(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), PlatformError> {
        let c = self.characteristic(handle, service, characteristic)?;
        let writer = DataWriter::new()?;
        writer.WriteBytes(bytes)?;
        let buffer = writer.DetachBuffer()?;
        let option = if with_response {
            GattWriteOption::WriteWithResponse
        } else {
            GattWriteOption::WriteWithoutResponse
        };
        let status = c.WriteValueWithOptionAsync(&buffer, option)?.await?;
        check(status, "write")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        assert_eq!(format_address(0xC0FF_EE00_0001), "C0FFEE000001");
        assert_eq!(parse_address("c0ffee000001").unwrap(), 0xC0FF_EE00_0001);
        assert!(parse_address("not-an-address").is_err());
    }

    #[test]
    fn test_guid_conversion() {
        let id = Uuid::parse_str("6e400003-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(to_uuid(to_guid(id)), id);
    }
}

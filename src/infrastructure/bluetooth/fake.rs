//! Scripted in-memory platform for tests.

use crate::domain::models::{CharProperties, CharacteristicDescriptor};
use crate::infrastructure::bluetooth::platform::{
    Advertisement, BlePlatform, ConnectOptions, ConnectionHandle, DisconnectCallback, HandleId,
    NotificationCallback, PlatformError, Subscription,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

struct ArmRule {
    writer: Uuid,
    opcode: u8,
    target: Uuid,
    payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    adverts: Vec<Advertisement>,
    scan_error: Option<PlatformError>,
    scan_sender: Option<mpsc::UnboundedSender<Advertisement>>,
    scan_starts: usize,

    tables: HashMap<String, Vec<CharacteristicDescriptor>>,
    connect_failures: VecDeque<PlatformError>,
    fail_every_connect: Option<PlatformError>,
    connects: usize,
    next_handle: u64,
    links: HashMap<HandleId, Option<DisconnectCallback>>,
    cancelled: Vec<HandleId>,

    next_subscription: u64,
    subscribers: HashMap<Uuid, Vec<(u64, Arc<NotificationCallback>)>>,
    live_subscriptions: usize,
    max_live_subscriptions: usize,
    on_subscribe: HashMap<Uuid, Vec<u8>>,
    arm_rules: Vec<ArmRule>,
    rejected_writers: Vec<Uuid>,
    writes: Vec<(Uuid, Vec<u8>)>,
}

#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<State>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_advert(&self, identifier: &str, local_name: Option<&str>) {
        self.state().adverts.push(Advertisement {
            identifier: identifier.to_string(),
            local_name: local_name.map(str::to_string),
        });
    }

    pub fn fail_scan(&self, error: PlatformError) {
        self.state().scan_error = Some(error);
    }

    pub fn add_characteristic(
        &self,
        device: &str,
        service: Uuid,
        characteristic: Uuid,
        properties: CharProperties,
    ) {
        self.state()
            .tables
            .entry(device.to_string())
            .or_default()
            .push(CharacteristicDescriptor::new(service, characteristic, properties));
    }

    pub fn fail_next_connect(&self, error: PlatformError) {
        self.state().connect_failures.push_back(error);
    }

    pub fn fail_every_connect(&self, error: Option<PlatformError>) {
        self.state().fail_every_connect = error;
    }

    /// Deliver `payload` on `target` whenever `opcode` is written to `writer`.
    pub fn arm_on_write(&self, writer: Uuid, opcode: u8, target: Uuid, payload: Vec<u8>) {
        self.state().arm_rules.push(ArmRule {
            writer,
            opcode,
            target,
            payload,
        });
    }

    /// Deliver `payload` as soon as `characteristic` is subscribed.
    pub fn stream_on_subscribe(&self, characteristic: Uuid, payload: Vec<u8>) {
        self.state().on_subscribe.insert(characteristic, payload);
    }

    pub fn reject_writes(&self, writer: Uuid) {
        self.state().rejected_writers.push(writer);
    }

    /// Push a notification to every current subscriber of `characteristic`.
    pub fn notify(&self, characteristic: Uuid, payload: Vec<u8>) {
        let callbacks: Vec<Arc<NotificationCallback>> = self
            .state()
            .subscribers
            .get(&characteristic)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            (**callback)(payload.clone());
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self, id: HandleId) {
        let observer = {
            let mut state = self.state();
            state.subscribers.clear();
            state.links.remove(&id).flatten()
        };
        if let Some(observer) = observer {
            observer();
        }
    }

    /// Fire the disconnect observer but leave the link usable, like a host
    /// that reports the drop before GATT calls start failing.
    pub fn report_link_lost(&self, id: HandleId) {
        let observer = self.state().links.get_mut(&id).and_then(Option::take);
        if let Some(observer) = observer {
            observer();
        }
    }

    pub fn live_links(&self) -> Vec<HandleId> {
        self.state().links.keys().copied().collect()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn cancelled(&self) -> Vec<HandleId> {
        self.state().cancelled.clone()
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scan_sender.is_some()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.state().live_subscriptions
    }

    pub fn max_live_subscriptions(&self) -> usize {
        self.state().max_live_subscriptions
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state().writes.clone()
    }

    fn check_link(state: &State, handle: &ConnectionHandle) -> Result<(), PlatformError> {
        if state.links.contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(PlatformError::NotConnected)
        }
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    async fn start_scan(
        &self,
        _service_filter: Option<Uuid>,
    ) -> Result<mpsc::UnboundedReceiver<Advertisement>, PlatformError> {
        let mut state = self.state();
        if let Some(error) = state.scan_error.clone() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for advert in &state.adverts {
            let _ = tx.send(advert.clone());
        }
        state.scan_sender = Some(tx);
        state.scan_starts += 1;
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        self.state().scan_sender = None;
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        _options: &ConnectOptions,
    ) -> Result<ConnectionHandle, PlatformError> {
        let mut state = self.state();
        state.connects += 1;
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.fail_every_connect.clone() {
            return Err(error);
        }
        state.next_handle += 1;
        let id = HandleId(state.next_handle);
        state.links.insert(id, None);
        Ok(ConnectionHandle::new(id, device_id))
    }

    async fn cancel_connection(&self, handle: &ConnectionHandle) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.links.remove(&handle.id());
        state.cancelled.push(handle.id());
        Ok(())
    }

    fn on_unexpected_disconnect(
        &self,
        handle: &ConnectionHandle,
        callback: DisconnectCallback,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        match state.links.get_mut(&handle.id()) {
            Some(slot) => {
                *slot = Some(callback);
                Ok(())
            }
            None => Err(PlatformError::NotConnected),
        }
    }

    async fn request_mtu(&self, handle: &ConnectionHandle, mtu: u16) -> Result<u16, PlatformError> {
        Self::check_link(&self.state(), handle)?;
        Ok(mtu.min(185))
    }

    async fn request_high_priority(&self, handle: &ConnectionHandle) -> Result<(), PlatformError> {
        Self::check_link(&self.state(), handle)
    }

    async fn discover_services_and_characteristics(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<Vec<CharacteristicDescriptor>, PlatformError> {
        let state = self.state();
        Self::check_link(&state, handle)?;
        Ok(state
            .tables
            .get(handle.device_id())
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        _service: Uuid,
        characteristic: Uuid,
        callback: NotificationCallback,
    ) -> Result<Subscription, PlatformError> {
        let callback = Arc::new(callback);
        let (id, eager) = {
            let mut state = self.state();
            Self::check_link(&state, handle)?;
            state.next_subscription += 1;
            let id = state.next_subscription;
            state
                .subscribers
                .entry(characteristic)
                .or_default()
                .push((id, callback.clone()));
            state.live_subscriptions += 1;
            state.max_live_subscriptions = state.max_live_subscriptions.max(state.live_subscriptions);
            (id, state.on_subscribe.get(&characteristic).cloned())
        };
        if let Some(payload) = eager {
            (**callback)(payload);
        }

        let shared = self.state.clone();
        Ok(Subscription::new(characteristic, move || {
            let mut state = shared.lock().unwrap();
            state.live_subscriptions -= 1;
            if let Some(subs) = state.subscribers.get_mut(&characteristic) {
                subs.retain(|(sub, _)| *sub != id);
            }
        }))
    }

    async fn write(
        &self,
        handle: &ConnectionHandle,
        _service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
        _with_response: bool,
    ) -> Result<(), PlatformError> {
        let deliveries: Vec<(Uuid, Vec<u8>)> = {
            let mut state = self.state();
            Self::check_link(&state, handle)?;
            state.writes.push((characteristic, bytes.to_vec()));
            if state.rejected_writers.contains(&characteristic) {
                return Err(PlatformError::Gatt("write not permitted".to_string()));
            }
            state
                .arm_rules
                .iter()
                .filter(|rule| rule.writer == characteristic && bytes.len() == 1 && bytes[0] == rule.opcode)
                .map(|rule| (rule.target, rule.payload.clone()))
                .collect()
        };
        for (target, payload) in deliveries {
            self.notify(target, payload);
        }
        Ok(())
    }
}

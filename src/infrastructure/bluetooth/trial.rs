//! Subscription Trial Engine
//!
//! Finds the characteristic that actually streams motion data. Each ranked
//! candidate is subscribed in turn, its writable siblings get a burst of
//! common "start streaming" opcodes, and the first non-zero payload within
//! the trial window wins. Only one subscription is ever live.

use crate::domain::decoder;
use crate::domain::error::StreamError;
use crate::domain::models::{CharacteristicDescriptor, SubscriptionCandidate};
use crate::domain::scorer;
use crate::domain::settings::EngineConfig;
use crate::infrastructure::bluetooth::platform::{
    BlePlatform, ConnectionHandle, NotificationCallback, PlatformError,
};
use crate::infrastructure::bluetooth::session::{
    LiveStream, SampleSink, SampleSource, StreamingSession,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub timeout: Duration,
    pub arming_opcodes: Vec<u8>,
    pub arming_gap: Duration,
    pub log_raw_payloads: bool,
}

impl From<&EngineConfig> for TrialConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.trial_timeout,
            arming_opcodes: config.arming_opcodes.clone(),
            arming_gap: config.arming_gap,
            log_raw_payloads: config.log_raw_payloads,
        }
    }
}

pub struct TrialEngine {
    platform: Arc<dyn BlePlatform>,
    handle: ConnectionHandle,
    config: TrialConfig,
    rejected_writer: Option<Uuid>,
}

impl TrialEngine {
    pub fn new(platform: Arc<dyn BlePlatform>, handle: ConnectionHandle, config: TrialConfig) -> Self {
        Self {
            platform,
            handle,
            config,
            rejected_writer: None,
        }
    }

    /// Try one candidate. On `Ok(true)` the subscription stays live in
    /// `session` and the first sample has already reached `sink`. A dead
    /// link is an error; any other subscribe failure just loses the trial.
    pub async fn try_candidate(
        &mut self,
        session: &mut StreamingSession,
        candidate: &SubscriptionCandidate,
        sink: &dyn SampleSink,
    ) -> Result<bool, StreamError> {
        session.release();

        let target = &candidate.descriptor;
        info!(
            "Trying {} in service {} (score {})",
            target.characteristic_id, target.service_id, candidate.score
        );

        let (tx, mut payloads) = mpsc::unbounded_channel();
        let callback: NotificationCallback = Box::new(move |bytes| {
            let _ = tx.send(bytes);
        });
        let subscription = match self
            .platform
            .subscribe(
                &self.handle,
                target.service_id,
                target.characteristic_id,
                callback,
            )
            .await
        {
            Ok(subscription) => subscription,
            Err(PlatformError::NotConnected) => {
                warn!("Link gone while subscribing to {}", target.characteristic_id);
                return Err(StreamError::NotConnected);
            }
            Err(e) => {
                warn!("Subscribe to {} failed: {}", target.characteristic_id, e);
                return Ok(false);
            }
        };

        let arming = arm(
            self.platform.clone(),
            self.handle.clone(),
            candidate.sibling_writers.clone(),
            self.config.arming_opcodes.clone(),
            self.config.arming_gap,
        );
        tokio::pin!(arming);
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut arming_done = false;
        let first = loop {
            tokio::select! {
                rejected = &mut arming, if !arming_done => {
                    arming_done = true;
                    if rejected.is_some() {
                        self.rejected_writer = rejected;
                    }
                }
                payload = payloads.recv() => match payload {
                    Some(bytes) if decoder::is_noise(&bytes) => {
                        trace!("Ignoring all-zero payload on {}", target.characteristic_id);
                    }
                    Some(bytes) => break Some(bytes),
                    None => break None,
                },
                _ = &mut deadline => break None,
            }
        };

        let Some(bytes) = first else {
            info!("No data from {} within {:?}", target.characteristic_id, self.config.timeout);
            subscription.release();
            return Ok(false);
        };

        if self.config.log_raw_payloads {
            trace!("First payload: {:02X?}", bytes);
        }
        sink.on_sample(decoder::decode(&bytes));
        session.activate(LiveStream {
            subscription,
            payloads,
        });
        info!("Streaming from {}", target.characteristic_id);
        Ok(true)
    }

    /// Enumerate, rank and try candidates until one streams.
    pub async fn subscribe_auto(
        &mut self,
        session: &mut StreamingSession,
        sink: &dyn SampleSink,
    ) -> Result<SubscriptionCandidate, StreamError> {
        self.rejected_writer = None;
        let characteristics = self
            .platform
            .discover_services_and_characteristics(&self.handle)
            .await?;
        let candidates = scorer::rank_candidates(&characteristics);
        info!(
            "{} of {} characteristics are candidates",
            candidates.len(),
            characteristics.len()
        );

        for candidate in &candidates {
            match self.try_candidate(session, candidate, sink).await {
                Ok(true) => return Ok(candidate.clone()),
                Ok(false) => {}
                Err(e) => {
                    session.release();
                    return Err(e);
                }
            }
        }

        session.release();
        match self.rejected_writer {
            Some(characteristic) => Err(StreamError::WriteRejected {
                characteristic: characteristic.to_string(),
            }),
            None => Err(StreamError::DiscoveryExhausted),
        }
    }
}

/// Send every opcode to every writer, `gap` apart. Returns a writer that
/// rejected a write, if any. Failures never abort the burst.
async fn arm(
    platform: Arc<dyn BlePlatform>,
    handle: ConnectionHandle,
    writers: Vec<CharacteristicDescriptor>,
    opcodes: Vec<u8>,
    gap: Duration,
) -> Option<Uuid> {
    let mut rejected = None;
    if writers.is_empty() {
        return rejected;
    }

    for (i, opcode) in opcodes.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(gap).await;
        }
        for writer in &writers {
            let with_response = writer.properties.write;
            match platform
                .write(
                    &handle,
                    writer.service_id,
                    writer.characteristic_id,
                    &[*opcode],
                    with_response,
                )
                .await
            {
                Ok(()) => trace!("Wrote {:#04X} to {}", opcode, writer.characteristic_id),
                Err(e) => {
                    debug!(
                        "Write {:#04X} to {} failed: {}",
                        opcode, writer.characteristic_id, e
                    );
                    rejected = Some(writer.characteristic_id);
                }
            }
        }
    }
    rejected
}

/// Streams from a connected peripheral via automatic discovery.
pub struct GattSource {
    platform: Arc<dyn BlePlatform>,
    handle: ConnectionHandle,
    config: TrialConfig,
}

impl GattSource {
    pub fn new(platform: Arc<dyn BlePlatform>, handle: ConnectionHandle, config: TrialConfig) -> Self {
        Self {
            platform,
            handle,
            config,
        }
    }
}

#[async_trait]
impl SampleSource for GattSource {
    async fn stream(&mut self, sink: Arc<dyn SampleSink>) -> Result<(), StreamError> {
        let mut session = StreamingSession::new();
        let mut engine = TrialEngine::new(
            self.platform.clone(),
            self.handle.clone(),
            self.config.clone(),
        );
        engine.subscribe_auto(&mut session, sink.as_ref()).await?;
        session.pump(sink.as_ref(), self.config.log_raw_payloads).await;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("GATT stream from {}", self.handle.device_id())
    }
}

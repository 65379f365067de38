//! Connection Lifecycle
//!
//! A pure state machine for one peripheral link. It owns no timers and
//! performs no I/O: every input is a [`LinkEvent`], every output is a list
//! of [`LinkEffect`]s that the service executes. Each connect attempt
//! carries a fresh [`AttemptId`] so late results from superseded attempts
//! are recognised and their links torn down.

use crate::domain::error::StreamError;
use crate::domain::models::{ConnectionStatus, DiscoveredDevice};
use crate::infrastructure::bluetooth::platform::{ConnectionHandle, HandleId};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type AttemptId = u64;

/// What a connected session is streaming over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Real(ConnectionHandle),
    Simulated,
}

impl Link {
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        match self {
            Link::Real(handle) => Some(handle),
            Link::Simulated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectState {
    pub attempts_so_far: usize,
    pub pending_resume_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting {
        device: DiscoveredDevice,
        attempt: AttemptId,
        reconnect: Option<ReconnectState>,
        /// Handles reported lost while this attempt was in flight.
        lost_early: Vec<HandleId>,
    },
    Connected {
        device: DiscoveredDevice,
        link: Link,
        streaming: bool,
    },
    Reconnecting {
        device: DiscoveredDevice,
        attempt: AttemptId,
        reconnect: ReconnectState,
    },
    Disconnecting {
        device: DiscoveredDevice,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested(DiscoveredDevice),
    ConnectSucceeded {
        attempt: AttemptId,
        handle: ConnectionHandle,
    },
    ConnectFailed {
        attempt: AttemptId,
        error: StreamError,
    },
    LinkLost {
        handle: HandleId,
    },
    RetryDue {
        attempt: AttemptId,
    },
    DisconnectRequested,
    TeardownFinished,
    StreamingChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEffect {
    Status(ConnectionStatus),
    BeginConnect {
        attempt: AttemptId,
        device: DiscoveredDevice,
    },
    ScheduleRetry {
        attempt: AttemptId,
        delay: Duration,
    },
    CancelRetry,
    StopStreaming,
    Teardown(ConnectionHandle),
    ResumeStreaming {
        after: Duration,
    },
    ClearSession,
    Report(StreamError),
}

pub struct ConnectionManager {
    state: LinkState,
    next_attempt: AttemptId,
    backoff: Vec<Duration>,
    resume_settle: Duration,
}

impl ConnectionManager {
    pub fn new(backoff: Vec<Duration>, resume_settle: Duration) -> Self {
        Self {
            state: LinkState::Idle,
            next_attempt: 0,
            backoff,
            resume_settle,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// The live link, only while connected.
    pub fn link(&self) -> Option<&Link> {
        match &self.state {
            LinkState::Connected { link, .. } => Some(link),
            _ => None,
        }
    }

    pub fn device(&self) -> Option<&DiscoveredDevice> {
        match &self.state {
            LinkState::Idle => None,
            LinkState::Connecting { device, .. }
            | LinkState::Connected { device, .. }
            | LinkState::Reconnecting { device, .. }
            | LinkState::Disconnecting { device } => Some(device),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkEffect> {
        let state = std::mem::replace(&mut self.state, LinkState::Idle);
        debug!("Link event {:?} in {:?}", event, state);
        let (next, effects) = self.transition(state, event);
        self.state = next;
        effects
    }

    fn transition(&mut self, state: LinkState, event: LinkEvent) -> (LinkState, Vec<LinkEffect>) {
        use LinkEffect::*;

        match (state, event) {
            (state, LinkEvent::ConnectRequested(device)) => {
                let effects = Self::release(state);
                self.start(device, None, effects)
            }

            (
                LinkState::Connecting {
                    device,
                    attempt,
                    reconnect,
                    lost_early,
                },
                LinkEvent::ConnectSucceeded { attempt: a, handle },
            ) if a == attempt => {
                if lost_early.contains(&handle.id()) {
                    warn!("Link {} dropped before setup finished", handle.id());
                    let error =
                        StreamError::ConnectionFailed("link dropped during setup".to_string());
                    return self.attempt_failed(device, reconnect, error, vec![Teardown(handle)]);
                }

                info!("Connected to {} ({})", device.label(), handle.id());
                let mut effects = vec![Status(ConnectionStatus::Connected)];
                if reconnect.is_some_and(|r| r.pending_resume_streaming) {
                    effects.push(ResumeStreaming {
                        after: self.resume_settle,
                    });
                }
                (
                    LinkState::Connected {
                        device,
                        link: Link::Real(handle),
                        streaming: false,
                    },
                    effects,
                )
            }

            (
                LinkState::Connecting {
                    device,
                    attempt,
                    reconnect,
                    ..
                },
                LinkEvent::ConnectFailed { attempt: a, error },
            ) if a == attempt => self.attempt_failed(device, reconnect, error, Vec::new()),

            (
                LinkState::Connecting {
                    device,
                    attempt,
                    reconnect,
                    mut lost_early,
                },
                LinkEvent::LinkLost { handle },
            ) => {
                if !lost_early.contains(&handle) {
                    lost_early.push(handle);
                }
                (
                    LinkState::Connecting {
                        device,
                        attempt,
                        reconnect,
                        lost_early,
                    },
                    Vec::new(),
                )
            }

            (
                LinkState::Connected {
                    device,
                    link: Link::Real(current),
                    streaming,
                },
                LinkEvent::LinkLost { handle },
            ) if current.id() == handle => {
                warn!("Lost link to {}", device.label());
                let effects = vec![StopStreaming, Teardown(current)];
                let reconnect = ReconnectState {
                    attempts_so_far: 0,
                    pending_resume_streaming: streaming,
                };
                if self.backoff.is_empty() {
                    return self.give_up(reconnect.attempts_so_far, effects);
                }
                self.schedule_retry(device, reconnect, effects)
            }

            (
                LinkState::Connected {
                    device,
                    link,
                    streaming: _,
                },
                LinkEvent::StreamingChanged(streaming),
            ) => (
                LinkState::Connected {
                    device,
                    link,
                    streaming,
                },
                Vec::new(),
            ),

            (
                LinkState::Connecting {
                    device,
                    attempt,
                    reconnect: Some(mut reconnect),
                    lost_early,
                },
                LinkEvent::StreamingChanged(streaming),
            ) => {
                reconnect.pending_resume_streaming = streaming;
                (
                    LinkState::Connecting {
                        device,
                        attempt,
                        reconnect: Some(reconnect),
                        lost_early,
                    },
                    Vec::new(),
                )
            }

            (
                LinkState::Reconnecting {
                    device,
                    attempt,
                    mut reconnect,
                },
                LinkEvent::StreamingChanged(streaming),
            ) => {
                reconnect.pending_resume_streaming = streaming;
                (
                    LinkState::Reconnecting {
                        device,
                        attempt,
                        reconnect,
                    },
                    Vec::new(),
                )
            }

            (
                LinkState::Reconnecting {
                    device,
                    attempt,
                    reconnect,
                },
                LinkEvent::RetryDue { attempt: a },
            ) if a == attempt => {
                info!(
                    "Reconnect attempt {} to {}",
                    reconnect.attempts_so_far + 1,
                    device.label()
                );
                (
                    LinkState::Connecting {
                        device: device.clone(),
                        attempt,
                        reconnect: Some(reconnect),
                        lost_early: Vec::new(),
                    },
                    vec![
                        Status(ConnectionStatus::Reconnecting {
                            attempt: reconnect.attempts_so_far + 1,
                        }),
                        BeginConnect { attempt, device },
                    ],
                )
            }

            (LinkState::Connected { device, link, .. }, LinkEvent::DisconnectRequested) => {
                info!("Disconnecting from {}", device.label());
                match link {
                    Link::Real(handle) => (
                        LinkState::Disconnecting { device },
                        vec![
                            Status(ConnectionStatus::Disconnecting),
                            Teardown(handle),
                            StopStreaming,
                            ClearSession,
                        ],
                    ),
                    Link::Simulated => (
                        LinkState::Idle,
                        vec![
                            StopStreaming,
                            ClearSession,
                            Status(ConnectionStatus::Disconnected),
                        ],
                    ),
                }
            }

            (LinkState::Connecting { .. }, LinkEvent::DisconnectRequested) => (
                LinkState::Idle,
                vec![ClearSession, Status(ConnectionStatus::Disconnected)],
            ),

            (LinkState::Reconnecting { .. }, LinkEvent::DisconnectRequested) => {
                info!("Reconnect cancelled");
                (
                    LinkState::Idle,
                    vec![
                        CancelRetry,
                        ClearSession,
                        Status(ConnectionStatus::Disconnected),
                    ],
                )
            }

            (LinkState::Disconnecting { .. }, LinkEvent::TeardownFinished) => {
                (LinkState::Idle, vec![Status(ConnectionStatus::Disconnected)])
            }

            // A connect that finished after its attempt was superseded.
            (state, LinkEvent::ConnectSucceeded { attempt, handle }) => {
                debug!("Tearing down orphan link {} from attempt {}", handle.id(), attempt);
                (state, vec![Teardown(handle)])
            }

            (state, event) => {
                debug!("Ignoring {:?}", event);
                (state, Vec::new())
            }
        }
    }

    fn next_attempt(&mut self) -> AttemptId {
        self.next_attempt += 1;
        self.next_attempt
    }

    /// Effects that abandon whatever `state` was holding.
    fn release(state: LinkState) -> Vec<LinkEffect> {
        match state {
            LinkState::Connected { link, .. } => {
                let mut effects = vec![LinkEffect::StopStreaming, LinkEffect::ClearSession];
                if let Link::Real(handle) = link {
                    effects.push(LinkEffect::Teardown(handle));
                }
                effects
            }
            LinkState::Reconnecting { .. } => vec![LinkEffect::CancelRetry],
            LinkState::Idle | LinkState::Connecting { .. } | LinkState::Disconnecting { .. } => {
                Vec::new()
            }
        }
    }

    fn start(
        &mut self,
        device: DiscoveredDevice,
        reconnect: Option<ReconnectState>,
        mut effects: Vec<LinkEffect>,
    ) -> (LinkState, Vec<LinkEffect>) {
        if device.is_synthetic {
            info!("Attaching simulated device");
            effects.push(LinkEffect::Status(ConnectionStatus::Connected));
            return (
                LinkState::Connected {
                    device,
                    link: Link::Simulated,
                    streaming: false,
                },
                effects,
            );
        }

        let attempt = self.next_attempt();
        info!("Connecting to {} ({})", device.label(), device.identifier);
        effects.push(LinkEffect::Status(ConnectionStatus::Connecting));
        effects.push(LinkEffect::BeginConnect {
            attempt,
            device: device.clone(),
        });
        (
            LinkState::Connecting {
                device,
                attempt,
                reconnect,
                lost_early: Vec::new(),
            },
            effects,
        )
    }

    fn attempt_failed(
        &mut self,
        device: DiscoveredDevice,
        reconnect: Option<ReconnectState>,
        error: StreamError,
        mut effects: Vec<LinkEffect>,
    ) -> (LinkState, Vec<LinkEffect>) {
        let Some(mut reconnect) = reconnect else {
            warn!("Connection to {} failed: {}", device.label(), error);
            effects.push(LinkEffect::Report(error));
            effects.push(LinkEffect::Status(ConnectionStatus::Disconnected));
            return (LinkState::Idle, effects);
        };

        reconnect.attempts_so_far += 1;
        warn!(
            "Reconnect attempt {} to {} failed: {}",
            reconnect.attempts_so_far,
            device.label(),
            error
        );
        if reconnect.attempts_so_far >= self.backoff.len() {
            return self.give_up(reconnect.attempts_so_far, effects);
        }
        self.schedule_retry(device, reconnect, effects)
    }

    fn schedule_retry(
        &mut self,
        device: DiscoveredDevice,
        reconnect: ReconnectState,
        mut effects: Vec<LinkEffect>,
    ) -> (LinkState, Vec<LinkEffect>) {
        let attempt = self.next_attempt();
        let delay = self.backoff[reconnect.attempts_so_far];
        debug!("Next reconnect in {:?}", delay);
        effects.push(LinkEffect::Status(ConnectionStatus::Reconnecting {
            attempt: reconnect.attempts_so_far + 1,
        }));
        effects.push(LinkEffect::ScheduleRetry { attempt, delay });
        (
            LinkState::Reconnecting {
                device,
                attempt,
                reconnect,
            },
            effects,
        )
    }

    fn give_up(
        &mut self,
        attempts: usize,
        mut effects: Vec<LinkEffect>,
    ) -> (LinkState, Vec<LinkEffect>) {
        warn!("Giving up after {} reconnect attempts", attempts);
        effects.push(LinkEffect::Report(StreamError::ReconnectExhausted { attempts }));
        effects.push(LinkEffect::ClearSession);
        effects.push(LinkEffect::Status(ConnectionStatus::Disconnected));
        (LinkState::Idle, effects)
    }
}

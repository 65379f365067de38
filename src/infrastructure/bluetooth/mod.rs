//! Bluetooth Module
//!
//! Streams accelerometer samples from arbitrary BLE peripherals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │   (single task: commands, callbacks and timers in)       │
//! └──────┬──────────────┬───────────────────┬───────────────┘
//!        │              │                   │
//!        ▼              ▼                   ▼
//! ┌───────────┐  ┌──────────────┐  ┌─────────────────┐
//! │  Scanner  │  │  Connection  │  │  SampleSource   │
//! │           │  │              │  │                 │
//! │ - windows │  │ - lifecycle  │  │ - GattSource    │
//! │ - dedup   │  │   reducer    │  │   (trials)      │
//! │           │  │ - backoff    │  │ - SineWave      │
//! └─────┬─────┘  └──────────────┘  └────────┬────────┘
//!       │                                   │
//!       └──────────────┬────────────────────┘
//!                      ▼
//!              ┌───────────────┐
//!              │  BlePlatform  │  WinRT / unsupported / fake
//!              └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`platform`] - Host BLE capability trait and its value types
//! - [`scanner`] - Bounded discovery windows
//! - [`connection`] - Connection lifecycle state machine
//! - [`trial`] - Candidate subscription trials and the GATT sample source
//! - [`session`] - Sample sinks, sources and the one-subscription holder
//! - [`simulated`] - Synthetic sample source
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod platform;
pub mod scanner;
pub mod service;
pub mod session;
pub mod simulated;
pub mod trial;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(not(windows))]
pub mod unsupported;
#[cfg(windows)]
pub mod winrt;

pub use service::BluetoothService;

use platform::BlePlatform;
use std::sync::Arc;

/// The BLE backend for the current target.
pub fn default_platform() -> Arc<dyn BlePlatform> {
    #[cfg(windows)]
    {
        Arc::new(winrt::WinRtPlatform::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(unsupported::UnsupportedPlatform)
    }
}

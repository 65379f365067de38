//! Accelerometer streaming from arbitrary Bluetooth LE peripherals.
//!
//! Layers follow the usual split: [`domain`] holds pure types and rules,
//! [`infrastructure`] talks to the radio and the filesystem, and
//! [`presentation`] is the egui shell.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

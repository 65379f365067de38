//! Candidate Scorer
//!
//! Ranks the notifiable characteristics of a peripheral by how likely they
//! are to carry motion data. This is a heuristic; wrong guesses are weeded
//! out by the trial engine's timeout.

use crate::domain::models::{CharacteristicDescriptor, SubscriptionCandidate};
use uuid::Uuid;

/// Bluetooth SIG base UUID: 0000xxxx-0000-1000-8000-00805f9b34fb
const BLE_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Standard services that never carry sensor streams.
pub const DENIED_SERVICES: &[u16] = &[
    0x1800, // Generic Access
    0x1801, // Generic Attribute
    0x180A, // Device Information
    0x180F, // Battery
    0x1812, // Human Interface Device
];

/// Standard system characteristics that may appear inside vendor services.
pub const DENIED_CHARACTERISTICS: &[u16] = &[
    0x2A00, // Device Name
    0x2A01, // Appearance
    0x2A04, // Peripheral Preferred Connection Parameters
    0x2A05, // Service Changed
    0x2A19, // Battery Level
    0x2A24, // Model Number String
    0x2A25, // Serial Number String
    0x2A26, // Firmware Revision String
    0x2A27, // Hardware Revision String
    0x2A28, // Software Revision String
    0x2A29, // Manufacturer Name String
];

/// Identifier fragments used by common vendor sensor profiles
/// (0xFFE0/0xFFF0 serial-style services, Nordic UART TX, 0xAE00 modules).
pub const VENDOR_FRAGMENTS: &[&str] = &["ffe", "fff", "6e400003", "ae0"];

/// Score bonus for a service that also exposes a writable characteristic.
pub const WRITABLE_SIBLING_BONUS: i32 = 2;
/// Score bonus for an identifier matching a vendor fragment.
pub const VENDOR_FRAGMENT_BONUS: i32 = 1;

/// Expand a 16-bit assigned number into its full 128-bit form.
pub const fn ble_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLE_BASE_UUID | ((short as u128) << 96))
}

/// The 16-bit assigned number of `id`, if it lives on the SIG base UUID.
pub fn short_uuid(id: &Uuid) -> Option<u16> {
    let value = id.as_u128();
    let mask: u128 = !(0xFFFF_FFFFu128 << 96);
    if value & mask == BLE_BASE_UUID && value >> 112 == 0 {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

fn is_denied(id: &Uuid, deny_list: &[u16]) -> bool {
    short_uuid(id).is_some_and(|short| deny_list.contains(&short))
}

fn matches_vendor_fragment(id: &Uuid) -> bool {
    let text = id.hyphenated().to_string();
    VENDOR_FRAGMENTS.iter().any(|fragment| text.contains(fragment))
}

/// Rank every subscribable characteristic, best first.
///
/// Services keep the order the platform enumerated them in, and so do
/// characteristics within a service; the sort is stable so ties preserve it.
pub fn rank_candidates(characteristics: &[CharacteristicDescriptor]) -> Vec<SubscriptionCandidate> {
    let eligible: Vec<&CharacteristicDescriptor> = characteristics
        .iter()
        .filter(|c| !is_denied(&c.service_id, DENIED_SERVICES))
        .filter(|c| !is_denied(&c.characteristic_id, DENIED_CHARACTERISTICS))
        .collect();

    let mut candidates: Vec<SubscriptionCandidate> = eligible
        .iter()
        .filter(|c| c.properties.can_subscribe())
        .map(|c| {
            let sibling_writers: Vec<CharacteristicDescriptor> = eligible
                .iter()
                .filter(|w| w.service_id == c.service_id && w.properties.is_writable())
                .map(|w| (*w).clone())
                .collect();

            let mut score = 0;
            if !sibling_writers.is_empty() {
                score += WRITABLE_SIBLING_BONUS;
            }
            if matches_vendor_fragment(&c.characteristic_id) {
                score += VENDOR_FRAGMENT_BONUS;
            }

            SubscriptionCandidate {
                descriptor: (*c).clone(),
                score,
                sibling_writers,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates
}

//! ID generation utilities
//!
//! Provides identifiers for swipe submissions and analytics events.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a correlation ID for a swipe submission
///
/// Format: `swp-{timestamp_ms}-{random_hex}`
/// Example: `swp-1738300800123-a1b2c3d4`
pub fn generate_request_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("swp-{}-{:08x}", timestamp, random)
}

/// Generate an analytics event ID
///
/// Format: `evt-{timestamp_ms}-{random_hex}`
pub fn generate_event_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("evt-{}-{:04x}", timestamp, random)
}

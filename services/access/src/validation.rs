//! Input validation utilities
//!
//! Checks that run before any store is touched.

use uuid::{Uuid, Version};

/// Longest accepted ban reason, in characters
pub const MAX_BAN_REASON_LENGTH: usize = 500;

/// Longest accepted route identifier
pub const MAX_ROUTE_LENGTH: usize = 128;

/// Validate a client supplied device id, which must be a UUIDv4
pub fn validate_device_id(device_id: &str) -> Result<Uuid, String> {
    if device_id.is_empty() {
        return Err("Device id is required".to_string());
    }

    let parsed =
        Uuid::try_parse(device_id).map_err(|_| "Device id is not a valid UUID".to_string())?;

    if parsed.get_version() != Some(Version::Random) {
        return Err("Device id must be a version 4 UUID".to_string());
    }

    Ok(parsed)
}

/// Validate a moderator supplied ban reason
pub fn validate_ban_reason(reason: &str) -> Result<(), String> {
    if reason.trim().is_empty() {
        return Err("Ban reason is required".to_string());
    }

    if reason.chars().count() > MAX_BAN_REASON_LENGTH {
        return Err(format!(
            "Ban reason must be at most {} characters long",
            MAX_BAN_REASON_LENGTH
        ));
    }

    Ok(())
}

/// Validate a route identifier used as a rate-limit key
pub fn validate_route(route: &str) -> Result<(), String> {
    if route.is_empty() {
        return Err("Route is required".to_string());
    }

    if route.len() > MAX_ROUTE_LENGTH {
        return Err(format!(
            "Route must be at most {} characters long",
            MAX_ROUTE_LENGTH
        ));
    }

    if route.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Route must not contain whitespace".to_string());
    }

    Ok(())
}

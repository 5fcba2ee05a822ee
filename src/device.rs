//! Static device profile registry for target e-readers.
//!
//! Profiles are loaded once at startup and never mutated. Dimension resolution
//! is deliberately lenient: an unknown profile id falls back to the default
//! dimensions instead of failing, so requests carrying device ids from newer
//! catalogs still convert.

use lazy_static::lazy_static;
use serde::Serialize;

use crate::types::OutputFormat;

/// Profile id that requests explicit custom dimensions.
pub const CUSTOM_PROFILE_ID: &str = "custom";

/// Profile substituted when a request names no (or an unknown) device.
pub const DEFAULT_PROFILE_ID: &str = "kindle_paperwhite_5";

/// Dimensions used for `custom` without explicit values and for unknown ids.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (1236, 1648);

/// One target e-reader screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    pub manufacturer: &'static str,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub supports_color: bool,
    pub recommended_format: OutputFormat,
}

lazy_static! {
    /// The static device catalog, ordered for display.
    static ref DEVICE_CATALOG: Vec<DeviceProfile> = vec![
        DeviceProfile {
            id: "kindle_basic",
            display_name: "Kindle Basic (6\")",
            manufacturer: "kindle",
            width: 600,
            height: 800,
            dpi: 167,
            supports_color: false,
            recommended_format: OutputFormat::Mobi,
        },
        DeviceProfile {
            id: "kindle_paperwhite_5",
            display_name: "Kindle Paperwhite 5 (6.8\")",
            manufacturer: "kindle",
            width: 1236,
            height: 1648,
            dpi: 300,
            supports_color: false,
            recommended_format: OutputFormat::Epub,
        },
        DeviceProfile {
            id: "kindle_scribe",
            display_name: "Kindle Scribe (10.2\")",
            manufacturer: "kindle",
            width: 1860,
            height: 2480,
            dpi: 300,
            supports_color: false,
            recommended_format: OutputFormat::Epub,
        },
        DeviceProfile {
            id: "kobo_clara_2e",
            display_name: "Kobo Clara 2E (6\")",
            manufacturer: "kobo",
            width: 1072,
            height: 1448,
            dpi: 300,
            supports_color: false,
            recommended_format: OutputFormat::Epub,
        },
        DeviceProfile {
            id: "kobo_libra_2",
            display_name: "Kobo Libra 2 (7\")",
            manufacturer: "kobo",
            width: 1264,
            height: 1680,
            dpi: 300,
            supports_color: false,
            recommended_format: OutputFormat::Epub,
        },
        DeviceProfile {
            id: "kobo_sage",
            display_name: "Kobo Sage (8\")",
            manufacturer: "kobo",
            width: 1440,
            height: 1920,
            dpi: 300,
            supports_color: false,
            recommended_format: OutputFormat::Epub,
        },
    ];
}

/// All catalog entries, for enumeration by outer API layers.
pub fn all_profiles() -> &'static [DeviceProfile] {
    &DEVICE_CATALOG
}

/// Looks up a catalog entry by id.
pub fn profile(profile_id: &str) -> Option<&'static DeviceProfile> {
    DEVICE_CATALOG.iter().find(|p| p.id == profile_id)
}

/// Resolves the effective output dimensions for a profile id.
///
/// `custom` with both dimensions returns them verbatim; `custom` without both,
/// and any unknown id, fall back to [`DEFAULT_DIMENSIONS`]. Pure lookup, no
/// side effects.
pub fn resolve_dimensions(
    profile_id: &str,
    custom_width: Option<u32>,
    custom_height: Option<u32>,
) -> (u32, u32) {
    if profile_id == CUSTOM_PROFILE_ID {
        if let (Some(width), Some(height)) = (custom_width, custom_height) {
            return (width, height);
        }
        return DEFAULT_DIMENSIONS;
    }

    match profile(profile_id) {
        Some(found) => (found.width, found.height),
        None => DEFAULT_DIMENSIONS,
    }
}

/// DPI for a profile id, falling back to 300 for custom/unknown devices.
pub fn resolve_dpi(profile_id: &str) -> u32 {
    profile(profile_id).map(|p| p.dpi).unwrap_or(300)
}

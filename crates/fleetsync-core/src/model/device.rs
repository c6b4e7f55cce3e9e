// ── Device domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device connection state as reported by the host agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceState {
    Connected,
    Disconnected,
    Unknown,
}

impl DeviceState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Map the console's free-form state string. Anything unrecognized
    /// collapses to `Unknown` rather than failing the whole record.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "Connected" => Self::Connected,
            "Disconnected" => Self::Disconnected,
            _ => Self::Unknown,
        }
    }
}

/// The canonical device type.
///
/// `udid` is the stable business key and the primary replica key --
/// display, selection, and update correlation all go through it. `id`
/// is the store-assigned identifier used for delete (and insert)
/// correlation; snapshot-sourced entries may lack it, which is why it
/// is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub udid: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub state: Option<DeviceState>,
    pub os_version: Option<String>,
    pub cpu: Option<String>,
    pub sdk_version: Option<String>,
    pub security_id: Option<u32>,
    pub registered_to: Option<String>,
    pub host_ip: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Device {
    /// Minimal device with only the business key set. Everything else
    /// stays unpopulated until the host agent reports it.
    pub fn with_udid(udid: impl Into<String>) -> Self {
        Self {
            id: None,
            udid: udid.into(),
            model: None,
            manufacturer: None,
            state: None,
            os_version: None,
            cpu: None,
            sdk_version: None,
            security_id: None,
            registered_to: None,
            host_ip: None,
            last_update: None,
        }
    }

    /// Short human label for listings: model if known, else the udid.
    pub fn display_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.udid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_from_raw() {
        assert_eq!(DeviceState::from_raw("Connected"), DeviceState::Connected);
        assert_eq!(
            DeviceState::from_raw("Disconnected"),
            DeviceState::Disconnected
        );
        assert_eq!(DeviceState::from_raw("Rebooting"), DeviceState::Unknown);
        assert!(DeviceState::Connected.is_connected());
    }

    #[test]
    fn display_name_prefers_model() {
        let mut device = Device::with_udid("R58M123");
        assert_eq!(device.display_name(), "R58M123");
        device.model = Some("Galaxy S7".into());
        assert_eq!(device.display_name(), "Galaxy S7");
    }
}

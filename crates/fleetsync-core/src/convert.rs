// ── Wire-to-domain conversion ──
//
// `fleetsync_api::DeviceRecord` is the console's wire shape; `Device`
// is the canonical domain type. Conversion is lossless apart from the
// state string, which is normalized into `DeviceState`.

use fleetsync_api::DeviceRecord;

use crate::model::{Device, DeviceState};

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Self {
            id: record.id,
            udid: record.udid,
            model: record.model,
            manufacturer: record.manufacturer,
            state: record.state.as_deref().map(DeviceState::from_raw),
            os_version: record.os_version,
            cpu: record.cpu,
            sdk_version: record.sdk_version,
            security_id: record.security_id,
            registered_to: record.registered_to,
            host_ip: record.host_ip,
            last_update: record.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_converts_with_state_normalization() {
        let record = DeviceRecord {
            id: Some("65f0aa11".into()),
            udid: "R58M123".into(),
            model: Some("Galaxy S7".into()),
            manufacturer: Some("Samsung".into()),
            state: Some("Connected".into()),
            os_version: Some("6.0".into()),
            cpu: None,
            sdk_version: None,
            security_id: Some(48213),
            registered_to: None,
            host_ip: None,
            last_update: None,
        };

        let device = Device::from(record);
        assert_eq!(device.udid, "R58M123");
        assert_eq!(device.id.as_deref(), Some("65f0aa11"));
        assert_eq!(device.state, Some(DeviceState::Connected));
        assert_eq!(device.security_id, Some(48213));
    }
}

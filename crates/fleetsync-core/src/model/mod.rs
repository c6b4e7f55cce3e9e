// ── Domain model ──

mod device;

pub use device::{Device, DeviceState};

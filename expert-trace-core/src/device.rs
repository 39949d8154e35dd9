//! Compute device identity.
//!
//! A trace window is attributed to exactly one device: the device that was
//! active when the window was opened. [`DeviceProbe`] is the seam through which
//! the tracer asks "which device is this execution unit on right now?".

use core::cell::Cell;
use core::fmt;

/// Identifier of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    /// Host CPU.
    #[default]
    Cpu,
    /// Accelerator by ordinal (GPU, NPU, ...).
    Accelerator(u32),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Cpu => write!(f, "cpu"),
            DeviceId::Accelerator(ordinal) => write!(f, "accel:{ordinal}"),
        }
    }
}

/// Reports the device active for the calling execution unit.
pub trait DeviceProbe: Send + Sync {
    fn current_device(&self) -> DeviceId;
}

thread_local! {
    static THREAD_DEVICE: Cell<DeviceId> = const { Cell::new(DeviceId::Cpu) };
}

/// Bind `device` as the current device of the calling OS thread.
///
/// Serving engines pin each worker thread to a device before running model
/// code; call this at the same point.
pub fn set_current_device(device: DeviceId) {
    THREAD_DEVICE.with(|slot| slot.set(device));
}

/// Device bound to the calling OS thread (`Cpu` until set).
pub fn current_thread_device() -> DeviceId {
    THREAD_DEVICE.with(Cell::get)
}

/// Probe backed by the per-thread slot written by [`set_current_device`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDevice;

impl DeviceProbe for ThreadDevice {
    fn current_device(&self) -> DeviceId {
        current_thread_device()
    }
}

/// Probe that always reports the same device.
#[derive(Debug, Clone, Copy)]
pub struct FixedDevice(pub DeviceId);

impl DeviceProbe for FixedDevice {
    fn current_device(&self) -> DeviceId {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_device_defaults_to_cpu_and_is_thread_scoped() {
        std::thread::spawn(|| {
            assert_eq!(ThreadDevice.current_device(), DeviceId::Cpu);
            set_current_device(DeviceId::Accelerator(3));
            assert_eq!(ThreadDevice.current_device(), DeviceId::Accelerator(3));
        })
        .join()
        .unwrap();

        std::thread::spawn(|| {
            assert_eq!(current_thread_device(), DeviceId::Cpu);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(DeviceId::Cpu.to_string(), "cpu");
        assert_eq!(DeviceId::Accelerator(1).to_string(), "accel:1");
    }
}

//! Device construction for unit tests on machines that may lack a GPU.

use super::{Device, DeviceDesc, DeviceError, GpuContext};

fn require_gpu() -> bool {
    let Ok(raw) = std::env::var("RTFILTER_REQUIRE_GPU") else {
        return false;
    };
    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

fn skip_or_panic(reason: &str) {
    if require_gpu() {
        panic!("RTFILTER_REQUIRE_GPU is set but no device could be created: {reason}");
    }
    eprintln!("skipping: {reason}");
}

pub(crate) fn device_with(desc: DeviceDesc) -> Option<Device> {
    match Device::new(desc) {
        Ok(device) => Some(device),
        Err(DeviceError::AdapterUnavailable(reason)) => {
            skip_or_panic(&reason);
            None
        }
        Err(other) => panic!("device creation failed: {other}"),
    }
}

pub(crate) fn device() -> Option<Device> {
    device_with(DeviceDesc::default())
}

pub(crate) fn context_with(desc: DeviceDesc) -> Option<GpuContext> {
    match GpuContext::new(desc) {
        Ok(ctx) => Some(ctx),
        Err(DeviceError::AdapterUnavailable(reason)) => {
            skip_or_panic(&reason);
            None
        }
        Err(other) => panic!("context creation failed: {other}"),
    }
}

pub(crate) fn context() -> Option<GpuContext> {
    context_with(DeviceDesc::default())
}

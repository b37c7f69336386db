//! WGSL shader stages.
//!
//! A stage is WGSL source plus the registers it reads, so pipeline creation
//! can check them against the root signature the way a compiled shader's
//! reflection data would. Bindings follow one convention:
//!
//! - a descriptor lives at `@group(root parameter) @binding(slot in its table)`
//! - a static sampler lives at `@group(parameter count) @binding(register)`
//! - a vertex input lives at `@location(index in ShaderSource::inputs)`

use super::DeviceError;
use super::gpu::GpuBackend;

/// Registers a shader binds, by kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderRegisters {
    pub cbv: &'static [u32],
    pub srv: &'static [u32],
    pub uav: &'static [u32],
    pub samplers: &'static [u32],
}

/// One entry point of a WGSL module.
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource {
    pub label: &'static str,
    pub wgsl: &'static str,
    pub entry_point: &'static str,
    pub registers: ShaderRegisters,
    /// Semantics a vertex stage reads; each must appear in the input layout.
    pub inputs: &'static [&'static str],
}

impl ShaderSource {
    pub const fn new(label: &'static str, wgsl: &'static str, entry_point: &'static str) -> Self {
        Self {
            label,
            wgsl,
            entry_point,
            registers: ShaderRegisters { cbv: &[], srv: &[], uav: &[], samplers: &[] },
            inputs: &[],
        }
    }

    pub const fn with_registers(mut self, registers: ShaderRegisters) -> Self {
        self.registers = registers;
        self
    }

    pub const fn with_inputs(mut self, inputs: &'static [&'static str]) -> Self {
        self.inputs = inputs;
        self
    }

    pub(crate) fn compile(&self, gpu: &GpuBackend) -> Result<wgpu::ShaderModule, DeviceError> {
        let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.label),
            source: wgpu::ShaderSource::Wgsl(self.wgsl.into()),
        });
        match gpu.take_error() {
            Some(error) => Err(DeviceError::InvalidPipeline(format!("{}: {error}", self.label))),
            None => Ok(module),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing;

    const FILL: &str = "@compute @workgroup_size(1) fn main() {}";

    #[test]
    fn builders_fill_registers_and_inputs() {
        let source = ShaderSource::new("fill", FILL, "main")
            .with_registers(ShaderRegisters { uav: &[0], ..Default::default() })
            .with_inputs(&["POSITION"]);
        assert_eq!(source.registers.uav, &[0]);
        assert!(source.registers.srv.is_empty());
        assert_eq!(source.inputs, &["POSITION"]);
    }

    #[test]
    fn broken_wgsl_is_an_invalid_pipeline() {
        let Some(device) = testing::device() else { return };
        assert!(ShaderSource::new("fill", FILL, "main").compile(device.gpu()).is_ok());
        let err = ShaderSource::new("broken", "fn main( {", "main")
            .compile(device.gpu())
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidPipeline(m) if m.starts_with("broken")));
    }
}

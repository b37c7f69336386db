use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use winit::dpi::PhysicalSize;

use rtfilter_engine::device::{AdapterProfile, DeviceDesc};
use rtfilter_engine::frame::FilterMode;
use rtfilter_engine::window::RuntimeConfig;

/// Viewer settings. Defaults match the classic sample scene; each field can
/// be overridden by an `RTFILTER_*` environment variable.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// `RTFILTER_MODEL`
    pub model: PathBuf,
    /// `RTFILTER_QUAD_TEXTURE`
    pub quad_texture: PathBuf,
    /// `RTFILTER_WIDTH`, `RTFILTER_HEIGHT`
    pub width: u32,
    pub height: u32,
    /// `RTFILTER_ADAPTER`: nvidia, amd, intel or software.
    pub adapter: AdapterProfile,
    /// `RTFILTER_VALIDATION`: 0 or 1.
    pub validation: bool,
    /// `RTFILTER_HEADLESS_FRAMES`: render this many frames without a window.
    pub headless_frames: Option<u32>,
    /// `RTFILTER_CAPTURE`: PNG written after a headless run.
    pub capture: Option<PathBuf>,
    /// `RTFILTER_FILTER` (render-target or texture), or `--texture-filter`.
    ///
    /// In texture mode the quad texture is filtered once at startup and the
    /// model is not loaded.
    pub filter: FilterMode,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("Model/初音ミク.pmd"),
            quad_texture: PathBuf::from("img/textest200x200.png"),
            width: 1280,
            height: 720,
            adapter: AdapterProfile::default(),
            validation: cfg!(debug_assertions),
            headless_frames: None,
            capture: None,
            filter: FilterMode::RenderTarget,
        }
    }
}

impl ViewerConfig {
    /// Environment first, then command-line flags on top.
    pub fn from_env_and_args() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.apply_args(std::env::args().skip(1))?;
        Ok(config)
    }

    fn apply_args(&mut self, args: impl IntoIterator<Item = String>) -> Result<()> {
        for arg in args {
            match arg.as_str() {
                "--texture-filter" => self.filter = FilterMode::Texture,
                "--render-target-filter" => self.filter = FilterMode::RenderTarget,
                other => bail!("unknown argument {other:?}; expected --texture-filter or --render-target-filter"),
            }
        }
        Ok(())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(model) = lookup("RTFILTER_MODEL") {
            config.model = model.into();
        }
        if let Some(texture) = lookup("RTFILTER_QUAD_TEXTURE") {
            config.quad_texture = texture.into();
        }
        if let Some(width) = lookup("RTFILTER_WIDTH") {
            config.width = parse_dimension("RTFILTER_WIDTH", &width)?;
        }
        if let Some(height) = lookup("RTFILTER_HEIGHT") {
            config.height = parse_dimension("RTFILTER_HEIGHT", &height)?;
        }
        if let Some(name) = lookup("RTFILTER_ADAPTER") {
            config.adapter = AdapterProfile::from_name(&name)
                .with_context(|| format!("RTFILTER_ADAPTER: unknown adapter profile {name:?}"))?;
        }
        if let Some(flag) = lookup("RTFILTER_VALIDATION") {
            config.validation = match flag.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                other => bail!("RTFILTER_VALIDATION: expected 0 or 1, got {other:?}"),
            };
        }
        if let Some(frames) = lookup("RTFILTER_HEADLESS_FRAMES") {
            let frames: u32 = frames
                .trim()
                .parse()
                .with_context(|| format!("RTFILTER_HEADLESS_FRAMES: not a frame count: {frames:?}"))?;
            config.headless_frames = Some(frames.max(1));
        }
        if let Some(capture) = lookup("RTFILTER_CAPTURE") {
            config.capture = Some(capture.into());
        }
        if let Some(mode) = lookup("RTFILTER_FILTER") {
            config.filter = match mode.trim() {
                "render-target" | "rendertarget" => FilterMode::RenderTarget,
                "texture" => FilterMode::Texture,
                other => bail!("RTFILTER_FILTER: expected render-target or texture, got {other:?}"),
            };
        }

        Ok(config)
    }

    pub fn device_desc(&self) -> DeviceDesc {
        DeviceDesc {
            adapter: self.adapter,
            validation: self.validation,
            ..DeviceDesc::default()
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            title: format!("rtfilter - {}", self.model.display()),
            initial_size: PhysicalSize::new(self.width, self.height),
            ..RuntimeConfig::default()
        }
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32> {
    let parsed: u32 = value
        .trim()
        .parse()
        .with_context(|| format!("{key}: not a pixel size: {value:?}"))?;
    if parsed == 0 || parsed > 8192 {
        bail!("{key}: {parsed} is outside 1..=8192");
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = ViewerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.quad_texture, PathBuf::from("img/textest200x200.png"));
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.headless_frames.is_none());
        assert_eq!(config.filter, FilterMode::RenderTarget);
    }

    #[test]
    fn overrides_apply() {
        let config = ViewerConfig::from_lookup(lookup(&[
            ("RTFILTER_WIDTH", "200"),
            ("RTFILTER_HEIGHT", " 200 "),
            ("RTFILTER_ADAPTER", "Intel"),
            ("RTFILTER_HEADLESS_FRAMES", "0"),
            ("RTFILTER_CAPTURE", "out.png"),
        ]))
        .unwrap();
        assert_eq!((config.width, config.height), (200, 200));
        assert_eq!(config.adapter, AdapterProfile::Intel);
        assert_eq!(config.headless_frames, Some(1));
        assert_eq!(config.capture, Some(PathBuf::from("out.png")));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(ViewerConfig::from_lookup(lookup(&[("RTFILTER_WIDTH", "0")])).is_err());
        assert!(ViewerConfig::from_lookup(lookup(&[("RTFILTER_HEIGHT", "tall")])).is_err());
        assert!(ViewerConfig::from_lookup(lookup(&[("RTFILTER_ADAPTER", "voodoo")])).is_err());
        assert!(ViewerConfig::from_lookup(lookup(&[("RTFILTER_VALIDATION", "maybe")])).is_err());
        assert!(ViewerConfig::from_lookup(lookup(&[("RTFILTER_FILTER", "sepia")])).is_err());
    }

    // ── filter mode ───────────────────────────────────────────────────────

    #[test]
    fn texture_filter_from_environment() {
        let config = ViewerConfig::from_lookup(lookup(&[("RTFILTER_FILTER", "texture")])).unwrap();
        assert_eq!(config.filter, FilterMode::Texture);
    }

    #[test]
    fn flag_overrides_environment() {
        let mut config = ViewerConfig::from_lookup(lookup(&[("RTFILTER_FILTER", "texture")])).unwrap();
        config.apply_args(["--render-target-filter".to_string()]).unwrap();
        assert_eq!(config.filter, FilterMode::RenderTarget);
        config.apply_args(["--texture-filter".to_string()]).unwrap();
        assert_eq!(config.filter, FilterMode::Texture);
        assert!(config.apply_args(["--sepia".to_string()]).is_err());
    }
}

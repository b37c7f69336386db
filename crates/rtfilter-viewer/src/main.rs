mod config;
mod viewer;

use anyhow::{Context, Result};

use rtfilter_engine::device::GpuContext;
use rtfilter_engine::logging::{LoggingConfig, init_logging};
use rtfilter_engine::present::PresenterInit;
use rtfilter_engine::window::Runtime;

use config::ViewerConfig;
use viewer::Viewer;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = ViewerConfig::from_env_and_args()?;
    log::debug!("{config:?}");

    let ctx = GpuContext::new(config.device_desc()).context("failed to create the device")?;
    let mut viewer = Viewer::new(ctx, &config)?;

    match config.headless_frames {
        Some(frames) => viewer.run_headless(frames, config.capture.as_deref()),
        None => Runtime::run(config.runtime_config(), PresenterInit::default(), viewer),
    }
}

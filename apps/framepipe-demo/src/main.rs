//! framepipe demo
//!
//! Clears the window to a pulsing color while uploading a uniform block and
//! an indirect command table every frame.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p framepipe-demo -- [OPTIONS]
//! ```
//!
//! Run with `--help` for the option list.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use clap::Parser;
use framepipe_app::{run_app, AppConfig};

use crate::app::Pulse;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// Command line options.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "framepipe-demo")]
#[command(about = "Pulsing clear with per-frame staged uploads")]
struct DemoArgs {
    /// Frame slots in the ring (max 8)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=8))]
    frames_in_flight: u8,

    /// Prefer immediate presentation
    #[arg(long)]
    no_vsync: bool,

    /// Force Vulkan validation layers on (always on in debug builds)
    #[arg(long)]
    validation: bool,
}

impl DemoArgs {
    fn app_config(&self) -> AppConfig {
        AppConfig::new("framepipe demo")
            .with_size(WIDTH, HEIGHT)
            .with_frames_in_flight(usize::from(self.frames_in_flight))
            .with_vsync(!self.no_vsync)
            .with_validation(self.validation || cfg!(debug_assertions))
    }
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    run_app::<Pulse>(args.app_config())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<DemoArgs, clap::Error> {
        DemoArgs::try_parse_from(std::iter::once("framepipe-demo").chain(list.iter().copied()))
    }

    #[test]
    fn defaults() {
        let parsed = args(&[]).unwrap();
        assert_eq!(parsed.frames_in_flight, 2);
        assert!(!parsed.no_vsync);

        let config = parsed.app_config();
        assert!(config.vsync);
        assert_eq!((config.width, config.height), (WIDTH, HEIGHT));
    }

    #[test]
    fn parses_flags() {
        let parsed = args(&["--frames-in-flight", "3", "--no-vsync", "--validation"]).unwrap();
        let config = parsed.app_config();
        assert_eq!(config.frames_in_flight, 3);
        assert!(!config.vsync);
        assert!(config.validation);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(args(&["--frames-in-flight"]).is_err());
        assert!(args(&["--frames-in-flight", "two"]).is_err());
        assert!(args(&["--frames-in-flight", "9"]).is_err());
        assert!(args(&["--fast"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        DemoArgs::command().debug_assert();
    }
}

use clap::{Args, Parser};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "caretaker-monitor",
    about = "Stream camera frames to a fall/gait inference service and watch the alerts it raises",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(
        long,
        env = "CARETAKER_ENDPOINT",
        value_name = "URL",
        help = "WebSocket endpoint of the inference service (defaults to ws://localhost:8000/ws)"
    )]
    pub endpoint: Option<String>,

    #[arg(
        long,
        env = "CARETAKER_CONFIG",
        value_name = "PATH",
        help = "TOML file with monitor settings"
    )]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    #[arg(
        long = "frames-dir",
        env = "CARETAKER_FRAMES_DIR",
        value_name = "DIR",
        help = "Replay jpeg/png stills from this directory instead of the synthetic pattern"
    )]
    pub frames_dir: Option<PathBuf>,

    #[arg(long = "synthetic-width", default_value_t = 640)]
    pub width: u32,

    #[arg(long = "synthetic-height", default_value_t = 480)]
    pub height: u32,

    #[arg(
        long = "jpeg-quality",
        default_value_t = 80,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub quality: u8,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "CARETAKER_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "CARETAKER_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

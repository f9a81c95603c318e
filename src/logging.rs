// src/logging.rs

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::PathBuf;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{self, EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vanguard-rs", env!("CARGO_PKG_NAME"))
}

pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

/// The filter directive: `RUST_LOG`, else `<CRATE>_LOGLEVEL`, else the
/// configured level applied to this crate and the HTTP trace layer.
fn filter_directive(configured_level: &str) -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.clone()))
        .unwrap_or_else(|_| {
            format!("{crate_name}={configured_level},tower_http={configured_level}", crate_name = env!("CARGO_CRATE_NAME"))
        })
}

/// Installs the global subscriber: stdout always, plus a log file in the data
/// directory when enabled.
pub fn initialize_logging(config: &LoggingConfig) -> Result<()> {
    let directive = filter_directive(&config.level);
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer.clone())
        .with_target(false)
        .with_filter(EnvFilter::new(&directive));

    let file_layer = if config.file {
        let directory = get_data_dir();
        std::fs::create_dir_all(&directory)?;
        let log_file = std::fs::File::create(directory.join(LOG_FILE.clone()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_timer(timer)
                .with_target(false)
                .with_ansi(false)
                .with_filter(EnvFilter::new(&directive)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

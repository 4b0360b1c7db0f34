pub mod api;
pub mod bracket;
pub mod chrono_codec;
pub mod config;
pub mod desk;
pub mod error;
pub mod grouping;
pub mod persistence;
pub mod ranking;
pub mod rng;
pub mod standings;
pub mod store;
pub mod types;

pub use api::{build_router, ApiState};
pub use desk::RaceDesk;
pub use error::{DeskError, Result};
pub use store::MemoryStore;

use config::*;
use types::*;

use std::{
    fs,
    sync::{Arc, Mutex},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub fn run() {
    load_env_file();

    let config = match load_config_inner() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            apply_env_defaults(AppConfig::default())
        }
    };

    // Initialize tracing with daily file output
    let logs_dir = log_dir(&config);
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "race-desk.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("XCE race desk starting");

    let snapshot = data_path(&config);
    let store = match persistence::load_snapshot(&snapshot) {
        Ok(store) => store,
        Err(e) => {
            error!("snapshot {} unreadable: {e}", snapshot.display());
            return;
        }
    };
    let desk: SharedDesk = Arc::new(Mutex::new(RaceDesk::new(store, &config)));
    let state = ApiState::new(desk, Some(snapshot));
    let app = build_router(state, static_dir(&config));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return;
        }
    };
    runtime.block_on(api::start_server(app, &config.bind_addr));
}

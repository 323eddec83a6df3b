use log::{info, LevelFilter};
use std::env;

pub const DECODE_NAMESPACE: &str = "gpmf_frames::decode";
pub const TIMING_NAMESPACE: &str = "gpmf_frames::timing";
pub const GPS_NAMESPACE: &str = "gpmf_frames::gps";
pub const STORE_NAMESPACE: &str = "gpmf_frames::store";

/// Install `env_logger` for the command line tool. Libraries embedding this
/// crate bring their own logger.
pub fn init_logging(verbose: bool) {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let detail = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    // Log to stderr so stdout stays clean for extracted data.
    env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_millis()
        .format_target(true)
        .target(env_logger::Target::Stderr)
        .filter(Some(DECODE_NAMESPACE), detail)
        .filter(Some(TIMING_NAMESPACE), detail)
        .filter(Some(GPS_NAMESPACE), detail)
        .filter(Some(STORE_NAMESPACE), LevelFilter::Warn)
        .init();

    info!("Logging initialized");
}

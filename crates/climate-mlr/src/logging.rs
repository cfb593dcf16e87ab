//! Log backend set-up.

use log::LevelFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "MLR_LOG";
const DEFAULT_FILTER: &str = "warn,climate_mlr=info";

/// Install an `env_logger` backend filtered by `MLR_LOG`.
///
/// Later calls keep the first backend.
pub fn init() {
    let _ = env_logger::Builder::default()
        .filter_level(LevelFilter::Warn)
        .parse_env(env_logger::Env::default().filter_or(LOG_ENV, DEFAULT_FILTER))
        .try_init();
}

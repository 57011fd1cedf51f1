use std::env;

use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger};

use crate::prelude::*;

pub const LOG_LEVEL_ENV: &str = "LDA_LOG";

/// Resolve the log level: `LDA_LOG` wins, then the `debug` config flag, then `info`.
fn resolve_log_level(debug: bool) -> log::LevelFilter {
    env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
}

pub fn get_local_logger(debug: bool) -> Box<dyn SharedLogger> {
    let config = ConfigBuilder::new()
        .set_time_level(log::LevelFilter::Error)
        .set_target_level(log::LevelFilter::Debug)
        .build();

    simplelog::TermLogger::new(
        resolve_log_level(debug),
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}

pub fn init_local_logger(debug: bool) -> Result<()> {
    CombinedLogger::init(vec![get_local_logger(debug)])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_debug_flag() {
        temp_env::with_var(LOG_LEVEL_ENV, Some("warn"), || {
            assert_eq!(resolve_log_level(true), log::LevelFilter::Warn);
        });
    }

    #[test]
    fn test_debug_flag_fallback() {
        temp_env::with_var(LOG_LEVEL_ENV, None::<&str>, || {
            assert_eq!(resolve_log_level(true), log::LevelFilter::Debug);
            assert_eq!(resolve_log_level(false), log::LevelFilter::Info);
        });
        temp_env::with_var(LOG_LEVEL_ENV, Some("not-a-level"), || {
            assert_eq!(resolve_log_level(false), log::LevelFilter::Info);
        });
    }
}

//! 配置文件的定位与加载.

use lesion_berry::config::{home_config_path, ConfigError, ReviewConfig};
use std::env;
use std::path::PathBuf;

/// 获取配置文件路径.
///
/// 1. 若环境变量 `$PYRAMID_CONFIG` 非空, 则返回其值;
/// 2. 否则, 若 `$HOME/.config/pyramid/config.json` 存在, 返回该路径;
/// 3. 否则返回 `None`.
pub fn config_path_from_env_or_home() -> Option<PathBuf> {
    match env::var("PYRAMID_CONFIG") {
        Ok(p) if !p.is_empty() => Some(PathBuf::from(p)),
        _ => home_config_path().filter(|p| p.is_file()),
    }
}

/// 加载配置. 显式给出的 `path` 优先; 找不到任何配置文件时使用默认配置.
pub fn config_from_env_or_home(path: Option<PathBuf>) -> Result<ReviewConfig, ConfigError> {
    match path.or_else(config_path_from_env_or_home) {
        Some(p) => ReviewConfig::open(p),
        None => {
            log::info!("no config file found, using defaults");
            Ok(ReviewConfig::default())
        }
    }
}

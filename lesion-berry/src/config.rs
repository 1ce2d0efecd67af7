//! JSON 配置文件.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BRUSH_DIAMETER, DEFAULT_CANCEL_GRACE_MS, DEFAULT_REPORT_TOP_N, MAX_BRUSH_DIAMETER,
    MIN_BRUSH_DIAMETER,
};
use crate::pipeline::collab::command::CommandSet;
use crate::pipeline::collab::{CollabError, Collaborators};
use crate::pipeline::{PipelineSettings, TermDictionary};

/// 读取配置时的错误.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 文件不可读.
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        /// 配置文件.
        path: PathBuf,
        /// 原始错误.
        source: std::io::Error,
    },

    /// 文件不是合法的配置 JSON.
    #[error("malformed config {}: {source}", .path.display())]
    Json {
        /// 配置文件.
        path: PathBuf,
        /// 原始错误.
        source: serde_json::Error,
    },

    /// 取值不合理.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// 术语词典不可用.
    #[error("cannot load term dictionary: {0}")]
    Dictionary(#[from] CollabError),
}

/// 画笔设置, 以显示像素为单位.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// 初始直径.
    pub diameter: f64,
    /// 直径下限.
    pub min_diameter: f64,
    /// 直径上限.
    pub max_diameter: f64,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            diameter: DEFAULT_BRUSH_DIAMETER,
            min_diameter: MIN_BRUSH_DIAMETER,
            max_diameter: MAX_BRUSH_DIAMETER,
        }
    }
}

/// 缩放设置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    /// 最小倍率.
    pub min: f64,
    /// 最大倍率.
    pub max: f64,
    /// 滚轮放大一格的乘数.
    pub wheel_in: f64,
    /// 滚轮缩小一格的乘数.
    pub wheel_out: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: 0.1,
            max: 10.0,
            wheel_in: 1.1,
            wheel_out: 0.9,
        }
    }
}

impl ZoomConfig {
    /// 把 `zoom` 截断到 `[min, max]`.
    #[inline]
    pub fn clamp(&self, zoom: f64) -> f64 {
        num::clamp(zoom, self.min, self.max)
    }
}

/// 外部资源文件.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// 特征提取参数文件.
    pub feature_params: Option<PathBuf>,
    /// 术语词典 JSON.
    pub dictionary: Option<PathBuf>,
}

/// 全部配置. 每一项都有默认值, 配置文件只需写出要改动的部分.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// 画笔.
    pub brush: BrushConfig,
    /// 缩放.
    pub zoom: ZoomConfig,
    /// 取消后台任务时的宽限期 (毫秒).
    pub cancel_grace_ms: u64,
    /// 临时掩膜目录. 未设置时使用系统临时目录.
    pub temp_dir: Option<PathBuf>,
    /// 资源文件.
    pub assets: AssetConfig,
    /// 报告中展示的贡献特征个数.
    pub report_top_n: usize,
    /// 外部协作者命令.
    pub commands: CommandSet,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            brush: BrushConfig::default(),
            zoom: ZoomConfig::default(),
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            temp_dir: None,
            assets: AssetConfig::default(),
            report_top_n: DEFAULT_REPORT_TOP_N,
            commands: CommandSet::default(),
        }
    }
}

/// 默认配置文件位置: `$HOME/.config/pyramid/config.json`.
pub fn home_config_path() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.extend([".config", "pyramid", "config.json"]);
    Some(ans)
}

impl ReviewConfig {
    /// 读取并检查配置文件.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// 检查取值之间的约束.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.brush;
        if !(b.min_diameter > 0.0 && b.min_diameter <= b.max_diameter) {
            return Err(ConfigError::Invalid(format!(
                "brush diameter range [{}, {}] is empty",
                b.min_diameter, b.max_diameter
            )));
        }
        let z = &self.zoom;
        if !(z.min > 0.0 && z.min <= z.max) {
            return Err(ConfigError::Invalid(format!(
                "zoom range [{}, {}] is empty",
                z.min, z.max
            )));
        }
        if !(z.wheel_in > 0.0 && z.wheel_out > 0.0) {
            return Err(ConfigError::Invalid("zoom multipliers must be positive".into()));
        }
        Ok(())
    }

    /// 临时文件目录.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// 监督者运行参数. 会读取术语词典; 词典文件缺失时得到空词典.
    pub fn pipeline_settings(&self) -> Result<PipelineSettings, ConfigError> {
        let dictionary = match &self.assets.dictionary {
            Some(path) => TermDictionary::open(path)?,
            None => TermDictionary::default(),
        };
        Ok(PipelineSettings {
            feature_params: self.assets.feature_params.clone(),
            dictionary,
            temp_dir: self.temp_dir(),
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
            report_top_n: self.report_top_n,
        })
    }

    /// 由命令配置组装协作者.
    pub fn collaborators(&self) -> Collaborators {
        self.commands.clone().into_collaborators(self.temp_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "brush": { "diameter": 20 },
                "cancel_grace_ms": 250,
                "commands": { "segment": { "program": "seg", "args": ["{volume}"] } }
            }"#,
        )
        .unwrap();
        let config = ReviewConfig::open(&path).unwrap();
        assert_eq!(config.brush.diameter, 20.0);
        assert_eq!(config.brush.max_diameter, MAX_BRUSH_DIAMETER);
        assert_eq!(config.zoom, ZoomConfig::default());
        assert_eq!(config.report_top_n, DEFAULT_REPORT_TOP_N);
        assert_eq!(config.commands.segment.as_ref().map(|c| c.program.as_str()), Some("seg"));
        assert!(config.commands.classify.is_none());

        let settings = config.pipeline_settings().unwrap();
        assert_eq!(settings.cancel_grace, Duration::from_millis(250));
        assert!(settings.dictionary.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "zoom": { "min": 5, "max": 2 } }"#).unwrap();
        assert!(matches!(ReviewConfig::open(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ReviewConfig::open(&path), Err(ConfigError::Json { .. })));
        assert!(matches!(
            ReviewConfig::open(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_zoom_clamp() {
        let zoom = ZoomConfig::default();
        assert_eq!(zoom.clamp(100.0), 10.0);
        assert_eq!(zoom.clamp(0.0), 0.1);
        assert_eq!(zoom.clamp(2.0), 2.0);
    }

    #[test]
    fn test_home_config_path() {
        if let Some(path) = home_config_path() {
            assert!(path.ends_with(".config/pyramid/config.json"));
        }
    }
}

//! 外部协作者接口.
//!
//! 格式转换、分割、特征提取、分类和报告生成的方法学都不在本 crate 内.
//! 流水线只通过下面这些 trait 调用它们, 并只关心跨越边界的数据形状.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::cancel::CancelToken;
use super::features::FeatureTable;
use crate::data::LoadError;

pub mod command;

/// 协作者可能报告的错误.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 外部程序以非零状态退出.
    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        /// 程序名.
        program: String,
        /// 退出状态描述.
        status: String,
        /// 标准错误输出 (截断后).
        stderr: String,
    },

    /// 输出不是合法 JSON.
    #[error("malformed output: {0}")]
    Json(#[from] serde_json::Error),

    /// 体数据读写失败.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// 缺少必需的特征列.
    #[error("missing required feature columns: {0:?}")]
    MissingColumns(Vec<String>),

    /// 调用因取消而中止.
    #[error("cancelled")]
    Cancelled,

    /// 其它错误.
    #[error("{0}")]
    Message(String),
}

impl CollabError {
    /// 以任意信息构造.
    pub fn msg(message: impl Into<String>) -> Self {
        CollabError::Message(message.into())
    }
}

/// 分类器的原始输出.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawPrediction {
    /// 异常概率, `[0, 1]`.
    pub probability: f64,

    /// 各特征的带符号贡献值, 顺序任意.
    #[serde(default)]
    pub contributions: Vec<(String, f64)>,
}

/// 从影像序列目录读取患者显示名.
pub trait PatientIdentifier: Send + Sync {
    /// 目录缺失、为空或序列不可读时报错.
    fn identify(&self, dicom_dir: &Path, cancel: &CancelToken) -> Result<String, CollabError>;
}

/// 把影像序列转换为标准朝向的体数据文件.
pub trait VolumeConverter: Send + Sync {
    /// 找不到有效序列时报错.
    fn convert(&self, dicom_dir: &Path, cancel: &CancelToken) -> Result<PathBuf, CollabError>;
}

/// 病灶分割.
pub trait Segmenter: Send + Sync {
    /// 内部失败时返回 `Ok(None)`; 流水线把它视为阶段失败.
    fn segment(&self, volume: &Path, cancel: &CancelToken) -> Result<Option<PathBuf>, CollabError>;
}

/// 影像组学特征提取.
pub trait FeatureExtractor: Send + Sync {
    /// 返回单行特征表. 必需特征无法计算时报错.
    fn extract(
        &self,
        volume: &Path,
        mask: &Path,
        params: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<FeatureTable, CollabError>;
}

/// 表格分类器.
pub trait Classifier: Send + Sync {
    /// `features` 已按分类器列顺序排好.
    fn classify(
        &self,
        features: &FeatureTable,
        patient: &str,
        threshold: f64,
        cancel: &CancelToken,
    ) -> Result<RawPrediction, CollabError>;
}

/// 报告生成器.
pub trait ReportGenerator: Send + Sync {
    /// `summary` 是已排序并附带释义的贡献摘要.
    fn generate(&self, summary: &str, cancel: &CancelToken) -> Result<String, CollabError>;
}

/// 报告生成器的加载器. 每个监督者至多成功调用一次.
pub trait ReportModelLoader: Send + Sync {
    /// 加载模型.
    fn load(&self, cancel: &CancelToken) -> Result<Arc<dyn ReportGenerator>, CollabError>;
}

/// 流水线用到的全部协作者.
#[derive(Clone)]
pub struct Collaborators {
    /// 患者信息.
    pub identifier: Arc<dyn PatientIdentifier>,
    /// 格式转换.
    pub converter: Arc<dyn VolumeConverter>,
    /// 分割.
    pub segmenter: Arc<dyn Segmenter>,
    /// 特征提取.
    pub extractor: Arc<dyn FeatureExtractor>,
    /// 分类.
    pub classifier: Arc<dyn Classifier>,
    /// 报告模型加载.
    pub report_loader: Arc<dyn ReportModelLoader>,
}

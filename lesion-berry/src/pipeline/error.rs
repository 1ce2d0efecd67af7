//! 启动与阶段错误.

use std::path::PathBuf;

use super::{Category, Stage};

/// 某一阶段失败: 失败阶段 + 原始错误信息.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct StageError {
    /// 失败的阶段.
    pub stage: Stage,
    /// 原始错误信息.
    pub message: String,
}

impl StageError {
    /// 直接初始化.
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// 输入错误. 立即返回, 流水线不会启动.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// 目录不存在.
    #[error("folder `{}` does not exist", .0.display())]
    MissingFolder(PathBuf),

    /// 路径不是目录.
    #[error("`{}` is not a folder", .0.display())]
    NotAFolder(PathBuf),

    /// 目录为空.
    #[error("folder `{}` is empty", .0.display())]
    EmptyFolder(PathBuf),

    /// 尚未载入病例.
    #[error("no case is loaded")]
    NoCase,

    /// 病例没有对应的影像文件 (例如手工构造的病例).
    #[error("the loaded case has no source volume file")]
    NoSourceVolume,

    /// 没有可供生成报告的贡献度结果.
    #[error("no classification result to report on")]
    NothingToReport,
}

/// 启动任务失败.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    /// 同类别已有任务在运行. 请求被拒绝, 没有任何副作用.
    #[error("a `{0}` task is already running")]
    AlreadyRunning(Category),

    /// 输入错误.
    #[error(transparent)]
    Input(#[from] InputError),

    /// 无法创建工作线程.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

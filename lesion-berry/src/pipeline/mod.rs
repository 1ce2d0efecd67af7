//! 后台多阶段流水线及其监督者.
//!
//! 三个任务类别 (`analyze`, `repredict`, `report`) 各自至多有一个运行中的任务.
//! 每个任务在独立线程上依次执行阶段, 通过每次运行独占的 channel 向协调线程报告进度与终态;
//! 协调线程只需在合适的时机调用 [`PipelineSupervisor::poll`], 从不阻塞在 worker 上.
//!
//! 终态通知 (`Succeeded`/`Failed`/`Cancelled`) 总是该次运行的最后一条通知.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nifti::NiftiHeader;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CANCEL_GRACE_MS, DEFAULT_REPORT_TOP_N};
use crate::data::{CaseVolumes, MaskVolume};

mod cancel;
pub mod collab;
mod error;
mod features;
mod stage;
mod supervisor;
mod worker;

pub use cancel::{CancelToken, TempArtifacts};
pub use error::{InputError, StageError, StartError};
pub use features::{
    AnalysisMode, Contribution, ContributionTable, Decision, FeatureTable, ScoredFeatures,
    TermDictionary,
};
pub use stage::Stage;
pub use supervisor::PipelineSupervisor;

/// 任务类别.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// 从影像序列出发的完整分析.
    Analyze,
    /// 用编辑后的掩膜重新提取特征并分类.
    Repredict,
    /// 生成文字报告.
    Report,
}

impl Category {
    /// 全部类别.
    pub const ALL: [Category; 3] = [Category::Analyze, Category::Repredict, Category::Report];

    /// 类别名.
    pub const fn name(&self) -> &'static str {
        match self {
            Category::Analyze => "analyze",
            Category::Repredict => "repredict",
            Category::Report => "report",
        }
    }

    #[inline]
    pub(crate) const fn slot(&self) -> usize {
        match self {
            Category::Analyze => 0,
            Category::Repredict => 1,
            Category::Report => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown task category `{s}`"))
    }
}

/// 类别状态: `Idle -> Running -> (Succeeded | Failed | Cancelled) -> Idle`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum TaskStatus {
    /// 空闲.
    #[default]
    Idle,
    /// 运行中.
    Running,
    /// 上一次运行成功, 终态通知已交付.
    Succeeded,
    /// 上一次运行失败, 终态通知已交付.
    Failed,
    /// 上一次运行被取消, 终态通知已交付.
    Cancelled,
}

impl TaskStatus {
    /// 是否为终态.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 运行编号, 在一个监督者内单调递增.
pub type RunId = u64;

/// worker 发出的事件.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// 进度文本.
    Progress(String),
    /// 某阶段完成. 同一次运行内按阶段顺序交付.
    StageCompleted(Stage),
    /// 成功, 携带结果.
    Succeeded(Payload),
    /// 失败, 携带失败阶段与原始信息.
    Failed(StageError),
    /// 已取消, 不携带结果.
    Cancelled,
}

impl TaskEvent {
    /// 是否为终态事件.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Succeeded(_) | TaskEvent::Failed(_) | TaskEvent::Cancelled
        )
    }

    /// 对应的终态状态. 非终态事件返回 `None`.
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            TaskEvent::Succeeded(_) => Some(TaskStatus::Succeeded),
            TaskEvent::Failed(_) => Some(TaskStatus::Failed),
            TaskEvent::Cancelled => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// 交付给协调线程的一条通知.
#[derive(Debug, Clone)]
pub struct Notice {
    /// 类别.
    pub category: Category,
    /// 运行编号.
    pub run: RunId,
    /// 事件.
    pub event: TaskEvent,
}

/// `analyze` 的输入.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// 影像序列目录.
    pub dicom_dir: PathBuf,
    /// 分析模式.
    pub mode: AnalysisMode,
}

/// `repredict` 的输入: 当前病例掩膜的一份快照及其来源.
#[derive(Debug, Clone)]
pub struct RepredictRequest {
    /// 影像文件.
    pub volume_path: PathBuf,
    /// 写出临时掩膜时使用的参考 header, 即影像的 header.
    pub reference: Box<NiftiHeader>,
    /// 编辑后的掩膜.
    pub mask: MaskVolume,
    /// 患者显示名.
    pub patient: String,
    /// 分析模式.
    pub mode: AnalysisMode,
}

/// `report` 的输入.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// 已排序的贡献表.
    pub contributions: ContributionTable,
}

/// 启动任务的请求. 类别由变体决定.
#[derive(Debug, Clone)]
pub enum PipelineRequest {
    /// 完整分析.
    Analyze(AnalyzeRequest),
    /// 再分类.
    Repredict(RepredictRequest),
    /// 报告.
    Report(ReportRequest),
}

impl PipelineRequest {
    /// 请求的类别.
    pub fn category(&self) -> Category {
        match self {
            PipelineRequest::Analyze(_) => Category::Analyze,
            PipelineRequest::Repredict(_) => Category::Repredict,
            PipelineRequest::Report(_) => Category::Report,
        }
    }
}

/// `analyze` 的结果. 病例数据已读入新分配的内存, 由协调线程发布.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// 患者显示名.
    pub patient: String,
    /// 转换得到的影像文件.
    pub volume_path: PathBuf,
    /// 分割得到的掩膜文件.
    pub mask_path: PathBuf,
    /// 影像与掩膜. 发布到病例仓库时被移走, 之后为 `None`.
    pub case: Option<CaseVolumes>,
    /// 分类结果.
    pub scored: ScoredFeatures,
}

/// `repredict` 的结果.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    /// 患者显示名.
    pub patient: String,
    /// 分类结果.
    pub scored: ScoredFeatures,
}

/// 成功结果.
#[derive(Debug, Clone)]
pub enum Payload {
    /// `analyze`.
    Analysis(Box<AnalysisOutcome>),
    /// `repredict`.
    Prediction(PredictionOutcome),
    /// `report`.
    Report(String),
}

/// 监督者的运行参数.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 特征提取参数文件.
    pub feature_params: Option<PathBuf>,
    /// 报告用的术语词典.
    pub dictionary: TermDictionary,
    /// 临时掩膜目录.
    pub temp_dir: PathBuf,
    /// 取消后等待 worker 自行退出的时长.
    pub cancel_grace: Duration,
    /// 报告摘要中的特征个数.
    pub report_top_n: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            feature_params: None,
            dictionary: TermDictionary::default(),
            temp_dir: std::env::temp_dir(),
            cancel_grace: Duration::from_millis(DEFAULT_CANCEL_GRACE_MS),
            report_top_n: DEFAULT_REPORT_TOP_N,
        }
    }
}

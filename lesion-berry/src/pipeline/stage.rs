//! 各任务类别的阶段序列.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Category;

/// 流水线中的单个阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// 读取患者显示名.
    IdentifyPatient,
    /// 序列转换为标准朝向的体数据文件.
    ConvertToVolume,
    /// 病灶分割.
    Segment,
    /// 影像组学特征提取.
    ExtractFeatures,
    /// 分类与贡献度排序.
    Classify,
    /// 把产出的影像与掩膜读入新分配的内存, 交给协调线程发布.
    LoadCase,
    /// 把编辑后的掩膜写入临时文件.
    PersistEditedMask,
    /// 删除临时掩膜.
    RemoveTempMask,
    /// 惰性加载报告模型.
    LoadReportModel,
    /// 生成报告文本.
    GenerateReport,
}

impl Stage {
    /// 阶段名, kebab-case.
    pub const fn name(&self) -> &'static str {
        match self {
            Stage::IdentifyPatient => "identify-patient",
            Stage::ConvertToVolume => "convert-to-volume",
            Stage::Segment => "segment",
            Stage::ExtractFeatures => "extract-features",
            Stage::Classify => "classify",
            Stage::LoadCase => "load-case",
            Stage::PersistEditedMask => "persist-edited-mask",
            Stage::RemoveTempMask => "remove-temp-mask",
            Stage::LoadReportModel => "load-report-model",
            Stage::GenerateReport => "generate-report",
        }
    }

    /// 阶段开始时发出的进度文本.
    pub const fn progress_text(&self) -> &'static str {
        match self {
            Stage::IdentifyPatient => "Reading patient information...",
            Stage::ConvertToVolume => "Converting image series to volume...",
            Stage::Segment => "Segmenting lesion...",
            Stage::ExtractFeatures => "Extracting radiomics features...",
            Stage::Classify => "Classifying...",
            Stage::LoadCase => "Loading volume and mask...",
            Stage::PersistEditedMask => "Saving edited mask...",
            Stage::RemoveTempMask => "Removing temporary mask...",
            Stage::LoadReportModel => "Loading report model...",
            Stage::GenerateReport => "Generating report...",
        }
    }

    /// `category` 的完整阶段序列, 按执行顺序.
    pub fn plan(category: Category) -> &'static [Stage] {
        match category {
            Category::Analyze => &[
                Stage::IdentifyPatient,
                Stage::ConvertToVolume,
                Stage::Segment,
                Stage::ExtractFeatures,
                Stage::Classify,
                Stage::LoadCase,
            ],
            Category::Repredict => &[
                Stage::PersistEditedMask,
                Stage::ExtractFeatures,
                Stage::Classify,
                Stage::RemoveTempMask,
            ],
            Category::Report => &[Stage::LoadReportModel, Stage::GenerateReport],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! 交互式掩膜编辑: 笔画缓冲与回写.
//!
//! 笔画始终记录在显示空间中, 直到 [`MaskEditApplier`] 应用时才栅格化并经逆投影写回体数据.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::SliceKey;

mod apply;
mod buffer;
mod region;

pub use apply::{AppliedEdit, ApplyOutcome, MaskEditApplier};
pub use buffer::ContourEditBuffer;
pub use region::{Disk, MergedRegion, Stroke};

/// 编辑模式. 只影响应用时的合并语义, 不影响已记录的笔画.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    /// 把笔画覆盖的背景像素标为病灶.
    Add,

    /// 把笔画覆盖的像素清为背景.
    #[default]
    Erase,
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditMode::Add => f.write_str("add"),
            EditMode::Erase => f.write_str("erase"),
        }
    }
}

impl FromStr for EditMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(EditMode::Add),
            "erase" => Ok(EditMode::Erase),
            _ => Err(format!("unknown edit mode `{s}`, expected add or erase")),
        }
    }
}

/// 显示空间中的点. `x` 为列方向, `y` 为行方向, 均以像素为单位.
///
/// 像素 `(row, col)` 的中心位于 `(col + 0.5, row + 0.5)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// 列方向坐标.
    pub x: f64,
    /// 行方向坐标.
    pub y: f64,
}

impl Point {
    /// 直接初始化.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 像素 `(row, col)` 的中心.
    #[inline]
    pub fn pixel_center((row, col): crate::Idx2d) -> Self {
        Self::new(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// 与 `other` 距离的平方.
    #[inline]
    pub fn dist2(&self, other: &Point) -> f64 {
        let (dx, dy) = (self.x - other.x, self.y - other.y);
        dx * dx + dy * dy
    }
}

/// 应用编辑时的错误.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// 尚未载入任何病例.
    #[error("no case is loaded")]
    NoCase,

    /// 笔画记录于另一张切片. 这是调用方的契约错误, 编辑不会被应用.
    #[error("edit region was drawn on {region} but the current slice is {current}")]
    StaleRegion {
        /// 笔画所在切片.
        region: SliceKey,
        /// 当前切片.
        current: SliceKey,
    },

    /// 撤销用的切片快照无法生成或还原.
    #[error("undo snapshot is unusable: {0}")]
    Snapshot(String),
}

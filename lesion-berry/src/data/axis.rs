//! 三个正交观察方向.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Idx3d;

/// 观察方向. 决定哪一个体数据维度是 "切片索引维", 以及剩余两维构成的显示平面.
///
/// 体数据按 `[X, Y, Z]` 索引:
///
/// | 方向 | 切片索引维 | 体平面形状 |
/// |---|---|---|
/// | `Axial` | Z | `(X, Y)` |
/// | `Coronal` | Y | `(X, Z)` |
/// | `Sagittal` | X | `(Y, Z)` |
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewAxis {
    /// 水平面.
    #[default]
    Axial,

    /// 冠状面.
    Coronal,

    /// 矢状面.
    Sagittal,
}

impl ViewAxis {
    /// 全部方向, 顺序固定.
    pub const ALL: [ViewAxis; 3] = [ViewAxis::Axial, ViewAxis::Coronal, ViewAxis::Sagittal];

    /// 切片索引维在 `[X, Y, Z]` 中的下标.
    #[inline]
    pub const fn slice_dim(&self) -> usize {
        match self {
            ViewAxis::Axial => 2,
            ViewAxis::Coronal => 1,
            ViewAxis::Sagittal => 0,
        }
    }

    /// 在形状为 `shape` 的体数据中, 沿该方向的切片个数.
    #[inline]
    pub const fn extent(&self, (x, y, z): Idx3d) -> usize {
        match self {
            ViewAxis::Axial => z,
            ViewAxis::Coronal => y,
            ViewAxis::Sagittal => x,
        }
    }

    /// 体平面 (未经显示变换) 的形状.
    #[inline]
    pub const fn plane_shape(&self, (x, y, z): Idx3d) -> (usize, usize) {
        match self {
            ViewAxis::Axial => (x, y),
            ViewAxis::Coronal => (x, z),
            ViewAxis::Sagittal => (y, z),
        }
    }

    /// 方向名, 全小写.
    pub const fn name(&self) -> &'static str {
        match self {
            ViewAxis::Axial => "axial",
            ViewAxis::Coronal => "coronal",
            ViewAxis::Sagittal => "sagittal",
        }
    }
}

impl fmt::Display for ViewAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 无法识别的方向名.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown view axis `{0}`, expected axial, coronal or sagittal")]
pub struct ParseAxisError(String);

impl FromStr for ViewAxis {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "axial" => Ok(ViewAxis::Axial),
            "coronal" => Ok(ViewAxis::Coronal),
            "sagittal" => Ok(ViewAxis::Sagittal),
            _ => Err(ParseAxisError(s.to_string())),
        }
    }
}

/// 一个具体的切片: 方向 + 切片索引.
///
/// 编辑会话绑定在某个 `SliceKey` 上; 两个 key 不相等即说明视图已切换.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SliceKey {
    /// 方向.
    pub axis: ViewAxis,

    /// 切片索引, 范围 `[0, extent - 1]`.
    pub index: usize,
}

impl SliceKey {
    /// 直接初始化.
    #[inline]
    pub const fn new(axis: ViewAxis, index: usize) -> Self {
        Self { axis, index }
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.axis, self.index)
    }
}

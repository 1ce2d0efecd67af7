//! 圆盘并集表示的编辑区域.

use ndarray::{Array2, ArrayViewMut1, Axis};

use super::Point;
use crate::data::SliceKey;
use crate::Idx2d;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 显示空间中的一个实心圆盘.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Disk {
    center: Point,
    radius: f64,
}

impl Disk {
    /// 以 `center` 为圆心、`diameter` 为直径.
    #[inline]
    pub fn new(center: Point, diameter: f64) -> Self {
        Self {
            center,
            radius: diameter / 2.0,
        }
    }

    /// 圆心.
    #[inline]
    pub fn center(&self) -> Point {
        self.center
    }

    /// 半径.
    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// 点 `p` 是否在圆盘内 (含边界).
    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        self.center.dist2(p) <= self.radius * self.radius
    }

    /// 在宽度为 `w` 的第 `row` 行上, 可能被覆盖的列区间 (闭区间). 与该行不相交时返回 `None`.
    ///
    /// 返回的区间只是候选, 每个像素仍需以 [`Disk::contains`] 判定.
    fn candidate_cols(&self, row: usize, w: usize) -> Option<Idx2d> {
        let dy = row as f64 + 0.5 - self.center.y;
        let r2 = self.radius * self.radius;
        if w == 0 || dy * dy > r2 {
            return None;
        }
        let half = (r2 - dy * dy).sqrt();
        let lo = (self.center.x - half - 0.5).floor() - 1.0;
        let hi = (self.center.x + half - 0.5).ceil() + 1.0;
        if hi < 0.0 || lo > (w - 1) as f64 {
            return None;
        }
        Some((lo.max(0.0) as usize, (hi as usize).min(w - 1)))
    }
}

/// 单条笔画: 沿拖动轨迹采样的圆盘序列. 笔画进行中只追加.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stroke {
    disks: Vec<Disk>,
}

impl Stroke {
    /// 以一个圆盘开始.
    #[inline]
    pub fn seeded(disk: Disk) -> Self {
        Self { disks: vec![disk] }
    }

    /// 追加一个圆盘.
    #[inline]
    pub fn push(&mut self, disk: Disk) {
        self.disks.push(disk);
    }

    /// 是否不含任何圆盘.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// 全部圆盘.
    #[inline]
    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }
}

/// 若干笔画的并集, 即一个待应用的编辑区域.
///
/// 区域记录了它所绘制的切片; 应用到其它切片会被拒绝.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedRegion {
    disks: Vec<Disk>,
    slice: Option<SliceKey>,
}

impl MergedRegion {
    /// 合并 `strokes`. `slice` 为笔画所在切片.
    pub fn from_strokes<'a, I>(strokes: I, slice: Option<SliceKey>) -> Self
    where
        I: IntoIterator<Item = &'a Stroke>,
    {
        let disks = strokes
            .into_iter()
            .flat_map(|s| s.disks().iter().copied())
            .collect();
        Self { disks, slice }
    }

    /// 区域是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// 区域所在切片.
    #[inline]
    pub fn slice(&self) -> Option<SliceKey> {
        self.slice
    }

    /// 组成区域的全部圆盘.
    #[inline]
    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    /// 点 `p` 是否在区域内.
    pub fn contains(&self, p: &Point) -> bool {
        self.disks.iter().any(|d| d.contains(p))
    }

    /// 栅格化为形状 `(h, w)` 的布尔掩膜: 像素中心在区域内时置位.
    pub fn rasterize(&self, (h, w): Idx2d) -> Array2<bool> {
        let mut out = Array2::from_elem((h, w), false);
        if self.is_empty() {
            return out;
        }
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                out.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(r, row)| self.fill_row(r, row));
            } else {
                for (r, row) in out.axis_iter_mut(Axis(0)).enumerate() {
                    self.fill_row(r, row);
                }
            }
        }
        out
    }

    fn fill_row(&self, r: usize, mut row: ArrayViewMut1<'_, bool>) {
        let w = row.len();
        for disk in &self.disks {
            let Some((lo, hi)) = disk.candidate_cols(r, w) else {
                continue;
            };
            for c in lo..=hi {
                if !row[c] && disk.contains(&Point::pixel_center((r, c))) {
                    row[c] = true;
                }
            }
        }
    }
}

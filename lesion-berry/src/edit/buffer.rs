//! 笔画缓冲.

use ndarray::Array2;

use super::region::{Disk, MergedRegion, Stroke};
use super::{EditMode, Point};
use crate::consts::{DEFAULT_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER, MIN_BRUSH_DIAMETER};
use crate::data::SliceKey;
use crate::Idx2d;

/// 一个编辑会话的笔画缓冲, 绑定到单个切片.
///
/// 只在协调线程上使用. 笔画以圆盘并集保存, 直到应用前才栅格化.
#[derive(Clone, Debug)]
pub struct ContourEditBuffer {
    diameter: f64,
    diameter_range: (f64, f64),
    mode: EditMode,
    strokes: Vec<Stroke>,
    current: Option<Stroke>,
    slice: Option<SliceKey>,
}

impl Default for ContourEditBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BRUSH_DIAMETER, (MIN_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER))
    }
}

impl ContourEditBuffer {
    /// 以画笔直径 `diameter` 创建. 直径总被截断到 `[min, max]`.
    pub fn new(diameter: f64, (min, max): (f64, f64)) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            diameter: num::clamp(diameter, min, max),
            diameter_range: (min, max),
            mode: EditMode::default(),
            strokes: Vec::new(),
            current: None,
            slice: None,
        }
    }

    /// 编辑模式.
    #[inline]
    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// 修改编辑模式. 已有笔画保留.
    #[inline]
    pub fn set_mode(&mut self, mode: EditMode) {
        self.mode = mode;
    }

    /// 画笔直径.
    #[inline]
    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    /// 修改画笔直径, 只影响之后落下的圆盘. 返回截断后的实际值.
    pub fn set_diameter(&mut self, diameter: f64) -> f64 {
        let (min, max) = self.diameter_range;
        if diameter.is_finite() {
            self.diameter = num::clamp(diameter, min, max);
        }
        self.diameter
    }

    /// 当前绑定的切片.
    #[inline]
    pub fn slice(&self) -> Option<SliceKey> {
        self.slice
    }

    /// 绑定到 `key`. 若此前绑定的是另一张切片, 丢弃全部笔画并返回 `true`.
    pub fn rebind(&mut self, key: SliceKey) -> bool {
        let stale = matches!(self.slice, Some(old) if old != key) && self.has_strokes();
        if stale {
            log::warn!(
                "discarding {} stroke(s) drawn on {:?}, view moved to {key}",
                self.stroke_count(),
                self.slice
            );
            self.clear();
        }
        self.slice = Some(key);
        stale
    }

    /// 开始新笔画, 在 `point` 处落下一个圆盘. 未结束的上一笔被先提交.
    pub fn begin_stroke(&mut self, point: Point) {
        if self.current.is_some() {
            self.end_stroke();
        }
        self.current = Some(Stroke::seeded(Disk::new(point, self.diameter)));
    }

    /// 在 `point` 处向当前笔画并入一个圆盘. 没有进行中的笔画时忽略.
    pub fn extend_stroke(&mut self, point: Point) {
        if let Some(stroke) = self.current.as_mut() {
            stroke.push(Disk::new(point, self.diameter));
        }
    }

    /// 提交当前笔画. 没有进行中的笔画或笔画为空时什么都不做.
    pub fn end_stroke(&mut self) {
        if let Some(stroke) = self.current.take() {
            if !stroke.is_empty() {
                self.strokes.push(stroke);
            }
        }
    }

    /// 丢弃全部已提交和进行中的笔画. 模式、直径和绑定切片保留.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.current = None;
    }

    /// 已提交笔画数.
    #[inline]
    pub fn stroke_count(&self) -> usize {
        self.strokes.len()
    }

    /// 是否存在已提交或进行中的笔画.
    #[inline]
    pub fn has_strokes(&self) -> bool {
        !self.strokes.is_empty() || self.current.is_some()
    }

    /// 全部已提交笔画的并集. 不包含进行中的笔画.
    pub fn merged_region(&self) -> MergedRegion {
        MergedRegion::from_strokes(&self.strokes, self.slice)
    }

    /// 将 [`ContourEditBuffer::merged_region`] 栅格化为形状 `shape` 的布尔掩膜.
    pub fn rasterize(&self, shape: Idx2d) -> Array2<bool> {
        self.merged_region().rasterize(shape)
    }
}

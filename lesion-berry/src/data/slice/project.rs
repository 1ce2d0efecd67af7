//! 体平面与显示空间之间的精确几何映射.
//!
//! 显示变换由 "逆时针旋转 k 个直角" 和随后的 "镜像" 组成, 二者都是像素网格上的置换,
//! 因此正变换与逆变换互为精确逆映射, 不存在插值误差.
//!
//! 坐标一律按 `(row, col)` 表示.

use ndarray::{s, Array2, ArrayView2, ArrayView3, Axis};

use crate::data::{SliceKey, ViewAxis};
use crate::Idx2d;

/// 镜像方式. 在旋转之后施加.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Mirror {
    /// 不镜像.
    None,

    /// 左右翻转 (列反序).
    #[default]
    LeftRight,

    /// 上下翻转 (行反序).
    UpDown,
}

impl Mirror {
    /// 对形状为 `(h, w)` 的平面上的点施加镜像. 镜像是自逆的.
    #[inline]
    const fn map(&self, (h, w): Idx2d, (r, c): Idx2d) -> Idx2d {
        match self {
            Mirror::None => (r, c),
            Mirror::LeftRight => (r, w - 1 - c),
            Mirror::UpDown => (h - 1 - r, c),
        }
    }

    #[inline]
    fn view<'a, T>(&self, v: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        match self {
            Mirror::None => v,
            Mirror::LeftRight => v.slice_move(s![.., ..;-1]),
            Mirror::UpDown => v.slice_move(s![..;-1, ..]),
        }
    }
}

/// 逆时针旋转 90 度. `(h, w)` 上的 `(i, j)` 变为 `(w, h)` 上的 `(w - 1 - j, i)`.
#[inline]
fn rot_ccw<T>(v: ArrayView2<'_, T>) -> ArrayView2<'_, T> {
    v.reversed_axes().slice_move(s![..;-1, ..])
}

/// 顺时针旋转 90 度. `(h, w)` 上的 `(i, j)` 变为 `(w, h)` 上的 `(j, h - 1 - i)`.
#[inline]
fn rot_cw<T>(v: ArrayView2<'_, T>) -> ArrayView2<'_, T> {
    v.slice_move(s![..;-1, ..]).reversed_axes()
}

/// 单个方向的显示变换: 先逆时针旋转 `quarter_turns` 个直角, 再镜像.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DisplayTransform {
    quarter_turns: u8,
    mirror: Mirror,
}

impl Default for DisplayTransform {
    /// 旋转一次后左右翻转. 体数据以 `[X, Y, Z]` 索引时, 这使得水平面以常规放射学方位显示.
    fn default() -> Self {
        Self::new(1, Mirror::LeftRight)
    }
}

impl DisplayTransform {
    /// 构造. `quarter_turns` 按 4 取模.
    #[inline]
    pub const fn new(quarter_turns: u8, mirror: Mirror) -> Self {
        Self {
            quarter_turns: quarter_turns % 4,
            mirror,
        }
    }

    /// 不做任何变换.
    #[inline]
    pub const fn identity() -> Self {
        Self::new(0, Mirror::None)
    }

    /// 逆时针旋转的直角个数, `0..4`.
    #[inline]
    pub const fn quarter_turns(&self) -> u8 {
        self.quarter_turns
    }

    /// 镜像方式.
    #[inline]
    pub const fn mirror(&self) -> Mirror {
        self.mirror
    }

    /// 形状为 `plane` 的体平面变换后的显示形状.
    #[inline]
    pub const fn display_shape(&self, (h, w): Idx2d) -> Idx2d {
        if self.quarter_turns % 2 == 0 {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// 正变换视图, 零拷贝.
    pub fn forward_view<'a, T>(&self, plane: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        let mut v = plane;
        for _ in 0..self.quarter_turns {
            v = rot_ccw(v);
        }
        self.mirror.view(v)
    }

    /// 逆变换视图, 零拷贝: 先撤销镜像, 再撤销旋转.
    pub fn inverse_view<'a, T>(&self, display: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        let mut v = self.mirror.view(display);
        for _ in 0..self.quarter_turns {
            v = rot_cw(v);
        }
        v
    }

    /// 体平面 (形状 `plane`) 上的点 `p` 在显示空间中的位置.
    pub fn to_display(&self, plane: Idx2d, p: Idx2d) -> Idx2d {
        let (mut shape, mut p) = (plane, p);
        for _ in 0..self.quarter_turns {
            let (_, w) = shape;
            p = (w - 1 - p.1, p.0);
            shape = (shape.1, shape.0);
        }
        self.mirror.map(shape, p)
    }

    /// 显示空间中的点 `q` 在体平面 (形状 `plane`) 中的位置. [`DisplayTransform::to_display`] 的精确逆.
    pub fn to_plane(&self, plane: Idx2d, q: Idx2d) -> Idx2d {
        let mut shape = self.display_shape(plane);
        let mut q = self.mirror.map(shape, q);
        for _ in 0..self.quarter_turns {
            let (h, _) = shape;
            q = (q.1, h - 1 - q.0);
            shape = (shape.1, shape.0);
        }
        q
    }
}

/// 纯几何: 按方向把体数据切片投影到显示空间, 以及精确的反投影.
///
/// 三个方向各持有一个 [`DisplayTransform`]. 默认三个方向都是 "旋转一次 + 左右翻转".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SliceProjector {
    transforms: [DisplayTransform; 3],
}

#[inline]
const fn slot(axis: ViewAxis) -> usize {
    match axis {
        ViewAxis::Axial => 0,
        ViewAxis::Coronal => 1,
        ViewAxis::Sagittal => 2,
    }
}

impl SliceProjector {
    /// 为每个方向指定变换, 顺序为 `[Axial, Coronal, Sagittal]`.
    #[inline]
    pub const fn new(transforms: [DisplayTransform; 3]) -> Self {
        Self { transforms }
    }

    /// 获取 `axis` 方向的变换.
    #[inline]
    pub const fn transform(&self, axis: ViewAxis) -> DisplayTransform {
        self.transforms[slot(axis)]
    }

    /// 形状为 `shape` 的体数据在 `axis` 方向上切片的显示形状.
    #[inline]
    pub const fn display_shape(&self, axis: ViewAxis, shape: crate::Idx3d) -> Idx2d {
        self.transform(axis).display_shape(axis.plane_shape(shape))
    }

    /// 取出 `key` 指定的切片并变换到显示空间.
    ///
    /// 切片索引越界时 panic: 调用方应先经 [`crate::store::VolumeStore`] 截断.
    pub fn project<T: Clone>(&self, data: ArrayView3<'_, T>, key: SliceKey) -> Array2<T> {
        let dim = key.axis.slice_dim();
        let extent = data.len_of(Axis(dim));
        assert!(
            key.index < extent,
            "切片索引 {} 越界, {} 方向仅有 {} 层",
            key.index,
            key.axis,
            extent
        );
        let plane = data.index_axis(Axis(dim), key.index);
        self.transform(key.axis).forward_view(plane).to_owned()
    }

    /// 将显示空间中的整幅切片变换回 `axis` 方向的体平面朝向.
    pub fn unproject<T: Clone>(&self, axis: ViewAxis, display: ArrayView2<'_, T>) -> Array2<T> {
        self.transform(axis).inverse_view(display).to_owned()
    }

    /// 体平面点到显示点. `plane` 为体平面形状.
    #[inline]
    pub fn to_display(&self, axis: ViewAxis, plane: Idx2d, p: Idx2d) -> Idx2d {
        self.transform(axis).to_display(plane, p)
    }

    /// 显示点到体平面点. `plane` 为体平面形状.
    #[inline]
    pub fn to_plane(&self, axis: ViewAxis, plane: Idx2d, q: Idx2d) -> Idx2d {
        self.transform(axis).to_plane(plane, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn all_transforms() -> Vec<DisplayTransform> {
        let mut out = Vec::new();
        for k in 0..4 {
            for m in [Mirror::None, Mirror::LeftRight, Mirror::UpDown] {
                out.push(DisplayTransform::new(k, m));
            }
        }
        out
    }

    #[test]
    fn test_point_round_trip_every_axis() {
        let shape = (7, 5, 3);
        for t in all_transforms() {
            let projector = SliceProjector::new([t; 3]);
            for axis in ViewAxis::ALL {
                let plane = axis.plane_shape(shape);
                let display = projector.display_shape(axis, shape);
                for r in 0..plane.0 {
                    for c in 0..plane.1 {
                        let q = projector.to_display(axis, plane, (r, c));
                        assert!(q.0 < display.0 && q.1 < display.1);
                        assert_eq!(projector.to_plane(axis, plane, q), (r, c), "{t:?} {axis}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_point_map_agrees_with_array_map() {
        let plane = Array2::from_shape_fn((4, 6), |(r, c)| r * 10 + c);
        for t in all_transforms() {
            let display = t.forward_view(plane.view());
            assert_eq!(display.dim(), t.display_shape((4, 6)));
            for ((r, c), v) in plane.indexed_iter() {
                assert_eq!(display[t.to_display((4, 6), (r, c))], *v, "{t:?}");
            }
            assert_eq!(t.inverse_view(display), plane.view());
        }
    }

    #[test]
    fn test_default_is_rotate_then_mirror() {
        // 逆时针旋转一次再左右翻转, 等价于 D[r][c] = A[m-1-c][n-1-r].
        let a = Array2::from_shape_fn((3, 5), |(r, c)| r * 10 + c);
        let t = DisplayTransform::default();
        let d = t.forward_view(a.view());
        assert_eq!(d.dim(), (5, 3));
        for r in 0..5 {
            for c in 0..3 {
                assert_eq!(d[(r, c)], a[(3 - 1 - c, 5 - 1 - r)]);
            }
        }
    }

    #[test]
    fn test_project_then_unproject() {
        let data = Array3::from_shape_fn((6, 4, 3), |(x, y, z)| x * 100 + y * 10 + z);
        let projector = SliceProjector::default();
        for axis in ViewAxis::ALL {
            for index in 0..axis.extent((6, 4, 3)) {
                let key = SliceKey::new(axis, index);
                let display = projector.project(data.view(), key);
                assert_eq!(display.dim(), projector.display_shape(axis, (6, 4, 3)));
                let back = projector.unproject(axis, display.view());
                assert_eq!(back.view(), data.index_axis(Axis(axis.slice_dim()), index));
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_project_rejects_out_of_range() {
        let data = Array3::<u8>::zeros((2, 2, 2));
        SliceProjector::default().project(data.view(), SliceKey::new(ViewAxis::Axial, 2));
    }
}

use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, Axis, ShapeBuilder};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::{Idx2d, Idx3d};

pub mod axis;
pub mod slice;
pub mod window;

pub use axis::{SliceKey, ViewAxis};
pub use window::CtWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 加载或写出体数据时的错误.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// nifti 读写错误.
    #[error("nifti I/O error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 数据不是三维的.
    #[error("expected a 3D volume, found {0} dimensions")]
    NotThreeDimensional(usize),

    /// 掩膜与影像形状不一致. 这是致命的加载错误.
    #[error("mask shape {mask:?} does not match volume shape {volume:?}")]
    ShapeMismatch {
        /// 影像形状 `(X, Y, Z)`.
        volume: Idx3d,
        /// 掩膜形状 `(X, Y, Z)`.
        mask: Idx3d,
    },
}

/// 读取 nifti 文件, 得到 header 和以 `[X, Y, Z]` 索引的数据.
///
/// nifti 数据段本身以 X 变化最快的顺序存储, 因此这里直接以 Fortran
/// 布局接管原始缓冲区, 不做任何额外的重排.
macro_rules! read_xyz {
    ($path: expr, $elem: ty) => {{
        let obj = ReaderOptions::new().read_file($path)?;
        let header = Box::new(obj.header().clone());
        let data = obj.into_volume().into_ndarray::<$elem>()?;
        let ndim = data.ndim();
        if ndim != 3 {
            return Err(LoadError::NotThreeDimensional(ndim));
        }
        let (x, y, z) = (data.shape()[0], data.shape()[1], data.shape()[2]);

        // [X, Y, Z] -> 行优先的 [Z, Y, X], 其缓冲区恰好是 [X, Y, Z] 的列优先存储.
        let data = data.permuted_axes([2, 1, 0].as_slice());
        let raw: Vec<$elem> = if data.is_standard_layout() {
            data.into_raw_vec()
        } else {
            data.iter().copied().collect()
        };
        let data = Array3::<$elem>::from_shape_vec((x, y, z).f(), raw)
            .map_err(|_| LoadError::NotThreeDimensional(ndim))?;
        (header, data)
    }};
}

/// 为手工构造的数据生成一个最小 header.
fn synthetic_header((x, y, z): Idx3d, spacing: [f32; 3]) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    header.dim = [3, x as u16, y as u16, z as u16, 1, 1, 1, 1];
    let [_, px, py, pz, ..] = &mut header.pixdim;
    (*px, *py, *pz) = (spacing[0], spacing[1], spacing[2]);
    header.sform_code = 1;
    header.srow_x = [spacing[0], 0.0, 0.0, 0.0];
    header.srow_y = [0.0, spacing[1], 0.0, 0.0];
    header.srow_z = [0.0, 0.0, spacing[2], 0.0];
    header.intent_name[..4].copy_from_slice(b"fake");
    header
}

/// 3D nifti 体数据 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状 `(X, Y, Z)`.
    fn shape(&self) -> Idx3d;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (x, y, z) = self.shape();
        x * y * z
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (x0, y0, z0): &Idx3d) -> bool {
        let (x, y, z) = self.shape();
        *x0 < x && *y0 < y && *z0 < z
    }

    /// 沿 `axis` 方向的切片个数.
    #[inline]
    fn extent(&self, axis: ViewAxis) -> usize {
        axis.extent(self.shape())
    }

    /// 获取单个体素分辨率 `[X, Y, Z]`, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, x, y, z, ..] = self.header().pixdim;
        [x as f64, y as f64, z as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 体素索引到世界坐标的仿射矩阵 (行优先 4x4).
    ///
    /// 优先使用 sform; 若 sform 未设置, 则退化为仅由体素分辨率构成的对角矩阵.
    fn affine(&self) -> [[f64; 4]; 4] {
        let h = self.header();
        if h.sform_code > 0 {
            let row = |r: [f32; 4]| r.map(f64::from);
            [row(h.srow_x), row(h.srow_y), row(h.srow_z), [0.0, 0.0, 0.0, 1.0]]
        } else {
            let [x, y, z] = self.pix_dim();
            [
                [x, 0.0, 0.0, 0.0],
                [0.0, y, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        }
    }
}

/// nii 格式 3D 影像, 包括 header 和强度值. 强度值以 `f32` 保存, 按 `[X, Y, Z]` 索引.
///
/// 除整体替换外, 载入后不可变.
#[derive(Debug, Clone)]
pub struct Volume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for Volume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 打开 nii 文件格式的 3D 影像. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let (header, data) = read_xyz!(path.as_ref(), f32);
        Ok(Self { header, data })
    }

    /// 根据裸数据直接创建影像. `data` 按 `[X, Y, Z]` 索引,
    /// `spacing` 为 `[X, Y, Z]` 方向的体素分辨率.
    ///
    /// # 注意
    ///
    /// 生成的 header 只包含形状、分辨率和对角仿射, 你应仅将其用于实验或测试.
    pub fn fake(data: Array3<f32>, spacing: [f32; 3]) -> Self {
        let header = synthetic_header(data.dim(), spacing);
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获取 `axis` 方向第 `index` 层的体平面 (未经显示变换).
    ///
    /// 当 `index` 越界时 panic.
    #[inline]
    pub fn plane(&self, axis: ViewAxis, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(axis.slice_dim()), index)
    }

    /// 判断该结构是否是由 `fake` 手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }
}

/// nii 格式 3D 病灶掩膜. 标签值以 `u8` 保存 (0 为背景, 其它为前景类别), 按 `[X, Y, Z]` 索引.
///
/// 掩膜是唯一允许就地修改的体数据, 且只能通过 [`crate::edit::MaskEditApplier`] 修改.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for MaskVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for MaskVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MaskVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MaskVolume {
    /// 打开 nii 文件格式的 3D 掩膜.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let (header, data) = read_xyz!(path.as_ref(), u8);
        Ok(Self { header, data })
    }

    /// 根据裸标签数据直接创建掩膜, 规则同 [`Volume::fake`].
    pub fn fake(data: Array3<u8>, spacing: [f32; 3]) -> Self {
        let header = synthetic_header(data.dim(), spacing);
        Self { header, data }
    }

    /// 创建与 `volume` 形状和 header 一致的全背景掩膜.
    pub fn zeros_like(volume: &Volume) -> Self {
        Self {
            header: volume.header.clone(),
            data: Array3::from_elem(volume.shape().f(), MASK_BACKGROUND),
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// 获取 `axis` 方向第 `index` 层的体平面 (未经显示变换).
    ///
    /// 当 `index` 越界时 panic.
    #[inline]
    pub fn plane(&self, axis: ViewAxis, index: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(axis.slice_dim()), index)
    }

    /// 用 `plane` 覆写 `axis` 方向第 `index` 层.
    ///
    /// 形状不符时 panic: 这是调用方的契约错误.
    pub(crate) fn write_plane(&mut self, axis: ViewAxis, index: usize, plane: ArrayView2<'_, u8>) {
        let mut dst = self.data.index_axis_mut(Axis(axis.slice_dim()), index);
        assert_eq!(dst.dim(), plane.dim(), "回写切片与掩膜平面形状不一致");
        dst.assign(&plane);
    }

    /// 获取 3D 掩膜中前景体素个数.
    #[inline]
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 沿 `axis` 方向, 含有前景体素的切片索引范围 `[min, max]`. 全背景时返回 `None`.
    pub fn foreground_span(&self, axis: ViewAxis) -> Option<Idx2d> {
        let mut span: Option<Idx2d> = None;
        for (i, plane) in self.data.axis_iter(Axis(axis.slice_dim())).enumerate() {
            if plane.iter().any(|p| is_foreground(*p)) {
                span = Some(match span {
                    Some((lo, _)) => (lo, i),
                    None => (i, i),
                });
            }
        }
        span
    }

    /// 以 `reference` 的 header (仿射、方向等元信息原样保留) 将掩膜写入 `path`.
    ///
    /// 派生掩膜必须和其来源影像共享同一仿射, 否则下游的空间对齐会失效.
    pub fn save_with_header<P: AsRef<Path>>(
        &self,
        path: P,
        reference: &NiftiHeader,
    ) -> Result<(), LoadError> {
        WriterOptions::new(path.as_ref())
            .reference_header(reference)
            .write_nifti(&self.data)?;
        Ok(())
    }
}

/// 一个病例的影像与掩膜.
///
/// 两者形状一致由构造函数保证; 该结构只能整体替换, 不存在 "只更新了一半" 的状态.
#[derive(Debug, Clone)]
pub struct CaseVolumes {
    volume: Volume,
    mask: MaskVolume,
}

impl CaseVolumes {
    /// 组合影像与掩膜. 形状不一致时返回 [`LoadError::ShapeMismatch`].
    pub fn new(volume: Volume, mask: MaskVolume) -> Result<Self, LoadError> {
        if volume.shape() != mask.shape() {
            return Err(LoadError::ShapeMismatch {
                volume: volume.shape(),
                mask: mask.shape(),
            });
        }
        Ok(Self { volume, mask })
    }

    /// 分别打开 nii 文件格式的影像和对应掩膜. 任一文件打开失败或形状不一致时返回 `Err`.
    pub fn open(volume_path: impl AsRef<Path>, mask_path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let volume = Volume::open(volume_path.as_ref())?;
        let mask = MaskVolume::open(mask_path.as_ref())?;
        Self::new(volume, mask)
    }

    /// 影像.
    #[inline]
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// 掩膜.
    #[inline]
    pub fn mask(&self) -> &MaskVolume {
        &self.mask
    }

    /// 掩膜的可变引用. 仅供编辑应用路径使用.
    #[inline]
    pub(crate) fn mask_mut(&mut self) -> &mut MaskVolume {
        &mut self.mask
    }

    /// 数据形状 `(X, Y, Z)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.volume.shape()
    }
}

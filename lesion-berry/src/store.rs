//! 当前病例的读模型.

use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::data::slice::SliceProjector;
use crate::data::{CaseVolumes, LoadError, MaskVolume, NiftiHeaderAttr, SliceKey, ViewAxis, Volume};

/// 一个已载入的病例及其来源信息.
#[derive(Debug, Clone)]
pub struct LoadedCase {
    volumes: CaseVolumes,
    volume_path: Option<PathBuf>,
    patient: Option<String>,
}

impl LoadedCase {
    /// 组合病例数据与来源信息.
    pub fn new(volumes: CaseVolumes, volume_path: Option<PathBuf>, patient: Option<String>) -> Self {
        Self {
            volumes,
            volume_path,
            patient,
        }
    }

    /// 影像与掩膜.
    #[inline]
    pub fn volumes(&self) -> &CaseVolumes {
        &self.volumes
    }

    /// 影像文件路径. 手工构造的病例没有路径.
    #[inline]
    pub fn volume_path(&self) -> Option<&Path> {
        self.volume_path.as_deref()
    }

    /// 患者显示名.
    #[inline]
    pub fn patient(&self) -> Option<&str> {
        self.patient.as_deref()
    }
}

/// 独占持有当前病例的影像与掩膜.
///
/// 病例只能整体替换 ([`VolumeStore::publish`]); 掩膜只能经编辑应用路径原地修改.
/// 该结构只在协调线程上使用, 后台任务从不直接触碰它.
#[derive(Debug, Default)]
pub struct VolumeStore {
    case: Option<LoadedCase>,
}

impl VolumeStore {
    /// 空仓库.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文件载入影像与掩膜并整体替换当前病例. 失败时当前病例保持不变.
    pub fn load_files(
        &mut self,
        volume_path: impl AsRef<Path>,
        mask_path: impl AsRef<Path>,
        patient: Option<String>,
    ) -> Result<(), LoadError> {
        let volume_path = volume_path.as_ref();
        let volumes = CaseVolumes::open(volume_path, mask_path.as_ref())?;
        self.publish(LoadedCase::new(volumes, Some(volume_path.to_path_buf()), patient));
        Ok(())
    }

    /// 整体替换当前病例.
    pub fn publish(&mut self, case: LoadedCase) {
        log::info!(
            "publishing case {:?} with shape {:?}",
            case.patient().unwrap_or("<unnamed>"),
            case.volumes.shape()
        );
        self.case = Some(case);
    }

    /// 是否已有病例.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.case.is_some()
    }

    /// 当前病例.
    #[inline]
    pub fn case(&self) -> Option<&LoadedCase> {
        self.case.as_ref()
    }

    /// 当前影像.
    #[inline]
    pub fn volume(&self) -> Option<&Volume> {
        self.case.as_ref().map(|c| c.volumes.volume())
    }

    /// 当前掩膜.
    #[inline]
    pub fn mask(&self) -> Option<&MaskVolume> {
        self.case.as_ref().map(|c| c.volumes.mask())
    }

    /// 当前掩膜的可变引用. 仅供编辑应用路径使用.
    #[inline]
    pub(crate) fn mask_mut(&mut self) -> Option<&mut MaskVolume> {
        self.case.as_mut().map(|c| c.volumes.mask_mut())
    }

    /// 沿 `axis` 的切片个数.
    #[inline]
    pub fn extent(&self, axis: ViewAxis) -> Option<usize> {
        self.volume().map(|v| v.extent(axis))
    }

    /// 把任意请求的索引截断到 `[0, extent - 1]`. 截断, 从不回绕.
    pub fn clamp_index(&self, axis: ViewAxis, requested: i64) -> Option<usize> {
        let extent = self.extent(axis)?;
        if extent == 0 {
            return None;
        }
        let hi = i64::try_from(extent - 1).unwrap_or(i64::MAX);
        Some(num::clamp(requested, 0, hi) as usize)
    }

    /// 载入病例后默认显示的切片: 含病灶切片范围向外扩一层后的中点. 掩膜为空时取体数据中点.
    pub fn initial_index(&self, axis: ViewAxis) -> Option<usize> {
        let extent = self.extent(axis)?;
        let mask = self.mask()?;
        let index = match mask.foreground_span(axis) {
            Some((lo, hi)) => (lo.saturating_sub(1) + (hi + 1).min(extent - 1)) / 2,
            None => extent / 2,
        };
        Some(index)
    }

    /// `key` 处影像切片, 已变换到显示空间.
    pub fn image_slice(&self, projector: &SliceProjector, key: SliceKey) -> Option<Array2<f32>> {
        self.volume().map(|v| projector.project(v.data(), key))
    }

    /// `key` 处掩膜切片, 已变换到显示空间.
    pub fn mask_slice(&self, projector: &SliceProjector, key: SliceKey) -> Option<Array2<u8>> {
        self.mask().map(|m| projector.project(m.data(), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::gray::MASK_LESION;
    use crate::test_utils::synthetic_case;
    use nifti::writer::WriterOptions;

    #[test]
    fn test_clamp_index() {
        let mut store = VolumeStore::new();
        assert_eq!(store.clamp_index(ViewAxis::Axial, 3), None);
        store.publish(LoadedCase::new(synthetic_case((10, 12, 7)), None, None));
        let extent = store.extent(ViewAxis::Axial).unwrap() as i64;
        assert_eq!(store.clamp_index(ViewAxis::Axial, -1), Some(0));
        assert_eq!(store.clamp_index(ViewAxis::Axial, extent), Some(6));
        assert_eq!(store.clamp_index(ViewAxis::Axial, i64::MAX), Some(6));
        assert_eq!(store.clamp_index(ViewAxis::Coronal, 5), Some(5));
        assert_eq!(store.clamp_index(ViewAxis::Sagittal, 100), Some(9));
    }

    #[test]
    fn test_initial_index() {
        let mut case = synthetic_case((8, 8, 20));
        let mut store = VolumeStore::new();
        store.publish(LoadedCase::new(case.clone(), None, None));
        assert_eq!(store.initial_index(ViewAxis::Axial), Some(10));

        case.mask_mut()[(2, 2, 4)] = MASK_LESION;
        case.mask_mut()[(2, 2, 9)] = MASK_LESION;
        store.publish(LoadedCase::new(case, None, Some("p".into())));
        // [3, 10] 的中点.
        assert_eq!(store.initial_index(ViewAxis::Axial), Some(6));
        assert_eq!(store.case().and_then(|c| c.patient()), Some("p"));
    }

    #[test]
    fn test_load_files_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let volume_path = dir.path().join("ct.nii.gz");
        let mask_path = dir.path().join("mask.nii.gz");
        let bad_mask_path = dir.path().join("bad.nii.gz");

        let case = synthetic_case((6, 5, 4));
        WriterOptions::new(&volume_path)
            .reference_header(case.volume().header())
            .write_nifti(&case.volume().data())
            .unwrap();
        case.mask()
            .save_with_header(&mask_path, case.volume().header())
            .unwrap();
        synthetic_case((6, 5, 3))
            .mask()
            .save_with_header(&bad_mask_path, case.volume().header())
            .unwrap();

        let mut store = VolumeStore::new();
        store.load_files(&volume_path, &mask_path, None).unwrap();
        assert_eq!(store.volume().map(|v| v.shape()), Some((6, 5, 4)));
        assert_eq!(store.case().and_then(|c| c.volume_path()), Some(volume_path.as_path()));

        let err = store.load_files(&volume_path, &bad_mask_path, None).unwrap_err();
        assert!(matches!(err, LoadError::ShapeMismatch { .. }));
        assert_eq!(store.mask().map(|m| m.shape()), Some((6, 5, 4)));
    }

    #[test]
    fn test_slices_follow_projector() {
        let mut store = VolumeStore::new();
        store.publish(LoadedCase::new(synthetic_case((6, 5, 4)), None, None));
        let projector = SliceProjector::default();
        let key = SliceKey::new(ViewAxis::Coronal, 2);
        let image = store.image_slice(&projector, key).unwrap();
        let mask = store.mask_slice(&projector, key).unwrap();
        assert_eq!(image.dim(), projector.display_shape(ViewAxis::Coronal, (6, 5, 4)));
        assert_eq!(image.dim(), mask.dim());
    }
}

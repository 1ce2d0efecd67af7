//! 把显示空间中的编辑区域合并回掩膜体数据.

use ndarray::Zip;

use super::region::MergedRegion;
use super::{EditError, EditMode};
use crate::consts::gray::{is_background, MASK_BACKGROUND, MASK_LESION};
use crate::data::slice::{CompactPlane, SliceProjector};
use crate::data::{MaskVolume, SliceKey};

/// 一次应用的结果.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// 编辑区域为空, 掩膜未被触碰.
    NothingToApply,

    /// 编辑已写回.
    Applied(AppliedEdit),
}

/// 一次已写回的编辑, 保存了写回前的体平面以便撤销.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEdit {
    key: SliceKey,
    mode: EditMode,
    changed: usize,
    before: CompactPlane,
}

impl AppliedEdit {
    /// 被修改的切片.
    #[inline]
    pub fn key(&self) -> SliceKey {
        self.key
    }

    /// 编辑模式.
    #[inline]
    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// 值发生变化的体素个数.
    #[inline]
    pub fn changed(&self) -> usize {
        self.changed
    }

    /// 把切片恢复到本次编辑之前.
    pub fn undo(&self, mask: &mut MaskVolume) -> Result<(), EditError> {
        let plane = self
            .before
            .decompress()
            .map_err(|e| EditError::Snapshot(e.to_string()))?;
        mask.write_plane(self.key.axis, self.key.index, plane.view());
        log::info!("undid {} edit on {}", self.mode, self.key);
        Ok(())
    }
}

/// 掩膜编辑的唯一写回路径.
///
/// 流程: 取显示空间切片, 栅格化编辑区域, 按模式合并, 逆投影, 覆写体平面.
#[derive(Copy, Clone, Debug, Default)]
pub struct MaskEditApplier {
    projector: SliceProjector,
}

impl MaskEditApplier {
    /// 使用 `projector` 的显示变换.
    #[inline]
    pub fn new(projector: SliceProjector) -> Self {
        Self { projector }
    }

    /// 把 `region` 按 `mode` 合并到 `mask` 的 `key` 切片.
    ///
    /// - `Add`: 区域内的背景体素写为病灶, 已有的其它前景类别保留;
    /// - `Erase`: 区域内的体素写为背景.
    ///
    /// 区域记录的切片与 `key` 不同时返回 [`EditError::StaleRegion`], 掩膜不变.
    /// `key.index` 越界时 panic.
    pub fn apply(
        &self,
        mask: &mut MaskVolume,
        key: SliceKey,
        region: &MergedRegion,
        mode: EditMode,
    ) -> Result<ApplyOutcome, EditError> {
        if let Some(drawn) = region.slice() {
            if drawn != key {
                log::warn!("refusing to apply edits drawn on {drawn} to {key}");
                return Err(EditError::StaleRegion {
                    region: drawn,
                    current: key,
                });
            }
        }
        if region.is_empty() {
            log::warn!("nothing to apply on {key}");
            return Ok(ApplyOutcome::NothingToApply);
        }

        let mut display = self.projector.project(mask.data(), key);
        let edit = region.rasterize(display.dim());
        assert_eq!(edit.dim(), display.dim(), "编辑掩膜与显示切片形状不一致");

        let mut changed = 0usize;
        Zip::from(&mut display).and(&edit).for_each(|p, &hit| {
            if !hit {
                return;
            }
            let next = match mode {
                EditMode::Add if is_background(*p) => MASK_LESION,
                EditMode::Add => *p,
                EditMode::Erase => MASK_BACKGROUND,
            };
            if next != *p {
                *p = next;
                changed += 1;
            }
        });

        let before = CompactPlane::compress(mask.plane(key.axis, key.index))
            .map_err(|e| EditError::Snapshot(e.to_string()))?;
        let plane = self.projector.unproject(key.axis, display.view());
        mask.write_plane(key.axis, key.index, plane.view());
        log::info!("applied {mode} edit on {key}: {changed} voxel(s) changed");

        Ok(ApplyOutcome::Applied(AppliedEdit {
            key,
            mode,
            changed,
            before,
        }))
    }
}

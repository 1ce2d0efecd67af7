//! 协调线程上的交互会话.
//!
//! [`Workbench`] 独占病例仓库、显示投影、交互状态和流水线监督者. 宿主 (窗口或命令行) 只通过这里的窄接口
//! 操作核心, 并定期调用 [`Workbench::pump`] 收取后台任务的通知.

use std::path::PathBuf;

use image::RgbImage;

use crate::config::{BrushConfig, ConfigError, ReviewConfig, ZoomConfig};
use crate::data::slice::{OverlayRenderer, SliceProjector};
use crate::data::{CtWindow, NiftiHeaderAttr, SliceKey, ViewAxis};
use crate::edit::{AppliedEdit, ApplyOutcome, ContourEditBuffer, EditError, EditMode, MaskEditApplier, Point};
use crate::pipeline::{
    AnalysisMode, AnalyzeRequest, Category, InputError, Notice, Payload, PipelineRequest,
    PipelineSupervisor, RepredictRequest, ReportRequest, RunId, ScoredFeatures, StartError, TaskEvent,
    TaskStatus,
};
use crate::store::{LoadedCase, VolumeStore};

/// 患者名未知时使用的显示名.
const UNKNOWN_PATIENT: &str = "Unknown";

/// 当前视图、切片、缩放与编辑会话. 只在协调线程上存在.
#[derive(Debug, Clone)]
pub struct InteractionState {
    /// 视图方向.
    pub axis: ViewAxis,
    /// 切片索引. 未载入病例时为 0.
    pub index: usize,
    /// 缩放倍率.
    pub zoom: f64,
    /// 当前切片上的笔画.
    pub buffer: ContourEditBuffer,
    history: Vec<AppliedEdit>,
}

impl InteractionState {
    fn new(brush: &BrushConfig) -> Self {
        Self {
            axis: ViewAxis::default(),
            index: 0,
            zoom: 1.0,
            buffer: ContourEditBuffer::new(brush.diameter, (brush.min_diameter, brush.max_diameter)),
            history: Vec::new(),
        }
    }

    /// 当前切片.
    #[inline]
    pub fn key(&self) -> SliceKey {
        SliceKey::new(self.axis, self.index)
    }

    /// 可撤销的编辑次数.
    #[inline]
    pub fn undo_depth(&self) -> usize {
        self.history.len()
    }
}

/// 宿主面对的全部操作.
pub struct Workbench {
    store: VolumeStore,
    projector: SliceProjector,
    applier: MaskEditApplier,
    state: InteractionState,
    supervisor: PipelineSupervisor,
    zoom_limits: ZoomConfig,
    window: Option<CtWindow>,
    last_scored: Option<ScoredFeatures>,
    last_report: Option<String>,
}

/// 启动任务时宿主提供的输入. 其余输入 (掩膜、贡献表) 取自当前会话.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// 对影像序列目录做完整分析.
    Analyze {
        /// 影像序列目录.
        dicom_dir: PathBuf,
        /// 分析模式.
        mode: AnalysisMode,
    },
    /// 以当前掩膜重新分类.
    Repredict {
        /// 分析模式.
        mode: AnalysisMode,
    },
    /// 以最近一次分类的贡献表生成报告.
    Report,
}

impl PipelineInput {
    /// 对应的类别.
    pub fn category(&self) -> Category {
        match self {
            PipelineInput::Analyze { .. } => Category::Analyze,
            PipelineInput::Repredict { .. } => Category::Repredict,
            PipelineInput::Report => Category::Report,
        }
    }
}

impl Workbench {
    /// 组装工作台.
    pub fn new(supervisor: PipelineSupervisor, brush: &BrushConfig, zoom: ZoomConfig) -> Self {
        let projector = SliceProjector::default();
        Self {
            store: VolumeStore::new(),
            projector,
            applier: MaskEditApplier::new(projector),
            state: InteractionState::new(brush),
            supervisor,
            zoom_limits: zoom,
            window: None,
            last_scored: None,
            last_report: None,
        }
    }

    /// 按配置组装, 协作者为配置中的外部命令.
    pub fn from_config(config: &ReviewConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let supervisor = PipelineSupervisor::new(config.collaborators(), config.pipeline_settings()?);
        Ok(Self::new(supervisor, &config.brush, config.zoom.clone()))
    }

    /// 病例仓库.
    #[inline]
    pub fn store(&self) -> &VolumeStore {
        &self.store
    }

    /// 交互状态.
    #[inline]
    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// 流水线监督者.
    #[inline]
    pub fn supervisor(&self) -> &PipelineSupervisor {
        &self.supervisor
    }

    /// 最近一次分类结果.
    #[inline]
    pub fn last_scored(&self) -> Option<&ScoredFeatures> {
        self.last_scored.as_ref()
    }

    /// 最近一次生成的报告.
    #[inline]
    pub fn last_report(&self) -> Option<&str> {
        self.last_report.as_deref()
    }

    /// 渲染时使用固定 CT 窗口. `None` 表示逐切片归一化.
    pub fn set_window(&mut self, window: Option<CtWindow>) {
        self.window = window;
    }

    /// 直接发布一个病例, 视图跳到病灶所在范围的中间层, 撤销历史清空.
    pub fn publish(&mut self, case: LoadedCase) {
        self.store.publish(case);
        self.state.history.clear();
        self.state.buffer.clear();
        self.state.index = self.store.initial_index(self.state.axis).unwrap_or(0);
        self.state.buffer.rebind(self.state.key());
    }

    /// 从文件载入病例. 失败时当前病例不变.
    pub fn open_case(
        &mut self,
        volume: impl AsRef<std::path::Path>,
        mask: impl AsRef<std::path::Path>,
        patient: Option<String>,
    ) -> Result<(), crate::data::LoadError> {
        let volumes = crate::data::CaseVolumes::open(volume.as_ref(), mask.as_ref())?;
        self.publish(LoadedCase::new(volumes, Some(volume.as_ref().to_path_buf()), patient));
        Ok(())
    }

    fn rebind(&mut self) {
        let key = self.state.key();
        self.state.buffer.rebind(key);
    }

    /// 切换视图方向. 切片索引跳到新方向上的初始层.
    pub fn select_view(&mut self, axis: ViewAxis) {
        if axis == self.state.axis {
            return;
        }
        self.state.axis = axis;
        self.state.index = self.store.initial_index(axis).unwrap_or(0);
        self.rebind();
    }

    /// 相对滚动切片, 结果截断到合法范围. 返回新的索引.
    pub fn scroll_slice(&mut self, delta: i64) -> usize {
        let requested = (self.state.index as i64).saturating_add(delta);
        self.set_slice(requested)
    }

    /// 跳到指定切片, 结果截断到合法范围. 返回新的索引.
    pub fn set_slice(&mut self, requested: i64) -> usize {
        if let Some(index) = self.store.clamp_index(self.state.axis, requested) {
            self.state.index = index;
            self.rebind();
        }
        self.state.index
    }

    /// 当前缩放乘以 `factor`, 截断到配置范围. 返回新的倍率.
    pub fn zoom(&mut self, factor: f64) -> f64 {
        if factor.is_finite() && factor > 0.0 {
            self.state.zoom = self.zoom_limits.clamp(self.state.zoom * factor);
        }
        self.state.zoom
    }

    /// 滚轮缩放一格.
    pub fn zoom_wheel(&mut self, zoom_in: bool) -> f64 {
        let factor = if zoom_in {
            self.zoom_limits.wheel_in
        } else {
            self.zoom_limits.wheel_out
        };
        self.zoom(factor)
    }

    /// 设置编辑模式. 不影响已有笔画.
    pub fn set_edit_mode(&mut self, mode: EditMode) {
        self.state.buffer.set_mode(mode);
    }

    /// 设置画笔直径. 返回截断后的直径.
    pub fn set_brush_diameter(&mut self, diameter: f64) -> f64 {
        self.state.buffer.set_diameter(diameter)
    }

    /// 在显示坐标 `point` 处开始一笔.
    pub fn begin_stroke(&mut self, point: Point) {
        self.rebind();
        self.state.buffer.begin_stroke(point);
    }

    /// 延伸当前笔画.
    pub fn extend_stroke(&mut self, point: Point) {
        self.state.buffer.extend_stroke(point);
    }

    /// 结束当前笔画.
    pub fn end_stroke(&mut self) {
        self.state.buffer.end_stroke();
    }

    /// 丢弃全部笔画.
    pub fn clear_edits(&mut self) {
        self.state.buffer.clear();
    }

    /// 把已提交的笔画写回当前切片. 写回成功后清空笔画并记入撤销历史.
    pub fn apply_edits(&mut self) -> Result<ApplyOutcome, EditError> {
        let key = self.state.key();
        let region = self.state.buffer.merged_region();
        let mode = self.state.buffer.mode();
        let mask = self.store.mask_mut().ok_or(EditError::NoCase)?;
        let outcome = self.applier.apply(mask, key, &region, mode)?;
        if let ApplyOutcome::Applied(edit) = &outcome {
            self.state.history.push(edit.clone());
            self.state.buffer.clear();
        }
        Ok(outcome)
    }

    /// 撤销最近一次写回. 没有可撤销的编辑时返回 `Ok(None)`.
    pub fn undo_last_edit(&mut self) -> Result<Option<SliceKey>, EditError> {
        let Some(edit) = self.state.history.pop() else {
            return Ok(None);
        };
        let mask = self.store.mask_mut().ok_or(EditError::NoCase)?;
        edit.undo(mask)?;
        Ok(Some(edit.key()))
    }

    fn request(&self, input: PipelineInput) -> Result<PipelineRequest, InputError> {
        Ok(match input {
            PipelineInput::Analyze { dicom_dir, mode } => {
                PipelineRequest::Analyze(AnalyzeRequest { dicom_dir, mode })
            }
            PipelineInput::Repredict { mode } => {
                let case = self.store.case().ok_or(InputError::NoCase)?;
                let volume_path = case.volume_path().ok_or(InputError::NoSourceVolume)?;
                let volumes = case.volumes();
                PipelineRequest::Repredict(RepredictRequest {
                    volume_path: volume_path.to_path_buf(),
                    reference: Box::new(volumes.volume().header().clone()),
                    mask: volumes.mask().clone(),
                    patient: case.patient().unwrap_or(UNKNOWN_PATIENT).to_string(),
                    mode,
                })
            }
            PipelineInput::Report => {
                let scored = self.last_scored.as_ref().ok_or(InputError::NothingToReport)?;
                PipelineRequest::Report(ReportRequest {
                    contributions: scored.contributions.clone(),
                })
            }
        })
    }

    /// 启动后台任务. 同类别已在运行时被拒绝.
    pub fn start_pipeline(&mut self, input: PipelineInput) -> Result<RunId, StartError> {
        let request = self.request(input)?;
        self.supervisor.start(request)
    }

    /// 取消同类别的运行 (若有) 后启动.
    pub fn restart_pipeline(&mut self, input: PipelineInput) -> Result<RunId, StartError> {
        let request = self.request(input)?;
        self.supervisor.restart(request)
    }

    /// 取消后台任务. 没有运行中的任务时返回 `false`.
    pub fn cancel_pipeline(&mut self, category: Category) -> bool {
        self.supervisor.cancel(category)
    }

    /// `category` 的当前状态.
    #[inline]
    pub fn pipeline_status(&self, category: Category) -> TaskStatus {
        self.supervisor.status(category)
    }

    /// 收取后台通知并处理成功结果: 分析结果发布到病例仓库, 分类结果与报告留作后用.
    ///
    /// 返回全部通知, 供宿主展示进度与错误. 已发布的病例数据从通知中移走.
    pub fn pump(&mut self) -> Vec<Notice> {
        let mut notices = self.supervisor.poll();
        self.absorb(&mut notices);
        notices
    }

    /// 阻塞直到 `category` 结束 (或超时), 并像 [`Workbench::pump`] 一样处理结果.
    pub fn wait(&mut self, category: Category, timeout: std::time::Duration) -> Vec<Notice> {
        let mut notices = self.supervisor.wait_terminal(category, timeout);
        self.absorb(&mut notices);
        notices
    }

    fn absorb(&mut self, notices: &mut [Notice]) {
        for notice in notices.iter_mut() {
            match &mut notice.event {
                TaskEvent::Succeeded(Payload::Analysis(outcome)) => {
                    if let Some(volumes) = outcome.case.take() {
                        let case = LoadedCase::new(
                            volumes,
                            Some(outcome.volume_path.clone()),
                            Some(outcome.patient.clone()),
                        );
                        self.publish(case);
                    }
                    self.last_scored = Some(outcome.scored.clone());
                }
                TaskEvent::Succeeded(Payload::Prediction(outcome)) => {
                    self.last_scored = Some(outcome.scored.clone());
                }
                TaskEvent::Succeeded(Payload::Report(text)) => {
                    self.last_report = Some(text.clone());
                }
                TaskEvent::Failed(e) => {
                    log::error!("{} #{} failed at {}: {}", notice.category, notice.run, e.stage, e.message);
                }
                _ => {}
            }
        }
    }

    /// 渲染当前切片 (影像、掩膜轮廓, 按当前缩放). 未载入病例时返回 `None`.
    pub fn render_current(&self) -> Option<RgbImage> {
        let key = self.state.key();
        let image = self.store.image_slice(&self.projector, key)?;
        let mask = self.store.mask_slice(&self.projector, key)?;
        let mut renderer = OverlayRenderer::default().with_zoom(self.state.zoom);
        if let Some(window) = self.window {
            renderer = renderer.with_window(window);
        }
        Some(renderer.render(image.view(), mask.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::gray::MASK_LESION;
    use crate::pipeline::{PipelineSettings, Stage};
    use crate::test_utils::{fake_collaborators, synthetic_case, write_case_files, Script};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn workbench(script: Arc<Script>, dir: &std::path::Path) -> Workbench {
        let dir = dir.join("pipeline");
        std::fs::create_dir_all(&dir).unwrap();
        let (volume, mask) = write_case_files(&dir, (24, 20, 12));
        let settings = PipelineSettings {
            temp_dir: dir,
            ..PipelineSettings::default()
        };
        let supervisor = PipelineSupervisor::new(fake_collaborators(script, volume, mask), settings);
        Workbench::new(supervisor, &BrushConfig::default(), ZoomConfig::default())
    }

    fn dicom_dir(root: &std::path::Path) -> PathBuf {
        let dir = root.join("series");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("IM0001.dcm"), b"stub").unwrap();
        dir
    }

    #[test]
    fn test_scroll_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        assert_eq!(wb.scroll_slice(5), 0);

        wb.publish(LoadedCase::new(synthetic_case((10, 12, 7)), None, None));
        assert_eq!(wb.state().index, 3);
        for _ in 0..20 {
            wb.scroll_slice(1);
        }
        assert_eq!(wb.state().index, 6);
        assert_eq!(wb.scroll_slice(-100), 0);
        assert_eq!(wb.set_slice(7), 6);
        assert_eq!(wb.set_slice(-1), 0);

        wb.select_view(ViewAxis::Sagittal);
        assert_eq!(wb.state().index, 5);
        assert_eq!(wb.set_slice(42), 9);
    }

    #[test]
    fn test_zoom_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        assert_eq!(wb.zoom(2.0), 2.0);
        assert_eq!(wb.zoom(100.0), 10.0);
        assert_eq!(wb.zoom(f64::NAN), 10.0);
        assert_eq!(wb.zoom(0.0001), 0.1);
        assert!((wb.zoom_wheel(true) - 0.11).abs() < 1e-12);
    }

    #[test]
    fn test_view_change_discards_strokes() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        wb.publish(LoadedCase::new(synthetic_case((16, 16, 8)), None, None));
        wb.begin_stroke(Point::new(8.0, 8.0));
        wb.end_stroke();
        assert!(wb.state().buffer.has_strokes());
        wb.scroll_slice(1);
        assert!(!wb.state().buffer.has_strokes());

        wb.begin_stroke(Point::new(8.0, 8.0));
        wb.end_stroke();
        wb.select_view(ViewAxis::Coronal);
        assert!(!wb.state().buffer.has_strokes());
        assert_eq!(wb.apply_edits(), Ok(ApplyOutcome::NothingToApply));
    }

    #[test]
    fn test_apply_and_undo() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        assert_eq!(wb.apply_edits(), Err(EditError::NoCase));

        wb.publish(LoadedCase::new(synthetic_case((32, 32, 8)), None, None));
        wb.set_edit_mode(EditMode::Add);
        assert_eq!(wb.set_brush_diameter(100.0), 50.0);
        assert_eq!(wb.set_brush_diameter(10.0), 10.0);
        wb.begin_stroke(Point::new(16.0, 16.0));
        wb.end_stroke();
        let ApplyOutcome::Applied(edit) = wb.apply_edits().unwrap() else {
            panic!("expected an applied edit");
        };
        assert_eq!(edit.changed(), 80);
        assert!(!wb.state().buffer.has_strokes());
        assert_eq!(wb.store().mask().unwrap().count_foreground(), 80);
        assert_eq!(wb.state().undo_depth(), 1);

        let key = wb.state().key();
        assert_eq!(wb.undo_last_edit(), Ok(Some(key)));
        assert_eq!(wb.store().mask().unwrap().count_foreground(), 0);
        assert_eq!(wb.undo_last_edit(), Ok(None));
    }

    #[test]
    fn test_render_current_follows_zoom() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        assert!(wb.render_current().is_none());
        wb.publish(LoadedCase::new(synthetic_case((12, 10, 6)), None, None));
        wb.zoom(2.0);
        let img = wb.render_current().unwrap();
        let (h, w) = wb.projector.display_shape(ViewAxis::Axial, (12, 10, 6));
        assert_eq!((img.height(), img.width()), (2 * h as u32, 2 * w as u32));
    }

    #[test]
    fn test_analyze_publishes_case_then_repredict_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let script = Arc::new(Script::default());
        let mut wb = workbench(Arc::clone(&script), dir.path());

        assert_eq!(
            wb.start_pipeline(PipelineInput::Repredict {
                mode: AnalysisMode::Standard
            }),
            Err(StartError::Input(InputError::NoCase))
        );
        assert_eq!(
            wb.start_pipeline(PipelineInput::Report),
            Err(StartError::Input(InputError::NothingToReport))
        );

        wb.start_pipeline(PipelineInput::Analyze {
            dicom_dir: dicom_dir(dir.path()),
            mode: AnalysisMode::Standard,
        })
        .unwrap();
        wb.wait(Category::Analyze, WAIT);
        assert!(wb.store().is_loaded());
        assert_eq!(wb.store().case().and_then(|c| c.patient()), Some("Patient"));
        // 病灶位于 z = 6, 7.
        assert_eq!(wb.state().index, 6);
        assert!(wb.last_scored().is_some());

        wb.set_edit_mode(EditMode::Add);
        wb.begin_stroke(Point::new(5.0, 5.0));
        wb.end_stroke();
        wb.apply_edits().unwrap();
        assert!(wb.store().mask().unwrap().count_foreground() > 2);

        wb.start_pipeline(PipelineInput::Repredict {
            mode: AnalysisMode::HighSensitivity,
        })
        .unwrap();
        let notices = wb.wait(Category::Repredict, WAIT);
        assert!(notices
            .iter()
            .any(|n| matches!(n.event, TaskEvent::StageCompleted(Stage::RemoveTempMask))));
        let seen = script.seen_masks();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].existed);
        assert!(!seen[1].path.exists());
        assert_eq!(
            wb.last_scored().map(|s| s.threshold),
            Some(AnalysisMode::HighSensitivity.threshold())
        );

        wb.start_pipeline(PipelineInput::Report).unwrap();
        wb.wait(Category::Report, WAIT);
        assert!(wb.last_report().unwrap().starts_with("Report"));
        assert_eq!(wb.pipeline_status(Category::Report), TaskStatus::Succeeded);
        assert!(!wb.cancel_pipeline(Category::Report));
    }

    #[test]
    fn test_analysis_case_moves_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        wb.start_pipeline(PipelineInput::Analyze {
            dicom_dir: dicom_dir(dir.path()),
            mode: AnalysisMode::Standard,
        })
        .unwrap();

        let mut notices = wb.supervisor.wait_terminal(Category::Analyze, WAIT);
        let produced = notices
            .iter()
            .find_map(|n| match &n.event {
                TaskEvent::Succeeded(Payload::Analysis(o)) => o.case.as_ref(),
                _ => None,
            })
            .map(|c| c.volume().data().as_ptr())
            .unwrap();

        wb.absorb(&mut notices);
        let published = wb.store().volume().unwrap().data().as_ptr();
        assert_eq!(published, produced);
        assert!(notices.iter().all(|n| !matches!(
            &n.event,
            TaskEvent::Succeeded(Payload::Analysis(o)) if o.case.is_some()
        )));
    }

    #[test]
    fn test_failed_analyze_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = Arc::new(Script {
            fail_at: Some(Stage::Classify),
            ..Script::default()
        });
        let mut wb = workbench(script, dir.path());
        wb.start_pipeline(PipelineInput::Analyze {
            dicom_dir: dicom_dir(dir.path()),
            mode: AnalysisMode::Standard,
        })
        .unwrap();
        let notices = wb.wait(Category::Analyze, WAIT);
        assert!(notices.iter().any(|n| matches!(n.event, TaskEvent::Failed(_))));
        assert!(!wb.store().is_loaded());
        assert!(wb.last_scored().is_none());
    }

    #[test]
    fn test_open_case_jumps_to_lesion() {
        let dir = tempfile::tempdir().unwrap();
        let (volume, mask) = write_case_files(dir.path(), (10, 10, 20));
        let mut wb = workbench(Arc::new(Script::default()), dir.path());
        wb.open_case(&volume, &mask, None).unwrap();
        assert_eq!(wb.store().mask().unwrap()[(5, 5, 10)], MASK_LESION);
        // [9, 12] 的中点.
        assert_eq!(wb.state().index, 10);
    }
}

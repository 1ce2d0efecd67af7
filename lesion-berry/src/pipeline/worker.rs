//! worker 线程上执行的阶段序列.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use once_cell::sync::OnceCell;

use super::cancel::{CancelToken, PurgeOnDrop, TempArtifacts};
use super::collab::{CollabError, Collaborators, ReportGenerator};
use super::features::{AnalysisMode, ContributionTable, Decision, FeatureTable, ScoredFeatures};
use super::{
    AnalysisOutcome, AnalyzeRequest, Category, Notice, Payload, PipelineRequest, PipelineSettings,
    PredictionOutcome, RepredictRequest, ReportRequest, RunId, Stage, StageError, TaskEvent,
};
use crate::data::CaseVolumes;

/// 阶段序列提前结束的原因.
enum Halt {
    Cancelled,
    Failed(StageError),
}

/// 一次运行所需的全部上下文. 由监督者构造后移交给 worker 线程.
pub(crate) struct RunContext {
    pub(crate) category: Category,
    pub(crate) run: RunId,
    pub(crate) tx: Sender<Notice>,
    pub(crate) cancel: CancelToken,
    pub(crate) artifacts: TempArtifacts,
    pub(crate) collab: Collaborators,
    pub(crate) settings: Arc<PipelineSettings>,
    pub(crate) report_model: Arc<OnceCell<Arc<dyn ReportGenerator>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl RunContext {
    /// 接收端可能已被强制回收的监督者丢弃; 此时静默丢弃事件.
    fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(Notice {
            category: self.category,
            run: self.run,
            event,
        });
    }

    /// 执行单个阶段: 检查取消, 报告进度, 隔离 panic, 报告完成.
    fn stage<T, F>(&self, stage: Stage, f: F) -> Result<T, Halt>
    where
        F: FnOnce() -> Result<T, CollabError>,
    {
        if self.cancel.is_cancelled() {
            log::info!("{} #{}: cancelled before {stage}", self.category, self.run);
            return Err(Halt::Cancelled);
        }
        log::info!("{} #{}: {stage} started", self.category, self.run);
        self.emit(TaskEvent::Progress(stage.progress_text().to_string()));

        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                log::info!("{} #{}: {stage} completed", self.category, self.run);
                self.emit(TaskEvent::StageCompleted(stage));
                Ok(value)
            }
            Ok(Err(CollabError::Cancelled)) => {
                log::info!("{} #{}: {stage} interrupted by cancellation", self.category, self.run);
                Err(Halt::Cancelled)
            }
            Ok(Err(e)) => {
                log::error!("{} #{}: {stage} failed: {e}", self.category, self.run);
                Err(Halt::Failed(StageError::new(stage, e.to_string())))
            }
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload));
                log::error!("{} #{}: {stage} {message}", self.category, self.run);
                Err(Halt::Failed(StageError::new(stage, message)))
            }
        }
    }

    /// 分类阶段的共同逻辑: 选列, 调用分类器, 判定, 排序贡献.
    fn classify(
        &self,
        features: &FeatureTable,
        patient: &str,
        mode: AnalysisMode,
    ) -> Result<ScoredFeatures, CollabError> {
        let input = features
            .select_classifier_input()
            .map_err(CollabError::MissingColumns)?;
        let threshold = mode.threshold();
        let raw = self
            .collab
            .classifier
            .classify(&input, patient, threshold, &self.cancel)?;
        if !raw.probability.is_finite() {
            return Err(CollabError::msg("classifier returned a non-finite probability"));
        }
        Ok(ScoredFeatures {
            features: input,
            probability: raw.probability,
            threshold,
            decision: Decision::from_probability(raw.probability, threshold),
            contributions: ContributionTable::ranked(raw.contributions),
        })
    }

    fn analyze(&self, req: &AnalyzeRequest) -> Result<Payload, Halt> {
        let c = &self.collab;
        let dir = req.dicom_dir.as_path();
        let patient = self.stage(Stage::IdentifyPatient, || {
            c.identifier.identify(dir, &self.cancel)
        })?;
        let volume_path = self.stage(Stage::ConvertToVolume, || {
            c.converter.convert(dir, &self.cancel)
        })?;
        let mask_path = self.stage(Stage::Segment, || {
            c.segmenter
                .segment(&volume_path, &self.cancel)?
                .ok_or_else(|| CollabError::msg("segmentation produced no mask"))
        })?;
        let features = self.stage(Stage::ExtractFeatures, || {
            let params = self.settings.feature_params.as_deref();
            c.extractor
                .extract(&volume_path, &mask_path, params, &self.cancel)
        })?;
        let scored = self.stage(Stage::Classify, || {
            self.classify(&features, &patient, req.mode)
        })?;
        let case = self.stage(Stage::LoadCase, || {
            Ok(CaseVolumes::open(&volume_path, &mask_path)?)
        })?;
        Ok(Payload::Analysis(Box::new(AnalysisOutcome {
            patient,
            volume_path,
            mask_path,
            case: Some(case),
            scored,
        })))
    }

    fn repredict(&self, req: &RepredictRequest) -> Result<Payload, Halt> {
        let c = &self.collab;
        let temp_mask = self.stage(Stage::PersistEditedMask, || {
            self.artifacts.write_in(
                &self.settings.temp_dir,
                "edited-mask-",
                ".nii.gz",
                |path| Ok(req.mask.save_with_header(path, &req.reference)?),
            )
        })?;
        let features = self.stage(Stage::ExtractFeatures, || {
            let params = self.settings.feature_params.as_deref();
            c.extractor
                .extract(&req.volume_path, &temp_mask, params, &self.cancel)
        })?;
        let scored = self.stage(Stage::Classify, || {
            self.classify(&features, &req.patient, req.mode)
        })?;
        self.stage(Stage::RemoveTempMask, || {
            self.artifacts.purge();
            if temp_mask.exists() {
                return Err(CollabError::msg(format!(
                    "temporary mask {} could not be removed",
                    temp_mask.display()
                )));
            }
            Ok(())
        })?;
        Ok(Payload::Prediction(PredictionOutcome {
            patient: req.patient.clone(),
            scored,
        }))
    }

    fn report(&self, req: &ReportRequest) -> Result<Payload, Halt> {
        let generator = self.stage(Stage::LoadReportModel, || {
            let cell = &self.report_model;
            if cell.get().is_some() {
                log::debug!("report model already loaded, reusing it");
            }
            cell.get_or_try_init(|| self.collab.report_loader.load(&self.cancel))
                .map(Arc::clone)
        })?;
        let summary = req
            .contributions
            .summary_text(self.settings.report_top_n, &self.settings.dictionary);
        let text = self.stage(Stage::GenerateReport, || {
            generator.generate(&summary, &self.cancel)
        })?;
        Ok(Payload::Report(text))
    }
}

/// worker 线程入口. 无论结果如何, 临时文件在终态通知发出之前已被删除.
pub(crate) fn run(ctx: RunContext, request: PipelineRequest) {
    let guard = PurgeOnDrop(ctx.artifacts.clone());
    let result = match &request {
        PipelineRequest::Analyze(req) => ctx.analyze(req),
        PipelineRequest::Repredict(req) => ctx.repredict(req),
        PipelineRequest::Report(req) => ctx.report(req),
    };
    drop(guard);

    let event = match result {
        Ok(_) if ctx.cancel.is_cancelled() => {
            log::info!("{} #{}: finished after cancellation, dropping result", ctx.category, ctx.run);
            TaskEvent::Cancelled
        }
        Ok(payload) => {
            log::info!("{} #{}: succeeded", ctx.category, ctx.run);
            TaskEvent::Succeeded(payload)
        }
        Err(Halt::Cancelled) => TaskEvent::Cancelled,
        Err(Halt::Failed(e)) => TaskEvent::Failed(e),
    };
    ctx.emit(event);
}

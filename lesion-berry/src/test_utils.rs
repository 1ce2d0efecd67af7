//! 单元测试共用的构造工具与假协作者.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ndarray::{Array3, ShapeBuilder};
use nifti::writer::WriterOptions;

use crate::consts::gray::MASK_LESION;
use crate::consts::FEATURE_COLUMNS;
use crate::data::{CaseVolumes, MaskVolume, NiftiHeaderAttr, Volume};
use crate::pipeline::collab::{
    Classifier, CollabError, Collaborators, FeatureExtractor, PatientIdentifier, RawPrediction,
    ReportGenerator, ReportModelLoader, Segmenter, VolumeConverter,
};
use crate::pipeline::{CancelToken, FeatureTable, Stage};
use crate::Idx3d;

/// 强度为坐标线性组合的影像, 配全背景掩膜.
pub(crate) fn synthetic_case(shape: Idx3d) -> CaseVolumes {
    let data = Array3::from_shape_fn(shape.f(), |(x, y, z)| (x + 2 * y + 3 * z) as f32 - 40.0);
    let volume = Volume::fake(data, [0.8, 0.8, 2.5]);
    let mask = MaskVolume::zeros_like(&volume);
    CaseVolumes::new(volume, mask).unwrap()
}

/// 在 `dir` 下写出一个病例, 掩膜在中间层附近带一小块病灶. 返回 `(影像路径, 掩膜路径)`.
pub(crate) fn write_case_files(dir: &Path, shape: Idx3d) -> (PathBuf, PathBuf) {
    let mut case = synthetic_case(shape);
    let (x, y, z) = shape;
    for dz in 0..2 {
        case.mask_mut()[(x / 2, y / 2, z / 2 + dz)] = MASK_LESION;
    }
    let volume_path = dir.join("ct.nii.gz");
    let mask_path = dir.join("mask.nii.gz");
    WriterOptions::new(&volume_path)
        .reference_header(case.volume().header())
        .write_nifti(&case.volume().data())
        .unwrap();
    case.mask()
        .save_with_header(&mask_path, case.volume().header())
        .unwrap();
    (volume_path, mask_path)
}

/// 特征提取器看到的掩膜文件.
#[derive(Debug, Clone)]
pub(crate) struct SeenMask {
    pub(crate) path: PathBuf,
    pub(crate) existed: bool,
}

/// 假协作者的剧本.
#[derive(Debug, Default)]
pub(crate) struct Script {
    /// 在该阶段返回错误.
    pub(crate) fail_at: Option<Stage>,
    /// 在该阶段阻塞, 直到 `release` 或取消.
    pub(crate) block_at: Option<Stage>,
    /// 阻塞时忽略取消.
    pub(crate) stubborn: bool,
    /// 在该阶段 panic.
    pub(crate) panic_at: Option<Stage>,
    /// 分割不产出掩膜.
    pub(crate) no_mask: bool,
    pub(crate) blocked: AtomicBool,
    pub(crate) released: AtomicBool,
    pub(crate) seen: Mutex<Vec<SeenMask>>,
    pub(crate) loads: AtomicUsize,
}

impl Script {
    fn step(&self, stage: Stage, cancel: &CancelToken) -> Result<(), CollabError> {
        if self.panic_at == Some(stage) {
            panic!("scripted panic at {stage}");
        }
        if self.block_at == Some(stage) {
            self.blocked.store(true, Ordering::SeqCst);
            while !self.released.load(Ordering::SeqCst) {
                if !self.stubborn && cancel.is_cancelled() {
                    return Err(CollabError::Cancelled);
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        if self.fail_at == Some(stage) {
            return Err(CollabError::msg(format!("scripted failure at {stage}")));
        }
        Ok(())
    }

    /// 等待某个 worker 进入阻塞阶段.
    pub(crate) fn wait_until_blocked(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.blocked.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "worker never reached the blocking stage");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// 放行所有阻塞的阶段.
    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub(crate) fn seen_masks(&self) -> Vec<SeenMask> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn model_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct Fake {
    script: Arc<Script>,
    volume: PathBuf,
    mask: PathBuf,
}

impl PatientIdentifier for Fake {
    fn identify(&self, _dicom_dir: &Path, cancel: &CancelToken) -> Result<String, CollabError> {
        self.script.step(Stage::IdentifyPatient, cancel)?;
        Ok("Patient".to_string())
    }
}

impl VolumeConverter for Fake {
    fn convert(&self, _dicom_dir: &Path, cancel: &CancelToken) -> Result<PathBuf, CollabError> {
        self.script.step(Stage::ConvertToVolume, cancel)?;
        Ok(self.volume.clone())
    }
}

impl Segmenter for Fake {
    fn segment(&self, _volume: &Path, cancel: &CancelToken) -> Result<Option<PathBuf>, CollabError> {
        self.script.step(Stage::Segment, cancel)?;
        Ok((!self.script.no_mask).then(|| self.mask.clone()))
    }
}

impl FeatureExtractor for Fake {
    fn extract(
        &self,
        _volume: &Path,
        mask: &Path,
        _params: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<FeatureTable, CollabError> {
        self.script.seen.lock().unwrap().push(SeenMask {
            path: mask.to_path_buf(),
            existed: mask.exists(),
        });
        self.script.step(Stage::ExtractFeatures, cancel)?;
        let mut table = FeatureTable::from_pairs(
            FEATURE_COLUMNS
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, i as f64 * 0.1)),
        );
        table.insert("diagnostics_Versions_PyRadiomics".to_string(), 3.0);
        Ok(table)
    }
}

impl Classifier for Fake {
    fn classify(
        &self,
        features: &FeatureTable,
        _patient: &str,
        _threshold: f64,
        cancel: &CancelToken,
    ) -> Result<RawPrediction, CollabError> {
        self.script.step(Stage::Classify, cancel)?;
        Ok(RawPrediction {
            probability: 0.42,
            contributions: features
                .iter()
                .take(3)
                .map(|(name, value)| (name.to_string(), value - 0.1))
                .collect(),
        })
    }
}

impl ReportModelLoader for Fake {
    fn load(&self, cancel: &CancelToken) -> Result<Arc<dyn ReportGenerator>, CollabError> {
        self.script.step(Stage::LoadReportModel, cancel)?;
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoReport(Arc::clone(&self.script))))
    }
}

struct EchoReport(Arc<Script>);

impl ReportGenerator for EchoReport {
    fn generate(&self, summary: &str, cancel: &CancelToken) -> Result<String, CollabError> {
        self.0.step(Stage::GenerateReport, cancel)?;
        Ok(format!("Report\n\n{summary}"))
    }
}

/// 按剧本行事的全套协作者. 转换与分割分别返回给定的影像与掩膜路径.
pub(crate) fn fake_collaborators(script: Arc<Script>, volume: PathBuf, mask: PathBuf) -> Collaborators {
    let fake = Arc::new(Fake {
        script,
        volume,
        mask,
    });
    Collaborators {
        identifier: fake.clone(),
        converter: fake.clone(),
        segmenter: fake.clone(),
        extractor: fake.clone(),
        classifier: fake.clone(),
        report_loader: fake,
    }
}

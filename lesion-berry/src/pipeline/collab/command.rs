//! 以外部程序实现的协作者.
//!
//! 每个协作者对应一条命令: `program` 加 `args`, 参数中的占位符在调用时展开:
//!
//! | 占位符 | 含义 |
//! |---|---|
//! | `{dicom}` | 影像序列目录 |
//! | `{volume}` | 体数据文件 |
//! | `{mask}` | 掩膜文件 |
//! | `{params}` | 特征提取参数文件 (未配置时为空串) |
//! | `{patient}` | 患者显示名 |
//! | `{threshold}` | 判定阈值 |
//! | `{features}` | 写有特征表 JSON 的临时文件 |
//! | `{summary}` | 写有贡献摘要的临时文件 |
//!
//! 程序从标准输出返回结果. 文本结果取去除首尾空白后的内容; 结构化结果为 JSON.
//! 运行期间每隔一小段时间检查取消标志, 一旦取消立即杀死子进程.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    Classifier, CollabError, Collaborators, FeatureExtractor, PatientIdentifier, RawPrediction,
    ReportGenerator, ReportModelLoader, Segmenter, VolumeConverter,
};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::features::FeatureTable;

/// 轮询子进程状态的间隔.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 错误信息中保留的 stderr 最大字符数.
const STDERR_TAIL: usize = 2000;

/// 一条外部命令.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// 程序名或路径.
    pub program: String,

    /// 参数, 可含占位符.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// 直接初始化.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// 展开参数中的占位符. 未知占位符原样保留.
    pub fn expand(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    /// 运行并返回标准输出. 取消时杀死子进程并返回 [`CollabError::Cancelled`].
    pub fn run(&self, vars: &[(&str, &str)], cancel: &CancelToken) -> Result<String, CollabError> {
        if cancel.is_cancelled() {
            return Err(CollabError::Cancelled);
        }
        let args = self.expand(vars);
        log::debug!("running `{}` with {:?}", self.program, args);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollabError::msg(format!("failed to launch `{}`: {e}", self.program)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = loop {
            if cancel.is_cancelled() {
                terminate(&mut child, &self.program);
                return Err(CollabError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        if !status.success() {
            let tail: String = {
                let chars: Vec<char> = stderr.trim().chars().collect();
                chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
            };
            return Err(CollabError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: tail,
            });
        }
        Ok(stdout)
    }
}

type Drain = Option<thread::JoinHandle<std::io::Result<String>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut p| {
        thread::spawn(move || {
            let mut buf = String::new();
            p.read_to_string(&mut buf).map(|_| buf)
        })
    })
}

fn collect(handle: Drain) -> Result<String, CollabError> {
    match handle {
        None => Ok(String::new()),
        Some(h) => h
            .join()
            .map_err(|_| CollabError::msg("output reader panicked"))?
            .map_err(CollabError::from),
    }
}

fn terminate(child: &mut Child, program: &str) {
    log::warn!("killing `{program}` (pid {}) after cancellation", child.id());
    if let Err(e) = child.kill() {
        log::warn!("failed to kill `{program}`: {e}");
    }
    let _ = child.wait();
}

/// 命令未配置时的统一错误.
fn unconfigured(role: &str) -> CollabError {
    CollabError::msg(format!("no external command configured for `{role}`"))
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// 把 `contents` 写入 `dir` 下的临时文件, 文件随返回值销毁.
fn scratch_file(dir: &Path, suffix: &str, contents: &[u8]) -> Result<tempfile::NamedTempFile, CollabError> {
    let mut file = tempfile::Builder::new()
        .prefix("lesion-")
        .suffix(suffix)
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

/// 各协作者的命令配置. 未配置的协作者在被调用时报错.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    /// 患者信息.
    pub identify: Option<CommandSpec>,
    /// 格式转换.
    pub convert: Option<CommandSpec>,
    /// 分割.
    pub segment: Option<CommandSpec>,
    /// 特征提取.
    pub extract: Option<CommandSpec>,
    /// 分类.
    pub classify: Option<CommandSpec>,
    /// 报告生成.
    pub report: Option<CommandSpec>,
}

impl CommandSet {
    /// 组装协作者. `scratch` 用于存放传给外部程序的临时输入文件.
    pub fn into_collaborators(self, scratch: PathBuf) -> Collaborators {
        Collaborators {
            identifier: Arc::new(CommandIdentifier(self.identify)),
            converter: Arc::new(CommandConverter(self.convert)),
            segmenter: Arc::new(CommandSegmenter(self.segment)),
            extractor: Arc::new(CommandExtractor(self.extract)),
            classifier: Arc::new(CommandClassifier {
                spec: self.classify,
                scratch: scratch.clone(),
            }),
            report_loader: Arc::new(CommandReportLoader {
                spec: self.report,
                scratch,
            }),
        }
    }
}

/// 标准输出为患者显示名.
pub struct CommandIdentifier(pub Option<CommandSpec>);

impl PatientIdentifier for CommandIdentifier {
    fn identify(&self, dicom_dir: &Path, cancel: &CancelToken) -> Result<String, CollabError> {
        let spec = self.0.as_ref().ok_or_else(|| unconfigured("identify"))?;
        let out = spec.run(&[("dicom", path_str(dicom_dir).as_str())], cancel)?;
        let name = out.trim();
        if name.is_empty() {
            return Err(CollabError::msg("patient identifier returned an empty name"));
        }
        Ok(name.to_string())
    }
}

/// 标准输出为生成的体数据文件路径.
pub struct CommandConverter(pub Option<CommandSpec>);

impl VolumeConverter for CommandConverter {
    fn convert(&self, dicom_dir: &Path, cancel: &CancelToken) -> Result<PathBuf, CollabError> {
        let spec = self.0.as_ref().ok_or_else(|| unconfigured("convert"))?;
        let out = spec.run(&[("dicom", path_str(dicom_dir).as_str())], cancel)?;
        let path = PathBuf::from(out.trim());
        if out.trim().is_empty() || !path.is_file() {
            return Err(CollabError::msg(format!(
                "converter did not produce a volume file (got `{}`)",
                out.trim()
            )));
        }
        Ok(path)
    }
}

/// 标准输出为掩膜文件路径; 输出为空或文件不存在视为分割失败.
pub struct CommandSegmenter(pub Option<CommandSpec>);

impl Segmenter for CommandSegmenter {
    fn segment(&self, volume: &Path, cancel: &CancelToken) -> Result<Option<PathBuf>, CollabError> {
        let spec = self.0.as_ref().ok_or_else(|| unconfigured("segment"))?;
        let out = spec.run(&[("volume", path_str(volume).as_str())], cancel)?;
        let trimmed = out.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let path = PathBuf::from(trimmed);
        Ok(path.is_file().then_some(path))
    }
}

/// 标准输出为 `{"特征名": 数值, ...}` 形式的 JSON 对象.
pub struct CommandExtractor(pub Option<CommandSpec>);

impl FeatureExtractor for CommandExtractor {
    fn extract(
        &self,
        volume: &Path,
        mask: &Path,
        params: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<FeatureTable, CollabError> {
        let spec = self.0.as_ref().ok_or_else(|| unconfigured("extract"))?;
        let params = params.map(path_str).unwrap_or_default();
        let out = spec.run(
            &[
                ("volume", path_str(volume).as_str()),
                ("mask", path_str(mask).as_str()),
                ("params", params.as_str()),
            ],
            cancel,
        )?;
        let row: BTreeMap<String, f64> = serde_json::from_str(out.trim())?;
        Ok(FeatureTable::from_pairs(row))
    }
}

/// 特征表以 JSON 对象写入 `{features}`; 标准输出为
/// `{"probability": p, "contributions": [["特征名", 值], ...]}`.
pub struct CommandClassifier {
    spec: Option<CommandSpec>,
    scratch: PathBuf,
}

impl Classifier for CommandClassifier {
    fn classify(
        &self,
        features: &FeatureTable,
        patient: &str,
        threshold: f64,
        cancel: &CancelToken,
    ) -> Result<RawPrediction, CollabError> {
        let spec = self.spec.as_ref().ok_or_else(|| unconfigured("classify"))?;
        let row: serde_json::Map<String, serde_json::Value> = features
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
            .collect();
        let input = scratch_file(&self.scratch, ".json", serde_json::to_string(&row)?.as_bytes())?;
        let out = spec.run(
            &[
                ("features", path_str(input.path()).as_str()),
                ("patient", patient),
                ("threshold", threshold.to_string().as_str()),
            ],
            cancel,
        )?;
        let prediction: RawPrediction = serde_json::from_str(out.trim())?;
        if !(0.0..=1.0).contains(&prediction.probability) {
            return Err(CollabError::msg(format!(
                "classifier returned probability {} outside [0, 1]",
                prediction.probability
            )));
        }
        Ok(prediction)
    }
}

/// 外部报告程序. 加载只检查命令已配置, 摘要经 `{summary}` 临时文件传入.
pub struct CommandReportLoader {
    spec: Option<CommandSpec>,
    scratch: PathBuf,
}

impl ReportModelLoader for CommandReportLoader {
    fn load(&self, _cancel: &CancelToken) -> Result<Arc<dyn ReportGenerator>, CollabError> {
        let spec = self.spec.clone().ok_or_else(|| unconfigured("report"))?;
        Ok(Arc::new(CommandReportGenerator {
            spec,
            scratch: self.scratch.clone(),
        }))
    }
}

struct CommandReportGenerator {
    spec: CommandSpec,
    scratch: PathBuf,
}

impl ReportGenerator for CommandReportGenerator {
    fn generate(&self, summary: &str, cancel: &CancelToken) -> Result<String, CollabError> {
        let input = scratch_file(&self.scratch, ".txt", summary.as_bytes())?;
        let out = self.spec.run(&[("summary", path_str(input.path()).as_str())], cancel)?;
        Ok(out.trim().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[test]
    fn test_expand_placeholders() {
        let spec = CommandSpec::new("x", ["--in={volume}", "{mask}", "{unknown}", "{volume}{volume}"]);
        let args = spec.expand(&[("volume", "/a.nii"), ("mask", "/m.nii")]);
        assert_eq!(args, vec!["--in=/a.nii", "/m.nii", "{unknown}", "/a.nii/a.nii"]);
    }

    #[test]
    fn test_run_returns_stdout_and_reports_exit() {
        let token = CancelToken::new();
        let out = CommandSpec::new("echo", ["hello", "{patient}"])
            .run(&[("patient", "kim")], &token)
            .unwrap();
        assert_eq!(out.trim(), "hello kim");

        let err = sh("echo broken >&2; exit 3").run(&[], &token).unwrap_err();
        match err {
            CollabError::Exit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancel_kills_child() {
        let token = CancelToken::new();
        let remote = token.clone();
        let started = Instant::now();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });
        let err = CommandSpec::new("sleep", ["10"]).run(&[], &token).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, CollabError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_command_collaborators_parse_output() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        let set = CommandSet {
            identify: Some(sh("echo '  Hong Gildong '")),
            extract: Some(sh(r#"echo '{"f1": 1.5, "f2": -2}'"#)),
            classify: Some(CommandSpec::new(
                "sh",
                [
                    "-c",
                    r#"test -s "$0" && echo '{"probability": 0.7, "contributions": [["f1", 0.3]]}'"#,
                    "{features}",
                ],
            )),
            segment: Some(sh("true")),
            ..CommandSet::default()
        };
        let c = set.into_collaborators(dir.path().to_path_buf());

        assert_eq!(c.identifier.identify(dir.path(), &token).unwrap(), "Hong Gildong");
        let table = c
            .extractor
            .extract(Path::new("v"), Path::new("m"), None, &token)
            .unwrap();
        assert_eq!(table.get("f2"), Some(-2.0));
        let raw = c.classifier.classify(&table, "p", 0.5, &token).unwrap();
        assert_eq!(raw.probability, 0.7);
        assert_eq!(raw.contributions, vec![("f1".to_string(), 0.3)]);
        assert_eq!(c.segmenter.segment(Path::new("v"), &token).unwrap(), None);

        assert!(c.converter.convert(dir.path(), &token).is_err());
        assert!(c.report_loader.load(&token).is_err());
    }
}

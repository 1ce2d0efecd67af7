//! 病灶掩膜复核的命令行宿主.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lesion_berry::edit::EditMode;
use lesion_berry::pipeline::AnalysisMode;
use lesion_berry::ViewAxis;

mod result;
mod runner;

#[derive(Parser, Debug)]
#[command(name = "review", version, about = "Review and correct lesion masks")]
struct Cli {
    /// 配置文件. 缺省时依次查找 `$PYRAMID_CONFIG` 与 `$HOME/.config/pyramid/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 等待后台任务的最长秒数.
    #[arg(long, global = true, default_value_t = 600)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

/// 一个已有病例.
#[derive(Args, Debug)]
struct CaseArgs {
    /// 影像 nii 文件.
    #[arg(long)]
    volume: PathBuf,

    /// 掩膜 nii 文件.
    #[arg(long)]
    mask: PathBuf,

    /// 患者显示名.
    #[arg(long)]
    patient: Option<String>,
}

/// 视图与切片.
#[derive(Args, Debug)]
struct ViewArgs {
    /// 视图方向: axial, coronal 或 sagittal.
    #[arg(long, default_value_t = ViewAxis::Axial)]
    axis: ViewAxis,

    /// 切片索引. 缺省时取病灶范围的中间层; 越界时截断.
    #[arg(long)]
    slice: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 从影像序列目录出发做完整分析.
    Analyze {
        /// 影像序列目录.
        #[arg(long)]
        dicom: PathBuf,

        /// 分析模式: standard 或 high-sensitivity.
        #[arg(long, default_value_t = AnalysisMode::Standard)]
        mode: AnalysisMode,

        /// 分析完成后把叠加图保存到该路径.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// 以已有掩膜重新分类.
    Repredict {
        #[command(flatten)]
        case: CaseArgs,

        /// 分析模式.
        #[arg(long, default_value_t = AnalysisMode::Standard)]
        mode: AnalysisMode,
    },

    /// 在一张切片上画笔画并写回掩膜.
    Edit {
        #[command(flatten)]
        case: CaseArgs,

        #[command(flatten)]
        view: ViewArgs,

        /// 编辑模式: add 或 erase.
        #[arg(long, default_value_t = EditMode::Add)]
        mode: EditMode,

        /// 画笔直径 (显示像素).
        #[arg(long)]
        diameter: Option<f64>,

        /// 一笔, 形如 `x,y;x,y;...` (显示坐标). 可重复.
        #[arg(long = "stroke", required = true)]
        strokes: Vec<String>,

        /// 输出掩膜文件.
        #[arg(long)]
        out: PathBuf,
    },

    /// 保存当前切片的叠加图.
    Snapshot {
        #[command(flatten)]
        case: CaseArgs,

        #[command(flatten)]
        view: ViewArgs,

        /// 缩放倍率.
        #[arg(long, default_value_t = 1.0)]
        zoom: f64,

        /// 使用腹部 CT 窗口而非逐切片归一化.
        #[arg(long)]
        ct_window: bool,

        /// 输出图片 (格式由扩展名决定).
        #[arg(long)]
        out: PathBuf,
    },

    /// 重新分类后生成文字报告.
    Report {
        #[command(flatten)]
        case: CaseArgs,

        /// 分析模式.
        #[arg(long, default_value_t = AnalysisMode::Standard)]
        mode: AnalysisMode,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match runner::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

//! 结果输出.

use std::io::{self, Write};

use lesion_berry::pipeline::{Notice, Payload, ScoredFeatures, TaskEvent};

/// 分类摘要中列出的贡献特征个数.
const TOP_CONTRIBUTIONS: usize = 5;

/// 将一条通知写进 `w` 中.
pub fn describe_into<W: Write>(notice: &Notice, w: &mut W) -> io::Result<()> {
    let head = format!("[{} #{}]", notice.category, notice.run);
    match &notice.event {
        TaskEvent::Progress(text) => writeln!(w, "{head} {text}"),
        TaskEvent::StageCompleted(stage) => writeln!(w, "{head} {stage} done"),
        TaskEvent::Succeeded(payload) => match payload {
            Payload::Analysis(o) => writeln!(
                w,
                "{head} succeeded: patient {}, volume {}, mask {}",
                o.patient,
                o.volume_path.display(),
                o.mask_path.display()
            ),
            Payload::Prediction(o) => writeln!(w, "{head} succeeded: patient {}", o.patient),
            Payload::Report(text) => writeln!(w, "{head} succeeded: {} characters", text.len()),
        },
        TaskEvent::Failed(e) => writeln!(w, "{head} FAILED at {}: {}", e.stage, e.message),
        TaskEvent::Cancelled => writeln!(w, "{head} cancelled"),
    }
}

/// 将分类结果写进 `w` 中.
pub fn describe_scored<W: Write>(patient: &str, s: &ScoredFeatures, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Patient `{patient}`:")?;
    writeln!(w, "{S4}Probability: {:.4}", s.probability)?;
    writeln!(w, "{S4}Threshold: {:.7}", s.threshold)?;
    writeln!(w, "{S4}Decision: {}", s.decision)?;
    writeln!(w, "{S4}Top contributions:")?;
    for c in s.contributions.top(TOP_CONTRIBUTIONS) {
        writeln!(w, "{S4}{S4}{:<48} {:+.4}", c.feature, c.value)?;
    }
    Ok(())
}

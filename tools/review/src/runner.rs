//! 程序运行函数.

use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use lesion_berry::edit::{ApplyOutcome, Point};
use lesion_berry::pipeline::{AnalysisMode, Category, TaskEvent};
use lesion_berry::{NiftiHeaderAttr, PipelineInput, Workbench};
use utils::loader;

use crate::result;
use crate::{CaseArgs, Cli, Command, ViewArgs};

type BoxResult<T> = Result<T, Box<dyn Error>>;

/// 收取后台通知的间隔.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// 实际运行.
pub fn run(cli: Cli) -> BoxResult<()> {
    let config = loader::config_from_env_or_home(cli.config)?;
    let timeout = Duration::from_secs(cli.timeout);
    let mut wb = Workbench::from_config(&config)?;

    match cli.command {
        Command::Analyze {
            dicom,
            mode,
            snapshot,
        } => {
            wb.start_pipeline(PipelineInput::Analyze {
                dicom_dir: dicom,
                mode,
            })?;
            await_category(&mut wb, Category::Analyze, timeout)?;
            describe_last(&wb)?;
            if let Some(out) = snapshot {
                save_snapshot(&wb, &out)?;
            }
        }
        Command::Repredict { case, mode } => {
            open_case(&mut wb, case)?;
            repredict(&mut wb, mode, timeout)?;
            describe_last(&wb)?;
        }
        Command::Edit {
            case,
            view,
            mode,
            diameter,
            strokes,
            out,
        } => {
            open_case(&mut wb, case)?;
            select(&mut wb, &view);
            wb.set_edit_mode(mode);
            if let Some(d) = diameter {
                let d = wb.set_brush_diameter(d);
                log::info!("brush diameter set to {d}");
            }
            for s in strokes.iter() {
                let points = parse_stroke(s)?;
                wb.begin_stroke(points[0]);
                for p in &points[1..] {
                    wb.extend_stroke(*p);
                }
                wb.end_stroke();
            }
            match wb.apply_edits()? {
                ApplyOutcome::Applied(edit) => {
                    println!("{} voxel(s) changed on {}", edit.changed(), edit.key())
                }
                ApplyOutcome::NothingToApply => println!("nothing to apply"),
            }
            let store = wb.store();
            let (Some(volume), Some(mask)) = (store.volume(), store.mask()) else {
                return Err("no case is loaded".into());
            };
            mask.save_with_header(&out, volume.header())?;
            println!("mask written to {}", out.display());
        }
        Command::Snapshot {
            case,
            view,
            zoom,
            ct_window,
            out,
        } => {
            open_case(&mut wb, case)?;
            select(&mut wb, &view);
            wb.zoom(zoom);
            if ct_window {
                wb.set_window(Some(utils::abdomen_window()));
            }
            save_snapshot(&wb, &out)?;
        }
        Command::Report { case, mode } => {
            open_case(&mut wb, case)?;
            repredict(&mut wb, mode, timeout)?;
            wb.start_pipeline(PipelineInput::Report)?;
            await_category(&mut wb, Category::Report, timeout)?;
            let mut out = io::stdout().lock();
            utils::sep_to(&mut out)?;
            writeln!(out, "{}", wb.last_report().unwrap_or_default())?;
            utils::sep_to(&mut out)?;
        }
    }
    Ok(())
}

fn open_case(wb: &mut Workbench, case: CaseArgs) -> BoxResult<()> {
    wb.open_case(&case.volume, &case.mask, case.patient)?;
    Ok(())
}

fn select(wb: &mut Workbench, view: &ViewArgs) {
    wb.select_view(view.axis);
    if let Some(index) = view.slice {
        wb.set_slice(index);
    }
    log::info!("viewing {}", wb.state().key());
}

fn repredict(wb: &mut Workbench, mode: AnalysisMode, timeout: Duration) -> BoxResult<()> {
    wb.start_pipeline(PipelineInput::Repredict { mode })?;
    await_category(wb, Category::Repredict, timeout)
}

/// 逐条打印 `category` 的通知, 直到终态或超时. 超时后取消该任务.
fn await_category(wb: &mut Workbench, category: Category, timeout: Duration) -> BoxResult<()> {
    let deadline = Instant::now() + timeout;
    let mut out = io::stdout().lock();
    loop {
        for notice in wb.pump() {
            result::describe_into(&notice, &mut out)?;
            if notice.category != category {
                continue;
            }
            match notice.event {
                TaskEvent::Succeeded(_) => return Ok(()),
                TaskEvent::Failed(e) => return Err(e.into()),
                TaskEvent::Cancelled => return Err(format!("{category} was cancelled").into()),
                _ => {}
            }
        }
        if Instant::now() >= deadline {
            wb.cancel_pipeline(category);
            return Err(format!("{category} did not finish within {timeout:?}").into());
        }
        out.flush()?;
        thread::sleep(PUMP_INTERVAL);
    }
}

fn describe_last(wb: &Workbench) -> BoxResult<()> {
    if let Some(scored) = wb.last_scored() {
        let patient = wb.store().case().and_then(|c| c.patient()).unwrap_or("-");
        let mut out = io::stdout().lock();
        utils::sep_to(&mut out)?;
        result::describe_scored(patient, scored, &mut out)?;
        utils::sep_to(&mut out)?;
    }
    Ok(())
}

fn save_snapshot(wb: &Workbench, out: &Path) -> BoxResult<()> {
    let img = wb.render_current().ok_or("no case is loaded")?;
    img.save(out)?;
    println!("snapshot of {} written to {}", wb.state().key(), out.display());
    Ok(())
}

/// 解析 `x,y;x,y;...`.
fn parse_stroke(s: &str) -> BoxResult<Vec<Point>> {
    let points = s
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (x, y) = p
                .split_once(',')
                .ok_or_else(|| format!("point `{p}` is not of the form x,y"))?;
            Ok(Point::new(x.trim().parse()?, y.trim().parse()?))
        })
        .collect::<BoxResult<Vec<Point>>>()?;
    if points.is_empty() {
        return Err(format!("stroke `{s}` has no points").into());
    }
    Ok(points)
}

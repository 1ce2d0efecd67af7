//! 每个类别至多一个运行中任务的监督者.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use once_cell::sync::OnceCell;

use super::cancel::{CancelToken, TempArtifacts};
use super::collab::{Collaborators, ReportGenerator};
use super::error::{InputError, StageError, StartError};
use super::worker::{self, RunContext};
use super::{Category, Notice, PipelineRequest, PipelineSettings, RunId, Stage, TaskEvent, TaskStatus};

/// `wait_terminal` 的轮询间隔.
const WAIT_STEP: Duration = Duration::from_millis(5);

/// 一次运行中的任务.
struct ActiveRun {
    run: RunId,
    cancel: CancelToken,
    artifacts: TempArtifacts,
    rx: Receiver<Notice>,
    handle: Option<JoinHandle<()>>,
    completed: usize,
}

impl ActiveRun {
    /// 正在执行 (或即将执行) 的阶段.
    fn current_stage(&self, category: Category) -> Stage {
        let plan = Stage::plan(category);
        plan[self.completed.min(plan.len() - 1)]
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker of run #{} panicked outside a stage", self.run);
            }
        }
    }
}

#[derive(Default)]
struct Slot {
    status: TaskStatus,
    active: Option<ActiveRun>,
}

/// 流水线监督者. 由协调线程独占.
///
/// - 每个类别至多一个运行中的任务, 不同类别互不影响;
/// - worker 从不触碰 [`crate::store::VolumeStore`], 结果经通知交还协调线程;
/// - 取消先协作, 超过宽限期后强制回收: 丢弃线程句柄与接收端, 由监督者删除已登记的临时文件,
///   并以 `Cancelled` 作为终态.
pub struct PipelineSupervisor {
    collab: Collaborators,
    settings: Arc<PipelineSettings>,
    report_model: Arc<OnceCell<Arc<dyn ReportGenerator>>>,
    slots: [Slot; 3],
    pending: VecDeque<Notice>,
    next_run: RunId,
}

impl PipelineSupervisor {
    /// 以给定协作者和参数创建.
    pub fn new(collab: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collab,
            settings: Arc::new(settings),
            report_model: Arc::new(OnceCell::new()),
            slots: Default::default(),
            pending: VecDeque::new(),
            next_run: 1,
        }
    }

    /// 运行参数.
    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// `category` 的当前状态.
    #[inline]
    pub fn status(&self, category: Category) -> TaskStatus {
        self.slots[category.slot()].status
    }

    /// `category` 是否有运行中的任务.
    #[inline]
    pub fn is_running(&self, category: Category) -> bool {
        self.slots[category.slot()].active.is_some()
    }

    /// 报告模型是否已加载.
    #[inline]
    pub fn report_model_loaded(&self) -> bool {
        self.report_model.get().is_some()
    }

    /// 启动任务. 同类别已有任务运行时返回 [`StartError::AlreadyRunning`], 没有任何副作用;
    /// 输入不合法时返回 [`StartError::Input`], 任务不会启动.
    pub fn start(&mut self, request: PipelineRequest) -> Result<RunId, StartError> {
        let category = request.category();
        self.drain(category);
        if self.is_running(category) {
            log::warn!("rejecting {category}: a run is already in flight");
            return Err(StartError::AlreadyRunning(category));
        }
        validate(&request)?;

        let run = self.next_run;
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();
        let artifacts = TempArtifacts::new();
        let ctx = RunContext {
            category,
            run,
            tx,
            cancel: cancel.clone(),
            artifacts: artifacts.clone(),
            collab: self.collab.clone(),
            settings: Arc::clone(&self.settings),
            report_model: Arc::clone(&self.report_model),
        };
        let handle = thread::Builder::new()
            .name(format!("{category}-{run}"))
            .spawn(move || worker::run(ctx, request))
            .map_err(|e| StartError::Spawn(e.to_string()))?;

        self.next_run += 1;
        let slot = &mut self.slots[category.slot()];
        slot.status = TaskStatus::Running;
        slot.active = Some(ActiveRun {
            run,
            cancel,
            artifacts,
            rx,
            handle: Some(handle),
            completed: 0,
        });
        log::info!("{category} #{run}: started");
        Ok(run)
    }

    /// 先 (有界地) 取消同类别的运行, 再启动新任务.
    pub fn restart(&mut self, request: PipelineRequest) -> Result<RunId, StartError> {
        self.cancel(request.category());
        self.start(request)
    }

    /// 取消 `category` 的运行. 没有运行中的任务时返回 `false`.
    ///
    /// 先置取消标志并在宽限期内等待 worker 的终态通知; 超时则强制回收.
    /// 强制回收不会交付成功结果, 已登记的临时文件由监督者删除.
    pub fn cancel(&mut self, category: Category) -> bool {
        let Some(mut active) = self.slots[category.slot()].active.take() else {
            return false;
        };
        log::info!("{category} #{}: cancellation requested", active.run);
        active.cancel.cancel();

        let deadline = Instant::now() + self.settings.cancel_grace;
        loop {
            match active.rx.recv_deadline(deadline) {
                Ok(notice) => {
                    if self.accept(category, &mut active, notice) {
                        active.join();
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.abandoned(category, &mut active);
                    return true;
                }
            }
        }

        log::warn!(
            "{category} #{}: worker did not stop within {:?}, forcing teardown",
            active.run,
            self.settings.cancel_grace
        );
        let removed = active.artifacts.seal();
        if removed > 0 {
            log::info!("{category} #{}: removed {removed} temporary artifact(s)", active.run);
        }
        let run = active.run;
        // 丢弃句柄即分离线程; 丢弃接收端后 worker 的后续事件被静默丢弃.
        drop(active);
        self.finish(category, run, TaskEvent::Cancelled);
        true
    }

    /// 非阻塞地收取全部类别的通知.
    ///
    /// 上一次交付过终态的类别在此回到 `Idle`.
    pub fn poll(&mut self) -> Vec<Notice> {
        for slot in self.slots.iter_mut() {
            if slot.status.is_terminal() && slot.active.is_none() {
                slot.status = TaskStatus::Idle;
            }
        }
        for category in Category::ALL {
            self.drain(category);
        }
        self.pending.drain(..).collect()
    }

    /// 阻塞等待 `category` 的终态, 最多等待 `timeout`. 返回期间收到的全部通知.
    ///
    /// 供命令行宿主与测试使用; 交互式宿主应使用 [`PipelineSupervisor::poll`].
    pub fn wait_terminal(&mut self, category: Category, timeout: Duration) -> Vec<Notice> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            out.extend(self.poll());
            if !self.is_running(category) || Instant::now() >= deadline {
                return out;
            }
            thread::sleep(WAIT_STEP);
        }
    }

    /// 把 `category` 的 channel 中已有的通知移入待交付队列; 遇到终态时回收该运行.
    fn drain(&mut self, category: Category) {
        let Some(mut active) = self.slots[category.slot()].active.take() else {
            return;
        };
        loop {
            match active.rx.try_recv() {
                Ok(notice) => {
                    if self.accept(category, &mut active, notice) {
                        active.join();
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.abandoned(category, &mut active);
                    return;
                }
            }
        }
        self.slots[category.slot()].active = Some(active);
    }

    /// 记录一条通知. 返回该通知是否为终态.
    fn accept(&mut self, category: Category, active: &mut ActiveRun, notice: Notice) -> bool {
        if let TaskEvent::StageCompleted(_) = notice.event {
            active.completed += 1;
        }
        let terminal = notice.event.terminal_status();
        self.pending.push_back(notice);
        match terminal {
            Some(status) => {
                self.slots[category.slot()].status = status;
                log::info!("{category} #{}: {status:?}", active.run);
                true
            }
            None => false,
        }
    }

    /// worker 未发出终态就断开了.
    fn abandoned(&mut self, category: Category, active: &mut ActiveRun) {
        active.join();
        active.artifacts.purge();
        let event = if active.cancel.is_cancelled() {
            TaskEvent::Cancelled
        } else {
            TaskEvent::Failed(StageError::new(
                active.current_stage(category),
                "worker exited without reporting a result",
            ))
        };
        self.finish(category, active.run, event);
    }

    fn finish(&mut self, category: Category, run: RunId, event: TaskEvent) {
        if let Some(status) = event.terminal_status() {
            self.slots[category.slot()].status = status;
        }
        self.pending.push_back(Notice {
            category,
            run,
            event,
        });
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        for category in Category::ALL {
            self.cancel(category);
        }
    }
}

/// 启动前的输入检查.
fn validate(request: &PipelineRequest) -> Result<(), InputError> {
    match request {
        PipelineRequest::Analyze(req) => {
            let dir = &req.dicom_dir;
            if !dir.exists() {
                return Err(InputError::MissingFolder(dir.clone()));
            }
            if !dir.is_dir() {
                return Err(InputError::NotAFolder(dir.clone()));
            }
            let empty = std::fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true);
            if empty {
                return Err(InputError::EmptyFolder(dir.clone()));
            }
        }
        PipelineRequest::Repredict(req) => {
            if !req.volume_path.is_file() {
                return Err(InputError::NoSourceVolume);
            }
        }
        PipelineRequest::Report(req) => {
            if req.contributions.is_empty() {
                return Err(InputError::NothingToReport);
            }
        }
    }
    Ok(())
}

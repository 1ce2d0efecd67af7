//! 协作式取消与临时文件登记.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::TempPath;

/// 可跨线程共享的取消标志. worker 在阶段之间 (以及外部命令轮询时) 检查它.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 新的未取消标志.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 是否已请求取消.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 一次运行创建的临时文件登记表.
///
/// worker 与监督者各持一份克隆. 无论 worker 如何结束, 监督者都能删除已登记的文件.
/// 强制回收时监督者调用 [`TempArtifacts::seal`]; 封存后完成的写入由 worker 自行删除.
#[derive(Debug, Clone, Default)]
pub struct TempArtifacts {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Debug, Default)]
struct Registry {
    paths: Vec<TempPath>,
    sealed: bool,
}

impl TempArtifacts {
    /// 空登记表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在 `dir` 下创建一个以 `suffix` 结尾的空临时文件并登记, 返回其路径.
    ///
    /// 登记表已封存时报错.
    pub fn create_in(&self, dir: &Path, prefix: &str, suffix: &str) -> io::Result<PathBuf> {
        if self.is_sealed() {
            return Err(sealed_error());
        }
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        let path = file.into_temp_path();
        let out = path.to_path_buf();
        let mut registry = self.registry();
        if registry.sealed {
            drop(registry);
            let _ = path.close();
            return Err(sealed_error());
        }
        registry.paths.push(path);
        log::debug!("registered temporary artifact {}", out.display());
        Ok(out)
    }

    /// 创建并登记临时文件, 再由 `write` 写入内容.
    ///
    /// 写入期间登记表若被封存, 监督者可能已先行删除该路径, 而 `write` 又把它重新建了出来.
    /// 此时由这里删除文件并报错.
    pub fn write_in<E, F>(&self, dir: &Path, prefix: &str, suffix: &str, write: F) -> Result<PathBuf, E>
    where
        E: From<io::Error>,
        F: FnOnce(&Path) -> Result<(), E>,
    {
        let path = self.create_in(dir, prefix, suffix)?;
        write(&path)?;
        if self.is_sealed() {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("removed late artifact {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to remove {}: {e}", path.display()),
            }
            return Err(sealed_error().into());
        }
        Ok(path)
    }

    /// 当前登记的文件数.
    pub fn len(&self) -> usize {
        self.registry().paths.len()
    }

    /// 是否没有登记任何文件.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否已封存.
    pub fn is_sealed(&self) -> bool {
        self.registry().sealed
    }

    /// 删除全部已登记文件, 返回成功删除的个数. 文件已不存在视为成功.
    pub fn purge(&self) -> usize {
        let drained: Vec<TempPath> = self.registry().paths.drain(..).collect();
        remove_all(drained)
    }

    /// 封存登记表并删除全部已登记文件. 之后不再接受新文件.
    pub fn seal(&self) -> usize {
        let drained: Vec<TempPath> = {
            let mut registry = self.registry();
            registry.sealed = true;
            registry.paths.drain(..).collect()
        };
        remove_all(drained)
    }
}

fn remove_all(paths: Vec<TempPath>) -> usize {
    let mut removed = 0;
    for path in paths {
        let shown = path.to_path_buf();
        match path.close() {
            Ok(()) => {
                log::debug!("removed temporary artifact {}", shown.display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => removed += 1,
            Err(e) => log::warn!("failed to remove {}: {e}", shown.display()),
        }
    }
    removed
}

fn sealed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "temporary artifacts were sealed by a forced teardown")
}

/// 作用域结束 (包括 panic 展开) 时清空登记表.
pub(crate) struct PurgeOnDrop(pub(crate) TempArtifacts);

impl Drop for PurgeOnDrop {
    fn drop(&mut self) {
        self.0.purge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_removes_registered_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = TempArtifacts::new();
        let a = artifacts.create_in(dir.path(), "mask-", ".nii.gz").unwrap();
        let b = artifacts.create_in(dir.path(), "mask-", ".nii.gz").unwrap();
        assert!(a.exists() && b.exists());
        assert!(a.to_string_lossy().ends_with(".nii.gz"));
        std::fs::remove_file(&b).unwrap();

        let shared = artifacts.clone();
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.purge(), 2);
        assert!(!a.exists());
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_purge_on_drop_runs_during_unwind() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = TempArtifacts::new();
        let path = artifacts.create_in(dir.path(), "x-", ".tmp").unwrap();
        let guard_artifacts = artifacts.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = PurgeOnDrop(guard_artifacts);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_sealed_registry_removes_late_write() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = TempArtifacts::new();
        let (started_tx, started_rx) = crossbeam_channel::bounded::<PathBuf>(0);
        let (go_tx, go_rx) = crossbeam_channel::bounded::<()>(0);

        let writer = artifacts.clone();
        let root = dir.path().to_path_buf();
        let handle = std::thread::spawn(move || {
            writer.write_in(&root, "edited-mask-", ".nii.gz", |path| -> io::Result<()> {
                started_tx.send(path.to_path_buf()).unwrap();
                go_rx.recv().unwrap();
                std::fs::write(path, b"late")
            })
        });

        let path = started_rx.recv().unwrap();
        assert_eq!(artifacts.seal(), 1);
        assert!(!path.exists());
        go_tx.send(()).unwrap();

        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Interrupted);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(artifacts.create_in(dir.path(), "x-", ".tmp").is_err());
    }

    #[test]
    fn test_write_in_keeps_file_registered() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = TempArtifacts::new();
        let path = artifacts
            .write_in(dir.path(), "m-", ".bin", |p| std::fs::write(p, b"ok"))
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ok");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts.purge(), 1);
        assert!(!path.exists());
        assert!(!artifacts.is_sealed());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}

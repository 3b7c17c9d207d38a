//! 操作会话：busy 标志保证同一时刻最多一个 install / uninstall 在执行

use super::streaming::{run_request, run_uninstall_batch, CancelToken};
use super::types::{OperationEvent, OperationRequest, OperationResult, PackageRecord, Verb};
use super::Pip;
use crate::error::{PipError, Result};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 持有期间 busy 标志为 true，drop 时释放（包括工作线程 panic 的情况）
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// 一次正在执行的操作。UI 从 `events` 读取逐行输出，最后一条一定是
/// `Completed` 或 `Aborted`。
pub struct OperationHandle {
    pub events: mpsc::UnboundedReceiver<OperationEvent>,
    token: CancelToken,
    label: String,
    worker: JoinHandle<()>,
}

impl OperationHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 操作描述，如 "安装 requests"
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 取消并等待工作线程结束，返回时子进程已退出
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.worker.await {
            log::warn!("等待工作线程结束失败: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pip: Pip,
    busy: Arc<AtomicBool>,
}

impl Session {
    pub fn new(pip: Pip) -> Self {
        Self {
            pip,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pip(&self) -> &Pip {
        &self.pip
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PipError::Busy)?;
        Ok(BusyGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    /// 提交安装请求。已有操作在执行时直接拒绝，不排队。
    pub fn install(&self, request: OperationRequest) -> Result<OperationHandle> {
        if request.verb() != Verb::Install {
            return Err(PipError::Validation(format!("不支持的操作: {}", request.verb())));
        }
        let label = format!("安装 {}", request.requirement().unwrap_or_default());
        self.spawn(label, move |pip, token, tx| {
            // 先确认 pip 可用，避免把启动失败误报成安装失败
            if !pip.check_available() {
                return Err(PipError::PipUnavailable);
            }
            run_request(pip, &request, token, tx)
        })
    }

    /// 依次卸载选中的包
    pub fn uninstall(&self, packages: Vec<String>) -> Result<OperationHandle> {
        if packages.is_empty() {
            return Err(PipError::Validation("请先选择要卸载的包！".to_string()));
        }
        let label = format!("卸载 {} 个包", packages.len());
        self.spawn(label, move |pip, token, tx| {
            run_uninstall_batch(pip, &packages, token, tx)
        })
    }

    /// 刷新已安装列表。只读操作，不占用 busy 标志。
    pub fn refresh(&self) -> JoinHandle<Result<Vec<PackageRecord>>> {
        let pip = self.pip.clone();
        tokio::task::spawn_blocking(move || pip.list_installed())
    }

    fn spawn<F>(&self, label: String, job: F) -> Result<OperationHandle>
    where
        F: FnOnce(&Pip, &CancelToken, &mpsc::UnboundedSender<OperationEvent>) -> Result<OperationResult>
            + Send
            + 'static,
    {
        let guard = self.acquire()?;
        let (tx, events) = mpsc::unbounded_channel();
        let token = CancelToken::new();
        let pip = self.pip.clone();
        let worker_token = token.clone();
        log::info!("开始: {}", label);

        let worker = tokio::task::spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                job(&pip, &worker_token, &tx)
            }));
            // 先释放 busy 标志，再发出最终事件：UI 收到结果时一定可以提交下一个操作
            drop(guard);
            let event = match outcome {
                Ok(Ok(result)) => OperationEvent::Completed(result),
                Ok(Err(e)) => {
                    log::error!("操作中止: {}", e);
                    OperationEvent::Aborted(e)
                }
                Err(_) => OperationEvent::Aborted(PipError::Internal("工作线程异常退出".to_string())),
            };
            let _ = tx.send(event);
        });

        Ok(OperationHandle {
            events,
            token,
            label,
            worker,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::super::testing::write_fake_python;
    use super::super::types::{ErrorKind, InstallFlags};
    use super::*;
    use std::time::Duration;

    async fn finish(handle: &mut OperationHandle) -> (Vec<String>, OperationEvent) {
        let mut lines = Vec::new();
        while let Some(event) = handle.events.recv().await {
            match event {
                OperationEvent::Line(l) => lines.push(l),
                OperationEvent::Progress(_) => {}
                terminal => return (lines, terminal),
            }
        }
        panic!("事件通道在最终结果前关闭");
    }

    fn fake_session(dir: &std::path::Path, body: &str) -> Session {
        let python = write_fake_python(dir, body);
        Session::new(Pip::new(python.to_string_lossy()))
    }

    #[tokio::test]
    async fn batch_uninstall_reports_partial_success_and_clears_busy() {
        let dir = tempfile::tempdir().unwrap();
        let session = fake_session(
            dir.path(),
            r#"case "$1" in
  --version) echo "pip 24.0" ;;
  uninstall)
    if [ "$3" = "B" ]; then echo "ERROR: Cannot uninstall 'B'" >&2; exit 1; fi
    echo "Successfully uninstalled $3" ;;
esac"#,
        );
        let mut handle = session
            .uninstall(vec!["A".into(), "B".into(), "C".into()])
            .unwrap();
        assert!(session.is_busy());

        let (lines, terminal) = finish(&mut handle).await;
        let OperationEvent::Completed(result) = terminal else {
            panic!("应当得到 Completed");
        };
        assert_eq!(result.completed, vec!["A".to_string()]);
        assert_eq!(result.failed_target.as_deref(), Some("B"));
        assert_eq!(result.classified_error, Some(ErrorKind::DependencyConflict));
        assert!(lines.iter().all(|l| !l.contains("uninstalled C")));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn second_request_is_rejected_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let session = fake_session(
            dir.path(),
            r#"case "$1" in
  --version) echo "pip 24.0" ;;
  install) sleep 1; echo "Successfully installed $2" ;;
esac"#,
        );
        let request = OperationRequest::install("six", None, InstallFlags::default()).unwrap();
        let mut handle = session.install(request.clone()).unwrap();

        assert!(matches!(session.install(request.clone()), Err(PipError::Busy)));
        assert!(matches!(session.uninstall(vec!["six".into()]), Err(PipError::Busy)));

        let (_, terminal) = finish(&mut handle).await;
        assert!(matches!(terminal, OperationEvent::Completed(ref r) if r.success()));
        assert!(!session.is_busy());
        let mut again = session.install(request).unwrap();
        finish(&mut again).await;
    }

    #[tokio::test]
    async fn cancelled_install_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let session = fake_session(
            dir.path(),
            r#"case "$1" in
  --version) echo "pip 24.0" ;;
  install) echo "Collecting $2"; sleep 30; echo "late line" ;;
esac"#,
        );
        let request = OperationRequest::install("slow", None, InstallFlags::default()).unwrap();
        let mut handle = session.install(request).unwrap();

        // 等到第一行输出，确认子进程已启动
        match handle.events.recv().await {
            Some(OperationEvent::Line(l)) => assert_eq!(l, "Collecting slow"),
            other => panic!("意外事件: {:?}", other),
        }
        handle.cancel();

        let (lines, terminal) = tokio::time::timeout(Duration::from_secs(20), finish(&mut handle))
            .await
            .expect("取消后应当很快结束");
        assert!(lines.is_empty());
        let OperationEvent::Completed(result) = terminal else {
            panic!("应当得到 Completed");
        };
        assert!(result.cancelled);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn unavailable_pip_aborts_install() {
        let dir = tempfile::tempdir().unwrap();
        let session = fake_session(dir.path(), "exit 1");
        let request = OperationRequest::install("six", None, InstallFlags::default()).unwrap();
        let mut handle = session.install(request).unwrap();
        let (_, terminal) = finish(&mut handle).await;
        assert!(matches!(terminal, OperationEvent::Aborted(PipError::PipUnavailable)));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn refresh_runs_alongside_install() {
        let dir = tempfile::tempdir().unwrap();
        let session = fake_session(
            dir.path(),
            r#"case "$1" in
  --version) echo "pip 24.0" ;;
  install) sleep 1 ;;
  list) echo "six==1.16.0" ;;
esac"#,
        );
        let request = OperationRequest::install("six", None, InstallFlags::default()).unwrap();
        let mut handle = session.install(request).unwrap();
        let records = session.refresh().await.unwrap().unwrap();
        assert_eq!(records, vec![PackageRecord::new("six", "1.16.0")]);
        finish(&mut handle).await;
    }

    #[tokio::test]
    async fn empty_uninstall_is_a_validation_error() {
        let session = Session::new(Pip::new("python3"));
        assert!(matches!(session.uninstall(Vec::new()), Err(PipError::Validation(_))));
        assert!(!session.is_busy());
    }
}

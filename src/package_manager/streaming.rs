//! 流式命令执行（install / uninstall），带显式取消令牌

use super::parser::{classify_failure, clean_terminal_output};
use super::types::{OperationEvent, OperationRequest, OperationResult};
use super::Pip;
use crate::error::{PipError, Result};
use std::io::Read;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 取消后等待子进程自行退出的时间，超时强制结束
const CANCEL_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct TokenInner {
    /// 输出闸门：取消后不再向外投递任何行
    cancelled: Mutex<bool>,
    child_pid: AtomicU32,
}

/// 一次操作的取消令牌。
///
/// `cancel()` 返回之后，工作线程不会再投递任何输出行；
/// 工作线程仍会发出最终的 `Completed` 结果。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        {
            let mut cancelled = lock(&self.inner.cancelled);
            if *cancelled {
                return;
            }
            *cancelled = true;
        }
        let pid = self.inner.child_pid.load(Ordering::SeqCst);
        if pid != 0 {
            log::info!("取消操作，终止子进程 {}", pid);
            terminate_process_tree(pid);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.inner.cancelled)
    }

    fn attach(&self, pid: u32) {
        self.inner.child_pid.store(pid, Ordering::SeqCst);
        // 进程刚启动时用户可能已经取消，补发终止信号
        if self.is_cancelled() {
            terminate_process_tree(pid);
        }
    }

    fn detach(&self) {
        self.inner.child_pid.store(0, Ordering::SeqCst);
    }

    /// 在闸门锁内投递事件；已取消时丢弃并返回 false
    fn deliver(
        &self,
        tx: &mpsc::UnboundedSender<OperationEvent>,
        event: OperationEvent,
        transcript: Option<(&Mutex<String>, &str)>,
    ) -> bool {
        let cancelled = lock(&self.inner.cancelled);
        if *cancelled {
            return false;
        }
        if let Some((buffer, line)) = transcript {
            let mut buffer = lock(buffer);
            buffer.push_str(line);
            buffer.push('\n');
        }
        let _ = tx.send(event);
        true
    }
}

#[cfg(unix)]
fn terminate_process_tree(pid: u32) {
    // 子进程启动时已自成进程组，向整个组发信号
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_process_tree(pid: u32) {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        log::warn!("taskkill {} 失败: {}", pid, e);
    }
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
    let _ = child.kill();
}

/// 读取一个输出流，按 `\n` 切行投递；单独的 `\r` 视为进度刷新
fn pump_stream(
    stream: impl Read,
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<OperationEvent>,
    transcript: &Mutex<String>,
) {
    let mut reader = stream;
    let mut buffer = [0u8; 4096];
    let mut line: Vec<u8> = Vec::new();
    let mut pending_cr = false;

    let flush_line = |line: &mut Vec<u8>| {
        let cleaned = clean_terminal_output(&String::from_utf8_lossy(line));
        line.clear();
        if !cleaned.trim().is_empty() {
            token.deliver(
                tx,
                OperationEvent::Line(cleaned.clone()),
                Some((transcript, cleaned.as_str())),
            );
        }
    };
    let flush_progress = |line: &mut Vec<u8>| {
        let cleaned = clean_terminal_output(&String::from_utf8_lossy(line));
        line.clear();
        if !cleaned.trim().is_empty() {
            token.deliver(tx, OperationEvent::Progress(cleaned), None);
        }
    };

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("读取子进程输出失败: {}", e);
                break;
            }
        };
        for &byte in &buffer[..n] {
            if pending_cr {
                pending_cr = false;
                if byte == b'\n' {
                    flush_line(&mut line);
                    continue;
                }
                flush_progress(&mut line);
            }
            match byte {
                b'\n' => flush_line(&mut line),
                b'\r' => pending_cr = true,
                _ => line.push(byte),
            }
        }
    }
    if !line.is_empty() {
        flush_line(&mut line);
    }
}

fn spawn_child(pip: &Pip, args: &[String]) -> Result<Child> {
    let mut cmd = pip.command(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                // 独立进程组，取消时连同 pip 派生的构建进程一起结束
                libc::setpgid(0, 0);
                #[cfg(target_os = "linux")]
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }
    }
    cmd.spawn().map_err(|source| PipError::ProcessLaunch {
        program: pip.interpreter().to_string(),
        source,
    })
}

/// 等待子进程退出。取消后给出宽限期，超时强制结束。
fn wait_child(child: &mut Child, token: &CancelToken, program: &str) -> Result<i32> {
    let mut kill_deadline: Option<Instant> = None;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.code().unwrap_or(-1)),
            Ok(None) => {}
            Err(source) => {
                return Err(PipError::ProcessLaunch {
                    program: program.to_string(),
                    source,
                })
            }
        }
        if token.is_cancelled() {
            let deadline = *kill_deadline.get_or_insert_with(|| Instant::now() + CANCEL_GRACE);
            if Instant::now() >= deadline {
                log::warn!("子进程 {} 未响应终止信号，强制结束", child.id());
                force_kill(child);
                let status = child.wait().map_err(|source| PipError::ProcessLaunch {
                    program: program.to_string(),
                    source,
                })?;
                return Ok(status.code().unwrap_or(-1));
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// 单个子进程的执行结果
struct ChildOutcome {
    exit_code: i32,
    output: String,
}

/// 启动一个 pip 子进程并把合并后的 stdout/stderr 逐行投递出去
fn run_child(
    pip: &Pip,
    args: &[String],
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<OperationEvent>,
) -> Result<ChildOutcome> {
    log::info!("执行: {} -m pip {}", pip.interpreter(), args.join(" "));
    let mut child = spawn_child(pip, args)?;
    token.attach(child.id());

    let transcript = Arc::new(Mutex::new(String::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let (token, tx, transcript) = (token.clone(), tx.clone(), Arc::clone(&transcript));
        readers.push(std::thread::spawn(move || {
            pump_stream(stdout, &token, &tx, &transcript)
        }));
    }
    if let Some(stderr) = child.stderr.take() {
        let (token, tx, transcript) = (token.clone(), tx.clone(), Arc::clone(&transcript));
        readers.push(std::thread::spawn(move || {
            pump_stream(stderr, &token, &tx, &transcript)
        }));
    }

    let waited = wait_child(&mut child, token, pip.interpreter());
    token.detach();
    for reader in readers {
        let _ = reader.join();
    }
    let exit_code = waited?;
    let output = std::mem::take(&mut *lock(&transcript));
    log::info!("pip {} 退出码 {}", args.first().map(String::as_str).unwrap_or(""), exit_code);
    Ok(ChildOutcome { exit_code, output })
}

/// 执行单个 install / uninstall 请求
pub fn run_request(
    pip: &Pip,
    request: &OperationRequest,
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<OperationEvent>,
) -> Result<OperationResult> {
    let target = request.target().map(str::to_string);
    let outcome = run_child(pip, &request.pip_args(), token, tx)?;
    let cancelled = token.is_cancelled();
    let success = outcome.exit_code == 0 && !cancelled;
    // 取消的结果一律按失败处理
    let exit_code = if cancelled && outcome.exit_code == 0 { -1 } else { outcome.exit_code };
    Ok(OperationResult {
        exit_code,
        classified_error: (outcome.exit_code != 0 && !cancelled)
            .then(|| classify_failure(&outcome.output)),
        raw_output: outcome.output,
        cancelled,
        completed: if success { target.iter().cloned().collect() } else { Vec::new() },
        failed_target: if success { None } else { target },
        launch_error: None,
    })
}

/// 依次卸载多个包，遇到第一个失败即停止，后续包不再尝试
pub fn run_uninstall_batch(
    pip: &Pip,
    packages: &[String],
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<OperationEvent>,
) -> Result<OperationResult> {
    let mut result = OperationResult {
        exit_code: 0,
        classified_error: None,
        raw_output: String::new(),
        cancelled: false,
        completed: Vec::new(),
        failed_target: None,
        launch_error: None,
    };

    for package in packages {
        if token.is_cancelled() {
            result.cancelled = true;
            break;
        }
        let request = OperationRequest::uninstall(package)?;
        let outcome = match run_child(pip, &request.pip_args(), token, tx) {
            Ok(outcome) => outcome,
            // 第一个包就无法启动时没有任何改动，直接中止
            Err(e) if result.completed.is_empty() => return Err(e),
            Err(e) => {
                log::error!("卸载 {} 时无法启动 pip: {}", package, e);
                result.exit_code = -1;
                result.failed_target = Some(package.clone());
                result.launch_error = Some(e.to_string());
                break;
            }
        };
        result.raw_output.push_str(&outcome.output);
        result.exit_code = outcome.exit_code;

        if token.is_cancelled() {
            result.cancelled = true;
            result.failed_target = Some(package.clone());
            break;
        }
        if outcome.exit_code != 0 {
            result.classified_error = Some(classify_failure(&outcome.output));
            result.failed_target = Some(package.clone());
            log::warn!(
                "卸载 {} 失败，停止剩余 {} 个包",
                package,
                packages.len() - result.completed.len() - 1
            );
            break;
        }
        result.completed.push(package.clone());
    }

    if result.cancelled && result.exit_code == 0 {
        result.exit_code = -1;
    }
    Ok(result)
}

#[cfg(all(test, unix))]
mod tests {
    use super::super::testing::write_fake_python;
    use super::super::types::{ErrorKind, InstallFlags};
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<OperationEvent>) -> (Vec<String>, Vec<String>) {
        let mut lines = Vec::new();
        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                OperationEvent::Line(l) => lines.push(l),
                OperationEvent::Progress(p) => progress.push(p),
                _ => {}
            }
        }
        (lines, progress)
    }

    #[test]
    fn install_streams_lines_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let python = write_fake_python(
            dir.path(),
            r#"echo "args: $*"
printf 'Downloading 10%%\rDownloading 100%%\r\n'
echo "Successfully installed $3""#,
        );
        let pip = Pip::new(python.to_string_lossy());
        let request = OperationRequest::install(
            "requests",
            Some("2.31.0"),
            InstallFlags { user_scope: true, force_upgrade: false },
        )
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = run_request(&pip, &request, &CancelToken::new(), &tx).unwrap();

        assert!(result.success());
        assert_eq!(result.classified_error, None);
        assert_eq!(result.completed, vec!["requests".to_string()]);
        let (lines, progress) = drain(&mut rx);
        assert_eq!(lines[0], "args: install --user requests==2.31.0");
        assert!(lines.contains(&"Downloading 100%".to_string()));
        assert_eq!(progress, vec!["Downloading 10%".to_string()]);
        assert!(result.raw_output.contains("Successfully installed requests==2.31.0"));
    }

    #[test]
    fn failure_is_classified_from_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let python = write_fake_python(
            dir.path(),
            r#"echo "ERROR: Could not find a version that satisfies the requirement nosuch" >&2
exit 1"#,
        );
        let pip = Pip::new(python.to_string_lossy());
        let request = OperationRequest::install("nosuch", None, InstallFlags::default()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = run_request(&pip, &request, &CancelToken::new(), &tx).unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.classified_error, Some(ErrorKind::NotFound));
        assert_eq!(result.failed_target.as_deref(), Some("nosuch"));
    }

    #[test]
    fn batch_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let python = write_fake_python(
            dir.path(),
            &format!(
                r#"echo "$3" >> '{}'
if [ "$3" = "B" ]; then echo "ERROR: Cannot uninstall 'B'"; exit 1; fi
echo "Successfully uninstalled $3""#,
                log.display()
            ),
        );
        let pip = Pip::new(python.to_string_lossy());
        let packages: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = run_uninstall_batch(&pip, &packages, &CancelToken::new(), &tx).unwrap();

        assert_eq!(result.completed, vec!["A".to_string()]);
        assert_eq!(result.failed_target.as_deref(), Some("B"));
        assert_eq!(result.classified_error, Some(ErrorKind::DependencyConflict));
        assert_eq!(result.exit_code, 1);
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().collect::<Vec<_>>(), ["A", "B"]);
    }

    #[test]
    fn error_text_does_not_override_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let python = write_fake_python(
            dir.path(),
            r#"echo "ERROR: Could not find a version that satisfies the requirement x"
exit 0"#,
        );
        let pip = Pip::new(python.to_string_lossy());
        let request = OperationRequest::install("x", None, InstallFlags::default()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = run_request(&pip, &request, &CancelToken::new(), &tx).unwrap();

        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.classified_error, None);
        assert_eq!(result.completed, vec!["x".to_string()]);
        assert_eq!(result.failed_target, None);
    }

    #[test]
    fn batch_keeps_completed_when_later_launch_fails() {
        let dir = tempfile::tempdir().unwrap();
        // 第一次调用后解释器消失，第二个包无法启动
        let python = write_fake_python(
            dir.path(),
            r#"echo "Successfully uninstalled $3"
rm -f "$0""#,
        );
        let pip = Pip::new(python.to_string_lossy());
        let packages: Vec<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = run_uninstall_batch(&pip, &packages, &CancelToken::new(), &tx).unwrap();

        assert_eq!(result.completed, vec!["A".to_string()]);
        assert_eq!(result.failed_target.as_deref(), Some("B"));
        assert_eq!(result.exit_code, -1);
        assert!(!result.success());
        assert!(result.launch_error.is_some());
        assert!(result.raw_output.contains("Successfully uninstalled A"));
    }

    #[test]
    fn batch_launch_failure_on_first_package_is_an_error() {
        let pip = Pip::new("/nonexistent/python-for-tests");
        let packages = vec!["A".to_string()];
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = run_uninstall_batch(&pip, &packages, &CancelToken::new(), &tx).unwrap_err();
        assert!(err.is_critical());
    }

    #[test]
    fn cancelled_request_with_zero_exit_reads_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let python = write_fake_python(dir.path(), "echo \"Successfully installed quick\"");
        let pip = Pip::new(python.to_string_lossy());
        let request = OperationRequest::install("quick", None, InstallFlags::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = run_request(&pip, &request, &token, &tx).unwrap();

        assert!(result.cancelled);
        assert_ne!(result.exit_code, 0);
        assert!(!result.success());
        assert_eq!(result.completed, Vec::<String>::new());
        assert_eq!(result.failed_target.as_deref(), Some("quick"));
        let (lines, _) = drain(&mut rx);
        assert!(lines.is_empty());
    }

    #[test]
    fn cancel_stops_output_and_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let python = write_fake_python(
            dir.path(),
            r#"echo "Collecting slowpkg"
sleep 30
echo "never printed""#,
        );
        let pip = Pip::new(python.to_string_lossy());
        let request = OperationRequest::install("slowpkg", None, InstallFlags::default()).unwrap();
        let token = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(300));
                token.cancel();
            })
        };
        let started = Instant::now();
        let result = run_request(&pip, &request, &token, &tx).unwrap();
        canceller.join().unwrap();

        assert!(result.cancelled);
        assert!(!result.success());
        assert_eq!(result.classified_error, None);
        assert!(started.elapsed() < Duration::from_secs(20));
        let (lines, _) = drain(&mut rx);
        assert!(!lines.iter().any(|l| l.contains("never printed")));
    }

    #[test]
    fn launch_failure_is_an_error() {
        let pip = Pip::new("/nonexistent/python-for-tests");
        let request = OperationRequest::uninstall("six").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = run_request(&pip, &request, &CancelToken::new(), &tx).unwrap_err();
        assert!(err.is_critical());
    }
}

mod input;
mod install;
mod layout;
mod mirror;
mod packages;
mod state;
mod theme;

use crate::config::Config;
use crate::error::PipError;
use crate::package_manager::{OperationEvent, Verb};
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use state::{App, AppEvent, AppMode, Notice};
use std::io;
use tokio::sync::mpsc::{self, error::TryRecvError};

pub async fn run(config: Config) -> Result<()> {
    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&config);
    log::info!(
        "使用解释器 {}，pip 配置文件 {}",
        config.python,
        app.mirrors.config_path().display()
    );

    let (tx, mut rx) = mpsc::channel(32);

    // 检测 pip 是否可用
    let pip = app.session.pip().clone();
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let available = tokio::task::spawn_blocking(move || pip.check_available())
            .await
            .unwrap_or(false);
        let _ = tx_clone.send(AppEvent::PipChecked(available)).await;
    });

    packages::spawn_refresh(&mut app, &tx);

    // 主循环
    loop {
        app.tick = app.tick.wrapping_add(1);
        packages::execute_pending_filter(&mut app);

        let term_size = terminal.size()?;
        app.output
            .clamp(layout::visible_content_height(term_size.height));

        terminal.draw(|f| ui(f, &app))?;

        // 处理按键
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                handle_key(key, &mut app, &tx, term_size.height);
            }
        }

        // 处理异步事件
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::PipChecked(available) => {
                    app.pip_available = Some(available);
                    if available {
                        log::info!("pip 可用");
                    } else {
                        log::error!("{} -m pip 不可用", app.session.pip().interpreter());
                        app.output.add_status("错误: 未找到有效的pip环境");
                        app.notice = Some(Notice::Critical(PipError::PipUnavailable.to_string()));
                    }
                }
                AppEvent::PackagesLoaded(result) => {
                    packages::handle_packages_loaded(&mut app, result);
                }
            }
        }

        poll_operation(&mut app, &tx);

        if app.should_quit {
            break;
        }
    }

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    // 终止仍在运行的 pip 进程后再退出
    if let Some(op) = app.operation.take() {
        op.handle.shutdown().await;
    }

    Ok(())
}

fn handle_key(
    key: event::KeyEvent,
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    term_height: u16,
) {
    if key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
    {
        app.cancel_operation();
        app.should_quit = true;
        return;
    }

    // 提示框打开时任意键关闭
    if app.notice.take().is_some() {
        return;
    }

    let editing = app.packages.confirm.is_some() || app.mirror.editing_custom;
    match key.code {
        KeyCode::Tab if !editing => {
            app.mode = app.mode.next();
            if app.mode == AppMode::Mirror {
                app.refresh_mirror_status();
            }
        }
        KeyCode::Esc if app.operation.is_some() && !editing => app.cancel_operation(),
        KeyCode::Esc if app.mode == AppMode::Install => app.mode = AppMode::Packages,
        KeyCode::Esc if app.mode == AppMode::Mirror && !editing => app.mode = AppMode::Packages,
        _ => {
            match app.mode {
                AppMode::Packages => {
                    packages::handle_packages_key(key, app, tx, term_height);
                }
                AppMode::Install => {
                    install::handle_install_key(key, app, term_height);
                }
                AppMode::Mirror => {
                    mirror::handle_mirror_key(key, app);
                }
            }
        }
    }
}

/// 取出正在执行的操作产生的事件
fn poll_operation(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(op) = app.operation.as_mut() else {
        return;
    };
    let verb = op.verb;
    let mut finished = None;
    loop {
        match op.handle.events.try_recv() {
            Ok(OperationEvent::Line(line)) => {
                app.output.progress.clear();
                app.output.add_line(line);
            }
            Ok(OperationEvent::Progress(text)) => app.output.progress = text,
            Ok(event @ (OperationEvent::Completed(_) | OperationEvent::Aborted(_))) => {
                finished = Some(event);
                break;
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                finished = Some(OperationEvent::Aborted(PipError::Internal(
                    "操作意外结束".to_string(),
                )));
                break;
            }
        }
    }

    let Some(event) = finished else {
        return;
    };
    app.operation = None;
    app.output.progress.clear();
    match event {
        OperationEvent::Completed(result) => match verb {
            Verb::Install => install::handle_install_complete(app, result, tx),
            Verb::Uninstall => packages::handle_uninstall_complete(app, result, tx),
            Verb::ListInstalled | Verb::CheckAvailable => {}
        },
        OperationEvent::Aborted(e) => {
            let message = format!("{}失败: {}", verb, e);
            app.output.add_status(&format!("错误: {}", message));
            app.status = message.clone();
            app.notice = Some(if e.is_critical() {
                Notice::Critical(message)
            } else {
                Notice::Error(message)
            });
            // 卸载中止时以实际安装状态为准
            if verb == Verb::Uninstall {
                packages::spawn_refresh(app, tx);
            }
        }
        OperationEvent::Line(_) | OperationEvent::Progress(_) => {}
    }
}

fn ui(f: &mut Frame, app: &App) {
    match app.mode {
        AppMode::Packages => packages::render_packages(f, app),
        AppMode::Install => install::render_install(f, app),
        AppMode::Mirror => mirror::render_mirror(f, app),
    }

    if let Some(notice) = &app.notice {
        let (title, color, message) = match notice {
            Notice::Warning(m) => ("警告", theme::WARN, m),
            Notice::Error(m) => ("错误", theme::ERR, m),
            Notice::Critical(m) => ("严重错误", theme::ERR, m),
        };
        let body: Vec<String> = message.lines().map(str::to_string).collect();
        layout::render_popup(f, title, &body, color, "按任意键关闭");
    }
}

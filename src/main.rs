mod config;
mod error;
mod mirror;
mod package_manager;
mod tui;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // 日志默认输出到 stderr，TUI 运行期间需要时用 RUST_LOG + 2>file 查看
    env_logger::init();

    let config = config::Config::load_or_default()?;

    tui::run(config).await?;

    Ok(())
}

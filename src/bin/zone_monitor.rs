/// 多路摄像头区域监控 (Zone Monitor)
///
/// 系统架构:
/// 1. 工作线程: 每路摄像头一个, 取帧 → 检测 → 区域跟踪 → 测速 → 录像
/// 2. 控制线程: 标准输入按键 → 控制命令
/// 3. 主线程:   显示循环, 广播控制命令, 关闭时输出最终统计 (退出按键或 Ctrl-C)
use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zone_monitor::pipeline::{spawn_stdin_reader, Viewer};
use zone_monitor::{AppConfig, Orchestrator};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 区域监控参数
#[derive(Parser, Debug)]
#[command(author, version, about = "多路摄像头区域监控 - 停留时间/速度/目标录像", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "zone_monitor.json")]
    config: PathBuf,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 预览图输出目录 (覆盖配置中的 preview_dir)
    #[arg(long)]
    headless_preview: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zone_monitor={}", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 区域监控系统启动");

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(dir) = args.headless_preview {
        config.output.preview_dir = Some(dir);
    }
    config.print_summary();
    config
        .create_directories()
        .context("creating output directories")?;

    let mut viewer = Viewer::new(config.video.resize_factor, config.output.preview_dir.clone());
    let keys = config.controls.clone();

    let mut orchestrator = Orchestrator::from_config(config);
    if orchestrator.start() == 0 {
        info!("没有找到可用的摄像头, 程序结束");
        return Ok(());
    }

    // Ctrl-C 与退出按键走同一条关闭路径: 停止标志 → run 返回 → shutdown → 最终统计
    let stop = orchestrator.stop_flag();
    ctrlc::set_handler(move || {
        info!("🛑 收到中断信号, 正在停止...");
        stop.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let (cmd_tx, cmd_rx) = unbounded();
    // 读取线程在stdin上阻塞, 不等待其结束
    let _stdin = spawn_stdin_reader(keys, cmd_tx);

    orchestrator.run(Some(cmd_rx), &mut viewer);
    orchestrator.shutdown();

    let reports = orchestrator.final_report();
    Orchestrator::print_final_report(&reports);
    info!("👋 区域监控已停止");
    Ok(())
}

//! NetTune Service - 无界面调优服务
//!
//! 提供:
//! - 按配置文件中的方案调优选定网卡
//! - 汇总并记录每一项的结果
//! - 收到 Ctrl-C 后还原启动时的设置

use anyhow::Context;
use nettune_core::platform::{
    create_capabilities, has_admin_privileges, list_interfaces, missing_tools,
};
use nettune_core::{AppConfig, ApplyResult, DesiredState, PowerSaveMechanism, TuningSession};
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("NetTune Service 启动中...");

    // 检查权限与依赖
    if !has_admin_privileges() {
        warn!("未检测到root权限，写入操作很可能失败");
    }
    let missing = missing_tools();
    if !missing.is_empty() {
        warn!("缺少外部工具: {}", missing.join(", "));
    }

    let config = AppConfig::load().context("加载配置失败")?;
    let interface = match config.interface.clone() {
        Some(name) => name,
        None => list_interfaces()
            .context("无法列出网络接口")?
            .into_iter()
            .next()
            .context("没有可用的网络接口")?,
    };

    // 必须在执行任何命令之前注册，否则应用期间的 Ctrl-C 会直接结束进程
    let shutdown = if config.restore_on_exit {
        let mut interrupt = signal(SignalKind::interrupt()).context("无法监听退出信号")?;
        Some(async move {
            interrupt.recv().await;
        })
    } else {
        None
    };

    let session = Arc::new(TuningSession::new(create_capabilities(&config)));
    run(session, interface, config.profile.clone(), shutdown).await?;
    Ok(())
}

/// 采集、应用；给出 `shutdown` 时等待其完成后还原，并返回还原结果
async fn run<F>(
    session: Arc<TuningSession>,
    interface: String,
    profile: DesiredState,
    shutdown: Option<F>,
) -> anyhow::Result<Option<ApplyResult>>
where
    F: Future<Output = ()>,
{
    let selection = {
        let session = Arc::clone(&session);
        let interface = interface.clone();
        tokio::task::spawn_blocking(move || session.select_interface(&interface)).await?
    };
    for warning in &selection.warnings {
        warn!("采集原始状态: {}", warning);
    }
    info!(
        "网卡 {}: TSO={} GSO={} GRO={} 省电={}",
        interface,
        selection.snapshot.tso,
        selection.snapshot.gso,
        selection.snapshot.gro,
        selection
            .snapshot
            .power_save
            .map(|on| on.to_string())
            .unwrap_or_else(|| "不适用".into()),
    );

    let result = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.apply(&profile)).await??
    };
    report("应用", &result);

    let Some(shutdown) = shutdown else {
        return Ok(None);
    };

    info!("设置已生效，按 Ctrl-C 还原并退出");
    shutdown.await;

    let result = tokio::task::spawn_blocking(move || session.reset()).await??;
    report("还原", &result);
    Ok(Some(result))
}

fn report(action: &str, result: &ApplyResult) {
    for (field, failure) in &result.failed {
        error!("{}失败 [{}]: {}", action, field, failure);
    }
    for field in &result.skipped {
        warn!("{}跳过 [{}]: 原始值未知", action, field);
    }
    if result.power_save_mechanism == Some(PowerSaveMechanism::ConfigFallback) {
        info!("省电设置通过 NetworkManager 配置文件生效，重启 NetworkManager 后起作用");
    }
    if result.is_complete() {
        info!("{}完成，共 {} 项", action, result.succeeded.len());
    } else {
        warn!(
            "{}部分完成: 成功 {} 项，失败 {} 项，跳过 {} 项",
            action,
            result.succeeded.len(),
            result.failed.len(),
            result.skipped.len()
        );
    }
}

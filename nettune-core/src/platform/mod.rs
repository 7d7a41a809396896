//! 平台抽象层
//!
//! 提供Linux上的调优能力实现和环境检查

pub mod linux;

use crate::capability::TuningCapabilities;
use crate::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

/// 按配置创建平台能力实现
pub fn create_capabilities(config: &AppConfig) -> Arc<dyn TuningCapabilities> {
    Arc::new(linux::LinuxCapabilities::new(
        Duration::from_secs(config.command_timeout_secs),
        config.powersave_fallback_path.clone(),
    ))
}

/// 获取当前平台名称
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    { "Linux" }

    #[cfg(not(target_os = "linux"))]
    { "Unknown" }
}

/// 检查是否有root权限
pub fn has_admin_privileges() -> bool {
    linux::is_root()
}

pub use linux::{list_interfaces, missing_tools};

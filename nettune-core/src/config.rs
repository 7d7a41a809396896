//! 配置持久化模块
//!
//! 保存首选网卡、调优方案和命令超时等设置

use crate::desired::DesiredState;
use crate::platform::linux::DEFAULT_FALLBACK_PATH;
use crate::{Result, TuneError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置（持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 首选网卡，None 时使用第一个非回环网卡
    pub interface: Option<String>,

    /// 期望的调优方案
    pub profile: DesiredState,

    /// 单条外部命令的超时（秒）
    pub command_timeout_secs: u64,

    /// 省电回退配置文件路径
    pub powersave_fallback_path: PathBuf,

    /// 服务退出时是否还原原始设置
    pub restore_on_exit: bool,

    /// 配置版本（用于迁移）
    pub version: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: None,
            profile: DesiredState::default(),
            command_timeout_secs: 5,
            powersave_fallback_path: PathBuf::from(DEFAULT_FALLBACK_PATH),
            restore_on_exit: true,
            version: 1,
        }
    }
}

impl AppConfig {
    /// 获取配置文件路径
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Ok(config_dir.join("nettune").join("config.json"))
    }

    /// 从默认位置加载配置，文件不存在时返回默认值
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| TuneError::Config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到默认位置
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| TuneError::Config(format!("配置序列化失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(TuneError::InvalidParameter("command_timeout_secs 必须大于 0".into()));
        }
        if self.interface.as_deref() == Some("lo") {
            return Err(TuneError::InvalidParameter("不能选择回环网卡 lo".into()));
        }
        Ok(())
    }
}

/// 配置目录相关函数
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

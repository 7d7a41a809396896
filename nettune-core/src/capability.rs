//! 系统能力抽象层
//!
//! 核心逻辑只把"读取网卡X的卸载状态"、"写入sysctl键K=V"视为可能失败的调用，
//! 具体命令行由平台实现负责（见 `platform::linux`）。

use crate::{Field, Result};
use serde::{Deserialize, Serialize};

/// 开关值，对应命令行中的 `on` / `off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    /// `enabled == true` 对应 `On`
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled { Toggle::On } else { Toggle::Off }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Toggle::On => "on",
            Toggle::Off => "off",
        }
    }
}

impl std::fmt::Display for Toggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 网卡卸载特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffloadFeature {
    Tso,
    Gso,
    Gro,
}

impl OffloadFeature {
    pub const ALL: [OffloadFeature; 3] =
        [OffloadFeature::Tso, OffloadFeature::Gso, OffloadFeature::Gro];

    /// ethtool -K 使用的短名
    pub fn short_name(&self) -> &'static str {
        match self {
            OffloadFeature::Tso => "tso",
            OffloadFeature::Gso => "gso",
            OffloadFeature::Gro => "gro",
        }
    }

    /// ethtool -k 输出中的长名
    pub fn long_name(&self) -> &'static str {
        match self {
            OffloadFeature::Tso => "tcp-segmentation-offload",
            OffloadFeature::Gso => "generic-segmentation-offload",
            OffloadFeature::Gro => "generic-receive-offload",
        }
    }

    pub fn field(&self) -> Field {
        match self {
            OffloadFeature::Tso => Field::Tso,
            OffloadFeature::Gso => Field::Gso,
            OffloadFeature::Gro => Field::Gro,
        }
    }
}

/// 受管理的全局内核参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SysctlKey {
    RmemMax,
    WmemMax,
    TcpCongestionControl,
}

impl SysctlKey {
    pub const ALL: [SysctlKey; 3] =
        [SysctlKey::RmemMax, SysctlKey::WmemMax, SysctlKey::TcpCongestionControl];

    pub fn as_str(&self) -> &'static str {
        match self {
            SysctlKey::RmemMax => "net.core.rmem_max",
            SysctlKey::WmemMax => "net.core.wmem_max",
            SysctlKey::TcpCongestionControl => "net.ipv4.tcp_congestion_control",
        }
    }

    pub fn field(&self) -> Field {
        match self {
            SysctlKey::RmemMax => Field::RmemMax,
            SysctlKey::WmemMax => Field::WmemMax,
            SysctlKey::TcpCongestionControl => Field::CongestionControl,
        }
    }
}

/// 一次卸载状态读取的结果，输出中缺失的项为 None
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadReading {
    pub tso: Option<bool>,
    pub gso: Option<bool>,
    pub gro: Option<bool>,
}

impl OffloadReading {
    pub fn get(&self, feature: OffloadFeature) -> Option<bool> {
        match feature {
            OffloadFeature::Tso => self.tso,
            OffloadFeature::Gso => self.gso,
            OffloadFeature::Gro => self.gro,
        }
    }

    pub fn set(&mut self, feature: OffloadFeature, enabled: bool) {
        match feature {
            OffloadFeature::Tso => self.tso = Some(enabled),
            OffloadFeature::Gso => self.gso = Some(enabled),
            OffloadFeature::Gro => self.gro = Some(enabled),
        }
    }
}

/// 系统调优能力 trait
///
/// 所有写操作都需要root权限，调用方负责在进程启动时提权。
/// 每个调用都是阻塞的，可能耗时较长。
pub trait TuningCapabilities: Send + Sync {
    /// 读取网卡当前的卸载状态
    fn read_offload(&self, interface: &str) -> Result<OffloadReading>;

    /// 设置单个卸载特性
    fn set_offload(&self, interface: &str, feature: OffloadFeature, value: Toggle) -> Result<()>;

    /// 读取无线省电状态，失败意味着该网卡不支持（如有线网卡）
    fn read_power_save(&self, interface: &str) -> Result<bool>;

    /// 通过无线驱动设置省电模式
    fn set_power_save(&self, interface: &str, value: Toggle) -> Result<()>;

    /// 写入让网络管理器关闭wifi省电的配置文件
    fn write_power_save_fallback(&self) -> Result<()>;

    /// 读取内核参数原始文本
    fn read_sysctl(&self, key: SysctlKey) -> Result<String>;

    /// 写入内核参数
    fn write_sysctl(&self, key: SysctlKey, value: &str) -> Result<()>;
}

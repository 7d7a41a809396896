//! NetTune Core - Linux网络调优状态管理核心库
//!
//! 提供：
//! - 网卡卸载（TSO/GSO/GRO）、无线省电、内核缓冲区、TCP拥塞控制的读写抽象
//! - 启动时"原始状态"快照（按网卡、全局各一次）
//! - 容忍部分失败的应用引擎，以及省电设置的配置文件回退
//! - 按快照精确还原

pub mod capability;
pub mod config;
pub mod desired;
pub mod snapshot;
pub mod apply;
pub mod reset;
pub mod session;
pub mod platform;

pub use capability::*;
pub use desired::*;
pub use snapshot::*;
pub use apply::*;
pub use reset::reset;
pub use session::*;
pub use config::AppConfig;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("需要root权限")]
    PermissionDenied,

    #[error("命令 {program} 执行失败: {message}")]
    CommandFailed { program: String, message: String },

    #[error("命令 {program} 超时（{timeout:?}）")]
    Timeout { program: String, timeout: std::time::Duration },

    #[error("参数无效: {0}")]
    InvalidParameter(String),

    #[error("未选择网络接口")]
    NoInterfaceSelected,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TuneError>;

/// 可被应用/还原的单个设置项
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Field {
    Tso,
    Gso,
    Gro,
    PowerSave,
    RmemMax,
    WmemMax,
    CongestionControl,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Tso => write!(f, "TSO"),
            Field::Gso => write!(f, "GSO"),
            Field::Gro => write!(f, "GRO"),
            Field::PowerSave => write!(f, "power saving"),
            Field::RmemMax => write!(f, "net.core.rmem_max"),
            Field::WmemMax => write!(f, "net.core.wmem_max"),
            Field::CongestionControl => write!(f, "net.ipv4.tcp_congestion_control"),
        }
    }
}

//! 应用引擎
//!
//! 按固定顺序执行相互独立的写操作，任何一步失败都不会阻止后续步骤，
//! 失败按字段汇总返回。已生效的修改不回滚，重新应用即可恢复。

use crate::capability::{OffloadFeature, SysctlKey, Toggle, TuningCapabilities};
use crate::desired::DesiredState;
use crate::snapshot::InterfaceSnapshot;
use crate::Field;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// 单个字段的失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldFailure {
    /// 主机制写入失败
    Write { reason: String },
    /// 主机制失败后，配置文件回退也失败
    Fallback { primary: String, fallback: String },
}

impl std::fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldFailure::Write { reason } => write!(f, "{}", reason),
            FieldFailure::Fallback { primary, fallback } => {
                write!(f, "{}（配置文件回退也失败: {}）", primary, fallback)
            }
        }
    }
}

/// 省电设置最终通过哪种方式生效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSaveMechanism {
    /// 无线驱动直接设置
    Radio,
    /// 写入网络管理器配置文件
    ConfigFallback,
}

/// 应用/还原的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: BTreeSet<Field>,
    pub failed: BTreeMap<Field, FieldFailure>,
    /// 原始值未知，没有尝试还原
    pub skipped: BTreeSet<Field>,
    pub power_save_mechanism: Option<PowerSaveMechanism>,
}

impl ApplyResult {
    /// 没有失败也没有跳过
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// 部分成功：至少有一项失败
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, field: Field, outcome: std::result::Result<(), FieldFailure>) {
        match outcome {
            Ok(()) => {
                self.succeeded.insert(field);
            }
            Err(failure) => {
                self.failed.insert(field, failure);
            }
        }
    }
}

/// 设置单个卸载特性
pub(crate) fn write_offload(
    caps: &dyn TuningCapabilities,
    interface: &str,
    feature: OffloadFeature,
    value: Toggle,
    result: &mut ApplyResult,
) {
    let outcome = match caps.set_offload(interface, feature, value) {
        Ok(()) => {
            info!("已将 {} 的 {} 设为 {}", interface, feature.short_name(), value);
            Ok(())
        }
        Err(e) => {
            warn!("设置 {} 的 {} 失败: {}", interface, feature.short_name(), e);
            Err(FieldFailure::Write { reason: e.to_string() })
        }
    };
    result.record(feature.field(), outcome);
}

/// 设置省电模式；只有在关闭省电失败时才回退到配置文件
pub(crate) fn write_power_save(
    caps: &dyn TuningCapabilities,
    interface: &str,
    value: Toggle,
    result: &mut ApplyResult,
) {
    let primary = match caps.set_power_save(interface, value) {
        Ok(()) => {
            info!("已通过无线驱动将 {} 的省电模式设为 {}", interface, value);
            result.power_save_mechanism = Some(PowerSaveMechanism::Radio);
            result.record(Field::PowerSave, Ok(()));
            return;
        }
        Err(e) => e,
    };

    if value == Toggle::On {
        warn!("开启 {} 的省电模式失败: {}", interface, primary);
        result.record(Field::PowerSave, Err(FieldFailure::Write { reason: primary.to_string() }));
        return;
    }

    warn!("无线驱动关闭 {} 省电失败，改写网络管理器配置: {}", interface, primary);
    let outcome = match caps.write_power_save_fallback() {
        Ok(()) => {
            info!("已通过网络管理器配置关闭 {} 的省电模式", interface);
            result.power_save_mechanism = Some(PowerSaveMechanism::ConfigFallback);
            Ok(())
        }
        Err(fallback) => {
            warn!("配置文件回退同样失败: {}", fallback);
            Err(FieldFailure::Fallback {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            })
        }
    };
    result.record(Field::PowerSave, outcome);
}

/// 写入一个内核参数
pub(crate) fn write_sysctl(
    caps: &dyn TuningCapabilities,
    key: SysctlKey,
    value: &str,
    result: &mut ApplyResult,
) {
    let outcome = match caps.write_sysctl(key, value) {
        Ok(()) => {
            info!("已将 {} 设为 {}", key.as_str(), value);
            Ok(())
        }
        Err(e) => {
            warn!("设置 {} 失败: {}", key.as_str(), e);
            Err(FieldFailure::Write { reason: e.to_string() })
        }
    };
    result.record(key.field(), outcome);
}

/// 按期望状态应用全部设置
pub fn apply(
    caps: &dyn TuningCapabilities,
    interface: &str,
    desired: &DesiredState,
    snapshot: &InterfaceSnapshot,
) -> ApplyResult {
    let mut result = ApplyResult::default();

    for (feature, disable) in [
        (OffloadFeature::Tso, desired.disable_tso),
        (OffloadFeature::Gso, desired.disable_gso),
        (OffloadFeature::Gro, desired.disable_gro),
    ] {
        write_offload(caps, interface, feature, Toggle::from_enabled(!disable), &mut result);
    }

    if snapshot.power_save_applicable() {
        let value = Toggle::from_enabled(!desired.disable_power_save);
        write_power_save(caps, interface, value, &mut result);
    }

    let bytes = desired.buffer_tier.bytes().to_string();
    write_sysctl(caps, SysctlKey::RmemMax, &bytes, &mut result);
    write_sysctl(caps, SysctlKey::WmemMax, &bytes, &mut result);

    let algorithm = desired.congestion_algorithm.as_str();
    write_sysctl(caps, SysctlKey::TcpCongestionControl, algorithm, &mut result);

    if result.is_partial() {
        warn!("应用设置部分失败: {} 项", result.failed.len());
    } else {
        info!("全部设置已应用到 {}", interface);
    }
    result
}

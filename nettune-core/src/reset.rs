//! 还原引擎
//!
//! 按快照写回原始值。全局参数直接写回采集到的原始文本，
//! 采集失败的字段不写入，记入 `skipped`。

use crate::apply::{write_offload, write_power_save, write_sysctl, ApplyResult};
use crate::capability::{OffloadFeature, SysctlKey, Toggle, TuningCapabilities};
use crate::snapshot::{GlobalSnapshot, InterfaceSnapshot};
use tracing::{info, warn};

pub fn reset(
    caps: &dyn TuningCapabilities,
    interface: &str,
    snapshot: &InterfaceSnapshot,
    global: &GlobalSnapshot,
) -> ApplyResult {
    let mut result = ApplyResult::default();

    for feature in OffloadFeature::ALL {
        let value = Toggle::from_enabled(snapshot.offload(feature));
        write_offload(caps, interface, feature, value, &mut result);
    }

    if let Some(on) = snapshot.power_save {
        write_power_save(caps, interface, Toggle::from_enabled(on), &mut result);
    }

    for key in SysctlKey::ALL {
        match global.get(key) {
            Some(raw) => write_sysctl(caps, key, raw, &mut result),
            None => {
                warn!("{} 的原始值未知，不做还原", key.as_str());
                result.skipped.insert(key.field());
            }
        }
    }

    if result.is_complete() {
        info!("{} 及全局参数已还原为启动时的状态", interface);
    }
    result
}

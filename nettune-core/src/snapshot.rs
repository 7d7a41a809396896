//! 原始状态快照
//!
//! 每个网卡在第一次被选中时采集一次，全局参数在进程内只采集一次。
//! 采集后不再修改，用于精确还原。

use crate::capability::{OffloadFeature, SysctlKey, TuningCapabilities};
use crate::Field;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// 单个网卡的原始状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSnapshot {
    /// true 表示卸载处于开启状态；检测失败时按开启处理
    pub tso: bool,
    pub gso: bool,
    pub gro: bool,

    /// None 表示该网卡不支持省电设置（如有线网卡），与"已关闭"不同
    pub power_save: Option<bool>,
}

impl InterfaceSnapshot {
    pub fn offload(&self, feature: OffloadFeature) -> bool {
        match feature {
            OffloadFeature::Tso => self.tso,
            OffloadFeature::Gso => self.gso,
            OffloadFeature::Gro => self.gro,
        }
    }

    pub fn power_save_applicable(&self) -> bool {
        self.power_save.is_some()
    }
}

/// 全局内核参数的原始文本，None 表示读取失败，还原时跳过
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub rmem_max: Option<String>,
    pub wmem_max: Option<String>,
    pub tcp_congestion_control: Option<String>,
}

impl GlobalSnapshot {
    pub fn get(&self, key: SysctlKey) -> Option<&str> {
        match key {
            SysctlKey::RmemMax => self.rmem_max.as_deref(),
            SysctlKey::WmemMax => self.wmem_max.as_deref(),
            SysctlKey::TcpCongestionControl => self.tcp_congestion_control.as_deref(),
        }
    }

    fn set(&mut self, key: SysctlKey, value: String) {
        match key {
            SysctlKey::RmemMax => self.rmem_max = Some(value),
            SysctlKey::WmemMax => self.wmem_max = Some(value),
            SysctlKey::TcpCongestionControl => self.tcp_congestion_control = Some(value),
        }
    }
}

/// 采集过程中的非致命问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureWarning {
    pub field: Field,
    pub reason: String,
}

impl std::fmt::Display for CaptureWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// 采集结果；`fresh == false` 表示命中缓存，此时没有发生任何读取
#[derive(Debug, Clone)]
pub struct Capture<T> {
    pub snapshot: Arc<T>,
    pub warnings: Vec<CaptureWarning>,
    pub fresh: bool,
}

/// 网卡生命周期：Unseen -> Captured，之后不再变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Unseen,
    Captured,
}

/// 快照存储
///
/// "检查缓存、采集、插入"在同一把锁内完成，读者看不到半成品。
#[derive(Default)]
pub struct SnapshotStore {
    interfaces: Mutex<HashMap<String, Arc<InterfaceSnapshot>>>,
    global: Mutex<Option<Arc<GlobalSnapshot>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // 条目在发布前已完整构造，锁中毒时数据仍然一致
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取网卡快照，首次调用时采集
    pub fn capture_interface(
        &self,
        caps: &dyn TuningCapabilities,
        name: &str,
    ) -> Capture<InterfaceSnapshot> {
        let mut interfaces = lock(&self.interfaces);
        if let Some(existing) = interfaces.get(name) {
            debug!("复用网卡 {} 的快照", name);
            return Capture { snapshot: Arc::clone(existing), warnings: Vec::new(), fresh: false };
        }

        let (snapshot, warnings) = probe_interface(caps, name);
        let snapshot = Arc::new(snapshot);
        interfaces.insert(name.to_string(), Arc::clone(&snapshot));
        Capture { snapshot, warnings, fresh: true }
    }

    /// 获取全局快照，进程内只采集一次
    pub fn capture_global(&self, caps: &dyn TuningCapabilities) -> Capture<GlobalSnapshot> {
        let mut global = lock(&self.global);
        if let Some(existing) = global.as_ref() {
            return Capture { snapshot: Arc::clone(existing), warnings: Vec::new(), fresh: false };
        }

        let mut snapshot = GlobalSnapshot::default();
        let mut warnings = Vec::new();
        for key in SysctlKey::ALL {
            match caps.read_sysctl(key) {
                Ok(raw) => snapshot.set(key, raw.trim().to_string()),
                Err(e) => {
                    warn!("无法读取 {}: {}", key.as_str(), e);
                    warnings.push(CaptureWarning { field: key.field(), reason: e.to_string() });
                }
            }
        }

        let snapshot = Arc::new(snapshot);
        *global = Some(Arc::clone(&snapshot));
        Capture { snapshot, warnings, fresh: true }
    }

    pub fn interface(&self, name: &str) -> Option<Arc<InterfaceSnapshot>> {
        lock(&self.interfaces).get(name).cloned()
    }

    pub fn global(&self) -> Option<Arc<GlobalSnapshot>> {
        lock(&self.global).clone()
    }

    pub fn interface_state(&self, name: &str) -> InterfaceState {
        if lock(&self.interfaces).contains_key(name) {
            InterfaceState::Captured
        } else {
            InterfaceState::Unseen
        }
    }
}

/// 读取网卡当前状态，不经过缓存
pub fn probe_interface(
    caps: &dyn TuningCapabilities,
    name: &str,
) -> (InterfaceSnapshot, Vec<CaptureWarning>) {
    let mut warnings = Vec::new();

    let reading = match caps.read_offload(name) {
        Ok(reading) => Some(reading),
        Err(e) => {
            warn!("无法获取 {} 的卸载设置，按全部开启处理: {}", name, e);
            warnings.extend(OffloadFeature::ALL.iter().map(|f| CaptureWarning {
                field: f.field(),
                reason: e.to_string(),
            }));
            None
        }
    };

    let mut flags = [true; 3];
    if let Some(reading) = reading {
        for (slot, feature) in flags.iter_mut().zip(OffloadFeature::ALL) {
            match reading.get(feature) {
                Some(enabled) => *slot = enabled,
                None => {
                    warn!("{} 的输出中没有 {}，按开启处理", name, feature.long_name());
                    warnings.push(CaptureWarning {
                        field: feature.field(),
                        reason: format!("{} 未出现在输出中", feature.long_name()),
                    });
                }
            }
        }
    }

    // 读取失败是非无线网卡的正常情况，不算警告
    let power_save = match caps.read_power_save(name) {
        Ok(on) => Some(on),
        Err(e) => {
            debug!("{} 不支持省电设置: {}", name, e);
            None
        }
    };

    let [tso, gso, gro] = flags;
    (InterfaceSnapshot { tso, gso, gro, power_save }, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fake::{Call, FakeCapabilities};
    use crate::capability::OffloadReading;

    #[test]
    fn capture_is_idempotent() {
        let caps = FakeCapabilities::wireless();
        let store = SnapshotStore::new();

        let first = store.capture_interface(&caps, "wlan0");
        assert!(first.fresh);
        let reads_after_first = caps.reads().len();
        assert_eq!(reads_after_first, 2);

        let second = store.capture_interface(&caps, "wlan0");
        assert!(!second.fresh);
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(caps.reads().len(), reads_after_first);
    }

    #[test]
    fn offload_read_failure_assumes_enabled() {
        let caps = FakeCapabilities::wired().failing_offload_read();
        let store = SnapshotStore::new();

        let capture = store.capture_interface(&caps, "eth0");
        let snap = capture.snapshot;
        assert!(snap.tso && snap.gso && snap.gro);
        assert_eq!(capture.warnings.len(), 3);
        assert_eq!(capture.warnings[0].field, Field::Tso);
    }

    #[test]
    fn missing_flag_assumes_enabled() {
        let caps = FakeCapabilities::wired().with_offload(OffloadReading {
            tso: Some(false),
            gso: None,
            gro: Some(false),
        });
        let capture = SnapshotStore::new().capture_interface(&caps, "eth0");
        assert_eq!(
            *capture.snapshot,
            InterfaceSnapshot { tso: false, gso: true, gro: false, power_save: None }
        );
        assert_eq!(capture.warnings.len(), 1);
        assert_eq!(capture.warnings[0].field, Field::Gso);
    }

    #[test]
    fn power_save_failure_is_not_applicable() {
        let caps = FakeCapabilities::wired();
        let capture = SnapshotStore::new().capture_interface(&caps, "eth0");
        assert_eq!(capture.snapshot.power_save, None);
        assert!(!capture.snapshot.power_save_applicable());
        assert!(capture.warnings.is_empty());
    }

    #[test]
    fn power_save_disabled_is_distinct_from_unsupported() {
        let caps = FakeCapabilities::wired().with_power_save(Some(false));
        let capture = SnapshotStore::new().capture_interface(&caps, "wlan0");
        assert_eq!(capture.snapshot.power_save, Some(false));
        assert!(capture.snapshot.power_save_applicable());
    }

    #[test]
    fn global_captured_once_with_partial_failure() {
        let caps = FakeCapabilities::wired()
            .with_sysctl(SysctlKey::RmemMax, "  6291456\n")
            .failing_sysctl_read(SysctlKey::WmemMax);
        let store = SnapshotStore::new();

        let capture = store.capture_global(&caps);
        assert!(capture.fresh);
        assert_eq!(capture.snapshot.rmem_max.as_deref(), Some("6291456"));
        assert_eq!(capture.snapshot.wmem_max, None);
        assert_eq!(capture.snapshot.tcp_congestion_control.as_deref(), Some("cubic"));
        assert_eq!(capture.warnings.len(), 1);
        assert_eq!(capture.warnings[0].field, Field::WmemMax);

        let again = store.capture_global(&caps);
        assert!(!again.fresh);
        assert!(again.warnings.is_empty());
        let sysctl_reads = caps.reads().iter().filter(|c| matches!(c, Call::ReadSysctl(_))).count();
        assert_eq!(sysctl_reads, 3);
    }

    #[test]
    fn interface_state_transitions() {
        let caps = FakeCapabilities::wired();
        let store = SnapshotStore::new();
        assert_eq!(store.interface_state("eth0"), InterfaceState::Unseen);
        assert!(store.interface("eth0").is_none());
        store.capture_interface(&caps, "eth0");
        assert_eq!(store.interface_state("eth0"), InterfaceState::Captured);
        assert_eq!(store.interface_state("eth1"), InterfaceState::Unseen);
    }

    #[test]
    fn probe_bypasses_cache() {
        let caps = FakeCapabilities::wired();
        let store = SnapshotStore::new();
        store.capture_interface(&caps, "eth0");
        caps.clear_calls();

        let (live, _) = probe_interface(&caps, "eth0");
        assert_eq!(live, *store.interface("eth0").unwrap());
        assert_eq!(caps.reads().len(), 2);
    }
}

//! 网卡切换协调器
//!
//! 持有能力实现和快照存储，负责当前网卡的选择，并串行化应用/还原操作。

use crate::apply::{apply, ApplyResult};
use crate::capability::TuningCapabilities;
use crate::desired::DesiredState;
use crate::reset::reset;
use crate::snapshot::{
    probe_interface, CaptureWarning, GlobalSnapshot, InterfaceSnapshot, InterfaceState,
    SnapshotStore,
};
use crate::{Result, TuneError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// 一次网卡选择的结果
#[derive(Debug, Clone)]
pub struct Selection {
    pub interface: String,
    pub snapshot: Arc<InterfaceSnapshot>,
    pub global: Arc<GlobalSnapshot>,
    /// 网卡与全局采集产生的警告（命中缓存时为空）
    pub warnings: Vec<CaptureWarning>,
    pub fresh: bool,
}

impl Selection {
    /// 省电开关是否可用
    pub fn power_save_control_enabled(&self) -> bool {
        self.snapshot.power_save_applicable()
    }
}

pub struct TuningSession {
    caps: Arc<dyn TuningCapabilities>,
    store: SnapshotStore,
    active: Mutex<Option<String>>,
    /// 同一时刻只允许一个应用/还原操作
    op_lock: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TuningSession {
    pub fn new(caps: Arc<dyn TuningCapabilities>) -> Self {
        Self {
            caps,
            store: SnapshotStore::new(),
            active: Mutex::new(None),
            op_lock: Mutex::new(()),
        }
    }

    /// 切换当前网卡；首次选择时采集快照，之后复用
    pub fn select_interface(&self, name: &str) -> Selection {
        let iface = self.store.capture_interface(self.caps.as_ref(), name);
        let global = self.store.capture_global(self.caps.as_ref());

        if iface.fresh {
            info!("已采集 {} 的原始状态: {:?}", name, iface.snapshot);
        }
        *lock(&self.active) = Some(name.to_string());

        let mut warnings = iface.warnings;
        warnings.extend(global.warnings);
        Selection {
            interface: name.to_string(),
            snapshot: iface.snapshot,
            global: global.snapshot,
            warnings,
            fresh: iface.fresh,
        }
    }

    pub fn active_interface(&self) -> Option<String> {
        lock(&self.active).clone()
    }

    pub fn interface_state(&self, name: &str) -> InterfaceState {
        self.store.interface_state(name)
    }

    pub fn snapshot(&self, name: &str) -> Option<Arc<InterfaceSnapshot>> {
        self.store.interface(name)
    }

    pub fn global_snapshot(&self) -> Option<Arc<GlobalSnapshot>> {
        self.store.global()
    }

    /// 重新读取网卡的实时状态，不影响缓存的快照
    pub fn probe(&self, name: &str) -> (InterfaceSnapshot, Vec<CaptureWarning>) {
        probe_interface(self.caps.as_ref(), name)
    }

    /// 对当前网卡应用期望状态
    pub fn apply(&self, desired: &DesiredState) -> Result<ApplyResult> {
        let _guard = lock(&self.op_lock);
        let (interface, snapshot) = self.active_snapshot()?;
        info!("开始应用设置到 {}", interface);
        Ok(apply(self.caps.as_ref(), &interface, desired, &snapshot))
    }

    /// 将当前网卡和全局参数还原为快照；快照本身保持不变
    pub fn reset(&self) -> Result<ApplyResult> {
        let _guard = lock(&self.op_lock);
        let (interface, snapshot) = self.active_snapshot()?;
        let global = self.store.capture_global(self.caps.as_ref()).snapshot;
        info!("开始还原 {} 的原始设置", interface);
        Ok(reset(self.caps.as_ref(), &interface, &snapshot, &global))
    }

    fn active_snapshot(&self) -> Result<(String, Arc<InterfaceSnapshot>)> {
        let interface = self.active_interface().ok_or(TuneError::NoInterfaceSelected)?;
        let snapshot = self
            .store
            .interface(&interface)
            .ok_or(TuneError::NoInterfaceSelected)?;
        Ok((interface, snapshot))
    }
}

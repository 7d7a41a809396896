//! 用户期望的调优状态
//!
//! 纯数据对象，不包含任何系统调用。

use crate::snapshot::{GlobalSnapshot, InterfaceSnapshot};
use crate::{Result, TuneError};
use serde::{Deserialize, Serialize};

/// 缓冲区档位，每档 0.5 MiB，范围 1-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct BufferTier(u8);

impl BufferTier {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 8;
    pub const BYTES_PER_TIER: u64 = 524_288;

    /// 超出范围的值会被钳制到 [1, 8]
    pub fn new(tier: i64) -> Self {
        Self(tier.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// tier * 0.5 * 1048576，恰好是整数字节
    pub fn bytes(&self) -> u64 {
        u64::from(self.0) * Self::BYTES_PER_TIER
    }

    pub fn megabytes(&self) -> f64 {
        f64::from(self.0) * 0.5
    }

    pub fn preset(&self) -> BufferPreset {
        match self.0 {
            0..=2 => BufferPreset::Light,
            3..=5 => BufferPreset::Balanced,
            _ => BufferPreset::Heavy,
        }
    }

    /// 界面显示用，如 "2.0 MB (Balanced)"
    pub fn label(&self) -> String {
        format!("{:.1} MB ({})", self.megabytes(), self.preset())
    }

    /// 由内核参数原始文本推算最接近的档位
    pub fn from_sysctl(raw: &str) -> Option<Self> {
        let bytes: u64 = raw.trim().parse().ok()?;
        let tier = bytes.saturating_add(Self::BYTES_PER_TIER / 2) / Self::BYTES_PER_TIER;
        Some(Self::new(tier.min(i64::MAX as u64) as i64))
    }
}

impl Default for BufferTier {
    fn default() -> Self {
        Self(4)
    }
}

impl From<i64> for BufferTier {
    fn from(tier: i64) -> Self {
        Self::new(tier)
    }
}

impl From<BufferTier> for u8 {
    fn from(tier: BufferTier) -> Self {
        tier.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferPreset {
    Light,
    Balanced,
    Heavy,
}

impl std::fmt::Display for BufferPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferPreset::Light => write!(f, "Light"),
            BufferPreset::Balanced => write!(f, "Balanced"),
            BufferPreset::Heavy => write!(f, "Heavy"),
        }
    }
}

/// TCP拥塞控制算法（bbr 需要内核支持，这里不做检查）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionAlgorithm {
    #[default]
    Cubic,
    Bbr,
}

impl CongestionAlgorithm {
    pub const ALL: [CongestionAlgorithm; 2] =
        [CongestionAlgorithm::Cubic, CongestionAlgorithm::Bbr];

    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionAlgorithm::Cubic => "cubic",
            CongestionAlgorithm::Bbr => "bbr",
        }
    }
}

impl std::fmt::Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CongestionAlgorithm {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cubic" => Ok(CongestionAlgorithm::Cubic),
            "bbr" => Ok(CongestionAlgorithm::Bbr),
            other => Err(TuneError::InvalidParameter(format!(
                "不支持的拥塞控制算法: {}",
                other
            ))),
        }
    }
}

/// 当前期望配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub disable_tso: bool,
    pub disable_gso: bool,
    pub disable_gro: bool,

    /// 仅当网卡快照中 power_save 不为 None 时有意义
    pub disable_power_save: bool,

    pub buffer_tier: BufferTier,
    pub congestion_algorithm: CongestionAlgorithm,
}

impl DesiredState {
    /// 用全局快照初始化缓冲区档位和拥塞算法，无法识别的值保持默认
    pub fn from_globals(global: &GlobalSnapshot) -> Self {
        let mut state = Self::default();
        if let Some(tier) = global.rmem_max.as_deref().and_then(BufferTier::from_sysctl) {
            state.buffer_tier = tier;
        }
        if let Some(algo) = global.tcp_congestion_control.as_deref().and_then(|s| s.parse().ok()) {
            state.congestion_algorithm = algo;
        }
        state
    }

    /// 切换网卡时只改写与网卡相关的字段
    pub fn adopt_interface(&mut self, snapshot: &InterfaceSnapshot) {
        self.disable_tso = !snapshot.tso;
        self.disable_gso = !snapshot.gso;
        self.disable_gro = !snapshot.gro;
        self.disable_power_save = snapshot.power_save.map(|on| !on).unwrap_or(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_bytes() {
        assert_eq!(BufferTier::new(1).bytes(), 524_288);
        assert_eq!(BufferTier::new(4).bytes(), 2_097_152);
        assert_eq!(BufferTier::new(8).bytes(), 4_194_304);
    }

    #[test]
    fn tier_is_clamped() {
        assert_eq!(BufferTier::new(0).get(), 1);
        assert_eq!(BufferTier::new(-3).get(), 1);
        assert_eq!(BufferTier::new(9).get(), 8);
        assert_eq!(BufferTier::new(i64::MAX).bytes(), 4_194_304);
    }

    #[test]
    fn tier_presets_and_labels() {
        assert_eq!(BufferTier::new(2).preset(), BufferPreset::Light);
        assert_eq!(BufferTier::new(3).preset(), BufferPreset::Balanced);
        assert_eq!(BufferTier::new(5).preset(), BufferPreset::Balanced);
        assert_eq!(BufferTier::new(6).preset(), BufferPreset::Heavy);
        assert_eq!(BufferTier::new(4).label(), "2.0 MB (Balanced)");
        assert_eq!(BufferTier::new(1).label(), "0.5 MB (Light)");
    }

    #[test]
    fn tier_from_sysctl_rounds_to_nearest() {
        assert_eq!(BufferTier::from_sysctl("2097152"), Some(BufferTier::new(4)));
        assert_eq!(BufferTier::from_sysctl("212992\n"), Some(BufferTier::new(1)));
        assert_eq!(BufferTier::from_sysctl("16777216"), Some(BufferTier::new(8)));
        assert_eq!(BufferTier::from_sysctl("1835008"), Some(BufferTier::new(4)));
        assert_eq!(BufferTier::from_sysctl("garbage"), None);
    }

    #[test]
    fn tier_from_huge_sysctl_value_saturates() {
        assert_eq!(BufferTier::from_sysctl("18446744073709551615"), Some(BufferTier::new(8)));
        assert_eq!(BufferTier::from_sysctl("18446744073709551000"), Some(BufferTier::new(8)));
    }

    #[test]
    fn deserialized_tier_is_clamped() {
        let json = r#"{"buffer_tier": 42, "congestion_algorithm": "bbr"}"#;
        let state: DesiredState = serde_json::from_str(json).unwrap();
        assert_eq!(state.buffer_tier.get(), 8);
        assert_eq!(state.congestion_algorithm, CongestionAlgorithm::Bbr);
        assert!(!state.disable_tso);
    }

    #[test]
    fn congestion_parse() {
        assert_eq!("bbr".parse::<CongestionAlgorithm>().unwrap(), CongestionAlgorithm::Bbr);
        assert_eq!("cubic\n".parse::<CongestionAlgorithm>().unwrap(), CongestionAlgorithm::Cubic);
        assert!("reno".parse::<CongestionAlgorithm>().is_err());
    }

    #[test]
    fn adopt_interface_negates_snapshot() {
        let mut state = DesiredState {
            buffer_tier: BufferTier::new(7),
            congestion_algorithm: CongestionAlgorithm::Bbr,
            ..Default::default()
        };
        let wifi = InterfaceSnapshot { tso: false, gso: true, gro: true, power_save: Some(true) };
        state.adopt_interface(&wifi);
        assert!(state.disable_tso);
        assert!(!state.disable_gso);
        assert!(!state.disable_power_save);

        let wired = InterfaceSnapshot { tso: true, gso: true, gro: false, power_save: None };
        state.disable_power_save = true;
        state.adopt_interface(&wired);
        assert!(state.disable_gro);
        assert!(!state.disable_power_save);

        // 与网卡无关的字段保持不变
        assert_eq!(state.buffer_tier.get(), 7);
        assert_eq!(state.congestion_algorithm, CongestionAlgorithm::Bbr);
    }

    #[test]
    fn from_globals_ignores_unknown_values() {
        let global = GlobalSnapshot {
            rmem_max: None,
            wmem_max: Some("4194304".into()),
            tcp_congestion_control: Some("reno".into()),
        };
        assert_eq!(DesiredState::from_globals(&global), DesiredState::default());

        let global = GlobalSnapshot {
            rmem_max: Some("3145728".into()),
            wmem_max: None,
            tcp_congestion_control: Some("bbr".into()),
        };
        let state = DesiredState::from_globals(&global);
        assert_eq!(state.buffer_tier.get(), 6);
        assert_eq!(state.congestion_algorithm, CongestionAlgorithm::Bbr);
    }
}

//! Linux平台调优能力实现
//!
//! 使用 ethtool / iw / sysctl 命令，省电回退写入 NetworkManager 配置。

use crate::capability::{OffloadFeature, OffloadReading, SysctlKey, Toggle, TuningCapabilities};
use crate::{Result, TuneError};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::fs;
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// NetworkManager 关闭wifi省电的配置文件
pub const DEFAULT_FALLBACK_PATH: &str = "/etc/NetworkManager/conf.d/default-wifi-powersave-on.conf";

/// `wifi.powersave = 2` 表示关闭省电
const FALLBACK_CONTENT: &str = "[connection]\nwifi.powersave = 2\n";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 检查是否有root权限
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub struct LinuxCapabilities {
    timeout: Duration,
    fallback_path: PathBuf,
}

impl LinuxCapabilities {
    pub fn new(timeout: Duration, fallback_path: PathBuf) -> Self {
        Self { timeout, fallback_path }
    }

    /// 执行命令，超时则杀掉进程
    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        debug!("执行: {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // 边等待边读取，避免输出填满管道后子进程阻塞
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TuneError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let output = Output { status, stdout: collect(stdout)?, stderr: collect(stderr)? };
        if !output.status.success() {
            return Err(command_error(program, &output));
        }
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| TuneError::Io(std::io::Error::other("读取命令输出的线程异常退出")))?
            .map_err(TuneError::from),
        None => Ok(Vec::new()),
    }
}

fn command_error(program: &str, output: &Output) -> TuneError {
    let err = String::from_utf8_lossy(&output.stderr);
    if err.contains("Permission denied") || err.contains("Operation not permitted") {
        return TuneError::PermissionDenied;
    }
    let message = match err.trim() {
        "" => format!("退出状态 {}", output.status),
        msg => msg.to_string(),
    };
    TuneError::CommandFailed { program: program.to_string(), message }
}

/// 解析 `ethtool -k` 的输出，值可能带有 ` [fixed]` 后缀
pub fn parse_offload_features(output: &str) -> OffloadReading {
    let mut reading = OffloadReading::default();
    for line in output.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let enabled = value.split_whitespace().next() == Some("on");
        for feature in OffloadFeature::ALL {
            if name == feature.long_name() || name == feature.short_name() {
                reading.set(feature, enabled);
            }
        }
    }
    reading
}

/// 解析 `iw dev X get power_save`，形如 "Power save: on"
///
/// 命令成功但没有该行时，输出中不含 "off" 即视为开启。
pub fn parse_power_save(output: &str) -> bool {
    let value = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Power save:"))
        .unwrap_or(output);
    !value.to_lowercase().contains("off")
}

impl TuningCapabilities for LinuxCapabilities {
    fn read_offload(&self, interface: &str) -> Result<OffloadReading> {
        let output = self.run("ethtool", &["-k", interface])?;
        Ok(parse_offload_features(&String::from_utf8_lossy(&output.stdout)))
    }

    fn set_offload(&self, interface: &str, feature: OffloadFeature, value: Toggle) -> Result<()> {
        self.run("ethtool", &["-K", interface, feature.short_name(), value.as_str()])?;
        Ok(())
    }

    fn read_power_save(&self, interface: &str) -> Result<bool> {
        let output = self.run("iw", &["dev", interface, "get", "power_save"])?;
        Ok(parse_power_save(&String::from_utf8_lossy(&output.stdout)))
    }

    fn set_power_save(&self, interface: &str, value: Toggle) -> Result<()> {
        self.run("iw", &["dev", interface, "set", "power_save", value.as_str()])?;
        Ok(())
    }

    fn write_power_save_fallback(&self) -> Result<()> {
        write_fallback_file(&self.fallback_path)
    }

    fn read_sysctl(&self, key: SysctlKey) -> Result<String> {
        let output = self.run("sysctl", &["-n", key.as_str()])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn write_sysctl(&self, key: SysctlKey, value: &str) -> Result<()> {
        self.run("sysctl", &["-w", &format!("{}={}", key.as_str(), value)])?;
        Ok(())
    }
}

fn write_fallback_file(path: &Path) -> Result<()> {
    fs::write(path, FALLBACK_CONTENT).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TuneError::PermissionDenied,
        _ => TuneError::Io(e),
    })
}

/// 列出 /sys/class/net 下除回环外的网卡
pub fn list_interfaces() -> Result<Vec<String>> {
    list_interfaces_in(Path::new("/sys/class/net"))
}

fn list_interfaces_in(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if name != "lo" {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// 返回 PATH 中找不到的外部工具
pub fn missing_tools() -> Vec<&'static str> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
    ["ethtool", "iw", "sysctl"]
        .into_iter()
        .filter(|tool| !dirs.iter().any(|d| d.join(tool).is_file()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHTOOL_K: &str = "Features for enp3s0:
rx-checksumming: on
tx-checksumming: on
\ttx-checksum-ipv4: off [fixed]
scatter-gather: on
tcp-segmentation-offload: on
\ttx-tcp-segmentation: on
\ttx-tcp-ecn-segmentation: off [fixed]
generic-segmentation-offload: off
generic-receive-offload: on [fixed]
large-receive-offload: off [fixed]
";

    #[test]
    fn parses_ethtool_features() {
        let reading = parse_offload_features(ETHTOOL_K);
        assert_eq!(reading, OffloadReading { tso: Some(true), gso: Some(false), gro: Some(true) });
    }

    #[test]
    fn parses_short_feature_names() {
        let reading = parse_offload_features("tso: off\ngro: on\n");
        assert_eq!(reading, OffloadReading { tso: Some(false), gso: None, gro: Some(true) });
    }

    #[test]
    fn parses_power_save() {
        assert!(parse_power_save("Power save: on\n"));
        assert!(!parse_power_save("Power save: off\n"));
        assert!(!parse_power_save("\tPower save: OFF\n"));
    }

    #[test]
    fn unrecognised_power_save_output_counts_as_on() {
        assert!(parse_power_save(""));
        assert!(parse_power_save("power management enabled\n"));
        assert!(!parse_power_save("power management off\n"));
    }

    #[test]
    fn permission_errors_are_recognised() {
        let script = "echo 'sysctl: permission denied on key' >&2; \
                      echo 'Operation not permitted' >&2; exit 1";
        let output = Command::new("sh").args(["-c", script]).output().unwrap();
        assert!(matches!(command_error("sysctl", &output), TuneError::PermissionDenied));
    }

    fn caps_with_timeout(timeout: Duration) -> LinuxCapabilities {
        LinuxCapabilities::new(timeout, PathBuf::from(DEFAULT_FALLBACK_PATH))
    }

    #[test]
    fn failing_command_reports_stderr() {
        let caps = caps_with_timeout(Duration::from_secs(5));
        match caps.run("sh", &["-c", "echo 'no such device' >&2; exit 2"]) {
            Err(TuneError::CommandFailed { program, message }) => {
                assert_eq!(program, "sh");
                assert_eq!(message, "no such device");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let caps = caps_with_timeout(Duration::from_millis(300));
        let start = Instant::now();
        let err = caps.run("sleep", &["5"]).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        match &err {
            TuneError::Timeout { program, timeout } => {
                assert_eq!(program, "sleep");
                assert_eq!(*timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(err.to_string().contains("300ms"));
    }

    #[test]
    fn large_output_does_not_block() {
        let caps = caps_with_timeout(Duration::from_secs(5));
        let output = caps
            .run("sh", &["-c", "head -c 200000 /dev/zero | tr '\\0' a; echo done >&2"])
            .unwrap();
        assert_eq!(output.stdout.len(), 200_000);
        assert!(output.stdout.iter().all(|&b| b == b'a'));
        assert_eq!(output.stderr, b"done\n");
    }

    #[test]
    fn fallback_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("powersave.conf");
        let caps = LinuxCapabilities::new(Duration::from_secs(5), path.clone());
        caps.write_power_save_fallback().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "[connection]\nwifi.powersave = 2\n");
    }

    #[test]
    fn lists_interfaces_without_loopback() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["wlp2s0", "lo", "enp3s0"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        assert_eq!(list_interfaces_in(dir.path()).unwrap(), vec!["enp3s0", "wlp2s0"]);
    }
}

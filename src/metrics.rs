//! Host metrics sampled by the status page.
//!
//! Values come from procfs, `statvfs(3)` and `hostname -I`. Parsers are kept
//! separate from I/O so they can be fed captured files in tests.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use nix::sys::statvfs::statvfs;

const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Largest scaled value printed before moving to the next unit.
pub const SIZE_THRESHOLD: f64 = 100.0;

/// Formats a byte count with at most five numeric characters.
///
/// The value is divided by 1024 until it drops below [`SIZE_THRESHOLD`],
/// then printed with two decimals below 10 and one decimal otherwise.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < SIZE_THRESHOLD {
            return if value < 10.0 {
                format!("{value:.2}{unit}")
            } else {
                format!("{value:.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}{}", UNITS[UNITS.len() - 1])
}

/// Like [`format_bytes`] with `--` for an unavailable value.
pub fn format_optional_bytes(bytes: Option<u64>) -> String {
    bytes.map(format_bytes).unwrap_or_else(|| "--".to_string())
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Utilisation between `earlier` and `self` in percent, `None` if no
    /// time elapsed.
    pub fn usage_since(&self, earlier: &CpuTimes) -> Option<f64> {
        let total = self.total.checked_sub(earlier.total)?;
        if total == 0 {
            return None;
        }
        let busy = self.busy.saturating_sub(earlier.busy);
        Some(busy as f64 / total as f64 * 100.0)
    }
}

/// Capacity and consumption of a memory pool or filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
}

impl Usage {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

/// Cumulative byte counters summed over every interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub tx: u64,
    pub rx: u64,
}

#[async_trait]
pub trait HostMetrics: Send + Sync {
    async fn cpu_times(&self) -> Result<CpuTimes>;
    async fn memory(&self) -> Result<Usage>;
    async fn root_disk(&self) -> Result<Usage>;
    async fn net_counters(&self) -> Result<NetCounters>;
    async fn host_ip(&self) -> Result<String>;
}

/// Reads metrics from the running Linux host.
#[derive(Debug, Clone)]
pub struct ProcMetrics {
    proc_root: PathBuf,
}

impl ProcMetrics {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.proc_root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read {}", path.display()))
    }
}

impl Default for ProcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostMetrics for ProcMetrics {
    async fn cpu_times(&self) -> Result<CpuTimes> {
        parse_cpu_times(&self.read("stat").await?)
    }

    async fn memory(&self) -> Result<Usage> {
        parse_meminfo(&self.read("meminfo").await?)
    }

    async fn root_disk(&self) -> Result<Usage> {
        tokio::task::spawn_blocking(statvfs_root).await?
    }

    async fn net_counters(&self) -> Result<NetCounters> {
        parse_net_dev(&self.read("net/dev").await?)
    }

    async fn host_ip(&self) -> Result<String> {
        let output = tokio::process::Command::new("hostname")
            .arg("-I")
            .output()
            .await
            .context("run hostname -I")?;
        if !output.status.success() {
            bail!("hostname -I exited with {}", output.status);
        }
        Ok(first_address(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn parse_cpu_times(stat: &str) -> Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| anyhow!("no aggregate cpu line"))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse::<u64>().with_context(|| format!("bad jiffies {f:?}")))
        .collect::<Result<Vec<_>>>()?;
    if fields.len() < 4 {
        bail!("truncated cpu line: {line:?}");
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        busy: total - idle,
        total,
    })
}

pub fn parse_meminfo(meminfo: &str) -> Result<Usage> {
    let field = |name: &str| -> Result<u64> {
        let line = meminfo
            .lines()
            .find(|l| l.split(':').next() == Some(name))
            .ok_or_else(|| anyhow!("{name} missing from meminfo"))?;
        let kib = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("{name} has no value"))?
            .parse::<u64>()
            .with_context(|| format!("bad {name} value"))?;
        Ok(kib * 1024)
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    Ok(Usage {
        total,
        used: total.saturating_sub(available),
    })
}

pub fn parse_net_dev(net_dev: &str) -> Result<NetCounters> {
    let mut counters = NetCounters::default();
    for line in net_dev.lines().skip(2) {
        let Some((_, stats)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = stats.split_whitespace().collect();
        if fields.len() < 9 {
            bail!("truncated net/dev line: {line:?}");
        }
        counters.rx += fields[0].parse::<u64>().context("bad rx bytes")?;
        counters.tx += fields[8].parse::<u64>().context("bad tx bytes")?;
    }
    Ok(counters)
}

fn first_address(output: &str) -> String {
    output.split_whitespace().next().unwrap_or_default().to_string()
}

fn statvfs_root() -> Result<Usage> {
    let st = statvfs("/").context("statvfs /")?;

    let frsize = st.fragment_size() as u64;
    let total = (st.blocks() as u64).saturating_mul(frsize);
    let available = (st.blocks_available() as u64).saturating_mul(frsize);
    Ok(Usage {
        total,
        used: total.saturating_sub(available),
    })
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Serves fixed values; cpu and network counters advance on every read.
    pub struct FakeMetrics {
        pub cpu: Mutex<CpuTimes>,
        pub net: Mutex<NetCounters>,
        pub fail_net: Mutex<bool>,
    }

    impl Default for FakeMetrics {
        fn default() -> Self {
            Self {
                cpu: Mutex::new(CpuTimes { busy: 0, total: 0 }),
                net: Mutex::new(NetCounters::default()),
                fail_net: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl HostMetrics for FakeMetrics {
        async fn cpu_times(&self) -> Result<CpuTimes> {
            let mut cpu = self.cpu.lock().unwrap();
            cpu.busy += 25;
            cpu.total += 100;
            Ok(*cpu)
        }

        async fn memory(&self) -> Result<Usage> {
            Ok(Usage {
                total: 4 * 1024 * 1024 * 1024,
                used: 1024 * 1024 * 1024,
            })
        }

        async fn root_disk(&self) -> Result<Usage> {
            Ok(Usage {
                total: 32 * 1024 * 1024 * 1024,
                used: 8 * 1024 * 1024 * 1024,
            })
        }

        async fn net_counters(&self) -> Result<NetCounters> {
            if *self.fail_net.lock().unwrap() {
                bail!("net/dev unreadable");
            }
            let mut net = self.net.lock().unwrap();
            net.tx += 2048;
            net.rx += 4096;
            Ok(*net)
        }

        async fn host_ip(&self) -> Result<String> {
            Ok("192.168.1.20".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn format_bytes_known_values() {
        assert_eq!(format_bytes(1024), "1.00KB");
        assert_eq!(format_bytes(1), "1.00B");
        assert_eq!(format_bytes(999), "0.98KB");
        assert_eq!(format_bytes(1999), "1.95KB");
        assert_eq!(format_bytes(0), "0.00B");
        assert_eq!(format_bytes(99), "99.0B");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00GB");
    }

    #[test]
    fn unavailable_size_renders_placeholder() {
        assert_eq!(format_optional_bytes(None), "--");
        assert_eq!(format_optional_bytes(Some(1024)), "1.00KB");
    }

    proptest! {
        #[test]
        fn format_bytes_numeric_part_fits_five_chars(bytes in any::<u64>()) {
            let formatted = format_bytes(bytes);
            let numeric: String = formatted
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            prop_assert!(numeric.len() <= 5, "{} -> {}", bytes, formatted);
            prop_assert!(UNITS.iter().any(|u| formatted.ends_with(u)));
        }
    }

    #[test]
    fn cpu_usage_over_window() {
        let stat_a = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4 5 6 7 8 9 10\n";
        let stat_b = "cpu  150 0 150 750 150 0 0 0 0 0\n";

        let a = parse_cpu_times(stat_a).unwrap();
        let b = parse_cpu_times(stat_b).unwrap();

        assert_eq!(a, CpuTimes { busy: 200, total: 1000 });
        assert_eq!(b.usage_since(&a), Some(50.0));
        assert_eq!(a.usage_since(&a), None);
    }

    #[test]
    fn cpu_line_must_exist() {
        assert!(parse_cpu_times("intr 1 2 3\n").is_err());
        assert!(parse_cpu_times("cpu  1 2\n").is_err());
    }

    #[test]
    fn meminfo_used_is_total_minus_available() {
        let meminfo = "MemTotal:        3884096 kB\nMemFree:          512000 kB\nMemAvailable:    2884096 kB\n";

        let usage = parse_meminfo(meminfo).unwrap();

        assert_eq!(usage.total, 3884096 * 1024);
        assert_eq!(usage.used, 1000000 * 1024);
        assert!((usage.percent() - 25.745).abs() < 0.01);
    }

    #[test]
    fn meminfo_without_available_is_an_error() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_err());
    }

    #[test]
    fn net_dev_sums_all_interfaces() {
        let net_dev = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0: 2000000    1500    0    0    0     0          0         0   300000     900    0    0    0     0       0          0
 wlan0:     500       5    0    0    0     0          0         0      700       4    0    0    0     0       0          0
";

        let counters = parse_net_dev(net_dev).unwrap();

        assert_eq!(counters, NetCounters { tx: 301_700, rx: 2_001_500 });
    }

    #[test]
    fn usage_percent_of_empty_pool_is_zero() {
        assert_eq!(Usage::default().percent(), 0.0);
    }

    #[test]
    fn first_address_takes_first_token() {
        assert_eq!(first_address("192.168.1.20 10.0.0.3 fd00::1 \n"), "192.168.1.20");
        assert_eq!(first_address("\n"), "");
    }

    #[tokio::test]
    async fn root_disk_reports_capacity() {
        let usage = ProcMetrics::new().root_disk().await.unwrap();

        assert!(usage.total > 0);
        assert!(usage.used <= usage.total);
    }
}

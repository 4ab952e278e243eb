/// Host counter readers backed by procfs.
///
/// Parsing is split from file access so each format can be tested against
/// captured text. `ProcFs` takes its root as a parameter so tests can point it
/// at a fake tree.
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate CPU tick counters from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// idle + iowait
    pub idle: u64,
    pub total: u64,
}

/// Completed I/O and sector totals across physical block devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskTotals {
    pub ios: u64,
    pub sectors: u64,
}

/// Memory figures from `/proc/meminfo`, in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemInfo {
    /// Used memory as a whole percentage.
    pub fn used_percent(&self) -> u64 {
        if self.total_kb == 0 {
            return 0;
        }
        let used = self.total_kb.saturating_sub(self.available_kb);
        used.saturating_mul(100) / self.total_kb
    }
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub comm: String,
    /// Arguments joined by spaces.
    pub cmdline: String,
}

/// Source of the raw host counters every probe samples.
pub trait HostCounters: Send + Sync {
    fn uptime(&self) -> Result<Duration, ProcError>;
    fn cpu_ticks(&self) -> Result<CpuTicks, ProcError>;
    /// Interface carrying the default route, or the first physical one.
    fn primary_interface(&self) -> Result<String, ProcError>;
    /// rx + tx bytes for one interface.
    fn interface_bytes(&self, name: &str) -> Result<u64, ProcError>;
    fn disk_totals(&self) -> Result<DiskTotals, ProcError>;
    fn memory(&self) -> Result<MemInfo, ProcError>;
    fn processes(&self) -> Result<Vec<ProcessInfo>, ProcError>;
}

/// Reads counters from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, rel: &str) -> Result<String, ProcError> {
        let path = self.root.join(rel);
        std::fs::read_to_string(&path).map_err(|e| ProcError::Read { path, source: e })
    }

    fn parse_error(&self, rel: &str, what: &'static str) -> ProcError {
        ProcError::Parse {
            path: self.root.join(rel),
            what,
        }
    }
}

impl HostCounters for ProcFs {
    fn uptime(&self) -> Result<Duration, ProcError> {
        let raw = self.read("uptime")?;
        parse_uptime(&raw).ok_or_else(|| self.parse_error("uptime", "uptime seconds"))
    }

    fn cpu_ticks(&self) -> Result<CpuTicks, ProcError> {
        let raw = self.read("stat")?;
        parse_cpu_ticks(&raw).ok_or_else(|| self.parse_error("stat", "aggregate cpu line"))
    }

    fn primary_interface(&self) -> Result<String, ProcError> {
        if let Ok(route) = self.read("net/route") {
            if let Some(iface) = default_route_interface(&route) {
                return Ok(iface);
            }
        }
        let dev = self.read("net/dev")?;
        parse_net_dev(&dev)
            .into_iter()
            .map(|(name, _)| name)
            .find(|name| !is_virtual_interface(name))
            .ok_or(ProcError::NoInterface)
    }

    fn interface_bytes(&self, name: &str) -> Result<u64, ProcError> {
        let dev = self.read("net/dev")?;
        parse_net_dev(&dev)
            .into_iter()
            .find(|(iface, _)| iface == name)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| self.parse_error("net/dev", "interface row"))
    }

    fn disk_totals(&self) -> Result<DiskTotals, ProcError> {
        let raw = self.read("diskstats")?;
        Ok(parse_diskstats(&raw))
    }

    fn memory(&self) -> Result<MemInfo, ProcError> {
        let raw = self.read("meminfo")?;
        parse_meminfo(&raw).ok_or_else(|| self.parse_error("meminfo", "MemTotal/MemAvailable"))
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ProcError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ProcError::Read {
            path: self.root.clone(),
            source: e,
        })?;

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // Processes exit between listing and reading; skip those.
            let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let comm = std::fs::read_to_string(entry.path().join("comm"))
                .map(|c| c.trim_end().to_string())
                .unwrap_or_default();
            processes.push(ProcessInfo {
                pid,
                comm,
                cmdline: join_cmdline(&cmdline),
            });
        }
        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }
}

/// First field of `/proc/uptime`.
pub fn parse_uptime(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Aggregate `cpu ` line: idle = idle + iowait, total = first 8 fields.
///
/// guest and guest_nice are already counted in user and nice.
pub fn parse_cpu_ticks(raw: &str) -> Option<CpuTicks> {
    let line = raw.lines().find_map(|l| l.strip_prefix("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .map_while(|s| s.parse::<u64>().ok())
        .take(8)
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().sum();
    Some(CpuTicks { idle, total })
}

/// Busy percentage between two samples, rounded with integer arithmetic.
pub fn cpu_busy_percent(before: CpuTicks, after: CpuTicks) -> u64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0;
    }
    let idle = after.idle.saturating_sub(before.idle).min(total);
    let busy = total - idle;
    (1000 * busy / total + 5) / 10
}

/// `(interface, rx_bytes + tx_bytes)` for every row of `/proc/net/dev`.
pub fn parse_net_dev(raw: &str) -> Vec<(String, u64)> {
    raw.lines()
        .skip(2)
        .filter_map(|line| {
            let (iface, stats) = line.split_once(':')?;
            let fields: Vec<u64> = stats
                .split_whitespace()
                .filter_map(|s| s.parse::<u64>().ok())
                .collect();
            if fields.len() < 9 {
                return None;
            }
            Some((iface.trim().to_string(), fields[0].saturating_add(fields[8])))
        })
        .collect()
}

/// Interface of the first default route (destination 00000000) in `/proc/net/route`.
pub fn default_route_interface(raw: &str) -> Option<String> {
    raw.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        (destination == "00000000").then(|| iface.to_string())
    })
}

const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "veth", "br-", "virbr", "cni", "flannel", "tun", "tap",
];

/// Loopback, bridges, container veths and tunnels are never the primary link.
pub fn is_virtual_interface(name: &str) -> bool {
    name == "lo"
        || VIRTUAL_INTERFACE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

const VIRTUAL_DISK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "md", "sr", "fd"];

/// Sum completed I/Os and sectors across whole physical disks.
///
/// Partitions are dropped when their parent device is also listed, so no
/// I/O is counted twice.
pub fn parse_diskstats(raw: &str) -> DiskTotals {
    let rows: Vec<(&str, [u64; 4])> = raw
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            let num = |i: usize| parts[i].parse::<u64>().ok();
            // reads completed, sectors read, writes completed, sectors written
            Some((parts[2], [num(3)?, num(5)?, num(7)?, num(9)?]))
        })
        .collect();

    let names: Vec<&str> = rows.iter().map(|(name, _)| *name).collect();
    let mut totals = DiskTotals::default();
    for (name, [reads, read_sectors, writes, write_sectors]) in &rows {
        if VIRTUAL_DISK_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let is_partition = names.iter().any(|parent| is_partition_of(name, parent));
        if is_partition {
            continue;
        }
        totals.ios += reads + writes;
        totals.sectors += read_sectors + write_sectors;
    }
    totals
}

/// Kernel partition naming: `sda1` of `sda`, and `p` before the number when
/// the parent ends in a digit (`nvme0n1p2` of `nvme0n1`). `sdaa` and
/// `nvme0n10` are disks of their own.
fn is_partition_of(name: &str, parent: &str) -> bool {
    let Some(rest) = name.strip_prefix(parent) else {
        return false;
    };
    let digits = if parent.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(d) => d,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// MemTotal and MemAvailable from `/proc/meminfo`.
pub fn parse_meminfo(raw: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let kb = value.split_whitespace().next().and_then(|v| v.parse().ok());
        match key {
            "MemTotal" => total = kb,
            "MemAvailable" => available = kb,
            _ => {}
        }
    }
    Some(MemInfo {
        total_kb: total?,
        available_kb: available?,
    })
}

fn join_cmdline(raw: &[u8]) -> String {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Errors from reading host counters.
#[derive(Debug)]
pub enum ProcError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        what: &'static str,
    },
    NoInterface,
}

impl std::fmt::Display for ProcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ProcError::Parse { path, what } => {
                write!(f, "no {what} in {}", path.display())
            }
            ProcError::NoInterface => write!(f, "no default route and no physical interface"),
        }
    }
}

impl std::error::Error for ProcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

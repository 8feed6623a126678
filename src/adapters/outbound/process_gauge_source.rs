//! Process Gauge Source
//!
//! Reads runtime gauges for the current process from procfs.
//! Memory figures are reported in bytes, CPU time in clock ticks.

use crate::domain::ports::GaugeSource;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const PROC_SELF: &str = "/proc/self";

/// `/proc/<pid>/status` keys and the gauge names they are reported under.
/// The bool marks values given in kB.
const STATUS_FIELDS: &[(&str, &str, bool)] = &[
    ("VmRSS", "VmRSS", true),
    ("VmSize", "VmSize", true),
    ("VmPeak", "VmPeak", true),
    ("VmData", "VmData", true),
    ("VmStk", "VmStk", true),
    ("VmSwap", "VmSwap", true),
    ("Threads", "Threads", false),
    ("voluntary_ctxt_switches", "VoluntaryCtxtSwitches", false),
    ("nonvoluntary_ctxt_switches", "NonvoluntaryCtxtSwitches", false),
];

/// Field offsets in `/proc/<pid>/stat`, counted from the state field
/// that follows the parenthesized command name.
const STAT_FIELDS: &[(usize, &str)] = &[
    (7, "MinorFaults"),
    (9, "MajorFaults"),
    (11, "UserTicks"),
    (12, "SystemTicks"),
];

/// procfs-backed gauge source.
#[derive(Debug, Clone)]
pub struct ProcessGaugeSource {
    root: PathBuf,
}

impl Default for ProcessGaugeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGaugeSource {
    /// Read gauges for the calling process.
    pub fn new() -> Self {
        Self::with_root(PROC_SELF)
    }

    /// Read gauges from an arbitrary procfs process directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, file: &str) -> Option<String> {
        let path = self.root.join(file);
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                debug!("could not read {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn parse_status(contents: &str) -> Vec<(&'static str, f64)> {
    let mut gauges = Vec::new();
    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(&(_, name, in_kb)) = STATUS_FIELDS.iter().find(|(k, _, _)| *k == key) else {
            continue;
        };
        let Some(number) = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        gauges.push((name, if in_kb { number * 1024.0 } else { number }));
    }
    gauges
}

fn parse_stat(contents: &str) -> Vec<(&'static str, f64)> {
    // the command name may itself contain spaces or parentheses
    let Some(close) = contents.rfind(')') else {
        return Vec::new();
    };
    let fields: Vec<&str> = contents[close + 1..].split_whitespace().collect();

    STAT_FIELDS
        .iter()
        .filter_map(|&(idx, name)| {
            fields
                .get(idx)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| (name, v))
        })
        .collect()
}

impl GaugeSource for ProcessGaugeSource {
    fn sample(&self) -> Vec<(&'static str, f64)> {
        let mut gauges = self.read("status").map(|s| parse_status(&s)).unwrap_or_default();
        gauges.extend(self.read("stat").map(|s| parse_stat(&s)).unwrap_or_default());
        gauges
    }
}

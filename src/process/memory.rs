/*!
 * Memory Sampling
 * Resident memory of a supervised process tree, read from /proc
 */

use crate::core::types::{Bytes, Pid};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Source of resident-memory readings
#[cfg_attr(test, mockall::automock)]
pub trait MemorySampler: Send + Sync + 'static {
    /// Resident bytes for the instance rooted at `pid`, `None` if unreadable
    fn resident_bytes(&self, pid: Pid) -> Option<Bytes>;
}

/// Reads `VmRSS` from `/proc/<pid>/status` for every process in the
/// child's process group and sums them
///
/// Launchers such as `npm start` fork the real server, so the root pid
/// alone under-reports.
#[derive(Debug, Clone)]
pub struct ProcStatusSampler {
    proc_root: PathBuf,
}

impl ProcStatusSampler {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn rss_of(&self, pid: Pid) -> Option<Bytes> {
        let status = fs::read_to_string(self.proc_root.join(pid.to_string()).join("status")).ok()?;
        parse_vm_rss(&status)
    }

    /// Pids whose process group is `pgid`
    fn group_members(&self, pgid: Pid) -> Vec<Pid> {
        let Ok(entries) = fs::read_dir(&self.proc_root) else {
            return Vec::new();
        };

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<Pid>().ok())
            .filter(|pid| read_pgrp(&self.proc_root, *pid) == Some(pgid))
            .collect()
    }
}

impl Default for ProcStatusSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcStatusSampler {
    fn resident_bytes(&self, pid: Pid) -> Option<Bytes> {
        let root = self.rss_of(pid)?;

        let others: Bytes = self
            .group_members(pid)
            .into_iter()
            .filter(|member| *member != pid)
            .filter_map(|member| self.rss_of(member))
            .sum();

        let total = root.saturating_add(others);
        trace!(pid, total, "Sampled resident memory");
        Some(total)
    }
}

fn read_pgrp(proc_root: &Path, pid: Pid) -> Option<Pid> {
    let stat = fs::read_to_string(proc_root.join(pid.to_string()).join("stat")).ok()?;
    parse_pgrp(&stat)
}

/// Process group from a `/proc/<pid>/stat` line
///
/// The command name is parenthesised and may contain spaces, so fields are
/// counted from the last `)`: state, ppid, pgrp.
pub fn parse_pgrp(stat: &str) -> Option<Pid> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(2)?.parse().ok()
}

/// Resident set size in bytes from `/proc/<pid>/status` text
pub fn parse_vm_rss(status: &str) -> Option<Bytes> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let value: Bytes = fields.next()?.parse().ok()?;
    let scale = match fields.next() {
        Some(unit) if unit.eq_ignore_ascii_case("kb") => 1024,
        Some(unit) if unit.eq_ignore_ascii_case("mb") => 1024 * 1024,
        None => 1,
        Some(_) => return None,
    };
    value.checked_mul(scale)
}

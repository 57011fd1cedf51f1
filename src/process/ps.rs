use std::path::Path;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use tokio::process::Command;

use super::{HostInfo, ProcessCollectionType, ProcessSnapshot, ProcessStatus, SnapshotProvider};
use crate::clock::{Clock, SystemClock};
use crate::prelude::*;

/// Column order matters, `lstart` spans five whitespace separated fields and `comm` may
/// contain spaces, so it has to come last.
const PS_COLUMNS: &str = "pid,ppid,pcpu,pmem,lstart,comm";
/// `lstart` with the C locale, e.g. `Mon Jan  2 15:04:05 2006`
const LSTART_FORMAT: &str = "%a %b %d %H:%M:%S %Y";
const LSTART_FIELD_COUNT: usize = 5;
const MIN_FIELD_COUNT: usize = 4 + LSTART_FIELD_COUNT + 1;

/// Collects processes by running the `ps` command line tool.
#[derive(Debug, Default)]
pub struct PsProvider;

impl PsProvider {
    pub fn new() -> Self {
        PsProvider
    }
}

#[async_trait]
impl SnapshotProvider for PsProvider {
    fn collection_type(&self) -> ProcessCollectionType {
        ProcessCollectionType::Ps
    }

    async fn collect(&self) -> Result<Vec<ProcessSnapshot>> {
        trace!("Collecting processes with ps");

        let output = Command::new("ps")
            .args(["axo", PS_COLUMNS])
            .env("LC_ALL", "C")
            .output()
            .await
            .context("Failed to run ps")?;
        if !output.status.success() {
            bail!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let host = HostInfo {
            platform_family: String::new(),
            ..HostInfo::current()
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ps_output(&stdout, SystemClock.now_ms(), &host))
    }
}

/// Parse the whole `ps` output, skipping its header and any line that cannot be read.
fn parse_ps_output(output: &str, captured_at_ms: i64, host: &HostInfo) -> Vec<ProcessSnapshot> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_ps_line(line, captured_at_ms, host) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Skipping ps line {line:?}: {e}");
                None
            }
        })
        .collect()
}

fn parse_ps_line(line: &str, captured_at_ms: i64, host: &HostInfo) -> Result<ProcessSnapshot> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    ensure!(
        fields.len() >= MIN_FIELD_COUNT,
        "expected at least {MIN_FIELD_COUNT} fields, got {}",
        fields.len()
    );

    let pid = fields[0].parse::<u32>().context("invalid pid")?;
    let ppid = fields[1].parse::<u32>().context("invalid ppid")?;
    let cpu_usage_percent = fields[2].parse::<f64>().context("invalid cpu usage")?;
    let memory_usage_percent = fields[3].parse::<f64>().context("invalid memory usage")?;
    let created_time_ms = parse_lstart(&fields[4..4 + LSTART_FIELD_COUNT].join(" "))?;

    let command = fields[4 + LSTART_FIELD_COUNT..].join(" ");
    let name = Path::new(&command)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or(command);

    Ok(ProcessSnapshot {
        pid,
        // The kernel's own tasks report a parent of 0
        ppid: (ppid > 0).then_some(ppid),
        name,
        status: ProcessStatus::Unknown,
        cpu_usage_percent,
        memory_usage_percent,
        created_time_ms,
        captured_at_ms,
        os: host.os.clone(),
        platform: host.platform.clone(),
        platform_family: host.platform_family.clone(),
    })
}

/// `ps` prints the start time in the local timezone
fn parse_lstart(lstart: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(lstart, LSTART_FORMAT)
        .with_context(|| format!("invalid start time {lstart:?}"))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("start time {lstart:?} does not exist in the local timezone"))?;
    Ok(local.timestamp_millis())
}

//! Info command - summarize a store without decoding its messages.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use stresslog_core::StoreImage;
use stresslog_decoder::StoreFile;

/// Run the info command.
pub fn run(file: &Path) -> Result<()> {
    tracing::info!(file = %file.display(), "Inspecting store");

    let store = StoreFile::open(file)?;
    let image = store
        .image()
        .with_context(|| format!("Not a stress log store: {}", file.display()))?;
    print!("{}", summary(&image));
    Ok(())
}

fn start_time(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The text printed by `info`.
pub fn summary(image: &StoreImage<'_>) -> String {
    let header = image.header();
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };

    line("Store".to_string());
    line("=====".to_string());
    line(format!("Version:          {:#010x}", header.version));
    line(format!("Started:          {}", start_time(header.start_time_ms)));
    line(format!("Tick frequency:   {} Hz", header.tick_frequency));
    line(format!("Facilities:       {:#010x}", header.facilities));
    line(format!("Level:            {}", header.level));
    line(format!("Chunk size:       {} bytes", header.chunk_size));
    line(format!(
        "Thread budget:    {} bytes ({} chunks)",
        header.max_bytes_per_thread,
        header.max_bytes_per_thread / header.chunk_size.max(1)
    ));
    line(format!(
        "Total budget:     {} bytes ({} chunks)",
        header.max_bytes_total,
        header.max_bytes_total / header.chunk_size.max(1)
    ));
    line(format!("Chunks in use:    {}", header.total_chunks));
    line(format!(
        "Data area:        {} of {} bytes",
        header.memory_cur.saturating_sub(header.header_size),
        header.memory_limit.saturating_sub(header.header_size)
    ));
    line(format!("Dead logs:        {}", header.dead_count));
    line(format!("Threads w/o log:  {}", header.threads_with_no_log));
    line(String::new());

    line(format!(
        "Modules ({} of {} image bytes used)",
        header.image_used, header.image_capacity
    ));
    for (index, module) in header.modules.iter().enumerate() {
        line(format!(
            "  [{index}] base {:#08x} size {:>8}",
            module.base, module.size
        ));
    }
    line(String::new());

    line(format!(
        "{:>16} {:>6} {:>8} {:>8} {:>14}  state",
        "thread", "chunks", "records", "damaged", "newest (s)"
    ));
    for log in image.logs() {
        let log = match log {
            Ok(log) => log,
            Err(corruption) => {
                line(format!("  log list damaged: {corruption}"));
                break;
            }
        };
        let (records, damaged) = log
            .read()
            .fold((0u64, 0u64), |(ok, bad), item| match item {
                Ok(_) => (ok + 1, bad),
                Err(_) => (ok, bad + 1),
            });
        let mut state = Vec::new();
        if log.is_dead() {
            state.push("dead");
        }
        if log.write_has_wrapped() {
            state.push("wrapped");
        }
        line(format!(
            "{:>16x} {:>6} {:>8} {:>8} {:>14.6}  {}",
            log.thread_id(),
            log.chunk_count(),
            records,
            damaged,
            image.relative_seconds(log.latest_timestamp()),
            state.join(",")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stresslog_core::facility::{LF_GC, LL_INFO10};
    use stresslog_core::{StressLog, StressLogConfig};

    #[test]
    fn summary_lists_every_log() {
        let log = StressLog::initialize(
            StressLogConfig::default()
                .with_chunk_size(4096)
                .with_image_capacity(16 * 1024),
        )
        .unwrap();
        for i in 0..5u64 {
            log.log_msg(LL_INFO10, LF_GC, "step %d\n", &[i]);
        }
        let worker = log.clone();
        std::thread::spawn(move || worker.gc_start(1, 0, false))
            .join()
            .unwrap();

        let bytes = log.snapshot();
        let image = StoreImage::parse(&bytes).unwrap();
        let text = summary(&image);

        assert!(text.contains("Chunk size:       4096 bytes"));
        assert!(text.contains("[0] base"));
        let logs: Vec<&str> = text
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("thread"))
            .skip(1)
            .collect();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|l| l.contains(" 5 ") && !l.ends_with("dead")));
        assert!(logs.iter().any(|l| l.ends_with("dead")));
    }

    #[test]
    fn start_time_formatting() {
        assert_eq!(start_time(0), "1970-01-01 00:00:00.000 UTC");
        assert_eq!(start_time(u64::MAX), "unknown");
    }
}

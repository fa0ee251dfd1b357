//! Record command - write a synthetic GC-like workload to a store file.
//!
//! One thread plays the GC coordinator and brackets each collection with
//! start and end markers; the others act as server GC threads for one heap
//! each, announcing their role, relocating roots and moving plugs. The
//! resulting file exercises every decoder feature.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Barrier;
use stresslog_core::config::parse_size;
use stresslog_core::facility::{LF_GC, LL_INFO10, LL_INFO1000, dprint_facility};
use stresslog_core::{StressLog, StressLogConfig, stress_log};

/// Options of the record command.
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Store file to create
    pub file: PathBuf,

    /// GC heap threads besides the coordinator
    #[arg(short = 'n', long, default_value_t = 4)]
    pub threads: u32,

    /// Collections to simulate
    #[arg(short, long, default_value_t = 20)]
    pub gcs: u64,

    /// Messages each heap thread writes per collection
    #[arg(short, long, default_value_t = 200)]
    pub messages: u64,

    /// Per-thread byte ceiling, e.g. 256K (default from STRESSLOG_SIZE)
    #[arg(long, value_parser = parse_bytes)]
    pub size: Option<u64>,

    /// Global byte ceiling, e.g. 32M (default from STRESSLOG_TOTAL_SIZE)
    #[arg(long, value_parser = parse_bytes)]
    pub total_size: Option<u64>,
}

fn parse_bytes(s: &str) -> Result<u64, String> {
    parse_size(s).ok_or_else(|| format!("'{s}' is not a size such as 4096, 64K or 2M"))
}

impl RecordArgs {
    /// Store configuration: the environment, overridden by these options.
    pub fn config(&self) -> StressLogConfig {
        let mut config = StressLogConfig::from_env().with_output_file(&self.file);
        if let Some(size) = self.size {
            config = config.with_max_bytes_per_thread(size);
        }
        if let Some(total) = self.total_size {
            config = config.with_max_bytes_total(total);
        }
        config
    }
}

fn heap_thread(log: &StressLog, heap: u64, args: &RecordArgs, barrier: &Barrier) {
    let base = 0x1000_0000 * (heap + 1);
    for gc in 0..args.gcs {
        barrier.wait();
        log.gc_thread_woke(heap);
        for i in 0..args.messages {
            let object = base + ((gc * args.messages + i) % 0x10_0000) * 0x20;
            match i % 4 {
                0 => log.gc_root(object + 8, object, object - 0x1000, 0x7f00_0000 + heap),
                1 => log.gc_root_promote(object + 8, object, 0x7f00_0000 + heap),
                2 => log.gc_plug_move(object, object + 0x200, 0x1000),
                _ => stress_log!(
                    log,
                    dprint_facility((i % 7) as u32),
                    LL_INFO1000,
                    "h%d: marked %p (%d bytes)\n",
                    heap,
                    object,
                    (i % 64) * 8
                ),
            }
        }
        log.gc_thread_waiting(heap);
        barrier.wait();
    }
}

/// Run the record command.
pub fn run(args: &RecordArgs) -> Result<()> {
    let config = args.config();
    config.validate().context("Invalid store configuration")?;
    tracing::info!(
        file = %args.file.display(),
        threads = args.threads,
        gcs = args.gcs,
        "Recording synthetic workload"
    );

    let log = StressLog::initialize(config)
        .with_context(|| format!("Failed to create store {}", args.file.display()))?;
    let barrier = Barrier::new(args.threads as usize + 1);

    std::thread::scope(|scope| {
        for heap in 0..u64::from(args.threads) {
            let (log, barrier) = (&log, &barrier);
            scope.spawn(move || {
                log.create_thread_log();
                heap_thread(log, heap, args, barrier);
            });
        }

        log.create_thread_log();
        for gc in 0..args.gcs {
            log.gc_start(gc, gc % 3, false);
            barrier.wait();
            barrier.wait();
            stress_log!(log, LF_GC, LL_INFO10, "gc %d done, %d heaps\n", gc, args.threads);
            log.gc_end(gc, gc % 3, false);
        }
    });

    log.terminate(true);
    log.flush().context("Failed to flush store")?;

    let stats = log.stats();
    println!(
        "Wrote {}: {} logs, {} chunks, {} bytes of data, {} format bytes",
        args.file.display(),
        stats.logs,
        stats.total_chunks,
        stats.bytes_used,
        stats.image_used
    );
    Ok(())
}

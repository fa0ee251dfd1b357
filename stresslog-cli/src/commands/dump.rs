//! Dump command - decode a store and print its messages.

use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use stresslog_core::facility::parse_facility_mask;
use stresslog_decoder::{
    DecodeOptions, Decoder, FormatPattern, GcRange, LevelRange, MessageFilter, OutputFormat,
    Renderer, StoreFile, ThreadSelector, TimeWindow, ValueRange,
};

/// Options of the dump command. No option changes the store.
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Path to the store file
    pub file: PathBuf,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Messages with an argument in this hex range: VALUE, START-END or BASE+SIZE
    #[arg(short = 'a', long = "value")]
    pub values: Vec<ValueRange>,

    /// Time window in seconds since start: START-END, START or -LAST
    #[arg(short, long, allow_hyphen_values = true, conflicts_with = "last")]
    pub time: Option<TimeWindow>,

    /// Only the last N seconds before the newest message
    #[arg(long)]
    pub last: Option<f64>,

    /// GC dprint level range: LEVEL or MIN-MAX (repeatable)
    #[arg(short, long = "level")]
    pub levels: Vec<LevelRange>,

    /// GC index range: INDEX or FIRST-LAST
    #[arg(short, long)]
    pub gc: Option<GcRange>,

    /// Messages whose format string contains TEXT; escapes such as \n are interpreted
    #[arg(short, long = "format", value_name = "TEXT")]
    pub formats: Vec<String>,

    /// Messages whose format string contains TEXT, taken literally
    #[arg(long = "raw-format", value_name = "TEXT")]
    pub raw_formats: Vec<String>,

    /// Facilities to leave out: hex mask or names joined with '|'
    #[arg(short, long, value_parser = parse_facilities)]
    pub ignore_facilities: Option<u32>,

    /// Thread to show: hex id or role such as GC2 or BG0 (repeatable)
    #[arg(short = 'T', long = "thread")]
    pub threads: Vec<ThreadSelector>,

    /// Also print the earliest retained message of every thread, or of the listed ones
    #[arg(short, long, num_args = 0.., value_delimiter = ',', value_name = "THREAD")]
    pub earliest: Option<Vec<ThreadSelector>>,

    /// Oldest message first
    #[arg(long)]
    pub ascending: bool,

    /// One JSON object per line
    #[arg(long)]
    pub json: bool,

    /// Label threads with their role (GC2, BG0) where known
    #[arg(short, long)]
    pub roles: bool,

    /// Decoder worker threads (default: one per processor)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Walk every record even when a time window is set
    #[arg(long)]
    pub no_early_stop: bool,
}

fn parse_facilities(s: &str) -> Result<u32, String> {
    parse_facility_mask(s).ok_or_else(|| format!("'{s}' is not a facility mask or facility names"))
}

impl DumpArgs {
    /// The message filter these options describe.
    pub fn filter(&self) -> MessageFilter {
        let mut filter = MessageFilter::new();
        if let Some(time) = self.time {
            filter = filter.time(time);
        } else if let Some(last) = self.last {
            filter = filter.time(TimeWindow::Last(last.max(0.0)));
        }
        for level in &self.levels {
            filter = filter.level(*level);
        }
        if let Some(mask) = self.ignore_facilities {
            filter = filter.ignore_facilities(mask);
        }
        for text in &self.formats {
            filter = filter.format(FormatPattern::literal(text));
        }
        for text in &self.raw_formats {
            filter = filter.format(FormatPattern::raw(text.as_str()));
        }
        for thread in &self.threads {
            filter = filter.thread(*thread);
        }
        for value in &self.values {
            filter = filter.value(*value);
        }
        if let Some(gc) = self.gc {
            filter = filter.gc(gc);
        }
        if let Some(threads) = &self.earliest {
            filter = filter.earliest(threads.clone());
        }
        filter
    }

    /// Decoder tuning from these options.
    pub fn options(&self) -> DecodeOptions {
        let options = DecodeOptions::default()
            .with_early_stop(!self.no_early_stop)
            .with_role_tags(self.roles);
        match self.workers {
            Some(workers) => options.with_workers(workers),
            None => options,
        }
    }
}

/// Run the dump command.
pub fn run(args: &DumpArgs) -> Result<()> {
    tracing::info!(file = %args.file.display(), "Decoding store");

    let store = StoreFile::open(&args.file)?;
    let image = store
        .image()
        .with_context(|| format!("Not a stress log store: {}", args.file.display()))?;

    let report = Decoder::new(&image, args.filter())
        .with_options(args.options())
        .decode();
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    let renderer = Renderer::new(&image).with_role_tags(args.roles);
    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            renderer.write_report(&mut out, &report, format, args.ascending)?;
            out.flush()
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            renderer.write_report(&mut out, &report, format, args.ascending)?;
            out.flush().context("Failed to write output")?;
        }
    }

    if !args.json {
        eprintln!(
            "{} of {} messages from {} thread logs",
            report.messages.len(),
            report.scanned,
            report.logs
        );
    }
    Ok(())
}

//! Integration tests for the decode pipeline.
//!
//! Each test writes a store through the core registry, snapshots it and
//! decodes the snapshot, checking filters, ordering, damage handling and
//! rendered output.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use stresslog_core::facility::{LF_GC, LF_JIT, LL_ALWAYS, LL_INFO10, dprint_facility};
use stresslog_core::layout::{CHUNK_DATA, CHUNK_NEXT};
use stresslog_core::{ManualTicks, StoreImage, StressLog, StressLogConfig};
use stresslog_decoder::{
    DecodeOptions, DecodeReport, Decoder, FormatPattern, GcRange, LevelRange, MessageFilter,
    OutputFormat, Renderer, ThreadRole, ThreadSelector, TimeWindow, ValueRange,
};

const CHUNK: usize = 4096;

fn config() -> StressLogConfig {
    StressLogConfig::default()
        .with_chunk_size(CHUNK)
        .with_max_bytes_per_thread(CHUNK as u64 * 8)
        .with_max_bytes_total(CHUNK as u64 * 64)
        .with_image_capacity(64 * 1024)
}

fn registry(clock: &Arc<ManualTicks>) -> StressLog {
    StressLog::builder(config())
        .clock(clock.clone())
        .build()
        .unwrap()
}

fn decode<'a>(image: &StoreImage<'a>, filter: MessageFilter) -> DecodeReport<'a> {
    Decoder::new(image, filter)
        .with_options(DecodeOptions::default().with_workers(4))
        .decode()
}

fn render(image: &StoreImage<'_>, report: &DecodeReport<'_>, format: OutputFormat) -> String {
    let mut out = Vec::new();
    Renderer::new(image)
        .with_role_tags(true)
        .write_report(&mut out, report, format, false)
        .unwrap();
    String::from_utf8(out).unwrap()
}

fn first_args(report: &DecodeReport<'_>) -> Vec<u64> {
    report
        .messages
        .iter()
        .map(|m| m.record.arg(0).unwrap())
        .collect()
}

fn keys(report: &DecodeReport<'_>) -> BTreeSet<usize> {
    report.messages.iter().map(|m| m.offset).collect()
}

/// Four threads, each writing 50 numbered messages with a shared clock.
fn busy_store(clock: &Arc<ManualTicks>) -> StressLog {
    let log = registry(clock);
    for t in 0..4u64 {
        let worker = log.clone();
        let clock = clock.clone();
        std::thread::spawn(move || {
            for i in 0..50u64 {
                clock.advance(10);
                worker.log_msg(LL_INFO10, LF_GC, "thread %d item %d\n", &[t * 1000 + i, i]);
            }
        })
        .join()
        .unwrap();
    }
    log
}

// Ordering

#[test]
fn messages_are_newest_first_across_threads() {
    let clock = Arc::new(ManualTicks::new());
    let log = busy_store(&clock);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new());
    assert_eq!(report.logs, 4);
    assert_eq!(report.messages.len(), 200);
    assert!(report.warnings.is_empty());
    assert!(
        report
            .messages
            .windows(2)
            .all(|w| w[0].timestamp() >= w[1].timestamp())
    );
    assert_eq!(report.messages[0].record.arg(0), Some(3049));
    assert_eq!(report.messages[199].record.arg(0), Some(0));
}

#[test]
fn decoding_twice_renders_identically() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let log = &log;
            scope.spawn(move || {
                for i in 0..300u64 {
                    // Colliding timestamps exercise the tie-breaks.
                    log.log_msg(LL_INFO10, LF_GC, "t%d i%d\n", &[t, i]);
                }
            });
        }
    });
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let first = render(&image, &decode(&image, MessageFilter::new()), OutputFormat::Text);
    let single = Decoder::new(&image, MessageFilter::new())
        .with_options(DecodeOptions::default().with_workers(1))
        .decode();
    let second = render(&image, &single, OutputFormat::Text);
    assert_eq!(first, second);
    assert_eq!(first.lines().count(), 1200);
}

#[test]
fn ascending_reverses_the_order() {
    let clock = Arc::new(ManualTicks::new());
    let log = busy_store(&clock);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();
    let report = decode(&image, MessageFilter::new());

    let mut out = Vec::new();
    Renderer::new(&image)
        .write_report(&mut out, &report, OutputFormat::Text, true)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    let first = text.lines().next().unwrap();
    let last = text.lines().last().unwrap();
    assert!(first.ends_with("thread 0 item 0"), "{first}");
    assert!(last.ends_with("thread 3049 item 49"), "{last}");
}

// Filters

#[test]
fn filters_compose_as_an_intersection() {
    let clock = Arc::new(ManualTicks::with_frequency(1000));
    let log = registry(&clock);
    for i in 0..200u64 {
        clock.advance(10);
        let level = (i % 5) as u32;
        log.log_msg(LL_ALWAYS, dprint_facility(level), "dprint %d level %d\n", &[i, level as u64]);
    }
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let time = TimeWindow::Range {
        start: 0.5,
        end: Some(1.5),
    };
    let level = LevelRange { min: 1, max: 2 };
    let value = ValueRange {
        start: 40,
        end: 120,
    };

    let by_time = keys(&decode(&image, MessageFilter::new().time(time)));
    let by_level = keys(&decode(&image, MessageFilter::new().level(level)));
    let by_value = keys(&decode(&image, MessageFilter::new().value(value)));
    let combined = keys(&decode(
        &image,
        MessageFilter::new().time(time).level(level).value(value),
    ));

    let expected: BTreeSet<usize> = by_time
        .iter()
        .filter(|k| by_level.contains(k) && by_value.contains(k))
        .copied()
        .collect();
    assert!(!combined.is_empty());
    assert!(combined.len() < by_time.len());
    assert_eq!(combined, expected);
}

#[test]
fn format_patterns_widen_the_level_group() {
    let clock = Arc::new(ManualTicks::with_frequency(1000));
    let log = registry(&clock);
    log.gc_start(1, 2, false);
    for i in 0..100u64 {
        clock.advance(100);
        log.log_msg(LL_INFO10, LF_GC, "work %d\n", &[i]);
    }
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    // The last second holds the last ten messages; the GC start is older.
    let recent = MessageFilter::new().time(TimeWindow::Last(0.95));
    assert_eq!(decode(&image, recent.clone()).messages.len(), 10);

    let widened = recent.format(FormatPattern::literal("BEGINGC"));
    let report = decode(&image, widened);
    assert_eq!(report.messages.len(), 11);
    let oldest = report.messages.last().unwrap();
    assert_eq!(oldest.record.arg(0), Some(1));

    let only_pattern = MessageFilter::new().format(FormatPattern::literal("BEGINGC"));
    assert_eq!(decode(&image, only_pattern).messages.len(), 1);
}

#[test]
fn ignored_facilities_are_dropped() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    log.log_msg(LL_INFO10, LF_GC, "gc %d\n", &[1]);
    log.log_msg(LL_INFO10, LF_JIT, "jit %d\n", &[2]);
    log.log_msg(LL_ALWAYS, dprint_facility(3), "dprint %d\n", &[3]);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new().ignore_facilities(LF_GC));
    assert_eq!(first_args(&report), vec![2]);
}

#[test]
fn plug_moves_match_their_relocated_range() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    log.gc_plug_move(0x5000, 0x6000, 0x3000);
    log.log_msg(LL_INFO10, LF_GC, "unrelated %p\n", &[0x9000]);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    // The plug lands at [0x2000, 0x3000).
    let report = decode(&image, MessageFilter::new().value(ValueRange::single(0x2800)));
    assert_eq!(first_args(&report), vec![0x5000]);

    let report = decode(&image, MessageFilter::new().value(ValueRange::single(0x9000)));
    assert_eq!(first_args(&report), vec![0x9000]);
}

#[test]
fn threads_are_selected_by_role() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    let gc = log.clone();
    std::thread::spawn(move || {
        gc.gc_thread_woke(2);
        gc.log_msg(LL_INFO10, LF_GC, "marking %d\n", &[7]);
        gc.gc_thread_waiting(2);
    })
    .join()
    .unwrap();
    let other = log.clone();
    std::thread::spawn(move || other.log_msg(LL_INFO10, LF_GC, "mutator %d\n", &[8]))
        .join()
        .unwrap();
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let filter = MessageFilter::new().thread(ThreadSelector::Role(ThreadRole::Gc(2)));
    let report = decode(&image, filter);
    assert_eq!(report.messages.len(), 3);
    assert!(report.messages.iter().all(|m| m.role == Some(ThreadRole::Gc(2))));
    assert_eq!(report.roles, 1);

    let text = render(&image, &report, OutputFormat::Text);
    assert!(text.lines().all(|line| line.trim_start().starts_with("GC2")));
    assert!(text.contains("marking 7"));

    let gc_thread = report.messages[0].thread_id;
    let by_id = decode(&image, MessageFilter::new().thread(ThreadSelector::Id(gc_thread)));
    assert_eq!(by_id.messages.len(), 3);
}

#[test]
fn roles_are_learned_before_the_time_window() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    let gc = log.clone();
    let worker_clock = clock.clone();
    std::thread::spawn(move || {
        gc.gc_thread_woke(2);
        worker_clock.advance_by(Duration::from_secs(10));
        gc.log_msg(LL_INFO10, LF_GC, "marking %d\n", &[7]);
    })
    .join()
    .unwrap();
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();
    let recent = TimeWindow::Range {
        start: 5.0,
        end: None,
    };

    let filter = MessageFilter::new()
        .time(recent)
        .thread(ThreadSelector::Role(ThreadRole::Gc(2)));
    let report = decode(&image, filter);
    assert_eq!(report.roles, 1);
    assert_eq!(first_args(&report), vec![7]);
    assert_eq!(report.messages[0].role, Some(ThreadRole::Gc(2)));

    // Role tags alone also read past the window start.
    let report = Decoder::new(&image, MessageFilter::new().time(recent))
        .with_options(DecodeOptions::default().with_role_tags(true))
        .decode();
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].role, Some(ThreadRole::Gc(2)));

    // Without either, the walk stops at the window start.
    let report = decode(&image, MessageFilter::new().time(recent));
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.roles, 0);
}

// GC windows

#[test]
fn gc_range_selects_the_collection() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    log.log_msg(LL_INFO10, LF_GC, "before %d\n", &[1]);
    clock.advance(100);
    log.gc_start(4, 1, false);
    clock.advance(100);
    log.log_msg(LL_INFO10, LF_GC, "during %d\n", &[2]);
    clock.advance(100);
    log.gc_end(4, 1, false);
    clock.advance(100);
    log.log_msg(LL_INFO10, LF_GC, "after %d\n", &[3]);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new().gc(GcRange { first: 4, last: 4 }));
    assert_eq!(first_args(&report), vec![4, 2, 4]);
    assert_eq!(report.gcs, 1);
}

#[test]
fn unfinished_gc_extends_to_the_newest_message() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    log.log_msg(LL_INFO10, LF_GC, "before %d\n", &[1]);
    clock.advance(100);
    log.gc_start(9, 2, false);
    for i in 0..3u64 {
        clock.advance(100);
        log.log_msg(LL_INFO10, LF_GC, "during %d\n", &[10 + i]);
    }
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new().gc(GcRange { first: 9, last: 9 }));
    assert_eq!(first_args(&report), vec![12, 11, 10, 9]);
    assert!(report.warnings.is_empty());

    let missing = decode(&image, MessageFilter::new().gc(GcRange { first: 3, last: 3 }));
    assert!(missing.messages.is_empty());
    assert_eq!(missing.warnings.len(), 1);
}

// Earliest messages

#[test]
fn earliest_message_of_each_thread() {
    let clock = Arc::new(ManualTicks::new());
    let log = busy_store(&clock);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let filter = MessageFilter::new()
        .time(TimeWindow::Last(0.0))
        .earliest(Vec::new());
    let report = decode(&image, filter);
    assert_eq!(report.messages.len(), 1);
    let mut earliest: Vec<u64> = report
        .earliest
        .iter()
        .map(|m| m.record.arg(0).unwrap())
        .collect();
    assert_eq!(earliest, vec![3000, 2000, 1000, 0]);

    let text = render(&image, &report, OutputFormat::Text);
    let header = text.lines().next().unwrap();
    assert!(header.starts_with("Earliest"));

    let only = report.earliest[1].thread_id;
    let filter = MessageFilter::new().earliest(vec![ThreadSelector::Id(only)]);
    earliest = decode(&image, filter)
        .earliest
        .iter()
        .map(|m| m.record.arg(0).unwrap())
        .collect();
    assert_eq!(earliest, vec![2000]);
}

// Damage

#[test]
fn corrupt_chunk_is_skipped_with_a_warning() {
    let clock = Arc::new(ManualTicks::new());
    let log = registry(&clock);
    for i in 0..400u64 {
        log.log_msg(LL_INFO10, LF_GC, "record %d\n", &[i]);
    }
    let healthy = log.clone();
    std::thread::spawn(move || {
        for i in 0..10u64 {
            healthy.log_msg(LL_INFO10, LF_GC, "healthy %d\n", &[10_000 + i]);
        }
    })
    .join()
    .unwrap();

    let mut bytes = log.snapshot();
    let (damaged, thread_id) = {
        let image = StoreImage::parse(&bytes).unwrap();
        let view = image
            .logs()
            .map(Result::unwrap)
            .find(|view| view.chunk_count() > 2)
            .unwrap();
        let write_chunk = view.cur_write_chunk();
        let older = u64::from_le_bytes(
            bytes[write_chunk + CHUNK_NEXT..write_chunk + CHUNK_NEXT + 8]
                .try_into()
                .unwrap(),
        ) as usize;
        (older, view.thread_id())
    };
    let guard = damaged + CHUNK_DATA + CHUNK;
    bytes[guard..guard + 8].fill(0);

    let image = StoreImage::parse(&bytes).unwrap();
    let report = decode(&image, MessageFilter::new());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("corrupt guard words"));

    let survivors: Vec<u64> = report
        .messages
        .iter()
        .filter(|m| m.thread_id == thread_id)
        .map(|m| m.record.arg(0).unwrap())
        .collect();
    // 170 records fit a chunk: the newest chunk holds 340..=399, the
    // damaged one 170..=339 and the oldest 0..=169.
    assert_eq!(survivors.len(), 230);
    assert!(survivors.contains(&399));
    assert!(survivors.contains(&0));
    assert!(!survivors.contains(&250));
    let healthy_count = report
        .messages
        .iter()
        .filter(|m| m.thread_id != thread_id)
        .count();
    assert_eq!(healthy_count, 10);

    // Rendering still works on the damaged image.
    let text = render(&image, &report, OutputFormat::Text);
    assert!(text.contains("record 399"));
    assert!(text.contains("healthy 10009"));
}

// Output

#[test]
fn json_lines_carry_the_message() {
    let clock = Arc::new(ManualTicks::with_frequency(1000));
    let log = registry(&clock);
    clock.advance_by(Duration::from_millis(1500));
    log.log_msg(LL_INFO10, LF_GC, "allocated %d bytes in %s\n", &[4096, log.str_arg("gen0")]);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new());
    let text = render(&image, &report, OutputFormat::Json);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);

    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["message"], "allocated 4096 bytes in gen0");
    assert_eq!(value["facility_names"][0], "GC");
    assert_eq!(value["args"][0], 4096);
    assert!((value["seconds"].as_f64().unwrap() - 1.5).abs() < 1e-9);
}

#[test]
fn text_lines_are_aligned() {
    let clock = Arc::new(ManualTicks::with_frequency(1000));
    let log = registry(&clock);
    clock.advance(2000);
    log.log_msg(LL_ALWAYS, dprint_facility(5), "dprint %d\n", &[1]);
    let bytes = log.snapshot();
    let image = StoreImage::parse(&bytes).unwrap();

    let report = decode(&image, MessageFilter::new());
    let text = render(&image, &report, OutputFormat::Text);
    let line = text.lines().next().unwrap();
    let thread = format!("{:x}", report.messages[0].thread_id);
    assert!(line.starts_with(&format!("{thread:>8} ")), "{line}");
    assert!(line.contains("   2.000000000 : `GC`:5"), "{line}");
    assert!(line.ends_with(" dprint 1"), "{line}");
}

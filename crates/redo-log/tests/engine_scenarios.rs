use std::sync::Arc;
use std::time::Duration;

use redo_log::config::LogConfig;
use redo_log::consumer::Consumer;
use redo_log::engine::LogEngine;
use redo_log::types::Lsn;

fn fast_config(dir: &std::path::Path) -> LogConfig {
    LogConfig::new(dir)
        .with_buffer_bytes(256 * 1024)
        .with_capacity_bytes(8 * 1024 * 1024)
        .with_skip_fsyncs(true)
        .with_checkpoint_period(Duration::from_millis(50))
}

#[test]
fn cold_start_then_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LogEngine::init(fast_config(dir.path())).unwrap();
    engine.start_background_threads();
    let state = engine.durability_state();
    assert!(state.write_lsn > 0);
    engine.close().unwrap();
}

#[test]
fn write_then_flush_boundary_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LogEngine::init(fast_config(dir.path())).unwrap();
    engine.start_background_threads();

    let range = engine.append(&vec![0xABu8; 2000]).unwrap();
    let flushed = engine.wait_flushed_at_least(range.end, Duration::from_secs(3));
    assert!(flushed >= range.end);

    engine.close().unwrap();
}

#[test]
fn many_small_records_all_become_durable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LogEngine::init(fast_config(dir.path())).unwrap();
    engine.start_background_threads();

    let mut last_end = 0;
    for i in 0..200u32 {
        let payload = format!("record-{i}").into_bytes();
        let range = engine.append(&payload).unwrap();
        last_end = range.end;
    }
    let flushed = engine.wait_flushed_at_least(last_end, Duration::from_secs(5));
    assert!(flushed >= last_end);

    engine.close().unwrap();
}

struct PinnedConsumer(std::sync::atomic::AtomicU64);

impl Consumer for PinnedConsumer {
    fn name(&self) -> &str {
        "pinned"
    }

    fn oldest_needed_lsn(&self) -> Lsn {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[test]
fn checkpoint_never_advances_past_a_registered_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LogEngine::init(fast_config(dir.path())).unwrap();
    engine.start_background_threads();

    let pin_lsn = engine.durability_state().write_lsn;
    let consumer = Arc::new(PinnedConsumer(std::sync::atomic::AtomicU64::new(pin_lsn)));
    engine.register_consumer(consumer.clone());

    for _ in 0..50 {
        engine.append(&vec![1u8; 256]).unwrap();
    }
    std::thread::sleep(Duration::from_millis(200));

    let state = engine.durability_state();
    assert!(state.last_checkpoint_lsn <= pin_lsn);
    assert!(state.write_lsn > pin_lsn);

    engine.unregister_consumer("pinned");
    engine.close().unwrap();
}

#[test]
fn init_fails_on_a_directory_that_already_has_a_log() {
    let dir = tempfile::tempdir().unwrap();
    let _first = LogEngine::init(fast_config(dir.path())).unwrap();
    assert!(LogEngine::init(fast_config(dir.path())).is_err());
}

#[test]
fn appending_past_one_file_triggers_rotation_and_reads_still_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path()).with_buffer_bytes(1024 * 1024);
    let engine = LogEngine::init(config).unwrap();
    engine.start_background_threads();

    let initial_physical = engine.capacity_limits().current_physical_capacity;

    let filler = "x".repeat(500);
    let mut ranges = Vec::new();
    for i in 0..600u32 {
        let payload = format!("rotation-record-{i:04}-{filler}").into_bytes();
        ranges.push(engine.append(&payload).unwrap());
    }
    let last_end = ranges.last().unwrap().end;
    engine.wait_flushed_at_least(last_end, Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(500));

    assert!(
        engine.capacity_limits().current_physical_capacity > initial_physical,
        "governor should have produced another file once the first neared full"
    );

    let first = ranges.first().unwrap();
    let last = ranges.last().unwrap();
    assert_eq!(engine.read_blocks(first.start, first.end).unwrap(), format!("rotation-record-0000-{filler}").into_bytes());
    assert_eq!(engine.read_blocks(last.start, last.end).unwrap(), format!("rotation-record-0599-{filler}").into_bytes());

    engine.close().unwrap();
}

#[test]
fn reserving_past_hard_logical_capacity_fails_once_the_wait_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::new(dir.path())
        .with_capacity_bytes(redo_log::constants::CAPACITY_MIN)
        .with_buffer_bytes(4 * 1024 * 1024)
        .with_skip_fsyncs(true)
        .with_reserve_timeout(Duration::from_millis(50));
    let engine = LogEngine::init(config).unwrap();

    let hard = engine.capacity_limits().hard_logical_capacity;
    let err = engine.reserve(hard as usize + 4096).unwrap_err();
    assert!(matches!(err, redo_log::LogError::CapacityExceeded(_)));

    engine.close().unwrap();
}

#[test]
fn recovery_survives_corruption_of_the_newer_checkpoint_header() {
    use redo_log::codec::CheckpointHeader;
    use redo_log::constants::{BLOCK_SIZE, CHECKPOINT_1_OFFSET, CHECKPOINT_2_OFFSET};
    use redo_log::file_handle::FileHandle;

    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path()).with_checkpoint_period(Duration::from_millis(20));
    let engine = LogEngine::init(config).unwrap();
    engine.start_background_threads();

    let mut last_end = 0;
    for i in 0..20u32 {
        last_end = engine.append(format!("mtr-{i}").as_bytes()).unwrap().end;
        std::thread::sleep(Duration::from_millis(15));
    }
    engine.wait_flushed_at_least(last_end, Duration::from_secs(3));
    std::thread::sleep(Duration::from_millis(200));
    engine.close().unwrap();

    let file0 = dir.path().join("redo.00000000.log");
    let mut handle = FileHandle::open_existing(0, &file0).unwrap();
    let mut raw1 = [0u8; BLOCK_SIZE];
    let mut raw2 = [0u8; BLOCK_SIZE];
    handle.read_block(CHECKPOINT_1_OFFSET, &mut raw1).unwrap();
    handle.read_block(CHECKPOINT_2_OFFSET, &mut raw2).unwrap();
    let h1 = CheckpointHeader::decode(&raw1).unwrap();
    let h2 = CheckpointHeader::decode(&raw2).unwrap();
    assert_ne!(h1.checkpoint_no, h2.checkpoint_no, "expected at least two checkpoints across the run");

    let (newer_offset, surviving) =
        if h1.checkpoint_no > h2.checkpoint_no { (CHECKPOINT_1_OFFSET, h2) } else { (CHECKPOINT_2_OFFSET, h1) };

    let mut corrupt = [0u8; BLOCK_SIZE];
    handle.read_block(newer_offset, &mut corrupt).unwrap();
    corrupt[0] ^= 0xff;
    handle.write_block(newer_offset, &corrupt).unwrap();
    handle.sync().unwrap();
    drop(handle);

    let reopened = LogEngine::open_existing_files(LogConfig::new(dir.path()).with_skip_fsyncs(true)).unwrap();
    assert_eq!(reopened.durability_state().last_checkpoint_lsn, surviving.checkpoint_lsn);
}

#[test]
fn resize_down_eventually_converges_as_files_turn_over() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path()).with_checkpoint_period(Duration::from_millis(20)).with_buffer_bytes(1024 * 1024);
    let engine = LogEngine::init(config).unwrap();
    engine.start_background_threads();

    // Push enough bytes through for several files to fill, get consumed, and
    // be recycled, so there is a file set to actually shrink.
    let filler = "y".repeat(500);
    for i in 0..2000u32 {
        let payload = format!("resize-record-{i:04}-{filler}").into_bytes();
        engine.append(&payload).unwrap();
    }
    std::thread::sleep(Duration::from_millis(500));

    let before = engine.capacity_limits().current_physical_capacity;
    engine.begin_resize_down(before / 2);
    assert!(engine.capacity_limits().is_resizing_down());

    let mut lowest = before;
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        for i in 0..200u32 {
            let payload = format!("resize-drain-{i:04}-{filler}").into_bytes();
            let _ = engine.append(&payload);
        }
        std::thread::sleep(Duration::from_millis(100));
        lowest = lowest.min(engine.capacity_limits().current_physical_capacity);
        if !engine.capacity_limits().is_resizing_down() || std::time::Instant::now() >= deadline {
            break;
        }
    }

    // Either the planner fully converged (target met, resize_mode back to
    // none) or at least visibly shrank the file set while draining toward it.
    assert!(!engine.capacity_limits().is_resizing_down() || lowest < before);

    engine.close().unwrap();
}

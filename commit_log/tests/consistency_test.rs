use commit_log::{CommitLog, Config, Record, SegmentConfig};
use tempfile::tempdir;
use utils::{generate_random_values, CRC64};

mod utils;

const NUMBER_OF_ELEMENTS_TO_INSERT: usize = 500;
const DATA_ITEM_SIZE: usize = 32;

fn small_segments() -> Config {
    Config {
        segment: SegmentConfig {
            max_store_bytes: 1024,
            max_index_bytes: 20 * 12,
            initial_offset: 0,
        },
    }
}

#[test]
fn test_data_consistency_of_random_values() {
    let dir = tempdir().unwrap();
    let log = CommitLog::new(dir.path(), small_segments()).unwrap();

    let mut write_digest = CRC64.digest();
    generate_random_values(NUMBER_OF_ELEMENTS_TO_INSERT, DATA_ITEM_SIZE, |value| {
        write_digest.update(value);
        log.append(Record::new(value)).unwrap();
    });

    let mut read_digest = CRC64.digest();
    for offset in log.lowest_offset().unwrap()..=log.highest_offset().unwrap() {
        read_digest.update(&log.read(offset).unwrap().value);
    }
    assert_eq!(write_digest.finalize(), read_digest.finalize());
}

#[test]
fn test_data_consistency_survives_a_reopen() {
    let dir = tempdir().unwrap();

    let mut write_digest = CRC64.digest();
    let log = CommitLog::new(dir.path(), small_segments()).unwrap();
    generate_random_values(NUMBER_OF_ELEMENTS_TO_INSERT, DATA_ITEM_SIZE, |value| {
        write_digest.update(value);
        log.append(Record::new(value)).unwrap();
    });
    log.close().unwrap();

    let log = CommitLog::new(dir.path(), small_segments()).unwrap();
    let mut read_digest = CRC64.digest();
    for offset in log.lowest_offset().unwrap()..=log.highest_offset().unwrap() {
        read_digest.update(&log.read(offset).unwrap().value);
    }
    assert_eq!(write_digest.finalize(), read_digest.finalize());
}

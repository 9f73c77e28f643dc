//! Discovery of superseding partition directories.

use alopex_journal::row_id::to_row_id;
use alopex_journal::storage::MappedFile;
use alopex_journal::{
    ColumnStorage, JournalConfig, JournalMetadata, JournalReader, JournalWriter, PartitionType,
    ReadTransactionContext, SyncMode, Value,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn metadata() -> JournalMetadata {
    JournalMetadata::builder("ts").long("seq").build().unwrap()
}

fn config() -> JournalConfig {
    JournalConfig::default()
        .with_partition_type(PartitionType::Day)
        .with_sync_mode(SyncMode::None)
}

fn append(writer: &JournalWriter, range: std::ops::Range<i64>) {
    let mut tx = writer.begin().unwrap();
    for i in range {
        tx.append(&[Value::Timestamp(i), Value::Long(i)]).unwrap();
    }
    tx.commit().unwrap();
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), to.join(entry.file_name())).unwrap();
    }
}

#[test]
fn test_newest_version_wins() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    {
        let writer = JournalWriter::open(root, metadata(), config()).unwrap();
        append(&writer, 0..10);
    }
    fs::rename(root.join("1970-01-01"), root.join("1970-01-01.0")).unwrap();

    let reader = JournalReader::open(root, metadata(), config()).unwrap();
    let before = reader.snapshot().unwrap();
    assert_eq!(before.row_count(1), 10);
    assert_eq!(reader.partition_dir(1), Some(root.join("1970-01-01.0")));

    // Another process supersedes the range with version 1 and extends it.
    copy_dir(&root.join("1970-01-01.0"), &root.join("1970-01-01.1"));
    {
        let writer = JournalWriter::open(root, metadata(), config()).unwrap();
        assert_eq!(writer.stats().partitions, 1);
        append(&writer, 10..15);
    }

    // Until the next snapshot the reader keeps the old directory.
    assert_eq!(reader.partition_dir(1), Some(root.join("1970-01-01.0")));
    assert_eq!(
        reader.read_value(&before, to_row_id(1, 9), "seq").unwrap(),
        Value::Long(9)
    );
    assert!(!before.contains_row(to_row_id(1, 12)));

    let after = reader.snapshot().unwrap();
    assert_eq!(reader.partition_ids(), vec![1]);
    assert_eq!(reader.partition_dir(1), Some(root.join("1970-01-01.1")));
    assert_eq!(after.row_count(1), 15);
    assert_eq!(
        reader.read_value(&after, to_row_id(1, 12), "seq").unwrap(),
        Value::Long(12)
    );

    // The superseded directory was never written to.
    let fresh = JournalReader::open(root, metadata(), config()).unwrap();
    assert_eq!(fresh.snapshot().unwrap().row_count(1), 15);
    let header = |dir: &str| {
        MappedFile::open(root.join(dir).join("seq.d"), 4096, SyncMode::None)
            .unwrap()
            .append_offset()
            .unwrap()
    };
    assert_eq!(header("1970-01-01.0"), 80);
    assert_eq!(header("1970-01-01.1"), 120);
}

#[test]
fn test_new_ranges_are_discovered_by_readers() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let writer = JournalWriter::open(root, metadata(), config()).unwrap();
    append(&writer, 0..3);

    let reader = JournalReader::open(root, metadata(), config()).unwrap();
    let first = reader.snapshot().unwrap();
    assert_eq!(first.data_partition_count(), 1);

    let day = 86_400 * 1_000_000_000;
    append(&writer, day..day + 2);
    assert_eq!(reader.partition_ids(), vec![1]);

    let second = reader.snapshot().unwrap();
    assert_eq!(reader.partition_ids(), vec![1, 2]);
    assert_eq!(second.row_count(2), 2);
    assert_eq!(first.data_partition_count(), 1);
}

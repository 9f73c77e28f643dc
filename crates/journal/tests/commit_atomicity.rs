//! Commit atomicity under injected header write failures.
//!
//! Partition 1, partition 2 and the dictionary store are committed in that
//! order. Failing partition 2 must restore partition 1 and leave the
//! dictionary untouched.

use alopex_journal::row_id::to_row_id;
use alopex_journal::storage::MappedFile;
use alopex_journal::{
    ColumnStorage, JournalConfig, JournalError, JournalMetadata, JournalReader, JournalWriter,
    MappedStorageProvider, PartitionType, ReadTransactionContext, Result, StorageProvider,
    SyncMode, Value,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const DAY: i64 = 86_400 * 1_000_000_000;

/// Fails every write to files inside the armed directory.
#[derive(Default)]
struct FaultInjector {
    armed: Mutex<Option<PathBuf>>,
}

impl FaultInjector {
    fn arm(&self, dir: &Path) {
        *self.armed.lock() = Some(dir.to_path_buf());
    }

    fn disarm(&self) {
        *self.armed.lock() = None;
    }

    fn should_fail(&self, path: &Path) -> bool {
        self.armed
            .lock()
            .as_deref()
            .is_some_and(|dir| path.parent() == Some(dir))
    }
}

struct FaultyFile {
    inner: MappedFile,
    faults: Arc<FaultInjector>,
}

impl ColumnStorage for FaultyFile {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn ensure_len(&mut self, len: u64) -> Result<()> {
        self.inner.ensure_len(len)
    }

    fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_at(position, buf)
    }

    fn write_at(&mut self, position: u64, buf: &[u8]) -> Result<()> {
        if self.faults.should_fail(self.inner.path()) {
            return Err(std::io::Error::other("injected failure").into());
        }
        self.inner.write_at(position, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn refresh(&mut self) -> Result<()> {
        self.inner.refresh()
    }
}

struct FaultyProvider {
    faults: Arc<FaultInjector>,
}

impl StorageProvider for FaultyProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn ColumnStorage>> {
        Ok(Box::new(FaultyFile {
            inner: MappedFile::open(path, 4096, SyncMode::None)?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

fn metadata() -> JournalMetadata {
    JournalMetadata::builder("ts")
        .symbol("sym")
        .long("qty")
        .build()
        .unwrap()
}

fn config() -> JournalConfig {
    JournalConfig::default()
        .with_partition_type(PartitionType::Day)
        .with_sync_mode(SyncMode::None)
}

fn row(ts: i64, sym: &str, qty: i64) -> Vec<Value> {
    vec![
        Value::Timestamp(ts),
        Value::Symbol(sym.to_string()),
        Value::Long(qty),
    ]
}

fn durable_offset(path: &Path) -> u64 {
    MappedFile::open(path, 4096, SyncMode::None)
        .unwrap()
        .append_offset()
        .unwrap()
}

#[test]
fn test_failed_commit_rolls_back_and_retries() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let faults = Arc::new(FaultInjector::default());
    let provider = Arc::new(FaultyProvider {
        faults: Arc::clone(&faults),
    });
    let writer = JournalWriter::open_with_provider(&root, metadata(), config(), provider).unwrap();

    let day0 = root.join("1970-01-01");
    let day1 = root.join("1970-01-02");
    let dictionary = root.join("sym.sym");

    {
        let mut tx = writer.begin().unwrap();
        tx.append(&row(1, "a", 1)).unwrap();
        tx.append(&row(DAY + 1, "b", 2)).unwrap();
        tx.commit().unwrap();
    }
    assert_eq!(durable_offset(&day0.join("ts.d")), 8);
    assert_eq!(durable_offset(&day1.join("ts.d")), 8);
    let dictionary_before = durable_offset(&dictionary);

    let mut tx = writer.begin().unwrap();
    tx.append(&row(2, "c", 3)).unwrap();
    tx.append(&row(DAY + 2, "d", 4)).unwrap();

    faults.arm(&day1);
    let err = tx.commit().unwrap_err();
    match &err {
        JournalError::CommitFailed { partition_id, .. } => assert_eq!(*partition_id, 2),
        other => panic!("expected CommitFailed, got {:?}", other),
    }

    // Partition 1 was committed, then restored.
    assert_eq!(durable_offset(&day0.join("ts.d")), 8);
    assert_eq!(durable_offset(&day0.join("qty.d")), 8);
    assert_eq!(durable_offset(&day0.join("sym.k")), 16);
    // Partition 2 failed on its first header.
    assert_eq!(durable_offset(&day1.join("ts.d")), 8);
    // The dictionary store was never reached.
    assert_eq!(durable_offset(&dictionary), dictionary_before);

    let reader = JournalReader::open(&root, metadata(), config()).unwrap();
    let snapshot = reader.snapshot().unwrap();
    assert_eq!(snapshot.row_count(1), 1);
    assert_eq!(snapshot.row_count(2), 1);

    // Pending rows survive the failure and commit on retry.
    assert_eq!(tx.tx().row_count(1), 2);
    faults.disarm();
    tx.commit().unwrap();
    drop(tx);

    assert_eq!(durable_offset(&day0.join("ts.d")), 16);
    assert_eq!(durable_offset(&day1.join("ts.d")), 16);
    assert!(durable_offset(&dictionary) > dictionary_before);

    let snapshot = reader.snapshot().unwrap();
    assert_eq!(snapshot.row_count(1), 2);
    assert_eq!(snapshot.row_count(2), 2);
    assert_eq!(
        reader.read_value(&snapshot, to_row_id(2, 1), "sym").unwrap(),
        Value::Symbol("d".to_string())
    );
}

#[test]
fn test_failed_dictionary_commit_restores_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let faults = Arc::new(FaultInjector::default());
    let provider = Arc::new(FaultyProvider {
        faults: Arc::clone(&faults),
    });
    let writer = JournalWriter::open_with_provider(&root, metadata(), config(), provider).unwrap();

    let mut tx = writer.begin().unwrap();
    tx.append(&row(1, "a", 1)).unwrap();

    // Dictionary files live at the root, column files in partition directories.
    faults.arm(&root);
    assert!(matches!(
        tx.commit(),
        Err(JournalError::CommitFailed { partition_id: 0, .. })
    ));
    assert_eq!(durable_offset(&root.join("1970-01-01").join("ts.d")), 0);

    faults.disarm();
    tx.commit().unwrap();
    assert_eq!(durable_offset(&root.join("1970-01-01").join("ts.d")), 8);
}

#[test]
fn test_rejected_row_leaves_no_dictionary_entries() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let faults = Arc::new(FaultInjector::default());
    let provider = Arc::new(FaultyProvider {
        faults: Arc::clone(&faults),
    });
    let writer = JournalWriter::open_with_provider(&root, metadata(), config(), provider).unwrap();
    let dictionary = root.join("sym.sym");

    {
        let mut tx = writer.begin().unwrap();
        tx.append(&row(1, "a", 1)).unwrap();
        tx.commit().unwrap();
    }
    let dictionary_before = durable_offset(&dictionary);

    let mut tx = writer.begin().unwrap();
    faults.arm(&root.join("1970-01-01"));
    assert!(matches!(
        tx.append(&row(2, "zz", 2)),
        Err(JournalError::Io(_))
    ));
    faults.disarm();
    assert_eq!(tx.tx().row_count(1), 1);
    // Partition 0 is the dictionary store; its row count is its entry count.
    assert_eq!(tx.tx().row_count(0), 1);

    tx.append(&row(3, "a", 3)).unwrap();
    tx.commit().unwrap();
    drop(tx);

    assert_eq!(durable_offset(&dictionary), dictionary_before);
    let reader = JournalReader::open(&root, metadata(), config()).unwrap();
    let snapshot = reader.snapshot().unwrap();
    assert_eq!(snapshot.row_count(1), 2);
    assert!(reader.rows_for_symbol(&snapshot, "sym", "zz").unwrap().is_empty());
    assert_eq!(
        reader.rows_for_symbol(&snapshot, "sym", "a").unwrap(),
        vec![to_row_id(1, 0), to_row_id(1, 1)]
    );
}

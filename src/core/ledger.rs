use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::models::{LEDGER_ITEM_SLOTS, Transaction};

pub(crate) const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// What to do with an existing ledger file when the kiosk starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerMode {
    /// Start a new till tape, discarding earlier rows.
    Fresh,
    /// Keep earlier rows and continue the sequence.
    #[default]
    Resume,
}

/// On-disk row. Column order is the file schema.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    seq: u64,
    time: String,
    item1: String,
    item2: String,
    item3: String,
    item4: String,
    item5: String,
    item6: String,
    amount: u64,
    total: u64,
}

const HEADER: [&str; 10] = [
    "seq", "time", "item1", "item2", "item3", "item4", "item5", "item6", "amount", "total",
];

impl LedgerRow {
    fn from_transaction(txn: &Transaction) -> Result<Self> {
        let slot = |i: usize| txn.items.get(i).cloned().unwrap_or_default();
        Ok(Self {
            seq: txn.sequence,
            time: txn.timestamp.format(TIMESTAMP_FORMAT)?,
            item1: slot(0),
            item2: slot(1),
            item3: slot(2),
            item4: slot(3),
            item5: slot(4),
            item6: slot(5),
            amount: txn.amount,
            total: txn.running_total,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        let timestamp = PrimitiveDateTime::parse(&self.time, TIMESTAMP_FORMAT)
            .with_context(|| format!("bad timestamp {:?} in row {}", self.time, self.seq))?;
        let items = [self.item1, self.item2, self.item3, self.item4, self.item5, self.item6]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Transaction {
            sequence: self.seq,
            timestamp,
            items,
            amount: self.amount,
            running_total: self.total,
        })
    }
}

/// Append-only transaction log backed by a CSV file.
///
/// Every append rewrites the whole file through a temporary sibling and an
/// atomic rename, so a crash leaves either the old or the new ledger.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn open<P: AsRef<Path>>(path: P, mode: LedgerMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create ledger directory {}", parent.display()))?;
        }

        let ledger = Self { path };
        match mode {
            LedgerMode::Fresh => {
                ledger.persist(&[])?;
                info!("Started a fresh ledger at {}", ledger.path.display());
            }
            LedgerMode::Resume if !ledger.path.exists() => {
                ledger.persist(&[])?;
                info!("Created ledger at {}", ledger.path.display());
            }
            LedgerMode::Resume => {
                info!("Resuming ledger at {}", ledger.path.display());
            }
        }
        Ok(ledger)
    }

    /// Open a ledger only if its file already exists. Never creates
    /// anything on disk.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        path.is_file().then(|| Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded transaction in insertion order.
    pub fn all(&self) -> Result<Vec<Transaction>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open ledger {}", self.path.display()))?;

        let mut transactions = Vec::new();
        for row in reader.deserialize::<LedgerRow>() {
            let row = row.with_context(|| format!("corrupt row in {}", self.path.display()))?;
            transactions.push(row.into_transaction()?);
        }
        Ok(transactions)
    }

    /// Record one capture. `items` may be longer than the six item columns;
    /// extra labels are left out of the row but `amount` is taken as given.
    pub fn append(&mut self, items: &[String], amount: u64) -> Result<Transaction> {
        let mut rows = match self.all() {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Ledger unreadable, starting over at sequence 1: {err:#}");
                self.quarantine();
                Vec::new()
            }
        };

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let timestamp = PrimitiveDateTime::new(now.date(), now.time().replace_nanosecond(0)?);

        let txn = Transaction {
            sequence: rows.len() as u64 + 1,
            timestamp,
            items: items.iter().take(LEDGER_ITEM_SLOTS).cloned().collect(),
            amount,
            running_total: 0,
        };
        rows.push(txn);

        let mut running = 0u64;
        for row in rows.iter_mut() {
            running = running.checked_add(row.amount).with_context(|| {
                format!("running total overflows at transaction #{}", row.sequence)
            })?;
            row.running_total = running;
        }

        self.persist(&rows)?;

        let txn = rows.pop().context("ledger row vanished after append")?;
        debug!(
            "Recorded transaction #{} amount={} total={}",
            txn.sequence, txn.amount, txn.running_total
        );
        Ok(txn)
    }

    fn persist(&self, rows: &[Transaction]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(HEADER)?;
            for txn in rows {
                writer.serialize(LedgerRow::from_transaction(txn)?)?;
            }
            writer.flush()?;
        }

        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace ledger {}", self.path.display()))?;
        sync_dir(dir)
    }

    /// Move an unreadable ledger out of the way so its contents survive the
    /// rewrite that follows.
    fn quarantine(&self) {
        if !self.path.exists() {
            return;
        }
        let mut aside = self.path.clone().into_os_string();
        aside.push(".corrupt");
        match fs::rename(&self.path, &aside) {
            Ok(()) => warn!("Moved unreadable ledger to {}", Path::new(&aside).display()),
            Err(err) => warn!("Could not move unreadable ledger aside: {err}"),
        }
    }
}

/// Make a rename in `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("failed to sync ledger directory {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

//! Plain-text rendering of captures and the ledger for the terminal.

use std::fmt::Write;

use time::macros::format_description;

use crate::core::ledger::TIMESTAMP_FORMAT;
use crate::models::{CaptureResult, Transaction};

const WIDTH: usize = 36;

pub fn format_receipt(result: &CaptureResult) -> String {
    let txn = &result.transaction;
    let mut out = String::new();
    let _ = writeln!(out, "Transaction #{}  {}", txn.sequence, timestamp(txn));

    if result.items.is_empty() {
        let _ = writeln!(out, "  (nothing detected)");
    }
    for item in &result.items {
        let price = match item.price {
            Some(price) => price.to_string(),
            None => "no price".to_string(),
        };
        let _ = writeln!(out, "  {:<20}{:>12}", item.label, price);
    }

    let _ = writeln!(out, "  {}", "-".repeat(WIDTH - 4));
    let _ = writeln!(out, "  {:<20}{:>12}", "Amount", result.amount);
    let _ = writeln!(out, "  {:<20}{:>12}", "Running total", txn.running_total);
    out
}

/// One line per transaction, oldest first.
pub fn format_history(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions recorded.\n".to_string();
    }
    let mut out = String::new();
    for txn in transactions {
        let _ = writeln!(
            out,
            "#{:<4} {}  {:>8} {:>10}  {}",
            txn.sequence,
            timestamp(txn),
            txn.amount,
            txn.running_total,
            txn.items.join(", ")
        );
    }
    out
}

/// File name for an annotated capture. The timestamp keeps names unique
/// when the sequence restarts on a fresh or recovered ledger.
pub fn snapshot_file_name(txn: &Transaction) -> String {
    let stamp = txn
        .timestamp
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .unwrap_or_default();
    format!("capture_{}_{:04}.png", stamp, txn.sequence)
}

fn timestamp(txn: &Transaction) -> String {
    txn.timestamp.format(TIMESTAMP_FORMAT).unwrap_or_default()
}

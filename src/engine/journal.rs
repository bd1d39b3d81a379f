//! Best-effort decision journal.
//!
//! The engine records what it decided and why. A failing journal never
//! reverts engine state; the failure is reported as a diagnostic instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, warn};

use crate::error::Diagnostic;
use crate::pipeline::{ExitReason, GuardVerdict};
use crate::positions::{ClosedPosition, Position};
use crate::types::{OrderIntent, OrderResult, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    EntrySignal {
        at_ms: i64,
        signal: Signal,
        intent: OrderIntent,
    },
    OrderSubmitted {
        at_ms: i64,
        intent: OrderIntent,
        result: OrderResult,
    },
    PositionOpened {
        at_ms: i64,
        position: Position,
    },
    ExitSignal {
        at_ms: i64,
        reason: ExitReason,
        intent: OrderIntent,
    },
    PositionClosed {
        at_ms: i64,
        closed: ClosedPosition,
        reason: ExitReason,
    },
    GuardBlocked {
        at_ms: i64,
        verdict: GuardVerdict,
    },
    Error {
        at_ms: i64,
        diagnostic: Diagnostic,
    },
}

impl JournalEntry {
    pub fn name(&self) -> &'static str {
        match self {
            JournalEntry::EntrySignal { .. } => "entry_signal",
            JournalEntry::OrderSubmitted { .. } => "order_submitted",
            JournalEntry::PositionOpened { .. } => "position_opened",
            JournalEntry::ExitSignal { .. } => "exit_signal",
            JournalEntry::PositionClosed { .. } => "position_closed",
            JournalEntry::GuardBlocked { .. } => "guard_blocked",
            JournalEntry::Error { .. } => "error",
        }
    }
}

#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, entry: &JournalEntry) -> Result<()>;
}

#[async_trait]
impl<J: Journal + ?Sized> Journal for std::sync::Arc<J> {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        (**self).record(entry).await
    }
}

/// In-process journal, mostly for tests and the demo summary.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(JournalEntry::name)
            .collect()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

/// Append-only JSON-lines journal. Each line is one [`JournalEntry`].
pub struct FileJournal {
    path: PathBuf,
    file: AsyncMutex<tokio::fs::File>,
}

impl FileJournal {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create journal dir {}", dir.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open journal at {}", path.display()))?;
        Ok(Self {
            path,
            file: AsyncMutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry. Corrupt lines are skipped with a warning.
    pub async fn replay(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to open journal for replay: {}", path.display()))?;

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    line_num = line_num + 1,
                    error = %e,
                    "Skipping corrupt journal line"
                ),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("failed to serialize journal entry")?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .context("failed to write to journal")?;
        file.flush().await.context("failed to flush journal")?;
        Ok(())
    }
}

/// One closed trade, flattened for CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub closed_at_ms: i64,
    pub condition_id: String,
    pub token_id: String,
    pub direction: String,
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub gross_pnl: f64,
    pub fee: f64,
    pub net_pnl: f64,
    pub hold_ms: i64,
    pub exit_reason: String,
}

impl TradeRecord {
    pub fn from_closed(closed: &ClosedPosition, reason: &ExitReason) -> Self {
        Self {
            closed_at_ms: closed.closed_at_ms,
            condition_id: closed.position.condition_id.clone(),
            token_id: closed.position.token_id.clone(),
            direction: closed.position.direction.to_string(),
            side: closed.position.side.to_string(),
            size: closed.position.size,
            entry_price: closed.position.entry_price,
            exit_price: closed.exit_price,
            gross_pnl: closed.gross_pnl,
            fee: closed.fee,
            net_pnl: closed.net_pnl,
            hold_ms: closed.hold_ms(),
            exit_reason: reason.kind().to_string(),
        }
    }
}

/// Appends one CSV row per closed position and ignores every other entry.
pub struct CsvTradeJournal {
    writer: AsyncRwLock<csv::Writer<std::fs::File>>,
}

impl CsvTradeJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("Failed to create trade journal dir")?;
        }
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self {
            writer: AsyncRwLock::new(writer),
        })
    }
}

#[async_trait]
impl Journal for CsvTradeJournal {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        let JournalEntry::PositionClosed { closed, reason, .. } = entry else {
            return Ok(());
        };
        let record = TradeRecord::from_closed(closed, reason);
        let mut writer = self.writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write trade record")?;
        writer.flush().context("Failed to flush trade writer")?;
        debug!(token_id = %record.token_id, net_pnl = record.net_pnl, "Trade written to CSV");
        Ok(())
    }
}

/// Fans each entry out to several journals. Every journal is attempted; the
/// first failure is returned.
#[derive(Default)]
pub struct JournalSet {
    journals: Vec<Box<dyn Journal>>,
}

impl JournalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, journal: impl Journal + 'static) -> Self {
        self.journals.push(Box::new(journal));
        self
    }
}

#[async_trait]
impl Journal for JournalSet {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        let mut first_err = None;
        for journal in &self.journals {
            if let Err(e) = journal.record(entry).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Streaming delivery pipeline.
//! Records buffer until age or size forces a flush, then land in the sink
//! as one object in arrival order. The buffer itself is synchronous and
//! clock-injected; the async driver owns the channel and the ticker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::log_group::LogGroupModel;
use crate::sink::ObjectStore;
use crate::types::{ForwardRecord, LogEntry, LogicalId};

pub const DEFAULT_MAX_AGE_SECS: u64 = 300;
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const CHANNEL_CAPACITY: usize = 1024;

const FLUSH_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub sink: LogicalId,
    pub key_prefix: String,
    pub max_age_secs: u64,
    pub max_bytes: usize,
    /// Group receiving the pipeline's own flush and failure entries.
    pub diagnostics_group: LogicalId,
    /// Same-account group whose entries feed the pipeline directly.
    /// Cross-account senders attach through a destination instead.
    pub source_group: Option<LogicalId>,
}

impl PipelineSpec {
    pub fn new(
        name: impl Into<String>,
        sink: LogicalId,
        key_prefix: impl Into<String>,
        diagnostics_group: LogicalId,
    ) -> Self {
        PipelineSpec {
            name: name.into(),
            sink,
            key_prefix: key_prefix.into(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            max_bytes: DEFAULT_MAX_BYTES,
            diagnostics_group,
            source_group: None,
        }
    }

    pub fn with_source_group(mut self, group: LogicalId) -> Self {
        self.source_group = Some(group);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("pipeline needs a name");
        }
        if self.max_age_secs == 0 {
            anyhow::bail!("pipeline {:?} has a zero flush age", self.name);
        }
        if self.max_bytes == 0 {
            anyhow::bail!("pipeline {:?} has a zero flush size", self.name);
        }
        if !self.key_prefix.is_empty() && !self.key_prefix.ends_with('/') {
            anyhow::bail!("pipeline prefix {:?} must end with '/'", self.key_prefix);
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.sink.clone(), self.diagnostics_group.clone()];
        if let Some(group) = &self.source_group {
            refs.push(group.clone());
        }
        refs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Age,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushReason::Size => f.write_str("size"),
            FlushReason::Age => f.write_str("age"),
            FlushReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug)]
pub struct FlushBatch {
    pub key: String,
    pub body: Vec<u8>,
    pub records: usize,
    pub reason: FlushReason,
}

/// Pure buffering core. Time comes in through `now_ms` so the thresholds
/// are testable without a runtime.
#[derive(Debug)]
pub struct DeliveryBuffer {
    name: String,
    key_prefix: String,
    max_age_ms: i64,
    max_bytes: usize,
    lines: Vec<String>,
    bytes: usize,
    oldest_at_ms: Option<i64>,
    seq: u64,
}

impl DeliveryBuffer {
    pub fn new(name: &str, key_prefix: &str, max_age_secs: u64, max_bytes: usize) -> Self {
        DeliveryBuffer {
            name: name.to_string(),
            key_prefix: key_prefix.to_string(),
            max_age_ms: max_age_secs as i64 * 1000,
            max_bytes,
            lines: Vec::new(),
            bytes: 0,
            oldest_at_ms: None,
            seq: 0,
        }
    }

    pub fn from_spec(spec: &PipelineSpec) -> Self {
        Self::new(
            &spec.name,
            &spec.key_prefix,
            spec.max_age_secs,
            spec.max_bytes,
        )
    }

    /// `now_ms` is the arrival instant; record age counts from here, not
    /// from the record's own timestamp.
    pub fn push(&mut self, record: &ForwardRecord, now_ms: i64) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.bytes += line.len() + 1;
        self.lines.push(line);
        self.oldest_at_ms.get_or_insert(now_ms);
        Ok(())
    }

    /// Which threshold, if any, demands a flush right now. Size wins when
    /// both hold at once.
    pub fn should_flush(&self, now_ms: i64) -> Option<FlushReason> {
        if self.lines.is_empty() {
            return None;
        }
        if self.bytes >= self.max_bytes {
            return Some(FlushReason::Size);
        }
        match self.oldest_at_ms {
            Some(oldest) if now_ms - oldest >= self.max_age_ms => Some(FlushReason::Age),
            _ => None,
        }
    }

    /// Drains the buffer into one keyed object body. Empty buffers yield
    /// nothing, so no flush ever writes an empty object.
    pub fn take_batch(&mut self, reason: FlushReason, now_ms: i64) -> Option<FlushBatch> {
        if self.lines.is_empty() {
            return None;
        }
        self.seq += 1;
        let lines = std::mem::take(&mut self.lines);
        let records = lines.len();
        let mut body = lines.join("\n");
        body.push('\n');
        self.bytes = 0;
        self.oldest_at_ms = None;
        Some(FlushBatch {
            key: self.object_key(now_ms),
            body: body.into_bytes(),
            records,
            reason,
        })
    }

    fn object_key(&self, now_ms: i64) -> String {
        let when = DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or_default();
        format!(
            "{}{}/{}-{:06}",
            self.key_prefix,
            when.format("%Y/%m/%d/%H"),
            self.name,
            self.seq
        )
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }
}

/// Async side. Owns the receiving end and keeps flushing until every
/// sender is gone, then drains what is left.
pub struct DeliveryPipeline {
    spec: PipelineSpec,
    sink: ObjectStore,
    diagnostics: LogGroupModel,
}

impl DeliveryPipeline {
    pub fn new(spec: PipelineSpec, sink: ObjectStore, diagnostics: LogGroupModel) -> Self {
        DeliveryPipeline {
            spec,
            sink,
            diagnostics,
        }
    }

    pub fn spawn(self) -> (PipelineSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sender = PipelineSender {
            name: Arc::<str>::from(self.spec.name.as_str()),
            tx,
            diagnostics: self.diagnostics.clone(),
            diag_seq: Arc::new(AtomicU64::new(0)),
        };
        let handle = tokio::spawn(self.run(rx));
        (sender, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<ForwardRecord>) {
        let mut buffer = DeliveryBuffer::from_spec(&self.spec);
        let mut ticker = tokio::time::interval(FLUSH_TICK);
        let diag_seq = AtomicU64::new(0);
        info!(pipeline = %self.spec.name, "delivery pipeline started");
        loop {
            tokio::select! {
                biased;
                maybe = rx.recv() => match maybe {
                    Some(record) => {
                        let now = now_ms();
                        if let Err(err) = buffer.push(&record, now) {
                            warn!(pipeline = %self.spec.name, "record encode failed: {err}");
                            self.diag(&diag_seq, now, &format!("encode failed: {err}"));
                            continue;
                        }
                        if buffer.should_flush(now) == Some(FlushReason::Size) {
                            self.flush(&mut buffer, FlushReason::Size, now, &diag_seq);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let now = now_ms();
                    if let Some(reason) = buffer.should_flush(now) {
                        self.flush(&mut buffer, reason, now, &diag_seq);
                    }
                }
            }
        }
        let now = now_ms();
        self.flush(&mut buffer, FlushReason::Shutdown, now, &diag_seq);
        info!(pipeline = %self.spec.name, "delivery pipeline stopped");
    }

    fn flush(
        &self,
        buffer: &mut DeliveryBuffer,
        reason: FlushReason,
        now: i64,
        diag_seq: &AtomicU64,
    ) {
        let Some(batch) = buffer.take_batch(reason, now) else {
            return;
        };
        let bytes = batch.body.len();
        match self.sink.put(&batch.key, batch.body) {
            Ok(()) => {
                info!(
                    pipeline = %self.spec.name,
                    key = %batch.key,
                    records = batch.records,
                    bytes,
                    reason = %batch.reason,
                    "flush ok"
                );
                self.diag(
                    diag_seq,
                    now,
                    &format!(
                        "flush ok key={} records={} bytes={} reason={}",
                        batch.key, batch.records, bytes, batch.reason
                    ),
                );
            }
            Err(err) => {
                warn!(pipeline = %self.spec.name, "flush failed: {err:?}");
                self.diag(
                    diag_seq,
                    now,
                    &format!(
                        "flush failed records={} reason={}: {err}",
                        batch.records, batch.reason
                    ),
                );
            }
        }
    }

    fn diag(&self, seq: &AtomicU64, now: i64, text: &str) {
        let n = seq.fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .ingest(LogEntry::new(format!("diag-{n:06}"), now, text));
    }
}

/// Cheap to clone; every producer gets one.
#[derive(Debug, Clone)]
pub struct PipelineSender {
    name: Arc<str>,
    tx: mpsc::Sender<ForwardRecord>,
    diagnostics: LogGroupModel,
    diag_seq: Arc<AtomicU64>,
}

impl PipelineSender {
    pub async fn send(&self, record: ForwardRecord) -> Result<()> {
        if let Err(err) = self.tx.send(record).await {
            let now = now_ms();
            let n = self.diag_seq.fetch_add(1, Ordering::Relaxed);
            self.diagnostics.ingest(LogEntry::new(
                format!("submit-{n:06}"),
                now,
                format!("submit failed pipeline={}: channel closed", self.name),
            ));
            warn!(pipeline = %self.name, "submit failed: {err}");
            anyhow::bail!("pipeline {} is closed", self.name);
        }
        Ok(())
    }

    /// Wire a log group into this pipeline. Every entry the group accepts
    /// from now on is forwarded.
    pub fn subscribe_group(&self, group: &LogGroupModel) {
        group.subscribe(self.tx.clone());
    }

    pub(crate) fn raw_sender(&self) -> mpsc::Sender<ForwardRecord> {
        self.tx.clone()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

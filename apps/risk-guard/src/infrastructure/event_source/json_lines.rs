//! JSON-lines replay source.
//!
//! Reads one event per line from any async reader (a file or stdin). Blank
//! lines and lines starting with `#` are skipped. Records without a
//! `sequence` get the next one for their contract.
//!
//! ```text
//! {"kind":"POSITION_UPDATED","contractId":"CON.F.US.MNQ.U25","accountId":"ACC","payload":{"size":5}}
//! {"type":"order_filled","contract_id":"CON.F.US.MNQ.U25","account_id":"ACC","data":{"size":1},"sequence":7}
//! ```

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use super::sequence::SequenceAssigner;
use crate::application::ports::{EventSourceError, EventSourcePort, Subscription};
use crate::domain::event::{AccountId, ContractId, EventKind, Payload, TradingEvent};

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRecord {
    #[serde(alias = "type", alias = "event_type")]
    kind: EventKind,
    #[serde(alias = "contract_id")]
    contract_id: ContractId,
    #[serde(alias = "account_id")]
    account_id: AccountId,
    #[serde(default, alias = "data")]
    payload: Payload,
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default, alias = "received_at", alias = "timestamp")]
    received_at: Option<DateTime<Utc>>,
}

/// Event source over newline-delimited JSON.
#[derive(Debug)]
pub struct JsonLinesEventSource<R> {
    lines: Lines<R>,
    line: usize,
    sequences: SequenceAssigner,
    subscription: Subscription,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesEventSource<R> {
    /// Read events from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            sequences: SequenceAssigner::new(),
            subscription: Subscription::all(),
        }
    }

    fn decode(&mut self, text: &str) -> Result<TradingEvent, EventSourceError> {
        let record: EventRecord =
            serde_json::from_str(text).map_err(|e| EventSourceError::Malformed {
                line: self.line,
                message: e.to_string(),
            })?;

        let sequence = self.sequences.assign(&record.contract_id, record.sequence);
        let event = TradingEvent::new(
            record.kind,
            record.contract_id,
            record.account_id,
            record.payload,
            sequence,
        );
        Ok(match record.received_at {
            Some(received_at) => event.with_received_at(received_at),
            None => event,
        })
    }
}

impl JsonLinesEventSource<BufReader<File>> {
    /// Open a replay file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonLinesEventSource<BufReader<Stdin>> {
    /// Read events from standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSourcePort for JsonLinesEventSource<R> {
    fn subscribe(&mut self, subscription: Subscription) {
        self.subscription = subscription;
    }

    async fn next_event(&mut self) -> Result<Option<TradingEvent>, EventSourceError> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            let text = text.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let event = self.decode(text)?;
            if self.subscription.accepts(event.kind()) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn source(text: &'static str) -> JsonLinesEventSource<&'static [u8]> {
        JsonLinesEventSource::new(text.as_bytes())
    }

    #[tokio::test]
    async fn reads_both_field_spellings() {
        let mut source = source(concat!(
            r#"{"kind":"POSITION_UPDATED","contractId":"X","accountId":"ACC","payload":{"size":5}}"#,
            "\n",
            r#"{"type":"order_filled","contract_id":"X","account_id":"ACC","data":{"size":1}}"#,
            "\n",
        ));

        let first = source.next_event().await.unwrap().unwrap();
        let second = source.next_event().await.unwrap().unwrap();

        assert_eq!(first.kind(), EventKind::PositionUpdated);
        assert_eq!(first.size(), Some(5));
        assert_eq!(first.sequence(), 1);
        assert_eq!(second.kind(), EventKind::OrderFilled);
        assert_eq!(second.sequence(), 2);
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_sequence_and_timestamp_are_kept() {
        let mut source = source(
            r#"{"kind":"POSITION_UPDATED","contractId":"X","accountId":"ACC","sequence":9,"receivedAt":"2025-01-02T03:04:05Z"}"#,
        );

        let event = source.next_event().await.unwrap().unwrap();

        assert_eq!(event.sequence(), 9);
        assert_eq!(event.received_at().to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[tokio::test]
    async fn malformed_line_is_reported_and_reading_continues() {
        let mut source = source(concat!(
            "# comment\n",
            "\n",
            "not json\n",
            r#"{"kind":"POSITION_CLOSED","contractId":"X","accountId":"ACC"}"#,
            "\n",
        ));

        let err = source.next_event().await.unwrap_err();
        assert!(matches!(err, EventSourceError::Malformed { line: 3, .. }));
        assert!(err.is_recoverable());

        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::PositionClosed);
    }

    #[tokio::test]
    async fn opens_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"kind":"POSITION_UPDATED","contractId":"X","accountId":"ACC","payload":{{"size":2}}}}"#
        )
        .unwrap();

        let mut source = JsonLinesEventSource::open(file.path()).await.unwrap();
        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.size(), Some(2));
    }
}

//! Line-delimited JSON signal source.
//!
//! One `Surebet` per line. Blank lines and `#` comments are ignored;
//! malformed lines are logged and skipped.

use crate::error::AppResult;
use surebet_core::Surebet;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::warn;

pub struct SignalFeed<R> {
    lines: Lines<BufReader<R>>,
    line_no: u64,
    skipped: u64,
}

impl<R: AsyncRead + Unpin> SignalFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Next well-formed signal, or `None` at end of input.
    ///
    /// Cancel safe: a signal is only lost if its line was already consumed.
    pub async fn next_signal(&mut self) -> AppResult<Option<Surebet>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<Surebet>(line) {
                Ok(sb) => return Ok(Some(sb)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, error = %e, "Skipping malformed signal");
                }
            }
        }
        Ok(None)
    }

    /// Malformed lines seen so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

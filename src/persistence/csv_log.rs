use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{OrderLogEntry, OrderOutcome, Side};
use crate::persistence::order_log::{OrderLog, OrderLogError};

/// Comma-separated, headerless order log:
/// `client_order_id,timestamp,action,symbol,amount,outcome`.
///
/// Every row sits on its own line and is read on its own, so one damaged
/// row (stray quote, bytes that are not UTF-8) never hides the rows after
/// it. Rows written by older tooling may carry extra trailing columns;
/// readers ignore them. The older trade-plan layout
/// `id,timestamp,order_type,side,product,size,status,...` is recognised too.
pub struct CsvOrderLog {
    path: PathBuf,
}

impl CsvOrderLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw non-empty lines with their 1-based line numbers.
    fn lines(&self) -> Result<Vec<(usize, Vec<u8>)>, OrderLogError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(bytes
            .split(|b| *b == b'\n')
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.strip_suffix(b"\r").unwrap_or(line)))
            .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
            .map(|(row, line)| (row, line.to_vec()))
            .collect())
    }

    /// Every well-formed row, oldest first.
    pub fn entries(&self) -> Result<Vec<OrderLogEntry>, OrderLogError> {
        let mut entries = Vec::new();
        for (row, line) in self.lines()? {
            match decode_line(row, &line).and_then(|record| parse_row(row, &record)) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), "Skipping order log row: {}", e),
            }
        }
        Ok(entries)
    }
}

impl OrderLog for CsvOrderLog {
    /// Scans the id column of every line without CSV quoting rules.
    fn read_last_id(&self) -> Result<Option<u64>, OrderLogError> {
        let mut last: Option<u64> = None;
        for (row, line) in self.lines()? {
            let head = line.split(|b| *b == b',').next().unwrap_or_default();
            let raw = String::from_utf8_lossy(head);
            match raw.trim().parse::<u64>() {
                Ok(id) => last = Some(last.map_or(id, |l| l.max(id))),
                Err(_) => warn!(row, value = %raw.trim(), "Order log row without a numeric id"),
            }
        }
        Ok(last)
    }

    fn append(&self, entry: &OrderLogEntry) -> Result<(), OrderLogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record([
            entry.client_order_id.to_string(),
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            entry.action.to_string(),
            single_line(&entry.symbol),
            single_line(&entry.amount),
            single_line(&entry.outcome.to_string()),
        ])?;
        writer.flush()?;

        if let Ok(file) = writer.into_inner() {
            file.sync_data()?;
        }

        debug!(client_order_id = entry.client_order_id, "📝 Order log append");
        Ok(())
    }
}

// One row per line keeps the line-oriented readers exact.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn decode_line(row: usize, line: &[u8]) -> Result<StringRecord, OrderLogError> {
    let corrupt = |reason: String| OrderLogError::Corrupt { row, reason };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);

    let record = reader
        .byte_records()
        .next()
        .ok_or_else(|| corrupt("empty row".to_string()))?
        .map_err(|e| corrupt(e.to_string()))?;
    StringRecord::from_byte_record(record).map_err(|e| corrupt(format!("not UTF-8: {}", e.utf8_error())))
}

fn parse_row(row: usize, record: &StringRecord) -> Result<OrderLogEntry, OrderLogError> {
    let corrupt = |reason: String| OrderLogError::Corrupt { row, reason };
    let field = |i: usize, name: &str| {
        record
            .get(i)
            .ok_or_else(|| corrupt(format!("missing {}", name)))
    };

    let client_order_id = field(0, "client_order_id")?
        .trim()
        .parse::<u64>()
        .map_err(|e| corrupt(format!("client_order_id: {}", e)))?;
    let timestamp = DateTime::parse_from_rfc3339(field(1, "timestamp")?)
        .map_err(|e| corrupt(format!("timestamp: {}", e)))?
        .with_timezone(&Utc);

    // older trade-plan rows carry the order type before the side
    let offset = match field(2, "action")?.parse::<Side>() {
        Ok(_) => 0,
        Err(_) if record.len() >= 7 && record.get(3).is_some_and(|f| f.parse::<Side>().is_ok()) => 1,
        Err(e) => return Err(corrupt(e)),
    };

    let action = field(2 + offset, "action")?.parse::<Side>().map_err(corrupt)?;
    let symbol = field(3 + offset, "symbol")?.to_string();
    let amount = field(4 + offset, "amount")?.to_string();
    let outcome = field(5 + offset, "outcome")?
        .parse::<OrderOutcome>()
        .map_err(corrupt)?;

    Ok(OrderLogEntry {
        client_order_id,
        timestamp,
        action,
        symbol,
        amount,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_log() -> CsvOrderLog {
        CsvOrderLog::new(std::env::temp_dir().join(format!("order_log_{}.csv", uuid::Uuid::new_v4())))
    }

    fn entry(id: u64, outcome: OrderOutcome) -> OrderLogEntry {
        OrderLogEntry {
            client_order_id: id,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
            action: Side::Buy,
            symbol: "SOL-PERP-INTX".into(),
            amount: "900".into(),
            outcome,
        }
    }

    #[test]
    fn absent_file_has_no_last_id() {
        let log = temp_log();
        assert_eq!(log.read_last_id().unwrap(), None);
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn writes_headerless_rows_in_documented_order() {
        let log = temp_log();
        log.append(&entry(1001, OrderOutcome::Executed)).unwrap();
        log.append(&entry(1002, OrderOutcome::Failed("INSUFFICIENT_FUND, try later".into())))
            .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let _ = std::fs::remove_file(log.path());

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "1001,2025-03-01T12:30:00.000000Z,BUY,SOL-PERP-INTX,900,executed"
        );
        // commas in the reason are quoted, not split
        assert_eq!(
            lines[1],
            "1002,2025-03-01T12:30:00.000000Z,BUY,SOL-PERP-INTX,900,\"failed reason: INSUFFICIENT_FUND, try later\""
        );
    }

    #[test]
    fn last_id_is_the_highest_recorded() {
        let log = temp_log();
        std::fs::write(
            log.path(),
            "1049,2025-03-01T12:00:00Z,BUY,SOL-PERP-INTX,1,executed\n\
             1050,2025-03-01T12:01:00Z,SELL,SOL-PERP-INTX,1,failed_UNKNOWN,,\n\
             garbage line\n\
             1048,2025-03-01T12:02:00Z,BUY,SOL-PERP-INTX,1,executed,12.5,abc-123\n",
        )
        .unwrap();

        let last = log.read_last_id().unwrap();
        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());

        assert_eq!(last, Some(1050));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].outcome, OrderOutcome::Failed("UNKNOWN".into()));
    }

    #[test]
    fn stray_quote_does_not_hide_later_rows() {
        let log = temp_log();
        std::fs::write(
            log.path(),
            "1050,2025-03-01T12:00:00Z,BUY,SOL-PERP-INTX,1,failed_boom,\"oops,,\n\
             1051,2025-03-01T12:01:00Z,BUY,SOL-PERP-INTX,1,executed\n\
             1052,2025-03-01T12:02:00Z,SELL,SOL-PERP-INTX,1,executed\n",
        )
        .unwrap();

        let last = log.read_last_id().unwrap();
        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());

        assert_eq!(last, Some(1052));
        let ids: Vec<u64> = entries.iter().map(|e| e.client_order_id).collect();
        assert!(ids.ends_with(&[1051, 1052]), "{:?}", ids);
    }

    #[test]
    fn undecodable_row_is_skipped() {
        let log = temp_log();
        let mut bytes = b"1060,2025-03-01T12:00:00Z,BUY,SOL-PERP-INTX,1,failed_\xff\xfe\n".to_vec();
        bytes.extend_from_slice(b"1061,2025-03-01T12:01:00Z,BUY,SOL-PERP-INTX,1,executed\r\n");
        std::fs::write(log.path(), bytes).unwrap();

        let last = log.read_last_id().unwrap();
        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());

        assert_eq!(last, Some(1061));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_order_id, 1061);
    }

    #[test]
    fn reads_trade_plan_layout() {
        let log = temp_log();
        std::fs::write(
            log.path(),
            "1070,2025-03-01T12:00:00Z,market,BUY,NEO-PERP-INTX,2,executed,10.5,abc-1\n\
             1071,2025-03-01T12:00:01Z,stop_loss,SELL,NEO-PERP-INTX,2,failed_INSUFFICIENT_FUND,,\n",
        )
        .unwrap();

        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, Side::Buy);
        assert_eq!(entries[0].symbol, "NEO-PERP-INTX");
        assert_eq!(entries[0].amount, "2");
        assert_eq!(entries[1].outcome, OrderOutcome::Failed("INSUFFICIENT_FUND".into()));
    }

    #[test]
    fn newlines_in_reasons_stay_on_one_row() {
        let log = temp_log();
        log.append(&entry(1080, OrderOutcome::Failed("line one\nline two".into()))).unwrap();
        log.append(&entry(1081, OrderOutcome::Executed)).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());

        assert_eq!(text.lines().count(), 2);
        assert_eq!(entries[0].outcome, OrderOutcome::Failed("line one line two".into()));
    }

    #[test]
    fn appended_rows_read_back() {
        let log = temp_log();
        let written = entry(1001, OrderOutcome::Failed("PREVIEW_INVALID_LIMIT_PRICE".into()));
        log.append(&written).unwrap();

        let entries = log.entries().unwrap();
        let _ = std::fs::remove_file(log.path());
        assert_eq!(entries, vec![written]);
    }
}

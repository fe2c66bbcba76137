//! Ingest command for Tally.
//!
//! Feeds newline-delimited event payloads through an [`Aggregator`] and
//! reports the resulting averages. Rejected lines are collected with their
//! line number; they never stop the rest of the batch.

use std::io::{self, BufRead};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::IngestConfig;
use crate::core::{ActionAverage, Aggregator};
use crate::error::TallyError;
use crate::storage::AggregateStore;

/// Options for the ingest command.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// A line that was not aggregated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the input.
    pub line: usize,
    /// Error kind label (`decode`, `overflow`, `too_long`, ...).
    pub kind: String,
    /// Error message.
    pub error: String,
}

impl RejectedLine {
    fn from_error(line: usize, err: &TallyError) -> Self {
        Self {
            line,
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }

    fn too_long(line: usize, len: usize, limit: usize) -> Self {
        Self {
            line,
            kind: "too_long".to_string(),
            error: format!("line is {} bytes, limit is {}", len, limit),
        }
    }
}

/// Output format for the ingest command.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutput {
    /// Whether the batch ran to completion and was exported.
    pub success: bool,
    /// Number of events aggregated.
    pub accepted: usize,
    /// Lines that were rejected, in input order.
    pub rejected: Vec<RejectedLine>,
    /// Averages per action, sorted by action name.
    pub averages: Vec<ActionAverage>,
    /// When the export was taken.
    pub generated_at: DateTime<Utc>,
    /// Error message if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutput {
    /// Create a failed output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            accepted: 0,
            rejected: Vec::new(),
            averages: Vec::new(),
            generated_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Per-chunk ingestion tally.
#[derive(Debug, Default)]
struct BatchResult {
    accepted: usize,
    rejected: Vec<RejectedLine>,
}

impl BatchResult {
    fn absorb(&mut self, other: BatchResult) {
        self.accepted += other.accepted;
        self.rejected.extend(other.rejected);
    }
}

/// The ingest command implementation.
pub struct IngestCommand<S: AggregateStore> {
    aggregator: Aggregator<S>,
    config: IngestConfig,
}

impl<S: AggregateStore> IngestCommand<S> {
    /// Create a new ingest command.
    pub fn new(aggregator: Aggregator<S>, config: IngestConfig) -> Self {
        Self { aggregator, config }
    }

    /// The aggregator this command feeds.
    pub fn aggregator(&self) -> &Aggregator<S> {
        &self.aggregator
    }

    /// Read every line from `reader` and ingest it.
    ///
    /// Blank lines are skipped but still counted for line numbers. At most
    /// `max_line_bytes` of any line is buffered; longer lines are rejected
    /// as `too_long`. With a single worker each line is ingested as soon as
    /// it is read.
    pub fn run<R: BufRead>(&self, mut reader: R, _options: &IngestOptions) -> IngestOutput {
        let limit = self.config.max_line_bytes;
        let streaming = self.config.workers <= 1;
        let mut result = BatchResult::default();
        let mut pending = Vec::new();
        let mut bytes = Vec::new();
        let mut line = 0;

        loop {
            line += 1;
            bytes.clear();
            match read_bounded_line(&mut reader, limit, &mut bytes) {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::TooLong(len)) => {
                    result.rejected.push(RejectedLine::too_long(line, len, limit));
                }
                Ok(LineRead::Line) if is_blank(&bytes) => {}
                Ok(LineRead::Line) if streaming => self.ingest_line(line, &bytes, &mut result),
                Ok(LineRead::Line) => pending.push((line, std::mem::take(&mut bytes))),
                Err(e) => {
                    return IngestOutput::failure(format!(
                        "failed to read input at line {}: {}",
                        line, e
                    ))
                }
            }
        }

        result.absorb(self.feed(&pending));
        self.finish(result)
    }

    /// Ingest an in-memory list of payloads, numbered from 1.
    pub fn run_payloads<I, P>(&self, payloads: I, _options: &IngestOptions) -> IngestOutput
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let lines: Vec<(usize, Vec<u8>)> = payloads
            .into_iter()
            .enumerate()
            .filter(|(_, payload)| !is_blank(payload.as_ref()))
            .map(|(index, payload)| (index + 1, payload.as_ref().to_vec()))
            .collect();
        let result = self.feed(&lines);
        self.finish(result)
    }

    /// Export the averages and assemble the output for a fed batch.
    fn finish(&self, mut result: BatchResult) -> IngestOutput {
        result.rejected.sort_by_key(|r| r.line);

        tracing::debug!(
            accepted = result.accepted,
            rejected = result.rejected.len(),
            "batch ingested"
        );

        match self.aggregator.export() {
            Ok(mut averages) => {
                averages.sort_by(|a, b| a.action.cmp(&b.action));
                IngestOutput {
                    success: true,
                    accepted: result.accepted,
                    rejected: result.rejected,
                    averages,
                    generated_at: Utc::now(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "export failed");
                IngestOutput {
                    accepted: result.accepted,
                    rejected: result.rejected,
                    ..IngestOutput::failure(e.to_string())
                }
            }
        }
    }

    /// Feed all lines, splitting them across scoped workers when configured.
    fn feed(&self, lines: &[(usize, Vec<u8>)]) -> BatchResult {
        let workers = self.config.workers.clamp(1, lines.len().max(1));
        if workers == 1 {
            return self.feed_chunk(lines);
        }

        let chunk_size = lines.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = lines
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || self.feed_chunk(chunk)))
                .collect();

            let mut total = BatchResult::default();
            for handle in handles {
                match handle.join() {
                    Ok(part) => total.absorb(part),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            total
        })
    }

    fn feed_chunk(&self, lines: &[(usize, Vec<u8>)]) -> BatchResult {
        let mut result = BatchResult::default();
        for (line, bytes) in lines {
            self.ingest_line(*line, bytes, &mut result);
        }
        result
    }

    fn ingest_line(&self, line: usize, bytes: &[u8], result: &mut BatchResult) {
        let limit = self.config.max_line_bytes;
        if bytes.len() > limit {
            result.rejected.push(RejectedLine::too_long(line, bytes.len(), limit));
            return;
        }
        match self.aggregator.ingest(bytes) {
            Ok(()) => result.accepted += 1,
            Err(e) => {
                tracing::debug!(line, error = %e, "rejected event");
                result.rejected.push(RejectedLine::from_error(line, &e));
            }
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &IngestOutput, options: &IngestOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    /// Format output as human-readable text.
    fn format_human_readable(&self, output: &IngestOutput) -> String {
        let mut out = String::new();

        if let Some(error) = &output.error {
            out.push_str(&format!("Ingest failed: {}\n", error));
        }

        out.push_str(&format!(
            "Ingested {} event{} ({} rejected).\n",
            output.accepted,
            if output.accepted == 1 { "" } else { "s" },
            output.rejected.len()
        ));

        for rejected in &output.rejected {
            out.push_str(&format!(
                "  line {}: [{}] {}\n",
                rejected.line, rejected.kind, rejected.error
            ));
        }

        if !output.success {
            return out;
        }

        if output.averages.is_empty() {
            out.push_str("\nNo actions recorded.\n");
            return out;
        }

        let width = output
            .averages
            .iter()
            .map(|a| display_action(&a.action).chars().count())
            .max()
            .unwrap_or(0)
            .max("ACTION".len());

        out.push_str(&format!("\n{:<width$}  {:>20}\n", "ACTION", "AVG"));
        for entry in &output.averages {
            out.push_str(&format!(
                "{:<width$}  {:>20}\n",
                display_action(&entry.action),
                entry.average
            ));
        }

        out
    }
}

/// Outcome of reading one line.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A complete line is in the buffer, without its terminator.
    Line,
    /// The line was longer than the limit; holds its full length.
    TooLong(usize),
    /// No more input.
    Eof,
}

/// Read one `\n`-terminated line into `buf`, keeping at most `limit` bytes
/// of content.
///
/// A trailing `\r` is stripped and not counted. The rest of an over-long
/// line is consumed without being stored, and `buf` is left empty.
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    limit: usize,
    buf: &mut Vec<u8>,
) -> io::Result<LineRead> {
    // One spare byte so a `\r` right at the limit can still be stripped.
    let keep = limit.saturating_add(1);
    let mut total = 0usize;
    let mut last = None;
    let mut seen = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        seen = true;

        let newline = available.iter().position(|&b| b == b'\n');
        let content = &available[..newline.unwrap_or(available.len())];
        let room = keep.saturating_sub(buf.len()).min(content.len());
        buf.extend_from_slice(&content[..room]);
        total += content.len();
        if let Some(&b) = content.last() {
            last = Some(b);
        }

        let used = content.len() + usize::from(newline.is_some());
        reader.consume(used);
        if newline.is_some() {
            break;
        }
    }

    if !seen {
        return Ok(LineRead::Eof);
    }
    if last == Some(b'\r') {
        total -= 1;
        if buf.len() > total {
            buf.truncate(total);
        }
    }
    if total > limit {
        buf.clear();
        return Ok(LineRead::TooLong(total));
    }
    Ok(LineRead::Line)
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Display form of an action name for the table.
fn display_action(action: &str) -> String {
    if action.is_empty() {
        "(empty)".to_string()
    } else {
        truncate(action, 40)
    }
}

/// Truncate a string with ellipsis, handling Unicode correctly.
fn truncate(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else {
        let truncate_at = max_len.saturating_sub(3);
        let truncated: String = s.chars().take(truncate_at).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, ShardedStore};
    use std::io::{BufReader, Cursor, Read};

    fn command(workers: usize) -> IngestCommand<MemoryStore> {
        let config = IngestConfig {
            workers,
            ..Default::default()
        };
        IngestCommand::new(Aggregator::in_memory(), config)
    }

    const SAMPLE: &str = r#"{"AcTion":"jump", "tIMe":100}
{"action":"run", "time":75}

{wd;;;]}
{"action":"jump", "time":200}
"#;

    #[test]
    fn test_ingest_sample() {
        let cmd = command(1);
        let output = cmd.run(Cursor::new(SAMPLE), &IngestOptions::default());

        assert!(output.success);
        assert_eq!(output.accepted, 3);
        assert_eq!(output.rejected.len(), 1);
        assert_eq!(output.rejected[0].line, 4);
        assert_eq!(output.rejected[0].kind, "decode");
        assert_eq!(
            output.averages,
            vec![ActionAverage::new("jump", 150), ActionAverage::new("run", 75)]
        );
    }

    #[test]
    fn test_ingest_crlf_lines() {
        let cmd = command(1);
        let input = "{\"action\":\"run\",\"time\":1}\r\n{\"action\":\"run\",\"time\":3}\r\n";
        let output = cmd.run(Cursor::new(input), &IngestOptions::default());
        assert_eq!(output.accepted, 2);
        assert_eq!(output.averages, vec![ActionAverage::new("run", 2)]);
    }

    #[test]
    fn test_ingest_invalid_utf8_is_a_decode_rejection() {
        let cmd = command(1);
        let input: &[u8] = b"{\"action\":\"\xff\",\"time\":1}\n{\"action\":\"ok\",\"time\":1}\n";
        let output = cmd.run(Cursor::new(input), &IngestOptions::default());
        assert!(output.success);
        assert_eq!(output.accepted, 1);
        assert_eq!(output.rejected[0].line, 1);
        assert_eq!(output.rejected[0].kind, "decode");
    }

    #[test]
    fn test_ingest_overflow_rejection() {
        let cmd = command(1);
        let payloads = vec![
            format!(r#"{{"action":"jump","time":{}}}"#, u64::MAX),
            r#"{"action":"jump","time":1}"#.to_string(),
        ];
        let output = cmd.run_payloads(&payloads, &IngestOptions::default());

        assert_eq!(output.accepted, 1);
        assert_eq!(output.rejected[0].line, 2);
        assert_eq!(output.rejected[0].kind, "overflow");
        assert_eq!(output.averages, vec![ActionAverage::new("jump", u64::MAX)]);
    }

    #[test]
    fn test_ingest_line_too_long() {
        let config = IngestConfig {
            workers: 1,
            max_line_bytes: 16,
        };
        let cmd = IngestCommand::new(Aggregator::in_memory(), config);
        let output = cmd.run_payloads(
            [r#"{"action":"a-very-long-action","time":1}"#, r#"{"time":1}"#],
            &IngestOptions::default(),
        );
        assert_eq!(output.accepted, 1);
        assert_eq!(output.rejected[0].kind, "too_long");
        assert!(cmd.aggregator().store().get("a-very-long-action").unwrap().is_none());
    }

    #[test]
    fn test_read_bounded_line_caps_buffer() {
        let input = format!("{}\nabc\r\ntail", "x".repeat(1_000));
        let mut reader = BufReader::with_capacity(8, input.as_bytes());
        let mut buf = Vec::new();

        let read = read_bounded_line(&mut reader, 4, &mut buf).unwrap();
        assert_eq!(read, LineRead::TooLong(1_000));
        assert!(buf.is_empty());

        buf.clear();
        assert_eq!(read_bounded_line(&mut reader, 4, &mut buf).unwrap(), LineRead::Line);
        assert_eq!(buf, b"abc");

        buf.clear();
        assert_eq!(read_bounded_line(&mut reader, 4, &mut buf).unwrap(), LineRead::Line);
        assert_eq!(buf, b"tail");

        buf.clear();
        assert_eq!(read_bounded_line(&mut reader, 4, &mut buf).unwrap(), LineRead::Eof);
    }

    #[test]
    fn test_read_bounded_line_carriage_return_at_limit() {
        let mut reader = Cursor::new("abcd\r\nabcde\r\n");
        let mut buf = Vec::new();

        assert_eq!(read_bounded_line(&mut reader, 4, &mut buf).unwrap(), LineRead::Line);
        assert_eq!(buf, b"abcd");

        buf.clear();
        assert_eq!(
            read_bounded_line(&mut reader, 4, &mut buf).unwrap(),
            LineRead::TooLong(5)
        );
    }

    #[test]
    fn test_ingest_streams_past_oversized_line() {
        for workers in [1, 4] {
            let config = IngestConfig {
                workers,
                max_line_bytes: 64,
            };
            let cmd = IngestCommand::new(Aggregator::in_memory(), config);
            let input = io::repeat(b'x')
                .take(1_000_000)
                .chain(&b"\n{\"action\":\"run\",\"time\":75}\n"[..]);
            let output = cmd.run(BufReader::new(input), &IngestOptions::default());

            assert!(output.success);
            assert_eq!(output.accepted, 1);
            assert_eq!(output.rejected.len(), 1);
            assert_eq!(output.rejected[0].line, 1);
            assert_eq!(output.rejected[0].kind, "too_long");
            assert!(output.rejected[0].error.contains("1000000 bytes"));
            assert_eq!(output.averages, vec![ActionAverage::new("run", 75)]);
        }
    }

    #[test]
    fn test_ingest_empty_input() {
        let cmd = command(4);
        let output = cmd.run(Cursor::new(""), &IngestOptions::default());
        assert!(output.success);
        assert_eq!(output.accepted, 0);
        assert!(output.averages.is_empty());
    }

    #[test]
    fn test_ingest_with_workers_matches_sequential() {
        let payloads: Vec<String> = (0..1_000u64)
            .map(|i| format!(r#"{{"action":"a{}","time":{}}}"#, i % 7, i))
            .chain(std::iter::once("not json".to_string()))
            .collect();

        let sequential = command(1).run_payloads(&payloads, &IngestOptions::default());
        let parallel = IngestCommand::new(
            Aggregator::new(ShardedStore::with_shards(4)),
            IngestConfig {
                workers: 8,
                ..Default::default()
            },
        )
        .run_payloads(&payloads, &IngestOptions::default());

        assert_eq!(parallel.accepted, 1_000);
        assert_eq!(parallel.accepted, sequential.accepted);
        assert_eq!(parallel.rejected, sequential.rejected);
        assert_eq!(parallel.rejected[0].line, 1_001);
        assert_eq!(parallel.averages, sequential.averages);
    }

    #[test]
    fn test_format_output_quiet() {
        let cmd = command(1);
        let output = cmd.run(Cursor::new(SAMPLE), &IngestOptions::default());
        let options = IngestOptions {
            quiet: true,
            ..Default::default()
        };
        assert!(cmd.format_output(&output, &options).is_empty());
    }

    #[test]
    fn test_format_output_json() {
        let cmd = command(1);
        let output = cmd.run(Cursor::new(SAMPLE), &IngestOptions::default());
        let options = IngestOptions {
            json: true,
            ..Default::default()
        };
        let text = cmd.format_output(&output, &options);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["accepted"], 3);
        assert_eq!(value["rejected"][0]["line"], 4);
        assert_eq!(value["averages"][0]["action"], "jump");
        assert_eq!(value["averages"][0]["avg"], 150);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_format_output_human() {
        let cmd = command(1);
        let output = cmd.run(Cursor::new(SAMPLE), &IngestOptions::default());
        let text = cmd.format_output(&output, &IngestOptions::default());

        assert!(text.contains("Ingested 3 events (1 rejected)."));
        assert!(text.contains("line 4: [decode]"));
        assert!(text.contains("ACTION"));
        assert!(text.contains("jump"));
        assert!(text.contains("150"));
    }

    #[test]
    fn test_format_output_empty_action() {
        let cmd = command(1);
        let output = cmd.run_payloads([r#"{"time":3}"#], &IngestOptions::default());
        let text = cmd.format_output(&output, &IngestOptions::default());
        assert!(text.contains("Ingested 1 event (0 rejected)."));
        assert!(text.contains("(empty)"));
    }

    #[test]
    fn test_format_output_failure() {
        let cmd = command(1);
        let output = IngestOutput::failure("store faulted");
        let text = cmd.format_output(&output, &IngestOptions::default());
        assert!(text.contains("Ingest failed: store faulted"));
        assert!(!text.contains("ACTION"));
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}

//! Stream pumping: split a child pipe into lines and feed a [`LineBuffer`].

use crate::line_buffer::LineBuffer;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Which standard stream a reader is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// What a reader task hands back once its stream closes
#[derive(Debug)]
pub(crate) struct ReaderOutput {
    pub buffer: LineBuffer,
    pub error: Option<io::Error>,
}

/// Read `pipe` to end-of-stream, appending each completed line to `buffer`.
///
/// Lines are split on `\n`, a trailing `\r` is stripped and invalid UTF-8 is
/// replaced lossily. Unterminated trailing data is dropped unless
/// `flush_partial` is set. A read error ends the stream early; the lines
/// captured so far are kept and the error is returned alongside them.
pub(crate) async fn pump_lines<R>(
    pipe: R,
    mut buffer: LineBuffer,
    flush_partial: bool,
    kind: StreamKind,
) -> ReaderOutput
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut raw = Vec::with_capacity(256);

    let error = loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break None,
            Ok(_) => {
                if raw.last() == Some(&b'\n') {
                    buffer.append(Some(decode_line(&raw)));
                } else {
                    // EOF in the middle of a line
                    if flush_partial {
                        buffer.append(Some(decode_line(&raw)));
                    } else {
                        tracing::debug!(
                            stream = kind.as_str(),
                            bytes = raw.len(),
                            "Discarding unterminated trailing output"
                        );
                    }
                    break None;
                }
            }
            Err(err) => break Some(err),
        }
    };

    buffer.append(None);
    ReaderOutput { buffer, error }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pump(input: &[u8], flush_partial: bool) -> Vec<String> {
        let output = pump_lines(input, LineBuffer::new(), flush_partial, StreamKind::Stdout).await;
        assert!(output.error.is_none());
        assert!(output.buffer.is_closed());
        output.buffer.freeze().to_vec()
    }

    #[tokio::test]
    async fn test_splits_on_newlines_in_order() {
        assert_eq!(pump(b"a\nb\nc\n", false).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_strips_carriage_returns() {
        assert_eq!(pump(b"one\r\ntwo\r\n", false).await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_drops_unterminated_tail_by_default() {
        assert_eq!(pump(b"done\npartial", false).await, vec!["done"]);
    }

    #[tokio::test]
    async fn test_flushes_unterminated_tail_when_enabled() {
        assert_eq!(pump(b"done\npartial", true).await, vec!["done", "partial"]);
    }

    #[tokio::test]
    async fn test_empty_stream_yields_no_lines() {
        assert!(pump(b"", true).await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_are_lines() {
        assert_eq!(pump(b"\n\nx\n", false).await, vec!["", "", "x"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let lines = pump(&[0xff, 0xfe, b'\n'], false).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains('\u{fffd}'));
    }

    #[test]
    fn test_stream_kind_labels() {
        assert_eq!(StreamKind::Stdout.as_str(), "stdout");
        assert_eq!(StreamKind::Stderr.as_str(), "stderr");
    }
}

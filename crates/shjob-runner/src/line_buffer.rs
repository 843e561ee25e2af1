//! Line capture buffers for stdout and stderr
//!
//! A [`LineBuffer`] accumulates completed lines for one stream of one job. It is
//! owned by exactly one reader task while the process runs and is frozen into a
//! read-only [`CapturedLines`] once the run completes.

use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Append-only accumulator of completed output lines.
///
/// Lines are kept in the order their terminating newline was observed. When a
/// retention cap is configured the oldest lines are dropped first.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    max_lines: Option<usize>,
    total_lines: usize,
    diagnostics: usize,
    closed: bool,
}

impl LineBuffer {
    /// Create an unbounded buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer that retains at most `max_lines` of the most recent lines.
    ///
    /// `None` keeps every line.
    #[must_use]
    pub fn with_max_lines(max_lines: Option<usize>) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines,
            total_lines: 0,
            diagnostics: 0,
            closed: false,
        }
    }

    /// Append one already-delimited line, or mark end-of-stream with `None`.
    ///
    /// `None` never touches the stored lines. Lines arriving after end-of-stream
    /// are still recorded; the reader decides when it is done.
    pub fn append(&mut self, chunk: Option<String>) {
        let Some(line) = chunk else {
            self.closed = true;
            return;
        };

        self.total_lines += 1;
        if let Some(max) = self.max_lines {
            if max == 0 {
                return;
            }
            while self.lines.len() >= max {
                self.lines.pop_front();
            }
        }
        self.lines.push_back(line);
    }

    /// Push a diagnostic line produced by the runner itself.
    ///
    /// Diagnostics are exempt from the retention cap: they never evict
    /// captured lines and are never evicted themselves. Only called after the
    /// stream's reader has finished.
    pub(crate) fn push_diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics += 1;
        self.lines.push_back(message.into());
    }

    /// Number of lines currently retained
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether end-of-stream has been observed
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Total number of lines appended, including any dropped by the cap
    #[must_use]
    pub const fn total_lines(&self) -> usize {
        self.total_lines
    }

    /// Check if any lines were dropped by the retention cap
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.total_lines > self.lines.len() - self.diagnostics
    }

    /// Freeze the buffer. No further mutation is possible afterwards.
    #[must_use]
    pub fn freeze(self) -> CapturedLines {
        CapturedLines(self.lines.into_iter().collect())
    }
}

/// Frozen, cheaply cloneable sequence of captured lines.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CapturedLines(Arc<[String]>);

impl CapturedLines {
    /// An empty capture, used when a run is indeterminate.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Join the lines with `\n`, without a trailing newline.
    #[must_use]
    pub fn joined(&self) -> String {
        self.0.join("\n")
    }
}

impl Deref for CapturedLines {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for CapturedLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<S: AsRef<str>> PartialEq<[S]> for CapturedLines {
    fn eq(&self, other: &[S]) -> bool {
        self.0.len() == other.len() && self.0.iter().zip(other).all(|(a, b)| a == b.as_ref())
    }
}

impl<S: AsRef<str>, const N: usize> PartialEq<[S; N]> for CapturedLines {
    fn eq(&self, other: &[S; N]) -> bool {
        *self == other[..]
    }
}

impl<S: AsRef<str>> PartialEq<Vec<S>> for CapturedLines {
    fn eq(&self, other: &Vec<S>) -> bool {
        *self == other[..]
    }
}

impl From<Vec<String>> for CapturedLines {
    fn from(lines: Vec<String>) -> Self {
        Self(lines.into())
    }
}

impl Serialize for CapturedLines {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

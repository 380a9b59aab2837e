//! Kernel log ring.
//!
//! [`install`] points the global log function at [`sink`]. Each thread
//! carries a stack of active rings; a message goes to the innermost one,
//! and is dropped when the thread has none. The host enters its ring around
//! every call into module code and inside every thread it spawns, so each
//! host instance sees exactly its own modules' messages.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use lkm_core::log::{self, LogLevel};

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Sequence number, starting at 0 and never reused.
    pub seq: u64,
    /// Severity.
    pub level: LogLevel,
    /// Formatted message, without trailing newline.
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] {} {}", self.seq, self.level.tag(), self.message)
    }
}

struct Ring {
    records: VecDeque<LogRecord>,
    next_seq: u64,
    dropped: u64,
}

/// A bounded ring of log records.
pub struct Dmesg {
    ring: Mutex<Ring>,
    capacity: usize,
    echo: Option<LogLevel>,
}

impl Dmesg {
    /// Creates a ring holding the `capacity` most recent records.
    ///
    /// Records at or above `echo` severity are also printed to stderr.
    pub fn new(capacity: usize, echo: Option<LogLevel>) -> Arc<Self> {
        Arc::new(Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 0,
                dropped: 0,
            }),
            capacity: capacity.max(1),
            echo,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record, evicting the oldest one when full.
    pub fn push(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let mut message = String::new();
        let _ = message.write_fmt(args);
        let trimmed = message.trim_end_matches('\n').len();
        message.truncate(trimmed);

        let mut ring = self.lock();
        let record = LogRecord {
            seq: ring.next_seq,
            level,
            message,
        };
        ring.next_seq += 1;
        if self.echo.is_some_and(|echo| level <= echo) {
            eprintln!("{record}");
        }
        if ring.records.len() == self.capacity {
            ring.records.pop_front();
            ring.dropped += 1;
        }
        ring.records.push_back(record);
    }

    /// Returns the retained records, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Returns the retained messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .records
            .iter()
            .map(|r| r.message.clone())
            .collect()
    }

    /// Returns `true` if any retained message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock()
            .records
            .iter()
            .any(|r| r.message.contains(needle))
    }

    /// Number of records evicted so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Removes and returns every retained record.
    pub fn drain(&self) -> Vec<LogRecord> {
        self.lock().records.drain(..).collect()
    }

    /// Renders the retained records one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in self.lock().records.iter() {
            let _ = writeln!(out, "{record}");
        }
        out
    }
}

impl fmt::Debug for Dmesg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.lock();
        f.debug_struct("Dmesg")
            .field("len", &ring.records.len())
            .field("capacity", &self.capacity)
            .field("dropped", &ring.dropped)
            .finish()
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<Arc<Dmesg>>> = const { RefCell::new(Vec::new()) };
}

/// Routes the calling thread's log output to a ring until dropped.
#[must_use = "the ring is only active while the guard lives"]
pub struct RingGuard {
    _private: (),
}

/// Makes `ring` the calling thread's active ring.
pub fn enter(ring: &Arc<Dmesg>) -> RingGuard {
    install();
    ACTIVE.with(|stack| stack.borrow_mut().push(Arc::clone(ring)));
    RingGuard { _private: () }
}

impl Drop for RingGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The global log function.
pub fn sink(level: LogLevel, args: fmt::Arguments<'_>) {
    let ring = ACTIVE.with(|stack| stack.borrow().last().cloned());
    if let Some(ring) = ring {
        ring.push(level, args);
    }
}

/// Installs [`sink`] as the global log function. Idempotent.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| log::set_log_fn(sink));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lkm_core::{pr_err, pr_info};

    #[test]
    fn ring_evicts_oldest() {
        let ring = Dmesg::new(2, None);
        ring.push(LogLevel::Info, format_args!("a"));
        ring.push(LogLevel::Info, format_args!("b"));
        ring.push(LogLevel::Info, format_args!("c\n"));
        assert_eq!(ring.messages(), ["b", "c"]);
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.records()[1].seq, 2);
    }

    #[test]
    fn macros_reach_entered_ring() {
        let outer = Dmesg::new(16, None);
        let inner = Dmesg::new(16, None);
        {
            let _g = enter(&outer);
            pr_info!("to outer");
            {
                let _g = enter(&inner);
                pr_err!("to inner {}", 1);
            }
            pr_info!("outer again");
        }
        pr_info!("nowhere");
        assert_eq!(outer.messages(), ["to outer", "outer again"]);
        assert_eq!(inner.messages(), ["to inner 1"]);
        assert_eq!(inner.records()[0].level, LogLevel::Err);
    }

    #[test]
    fn render_and_drain() {
        let ring = Dmesg::new(4, None);
        ring.push(LogLevel::Warning, format_args!("careful"));
        assert_eq!(ring.render(), "[     0] WARN  careful\n");
        assert_eq!(ring.drain().len(), 1);
        assert!(ring.records().is_empty());
    }
}

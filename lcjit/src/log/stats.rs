//! This module records statistics about the recorder. The accuracy of the statistics varies: for
//! example, durations are wall-clock time, which inevitably fail to account for context switches
//! and the like. Thus the statistics are very much in "best effort" territory.

#[cfg(not(test))]
use std::env;
use std::{fs, ops::DerefMut, sync::Mutex, time::Duration};
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

/// Record statistics if enabled. In non-testing mode, this is only enabled if the end user
/// defines the environment variable `LCD_LOG_STATS`. In testing mode, this is always enabled,
/// with output being sent to `stderr`.
pub(crate) struct Stats {
    // Most runs won't record statistics, so the outer `Option` makes "are any stats to be
    // recorded?" a simple `None` check: only if stats are to be recorded do we lock the `Mutex`.
    inner: Option<Mutex<StatsInner>>,
}

struct StatsInner {
    /// The path to write output. If exactly equal to `-`, output will be written to stderr.
    output_path: String,
    /// The value of each [Counter].
    counters: [u64; Counter::COUNT],
    /// Wall-clock time spent recording (including loop closing and dead code elimination).
    duration_recording: Duration,
}

/// The events [Stats] counts.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Display, EnumCount, EnumIter, PartialEq)]
// The variants range from `0..Counter::COUNT`: don't assign numbers to any of the variants with
// `= <int>`! Each variant's `to_string` is the key that appears in the JSON stats.
pub(crate) enum Counter {
    /// A trace was recorded successfully.
    #[strum(to_string = "traces_recorded_ok")]
    TraceRecordedOk,
    /// A trace was aborted.
    #[strum(to_string = "traces_recorded_err")]
    TraceRecordedErr,
    /// An instruction was replaced by an existing one.
    #[strum(to_string = "cse_hits")]
    CseHit,
    /// A load was replaced by a stored value.
    #[strum(to_string = "loads_forwarded")]
    LoadForwarded,
    /// An instruction was folded away by a peephole rule.
    #[strum(to_string = "ins_folded")]
    InsFolded,
    /// A snapshot was taken.
    #[strum(to_string = "snapshots_taken")]
    SnapshotTaken,
}

impl Stats {
    #[cfg(not(test))]
    pub fn new() -> Self {
        if let Ok(p) = env::var("LCD_LOG_STATS") {
            Self {
                inner: Some(Mutex::new(StatsInner::new(p))),
            }
        } else {
            Self { inner: None }
        }
    }

    #[cfg(test)]
    pub fn new() -> Self {
        Self {
            inner: Some(Mutex::new(StatsInner::new("-".to_string()))),
        }
    }

    /// If `LCD_LOG_STATS` was specified, update `inner` by running the function `f`, otherwise
    /// return immediately without calling `f`.
    fn update_with<F>(&self, f: F)
    where
        F: FnOnce(&mut StatsInner),
    {
        if let Some(Ok(mut lk)) = self.inner.as_ref().map(|x| x.lock()) {
            f(lk.deref_mut());
        }
    }

    /// Add `n` to the count of [Counter] `c`.
    pub fn add(&self, c: Counter, n: u64) {
        if n > 0 {
            self.update_with(|inner| inner.counters[c as usize] += n);
        }
    }

    /// Add `d` to the time spent recording.
    pub fn recording_duration(&self, d: Duration) {
        self.update_with(|inner| {
            inner.duration_recording = inner.duration_recording.saturating_add(d)
        });
    }

    /// The current value of [Counter] `c`, or `None` if statistics are not being recorded.
    #[cfg(test)]
    pub fn get(&self, c: Counter) -> Option<u64> {
        self.inner
            .as_ref()
            .and_then(|x| x.lock().ok().map(|x| x.counters[c as usize]))
    }

    /// Output these statistics to the appropriate output path.
    pub(crate) fn output(&self) {
        self.update_with(|inner| inner.output());
    }
}

impl StatsInner {
    fn new(output_path: String) -> Self {
        Self {
            output_path,
            counters: [0; Counter::COUNT],
            duration_recording: Duration::new(0, 0),
        }
    }

    /// Output these statistics to the appropriate output path.
    fn output(&self) {
        let json = self.to_json();
        if self.output_path == "-" {
            eprintln!("{json}");
        } else {
            fs::write(&self.output_path, json).ok();
        }
    }

    /// Turn these statistics into JSON. The output is guaranteed to be sorted by field name so
    /// that textual matching of the JSON string is possible.
    fn to_json(&self) -> String {
        fn fmt_duration(d: Duration) -> String {
            format!("{}.{:03}", d.as_secs(), d.subsec_millis())
        }

        let mut fields = Counter::iter()
            .map(|c| (c.to_string(), self.counters[c as usize].to_string()))
            .collect::<Vec<_>>();
        fields.push((
            "duration_recording".to_owned(),
            fmt_duration(self.duration_recording),
        ));
        // We sort the output fields so that tests can match the output with a simple text match.
        fields.sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        format!(
            r#"{{
    {}
}}"#,
            fields
                .iter()
                .map(|(x, y)| format!(r#""{x}": {y}"#))
                .collect::<Vec<_>>()
                .join(",\n    ")
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_is_sorted() {
        let mut s = StatsInner::new("-".to_owned());
        s.counters[Counter::CseHit as usize] = 3;
        s.counters[Counter::TraceRecordedOk as usize] = 1;
        s.duration_recording = Duration::from_millis(1500);
        assert_eq!(
            s.to_json(),
            r#"{
    "cse_hits": 3,
    "duration_recording": 1.500,
    "ins_folded": 0,
    "loads_forwarded": 0,
    "snapshots_taken": 0,
    "traces_recorded_err": 0,
    "traces_recorded_ok": 1
}"#
        );
    }

    #[test]
    fn counting() {
        let s = Stats::new();
        s.add(Counter::SnapshotTaken, 2);
        s.add(Counter::SnapshotTaken, 1);
        assert_eq!(s.get(Counter::SnapshotTaken), Some(3));
        assert_eq!(s.get(Counter::LoadForwarded), Some(0));
    }
}

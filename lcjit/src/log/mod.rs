//! The implementation of the `LCD_LOG*` environment variables.
//!
//! Note that IR logging is only meaningfully available when the `lcd` feature is available:
//! otherwise we expose no-op functions.

use std::{env, error::Error, fs::File, io::Write, path::PathBuf};
use strum::{EnumCount, FromRepr};

pub(crate) mod stats;

/// How verbose should the recorder's normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings.
    Warning,
    /// Log JIT events (e.g. start/stop recording, aborts).
    JITEvent,
    /// Log individual optimisation decisions.
    Opt,
}

#[derive(Clone, Debug)]
pub struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` should default to the platform specific standard
    /// for logging (e.g. stderr).
    path: Option<PathBuf>,
}

impl Log {
    /// Create a logger configured from `LCD_LOG`, which must be of the format
    /// `[<path|->:]<level>`.
    pub fn new() -> Result<Self, Box<dyn Error>> {
        match env::var("LCD_LOG") {
            Ok(s) => Self::from_spec(&s),
            Err(_) => Ok(Self {
                path: None,
                level: Verbosity::Error,
            }),
        }
    }

    fn from_spec(s: &str) -> Result<Self, Box<dyn Error>> {
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    (Some(PathBuf::from(path)), level)
                }
            }
            [level] => (None, level),
            [..] => return Err("LCD_LOG must be of the format `[<path|->:]<level>`".into()),
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid LCD_LOG level '{s}': {e}"))?;
        let max_level = Verbosity::COUNT - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("LCD_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self::with(level, path))
    }

    /// Create a logger at `level` writing to `path` (or stderr if `None`). An existing file at
    /// `path` is truncated.
    pub fn with(level: Verbosity, path: Option<PathBuf>) -> Self {
        if let Some(p) = &path {
            // Truncate any existing log file so that later appends aren't appending to a previous
            // run's log.
            File::create(p).ok();
        }
        Self { level, path }
    }

    /// Would a message at `level` be logged?
    pub(crate) fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Disabled && level <= self.level
    }

    /// Log `msg` with the [Verbosity] level `verbosity`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "lcjit-error",
                Verbosity::Warning => "lcjit-warning",
                Verbosity::JITEvent => "lcjit-jit-event",
                Verbosity::Opt => "lcjit-opt",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}

#[derive(Eq, Hash, PartialEq)]
pub(crate) enum IRPhase {
    /// The IR as recorded, before the loop is closed.
    Recorded,
    /// The IR after loop unrolling and dead code elimination.
    PostOpt,
}

#[cfg(not(feature = "lcd"))]
mod internals {
    use super::IRPhase;
    pub(crate) fn should_log_ir(_: IRPhase) -> bool {
        false
    }
    pub(crate) fn log_ir(_: &str) {}
}

#[cfg(feature = "lcd")]
mod internals {
    use super::IRPhase;
    use std::{collections::HashSet, env, error::Error, fs::File, io::Write, sync::LazyLock};

    static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
        let mut log_phases = HashSet::new();
        if let Ok(x) = env::var("LCD_LOG_IR") {
            let (path, phases) = match x.split(':').collect::<Vec<_>>().as_slice() {
                [path, phases] => (*path, *phases),
                [phases] => ("-", *phases),
                _ => panic!(
                    "LCD_LOG_IR must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'"
                ),
            };
            for x in phases.split(',') {
                match IRPhase::from_str(x) {
                    Ok(p) => {
                        log_phases.insert(p);
                    }
                    Err(e) => panic!("{e}"),
                }
            }
            if path != "-" {
                // If there's an existing log file, truncate (i.e. empty it), so that later
                // appends to the log aren't appending to a previous log run.
                File::create(path).ok();
            }
            Some((path.to_string(), log_phases))
        } else {
            None
        }
    });

    impl IRPhase {
        fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
            match s {
                "jit-recorded" => Ok(Self::Recorded),
                "jit-post-opt" => Ok(Self::PostOpt),
                _ => Err(format!("Invalid LCD_LOG_IR value: {s}").into()),
            }
        }
    }

    pub(crate) fn should_log_ir(phase: IRPhase) -> bool {
        if let Some(true) = LOG_IR.as_ref().map(|(_, phases)| phases.contains(&phase)) {
            return true;
        }
        false
    }

    pub(crate) fn log_ir(s: &str) {
        match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
            Some("-") => eprint!("{s}"),
            Some(x) => {
                File::options()
                    .append(true)
                    .open(x)
                    .map(|mut x| x.write(s.as_bytes()))
                    .ok();
            }
            None => (),
        }
    }
}

pub(crate) use internals::{log_ir, should_log_ir};

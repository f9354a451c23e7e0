//! stderr logging that cooperates with the progress bars

use indicatif::MultiProgress;

/// How chatty the run is before `RUST_LOG` is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    Normal,
    Debug,
}

impl Verbosity {
    /// On a terminal the item bar reports progress, so info lines are
    /// suppressed. Piped output relies on them instead.
    pub fn for_output(is_tty: bool, debug: bool) -> Self {
        match (debug, is_tty) {
            (true, _) => Self::Debug,
            (false, true) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// Fixed-width level tag, optionally wrapped in an ANSI color
struct LevelTag {
    color: Option<&'static str>,
    label: &'static str,
}

impl LevelTag {
    fn new(level: log::Level, colored: bool) -> Self {
        let (label, ansi) = match level {
            log::Level::Error => ("ERROR", "\x1b[31m"),
            log::Level::Warn => ("WARN ", "\x1b[33m"),
            log::Level::Info => ("INFO ", "\x1b[32m"),
            log::Level::Debug => ("DEBUG", "\x1b[36m"),
            log::Level::Trace => ("TRACE", "\x1b[35m"),
        };
        Self {
            color: colored.then_some(ansi),
            label,
        }
    }
}

impl std::fmt::Display for LevelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.color {
            Some(ansi) => write!(f, "[{ansi}{}\x1b[0m]", self.label),
            None => write!(f, "[{}]", self.label),
        }
    }
}

/// Suspends the bars around each record so lines never interleave with them.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        let line = format!("{} {}", LevelTag::new(record.level(), true), record.args());
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global logger.
///
/// With `multi` the records are routed around the bars. Without it each
/// line is `<timestamp> [LEVEL] message` with no color.
pub fn init_logging(
    verbosity: Verbosity,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(verbosity.default_filter());

    let Some(multi) = multi else {
        return env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let ts = buf.timestamp_seconds();
                writeln!(buf, "{ts} {} {}", LevelTag::new(record.level(), false), record.args())
            })
            .try_init();
    };

    let logger = env_logger::Builder::from_env(env).build();
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))?;
    log::set_max_level(max_level);
    Ok(())
}

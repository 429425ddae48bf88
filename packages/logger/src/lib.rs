//! Simple to ``stderr`` logger.
//!
//! Lines at [`Level::Warn`] and above are always printed. Everything below is only
//! printed when the ``debug`` feature is enabled, in which case each line is also
//! prefixed with a timestamp.

use std::fmt;

/// Timestamp related functions.
#[cfg(feature = "debug")]
pub mod timestamp {
    use chrono::Utc;

    /// Generate the current timestamp.
    pub fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

/// The severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// The label printed in front of every line.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// 256-colour codes for the label and the body respectively.
    const fn colours(self) -> (u8, u8) {
        match self {
            Self::Trace => (240, 240),
            Self::Debug => (245, 245),
            Self::Info => (15, 7),
            Self::Warn => (11, 228),
            Self::Error => (9, 160),
        }
    }

    /// Whether lines of this level are printed at all.
    pub const fn enabled(self) -> bool {
        match self {
            Self::Warn | Self::Error => true,
            _ => cfg!(feature = "debug"),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Write one line to ``stderr``.
///
/// This is used by the exported macros; call those instead.
#[doc(hidden)]
pub fn emit(level: Level, args: fmt::Arguments<'_>) {
    if !level.enabled() {
        return;
    }

    let (label_colour, body_colour) = level.colours();

    #[cfg(feature = "debug")]
    eprintln!(
        "\x1b[38:5:240m{ts}\x1b[39m \x1b[1m\x1b[38:5:{label_colour}m{label:<5}\x1b[39m | \x1b[22m\x1b[38:5:{body_colour}m{args}\x1b[39m",
        ts = timestamp::now(),
        label = level.label(),
    );

    #[cfg(not(feature = "debug"))]
    eprintln!(
        "\x1b[1m\x1b[38:5:{label_colour}m{label:<5}\x1b[39m | \x1b[22m\x1b[38:5:{body_colour}m{args}\x1b[39m",
        label = level.label(),
    );
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        $crate::emit($crate::Level::Trace, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::emit($crate::Level::Debug, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::emit($crate::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::emit($crate::Level::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::emit($crate::Level::Error, format_args!($($arg)+))
    };
}

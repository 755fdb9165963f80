//! Log output for the binary

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// Session progress
    #[default]
    Normal,
    /// Barrier and timer decisions
    Verbose,
    /// Everything, including dependencies
    Debug,
}

impl Verbosity {
    /// Verbosity from the `-q` and `-v` flags; quiet wins
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if verbose or higher
    #[must_use]
    pub const fn is_verbose(self) -> bool {
        matches!(self, Self::Verbose | Self::Debug)
    }

    /// Filter directives used when `RUST_LOG` is unset
    #[must_use]
    pub const fn directives(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info,tower_http=warn",
            Self::Verbose => "comparar=debug,comparador=debug,tower_http=debug,info",
            Self::Debug => "debug",
        }
    }

    /// Build the filter, preferring `RUST_LOG` unless flags were given
    #[must_use]
    pub fn env_filter(self) -> EnvFilter {
        if self == Self::Normal {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
        } else {
            EnvFilter::new(self.directives())
        }
    }
}

/// Install the global tracing subscriber
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(verbosity: Verbosity, json: bool) {
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(verbosity.env_filter())
        .try_init();
}

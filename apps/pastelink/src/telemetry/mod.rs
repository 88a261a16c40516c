//! Diagnostics output for the process. Logs go to stderr or a file; stdout
//! belongs to the operator console.

pub mod logging {
    use std::fs::OpenOptions;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    pub const ENV_LOG_FILTER: &str = "PASTELINK_LOG_FILTER";
    pub const ENV_TRACE_DEPS: &str = "PASTELINK_TRACE_DEPS";

    const OWN_CRATES: &[&str] = &["pastelink", "peer_transport", "transport_webrtc"];

    /// Held at `info` under `trace` unless [`ENV_TRACE_DEPS`] is set.
    const NOISY_DEPENDENCIES: &[&str] = &[
        "webrtc_ice",
        "webrtc_sctp",
        "webrtc_dtls",
        "webrtc_srtp",
        "webrtc_mdns",
        "webrtc_util",
        "stun",
        "turn",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("cannot write logs to {path:?}: {source}")]
        Io { path: PathBuf, source: io::Error },
        #[error("logger setup failed: {0}")]
        Configure(String),
    }

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct Directives {
        pub text: String,
        /// Dependency traces were held back.
        pub throttled: bool,
    }

    impl Directives {
        pub(crate) fn for_level(level: LogLevel, with_dependencies: bool) -> Self {
            let own = match level {
                LogLevel::Error => return Self::plain("error"),
                LogLevel::Warn => return Self::plain("warn"),
                LogLevel::Info => return Self::plain("info"),
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            };
            let throttled = level == LogLevel::Trace && !with_dependencies;
            let mut parts = vec!["info".to_string()];
            parts.extend(OWN_CRATES.iter().map(|krate| format!("{krate}={own}")));
            if throttled {
                parts.extend(NOISY_DEPENDENCIES.iter().map(|krate| format!("{krate}=info")));
            }
            Self {
                text: parts.join(","),
                throttled,
            }
        }

        fn plain(text: &str) -> Self {
            Self {
                text: text.to_string(),
                throttled: false,
            }
        }

        fn resolve(level: LogLevel) -> Self {
            match std::env::var(ENV_LOG_FILTER) {
                Ok(custom) => Self::plain(&custom),
                Err(_) => Self::for_level(level, dependency_traces_requested()),
            }
        }
    }

    fn dependency_traces_requested() -> bool {
        std::env::var(ENV_TRACE_DEPS).is_ok_and(|value| !value.is_empty() && value != "0")
    }

    fn open_writer(path: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = path else {
            return Ok(tracing_appender::non_blocking(io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Install the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let directives = Directives::resolve(config.level);
        let (writer, guard) = open_writer(config.file.as_deref())?;
        let detailed = config.level == LogLevel::Trace;

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&directives.text))
            .with_writer(writer)
            .with_ansi(config.file.is_none())
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(detailed)
            .with_thread_ids(detailed)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        if directives.throttled {
            eprintln!(
                "[pastelink-log] webrtc internals capped at info; set {ENV_TRACE_DEPS}=1 or {ENV_LOG_FILTER} for more"
            );
        }
        Ok(())
    }

}

use slog::Drain;
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Term,
    Json,
}

#[derive(Clone, Debug, Error)]
#[error("unknown log format: {0}")]
pub struct UnknownLogFormatError(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "term" => Ok(Self::Term),
            "json" => Ok(Self::Json),
            _ => Err(UnknownLogFormatError(s.to_string())),
        }
    }
}

/// Builds the root logger, writing to stderr. Records are written on a background thread, so the
/// returned guard must be kept alive until the last record has been logged.
pub fn root_logger(format: LogFormat) -> (slog::Logger, slog_async::AsyncGuard) {
    let (drain, guard) = match format {
        LogFormat::Term => {
            let decorator = slog_term::TermDecorator::new().stderr().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build_with_guard()
        }
        LogFormat::Json => {
            let drain = slog_json::Json::new(std::io::stderr())
                .add_default_keys()
                .build()
                .fuse();
            slog_async::Async::new(drain).build_with_guard()
        }
    };
    (
        slog::Logger::root(drain.fuse(), o!("app" => "etcd-bootstrap")),
        guard,
    )
}

mod connection;
mod limiter;
mod logging;
mod pool;
mod stats;

pub use connection::{Connection, RequestFactory, RequestTemplate};
pub use limiter::RateLimiter;
pub use logging::{
    LineFormatter, LogWriter, compact_line, default_formatter, file_writer, json_line,
    stdout_writer,
};
pub use pool::Pool;
pub use stats::ClientStats;

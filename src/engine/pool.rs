use crate::config::TestConfig;
use crate::engine::connection::{Connection, RequestFactory, RequestTemplate};
use crate::engine::logging::{LineFormatter, LogWriter};
use crate::engine::stats::ClientStats;
use crate::error::{ClientError, ConfigError, PoolError};
use futures_util::future::join_all;
use reqwest::Client;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Fan-out/fan-in orchestrator over N independent connections. Every
/// lifecycle operation runs against all connections concurrently and
/// reports the complete set of per-connection failures, indexed by
/// connection.
#[derive(Clone)]
pub struct Pool {
    connections: Vec<Arc<Connection>>,
    config: Arc<TestConfig>,
}

impl Pool {
    /// Validates the configuration before constructing anything; an
    /// invalid config means no connection is ever attempted.
    pub fn new(config: TestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let connections = (0..config.clients)
            .map(|_| Arc::new(Connection::new(config.clone())))
            .collect();
        Ok(Self {
            connections,
            config,
        })
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    async fn fan_out<Fut>(&self, op: impl Fn(Arc<Connection>) -> Fut) -> Result<(), PoolError>
    where
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let results = join_all(self.connections.iter().cloned().map(op)).await;
        let errors = results
            .into_iter()
            .enumerate()
            .filter_map(|(index, result)| result.err().map(|err| (index, err)))
            .collect();
        PoolError::from_indexed(errors)
    }

    pub async fn connect(&self) -> Result<(), PoolError> {
        self.fan_out(|conn| async move { conn.connect().await })
            .await
    }

    fn get_factory(&self) -> Arc<dyn RequestFactory> {
        let url = self.config.url.clone();
        Arc::new(move |client: &Client| client.get(url.clone()))
    }

    async fn run_bounded(
        &self,
        factory: Arc<dyn RequestFactory>,
        ceiling: u64,
    ) -> Result<(), PoolError> {
        self.fan_out(|conn| {
            let factory = factory.clone();
            async move { conn.run_bounded(factory, ceiling).await }
        })
        .await
    }

    /// Runs the test with a plain GET against the configured URL.
    pub async fn run(&self) -> Result<(), PoolError> {
        self.run_bounded(self.get_factory(), self.config.requests).await
    }

    /// Runs the test, building each attempt's request through the
    /// caller-supplied factory.
    pub async fn run_with_factory(
        &self,
        factory: Arc<dyn RequestFactory>,
    ) -> Result<(), PoolError> {
        self.run_bounded(factory, self.config.requests).await
    }

    /// Runs the test re-issuing a snapshot of one immutable request.
    pub async fn run_template(&self, template: RequestTemplate) -> Result<(), PoolError> {
        self.run_with_factory(Arc::new(template)).await
    }

    /// Connect-then-run; a connect failure fails fast without attempting
    /// the run.
    pub async fn start(&self) -> Result<(), PoolError> {
        self.connect().await?;
        self.run().await
    }

    /// Duration-bounded run: dispatch until the wall-clock budget
    /// expires, then stop all connections and wait for drain. The
    /// configured count ceiling is ignored; the window is the only bound.
    pub async fn run_for(&self, duration: Duration) -> Result<(), PoolError> {
        let (result, _) = tokio::join!(self.run_bounded(self.get_factory(), 0), async {
            tokio::time::sleep(duration).await;
            tracing::info!(?duration, "duration elapsed, stopping connections");
            self.stop();
        });
        self.wait().await;
        result
    }

    /// Raises every connection's cancellation signal. Cooperative:
    /// in-flight requests finish naturally; use `wait()` to drain.
    pub fn stop(&self) {
        for conn in &self.connections {
            conn.stop();
        }
    }

    /// Blocks until every connection's pump and background sinks drain.
    pub async fn wait(&self) {
        join_all(self.connections.iter().map(|conn| conn.wait())).await;
    }

    /// Stops everything and releases transport resources.
    pub async fn close(&self) {
        join_all(self.connections.iter().map(|conn| conn.close())).await;
    }

    pub fn sent_requests(&self) -> u64 {
        self.connections.iter().map(|conn| conn.sent_requests()).sum()
    }

    /// Cross-connection totals: summed counters, min of non-zero mins,
    /// max of maxes, and the slowest connection's duration.
    pub fn total_stats(&self) -> ClientStats {
        let mut total = ClientStats::default();
        for conn in &self.connections {
            total.merge(&conn.stats());
        }
        total
    }

    /// Totals averaged per connection; min/max/duration describe the
    /// whole test and are kept as-is.
    pub fn avg_client_stats(&self) -> ClientStats {
        self.total_stats().averaged_over(self.connections.len())
    }

    pub fn client_stats(&self, index: usize) -> Option<ClientStats> {
        self.connections.get(index).map(|conn| conn.stats())
    }

    /// Combined summary: totals followed by per-connection averages.
    pub fn stats_summary(&self) -> String {
        format!("{}\n\n{}", self.total_stats(), self.avg_client_stats())
    }

    pub fn all_client_stats_summary(&self) -> String {
        let mut out = String::new();
        for (index, conn) in self.connections.iter().enumerate() {
            let _ = writeln!(out, "~~~~~ Connection {index} ~~~~~\n\n{}\n", conn.stats());
        }
        out
    }

    /// Installs one shared log destination across every connection.
    pub fn set_log_writer(&self, writer: LogWriter) {
        for conn in &self.connections {
            conn.set_log_writer(writer.clone());
        }
    }

    pub fn set_log_writer_for(&self, index: usize, writer: LogWriter) {
        if let Some(conn) = self.connections.get(index) {
            conn.set_log_writer(writer);
        }
    }

    pub fn set_line_formatter(&self, formatter: LineFormatter) {
        for conn in &self.connections {
            conn.set_line_formatter(formatter.clone());
        }
    }

    pub fn set_line_formatter_for(&self, index: usize, formatter: LineFormatter) {
        if let Some(conn) = self.connections.get(index) {
            conn.set_line_formatter(formatter);
        }
    }
}

use crate::config::TestConfig;
use crate::engine::limiter::RateLimiter;
use crate::engine::logging::{self, LineFormatter, LogWriter};
use crate::engine::stats::ClientStats;
use crate::error::ClientError;
use crate::types::{Outcome, Protocol, STATUS_TRANSPORT_ERROR};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Capacity of the outcome and log-line queues. Producers never block:
/// an enqueue against a full queue drops the item, trading bounded
/// telemetry loss for minimal latency on the request path.
pub(crate) const TELEMETRY_QUEUE_SIZE: usize = 10_000;

/// Builds one independent request per attempt, so a shared immutable
/// request is never reused and mutated across concurrent attempts.
pub trait RequestFactory: Send + Sync {
    fn build(&self, client: &Client) -> RequestBuilder;
}

impl<F> RequestFactory for F
where
    F: Fn(&Client) -> RequestBuilder + Send + Sync,
{
    fn build(&self, client: &Client) -> RequestBuilder {
        self(client)
    }
}

/// Snapshot of an immutable request, re-built for every attempt.
/// Streaming bodies cannot be snapshotted and are rejected up front.
pub struct RequestTemplate {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestTemplate {
    pub fn new(request: reqwest::Request) -> Result<Self, ClientError> {
        let body = match request.body() {
            Some(body) => Some(
                body.as_bytes()
                    .ok_or(ClientError::UnclonableBody)?
                    .to_vec(),
            ),
            None => None,
        };
        Ok(Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body,
        })
    }
}

impl RequestFactory for RequestTemplate {
    fn build(&self, client: &Client) -> RequestBuilder {
        let mut builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

/// One independent execution unit bound to one transport session: a
/// request pump, a sent-request counter, a cancellation signal, and two
/// background sinks (statistics collector, optional log writer).
///
/// Lifecycle: `connect()` → `run()` → terminal once the pump and both
/// sinks drain (observed via `wait()`). The telemetry queues close when
/// the run loop returns; a connection is never resurrected for a second
/// run.
pub struct Connection {
    config: Arc<TestConfig>,
    client: Mutex<Option<Client>>,
    cancel: CancellationToken,
    sent_requests: AtomicU64,
    duration_us: AtomicU64,
    outcome_tx: Mutex<Option<mpsc::Sender<Outcome>>>,
    stats_rx: watch::Receiver<ClientStats>,
    log_tx: Mutex<Option<mpsc::Sender<String>>>,
    formatter: Mutex<LineFormatter>,
    sinks: TaskTracker,
}

/// Mutex poisoning only happens if a holder panicked; the guarded values
/// stay usable, so recover the guard instead of propagating the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connection {
    pub fn new(config: Arc<TestConfig>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(TELEMETRY_QUEUE_SIZE);
        let (stats_tx, stats_rx) = watch::channel(ClientStats::default());

        let sinks = TaskTracker::new();
        sinks.spawn(run_stats_collector(outcome_rx, stats_tx));

        Self {
            config,
            client: Mutex::new(None),
            cancel: CancellationToken::new(),
            sent_requests: AtomicU64::new(0),
            duration_us: AtomicU64::new(0),
            outcome_tx: Mutex::new(Some(outcome_tx)),
            stats_rx,
            log_tx: Mutex::new(None),
            formatter: Mutex::new(logging::default_formatter()),
            sinks,
        }
    }

    /// Sets up the transport for this connection. reqwest dials lazily,
    /// so builder errors are the only failures surfaced here; dial and
    /// TLS errors show up as per-request transport failures.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.timeout)
            .tcp_nodelay(true)
            .gzip(true)
            .brotli(true)
            .user_agent(format!(
                "h2surge/{} (load-testing-tool)",
                env!("CARGO_PKG_VERSION")
            ))
            .danger_accept_invalid_certs(self.config.insecure)
            .pool_max_idle_per_host(self.config.streams.max(1) as usize)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60));

        builder = match self.config.protocol {
            Protocol::Http2 => builder.http2_prior_knowledge(),
            Protocol::Http1 => builder.http1_only(),
        };

        // Dial override: keep protocol-level addressing on the URL host
        // while connecting to the configured address.
        if let Some(addr) = self.config.server_socket_addr()
            && let Ok(url) = Url::parse(&self.config.url)
            && let Some(host) = url.host_str()
        {
            builder = builder.resolve(host, addr);
        }

        let client = builder.build().map_err(ClientError::Connect)?;
        *lock(&self.client) = Some(client);
        Ok(())
    }

    /// The request pump: issues requests under three simultaneous
    /// constraints — the total-count ceiling (if non-zero), rate-limiter
    /// permission, and the in-flight concurrency cap. Returns after all
    /// in-flight attempts drain; the first transport error observed wins,
    /// later ones are only counted in statistics.
    pub async fn run(&self, factory: Arc<dyn RequestFactory>) -> Result<(), ClientError> {
        self.run_bounded(factory, self.config.requests).await
    }

    /// Pump with an explicit count ceiling; 0 means unbounded. Used by
    /// duration-bounded runs, which override the configured ceiling.
    pub(crate) async fn run_bounded(
        &self,
        factory: Arc<dyn RequestFactory>,
        ceiling: u64,
    ) -> Result<(), ClientError> {
        let client = lock(&self.client)
            .clone()
            .ok_or(ClientError::NotConnected)?;
        let outcome_tx = lock(&self.outcome_tx)
            .clone()
            .ok_or(ClientError::Finished)?;
        let log_tx = lock(&self.log_tx).clone();
        let formatter = lock(&self.formatter).clone();

        let limiter = if self.config.rps > 0 {
            let refill_cancel = self.cancel.child_token();
            let limiter = RateLimiter::new(
                self.config.rps,
                self.config.rps_mode,
                refill_cancel.clone(),
            );
            let refiller = tokio::spawn(limiter.clone().run_refiller());
            Some((limiter, refill_cancel, refiller))
        } else {
            None
        };

        let slots = Arc::new(Semaphore::new(self.config.streams as usize));
        let in_flight = TaskTracker::new();
        let first_err: Arc<Mutex<Option<ClientError>>> = Arc::new(Mutex::new(None));

        tracing::debug!(streams = self.config.streams, rps = self.config.rps, "pump started");
        let start = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if ceiling > 0 && self.sent_requests.load(Ordering::Relaxed) >= ceiling {
                break;
            }

            if let Some((limiter, _, _)) = &limiter
                && !limiter.acquire().await
            {
                break;
            }

            // Cancellable slot acquisition keeps stop() responsive even
            // while every slot is occupied.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // The counter increment happens-before the attempt task runs.
            self.sent_requests.fetch_add(1, Ordering::Relaxed);

            let request = factory.build(&client);
            let outcome_tx = outcome_tx.clone();
            let log_tx = log_tx.clone();
            let formatter = formatter.clone();
            let first_err = first_err.clone();
            in_flight.spawn(async move {
                let outcome = execute_attempt(request, &first_err).await;

                let _ = outcome_tx.try_send(outcome);
                if let Some(log_tx) = &log_tx {
                    let line = formatter(outcome.start, outcome.status, outcome.latency);
                    let _ = log_tx.try_send(line);
                }
                drop(permit);
            });
        }

        in_flight.close();
        in_flight.wait().await;
        self.duration_us
            .store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        tracing::debug!(
            sent = self.sent_requests.load(Ordering::Relaxed),
            "pump drained"
        );

        // Dropping the producers lets both sinks drain and exit; the
        // connection is terminal from here on.
        *lock(&self.outcome_tx) = None;
        *lock(&self.log_tx) = None;

        if let Some((_, refill_cancel, refiller)) = limiter {
            refill_cancel.cancel();
            let _ = refiller.await;
        }

        match lock(&first_err).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Raises the cancellation signal. Cooperative: the pump stops
    /// issuing new requests, but attempts already dispatched finish
    /// naturally and still report their outcomes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the statistics collector and log sink drain, which
    /// can only happen after the pump has fully drained.
    pub async fn wait(&self) {
        self.sinks.close();
        self.sinks.wait().await;
    }

    /// Stops the connection and releases the transport. Also unblocks the
    /// sinks for a connection that never ran.
    pub async fn close(&self) {
        self.cancel.cancel();
        *lock(&self.outcome_tx) = None;
        *lock(&self.log_tx) = None;
        *lock(&self.client) = None;
        self.wait().await;
    }

    pub fn sent_requests(&self) -> u64 {
        self.sent_requests.load(Ordering::Relaxed)
    }

    /// Latest collector snapshot. Eventually consistent while the pump is
    /// running; exact once `wait()` has returned.
    pub fn stats(&self) -> ClientStats {
        let mut stats = self.stats_rx.borrow().clone();
        stats.duration = Duration::from_micros(self.duration_us.load(Ordering::Relaxed));
        stats
    }

    pub fn stats_summary(&self) -> String {
        self.stats().to_string()
    }

    /// Installs a log destination and starts its sink task. No
    /// destination means no queue and no task at all. Install before
    /// `run()`; the pump samples the sink once at startup.
    pub fn set_log_writer(&self, writer: LogWriter) {
        let (log_tx, log_rx) = mpsc::channel(TELEMETRY_QUEUE_SIZE);
        self.sinks.spawn(logging::run_log_sink(log_rx, writer));
        // A previously installed sink drains and exits once its last
        // producer handle drops.
        *lock(&self.log_tx) = Some(log_tx);
    }

    pub fn set_line_formatter(&self, formatter: LineFormatter) {
        *lock(&self.formatter) = formatter;
    }
}

/// Consumes the outcome queue and owns the running totals; outcome order
/// across concurrent attempts is insignificant. Exits when the pump drops
/// the last producer handle, so no outcome is lost to a premature close.
async fn run_stats_collector(mut rx: mpsc::Receiver<Outcome>, tx: watch::Sender<ClientStats>) {
    let mut stats = ClientStats::default();
    while let Some(outcome) = rx.recv().await {
        stats.record(&outcome);
        let _ = tx.send(stats.clone());
    }
}

/// Executes one attempt end-to-end. Latency is measured from dispatch to
/// response-header completion; the body is then drained and discarded —
/// this engine measures timing and status only. Transport failures are
/// recorded under the status sentinel and stored as the run's error only
/// if they came first.
async fn execute_attempt(
    request: RequestBuilder,
    first_err: &Mutex<Option<ClientError>>,
) -> Outcome {
    let start = SystemTime::now();
    let timer = Instant::now();

    match request.send().await {
        Ok(response) => {
            let latency = timer.elapsed();
            let status = response.status().as_u16();
            let _ = response.bytes().await;
            Outcome {
                start,
                status,
                latency,
            }
        }
        Err(err) => {
            let latency = timer.elapsed();
            let mut slot = lock(first_err);
            if slot.is_none() {
                *slot = Some(ClientError::Request(err));
            }
            Outcome {
                start,
                status: STATUS_TRANSPORT_ERROR,
                latency,
            }
        }
    }
}

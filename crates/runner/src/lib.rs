//! Runs the service's long-lived processes with graceful shutdown.
//!
//! App processes run concurrently under one shared cancellation token. The run
//! ends when every process has returned, when any process fails, or when
//! SIGINT/SIGTERM is received. Closers always run afterwards, bounded by a
//! timeout.
//!
//! # Example
//!
//! ```no_run
//! use salesfeed_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_app_process("poller", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("polling");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("flushing");
//!             Ok(())
//!         })
//!         .run_and_exit()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process; receives the shared cancellation token
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

/// Cleanup run once all app processes have stopped
pub type Closer = Box<dyn FnOnce() -> BoxFuture + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add a named app process. A failing process cancels all the others.
    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: AppProcess =
            Box::new(move |token| -> BoxFuture { Box::pin(process(token)) });
        self.app_processes.push((name.into(), boxed));
        self
    }

    /// Add an already boxed app process, as produced by worker modules
    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push((name.into(), process));
        self
    }

    /// Add a closer; closers run concurrently and one failing does not stop the rest
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push(Box::new(move || -> BoxFuture { Box::pin(closer()) }));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run every process to completion or cancellation, then the closers.
    ///
    /// # Returns
    /// The first process error, if any process failed before cancellation
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut processes = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            processes.spawn(async move {
                debug!(process = %name, "starting app process");
                (name, process(process_token).await)
            });
        }

        // Dropping the set at the end of the run aborts the signal listeners
        let mut signals = JoinSet::new();
        signals.spawn(wait_for_ctrl_c(token.clone()));
        #[cfg(unix)]
        signals.spawn(wait_for_sigterm(token.clone()));

        let mut first_error = None;
        while let Some(joined) = processes.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "app process completed");
                }
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, error = %format!("{err:#}"), "app process failed");
                        first_error = Some(err.context(format!("app process {name} failed")));
                        token.cancel();
                    }
                }
                Err(err) => {
                    error!(error = %err, "app process panicked");
                    if !token.is_cancelled() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {err}"));
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Give cancelled processes a chance to observe the token before aborting them
        if !processes.is_empty() {
            let remaining = self.closer_timeout;
            if tokio::time::timeout(remaining, async {
                while processes.join_next().await.is_some() {}
            })
            .await
            .is_err()
            {
                error!(timeout = ?remaining, "app processes did not stop in time, aborting");
                processes.shutdown().await;
            }
        }
        drop(signals);

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("all app processes stopped");
                Ok(())
            }
        }
    }

    /// Run, then exit the process with code 0 on success or 1 on failure
    pub async fn run_and_exit(self) {
        match self.run().await {
            Ok(()) => {
                info!("application exiting normally");
                std::process::exit(0)
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "application exiting with error");
                std::process::exit(1)
            }
        }
    }
}

async fn wait_for_ctrl_c(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received SIGINT, shutting down");
            token.cancel();
        }
        Err(err) => error!(error = %err, "failed to listen for SIGINT"),
    }
}

#[cfg(unix)]
async fn wait_for_sigterm(token: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            if sigterm.recv().await.is_some() {
                info!("received SIGTERM, shutting down");
                token.cancel();
            }
        }
        Err(err) => error!(error = %err, "failed to listen for SIGTERM"),
    }
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    debug!(count = closers.len(), timeout = ?timeout, "running closers");
    let mut set = JoinSet::new();
    for closer in closers {
        set.spawn(closer());
    }

    let all = async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => debug!("closer completed"),
                Ok(Err(err)) => error!(error = %format!("{err:#}"), "closer failed"),
                Err(err) => error!(error = %err, "closer panicked"),
            }
        }
    };

    if tokio::time::timeout(timeout, all).await.is_err() {
        error!(timeout = ?timeout, "closers timed out");
    }
}

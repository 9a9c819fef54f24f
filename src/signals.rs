/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) or SIGTERM flips a watch channel; the supervisor loop
/// checks it at its sleep point each iteration and exits cleanly instead of
/// relying on an external force-kill.
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

pub struct SignalHandler {
    rx: watch::Receiver<bool>,
}

impl SignalHandler {
    /// Install SIGINT/SIGTERM handlers. Must be called from within the
    /// tokio runtime.
    pub fn install() -> Result<SignalHandler, std::io::Error> {
        let (tx, rx) = watch::channel(false);
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
            let _ = tx.send(true);
        });

        Ok(SignalHandler { rx })
    }

    /// A receiver that resolves once shutdown has been requested.
    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

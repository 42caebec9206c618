use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Handle to control and join the keep-on-track daemon.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    interval: Duration,
}

impl HeartbeatHandle {
    /// Spawn a thread that calls `tick` every `interval`, first after one interval.
    pub fn spawn<F>(name: &str, interval: Duration, tick: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || heartbeat_loop(thread_name, interval, shutdown_rx, tick))?;

        Ok(Self {
            shutdown: shutdown_tx,
            join: Some(join),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Request shutdown and wait for the daemon to stop.
    pub fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.thread().id() != thread::current().id() {
                let _ = j.join();
            }
        }
    }
}

fn heartbeat_loop<F: Fn()>(name: String, interval: Duration, shutdown_rx: mpsc::Receiver<()>, tick: F) {
    debug!(daemon = %name, ?interval, "heartbeat started");

    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => tick(),
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(daemon = %name, "heartbeat stopped");
}

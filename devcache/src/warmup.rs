//! Background re-transform of URLs answered with 304.
//!
//! The middleware hands a URL to [`WarmupHandle::schedule`] right after it
//! decides to short-circuit. A single worker task drains the queue and calls
//! [`DevServer::transform_request`]. Completion is reported per request
//! through a [`WarmupTicket`] and globally through [`WarmupEvent`]s, never by
//! waiting a fixed amount of time. The worker stops when
//! [`WarmupWorker::shutdown`] is called, dropping whatever is still queued.

use crate::{
    error::ServerError,
    server::{DevServer, TransformOptions},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

const EVENTS_CAPACITY: usize = 64;

/// Emitted by the worker after each warm-up attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupEvent {
    Completed { url: String },
    Failed { url: String, error: String },
}

/// Why a warm-up was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WarmupRejected {
    #[error("warm-up for this url is already pending")]
    InFlight,
    #[error("warm-up queue is full")]
    QueueFull,
    #[error("warm-up worker is stopped")]
    Stopped,
}

struct WarmupRequest {
    url: String,
    options: TransformOptions,
    done: oneshot::Sender<Result<(), ServerError>>,
}

/// Resolves once the scheduled transform finished.
#[derive(Debug)]
pub struct WarmupTicket {
    done: oneshot::Receiver<Result<(), ServerError>>,
}

impl WarmupTicket {
    /// Wait for the transform. A worker stopped before reaching the request
    /// reports [`ServerError::Closed`].
    pub async fn wait(self) -> Result<(), ServerError> {
        self.done.await.unwrap_or(Err(ServerError::Closed))
    }
}

/// Cloneable producer side of the warm-up queue.
#[derive(Clone)]
pub struct WarmupHandle {
    tx: mpsc::Sender<WarmupRequest>,
    events: broadcast::Sender<WarmupEvent>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WarmupHandle {
    /// Queue a re-transform of `url`. Requests for a URL that is already
    /// queued or running are coalesced into the pending one.
    pub fn schedule(
        &self,
        url: &str,
        options: TransformOptions,
    ) -> Result<WarmupTicket, WarmupRejected> {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| WarmupRejected::Stopped)?;
            if !in_flight.insert(url.to_string()) {
                debug!(url, "warm-up already pending");
                return Err(WarmupRejected::InFlight);
            }
        }

        let (done, done_rx) = oneshot::channel();
        let request = WarmupRequest {
            url: url.to_string(),
            options,
            done,
        };
        match self.tx.try_send(request) {
            Ok(()) => {
                debug!(url, html = options.html, "warm-up scheduled");
                Ok(WarmupTicket { done: done_rx })
            }
            Err(err) => {
                release(&self.in_flight, url);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(url, "warm-up queue full, dropping request");
                        Err(WarmupRejected::QueueFull)
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Err(WarmupRejected::Stopped)
                    }
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WarmupEvent> {
        self.events.subscribe()
    }

    /// Whether `url` is queued or being transformed.
    pub fn is_pending(&self, url: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(url))
            .unwrap_or(false)
    }
}

/// Owner of the worker task.
pub struct WarmupWorker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WarmupWorker {
    /// Stop the worker and wait for it to exit. A transform already running
    /// is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            warn!(?err, "warm-up worker ended abnormally");
        }
    }
}

/// Spawn the warm-up worker for `server` with a queue of `capacity` requests.
pub fn spawn_warmup_worker<D: DevServer>(
    server: Arc<D>,
    capacity: usize,
) -> (WarmupHandle, WarmupWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (events, _) = broadcast::channel(EVENTS_CAPACITY);
    let (stop, stop_rx) = watch::channel(false);
    let in_flight = Arc::new(Mutex::new(HashSet::new()));

    let handle = tokio::spawn(worker_loop(
        server,
        rx,
        stop_rx,
        events.clone(),
        in_flight.clone(),
    ));

    (
        WarmupHandle {
            tx,
            events,
            in_flight,
        },
        WarmupWorker { stop, handle },
    )
}

#[instrument(skip_all)]
async fn worker_loop<D: DevServer>(
    server: Arc<D>,
    mut rx: mpsc::Receiver<WarmupRequest>,
    mut stop_rx: watch::Receiver<bool>,
    events: broadcast::Sender<WarmupEvent>,
    in_flight: Arc<Mutex<HashSet<String>>>,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("warm-up worker stopping");
                    break;
                }
            }
            request = rx.recv() => {
                let Some(request) = request else {
                    debug!("warm-up queue closed");
                    break;
                };
                let WarmupRequest { url, options, done } = request;
                let result = server.transform_request(&url, options).await;
                release(&in_flight, &url);

                let outcome = match result {
                    Ok(_) => {
                        debug!(url, "warm-up completed");
                        let _ = events.send(WarmupEvent::Completed { url });
                        Ok(())
                    }
                    Err(err) => {
                        warn!(url, %err, "warm-up failed");
                        let _ = events.send(WarmupEvent::Failed {
                            url,
                            error: err.to_string(),
                        });
                        Err(err)
                    }
                };
                let _ = done.send(outcome);
            }
        }
    }

    rx.close();
    while let Ok(request) = rx.try_recv() {
        release(&in_flight, &request.url);
    }
}

fn release(in_flight: &Mutex<HashSet<String>>, url: &str) {
    if let Ok(mut set) = in_flight.lock() {
        set.remove(url);
    }
}

use crate::prelude::*;
use crate::error::Result;

use {
    async_trait::async_trait,
    futures::future::{BoxFuture, FutureExt, Shared},
    std::sync::Mutex,
    tokio::task::AbortHandle,
};

/// Produces one fresh snapshot per call.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self) -> Result<Snapshot>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The link failed; the next poll reconnects first.
    Transport,
    /// The device answered but nothing could be decoded.
    NoData,
    Other,
}

impl FailureKind {
    pub fn classify(err: &Error) -> Self {
        match err {
            e if e.is_connection() => FailureKind::Transport,
            Error::NoData => FailureKind::NoData,
            _ => FailureKind::Other,
        }
    }
}

type PollResult = Result<Arc<Snapshot>>;

struct InFlight {
    generation: u64,
    poll: Shared<BoxFuture<'static, PollResult>>,
    abort: AbortHandle,
}

#[derive(Default)]
struct State {
    latest: Option<Arc<Snapshot>>,
    last_success: bool,
    last_error: Option<Error>,
    in_flight: Option<InFlight>,
    generation: u64,
}

struct Inner {
    name: String,
    poller: Arc<dyn Poller>,
    state: Mutex<State>,
    sender: broadcast::Sender<Arc<Snapshot>>,
}

/// Owns the latest snapshot of one device.
///
/// `refresh()` polls the device. Calls arriving while a poll is running wait
/// for that poll instead of starting another. A failed poll leaves the
/// previous snapshot in place and records why it failed.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(name: &str, poller: Arc<dyn Poller>) -> Self {
        let (sender, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                poller,
                state: Mutex::new(State::default()),
                sender,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Polls the device, or joins the poll already running.
    ///
    /// The poll runs as its own task: dropping the returned future does not
    /// stop it, and its result still lands in `latest()`.
    pub async fn refresh(&self) -> PollResult {
        let poll = {
            let mut state = self.inner.lock();
            match &state.in_flight {
                Some(in_flight) => {
                    debug!("{}: joining poll in progress", self.inner.name);
                    in_flight.poll.clone()
                }
                None => {
                    state.generation += 1;
                    let generation = state.generation;

                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move { inner.poll(generation).await });
                    let abort = task.abort_handle();

                    let weak = Arc::downgrade(&self.inner);
                    let poll = task
                        .map(move |joined| match joined {
                            Ok(result) => result,
                            Err(e) => {
                                // a task that never reached the end could not clear itself
                                if let Some(inner) = weak.upgrade() {
                                    inner.lock().finish(generation);
                                }
                                if e.is_cancelled() {
                                    Err(Error::Closed)
                                } else {
                                    Err(Error::protocol(format!("poll task failed: {}", e)))
                                }
                            }
                        })
                        .boxed()
                        .shared();

                    state.in_flight = Some(InFlight {
                        generation,
                        poll: poll.clone(),
                        abort,
                    });
                    poll
                }
            }
        };

        poll.await
    }

    /// Aborts the poll in progress, if any. Callers waiting on it get
    /// [`Error::Closed`]; `latest()` is left alone.
    pub fn cancel(&self) {
        if let Some(in_flight) = self.inner.lock().in_flight.take() {
            debug!("{}: aborting poll in progress", self.inner.name);
            in_flight.abort.abort();
        }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().latest.clone()
    }

    pub fn last_success(&self) -> bool {
        self.inner.lock().last_success
    }

    pub fn last_error(&self) -> Option<Error> {
        self.inner.lock().last_error.clone()
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        self.inner.lock().last_error.as_ref().map(FailureKind::classify)
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    /// Every successful poll is sent to subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.inner.sender.subscribe()
    }
}

impl State {
    /// Clears the in-flight slot unless a newer poll already took it.
    fn finish(&mut self, generation: u64) {
        if self.in_flight.as_ref().map(|f| f.generation) == Some(generation) {
            self.in_flight = None;
        }
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn poll(&self, generation: u64) -> PollResult {
        let result = match self.poller.poll().await {
            Ok(snapshot) if snapshot.is_empty() => Err(Error::NoData),
            Ok(snapshot) => Ok(Arc::new(snapshot)),
            Err(e) => Err(e),
        };

        let mut state = self.lock();
        state.finish(generation);

        match &result {
            Ok(snapshot) => {
                debug!(
                    "{}: poll returned {} values, {} unavailable",
                    self.name,
                    snapshot.len(),
                    snapshot.unavailable.len()
                );
                state.latest = Some(snapshot.clone());
                state.last_success = true;
                state.last_error = None;
                // no subscribers is fine
                let _ = self.sender.send(snapshot.clone());
            }
            Err(e) => {
                warn!(
                    "{}: poll failed ({:?}): {}",
                    self.name,
                    FailureKind::classify(e),
                    e
                );
                state.last_success = false;
                state.last_error = Some(e.clone());
            }
        }

        result
    }
}

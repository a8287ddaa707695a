//! Open-loop shutter control.
//!
//! A shutter has no position sensor. Its position is dead-reckoned from the
//! time its relays are energized, using the configured time to travel the full
//! range. Every move runs as one task under its own cancellation token; a new
//! command cancels the running move and waits for it to wind down before
//! starting, so a shutter never has two moves in flight.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::relay::{Activation, Relay};
use crate::{Error, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Open,
    Closed,
    Opening,
    Closing,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Open => "open",
            State::Closed => "closed",
            State::Opening => "opening",
            State::Closing => "closing",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives `(state, position)` after every observable change.
pub type UpdateHandler = Arc<dyn Fn(State, i32) + Send + Sync>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Status {
    state: State,
    position: i32,
}

struct Operation {
    scope: CancellationToken,
    task: JoinHandle<()>,
}

impl Operation {
    async fn cancel(self, name: &str) {
        self.scope.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(shutter = %name, "move task panicked");
            }
        }
    }
}

/// A shutter driven by an up relay and a down relay.
#[derive(Clone)]
pub struct ShutterController {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    up: Arc<dyn Relay>,
    down: Arc<dyn Relay>,
    full_open: i32,
    full_close: i32,
    time_to_close: Duration,
    status: Mutex<Status>,
    handler: Mutex<Option<UpdateHandler>>,
    active: tokio::sync::Mutex<Option<Operation>>,
}

impl ShutterController {
    /// A shutter resting at `full_close`, in state [`State::Closed`].
    pub fn new(
        name: impl Into<String>,
        up: Arc<dyn Relay>,
        down: Arc<dyn Relay>,
        full_open: i32,
        full_close: i32,
        time_to_close: Duration,
    ) -> Result<Self> {
        let name = name.into();
        if full_open == full_close {
            return Err(Error::InvalidRange(name));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                up,
                down,
                full_open,
                full_close,
                time_to_close,
                status: Mutex::new(Status {
                    state: State::Closed,
                    position: full_close,
                }),
                handler: Mutex::new(None),
                active: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn full_open_position(&self) -> i32 {
        self.inner.full_open
    }

    pub fn full_close_position(&self) -> i32 {
        self.inner.full_close
    }

    pub fn position(&self) -> i32 {
        self.inner.status().position
    }

    pub fn state(&self) -> State {
        self.inner.status().state
    }

    /// Register the update listener, replacing any previous one.
    pub fn on_update(&self, handler: impl Fn(State, i32) + Send + Sync + 'static) {
        *self.inner.handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    pub async fn open(&self, scope: &CancellationToken) -> Result<()> {
        info!(shutter = %self.inner.name, "open");
        self.set_position(scope, self.inner.full_open).await
    }

    pub async fn close(&self, scope: &CancellationToken) -> Result<()> {
        info!(shutter = %self.inner.name, "close");
        self.set_position(scope, self.inner.full_close).await
    }

    /// Start moving toward `target` and return without waiting for the move.
    ///
    /// Any move in flight is canceled first. Progress is reported through the
    /// update listener and [`position`](Self::position) / [`state`](Self::state).
    pub async fn set_position(&self, scope: &CancellationToken, target: i32) -> Result<()> {
        info!(shutter = %self.inner.name, target, "set position");
        self.inner.check_range(target)?;

        let mut active = self.inner.active.lock().await;
        if let Some(previous) = active.take() {
            debug!(shutter = %self.inner.name, "found previous operation, cancel");
            previous.cancel(&self.inner.name).await;
        }

        let current = self.position();
        if current == target {
            debug!(shutter = %self.inner.name, position = target, "already on position");
            return Ok(());
        }

        let (relay, state) = if self.inner.toward_open(current, target) {
            (self.inner.up.clone(), State::Opening)
        } else {
            (self.inner.down.clone(), State::Closing)
        };
        let duration = self.inner.travel_time(current, target);
        debug!(shutter = %self.inner.name, from = current, to = target, ?duration, "move");

        self.inner.update(|s| s.state = state);

        let scope = scope.child_token();
        let task = tokio::spawn(self.inner.clone().run(scope.clone(), relay, target, duration));
        *active = Some(Operation { scope, task });

        Ok(())
    }

    /// Cancel the move in flight, if any, and settle on the estimated position.
    pub async fn stop(&self, _scope: &CancellationToken) -> Result<()> {
        info!(shutter = %self.inner.name, "stop");

        let mut active = self.inner.active.lock().await;
        if let Some(operation) = active.take() {
            operation.cancel(&self.inner.name).await;
        }

        let inner = &self.inner;
        inner.update(|s| s.state = inner.resting_state(s.position));
        Ok(())
    }

    /// Overwrite the estimated position without moving, e.g. with a value
    /// persisted before a restart. A move in flight is canceled first.
    pub async fn reset_position(&self, position: i32) -> Result<()> {
        self.inner.check_range(position)?;

        let mut active = self.inner.active.lock().await;
        if let Some(operation) = active.take() {
            debug!(shutter = %self.inner.name, "found previous operation, cancel");
            operation.cancel(&self.inner.name).await;
        }

        let state = {
            let mut status = self.inner.status();
            status.position = position;
            status.state = self.inner.resting_state(position);
            status.state
        };
        info!(shutter = %self.inner.name, position, %state, "position reset");

        Ok(())
    }
}

impl Inner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_range(&self, target: i32) -> Result<()> {
        let low = self.full_open.min(self.full_close);
        let high = self.full_open.max(self.full_close);
        if target < low || target > high {
            return Err(Error::OutOfRange {
                name: self.name.clone(),
                target,
                open: self.full_open,
                close: self.full_close,
            });
        }
        Ok(())
    }

    fn span(&self) -> u32 {
        self.full_open.abs_diff(self.full_close)
    }

    fn toward_open(&self, from: i32, to: i32) -> bool {
        (to > from) == (self.full_open > self.full_close)
    }

    fn travel_time(&self, from: i32, to: i32) -> Duration {
        let (distance, span) = (from.abs_diff(to), self.span());
        match self.time_to_close.checked_mul(distance) {
            Some(total) => total / span,
            None => self.time_to_close / span * distance,
        }
    }

    /// Time to travel one position unit.
    fn tick(&self) -> Duration {
        (self.time_to_close / self.span()).max(Duration::from_millis(1))
    }

    fn resting_state(&self, position: i32) -> State {
        if position == self.full_close {
            State::Closed
        } else {
            State::Open
        }
    }

    fn update(&self, change: impl FnOnce(&mut Status)) -> Status {
        let status = {
            let mut status = self.status();
            change(&mut status);
            *status
        };
        self.notify(status);
        status
    }

    fn notify(&self, status: Status) {
        let handler = self.handler.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(handler) = handler {
            handler(status.state, status.position);
        }
    }

    async fn run(
        self: Arc<Self>,
        scope: CancellationToken,
        relay: Arc<dyn Relay>,
        target: i32,
        duration: Duration,
    ) {
        let estimating = scope.child_token();
        let activation = async {
            let result = relay.enable_for(&scope, duration).await;
            estimating.cancel();
            result
        };

        let (result, ()) = tokio::join!(activation, self.estimate(&estimating, target));

        match result {
            Ok(Activation::Completed) => {
                let status = self.update(|s| {
                    s.position = target;
                    s.state = self.resting_state(target);
                });
                info!(
                    shutter = %self.name,
                    state = %status.state,
                    position = status.position,
                    "updated"
                );
            }
            Ok(Activation::Canceled) => {
                info!(shutter = %self.name, target, "set position canceled");
            }
            Err(e) => {
                error!(shutter = %self.name, target, "enable relay error: {}", e);
            }
        }
    }

    /// Step the estimate one unit toward `target` every tick until `scope`
    /// ends. Never passes `target`.
    async fn estimate(&self, scope: &CancellationToken, target: i32) {
        let period = self.tick();
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            select! {
                biased;
                _ = scope.cancelled() => {
                    debug!(shutter = %self.name, "exit position calculation");
                    return;
                }
                _ = ticker.tick() => {
                    let stepped = {
                        let mut status = self.status();
                        let before = status.position;
                        status.position += match target.cmp(&before) {
                            Ordering::Greater => 1,
                            Ordering::Less => -1,
                            Ordering::Equal => 0,
                        };
                        (status.position != before).then(|| *status)
                    };

                    if let Some(status) = stepped {
                        trace!(shutter = %self.name, position = status.position, "position estimate");
                        self.notify(status);
                    }
                }
            }
        }
    }
}

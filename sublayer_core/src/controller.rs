// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The main composition controller.
//!
//! A [`Controller`] owns the layer registry, the main layer, the write-observer
//! subscription and the frame loop. Once started it runs two tokio tasks that
//! share one cancellation token:
//!
//! ```text
//!   delivery task                               recomposition task
//!   ─────────────                               ──────────────────
//!   loop {                                      loop {
//!     t = frame source                            report = pass reports
//!     if gate.take()  → flush                     log / trace
//!     if clock awaits → send_frame(t) ─ pass ─►  }
//!     if changed      → on_nodes_changed()      wait for delivery task
//!   }                                           teardown (close layers)
//! ```
//!
//! Every tick runs flush, then pass, then host notification, in that order.
//! Writes made during a pass arm the gate for the next tick.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──start──► Running ──close / source closed / abort──► ShuttingDown ──► Closed
//!     └──────────────────────────close──────────────────────────────────────────┘
//! ```

use core::fmt;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::ambient::AmbientContext;
use crate::clock::BroadcastFrameClock;
use crate::engine::{Engine, StateSystem, Subscription};
use crate::error::Error;
use crate::layer::{Layer, LayerManager, NodeHooks};
use crate::node::TreeNode;
use crate::scheduler::{ApplyGate, LayerFailurePolicy, PassReport, RecomposeScheduler};
use crate::sync::lock;
use crate::time::HostTime;
use crate::timing::{FrameSource, FrameTiming};
use crate::trace::{FrameTickEvent, PhaseKind, Tracer};

/// Host callback invoked once per tick in which nodes changed.
pub type NodesChanged = Arc<dyn Fn() + Send + Sync>;

/// Host transform applied to the main layer's content before it is set.
pub type ContentWrapper<C> = Arc<dyn Fn(C) -> C + Send + Sync>;

/// Controller configuration.
pub struct ControllerConfig<C> {
    /// Where frame timestamps come from.
    pub timing: FrameTiming,
    /// What a pass does when a layer fails to recompose.
    pub failure_policy: LayerFailurePolicy,
    /// Values visible to every composition. The layer manager is provided on
    /// top of these.
    pub ambient: AmbientContext,
    /// Called after a tick whose pass changed the tree structurally.
    pub on_nodes_changed: NodesChanged,
    /// Wraps the main layer's content, e.g. to provide ambient values.
    pub wrap_content: ContentWrapper<C>,
    /// Structured instrumentation.
    pub tracer: Tracer,
}

impl<C> Default for ControllerConfig<C> {
    fn default() -> Self {
        Self {
            timing: FrameTiming::default(),
            failure_policy: LayerFailurePolicy::default(),
            ambient: AmbientContext::root(),
            on_nodes_changed: Arc::new(|| {}),
            wrap_content: Arc::new(|content| content),
            tracer: Tracer::none(),
        }
    }
}

impl<C> ControllerConfig<C> {
    /// Uses the given frame timing.
    #[must_use]
    pub fn with_timing(mut self, timing: FrameTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Uses the given failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: LayerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the host's nodes-changed callback.
    #[must_use]
    pub fn with_nodes_changed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_nodes_changed = Arc::new(f);
        self
    }

    /// Sets the content wrapper.
    #[must_use]
    pub fn with_content_wrapper(mut self, f: impl Fn(C) -> C + Send + Sync + 'static) -> Self {
        self.wrap_content = Arc::new(f);
        self
    }
}

impl<C> fmt::Debug for ControllerConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("timing", &self.timing)
            .field("failure_policy", &self.failure_policy)
            .field("ambient", &self.ambient)
            .finish_non_exhaustive()
    }
}

/// Where a [`Controller`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Constructed, not started.
    Idle,
    /// Frame loop running.
    Running,
    /// Cancellation requested; teardown in progress.
    ShuttingDown,
    /// Fully torn down.
    Closed,
}

struct Launch {
    timing: FrameTiming,
    reports: mpsc::UnboundedReceiver<PassReport>,
}

struct Lifecycle {
    state: ControllerState,
    subscription: Option<Subscription>,
    /// Consumed by `start`.
    launch: Option<Launch>,
    recomposition: Option<JoinHandle<()>>,
}

struct Shared<N: TreeNode, E: Engine<N>> {
    manager: LayerManager<N, E>,
    main_layer: Layer<N, E>,
    state_system: Arc<dyn StateSystem>,
    clock: BroadcastFrameClock,
    gate: Arc<ApplyGate>,
    scheduler: Arc<RecomposeScheduler<N, E>>,
    token: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    on_nodes_changed: NodesChanged,
    wrap_content: ContentWrapper<E::Content>,
    frames: watch::Sender<u64>,
    closed: watch::Sender<bool>,
    tracer: Tracer,
}

/// Binds a reactive engine to a host node tree and drives it frame by frame.
pub struct Controller<N: TreeNode, E: Engine<N>> {
    shared: Arc<Shared<N, E>>,
}

impl<N: TreeNode, E: Engine<N>> Controller<N, E> {
    /// Creates an idle controller.
    ///
    /// Registers the write observer with `state_system` immediately, so
    /// writes made before [`start`](Self::start) are flushed on the first
    /// tick. The main layer is created with `config.ambient` plus this
    /// controller's layer manager as its parent context.
    pub fn new(
        engine: E,
        state_system: impl StateSystem,
        nodes: NodeHooks<N>,
        config: ControllerConfig<E::Content>,
    ) -> Self {
        let ControllerConfig {
            timing,
            failure_policy,
            ambient,
            on_nodes_changed,
            wrap_content,
            tracer,
        } = config;

        let clock = BroadcastFrameClock::new();
        let token = CancellationToken::new();
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let scheduler = RecomposeScheduler::new(
            clock.clone(),
            failure_policy,
            token.clone(),
            reports_tx,
            tracer.clone(),
        );
        let manager = LayerManager::new(
            Arc::new(engine),
            nodes,
            scheduler.invalidator(),
            tracer.clone(),
        );
        scheduler.attach(&manager);

        let state_system: Arc<dyn StateSystem> = Arc::new(state_system);
        let gate = Arc::new(ApplyGate::new());
        let observer_gate = gate.clone();
        let subscription = state_system.register_write_observer(Arc::new(move || {
            observer_gate.schedule();
        }));

        let main_layer = manager.create_layer(&manager.provide_to(&ambient));
        let (frames, _) = watch::channel(0);
        let (closed, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                manager,
                main_layer,
                state_system,
                clock,
                gate,
                scheduler,
                token,
                lifecycle: Mutex::new(Lifecycle {
                    state: ControllerState::Idle,
                    subscription: Some(subscription),
                    launch: Some(Launch { timing, reports }),
                    recomposition: None,
                }),
                on_nodes_changed,
                wrap_content,
                frames,
                closed,
                tracer,
            }),
        }
    }

    /// Starts the frame loop and sets the main layer's content.
    ///
    /// Does nothing if the controller is already running. Fails with
    /// [`Error::NoRuntime`] outside a tokio runtime and [`Error::Closed`] once
    /// the controller has been closed.
    pub fn start(&self, content: E::Content) -> Result<(), Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            match lifecycle.state {
                ControllerState::Idle => {}
                ControllerState::Running => return Ok(()),
                ControllerState::ShuttingDown | ControllerState::Closed => {
                    return Err(Error::Closed);
                }
            }
            let Some(launch) = lifecycle.launch.take() else {
                return Err(Error::Closed);
            };
            lifecycle.state = ControllerState::Running;
            let delivery = runtime.spawn(deliver_frames(self.shared.clone(), launch.timing));
            lifecycle.recomposition = Some(runtime.spawn(run_recomposition(
                self.shared.clone(),
                launch.reports,
                delivery,
            )));
        }
        debug!("controller started");
        self.shared
            .main_layer
            .set_content((self.shared.wrap_content)(content))
    }

    /// Stops the frame loop and tears everything down.
    ///
    /// Safe to call at any point and any number of times. On an idle
    /// controller the teardown happens immediately. On a running one this
    /// waits until both tasks have stopped and every layer is closed.
    pub async fn close(&self) {
        let (idle, task) = {
            let mut lifecycle = lock(&self.shared.lifecycle);
            (
                lifecycle.state == ControllerState::Idle,
                lifecycle.recomposition.take(),
            )
        };
        if idle {
            self.shared.teardown();
            return;
        }
        self.shared.token.cancel();
        let Some(task) = task else {
            // Another caller owns the task; wait for its teardown.
            let mut closed = self.shared.closed.subscribe();
            _ = closed.wait_for(|&closed| closed).await;
            return;
        };
        if let Err(err) = task.await {
            error!(error = %err, "recomposition task ended abnormally");
        }
        // Covers a task that died before reaching its own teardown.
        self.shared.teardown();
    }

    /// Requests shutdown without waiting for it.
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        lock(&self.shared.lifecycle).state
    }

    /// Returns `true` while the frame loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    /// Returns the layer registry.
    #[must_use]
    pub fn layers(&self) -> &LayerManager<N, E> {
        &self.shared.manager
    }

    /// Returns the main layer.
    #[must_use]
    pub fn main_layer(&self) -> &Layer<N, E> {
        &self.shared.main_layer
    }

    /// Returns the frame clock. Awaiting [`BroadcastFrameClock::with_frame`]
    /// on it runs work aligned with this controller's ticks.
    #[must_use]
    pub fn clock(&self) -> &BroadcastFrameClock {
        &self.shared.clock
    }

    /// Returns the write-coalescing gate.
    #[must_use]
    pub fn apply_gate(&self) -> &ApplyGate {
        &self.shared.gate
    }

    /// Returns a receiver of the index of the last completed tick.
    #[must_use]
    pub fn frames(&self) -> watch::Receiver<u64> {
        self.shared.frames.subscribe()
    }

    /// Returns the error that aborted recomposition, if any.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.shared.scheduler.failure()
    }
}

impl<N: TreeNode, E: Engine<N>> Drop for Controller<N, E> {
    fn drop(&mut self) {
        self.shared.token.cancel();
        if lock(&self.shared.lifecycle).state == ControllerState::Idle {
            self.shared.teardown();
        }
    }
}

impl<N: TreeNode, E: Engine<N>> fmt::Debug for Controller<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state())
            .field("layers", &self.shared.manager)
            .finish_non_exhaustive()
    }
}

impl<N: TreeNode, E: Engine<N>> Shared<N, E> {
    /// Runs one tick: flush, pass, host notification.
    fn tick(&self, frame_index: u64, time: HostTime) {
        trace!(frame = frame_index, ?time, "tick");
        self.tracer.frame_tick(&FrameTickEvent { frame_index, time });

        if self.gate.take() {
            self.tracer.phase_begin(frame_index, PhaseKind::Flush);
            self.state_system.send_apply_notifications();
            self.tracer.phase_end(frame_index, PhaseKind::Flush);
        }

        if self.clock.has_awaiters() {
            self.scheduler.begin_frame(frame_index);
            self.tracer.phase_begin(frame_index, PhaseKind::Recompose);
            self.clock.send_frame(time);
            self.tracer.phase_end(frame_index, PhaseKind::Recompose);
        }

        if self.scheduler.take_changed() {
            self.tracer.phase_begin(frame_index, PhaseKind::Notify);
            (self.on_nodes_changed)();
            self.tracer.nodes_changed(frame_index);
            self.tracer.phase_end(frame_index, PhaseKind::Notify);
        }

        self.frames.send_replace(frame_index);
    }

    /// Stops recomposition, disposes the write observer and closes every
    /// layer, main layer first.
    fn teardown(&self) {
        let subscription = {
            let mut lifecycle = lock(&self.lifecycle);
            if matches!(
                lifecycle.state,
                ControllerState::ShuttingDown | ControllerState::Closed
            ) {
                return;
            }
            lifecycle.state = ControllerState::ShuttingDown;
            lifecycle.launch = None;
            lifecycle.subscription.take()
        };
        self.token.cancel();
        if let Some(mut subscription) = subscription {
            subscription.dispose();
        }
        self.clock.cancel();
        if let Err(error) = self.main_layer.close() {
            debug!(%error, "main layer was already closed");
        }
        self.manager.close_all();
        lock(&self.lifecycle).state = ControllerState::Closed;
        self.closed.send_replace(true);
        debug!("controller closed");
    }
}

async fn deliver_frames<N: TreeNode, E: Engine<N>>(shared: Arc<Shared<N, E>>, timing: FrameTiming) {
    let mut source = FrameSource::new(timing);
    let mut last: Option<HostTime> = None;
    let mut frame_index = 0_u64;
    loop {
        let next = tokio::select! {
            biased;
            () = shared.token.cancelled() => break,
            next = source.next_frame() => next,
        };
        let Some(time) = next else {
            debug!("frame source closed; shutting down");
            shared.token.cancel();
            break;
        };
        if last.is_some_and(|previous| time <= previous) {
            warn!(?time, previous = ?last, "dropping non-monotonic frame timestamp");
            continue;
        }
        last = Some(time);
        frame_index += 1;
        shared.tick(frame_index, time);
    }
}

async fn run_recomposition<N: TreeNode, E: Engine<N>>(
    shared: Arc<Shared<N, E>>,
    mut reports: mpsc::UnboundedReceiver<PassReport>,
    delivery: JoinHandle<()>,
) {
    loop {
        tokio::select! {
            biased;
            () = shared.token.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => log_pass(&report),
                None => break,
            },
        }
    }
    if let Err(err) = delivery.await {
        error!(error = %err, "frame delivery task ended abnormally");
    }
    while let Ok(report) = reports.try_recv() {
        log_pass(&report);
    }
    if let Some(failure) = shared.scheduler.failure() {
        error!(error = %failure, "controller aborted by a recomposition failure");
    }
    shared.teardown();
}

fn log_pass(report: &PassReport) {
    if report.recomposed_layers > 0 {
        debug!(
            frame = report.frame_index,
            layers = report.recomposed_layers,
            changes = report.changes,
            "applied recomposition"
        );
    }
}

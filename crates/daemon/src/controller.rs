//! Hosts one floating window and drives the transition coordinator.
//!
//! The controller owns the transition state machine and gives the core its
//! collaborators: a queued bounds scheduler, the compositor surface, the
//! in-process transition player and the display layout. All methods run on
//! the daemon event loop; anything the core asks for is queued and handled by
//! [`PipController::run_scheduled`] after the current event.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use openpip_core_transition::{
    BoundsScheduler, Change, ChangeMode, DisplayChangeObserver, DisplayId, DisplayTransferHandler,
    PipBoundsState, PipState, Rect, StatePayload, Transaction, TransitionInfo, TransitionState,
    TransitionToken, WindowId, WindowingMode,
};
use openpip_ipc::{DisplayInfo, IpcCommand, IpcRect, IpcResponse, PendingTransfer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, PipConfig};
use crate::layout::{self, DisplayError, DisplayLayout};
use crate::player::TransitionPlayer;
use crate::surface::{PipSurface, SurfaceTransaction};

/// Container id of the floating window in transition change records.
const PIP_CONTAINER: WindowId = 1;

/// Display containers are numbered from here by display id.
const DISPLAY_CONTAINER_BASE: WindowId = 1000;

/// Work requested by the core, handled outside of listener dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerRequest {
    MoveToDisplay { origin: DisplayId, target: DisplayId },
    FinishResize { destination: Rect },
}

/// [`BoundsScheduler`] that only records requests.
#[derive(Debug, Default)]
pub struct QueuedScheduler {
    queue: RefCell<VecDeque<SchedulerRequest>>,
}

impl QueuedScheduler {
    fn pop(&self) -> Option<SchedulerRequest> {
        self.queue.borrow_mut().pop_front()
    }
}

impl BoundsScheduler for QueuedScheduler {
    fn schedule_move_to_display(&self, origin: DisplayId, target: DisplayId) {
        self.queue
            .borrow_mut()
            .push_back(SchedulerRequest::MoveToDisplay { origin, target });
    }

    fn schedule_finish_resize_pip(&self, destination: Rect) {
        self.queue
            .borrow_mut()
            .push_back(SchedulerRequest::FinishResize { destination });
    }
}

/// Timers the event loop should arm on behalf of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Call [`PipController::step_transition`] shortly.
    TransitionStep,
    /// Call [`PipController::on_transfer_timeout`] once the transfer timeout
    /// has elapsed.
    TransferTimeout { id: u64 },
}

/// Reasons a command was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Floating window is not shown (state: {0})")]
    NotInPip(PipState),

    #[error("Floating window is already shown")]
    AlreadyInPip,

    #[error("Floating window is busy (state: {0})")]
    Busy(PipState),

    #[error("Floating window is already on display {0}")]
    AlreadyOnDisplay(DisplayId),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

pub struct PipController {
    pip_config: PipConfig,
    transfer_timeout_enabled: bool,
    state: Rc<TransitionState>,
    bounds: Rc<PipBoundsState>,
    surface: Rc<PipSurface>,
    scheduler: Rc<QueuedScheduler>,
    handler: Rc<DisplayTransferHandler>,
    observer: Rc<DisplayChangeObserver>,
    player: TransitionPlayer,
    layout: DisplayLayout,
    /// Where queued display changes leave the floating window.
    pip_destination: Option<(DisplayId, Rect)>,
    wakeups: Vec<Wakeup>,
    step_armed: bool,
}

impl PipController {
    pub fn new(config: &Config) -> Self {
        let layout = DisplayLayout::from_config(&config.displays);
        let display_id = config
            .pip
            .initial_display
            .filter(|id| layout.contains(*id))
            .or_else(|| layout.primary().map(|d| d.id))
            .unwrap_or_default();
        let initial = layout
            .get(display_id)
            .map(|d| initial_pip_bounds(&config.pip, &d.rect))
            .unwrap_or_default();

        let state = Rc::new(TransitionState::new());
        let bounds = Rc::new(PipBoundsState::new(initial, display_id));
        let scheduler = Rc::new(QueuedScheduler::default());
        let handler = DisplayTransferHandler::new(&state, scheduler.clone());
        let observer = DisplayChangeObserver::new(&state, Rc::clone(&bounds));
        let player = TransitionPlayer::new();
        observer.register(&player);

        Self {
            pip_config: config.pip.clone(),
            transfer_timeout_enabled: config.transfer.timeout_ms > 0,
            state,
            bounds,
            surface: PipSurface::new(),
            scheduler,
            handler,
            observer,
            player,
            layout,
            pip_destination: None,
            wakeups: Vec::new(),
            step_armed: false,
        }
    }

    pub fn state(&self) -> &Rc<TransitionState> {
        &self.state
    }

    pub fn bounds(&self) -> &PipBoundsState {
        &self.bounds
    }

    #[cfg(test)]
    pub fn surface(&self) -> &PipSurface {
        &self.surface
    }

    pub fn layout(&self) -> &DisplayLayout {
        &self.layout
    }

    #[cfg(test)]
    pub fn handler(&self) -> &DisplayTransferHandler {
        &self.handler
    }

    /// Execute an IPC command. `Stop` only acknowledges; shutting down is
    /// up to the caller.
    pub fn handle_command(&mut self, cmd: IpcCommand) -> IpcResponse {
        let result = match cmd {
            IpcCommand::MoveToDisplay { target } => self.move_to_display(target),
            IpcCommand::AttachDisplay { id, name, rect } => {
                self.attach_display(id, name, from_ipc_rect(rect))
            }
            IpcCommand::DetachDisplay { id } => self.detach_display(id),
            IpcCommand::EnterPip { display } => self.enter_pip(display),
            IpcCommand::ExitPip => self.exit_pip(),
            IpcCommand::QueryState => return self.query_state(),
            IpcCommand::QueryDisplays => return self.query_displays(),
            IpcCommand::Stop => Ok(()),
        };

        match result {
            Ok(()) => IpcResponse::Ok,
            Err(e) => {
                warn!("Command refused: {}", e);
                IpcResponse::error(e.to_string())
            }
        }
    }

    /// Start an explicit move of the floating window to `target`.
    pub fn move_to_display(&mut self, target: DisplayId) -> Result<(), CommandError> {
        let current = self.state.state();
        if !self.state.is_in_pip() {
            return Err(CommandError::NotInPip(current));
        }
        if !self.layout.contains(target) {
            return Err(DisplayError::Unknown(target).into());
        }
        let origin = self.bounds.display_id();
        if origin == target {
            return Err(CommandError::AlreadyOnDisplay(target));
        }
        if !self.state.is_pip_state_idle() {
            return Err(CommandError::Busy(current));
        }

        self.handler.schedule_move_to_display(origin, target);
        if self.transfer_timeout_enabled {
            if let Some(request) = self.handler.pending_transfer() {
                self.wakeups.push(Wakeup::TransferTimeout { id: request.id });
            }
        }
        Ok(())
    }

    pub fn attach_display(
        &mut self,
        id: DisplayId,
        name: String,
        rect: Rect,
    ) -> Result<(), CommandError> {
        let attached = self.layout.attach(id, name, rect)?;
        info!(id, name = %attached.name, ?rect, "Display attached");

        let info = TransitionInfo::new(ChangeMode::Change)
            .with_change(Change::display(display_container(id), id, rect));
        self.queue_transition(
            info,
            Box::new(SurfaceTransaction::keep(&self.surface)),
            Box::new(SurfaceTransaction::keep(&self.surface)),
        );
        Ok(())
    }

    /// Remove a display. If it hosts the floating window, the window moves
    /// to the primary display as part of the same transition.
    pub fn detach_display(&mut self, id: DisplayId) -> Result<(), CommandError> {
        let removed = self.layout.detach(id)?;
        info!(id, name = %removed.name, "Display detached");

        let mut info = TransitionInfo::new(ChangeMode::Change);
        let mut finish: Box<dyn Transaction> = Box::new(SurfaceTransaction::keep(&self.surface));

        let (host, start) = self
            .pip_destination
            .unwrap_or_else(|| (self.bounds.display_id(), self.bounds.bounds()));
        let hosts_pip = host == id && self.state.is_in_pip();
        if let Some(primary) = self.layout.primary().filter(|_| hosts_pip) {
            let end = layout::relocate(start, &removed.rect, &primary.rect);
            debug!(from = id, to = primary.id, ?end, "Floating window follows detached display");
            info.add_change(
                Change::new(PIP_CONTAINER, ChangeMode::Change)
                    .with_windowing_mode(WindowingMode::Pinned)
                    .with_bounds(start, end)
                    .with_displays(id, primary.id),
            );
            finish = Box::new(SurfaceTransaction::place(&self.surface, end, primary.id));
            self.pip_destination = Some((primary.id, end));
        }
        info.add_change(Change::display(display_container(id), id, removed.rect));

        self.queue_transition(
            info,
            Box::new(SurfaceTransaction::keep(&self.surface)),
            finish,
        );
        Ok(())
    }

    /// Show the floating window on `display`, or on the configured initial
    /// display.
    pub fn enter_pip(&mut self, display: Option<DisplayId>) -> Result<(), CommandError> {
        if self.state.is_in_pip() {
            return Err(CommandError::AlreadyInPip);
        }
        let id = display
            .or(self.pip_config.initial_display)
            .filter(|id| self.layout.contains(*id))
            .or_else(|| self.layout.primary().map(|d| d.id));
        let Some(target) = id.and_then(|id| self.layout.get(id)) else {
            return Err(DisplayError::Unknown(display.unwrap_or_default()).into());
        };
        if let Some(requested) = display {
            if requested != target.id {
                return Err(DisplayError::Unknown(requested).into());
            }
        }
        let (target_id, bounds) = (target.id, initial_pip_bounds(&self.pip_config, &target.rect));

        self.state.set_state(PipState::EnteringPip, None);
        self.pip_destination = None;
        self.bounds.set_bounds(bounds);
        self.bounds.set_display_id(target_id);
        Box::new(SurfaceTransaction::show(&self.surface, bounds, target_id)).apply();
        self.state.set_state(PipState::Idle, None);
        info!(display = target_id, ?bounds, "Entered PiP");
        Ok(())
    }

    pub fn exit_pip(&mut self) -> Result<(), CommandError> {
        if !self.state.is_in_pip() {
            return Err(CommandError::NotInPip(self.state.state()));
        }
        self.handler.cancel_pending_transfer();
        self.state.set_state(PipState::ExitingPip, None);
        Box::new(SurfaceTransaction::hide(&self.surface)).apply();
        self.state.set_state(PipState::ExitedPip, None);
        info!(visible = self.surface.is_visible(), "Exited PiP");
        Ok(())
    }

    pub fn query_state(&self) -> IpcResponse {
        IpcResponse::PipState {
            state: self.state.state().as_str().to_string(),
            display_id: self.bounds.display_id(),
            bounds: to_ipc_rect(self.bounds.bounds()),
            pending_transfer: self.handler.pending_transfer().map(|r| PendingTransfer {
                id: r.id,
                origin: r.origin,
                target: r.target,
            }),
            display_change_scheduled: self.state.is_display_change_scheduled(),
            tracked_transitions: self.observer.tracked_transition_count(),
        }
    }

    pub fn query_displays(&self) -> IpcResponse {
        let host = self.state.is_in_pip().then(|| self.bounds.display_id());
        IpcResponse::DisplayList {
            displays: self
                .layout
                .iter()
                .map(|d| DisplayInfo {
                    id: d.id,
                    name: d.name.clone(),
                    rect: to_ipc_rect(d.rect),
                    primary: d.primary,
                    hosts_pip: host == Some(d.id),
                })
                .collect(),
        }
    }

    /// Handle everything the core queued on the scheduler, including requests
    /// queued while handling earlier ones.
    pub fn run_scheduled(&mut self) {
        while let Some(request) = self.scheduler.pop() {
            match request {
                SchedulerRequest::MoveToDisplay { origin, target } => {
                    self.perform_move(origin, target)
                }
                SchedulerRequest::FinishResize { destination } => self.finish_resize(destination),
            }
        }
    }

    /// Advance the transition player by one step. Returns true if more steps
    /// are pending.
    pub fn step_transition(&mut self) -> bool {
        self.step_armed = false;
        let more = self.player.step();
        self.settle();
        if more {
            self.arm_step();
        } else {
            self.pip_destination = None;
        }
        more
    }

    /// The transfer timeout for request `id` elapsed.
    pub fn on_transfer_timeout(&mut self, id: u64) {
        if !self.handler.expire_transfer(id) {
            return;
        }
        let waiting_for_move = self.state.state() == PipState::ScheduledBoundsChange
            && self
                .state
                .with_payload(|p| matches!(p, Some(StatePayload::MoveToDisplay { .. })));
        if waiting_for_move {
            self.state.set_state(PipState::Idle, None);
        }
    }

    /// Timers requested since the last call.
    pub fn take_wakeups(&mut self) -> Vec<Wakeup> {
        std::mem::take(&mut self.wakeups)
    }

    /// Abort running transitions, hide the window and detach the core
    /// components from each other.
    pub fn shutdown(&mut self) {
        debug!(
            playing = ?self.player.playing_token(),
            queued = self.player.queued_len(),
            "Aborting transitions"
        );
        self.player.abort_all();
        self.run_scheduled();
        if self.state.is_in_pip() {
            // Only fails when not in PiP.
            let _ = self.exit_pip();
        }
        self.observer.teardown(&self.player);
        self.handler.teardown();
        self.state.set_display_change_scheduled(false);
        self.pip_destination = None;
        debug!(
            listeners = self.state.listener_count(),
            observers = self.player.observer_count(),
            surface_commits = self.surface.commits(),
            "Controller shut down"
        );
    }

    fn queue_transition(
        &mut self,
        info: TransitionInfo,
        start: Box<dyn Transaction>,
        finish: Box<dyn Transaction>,
    ) -> TransitionToken {
        if info.has_display_change() {
            self.state.set_display_change_scheduled(true);
        }
        let token = self.player.request(info, start, finish);
        self.arm_step();
        token
    }

    fn arm_step(&mut self) {
        if !self.step_armed {
            self.step_armed = true;
            self.wakeups.push(Wakeup::TransitionStep);
        }
    }

    fn perform_move(&mut self, origin: DisplayId, target: DisplayId) {
        let current = self.handler.pending_transfer();
        if current.map(|r| (r.origin, r.target)) != Some((origin, target))
            || self.state.state() != PipState::ScheduledBoundsChange
        {
            debug!(origin, target, "Stale display transfer request, ignoring");
            return;
        }

        match self.transfer_destination(origin, target) {
            Ok(destination) => {
                debug!(origin, target, ?destination, "Display transfer transaction ready");
                let transaction = SurfaceTransaction::place(&self.surface, destination, target);
                self.state.set_state(
                    PipState::ChangingPipBounds,
                    Some(StatePayload::bounds_change(Box::new(transaction), destination)),
                );
            }
            Err(e) => {
                warn!(origin, target, "Declining display transfer: {}", e);
                self.handler.cancel_pending_transfer();
                self.state.set_state(PipState::Idle, None);
            }
        }
    }

    fn transfer_destination(&self, origin: DisplayId, target: DisplayId) -> Result<Rect, CommandError> {
        if !self.state.is_in_pip() {
            return Err(CommandError::NotInPip(self.state.state()));
        }
        let to = self
            .layout
            .get(target)
            .ok_or(DisplayError::Unknown(target))?;
        if self.bounds.display_id() == target {
            return Err(CommandError::AlreadyOnDisplay(target));
        }
        // The origin may have been detached meanwhile; keep the corner
        // offset relative to the target then.
        let from = self.layout.get(origin).map_or(to.rect, |d| d.rect);
        Ok(layout::relocate(self.bounds.bounds(), &from, &to.rect))
    }

    fn finish_resize(&mut self, destination: Rect) {
        let display_id = self
            .handler
            .pending_transfer()
            .map(|r| r.target)
            .or_else(|| self.layout.display_for(destination).map(|d| d.id))
            .unwrap_or_else(|| self.bounds.display_id());

        self.bounds.set_bounds(destination);
        self.bounds.set_display_id(display_id);
        self.state.set_state(PipState::ChangedPipBounds, None);
        self.settle();

        if let Some(done) = self.handler.cancel_pending_transfer() {
            info!(done.id, done.origin, done.target, "Display transfer complete");
        }
    }

    /// Return a settled bounds change to `Idle`, updating the host display
    /// from where the window ended up.
    fn settle(&mut self) {
        if self.state.state() != PipState::ChangedPipBounds {
            return;
        }
        match self.layout.display_for(self.bounds.bounds()) {
            Some(display) => self.bounds.set_display_id(display.id),
            None => self.rehome(),
        }
        debug!(
            bounds = ?self.bounds.bounds(),
            display = self.bounds.display_id(),
            surface = ?self.surface.bounds(),
            surface_display = self.surface.display_id(),
            "Bounds change settled"
        );
        self.state.set_state(PipState::Idle, None);
    }

    /// Put a window that ended up off every display back on one: where the
    /// queued display changes meant to leave it, or else the primary display.
    fn rehome(&mut self) {
        let destination = self
            .pip_destination
            .filter(|(id, _)| self.layout.contains(*id))
            .or_else(|| {
                self.layout
                    .primary()
                    .map(|p| (p.id, layout::fit_into(self.bounds.bounds(), &p.rect)))
            });
        let Some((display_id, bounds)) = destination else {
            return;
        };
        warn!(
            stale = ?self.bounds.bounds(),
            display = display_id,
            ?bounds,
            "Floating window is off every display, moving it"
        );
        self.bounds.set_bounds(bounds);
        self.bounds.set_display_id(display_id);
        Box::new(SurfaceTransaction::place(&self.surface, bounds, display_id)).apply();
    }
}

fn initial_pip_bounds(config: &PipConfig, display: &Rect) -> Rect {
    layout::initial_bounds(display, config.width, config.height, config.margin)
}

fn display_container(id: DisplayId) -> WindowId {
    DISPLAY_CONTAINER_BASE + WindowId::from(id)
}

fn to_ipc_rect(rect: Rect) -> IpcRect {
    IpcRect::new(rect.x, rect.y, rect.width, rect.height)
}

fn from_ipc_rect(rect: IpcRect) -> Rect {
    Rect::new(rect.x, rect.y, rect.width, rect.height)
}

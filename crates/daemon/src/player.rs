//! In-process transition engine.
//!
//! Plays queued transitions one at a time. Each transition takes three steps
//! (ready, starting, finished), one per call to [`TransitionPlayer::step`], so
//! the event loop can interleave other work between them. A display change
//! queued behind a playing display change is merged into it instead of
//! playing on its own.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use openpip_core_transition::{
    ObserverId, Transaction, TransitionEngine, TransitionInfo, TransitionObserver,
    TransitionToken,
};
use tracing::{debug, info};

struct Queued {
    token: TransitionToken,
    info: TransitionInfo,
    start: Box<dyn Transaction>,
    finish: Box<dyn Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Started,
}

struct Playing {
    token: TransitionToken,
    is_display_change: bool,
    phase: Phase,
    start: Option<Box<dyn Transaction>>,
    finish: Option<Box<dyn Transaction>>,
}

pub struct TransitionPlayer {
    observers: RefCell<Vec<(ObserverId, Rc<dyn TransitionObserver>)>>,
    next_observer_id: Cell<u64>,
    next_token: Cell<u64>,
    queue: RefCell<VecDeque<Queued>>,
    playing: RefCell<Option<Playing>>,
}

impl Default for TransitionPlayer {
    fn default() -> Self {
        Self {
            observers: RefCell::new(Vec::new()),
            next_observer_id: Cell::new(1),
            next_token: Cell::new(1),
            queue: RefCell::new(VecDeque::new()),
            playing: RefCell::new(None),
        }
    }
}

impl TransitionPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transition. `start` is applied when it starts, `finish` when
    /// it finishes or is merged.
    pub fn request(
        &self,
        info: TransitionInfo,
        start: Box<dyn Transaction>,
        finish: Box<dyn Transaction>,
    ) -> TransitionToken {
        let token = TransitionToken::new(self.next_token.get());
        self.next_token.set(token.id() + 1);
        debug!(%token, changes = info.changes.len(), "Transition queued");
        self.queue.borrow_mut().push_back(Queued {
            token,
            info,
            start,
            finish,
        });
        token
    }

    /// True if a transition is playing or queued.
    pub fn has_work(&self) -> bool {
        self.playing.borrow().is_some() || !self.queue.borrow().is_empty()
    }

    pub fn playing_token(&self) -> Option<TransitionToken> {
        self.playing.borrow().as_ref().map(|p| p.token)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Advance by one step. Returns true if more steps are pending.
    pub fn step(&self) -> bool {
        let current = self
            .playing
            .borrow()
            .as_ref()
            .map(|p| (p.token, p.phase, p.is_display_change));

        match current {
            None => self.ready_next(),
            Some((token, Phase::Ready, _)) => self.start(token),
            Some((token, Phase::Started, is_display_change)) => {
                if !(is_display_change && self.merge_next(token)) {
                    self.finish(token, false);
                }
            }
        }
        self.has_work()
    }

    /// Abort the playing transition and drop everything queued. Queued
    /// transitions were never reported ready, so observers hear nothing
    /// about them.
    pub fn abort_all(&self) {
        let dropped = self.queue.borrow_mut().drain(..).count();
        if dropped > 0 {
            debug!(dropped, "Dropped queued transitions");
        }
        if let Some(token) = self.playing_token() {
            self.finish(token, true);
        }
    }

    fn ready_next(&self) {
        let Some(next) = self.queue.borrow_mut().pop_front() else {
            return;
        };
        debug!(token = %next.token, "Transition ready");
        self.for_each_observer(|o| {
            o.on_transition_ready(next.token, &next.info, next.start.as_ref(), next.finish.as_ref())
        });
        *self.playing.borrow_mut() = Some(Playing {
            token: next.token,
            is_display_change: next.info.has_display_change(),
            phase: Phase::Ready,
            start: Some(next.start),
            finish: Some(next.finish),
        });
    }

    fn start(&self, token: TransitionToken) {
        let start = self.playing.borrow_mut().as_mut().and_then(|p| {
            p.phase = Phase::Started;
            p.start.take()
        });
        if let Some(start) = start {
            start.apply();
        }
        debug!(%token, "Transition starting");
        self.for_each_observer(|o| o.on_transition_starting(token));
    }

    /// Merge the next queued transition into `playing` if it is a display
    /// change too.
    fn merge_next(&self, playing: TransitionToken) -> bool {
        let merged = {
            let mut queue = self.queue.borrow_mut();
            match queue.front() {
                Some(next) if next.info.has_display_change() => queue.pop_front(),
                _ => None,
            }
        };
        let Some(merged) = merged else {
            return false;
        };

        info!(merged = %merged.token, %playing, "Merging display change into playing transition");
        self.for_each_observer(|o| {
            o.on_transition_ready(
                merged.token,
                &merged.info,
                merged.start.as_ref(),
                merged.finish.as_ref(),
            )
        });
        merged.start.apply();
        merged.finish.apply();
        self.for_each_observer(|o| o.on_transition_merged(merged.token, playing));
        true
    }

    fn finish(&self, token: TransitionToken, aborted: bool) {
        let Some(playing) = self.playing.borrow_mut().take() else {
            return;
        };
        if !aborted {
            if let Some(start) = playing.start {
                start.apply();
            }
            if let Some(finish) = playing.finish {
                finish.apply();
            }
        }
        debug!(%token, aborted, "Transition finished");
        self.for_each_observer(|o| o.on_transition_finished(token, aborted));
    }

    fn for_each_observer(&self, f: impl Fn(&dyn TransitionObserver)) {
        let observers: Vec<_> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, o)| Rc::clone(o))
            .collect();
        for observer in observers {
            f(observer.as_ref());
        }
    }
}

impl TransitionEngine for TransitionPlayer {
    fn register_observer(&self, observer: Rc<dyn TransitionObserver>) -> ObserverId {
        let id = ObserverId::new(self.next_observer_id.get());
        self.next_observer_id.set(self.next_observer_id.get() + 1);
        self.observers.borrow_mut().push((id, observer));
        id
    }

    fn unregister_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

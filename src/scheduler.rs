//! Backpressure between the capture loop and the inference stage.
//!
//! At most one job is in flight. With pipelining on, at most one more waits
//! in a single-slot mailbox; a newer submission overwrites it and the stale
//! one is handed back to the caller to recycle.

/// Where the inference stage stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Submitted,
}

/// What the caller must do with a submitted job.
#[derive(Debug, PartialEq)]
pub enum Submission<F> {
    /// Stage was idle: send this job now.
    Dispatch(F),
    /// Parked behind the in-flight job; `evicted` is the stale job it replaced.
    Queued { evicted: Option<F> },
    /// Pipelining is off and the stage is busy: the job comes straight back.
    Rejected(F),
}

#[derive(Debug)]
pub struct Scheduler<F> {
    state: SlotState,
    pending: Option<F>,
    pipelining: bool,
    dropped: u64,
}

impl<F> Scheduler<F> {
    pub fn new(pipelining: bool) -> Self {
        Self {
            state: SlotState::Idle,
            pending: None,
            pipelining,
            dropped: 0,
        }
    }

    pub fn submit(&mut self, job: F) -> Submission<F> {
        match self.state {
            SlotState::Idle => {
                self.state = SlotState::Submitted;
                Submission::Dispatch(job)
            }
            SlotState::Submitted if self.pipelining => {
                let evicted = self.pending.replace(job);
                if evicted.is_some() {
                    self.dropped += 1;
                }
                Submission::Queued { evicted }
            }
            SlotState::Submitted => {
                self.dropped += 1;
                Submission::Rejected(job)
            }
        }
    }

    /// The in-flight job finished. Returns the queued job, if any, which the
    /// caller must dispatch immediately; the stage then stays `Submitted`.
    pub fn on_complete(&mut self) -> Option<F> {
        if self.state == SlotState::Idle {
            tracing::warn!("Completion received with nothing in flight");
        }
        match self.pending.take() {
            Some(next) => {
                self.state = SlotState::Submitted;
                Some(next)
            }
            None => {
                self.state = SlotState::Idle;
                None
            }
        }
    }

    /// The stage went away: back to `Idle`, handing back any queued job.
    pub fn abandon(&mut self) -> Option<F> {
        self.state = SlotState::Idle;
        self.pending.take()
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn in_flight(&self) -> bool {
        self.state == SlotState::Submitted
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Jobs held between submission and completion: in flight plus queued.
    pub fn buffered(&self) -> usize {
        usize::from(self.in_flight()) + usize::from(self.has_pending())
    }

    /// Jobs discarded by backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

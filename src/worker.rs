//! Inference worker thread and the producer-side handle that feeds it.
//!
//! The worker owns the recurrent session and the stabilizer, so hidden state
//! and stabilizer state are only ever touched from that one thread. Frames
//! move into the worker by value and come back inside the result for reuse.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::StabilizerConfig;
use crate::error::{InferenceError, MatteError};
use crate::frame::Frame;
use crate::refine;
use crate::scheduler::{Scheduler, Submission};
use crate::segmentation::{codec, AlphaMatte, MattingBackend, RecurrentSession};
use crate::stabilizer::TemporalStabilizer;
use crate::stats::PerformanceSample;

/// One frame plus the knob setting it should be processed with.
#[derive(Debug)]
pub struct InferenceJob {
    pub frame: Frame,
    pub downsample: f32,
}

#[derive(Debug)]
enum WorkerCommand {
    Run(InferenceJob),
    Reset,
    Shutdown,
}

/// Stabilized matte for one frame.
#[derive(Debug)]
pub struct MatteResult {
    pub seq: u64,
    pub matte: AlphaMatte,
    pub sample: PerformanceSample,
    /// The consumed frame, handed back for the buffer pool.
    pub frame: Frame,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Completed(MatteResult),
    Failed {
        seq: u64,
        error: InferenceError,
        frame: Frame,
    },
    ResetDone,
    /// A job the worker never received; its frame comes back for reuse.
    Abandoned(InferenceJob),
}

/// Per-worker processing options.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub stabilizer: StabilizerConfig,
    pub refine: bool,
    pub pipelining: bool,
}

struct Worker<B> {
    session: RecurrentSession<B>,
    stabilizer: TemporalStabilizer,
    refine: bool,
}

impl<B: MattingBackend> Worker<B> {
    fn run(mut self, commands: Receiver<WorkerCommand>, events: Sender<WorkerEvent>) {
        tracing::info!("Inference worker started ({})", self.session.backend_name());

        while let Ok(command) = commands.recv() {
            let event = match command {
                WorkerCommand::Run(job) => self.process(job),
                WorkerCommand::Reset => {
                    self.session.reset();
                    self.stabilizer.reset();
                    WorkerEvent::ResetDone
                }
                WorkerCommand::Shutdown => break,
            };
            if events.send(event).is_err() {
                break;
            }
        }

        tracing::info!("Inference worker stopped");
    }

    fn process(&mut self, job: InferenceJob) -> WorkerEvent {
        let InferenceJob { frame, downsample } = job;
        let seq = frame.seq();

        let start = Instant::now();
        let tensor = match codec::encode_frame(&frame) {
            Ok(tensor) => tensor,
            Err(err) => {
                tracing::error!("Frame {} does not match its dimensions: {}", seq, err);
                debug_assert!(false, "frame buffer and dimensions disagree: {err}");
                return WorkerEvent::Failed {
                    seq,
                    error: err.into(),
                    frame,
                }
            }
        };
        let encoded = Instant::now();

        let raw = match self.session.infer(tensor.view(), downsample) {
            Ok(matte) => matte,
            Err(error) => return WorkerEvent::Failed { seq, error, frame },
        };
        let inferred = Instant::now();

        let raw = if self.refine { refine::refine(&raw) } else { raw };
        let matte = self.stabilizer.apply(&raw);
        let done = Instant::now();

        let sample = PerformanceSample::from_durations(
            encoded - start,
            inferred - encoded,
            done - inferred,
        );
        WorkerEvent::Completed(MatteResult {
            seq,
            matte,
            sample,
            frame,
        })
    }
}

/// Producer-side end of the inference stage.
pub struct InferenceHandle {
    scheduler: Scheduler<InferenceJob>,
    commands: Sender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    thread: Option<thread::JoinHandle<()>>,
    backend: String,
    /// Jobs stranded by a dead worker, returned on the next poll or wait.
    abandoned: Vec<InferenceJob>,
}

impl InferenceHandle {
    pub fn spawn<B>(session: RecurrentSession<B>, options: WorkerOptions) -> Result<Self, MatteError>
    where
        B: MattingBackend + 'static,
    {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let backend = session.backend_name().to_string();

        let worker = Worker {
            session,
            stabilizer: TemporalStabilizer::new(options.stabilizer),
            refine: options.refine,
        };
        let thread = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || worker.run(command_rx, event_tx))?;

        Ok(Self {
            scheduler: Scheduler::new(options.pipelining),
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
            backend,
            abandoned: Vec::new(),
        })
    }

    /// Offer a job. Returns a job the caller should recycle: the stale one
    /// evicted from the mailbox, or this one if it was rejected.
    pub fn submit(&mut self, job: InferenceJob) -> Result<Option<InferenceJob>, MatteError> {
        match self.scheduler.submit(job) {
            Submission::Dispatch(job) => {
                self.dispatch(job)?;
                Ok(None)
            }
            Submission::Queued { evicted } => Ok(evicted),
            Submission::Rejected(job) => Ok(Some(job)),
        }
    }

    /// On a dead worker the job and anything queued behind it are parked in
    /// `abandoned` so their frames are not lost.
    fn dispatch(&mut self, job: InferenceJob) -> Result<(), MatteError> {
        match self.commands.send(WorkerCommand::Run(job)) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let WorkerCommand::Run(job) = err.into_inner() {
                    self.abandoned.push(job);
                }
                self.abandon_pending();
                Err(MatteError::WorkerDisconnected)
            }
        }
    }

    fn abandon_pending(&mut self) {
        self.abandoned.extend(self.scheduler.abandon());
    }

    /// Drain every event that is ready without blocking.
    ///
    /// Once the worker is gone, stranded jobs come back as
    /// [`WorkerEvent::Abandoned`]; the error is only returned when there is
    /// nothing left to hand back.
    pub fn poll(&mut self) -> Result<Vec<WorkerEvent>, MatteError> {
        let mut ready = Vec::new();
        let disconnected = loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.observe(&event);
                    ready.push(event);
                }
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if disconnected {
            self.abandon_pending();
        }
        ready.extend(self.abandoned.drain(..).map(WorkerEvent::Abandoned));

        if disconnected && ready.is_empty() {
            return Err(MatteError::WorkerDisconnected);
        }
        Ok(ready)
    }

    /// Block up to `timeout` for the next event.
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<WorkerEvent>, MatteError> {
        if let Some(job) = self.abandoned.pop() {
            return Ok(Some(WorkerEvent::Abandoned(job)));
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.observe(&event);
                Ok(Some(event))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.abandon_pending();
                match self.abandoned.pop() {
                    Some(job) => Ok(Some(WorkerEvent::Abandoned(job))),
                    None => Err(MatteError::WorkerDisconnected),
                }
            }
        }
    }

    /// A finished job frees the slot; a queued job goes out right away.
    fn observe(&mut self, event: &WorkerEvent) {
        if let WorkerEvent::Completed(_) | WorkerEvent::Failed { .. } = event {
            if let Some(next) = self.scheduler.on_complete() {
                if let Err(err) = self.dispatch(next) {
                    tracing::warn!("Queued frame not dispatched: {}", err);
                }
            }
        }
    }

    /// Clear recurrent and stabilizer state. An in-flight job still completes
    /// on the old chain; everything dispatched afterwards starts a new one.
    pub fn reset(&mut self) -> Result<(), MatteError> {
        self.commands
            .send(WorkerCommand::Reset)
            .map_err(|_| MatteError::WorkerDisconnected)
    }

    pub fn in_flight(&self) -> bool {
        self.scheduler.in_flight()
    }

    pub fn buffered(&self) -> usize {
        self.scheduler.buffered()
    }

    pub fn dropped(&self) -> u64 {
        self.scheduler.dropped()
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl Drop for InferenceHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Inference worker panicked");
            }
        }
    }
}

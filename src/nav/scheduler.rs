use bevy::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use crate::profile_log;
use super::baked::BakedGridData;
use super::builder::{BuildTask, GridBuilder};
use super::geometry::WorldGeometry;
use super::grid::Grid;

static NEXT_BUILD_ID: AtomicU64 = AtomicU64::new(1);

/// Called once with the finished grid.
pub type CompletionCallback = Box<dyn FnOnce(Arc<Grid>) + Send + Sync>;

/// Caller's side of a scheduled build.
#[derive(Clone, Debug)]
pub struct BuildHandle {
    id: u64,
    grid_name: String,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl BuildHandle {
    pub(crate) fn new(grid_name: &str) -> Self {
        Self {
            id: NEXT_BUILD_ID.fetch_add(1, Ordering::Relaxed),
            grid_name: grid_name.to_string(),
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn grid_name(&self) -> &str {
        &self.grid_name
    }

    /// Stop the build at its next step. The completion callback is never called afterwards.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    Cancelled,
}

enum JobKind {
    Scan {
        task: BuildTask,
        geometry: Arc<dyn WorldGeometry>,
        budget: Duration,
    },
    Rehydrate {
        builder: GridBuilder,
        baked: BakedGridData,
    },
}

/// One unit of scheduled work: a bake in progress plus what to do when it is done.
pub struct BuildJob {
    handle: BuildHandle,
    kind: Option<JobKind>,
    on_complete: Option<CompletionCallback>,
    steps: usize,
}

impl BuildJob {
    pub(crate) fn scan(
        handle: BuildHandle,
        task: BuildTask,
        geometry: Arc<dyn WorldGeometry>,
        budget: Duration,
        on_complete: CompletionCallback,
    ) -> Self {
        Self {
            handle,
            kind: Some(JobKind::Scan { task, geometry, budget }),
            on_complete: Some(on_complete),
            steps: 0,
        }
    }

    pub(crate) fn rehydrate(
        handle: BuildHandle,
        builder: GridBuilder,
        baked: BakedGridData,
        on_complete: CompletionCallback,
    ) -> Self {
        Self {
            handle,
            kind: Some(JobKind::Rehydrate { builder, baked }),
            on_complete: Some(on_complete),
            steps: 0,
        }
    }

    pub fn handle(&self) -> &BuildHandle {
        &self.handle
    }

    /// Advance the job by one scheduler step.
    pub fn step(&mut self) -> JobStatus {
        if self.handle.is_cancelled() {
            if self.kind.take().is_some() {
                debug!("Build of grid '{}' cancelled after {} steps", self.handle.grid_name, self.steps);
            }
            self.on_complete = None;
            return JobStatus::Cancelled;
        }
        self.steps += 1;

        let grid = match self.kind.take() {
            None => return JobStatus::Completed,
            Some(JobKind::Scan { mut task, geometry, budget }) => {
                if !task.step(geometry.as_ref(), budget) {
                    profile_log!(self.steps, "Grid '{}' build at {:.0}%", task.name(), task.progress() * 100.0);
                    self.kind = Some(JobKind::Scan { task, geometry, budget });
                    return JobStatus::Pending;
                }
                task.finish()
            }
            Some(JobKind::Rehydrate { builder, baked }) => builder.rehydrate(&baked),
        };

        info!("Build of grid '{}' completed in {} steps", grid.name(), self.steps);
        self.handle.finished.store(true, Ordering::Release);
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Arc::new(grid));
        }
        JobStatus::Completed
    }
}

/// Something that runs build jobs a step at a time, spread over frames or ticks.
pub trait StepScheduler {
    fn schedule(&mut self, job: BuildJob);
}

/// Frame-driven scheduler: every pending job gets one step per `run_frame`.
#[derive(Resource, Default)]
pub struct FrameScheduler {
    jobs: Vec<BuildJob>,
}

impl StepScheduler for FrameScheduler {
    fn schedule(&mut self, job: BuildJob) {
        self.jobs.push(job);
    }
}

impl FrameScheduler {
    /// Step every pending job once and drop the finished and cancelled ones.
    /// Returns how many jobs completed this frame.
    pub fn run_frame(&mut self) -> usize {
        let mut completed = 0;
        self.jobs.retain_mut(|job| match job.step() {
            JobStatus::Pending => true,
            JobStatus::Completed => {
                completed += 1;
                false
            }
            JobStatus::Cancelled => false,
        });
        completed
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }
}

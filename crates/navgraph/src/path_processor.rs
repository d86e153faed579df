//! Path calculation pipeline
//!
//! Paths are pushed onto a FIFO queue and calculated either by dedicated
//! worker threads or, with [`ThreadCount::None`](crate::ThreadCount::None), cooperatively by
//! [`PathProcessor::tick`]. Every worker owns its own [`PathHandler`], so the
//! only state workers share is the [`NavData`], which they read under a read
//! lock. Calculated paths are moved to a [`PathReturnQueue`] and their
//! callbacks run on the thread that drains it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use glam::Vec3;
use navgraph_common::{Error, Result};
use web_time::Instant;

use crate::ab_path::ABPath;
use crate::config::{PathfinderConfig, PivotSelection};
use crate::multi_target_path::MultiTargetPath;
use crate::nav_data::NavData;
use crate::path::{ClaimKey, Path, PathBase, PathHandle, PathState, QueuedPath, SearchContext};
use crate::path_handler::PathHandler;
use crate::pool::{lock, PathPool};

/// Called with a path right before or right after it is searched
pub type PathHook = Box<dyn Fn(&dyn Path) + Send + Sync>;

/// Length of a single search step when there is no frame budget
const UNBOUNDED_STEP: Duration = Duration::from_secs(60);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct QueueState {
    paths: VecDeque<Arc<dyn QueuedPath>>,
    paused: bool,
    terminated: bool,
}

/// Calculated paths waiting for their callbacks
#[derive(Default)]
pub struct PathReturnQueue {
    paths: Mutex<VecDeque<Arc<dyn QueuedPath>>>,
    returned: Condvar,
}

impl PathReturnQueue {
    /// Moves the path into the return queue. The state is advanced under the
    /// queue lock so a waiter never sees `ReturnQueue` before the path is
    /// actually queued.
    fn push(&self, path: Arc<dyn QueuedPath>) {
        let mut paths = lock(&self.paths);
        path.progress().advance(PathState::ReturnQueue);
        paths.push_back(path);
        self.returned.notify_all();
    }

    fn pop(&self) -> Option<Arc<dyn QueuedPath>> {
        lock(&self.paths).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.paths).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wait_until_queued(&self, path: &Arc<dyn QueuedPath>) {
        let mut paths = lock(&self.paths);
        while path.progress().state() < PathState::ReturnQueue {
            paths = self.returned.wait(paths).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct Shared {
    data: RwLock<NavData>,
    queue: Mutex<QueueState>,
    queue_changed: Condvar,
    returns: PathReturnQueue,
    config: PathfinderConfig,
    claim_key: ClaimKey,
    pre_search: RwLock<Vec<PathHook>>,
    post_search: RwLock<Vec<PathHook>>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.queue)
    }

    /// Next path unless pathfinding is paused
    fn try_pop(&self) -> Option<Arc<dyn QueuedPath>> {
        let mut queue = self.queue();
        if queue.paused {
            return None;
        }
        queue.paths.pop_front()
    }

    /// Waits for the next path. Returns `None` once terminated.
    fn pop_blocking(&self) -> Option<Arc<dyn QueuedPath>> {
        let mut queue = self.queue();
        loop {
            if queue.terminated {
                return None;
            }
            if !queue.paused {
                if let Some(path) = queue.paths.pop_front() {
                    return Some(path);
                }
            }
            queue = self.queue_changed.wait(queue).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn run_hooks(hooks: &RwLock<Vec<PathHook>>, path: &dyn Path) {
        for hook in read(hooks).iter() {
            hook(path);
        }
    }

    /// Searches the path until it is done or `deadline` passes. Returns true
    /// once the path is done.
    fn run_path(&self, handler: &mut PathHandler, queued: &Arc<dyn QueuedPath>, deadline: Option<Instant>) -> bool {
        let data = read(&self.data);
        let mut finished = false;

        queued.with_path(&mut |path| {
            let started = Instant::now();
            let mut ctx = SearchContext {
                data: &data,
                handler: &mut *handler,
            };

            if queued.progress().state() < PathState::Processing {
                queued.progress().advance(PathState::Processing);
                ctx.handler
                    .initialize_for_path(path.base().path_id(), data.nodes().capacity());
                Self::run_hooks(&self.pre_search, &*path);
                if !path.base().is_done() {
                    path.prepare(&mut ctx);
                }
                if !path.base().is_done() {
                    path.initialize(&mut ctx);
                }
            }

            while !path.base().is_done() {
                let step_deadline = match deadline {
                    Some(d) => d,
                    None => Instant::now() + UNBOUNDED_STEP,
                };
                path.calculate_step(&mut ctx, step_deadline);
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
            path.base_mut().duration += started.elapsed();

            if path.base().is_done() {
                path.cleanup(&mut ctx);
                Self::run_hooks(&self.post_search, &*path);
                self.log_result(&*path);
                finished = true;
            }
        });
        finished
    }

    fn log_result(&self, path: &dyn Path) {
        let text = path.debug_string(self.config.log_path_results);
        if text.is_empty() {
            return;
        }
        if path.base().has_error() {
            log::warn!("{text}");
        } else {
            log::info!("{text}");
        }
    }

    fn fail_and_return(&self, queued: Arc<dyn QueuedPath>, msg: &str) {
        queued.with_path(&mut |path| path.base_mut().fail_with_error(msg));
        self.returns.push(queued);
    }
}

fn worker_loop(shared: Arc<Shared>, mut handler: PathHandler) {
    log::debug!("Pathfinding thread {} started", handler.thread_id());
    while let Some(path) = shared.pop_blocking() {
        shared.run_path(&mut handler, &path, None);
        shared.returns.push(path);
    }
    log::debug!("Pathfinding thread {} stopped", handler.thread_id());
}

struct Cooperative {
    handler: PathHandler,
    current: Option<Arc<dyn QueuedPath>>,
}

/// Calculates paths against a shared [`NavData`]
pub struct PathProcessor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    cooperative: Option<Mutex<Cooperative>>,
    ab_paths: PathPool<ABPath>,
    multi_target_paths: PathPool<MultiTargetPath>,
}

impl std::fmt::Debug for PathProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathProcessor")
            .field("threads", &self.workers.len())
            .field("queued", &self.queue_len())
            .field("returned", &self.shared.returns.len())
            .finish_non_exhaustive()
    }
}

impl PathProcessor {
    /// Takes ownership of the graphs and starts the workers
    pub fn new(mut data: NavData, config: PathfinderConfig) -> Result<Self> {
        config.validate()?;
        data.set_max_nearest_node_distance(config.max_nearest_node_distance);
        if config.euclidean_embedding.pivot_selection != PivotSelection::None {
            data.set_embedding_settings(config.euclidean_embedding.clone())?;
        }

        let threads = config.thread_count.resolve();
        let shared = Arc::new(Shared {
            data: RwLock::new(data),
            queue: Mutex::new(QueueState::default()),
            queue_changed: Condvar::new(),
            returns: PathReturnQueue::default(),
            config,
            claim_key: ClaimKey::unique(),
            pre_search: RwLock::new(Vec::new()),
            post_search: RwLock::new(Vec::new()),
        });

        let cooperative = if threads == 0 {
            Some(Mutex::new(Cooperative {
                handler: PathHandler::new(0, &shared.config)?,
                current: None,
            }))
        } else {
            None
        };

        let mut processor = Self {
            shared,
            workers: Vec::with_capacity(threads),
            cooperative,
            ab_paths: PathPool::new(),
            multi_target_paths: PathPool::new(),
        };

        for thread_id in 0..threads {
            let handler = PathHandler::new(thread_id, &processor.shared.config)?;
            let shared = Arc::clone(&processor.shared);
            let worker = std::thread::Builder::new()
                .name(format!("Pathfinding Thread {thread_id}"))
                .spawn(move || worker_loop(shared, handler))?;
            processor.workers.push(worker);
        }
        log::debug!("Started path processor with {threads} threads");
        Ok(processor)
    }

    pub fn config(&self) -> &PathfinderConfig {
        &self.shared.config
    }

    /// Number of worker threads, zero when paths are calculated by [`PathProcessor::tick`]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Paths waiting to be calculated
    pub fn queue_len(&self) -> usize {
        self.shared.queue().paths.len()
    }

    pub fn return_queue(&self) -> &PathReturnQueue {
        &self.shared.returns
    }

    /// Read access to the graphs. Workers keep running.
    pub fn data(&self) -> RwLockReadGuard<'_, NavData> {
        read(&self.shared.data)
    }

    pub fn add_pre_search_hook(&self, hook: impl Fn(&dyn Path) + Send + Sync + 'static) {
        write(&self.shared.pre_search).push(Box::new(hook));
    }

    pub fn add_post_search_hook(&self, hook: impl Fn(&dyn Path) + Send + Sync + 'static) {
        write(&self.shared.post_search).push(Box::new(hook));
    }

    fn apply_defaults(&self, base: &mut PathBase) {
        base.heuristic = self.shared.config.heuristic;
        base.heuristic_scale = self.shared.config.heuristic_scale;
    }

    /// A pooled path from `start` to `end` using the configured heuristic
    pub fn ab_path(&self, start: Vec3, end: Vec3) -> PathHandle<ABPath> {
        let handle = self.ab_paths.get();
        {
            let mut path = handle.lock();
            path.setup(start, end);
            self.apply_defaults(path.base_mut());
        }
        handle
    }

    /// A pooled path from `start` to each of `targets`
    pub fn multi_target_path(&self, start: Vec3, targets: &[Vec3]) -> PathHandle<MultiTargetPath> {
        let handle = self.multi_target_paths.get();
        {
            let mut path = handle.lock();
            path.setup(start, targets);
            self.apply_defaults(path.base_mut());
        }
        handle
    }

    /// Queues a path for calculation. With `push_front` it is calculated
    /// before every path already waiting.
    pub fn start_path<P: Path + Default>(&self, handle: &PathHandle<P>, push_front: bool) -> Result<()> {
        if handle.is_pooled() {
            return Err(Error::Pool(
                "The path is currently in a path pool. Are you sending the path for calculation twice?".to_string(),
            ));
        }
        if handle.state() != PathState::Created {
            return Err(Error::InvalidArgument(
                "This path has already been processed. Do not request a path with the same path object twice."
                    .to_string(),
            ));
        }

        let queued = handle.queued();
        queued.claim(self.shared.claim_key)?;
        queued.progress().advance(PathState::PathQueue);

        let mut queue = self.shared.queue();
        if queue.terminated {
            drop(queue);
            self.shared.fail_and_return(queued, "Pathfinding was terminated");
            return Ok(());
        }
        if push_front {
            queue.paths.push_front(queued);
        } else {
            queue.paths.push_back(queued);
        }
        self.shared.queue_changed.notify_one();
        Ok(())
    }

    /// Queues the path and blocks until it has been calculated and returned
    pub fn calculate_now<P: Path + Default>(&self, handle: &PathHandle<P>) -> Result<()> {
        self.start_path(handle, true)?;
        self.block_until_calculated(handle)
    }

    fn run_cooperative(&self, deadline: Option<Instant>) {
        let Some(cooperative) = &self.cooperative else {
            return;
        };
        let mut coop = lock(cooperative);
        loop {
            if coop.current.is_none() {
                coop.current = self.shared.try_pop();
            }
            let Some(path) = coop.current.clone() else {
                break;
            };
            if self.shared.run_path(&mut coop.handler, &path, deadline) {
                coop.current = None;
                self.shared.returns.push(path);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }
    }

    /// Calculates paths for up to `max_frame_time_ms` when there are no
    /// worker threads, then returns calculated paths
    pub fn tick(&self) {
        let budget = Duration::from_secs_f32(self.shared.config.max_frame_time_ms / 1000.0);
        self.run_cooperative(Some(Instant::now() + budget));
        self.return_paths(Some(budget));
    }

    /// Calls the callbacks of calculated paths, stopping after `time_slice` if given
    pub fn return_paths(&self, time_slice: Option<Duration>) {
        let started = Instant::now();
        while let Some(path) = self.shared.returns.pop() {
            path.with_path(&mut |p| p.return_path());
            path.progress().advance(PathState::Returned);
            if let Err(e) = Arc::clone(&path).release_silent(self.shared.claim_key) {
                log::error!("{e}");
            }
            if time_slice.is_some_and(|t| started.elapsed() >= t) {
                break;
            }
        }
    }

    /// Blocks until the path has been calculated, then returns every
    /// calculated path including this one.
    ///
    /// The path must not be locked by the calling thread.
    pub fn block_until_calculated<P: Path + Default>(&self, handle: &PathHandle<P>) -> Result<()> {
        let queued = handle.queued();
        let state = queued.progress().state();
        if state == PathState::Created {
            return Err(Error::InvalidArgument(
                "The path has not been started yet".to_string(),
            ));
        }

        if self.cooperative.is_some() {
            while queued.progress().state() < PathState::ReturnQueue {
                let idle = self.queue_len() == 0
                    && self
                        .cooperative
                        .as_ref()
                        .map(|c| lock(c).current.is_none())
                        .unwrap_or(true);
                if idle {
                    return Err(Error::Pathfinding(format!(
                        "Critical error. Path Queue is empty but the path state is '{:?}'",
                        queued.progress().state()
                    )));
                }
                self.run_cooperative(None);
            }
        } else {
            self.shared.returns.wait_until_queued(&queued);
        }

        self.return_paths(None);
        Ok(())
    }

    /// Stops workers from starting new paths, waits for the running ones
    /// and grants write access to the graphs. Work resumes when the lock is
    /// dropped.
    pub fn pause_pathfinding(&self) -> GraphUpdateLock<'_> {
        self.shared.queue().paused = true;

        if let Some(cooperative) = &self.cooperative {
            let mut coop = lock(cooperative);
            if let Some(path) = coop.current.take() {
                self.shared.run_path(&mut coop.handler, &path, None);
                self.shared.returns.push(path);
            }
        }

        GraphUpdateLock {
            shared: &self.shared,
            guard: write(&self.shared.data),
        }
    }

    /// Stops the workers. Paths still queued fail and are moved to the return queue.
    pub fn terminate(&mut self) {
        {
            let mut queue = self.shared.queue();
            if queue.terminated && self.workers.is_empty() {
                return;
            }
            queue.terminated = true;
        }
        self.shared.queue_changed.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("A pathfinding thread panicked");
            }
        }

        let mut remaining: Vec<Arc<dyn QueuedPath>> = self.shared.queue().paths.drain(..).collect();
        if let Some(cooperative) = &self.cooperative {
            remaining.extend(lock(cooperative).current.take());
        }
        for path in remaining {
            self.shared.fail_and_return(path, "Pathfinding was terminated");
        }
    }
}

impl Drop for PathProcessor {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Write access to the graphs while pathfinding is paused
pub struct GraphUpdateLock<'a> {
    shared: &'a Shared,
    guard: RwLockWriteGuard<'a, NavData>,
}

impl Deref for GraphUpdateLock<'_> {
    type Target = NavData;

    fn deref(&self) -> &NavData {
        &self.guard
    }
}

impl DerefMut for GraphUpdateLock<'_> {
    fn deref_mut(&mut self) -> &mut NavData {
        &mut self.guard
    }
}

impl Drop for GraphUpdateLock<'_> {
    /// Workers woken here wait on the data lock until the guard is released
    fn drop(&mut self) {
        self.guard.refresh_embedding();
        self.shared.queue().paused = false;
        self.shared.queue_changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathCompleteState;
    use crate::test_mesh_helpers::corridor_nav_data;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cooperative_tick_calculates_and_returns() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        assert_eq!(processor.thread_count(), 0);

        let returned = Arc::new(AtomicUsize::new(0));
        let handle = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        let counter = Arc::clone(&returned);
        handle.lock().base_mut().set_callback(move |p| {
            assert_eq!(p.base().complete_state(), PathCompleteState::Complete);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        processor.start_path(&handle, false)?;
        assert_eq!(handle.state(), PathState::PathQueue);

        for _ in 0..100 {
            processor.tick();
            if handle.is_returned() {
                break;
            }
        }
        assert!(handle.is_returned());
        assert_eq!(returned.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_start_path_twice_fails() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let handle = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        processor.start_path(&handle, false)?;
        assert!(processor.start_path(&handle, false).is_err());
        processor.block_until_calculated(&handle)?;
        assert!(processor.start_path(&handle, false).is_err());
        Ok(())
    }

    #[test]
    fn test_block_requires_started_path() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let handle = processor.ab_path(Vec3::ZERO, Vec3::ONE);
        assert!(processor.block_until_calculated(&handle).is_err());
        Ok(())
    }

    #[test]
    fn test_push_front_runs_first() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        processor.add_pre_search_hook(move |p| lock(&sink).push(p.base().path_id()));

        let first = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        let urgent = processor.ab_path(Vec3::new(11.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        processor.start_path(&first, false)?;
        processor.start_path(&urgent, true)?;
        processor.block_until_calculated(&first)?;

        let ids = lock(&order).clone();
        assert_eq!(ids, vec![urgent.lock().base().path_id(), first.lock().base().path_id()]);
        assert!(urgent.is_returned());
        Ok(())
    }

    #[test]
    fn test_terminate_fails_queued_paths() -> Result<()> {
        let mut processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let handle = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        processor.start_path(&handle, false)?;
        processor.terminate();
        processor.return_paths(None);

        assert!(handle.is_returned());
        let path = handle.lock();
        assert!(path.base().has_error());
        assert_eq!(path.base().error_log(), "Pathfinding was terminated");
        Ok(())
    }

    #[test]
    fn test_pause_grants_write_access() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let live = processor.data().nodes().live_count();
        {
            let mut data = processor.pause_pathfinding();
            let node = data.graphs()[0].tiles()[0].nodes[0];
            data.destroy_node(node)?;
        }
        assert_eq!(processor.data().nodes().live_count(), live - 1);

        let handle = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        processor.calculate_now(&handle)?;
        assert!(handle.is_returned());
        Ok(())
    }

    #[test]
    fn test_pooled_path_is_rejected() -> Result<()> {
        let processor = PathProcessor::new(corridor_nav_data()?, PathfinderConfig::default())?;
        let handle = processor.ab_path(Vec3::new(1.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0));
        let key = ClaimKey::unique();
        handle.claim(key)?;
        handle.release(key)?;
        assert!(matches!(processor.start_path(&handle, false), Err(Error::Pool(_))));
        Ok(())
    }
}

//! Path requests and the search steps shared by every path type
//!
//! A path object is owned by a [`PathHandle`]. The handle tracks how far the
//! path has progressed through the pipeline and which owners have claimed
//! it. Searching itself goes through the [`Path`] trait, driven by the
//! [`PathProcessor`](crate::PathProcessor) on a worker that lends its
//! [`PathHandler`] through a [`SearchContext`].

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use glam::Vec3;
use navgraph_common::{Error, Int3, Result};
use web_time::Instant;

use crate::config::PathLog;
use crate::graph_node::{GraphNode, NodeIndex};
use crate::heuristic::Heuristic;
use crate::nav_data::NavData;
use crate::nn_constraint::PathNNConstraint;
use crate::path_handler::{next_path_id, PathHandler};
use crate::pool::PathPoolInner;
use crate::traversal::TraversalProvider;

/// Longest node path [`PathBase::trace`] follows before giving up
pub const MAX_TRACE_LENGTH: usize = 2048;

/// Position of a path in the pipeline. Only ever advances.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathState {
    Created = 0,
    PathQueue = 1,
    Processing = 2,
    ReturnQueue = 3,
    Returned = 4,
}

impl PathState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PathState::Created,
            1 => PathState::PathQueue,
            2 => PathState::Processing,
            3 => PathState::ReturnQueue,
            _ => PathState::Returned,
        }
    }
}

/// Outcome of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathCompleteState {
    #[default]
    NotCalculated,
    Error,
    Complete,
    /// A path to the reachable node closest to the target
    Partial,
}

/// Called once the path has been returned
pub type PathCallback = Box<dyn FnOnce(&dyn Path) + Send>;

/// Identifies an owner of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimKey(u64);

impl ClaimKey {
    /// A key no other call has returned
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ClaimKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct Claims {
    keys: Vec<ClaimKey>,
    released_not_silent: bool,
}

/// Pipeline state and ownership of a path, readable without locking the path
#[derive(Debug)]
pub struct PathProgress {
    state: AtomicU8,
    claims: Mutex<Claims>,
    pooled: AtomicBool,
}

impl PathProgress {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PathState::Created as u8),
            claims: Mutex::new(Claims::default()),
            pooled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PathState {
        PathState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the state forward; moving backwards is ignored
    pub(crate) fn advance(&self, state: PathState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled.load(Ordering::Acquire)
    }

    fn claims(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, key: ClaimKey) -> Result<()> {
        if self.is_pooled() {
            return Err(Error::Pool(
                "You are claiming a path which has been pooled. Paths must not be used after their last release"
                    .to_string(),
            ));
        }
        let mut claims = self.claims();
        if claims.keys.contains(&key) {
            return Err(Error::Pool(format!(
                "You have already claimed the path with that key ({key:?}). Are you claiming the path with the same key twice?"
            )));
        }
        claims.keys.push(key);
        Ok(())
    }

    /// Returns true when the path should go back to its pool
    fn release(&self, key: ClaimKey, silent: bool) -> Result<bool> {
        let mut claims = self.claims();
        let Some(slot) = claims.keys.iter().position(|&k| k == key) else {
            let msg = if claims.keys.is_empty() {
                format!(
                    "You are releasing a path which is not claimed at all (most likely it has been pooled already). Are you releasing the path with the same key ({key:?}) twice?"
                )
            } else {
                format!(
                    "You are releasing a path which has not been claimed with this key ({key:?}). Are you releasing the path with the same key twice?"
                )
            };
            return Err(Error::Pool(msg));
        };
        claims.keys.remove(slot);
        if !silent {
            claims.released_not_silent = true;
        }
        Ok(claims.keys.is_empty() && claims.released_not_silent)
    }

    fn reset(&self) {
        self.state.store(PathState::Created as u8, Ordering::Release);
        *self.claims() = Claims::default();
        self.pooled.store(false, Ordering::Release);
    }
}

/// A path object together with its progress
#[derive(Debug)]
pub(crate) struct PathShared<P> {
    path: Mutex<P>,
    pub(crate) progress: PathProgress,
    pool: Option<Weak<PathPoolInner<P>>>,
}

impl<P: Path + Default> PathShared<P> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, P> {
        self.path.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: Arc<Self>, key: ClaimKey, silent: bool) -> Result<()> {
        if self.progress.release(key, silent)? {
            self.progress.pooled.store(true, Ordering::Release);
            if let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) {
                pool.put(self);
            }
        }
        Ok(())
    }

    /// Makes a pooled path look freshly constructed. Only called once no
    /// handle refers to it any more.
    pub(crate) fn recycle(&self) {
        self.progress.reset();
        self.lock().reset();
    }
}

/// Type-erased view of a queued path used by the processor
pub(crate) trait QueuedPath: Send + Sync {
    fn progress(&self) -> &PathProgress;
    fn with_path(&self, f: &mut dyn FnMut(&mut dyn Path));
    fn claim(&self, key: ClaimKey) -> Result<()>;
    fn release_silent(self: Arc<Self>, key: ClaimKey) -> Result<()>;
}

impl<P: Path + Default> QueuedPath for PathShared<P> {
    fn progress(&self) -> &PathProgress {
        &self.progress
    }

    fn with_path(&self, f: &mut dyn FnMut(&mut dyn Path)) {
        let mut guard = self.lock();
        f(&mut *guard);
    }

    fn claim(&self, key: ClaimKey) -> Result<()> {
        self.progress.claim(key)
    }

    fn release_silent(self: Arc<Self>, key: ClaimKey) -> Result<()> {
        self.release(key, true)
    }
}

/// Shared handle to a path.
///
/// Clones refer to the same path. Once every claim has been released, and
/// at least one release was not silent, the path is marked as pooled and
/// must not be used again.
pub struct PathHandle<P> {
    shared: Arc<PathShared<P>>,
}

impl<P> Clone for PathHandle<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for PathHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathHandle")
            .field("state", &self.shared.progress.state())
            .field("pooled", &self.shared.progress.is_pooled())
            .finish()
    }
}

impl<P: Path + Default> PathHandle<P> {
    /// Wraps a path that does not belong to any pool
    pub fn new(path: P) -> Self {
        Self::from_shared(Arc::new(PathShared {
            path: Mutex::new(path),
            progress: PathProgress::new(),
            pool: None,
        }))
    }

    pub(crate) fn pooled(path: P, pool: Weak<PathPoolInner<P>>) -> Self {
        Self::from_shared(Arc::new(PathShared {
            path: Mutex::new(path),
            progress: PathProgress::new(),
            pool: Some(pool),
        }))
    }

    pub(crate) fn from_shared(shared: Arc<PathShared<P>>) -> Self {
        Self { shared }
    }

    /// Locks the path for reading results or changing settings.
    ///
    /// Do not hold the guard across [`PathProcessor::block_until_calculated`](crate::PathProcessor::block_until_calculated)
    /// or while the processor is ticked on the same thread.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.shared.lock()
    }

    pub fn state(&self) -> PathState {
        self.shared.progress.state()
    }

    /// True once the path has been returned and its callback called
    pub fn is_returned(&self) -> bool {
        self.state() == PathState::Returned
    }

    pub fn complete_state(&self) -> PathCompleteState {
        self.lock().base().complete_state()
    }

    pub fn is_pooled(&self) -> bool {
        self.shared.progress.is_pooled()
    }

    /// Registers an owner. The path is not recycled while any owner holds a claim.
    pub fn claim(&self, key: ClaimKey) -> Result<()> {
        self.shared.progress.claim(key)
    }

    /// Releases a claim and allows the path to be recycled
    pub fn release(&self, key: ClaimKey) -> Result<()> {
        Arc::clone(&self.shared).release(key, false)
    }

    /// Releases a claim without allowing the path to be recycled on its own
    pub fn release_silent(&self, key: ClaimKey) -> Result<()> {
        Arc::clone(&self.shared).release(key, true)
    }

    pub(crate) fn queued(&self) -> Arc<dyn QueuedPath> {
        self.shared.clone()
    }
}

/// Borrowed search state of the worker running a path
pub struct SearchContext<'a> {
    pub data: &'a NavData,
    pub handler: &'a mut PathHandler,
}

/// Settings, results and bookkeeping common to every path type
pub struct PathBase {
    path_id: u16,
    complete_state: PathCompleteState,
    error_log: String,
    /// Nodes the path passes through
    pub path: Vec<NodeIndex>,
    /// Points of the path in world space
    pub vector_path: Vec<Vec3>,
    pub nn_constraint: PathNNConstraint,
    pub heuristic: Heuristic,
    pub heuristic_scale: f32,
    pub(crate) h_target: Int3,
    pub(crate) h_target_node: Option<NodeIndex>,
    /// Bitmask of tags the path may enter
    pub enabled_tags: u32,
    tag_penalties: [u32; 32],
    pub traversal_provider: Option<Arc<dyn TraversalProvider>>,
    pub(crate) searched_nodes: usize,
    pub(crate) duration: Duration,
    callback: Option<PathCallback>,
}

impl fmt::Debug for PathBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathBase")
            .field("path_id", &self.path_id)
            .field("complete_state", &self.complete_state)
            .field("error_log", &self.error_log)
            .field("path", &self.path)
            .field("vector_path", &self.vector_path)
            .field("heuristic", &self.heuristic)
            .field("searched_nodes", &self.searched_nodes)
            .finish_non_exhaustive()
    }
}

impl Default for PathBase {
    fn default() -> Self {
        Self::new()
    }
}

impl PathBase {
    pub fn new() -> Self {
        Self {
            path_id: next_path_id(),
            complete_state: PathCompleteState::NotCalculated,
            error_log: String::new(),
            path: Vec::new(),
            vector_path: Vec::new(),
            nn_constraint: PathNNConstraint::default(),
            heuristic: Heuristic::default(),
            heuristic_scale: 1.0,
            h_target: Int3::ZERO,
            h_target_node: None,
            enabled_tags: u32::MAX,
            tag_penalties: [0; 32],
            traversal_provider: None,
            searched_nodes: 0,
            duration: Duration::ZERO,
            callback: None,
        }
    }

    /// Restores the defaults and takes a new path id. Result buffers keep
    /// their allocations.
    pub fn reset(&mut self) {
        self.path_id = next_path_id();
        self.complete_state = PathCompleteState::NotCalculated;
        self.error_log.clear();
        self.path.clear();
        self.vector_path.clear();
        self.nn_constraint = PathNNConstraint::default();
        self.heuristic = Heuristic::default();
        self.heuristic_scale = 1.0;
        self.h_target = Int3::ZERO;
        self.h_target_node = None;
        self.enabled_tags = u32::MAX;
        self.tag_penalties = [0; 32];
        self.traversal_provider = None;
        self.searched_nodes = 0;
        self.duration = Duration::ZERO;
        self.callback = None;
    }

    pub fn path_id(&self) -> u16 {
        self.path_id
    }

    pub fn complete_state(&self) -> PathCompleteState {
        self.complete_state
    }

    /// Sets the outcome. An error is final and is never overwritten.
    pub(crate) fn set_complete_state(&mut self, state: PathCompleteState) {
        if self.complete_state != PathCompleteState::Error {
            self.complete_state = state;
        }
    }

    /// Overrides the outcome even if an error was recorded
    pub(crate) fn force_complete_state(&mut self, state: PathCompleteState) {
        self.complete_state = state;
    }

    /// True once the search has an outcome
    pub fn is_done(&self) -> bool {
        self.complete_state != PathCompleteState::NotCalculated
    }

    pub fn has_error(&self) -> bool {
        self.complete_state == PathCompleteState::Error
    }

    /// Every error message recorded for this path, one per line
    pub fn error_log(&self) -> &str {
        &self.error_log
    }

    /// Puts the path into the error state and records why
    pub fn fail_with_error(&mut self, msg: impl Into<String>) {
        self.complete_state = PathCompleteState::Error;
        let msg = msg.into();
        if !self.error_log.is_empty() {
            self.error_log.push('\n');
        }
        self.error_log.push_str(&msg);
    }

    pub fn searched_nodes(&self) -> usize {
        self.searched_nodes
    }

    /// Time spent searching
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Length of [`PathBase::vector_path`] in world units
    pub fn total_length(&self) -> f32 {
        self.vector_path.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    pub fn set_callback(&mut self, callback: impl FnOnce(&dyn Path) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub(crate) fn take_callback(&mut self) -> Option<PathCallback> {
        self.callback.take()
    }

    pub fn tag_penalties(&self) -> &[u32; 32] {
        &self.tag_penalties
    }

    /// Sets the extra cost of entering nodes with each tag
    pub fn set_tag_penalties(&mut self, penalties: &[u32]) -> Result<()> {
        self.tag_penalties = penalties.try_into().map_err(|_| {
            Error::InvalidArgument(format!(
                "tag penalties must have exactly 32 entries, got {}",
                penalties.len()
            ))
        })?;
        Ok(())
    }

    pub fn tag_penalty(&self, tag: u32) -> u32 {
        self.tag_penalties[(tag & 31) as usize]
    }

    #[inline]
    pub fn can_traverse(&self, node: &GraphNode) -> bool {
        match &self.traversal_provider {
            Some(provider) => provider.can_traverse(self.enabled_tags, node),
            None => node.walkable() && (self.enabled_tags >> node.tag()) & 1 != 0,
        }
    }

    #[inline]
    pub fn traversal_cost(&self, node: &GraphNode) -> u32 {
        match &self.traversal_provider {
            Some(provider) => provider.traversal_cost(&self.tag_penalties, node),
            None => self.tag_penalty(node.tag()).saturating_add(node.penalty()),
        }
    }

    /// Estimated remaining cost from the node, raised to the embedding bound
    /// when a target node is known
    pub(crate) fn calculate_h_score(&self, data: &NavData, index: NodeIndex) -> u32 {
        let position = data.nodes()[index].position;
        let h = self.heuristic.estimate(self.h_target, position, self.heuristic_scale);
        match self.h_target_node {
            Some(target) if self.heuristic != Heuristic::None => h.max(data.embedding().heuristic(index, target)),
            _ => h,
        }
    }

    /// Follows parent links back from `from` and stores the node path and
    /// node positions
    pub(crate) fn trace(&mut self, data: &NavData, handler: &PathHandler, from: NodeIndex) {
        let mut count = 0;
        let mut current = Some(from);
        while let Some(index) = current {
            current = handler.node(index).parent;
            count += 1;
            if count > MAX_TRACE_LENGTH {
                log::warn!(
                    "Infinite loop? >{MAX_TRACE_LENGTH} node path. The path has been truncated to the last {MAX_TRACE_LENGTH} nodes"
                );
                count = MAX_TRACE_LENGTH;
                break;
            }
        }

        self.path.clear();
        self.path.reserve(count);
        let mut current = Some(from);
        for _ in 0..count {
            let Some(index) = current else { break };
            self.path.push(index);
            current = handler.node(index).parent;
        }
        self.path.reverse();

        self.vector_path.clear();
        self.vector_path
            .extend(self.path.iter().map(|&n| data.nodes()[n].position.to_vec3()));
    }

    pub(crate) fn debug_string_prefix(&self, log: PathLog, text: &mut String) {
        let error = self.has_error();
        text.push_str(if error { "Path Failed : " } else { "Path Completed : " });
        let ms = self.duration.as_secs_f64() * 1000.0;
        if log == PathLog::Heavy {
            text.push_str(&format!("Computation Time {ms:.3} ms "));
        } else {
            text.push_str(&format!("Computation Time {ms:.2} ms "));
        }
        text.push_str(&format!("Searched Nodes {}", self.searched_nodes));
        if !error {
            text.push_str(&format!(" Path Length {}", self.path.len()));
        }
    }

    pub(crate) fn debug_string_suffix(&self, text: &mut String) {
        if self.has_error() {
            text.push_str("\nError: ");
            text.push_str(&self.error_log);
        }
        text.push_str(&format!("\nPath Number {} (unique id)", self.path_id));
    }

    /// Summary of the search for logging; empty when `log` filters it out
    pub fn debug_string(&self, log: PathLog) -> String {
        if log == PathLog::None || (!self.has_error() && log == PathLog::OnlyErrors) {
            return String::new();
        }
        let mut text = String::new();
        self.debug_string_prefix(log, &mut text);
        self.debug_string_suffix(&mut text);
        text
    }
}

/// A path request the processor can search
pub trait Path: Send + 'static {
    fn base(&self) -> &PathBase;
    fn base_mut(&mut self) -> &mut PathBase;

    /// Restores the state of a newly constructed path
    fn reset(&mut self);

    /// Resolves the start and end points to nodes. May fail the path.
    fn prepare(&mut self, ctx: &mut SearchContext<'_>);

    /// Seeds the open list
    fn initialize(&mut self, ctx: &mut SearchContext<'_>);

    /// Searches until the path is done or `deadline` passes
    fn calculate_step(&mut self, ctx: &mut SearchContext<'_>, deadline: Instant);

    /// Clears per-search marks from the handler; runs whether or not the search succeeded
    fn cleanup(&mut self, _ctx: &mut SearchContext<'_>) {}

    /// Cost of a connection touching a node marked with `flag2`
    fn connection_special_cost(&self, _data: &NavData, _from: NodeIndex, _to: NodeIndex, cost: u32) -> u32 {
        cost
    }

    /// Invokes the callbacks. Called on the thread draining the return queue.
    fn return_path(&mut self);

    fn debug_string(&self, log: PathLog) -> String {
        self.base().debug_string(log)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Expands `current`: every traversable neighbour is either added to the
/// open list or, when reached more cheaply than before, reparented.
pub(crate) fn open_node<P: Path + ?Sized>(path: &P, ctx: &mut SearchContext<'_>, current: NodeIndex) -> Result<()> {
    let data = ctx.data;
    let base = path.base();
    let path_id = ctx.handler.path_id();
    let (current_g, current_parent, current_special) = {
        let pn = ctx.handler.node(current);
        (pn.g, pn.parent, pn.flag2)
    };

    for conn in data.nodes()[current].connections() {
        let other = conn.node;
        let Some(other_node) = data.node(other) else {
            continue;
        };
        if !base.can_traverse(other_node) || Some(other) == current_parent {
            continue;
        }

        let other_pn = *ctx.handler.node(other);
        let mut cost = conn.cost;
        if current_special || other_pn.flag2 {
            cost = path.connection_special_cost(data, current, other, cost);
        }
        let g = current_g
            .saturating_add(cost)
            .saturating_add(base.traversal_cost(other_node));

        if other_pn.path_id != path_id {
            let h = base.calculate_h_score(data, other);
            let pn = ctx.handler.node_mut(other);
            pn.parent = Some(current);
            pn.path_id = path_id;
            pn.cost = cost;
            pn.h = h;
            pn.g = g;
            ctx.handler.heap_add(other)?;
        } else if g < other_pn.g {
            let pn = ctx.handler.node_mut(other);
            pn.cost = cost;
            pn.parent = Some(current);
            update_recursive_g(path, ctx, other)?;
        }
    }
    Ok(())
}

/// Recomputes G for `start` and every descendant that already took it as parent
pub(crate) fn update_recursive_g<P: Path + ?Sized>(path: &P, ctx: &mut SearchContext<'_>, start: NodeIndex) -> Result<()> {
    let data = ctx.data;
    let base = path.base();
    let path_id = ctx.handler.path_id();
    let mut stack = ctx.handler.scratch.node_lists.claim();
    stack.push(start);

    while let Some(index) = stack.pop() {
        let pn = *ctx.handler.node(index);
        let parent_g = pn.parent.map(|p| ctx.handler.node(p).g).unwrap_or(0);
        let g = parent_g
            .saturating_add(pn.cost)
            .saturating_add(base.traversal_cost(&data.nodes()[index]));
        ctx.handler.node_mut(index).g = g;
        ctx.handler.heap_add(index)?;

        for conn in data.nodes()[index].connections() {
            let child = ctx.handler.node(conn.node);
            if child.path_id == path_id && child.parent == Some(index) {
                stack.push(conn.node);
            }
        }
    }
    ctx.handler.scratch.node_lists.release(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_state_is_final() {
        let mut base = PathBase::new();
        base.fail_with_error("first");
        base.set_complete_state(PathCompleteState::Complete);
        assert_eq!(base.complete_state(), PathCompleteState::Error);

        base.fail_with_error("second");
        assert_eq!(base.error_log(), "first\nsecond");
    }

    #[test]
    fn test_state_only_advances() {
        let progress = PathProgress::new();
        progress.advance(PathState::Processing);
        progress.advance(PathState::PathQueue);
        assert_eq!(progress.state(), PathState::Processing);
    }

    #[test]
    fn test_claims() -> Result<()> {
        let progress = PathProgress::new();
        let a = ClaimKey::unique();
        let b = ClaimKey::unique();
        progress.claim(a)?;
        assert!(progress.claim(a).is_err());
        progress.claim(b)?;

        assert!(!progress.release(a, true)?);
        assert!(progress.release(a, true).is_err());
        // Last claim, and the first release was silent
        assert!(!progress.release(b, true)?);

        progress.claim(a)?;
        assert!(progress.release(a, false)?);
        Ok(())
    }

    #[test]
    fn test_tag_penalties() -> Result<()> {
        let mut base = PathBase::new();
        assert!(base.set_tag_penalties(&[1, 2, 3]).is_err());
        let mut penalties = [0; 32];
        penalties[3] = 500;
        base.set_tag_penalties(&penalties)?;
        assert_eq!(base.tag_penalty(3), 500);
        Ok(())
    }

    #[test]
    fn test_debug_string() {
        let mut base = PathBase::new();
        base.path = vec![NodeIndex(0), NodeIndex(1)];
        base.searched_nodes = 7;
        let text = base.debug_string(PathLog::Normal);
        assert!(text.starts_with("Path Completed : Computation Time 0.00 ms Searched Nodes 7 Path Length 2"));
        assert!(text.ends_with(&format!("Path Number {} (unique id)", base.path_id())));
        assert!(base.debug_string(PathLog::OnlyErrors).is_empty());

        base.fail_with_error("no nodes");
        let text = base.debug_string(PathLog::Heavy);
        assert!(text.starts_with("Path Failed : Computation Time 0.000 ms Searched Nodes 7\nError: no nodes"));
        assert!(base.debug_string(PathLog::None).is_empty());
    }

    #[test]
    fn test_g_propagation_reaches_children_and_reuses_its_stack() -> Result<()> {
        use crate::ab_path::ABPath;
        use crate::config::PathfinderConfig;
        use crate::path_handler::PathHandler;
        use crate::test_mesh_helpers::{corridor_nav_data, corridor_nodes};

        let data = corridor_nav_data()?;
        let (a, b) = corridor_nodes(&data);
        let mut handler = PathHandler::new(0, &PathfinderConfig::default())?;
        handler.initialize_for_path(42, data.nodes().capacity());
        let path = ABPath::default();

        for (index, parent, cost) in [(a, None, 0), (b, Some(a), 300)] {
            let pn = handler.node_mut(index);
            pn.path_id = 42;
            pn.parent = parent;
            pn.cost = cost;
            pn.g = 10_000;
        }

        let mut ctx = SearchContext {
            data: &data,
            handler: &mut handler,
        };
        update_recursive_g(&path, &mut ctx, a)?;
        update_recursive_g(&path, &mut ctx, a)?;

        assert_eq!(handler.node(a).g, 0);
        assert_eq!(handler.node(b).g, 300);
        assert_eq!(handler.scratch.node_lists.pooled_count(), 1);
        Ok(())
    }

    #[test]
    fn test_total_length() {
        let mut base = PathBase::new();
        base.vector_path = vec![Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 4.0)];
        assert!((base.total_length() - 7.0).abs() < 1e-5);
    }
}

//! Search from one point to several targets, or from several points to one target
//!
//! With [`MultiTargetPath::paths_for_all`] set, a path to every reachable
//! target is recorded from a single search, which is cheaper than one
//! [`ABPath`](crate::ABPath) per target. Otherwise the search runs without a
//! heuristic and stops at the first target it reaches, which is the closest
//! one. After the search [`PathBase::path`] and [`PathBase::vector_path`]
//! hold the shortest of the found paths.

use std::any::Any;
use std::fmt;

use glam::Vec3;
use navgraph_common::{Error, Int3, Result};
use web_time::Instant;

use crate::config::PathLog;
use crate::funnel::{self, FunnelOptions};
use crate::graph_node::NodeIndex;
use crate::heuristic::Heuristic;
use crate::nav_data::NavData;
use crate::path::{open_node, Path, PathBase, PathCallback, PathCompleteState, SearchContext};

const TIME_CHECK_INTERVAL: usize = 500;

/// How the heuristic target is placed among the targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum HeuristicMode {
    /// No heuristic
    None,
    /// Average of the target positions, computed once
    Average,
    /// Average of the targets not found yet, updated whenever a target is found
    MovingAverage,
    /// Center of the targets' bounding box, computed once
    Midpoint,
    /// Center of the bounding box of the targets not found yet
    MovingMidpoint,
    /// The target furthest from the start, then the next furthest once it is found
    #[default]
    Sequential,
}

pub struct MultiTargetPath {
    base: PathBase,
    pub start_node: Option<NodeIndex>,
    pub original_start_point: Vec3,
    pub start_point: Vec3,
    /// Target whose path [`PathBase::path`] currently holds
    pub end_node: Option<NodeIndex>,
    pub end_point: Vec3,
    pub original_end_point: Vec3,
    /// Targets as requested
    pub original_target_points: Vec<Vec3>,
    /// Targets snapped onto the graph once the path has been prepared
    pub target_points: Vec<Vec3>,
    pub target_nodes: Vec<Option<NodeIndex>>,
    targets_found: Vec<bool>,
    target_node_count: usize,
    node_paths: Vec<Option<Vec<NodeIndex>>>,
    vector_paths: Vec<Option<Vec<Vec3>>>,
    /// Find a path to every target instead of stopping at the closest
    pub paths_for_all: bool,
    /// Ignored when [`MultiTargetPath::paths_for_all`] is false
    pub heuristic_mode: HeuristicMode,
    pub smoothing: Option<FunnelOptions>,
    chosen_target: Option<usize>,
    sequential_target: usize,
    inverted: bool,
    callbacks: Vec<Option<PathCallback>>,
    current: Option<NodeIndex>,
}

impl fmt::Debug for MultiTargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiTargetPath")
            .field("base", &self.base)
            .field("start_node", &self.start_node)
            .field("target_nodes", &self.target_nodes)
            .field("targets_found", &self.targets_found)
            .field("paths_for_all", &self.paths_for_all)
            .field("heuristic_mode", &self.heuristic_mode)
            .field("chosen_target", &self.chosen_target)
            .field("inverted", &self.inverted)
            .finish_non_exhaustive()
    }
}

impl Default for MultiTargetPath {
    fn default() -> Self {
        Self {
            base: PathBase::new(),
            start_node: None,
            original_start_point: Vec3::ZERO,
            start_point: Vec3::ZERO,
            end_node: None,
            end_point: Vec3::ZERO,
            original_end_point: Vec3::ZERO,
            original_target_points: Vec::new(),
            target_points: Vec::new(),
            target_nodes: Vec::new(),
            targets_found: Vec::new(),
            target_node_count: 0,
            node_paths: Vec::new(),
            vector_paths: Vec::new(),
            paths_for_all: true,
            heuristic_mode: HeuristicMode::Sequential,
            smoothing: Some(FunnelOptions::default()),
            chosen_target: None,
            sequential_target: 0,
            inverted: false,
            callbacks: Vec::new(),
            current: None,
        }
    }
}

impl MultiTargetPath {
    /// Paths from `start` to each of `targets`
    pub fn new(start: Vec3, targets: &[Vec3]) -> Self {
        let mut path = Self::default();
        path.setup(start, targets);
        path
    }

    /// Paths from each of `starts` to `target`
    pub fn new_inverted(starts: &[Vec3], target: Vec3) -> Self {
        let mut path = Self::default();
        path.setup_inverted(starts, target);
        path
    }

    /// Searches from `start` towards every target
    pub fn setup(&mut self, start: Vec3, targets: &[Vec3]) {
        self.inverted = false;
        self.original_start_point = start;
        self.start_point = start;
        self.target_points = targets.to_vec();
        self.original_target_points = targets.to_vec();
        match targets.first() {
            Some(&first) => {
                self.end_point = first;
                self.original_end_point = first;
            }
            None => self.base.fail_with_error("No targets were assigned to the MultiTargetPath"),
        }
    }

    /// Searches from `target` towards every start and reverses the results
    pub fn setup_inverted(&mut self, starts: &[Vec3], target: Vec3) {
        self.setup(target, starts);
        self.inverted = true;
    }

    /// Sets a callback per target, called with the path parameters of that target
    pub fn set_target_callbacks(&mut self, callbacks: Vec<Option<PathCallback>>) -> Result<()> {
        if callbacks.len() != self.target_points.len() {
            return Err(Error::InvalidArgument(format!(
                "expected one callback per target ({}), got {}",
                self.target_points.len(),
                callbacks.len()
            )));
        }
        self.callbacks = callbacks;
        Ok(())
    }

    /// True when the path runs from several starts to one target
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Index of the target with the shortest path, if any was found
    pub fn chosen_target(&self) -> Option<usize> {
        self.chosen_target
    }

    /// Whether each target has been found or ruled out
    pub fn targets_found(&self) -> &[bool] {
        &self.targets_found
    }

    /// Nodes of the path to a target, `None` if it was not reached
    pub fn node_path(&self, target: usize) -> Option<&[NodeIndex]> {
        self.node_paths.get(target)?.as_deref()
    }

    /// Points of the path to a target, `None` if it was not reached
    pub fn vector_path(&self, target: usize) -> Option<&[Vec3]> {
        self.vector_paths.get(target)?.as_deref()
    }

    fn trace(&mut self, ctx: &mut SearchContext<'_>, from: NodeIndex, target: usize) {
        self.base.trace(ctx.data, ctx.handler, from);
        if let Some(options) = self.smoothing {
            if !self.base.path.is_empty() {
                funnel::smooth_path(
                    ctx.data,
                    &self.base.path,
                    self.start_point,
                    self.target_points[target],
                    options,
                    &ctx.handler.scratch,
                    &mut self.base.vector_path,
                );
            }
        }
        if self.inverted {
            self.base.path.reverse();
            self.base.vector_path.reverse();
        }
    }

    fn found_target(&mut self, ctx: &mut SearchContext<'_>, node: NodeIndex, target: usize) {
        ctx.handler.node_mut(node).flag1 = false;
        self.trace(ctx, node, target);

        let path = std::mem::take(&mut self.base.path);
        let vector_path = std::mem::take(&mut self.base.vector_path);
        self.node_paths[target] = Some(path);
        self.vector_paths[target] = Some(vector_path);
        self.targets_found[target] = true;
        self.target_node_count = self.target_node_count.saturating_sub(1);

        if !self.paths_for_all {
            self.base.set_complete_state(PathCompleteState::Complete);
            self.target_node_count = 0;
            return;
        }
        if self.target_node_count == 0 {
            self.base.set_complete_state(PathCompleteState::Complete);
            return;
        }
        self.recalculate_h_target(ctx, false);
    }

    /// Positions of the targets still searched for
    fn remaining_target_positions<'a>(&'a self, data: &'a NavData) -> impl Iterator<Item = Vec3> + 'a {
        self.target_nodes
            .iter()
            .zip(&self.targets_found)
            .filter(|(_, &found)| !found)
            .filter_map(move |(node, _)| node.map(|n| data.nodes()[n].position.to_vec3()))
    }

    fn recalculate_h_target(&mut self, ctx: &mut SearchContext<'_>, first_time: bool) {
        if !self.paths_for_all {
            self.base.heuristic = Heuristic::None;
            self.base.heuristic_scale = 0.0;
            return;
        }

        match self.heuristic_mode {
            HeuristicMode::None => {
                self.base.heuristic = Heuristic::None;
                self.base.heuristic_scale = 0.0;
            }
            HeuristicMode::Average | HeuristicMode::MovingAverage => {
                if self.heuristic_mode == HeuristicMode::Average && !first_time {
                    return;
                }
                let (sum, count) = self
                    .remaining_target_positions(ctx.data)
                    .fold((Vec3::ZERO, 0), |(sum, count), p| (sum + p, count + 1));
                if count > 0 {
                    self.base.h_target = Int3::from_vec3(sum / count as f32);
                }
            }
            HeuristicMode::Midpoint | HeuristicMode::MovingMidpoint => {
                if self.heuristic_mode == HeuristicMode::Midpoint && !first_time {
                    return;
                }
                let bounds = self.remaining_target_positions(ctx.data).fold(None, |bounds, p| match bounds {
                    None => Some((p, p)),
                    Some((min, max)) => Some((p.min(min), p.max(max))),
                });
                if let Some((min, max)) = bounds {
                    self.base.h_target = Int3::from_vec3((min + max) * 0.5);
                }
            }
            HeuristicMode::Sequential => {
                if !first_time && !self.targets_found[self.sequential_target] {
                    return;
                }
                let Some(start) = self.start_node else { return };
                let start_position = ctx.data.nodes()[start].position;
                let mut best = 0;
                for (j, node) in self.target_nodes.iter().enumerate() {
                    let Some(node) = node else { continue };
                    if self.targets_found[j] {
                        continue;
                    }
                    let d = (ctx.data.nodes()[*node].position - start_position).sqr_magnitude_long();
                    if d > best {
                        best = d;
                        self.base.h_target = Int3::from_vec3(self.target_points[j]);
                        self.sequential_target = j;
                    }
                }
            }
        }

        if !first_time {
            self.rebuild_open_list(ctx);
        }
    }

    /// Recomputes H for everything in the open list after the heuristic target moved
    fn rebuild_open_list(&mut self, ctx: &mut SearchContext<'_>) {
        for index in ctx.handler.heap_items() {
            let h = self.base.calculate_h_score(ctx.data, index);
            ctx.handler.node_mut(index).h = h;
        }
        ctx.handler.rebuild_heap();
    }

    fn choose_shortest_path(&mut self, ctx: &SearchContext<'_>) {
        self.chosen_target = None;
        let mut best_g = u32::MAX;
        for (i, path) in self.node_paths.iter().enumerate() {
            let Some(path) = path else { continue };
            let searched_end = if self.inverted { path.first() } else { path.last() };
            let Some(&node) = searched_end else { continue };
            let g = ctx.handler.node(node).g;
            if self.chosen_target.is_none() || g < best_g {
                self.chosen_target = Some(i);
                best_g = g;
            }
        }
    }

    fn set_path_parameters_for_return(&mut self, target: usize) {
        self.base.path.clear();
        if let Some(path) = &self.node_paths[target] {
            self.base.path.extend_from_slice(path);
        }
        self.base.vector_path.clear();
        if let Some(points) = &self.vector_paths[target] {
            self.base.vector_path.extend_from_slice(points);
        }
        if self.inverted {
            self.start_node = self.target_nodes[target];
            self.start_point = self.target_points[target];
            self.original_start_point = self.original_target_points[target];
        } else {
            self.end_node = self.target_nodes[target];
            self.end_point = self.target_points[target];
            self.original_end_point = self.original_target_points[target];
        }
    }
}

impl Path for MultiTargetPath {
    fn base(&self) -> &PathBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PathBase {
        &mut self.base
    }

    fn reset(&mut self) {
        *self = Self {
            base: std::mem::take(&mut self.base),
            ..Self::default()
        };
        self.base.reset();
    }

    fn prepare(&mut self, ctx: &mut SearchContext<'_>) {
        let data = ctx.data;
        self.base.nn_constraint.tags = self.base.enabled_tags;

        let start_info = data.get_nearest(self.start_point, &self.base.nn_constraint);
        self.start_node = start_info.node;
        let Some(start) = start_info.node.and_then(|n| data.node(n)) else {
            self.base.fail_with_error("Could not find start node for multi target path");
            return;
        };
        if !self.base.can_traverse(start) {
            self.base.fail_with_error("The node closest to the start point could not be traversed");
            return;
        }
        self.base.nn_constraint.set_start(Some(start));

        let count = self.target_points.len();
        self.node_paths = (0..count).map(|_| None).collect();
        self.vector_paths = (0..count).map(|_| None).collect();
        self.target_nodes = vec![None; count];
        self.targets_found = vec![false; count];
        self.target_node_count = count;

        let mut any_walkable = false;
        let mut any_same_area = false;
        let mut any_found = false;
        for i in 0..count {
            let info = data.get_nearest(self.target_points[i], &self.base.nn_constraint);
            self.target_nodes[i] = info.node;
            self.target_points[i] = info.position;

            let node = info.node.and_then(|n| data.node(n));
            if node.is_some() {
                any_found = true;
                self.end_node = info.node;
            }
            let traversable = node.is_some_and(|n| self.base.can_traverse(n));
            let same_area = node.is_some_and(|n| n.area() == start.area());
            any_walkable |= traversable;
            any_same_area |= same_area;
            if !traversable || !same_area {
                self.targets_found[i] = true;
                self.target_node_count -= 1;
            }
        }

        self.start_point = start_info.position;

        if !any_found {
            self.base.fail_with_error("Couldn't find nodes close to the all of the end points");
            return;
        }
        if !any_walkable {
            self.base.fail_with_error("No target nodes could be traversed");
            return;
        }
        if !any_same_area {
            self.base.fail_with_error("There are no valid paths to the targets");
            return;
        }
        self.recalculate_h_target(ctx, true);
    }

    fn initialize(&mut self, ctx: &mut SearchContext<'_>) {
        let Some(start) = self.start_node else {
            self.base.fail_with_error("The path was not prepared before it was initialized");
            return;
        };
        let g = self.base.traversal_cost(&ctx.data.nodes()[start]);
        let h = self.base.calculate_h_score(ctx.data, start);
        let path_id = ctx.handler.path_id();
        let pn = ctx.handler.node_mut(start);
        pn.parent = None;
        pn.path_id = path_id;
        pn.cost = 0;
        pn.g = g;
        pn.h = h;

        for j in 0..self.target_nodes.len() {
            match self.target_nodes[j] {
                Some(target) if target == start => self.found_target(ctx, start, j),
                Some(target) => ctx.handler.node_mut(target).flag1 = true,
                None => {}
            }
        }

        if self.target_node_count == 0 {
            self.base.set_complete_state(PathCompleteState::Complete);
            return;
        }

        if let Err(e) = open_node(&*self, ctx, start) {
            self.base.fail_with_error(e.to_string());
            return;
        }
        self.base.searched_nodes += 1;

        match ctx.handler.heap_remove() {
            Some(next) => self.current = Some(next),
            None => self.base.fail_with_error("No open points, the start node didn't open any nodes"),
        }
    }

    fn calculate_step(&mut self, ctx: &mut SearchContext<'_>, deadline: Instant) {
        let Some(mut current) = self.current else {
            if !self.base.is_done() {
                self.base.fail_with_error("The search has no current node");
            }
            return;
        };

        let mut counter = 0;
        while self.base.complete_state() == PathCompleteState::NotCalculated {
            self.base.searched_nodes += 1;

            if ctx.handler.node(current).flag1 {
                for i in 0..self.target_nodes.len() {
                    if !self.targets_found[i] && self.target_nodes[i] == Some(current) {
                        self.found_target(ctx, current, i);
                        if self.base.is_done() {
                            break;
                        }
                    }
                }
                if self.target_node_count == 0 {
                    self.base.set_complete_state(PathCompleteState::Complete);
                    break;
                }
            }

            if let Err(e) = open_node(&*self, ctx, current) {
                log::error!("{e}");
                self.base.fail_with_error(e.to_string());
                break;
            }

            match ctx.handler.heap_remove() {
                Some(next) => current = next,
                None => {
                    self.base.set_complete_state(PathCompleteState::Complete);
                    break;
                }
            }

            if counter > TIME_CHECK_INTERVAL {
                if Instant::now() >= deadline {
                    break;
                }
                counter = 0;
            }
            counter += 1;
        }
        self.current = Some(current);
    }

    fn cleanup(&mut self, ctx: &mut SearchContext<'_>) {
        self.choose_shortest_path(ctx);
        for node in self.target_nodes.iter().flatten() {
            ctx.handler.node_mut(*node).flag1 = false;
        }
    }

    /// Calls the per-target callbacks with each target's path, then the
    /// main callback with the shortest path
    fn return_path(&mut self) {
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let callback = self.base.take_callback();

        if self.base.has_error() {
            for cb in callbacks.iter_mut().filter_map(Option::take) {
                cb(&*self);
            }
            if let Some(cb) = callback {
                cb(&*self);
            }
            return;
        }

        if self.inverted {
            self.end_point = self.start_point;
            self.end_node = self.start_node;
            self.original_end_point = self.original_start_point;
        }

        let mut any_succeeded = false;
        for i in 0..self.node_paths.len() {
            if self.node_paths[i].is_some() {
                self.base.force_complete_state(PathCompleteState::Complete);
                any_succeeded = true;
            } else {
                self.base.force_complete_state(PathCompleteState::Error);
            }
            if let Some(cb) = callbacks.get_mut(i).and_then(Option::take) {
                self.set_path_parameters_for_return(i);
                cb(&*self);
            }
        }

        match self.chosen_target {
            Some(chosen) if any_succeeded => {
                self.base.force_complete_state(PathCompleteState::Complete);
                self.set_path_parameters_for_return(chosen);
            }
            _ => self.base.force_complete_state(PathCompleteState::Error),
        }

        if let Some(cb) = callback {
            cb(&*self);
        }
    }

    fn debug_string(&self, log: PathLog) -> String {
        let error = self.base.has_error();
        if log == PathLog::None || (!error && log == PathLog::OnlyErrors) {
            return String::new();
        }
        let mut text = String::new();
        self.base.debug_string_prefix(log, &mut text);
        if !error {
            text.push_str("\nShortest path was ");
            match self.chosen_target.and_then(|t| self.node_path(t)) {
                Some(path) => text.push_str(&path.len().to_string()),
                None => text.push_str("undefined"),
            }
            text.push_str(" nodes long");

            if log == PathLog::Heavy {
                text.push_str(&format!("\nPaths ({}):", self.targets_found.len()));
                for (i, found) in self.targets_found.iter().enumerate() {
                    text.push_str(&format!("\n\n\tPath {i} Found: {found}"));
                    if let Some(path) = self.node_path(i) {
                        text.push_str(&format!("\n\t\tLength: {}", path.len()));
                        text.push_str(&format!("\n\t\tEnd Point: {}", self.target_points[i]));
                    }
                }
                text.push_str(&format!("\nStart Node\n\tPoint: {}", self.start_point));
            }
        }
        self.base.debug_string_suffix(&mut text);
        text
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

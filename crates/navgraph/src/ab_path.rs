//! Path from a start point to an end point

use std::any::Any;

use glam::Vec3;
use navgraph_common::Int3;
use web_time::Instant;

use crate::config::PathLog;
use crate::funnel::{self, FunnelOptions};
use crate::graph_node::NodeIndex;
use crate::nav_data::NavData;
use crate::path::{open_node, Path, PathBase, PathCompleteState, SearchContext};

/// Searched nodes after which the search is assumed to be stuck
const MAX_SEARCHED_NODES: usize = 1_000_000;

/// Number of expanded nodes between deadline checks
const TIME_CHECK_INTERVAL: usize = 500;

/// A* search between two points.
///
/// The start and end points are snapped to the closest suitable nodes.
/// The connections leaving the start node and entering the end node are
/// costed from the snapped points rather than the node centers.
#[derive(Debug)]
pub struct ABPath {
    base: PathBase,
    pub start_node: Option<NodeIndex>,
    pub end_node: Option<NodeIndex>,
    /// Start point as requested
    pub original_start_point: Vec3,
    /// End point as requested
    pub original_end_point: Vec3,
    /// Start point snapped onto the graph once the path has been prepared
    pub start_point: Vec3,
    /// End point snapped onto the graph once the path has been prepared
    pub end_point: Vec3,
    start_int_point: Int3,
    /// Return a path to the closest reachable node when the end cannot be reached
    pub calculate_partial: bool,
    partial_best_target: Option<NodeIndex>,
    /// Funnel settings, or `None` to keep the node positions
    pub smoothing: Option<FunnelOptions>,
    current: Option<NodeIndex>,
}

impl Default for ABPath {
    fn default() -> Self {
        Self {
            base: PathBase::new(),
            start_node: None,
            end_node: None,
            original_start_point: Vec3::ZERO,
            original_end_point: Vec3::ZERO,
            start_point: Vec3::ZERO,
            end_point: Vec3::ZERO,
            start_int_point: Int3::ZERO,
            calculate_partial: false,
            partial_best_target: None,
            smoothing: Some(FunnelOptions::default()),
            current: None,
        }
    }
}

impl ABPath {
    pub fn new(start: Vec3, end: Vec3) -> Self {
        let mut path = Self::default();
        path.setup(start, end);
        path
    }

    /// Sets the points to search between
    pub fn setup(&mut self, start: Vec3, end: Vec3) {
        self.original_start_point = start;
        self.original_end_point = end;
        self.start_point = start;
        self.end_point = end;
        self.start_int_point = Int3::from_vec3(start);
        self.base.h_target = Int3::from_vec3(end);
    }

    fn trace(&mut self, ctx: &mut SearchContext<'_>, from: NodeIndex) {
        self.base.trace(ctx.data, ctx.handler, from);
        if self.base.path.is_empty() {
            return;
        }

        let end = if self.base.complete_state() == PathCompleteState::Complete {
            self.end_point
        } else {
            self.base.vector_path.last().copied().unwrap_or(self.end_point)
        };

        match self.smoothing {
            Some(options) => funnel::smooth_path(
                ctx.data,
                &self.base.path,
                self.start_point,
                end,
                options,
                &ctx.handler.scratch,
                &mut self.base.vector_path,
            ),
            None => {
                let points = &mut self.base.vector_path;
                if points.len() == 1 {
                    points.push(end);
                }
                points[0] = self.start_point;
                if let Some(last) = points.last_mut() {
                    *last = end;
                }
            }
        }
    }

    fn complete_partial_or_fail(&mut self, ctx: &mut SearchContext<'_>, msg: &str) {
        match self.partial_best_target {
            Some(best) if self.calculate_partial => {
                self.base.set_complete_state(PathCompleteState::Partial);
                self.trace(ctx, best);
            }
            _ => self.base.fail_with_error(msg),
        }
    }
}

impl Path for ABPath {
    fn base(&self) -> &PathBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PathBase {
        &mut self.base
    }

    fn reset(&mut self) {
        self.base.reset();
        self.start_node = None;
        self.end_node = None;
        self.original_start_point = Vec3::ZERO;
        self.original_end_point = Vec3::ZERO;
        self.start_point = Vec3::ZERO;
        self.end_point = Vec3::ZERO;
        self.start_int_point = Int3::ZERO;
        self.calculate_partial = false;
        self.partial_best_target = None;
        self.smoothing = Some(FunnelOptions::default());
        self.current = None;
    }

    fn prepare(&mut self, ctx: &mut SearchContext<'_>) {
        let data = ctx.data;
        self.base.nn_constraint.tags = self.base.enabled_tags;

        let start_info = data.get_nearest(self.start_point, &self.base.nn_constraint);
        let start = start_info.node.and_then(|n| data.node(n));
        self.base.nn_constraint.set_start(start);
        self.start_point = start_info.position;
        self.start_int_point = Int3::from_vec3(self.start_point);
        self.start_node = start_info.node;

        let Some(start) = start else {
            self.base.fail_with_error("Couldn't find a node close to the start point");
            return;
        };
        if !self.base.can_traverse(start) {
            self.base.fail_with_error("The node closest to the start point could not be traversed");
            return;
        }

        let end_info = data.get_nearest(self.end_point, &self.base.nn_constraint);
        self.end_point = end_info.position;
        self.end_node = end_info.node;

        let (Some(end_index), Some(end)) = (end_info.node, end_info.node.and_then(|n| data.node(n))) else {
            self.base.fail_with_error("Couldn't find a node close to the end point");
            return;
        };
        if !self.base.can_traverse(end) {
            self.base.fail_with_error("The node closest to the end point could not be traversed");
            return;
        }
        if start.area() != end.area() && !self.calculate_partial {
            self.base.fail_with_error(format!(
                "There is no valid path to the target (start area: {}, target area: {})",
                start.area(),
                end.area()
            ));
            return;
        }

        ctx.handler.node_mut(end_index).flag1 = true;
        self.base.h_target = Int3::from_vec3(self.end_point);
        self.base.h_target_node = Some(end_index);
    }

    fn initialize(&mut self, ctx: &mut SearchContext<'_>) {
        let (Some(start), Some(end)) = (self.start_node, self.end_node) else {
            self.base.fail_with_error("The path was not prepared before it was initialized");
            return;
        };
        ctx.handler.node_mut(start).flag2 = true;
        ctx.handler.node_mut(end).flag2 = true;
        let path_id = ctx.handler.path_id();

        if start == end {
            let pn = ctx.handler.node_mut(end);
            pn.parent = None;
            pn.path_id = path_id;
            pn.cost = 0;
            pn.g = 0;
            pn.h = 0;
            self.base.set_complete_state(PathCompleteState::Complete);
            self.trace(ctx, end);
            return;
        }

        let g = self.base.traversal_cost(&ctx.data.nodes()[start]);
        let h = self.base.calculate_h_score(ctx.data, start);
        let pn = ctx.handler.node_mut(start);
        pn.parent = None;
        pn.path_id = path_id;
        pn.cost = 0;
        pn.g = g;
        pn.h = h;

        if let Err(e) = open_node(&*self, ctx, start) {
            self.base.fail_with_error(e.to_string());
            return;
        }
        self.base.searched_nodes += 1;
        self.partial_best_target = Some(start);

        match ctx.handler.heap_remove() {
            Some(next) => self.current = Some(next),
            None => self.complete_partial_or_fail(ctx, "No open points, the start node didn't open any nodes"),
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
                self.base.set_complete_state(PathCompleteState::Complete);
                break;
            }

            if let Some(best) = self.partial_best_target {
                if ctx.handler.node(current).h < ctx.handler.node(best).h {
                    self.partial_best_target = Some(current);
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
                    self.current = None;
                    self.complete_partial_or_fail(ctx, "Searched whole area but could not find target");
                    return;
                }
            }

            if counter > TIME_CHECK_INTERVAL {
                if Instant::now() >= deadline {
                    self.current = Some(current);
                    return;
                }
                counter = 0;
                if self.base.searched_nodes > MAX_SEARCHED_NODES {
                    self.base.fail_with_error("Probable infinite loop. Over 1,000,000 nodes searched");
                    break;
                }
            }
            counter += 1;
        }

        self.current = Some(current);
        if self.base.complete_state() == PathCompleteState::Complete {
            self.trace(ctx, current);
        } else if !self.base.has_error() && self.calculate_partial {
            if let Some(best) = self.partial_best_target {
                self.base.set_complete_state(PathCompleteState::Partial);
                self.trace(ctx, best);
            }
        }
    }

    fn cleanup(&mut self, ctx: &mut SearchContext<'_>) {
        if let Some(start) = self.start_node {
            ctx.handler.node_mut(start).flag2 = false;
        }
        if let Some(end) = self.end_node {
            let pn = ctx.handler.node_mut(end);
            pn.flag1 = false;
            pn.flag2 = false;
        }
    }

    /// Scales connections touching the start or end node by how far the
    /// snapped point is from the neighbour compared to the node center
    fn connection_special_cost(&self, data: &NavData, a: NodeIndex, b: NodeIndex, cost: u32) -> u32 {
        let (Some(start), Some(end)) = (self.start_node, self.end_node) else {
            return cost;
        };
        let pa = data.nodes()[a].position;
        let pb = data.nodes()[b].position;
        let center_distance = (pa - pb).cost_magnitude();
        let scaled = |d: Int3| -> u32 {
            let distance = d.cost_magnitude().max(0) as f64;
            if center_distance <= 0 {
                distance as u32
            } else {
                (distance * (cost as f64 / center_distance as f64)) as u32
            }
        };

        if a == start {
            let other = if b == end { self.base.h_target } else { pb };
            scaled(self.start_int_point - other)
        } else if b == start {
            let other = if a == end { self.base.h_target } else { pa };
            scaled(self.start_int_point - other)
        } else if a == end {
            scaled(self.base.h_target - pb)
        } else if b == end {
            scaled(self.base.h_target - pa)
        } else {
            cost
        }
    }

    fn return_path(&mut self) {
        if let Some(callback) = self.base.take_callback() {
            callback(&*self);
        }
    }

    fn debug_string(&self, log: PathLog) -> String {
        if log == PathLog::None || (!self.base.has_error() && log == PathLog::OnlyErrors) {
            return String::new();
        }
        let mut text = String::new();
        self.base.debug_string_prefix(log, &mut text);
        if log == PathLog::Heavy && !self.base.has_error() {
            text.push_str(&format!(
                "\nStart Node\n\tPoint: {}\n\tNode: {}",
                self.start_point,
                self.start_node.map(|n| n.to_string()).unwrap_or_else(|| "None".to_string())
            ));
            text.push_str(&format!(
                "\nEnd Node\n\tPoint: {}\n\tNode: {}",
                self.end_point,
                self.end_node.map(|n| n.to_string()).unwrap_or_else(|| "None".to_string())
            ));
        }
        self.base.debug_string_suffix(&mut text);
        text
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

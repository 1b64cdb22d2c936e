use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use super::errors::{Endpoint, NavError, NavResult};
use super::grid::Grid;
use super::registry::GridRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestType {
    #[default]
    Normal,
    /// Only gathers route information; the requester does not intend to move.
    IntelOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRequestState {
    Created,
    Resolved,
    Planned,
    Consumed,
    Discarded,
}

/// One navigation query.
///
/// The caller fills in the endpoints and policy flags; `resolve` binds both endpoints to
/// registered grids, the planner supplies waypoints with `plan`, and the caller drains them.
#[derive(Debug, Clone)]
pub struct PathRequest {
    pub from: Vec3,
    pub to: Vec3,
    pub requester: Option<Entity>,
    pub request_type: RequestType,
    /// How far (in cells) a blocked endpoint may be moved to reach a walkable cell.
    pub max_escape_cell_distance_if_origin_blocked: u32,
    pub use_path_smoothing: bool,
    pub allow_corner_cutting: bool,
    pub prevent_off_grid_navigation: bool,
    pub prevent_diagonal_moves: bool,
    pub navigate_to_nearest_if_blocked: bool,
    from_grid: Option<Arc<Grid>>,
    to_grid: Option<Arc<Grid>>,
    resolved_from: Option<Vec3>,
    resolved_to: Option<Vec3>,
    pending_waypoints: VecDeque<Vec3>,
    state: PathRequestState,
}

impl PathRequest {
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self {
            from,
            to,
            requester: None,
            request_type: RequestType::Normal,
            max_escape_cell_distance_if_origin_blocked: 3,
            use_path_smoothing: true,
            allow_corner_cutting: false,
            prevent_off_grid_navigation: false,
            prevent_diagonal_moves: false,
            navigate_to_nearest_if_blocked: false,
            from_grid: None,
            to_grid: None,
            resolved_from: None,
            resolved_to: None,
            pending_waypoints: VecDeque::new(),
            state: PathRequestState::Created,
        }
    }

    pub fn with_requester(mut self, requester: Entity) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn state(&self) -> PathRequestState {
        self.state
    }

    pub fn from_grid(&self) -> Option<&Arc<Grid>> {
        self.from_grid.as_ref()
    }

    pub fn to_grid(&self) -> Option<&Arc<Grid>> {
        self.to_grid.as_ref()
    }

    /// Where the path actually starts: `from`, or its substitute after clamping or escaping.
    pub fn resolved_from(&self) -> Option<Vec3> {
        self.resolved_from
    }

    pub fn resolved_to(&self) -> Option<Vec3> {
        self.resolved_to
    }

    pub fn pending_waypoints(&self) -> &VecDeque<Vec3> {
        &self.pending_waypoints
    }

    /// Bind both endpoints to registered grids.
    ///
    /// Nothing is assigned unless both endpoints resolve, so a failed request keeps its grids
    /// unset. Blocked origins always escape to the nearest walkable cell; blocked destinations
    /// only with `navigate_to_nearest_if_blocked`.
    pub fn resolve(&mut self, registry: &GridRegistry) -> NavResult<()> {
        let (from_grid, from_point) = self.resolve_endpoint(Endpoint::From, self.from, registry)?;
        let (to_grid, to_point) = self.resolve_endpoint(Endpoint::To, self.to, registry)?;

        self.from_grid = Some(from_grid);
        self.to_grid = Some(to_grid);
        self.resolved_from = Some(from_point);
        self.resolved_to = Some(to_point);
        self.pending_waypoints.clear();
        self.state = PathRequestState::Resolved;
        Ok(())
    }

    fn resolve_endpoint(&self, endpoint: Endpoint, position: Vec3, registry: &GridRegistry) -> NavResult<(Arc<Grid>, Vec3)> {
        let failure = || NavError::ResolutionFailure { endpoint, position };

        let (grid, point) = match registry.grid_at(position) {
            Some(grid) => (grid.clone(), position),
            None if self.prevent_off_grid_navigation => return Err(failure()),
            None => {
                // Fall back to the closest point well inside the nearest grid
                let grid = registry.nearest_grid(position).ok_or_else(failure)?;
                let inner = grid.bounds().expand(-grid.cell_matrix().cell_size());
                debug!("{} {:?} is off-grid, clamped onto grid '{}'", endpoint, position, grid.name());
                (grid.clone(), inner.clamp(position))
            }
        };

        let cell = *grid.cell_at(point).ok_or_else(failure)?;
        let escape = match endpoint {
            Endpoint::From => true,
            Endpoint::To => self.navigate_to_nearest_if_blocked,
        };
        if cell.walkable || !escape {
            return Ok((grid, point));
        }

        let max_distance = self.max_escape_cell_distance_if_origin_blocked;
        let matrix = grid.cell_matrix();
        let Some((nearest, distance)) = matrix.nearest_walkable(cell.x as usize, cell.z as usize, max_distance) else {
            return Err(NavError::UnreachableDestination { endpoint, position, max_distance });
        };
        let substitute = matrix.cell_center(nearest.x as usize, nearest.z as usize);
        debug!("{} cell ({}, {}) blocked, escaped {} cells to ({}, {})", endpoint, cell.x, cell.z, distance, nearest.x, nearest.z);
        Ok((grid, substitute))
    }

    /// Hand over the planner's waypoints. Only valid on a resolved (or already planned) request.
    pub fn plan(&mut self, waypoints: impl IntoIterator<Item = Vec3>) -> bool {
        if !matches!(self.state, PathRequestState::Resolved | PathRequestState::Planned) {
            return false;
        }
        self.pending_waypoints = waypoints.into_iter().collect();
        self.state = PathRequestState::Planned;
        true
    }

    /// Take the next waypoint. The request is consumed once the last one has been taken.
    pub fn next_waypoint(&mut self) -> Option<Vec3> {
        if self.state != PathRequestState::Planned {
            return None;
        }
        let waypoint = self.pending_waypoints.pop_front();
        if self.pending_waypoints.is_empty() {
            self.state = PathRequestState::Consumed;
        }
        waypoint
    }

    pub fn drain_waypoints(&mut self) -> Vec<Vec3> {
        if self.state != PathRequestState::Planned {
            return Vec::new();
        }
        self.state = PathRequestState::Consumed;
        self.pending_waypoints.drain(..).collect()
    }

    /// Drop everything the engine and planner attached.
    pub fn discard(&mut self) {
        self.from_grid = None;
        self.to_grid = None;
        self.resolved_from = None;
        self.resolved_to = None;
        self.pending_waypoints.clear();
        self.state = PathRequestState::Discarded;
    }

    /// Reuse the request for new endpoints, keeping requester and policy flags.
    pub fn recycle(&mut self, from: Vec3, to: Vec3) {
        self.discard();
        self.from = from;
        self.to = to;
        self.state = PathRequestState::Created;
    }
}

/// Ask the plugin to resolve a request against the registry.
#[derive(Message, Debug, Clone)]
pub struct PathRequestMessage(pub PathRequest);

#[derive(Message, Debug, Clone)]
pub struct PathResolvedMessage {
    pub request: PathRequest,
    pub result: NavResult<()>,
}

//! Ownership of the live navigation graph
//!
//! The [`WorldAdapter`] holds at most one graph, swaps it atomically with
//! respect to its observers, services debounced rebuild requests once per
//! tick and offers ground-aware path and walk queries on top of the graph.

use crate::config::WorldSettings;
use crate::picking::GroundPicker;
use crate::rebuild::{FinishedRebuild, RebuildCallback, RebuildQueue};
use navgraph::{
    shared, AgentType, GeometryInput, GraphEvent, GridGraph, ListenerId, QueryFilter,
    SharedGraph,
};
use navgraph_common::{Error, Result, Vec3};
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Lifecycle notifications for systems depending on the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldEvent {
    /// A graph is about to be installed
    GraphLoading,
    /// A graph was installed and is ready for queries
    GraphLoaded,
    /// The current graph is about to be released
    GraphRemoving,
    /// The previous graph was disposed
    GraphRemoved,
    /// The installed graph started an edit
    GraphUpdating,
    /// The installed graph finished an edit
    GraphUpdated,
}

/// World event observer
pub type WorldObserver = Arc<dyn Fn(WorldEvent) + Send + Sync>;

/// Handle returned by [`WorldAdapter::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type ObserverList = Arc<RwLock<Vec<(ObserverId, WorldObserver)>>>;

fn notify(observers: &ObserverList, event: WorldEvent) {
    let snapshot: Vec<WorldObserver> = match observers.read() {
        Ok(list) => list.iter().map(|(_, o)| Arc::clone(o)).collect(),
        Err(e) => {
            log::warn!("World observer list poisoned: {}", e);
            return;
        }
    };
    for observer in snapshot {
        observer(event);
    }
}

pub struct WorldAdapter {
    settings: WorldSettings,
    input: GeometryInput,
    picker: Option<Arc<dyn GroundPicker>>,
    graph: Option<SharedGraph>,
    graph_listener: Option<ListenerId>,
    observers: ObserverList,
    next_observer_id: u64,
    queue: RebuildQueue,
}

impl WorldAdapter {
    pub fn new(input: GeometryInput, settings: WorldSettings) -> Result<Self> {
        settings.validate().map_err(Error::InvalidInput)?;
        Ok(Self {
            settings,
            input,
            picker: None,
            graph: None,
            graph_listener: None,
            observers: Arc::new(RwLock::new(Vec::new())),
            next_observer_id: 0,
            queue: RebuildQueue::default(),
        })
    }

    pub fn with_ground_picker(mut self, picker: Arc<dyn GroundPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn set_ground_picker(&mut self, picker: Option<Arc<dyn GroundPicker>>) {
        self.picker = picker;
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn input(&self) -> &GeometryInput {
        &self.input
    }

    /// Geometry used by later rebuilds; changes apply on the next rebuild
    pub fn input_mut(&mut self) -> &mut GeometryInput {
        &mut self.input
    }

    /// The installed graph, if any
    pub fn graph(&self) -> Option<SharedGraph> {
        self.graph.clone()
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    pub fn subscribe(&mut self, observer: WorldObserver) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        match self.observers.write() {
            Ok(mut list) => list.push((id, observer)),
            Err(e) => log::warn!("World observer list poisoned: {}", e),
        }
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        match self.observers.write() {
            Ok(mut list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            }
            Err(_) => false,
        }
    }

    fn current(&self) -> Result<SharedGraph> {
        self.graph
            .clone()
            .ok_or_else(|| Error::GraphNotReady("no navigation graph installed".to_string()))
    }

    /// Releases the installed graph
    ///
    /// The adapter stops listening to the old graph before disposing it, so
    /// observers never see events from a graph that is going away.
    pub fn remove_graph(&mut self) {
        let Some(old) = &self.graph else {
            return;
        };
        notify(&self.observers, WorldEvent::GraphRemoving);
        match old.write() {
            Ok(mut graph) => {
                if let Some(id) = self.graph_listener.take() {
                    graph.unsubscribe(id);
                }
                graph.dispose();
            }
            Err(e) => log::warn!("Navigation graph lock poisoned while removing: {}", e),
        }
        self.graph = None;
        notify(&self.observers, WorldEvent::GraphRemoved);
        log::debug!("Removed navigation graph");
    }

    /// Replaces the installed graph with `graph`
    pub fn install_graph(&mut self, graph: GridGraph) -> Result<()> {
        self.remove_graph();
        notify(&self.observers, WorldEvent::GraphLoading);

        let graph = shared(graph);
        let observers = Arc::clone(&self.observers);
        let listener = {
            let mut guard = graph
                .write()
                .map_err(|e| Error::LockPoisoned(e.to_string()))?;
            guard.attach_source(self.input.provider());
            guard.subscribe(Arc::new(move |event: GraphEvent| {
                let forwarded = match event {
                    GraphEvent::Updating => WorldEvent::GraphUpdating,
                    GraphEvent::Updated => WorldEvent::GraphUpdated,
                };
                notify(&observers, forwarded);
            }))
        };
        self.graph = Some(graph);
        self.graph_listener = Some(listener);

        notify(&self.observers, WorldEvent::GraphLoaded);
        log::info!("Installed navigation graph");
        Ok(())
    }

    /// Installs the cached graph if it matches the current input, building
    /// (and caching) a fresh one otherwise
    pub fn load_or_build(&mut self) -> Result<()> {
        let hash = self
            .input
            .get_hash(&self.settings.graph, &self.settings.agent_types);
        let cached = self
            .settings
            .cache_path
            .as_ref()
            .and_then(|path| self.input.load(path, Some(hash.as_str())));

        let graph = match cached {
            Some(graph) => graph,
            None => {
                let graph = self.input.create_graph(
                    &self.settings.graph,
                    &self.settings.agent_types,
                    None,
                )?;
                self.save_to_cache(&graph);
                graph
            }
        };
        self.install_graph(graph)
    }

    fn save_to_cache(&self, graph: &GridGraph) {
        if let Some(path) = &self.settings.cache_path {
            if let Err(e) = self.input.save(path, graph) {
                log::warn!("Failed to cache navigation graph at {}: {}", path.display(), e);
            }
        }
    }

    /// Requests a rebuild from the current input
    ///
    /// A request that has not started yet is replaced, callback included.
    /// Returns true if an earlier pending request was replaced.
    pub fn enqueue_navigation_graph_update(&mut self, callback: Option<RebuildCallback>) -> bool {
        self.queue.enqueue(callback)
    }

    pub fn has_pending_update(&self) -> bool {
        self.queue.has_pending()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.queue.is_running()
    }

    /// Rebuilds started since the adapter was created
    pub fn rebuild_count(&self) -> u64 {
        self.queue.started()
    }

    /// Per-tick servicing of the rebuild queue
    ///
    /// Installs a finished rebuild, or starts the pending request when no
    /// rebuild is running. A tick never does both, so a request made during a
    /// rebuild starts on the tick after it is installed. Returns true if a new
    /// graph was installed.
    pub fn update(&mut self) -> Result<bool> {
        if let Some(finished) = self.queue.poll(false) {
            return self.finish_rebuild(finished);
        }
        self.queue
            .start(&self.input, &self.settings.graph, &self.settings.agent_types)?;
        Ok(false)
    }

    /// Waits for the running rebuild, if any, and installs it
    pub fn wait_for_rebuild(&mut self) -> Result<bool> {
        match self.queue.poll(true) {
            Some(finished) => self.finish_rebuild(finished),
            None => Ok(false),
        }
    }

    fn finish_rebuild(&mut self, finished: FinishedRebuild) -> Result<bool> {
        let FinishedRebuild { result, callback } = finished;
        let installed = match result {
            Ok(graph) => {
                self.save_to_cache(&graph);
                self.install_graph(graph).map(|_| true)
            }
            Err(e) => {
                log::warn!("Navigation graph rebuild failed, keeping the current graph: {}", e);
                Ok(false)
            }
        };
        if let Some(callback) = callback {
            callback(matches!(installed, Ok(true)));
        }
        installed
    }

    /// Nearest real ground on the vertical line through `position`
    fn snap_to_ground(&self, position: Vec3) -> Vec3 {
        self.picker
            .as_ref()
            .and_then(|picker| picker.find_nearest_ground(position))
            .map_or(position, |hit| hit.position)
    }

    /// Path from `from` to `to`, or `None` when no path exists
    ///
    /// With `use_ground` the endpoints are snapped to real ground before the
    /// query and every waypoint is snapped afterwards.
    pub fn find_path(
        &self,
        agent: &AgentType,
        from: Vec3,
        to: Vec3,
        use_ground: bool,
    ) -> Result<Option<Vec<Vec3>>> {
        let (from, to) = if use_ground {
            (self.snap_to_ground(from), self.snap_to_ground(to))
        } else {
            (from, to)
        };

        let shared = self.current()?;
        let path = {
            let graph = shared
                .read()
                .map_err(|e| Error::LockPoisoned(e.to_string()))?;
            graph.find_path(agent, from, to)?
        };
        if path.len() <= 1 {
            return Ok(None);
        }
        if use_ground {
            return Ok(Some(path.into_iter().map(|p| self.snap_to_ground(p)).collect()));
        }
        Ok(Some(path))
    }

    /// [`WorldAdapter::find_path`] without ground snapping, run on the blocking pool
    pub fn find_path_async(
        &self,
        agent: AgentType,
        from: Vec3,
        to: Vec3,
    ) -> impl Future<Output = Result<Option<Vec<Vec3>>>> + Send + 'static {
        let graph = self.current();
        async move {
            let path = navgraph::find_path_async(graph?, agent, from, to).await?;
            Ok(if path.len() > 1 { Some(path) } else { None })
        }
    }

    /// Resolves a step from `prev` towards `new`
    ///
    /// Returns whether the agent can move and where it ends up. An unwalkable
    /// target is replaced by the furthest walkable point towards it, or by the
    /// nearest walkable point when that lies within the step length. The
    /// result never moves further from `prev` than `new` does.
    pub fn walk(
        &self,
        agent: &AgentType,
        prev: Vec3,
        new: Vec3,
        adjust_height: bool,
    ) -> Result<(bool, Vec3)> {
        let step = new - prev;
        let max_len = step.length();

        let shared = self.current()?;
        let candidate = {
            let graph = shared
                .read()
                .map_err(|e| Error::LockPoisoned(e.to_string()))?;
            let (walkable, nearest) = graph.is_walkable(agent, new, self.settings.walk_threshold)?;
            if walkable {
                Some(nearest)
            } else {
                let hit = graph.raycast(agent, prev, new, &QueryFilter::default())?;
                if hit.t > 0.0 {
                    Some(hit.position)
                } else if nearest.distance(new) <= max_len {
                    Some(nearest)
                } else {
                    None
                }
            }
        };
        let Some(mut position) = candidate else {
            return Ok((false, prev));
        };

        if adjust_height {
            position = self.snap_to_ground(position);
        } else {
            position.y = new.y;
        }

        let offset = position - prev;
        if offset.length() > max_len {
            position = prev + offset.normalize_or_zero() * max_len;
        }
        Ok((true, position))
    }

    /// Removes the graph and drops any pending request
    ///
    /// A rebuild already running finishes on its worker and is discarded.
    pub fn shutdown(&mut self) {
        self.queue = RebuildQueue::default();
        self.remove_graph();
    }
}

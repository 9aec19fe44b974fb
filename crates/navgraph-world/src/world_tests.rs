//! World adapter tests: graph swaps, cached loads, debounced rebuilds and
//! ground-aware queries

#[cfg(test)]
mod tests {
    use crate::{MeshGroundPicker, WorldAdapter, WorldEvent, WorldSettings};
    use navgraph::{
        AgentType, Area, AreaType, GeometryInput, GraphState, ObstacleShape, TriMesh, Triangle,
    };
    use navgraph_common::{BoundingBox, Error, Result, Vec3};
    use navgraph_crowd::{AgentParams, Crowd, CrowdSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn plane_world() -> WorldAdapter {
        WorldAdapter::new(
            GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0)),
            WorldSettings::default(),
        )
        .unwrap()
    }

    fn islands_mesh() -> TriMesh {
        let mut triangles = Vec::new();
        for (min_x, max_x) in [(-10.0, -1.0), (1.0, 10.0)] {
            let a = Vec3::new(min_x, 0.0, -3.0);
            let b = Vec3::new(max_x, 0.0, -3.0);
            let c = Vec3::new(max_x, 0.0, 3.0);
            let d = Vec3::new(min_x, 0.0, 3.0);
            triangles.push(Triangle::new(a, c, b));
            triangles.push(Triangle::new(a, d, c));
        }
        TriMesh::from_triangles(&triangles)
    }

    fn record(world: &mut WorldAdapter) -> Arc<Mutex<Vec<WorldEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        world.subscribe(Arc::new(move |event: WorldEvent| sink.lock().unwrap().push(event)));
        events
    }

    fn counter() -> (Arc<AtomicUsize>, crate::RebuildCallback) {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = calls.clone();
        let callback: crate::RebuildCallback = Box::new(move |ok| {
            assert!(ok);
            hits.fetch_add(1, Ordering::SeqCst);
        });
        (calls, callback)
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut settings = WorldSettings::default();
        settings.agent_types.clear();
        let input = GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0));
        assert!(matches!(
            WorldAdapter::new(input, settings),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_queries_need_a_graph() {
        let world = plane_world();
        let agent = AgentType::default();
        assert!(!world.has_graph());
        assert!(matches!(
            world.find_path(&agent, Vec3::ZERO, Vec3::ONE, false),
            Err(Error::GraphNotReady(_))
        ));
        assert!(matches!(
            world.walk(&agent, Vec3::ZERO, Vec3::X, false),
            Err(Error::GraphNotReady(_))
        ));
    }

    #[test]
    fn test_swap_protocol_events() -> Result<()> {
        let mut world = plane_world();
        let events = record(&mut world);

        world.load_or_build()?;
        let first = world.graph().unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![WorldEvent::GraphLoading, WorldEvent::GraphLoaded]
        );

        world.load_or_build()?;
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                WorldEvent::GraphLoading,
                WorldEvent::GraphLoaded,
                WorldEvent::GraphRemoving,
                WorldEvent::GraphRemoved,
                WorldEvent::GraphLoading,
                WorldEvent::GraphLoaded,
            ]
        );
        assert_eq!(first.read().unwrap().state(), GraphState::Disposed);
        assert!(!Arc::ptr_eq(&first, &world.graph().unwrap()));

        world.shutdown();
        assert!(!world.has_graph());
        assert_eq!(events.lock().unwrap().len(), 8);
        Ok(())
    }

    #[test]
    fn test_removed_graph_is_disposed_before_removed_event() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;
        let old = world.graph().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let watched = old.clone();
        world.subscribe(Arc::new(move |event: WorldEvent| {
            let state = watched.read().unwrap().state();
            sink.lock().unwrap().push((event, state));
        }));

        world.remove_graph();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (WorldEvent::GraphRemoving, GraphState::Ready),
                (WorldEvent::GraphRemoved, GraphState::Disposed),
            ]
        );
        assert!(!world.has_graph());
        // The adapter released its handle
        assert_eq!(Arc::strong_count(&old), 2);
        Ok(())
    }

    #[test]
    fn test_graph_edits_are_forwarded() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;
        let events = record(&mut world);

        let graph = world.graph().unwrap();
        {
            let mut graph = graph.write().unwrap();
            graph.add_obstacle(ObstacleShape::Cylinder {
                center: Vec3::new(3.0, 0.0, 3.0),
                radius: 1.0,
                height: 2.0,
            })?;
            graph.update_obstacles(None)?;
        }
        assert_eq!(
            *events.lock().unwrap(),
            vec![WorldEvent::GraphUpdating, WorldEvent::GraphUpdated]
        );

        // A replaced graph no longer reaches the observers
        world.load_or_build()?;
        events.lock().unwrap().clear();
        assert!(graph.write().unwrap().update_obstacles(None).is_err());
        assert!(events.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_cached_graph_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("level.ngph");
        let settings = WorldSettings::default().with_cache_path(&cache);
        let agent = AgentType::default();
        let (from, to) = (Vec3::new(-8.0, 0.0, 2.0), Vec3::new(7.0, 0.0, -6.0));

        let mut built = WorldAdapter::new(
            GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0)),
            settings.clone(),
        )?;
        built.load_or_build()?;
        assert!(cache.exists());

        let input = GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0));
        let hash = input.get_hash(&settings.graph, &settings.agent_types);
        assert!(input.try_load(&cache, Some(hash.as_str())).is_ok());

        let mut loaded = WorldAdapter::new(input, settings)?;
        loaded.load_or_build()?;
        assert_eq!(
            loaded.find_path(&agent, from, to, false)?,
            built.find_path(&agent, from, to, false)?
        );
        Ok(())
    }

    #[test]
    fn test_cache_for_fewer_agent_types_is_rebuilt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("level.ngph");
        let settings = WorldSettings::default().with_cache_path(&cache);

        let mut world = WorldAdapter::new(
            GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0)),
            settings.clone(),
        )?;
        world.load_or_build()?;

        let small = AgentType::new("small", 1.0);
        let wider = settings.with_agent_type(small.clone());
        let mut world = WorldAdapter::new(
            GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0)),
            wider.clone(),
        )?;
        world.load_or_build()?;

        let graph = world.graph().unwrap();
        let agent_types = graph.read().unwrap().agent_types();
        assert!(agent_types.contains(&small));
        assert!(agent_types.contains(&AgentType::default()));
        let (from, to) = (Vec3::new(-8.0, 0.0, 0.0), Vec3::new(8.0, 0.0, 0.0));
        assert!(world.find_path(&small, from, to, false)?.is_some());

        // The cache now holds the graph for both agent types
        let hash = world.input().get_hash(&wider.graph, &wider.agent_types);
        assert!(world.input().try_load(&cache, Some(hash.as_str())).is_ok());
        Ok(())
    }

    #[test]
    fn test_stale_cache_falls_back_to_building() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("level.ngph");
        let settings = WorldSettings::default().with_cache_path(&cache);

        let mut world = WorldAdapter::new(
            GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0)),
            settings.clone(),
        )?;
        world.load_or_build()?;

        let mut input = GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0));
        input.add_area(Area::new_box(
            BoundingBox::new(Vec3::new(-2.0, -1.0, -2.0), Vec3::new(2.0, 1.0, 2.0)),
            AreaType::UNWALKABLE,
        ));
        let hash = input.get_hash(&settings.graph, &settings.agent_types);
        assert!(matches!(
            input.try_load(&cache, Some(hash.as_str())),
            Err(Error::StaleGraph { .. })
        ));

        let mut changed = WorldAdapter::new(input, settings)?;
        changed.load_or_build()?;
        let agent = AgentType::default();
        let (walkable, _) = changed
            .graph()
            .unwrap()
            .read()
            .unwrap()
            .is_walkable(&agent, Vec3::ZERO, 0.1)?;
        assert!(!walkable);
        // The rebuilt graph replaced the stale cache entry
        assert!(changed.input().try_load(&cache, Some(hash.as_str())).is_ok());
        Ok(())
    }

    #[test]
    fn test_rebuild_requests_are_debounced() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;
        let before = world.graph().unwrap();

        let (first_calls, first) = counter();
        let (second_calls, second) = counter();
        assert!(!world.enqueue_navigation_graph_update(Some(first)));
        assert!(world.enqueue_navigation_graph_update(Some(second)));
        assert!(world.has_pending_update());

        assert!(!world.update()?);
        assert!(world.is_rebuilding());
        assert!(!world.has_pending_update());
        assert!(world.wait_for_rebuild()?);

        assert_eq!(world.rebuild_count(), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&before, &world.graph().unwrap()));
        assert!(!world.wait_for_rebuild()?);
        Ok(())
    }

    #[test]
    fn test_request_during_rebuild_waits_a_tick() -> Result<()> {
        let mut world = plane_world();
        let (calls, callback) = counter();

        world.enqueue_navigation_graph_update(None);
        world.update()?;
        assert!(world.is_rebuilding());

        assert!(!world.enqueue_navigation_graph_update(Some(callback)));
        assert!(world.wait_for_rebuild()?);
        assert!(world.has_pending_update());
        assert_eq!(world.rebuild_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(!world.update()?);
        assert_eq!(world.rebuild_count(), 2);
        assert!(world.wait_for_rebuild()?);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_failed_rebuild_keeps_current_graph() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;
        let before = world.graph().unwrap();

        *world.input_mut() = GeometryInput::from_mesh(TriMesh::new());
        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();
        world.enqueue_navigation_graph_update(Some(Box::new(move |ok| {
            *sink.lock().unwrap() = Some(ok);
        })));
        world.update()?;

        assert!(!world.wait_for_rebuild()?);
        assert_eq!(*result.lock().unwrap(), Some(false));
        assert!(Arc::ptr_eq(&before, &world.graph().unwrap()));
        assert_eq!(before.read().unwrap().state(), GraphState::Ready);
        Ok(())
    }

    #[test]
    fn test_find_path_reports_no_path_as_none() -> Result<()> {
        let mut world = WorldAdapter::new(
            GeometryInput::from_mesh(islands_mesh()),
            WorldSettings::default(),
        )?;
        world.load_or_build()?;
        let agent = AgentType::default();

        let same_island = world.find_path(
            &agent,
            Vec3::new(-8.0, 0.0, 0.0),
            Vec3::new(-3.0, 0.0, 1.0),
            false,
        )?;
        assert!(same_island.is_some_and(|p| p.len() >= 2));

        let across = world.find_path(
            &agent,
            Vec3::new(-5.0, 0.0, 0.0),
            Vec3::new(5.0, 0.0, 0.0),
            false,
        )?;
        assert!(across.is_none());
        Ok(())
    }

    #[test]
    fn test_ground_snapping() -> Result<()> {
        let picker = MeshGroundPicker::from_provider(&TriMesh::flat_plane(20.0, 0.25));
        let mut world = plane_world().with_ground_picker(Arc::new(picker));
        world.load_or_build()?;
        let agent = AgentType::default();
        let (from, to) = (Vec3::new(-8.0, 0.0, -7.0), Vec3::new(6.0, 0.0, 8.0));

        let raw = world.find_path(&agent, from, to, false)?.unwrap();
        assert!(raw.iter().all(|p| p.y.abs() < 1e-3));

        let grounded = world.find_path(&agent, from, to, true)?.unwrap();
        assert_eq!(grounded.len(), raw.len());
        assert!(grounded.iter().all(|p| (p.y - 0.25).abs() < 1e-4));
        Ok(())
    }

    #[test]
    fn test_walk_stays_within_step() -> Result<()> {
        let picker = MeshGroundPicker::from_provider(&TriMesh::flat_plane(20.0, 0.25));
        let mut world = plane_world().with_ground_picker(Arc::new(picker));
        world.load_or_build()?;
        let agent = AgentType::default();

        let (found, end) = world.walk(&agent, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), false)?;
        assert!(found);
        assert!(end.distance(Vec3::new(1.0, 0.0, 0.0)) < 1e-4);

        // Snapping up to the ground must not lengthen the step
        let (found, end) = world.walk(&agent, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), true)?;
        assert!(found);
        assert!(end.distance(Vec3::ZERO) <= 1.0 + 1e-4);
        assert!(end.y > 0.0);

        // Past the edge the agent is redirected to the last walkable point
        let prev = Vec3::new(8.0, 0.0, 0.0);
        let (found, end) = world.walk(&agent, prev, Vec3::new(12.0, 0.0, 0.0), false)?;
        assert!(found);
        assert!(end.x > 8.0 && end.x < 10.0, "ended at {:?}", end);
        assert!(end.distance(prev) <= 4.0 + 1e-4);
        Ok(())
    }

    #[tokio::test]
    async fn test_async_path_matches_sync() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;
        let agent = AgentType::default();
        let (from, to) = (Vec3::new(-9.0, 0.0, -9.0), Vec3::new(9.0, 0.0, 9.0));

        let sync = world.find_path(&agent, from, to, false)?;
        let task = world.find_path_async(agent, from, to);
        assert_eq!(tokio::spawn(task).await.unwrap()?, sync);
        Ok(())
    }

    #[test]
    fn test_crowd_must_follow_graph_swaps() -> Result<()> {
        let mut world = plane_world();
        world.load_or_build()?;

        let mut crowd = Crowd::new(world.graph().unwrap(), CrowdSettings::default())?;
        crowd.add_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        crowd.update(0.1)?;

        world.enqueue_navigation_graph_update(None);
        world.update()?;
        world.wait_for_rebuild()?;
        assert!(matches!(crowd.update(0.1), Err(Error::GraphNotReady(_))));

        let mut crowd = Crowd::new(world.graph().unwrap(), CrowdSettings::default())?;
        crowd.add_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        crowd.update(0.1)?;
        Ok(())
    }
}

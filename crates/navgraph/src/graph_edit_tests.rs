//! Tests for graph edits: region rebuilds, obstacle batches and listeners

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::*;
    use crate::{
        Error, GraphEvent, GraphState, GridGraph, NavigationGraph, ObstacleShape, ObstacleState,
        QueryFilter, Region, Vec3,
    };
    use navgraph_common::{BoundingBox, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn pillar(x: f32, z: f32) -> ObstacleShape {
        ObstacleShape::Cylinder {
            center: Vec3::new(x, 0.0, z),
            radius: 1.0,
            height: 2.0,
        }
    }

    fn recorder(graph: &mut GridGraph) -> (Arc<Mutex<Vec<GraphEvent>>>, crate::ListenerId) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = graph.subscribe(Arc::new(move |event| sink.lock().unwrap().push(event)));
        (events, id)
    }

    #[test]
    fn test_listeners_see_update_pairs() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let (events, id) = recorder(&mut graph);

        graph.add_obstacle(pillar(0.0, 0.0))?;
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        assert!(graph.update_obstacles(Some(Box::new(move || flag.store(true, Ordering::SeqCst))))?);

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(
            *events.lock().unwrap(),
            vec![GraphEvent::Updating, GraphEvent::Updated]
        );
        assert_eq!(graph.state(), GraphState::Ready);

        assert!(graph.unsubscribe(id));
        assert!(!graph.unsubscribe(id));
        graph.add_obstacle(pillar(4.0, 4.0))?;
        graph.update_obstacles(None)?;
        assert_eq!(events.lock().unwrap().len(), 2);
        Ok(())
    }

    #[test]
    fn test_obstacle_lifecycle() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let agent = test_agent();

        let first = graph.add_obstacle(pillar(0.0, 0.0))?;
        let second = graph.add_obstacle(pillar(5.0, 5.0))?;
        assert_eq!((first, second), (1, 2));
        assert_eq!(graph.pending_obstacle_changes(), 2);
        assert_eq!(graph.obstacle(first).unwrap().state, ObstacleState::Processing);
        assert!(graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);

        // Removing a staged obstacle drops it without a commit
        assert!(graph.remove_obstacle(second)?);
        assert!(graph.obstacle(second).is_none());
        assert_eq!(graph.pending_obstacle_changes(), 1);

        assert!(graph.update_obstacles(None)?);
        assert_eq!(graph.obstacle(first).unwrap().state, ObstacleState::Processed);
        assert_eq!(graph.pending_obstacle_changes(), 0);
        assert_eq!(graph.obstacle_count(), 1);
        assert!(!graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);

        assert!(graph.remove_obstacle(first)?);
        assert_eq!(graph.obstacle(first).unwrap().state, ObstacleState::Removing);
        assert_eq!(graph.obstacle_count(), 0);
        // Still carved until the next commit
        assert!(!graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);

        assert!(graph.update_obstacles(None)?);
        assert!(graph.obstacle(first).is_none());
        assert!(graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);

        assert!(!graph.remove_obstacle(99)?);
        Ok(())
    }

    #[test]
    fn test_empty_obstacle_commit_still_calls_back() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let (events, _) = recorder(&mut graph);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let changed = graph.update_obstacles(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })))?;
        assert!(!changed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_box_and_oriented_obstacles_carve() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let agent = test_agent();
        graph.add_obstacle(ObstacleShape::Box {
            bounds: BoundingBox::new(Vec3::new(3.0, -0.5, 3.0), Vec3::new(5.0, 1.5, 5.0)),
        })?;
        graph.add_obstacle(ObstacleShape::OrientedBox {
            center: Vec3::new(-4.0, 0.0, -4.0),
            half_extents: Vec3::new(2.0, 1.0, 0.5),
            y_rotation: std::f32::consts::FRAC_PI_2,
        })?;
        graph.update_obstacles(None)?;

        assert!(!graph.is_walkable(&agent, Vec3::new(4.0, 0.0, 4.0), 0.1)?.0);
        // Rotated a quarter turn the long axis runs along Z
        assert!(!graph.is_walkable(&agent, Vec3::new(-4.0, 0.0, -5.5), 0.1)?.0);
        assert!(graph.is_walkable(&agent, Vec3::new(-6.5, 0.0, -4.0), 0.1)?.0);
        Ok(())
    }

    #[test]
    fn test_remove_and_create_regions() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let agent = test_agent();
        let total = graph.get_debug_info(&agent)?.built_tiles;

        let region = Region::Box(BoundingBox::new(
            Vec3::new(-2.0, -1.0, -2.0),
            Vec3::new(2.0, 1.0, 2.0),
        ));
        let removed = Arc::new(AtomicBool::new(false));
        let flag = removed.clone();
        graph.remove_at(&region, Some(Box::new(move || flag.store(true, Ordering::SeqCst))))?;
        assert!(removed.load(Ordering::SeqCst));

        let after_remove = graph.get_debug_info(&agent)?.built_tiles;
        assert!(after_remove < total);
        assert!(!graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);

        graph.create_at(&Region::Point(Vec3::ZERO), None)?;
        assert!(graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);
        assert_eq!(graph.get_debug_info(&agent)?.built_tiles, after_remove + 1);
        Ok(())
    }

    #[test]
    fn test_update_only_touches_built_tiles() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let agent = test_agent();
        let from = Vec3::new(-8.0, 0.0, 1.0);
        let to = Vec3::new(7.0, 0.0, -3.0);
        let before = graph.find_path(&agent, from, to)?;

        let everything = Region::Box(graph.bounds());
        graph.update_at(&everything, None)?;
        assert_eq!(graph.find_path(&agent, from, to)?, before);

        graph.remove_at(&Region::Points(vec![Vec3::ZERO]), None)?;
        let built = graph.get_debug_info(&agent)?.built_tiles;
        graph.update_at(&everything, None)?;
        assert_eq!(graph.get_debug_info(&agent)?.built_tiles, built);
        assert!(!graph.is_walkable(&agent, Vec3::ZERO, 0.1)?.0);
        Ok(())
    }

    #[test]
    fn test_region_edits_need_a_source() -> Result<()> {
        let graph = build_graph(&plane_input())?;
        let mut restored = GridGraph::from_bytes(&graph.to_bytes()?)?;

        assert!(matches!(
            restored.create_at(&Region::Point(Vec3::ZERO), None),
            Err(Error::NoGeometrySource)
        ));
        assert!(matches!(
            restored.update_at(&Region::Point(Vec3::ZERO), None),
            Err(Error::NoGeometrySource)
        ));
        restored.remove_at(&Region::Point(Vec3::ZERO), None)?;
        assert_eq!(restored.state(), GraphState::Ready);
        Ok(())
    }

    #[test]
    fn test_corrupt_bytes_are_rejected() {
        assert!(matches!(
            GridGraph::from_bytes(&[1, 2, 3]),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_raycast_stops_at_obstacle() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let agent = test_agent();
        let filter = QueryFilter::default();
        let from = Vec3::new(-5.0, 0.0, 0.0);
        let to = Vec3::new(5.0, 0.0, 0.0);

        let clear = graph.raycast(&agent, from, to, &filter)?;
        assert!(!clear.blocked);
        assert_eq!(clear.t, 1.0);

        graph.add_obstacle(pillar(0.0, 0.0))?;
        graph.update_obstacles(None)?;
        let hit = graph.raycast(&agent, from, to, &filter)?;
        assert!(hit.blocked);
        assert!(hit.t < 0.5);
        assert!(hit.position.x < -1.0);
        Ok(())
    }

    #[test]
    fn test_local_boundary_near_edges() -> Result<()> {
        let graph = build_graph(&plane_input())?;
        let agent = test_agent();

        assert!(graph.local_boundary(&agent, Vec3::ZERO, 1.0)?.is_empty());

        let walls = graph.local_boundary(&agent, Vec3::new(9.0, 0.0, 0.0), 1.5)?;
        assert!(!walls.is_empty());
        for wall in &walls {
            assert!(wall.start.x > 9.0 || wall.end.x > 9.0);
        }
        Ok(())
    }

    #[test]
    fn test_edits_rejected_after_dispose() -> Result<()> {
        let mut graph = build_graph(&plane_input())?;
        let (events, _) = recorder(&mut graph);
        graph.dispose();
        graph.dispose();

        assert!(matches!(
            graph.update_obstacles(None),
            Err(Error::GraphBusy(_))
        ));
        assert!(matches!(
            graph.remove_at(&Region::Point(Vec3::ZERO), None),
            Err(Error::GraphBusy(_))
        ));
        assert!(events.lock().unwrap().is_empty());
        Ok(())
    }
}

//! CLI utility for building navigation graphs and querying paths

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use navgraph::persistence::read_graph;
use navgraph::{
    AgentType, GeometryInput, GraphSettings, GridGraph, NavigationGraph, TriMesh, Vec3,
};

/// A CLI utility for navigation graph generation and pathfinding
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct GraphArgs {
    /// Cell size (horizontal resolution)
    #[clap(long, default_value = "0.3")]
    cell_size: f32,

    /// Cells per tile edge
    #[clap(long, default_value = "32")]
    tile_size: u32,

    /// Maximum slope in degrees that is considered walkable
    #[clap(long, default_value = "45.0")]
    walkable_slope_angle: f32,

    /// Largest height step an agent can climb between cells
    #[clap(long, default_value = "0.9")]
    walkable_climb: f32,

    /// Distance kept between agents and walls
    #[clap(long, default_value = "0.5")]
    agent_radius: f32,

    /// Agent type name
    #[clap(long, default_value = "humanoid")]
    agent: String,

    /// Agent height
    #[clap(long, default_value = "2.0")]
    agent_height: f32,
}

impl GraphArgs {
    fn settings(&self) -> GraphSettings {
        GraphSettings::new(self.cell_size, self.tile_size)
            .with_walkable_slope_angle(self.walkable_slope_angle)
            .with_walkable_climb(self.walkable_climb)
            .with_agent_radius(self.agent_radius)
    }

    fn agent_type(&self) -> AgentType {
        AgentType::new(self.agent.clone(), self.agent_height)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a navigation graph from an input mesh
    Build {
        /// Input mesh file (OBJ format)
        #[clap(long, value_parser)]
        input: PathBuf,

        /// Output graph file
        #[clap(long, value_parser)]
        output: PathBuf,

        #[clap(flatten)]
        graph: GraphArgs,
    },

    /// Find a path on a saved navigation graph
    FindPath {
        /// Mesh the graph was built from (OBJ format)
        #[clap(long, value_parser)]
        input: PathBuf,

        /// Saved graph file
        #[clap(long, value_parser)]
        graph: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,

        /// Output path file; `.json` writes JSON, anything else plain text
        #[clap(long, value_parser)]
        output: Option<PathBuf>,

        #[clap(flatten)]
        settings: GraphArgs,
    },

    /// Print a summary of a saved navigation graph as JSON
    Info {
        /// Saved graph file
        #[clap(long, value_parser)]
        graph: PathBuf,

        /// Agent type to report walkable cells for
        #[clap(long, default_value = "humanoid")]
        agent: String,
    },
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!(
            "Vector must have 3 components, got {}",
            parts.len()
        ));
    }

    let x = parts[0].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].trim().parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Build {
            input,
            output,
            graph,
        } => build_graph(&input, &output, &graph),
        Commands::FindPath {
            input,
            graph,
            start,
            end,
            output,
            settings,
        } => find_path(&input, &graph, start, end, output.as_deref(), &settings),
        Commands::Info { graph, agent } => print_info(&graph, &agent),
    }
}

fn load_input(path: &Path) -> Result<GeometryInput> {
    println!("Loading mesh from {}...", path.display());
    let mesh = TriMesh::from_obj(path)
        .with_context(|| format!("Failed to load mesh: {}", path.display()))?;
    println!(
        "Mesh loaded: {} vertices, {} triangles",
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(GeometryInput::from_mesh(mesh))
}

/// Build a navigation graph from an input mesh
fn build_graph(input: &Path, output: &Path, args: &GraphArgs) -> Result<()> {
    let geometry = load_input(input)?;
    let settings = args.settings();
    settings.validate().map_err(|e| anyhow!("Invalid settings: {}", e))?;

    println!("Building navigation graph...");
    let mut last_reported = -1i32;
    let mut progress = |fraction: f32| {
        let percent = (fraction * 100.0) as i32;
        if percent / 10 > last_reported / 10 {
            println!("  {:>3}%", percent);
            last_reported = percent;
        }
    };
    let graph = geometry
        .create_graph(&settings, &[args.agent_type()], Some(&mut progress))
        .context("Failed to build navigation graph")?;

    let info = graph
        .get_debug_info(&args.agent_type())
        .context("Failed to inspect navigation graph")?;
    println!(
        "Navigation graph built: {} tiles, {} walkable nodes, {} links",
        info.tile_count, info.node_count, info.link_count
    );

    println!("Saving navigation graph to {}...", output.display());
    geometry
        .save(output, &graph)
        .with_context(|| format!("Failed to save graph: {}", output.display()))?;
    println!("Saved navigation graph");

    Ok(())
}

/// Find a path on a saved navigation graph
fn find_path(
    input: &Path,
    graph_path: &Path,
    start: Vec3,
    end: Vec3,
    output: Option<&Path>,
    args: &GraphArgs,
) -> Result<()> {
    let geometry = load_input(input)?;
    let hash = geometry.get_hash(&args.settings(), &[args.agent_type()]);

    println!("Loading navigation graph from {}...", graph_path.display());
    let graph = geometry
        .try_load(graph_path, Some(hash.as_str()))
        .with_context(|| format!("Failed to load graph: {}", graph_path.display()))?;
    println!("Successfully loaded navigation graph");

    println!("Finding path from {:?} to {:?}...", start, end);
    let path = graph
        .find_path(&args.agent_type(), start, end)
        .context("Path query failed")?;
    if path.is_empty() {
        bail!("No path found from {:?} to {:?}", start, end);
    }
    println!("Found path with {} waypoints", path.len());

    let Some(output_path) = output else {
        println!("Path:");
        for (i, waypoint) in path.iter().enumerate() {
            println!("{}: {},{},{}", i, waypoint.x, waypoint.y, waypoint.z);
        }
        return Ok(());
    };

    println!("Saving path to {}...", output_path.display());
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    let is_json = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let waypoints: Vec<[f32; 3]> = path.iter().map(|p| p.to_array()).collect();
        let document = serde_json::json!({
            "start": start.to_array(),
            "end": end.to_array(),
            "waypoints": waypoints,
        });
        serde_json::to_writer_pretty(&mut writer, &document)
            .context("Failed to write path as JSON")?;
        writeln!(writer)?;
    } else {
        writeln!(writer, "# Path from {:?} to {:?}", start, end)?;
        writeln!(writer, "# {} waypoints", path.len())?;
        for waypoint in &path {
            writeln!(writer, "{},{},{}", waypoint.x, waypoint.y, waypoint.z)?;
        }
    }
    writer.flush()?;

    Ok(())
}

/// Print a summary of a saved graph
fn print_info(graph_path: &Path, agent: &str) -> Result<()> {
    let file = File::open(graph_path)
        .with_context(|| format!("Failed to open graph: {}", graph_path.display()))?;
    let (hash, bytes) = read_graph(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read graph: {}", graph_path.display()))?;
    let graph = GridGraph::from_bytes(&bytes)
        .with_context(|| format!("Failed to decode graph: {}", graph_path.display()))?;

    let agent_type = graph
        .agent_types()
        .into_iter()
        .find(|a| a.name == agent)
        .ok_or_else(|| anyhow!("Graph has no agent type named {:?}", agent))?;
    let info = graph.get_debug_info(&agent_type)?;

    let summary = serde_json::json!({
        "hash": hash,
        "state": info.state.to_string(),
        "bounds": {
            "min": info.bounds.min.to_array(),
            "max": info.bounds.max.to_array(),
        },
        "agent_types": graph.agent_types(),
        "tiles": info.tile_count,
        "built_tiles": info.built_tiles,
        "cells": info.cell_count,
        "spans": info.span_count,
        "nodes": info.node_count,
        "links": info.link_count,
        "obstacles": info.obstacle_count,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1,2.5,-3").unwrap(), Vec3::new(1.0, 2.5, -3.0));
        assert_eq!(parse_vector(" 1, 2, 3").unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("a,b,c").is_err());
    }

    #[test]
    fn test_build_then_find_path() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("plane.obj");
        std::fs::write(
            &obj,
            "v -10 0 -10\nv 10 0 -10\nv 10 0 10\nv -10 0 10\nf 1 3 2\nf 1 4 3\n",
        )
        .unwrap();
        let graph = dir.path().join("plane.ngph");
        let path_json = dir.path().join("path.json");

        let args = Args::parse_from([
            "navgraph",
            "build",
            "--input",
            obj.to_str().unwrap(),
            "--output",
            graph.to_str().unwrap(),
        ]);
        let Commands::Build { input, output, graph: settings } = args.command else {
            panic!("expected build");
        };
        build_graph(&input, &output, &settings).unwrap();
        assert!(graph.exists());

        find_path(
            &obj,
            &graph,
            Vec3::new(-8.0, 0.0, -8.0),
            Vec3::new(8.0, 0.0, 8.0),
            Some(&path_json),
            &settings,
        )
        .unwrap();
        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path_json).unwrap()).unwrap();
        assert!(document["waypoints"].as_array().unwrap().len() >= 2);

        print_info(&graph, "humanoid").unwrap();
        assert!(print_info(&graph, "ogre").is_err());
    }

    #[test]
    fn test_find_path_rejects_changed_settings() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("plane.obj");
        std::fs::write(
            &obj,
            "v -5 0 -5\nv 5 0 -5\nv 5 0 5\nv -5 0 5\nf 1 3 2\nf 1 4 3\n",
        )
        .unwrap();
        let graph = dir.path().join("plane.ngph");

        let args = Args::parse_from(["navgraph", "build", "--input", "x.obj", "--output", "y"]);
        let Commands::Build { graph: settings, .. } = args.command else {
            panic!("expected build");
        };
        build_graph(&obj, &graph, &settings).unwrap();

        let mut changed = settings.clone();
        changed.cell_size = 0.5;
        assert!(find_path(&obj, &graph, Vec3::ZERO, Vec3::ONE, None, &changed).is_err());

        let mut other_agent = settings.clone();
        other_agent.agent = "small".to_string();
        other_agent.agent_height = 1.0;
        assert!(find_path(&obj, &graph, Vec3::ZERO, Vec3::ONE, None, &other_agent).is_err());
    }
}

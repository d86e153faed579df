//! CLI utility for navgraph files

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use navgraph::{
    Heuristic, NavData, NavmeshGraphSettings, Path as _, PathCompleteState, PathfinderConfig, PathProcessor,
    ThreadCount,
};

/// A CLI utility for generating, inspecting and querying tiled navigation graphs
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a demo graph: a square grid of tiles with a hole in the middle
    Demo {
        /// Output graph file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Number of tiles along each axis
        #[clap(long, default_value = "4")]
        tiles: i32,

        /// Size of a tile in world units
        #[clap(long, default_value = "8.0")]
        tile_size: f32,
    },

    /// Find a path on a graph. Several end points search for the closest one.
    FindPath {
        /// Input graph file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z), may be given more than once
        #[clap(long, value_parser = parse_vector, required = true)]
        end: Vec<Vec3>,

        /// Heuristic: none, manhattan, diagonal-manhattan or euclidean
        #[clap(long)]
        heuristic: Option<String>,

        /// Worker threads, 0 calculates the path on the calling thread
        #[clap(long, default_value = "0")]
        threads: usize,

        /// Pathfinder configuration as JSON
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Check whether the straight line between two points stays on the graph
    Linecast {
        /// Input graph file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,
    },

    /// Print a summary of a graph file
    Info {
        /// Input graph file
        #[clap(long, value_parser)]
        mesh: PathBuf,
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
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Demo {
            output,
            tiles,
            tile_size,
        } => demo(&output, tiles, tile_size),
        Commands::FindPath {
            mesh,
            start,
            end,
            heuristic,
            threads,
            config,
            output,
        } => find_path(
            &mesh,
            start,
            &end,
            heuristic.as_deref(),
            threads,
            config.as_deref(),
            output.as_deref(),
        ),
        Commands::Linecast { mesh, start, end } => linecast(&mesh, start, end),
        Commands::Info { mesh } => info(&mesh),
    }
}

fn load(mesh_path: &Path) -> Result<NavData> {
    println!("Loading graph from {}...", mesh_path.display());
    NavData::load_from_file(mesh_path)
        .map_err(|e| anyhow!("Failed to load graph {}: {}", mesh_path.display(), e))
}

/// Build a grid of tiles, each split into two triangles. The middle tile is
/// left empty when the grid is at least 3 tiles wide.
fn build_demo(tiles: i32, tile_size: f32) -> Result<NavData> {
    if tiles <= 0 {
        return Err(anyhow!("--tiles must be positive, got {tiles}"));
    }

    let mut data = NavData::new();
    let graph = data.add_graph(NavmeshGraphSettings {
        tile_x_count: tiles,
        tile_z_count: tiles,
        tile_world_size_x: tile_size,
        tile_world_size_z: tile_size,
        ..Default::default()
    })?;

    let hole = (tiles >= 3).then_some(tiles / 2);
    for z in 0..tiles {
        for x in 0..tiles {
            if hole == Some(x) && hole == Some(z) {
                continue;
            }
            let (x0, z0) = (x as f32 * tile_size, z as f32 * tile_size);
            let verts = [
                Vec3::new(x0, 0.0, z0),
                Vec3::new(x0, 0.0, z0 + tile_size),
                Vec3::new(x0 + tile_size, 0.0, z0 + tile_size),
                Vec3::new(x0 + tile_size, 0.0, z0),
            ];
            data.add_tile(graph, x, z, &verts, vec![0, 1, 2, 0, 2, 3])
                .with_context(|| format!("Failed to add tile ({x}, {z})"))?;
        }
    }
    Ok(data)
}

/// Generate a demo graph and save it
fn demo(output: &Path, tiles: i32, tile_size: f32) -> Result<()> {
    println!("Building {tiles}x{tiles} demo graph...");
    let data = build_demo(tiles, tile_size)?;
    println!("Graph built: {} nodes", data.nodes().live_count());

    println!("Saving graph to {}...", output.display());
    data.save_to_file(output)
        .map_err(|e| anyhow!("Failed to save graph: {}", e))?;
    Ok(())
}

/// Find a path on a graph
fn find_path(
    mesh_path: &Path,
    start: Vec3,
    ends: &[Vec3],
    heuristic: Option<&str>,
    threads: usize,
    config_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let data = load(mesh_path)?;

    let mut config = match config_path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open config {}", path.display()))?;
            serde_json::from_reader::<_, PathfinderConfig>(file)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => PathfinderConfig::default(),
    };
    if let Some(heuristic) = heuristic {
        config.heuristic = heuristic.parse::<Heuristic>()?;
    }
    if config_path.is_none() || threads > 0 {
        config.thread_count = ThreadCount::from_count(threads)?;
    }

    let processor = PathProcessor::new(data, config)?;
    println!("Finding path from {:?} to {:?}...", start, ends);

    let (state, error, waypoints, nodes) = if let [end] = ends {
        let handle = processor.ab_path(start, *end);
        processor.calculate_now(&handle)?;
        let path = handle.lock();
        let result = (
            path.base().complete_state(),
            path.base().error_log().to_string(),
            path.base().vector_path.clone(),
            path.base().path.len(),
        );
        result
    } else {
        let handle = processor.multi_target_path(start, ends);
        processor.calculate_now(&handle)?;
        let path = handle.lock();
        if let Some(chosen) = path.chosen_target() {
            println!("Closest target: {} at {:?}", chosen, ends[chosen]);
        }
        for (i, found) in path.targets_found().iter().enumerate() {
            let length = path.vector_path(i).map(|p| p.len()).unwrap_or(0);
            println!("Target {i}: found={found} waypoints={length}");
        }
        let result = (
            path.base().complete_state(),
            path.base().error_log().to_string(),
            path.base().vector_path.clone(),
            path.base().path.len(),
        );
        result
    };

    match state {
        PathCompleteState::Error => return Err(anyhow!("Failed to find path: {}", error)),
        PathCompleteState::Partial => log::warn!("Target not reachable, returning the closest path"),
        _ => {}
    }
    println!("Found path through {} nodes ({:?})", nodes, state);
    println!("Generated smoothed path with {} waypoints", waypoints.len());

    if let Some(output_path) = output {
        println!("Saving path to {}...", output_path.display());

        let mut file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

        writeln!(file, "# Path from {:?} to {:?}", start, ends)?;
        writeln!(file, "# {} waypoints", waypoints.len())?;

        for waypoint in &waypoints {
            writeln!(file, "{},{},{}", waypoint.x, waypoint.y, waypoint.z)?;
        }
    } else {
        println!("Path:");
        for (i, waypoint) in waypoints.iter().enumerate() {
            println!("{}: {},{},{}", i, waypoint.x, waypoint.y, waypoint.z);
        }
    }

    Ok(())
}

/// Run a linecast and report where it was blocked
fn linecast(mesh_path: &Path, start: Vec3, end: Vec3) -> Result<()> {
    let data = load(mesh_path)?;
    let mut trace = Vec::new();
    let (hit, info) = data.linecast(start, end, Some(&mut trace))?;

    println!("Crossed {} nodes", trace.len());
    if hit {
        println!(
            "Blocked at {},{},{} after {:.3} units",
            info.point.x,
            info.point.y,
            info.point.z,
            info.distance()
        );
        println!(
            "Blocking edge from {:?} along {:?}",
            info.tangent_origin, info.tangent
        );
    } else {
        println!("Line is unobstructed");
    }
    Ok(())
}

/// Print graph statistics
fn info(mesh_path: &Path) -> Result<()> {
    let data = load(mesh_path)?;
    println!("Graphs: {}", data.graphs().len());

    for graph in data.graphs() {
        let settings = graph.settings();
        let filled = graph.tiles().iter().filter(|t| !t.is_empty()).count();
        let nodes: Vec<_> = graph.nodes().collect();
        let connections: usize = nodes.iter().map(|&n| data.nodes()[n].connections().len()).sum();
        let areas: BTreeSet<u32> = nodes.iter().map(|&n| data.nodes()[n].area()).collect();

        println!("Graph {}:", graph.graph_index());
        println!(
            "  tiles: {}x{} of {}x{} units, {} filled",
            settings.tile_x_count,
            settings.tile_z_count,
            settings.tile_world_size_x,
            settings.tile_world_size_z,
            filled
        );
        println!("  origin: {:?}, rotation: {}", settings.origin, settings.rotation_y);
        println!("  nodes: {}", nodes.len());
        println!("  connections: {}", connections);
        println!("  areas: {}", areas.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1, 2.5,-3"), Ok(Vec3::new(1.0, 2.5, -3.0)));
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("a,b,c").is_err());
    }

    #[test]
    fn test_demo_has_hole_in_the_middle() -> Result<()> {
        let data = build_demo(3, 4.0)?;
        assert_eq!(data.nodes().live_count(), 16);
        assert!(data.graphs()[0].tiles()[4].is_empty());
        Ok(())
    }
}

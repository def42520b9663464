//! Volume generator binary - builds a noise terrain index and writes it to disk.
//!
//! Usage: cargo run --release --bin generate_volume -- [OPTIONS]
//!
//! Options:
//!   --depth <D>       Tree depth, volume is 2^D voxels per axis (default: 8)
//!   --seed <SEED>     Random seed (default: 12345)
//!   --scale <SCALE>   Terrain noise scale in voxels (default: 96.0)
//!   --height <H>      Terrain height as a fraction of the volume (default: 0.35)
//!   --rays <N>        Rays cast for the traversal summary (default: 4096)
//!   --config <PATH>   Optional DagConfig JSON (depth from --depth still wins)
//!   --out <PATH>      Output file (default: assets/volumes/terrain.rkd)

use std::path::{Path, PathBuf};
use std::time::Instant;

use glam::{UVec3, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use rkdag::core::{logging, DagConfig};
use rkdag::math::{Ray, Region};
use rkdag::streaming::disk_io;
use rkdag::voxel::dag::{ray_march_batch, DagStore, MarchLimits, RayResult, SvdagIndex};
use rkdag::voxel::Voxel;

/// Deepest volume the dense heightmap is generated for (4096^2 columns)
const MAX_GENERATOR_DEPTH: u8 = 12;

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);
    let scale = parse_f32_arg(&args, "--scale").unwrap_or(96.0);
    let height_fraction = parse_f32_arg(&args, "--height").unwrap_or(0.35);
    let ray_count = parse_u32_arg(&args, "--rays").unwrap_or(4096);
    let output = parse_str_arg(&args, "--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("assets/volumes/terrain.{}", disk_io::INDEX_EXTENSION)));

    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => match DagConfig::load_sync(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => DagConfig::with_depth(8),
    };
    if let Some(depth) = parse_u32_arg(&args, "--depth") {
        config.max_depth = depth.min(u8::MAX as u32) as u8;
    }
    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = check_generator_depth(config.max_depth) {
        log::error!("{}", e);
        std::process::exit(1);
    }

    let extent = 1u32 << config.max_depth;
    println!("=== Rkdag Volume Generator ===");
    println!("Volume: {}^3 voxels (depth {})", extent, config.max_depth);
    println!("Seed:   {}", seed);
    println!("Scale:  {}, Height: {:.0}%", scale, height_fraction * 100.0);
    println!("Output: {}", output.display());
    println!();

    // Phase 1: heightmap
    let start = Instant::now();
    let heights = heightmap(seed, extent, scale, height_fraction);
    println!("Heightmap: {:.2?}", start.elapsed());

    // Phase 2: build
    let start = Instant::now();
    let store = DagStore::from_config(&config);
    let bounds = Region::cube(UVec3::ZERO, extent);
    let index = match SvdagIndex::build_from_volume(&store, config.max_depth, bounds, |x, y, z| {
        terrain_voxel(heights[column_index(extent, x, z)], y)
    }) {
        Ok(index) => index,
        Err(e) => {
            log::error!("Build failed: {}", e);
            std::process::exit(1);
        }
    };
    let stats = index.stats();
    println!("Build:     {:.2?}", start.elapsed());
    println!("  {}", stats);
    println!("  reachable nodes: {}", index.reachable_nodes());
    println!("  solid voxels:    {}", index.solid_voxel_count());
    println!("  dedup ratio:     {:.1}%", stats.dedup_ratio() * 100.0);

    // Phase 3: traversal summary
    let start = Instant::now();
    let rays = camera_rays(extent, ray_count);
    let limits = MarchLimits::from_config(extent as f32 * 4.0, &config);
    let results = ray_march_batch(&index, &rays, limits);
    let hits = results.iter().filter(|r| r.is_hit()).count();
    let mean_t = results
        .iter()
        .filter_map(|r| match r {
            RayResult::Hit(hit) => Some(hit.t),
            RayResult::Miss => None,
        })
        .sum::<f32>()
        / hits.max(1) as f32;
    println!(
        "Rays:      {} cast, {} hit, mean distance {:.1} ({:.2?})",
        rays.len(),
        hits,
        mean_t,
        start.elapsed()
    );

    // Phase 4: save
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(disk_io::save_index(&output, &index)) {
        log::error!("Failed to save {}: {}", output.display(), e);
        std::process::exit(1);
    }
    println!();
    println!("Done.");
}

/// Terrain height (in voxels) per (x, z) column, row-major in z
fn heightmap(seed: u32, extent: u32, scale: f32, height_fraction: f32) -> Vec<u32> {
    let noise = Fbm::<Perlin>::new(seed)
        .set_octaves(5)
        .set_persistence(0.5)
        .set_lacunarity(2.0);
    let base = extent as f64 * height_fraction as f64;
    let amplitude = base * 0.6;

    let side = extent as usize;
    (0..side * side)
        .into_par_iter()
        .map(|i| {
            let (x, z) = ((i % side) as u32, (i / side) as u32);
            let n = noise.get([x as f64 / scale as f64, z as f64 / scale as f64]);
            (base + n * amplitude).clamp(1.0, extent as f64 - 1.0) as u32
        })
        .collect()
}

/// Heightmap slot of column (x, z)
fn column_index(extent: u32, x: u32, z: u32) -> usize {
    z as usize * extent as usize + x as usize
}

fn check_generator_depth(depth: u8) -> Result<(), String> {
    if depth > MAX_GENERATOR_DEPTH {
        return Err(format!(
            "Depth {} too large for the terrain generator (max {})",
            depth, MAX_GENERATOR_DEPTH
        ));
    }
    Ok(())
}

fn terrain_voxel(height: u32, y: u32) -> Voxel {
    if y >= height {
        Voxel::EMPTY
    } else if y + 1 == height {
        Voxel::new(86, 140, 60, 1) // grass
    } else if y + 4 >= height {
        Voxel::new(120, 90, 60, 2) // dirt
    } else {
        Voxel::new(128, 128, 128, 3) // stone
    }
}

/// Rays from above one corner looking across the volume
fn camera_rays(extent: u32, count: u32) -> Vec<Ray> {
    let size = extent as f32;
    let eye = Vec3::new(-0.25 * size, 1.2 * size, -0.25 * size);
    let side = (count as f32).sqrt().max(1.0) as u32;
    (0..side * side)
        .map(|i| {
            let u = (i % side) as f32 / side as f32;
            let v = (i / side) as f32 / side as f32;
            let target = Vec3::new(u * size, 0.0, v * size);
            Ray::new(eye, target - eye)
        })
        .collect()
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

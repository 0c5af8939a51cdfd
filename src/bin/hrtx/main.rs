//! hrtx - bake heightmaps into displacement micromaps on the host device.

mod config;
mod grid;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use tracing::{debug, error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use heightmap_rtx::bake::{AddressMode, ConstantHeight, FilterMode, HeightSampler, Heightmap};
use heightmap_rtx::bird::BlockToBirdUvTable;
use heightmap_rtx::device::{
    BufferUsage, DeviceFunctions, Format, ImageDescriptor, IndexType, Linkage,
};
use heightmap_rtx::format::{
    blocks_per_triangle, dequantize, micro_triangles_per_triangle, micro_verts_per_block,
    read_packed_value, MAX_SUBDIVISION_LEVEL,
};
use heightmap_rtx::host::HostDevice;
use heightmap_rtx::{
    barrier_flags, cmd_create_map, version_string, Error, MapCreate, NativeResult, Pipeline,
    PipelineCreate,
};

use config::BakeConfig;
use grid::GridMesh;

/// Env var holding a tracing filter; overrides verbosity flags.
const LOG_ENV: &str = "HRTX_LOG";

/// Level printed by `hrtx table` without `--level`.
const TABLE_LEVEL_DEFAULT: u32 = 3;

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "bake" | "b" => cmd_bake(&filtered_args[1..]),
        "table" | "t" => cmd_table(&filtered_args[1..]),
        "--version" | "-V" | "version" => {
            println!("hrtx {}", version_string());
            Ok(())
        }
        "help" | "h" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Error: unknown command '{}'", other);
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("heightmap_rtx={0},hrtx={0}", default_level)));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_help() {
    println!("hrtx - heightmap to displacement micromap baker");
    println!();
    println!("USAGE:");
    println!("    hrtx [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    b, bake [heightmap] [FLAGS]   Bake a grid mesh against a heightmap");
    println!("    t, table [--level N]          Print the block vertex order of a level");
    println!("    version, --version            Show version and build date");
    println!("    h, help                       Show this help");
    println!();
    println!("BAKE FLAGS:");
    println!("    --level N            Subdivision level 0-5 (default 3)");
    println!("    --grid N             Grid quads per side (default 16)");
    println!("    --flat F             Constant height instead of a heightmap file");
    println!("    --bias F             Displacement bias (default 0)");
    println!("    --scale F            Displacement scale (default 1)");
    println!("    --filter MODE        nearest | linear (default linear)");
    println!("    --address MODE       repeat | clamp (default repeat)");
    println!("    --config FILE        Load settings from JSON; flags override it");
    println!("    --out FILE           Write the packed displacement bytes");
    println!("    --save-config FILE   Write the effective settings as JSON");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    {}=<filter>   tracing filter, e.g. heightmap_rtx=trace", LOG_ENV);
    println!();
    println!("EXAMPLES:");
    println!("    hrtx bake terrain.png --level 4 --out terrain.dmm");
    println!("    hrtx bake --flat 0.5 --level 2 --grid 1");
    println!("    hrtx table --level 1");
}

/// Value following a flag.
fn flag_value<'a>(args: &[&'a str], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .copied()
        .with_context(|| format!("missing value for {}", flag))
}

fn parse_flag<T: std::str::FromStr>(args: &[&str], i: &mut usize, flag: &str) -> anyhow::Result<T> {
    let value = flag_value(args, i, flag)?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value '{}' for {}", value, flag))
}

fn cmd_bake(args: &[&str]) -> anyhow::Result<()> {
    // --config first so flags can override it wherever they appear
    let mut config = match args.iter().position(|&a| a == "--config") {
        Some(pos) => {
            let path = args.get(pos + 1).context("missing value for --config")?;
            BakeConfig::load(path).with_context(|| format!("loading {}", path))?
        }
        None => BakeConfig::default(),
    };

    let mut heightmap_path: Option<PathBuf> = None;
    let mut save_path: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--config" => i += 1,
            "--level" => config.subdivision_level = parse_flag(args, &mut i, "--level")?,
            "--grid" => config.grid = parse_flag(args, &mut i, "--grid")?,
            "--flat" => config.flat_height = Some(parse_flag(args, &mut i, "--flat")?),
            "--bias" => config.bias = parse_flag(args, &mut i, "--bias")?,
            "--scale" => config.scale = parse_flag(args, &mut i, "--scale")?,
            "--out" => config.output = Some(PathBuf::from(flag_value(args, &mut i, "--out")?)),
            "--save-config" => {
                save_path = Some(PathBuf::from(flag_value(args, &mut i, "--save-config")?))
            }
            "--filter" => {
                config.sampler.filter = match flag_value(args, &mut i, "--filter")? {
                    "nearest" => FilterMode::Nearest,
                    "linear" => FilterMode::Linear,
                    other => bail!("unknown filter '{}'", other),
                }
            }
            "--address" => {
                config.sampler.address = match flag_value(args, &mut i, "--address")? {
                    "repeat" => AddressMode::Repeat,
                    "clamp" => AddressMode::ClampToEdge,
                    other => bail!("unknown address mode '{}'", other),
                }
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            path => heightmap_path = Some(PathBuf::from(path)),
        }
        i += 1;
    }
    config.validate()?;
    if let Some(path) = &save_path {
        config
            .save(path)
            .with_context(|| format!("saving {}", path.display()))?;
        info!("Saved settings to {}", path.display());
    }

    let sampler: Arc<dyn HeightSampler> = match (&heightmap_path, config.flat_height) {
        (Some(path), _) => {
            info!("Loading heightmap: {}", path.display());
            Arc::new(Heightmap::open(path, config.sampler)?)
        }
        (None, Some(height)) => Arc::new(ConstantHeight(height)),
        (None, None) => bail!("no heightmap given (pass a file or --flat)"),
    };

    bake(&config, sampler)
}

fn bake(config: &BakeConfig, sampler: Arc<dyn HeightSampler>) -> anyhow::Result<()> {
    let device = HostDevice::new();
    let cmd = device.command_buffer();
    let mesh = GridMesh::new(config.grid);
    debug!(triangles = mesh.triangle_count(), "generated grid");

    let usage = BufferUsage::SHADER_DEVICE_ADDRESS | BufferUsage::STORAGE_BUFFER;
    let indices = device
        .create_buffer_with_data(bytemuck::cast_slice(&mesh.indices), usage)
        .map_err(Error::Native)?;
    let tex_coords = device
        .create_buffer_with_data(bytemuck::cast_slice(&mesh.tex_coords), usage)
        .map_err(Error::Native)?;
    let directions = device
        .create_buffer_with_data(bytemuck::cast_slice(&mesh.directions), usage)
        .map_err(Error::Native)?;

    let image = device.create_image(sampler);
    let flags = barrier_flags();
    device.transition_image(image, flags.heightmap_layout);

    let pipeline = Pipeline::new(
        cmd,
        PipelineCreate {
            linkage: Linkage::Static(Arc::new(device.clone())),
            allocator: Arc::new(device.clone()),
            pipeline_cache: None,
            check_result: Some(Arc::new(|result: NativeResult| {
                if result.is_error() {
                    error!(%result, "device call failed");
                }
            })),
        },
    )?;

    let create = MapCreate {
        primitive_count: mesh.triangle_count(),
        subdivision_level: config.subdivision_level,
        index_type: IndexType::Uint32,
        index_data: device.buffer_device_address(indices),
        tex_coords_format: Format::R32G32Sfloat,
        tex_coords_buffer: device.buffer_device_address(tex_coords),
        tex_coords_stride: 8,
        directions_format: Format::R16G16B16A16Sfloat,
        directions_buffer: device.buffer_device_address(directions),
        directions_stride: 8,
        heightmap: ImageDescriptor {
            image,
            layout: flags.heightmap_layout,
        },
        bias: config.bias,
        scale: config.scale,
    };

    let start = std::time::Instant::now();
    let map = cmd_create_map(cmd, Some(&pipeline), &create)?;
    let elapsed = start.elapsed();

    let faults = device.faults();
    if !faults.is_empty() {
        bail!("device faults: {}", faults.join("; "));
    }

    let values = device
        .read_buffer(map.values().handle())
        .context("packed value buffer vanished")?;

    let level = config.subdivision_level;
    let blocks = blocks_per_triangle(level) as u64;
    let per_block = micro_verts_per_block(level);
    let (mut min, mut max, mut sum, mut count) = (u16::MAX, 0u16, 0u64, 0u64);
    for block in 0..map.triangle_count() as u64 * blocks {
        for vertex in 0..per_block {
            if let Some(v) = read_packed_value(&values, block, vertex) {
                min = min.min(v);
                max = max.max(v);
                sum += v as u64;
                count += 1;
            }
        }
    }

    let desc = map.descriptor();
    println!("triangles:      {}", map.triangle_count());
    println!("level:          {}", level);
    println!("blocks:         {}", map.triangle_count() as u64 * blocks);
    println!(
        "micro-tris:     {}",
        map.triangle_count() as u64 * micro_triangles_per_triangle(level) as u64
    );
    println!("packed bytes:   {}", values.len());
    println!("micromap:       {:?}", desc.micromap);
    println!("usages:         {:?}", desc.usages);
    if count > 0 {
        println!(
            "values:         min {} max {} mean {:.1}",
            min,
            max,
            sum as f64 / count as f64
        );
        println!(
            "heights:        min {:.4} max {:.4}",
            dequantize(min as u32),
            dequantize(max as u32)
        );
    }
    info!("Baked in {:.2?}", elapsed);

    if let Some(path) = &config.output {
        std::fs::write(path, &values).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} bytes to {}", values.len(), path.display());
    }
    Ok(())
}

fn cmd_table(args: &[&str]) -> anyhow::Result<()> {
    let mut level = TABLE_LEVEL_DEFAULT;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--level" => level = parse_flag(args, &mut i, "--level")?,
            other => bail!("unknown argument '{}'", other),
        }
        i += 1;
    }
    if level > MAX_SUBDIVISION_LEVEL {
        bail!("level {} exceeds {}", level, MAX_SUBDIVISION_LEVEL);
    }

    let table = BlockToBirdUvTable::global();
    println!("# level {} (u, v at scale {})", level, 1u32 << level);
    println!("# block vertex u v");
    for block in 0..blocks_per_triangle(level) {
        for vertex in 0..micro_verts_per_block(level) {
            if let Some(uv) = table.lookup(block, vertex, level) {
                println!("{} {} {} {}", block, vertex, uv.u, uv.v);
            }
        }
    }
    Ok(())
}

use anyhow::Context;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use nanite_builder::builder::{Dag, Settings};
use nanite_builder::encode::quantize::{MAX_POSITION_PRECISION, MIN_POSITION_PRECISION};
use nanite_builder::procedural::ProceduralMesh;
use std::fs::File;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Shape {
	Grid,
	Cube,
	Sphere,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct BuildArgs {
	#[arg(short, long, value_enum, default_value_t = Shape::Sphere)]
	shape: Shape,
	/// grid quads per side, sphere segments
	#[arg(short, long, default_value_t = 64)]
	resolution: u32,
	#[arg(long, default_value_t = 1)]
	uvs: u32,
	#[arg(long)]
	colors: bool,
	/// snap positions to `2^-precision` units, picked automatically if absent
	#[arg(
		long,
		allow_negative_numbers = true,
		value_parser = clap::value_parser!(i32).range(MIN_POSITION_PRECISION as i64..=MAX_POSITION_PRECISION as i64)
	)]
	precision: Option<i32>,
	#[arg(long)]
	threads: Option<usize>,
	/// log the coarsest cut with more than this many triangles
	#[arg(long)]
	cut: Option<u32>,
	#[arg(short, long)]
	out: Option<PathBuf>,
}

pub fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
	let args = BuildArgs::parse();
	if let Some(threads) = args.threads {
		rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()?;
	}

	let mesh = match args.shape {
		Shape::Grid => ProceduralMesh::grid(args.resolution.max(1)),
		Shape::Cube => ProceduralMesh::cube(),
		Shape::Sphere => ProceduralMesh::uv_sphere(args.resolution.max(3), (args.resolution / 2).max(2)),
	};
	let mesh = if args.colors { mesh.with_vertex_colors() } else { mesh };

	let dag = Dag::build(&mesh.input(args.uvs)).with_context(|| format!("building DAG of {:?}", args.shape))?;
	if let Some(target) = args.cut {
		let cut = dag.cut(0, target);
		log::info!(
			"cut above {} triangles: {} triangles, {} vertices, error {}",
			target,
			cut.num_tris,
			cut.num_verts,
			cut.lod_error
		);
	}

	let settings = Settings {
		position_precision: args.precision.unwrap_or(Settings::AUTO_PRECISION),
	};
	let resources = dag.encode(&settings).context("encoding pages")?;
	println!("{:#?}", resources.stats);

	if let Some(out) = args.out {
		let file = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
		resources
			.serialize_to(file)
			.with_context(|| format!("writing {}", out.display()))?;
		log::info!("written to {}", out.display());
	}
	Ok(())
}

//! Turns the clusters of a finished DAG into streamable pages and the hierarchy referencing them.

pub mod bit_writer;
pub mod hierarchy;
pub mod info;
pub mod material;
pub mod page;
pub mod quantize;
pub mod strip;
pub mod write;

use crate::builder::Settings;
use crate::cluster::{Cluster, ClusterGroup};
use crate::encode::hierarchy::build_hierarchies;
use crate::encode::info::calculate_encoding_infos;
use crate::encode::material::build_material_ranges;
use crate::encode::page::assign_clusters_to_pages;
use crate::encode::quantize::{auto_position_precision, quantize_positions};
use crate::encode::strip::constrain_clusters;
use crate::encode::write::write_pages;
use crate::error::Result;
use nanite_disk::resources::Resources;
use rayon::prelude::*;

/// Encodes all `clusters` into `resources`. Clusters may be split and reordered within their groups along the way.
#[profiling::function]
pub fn encode(
	resources: &mut Resources,
	settings: &Settings,
	clusters: &mut Vec<Cluster>,
	groups: &mut [ClusterGroup],
	num_meshes: u32,
	num_tex_coords: u32,
) -> Result<()> {
	{
		profiling::scope!("build_material_ranges");
		clusters.par_iter_mut().for_each(build_material_ranges);
	}
	constrain_clusters(groups, clusters);

	let requested_precision = if settings.position_precision == Settings::AUTO_PRECISION {
		auto_position_precision(clusters)
	} else {
		settings.position_precision
	};
	// positions have to be quantized after constraining, splits change the cluster bounds
	resources.position_precision = quantize_positions(clusters, requested_precision);
	if resources.position_precision != requested_precision {
		log::warn!(
			"position precision lowered from {} to {} to fit {} bits per axis",
			requested_precision,
			resources.position_precision,
			nanite_disk::constants::MAX_POSITION_QUANTIZATION_BITS
		);
	}

	let encoding_infos = calculate_encoding_infos(clusters);
	let (pages, mut parts) = assign_clusters_to_pages(groups, clusters, &encoding_infos);
	let (hierarchy_nodes, hierarchy_root_offsets) = build_hierarchies(groups, &mut parts, num_meshes);
	resources.hierarchy_nodes = hierarchy_nodes;
	resources.hierarchy_root_offsets = hierarchy_root_offsets;
	resources.num_tex_coords = num_tex_coords;

	let mut stats = write_pages(resources, &pages, groups, &parts, clusters, &encoding_infos, num_tex_coords)?;
	stats.hierarchy_nodes = resources.hierarchy_nodes.len() as u32;
	stats.position_precision = resources.position_precision;
	resources.stats.encoding = stats;
	Ok(())
}

//! Whole pipeline runs on procedural meshes, checked by reading the written pages back.

use crate::builder::{BuildInput, Dag, Settings, build};
use crate::procedural::ProceduralMesh;
use nanite_disk::constants::*;
use nanite_disk::packed::{ClusterDiskHeader, PackedCluster, PageDiskHeader};
use nanite_disk::resources::{LoadedResources, PageView, Resources};
use nanite_disk::strip::{StripDesc, unpack_triangle_indices};
use std::fs;

/// Reassembles cluster `index` from the structure of arrays rows following the disk headers.
fn packed_cluster(gpu_data: &[u8], num_clusters: usize, index: usize) -> PackedCluster {
	let rows_start = size_of::<PageDiskHeader>() + num_clusters * size_of::<ClusterDiskHeader>();
	let mut bytes = [0u8; size_of::<PackedCluster>()];
	for (row, dst) in bytes.chunks_exact_mut(16).enumerate() {
		let src = rows_start + (row * num_clusters + index) * 16;
		dst.copy_from_slice(&gpu_data[src..src + 16]);
	}
	bytemuck::pod_read_unaligned(&bytes)
}

/// Decodes every page and checks its clusters against the page limits. Returns the number of clusters written.
fn check_pages(resources: &Resources) -> anyhow::Result<u32> {
	let mut num_clusters_total = 0;
	for page_index in 0..resources.num_pages() {
		let page = resources.page(page_index)?;
		let view = PageView::parse(&page)?;
		let gpu = view.gpu_data;
		let disk_header: PageDiskHeader = bytemuck::pod_read_unaligned(&gpu[..size_of::<PageDiskHeader>()]);
		let num_clusters = disk_header.num_clusters as usize;
		assert_eq!(view.header.num_clusters as usize, num_clusters);
		assert!(num_clusters > 0 && num_clusters <= MAX_CLUSTERS_PER_PAGE as usize);
		assert!(disk_header.gpu_size <= CLUSTER_PAGE_GPU_SIZE);
		assert_eq!(disk_header.num_tex_coords, resources.num_tex_coords);

		for fixup in &view.hierarchy_fixups {
			assert!((fixup.node_index() as usize) < resources.hierarchy_nodes.len());
			assert!(fixup.child_index() < MAX_HIERACHY_CHILDREN);
		}
		for &dependency in resources.page_dependencies_of(page_index) {
			assert_ne!(dependency as usize, page_index);
			assert!(dependency >= NUM_ROOT_PAGES && (dependency as usize) < resources.num_pages());
		}

		let cluster_headers: Vec<ClusterDiskHeader> = gpu[size_of::<PageDiskHeader>()..]
			.chunks_exact(size_of::<ClusterDiskHeader>())
			.take(num_clusters)
			.map(bytemuck::pod_read_unaligned)
			.collect();
		for (index, header) in cluster_headers.iter().enumerate() {
			let cluster = packed_cluster(gpu, num_clusters, index);
			let num_tris = cluster.num_tris();
			let num_verts = cluster.num_verts();
			assert!(num_tris > 0 && num_tris <= MAX_CLUSTER_TRIANGLES);
			assert!(num_verts > 0 && num_verts <= MAX_CLUSTER_VERTICES);
			assert_eq!(cluster.num_uvs(), resources.num_tex_coords);

			let bitmask_offset = disk_header.strip_bitmask_offset as usize + index * size_of::<[[u32; 3]; 4]>();
			let desc = StripDesc {
				bitmasks: bytemuck::pod_read_unaligned(&gpu[bitmask_offset..bitmask_offset + size_of::<[[u32; 3]; 4]>()]),
				num_prev_ref_vertices_before_dwords: header.num_prev_ref_vertices_before_dwords,
				num_prev_new_vertices_before_dwords: header.num_prev_new_vertices_before_dwords,
			};
			let index_data = &gpu[header.index_data_offset as usize..];
			for tri in 0..num_tris {
				let indices = unpack_triangle_indices(&desc, index_data, tri);
				assert!(indices.iter().all(|&i| i < num_verts), "triangle {tri} decoded as {indices:?}");
			}
		}
		num_clusters_total += num_clusters as u32;
	}
	Ok(num_clusters_total)
}

/// Leaves are mip level 0, so a DAG with a single level under its synthetic root reports `levels == 0`.
#[test]
fn cube_is_a_single_cluster() -> anyhow::Result<()> {
	let mesh = ProceduralMesh::cube();
	let dag = Dag::build(&mesh.input(1))?;
	assert_eq!(dag.clusters.len(), 1);
	assert_eq!(dag.root_groups, [0]);
	// only the root group, nothing below it
	assert_eq!(dag.groups.len() - dag.root_groups.len(), 0);
	assert_eq!(dag.stats.dag.groups, 1);
	assert_eq!(dag.groups[0].children, [0]);
	assert!(dag.clusters[0].is_leaf());
	assert_eq!(dag.stats.dag.levels, 0);
	assert_eq!(dag.groups[0].mip_level, 1);

	let resources = dag.encode(&Settings::default())?;
	assert_eq!(resources.num_pages(), 1);
	assert!(resources.streamable_pages.is_empty());
	assert_eq!(resources.hierarchy_root_offsets, [0]);
	assert_eq!(resources.num_input_triangles, 12);
	assert_eq!(check_pages(&resources)?, 1);

	let page = resources.page(0)?;
	let view = PageView::parse(&page)?;
	assert!(view.cluster_fixups.is_empty());
	let cluster = packed_cluster(view.gpu_data, 1, 0);
	assert_eq!(cluster.num_tris(), 12);
	assert_eq!(cluster.flags & CLUSTER_FLAG_LEAF, CLUSTER_FLAG_LEAF);
	Ok(())
}

#[test]
fn sphere_builds_a_dag() -> anyhow::Result<()> {
	let mesh = ProceduralMesh::uv_sphere(64, 32).with_vertex_colors();
	let dag = Dag::build(&mesh.input(2))?;
	assert!(dag.format.has_colors);
	assert_eq!(dag.format.num_tex_coords, 2);
	assert!(dag.stats.dag.leaf_clusters > 1);
	assert!(dag.stats.dag.levels >= 1);
	assert_eq!(dag.stats.dag.clusters as usize, dag.clusters.len());

	// leaves have no error, an unreachable budget expands the cut all the way down
	let full = dag.cut(0, u32::MAX);
	assert_eq!(full.num_tris, mesh.num_triangles());
	let coarse = dag.cut(0, 0);
	assert!(coarse.num_tris < full.num_tris);

	let num_dag_clusters = dag.clusters.len() as u32;
	let resources = dag.encode(&Settings::default())?;
	let stats = &resources.stats;
	assert_eq!(stats.encoding.pages as usize, resources.num_pages());
	assert_eq!(stats.encoding.root_pages as usize, resources.num_root_pages());
	assert_eq!(stats.encoding.hierarchy_nodes as usize, resources.hierarchy_nodes.len());
	assert_eq!(stats.source.triangles, mesh.num_triangles());
	assert_eq!(resources.num_tex_coords, 2);
	assert!(!resources.root_pages.is_empty());

	// splitting for the strip window may only add clusters
	assert!(check_pages(&resources)? >= num_dag_clusters);
	Ok(())
}

#[test]
fn explicit_precision_is_kept() -> anyhow::Result<()> {
	let mesh = ProceduralMesh::grid(8);
	let settings = Settings { position_precision: 4 };
	let resources = build(&mesh.input(0), &settings)?;
	assert_eq!(resources.position_precision, 4);
	assert_eq!(resources.stats.encoding.position_precision, 4);
	check_pages(&resources)?;
	Ok(())
}

#[test]
fn meshes_get_their_own_hierarchy() -> anyhow::Result<()> {
	let grid = ProceduralMesh::grid(16);
	let sphere = ProceduralMesh::uv_sphere(16, 8);
	let mut verts = grid.verts.clone();
	verts.extend_from_slice(&sphere.verts);
	let mut indexes = grid.indexes.clone();
	indexes.extend(sphere.indexes.iter().map(|&i| i + grid.verts.len() as u32));
	let mut material_indexes = grid.material_indexes.clone();
	material_indexes.extend(sphere.material_indexes.iter().map(|&m| m + 1));
	let mesh_triangle_counts = [grid.num_triangles(), sphere.num_triangles()];

	let input = BuildInput {
		verts: &verts,
		indexes: &indexes,
		material_indexes: &material_indexes,
		mesh_triangle_counts: &mesh_triangle_counts,
		num_tex_coords: 1,
	};
	let dag = Dag::build(&input)?;
	assert_eq!(dag.num_meshes(), 2);
	assert_eq!(dag.cut(1, u32::MAX).num_tris, sphere.num_triangles());

	let resources = dag.encode(&Settings::default())?;
	assert_eq!(resources.stats.source.meshes, 2);
	assert_eq!(resources.hierarchy_root_offsets.len(), 2);
	assert_ne!(resources.hierarchy_root_offsets[0], resources.hierarchy_root_offsets[1]);
	for &offset in &resources.hierarchy_root_offsets {
		assert!((offset as usize) < resources.hierarchy_nodes.len());
	}
	check_pages(&resources)?;
	Ok(())
}

#[test]
fn archive_holds_every_page() -> anyhow::Result<()> {
	let resources = build(&ProceduralMesh::uv_sphere(32, 16).input(1), &Settings::default())?;
	let dir = std::env::temp_dir().join(format!("nanite-builder-test-{}", std::process::id()));
	fs::create_dir_all(&dir)?;
	let path = dir.join("sphere.bin");
	resources.serialize_to(fs::File::create(&path)?)?;

	let loaded = unsafe { LoadedResources::load(&path)? };
	let root = loaded.root();
	assert_eq!(root.page_streaming_states.len(), resources.num_pages());
	assert_eq!(root.hierarchy_nodes.len(), resources.hierarchy_nodes.len());
	for page_index in 0..resources.num_pages() {
		assert_eq!(root.page(page_index)?, resources.page(page_index)?);
	}
	fs::remove_dir_all(&dir)?;
	Ok(())
}

//! Meshes generated from a few parameters, for the CLI and for exercising the whole pipeline in tests.

use crate::builder::BuildInput;
use crate::cluster::BuildVertex;
use glam::{Vec2, Vec3};
use nanite_disk::constants::MAX_NANITE_UVS;
use std::f32::consts::PI;

#[derive(Clone, Debug, Default)]
pub struct ProceduralMesh {
	pub verts: Vec<BuildVertex>,
	pub indexes: Vec<u32>,
	pub material_indexes: Vec<i32>,
	mesh_triangle_counts: [u32; 1],
}

fn vertex(position: Vec3, normal: Vec3, uv: Vec2) -> BuildVertex {
	BuildVertex {
		position,
		normal,
		uvs: [uv; MAX_NANITE_UVS as usize],
		..BuildVertex::default()
	}
}

impl ProceduralMesh {
	fn finish(mut self) -> Self {
		self.mesh_triangle_counts = [self.num_triangles()];
		self
	}

	/// `resolution * resolution` unit quads in the xy plane, facing +Z.
	pub fn grid(resolution: u32) -> Self {
		assert!(resolution > 0);
		let n = resolution + 1;
		let verts = (0..n * n)
			.map(|i| {
				let (x, y) = ((i % n) as f32, (i / n) as f32);
				vertex(Vec3::new(x, y, 0.), Vec3::Z, Vec2::new(x, y) / resolution as f32)
			})
			.collect();

		let mut indexes = Vec::with_capacity((resolution * resolution * 6) as usize);
		for y in 0..resolution {
			for x in 0..resolution {
				let i = y * n + x;
				indexes.extend_from_slice(&[i, i + 1, i + n + 1, i, i + n + 1, i + n]);
			}
		}
		let material_indexes = vec![0; indexes.len() / 3];
		Self {
			verts,
			indexes,
			material_indexes,
			..Self::default()
		}
		.finish()
	}

	/// Unit cube around the origin. Every face has its own vertices and material.
	pub fn cube() -> Self {
		// (normal, u, v) with u x v = normal
		let faces = [
			(Vec3::X, Vec3::Y, Vec3::Z),
			(Vec3::NEG_X, Vec3::Z, Vec3::Y),
			(Vec3::Y, Vec3::Z, Vec3::X),
			(Vec3::NEG_Y, Vec3::X, Vec3::Z),
			(Vec3::Z, Vec3::X, Vec3::Y),
			(Vec3::NEG_Z, Vec3::Y, Vec3::X),
		];

		let mut mesh = Self::default();
		for (face, (normal, u, v)) in faces.into_iter().enumerate() {
			let base = mesh.verts.len() as u32;
			for corner in [Vec2::new(0., 0.), Vec2::new(1., 0.), Vec2::new(1., 1.), Vec2::new(0., 1.)] {
				let offset = corner - 0.5;
				let position = normal * 0.5 + u * offset.x + v * offset.y;
				mesh.verts.push(vertex(position, normal, corner));
			}
			mesh.indexes.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
			mesh.material_indexes.extend([face as i32; 2]);
		}
		mesh.finish()
	}

	/// Unit sphere with `segments` columns around the y axis and `rings` rows from pole to pole. The seam column is
	/// duplicated for continuous UVs, poles collapse to a single position.
	pub fn uv_sphere(segments: u32, rings: u32) -> Self {
		assert!(segments >= 3 && rings >= 2);
		let columns = segments + 1;
		let mut verts = Vec::with_capacity((columns * (rings + 1)) as usize);
		for ring in 0..=rings {
			let theta = PI * ring as f32 / rings as f32;
			for segment in 0..columns {
				// exact positions at the poles and the seam, so the surface stays closed
				let phi = 2. * PI * (segment % segments) as f32 / segments as f32;
				let position = if ring == 0 {
					Vec3::Y
				} else if ring == rings {
					Vec3::NEG_Y
				} else {
					Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
				};
				let uv = Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32);
				verts.push(vertex(position, position, uv));
			}
		}

		let mut indexes = Vec::new();
		for ring in 0..rings {
			for segment in 0..segments {
				let a = ring * columns + segment;
				let b = a + 1;
				let c = a + columns;
				let d = c + 1;
				if ring != 0 {
					indexes.extend_from_slice(&[a, b, c]);
				}
				if ring != rings - 1 {
					indexes.extend_from_slice(&[b, d, c]);
				}
			}
		}
		let material_indexes = vec![0; indexes.len() / 3];
		Self {
			verts,
			indexes,
			material_indexes,
			..Self::default()
		}
		.finish()
	}

	/// Colors every vertex by its normal, mapped to `0..=255`.
	pub fn with_vertex_colors(mut self) -> Self {
		for vert in &mut self.verts {
			let color = (vert.normal * 0.5 + 0.5) * 255. + 0.5;
			let [r, g, b] = color.to_array().map(|c| c as u8);
			vert.color = [r, g, b, 255];
		}
		self
	}

	pub fn num_triangles(&self) -> u32 {
		self.indexes.len() as u32 / 3
	}

	/// The mesh as a single mesh build input with `num_tex_coords` UV channels.
	pub fn input(&self, num_tex_coords: u32) -> BuildInput<'_> {
		BuildInput {
			verts: &self.verts,
			indexes: &self.indexes,
			material_indexes: &self.material_indexes,
			mesh_triangle_counts: &self.mesh_triangle_counts,
			num_tex_coords,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rustc_hash::FxHashMap;

	/// Every directed edge by position needs exactly one edge in the opposite direction.
	fn assert_closed(mesh: &ProceduralMesh) {
		let key = |index: u32| mesh.verts[index as usize].position.to_array().map(f32::to_bits);
		let mut edges = FxHashMap::default();
		for tri in mesh.indexes.chunks_exact(3) {
			for k in 0..3 {
				*edges.entry((key(tri[k]), key(tri[(k + 1) % 3]))).or_insert(0) += 1;
			}
		}
		for (&(a, b), &count) in &edges {
			assert_eq!(count, 1);
			assert_eq!(edges.get(&(b, a)), Some(&1), "edge without opposite");
		}
	}

	/// Triangle normals have to agree with the vertex normals.
	fn assert_outward(mesh: &ProceduralMesh) {
		for tri in mesh.indexes.chunks_exact(3) {
			let [p0, p1, p2] = [0, 1, 2].map(|k| mesh.verts[tri[k] as usize].position);
			let face_normal = (p1 - p0).cross(p2 - p0);
			assert!(face_normal.length() > 0., "degenerate triangle");
			for &index in tri {
				assert!(face_normal.dot(mesh.verts[index as usize].normal) > 0.);
			}
		}
	}

	#[test]
	fn grid_counts() {
		let mesh = ProceduralMesh::grid(4);
		assert_eq!(mesh.verts.len(), 25);
		assert_eq!(mesh.num_triangles(), 32);
		assert_eq!(mesh.material_indexes.len(), 32);
		assert_outward(&mesh);
		assert_eq!(mesh.input(1).mesh_triangle_counts, &[32]);
	}

	#[test]
	fn cube_is_closed() {
		let mesh = ProceduralMesh::cube();
		assert_eq!(mesh.verts.len(), 24);
		assert_eq!(mesh.num_triangles(), 12);
		assert_eq!(mesh.material_indexes, [0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
		assert_closed(&mesh);
		assert_outward(&mesh);
	}

	#[test]
	fn sphere_is_closed() {
		let mesh = ProceduralMesh::uv_sphere(16, 8);
		assert_eq!(mesh.verts.len(), 17 * 9);
		// one triangle per segment at each pole, two everywhere else
		assert_eq!(mesh.num_triangles(), 2 * 16 + 2 * 16 * 6);
		assert_closed(&mesh);
		assert_outward(&mesh);
	}

	#[test]
	fn colors_follow_normals() {
		let mesh = ProceduralMesh::cube().with_vertex_colors();
		assert_eq!(mesh.verts[0].color, [255, 128, 128, 255]);
		assert_eq!(mesh.verts[4].color, [0, 128, 128, 255]);
	}
}

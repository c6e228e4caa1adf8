use crate::encode::quantize::{MAX_POSITION_PRECISION, MIN_POSITION_PRECISION};
use nanite_disk::constants::MAX_CLUSTER_MATERIALS;
use std::fmt::{Debug, Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum BuildError {
	EmptyMesh,
	IndexOutOfRange { index: u32, num_vertices: u32 },
	MaterialCountMismatch { num_triangles: u32, num_materials: u32 },
	MaterialIndexOutOfRange { material_index: i32 },
	NonFinitePosition { vertex: u32 },
	PositionPrecisionOutOfRange { precision: i32 },
	TriangleCountMismatch { num_indices: u32, num_mesh_triangles: u32 },
	Metis(String),
	Io(io::Error),
}

impl Display for BuildError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			BuildError::EmptyMesh => f.write_str("Input contains no triangles"),
			BuildError::IndexOutOfRange { index, num_vertices } => {
				write!(f, "Index {index} is out of range of {num_vertices} vertices")
			}
			BuildError::MaterialCountMismatch {
				num_triangles,
				num_materials,
			} => write!(
				f,
				"Expected one material index per triangle, got {num_materials} for {num_triangles} triangles"
			),
			BuildError::MaterialIndexOutOfRange { material_index } => write!(
				f,
				"Material index {material_index} is outside of the supported range 0..{MAX_CLUSTER_MATERIALS}"
			),
			BuildError::NonFinitePosition { vertex } => write!(f, "Vertex {vertex} has a non finite position"),
			BuildError::PositionPrecisionOutOfRange { precision } => write!(
				f,
				"Position precision {precision} is outside of the supported range {MIN_POSITION_PRECISION}..={MAX_POSITION_PRECISION}"
			),
			BuildError::TriangleCountMismatch {
				num_indices,
				num_mesh_triangles,
			} => write!(
				f,
				"Meshes declare {num_mesh_triangles} triangles in total but {num_indices} indices were given"
			),
			BuildError::Metis(err) => write!(f, "Graph partitioning failed: {err}"),
			BuildError::Io(err) => write!(f, "IO error: {err}"),
		}
	}
}

impl std::error::Error for BuildError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			BuildError::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<metis::Error> for BuildError {
	fn from(value: metis::Error) -> Self {
		BuildError::Metis(value.to_string())
	}
}

impl From<io::Error> for BuildError {
	fn from(value: io::Error) -> Self {
		BuildError::Io(value)
	}
}

pub type Result<T> = std::result::Result<T, BuildError>;

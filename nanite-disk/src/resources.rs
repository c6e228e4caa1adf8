use crate::constants::NUM_ROOT_PAGES;
use crate::packed::{ClusterFixup, FixupChunkHeader, HierarchyFixup, PackedHierarchyNode, PageStreamingState};
use crate::stats::BuildStats;
use rkyv::api::serialize_using;
use rkyv::ser::Serializer;
use rkyv::ser::sharing::Share;
use rkyv::ser::writer::IoWriter;
use rkyv::util::{AlignedVec, with_arena};
use rkyv::{Archive, Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::{fs, io};

pub const ARCHIVE_COMPRESSION_LEVEL: i32 = 3;
pub const PAGE_COMPRESSION_LEVEL: i32 = 0;

/// Everything produced by a build. Pages are individually zstd compressed, each holding a fixup chunk followed by
/// the GPU visible page data. The first [`NUM_ROOT_PAGES`] pages are always resident and live in
/// `root_pages`, all others are streamed from `streamable_pages`.
#[derive(Clone, Debug, Default, Archive, Serialize, Deserialize)]
pub struct Resources {
	pub root_pages: Vec<u8>,
	pub streamable_pages: Vec<u8>,
	pub page_streaming_states: Vec<PageStreamingState>,
	pub page_dependencies: Vec<u32>,
	pub hierarchy_nodes: Vec<PackedHierarchyNode>,
	/// one per source mesh
	pub hierarchy_root_offsets: Vec<u32>,
	pub position_precision: i32,
	pub num_input_triangles: u32,
	pub num_input_vertices: u32,
	pub num_tex_coords: u32,
	pub stats: BuildStats,
}

impl Resources {
	pub fn num_pages(&self) -> usize {
		self.page_streaming_states.len()
	}

	pub fn num_root_pages(&self) -> usize {
		self.num_pages().min(NUM_ROOT_PAGES as usize)
	}

	pub fn page_dependencies_of(&self, page_index: usize) -> &[u32] {
		let state = &self.page_streaming_states[page_index];
		let start = state.dependencies_start as usize;
		&self.page_dependencies[start..start + state.dependencies_num as usize]
	}

	/// Decompresses a page, the result starts with its fixup chunk.
	pub fn page(&self, page_index: usize) -> io::Result<Vec<u8>> {
		let state = &self.page_streaming_states[page_index];
		let blob = if page_index < self.num_root_pages() {
			&self.root_pages
		} else {
			&self.streamable_pages
		};
		decompress_page(
			blob,
			state.bulk_offset,
			state.bulk_size,
			state.page_uncompressed_size,
		)
	}

	pub fn serialize_to(&self, write: impl Write) -> io::Result<()> {
		profiling::function_scope!();
		let mut writer = BufWriter::with_capacity(128 * 1024, zstd::Encoder::new(write, ARCHIVE_COMPRESSION_LEVEL)?);
		with_arena(|arena| {
			let mut serializer = Serializer::new(IoWriter::new(&mut writer), arena.acquire(), Share::default());
			serialize_using::<_, rkyv::rancor::Error>(self, &mut serializer).map_err(io::Error::other)
		})?;
		writer.into_inner().map_err(|e| e.into_error())?.finish()?;
		Ok(())
	}
}

pub fn decompress_page(blob: &[u8], offset: u32, size: u32, uncompressed_size: u32) -> io::Result<Vec<u8>> {
	let out_of_bounds = || io::Error::new(io::ErrorKind::UnexpectedEof, "page out of bounds of its blob");
	let end = (offset as usize).checked_add(size as usize).ok_or_else(out_of_bounds)?;
	let compressed = blob.get(offset as usize..end).ok_or_else(out_of_bounds)?;
	let page = zstd::bulk::decompress(compressed, uncompressed_size as usize)?;
	if page.len() != uncompressed_size as usize {
		return Err(io::Error::new(io::ErrorKind::InvalidData, "page size mismatch"));
	}
	Ok(page)
}

/// A decompressed page split into its fixup chunk and the GPU data.
#[derive(Clone, Debug)]
pub struct PageView<'a> {
	pub header: FixupChunkHeader,
	pub hierarchy_fixups: Vec<HierarchyFixup>,
	pub cluster_fixups: Vec<ClusterFixup>,
	pub gpu_data: &'a [u8],
}

impl<'a> PageView<'a> {
	pub fn parse(page: &'a [u8]) -> io::Result<Self> {
		let eof = || io::Error::new(io::ErrorKind::UnexpectedEof, "page shorter than its fixup chunk");
		let header_size = size_of::<FixupChunkHeader>();
		let header: FixupChunkHeader = bytemuck::pod_read_unaligned(page.get(..header_size).ok_or_else(eof)?);
		let chunk = page.get(..header.chunk_size()).ok_or_else(eof)?;

		let hierarchy_end = header_size + header.num_hierarchy_fixups as usize * size_of::<HierarchyFixup>();
		let hierarchy_fixups = chunk[header_size..hierarchy_end]
			.chunks_exact(size_of::<HierarchyFixup>())
			.map(bytemuck::pod_read_unaligned)
			.collect();
		let cluster_fixups = chunk[hierarchy_end..]
			.chunks_exact(size_of::<ClusterFixup>())
			.map(bytemuck::pod_read_unaligned)
			.collect();
		Ok(Self {
			header,
			hierarchy_fixups,
			cluster_fixups,
			gpu_data: &page[header.chunk_size()..],
		})
	}
}

pub struct LoadedResources {
	archive: AlignedVec,
}

impl LoadedResources {
	/// # Safety
	/// File must contain a valid datastream retrieved from [`Resources::serialize_to`]
	pub unsafe fn load(path: &Path) -> io::Result<Self> {
		profiling::function_scope!();
		let file = fs::File::open(path)?;
		let mut decoder = zstd::Decoder::new(BufReader::new(file))?;
		let mut bytes = Vec::new();
		{
			profiling::scope!("zstd::Decoder::read");
			decoder.read_to_end(&mut bytes)?;
		}
		let mut archive = AlignedVec::with_capacity(bytes.len());
		archive.extend_from_slice(&bytes);
		Ok(Self { archive })
	}

	pub fn root(&self) -> &ArchivedResources {
		unsafe { rkyv::access_unchecked::<ArchivedResources>(&self.archive) }
	}
}

impl ArchivedResources {
	pub fn page(&self, page_index: usize) -> io::Result<Vec<u8>> {
		let state = &self.page_streaming_states[page_index];
		let blob = if page_index < NUM_ROOT_PAGES as usize {
			&self.root_pages
		} else {
			&self.streamable_pages
		};
		decompress_page(
			blob,
			state.bulk_offset.to_native(),
			state.bulk_size.to_native(),
			state.page_uncompressed_size.to_native(),
		)
	}
}

//! Binary graph files
//!
//! All values are little-endian. A file starts with the magic `NVGR`, the
//! format version and the number of graphs, followed by the node index
//! table and one record per graph:
//!
//! ```text
//! magic        [u8; 4]   "NVGR"
//! version      u32
//! graph count  u32
//! max index    i32       highest node index in use, -1 if there are none
//! node count   i32
//! node indices i32 * node count, in graph/tile/triangle order
//! per graph:
//!     settings    u32 length + JSON
//!     extra info  u32 length + tile dump
//!     references  u32 length + connection lists
//! ```
//!
//! Nodes are recreated in the order of the index table, so the table maps
//! every index stored in a connection list to the node it referred to when
//! the file was written. Reference blocks are only resolved once the nodes of
//! every graph exist, since connections may cross graphs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use navgraph_common::{Error, Int3, Result};

use crate::graph_node::{NodeArena, NodeIndex};
use crate::nav_data::NavData;
use crate::navmesh_graph::{NavmeshGraph, NavmeshGraphSettings};
use crate::navmesh_tile::{NavmeshTile, MAX_TILE_VERTICES};

/// Magic bytes at the start of every graph file
pub const NAVGRAPH_MAGIC: [u8; 4] = *b"NVGR";

/// Current graph file version
pub const NAVGRAPH_VERSION: u32 = 1;

/// Upper bound for any element count read from a file
const MAX_ELEMENT_COUNT: i32 = 1 << 26;

fn write_block<W: Write>(writer: &mut W, block: &[u8]) -> Result<()> {
    let len = u32::try_from(block.len())
        .map_err(|_| Error::Serialization(format!("block of {} bytes is too large", block.len())))?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(block)?;
    Ok(())
}

fn read_block<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_ELEMENT_COUNT as u32 {
        return Err(Error::Serialization(format!("block length {len} is out of range")));
    }
    let mut block = vec![0; len as usize];
    reader.read_exact(&mut block)?;
    Ok(block)
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let count = reader.read_i32::<LittleEndian>()?;
    if !(0..=MAX_ELEMENT_COUNT).contains(&count) {
        return Err(Error::Serialization(format!("invalid {what} count {count}")));
    }
    Ok(count as usize)
}

fn write_int3<W: Write>(writer: &mut W, v: Int3) -> Result<()> {
    writer.write_i32::<LittleEndian>(v.x)?;
    writer.write_i32::<LittleEndian>(v.y)?;
    writer.write_i32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_int3<R: Read>(reader: &mut R) -> Result<Int3> {
    Ok(Int3::new(
        reader.read_i32::<LittleEndian>()?,
        reader.read_i32::<LittleEndian>()?,
        reader.read_i32::<LittleEndian>()?,
    ))
}

fn write_verts<W: Write>(writer: &mut W, verts: &[Int3]) -> Result<()> {
    writer.write_i32::<LittleEndian>(verts.len() as i32)?;
    for &v in verts {
        write_int3(writer, v)?;
    }
    Ok(())
}

fn read_verts<R: Read>(reader: &mut R) -> Result<Vec<Int3>> {
    let count = read_count(reader, "vertex")?;
    if count > MAX_TILE_VERTICES {
        return Err(Error::Serialization(format!(
            "tile has {count} vertices, at most {MAX_TILE_VERTICES} are supported"
        )));
    }
    (0..count).map(|_| read_int3(reader)).collect()
}

impl NavmeshGraph {
    /// Writes the tile grid together with per-node penalties and flags
    pub fn serialize_extra_info<W: Write>(&self, nodes: &NodeArena, writer: &mut W) -> Result<()> {
        if self.tiles().is_empty() {
            writer.write_i32::<LittleEndian>(-1)?;
            return Ok(());
        }
        writer.write_i32::<LittleEndian>(self.tile_x_count())?;
        writer.write_i32::<LittleEndian>(self.tile_z_count())?;

        for tile in self.tiles() {
            writer.write_i32::<LittleEndian>(tile.x)?;
            writer.write_i32::<LittleEndian>(tile.z)?;
            writer.write_i32::<LittleEndian>(tile.w)?;
            writer.write_i32::<LittleEndian>(tile.d)?;

            writer.write_i32::<LittleEndian>(tile.tris.len() as i32)?;
            for &t in &tile.tris {
                writer.write_i32::<LittleEndian>(t)?;
            }
            write_verts(writer, &tile.verts)?;
            write_verts(writer, &tile.verts_in_graph_space)?;

            writer.write_i32::<LittleEndian>(tile.nodes.len() as i32)?;
            for &index in &tile.nodes {
                nodes
                    .get_live(index)
                    .ok_or_else(|| Error::InvalidGraph(format!("tile references destroyed node {index}")))?
                    .write_to(writer)?;
            }
        }
        Ok(())
    }

    /// Reads a tile dump written by [`NavmeshGraph::serialize_extra_info`].
    ///
    /// Nodes are allocated in tile order. Their vertex references and
    /// positions are rebuilt from the tile arrays, penalty and flags are read
    /// from the dump. Connections are not touched.
    pub fn deserialize_extra_info<R: Read>(&mut self, nodes: &mut NodeArena, reader: &mut R) -> Result<()> {
        let tile_x_count = reader.read_i32::<LittleEndian>()?;
        if tile_x_count < 0 {
            self.tiles_mut().clear();
            return Ok(());
        }
        let tile_z_count = reader.read_i32::<LittleEndian>()?;
        if tile_x_count != self.tile_x_count() || tile_z_count != self.tile_z_count() {
            return Err(Error::Serialization(format!(
                "tile grid is {tile_x_count}x{tile_z_count} but the graph settings say {}x{}",
                self.tile_x_count(),
                self.tile_z_count()
            )));
        }
        self.fill_with_empty_tiles();

        for z in 0..tile_z_count {
            for x in 0..tile_x_count {
                let tile_index = self.tile_index(x, z);
                let tx = reader.read_i32::<LittleEndian>()?;
                let tz = reader.read_i32::<LittleEndian>()?;
                if tx < 0 || tz < 0 {
                    return Err(Error::Serialization(format!(
                        "invalid tile coordinates ({tx}, {tz})"
                    )));
                }
                if tx != x || tz != z {
                    return Err(Error::Serialization(format!(
                        "tile ({tx}, {tz}) found where tile ({x}, {z}) was expected"
                    )));
                }
                let w = reader.read_i32::<LittleEndian>()?;
                let d = reader.read_i32::<LittleEndian>()?;

                let tri_count = read_count(reader, "triangle index")?;
                if tri_count % 3 != 0 {
                    return Err(Error::Serialization(format!(
                        "corrupt tile ({x}, {z}), triangle index count {tri_count} is not a multiple of 3"
                    )));
                }
                let tris = (0..tri_count)
                    .map(|_| reader.read_i32::<LittleEndian>())
                    .collect::<std::io::Result<Vec<i32>>>()?;
                let verts = read_verts(reader)?;
                let verts_in_graph_space = read_verts(reader)?;
                if verts.len() != verts_in_graph_space.len() {
                    return Err(Error::Serialization(format!(
                        "corrupt tile ({x}, {z}), {} world vertices but {} graph space vertices",
                        verts.len(),
                        verts_in_graph_space.len()
                    )));
                }
                if let Some(&bad) = tris.iter().find(|&&t| t < 0 || t as usize >= verts.len()) {
                    return Err(Error::Serialization(format!(
                        "corrupt tile ({x}, {z}), triangle references vertex {bad} of {}",
                        verts.len()
                    )));
                }

                let node_count = read_count(reader, "node")?;
                if node_count != tri_count / 3 {
                    return Err(Error::Serialization(format!(
                        "corrupt tile ({x}, {z}), {node_count} nodes for {} triangles",
                        tri_count / 3
                    )));
                }

                self.tiles_mut()[tile_index] = NavmeshTile {
                    x,
                    z,
                    w,
                    d,
                    tris: Vec::new(),
                    verts,
                    verts_in_graph_space,
                    nodes: Vec::new(),
                    bb_tree: Default::default(),
                };
                let mut buffer = vec![None; node_count];
                self.create_nodes(nodes, &mut buffer, &tris, tile_index, self.graph_index())?;

                let tile_nodes: Vec<NodeIndex> = buffer.into_iter().flatten().collect();
                for &index in &tile_nodes {
                    let node = &mut nodes[index];
                    node.read_from(reader)?;
                    node.set_graph_index(self.graph_index());
                }

                let tile = &mut self.tiles_mut()[tile_index];
                tile.tris = tris;
                tile.nodes = tile_nodes;
                self.rebuild_bb_tree(nodes, tile_index);
            }
        }
        Ok(())
    }

    /// Writes the connection list of every node, in tile order
    pub fn serialize_references<W: Write>(&self, nodes: &NodeArena, writer: &mut W) -> Result<()> {
        for index in self.nodes() {
            nodes[index].write_references_to(writer, |n| n.0 as i32)?;
        }
        Ok(())
    }

    /// Reads connection lists written by [`NavmeshGraph::serialize_references`],
    /// mapping stored indices through `remap`
    pub fn deserialize_references<R: Read>(
        &self,
        nodes: &mut NodeArena,
        reader: &mut R,
        remap: &[Option<NodeIndex>],
    ) -> Result<()> {
        let all: Vec<NodeIndex> = self.nodes().collect();
        for index in all {
            nodes[index].read_references_from(reader, |stored| {
                usize::try_from(stored).ok().and_then(|i| remap.get(i).copied().flatten())
            })?;
        }
        Ok(())
    }
}

impl NavData {
    /// Writes every graph to a byte buffer
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize_to(&mut out)?;
        Ok(out)
    }

    /// Writes every graph to `writer`
    pub fn serialize_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&NAVGRAPH_MAGIC)?;
        writer.write_u32::<LittleEndian>(NAVGRAPH_VERSION)?;
        writer.write_u32::<LittleEndian>(self.graphs().len() as u32)?;

        let table: Vec<NodeIndex> = self.graphs().iter().flat_map(|g| g.nodes()).collect();
        let max_index = table.iter().map(|n| n.0 as i32).max().unwrap_or(-1);
        writer.write_i32::<LittleEndian>(max_index)?;
        writer.write_i32::<LittleEndian>(table.len() as i32)?;
        for index in &table {
            writer.write_i32::<LittleEndian>(index.0 as i32)?;
        }

        for graph in self.graphs() {
            write_block(writer, &serde_json::to_vec(graph.settings())?)?;

            let mut extra = Vec::new();
            graph.serialize_extra_info(self.nodes(), &mut extra)?;
            write_block(writer, &extra)?;

            let mut references = Vec::new();
            graph.serialize_references(self.nodes(), &mut references)?;
            write_block(writer, &references)?;
        }

        log::debug!(
            "Serialized {} graphs with {} nodes",
            self.graphs().len(),
            table.len()
        );
        Ok(())
    }

    /// Reads graphs written by [`NavData::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<NavData> {
        Self::deserialize_from(&mut Cursor::new(bytes))
    }

    /// Reads graphs written by [`NavData::serialize_to`]
    pub fn deserialize_from<R: Read>(reader: &mut R) -> Result<NavData> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != NAVGRAPH_MAGIC {
            return Err(Error::Serialization("not a navgraph file".to_string()));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != NAVGRAPH_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported version {version}, expected {NAVGRAPH_VERSION}"
            )));
        }
        let graph_count = reader.read_u32::<LittleEndian>()?;

        let max_index = reader.read_i32::<LittleEndian>()?;
        if !(-1..MAX_ELEMENT_COUNT).contains(&max_index) {
            return Err(Error::Serialization(format!("invalid max node index {max_index}")));
        }
        let node_count = read_count(reader, "node")?;
        let mut table = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let stored = reader.read_i32::<LittleEndian>()?;
            if stored < 0 || stored > max_index {
                return Err(Error::Serialization(format!(
                    "node index {stored} is outside 0..={max_index}"
                )));
            }
            table.push(stored as usize);
        }

        let mut nodes = NodeArena::new();
        let mut graphs = Vec::with_capacity(graph_count as usize);
        let mut reference_blocks = Vec::with_capacity(graph_count as usize);
        for graph_index in 0..graph_count {
            let settings: NavmeshGraphSettings = serde_json::from_slice(&read_block(reader)?)?;
            let mut graph = NavmeshGraph::new(graph_index, settings)?;
            let extra = read_block(reader)?;
            graph.deserialize_extra_info(&mut nodes, &mut Cursor::new(extra))?;
            reference_blocks.push(read_block(reader)?);
            graphs.push(graph);
        }

        let created: Vec<NodeIndex> = graphs.iter().flat_map(|g| g.nodes()).collect();
        if created.len() != table.len() {
            return Err(Error::Serialization(format!(
                "node index table lists {} nodes but the graphs hold {}",
                table.len(),
                created.len()
            )));
        }
        let mut remap = vec![None; (max_index + 1) as usize];
        for (&stored, &node) in table.iter().zip(&created) {
            remap[stored] = Some(node);
        }

        for (graph, block) in graphs.iter().zip(reference_blocks) {
            graph.deserialize_references(&mut nodes, &mut Cursor::new(block), &remap)?;
        }

        log::debug!(
            "Deserialized {} graphs with {} nodes",
            graphs.len(),
            created.len()
        );
        Ok(NavData::from_parts(graphs, nodes, NavData::new().max_nearest_node_distance()))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.serialize_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<NavData> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::deserialize_from(&mut reader)
    }
}

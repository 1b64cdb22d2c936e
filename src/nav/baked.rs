use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use super::cell_matrix::{Cell, CellMatrix};
use super::config::GridConfig;
use super::errors::{ConfigError, NavResult};
use super::height_map::HeightMap;
use super::math::Bounds;

pub const BAKED_DATA_VERSION: u32 = 2;

/// How far (world units) baked bounds may drift from the target bounds and still be used.
const PLACEMENT_TOLERANCE: f32 = 1e-4;

/// Snapshot of a baked cell matrix, handed back to the builder to skip rescanning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BakedGridData {
    pub version: u32,
    pub size_x: u32,
    pub size_z: u32,
    pub cell_size: f32,
    pub has_height_map: bool,
    /// Where the grid stood when it was baked; cell heights and the height map are only
    /// valid there.
    pub bounds: Bounds,
    pub cells: Vec<Cell>,
    pub height_map: Option<HeightMap>,
}

impl BakedGridData {
    pub fn from_matrix(matrix: &CellMatrix) -> Self {
        Self {
            version: BAKED_DATA_VERSION,
            size_x: matrix.size_x() as u32,
            size_z: matrix.size_z() as u32,
            cell_size: matrix.cell_size(),
            has_height_map: matrix.has_height_map(),
            bounds: matrix.bounds(),
            cells: matrix.cells().to_vec(),
            height_map: matrix.height_map().cloned(),
        }
    }

    /// Check that this data can stand in for a bake of `config` placed at `bounds`.
    pub fn check_compatible(&self, config: &GridConfig, bounds: Bounds) -> NavResult<()> {
        let mismatch = |reason: String| ConfigError::BakedDataMismatch {
            grid: config.friendly_name.clone(),
            reason,
        };

        if self.version != BAKED_DATA_VERSION {
            return Err(mismatch(format!("version {} (expected {})", self.version, BAKED_DATA_VERSION)).into());
        }
        if self.size_x != config.size_x || self.size_z != config.size_z {
            return Err(mismatch(format!(
                "size {}x{} (configured {}x{})",
                self.size_x, self.size_z, config.size_x, config.size_z
            )).into());
        }
        if (self.cell_size - config.cell_size).abs() > f32::EPSILON {
            return Err(mismatch(format!("cell size {} (configured {})", self.cell_size, config.cell_size)).into());
        }
        if self.has_height_map != config.generate_heightmap || self.has_height_map != self.height_map.is_some() {
            return Err(mismatch(format!(
                "height map present: {} (configured {})",
                self.height_map.is_some(), config.generate_heightmap
            )).into());
        }
        let drift = (self.bounds.center - bounds.center).abs().max_element()
            .max((self.bounds.size - bounds.size).abs().max_element());
        if drift > PLACEMENT_TOLERANCE {
            return Err(mismatch(format!(
                "baked at {:?} (grid now at {:?})",
                self.bounds.center, bounds.center
            )).into());
        }
        let expected_cells = (self.size_x * self.size_z) as usize;
        if self.cells.len() != expected_cells {
            return Err(mismatch(format!("{} cells (expected {})", self.cells.len(), expected_cells)).into());
        }
        if let Some(map) = &self.height_map {
            let spc = config.samples_per_cell();
            if map.samples_per_cell() != spc {
                return Err(mismatch(format!(
                    "{} height samples per cell (configured {})",
                    map.samples_per_cell(), spc
                )).into());
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        bincode::serialize_into(&mut encoder, self)?;
        Ok(encoder.finish()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        let data: BakedGridData = bincode::deserialize(&raw)?;
        Ok(data)
    }
}

pub fn save_baked_data(path: &str, data: &BakedGridData) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let mut encoder = ZlibEncoder::new(writer, Compression::default());
    bincode::serialize_into(&mut encoder, data)?;
    encoder.finish()?.flush()?;
    Ok(())
}

pub fn load_baked_data(path: &str) -> Result<BakedGridData, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut decoder = ZlibDecoder::new(reader);
    let data: BakedGridData = bincode::deserialize_from(&mut decoder)?;
    Ok(data)
}

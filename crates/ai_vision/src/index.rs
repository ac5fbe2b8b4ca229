//! Flat (exhaustive) nearest-neighbour index and its file format
//!
//! Layout, little-endian:
//!
//! ```text
//! magic   b"SPIX"
//! version u32 (1)
//! metric  u8  (0 = squared L2, 1 = L2)
//! dim     u32
//! count   u64
//! data    count × dim × f32
//! ```
//!
//! The id list lives next to the index as `{"image_ids": [...]}` JSON;
//! position `i` in the index belongs to `image_ids[i]`.

use std::{
    fmt,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::VisionError;

/// File magic
pub const MAGIC: [u8; 4] = *b"SPIX";
/// File format version
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

/// Distance used for ranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Sum of squared differences
    #[default]
    SquaredL2,
    /// Euclidean distance
    L2,
}

impl DistanceMetric {
    const fn code(self) -> u8 {
        match self {
            Self::SquaredL2 => 0,
            Self::L2 => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self, VisionError> {
        match code {
            0 => Ok(Self::SquaredL2),
            1 => Ok(Self::L2),
            other => Err(VisionError::Index(format!("unknown metric code {other}"))),
        }
    }

    /// Stable name used in status output
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SquaredL2 => "squared_l2",
            Self::L2 => "l2",
        }
    }

    fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        let squared: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        match self {
            Self::SquaredL2 => squared,
            Self::L2 => squared.sqrt(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub position: usize,
    pub distance: f32,
}

/// Exhaustive index over fixed-dimension vectors
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index
    pub fn new(dimension: usize, metric: DistanceMetric) -> Result<Self, VisionError> {
        if dimension == 0 {
            return Err(VisionError::Index("dimension must be positive".to_string()));
        }
        Ok(Self {
            dimension,
            metric,
            data: Vec::new(),
        })
    }

    /// Vector dimension
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Distance metric
    pub const fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    /// Whether no vectors are stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector; its position is the previous length
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, VisionError> {
        if vector.len() != self.dimension {
            return Err(VisionError::shape(self.dimension, vector.len()));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::NonFinite("index vector"));
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// The `k` nearest vectors, ascending by distance then position
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbour>, VisionError> {
        if query.len() != self.dimension {
            return Err(VisionError::shape(self.dimension, query.len()));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbour> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, v)| Neighbour {
                position,
                distance: self.metric.distance(query, v),
            })
            .collect();

        let order = |a: &Neighbour, b: &Neighbour| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        };
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, order);
            scored.truncate(k);
        }
        scored.sort_by(order);
        Ok(scored)
    }

    /// Serialize to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), VisionError> {
        let dim = u32::try_from(self.dimension)
            .map_err(|_| VisionError::Index("dimension exceeds u32".to_string()))?;
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&[self.metric.code()])?;
        writer.write_all(&dim.to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for v in &self.data {
            writer.write_all(&v.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Deserialize from a reader, rejecting truncated or trailing data
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, VisionError> {
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .map_err(|e| VisionError::Index(format!("truncated header: {e}")))?;

        if header[0..4] != MAGIC {
            return Err(VisionError::Index("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(VisionError::Index(format!("unsupported version {version}")));
        }
        let metric = DistanceMetric::from_code(header[8])?;
        let dimension = u32::from_le_bytes([header[9], header[10], header[11], header[12]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[13..21]);
        let count = u64::from_le_bytes(count_bytes);

        if dimension == 0 {
            return Err(VisionError::Index("dimension must be positive".to_string()));
        }
        let payload_len = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(dimension))
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| VisionError::Index(format!("vector count {count} is too large")))?;

        // Read through `take` so a lying header cannot force a huge allocation
        let mut payload = Vec::new();
        reader
            .by_ref()
            .take(payload_len as u64)
            .read_to_end(&mut payload)?;
        if payload.len() != payload_len {
            return Err(VisionError::Index(format!(
                "expected {payload_len} bytes of vectors, found {}",
                payload.len()
            )));
        }
        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(VisionError::Index("trailing bytes after vectors".to_string()));
        }

        let data: Vec<f32> = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if data.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::NonFinite("index vectors"));
        }

        Ok(Self {
            dimension,
            metric,
            data,
        })
    }

    /// Write to a file
    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Read from a file
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

/// Ids of the indexed reference images, in index order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingMapping {
    pub image_ids: Vec<String>,
}

impl EmbeddingMapping {
    /// Read from a JSON file
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Write as JSON
    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

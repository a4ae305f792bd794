//! Single-file columnar tile container.
//!
//! Layout: 8-byte magic, u32 LE header length, JSON [`ContainerHeader`], then
//! the data section with row-aligned array payloads. Arrays are addressed by
//! name and read lazily through a memory map; nothing is materialized until a
//! row range is requested.

use crate::types::{
    ArrayDType, ArrayMeta, ContainerHeader, DatasetResult, Endianness, TileDatasetError,
};
use memmap2::MmapOptions;
use sha2::Digest;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 8] = b"TILESET1";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug)]
pub struct TileContainer {
    path: PathBuf,
    header: ContainerHeader,
    mmap: memmap2::Mmap,
    data_start: usize,
}

impl TileContainer {
    /// Open a container and verify array checksums where present.
    pub fn open(path: &Path) -> DatasetResult<Self> {
        Self::open_with(path, true)
    }

    pub fn open_with(path: &Path, verify_checksums: bool) -> DatasetResult<Self> {
        let file = File::open(path).map_err(|e| TileDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| TileDatasetError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?
        };
        if mmap.len() < MAGIC.len() + 4 || &mmap[..MAGIC.len()] != MAGIC {
            return Err(TileDatasetError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&mmap[MAGIC.len()..MAGIC.len() + 4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_start = MAGIC.len() + 4;
        let data_start = header_start + header_len;
        if data_start > mmap.len() {
            return Err(TileDatasetError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        let header: ContainerHeader = serde_json::from_slice(&mmap[header_start..data_start])
            .map_err(|e| TileDatasetError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        let container = Self {
            path: path.to_path_buf(),
            header,
            mmap,
            data_start,
        };
        if container.header.endianness == Endianness::Big {
            return Err(TileDatasetError::UnsupportedEndianness {
                path: path.to_path_buf(),
            });
        }
        // Reject headers whose shape implies more bytes than the payload
        // stores; row reads index by shape and must never run off the slice.
        for meta in &container.header.arrays {
            let bytes = container.array_bytes(meta)?;
            let needed = meta.rows().checked_mul(meta.row_bytes());
            match needed {
                Some(needed) if needed <= bytes.len() => {}
                _ => {
                    return Err(TileDatasetError::Truncated {
                        path: path.to_path_buf(),
                        name: meta.name.clone(),
                    })
                }
            }
        }
        if verify_checksums {
            container.verify_checksums()?;
        }
        Ok(container)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Look up a named array. A missing name is fatal to the caller.
    pub fn array(&self, name: &str) -> DatasetResult<&ArrayMeta> {
        self.header
            .arrays
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| TileDatasetError::MissingArray {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }

    fn array_bytes(&self, meta: &ArrayMeta) -> DatasetResult<&[u8]> {
        let start = self
            .data_start
            .checked_add(meta.byte_offset as usize)
            .ok_or_else(|| TileDatasetError::Truncated {
                path: self.path.clone(),
                name: meta.name.clone(),
            })?;
        let end = start
            .checked_add(meta.byte_len as usize)
            .filter(|end| *end <= self.mmap.len())
            .ok_or_else(|| TileDatasetError::Truncated {
                path: self.path.clone(),
                name: meta.name.clone(),
            })?;
        Ok(&self.mmap[start..end])
    }

    fn verify_checksums(&self) -> DatasetResult<()> {
        for meta in &self.header.arrays {
            let Some(expected) = &meta.checksum_sha256 else {
                continue;
            };
            let bytes = self.array_bytes(meta)?;
            let actual = format!("{:x}", sha2::Sha256::digest(bytes));
            if &actual != expected {
                return Err(TileDatasetError::ChecksumMismatch {
                    path: self.path.clone(),
                    name: meta.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Read rows `[row_start, row_end)` of a named array as f32. U8 payloads
    /// are normalized to [0, 1]; F32 payloads pass through.
    pub fn read_rows_f32(
        &self,
        name: &str,
        row_start: usize,
        row_end: usize,
        out: &mut Vec<f32>,
    ) -> DatasetResult<()> {
        let meta = self.array(name)?;
        if row_end > meta.rows() || row_start > row_end {
            return Err(TileDatasetError::Truncated {
                path: self.path.clone(),
                name: meta.name.clone(),
            });
        }
        let bytes = self.array_bytes(meta)?;
        let row_bytes = meta.row_bytes();
        let slice = &bytes[row_start * row_bytes..row_end * row_bytes];
        match meta.dtype {
            ArrayDType::U8 => {
                out.extend(slice.iter().map(|&v| v as f32 / 255.0));
            }
            ArrayDType::F32 => {
                for chunk in slice.chunks_exact(4) {
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(chunk);
                    out.push(f32::from_le_bytes(arr));
                }
            }
        }
        Ok(())
    }

    /// Read rows of a label array as integer class indices.
    pub fn read_labels(
        &self,
        name: &str,
        row_start: usize,
        row_end: usize,
    ) -> DatasetResult<Vec<i64>> {
        let meta = self.array(name)?;
        if row_end > meta.rows() || row_start > row_end {
            return Err(TileDatasetError::Truncated {
                path: self.path.clone(),
                name: meta.name.clone(),
            });
        }
        let bytes = self.array_bytes(meta)?;
        let row_bytes = meta.row_bytes();
        let slice = &bytes[row_start * row_bytes..row_end * row_bytes];
        let mut labels = Vec::with_capacity(row_end - row_start);
        match meta.dtype {
            ArrayDType::U8 => labels.extend(slice.iter().map(|&v| v as i64)),
            ArrayDType::F32 => {
                for chunk in slice.chunks_exact(4) {
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(chunk);
                    labels.push(f32::from_le_bytes(arr) as i64);
                }
            }
        }
        Ok(labels)
    }
}

enum PendingPayload {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

/// Writer used by ETL tooling and test fixtures. Arrays are buffered in
/// memory and flushed with checksums on [`TileContainerWriter::finish`].
pub struct TileContainerWriter {
    path: PathBuf,
    arrays: Vec<(ArrayMeta, PendingPayload)>,
}

impl TileContainerWriter {
    pub fn create(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            arrays: Vec::new(),
        }
    }

    pub fn add_u8_array(&mut self, name: &str, shape: Vec<usize>, data: Vec<u8>) -> &mut Self {
        let meta = ArrayMeta {
            name: name.to_string(),
            dtype: ArrayDType::U8,
            shape,
            byte_offset: 0,
            byte_len: data.len() as u64,
            checksum_sha256: None,
        };
        self.arrays.push((meta, PendingPayload::U8(data)));
        self
    }

    pub fn add_f32_array(&mut self, name: &str, shape: Vec<usize>, data: Vec<f32>) -> &mut Self {
        let meta = ArrayMeta {
            name: name.to_string(),
            dtype: ArrayDType::F32,
            shape,
            byte_offset: 0,
            byte_len: (data.len() * 4) as u64,
            checksum_sha256: None,
        };
        self.arrays.push((meta, PendingPayload::F32(data)));
        self
    }

    pub fn finish(self) -> DatasetResult<()> {
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(self.arrays.len());
        let mut metas: Vec<ArrayMeta> = Vec::with_capacity(self.arrays.len());
        let mut offset = 0u64;
        for (mut meta, payload) in self.arrays {
            let bytes = match payload {
                PendingPayload::U8(data) => data,
                PendingPayload::F32(data) => {
                    let mut buf = Vec::with_capacity(data.len() * 4);
                    for v in data {
                        buf.extend_from_slice(&v.to_le_bytes());
                    }
                    buf
                }
            };
            let expected: usize = meta.rows() * meta.row_bytes();
            if bytes.len() != expected {
                return Err(TileDatasetError::Other(format!(
                    "array {} payload is {} bytes but shape implies {}",
                    meta.name,
                    bytes.len(),
                    expected
                )));
            }
            meta.byte_offset = offset;
            meta.byte_len = bytes.len() as u64;
            meta.checksum_sha256 = Some(format!("{:x}", sha2::Sha256::digest(&bytes)));
            offset += meta.byte_len;
            metas.push(meta);
            payloads.push(bytes);
        }

        let created_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let header = ContainerHeader {
            version: FORMAT_VERSION,
            created_at_ms,
            endianness: Endianness::Little,
            arrays: metas,
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| TileDatasetError::Other(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| TileDatasetError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let mut file = File::create(&self.path).map_err(|e| TileDatasetError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let io_err = |e| TileDatasetError::Io {
            path: self.path.clone(),
            source: e,
        };
        file.write_all(MAGIC).map_err(io_err)?;
        file.write_all(&(header_json.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        file.write_all(&header_json).map_err(io_err)?;
        for payload in &payloads {
            file.write_all(payload).map_err(io_err)?;
        }
        Ok(())
    }
}

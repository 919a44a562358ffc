//! Chunk reassembly into contiguous file prefixes.
//!
//! A [`PartialFile`] buffers the gap-free prefix of a file as chunks
//! arrive, possibly out of order within a submission. Invariants:
//!
//! - bytes are contiguous from offset 0
//! - a chunk appends exactly at the current length, anything else is a
//!   reassembly error
//! - buffered length never exceeds the declared metadata size; the file
//!   is complete exactly when the two are equal

use crate::error::ReassemblyError;
use periderm_protocol::{AssembledFile, DataChunk, FileMetadata};

/// Metadata plus the contiguous byte prefix received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFile {
    metadata: FileMetadata,
    data: Vec<u8>,
}

impl PartialFile {
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            metadata,
            data: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once every declared byte is buffered. A zero-size file is
    /// complete from the start.
    pub fn is_complete(&self) -> bool {
        self.len() == self.metadata.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Validate a chunk batch against a projected buffer length without
    /// applying anything. Chunks are checked in offset order. Returns
    /// the length the buffer would have after applying the batch.
    pub fn validate_chunks(
        path: &str,
        declared_size: u64,
        current_len: u64,
        chunks: &[DataChunk],
    ) -> Result<u64, ReassemblyError> {
        let mut ordered: Vec<&DataChunk> = chunks.iter().collect();
        ordered.sort_by_key(|chunk| chunk.offset);

        let mut len = current_len;
        for chunk in ordered {
            if chunk.offset < len {
                return Err(ReassemblyError::OverlappingChunks {
                    path: path.to_string(),
                    offset: chunk.offset,
                    have: len,
                });
            }
            if chunk.offset > len {
                return Err(ReassemblyError::MissingChunks {
                    path: path.to_string(),
                    offset: chunk.offset,
                    have: len,
                });
            }
            len += chunk.data.len() as u64;
        }

        if len > declared_size {
            return Err(ReassemblyError::DeclaredSizeExceeded {
                path: path.to_string(),
                declared: declared_size,
                got: len,
            });
        }

        Ok(len)
    }

    /// Append a chunk batch. Validation happens up front so a failing
    /// batch leaves the buffer untouched.
    pub fn append_chunks(&mut self, chunks: &[DataChunk]) -> Result<(), ReassemblyError> {
        Self::validate_chunks(&self.metadata.path, self.metadata.size, self.len(), chunks)?;
        self.apply_chunks(chunks);
        Ok(())
    }

    /// Append previously validated chunks. Caller guarantees the batch
    /// passed [`PartialFile::validate_chunks`] against the current length.
    pub(crate) fn apply_chunks(&mut self, chunks: &[DataChunk]) {
        let mut ordered: Vec<&DataChunk> = chunks.iter().collect();
        ordered.sort_by_key(|chunk| chunk.offset);
        for chunk in ordered {
            debug_assert_eq!(chunk.offset, self.len());
            self.data.extend_from_slice(&chunk.data);
        }
    }

    /// The file as an analyzer sees it: full bytes when asked for (and
    /// holding) data, metadata only otherwise.
    pub fn to_assembled(&self, with_data: bool) -> AssembledFile {
        AssembledFile {
            metadata: self.metadata.clone(),
            data: if with_data {
                Some(self.data.clone())
            } else {
                None
            },
        }
    }
}

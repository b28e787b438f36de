use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use super::error::RecordFileError;

/// A fixed-width record that can be read straight off the wire.
///
/// The acquisition hardware writes native-endian, packed records, so
/// implementations decode field-by-field with no byte-order conversion
/// and no padding.
pub trait FixedRecord: Sized {
    const SIZE: usize;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

/// Flat arrays of ids (the sensor map file) are just raw u32s.
impl FixedRecord for u32 {
    const SIZE: usize = 4;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        use byteorder::{NativeEndian, ReadBytesExt};
        reader.read_u32::<NativeEndian>()
    }
}

/// A binary file composed of nothing but fixed-width records of type T.
///
/// Opening validates that the byte length is an exact multiple of the record
/// size; a file that fails this check is rejected before any decoding starts.
/// Supports whole-file reads and block reads at a record offset.
#[derive(Debug)]
pub struct RecordFile<T: FixedRecord> {
    handle: File,
    path: PathBuf,
    element_count: usize,
    size_bytes: u64,
    _record: PhantomData<T>,
}

impl<T: FixedRecord> RecordFile<T> {
    pub fn open(path: &Path) -> Result<Self, RecordFileError> {
        if !path.exists() {
            return Err(RecordFileError::BadFilePath(path.to_path_buf()));
        }
        let handle = File::open(path)?;
        let size_bytes = handle.metadata()?.len();
        if size_bytes % (T::SIZE as u64) != 0 {
            return Err(RecordFileError::NotARecordMultiple {
                path: path.to_path_buf(),
                length: size_bytes,
                record_size: T::SIZE,
            });
        }
        Ok(Self {
            handle,
            path: path.to_path_buf(),
            element_count: (size_bytes / (T::SIZE as u64)) as usize,
            size_bytes,
            _record: PhantomData,
        })
    }

    /// Number of records in the file
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in the file sequentially
    pub fn read_all(&mut self) -> Result<Vec<T>, RecordFileError> {
        self.handle.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.handle);
        let mut records = Vec::with_capacity(self.element_count);
        for _ in 0..self.element_count {
            records.push(T::read_from(&mut reader)?);
        }
        Ok(records)
    }

    /// Read up to max_count records starting at the given record offset.
    ///
    /// Returns fewer records when the end of the file is reached, and an
    /// empty vector if the offset is at or beyond the element count. Never
    /// reads past the end of the file.
    pub fn read_block_at(
        &mut self,
        offset: usize,
        max_count: usize,
    ) -> Result<Vec<T>, RecordFileError> {
        if offset >= self.element_count {
            return Ok(Vec::new());
        }
        let count = max_count.min(self.element_count - offset);
        self.handle
            .seek(SeekFrom::Start((offset * T::SIZE) as u64))?;
        let mut buffer = vec![0u8; count * T::SIZE];
        self.handle.read_exact(&mut buffer)?;
        let mut reader = buffer.as_slice();
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(T::read_from(&mut reader)?);
        }
        Ok(records)
    }
}

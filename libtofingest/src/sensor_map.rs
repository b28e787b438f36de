use std::path::Path;

use super::error::SensorMapError;
use super::record_file::RecordFile;

/// Translation table from raw (electronics) sensor ids to logical sensor ids.
///
/// The map file is a flat array of u32 logical ids indexed by raw id modulo
/// the table length. The file's own element count doubles as a sanity bound:
/// any entry at or beyond it means the file is garbage, and the whole map is
/// discarded in favor of the identity mapping. A bad map degrades the run, it
/// never aborts it.
#[derive(Debug, Clone, Default)]
pub struct SensorIdMap {
    table: Vec<u32>,
    using_mapping: bool,
}

impl SensorIdMap {
    /// The identity mapping, used when no map file is given
    pub fn identity() -> Self {
        Self::default()
    }

    /// Load the sensor id map, falling back to identity on any failure
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::identity();
        };
        match Self::try_load(path) {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Discarding sensor id map {path:?} ({e}); using identity mapping");
                Self::identity()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, SensorMapError> {
        let table = RecordFile::<u32>::open(path)?.read_all()?;
        if table.is_empty() {
            log::warn!("Sensor id map {path:?} is empty; using identity mapping");
            return Ok(Self::identity());
        }
        let bound = table.len() as u32;
        for entry in &table {
            if *entry > bound {
                return Err(SensorMapError::EntryOutOfBounds {
                    entry: *entry,
                    bound,
                });
            }
        }
        Ok(Self {
            table,
            using_mapping: true,
        })
    }

    pub fn is_using_mapping(&self) -> bool {
        self.using_mapping
    }

    /// Translate a raw sensor id to its logical id
    pub fn map(&self, raw_id: u32) -> u32 {
        if self.using_mapping {
            self.table[raw_id as usize % self.table.len()]
        } else {
            raw_id
        }
    }
}

// State module - durable PID table and atomic JSON writes

use crate::error::{CorralError, Result};
use crate::process::ProcessRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Version of the PID table file format
const TABLE_VERSION: u32 = 1;

/// On-disk shape of the PID table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidTableFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Live or crashed records, keyed by service name
    #[serde(default)]
    pub records: BTreeMap<String, ProcessRecord>,
    /// Every port assignment ever handed out, running or not
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
}

impl PidTableFile {
    pub fn new() -> Self {
        Self {
            version: TABLE_VERSION,
            updated_at: Utc::now(),
            records: BTreeMap::new(),
            ports: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != TABLE_VERSION {
            return Err(CorralError::PersistenceError(format!(
                "Incompatible PID table version: expected {}, found {}",
                TABLE_VERSION, self.version
            )));
        }

        for (name, record) in &self.records {
            if name != &record.service {
                return Err(CorralError::PersistenceError(format!(
                    "PID table entry {} holds a record for {}",
                    name, record.service
                )));
            }
        }

        Ok(())
    }
}

impl Default for PidTableFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable PID table owned by the supervisor.
///
/// Write failures switch the table into degraded mode: the supervisor keeps
/// tracking processes in memory and every later save retries the write.
#[derive(Debug)]
pub struct PidTable {
    path: PathBuf,
    degraded: bool,
}

impl PidTable {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            degraded: false,
        }
    }

    /// Load the table; a missing file is an empty table
    pub fn load(&self) -> Result<PidTableFile> {
        if !self.path.exists() {
            return Ok(PidTableFile::new());
        }

        let table: PidTableFile = read_json(&self.path)?;
        table.validate()?;
        Ok(table)
    }

    /// Persist a snapshot of the supervisor's records and port assignments
    pub fn save(
        &mut self,
        records: BTreeMap<String, ProcessRecord>,
        ports: BTreeMap<String, u16>,
    ) -> Result<()> {
        let table = PidTableFile {
            version: TABLE_VERSION,
            updated_at: Utc::now(),
            records,
            ports,
        };

        match write_json_atomic(&self.path, &table) {
            Ok(()) => {
                if self.degraded {
                    tracing::info!(
                        "PID table {} is writable again; persistence restored",
                        self.path.display()
                    );
                    self.degraded = false;
                }
                Ok(())
            }
            Err(e) => {
                if !self.degraded {
                    tracing::error!(
                        "Failed to write PID table {}: {}; tracking in memory only",
                        self.path.display(),
                        e
                    );
                }
                self.degraded = true;
                Err(e)
            }
        }
    }

    /// Whether the last save failed
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read and deserialize a JSON file
pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        CorralError::PersistenceError(format!("Failed to open {}: {}", path.display(), e))
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        CorralError::PersistenceError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Write JSON to `path` via a temp file and rename, so readers never see a
/// partial file
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CorralError::PersistenceError(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let temp_path = path.with_extension("tmp");
    {
        let file = File::create(&temp_path).map_err(|e| {
            CorralError::PersistenceError(format!(
                "Failed to create {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| {
            CorralError::PersistenceError(format!("Failed to serialize {}: {}", path.display(), e))
        })?;
        writer.flush().map_err(|e| {
            CorralError::PersistenceError(format!("Failed to flush {}: {}", temp_path.display(), e))
        })?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        CorralError::PersistenceError(format!(
            "Failed to move {} into place: {}",
            temp_path.display(),
            e
        ))
    })
}

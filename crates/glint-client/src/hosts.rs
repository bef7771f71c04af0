//! Known-host book: configured, persisted and discovered hosts, merged by
//! address. Records are only ever added or updated.

use std::fs;
use std::path::{Path, PathBuf};

use glint_common::Result;
use tracing::{debug, warn};

use crate::types::{HostRecord, ServerInfo};

pub const HOST_STORE_FILE: &str = "hosts.json";

#[derive(Debug, Clone, Default)]
pub struct HostBook {
    records: Vec<HostRecord>,
    store: Option<PathBuf>,
}

impl HostBook {
    pub fn from_addresses(addresses: &[String]) -> Self {
        let mut book = Self::default();
        for address in addresses {
            book.insert(HostRecord::new(address.clone()));
        }
        book
    }

    /// Persist updates to `path` from now on.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(path.into());
        self
    }

    /// Merges records previously saved to the store, if any.
    pub fn load_store(&mut self) -> Result<()> {
        let Some(path) = self.store.clone() else {
            return Ok(());
        };
        if !path.is_file() {
            return Ok(());
        }
        let saved: Vec<HostRecord> = serde_json::from_str(&fs::read_to_string(&path)?)?;
        debug!("loaded {} saved hosts from {}", saved.len(), path.display());
        for record in saved {
            self.insert(record);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = self.store.as_deref() else {
            return Ok(());
        };
        write_store(path, &self.records)
    }

    /// Adds a host, or fills in what an existing record with the same
    /// address is missing. Returns true if a new record was added.
    pub fn insert(&mut self, record: HostRecord) -> bool {
        match self
            .records
            .iter_mut()
            .find(|r| r.address == record.address)
        {
            Some(existing) => {
                if existing.server.is_none() && record.server.is_some() {
                    existing.paired = record.paired;
                    existing.server = record.server;
                }
                false
            }
            None => {
                self.records.push(record);
                true
            }
        }
    }

    pub fn update_status(&mut self, index: usize, info: ServerInfo) {
        if let Some(record) = self.records.get_mut(index) {
            record.apply_status(info);
        }
        if let Err(e) = self.save() {
            warn!("failed to save host list: {}", e);
        }
    }

    pub fn records(&self) -> &[HostRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&HostRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HostRecord> {
        self.records.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn write_store(path: &Path, records: &[HostRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json)?;
    Ok(())
}

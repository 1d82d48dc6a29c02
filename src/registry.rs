//! Metadata registry of data sources.
//!
//! The registry is a single pretty-printed JSON array of [`DataSource`]
//! objects at `<cache root>/datasources.json`. Every operation loads the
//! whole file, mutates the list, and writes the whole file back:
//!
//! ```text
//! load() ──▶ Vec<DataSource> ──▶ mutate ──▶ write()
//! ```
//!
//! There is no in-process or file lock. Two writers racing on the same
//! cache root each write their own view and the last one wins. The write
//! is a plain overwrite, not a rename, so a crash mid-write can leave a
//! truncated file.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{Analysis, DataSource, MysqlExportConfig};
use crate::schema_cache::SchemaCache;

pub const REGISTRY_FILE: &str = "datasources.json";

pub struct Registry {
    root: PathBuf,
    cache: Arc<SchemaCache>,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, cache: Arc<SchemaCache>) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// All registered data sources. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<DataSource>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read registry: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse registry: {}", path.display()))
    }

    /// Write an empty registry unless one exists.
    pub fn init(&self) -> Result<()> {
        if self.path().exists() {
            return Ok(());
        }
        self.write(&[])
    }

    fn write(&self, sources: &[DataSource]) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache root: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(sources)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write registry: {}", path.display()))
    }

    pub fn get(&self, id: &str) -> Result<DataSource> {
        self.load()?
            .into_iter()
            .find(|ds| ds.id == id)
            .ok_or_else(|| anyhow::anyhow!("data source not found: {}", id))
    }

    /// Fail if `name` is empty or already used (case-insensitive) by a data
    /// source other than `except_id`.
    pub fn check_name(&self, name: &str, except_id: Option<&str>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("data source name cannot be empty");
        }
        let taken = self.load()?.iter().any(|ds| {
            Some(ds.id.as_str()) != except_id && ds.name.eq_ignore_ascii_case(name)
        });
        if taken {
            bail!("data source with name '{}' already exists", name);
        }
        Ok(())
    }

    pub fn add(&self, ds: DataSource) -> Result<()> {
        self.check_name(&ds.name, None)?;
        let mut sources = self.load()?;
        debug!(id = %ds.id, name = %ds.name, "registering data source");
        sources.push(ds);
        self.write(&sources)
    }

    /// Insert or replace by id.
    pub fn save(&self, ds: DataSource) -> Result<()> {
        let mut sources = self.load()?;
        match sources.iter_mut().find(|s| s.id == ds.id) {
            Some(slot) => *slot = ds,
            None => sources.push(ds),
        }
        self.write(&sources)
    }

    /// Remove a data source together with its local store directory.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut sources = self.load()?;
        let Some(pos) = sources.iter().position(|ds| ds.id == id) else {
            bail!("data source not found: {}", id);
        };
        let ds = sources.remove(pos);
        self.cache.invalidate(id);
        self.write(&sources)?;

        if let Some(dir) = self.store_dir(&ds) {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to remove local store");
                }
            }
        }
        Ok(())
    }

    pub fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            bail!("data source name cannot be empty");
        }
        self.check_name(new_name, Some(id))?;
        self.update(id, |ds| ds.name = new_name.to_string())
    }

    pub fn update_analysis(&self, id: &str, analysis: Analysis) -> Result<()> {
        self.update(id, |ds| ds.analysis = Some(analysis))
    }

    pub fn update_mysql_export_config(&self, id: &str, cfg: MysqlExportConfig) -> Result<()> {
        self.update(id, |ds| ds.config.mysql_export_config = Some(cfg))
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut DataSource)) -> Result<()> {
        let mut sources = self.load()?;
        let Some(ds) = sources.iter_mut().find(|ds| ds.id == id) else {
            bail!("data source not found: {}", id);
        };
        f(ds);
        self.cache.invalidate(id);
        self.write(&sources)
    }

    /// Absolute path of a data source's local store, if it has one.
    pub fn store_path(&self, ds: &DataSource) -> Option<PathBuf> {
        if ds.config.db_path.is_empty() {
            return None;
        }
        Some(self.root.join(&ds.config.db_path))
    }

    /// Directory holding the local store, only when it lies under the cache root.
    fn store_dir(&self, ds: &DataSource) -> Option<PathBuf> {
        let dir = self.store_path(ds)?.parent()?.to_path_buf();
        (dir.starts_with(&self.root) && dir != self.root).then_some(dir)
    }
}

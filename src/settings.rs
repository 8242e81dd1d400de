use anyhow::{anyhow, Context};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Key under which the accepted API key is stored.
pub const API_KEY: &str = "api_key";

/// Key-value settings store, injected where persistence is needed.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Settings persisted as a flat JSON map on disk.
///
/// Values are stored in cleartext; every `set` rewrites the whole file
/// atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileSettings {
    /// Open the store, loading existing values. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(anyhow!(e))
                    .with_context(|| format!("failed to read settings: {}", path.display()))
            }
        };
        Ok(Self { path, values })
    }

    fn persist(&self) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create settings directory: {}", dir.display()))?;

        let tmp = tmp_path(&self.path);
        let bytes = serde_json::to_vec_pretty(&self.values).context("failed to serialize settings")?;
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("failed to write temp settings: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move settings into place: {}", self.path.display()))?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.persist()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "settings.json".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}

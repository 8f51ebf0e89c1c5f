use anyhow::Context;
use snipcap_core::config::CaptureConfig;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the config. A missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<CaptureConfig> {
        let cfg = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<CaptureConfig>(&bytes)
                .with_context(|| format!("decode config JSON: {}", self.path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}; using defaults", self.path.display());
                CaptureConfig::default()
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("read config: {}", self.path.display())));
            }
        };
        cfg.validate()
            .with_context(|| format!("invalid config: {}", self.path.display()))?;
        Ok(cfg)
    }

    /// Writes the config atomically: a temp file in the same directory is
    /// persisted over the target.
    pub fn save(&self, cfg: &CaptureConfig) -> anyhow::Result<()> {
        cfg.validate().context("refusing to save invalid config")?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("create config directory: {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp config in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, cfg).context("encode config JSON")?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("flush temp config: {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }
}

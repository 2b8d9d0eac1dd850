/// Picks up edits to the config file while running.
///
/// The file is re-read only when its modification time or size changes.  A
/// file that fails to parse or validate is logged and skipped; the running
/// config stays in force until the next good edit.
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cbnp_proto::config::Config;
use tracing::{info, warn};

type Fingerprint = (Option<SystemTime>, u64);

pub struct ConfigWatcher {
    path: PathBuf,
    seen: Option<Fingerprint>,
    overrides: fn(&str) -> Option<String>,
}

impl ConfigWatcher {
    /// Watch `path`, treating its current contents as already applied.
    /// `overrides` is re-applied to every reloaded config.
    pub fn new(path: impl Into<PathBuf>, overrides: fn(&str) -> Option<String>) -> Self {
        let path = path.into();
        let seen = fingerprint(&path);
        Self {
            path,
            seen,
            overrides,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The new config if the file changed since the last call and is valid.
    pub fn check(&mut self) -> Option<Config> {
        let current = fingerprint(&self.path);
        if current == self.seen {
            return None;
        }
        self.seen = current;
        current?;

        match Config::load_from(&self.path) {
            Ok(mut config) => {
                config.apply_overrides(self.overrides);
                info!("Config reloaded from {:?}", self.path);
                Some(config)
            }
            Err(e) => {
                warn!("Ignoring invalid config {:?}: {:#}", self.path, e);
                None
            }
        }
    }
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok(), meta.len()))
}

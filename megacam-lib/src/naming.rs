use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CamError;

/// Hands out unique file names per base name, persisted as a JSON map of
/// `base -> highest suffix used`.
///
/// The first request for a base returns it unchanged, later ones append
/// `_1`, `_2`, ... The map is rewritten after every request; there is no
/// protection against a crash between the write and the caller creating the
/// file.
#[derive(Debug)]
pub struct FileNamer {
    path: PathBuf,
    counts: BTreeMap<String, u32>,
    last_base: Option<String>,
}

impl FileNamer {
    /// Loads the map at `path`, creating an empty one if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CamError> {
        let path = path.as_ref().to_path_buf();
        let counts = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            let counts = BTreeMap::new();
            fs::write(&path, serde_json::to_string(&counts)?)?;
            counts
        };
        Ok(Self {
            path,
            counts,
            last_base: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of names already handed out for `base`.
    pub fn uses(&self, base: &str) -> u32 {
        self.counts.get(base).map_or(0, |count| count + 1)
    }

    /// Next free name for `base`, or for the previous base when `None`.
    pub fn next_name(&mut self, base: Option<&str>) -> Result<String, CamError> {
        let base = match base {
            Some(base) => base.to_owned(),
            None => self.last_base.clone().ok_or_else(|| {
                CamError::InvalidArgument("a file name is required on first use".into())
            })?,
        };

        let count = match self.counts.get(&base) {
            Some(previous) => previous + 1,
            None => 0,
        };
        self.counts.insert(base.clone(), count);
        self.save()?;

        let name = if count > 0 { format!("{base}_{count}") } else { base.clone() };
        debug!(%name, "Allocated file name");
        self.last_base = Some(base);
        Ok(name)
    }

    pub fn next_jpeg_name(&mut self, base: Option<&str>) -> Result<String, CamError> {
        Ok(self.next_name(base)? + ".jpg")
    }

    fn save(&self) -> Result<(), CamError> {
        fs::write(&self.path, serde_json::to_string(&self.counts)?)?;
        Ok(())
    }
}

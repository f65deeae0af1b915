use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// Directory holding one JPEG still per event. The directory is the whole
/// namespace: names carry room, source and capture time.
#[derive(Clone, Debug)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    /// Opens the directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create screenshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Writes `bytes` under `name`. The data lands in a hidden temp file and is
    /// renamed into place once synced.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.path_of(name)?;
        let tmp = self.dir.join(format!(".{}.tmp", name));
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("create screenshot {}", tmp.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("write screenshot {}", tmp.display()))?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)
            .with_context(|| format!("move screenshot into place at {}", target.display()))?;
        Ok(target)
    }

    /// Newest `limit` screenshot names, ordered by the capture time embedded
    /// in the name. Names without one sort after all timestamped names.
    pub fn latest(&self, limit: usize) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("list screenshot directory {}", self.dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort_unstable_by(|a, b| {
            capture_key(b)
                .cmp(&capture_key(a))
                .then_with(|| b.cmp(a))
        });
        names.truncate(limit);
        Ok(names)
    }
}

/// Timestamp suffix of `{room}_{source}_{%Y-%m-%d_%H-%M-%S}.jpg`.
fn capture_key(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".jpg")?;
    let split = stem.len().checked_sub(crate::FILE_TIMESTAMP_LEN)?;
    let ts = stem.get(split..)?;
    chrono::NaiveDateTime::parse_from_str(ts, crate::FILE_TIMESTAMP_FORMAT).ok()?;
    Some(ts)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(anyhow!("invalid screenshot name '{}'", name));
    }
    Ok(())
}

//! Where Satchel keeps its settings
//!
//! Settings files live in `~/.config/satchel/`. A file named explicitly
//! (usually on the command line) wins over the one in that directory; when
//! neither is present the caller falls back to its own defaults, typically
//! overridden from the environment with [`env_path`].

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Name of the directory under the platform config root
pub const APP_DIR: &str = "satchel";

/// Create the Satchel config directory if needed and return it
pub fn init() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Path of `filename` inside the config directory, whether or not it exists
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Where a settings file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Named by the caller; must exist
    Explicit(PathBuf),
    /// Found in the config directory
    ConfigDir(PathBuf),
    /// No file, use built-in defaults
    Defaults,
}

impl Source {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Source::Explicit(path) | Source::ConfigDir(path) => Some(path),
            Source::Defaults => None,
        }
    }
}

/// Decide which settings file to read for `filename`
pub fn locate(explicit: Option<&Path>, filename: &str) -> Source {
    locate_in(config_dir().as_deref(), explicit, filename)
}

fn locate_in(dir: Option<&Path>, explicit: Option<&Path>, filename: &str) -> Source {
    if let Some(path) = explicit {
        return Source::Explicit(path.to_path_buf());
    }
    match dir.map(|d| d.join(filename)) {
        Some(path) if path.is_file() => Source::ConfigDir(path),
        _ => Source::Defaults,
    }
}

/// Parse the settings file behind `source`; `None` for [`Source::Defaults`]
pub fn load<T: DeserializeOwned>(source: &Source) -> Result<Option<T>> {
    source.path().map(load_json_file::<T>).transpose()
}

pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Save `value` as `filename` in the config directory and return its path
pub fn save_json<T: Serialize>(filename: &str, value: &T) -> Result<PathBuf> {
    let path = init()?.join(filename);
    save_json_file(&path, value)?;
    Ok(path)
}

pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Path from environment variable `name`, ignoring unset or empty values
pub fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Create the directory that will hold the data file at `path`
pub fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        chunk: usize,
    }

    #[test]
    fn test_config_path() {
        let path = config_path("store.json").unwrap();
        assert!(path.ends_with("satchel/store.json"));
    }

    #[test]
    fn test_explicit_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("store.json"), "{}").unwrap();
        let explicit = dir.path().join("other.json");

        let source = locate_in(Some(dir.path()), Some(&explicit), "store.json");
        assert_eq!(source, Source::Explicit(explicit));
    }

    #[test]
    fn test_config_dir_file_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{}").unwrap();

        assert_eq!(locate_in(Some(dir.path()), None, "store.json"), Source::ConfigDir(path));
        assert_eq!(locate_in(Some(dir.path()), None, "absent.json"), Source::Defaults);
        assert_eq!(locate_in(None, None, "store.json"), Source::Defaults);
    }

    #[test]
    fn test_load_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample {
            name: "inbox".into(),
            chunk: 8192,
        };
        save_json_file(&path, &sample).unwrap();

        let loaded: Option<Sample> = load(&Source::ConfigDir(path)).unwrap();
        assert_eq!(loaded, Some(sample));

        let defaults: Option<Sample> = load(&Source::Defaults).unwrap();
        assert!(defaults.is_none());

        let missing: Result<Option<Sample>> =
            load(&Source::Explicit(dir.path().join("absent.json")));
        assert!(missing.is_err());
    }

    #[test]
    fn test_ensure_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("a/b/attachments.sqlite");
        ensure_parent(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_parent(Path::new("attachments.sqlite")).unwrap();
    }
}

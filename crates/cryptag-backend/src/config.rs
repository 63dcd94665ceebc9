//! Backend configuration
//!
//! Each backend is described by a JSON file `<name>.json` in the backends
//! directory (`~/.cryptag/backends` unless `BACKEND_PATH` says otherwise).
//! The file holds the backend key, so it is written with mode 0600 inside
//! a 0700 directory. `default.json` is a symlink naming the default backend.

use crate::{BackendError, Result};
use cryptag_crypto::Key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Type name of the local filesystem backend
pub const TYPE_FILESYSTEM: &str = "filesystem";

/// Type name of the in-memory backend
pub const TYPE_MEMORY: &str = "memory";

/// Type name of remote webserver backends
pub const TYPE_WEBSERVER: &str = "webserver";

/// Type name of Dropbox backends
pub const TYPE_DROPBOX: &str = "dropbox";

/// Name of the default-backend symlink (without `.json`)
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Environment variable overriding the backends directory
pub const BACKEND_PATH_ENV: &str = "BACKEND_PATH";

const CONFIG_EXTENSION: &str = ".json";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Directories CrypTag keeps its private state in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    /// Private, non-shared data
    pub trusted_base: PathBuf,
    /// Where backend config files live
    pub backend_path: PathBuf,
    /// Default data directory for local backends
    pub local_data_path: PathBuf,
}

impl Paths {
    /// Home-relative paths, honoring `BACKEND_PATH`
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| BackendError::Config("could not determine home directory".into()))?;
        let mut paths = Self::with_base(home.join(".cryptag"));
        if let Some(p) = std::env::var_os(BACKEND_PATH_ENV).filter(|p| !p.is_empty()) {
            paths.backend_path = PathBuf::from(p);
        }
        Ok(paths)
    }

    /// All paths rooted at `base`
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            backend_path: base.join("backends"),
            local_data_path: base.clone(),
            trusted_base: base,
        }
    }
}

/// Configuration of one backend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Backend name; also the config file name
    #[serde(default)]
    pub name: String,

    /// One of the `TYPE_*` constants. Prefer [`Config::get_type`].
    #[serde(default, rename = "Type")]
    pub backend_type: String,

    /// Set when the backend was created rather than loaded
    #[serde(skip)]
    pub new: bool,

    /// Key encrypting every tag and row of the backend
    #[serde(default)]
    pub key: Option<Key>,

    /// Whether the backend stores data on this machine
    #[serde(default)]
    pub local: bool,

    /// Data directory of local backends
    #[serde(default)]
    pub data_path: PathBuf,

    /// Backend-specific settings
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
}

impl Config {
    /// A config for a new filesystem backend
    pub fn filesystem(name: impl Into<String>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            backend_type: TYPE_FILESYSTEM.to_string(),
            new: true,
            local: true,
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    /// A config for a new in-memory backend
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type: TYPE_MEMORY.to_string(),
            new: true,
            ..Default::default()
        }
    }

    /// Make this config valid, filling in what can safely be filled in.
    ///
    /// Strips a `.json` suffix from the name and generates a key when none
    /// is set. A local backend with no data path gets its own directory
    /// under the local data path, so backends with different keys never
    /// share a tag directory.
    pub fn canonicalize(&mut self, paths: &Paths) -> Result<()> {
        if self.name.is_empty() {
            return Err(BackendError::Config("backend name cannot be empty".into()));
        }
        if let Some(stripped) = self.name.strip_suffix(CONFIG_EXTENSION) {
            self.name = stripped.to_string();
        }
        self.check_name()?;

        if self.key.is_none() {
            info!(backend = %self.name, "generating new encryption key");
            self.key = Some(Key::generate());
        }

        if self.local && self.data_path.as_os_str().is_empty() {
            self.data_path = paths.local_data_path.join(&self.name);
        }
        let raw = self.data_path.to_string_lossy().into_owned();
        let trimmed = raw.trim_end_matches(['/', '\\']);
        if !trimmed.is_empty() && trimmed.len() != raw.len() {
            self.data_path = PathBuf::from(trimmed);
        }
        Ok(())
    }

    fn check_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BackendError::Config("backend name cannot be empty".into()));
        }
        if self.name.contains(char::is_whitespace) {
            return Err(BackendError::Config(format!(
                "backend name `{}` contains whitespace",
                self.name
            )));
        }
        if self.name.contains(['/', '\\']) {
            return Err(BackendError::Config(format!(
                "backend name `{}` contains a path separator",
                self.name
            )));
        }
        Ok(())
    }

    fn check_saveable(&self) -> Result<()> {
        self.check_name()?;
        if self.key.is_none() {
            return Err(BackendError::Config(format!(
                "backend `{}` has no key; canonicalize before saving",
                self.name
            )));
        }
        Ok(())
    }

    /// Persist to `dir`. Refuses to overwrite an existing config.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.check_saveable()?;
        create_private_dir(dir)?;

        let path = config_path_from_name(dir, &self.name);
        if path.exists() {
            warn!(path = %path.display(), "backend config already exists; not overwriting");
            return Err(BackendError::ConfigExists(self.name.clone()));
        }
        write_private(&path, &serde_json::to_vec(self)?)?;
        info!(path = %path.display(), "saved backend config");
        Ok(())
    }

    /// Overwrite the existing config in `dir`, backing up the old one first
    pub fn update(&self, dir: &Path) -> Result<()> {
        self.check_saveable()?;
        let bytes = serde_json::to_vec(self)?;
        self.backup(dir)?;

        let path = config_path_from_name(dir, &self.name);
        write_private(&path, &bytes)?;
        info!(path = %path.display(), "updated backend config");
        Ok(())
    }

    /// Copy the saved config to `<name>.json-<timestamp>` and return its path
    pub fn backup(&self, dir: &Path) -> Result<PathBuf> {
        let path = config_path_from_name(dir, &self.name);
        let bytes = fs::read(&path)?;

        let stamp = chrono::Local::now().format(BACKUP_TIMESTAMP_FORMAT);
        let mut backup = path.clone().into_os_string();
        backup.push(format!("-{}", stamp));
        let backup = PathBuf::from(backup);

        write_private(&backup, &bytes)?;
        info!(from = %path.display(), to = %backup.display(), "backed up backend config");
        Ok(backup)
    }

    /// The backend type, detecting legacy configs that predate `Type`
    pub fn get_type(&self) -> &str {
        if !self.backend_type.is_empty() {
            return &self.backend_type;
        }
        if self.local && !self.data_path.as_os_str().is_empty() {
            return TYPE_FILESYSTEM;
        }
        let has = |k: &str| self.custom.contains_key(k);
        if has("AuthToken") && has("BaseURL") {
            return TYPE_WEBSERVER;
        }
        if has("AppKey") && has("AppSecret") && has("AccessToken") && has("BasePath") {
            return TYPE_DROPBOX;
        }
        ""
    }

    /// Where the backend keeps its data, in a type-appropriate form
    pub fn get_path(&self) -> String {
        let custom = |k: &str| match self.custom.get(k) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        match self.get_type() {
            TYPE_FILESYSTEM => self.data_path.display().to_string(),
            TYPE_DROPBOX => custom("BasePath"),
            TYPE_WEBSERVER => custom("BaseURL"),
            _ => String::new(),
        }
    }
}

/// `<dir>/<name>.json`
pub fn config_path_from_name(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", name, CONFIG_EXTENSION))
}

/// The backend name a config path stands for
pub fn config_name_from_path(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.strip_suffix(CONFIG_EXTENSION).unwrap_or(&base).to_string()
}

/// Read the config named `name` from `dir`.
///
/// The `Name` stored in the file is ignored in favor of the file name.
pub fn read_config(dir: &Path, name: &str) -> Result<Config> {
    let name = name.strip_suffix(CONFIG_EXTENSION).unwrap_or(name);
    if name.is_empty() {
        return Err(BackendError::Config("backend name cannot be empty".into()));
    }
    let path = config_path_from_name(dir, name);
    debug!(path = %path.display(), "loading backend config");

    let bytes = fs::read(&path)?;
    let mut config: Config = serde_json::from_slice(&bytes)?;
    config.name = name.to_string();
    Ok(config)
}

/// Result of reading every config matching a pattern
#[derive(Debug, Default)]
pub struct ConfigScan {
    /// Configs that parsed
    pub configs: Vec<Config>,
    /// Files that could not be read, with the reason
    pub errors: Vec<(PathBuf, BackendError)>,
}

/// Read every config in `dir` whose name matches the glob `pattern`.
///
/// The `default` symlink is skipped so the backend it names is not
/// read twice.
pub fn read_configs(dir: &Path, pattern: &str) -> Result<ConfigScan> {
    let full = config_path_from_name(dir, pattern);
    let full = full
        .to_str()
        .ok_or_else(|| BackendError::Config(format!("non UTF-8 path {}", full.display())))?;

    let mut scan = ConfigScan::default();
    for entry in glob::glob(full)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                let path = e.path().to_path_buf();
                scan.errors.push((path, BackendError::Io(e.into_error())));
                continue;
            }
        };
        let name = config_name_from_path(&path);
        if name == DEFAULT_CONFIG_NAME {
            continue;
        }
        match read_config(dir, &name) {
            Ok(config) => scan.configs.push(config),
            Err(e) => scan.errors.push((path, e)),
        }
    }
    Ok(scan)
}

/// Make `name` the default backend by pointing `default.json` at its config.
///
/// Refuses to touch a `default.json` that is a regular file.
#[cfg(unix)]
pub fn set_default_backend(dir: &Path, name: &str) -> Result<()> {
    let default = config_path_from_name(dir, DEFAULT_CONFIG_NAME);
    match fs::symlink_metadata(&default) {
        Ok(meta) if !meta.file_type().is_symlink() => {
            return Err(BackendError::Config(format!(
                "{} is not a symlink; don't name a backend `{}`",
                default.display(),
                DEFAULT_CONFIG_NAME
            )));
        }
        Ok(_) => fs::remove_file(&default)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(format!("{}{}", name, CONFIG_EXTENSION), &default)?;
    info!(backend = name, "set default backend");
    Ok(())
}

#[cfg(not(unix))]
pub fn set_default_backend(_dir: &Path, _name: &str) -> Result<()> {
    Err(BackendError::NotSupported(
        "default backend symlinks require a unix platform".into(),
    ))
}

/// Whether a default backend is set
pub fn is_default_backend_set(dir: &Path) -> Result<bool> {
    Ok(default_backend_name(dir)?.is_some())
}

/// The name of the backend `default.json` points at, if set
pub fn default_backend_name(dir: &Path) -> Result<Option<String>> {
    let default = config_path_from_name(dir, DEFAULT_CONFIG_NAME);
    match fs::symlink_metadata(&default) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = fs::read_link(&default)?;
            Ok(Some(config_name_from_path(&target)))
        }
        Ok(_) => Err(BackendError::Config(format!(
            "{} is not a symlink; don't name a backend `{}`",
            default.display(),
            DEFAULT_CONFIG_NAME
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Create `dir` (and parents) readable only by the owner
fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

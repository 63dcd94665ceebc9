//! Local filesystem backend
//!
//! Layout under the data directory:
//!
//! ```text
//! <data>/tags/<random tag>                  {"plain_encrypted": "...", "nonce": [...]}
//! <data>/rows/<rand1>-<rand2>-...-<randN>   {"data": "...", "nonce": [...]}
//! ```
//!
//! Row file names are the index: a query lists `rows/` and keeps the names
//! whose tag set is a superset of the query, reading bodies only when the
//! caller wants payloads.

use crate::{
    config::{self, Config, Paths, TYPE_FILESYSTEM},
    fan_out, matching_keys,
    row::{Row, Rows, StoredRow},
    row_key::{validate_random_tag, RowKey},
    tag_pair::{StoredTagPair, TagPair, TagPairs},
    Backend, BackendError, Result, DEFAULT_FAN_OUT,
};
use async_trait::async_trait;
use cryptag_crypto::Key;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const TAGS_DIR: &str = "tags";
const ROWS_DIR: &str = "rows";

/// A backend storing one file per tag pair and one file per row
#[derive(Debug)]
pub struct FileSystem {
    name: String,
    data_path: PathBuf,
    tags_path: PathBuf,
    rows_path: PathBuf,
    key: Key,
    new: bool,
    fan_out: usize,
}

impl FileSystem {
    /// Open the backend a canonical config describes, creating its
    /// directories if needed
    pub async fn open(config: Config) -> Result<Self> {
        let backend_type = config.get_type();
        if backend_type != TYPE_FILESYSTEM {
            return Err(BackendError::WrongBackendType {
                expected: TYPE_FILESYSTEM.to_string(),
                actual: backend_type.to_string(),
            });
        }
        if config.name.is_empty() {
            return Err(BackendError::Config("backend name cannot be empty".into()));
        }
        let key = config.key.ok_or_else(|| {
            BackendError::Config(format!("backend `{}` has no key", config.name))
        })?;
        if config.data_path.as_os_str().is_empty() {
            return Err(BackendError::Config(format!(
                "backend `{}` has no data path",
                config.name
            )));
        }

        let data_path = config.data_path;
        let fs = Self {
            name: config.name,
            tags_path: data_path.join(TAGS_DIR),
            rows_path: data_path.join(ROWS_DIR),
            data_path,
            key,
            new: config.new,
            fan_out: DEFAULT_FAN_OUT,
        };
        fs.init().await?;
        Ok(fs)
    }

    /// Load the filesystem backend `name` from the backends directory, or
    /// create and save a new one if no config exists.
    ///
    /// `name` defaults to the hostname.
    pub async fn load_or_create(paths: &Paths, name: Option<&str>) -> Result<Self> {
        let name = match name {
            Some(name) => name.to_string(),
            None => whoami::fallible::hostname()
                .map_err(|e| BackendError::Config(format!("error getting hostname: {}", e)))?,
        };

        match config::read_config(&paths.backend_path, &name) {
            Ok(config) => Self::open(config).await,
            Err(e) if e.is_missing_file() => {
                let mut config = Config::filesystem(name, PathBuf::new());
                config.canonicalize(paths)?;
                let fs = Self::open(config.clone()).await?;
                config.save(&paths.backend_path)?;
                info!(backend = %fs.name, path = %fs.data_path.display(), "created filesystem backend");
                Ok(fs)
            }
            Err(e) => Err(e),
        }
    }

    /// [`FileSystem::load_or_create`], making a newly created backend the default
    pub async fn load_or_create_default(paths: &Paths, name: Option<&str>) -> Result<Self> {
        let fs = Self::load_or_create(paths, name).await?;
        if fs.new {
            config::set_default_backend(&paths.backend_path, &fs.name)?;
        }
        Ok(fs)
    }

    /// Limit concurrent file operations
    pub fn with_fan_out(mut self, limit: usize) -> Self {
        self.fan_out = limit.max(1);
        self
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Whether this backend was created rather than loaded
    pub fn is_new(&self) -> bool {
        self.new
    }

    async fn init(&self) -> Result<()> {
        for dir in [&self.data_path, &self.tags_path, &self.rows_path] {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o700);
            builder.create(dir).await?;
        }
        Ok(())
    }

    async fn read_tag_pair(&self, random: &str) -> Result<TagPair> {
        let bytes = tokio::fs::read(self.tags_path.join(random)).await?;
        let stored: StoredTagPair = serde_json::from_slice(&bytes)?;
        let mut pair = TagPair::from_stored(random, stored);
        pair.decrypt(&self.key)?;
        Ok(pair)
    }

    async fn read_row(&self, key: &RowKey) -> Result<Row> {
        let bytes = tokio::fs::read(self.rows_path.join(key.as_str())).await?;
        let stored: StoredRow = serde_json::from_slice(&bytes)?;
        let mut row = Row::from_stored(key, stored);
        row.decrypt_data(&self.key)?;
        Ok(row)
    }

    /// Remove one row file. Returns false when it was already gone.
    async fn remove_row_file(&self, key: &RowKey) -> Result<bool> {
        match tokio::fs::remove_file(self.rows_path.join(key.as_str())).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn matching_row_keys(&self, randtags: &[String]) -> Result<Vec<RowKey>> {
        if randtags.is_empty() {
            return Err(BackendError::EmptyQuery);
        }
        let names = list_file_names(&self.rows_path).await?;
        matching_keys(names.iter().map(String::as_str), randtags)
    }
}

#[async_trait]
impl Backend for FileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> &Key {
        &self.key
    }

    fn fan_out_limit(&self) -> usize {
        self.fan_out
    }

    async fn all_tag_pairs(&self) -> Result<TagPairs> {
        let names = list_file_names(&self.tags_path).await?;
        let results = fan_out(names, self.fan_out, |name| async move {
            self.read_tag_pair(&name).await
        })
        .await;
        let pairs = results.into_iter().collect::<Result<TagPairs>>()?;
        debug!(backend = %self.name, count = pairs.len(), "read all tag pairs");
        Ok(pairs)
    }

    async fn tag_pairs_from_random_tags(&self, randtags: &[String]) -> Result<TagPairs> {
        if randtags.is_empty() {
            return Err(BackendError::EmptyQuery);
        }
        let wanted: Vec<String> = {
            let mut seen = HashSet::new();
            randtags
                .iter()
                .filter(|t| validate_random_tag(t).is_ok() && seen.insert(t.as_str()))
                .cloned()
                .collect()
        };

        let results = fan_out(wanted, self.fan_out, |random: String| async move {
            self.read_tag_pair(&random).await
        })
        .await;

        let mut pairs = TagPairs::new();
        for result in results {
            match result {
                Ok(pair) => pairs.push(pair),
                Err(e) if e.is_missing_file() => {}
                Err(e) => return Err(e),
            }
        }
        if pairs.is_empty() {
            return Err(BackendError::TagPairNotFound);
        }
        Ok(pairs)
    }

    async fn save_tag_pair(&self, pair: &TagPair) -> Result<()> {
        pair.validate()?;
        validate_random_tag(&pair.random)?;
        let bytes = serde_json::to_vec(&pair.to_stored())?;
        write_private(&self.tags_path, &pair.random, &bytes).await?;
        debug!(backend = %self.name, random = %pair.random, "saved tag pair");
        Ok(())
    }

    async fn list_rows(&self, randtags: &[String]) -> Result<Rows> {
        let keys = self.matching_row_keys(randtags).await?;
        Ok(keys.iter().map(Row::listed).collect())
    }

    async fn rows_from_random_tags(&self, randtags: &[String]) -> Result<Rows> {
        let keys = self.matching_row_keys(randtags).await?;
        let results = fan_out(keys, self.fan_out, |key: RowKey| async move {
            self.read_row(&key).await
        })
        .await;
        results.into_iter().collect()
    }

    async fn save_row(&self, row: &Row) -> Result<()> {
        row.validate_for_save()?;
        let key = row.row_key()?;
        let bytes = serde_json::to_vec(&row.to_stored())?;
        write_private(&self.rows_path, key.as_str(), &bytes).await?;
        debug!(backend = %self.name, tags = row.random_tags.len(), "saved row");
        Ok(())
    }

    async fn delete_rows(&self, randtags: &[String]) -> Result<()> {
        let keys = self.matching_row_keys(randtags).await?;
        for key in &keys {
            if !self.remove_row_file(key).await? {
                debug!(backend = %self.name, "row already deleted");
            }
        }
        info!(backend = %self.name, count = keys.len(), "deleted rows");
        Ok(())
    }

    fn to_config(&self) -> Result<Config> {
        Ok(Config {
            name: self.name.clone(),
            backend_type: TYPE_FILESYSTEM.to_string(),
            new: self.new,
            key: Some(self.key.clone()),
            local: true,
            data_path: self.data_path.clone(),
            custom: Default::default(),
        })
    }
}

/// Names of the regular, non-hidden files in `dir`
async fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => names.push(name),
            _ => {}
        }
    }
    Ok(names)
}

/// Write `bytes` to `dir/name` with mode 0600, via a uniquely named hidden
/// temp file so readers never see a partial file and concurrent writers of
/// one name never share a temp file. The temp file is removed on failure.
async fn write_private(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
    let result = write_then_rename(&tmp, &dir.join(name), bytes).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %tmp.display(), error = %e, "failed to remove temp file");
            }
        }
    }
    result
}

async fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(tmp, dest).await?;
    Ok(())
}

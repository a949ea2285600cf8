//! The published [`Selector`] snapshot shared by the request handlers.
use crate::{Config, Selector};
use parking_lot::RwLock;
use primitives::{SelectionContext, SelectionResult, UpdateNumber};
use slog::{error, info, warn, Logger};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Snapshot cache: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Selector(#[from] crate::Error),
}

/// Holds the published selector.
///
/// Selections run against an [`Arc`] of the snapshot taken when they start, so
/// publishing a new one never waits for them.
pub struct SelectorStore {
    current: RwLock<Arc<Selector>>,
    cache_file: Option<PathBuf>,
    logger: Logger,
}

impl SelectorStore {
    /// Starts with the cached snapshot of `config` when there is a readable
    /// one, otherwise with an empty selector.
    pub fn open(config: &Config, logger: Logger) -> Self {
        let cached = config
            .snapshot_cache
            .as_deref()
            .and_then(|path| load_cached(path, &logger));

        let selector = match cached {
            Some(selector) => selector,
            None => Selector::from_config(config, 0),
        };

        Self {
            current: RwLock::new(Arc::new(selector.with_logger(logger.clone()))),
            cache_file: config.snapshot_cache.clone(),
            logger,
        }
    }

    pub fn current(&self) -> Arc<Selector> {
        self.current.read().clone()
    }

    pub fn update_number(&self) -> UpdateNumber {
        self.current.read().update_number
    }

    /// Whether the `latest` known configuration is newer than the published one.
    pub fn is_outdated(&self, latest: UpdateNumber) -> bool {
        self.update_number() < latest
    }

    /// Persists the finalized `selector` to the cache file and makes it the
    /// current snapshot.
    pub fn publish(&self, selector: Selector) -> Result<(), Error> {
        if let Some(cache_file) = &self.cache_file {
            save_snapshot(cache_file, &selector)?;
        }

        let update_number = selector.update_number;
        let previous = {
            let mut current = self.current.write();
            let previous = current.update_number;
            *current = Arc::new(selector.with_logger(self.logger.clone()));
            previous
        };

        if update_number <= previous {
            warn!(self.logger, "Published selector is not newer than the previous one"; "update_number" => update_number, "previous" => previous);
        }

        info!(self.logger, "Selector published"; "update_number" => update_number, "previous" => previous);

        Ok(())
    }

    pub fn select(&self, context: &mut SelectionContext) -> SelectionResult {
        self.current().select(context)
    }
}

fn load_cached(path: &Path, logger: &Logger) -> Option<Selector> {
    match load_snapshot(path) {
        Ok(Some(selector)) => {
            info!(logger, "Selector loaded from cache"; "path" => path.display().to_string(), "update_number" => selector.update_number);

            Some(selector)
        }
        Ok(None) => None,
        Err(Error::Selector(err)) => {
            error!(logger, "Corrupt selector cache, removing it"; "path" => path.display().to_string(), "error" => %err);

            if let Err(err) = fs::remove_file(path) {
                error!(logger, "Removing selector cache failed"; "path" => path.display().to_string(), "error" => %err);
            }

            None
        }
        Err(err) => {
            error!(logger, "Reading selector cache failed"; "path" => path.display().to_string(), "error" => %err);

            None
        }
    }
}

/// Writes the binary form of `selector` to `path`, replacing the file only
/// once the whole snapshot is written.
pub fn save_snapshot(path: &Path, selector: &Selector) -> Result<(), Error> {
    let bytes = selector.to_bytes()?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let partial = path.with_extension("partial");
    fs::write(&partial, bytes)?;
    fs::rename(&partial, path)?;

    Ok(())
}

/// Reads the snapshot at `path`, `None` when there is no such file.
pub fn load_snapshot(path: &Path) -> Result<Option<Selector>, Error> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    Ok(Some(Selector::from_bytes(&bytes)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DEVELOPMENT_CONFIG;
    use pretty_assertions::assert_eq;
    use primitives::{util::logging::discard_logger, Creative, PageKind};

    fn cache_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ad-selector-store-{}", std::process::id()))
            .join(name)
    }

    fn config(cache: &Path) -> Config {
        Config {
            snapshot_cache: Some(cache.to_path_buf()),
            ..DEVELOPMENT_CONFIG.clone()
        }
    }

    fn selector(update_number: UpdateNumber) -> Selector {
        let mut selector = Selector::from_config(&DEVELOPMENT_CONFIG, update_number);
        let page = PageKind::DeskPaper.id();
        selector.page_mut(page).max_ad_num = 1;
        selector
            .add_creative(page, 1, Creative::new(1, 1, 1, 1.0))
            .expect("Should add creative");
        selector.finalize();
        selector
    }

    #[test]
    fn starts_empty_without_cache() {
        let store = SelectorStore::open(&DEVELOPMENT_CONFIG, discard_logger());

        assert_eq!(0, store.update_number());
        assert!(store.current().pages.is_empty());
        assert!(store.is_outdated(1));
        assert!(!store.is_outdated(0));
    }

    #[test]
    fn published_selector_is_reloaded() {
        let cache = cache_path("reload.bin");
        let _ = fs::remove_file(&cache);

        let store = SelectorStore::open(&config(&cache), discard_logger());
        let before = store.current();
        store.publish(selector(5)).expect("Should publish");

        assert_eq!(5, store.update_number());
        assert_eq!(0, before.update_number, "old snapshot stays intact");
        assert!(!store.is_outdated(5));
        assert!(store.is_outdated(6));

        let reopened = SelectorStore::open(&config(&cache), discard_logger());
        assert_eq!(5, reopened.update_number());
        assert_eq!(store.current().pages, reopened.current().pages);

        fs::remove_file(&cache).expect("Should remove cache");
    }

    #[test]
    fn corrupt_cache_is_removed() {
        let cache = cache_path("corrupt.bin");
        fs::create_dir_all(cache.parent().expect("Should have parent")).expect("Should create dir");
        fs::write(&cache, [0_u8, 0, 0, 1, 0, 0]).expect("Should write cache");

        let store = SelectorStore::open(&config(&cache), discard_logger());

        assert_eq!(0, store.update_number());
        assert!(!cache.exists());
    }

    #[test]
    fn missing_snapshot_is_none() {
        let loaded = load_snapshot(&cache_path("missing.bin")).expect("Should read");

        assert!(loaded.is_none());
    }
}

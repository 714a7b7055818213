//! Configuration for models, instance sampling and blob stores.
//!
//! All structures here are plain data with sensible defaults; a model takes
//! its [`ModelConfig`] at construction, the SQLite store takes a
//! [`StoreConfig`] when opened.

use std::time::Duration;

/// Bounds for [`NetworkModel::instance_sample`](crate::NetworkModel::instance_sample).
///
/// # Default Configuration
///
/// ```rust
/// use netmodel::SampleConfig;
/// let config = SampleConfig::default();
/// assert_eq!(config.seed_limit, 100);
/// assert_eq!(config.cluster_limit, 5);
/// assert_eq!(config.class_count, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleConfig {
    /// Total number of instances after which sampling stops.
    ///
    /// **Default:** `100`
    pub seed_limit: usize,

    /// Maximum number of neighbors pulled in per expanded instance.
    ///
    /// **Default:** `5`
    pub cluster_limit: usize,

    /// Minimum number of instances wanted from every class, as long as the
    /// class has that many rows.
    ///
    /// **Default:** `5`
    pub class_count: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            seed_limit: 100,
            cluster_limit: 5,
            class_count: 5,
        }
    }
}

impl SampleConfig {
    /// A tiny sample, handy for previews of very wide models.
    pub fn small() -> Self {
        Self {
            seed_limit: 20,
            cluster_limit: 2,
            class_count: 2,
        }
    }
}

/// Model-wide options.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use netmodel::{ModelConfig, NetworkModel};
///
/// let mut config = ModelConfig::default();
/// config.save_debounce = Duration::from_millis(250);
/// let model = NetworkModel::with_config("demo", config);
/// assert!(!model.is_unsaved());
/// ```
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Quiet period after the last structural change before
    /// [`poll_save`](crate::NetworkModel::poll_save) persists the model.
    ///
    /// **Default:** zero, i.e. the next poll after a change saves.
    pub save_debounce: Duration,

    /// Delimiter used by `expand` when the caller does not pass one.
    ///
    /// **Default:** `","`
    pub default_delimiter: String,

    /// Sampling bounds used by the convenience sampling entry points.
    pub sample: SampleConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            save_debounce: Duration::ZERO,
            default_delimiter: String::from(","),
            sample: SampleConfig::default(),
        }
    }
}

/// Options for [`SqliteBlobStore`](crate::SqliteBlobStore).
///
/// ```rust
/// use netmodel::StoreConfig;
/// let config = StoreConfig::default();
/// assert!(config.create_if_missing);
/// assert!(config.cache_size.is_none());
/// ```
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Create the database file when it does not exist yet.
    ///
    /// **Default:** `true`
    pub create_if_missing: bool,

    /// Prepared statement cache capacity, `None` keeps the rusqlite default.
    ///
    /// **Default:** `None`
    pub cache_size: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            cache_size: None,
        }
    }
}

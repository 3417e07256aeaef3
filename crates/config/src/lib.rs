//! Configuration for folio.
//!
//! Values are layered with [`figment`], later layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default()`]).
//! 2. A TOML file: the one passed explicitly, else `./folio.toml`, else
//!    `folio.toml` in the platform configuration directory.
//! 3. Environment variables prefixed with `FOLIO_`, with `__` separating
//!    nested keys (`FOLIO_THUMBNAIL__WIDTH=320`).
//! 4. Overrides set on the [`Loader`] (command-line flags).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
pub use folio_transform::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working and platform configuration directories.
pub const CONFIG_FILE_NAME: &str = "folio.toml";
/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "FOLIO_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the photo tree. Required.
    pub static_files: PathBuf,
    /// URL prefix the gallery is mounted under.
    pub url_root: String,
    pub title: String,
    pub thumbnail: ThumbnailConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub transform: TransformConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            static_files: PathBuf::new(),
            url_root: "/".to_string(),
            title: "Photos".to_string(),
            thumbnail: ThumbnailConfig::default(),
            resolver: ResolverConfig::default(),
            cache: CacheConfig::default(),
            transform: TransformConfig::default(),
        }
    }
}

/// Default thumbnail box and encoder quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}
impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            quality: folio_transform::DEFAULT_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How many levels below the requested album the resolver may descend.
    pub max_depth: usize,
}
impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_depth: 16 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where derived artifacts are written.
    pub scratch_dir: PathBuf,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("folio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub engine: Engine,
    pub timeout_secs: u64,
}
impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            timeout_secs: folio_transform::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load from the default locations. See [`Loader`] for more control.
    pub fn load() -> Result<Self> {
        Loader::new().load()
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// [`Invalid`](ErrorKind::Invalid) naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.static_files.as_os_str().is_empty(), "static_files"),
            (self.scratch_dir_is_empty(), "cache.scratch_dir"),
            (!self.url_root.starts_with('/'), "url_root"),
            (self.thumbnail.width == 0, "thumbnail.width"),
            (self.thumbnail.height == 0, "thumbnail.height"),
            (!(1..=100).contains(&self.thumbnail.quality), "thumbnail.quality"),
            (self.resolver.max_depth == 0, "resolver.max_depth"),
            (self.transform.timeout_secs == 0, "transform.timeout_secs"),
        ];
        for (invalid, field) in checks {
            if invalid {
                exn::bail!(ErrorKind::Invalid(field));
            }
        }
        Ok(())
    }

    fn scratch_dir_is_empty(&self) -> bool {
        self.cache.scratch_dir.as_os_str().is_empty()
    }

    /// Make relative paths absolute against `base`.
    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.static_files, &mut self.cache.scratch_dir] {
            if !path.as_os_str().is_empty() && path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Builds a [`Config`] from its layers.
#[derive(Debug, Default)]
pub struct Loader {
    file: Option<PathBuf>,
    static_files: Option<PathBuf>,
    env: bool,
}
impl Loader {
    pub fn new() -> Self {
        Self {
            env: true,
            ..Self::default()
        }
    }

    /// Read this TOML file instead of looking in the default locations. Unlike
    /// the default locations, it must exist.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Override `static_files`, whatever the other layers say.
    pub fn static_files(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_files = Some(path.into());
        self
    }

    /// Skip the environment layer.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// The TOML file that will be read, if any.
    pub fn config_file(&self) -> Option<PathBuf> {
        if let Some(file) = &self.file {
            return Some(file.clone());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "folio")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = self.config_file() {
            if self.file.is_some() && !file.is_file() {
                exn::bail!(ErrorKind::Load);
            }
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = figment.merge(Toml::file(file));
        }
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        if let Some(static_files) = &self.static_files {
            figment = figment.merge(Serialized::default("static_files", static_files));
        }
        Ok(figment)
    }

    /// Extract, resolve relative paths against the working directory, and
    /// validate.
    pub fn load(&self) -> Result<Config> {
        let mut config: Config = self.figment()?.extract().or_raise(|| ErrorKind::Load)?;
        let cwd = std::env::current_dir().or_raise(|| ErrorKind::Load)?;
        config.resolve_paths(&cwd);
        config.validate()?;
        tracing::debug!(
            static_files = %config.static_files.display(),
            scratch_dir = %config.cache.scratch_dir.display(),
            engine = %config.transform.engine,
            "Configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn valid() -> Config {
        Config {
            static_files: PathBuf::from("/srv/photos"),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.url_root, "/");
        assert_eq!(config.title, "Photos");
        assert_eq!((config.thumbnail.width, config.thumbnail.height), (200, 200));
        assert_eq!(config.thumbnail.quality, 40);
        assert_eq!(config.resolver.max_depth, 16);
        assert_eq!(config.cache.scratch_dir, std::env::temp_dir().join("folio"));
        assert_eq!(config.transform.engine, Engine::Auto);
        assert_eq!(config.transform.timeout(), Duration::from_secs(30));
        // Everything has a default except the photo root.
        assert!(matches!(&*config.validate().unwrap_err(), ErrorKind::Invalid("static_files")));
        assert!(valid().validate().is_ok());
    }

    #[rstest]
    #[case::width(|c: &mut Config| c.thumbnail.width = 0, "thumbnail.width")]
    #[case::height(|c: &mut Config| c.thumbnail.height = 0, "thumbnail.height")]
    #[case::quality_low(|c: &mut Config| c.thumbnail.quality = 0, "thumbnail.quality")]
    #[case::quality_high(|c: &mut Config| c.thumbnail.quality = 101, "thumbnail.quality")]
    #[case::depth(|c: &mut Config| c.resolver.max_depth = 0, "resolver.max_depth")]
    #[case::timeout(|c: &mut Config| c.transform.timeout_secs = 0, "transform.timeout_secs")]
    #[case::url_root(|c: &mut Config| c.url_root = "gallery".into(), "url_root")]
    #[case::scratch(|c: &mut Config| c.cache.scratch_dir = PathBuf::new(), "cache.scratch_dir")]
    fn test_validate_rejects(#[case] mutate: fn(&mut Config), #[case] field: &str) {
        let mut config = valid();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(f) if *f == field));
    }

    #[test]
    fn test_layers_override_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"
                    static_files = "/srv/photos"
                    title = "Holidays"

                    [thumbnail]
                    width = 320
                    quality = 70

                    [transform]
                    engine = "native"
                "#,
            )?;
            jail.set_env("FOLIO_THUMBNAIL__QUALITY", "90");
            jail.set_env("FOLIO_RESOLVER__MAX_DEPTH", "3");
            let config = Loader::new().load().unwrap();
            assert_eq!(config.static_files, PathBuf::from("/srv/photos"));
            assert_eq!(config.title, "Holidays");
            assert_eq!(config.thumbnail.width, 320);
            // Untouched nested values keep their defaults.
            assert_eq!(config.thumbnail.height, 200);
            assert_eq!(config.thumbnail.quality, 90);
            assert_eq!(config.resolver.max_depth, 3);
            assert_eq!(config.transform.engine, Engine::Native);

            let overridden = Loader::new().static_files("/mnt/other").load().unwrap();
            assert_eq!(overridden.static_files, PathBuf::from("/mnt/other"));
            Ok(())
        });
    }

    #[test]
    fn test_relative_paths_resolved_against_working_directory() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "static_files = \"photos\"\n[cache]\nscratch_dir = \"scratch\"")?;
            let config = Loader::new().without_env().file("custom.toml").load().unwrap();
            let cwd = std::env::current_dir().unwrap();
            assert_eq!(config.static_files, cwd.join("photos"));
            assert_eq!(config.cache.scratch_dir, cwd.join("scratch"));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        let err = Loader::new().without_env().file(missing).load().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[test]
    fn test_bad_values_fail_to_load() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "static_files = \"/srv\"\n[transform]\nengine = \"gimp\"")?;
            let err = Loader::new().without_env().load().unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            jail.create_file(CONFIG_FILE_NAME, "static_files = \"/srv\"\n[thumbnail]\nquality = 0")?;
            let err = Loader::new().without_env().load().unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid("thumbnail.quality")));
            Ok(())
        });
    }
}

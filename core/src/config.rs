use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use rust_embed::RustEmbed;
use serde::Deserialize;

use crate::error::*;
use crate::testing::{Pipeline, PipelineCommands};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub judge: JudgeConfig,
    pub workdir: WorkdirConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JudgeConfig {
    pub testcase_dir: PathBuf,
    pub compile_timeout_ms: u64,
    pub exec_timeout_ms: u64,
    /// 0 means the number of available CPUs.
    #[serde(default)]
    pub jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkdirConfig {
    pub scratch_dir: PathBuf,
    pub failure_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub prebuild: Option<Vec<String>>,
    pub compile: Vec<String>,
    pub link: Vec<String>,
    pub runtime_object: PathBuf,
    pub diff: Vec<String>,
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

impl Config {
    pub const FILENAME: &str = "syjudge.toml";

    pub fn example_toml() -> String {
        Asset::get(Self::FILENAME)
            .map(|file| String::from_utf8_lossy(file.data.as_ref()).into_owned())
            .unwrap_or_default()
    }

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// Find config file ancestor dirs, including current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let cur_dir = cur_dir.as_ref();
        cur_dir
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
            .with_context(|| format!("Cannot find '{}'", Self::FILENAME))
    }

    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> Result<Self> {
        let config_filepath = Config::find_file_in_ancestors(cur_dir)?;
        Self::from_toml_file(config_filepath)
    }

    /// Like [`Config::from_file_finding_in_ancestors`], but falls back to the example config
    /// rooted at `cur_dir` when no config file exists.
    pub fn load_or_example(cur_dir: impl AsRef<Path>) -> Result<Self> {
        let cur_dir = cur_dir.as_ref();
        match Config::find_file_in_ancestors(cur_dir) {
            Ok(path) => {
                log::info!("Using config {:?}", path);
                Self::from_toml_file(path)
            }
            Err(_) => {
                log::info!(
                    "'{}' not found, using the default config in {:?}",
                    Self::FILENAME,
                    cur_dir
                );
                let mut cfg = Self::from_toml(&Self::example_toml())
                    .context("Invalid embedded example config")?;
                cfg.source_config_file = Some(cur_dir.join(Self::FILENAME));
                Ok(cfg)
            }
        }
    }

    /// Directory that relative paths are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.source_config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        fsutil::resolve_path(self.base_dir(), path)
    }

    pub fn testcase_dir(&self) -> PathBuf {
        self.resolve(&self.judge.testcase_dir)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.resolve(&self.workdir.scratch_dir)
    }

    pub fn failure_dir(&self) -> PathBuf {
        self.resolve(&self.workdir.failure_dir)
    }

    /// A pipeline running every command in [`Config::base_dir`].
    pub fn pipeline(&self, scratch_dir: &Path, failure_dir: &Path) -> Pipeline {
        let commands = PipelineCommands {
            compile: self.command.compile.clone(),
            link: self.command.link.clone(),
            diff: self.command.diff.clone(),
            runtime_object: self.resolve(&self.command.runtime_object),
        };
        Pipeline::new(commands, self.base_dir(), scratch_dir, failure_dir)
            .compile_time_limit(self.judge.compile_time_limit())
            .exec_time_limit(self.judge.exec_time_limit())
    }
}

impl JudgeConfig {
    pub fn compile_time_limit(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn exec_time_limit(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

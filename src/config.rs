// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use log::error;

use crate::table_manager::DEFAULT_PROFILE;
use crate::table_manager::SCREEN_OFF_PROFILE;
use crate::threshold::PriorityCutoff;
use crate::threshold::TableOptions;
use crate::threshold::ThresholdTable;

pub const LOWMEMD_CONFIG_PATH: &str = "run/lowmemd/";

// oom_adj 0, 1, 2, 4, 6, 15 on the oom_score_adj scale (adj * 1000 / 17).
const DEFAULT_ADJ: [PriorityCutoff; 6] = [0, 58, 117, 235, 352, 882];
const DEFAULT_MINFREE: [u64; 6] = [1536, 2048, 3072, 4096, 5120, 6144];
const DEFAULT_MINFILE: [u64; 6] = [1536, 2048, 4096, 8192, 12288, 16384];
const DEFAULT_FUDGESWAP_PAGES: u64 = 512;
const DEFAULT_DEATHPENDING_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

pub trait ConfigProvider {
    fn read_config(&self) -> Result<Config>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub adj: Vec<PriorityCutoff>,
    pub minfree: Vec<u64>,
    pub minfile: Vec<u64>,
    /// `None` reuses `minfree` for the screen off profile.
    pub minfree_screen_off: Option<Vec<u64>>,
    pub check_filepages: bool,
    pub fudgeswap_pages: u64,
    pub deathpending_timeout: Duration,
    pub debug_level: u32,
    /// `None` disables the timer trigger.
    pub poll_interval: Option<Duration>,
    pub profile: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adj: DEFAULT_ADJ.to_vec(),
            minfree: DEFAULT_MINFREE.to_vec(),
            minfile: DEFAULT_MINFILE.to_vec(),
            minfree_screen_off: None,
            check_filepages: false,
            fudgeswap_pages: DEFAULT_FUDGESWAP_PAGES,
            deathpending_timeout: Duration::from_millis(DEFAULT_DEATHPENDING_TIMEOUT_MS),
            debug_level: 0,
            poll_interval: Some(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl Config {
    pub fn table_options(&self) -> TableOptions {
        TableOptions {
            check_file_pages: self.check_filepages,
            swap_fudge_pages: self.fudgeswap_pages,
        }
    }

    /// The tables of the `default` and `screen_off` profiles.
    pub fn profiles(&self) -> HashMap<String, ThresholdTable> {
        let options = self.table_options();
        let screen_off = self.minfree_screen_off.as_ref().unwrap_or(&self.minfree);
        HashMap::from([
            (
                DEFAULT_PROFILE.to_string(),
                ThresholdTable::from_columns(&self.adj, &self.minfree, &self.minfile, options),
            ),
            (
                SCREEN_OFF_PROFILE.to_string(),
                ThresholdTable::from_columns(&self.adj, screen_off, &self.minfile, options),
            ),
        ])
    }
}

/// Parses a comma or whitespace separated column. The column ends at the first
/// element that does not parse.
fn parse_column<T: FromStr>(text: &str) -> Vec<T> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map_while(|item| item.parse().ok())
        .collect()
}

// Returns Ok(None) when the file does not exist.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn read_column<T: FromStr>(path: &Path) -> Result<Option<Vec<T>>> {
    Ok(read_optional(path)?.map(|content| parse_column(&content)))
}

fn parse_scalar<T: FromStr>(path: &Path) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    read_optional(path)?
        .map(|content| {
            content
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value in {}", path.display()))
        })
        .transpose()
}

// Scalars fall back to `default` on any error.
fn read_scalar<T: FromStr>(path: &Path, default: T) -> T
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match parse_scalar(path) {
        Ok(value) => value.unwrap_or(default),
        Err(e) => {
            error!("{:#}", e);
            default
        }
    }
}

/* Expects to find a directory tree as follows, every file is optional:
 * * {root}/run/lowmemd/
 *   * adj
 *   * minfree
 *   * minfile
 *   * minfree_screen_off
 *   * check_filepages
 *   * fudgeswap
 *   * deathpending_timeout_ms
 *   * debug_level
 *   * poll_interval_ms
 *   * profile
 */
#[derive(Debug)]
pub struct DirectoryConfigProvider {
    pub root: PathBuf,
}

impl ConfigProvider for DirectoryConfigProvider {
    fn read_config(&self) -> Result<Config> {
        let path = self.root.join(LOWMEMD_CONFIG_PATH);
        let defaults = Config::default();

        let poll_interval_ms = read_scalar(
            &path.join("poll_interval_ms"),
            DEFAULT_POLL_INTERVAL_MS,
        );
        let profile = match read_optional(&path.join("profile")) {
            Ok(Some(profile)) if !profile.trim().is_empty() => profile.trim().to_string(),
            Ok(_) => defaults.profile,
            Err(e) => {
                error!("{:#}", e);
                defaults.profile
            }
        };

        Ok(Config {
            adj: read_column(&path.join("adj"))?.unwrap_or(defaults.adj),
            minfree: read_column(&path.join("minfree"))?.unwrap_or(defaults.minfree),
            minfile: read_column(&path.join("minfile"))?.unwrap_or(defaults.minfile),
            minfree_screen_off: read_column(&path.join("minfree_screen_off"))?,
            check_filepages: read_scalar::<u32>(&path.join("check_filepages"), 0) != 0,
            fudgeswap_pages: read_scalar(&path.join("fudgeswap"), defaults.fudgeswap_pages),
            deathpending_timeout: Duration::from_millis(read_scalar(
                &path.join("deathpending_timeout_ms"),
                DEFAULT_DEATHPENDING_TIMEOUT_MS,
            )),
            debug_level: read_scalar(&path.join("debug_level"), defaults.debug_level),
            poll_interval: (poll_interval_ms > 0).then(|| Duration::from_millis(poll_interval_ms)),
            profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::memory::MemorySnapshot;
    use crate::threshold::evaluate_pressure;

    fn write_config(root: &Path, name: &str, content: &str) {
        let dir = root.join(LOWMEMD_CONFIG_PATH);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    fn provider(root: &TempDir) -> DirectoryConfigProvider {
        DirectoryConfigProvider {
            root: root.path().to_path_buf(),
        }
    }

    #[test]
    fn test_parse_column() {
        assert_eq!(parse_column::<u64>("1536,2048, 4096\n"), vec![1536, 2048, 4096]);
        assert_eq!(parse_column::<i32>("0 -17 15"), vec![0, -17, 15]);
        assert_eq!(parse_column::<u64>("1,2,x,4"), vec![1, 2]);
        assert!(parse_column::<u64>("").is_empty());
    }

    #[test]
    fn test_missing_directory_uses_defaults() {
        let root = TempDir::new().unwrap();
        assert_eq!(provider(&root).read_config().unwrap(), Config::default());
    }

    #[test]
    fn test_read_config() {
        let root = TempDir::new().unwrap();
        write_config(root.path(), "adj", "0,8\n");
        write_config(root.path(), "minfree", "768,4096\n");
        write_config(root.path(), "minfile", "1536,8192\n");
        write_config(root.path(), "minfree_screen_off", "1024,8192\n");
        write_config(root.path(), "check_filepages", "1\n");
        write_config(root.path(), "fudgeswap", "0\n");
        write_config(root.path(), "deathpending_timeout_ms", "250\n");
        write_config(root.path(), "debug_level", "3\n");
        write_config(root.path(), "poll_interval_ms", "0\n");
        write_config(root.path(), "profile", "screen_off\n");

        let config = provider(&root).read_config().unwrap();
        assert_eq!(
            config,
            Config {
                adj: vec![0, 8],
                minfree: vec![768, 4096],
                minfile: vec![1536, 8192],
                minfree_screen_off: Some(vec![1024, 8192]),
                check_filepages: true,
                fudgeswap_pages: 0,
                deathpending_timeout: Duration::from_millis(250),
                debug_level: 3,
                poll_interval: None,
                profile: SCREEN_OFF_PROFILE.to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_scalars_fall_back_to_defaults() {
        let root = TempDir::new().unwrap();
        write_config(root.path(), "fudgeswap", "lots\n");
        write_config(root.path(), "debug_level", "-1\n");
        write_config(root.path(), "profile", "\n");
        let config = provider(&root).read_config().unwrap();
        assert_eq!(config.fudgeswap_pages, DEFAULT_FUDGESWAP_PAGES);
        assert_eq!(config.debug_level, 0);
        assert_eq!(config.profile, DEFAULT_PROFILE);
    }

    #[test]
    fn test_unreadable_column_is_an_error() {
        let root = TempDir::new().unwrap();
        // A directory where a file is expected cannot be read.
        fs::create_dir_all(root.path().join(LOWMEMD_CONFIG_PATH).join("minfree")).unwrap();
        assert!(provider(&root).read_config().is_err());
    }

    #[test]
    fn test_profiles() {
        let config = Config {
            adj: vec![0, 8],
            minfree: vec![768, 4096],
            minfile: vec![],
            minfree_screen_off: Some(vec![2048, 8192]),
            ..Config::default()
        };
        let profiles = config.profiles();
        let snapshot = MemorySnapshot {
            free_pages: 5000,
            ..MemorySnapshot::default()
        };
        assert_eq!(evaluate_pressure(&snapshot, &profiles[DEFAULT_PROFILE]), None);
        assert_eq!(
            evaluate_pressure(&snapshot, &profiles[SCREEN_OFF_PROFILE]),
            Some(8)
        );
    }

    #[test]
    fn test_default_tables() {
        let profiles = Config::default().profiles();
        let table = &profiles[DEFAULT_PROFILE];
        assert_eq!(table.tiers().len(), 6);
        assert_eq!(table.tiers()[5].priority_cutoff, 882);
        assert_eq!(table.tiers()[5].min_file_pages, Some(16384));
        assert_eq!(profiles[SCREEN_OFF_PROFILE], *table);
    }
}

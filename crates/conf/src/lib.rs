//! `russ-conf`: an INI-like `(section, option) -> String` map with a CLI
//! overlay grammar, grounded on `pyruss/conf.py`'s `Conf(ConfigParser)`.
//!
//! This crate is deliberately the only thing `russ::Server` is configured
//! through at arm's length: the core library never depends on it, it
//! just consumes the flat map this type builds (spec.md §1's framing of
//! the configuration parser as an external collaborator).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}:{line}: malformed line (expected `option = value` or `[section]`)")]
    MalformedLine { path: PathBuf, line: usize },

    #[error("{0}: missing argument")]
    MissingArgument(String),

    #[error("malformed -c overlay {0:?}: expected section:option=value")]
    MalformedOverlay(String),

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Default, Clone)]
pub struct Conf {
    values: BTreeMap<(String, String), String>,
}

impl Conf {
    pub fn new() -> Self {
        Conf::default()
    }

    /// Parse one INI-like file into this config, merging over whatever
    /// is already present (later files/overlays win).
    pub fn read_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut section = String::new();
        for (i, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    path: path.to_path_buf(),
                    line: i + 1,
                });
            };
            self.values
                .insert((section.clone(), key.trim().to_string()), value.trim().to_string());
        }
        Ok(())
    }

    pub fn set(&mut self, section: &str, option: &str, value: &str) {
        self.values
            .insert((section.to_string(), option.to_string()), value.to_string());
    }

    /// Distinct section names seen so far, in sorted order. Lets callers
    /// that treat each section as a record (e.g. `rurun`'s job list)
    /// enumerate them without knowing the option names in advance.
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(|(s, _)| s.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn get<'a>(&'a self, section: &str, option: &str, default: &'a str) -> &'a str {
        self.values
            .get(&(section.to_string(), option.to_string()))
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, section: &str, option: &str, default: bool) -> bool {
        match self.values.get(&(section.to_string(), option.to_string())) {
            Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }

    pub fn get_int(&self, section: &str, option: &str, default: i64) -> i64 {
        self.values
            .get(&(section.to_string(), option.to_string()))
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_float(&self, section: &str, option: &str, default: f64) -> f64 {
        self.values
            .get(&(section.to_string(), option.to_string()))
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Consume the `-c section:option=value` / `-f path` / `--` overlay
    /// grammar from the front of `args`, applying each in order, and
    /// return the untouched remainder. Mirrors `pyruss.conf.Conf`'s
    /// constructor loop.
    pub fn apply_overlay(&mut self, args: &[String]) -> Result<Vec<String>> {
        let mut rest = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-c" => {
                    i += 1;
                    let spec = args
                        .get(i)
                        .ok_or_else(|| ConfigError::MissingArgument("-c".into()))?;
                    self.apply_overlay_spec(spec)?;
                }
                "-f" => {
                    i += 1;
                    let path = args
                        .get(i)
                        .ok_or_else(|| ConfigError::MissingArgument("-f".into()))?;
                    self.read_file(Path::new(path))?;
                }
                "--" => {
                    i += 1;
                    rest.extend(args[i..].iter().cloned());
                    break;
                }
                other => rest.push(other.to_string()),
            }
            i += 1;
        }
        Ok(rest)
    }

    fn apply_overlay_spec(&mut self, spec: &str) -> Result<()> {
        let (section, rest) = spec
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedOverlay(spec.to_string()))?;
        let (option, value) = rest
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOverlay(spec.to_string()))?;
        self.set(section, option, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_values() {
        let mut conf = Conf::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("russ.conf");
        std::fs::write(
            &path,
            "[main]\nsd = 3\nawaittimeout=2000\n# a comment\n[server]\nname = demo\n",
        )
        .unwrap();
        conf.read_file(&path).unwrap();
        assert_eq!(conf.get("main", "sd", "0"), "3");
        assert_eq!(conf.get_int("main", "awaittimeout", -1), 2000);
        assert_eq!(conf.sections(), vec!["main", "server"]);
        assert_eq!(conf.get("server", "name", ""), "demo");
    }

    #[test]
    fn overlay_beats_file_and_returns_remainder() {
        let mut conf = Conf::new();
        conf.set("main", "sd", "3");
        let args: Vec<String> = vec!["-c", "main:sd=7", "--", "positional"]
            .into_iter()
            .map(String::from)
            .collect();
        let rest = conf.apply_overlay(&args).unwrap();
        assert_eq!(conf.get("main", "sd", "0"), "7");
        assert_eq!(rest, vec!["positional".to_string()]);
    }

    #[test]
    fn malformed_overlay_is_rejected() {
        let mut conf = Conf::new();
        let args: Vec<String> = vec!["-c", "not-a-spec"].into_iter().map(String::from).collect();
        assert!(conf.apply_overlay(&args).is_err());
    }
}

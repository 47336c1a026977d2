// # Engine Configuration
//
// Parses the host-supplied configuration string into a typed options struct.
// The accepted format is `key=value` pairs separated by `;`, with
// `config_file=<path>` pulling further `key=value` lines from a file.
// Size values accept `k`/`m`/`g` suffixes.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Maximum `config_file` include depth before the parser gives up.
const MAX_INCLUDE_DEPTH: usize = 4;

/// Runtime options for the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Attach an 8-byte compare-and-swap version to each item.
    pub use_cas: bool,

    /// Debug trace level; higher levels emit per-operation traces.
    pub verbose: usize,

    /// Evict least-recently-used items when the memory budget is exhausted.
    pub evict_to_free: bool,

    /// Total memory budget in bytes.
    pub maxbytes: usize,

    /// Reserve slab pages for every size class at initialization.
    pub preallocate: bool,

    /// Growth ratio between consecutive size classes.
    pub factor: f64,

    /// Chunk size of the smallest size class, in bytes.
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_cas: true,
            verbose: 0,
            evict_to_free: true,
            maxbytes: 64 * 1024 * 1024,
            preallocate: false,
            factor: 1.25,
            chunk_size: 48,
        }
    }
}

impl Config {
    /// Parse a configuration string on top of the defaults and validate the
    /// result.
    pub fn parse(cfg: &str) -> Result<Self> {
        let mut config = Config::default();
        config.apply(cfg, 0)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.maxbytes == 0 {
            return Err(EngineError::Configuration(
                "cache_size must be greater than 0".to_string(),
            ));
        }
        if self.factor <= 1.0 {
            return Err(EngineError::Configuration(
                "factor must be greater than 1.0".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_size > crate::slab::SLAB_PAGE_SIZE {
            return Err(EngineError::Configuration(format!(
                "chunk_size must be at most {}",
                crate::slab::SLAB_PAGE_SIZE
            )));
        }
        Ok(())
    }

    fn apply(&mut self, cfg: &str, depth: usize) -> Result<()> {
        for pair in cfg.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                EngineError::Configuration(format!("expected key=value, got \"{pair}\""))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "use_cas" => self.use_cas = parse_bool(key, value)?,
                "verbose" => self.verbose = parse_size(key, value)?,
                "eviction" => self.evict_to_free = parse_bool(key, value)?,
                "cache_size" => self.maxbytes = parse_size(key, value)?,
                "preallocate" => self.preallocate = parse_bool(key, value)?,
                "factor" => {
                    self.factor = value.parse::<f64>().map_err(|_| {
                        EngineError::Configuration(format!("invalid float for factor: \"{value}\""))
                    })?;
                }
                "chunk_size" => self.chunk_size = parse_size(key, value)?,
                "config_file" => self.include_file(value, depth)?,
                _ => {
                    return Err(EngineError::Configuration(format!("unknown option: {key}")));
                }
            }
        }
        Ok(())
    }

    fn include_file(&mut self, path: &str, depth: usize) -> Result<()> {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(EngineError::Configuration(format!(
                "config_file nesting too deep at {path}"
            )));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("cannot read {path}: {e}")))?;
        let pairs = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect::<Vec<_>>()
            .join(";");
        self.apply(&pairs, depth + 1)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(EngineError::Configuration(format!(
            "invalid boolean for {key}: \"{value}\""
        ))),
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    let (digits, multiplier) = match value.bytes().last() {
        Some(b'k') | Some(b'K') => (&value[..value.len() - 1], 1024),
        Some(b'm') | Some(b'M') => (&value[..value.len() - 1], 1024 * 1024),
        Some(b'g') | Some(b'G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    let n = digits.parse::<usize>().map_err(|_| {
        EngineError::Configuration(format!("invalid size for {key}: \"{value}\""))
    })?;
    n.checked_mul(multiplier)
        .ok_or_else(|| EngineError::Configuration(format!("size overflow for {key}: \"{value}\"")))
}

//! Runtime configuration for the interpreter, serializer and client.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};

/// Tunables shared by the query pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `$top` applied to listings that do not specify one.
    pub default_page_size: Option<u64>,
    /// Upper bound for `$top`.
    pub max_page_size: Option<u64>,
    /// Nesting limit for parsed expressions.
    pub max_expression_depth: usize,
    /// Longest accepted query string, in bytes.
    pub max_query_length: usize,
    /// Parsed query strings kept by the interpreter; 0 disables the cache.
    pub query_cache_capacity: usize,
    /// Prefix joined to resource paths when writing `_uri` and `_ref` values.
    pub base_uri: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_page_size: None,
            max_page_size: None,
            max_expression_depth: 256,
            max_query_length: 8 * 1024,
            query_cache_capacity: 128,
            base_uri: "/".to_owned(),
        }
    }
}

impl Config {
    /// Paged listings with tight parser limits, for public endpoints.
    pub fn strict() -> Self {
        Self {
            default_page_size: Some(100),
            max_page_size: Some(1000),
            max_expression_depth: 64,
            max_query_length: 4 * 1024,
            query_cache_capacity: 256,
            ..Self::default()
        }
    }

    /// No paging limits and generous parser limits, for tooling and tests.
    pub fn permissive() -> Self {
        Self {
            default_page_size: None,
            max_page_size: None,
            max_expression_depth: 1024,
            max_query_length: 1024 * 1024,
            query_cache_capacity: 0,
            ..Self::default()
        }
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| MappingError::Config(format!("config: {err}")))
    }

    /// Reads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            MappingError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Effective `$top` for a listing: the requested value clamped to
    /// `max_page_size`, or `default_page_size` when none was requested.
    pub fn effective_top(&self, requested: Option<u64>) -> Option<u64> {
        let top = requested.or(self.default_page_size);
        match (top, self.max_page_size) {
            (Some(top), Some(max)) => Some(top.min(max)),
            (None, Some(max)) => Some(max),
            (top, None) => top,
        }
    }
}

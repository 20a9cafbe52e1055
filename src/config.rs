// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Service configuration read from environment variables.

use crate::api::rest::ApiConfig;
use crate::coordinator::{ArtifactPaths, CoordinatorConfig, DEFAULT_OVER_FETCH_MULTIPLIER};
use crate::hnsw::HNSWConfig;
use crate::index::{IndexConfig, IndexKind};
use crate::ivf::IVFConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DIMENSION: usize = 768;
pub const DEFAULT_INDEX_PATH: &str = "data/faiss_index";
pub const DEFAULT_METADATA_PATH: &str = "data/metadata.json";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub coordinator: CoordinatorConfig,
    pub paths: ArtifactPaths,
    pub persist_on_write: bool,
    pub checkpoint_interval: Option<Duration>,
    pub embedding_service_url: Option<String>,
    pub api: ApiConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let kind = match env.get("INDEX_TYPE") {
            Some(value) => IndexKind::from_str(&value).map_err(|e| ConfigError::Invalid {
                var: "INDEX_TYPE",
                value,
                reason: e.to_string(),
            })?,
            None => IndexKind::Exact,
        };
        let dimension = env.parse("DIMENSION", DEFAULT_DIMENSION)?;
        if dimension == 0 {
            return Err(ConfigError::invalid("DIMENSION", "0", "must be positive"));
        }

        let seed = env.parse_opt::<u64>("INDEX_SEED")?;

        let defaults = IVFConfig::default();
        let ivf = IVFConfig {
            n_clusters: env.parse("IVF_NLIST", defaults.n_clusters)?,
            n_probe: env.parse("IVF_NPROBE", defaults.n_probe)?,
            seed,
            ..defaults
        };
        if !ivf.is_valid() {
            return Err(ConfigError::invalid(
                "IVF_NPROBE",
                &ivf.n_probe.to_string(),
                &format!("must be between 1 and IVF_NLIST ({})", ivf.n_clusters),
            ));
        }

        let defaults = HNSWConfig::default();
        let m = env.parse("HNSW_M", defaults.max_connections)?;
        let hnsw = HNSWConfig {
            ef_construction: env.parse("HNSW_EF_CONSTRUCTION", defaults.ef_construction)?,
            ef_search: env.parse("HNSW_EF_SEARCH", defaults.ef_search)?,
            seed,
            ..HNSWConfig::with_connectivity(m)
        };
        if !hnsw.is_valid() {
            return Err(ConfigError::invalid(
                "HNSW_M",
                &m.to_string(),
                "connectivity must be at least 2 and ef values positive",
            ));
        }

        let over_fetch_multiplier =
            env.parse("OVER_FETCH_MULTIPLIER", DEFAULT_OVER_FETCH_MULTIPLIER)?;
        if over_fetch_multiplier == 0 {
            return Err(ConfigError::invalid("OVER_FETCH_MULTIPLIER", "0", "must be at least 1"));
        }

        let coordinator = CoordinatorConfig {
            index: IndexConfig {
                kind,
                dimension,
                ivf,
                hnsw,
            },
            over_fetch_multiplier,
        };

        let paths = ArtifactPaths::new(
            env.get("INDEX_PATH").unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string()),
            env.get("METADATA_PATH").unwrap_or_else(|| DEFAULT_METADATA_PATH.to_string()),
        );

        let api_defaults = ApiConfig::default();
        let api = ApiConfig {
            host: env.get("VECTOR_STORE_HOST").unwrap_or(api_defaults.host),
            port: env.parse("PORT", api_defaults.port)?,
            max_request_size: env.parse("MAX_REQUEST_SIZE", api_defaults.max_request_size)?,
            timeout: Duration::from_secs(
                env.parse("REQUEST_TIMEOUT_SECS", api_defaults.timeout.as_secs())?,
            ),
            api_key: env.get("SERVICE_API_KEY"),
        };

        let checkpoint_interval = match env.parse_opt::<u64>("CHECKPOINT_INTERVAL_SECS")? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    "CHECKPOINT_INTERVAL_SECS",
                    "0",
                    "must be positive",
                ))
            }
            other => other.map(Duration::from_secs),
        };

        Ok(Self {
            coordinator,
            paths,
            persist_on_write: env.parse_bool("PERSIST_ON_WRITE", true)?,
            checkpoint_interval,
            embedding_service_url: env.get("EMBEDDING_SERVICE_URL"),
            api,
        })
    }
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: &str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value of `var`.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::invalid(var, &value, &e.to_string())),
            None => Ok(None),
        }
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(var)?.unwrap_or(default))
    }

    fn parse_bool(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(var).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::invalid(var, &v, "expected a boolean")),
        }
    }
}

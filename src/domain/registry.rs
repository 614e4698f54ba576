//! Feature registry and lag declarations.
//!
//! The registry is built once per configuration and maps every feature name to
//! a stable row index. Row order is:
//!
//! 1. the declared (sampled) features, in declaration order
//! 2. the lag features generated from `LagSpec`s, in declaration order and by
//!    increasing depth
//!
//! Lag features are named `{base}_{n}` and hold the base value delayed by `n`
//! samples. Each lag feature gets a `LagLink` that copies the `n-1` lag (or the
//! base itself for `n = 1`) of the current sample into the `n` lag of the next
//! sample. The rollout simulator replays these links.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Self-referencing selection seeds at most this many lags of the target.
pub const MAX_SELF_REFERENCE_LAGS: usize = 4;

/// Declarative lag request: keep `depth` delayed copies of `feature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagSpec {
    pub feature: String,
    pub depth: usize,
}

impl LagSpec {
    pub fn new(feature: impl Into<String>, depth: usize) -> Self {
        Self {
            feature: feature.into(),
            depth,
        }
    }
}

/// One step of lag propagation: `row[target, t+1] = row[source, t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagLink {
    pub source: usize,
    pub target: usize,
    /// Row of the undelayed feature.
    pub base: usize,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
    sampled: usize,
    lag_specs: Vec<LagSpec>,
    links: Vec<LagLink>,
}

impl FeatureRegistry {
    /// Build a registry from sampled feature names plus lag declarations.
    ///
    /// Fails on duplicate names, empty names, zero-depth lags, lags of
    /// undeclared features, and generated lag names that collide with a
    /// declared feature.
    pub fn new(features: &[String], lags: &[LagSpec]) -> Result<Self, AppError> {
        let mut names = Vec::with_capacity(features.len());
        let mut index = HashMap::new();

        for name in features {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::config("Feature names must not be empty."));
            }
            if index.insert(name.to_string(), names.len()).is_some() {
                return Err(AppError::config(format!("Duplicate feature name: `{name}`")));
            }
            names.push(name.to_string());
        }
        let sampled = names.len();

        let mut links = Vec::new();
        let mut seen_bases = HashSet::new();
        for spec in lags {
            let base = *index.get(spec.feature.as_str()).ok_or_else(|| {
                AppError::config(format!(
                    "Lag requested for `{}`, which is not a declared feature.",
                    spec.feature
                ))
            })?;
            if base >= sampled {
                return Err(AppError::config(format!(
                    "Lag base `{}` must be a sampled feature, not another lag.",
                    spec.feature
                )));
            }
            if spec.depth == 0 {
                return Err(AppError::config(format!(
                    "Lag depth for `{}` must be >= 1.",
                    spec.feature
                )));
            }
            if !seen_bases.insert(base) {
                return Err(AppError::config(format!(
                    "Lags for `{}` declared more than once.",
                    spec.feature
                )));
            }

            let mut source = base;
            for depth in 1..=spec.depth {
                let lag_name = lag_name(&spec.feature, depth);
                let target = names.len();
                if index.insert(lag_name.clone(), target).is_some() {
                    return Err(AppError::config(format!(
                        "Generated lag feature `{lag_name}` collides with a declared feature."
                    )));
                }
                names.push(lag_name);
                links.push(LagLink {
                    source,
                    target,
                    base,
                    depth,
                });
                source = target;
            }
        }

        Ok(Self {
            names,
            index,
            sampled,
            lag_specs: lags.to_vec(),
            links,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Names of features read directly from samples (no lags).
    pub fn sampled_names(&self) -> &[String] {
        &self.names[..self.sampled]
    }

    pub fn lag_specs(&self) -> &[LagSpec] {
        &self.lag_specs
    }

    pub fn lag_links(&self) -> &[LagLink] {
        &self.links
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index(&self, name: &str) -> Result<usize, AppError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| AppError::config(format!("Unknown feature: `{name}`")))
    }

    /// Resolve an ordered, duplicate-free list of names to row indices.
    pub fn indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, AppError> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.index(name.as_ref())?;
            if out.contains(&idx) {
                return Err(AppError::config(format!(
                    "Feature `{}` listed more than once.",
                    name.as_ref()
                )));
            }
            out.push(idx);
        }
        Ok(out)
    }

    pub fn names_of(&self, rows: &[usize]) -> Vec<String> {
        rows.iter().map(|&i| self.names[i].clone()).collect()
    }

    /// Lag rows of `base`, ordered by increasing depth.
    pub fn lags_of(&self, base: usize) -> Vec<usize> {
        self.links
            .iter()
            .filter(|link| link.base == base)
            .map(|link| link.target)
            .collect()
    }

    /// The `(base row, depth)` of a lag row, or `None` for sampled rows.
    pub fn lag_info(&self, row: usize) -> Option<(usize, usize)> {
        self.links
            .iter()
            .find(|link| link.target == row)
            .map(|link| (link.base, link.depth))
    }
}

pub fn lag_name(base: &str, depth: usize) -> String {
    format!("{base}_{depth}")
}

//! Model parameters and the named-key parameter surface.
//!
//! Parameters arrive either as a flat `key -> number` map (the shape a parameter-file loader
//! hands over) or as JSON. Each component reads only the keys it needs; unknown keys are
//! ignored, and a missing required key is reported by name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LemError, Result};

/// Flat parameter map as produced by an external loader.
pub type ParamMap = HashMap<String, f64>;

/// Fetch a required key.
pub fn require(map: &ParamMap, key: &str) -> Result<f64> {
    map.get(key)
        .copied()
        .ok_or_else(|| LemError::MissingParameter { key: key.to_string() })
}

/// Fetch an optional key, falling back to `default`.
pub fn optional(map: &ParamMap, key: &str, default: f64) -> f64 {
    map.get(key).copied().unwrap_or(default)
}

fn require_count(map: &ParamMap, key: &str) -> Result<usize> {
    let v = require(map, key)?;
    if !v.is_finite() || v < 1.0 || v.fract() != 0.0 {
        return Err(LemError::invalid(key, v, "must be a positive integer"));
    }
    Ok(v as usize)
}

fn check_positive(key: &str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(LemError::invalid(key, v, "must be finite and > 0"))
    }
}

fn check_non_negative(key: &str, v: f64) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(LemError::invalid(key, v, "must be finite and >= 0"))
    }
}

/// Full model configuration.
///
/// Field names on the wire match the keys used in parameter files
/// (`K_sp`, `m_sp`, `n_sp`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub nrows: usize,
    pub ncols: usize,
    pub dx: f64,
    pub dt: f64,
    pub total_time: f64,
    pub uplift_rate: f64,
    #[serde(rename = "K_sp")]
    pub k_sp: f64,
    pub m_sp: f64,
    pub n_sp: f64,
    pub linear_diffusivity: f64,
    /// Freeman exponent for multi-flow-direction partitioning.
    #[serde(default = "default_mfd_exponent")]
    pub mfd_exponent: f64,
    /// Elevation increment used by the sink filler.
    #[serde(default = "default_fill_epsilon")]
    pub fill_epsilon: f64,
    #[serde(default = "default_newton_tol")]
    pub newton_tol: f64,
    #[serde(default = "default_newton_max_iter")]
    pub newton_max_iter: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_mfd_exponent() -> f64 {
    1.1
}

fn default_fill_epsilon() -> f64 {
    1e-6
}

fn default_newton_tol() -> f64 {
    1e-10
}

fn default_newton_max_iter() -> usize {
    50
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            nrows: 100,
            ncols: 100,
            dx: 0.02,
            dt: 0.5,
            total_time: 100.0,
            uplift_rate: 0.001,
            k_sp: 0.3,
            m_sp: 0.5,
            n_sp: 1.0,
            linear_diffusivity: 0.0001,
            mfd_exponent: default_mfd_exponent(),
            fill_epsilon: default_fill_epsilon(),
            newton_tol: default_newton_tol(),
            newton_max_iter: default_newton_max_iter(),
            seed: 0,
        }
    }
}

impl ModelParams {
    /// Build from a flat key map. Unknown keys are ignored.
    pub fn from_map(map: &ParamMap) -> Result<Self> {
        let params = Self {
            nrows: require_count(map, "nrows")?,
            ncols: require_count(map, "ncols")?,
            dx: require(map, "dx")?,
            dt: require(map, "dt")?,
            total_time: require(map, "total_time")?,
            uplift_rate: require(map, "uplift_rate")?,
            k_sp: require(map, "K_sp")?,
            m_sp: require(map, "m_sp")?,
            n_sp: require(map, "n_sp")?,
            linear_diffusivity: require(map, "linear_diffusivity")?,
            mfd_exponent: optional(map, "mfd_exponent", default_mfd_exponent()),
            fill_epsilon: optional(map, "fill_epsilon", default_fill_epsilon()),
            newton_tol: optional(map, "newton_tol", default_newton_tol()),
            newton_max_iter: optional(map, "newton_max_iter", default_newton_max_iter() as f64)
                .max(1.0) as usize,
            seed: optional(map, "seed", 0.0).max(0.0) as u64,
        };
        params.validate()?;
        Ok(params)
    }

    /// Parse from JSON. Missing required keys surface as `MissingParameter`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        for key in REQUIRED_KEYS {
            if value.get(key).is_none() {
                return Err(LemError::MissingParameter { key: key.to_string() });
            }
        }
        let params: Self = serde_json::from_value(value)?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("dx", self.dx)?;
        check_positive("dt", self.dt)?;
        check_positive("total_time", self.total_time)?;
        if !self.uplift_rate.is_finite() {
            return Err(LemError::invalid("uplift_rate", self.uplift_rate, "must be finite"));
        }
        check_non_negative("K_sp", self.k_sp)?;
        check_non_negative("m_sp", self.m_sp)?;
        check_positive("n_sp", self.n_sp)?;
        check_non_negative("linear_diffusivity", self.linear_diffusivity)?;
        check_positive("mfd_exponent", self.mfd_exponent)?;
        check_positive("fill_epsilon", self.fill_epsilon)?;
        check_positive("newton_tol", self.newton_tol)?;
        Ok(())
    }

    /// Number of whole steps of size `dt` needed to cover `total_time`.
    pub fn n_steps(&self) -> usize {
        (self.total_time / self.dt).ceil() as usize
    }
}

const REQUIRED_KEYS: [&str; 10] = [
    "nrows",
    "ncols",
    "dx",
    "dt",
    "total_time",
    "uplift_rate",
    "K_sp",
    "m_sp",
    "n_sp",
    "linear_diffusivity",
];

/// Storm statistics for the stochastic rainfall generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StormParams {
    pub mean_storm_duration: f64,
    pub mean_storm_depth: f64,
    pub mean_interstorm_duration: f64,
}

impl Default for StormParams {
    fn default() -> Self {
        Self {
            mean_storm_duration: 0.1,
            mean_storm_depth: 0.2,
            mean_interstorm_duration: 0.4,
        }
    }
}

impl StormParams {
    pub fn from_map(map: &ParamMap) -> Result<Self> {
        let params = Self {
            mean_storm_duration: require(map, "mean_storm_duration")?,
            mean_storm_depth: require(map, "mean_storm_depth")?,
            mean_interstorm_duration: require(map, "mean_interstorm_duration")?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("mean_storm_duration", self.mean_storm_duration)?;
        check_positive("mean_storm_depth", self.mean_storm_depth)?;
        check_positive("mean_interstorm_duration", self.mean_interstorm_duration)
    }
}

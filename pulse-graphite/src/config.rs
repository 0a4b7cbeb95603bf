// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use pulse_common::config::Validate;
use serde::Deserialize;
use std::time::Duration;

//
// EngineConfig
//

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
  pub cache: CacheConfig,
  pub evaluator: EvaluatorConfig,
}

impl Validate for EngineConfig {
  fn validate(&self) -> anyhow::Result<()> {
    self.cache.validate()?;
    self.evaluator.validate()
  }
}

//
// CacheConfig
//

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  // How long a published result is served before it must be recomputed.
  #[serde(with = "humantime_serde")]
  pub ttl: Duration,
  // Upper bound on the bytes held by ready entries.
  pub max_size_bytes: u64,
  #[serde(with = "humantime_serde")]
  pub sweep_interval: Duration,
  // How long a waiter blocks on another caller's computation before giving up.
  #[serde(with = "humantime_serde")]
  pub wait_timeout: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(60),
      max_size_bytes: 256 * 1024 * 1024,
      sweep_interval: Duration::from_secs(30),
      wait_timeout: Duration::from_secs(30),
    }
  }
}

impl Validate for CacheConfig {
  fn validate(&self) -> anyhow::Result<()> {
    if self.ttl.as_secs() == 0 {
      anyhow::bail!("cache ttl must be at least one second");
    }
    if self.sweep_interval.is_zero() {
      anyhow::bail!("cache sweep_interval must be positive");
    }
    if self.max_size_bytes == 0 {
      anyhow::bail!("cache max_size_bytes must be positive");
    }
    Ok(())
  }
}

//
// EvaluatorConfig
//

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorConfig {
  // Minimum valid fraction of a window for moving* functions when the call does not pass one.
  pub default_xfiles_factor: f64,
  // History fetched ahead of the requested range by the Holt-Winters family.
  #[serde(with = "humantime_serde")]
  pub holt_winters_bootstrap: Duration,
}

impl Default for EvaluatorConfig {
  fn default() -> Self {
    Self {
      default_xfiles_factor: 0.0,
      holt_winters_bootstrap: Duration::from_secs(7 * 86400),
    }
  }
}

impl EvaluatorConfig {
  #[must_use]
  pub fn holt_winters_bootstrap_seconds(&self) -> i64 {
    i64::try_from(self.holt_winters_bootstrap.as_secs()).unwrap_or(i64::MAX)
  }
}

impl Validate for EvaluatorConfig {
  fn validate(&self) -> anyhow::Result<()> {
    if !(0.0 ..= 1.0).contains(&self.default_xfiles_factor) {
      anyhow::bail!(
        "default_xfiles_factor must be within [0, 1], got {}",
        self.default_xfiles_factor
      );
    }
    Ok(())
  }
}

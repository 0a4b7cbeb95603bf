// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::Context;
use serde::de::DeserializeOwned;

//
// Validate
//

// Implemented by configuration structs that have constraints serde cannot express.
pub trait Validate {
  fn validate(&self) -> anyhow::Result<()>;
}

// Convert a YAML string into a typed config and run validation on it.
pub fn yaml_to_config<T: DeserializeOwned + Validate>(yaml: &str) -> anyhow::Result<T> {
  let config: T = serde_yaml::from_str(yaml)?;
  config.validate()?;
  Ok(config)
}

pub fn load_from_file<T: DeserializeOwned + Validate>(path: &str) -> anyhow::Result<T> {
  log::info!("loading config from: {path}");
  let file_contents =
    std::fs::read_to_string(path).with_context(|| format!("unable to read config file {path}"))?;
  yaml_to_config(&file_contents)
}

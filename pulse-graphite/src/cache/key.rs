// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./key_test.rs"]
mod key_test;

use std::cmp::Ordering;
use std::fmt::Display;
use url::form_urlencoded;

// Parameters that only defeat browser and proxy caches or select a response wrapper.
const IGNORED_PARAMS: &[&str] = &["_", "_t", "jsonp", "callback", "noCache", "cacheTimeout"];

//
// CacheKey
//

// Canonical form of a render request. Requests that differ only in parameter order or in cache
// busting parameters share a key. Targets keep their relative order since it determines the
// order of the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn from_params<K, V>(params: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: AsRef<str>,
    V: AsRef<str>,
  {
    let mut pairs: Vec<(String, String)> = params
      .into_iter()
      .filter(|(key, _)| !IGNORED_PARAMS.contains(&key.as_ref()))
      .map(|(key, value)| (key.as_ref().to_string(), value.as_ref().to_string()))
      .collect();
    pairs.sort_by(|(a_key, a_value), (b_key, b_value)| {
      a_key.cmp(b_key).then_with(|| {
        if a_key == "target" {
          Ordering::Equal
        } else {
          a_value.cmp(b_value)
        }
      })
    });
    Self(
      form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish(),
    )
  }

  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./glob_test.rs"]
mod glob_test;

use regex::Regex;

// Compile a Graphite metric glob into an anchored regex. Wildcards never cross a path separator.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
  let mut out = String::with_capacity(pattern.len() * 2 + 2);
  out.push('^');
  let mut in_brace = false;
  let mut in_bracket = false;
  for c in pattern.chars() {
    if in_bracket {
      out.push(c);
      if c == ']' {
        in_bracket = false;
      }
      continue;
    }
    match c {
      '*' => out.push_str("[^.]*"),
      '?' => out.push_str("[^.]"),
      '[' => {
        in_bracket = true;
        out.push('[');
      },
      '{' if !in_brace => {
        in_brace = true;
        out.push_str("(?:");
      },
      '}' if in_brace => {
        in_brace = false;
        out.push(')');
      },
      ',' if in_brace => out.push('|'),
      c => out.push_str(&regex::escape(&c.to_string())),
    }
  }
  out.push('$');
  Regex::new(&out)
}

#[must_use]
pub fn is_pattern(name: &str) -> bool {
  name.contains(['*', '?', '[', '{'])
}

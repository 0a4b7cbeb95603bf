// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use clap::Parser;
use pulse_graphite_tester::run_file;

#[derive(Parser)]
struct Options {
  #[arg(short = 'c', long = "config")]
  pub config: String,
}

fn main() -> anyhow::Result<()> {
  let options = Options::parse();
  run_file(&options.config)
}

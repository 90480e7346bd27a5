// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `weftc` — lower typed Weft compilation units to IR

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, warn};
use rayon::prelude::*;

use weft::CompilationUnit;

#[derive(Parser)]
#[command(name = "weftc", version, about = "Weft middle-end driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower one or more typed compilation units to IR
    Lower {
        /// Typed-unit JSON files produced by the front end
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the `.ir.json` outputs (defaults to each input's
        /// directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Write the lowered IR to stdout instead of files
        #[arg(long, conflicts_with = "out_dir")]
        stdout: bool,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Lower {
            inputs,
            out_dir,
            stdout,
            pretty,
        } => lower_units(&inputs, out_dir.as_deref(), stdout, pretty),
    }
}

fn lower_units(inputs: &[PathBuf], out_dir: Option<&Path>, stdout: bool, pretty: bool) -> Result<()> {
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    // Each unit is lowered by its own context; units are independent, so
    // they can run in parallel.
    let outputs: Vec<(PathBuf, String)> = inputs
        .par_iter()
        .map(|input| {
            let serialized = lower_one(input, pretty)
                .with_context(|| format!("lowering {}", input.display()))?;
            Ok((output_path(input, out_dir), serialized))
        })
        .collect::<Result<_>>()?;

    for (path, serialized) in outputs {
        if stdout {
            println!("{serialized}");
        } else {
            fs::write(&path, serialized)
                .with_context(|| format!("writing {}", path.display()))?;
            debug!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn lower_one(input: &Path, pretty: bool) -> Result<String> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let unit: CompilationUnit =
        serde_json::from_str(&source).context("parsing typed compilation unit")?;

    if unit.program.items.is_empty() {
        warn!("{}: unit contains no items", input.display());
    }

    let ir = unit.lower().context("lowering failed")?;

    let serialized = if pretty {
        serde_json::to_string_pretty(&ir)?
    } else {
        serde_json::to_string(&ir)?
    };
    Ok(serialized)
}

fn output_path(input: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let file = format!("{}.ir.json", stem.to_string_lossy());
    match out_dir {
        Some(dir) => dir.join(file),
        None => input.with_file_name(file),
    }
}

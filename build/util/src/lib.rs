// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::io::Write;
use std::path::PathBuf;

/// Environment variable holding a component's build configuration as TOML.
pub const TASK_CONFIG_VAR: &str = "EXP_TASK_CONFIG";

/// Pulls the task configuration. This fails if the variable is missing or
/// does not parse as `T`.
pub fn task_config<T: DeserializeOwned>() -> Result<T> {
    println!("cargo:rerun-if-env-changed={TASK_CONFIG_VAR}");
    let text = env::var(TASK_CONFIG_VAR)
        .with_context(|| format!("${TASK_CONFIG_VAR} is not set"))?;
    parse(&text)
}

/// Equivalent to `task_config` but uses `T::default()` if the environment
/// variable is missing. If the environment variable fails to parse, this still
/// fails with `Err`.
pub fn task_config_or_default<T: DeserializeOwned + Default>() -> Result<T> {
    // Emitted whether or not the variable is present, so that we are re-run
    // if it appears.
    println!("cargo:rerun-if-env-changed={TASK_CONFIG_VAR}");

    match env::var(TASK_CONFIG_VAR) {
        Ok(text) => parse(&text),
        Err(_) => {
            println!("--- ${TASK_CONFIG_VAR} not present, using default ---");
            Ok(T::default())
        }
    }
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T> {
    println!("--- toml for ${TASK_CONFIG_VAR} ---");
    println!("{text}");
    toml::from_str(text)
        .with_context(|| format!("parsing ${TASK_CONFIG_VAR}"))
}

/// Creates `name` in `OUT_DIR` for generated code, returning the open file.
pub fn out_file(name: &str) -> Result<std::fs::File> {
    let out_dir = env::var("OUT_DIR").context("OUT_DIR is not set")?;
    let path = PathBuf::from(out_dir).join(name);
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "// Generated by build.rs; do not edit.")?;
    Ok(file)
}

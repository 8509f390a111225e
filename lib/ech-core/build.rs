// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;

use anyhow::Result;
use serde::Deserialize;

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum BootStage {
    BootRom,
    FwUpgrade,
    #[default]
    RunTime,
}

impl BootStage {
    fn variant(self) -> &'static str {
        match self {
            Self::BootRom => "BootRom",
            Self::FwUpgrade => "FwUpgrade",
            Self::RunTime => "RunTime",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct EchConfig {
    #[serde(default)]
    boot_stage: BootStage,
    /// Equalizer setting until a boot configuration says otherwise.
    #[serde(default = "dfe_default")]
    dfe_default: bool,
}

fn dfe_default() -> bool {
    true
}

impl Default for EchConfig {
    fn default() -> Self {
        Self {
            boot_stage: BootStage::default(),
            dfe_default: dfe_default(),
        }
    }
}

fn main() -> Result<()> {
    let config = build_util::task_config_or_default::<EchConfig>()?;

    let mut out = build_util::out_file("ech_config.rs")?;
    writeln!(
        out,
        "pub const BOOT_STAGE: exp_api::FwStage = exp_api::FwStage::{};",
        config.boot_stage.variant(),
    )?;
    writeln!(out, "pub const DFE_DEFAULT: bool = {};", config.dfe_default)?;
    Ok(())
}

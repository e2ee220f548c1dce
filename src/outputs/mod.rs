// SPDX-License-Identifier: Apache-2.0

//! Output sinks. Each output is a task consuming `(Batch, AckHandle)` pairs
//! from the publisher and resolving every handle exactly once.

pub mod blackhole;
pub mod console;

use serde::Deserialize;
use std::fmt;

/// Which sink the agent publishes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Console,
    Blackhole,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Console => write!(f, "console"),
            OutputKind::Blackhole => write!(f, "blackhole"),
        }
    }
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(OutputKind::Console),
            "blackhole" => Ok(OutputKind::Blackhole),
            other => Err(format!("unknown output: {other}")),
        }
    }
}

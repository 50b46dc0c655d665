use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::FetchError;

/// Operating systems as named in version profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpSys {
    Windows,
    Osx,
    Linux,
}

impl OpSys {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            OpSys::Windows
        } else if cfg!(target_os = "macos") {
            OpSys::Osx
        } else {
            OpSys::Linux
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpSys::Windows => "windows",
            OpSys::Osx => "osx",
            OpSys::Linux => "linux",
        }
    }
}

impl fmt::Display for OpSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpSys {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(OpSys::Windows),
            "osx" | "macos" => Ok(OpSys::Osx),
            "linux" => Ok(OpSys::Linux),
            other => Err(FetchError::Other(format!("unknown operating system '{other}'"))),
        }
    }
}

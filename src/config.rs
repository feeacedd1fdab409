use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Everything a patch run needs, fixed at start and passed down explicitly.
#[derive(Debug, Clone)]
pub struct PatchConfig {
    pub apk: PathBuf,
    pub gadget: PathBuf,
    pub unpacked_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keystore: PathBuf,
    pub keystore_alias: String,
    pub keystore_pass: String,
    pub listen_address: String,
    pub listen_port: u16,
    pub duplicate_policy: DuplicatePolicy,
}

/// What to do when the selected module already depends on the gadget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DuplicatePolicy {
    /// Abort the run
    Reject,
    /// Add a second dependency entry anyway
    Allow,
    /// Leave the module untouched and keep going
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GadgetConfig {
    pub interaction: Interaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub port: u16,
    pub on_load: String,
}

impl GadgetConfig {
    /// Companion config the gadget auto-loads: wait for a controller
    /// connection on `address:port`, then resume main execution.
    pub fn listen(address: &str, port: u16) -> GadgetConfig {
        GadgetConfig {
            interaction: Interaction {
                kind: "listen".to_string(),
                address: address.to_string(),
                port,
                on_load: "resume".to_string(),
            },
        }
    }
}

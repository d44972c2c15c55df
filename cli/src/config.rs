//! Configuration for the Galeon CLI.
//!
//! Everything lives in `~/.galeon/config.json`: chain endpoints, contract
//! addresses and the prover artifact paths. No key material is ever stored
//! here - master keys are re-derived from a wallet signature per session.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Default directory for CLI state
const GALEON_DIR: &str = ".galeon";
const CONFIG_FILE: &str = "config.json";

/// Prover toolchain locations.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProverConfig {
    /// snarkjs executable
    pub command: PathBuf,
    pub circuit_wasm: PathBuf,
    pub proving_key: PathBuf,
    pub verification_key: PathBuf,
    /// Scratch directory for per-proof files
    pub work_dir: PathBuf,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GaleonConfig {
    /// JSON-RPC endpoint of the L2 node
    pub rpc_url: String,
    /// Privacy pool contract
    pub pool: Address,
    /// Entrypoint contract (ASP root registry)
    pub entrypoint: Address,
    /// First block to scan for pool events
    pub start_block: u64,
    /// Directory holding the ASP label log (shared with galeon-aspd)
    pub asp_store_dir: Option<PathBuf>,
    pub prover: ProverConfig,
}

/// Get the galeon directory path
pub fn galeon_dir() -> PathBuf {
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(GALEON_DIR)
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    galeon_dir().join(CONFIG_FILE)
}

pub fn config_exists() -> bool {
    config_file().exists()
}

/// Save the config to disk with restrictive permissions.
pub fn save_config(config: &GaleonConfig) -> Result<()> {
    let dir = galeon_dir();
    fs::create_dir_all(&dir).context("Failed to create galeon directory")?;

    let path = config_file();
    let json = serde_json::to_string_pretty(config)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(&path, &json)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(&path, &json)?;
    }

    Ok(())
}

/// Load the config from disk.
pub fn load_config() -> Result<GaleonConfig> {
    let path = config_file();
    if !path.exists() {
        bail!("No configuration found. Run 'galeon init' first.");
    }

    let json = fs::read_to_string(&path).context("Failed to read config file")?;
    let config: GaleonConfig =
        serde_json::from_str(&json).context("Failed to parse config file")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trips_through_json() {
        let config = GaleonConfig {
            rpc_url: "http://127.0.0.1:8545".into(),
            pool: Address::repeat_byte(0x11),
            entrypoint: Address::repeat_byte(0x22),
            start_block: 100,
            asp_store_dir: Some(PathBuf::from("/var/lib/galeon/asp")),
            prover: ProverConfig {
                command: PathBuf::from("snarkjs"),
                circuit_wasm: PathBuf::from("withdraw.wasm"),
                proving_key: PathBuf::from("withdraw.zkey"),
                verification_key: PathBuf::from("vkey.json"),
                work_dir: PathBuf::from("/tmp/galeon"),
            },
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: GaleonConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rpc_url, config.rpc_url);
        assert_eq!(parsed.pool, config.pool);
        assert_eq!(parsed.entrypoint, config.entrypoint);
        assert_eq!(parsed.asp_store_dir, config.asp_store_dir);
    }
}

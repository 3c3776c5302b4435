//! Deployment metadata for the tender contract.
//!
//! Written by the contract deployment tooling; read once at process start.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Functions the contract binding calls
pub const REQUIRED_FUNCTIONS: &[&str] = &[
    "createTender",
    "submitBid",
    "closeTender",
    "evaluateBids",
    "tenderCount",
    "getWinningBid",
    "getTenderBids",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentInfo {
    pub contract_address: String,
    #[serde(default)]
    pub abi: Value,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

impl DeploymentInfo {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Required functions the recorded ABI does not declare.
    pub fn missing_functions(&self) -> Vec<&'static str> {
        let declared: Vec<&str> = self
            .abi
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.get("type").and_then(Value::as_str) == Some("function"))
                    .filter_map(|e| e.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        REQUIRED_FUNCTIONS
            .iter()
            .copied()
            .filter(|f| !declared.contains(f))
            .collect()
    }
}

/// Load the deployment artifact. Absence is not an error: the ledger stays reachable
/// but every mutation reports `NotDeployed` until the contract is redeployed.
pub fn load(path: &Path) -> Option<DeploymentInfo> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Contract deployment info not found - ledger mirroring disabled until deployed"
            );
            return None;
        }
    };

    match DeploymentInfo::parse(&raw) {
        Ok(info) => {
            let missing = info.missing_functions();
            if !missing.is_empty() {
                tracing::warn!(
                    contract = %info.contract_address,
                    missing = ?missing,
                    "Deployed ABI does not declare every function the binding calls"
                );
            }
            tracing::info!(
                contract = %info.contract_address,
                deployer = ?info.deployer,
                deploy_tx = ?info.tx_hash,
                "Loaded contract deployment info"
            );
            Some(info)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Invalid contract deployment info");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_missing_functions() {
        let raw = json!({
            "contract_address": "0x0000000000000000000000000000000000000001",
            "abi": [
                {"type": "function", "name": "createTender"},
                {"type": "function", "name": "submitBid"},
                {"type": "event", "name": "closeTender"}
            ]
        })
        .to_string();

        let info = DeploymentInfo::parse(&raw).unwrap();
        let missing = info.missing_functions();
        assert!(missing.contains(&"closeTender"));
        assert!(!missing.contains(&"submitBid"));
        assert_eq!(missing.len(), REQUIRED_FUNCTIONS.len() - 2);
    }

    #[test]
    fn missing_file_yields_none() {
        assert!(load(Path::new("/definitely/not/here/deployment_info.json")).is_none());
    }
}

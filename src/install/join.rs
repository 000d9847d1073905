// src/install/join.rs

//! Cluster join tokens
//!
//! A token is base64-encoded YAML naming the server to join, its node token
//! and an optional admin kubeconfig. The literal `none` means "do not join".

use crate::error::{Error, Result};
use crate::package::JoinConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinToken {
    pub server: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_config: String,
}

impl JoinToken {
    /// Decode a token as entered by the user
    pub fn decode(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return Ok(None);
        }

        let yaml = STANDARD
            .decode(raw)
            .map_err(|e| Error::Config(format!("invalid join token: {}", e)))?;
        let token: JoinToken = serde_yaml::from_slice(&yaml)
            .map_err(|e| Error::Config(format!("invalid join token: {}", e)))?;

        if token.server.is_empty() || token.token.is_empty() {
            return Err(Error::Config(
                "invalid join token: server and token are required".to_string(),
            ));
        }
        Ok(Some(token))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_yaml::to_string(self)?))
    }

    pub fn join_config(&self) -> JoinConfig {
        JoinConfig {
            server: self.server.clone(),
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_means_no_join() {
        assert_eq!(JoinToken::decode("none").unwrap(), None);
        assert_eq!(JoinToken::decode("  ").unwrap(), None);
    }

    #[test]
    fn test_decode() {
        let raw = STANDARD.encode("server: 10.0.0.1\ntoken: K10abc\nkubeConfig: |\n  apiVersion: v1\n");
        let token = JoinToken::decode(&raw).unwrap().unwrap();
        assert_eq!(token.server, "10.0.0.1");
        assert_eq!(token.token, "K10abc");
        assert_eq!(token.kube_config, "apiVersion: v1\n");
        assert_eq!(token.join_config().server, "10.0.0.1");
    }

    #[test]
    fn test_encode_decode() {
        let token = JoinToken {
            server: "primary.local".to_string(),
            token: "secret".to_string(),
            kube_config: String::new(),
        };
        assert_eq!(JoinToken::decode(&token.encode().unwrap()).unwrap(), Some(token));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(JoinToken::decode("!!!not-base64").is_err());
        let missing_server = STANDARD.encode("token: abc\n");
        assert!(JoinToken::decode(&missing_server).is_err());
    }
}

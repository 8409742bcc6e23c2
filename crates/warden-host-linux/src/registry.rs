//! Parser for `reg query` output listing registered servers

use thiserror::Error;
use warden_api::CredentialPair;

/// Registry key holding one subkey per registered server
pub const SERVERS_KEY: &str = r"HKLM\SOFTWARE\ITKey\Esme\servers";

/// Command listing every server's auth token
pub fn credentials_query() -> String {
    format!("reg query {} /s /v auth_token", SERVERS_KEY)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Server {0} has more than one auth_token")]
    DuplicateToken(String),

    #[error("auth_token value outside of a server key")]
    OrphanToken,
}

/// Parse `reg query` output into credential pairs in discovery order.
///
/// Keys without an `auth_token` value are skipped.
pub fn parse_credentials(output: &str) -> Result<Vec<CredentialPair>, RegistryError> {
    let mut pairs: Vec<CredentialPair> = Vec::new();
    let mut current: Option<(String, bool)> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("HKEY_") {
            let server_id = line.rsplit('\\').next().unwrap_or(line).to_string();
            current = Some((server_id, false));
            continue;
        }

        let mut fields = line.split_whitespace();
        let (Some("auth_token"), Some(kind), Some(token)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !kind.starts_with("REG_") {
            continue;
        }

        let Some((server_id, seen)) = current.as_mut() else {
            return Err(RegistryError::OrphanToken);
        };
        if *seen {
            return Err(RegistryError::DuplicateToken(server_id.clone()));
        }
        *seen = true;
        pairs.push(CredentialPair::new(server_id.as_str(), token));
    }

    Ok(pairs)
}

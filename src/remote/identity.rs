use std::{io::ErrorKind, path::Path};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

const AUTH_FILE: &str = "auth.json";

/// Stored login session. Present on disk while the user is logged in; local
/// data is kept regardless, logout only stops replication.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub server_url: String,
    pub user_id: String,
    pub token: Option<String>,
}

pub async fn load_session(data_dir: &Path) -> Result<Option<AuthSession>> {
    let path = data_dir.join(AUTH_FILE);
    let contents = match tokio::fs::read(&path).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&contents) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            warn!("Corrupt session at {path:?}, treating as logged out: {e}");
            Ok(None)
        }
    }
}

pub async fn save_session(data_dir: &Path, session: &AuthSession) -> Result<()> {
    let path = data_dir.join(AUTH_FILE);
    tokio::fs::write(&path, serde_json::to_vec(session)?).await?;
    Ok(())
}

pub async fn clear_session(data_dir: &Path) -> Result<()> {
    match tokio::fs::remove_file(data_dir.join(AUTH_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

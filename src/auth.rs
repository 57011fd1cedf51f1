use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::prelude::*;

/// Directory where a DevZero workspace exposes its identity
pub const WORKSPACE_CONFIG_DIR: &str = "/etc/devzero/configs";
const TEAM_ID_FILE: &str = "DEVZERO_TEAM_ID";
const WORKSPACE_ID_FILE: &str = "DEVZERO_WORKSPACE_ID";

/// Identity attached to every batch sent to the remote collector.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl AuthContext {
    fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.team_id.is_none()
            && self.workspace_id.is_none()
            && self.user_email.is_none()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn read_identity_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => non_empty(Some(&content)),
        Err(e) => {
            trace!("Unable to read {}: {e}", path.display());
            None
        }
    }
}

/// Build the identity used for remote collection, `None` when remote collection is disabled or
/// no identifier could be found.
pub fn resolve_auth_context(remote: &RemoteConfig) -> Option<AuthContext> {
    resolve_auth_context_from(remote, Path::new(WORKSPACE_CONFIG_DIR))
}

fn resolve_auth_context_from(remote: &RemoteConfig, workspace_dir: &Path) -> Option<AuthContext> {
    if !remote.enabled {
        return None;
    }

    let auth = AuthContext {
        user_id: non_empty(remote.user_id.as_deref()),
        user_email: non_empty(remote.user_email.as_deref()),
        team_id: read_identity_file(&workspace_dir.join(TEAM_ID_FILE)),
        workspace_id: read_identity_file(&workspace_dir.join(WORKSPACE_ID_FILE)),
    };

    if auth.is_empty() {
        warn!("Remote collection is enabled but no identity could be resolved");
        return None;
    }
    debug!("Resolved remote identity: {auth:?}");
    Some(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_remote() -> RemoteConfig {
        RemoteConfig {
            enabled: true,
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn test_disabled_remote_has_no_identity() {
        let remote = RemoteConfig {
            user_id: Some("user-1".to_string()),
            ..RemoteConfig::default()
        };
        let tmp_dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_auth_context_from(&remote, tmp_dir.path()), None);
    }

    #[test]
    fn test_workspace_files_are_trimmed() {
        let tmp_dir = tempfile::tempdir().unwrap();
        fs::write(tmp_dir.path().join(TEAM_ID_FILE), "team-42\n").unwrap();
        fs::write(tmp_dir.path().join(WORKSPACE_ID_FILE), "  ws-7  ").unwrap();
        let remote = RemoteConfig {
            user_email: Some("alice@example.com".to_string()),
            ..enabled_remote()
        };

        let auth = resolve_auth_context_from(&remote, tmp_dir.path()).unwrap();
        assert_eq!(
            auth,
            AuthContext {
                user_id: None,
                team_id: Some("team-42".to_string()),
                workspace_id: Some("ws-7".to_string()),
                user_email: Some("alice@example.com".to_string()),
            }
        );
    }

    #[test]
    fn test_nothing_resolved() {
        let tmp_dir = tempfile::tempdir().unwrap();
        fs::write(tmp_dir.path().join(TEAM_ID_FILE), "\n").unwrap();
        let remote = RemoteConfig {
            user_id: Some("   ".to_string()),
            ..enabled_remote()
        };

        assert_eq!(resolve_auth_context_from(&remote, tmp_dir.path()), None);
    }

    #[test]
    fn test_serialization_skips_missing_fields() {
        let auth = AuthContext {
            user_id: Some("user-1".to_string()),
            ..AuthContext::default()
        };
        assert_eq!(
            serde_json::to_string(&auth).unwrap(),
            r#"{"userId":"user-1"}"#
        );
    }
}

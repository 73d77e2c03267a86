//! Membership and channel-type lookups.
//!
//! The voice core trusts whatever this answers; every lookup is awaited
//! before the hub is touched so no lock is ever held across it.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use async_trait::async_trait;
use lib_common_kodama::types::{AuthError, ChannelId, ChannelKind, ServerId, UserId};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub server_id: ServerId,
    pub kind: ChannelKind,
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel(&self, channel_id: ChannelId) -> Option<ChannelInfo>;

    async fn is_member(&self, user_id: UserId, server_id: ServerId) -> bool;

    async fn channel_type(&self, channel_id: ChannelId) -> ChannelKind {
        self.channel(channel_id)
            .await
            .map_or(ChannelKind::Unknown, |info| info.kind)
    }
}

/// Check that `user_id` may join `channel_id` for voice. When the caller
/// names a server, the channel has to belong to it and membership is checked
/// first.
pub async fn authorize_voice(
    directory: &dyn ChannelDirectory,
    user_id: UserId,
    server_id: Option<ServerId>,
    channel_id: ChannelId,
) -> Result<ChannelInfo, AuthError> {
    if let Some(server_id) = server_id {
        if !directory.is_member(user_id, server_id).await {
            return Err(AuthError::NotAMember);
        }
    }
    let info = directory
        .channel(channel_id)
        .await
        .filter(|info| server_id.is_none_or(|id| id == info.server_id))
        .ok_or(AuthError::ChannelNotFound)?;
    if server_id.is_none() && !directory.is_member(user_id, info.server_id).await {
        return Err(AuthError::NotAMember);
    }
    if info.kind != ChannelKind::Voice {
        return Err(AuthError::NotAVoiceChannel);
    }
    Ok(info)
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("cannot open directory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed directory file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("channel {0} is declared more than once")]
    DuplicateChannel(ChannelId),
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: ServerId,
    #[serde(default)]
    members: Vec<UserId>,
    #[serde(default)]
    channels: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    id: ChannelId,
    kind: ChannelKind,
}

/// In-memory directory read once from YAML.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    channels: HashMap<ChannelId, ChannelInfo>,
    members: HashSet<(ServerId, UserId)>,
}

impl StaticDirectory {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let file = File::open(path)?;
        let parsed: DirectoryFile = serde_yaml::from_reader(BufReader::new(file))?;
        Self::from_file(parsed)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, DirectoryError> {
        Self::from_file(serde_yaml::from_str(yaml)?)
    }

    fn from_file(file: DirectoryFile) -> Result<Self, DirectoryError> {
        let mut directory = Self::default();
        for server in file.servers {
            for user_id in server.members {
                directory.members.insert((server.id, user_id));
            }
            for channel in server.channels {
                let info = ChannelInfo {
                    server_id: server.id,
                    kind: channel.kind,
                };
                if directory.channels.insert(channel.id, info).is_some() {
                    return Err(DirectoryError::DuplicateChannel(channel.id));
                }
            }
        }
        tracing::info!(
            channels = directory.channels.len(),
            memberships = directory.members.len(),
            "Loaded channel directory"
        );
        Ok(directory)
    }
}

#[async_trait]
impl ChannelDirectory for StaticDirectory {
    async fn channel(&self, channel_id: ChannelId) -> Option<ChannelInfo> {
        self.channels.get(&channel_id).copied()
    }

    async fn is_member(&self, user_id: UserId, server_id: ServerId) -> bool {
        self.members.contains(&(server_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
servers:
  - id: 1
    members: [10, 11]
    channels:
      - { id: 7, kind: voice }
      - { id: 8, kind: text }
  - id: 2
    members: [12]
"#;

    #[tokio::test]
    async fn answers_membership_and_channel_type() {
        let directory = StaticDirectory::from_yaml(YAML).unwrap();
        assert!(directory.is_member(10, 1).await);
        assert!(!directory.is_member(12, 1).await);
        assert_eq!(directory.channel_type(7).await, ChannelKind::Voice);
        assert_eq!(directory.channel_type(8).await, ChannelKind::Text);
        assert_eq!(directory.channel_type(99).await, ChannelKind::Unknown);
        assert_eq!(directory.channel(7).await.unwrap().server_id, 1);
    }

    #[tokio::test]
    async fn voice_authorization_checks_membership_then_channel() {
        let directory = StaticDirectory::from_yaml(YAML).unwrap();
        let dir: &dyn ChannelDirectory = &directory;

        assert_eq!(authorize_voice(dir, 10, Some(1), 7).await.unwrap().server_id, 1);
        assert_eq!(authorize_voice(dir, 11, None, 7).await.unwrap().server_id, 1);
        assert_eq!(
            authorize_voice(dir, 12, Some(1), 99).await,
            Err(AuthError::NotAMember)
        );
        assert_eq!(
            authorize_voice(dir, 12, Some(2), 7).await,
            Err(AuthError::ChannelNotFound)
        );
        assert_eq!(authorize_voice(dir, 12, None, 7).await, Err(AuthError::NotAMember));
        assert_eq!(
            authorize_voice(dir, 10, None, 99).await,
            Err(AuthError::ChannelNotFound)
        );
        assert_eq!(
            authorize_voice(dir, 10, Some(1), 8).await,
            Err(AuthError::NotAVoiceChannel)
        );
    }

    #[test]
    fn duplicate_channel_ids_are_rejected() {
        let yaml = r#"
servers:
  - id: 1
    channels: [{ id: 7, kind: voice }]
  - id: 2
    channels: [{ id: 7, kind: text }]
"#;
        assert!(matches!(
            StaticDirectory::from_yaml(yaml),
            Err(DirectoryError::DuplicateChannel(7))
        ));
    }
}

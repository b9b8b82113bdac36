//! Session settings
//!
//! What a session starts with: the profile it presents, whether it routes
//! through the relay, its privacy policy and an optional connect deadline.

use crate::message::SenderInfo;
use crate::privacy::PrivacyPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Longest nickname a peer may present
pub const MAX_NICKNAME_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsError {
    #[error("Nickname must not be empty")]
    EmptyNickname,

    #[error("Nickname too long: {0} characters (max {MAX_NICKNAME_LEN})")]
    NicknameTooLong(usize),

    #[error("Connect timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub nickname: String,
    pub avatar_ref: Option<String>,
    /// Route through the directory's relay and hide our address
    pub anonymize: bool,
    pub privacy: PrivacyPolicy,
    /// Deadline for each connect attempt; unbounded when unset
    pub connect_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            avatar_ref: None,
            anonymize: false,
            privacy: PrivacyPolicy::default(),
            connect_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let nickname = self.nickname.trim();
        if nickname.is_empty() {
            return Err(SettingsError::EmptyNickname);
        }
        let len = nickname.chars().count();
        if len > MAX_NICKNAME_LEN {
            return Err(SettingsError::NicknameTooLong(len));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(SettingsError::ZeroTimeout);
        }
        Ok(())
    }

    /// The profile presented to remote peers
    pub fn profile(&self) -> SenderInfo {
        SenderInfo {
            nickname: self.nickname.trim().to_string(),
            avatar_ref: self.avatar_ref.clone(),
        }
    }
}

//! # Platform Client Boundary
//!
//! The chat platform is an external collaborator: the engine only talks to
//! it through [`PlatformClient`]. Every method suspends; failures surface
//! as [`PlatformError`] and are caught by the action wrapper so that a
//! flaky API call never kills a rule.
//!
//! [`RecordingClient`] is the in-process double used throughout the test
//! suites: it records every call and lets tests mark users as admins or
//! inject API failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("platform api error: {0}")]
    Api(String),
    #[error("platform permission denied: {0}")]
    PermissionDenied(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn is_admin(&self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMember {
    pub user_id: i64,
    pub status: MemberStatus,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError>;

    async fn reply(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError>;

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;

    /// Restrict a member (mute). `until` of `None` means indefinitely.
    async fn restrict(
        &self,
        chat_id: i64,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;

    async fn unrestrict(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError>;

    async fn ban(
        &self,
        chat_id: i64,
        user_id: i64,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;

    async fn kick(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError>;

    async fn get_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<ChatMember, PlatformError>;

    /// Hand the user over to the external human-verification subsystem.
    async fn start_verification(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError>;
}

/// One observed platform call, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    SendMessage { chat_id: i64, text: String },
    Reply { chat_id: i64, message_id: i64, text: String },
    Delete { chat_id: i64, message_id: i64 },
    Restrict { chat_id: i64, user_id: i64, until: Option<DateTime<Utc>> },
    Unrestrict { chat_id: i64, user_id: i64 },
    Ban { chat_id: i64, user_id: i64, reason: Option<String> },
    Kick { chat_id: i64, user_id: i64 },
    GetChatMember { chat_id: i64, user_id: i64 },
    StartVerification { chat_id: i64, user_id: i64 },
}

/// Test double that records calls instead of reaching a real platform.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<PlatformCall>>,
    member_status: DashMap<(i64, i64), MemberStatus>,
    fail_api: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, chat_id: i64, user_id: i64, status: MemberStatus) {
        self.member_status.insert((chat_id, user_id), status);
    }

    pub fn set_admin(&self, chat_id: i64, user_id: i64) {
        self.set_status(chat_id, user_id, MemberStatus::Administrator);
    }

    /// Make every subsequent call fail, to exercise adapter error paths.
    pub fn fail_api_calls(&self, fail: bool) {
        self.fail_api.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls excluding `get_chat_member`, which is a read, not an action.
    pub fn side_effects(&self) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, PlatformCall::GetChatMember { .. }))
            .collect()
    }

    fn record(&self, call: PlatformCall) -> Result<(), PlatformError> {
        if self.fail_api.load(Ordering::SeqCst) {
            return Err(PlatformError::Api("injected failure".to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for RecordingClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::SendMessage {
            chat_id,
            text: text.to_string(),
        })
    }

    async fn reply(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Reply {
            chat_id,
            message_id,
            text: text.to_string(),
        })
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        self.record(PlatformCall::Delete { chat_id, message_id })
    }

    async fn restrict(
        &self,
        chat_id: i64,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Restrict {
            chat_id,
            user_id,
            until,
        })
    }

    async fn unrestrict(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError> {
        self.record(PlatformCall::Unrestrict { chat_id, user_id })
    }

    async fn ban(
        &self,
        chat_id: i64,
        user_id: i64,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Ban {
            chat_id,
            user_id,
            reason: reason.map(str::to_string),
        })
    }

    async fn kick(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError> {
        self.record(PlatformCall::Kick { chat_id, user_id })
    }

    async fn get_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<ChatMember, PlatformError> {
        self.record(PlatformCall::GetChatMember { chat_id, user_id })?;
        let status = self
            .member_status
            .get(&(chat_id, user_id))
            .map(|s| *s)
            .unwrap_or(MemberStatus::Member);
        Ok(ChatMember { user_id, status })
    }

    async fn start_verification(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError> {
        self.record(PlatformCall::StartVerification { chat_id, user_id })
    }
}

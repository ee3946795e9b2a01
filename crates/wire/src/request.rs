// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed sum type over every inbound message type, decoded defensively
//! from a frame's `type` tag and JSON `payload` rather than crashing on a
//! shape mismatch.

use relay_core::{ConversationId, DeviceId, TokenKind, WorkGroupId, WorkerId};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestDecodeError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid payload for {0}: {1}")]
    InvalidPayload(String, serde_json::Error),
}

fn decode<T: for<'de> Deserialize<'de>>(
    frame_type: &str,
    payload: &Value,
) -> Result<T, RequestDecodeError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| RequestDecodeError::InvalidPayload(frame_type.to_string(), e))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticatePayload {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribePayload {
    #[serde(rename = "sessionId")]
    pub session_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetHighlightsPayload {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// `getServerSummary(tmuxSessions?)`'s wire counterpart. The daemon, not the
/// client, owns the live tmux session list, so the client can't hand one
/// over — instead `tmuxSessions` (default `true`) asks the daemon to apply
/// its own live-session filter; `{"tmuxSessions": false}` opts out and
/// returns every known conversation, matching the unfiltered legacy
/// behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct GetServerSummaryPayload {
    #[serde(rename = "tmuxSessions", default = "default_true")]
    pub filter_to_live_sessions: bool,
}

impl Default for GetServerSummaryPayload {
    fn default() -> Self {
        Self { filter_to_live_sessions: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionScopedPayload {
    #[serde(rename = "sessionId")]
    pub session_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchSessionPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    pub epoch: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendInputPayload {
    pub input: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendImagePayload {
    pub base64: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendWithImagesPayload {
    #[serde(rename = "imagePaths")]
    pub image_paths: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTmuxSessionPayload {
    pub name: Option<String>,
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    #[serde(rename = "startCli", default)]
    pub start_cli: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionNamePayload {
    #[serde(rename = "sessionName")]
    pub session_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecreateTmuxSessionPayload {
    #[serde(rename = "sessionName")]
    pub session_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorktreeSessionPayload {
    #[serde(rename = "parentDir")]
    pub parent_dir: String,
    pub branch: Option<String>,
    #[serde(rename = "startCli", default)]
    pub start_cli: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListWorktreesPayload {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTerminalOutputPayload {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub lines: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendTerminalKeysPayload {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseDirectoriesPayload {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathPayload {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPushPayload {
    #[serde(rename = "fcmToken")]
    pub fcm_token: String,
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
    #[serde(rename = "tokenType", default)]
    pub token_type: Option<TokenKind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceIdPayload {
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSessionMutedPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    pub muted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetNotificationHistoryPayload {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcknowledgeSessionPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSpawnSpec {
    #[serde(rename = "taskSlug")]
    pub task_slug: String,
    #[serde(rename = "taskDescription")]
    pub task_description: String,
    #[serde(rename = "planSection")]
    pub plan_section: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnWorkGroupPayload {
    pub name: String,
    #[serde(rename = "foremanSessionId")]
    pub foreman_session_id: ConversationId,
    #[serde(rename = "foremanTmuxSession")]
    pub foreman_tmux_session: String,
    #[serde(rename = "parentDir")]
    pub parent_dir: String,
    #[serde(rename = "planFile")]
    pub plan_file: Option<String>,
    pub workers: Vec<WorkerSpawnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkGroupIdPayload {
    #[serde(rename = "groupId")]
    pub group_id: WorkGroupId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryWorkerPayload {
    #[serde(rename = "groupId")]
    pub group_id: WorkGroupId,
    #[serde(rename = "workerId")]
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendWorkerInputPayload {
    #[serde(rename = "groupId")]
    pub group_id: WorkGroupId,
    #[serde(rename = "workerId")]
    pub worker_id: WorkerId,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetAutoApprovePayload {
    pub enabled: bool,
    #[serde(rename = "sessionId")]
    pub session_id: Option<ConversationId>,
}

/// One decoded inbound request. Variants with no payload fields (`Ping`,
/// `GetFull`, ...) carry nothing; everything else carries its typed payload
/// struct.
#[derive(Debug, Clone)]
pub enum Request {
    Authenticate { token: String, payload: AuthenticatePayload },
    Subscribe(SubscribePayload),
    Unsubscribe,
    GetHighlights(GetHighlightsPayload),
    GetFull,
    GetStatus,
    GetSessions,
    GetServerSummary(GetServerSummaryPayload),
    GetTasks(SessionScopedPayload),
    SwitchSession(SwitchSessionPayload),
    SendInput(SendInputPayload),
    SendImage(SendImagePayload),
    UploadImage(SendImagePayload),
    SendWithImages(SendWithImagesPayload),
    ListTmuxSessions,
    CreateTmuxSession(CreateTmuxSessionPayload),
    KillTmuxSession(SessionNamePayload),
    SwitchTmuxSession(SessionNamePayload),
    RecreateTmuxSession(RecreateTmuxSessionPayload),
    CreateWorktreeSession(CreateWorktreeSessionPayload),
    ListWorktrees(ListWorktreesPayload),
    GetTerminalOutput(GetTerminalOutputPayload),
    SendTerminalKeys(SendTerminalKeysPayload),
    BrowseDirectories(BrowseDirectoriesPayload),
    ReadFile(PathPayload),
    OpenInEditor(PathPayload),
    DownloadFile(PathPayload),
    RegisterPush(RegisterPushPayload),
    UnregisterPush(DeviceIdPayload),
    GetEscalationConfig,
    UpdateEscalationConfig(Value),
    GetPendingEvents,
    GetDevices,
    RemoveDevice(DeviceIdPayload),
    SetSessionMuted(SetSessionMutedPayload),
    GetMutedSessions,
    GetNotificationHistory(GetNotificationHistoryPayload),
    ClearNotificationHistory,
    SendTestNotification,
    AcknowledgeSession(AcknowledgeSessionPayload),
    SpawnWorkGroup(SpawnWorkGroupPayload),
    GetWorkGroups,
    GetWorkGroup(WorkGroupIdPayload),
    MergeWorkGroup(WorkGroupIdPayload),
    CancelWorkGroup(WorkGroupIdPayload),
    RetryWorker(RetryWorkerPayload),
    SendWorkerInput(SendWorkerInputPayload),
    DismissWorkGroup(WorkGroupIdPayload),
    Ping,
    RotateToken,
    GetToolConfig,
    GetUsage,
    SetAutoApprove(SetAutoApprovePayload),
    GetOrphanedWorktrees,
}

impl Request {
    /// Decode a `(frame_type, payload, token)` triple into a `Request`.
    /// `authenticate` is special-cased since its token travels on the frame
    /// itself, not inside `payload`, per the wire's frame shape.
    pub fn decode(frame_type: &str, payload: &Value, token: Option<&str>) -> Result<Request, RequestDecodeError> {
        Ok(match frame_type {
            "authenticate" => Request::Authenticate {
                token: token.unwrap_or_default().to_string(),
                payload: decode(frame_type, payload).unwrap_or_default(),
            },
            "subscribe" => Request::Subscribe(decode(frame_type, payload).unwrap_or_default()),
            "unsubscribe" => Request::Unsubscribe,
            "get_highlights" => Request::GetHighlights(decode(frame_type, payload).unwrap_or_default()),
            "get_full" => Request::GetFull,
            "get_status" => Request::GetStatus,
            "get_sessions" => Request::GetSessions,
            "get_server_summary" => {
                Request::GetServerSummary(decode(frame_type, payload).unwrap_or_default())
            }
            "get_tasks" => Request::GetTasks(decode(frame_type, payload).unwrap_or_default()),
            "switch_session" => Request::SwitchSession(decode(frame_type, payload)?),
            "send_input" => Request::SendInput(decode(frame_type, payload)?),
            "send_image" => Request::SendImage(decode(frame_type, payload)?),
            "upload_image" => Request::UploadImage(decode(frame_type, payload)?),
            "send_with_images" => Request::SendWithImages(decode(frame_type, payload)?),
            "list_tmux_sessions" => Request::ListTmuxSessions,
            "create_tmux_session" => Request::CreateTmuxSession(decode(frame_type, payload)?),
            "kill_tmux_session" => Request::KillTmuxSession(decode(frame_type, payload)?),
            "switch_tmux_session" => Request::SwitchTmuxSession(decode(frame_type, payload)?),
            "recreate_tmux_session" => {
                Request::RecreateTmuxSession(decode(frame_type, payload).unwrap_or_default())
            }
            "create_worktree_session" => Request::CreateWorktreeSession(decode(frame_type, payload)?),
            "list_worktrees" => Request::ListWorktrees(decode(frame_type, payload)?),
            "get_terminal_output" => Request::GetTerminalOutput(decode(frame_type, payload)?),
            "send_terminal_keys" => Request::SendTerminalKeys(decode(frame_type, payload)?),
            "browse_directories" => {
                Request::BrowseDirectories(decode(frame_type, payload).unwrap_or_default())
            }
            "read_file" => Request::ReadFile(decode(frame_type, payload)?),
            "open_in_editor" => Request::OpenInEditor(decode(frame_type, payload)?),
            "download_file" => Request::DownloadFile(decode(frame_type, payload)?),
            "register_push" => Request::RegisterPush(decode(frame_type, payload)?),
            "unregister_push" => Request::UnregisterPush(decode(frame_type, payload)?),
            "get_escalation_config" => Request::GetEscalationConfig,
            "update_escalation_config" => Request::UpdateEscalationConfig(payload.clone()),
            "get_pending_events" => Request::GetPendingEvents,
            "get_devices" => Request::GetDevices,
            "remove_device" => Request::RemoveDevice(decode(frame_type, payload)?),
            "set_session_muted" => Request::SetSessionMuted(decode(frame_type, payload)?),
            "get_muted_sessions" => Request::GetMutedSessions,
            "get_notification_history" => {
                Request::GetNotificationHistory(decode(frame_type, payload).unwrap_or_default())
            }
            "clear_notification_history" => Request::ClearNotificationHistory,
            "send_test_notification" => Request::SendTestNotification,
            "acknowledge_session" => Request::AcknowledgeSession(decode(frame_type, payload)?),
            "spawn_work_group" => Request::SpawnWorkGroup(decode(frame_type, payload)?),
            "get_work_groups" => Request::GetWorkGroups,
            "get_work_group" => Request::GetWorkGroup(decode(frame_type, payload)?),
            "merge_work_group" => Request::MergeWorkGroup(decode(frame_type, payload)?),
            "cancel_work_group" => Request::CancelWorkGroup(decode(frame_type, payload)?),
            "retry_worker" => Request::RetryWorker(decode(frame_type, payload)?),
            "send_worker_input" => Request::SendWorkerInput(decode(frame_type, payload)?),
            "dismiss_work_group" => Request::DismissWorkGroup(decode(frame_type, payload)?),
            "ping" => Request::Ping,
            "rotate_token" => Request::RotateToken,
            "get_tool_config" => Request::GetToolConfig,
            "get_usage" => Request::GetUsage,
            "set_auto_approve" => Request::SetAutoApprove(decode(frame_type, payload).unwrap_or_default()),
            "get_orphaned_worktrees" => Request::GetOrphanedWorktrees,
            other => return Err(RequestDecodeError::UnknownType(other.to_string())),
        })
    }

    /// Whether this request may be processed before authentication completes.
    /// Only `authenticate` itself qualifies; everything else must wait.
    pub fn is_pre_auth(&self) -> bool {
        matches!(self, Request::Authenticate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ping_with_null_payload() {
        let req = Request::decode("ping", &Value::Null, None).unwrap();
        assert!(matches!(req, Request::Ping));
    }

    #[test]
    fn decodes_authenticate_token_from_frame_not_payload() {
        let req = Request::decode("authenticate", &Value::Null, Some("t-abc")).unwrap();
        match req {
            Request::Authenticate { token, .. } => assert_eq!(token, "t-abc"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Request::decode("frobnicate", &Value::Null, None).unwrap_err();
        assert!(matches!(err, RequestDecodeError::UnknownType(t) if t == "frobnicate"));
    }

    #[test]
    fn send_input_requires_input_field() {
        let err = Request::decode("send_input", &json!({}), None).unwrap_err();
        assert!(matches!(err, RequestDecodeError::InvalidPayload(t, _) if t == "send_input"));
    }

    #[test]
    fn send_input_decodes_optional_session_id() {
        let req = Request::decode(
            "send_input",
            &json!({"input": "hello", "sessionId": "home-u-proj"}),
            None,
        )
        .unwrap();
        match req {
            Request::SendInput(p) => {
                assert_eq!(p.input, "hello");
                assert_eq!(p.session_id.unwrap().as_str(), "home-u-proj");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn spawn_work_group_decodes_nested_worker_specs() {
        let payload = json!({
            "name": "G",
            "foremanSessionId": "home-u-proj",
            "foremanTmuxSession": "companion-proj-ab12",
            "parentDir": "/repo",
            "workers": [
                {"taskSlug": "a", "taskDescription": "do a", "files": ["a.rs"]},
            ],
        });
        let req = Request::decode("spawn_work_group", &payload, None).unwrap();
        match req {
            Request::SpawnWorkGroup(p) => {
                assert_eq!(p.workers.len(), 1);
                assert_eq!(p.workers[0].task_slug, "a");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn acknowledge_session_decodes_session_id() {
        let req = Request::decode("acknowledge_session", &json!({"sessionId": "home-u-proj"}), None).unwrap();
        match req {
            Request::AcknowledgeSession(p) => assert_eq!(p.session_id.as_str(), "home-u-proj"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn is_pre_auth_only_true_for_authenticate() {
        assert!(Request::decode("authenticate", &Value::Null, Some("x")).unwrap().is_pre_auth());
        assert!(!Request::decode("ping", &Value::Null, None).unwrap().is_pre_auth());
    }
}

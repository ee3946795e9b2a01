//! Behavioral specifications for the relay daemon.
//!
//! These tests are black-box: they spawn the real `relayd` binary against an
//! isolated `RELAY_STATE_DIR`/`RELAY_LOGS_ROOT` and drive it over a real
//! WebSocket connection. See `tests/specs/prelude.rs` for the harness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

// hub/
#[path = "specs/hub/auth.rs"]
mod hub_auth;
#[path = "specs/hub/subscribe.rs"]
mod hub_subscribe;
#[path = "specs/hub/send_input.rs"]
mod hub_send_input;
#[path = "specs/hub/rotate_token.rs"]
mod hub_rotate_token;
#[path = "specs/hub/spawn_work_group.rs"]
mod hub_spawn_work_group;
#[path = "specs/hub/escalation.rs"]
mod hub_escalation;

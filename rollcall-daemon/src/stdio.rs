//! JSON-lines event source.
//!
//! Reads one [`Interaction`] per input line and writes one [`Outbound`]
//! record per line for every response and platform action. Useful for
//! local development and end-to-end tests; a chat-platform gateway would
//! sit in the same place.
//!
//! An interaction's response record always precedes its follow-ups.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_core::{ChannelId, GroupId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dispatch::Dispatcher;
use crate::interaction::{Interaction, InteractionResponse, InteractionToken, Message};
use crate::platform::{MemberActions, Messenger, PlatformError};

/// One output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Answer to an interaction; `null` when it was ignored.
    Response {
        token: InteractionToken,
        response: Option<InteractionResponse>,
    },
    FollowUp {
        token: InteractionToken,
        message: Message,
    },
    ChannelMessage {
        channel_id: ChannelId,
        message: Message,
    },
    RoleGranted {
        group_id: GroupId,
        user_id: UserId,
        role_id: RoleId,
    },
    RoleRevoked {
        group_id: GroupId,
        user_id: UserId,
        role_id: RoleId,
    },
    DisplayNameSet {
        group_id: GroupId,
        user_id: UserId,
        name: String,
    },
    /// An input line could not be parsed.
    Error { error: String },
}

/// Platform whose side effects are emitted as [`Outbound`] records.
///
/// Follow-ups for an interaction that has not been answered yet are held
/// until [`respond`](Self::respond) emits its response.
#[derive(Debug, Clone)]
pub struct JsonLinesPlatform {
    outbound: mpsc::UnboundedSender<Outbound>,
    unanswered: Arc<Mutex<HashMap<InteractionToken, Vec<Outbound>>>>,
}

impl JsonLinesPlatform {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            unanswered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hold follow-ups for `token` until it is answered.
    pub fn begin(&self, token: &InteractionToken) {
        self.unanswered.lock().entry(token.clone()).or_default();
    }

    /// Emit the response for `token`, then any follow-ups held for it.
    pub fn respond(&self, token: InteractionToken, response: Option<InteractionResponse>) {
        let mut unanswered = self.unanswered.lock();
        let held = unanswered.remove(&token).unwrap_or_default();
        let _ = self.emit(Outbound::Response { token, response });
        for record in held {
            let _ = self.emit(record);
        }
    }

    fn emit(&self, record: Outbound) -> Result<(), PlatformError> {
        self.outbound
            .send(record)
            .map_err(|_| PlatformError::Unavailable)
    }
}

#[async_trait]
impl MemberActions for JsonLinesPlatform {
    async fn grant_role(&self, group: GroupId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        self.emit(Outbound::RoleGranted {
            group_id: group,
            user_id: user,
            role_id: role,
        })
    }

    async fn revoke_role(&self, group: GroupId, user: UserId, role: RoleId) -> Result<(), PlatformError> {
        self.emit(Outbound::RoleRevoked {
            group_id: group,
            user_id: user,
            role_id: role,
        })
    }

    async fn set_display_name(&self, group: GroupId, user: UserId, name: &str) -> Result<(), PlatformError> {
        self.emit(Outbound::DisplayNameSet {
            group_id: group,
            user_id: user,
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Messenger for JsonLinesPlatform {
    async fn follow_up(&self, token: &InteractionToken, message: &Message) -> Result<(), PlatformError> {
        let record = Outbound::FollowUp {
            token: token.clone(),
            message: message.clone(),
        };
        let mut unanswered = self.unanswered.lock();
        match unanswered.get_mut(token) {
            Some(held) => {
                if self.outbound.is_closed() {
                    return Err(PlatformError::Unavailable);
                }
                held.push(record);
                Ok(())
            }
            None => self.emit(record),
        }
    }

    async fn send(&self, channel: ChannelId, message: &Message) -> Result<(), PlatformError> {
        self.emit(Outbound::ChannelMessage {
            channel_id: channel,
            message: message.clone(),
        })
    }
}

/// Read interactions from `reader` until EOF or `shutdown`, dispatching each
/// on its own task and answering through `platform`. Waits for in-flight
/// interactions before returning the number of interactions accepted.
pub async fn serve<R>(
    reader: R,
    dispatcher: Dispatcher,
    platform: JsonLinesPlatform,
    shutdown: CancellationToken,
) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let tracker = TaskTracker::new();
    let mut lines = reader.lines();
    let mut accepted = 0;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, no longer accepting interactions");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::debug!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let interaction: Interaction = match serde_json::from_str(&line) {
            Ok(interaction) => interaction,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid interaction line");
                let _ = platform.emit(Outbound::Error {
                    error: format!("invalid interaction: {e}"),
                });
                continue;
            }
        };
        accepted += 1;

        let dispatcher = dispatcher.clone();
        let platform = platform.clone();
        platform.begin(&interaction.token);
        tracker.spawn(async move {
            let token = interaction.token.clone();
            let response = dispatcher.dispatch(interaction).await;
            platform.respond(token, response);
        });
    }

    tracker.close();
    tracker.wait().await;
    Ok(accepted)
}

/// Write records from `records` to `writer` until every sender is dropped.
pub async fn write_outbound<W>(
    mut records: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(record) = records.recv().await {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_platform_emits_records() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let platform = JsonLinesPlatform::new(tx);

        platform
            .grant_role(GroupId(1), UserId(2), RoleId(3))
            .await
            .unwrap();
        platform
            .set_display_name(GroupId(1), UserId(2), "Ada (she/her)")
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::RoleGranted {
                group_id: GroupId(1),
                user_id: UserId(2),
                role_id: RoleId(3),
            })
        );
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::DisplayNameSet { name, .. }) if name == "Ada (she/her)"
        ));
    }

    #[tokio::test]
    async fn test_follow_up_waits_for_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let platform = JsonLinesPlatform::new(tx);
        let token = InteractionToken::new("t1");

        platform.begin(&token);
        platform
            .follow_up(&token, &Message::verify_prompt())
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        platform.respond(token.clone(), Some(InteractionResponse::Deferred));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Response {
                token: token.clone(),
                response: Some(InteractionResponse::Deferred),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::FollowUp {
                token: token.clone(),
                message: Message::verify_prompt(),
            }
        );

        // Answered interactions are followed up directly
        platform.follow_up(&token, &Message::internal_error()).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(Outbound::FollowUp { .. })));
    }

    #[tokio::test]
    async fn test_closed_output_is_unavailable() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let platform = JsonLinesPlatform::new(tx);

        let err = platform
            .send(ChannelId(1), &Message::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable));
    }

    #[tokio::test]
    async fn test_write_outbound_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Outbound::Error {
            error: "bad".into(),
        })
        .unwrap();
        tx.send(Outbound::Response {
            token: InteractionToken::new("t"),
            response: Some(InteractionResponse::Pong),
        })
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_outbound(rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"error","error":"bad"}"#);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "response");
        assert_eq!(second["response"]["type"], "pong");
    }
}

//! Interaction events and responses exchanged with the event source.

use std::fmt;

use rollcall_auth::{EmailHosts, Pin};
use rollcall_core::{
    ChannelId, GroupId, PendingSubmission, RoleId, UserId, INTERNAL_ERROR_MESSAGE,
};
use serde::{Deserialize, Serialize};

/// Prefix of every user-facing error message.
pub const ERROR_PREFIX: &str = "⚠️ **Error:** ";

/// Message sent after the confirmation email went out.
pub const VERIFY_PIN_MESSAGE: &str = "We've sent a confirmation email containing a PIN code. \
     Press the button below and enter the PIN to finish registering.";

// ============================================================================
// Events
// ============================================================================

/// Opaque handle used to follow up on an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionToken(pub String);

impl InteractionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InteractionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One user action delivered by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub token: InteractionToken,
    pub group_id: GroupId,
    pub user_id: UserId,
    /// Whether the sender holds administrator permission in the group.
    #[serde(default)]
    pub is_admin: bool,
    pub kind: InteractionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionKind {
    Ping,
    /// The "Register" button under the registration prompt.
    RegisterButton,
    /// The "Verify" button under the confirmation follow-up.
    VerifyButton,
    /// The registration form was submitted.
    RegistrationForm(PendingSubmission),
    /// The PIN form was submitted.
    PinForm { pin: String },
    /// An administrator slash command.
    Command(AdminCommand),
}

impl InteractionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::RegisterButton => "register_button",
            Self::VerifyButton => "verify_button",
            Self::RegistrationForm(_) => "registration_form",
            Self::PinForm { .. } => "pin_form",
            Self::Command(_) => "command",
        }
    }
}

/// Administrator commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Enable registration and post the prompt into `channel_id`.
    InitRegistration {
        channel_id: ChannelId,
        role_id: RoleId,
        #[serde(default)]
        registered_message: Option<String>,
        #[serde(default)]
        admin_channel_id: Option<ChannelId>,
    },
    /// Disable registration and forget all member records.
    ClearRegistration,
    SetAdminChannel {
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },
    QueryMember {
        user_id: UserId,
    },
    UnregisterMember {
        user_id: UserId,
    },
    ResetName {
        user_id: UserId,
    },
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonId {
    Register,
    VerifyPin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: ButtonId,
    pub label: String,
}

/// A chat message. Ephemeral messages are visible to the recipient only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    pub ephemeral: bool,
}

impl Message {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            buttons: Vec::new(),
            ephemeral: true,
        }
    }

    pub fn error(reason: impl fmt::Display) -> Self {
        Self::text(format!("{ERROR_PREFIX}{reason}"))
    }

    pub fn internal_error() -> Self {
        Self::error(INTERNAL_ERROR_MESSAGE)
    }

    pub fn with_button(mut self, id: ButtonId, label: impl Into<String>) -> Self {
        self.buttons.push(Button {
            id,
            label: label.into(),
        });
        self
    }

    /// Make the message visible to everyone in the channel.
    pub fn public(mut self) -> Self {
        self.ephemeral = false;
        self
    }

    /// Channel message carrying the "Register" button.
    pub fn register_prompt() -> Self {
        Self::text("Press the button below to register as a member.")
            .with_button(ButtonId::Register, "Register")
            .public()
    }

    /// Follow-up asking the user to enter their PIN.
    pub fn verify_prompt() -> Self {
        Self::text(VERIFY_PIN_MESSAGE).with_button(ButtonId::VerifyPin, "Enter PIN")
    }

    pub fn is_error(&self) -> bool {
        self.content.starts_with(ERROR_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalId {
    Register,
    VerifyPin,
}

/// A single text input of a modal form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<u16>,
}

impl TextField {
    fn new(id: &str, label: &str, required: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            placeholder: None,
            value: None,
            required,
            max_len: None,
        }
    }

    fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    fn value(mut self, value: &str) -> Self {
        if !value.is_empty() {
            self.value = Some(value.into());
        }
        self
    }

    fn max_len(mut self, max_len: u16) -> Self {
        self.max_len = Some(max_len);
        self
    }
}

/// A modal form shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modal {
    pub id: ModalId,
    pub title: String,
    pub fields: Vec<TextField>,
}

impl Modal {
    /// The registration form, pre-filled from an earlier submission.
    pub fn registration(hosts: &EmailHosts, prefill: Option<&PendingSubmission>) -> Self {
        let empty = PendingSubmission::default();
        let prefill = prefill.unwrap_or(&empty);

        let email_hint = if hosts.is_empty() {
            "you@example.com".to_string()
        } else {
            format!("{hosts} only")
        };

        Self {
            id: ModalId::Register,
            title: "Register".into(),
            fields: vec![
                TextField::new("email", "Email", true)
                    .placeholder(email_hint)
                    .value(&prefill.email),
                TextField::new("first_name", "First Name", true)
                    .value(&prefill.first_name)
                    .max_len(64),
                TextField::new("last_name", "Last Name (optional)", false)
                    .value(&prefill.last_name)
                    .max_len(64),
                TextField::new("pronouns", "Pronouns (optional)", false)
                    .placeholder("he/him, she/her, they/them, or any")
                    .value(&prefill.pronouns)
                    .max_len(32),
            ],
        }
    }

    /// The PIN entry form.
    pub fn pin_entry() -> Self {
        Self {
            id: ModalId::VerifyPin,
            title: "Verify Email".into(),
            fields: vec![TextField::new("pin", "PIN code", true)
                .placeholder(Pin::INVALID.to_string())
                .max_len(4)],
        }
    }
}

/// Immediate answer to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionResponse {
    Pong,
    Message(Message),
    Modal(Modal),
    /// Acknowledged; the real answer arrives as a follow-up.
    Deferred,
}

impl From<Message> for InteractionResponse {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Modal> for InteractionResponse {
    fn from(modal: Modal) -> Self {
        Self::Modal(modal)
    }
}

//! Input state for the message box and the edit dialog.

use shared::domain::MessageId;

/// The message input. Disabled while a send is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    draft: String,
    sending: bool,
    focused: bool,
}

impl Composer {
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_enabled(&self) -> bool {
        !self.sending
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Ignored while the input is disabled.
    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        if self.sending {
            return false;
        }
        self.draft = text.into();
        true
    }

    /// Takes the trimmed draft and disables the input. `None` for blank drafts
    /// or when a send is already in flight; the draft is left as typed then.
    pub fn begin_submit(&mut self) -> Option<String> {
        if self.sending {
            return None;
        }
        let content = self.draft.trim();
        if content.is_empty() {
            return None;
        }
        let content = content.to_string();
        self.draft.clear();
        self.sending = true;
        self.focused = false;
        Some(content)
    }

    /// Re-enables and refocuses the input whatever the send outcome was.
    /// The submitted text is not put back.
    pub fn finish_submit(&mut self) {
        self.sending = false;
        self.focused = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    message_id: MessageId,
    draft: String,
    saving: bool,
}

impl EditSession {
    pub fn new(message_id: MessageId, content: impl Into<String>) -> Self {
        Self {
            message_id,
            draft: content.into(),
            saving: false,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        if self.saving {
            return false;
        }
        self.draft = text.into();
        true
    }

    pub fn begin_save(&mut self) -> Option<String> {
        if self.saving {
            return None;
        }
        let content = self.draft.trim();
        if content.is_empty() {
            return None;
        }
        let content = content.to_string();
        self.saving = true;
        Some(content)
    }

    /// Re-enables save; the draft is kept so a failed save can be retried.
    pub fn finish_save(&mut self) {
        self.saving = false;
    }
}

use crate::audio::Base64EncodedAudioBytes;
use crate::session::{ResponseConfig, Session};
use crate::Item;

macro_rules! event_id_accessors {
    ($($event:ty),* $(,)?) => {
        $(
            impl $event {
                pub fn with_event_id(mut self, event_id: &str) -> Self {
                    self.event_id = Some(event_id.to_string());
                    self
                }

                pub fn event_id(&self) -> Option<&str> {
                    self.event_id.as_deref()
                }
            }
        )*
    };
}

event_id_accessors!(
    SessionUpdateEvent,
    InputAudioBufferAppendEvent,
    InputAudioBufferCommitEvent,
    InputAudioBufferClearEvent,
    ConversationItemCreateEvent,
    ConversationItemTruncateEvent,
    ConversationItemDeleteEvent,
    ResponseCreateEvent,
    ResponseCancelEvent,
);

/// `session.update` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The session configuration to update
    session: Session,
}

impl SessionUpdateEvent {
    pub fn new(session: Session) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// `input_audio_buffer.append` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferAppendEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The audio data to append to the buffer
    audio: Base64EncodedAudioBytes,
}

impl InputAudioBufferAppendEvent {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            event_id: None,
            audio,
        }
    }

    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }
}

/// `input_audio_buffer.commit` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommitEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferCommitEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `input_audio_buffer.clear` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferClearEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferClearEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `conversation.item.create` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the preceding item after which the new item will be inserted.
    /// Serialized as `null` when unset, which appends to the conversation.
    pub previous_item_id: Option<String>,
    /// The item to add to the conversation
    pub item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn with_previous_item_id(mut self, previous_item_id: &str) -> Self {
        self.previous_item_id = Some(previous_item_id.to_string());
        self
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `conversation.item.truncate` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemTruncateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the assistant message item to truncate.
    pub item_id: String,
    /// The index of the content part to truncate
    pub content_index: i32,
    /// inclusive duration up to which audio is truncated, in milliseconds
    pub audio_end_ms: i32,
}

impl ConversationItemTruncateEvent {
    pub fn new(item_id: &str, content_index: i32, audio_end_ms: i32) -> Self {
        Self {
            event_id: None,
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms,
        }
    }
}

/// `conversation.item.delete` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemDeleteEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the item to delete
    pub item_id: String,
}

impl ConversationItemDeleteEvent {
    pub fn new(item_id: &str) -> Self {
        Self {
            event_id: None,
            item_id: item_id.to_string(),
        }
    }
}

/// `response.create` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Configuration for the response
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ResponseConfig>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = Some(response);
        self
    }

    pub fn response(&self) -> Option<&ResponseConfig> {
        self.response.as_ref()
    }
}

/// `response.cancel` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCancelEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl ResponseCancelEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

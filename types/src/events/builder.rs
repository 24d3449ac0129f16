//! Ready-made outbound events with the relay's fixed defaults.
//!
//! Every builder stamps a fresh [`event_id`]. Ids are opaque: nothing
//! correlates them with the server's replies.

use crate::audio::{AudioFormat, Base64EncodedAudioBytes, ServerVadTurnDetection, TranscriptionModel, TurnDetection, Voice};
use crate::events::ClientEvent;
use crate::events::client::{
    ConversationItemCreateEvent, ConversationItemTruncateEvent, ResponseCreateEvent, SessionUpdateEvent,
};
use crate::session::{MaxOutputTokens, ResponseConfig, Session, SessionCreateRequest};
use crate::tools::{FunctionTool, Tool, ToolChoice};
use crate::{Item, MessageItem, MessageRole};

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";
pub const DEFAULT_RESPONSE_INSTRUCTIONS: &str = "Please assist the user.";
pub const DEFAULT_VOICE: Voice = Voice::Sage;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_MAX_OUTPUT_TOKENS: i32 = 1024;

/// A fresh 32 character lowercase hex token.
pub fn event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `session.update` carrying the full default session.
pub fn session_update() -> ClientEvent {
    let turn_detection = TurnDetection::ServerVad(
        ServerVadTurnDetection::default()
            .with_threshold(0.5)
            .with_prefix_padding_ms(300)
            .with_silence_duration_ms(500)
            .with_create_response(true),
    );

    let session = Session::new()
        .with_modalities_enable_audio()
        .with_instructions(DEFAULT_INSTRUCTIONS)
        .with_voice(DEFAULT_VOICE)
        .with_input_audio_format(AudioFormat::Pcm16)
        .with_output_audio_format(AudioFormat::Pcm16)
        .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
        .with_turn_detection_enable(turn_detection)
        .with_tools(vec![weather_tool()])
        .with_tool_choice(ToolChoice::Auto)
        .with_temperature(DEFAULT_TEMPERATURE)
        .with_max_output_tokens(MaxOutputTokens::inf())
        .build();

    ClientEvent::SessionUpdate(SessionUpdateEvent::new(session).with_event_id(&event_id()))
}

/// The body posted to the session issuance endpoint.
pub fn session_create_request(model: &str) -> SessionCreateRequest {
    let session = Session::new()
        .with_modalities_enable_audio()
        .with_instructions(DEFAULT_INSTRUCTIONS)
        .with_input_audio_format(AudioFormat::Pcm16)
        .with_output_audio_format(AudioFormat::Pcm16)
        .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
        .build();

    SessionCreateRequest::new(model, session)
}

/// `conversation.item.create` with a single user text entry.
pub fn create_item(text: &str) -> ClientEvent {
    let message = MessageItem::builder()
        .with_id(&event_id())
        .with_role(MessageRole::User)
        .with_input_text(text)
        .build();

    ClientEvent::ConversationItemCreate(
        ConversationItemCreateEvent::new(Item::Message(message)).with_event_id(&event_id()),
    )
}

/// A user audio item along with the ids the caller reports back.
#[derive(Debug, Clone)]
pub struct AudioItem {
    pub event_id: String,
    pub item_id: String,
    pub event: ClientEvent,
}

/// `conversation.item.create` with a single base64 pcm16 audio entry.
pub fn create_audio_item(audio: Base64EncodedAudioBytes) -> AudioItem {
    let event_id = event_id();
    let item_id = self::event_id();

    let message = MessageItem::builder()
        .with_id(&item_id)
        .with_role(MessageRole::User)
        .with_input_audio(audio)
        .build();

    let event = ClientEvent::ConversationItemCreate(
        ConversationItemCreateEvent::new(Item::Message(message)).with_event_id(&event_id),
    );

    AudioItem {
        event_id,
        item_id,
        event,
    }
}

/// `response.create` with the default audio+text response settings.
pub fn create_response() -> ClientEvent {
    let response = ResponseConfig::default()
        .with_modalities_enable_audio()
        .with_instructions(DEFAULT_RESPONSE_INSTRUCTIONS)
        .with_voice(DEFAULT_VOICE)
        .with_output_audio_format(AudioFormat::Pcm16)
        .with_tools(vec![sum_tool()])
        .with_tool_choice(ToolChoice::Auto)
        .with_temperature(DEFAULT_TEMPERATURE)
        .with_max_output_tokens(MaxOutputTokens::Number(DEFAULT_MAX_OUTPUT_TOKENS));

    ClientEvent::ResponseCreate(ResponseCreateEvent::new().with_response(response).with_event_id(&event_id()))
}

/// `response.create` asking for a text-only answer to `message`.
pub fn text_response(message: &str) -> ClientEvent {
    ClientEvent::ResponseCreate(
        ResponseCreateEvent::new()
            .with_response(ResponseConfig::text_only(message))
            .with_event_id(&event_id()),
    )
}

/// `conversation.item.truncate` on the first content part of `item_id`.
pub fn truncate(item_id: &str, audio_end_ms: i32) -> ClientEvent {
    ClientEvent::ConversationItemTruncate(
        ConversationItemTruncateEvent::new(item_id, 0, audio_end_ms).with_event_id(&event_id()),
    )
}

fn weather_tool() -> Tool {
    Tool::Function(FunctionTool::new(
        "get_weather",
        "Get the current weather for a location.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": { "type": "string" }
            },
            "required": ["location"]
        }),
    ))
}

fn sum_tool() -> Tool {
    Tool::Function(FunctionTool::new(
        "calculate_sum",
        "Calculates the sum of two numbers.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        }),
    ))
}

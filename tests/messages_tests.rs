// Wire format tests for the realtime protocol messages

use duplex_voice::codec;
use duplex_voice::transport::messages::{
    Content, GenerationConfig, RealtimeInput, SetupMessage,
};
use duplex_voice::transport::{ClientMessage, ServerMessage};
use serde_json::json;

#[test]
fn test_setup_message_shape() {
    let setup = ClientMessage::Setup(SetupMessage {
        model: "models/live-audio".to_string(),
        system_instruction: Some(Content::text("Be brief.")),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: None,
        },
    });

    let value = serde_json::to_value(&setup).unwrap();

    assert_eq!(
        value,
        json!({
            "setup": {
                "model": "models/live-audio",
                "systemInstruction": {"parts": [{"text": "Be brief."}]},
                "generationConfig": {"responseModalities": ["AUDIO"]}
            }
        })
    );
}

#[test]
fn test_setup_without_instructions_omits_field() {
    let setup = ClientMessage::Setup(SetupMessage {
        model: "m".to_string(),
        system_instruction: None,
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: None,
        },
    });

    let value = serde_json::to_value(&setup).unwrap();
    assert!(value["setup"].get("systemInstruction").is_none());
}

#[test]
fn test_realtime_input_shape() {
    let message = ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![codec::encode(&[0.0, 0.5])],
    });

    let value = serde_json::to_value(&message).unwrap();
    let chunk = &value["realtimeInput"]["mediaChunks"][0];

    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(
        codec::decode(chunk["data"].as_str().unwrap()).unwrap().len(),
        2
    );
}

#[test]
fn test_parse_audio_and_turn_complete() {
    let raw = json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    {"text": "thinking"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"inlineData": {"mimeType": "image/png", "data": "AAA="}}
                ]
            },
            "turnComplete": true
        }
    });

    let message: ServerMessage = serde_json::from_value(raw).unwrap();

    let audio: Vec<_> = message.audio_parts().collect();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].mime_type, "audio/pcm;rate=24000");
    assert!(message.is_turn_complete());
    assert!(!message.is_interrupted());
}

#[test]
fn test_parse_interrupted() {
    let message: ServerMessage =
        serde_json::from_str(r#"{"serverContent": {"interrupted": true}}"#).unwrap();

    assert!(message.is_interrupted());
    assert_eq!(message.audio_parts().count(), 0);
}

#[test]
fn test_parse_setup_complete_and_go_away() {
    let setup: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
    assert!(setup.setup_complete.is_some());
    assert!(setup.server_content.is_none());

    let go_away: ServerMessage =
        serde_json::from_str(r#"{"goAway": {"timeLeft": "10s"}}"#).unwrap();
    assert_eq!(
        go_away.go_away.unwrap().time_left.as_deref(),
        Some("10s")
    );
}

#[test]
fn test_parse_transcriptions() {
    let message: ServerMessage = serde_json::from_str(
        r#"{"serverContent": {
            "inputTranscription": {"text": "hello"},
            "outputTranscription": {"text": "hi there"}
        }}"#,
    )
    .unwrap();

    let content = message.server_content.unwrap();
    assert_eq!(content.input_transcription.unwrap().text, "hello");
    assert_eq!(content.output_transcription.unwrap().text, "hi there");
}

#[test]
fn test_unknown_fields_are_ignored() {
    let message: ServerMessage = serde_json::from_str(
        r#"{"usageMetadata": {"totalTokenCount": 12}, "serverContent": {"generationComplete": true}}"#,
    )
    .unwrap();

    assert!(!message.is_turn_complete());
}

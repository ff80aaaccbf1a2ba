//! HTTP contract tests for the provider gateway against mock vendor APIs.

use bytes::Bytes;
use palaver::config::{
    AzureConfig, DeepgramConfig, ElevenLabsConfig, GoogleConfig, GroqConfig, OpenAiConfig,
    ProvidersConfig, VoiceConfig,
};
use palaver::messages::AudioFormat;
use palaver::provider::fallback::ProviderChain;
use palaver::provider::{
    ProviderGateway, ProviderKind, SynthesizeOptions, TranscribeOptions,
};
use palaver::EngineError;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pcm_silence(ms: usize) -> Vec<u8> {
    vec![0u8; ms * 32]
}

async fn openai_gateway(server: &MockServer) -> ProviderGateway {
    let config = ProvidersConfig {
        openai: Some(OpenAiConfig {
            api_key: "sk-test".to_owned(),
            base_url: Some(format!("{}/v1", server.uri())),
            ..OpenAiConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    ProviderGateway::from_config(&config).expect("gateway")
}

#[tokio::test]
async fn openai_transcription_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "book a table for two",
            "language": "english",
            "duration": 1.8,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server).await;
    let transcript = gateway
        .transcribe(&pcm_silence(500), &TranscribeOptions::default())
        .await
        .expect("transcription");

    assert_eq!(transcript.text, "book a table for two");
    assert_eq!(transcript.duration_ms, Some(1800));
    assert_eq!(transcript.language.as_deref(), Some("english"));
}

#[tokio::test]
async fn openai_synthesis_contract() {
    let server = MockServer::start().await;
    let fake_mp3 = vec![0xFFu8, 0xFB, 0x90, 0x00, 1, 2, 3, 4];
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fake_mp3.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server).await;
    let speech = gateway
        .synthesize(
            "Your table is booked.",
            &SynthesizeOptions {
                voice: VoiceConfig::default(),
                ..SynthesizeOptions::default()
            },
        )
        .await
        .expect("synthesis");

    assert_eq!(speech.audio, Bytes::from(fake_mp3));
    assert_eq!(speech.format, AudioFormat::Mp3);
}

#[tokio::test]
async fn auth_failure_is_permanent_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server).await;
    let err = gateway
        .transcribe(&pcm_silence(100), &TranscribeOptions::default())
        .await
        .unwrap_err();

    match err {
        EngineError::ProviderUnavailable {
            provider,
            transient,
            ..
        } => {
            assert_eq!(provider, "openai");
            assert!(!transient);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_error_and_quota_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server).await;
    let err = gateway
        .synthesize("hi", &SynthesizeOptions::default())
        .await
        .unwrap_err();
    match err {
        EngineError::ProviderUnavailable { transient, .. } => assert!(transient),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn deepgram_transcription_reports_confidence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/listen"))
        .and(header("Authorization", "Token dg-test"))
        .and(query_param("model", "nova-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": { "duration": 2.1 },
            "results": {
                "channels": [{
                    "alternatives": [{
                        "transcript": "cancel my appointment",
                        "confidence": 0.94,
                    }]
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        default_stt: ProviderKind::Deepgram,
        deepgram: Some(DeepgramConfig {
            api_key: "dg-test".to_owned(),
            base_url: Some(server.uri()),
            ..DeepgramConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    let transcript = gateway
        .transcribe(&pcm_silence(500), &TranscribeOptions::default())
        .await
        .expect("transcription");
    assert_eq!(transcript.text, "cancel my appointment");
    assert!((transcript.confidence.unwrap() - 0.94).abs() < 1e-6);
    assert_eq!(transcript.duration_ms, Some(2100));
}

#[tokio::test]
async fn elevenlabs_synthesis_contract() {
    let server = MockServer::start().await;
    let audio = vec![9u8; 64];
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/21m00Tcm4TlvDq8ikWAM"))
        .and(header("xi-api-key", "el-test"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        default_tts: ProviderKind::ElevenLabs,
        elevenlabs: Some(ElevenLabsConfig {
            api_key: "el-test".to_owned(),
            base_url: Some(server.uri()),
            ..ElevenLabsConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    // "alloy" is not an ElevenLabs id, so the default voice is used.
    let speech = gateway
        .synthesize("Hello!", &SynthesizeOptions::default())
        .await
        .expect("synthesis");
    assert_eq!(speech.audio.len(), 64);
}

#[tokio::test]
async fn google_roundtrip_uses_base64() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speech:recognize"))
        .and(query_param("key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "alternatives": [{ "transcript": "what are your hours", "confidence": 0.9 }]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/text:synthesize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            // "audio-bytes" base64-encoded.
            "audioContent": "YXVkaW8tYnl0ZXM=",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        default_stt: ProviderKind::Google,
        default_tts: ProviderKind::Google,
        google: Some(GoogleConfig {
            api_key: "g-test".to_owned(),
            base_url: Some(server.uri()),
            ..GoogleConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    let transcript = gateway
        .transcribe(&pcm_silence(300), &TranscribeOptions::default())
        .await
        .expect("transcription");
    assert_eq!(transcript.text, "what are your hours");

    let speech = gateway
        .synthesize("We open at nine.", &SynthesizeOptions::default())
        .await
        .expect("synthesis");
    assert_eq!(speech.audio, Bytes::from_static(b"audio-bytes"));
}

#[tokio::test]
async fn azure_transcription_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/speech/recognition/conversation/cognitiveservices/v1"))
        .and(query_param("format", "detailed"))
        .and(header("Ocp-Apim-Subscription-Key", "az-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "RecognitionStatus": "Success",
            "Duration": 18_000_000u64,
            "NBest": [{ "Confidence": 0.88, "Display": "Transfer me to billing." }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        default_stt: ProviderKind::Azure,
        azure: Some(AzureConfig {
            api_key: "az-test".to_owned(),
            base_url: Some(server.uri()),
            ..AzureConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    let transcript = gateway
        .transcribe(&pcm_silence(500), &TranscribeOptions::default())
        .await
        .expect("transcription");
    assert_eq!(transcript.text, "Transfer me to billing.");
    assert!((transcript.confidence.unwrap() - 0.88).abs() < 1e-6);
    assert_eq!(transcript.duration_ms, Some(1800));
}

#[tokio::test]
async fn groq_transcription_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "yes that works",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        default_stt: ProviderKind::Groq,
        groq: Some(GroqConfig {
            api_key: "gsk-test".to_owned(),
            base_url: Some(format!("{}/openai/v1", server.uri())),
            ..GroqConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    let transcript = gateway
        .transcribe(&pcm_silence(200), &TranscribeOptions::default())
        .await
        .expect("transcription");
    assert_eq!(transcript.text, "yes that works");
}

/// Default provider down, fallback configured: the request succeeds via the
/// fallback and the caller sees `ProviderUnavailable` only transiently.
#[tokio::test]
async fn fallback_chain_recovers_from_unavailable_default() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&openai)
        .await;

    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/listen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {
                "channels": [{
                    "alternatives": [{ "transcript": "fallback worked", "confidence": 0.8 }]
                }]
            }
        })))
        .expect(1)
        .mount(&deepgram)
        .await;

    let config = ProvidersConfig {
        default_stt: ProviderKind::OpenAi,
        openai: Some(OpenAiConfig {
            api_key: "sk-test".to_owned(),
            base_url: Some(format!("{}/v1", openai.uri())),
            ..OpenAiConfig::default()
        }),
        deepgram: Some(DeepgramConfig {
            api_key: "dg-test".to_owned(),
            base_url: Some(deepgram.uri()),
            ..DeepgramConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    // Walk the chain the way the ingest pipeline does.
    let mut chain = ProviderChain::new(gateway.stt_chain(None));
    let audio = pcm_silence(300);
    let mut transient_failures = 0;
    let transcript = loop {
        let kind = chain.next_provider().expect("chain exhausted");
        let opts = TranscribeOptions {
            provider: Some(kind),
            ..TranscribeOptions::default()
        };
        match gateway.transcribe(&audio, &opts).await {
            Ok(t) => {
                chain.report_success(kind);
                break t;
            }
            Err(EngineError::ProviderUnavailable {
                transient, message, ..
            }) => {
                transient_failures += 1;
                chain.report_failure(kind, transient, &message);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    };

    assert_eq!(transcript.text, "fallback worked");
    assert!(transient_failures > 0, "default should have failed first");
}

#[tokio::test]
async fn rate_limited_provider_fails_transiently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "ok" })))
        .mount(&server)
        .await;

    let config = ProvidersConfig {
        openai: Some(OpenAiConfig {
            api_key: "sk-test".to_owned(),
            base_url: Some(format!("{}/v1", server.uri())),
            max_requests_per_minute: 1,
            ..OpenAiConfig::default()
        }),
        ..ProvidersConfig::default()
    };
    let gateway = ProviderGateway::from_config(&config).expect("gateway");

    let audio = pcm_silence(100);
    gateway
        .transcribe(&audio, &TranscribeOptions::default())
        .await
        .expect("first request within budget");

    let err = gateway
        .transcribe(&audio, &TranscribeOptions::default())
        .await
        .unwrap_err();
    match err {
        EngineError::ProviderUnavailable { transient, message, .. } => {
            assert!(transient);
            assert!(message.contains("rate limit"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

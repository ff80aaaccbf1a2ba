//! Turn orchestration: final transcription in, spoken response out.
//!
//! One turn runs at a time per session. The control loop cancels the
//! in-flight turn's token when the user interrupts, then starts a new turn
//! with the interrupting text; a cancelled turn abandons its synthesis and
//! leaves no assistant entry in history.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use crate::functions::FunctionExecutor;
use crate::llm::cache::ResponseCache;
use crate::llm::{cache_key, ChatMessage, ChatRole, LlmClient};
use crate::messages::SentenceChunk;
use crate::synthesis::ResponseSynthesisPipeline;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on function-call rounds within one turn.
const MAX_FUNCTION_ROUNDS: usize = 4;

/// Spoken when the language model fails or times out. The call continues.
const APOLOGY_TEXT: &str =
    "I'm sorry, I'm having trouble answering right now. Could you say that again?";

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The response was generated and handed to synthesis.
    Completed,
    /// The turn was superseded by an interruption before finishing.
    Superseded,
    /// The model failed; an apology was spoken instead.
    Recovered,
}

/// Per-session conversation orchestrator.
pub struct ConversationOrchestrator {
    session_id: Uuid,
    config: LlmConfig,
    client: LlmClient,
    cache: Arc<ResponseCache>,
    functions: Arc<dyn FunctionExecutor>,
    synthesis: Arc<ResponseSynthesisPipeline>,
    audit: Arc<dyn AuditSink>,
    history: Vec<ChatMessage>,
}

impl ConversationOrchestrator {
    /// Create an orchestrator seeded with the agent's system prompt.
    pub fn new(
        session_id: Uuid,
        config: LlmConfig,
        system_prompt: &str,
        cache: Arc<ResponseCache>,
        functions: Arc<dyn FunctionExecutor>,
        synthesis: Arc<ResponseSynthesisPipeline>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let client = LlmClient::new(&config);
        let mut history = Vec::new();
        if !system_prompt.trim().is_empty() {
            history.push(ChatMessage::system(system_prompt));
        }
        Self {
            session_id,
            config,
            client,
            cache,
            functions,
            synthesis,
            audit,
            history,
        }
    }

    /// Number of messages currently in history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Run one turn from a final user utterance.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] only for internal channel failures;
    /// model failures are absorbed into an apology turn.
    pub async fn run_turn(
        &mut self,
        user_text: String,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        self.history.push(ChatMessage::user(user_text.clone()));
        self.trim_history();

        let outcome = if self.config.streaming {
            self.run_streaming_turn(&cancel).await
        } else {
            self.run_buffered_turn(&cancel).await
        };

        match outcome {
            Ok(Some(agent_text)) => {
                self.history.push(ChatMessage::assistant(agent_text.clone()));
                self.trim_history();
                let record = AuditRecord::TurnCompleted {
                    session_id: self.session_id,
                    user_text,
                    agent_text,
                    at: Utc::now(),
                };
                if let Err(e) = self.audit.record(record).await {
                    warn!(error = %e, "audit emission failed");
                }
                Ok(TurnOutcome::Completed)
            }
            Ok(None) => {
                debug!("turn superseded");
                Ok(TurnOutcome::Superseded)
            }
            Err(e) => {
                // A model failure becomes a spoken apology, not a dropped call.
                warn!(error = %e, "model failure, speaking apology");
                self.synthesis.speak_text(APOLOGY_TEXT.to_owned());
                Ok(TurnOutcome::Recovered)
            }
        }
    }

    /// Streaming path: sentences go to synthesis as they form. Bypasses
    /// the cache and function calling.
    async fn run_streaming_turn(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        let (sentence_tx, sentence_rx) = mpsc::channel::<SentenceChunk>(16);
        self.synthesis.speak_stream(sentence_rx);

        let outcome = self.client.stream(&self.history, &sentence_tx, cancel).await?;
        drop(sentence_tx);

        if outcome.interrupted {
            // The superseding turn owns the synthesis pipeline now.
            return Ok(None);
        }
        Ok(Some(outcome.text))
    }

    /// Buffered path: consult the response cache, run the function-call
    /// loop, then speak the whole answer.
    async fn run_buffered_turn(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        let key = cache_key(self.client.model(), &self.history);
        if let Some(text) = self.cache.get(&key) {
            info!("serving response from cache");
            if cancel.is_cancelled() {
                return Ok(None);
            }
            self.synthesis.speak_text(text.clone());
            return Ok(Some(text));
        }

        let specs = self.functions.specs();
        let tools = if specs.is_empty() {
            None
        } else {
            Some(specs.as_slice())
        };

        let mut rounds = 0usize;
        let text = loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let response = self.client.complete(&self.history, tools).await?;

            match response.tool_call {
                Some(call) if rounds < MAX_FUNCTION_ROUNDS => {
                    rounds += 1;
                    // Echo the model's request into history, then append
                    // the execution result as a tool turn.
                    self.history.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: response.text.clone(),
                        tool_call_id: None,
                        tool_calls: response.raw_tool_calls.clone(),
                    });

                    let outcome = match self.functions.execute(&call).await {
                        Ok(value) => value.to_string(),
                        Err(e) => format!("{{\"error\": \"{e}\"}}"),
                    };
                    info!(function = %call.name, round = rounds, "function executed");
                    let record = AuditRecord::FunctionInvoked {
                        session_id: self.session_id,
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        outcome: outcome.clone(),
                        at: Utc::now(),
                    };
                    if let Err(e) = self.audit.record(record).await {
                        warn!(error = %e, "audit emission failed");
                    }

                    self.history.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: outcome,
                        tool_call_id: Some(call.id.clone()),
                        tool_calls: None,
                    });
                }
                Some(_) => {
                    warn!("function-call round limit reached, forcing text answer");
                    break response.text;
                }
                None => break response.text,
            }
        };

        if text.is_empty() {
            return Err(EngineError::Llm("model returned no text".to_owned()));
        }

        // Function-call turns depend on external state; only pure
        // completions are cacheable.
        if rounds == 0 {
            self.cache.insert(key, text.clone());
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }
        self.synthesis.speak_text(text.clone());
        Ok(Some(text))
    }

    /// Trim history to the configured turn budget, always retaining system
    /// turns.
    fn trim_history(&mut self) {
        let max = self.config.max_history_turns;
        if max == 0 {
            return;
        }
        let budget = max * 2;
        let non_system = self
            .history
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .count();
        if non_system <= budget {
            return;
        }
        let mut to_drop = non_system - budget;
        self.history.retain(|m| {
            if m.role == ChatRole::System {
                return true;
            }
            if to_drop > 0 {
                to_drop -= 1;
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audit::NullAuditSink;
    use crate::config::{CacheConfig, ProvidersConfig, SynthesisConfig, VoiceConfig};
    use crate::functions::NoFunctions;
    use crate::provider::ProviderGateway;
    use crate::session::transport::{ChannelTransport, SessionChannel};
    use async_trait::async_trait;
    use bytes::Bytes;

    #[derive(Debug, Default)]
    struct SinkTransport;

    #[async_trait]
    impl ChannelTransport for SinkTransport {
        fn channel(&self) -> SessionChannel {
            SessionChannel::Widget
        }
        async fn open(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_audio(&self, _frame: Bytes) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_text(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn redirect(&self, _destination: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn orchestrator(config: LlmConfig) -> ConversationOrchestrator {
        let gateway = Arc::new(ProviderGateway::from_config(&ProvidersConfig::default()).unwrap());
        let (events_tx, _events_rx) = mpsc::channel(16);
        let synthesis = Arc::new(ResponseSynthesisPipeline::new(
            SynthesisConfig::default(),
            gateway,
            Arc::new(SinkTransport),
            None,
            VoiceConfig::default(),
            events_tx,
        ));
        ConversationOrchestrator::new(
            Uuid::new_v4(),
            config,
            "You are a helpful receptionist.",
            Arc::new(ResponseCache::new(&CacheConfig::default())),
            Arc::new(NoFunctions),
            synthesis,
            Arc::new(NullAuditSink),
        )
    }

    #[test]
    fn system_prompt_seeds_history() {
        let orch = orchestrator(LlmConfig::default());
        assert_eq!(orch.history_len(), 1);
        assert_eq!(orch.history[0].role, ChatRole::System);
    }

    #[test]
    fn trim_keeps_system_and_recent_turns() {
        let mut orch = orchestrator(LlmConfig {
            max_history_turns: 2,
            ..LlmConfig::default()
        });
        for i in 0..10 {
            orch.history.push(ChatMessage::user(format!("q{i}")));
            orch.history.push(ChatMessage::assistant(format!("a{i}")));
        }
        orch.trim_history();

        assert_eq!(orch.history[0].role, ChatRole::System);
        // 2 turns = 4 non-system messages survive.
        assert_eq!(orch.history.len(), 5);
        assert_eq!(orch.history[1].content, "q8");
        assert_eq!(orch.history.last().unwrap().content, "a9");
    }

    #[test]
    fn trim_disabled_when_zero() {
        let mut orch = orchestrator(LlmConfig {
            max_history_turns: 0,
            ..LlmConfig::default()
        });
        for i in 0..30 {
            orch.history.push(ChatMessage::user(format!("q{i}")));
        }
        orch.trim_history();
        assert_eq!(orch.history_len(), 31);
    }

    #[test]
    fn trim_noop_under_budget() {
        let mut orch = orchestrator(LlmConfig {
            max_history_turns: 10,
            ..LlmConfig::default()
        });
        orch.history.push(ChatMessage::user("hello"));
        orch.trim_history();
        assert_eq!(orch.history_len(), 2);
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use pilot::errors::ToolCallResult;
use pilot::models::content::ContentBlock;
use pilot::models::history::History;
use pilot::models::message::{Message, Role};
use pilot::providers::configs::{AnthropicProviderConfig, ProviderConfig};
use pilot::providers::factory::get_provider;
use pilot::providers::format::ChatMessage;
use pilot::providers::host::{HostModel, HostModelSettings, ResponseFragment};
use pilot::sampling_loop::{LoopEvent, LoopOptions, SamplingLoop};
use pilot::tools::computer::Desktop;
use pilot::tools::{ComputerTool, ToolCollection};
use serde_json::{json, Value};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A host model that answers each run with the next scripted reply
struct ScriptedHost {
    replies: Mutex<VecDeque<String>>,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedHost {
    fn new(replies: &[&str]) -> Self {
        ScriptedHost {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            received: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HostModel for ScriptedHost {
    fn is_loaded(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn supports_functions(&self) -> bool {
        false
    }

    fn settings(&self) -> HostModelSettings {
        HostModelSettings {
            model: "scripted".to_string(),
            ..Default::default()
        }
    }

    fn configure(&self, _settings: HostModelSettings) {}

    async fn run<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Result<BoxStream<'a, Result<ResponseFragment>>> {
        self.received.lock().unwrap().push(messages.to_vec());
        let reply = self.replies.lock().unwrap().pop_front();
        let fragments: Vec<Result<ResponseFragment>> =
            reply.into_iter().map(|r| Ok(ResponseFragment::assistant(r))).collect();
        Ok(stream::iter(fragments).boxed())
    }
}

/// A display that records xdotool invocations and returns a fixed image
#[derive(Clone, Default)]
struct FakeDesktop {
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl Desktop for FakeDesktop {
    async fn screenshot(&self) -> ToolCallResult<Vec<u8>> {
        Ok(b"fake png".to_vec())
    }

    async fn xdotool(&self, args: Vec<String>) -> ToolCallResult<String> {
        self.commands.lock().unwrap().push(args);
        Ok(String::new())
    }
}

fn computer(desktop: &FakeDesktop) -> ToolCollection {
    ToolCollection::new().with_tool(Box::new(
        ComputerTool::with_desktop(Box::new(desktop.clone()), 1280, 800)
            .with_settle_delay(Duration::ZERO),
    ))
}

async fn run(sampling_loop: &SamplingLoop, history: &mut History) -> Result<Vec<LoopEvent>> {
    let (_cancel, cancel_rx) = watch::channel(false);
    sampling_loop.run(history, cancel_rx).try_collect().await
}

#[tokio::test]
async fn test_bridged_host_drives_the_computer() -> Result<()> {
    let host = Arc::new(ScriptedHost::new(&[
        "I'll click the icon. computer.left_click(100, 200)",
        "The browser is open.",
    ]));
    let desktop = FakeDesktop::default();
    let provider = get_provider(ProviderConfig::Custom(host.clone())).await?;

    let outputs = Arc::new(Mutex::new(Vec::new()));
    let seen = outputs.clone();
    let sampling_loop = SamplingLoop::new(provider, computer(&desktop), LoopOptions::default())?
        .on_output(move |block| {
            if let Some(text) = block.as_text() {
                seen.lock().unwrap().push(text.to_string());
            }
        });

    let mut history = History::from_messages(vec![Message::user().with_text("open the browser")])?;
    let events = run(&sampling_loop, &mut history).await?;

    assert!(matches!(events.last(), Some(LoopEvent::Messages(_))));
    assert_eq!(history.len(), 4);
    assert!(history.pending_tool_uses().is_empty());

    let tool_use = history.messages()[1].tool_uses()[0].clone();
    assert_eq!(tool_use.input, json!({"action": "left_click", "coordinate": [100, 200]}));
    let result = history.messages()[2].tool_results()[0].clone();
    assert_eq!(result.tool_use_id, tool_use.id);
    assert!(!result.is_error);
    assert_eq!(result.image_count(), 1);

    assert_eq!(
        desktop.commands.lock().unwrap().clone(),
        vec![["mousemove", "--sync", "100", "200", "click", "1"]
            .iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()]
    );

    // The second host call sees the system prompt with the tool guide and the tool outcome
    let received = host.received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1][0].role, Role::System);
    assert!(received[1][0].text_content().contains("computer.left_click"));

    assert_eq!(
        *outputs.lock().unwrap(),
        vec![
            "I'll click the icon. computer.left_click(100, 200)".to_string(),
            "The browser is open.".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_bridged_host_runs_several_tool_turns() -> Result<()> {
    let host = Arc::new(ScriptedHost::new(&[
        "Step one. computer.left_click(100, 200)",
        "Step two. computer.left_click(300, 400)",
        "Done.",
    ]));
    let desktop = FakeDesktop::default();
    let provider = get_provider(ProviderConfig::Custom(host.clone())).await?;
    let sampling_loop = SamplingLoop::new(provider, computer(&desktop), LoopOptions::default())?;

    let mut history = History::from_messages(vec![Message::user().with_text("fill the form")])?;
    run(&sampling_loop, &mut history).await?;

    assert_eq!(history.len(), 6);
    assert!(history.pending_tool_uses().is_empty());
    assert_eq!(history.last().map(|m| m.text()), Some("Done.".to_string()));

    let first = history.messages()[1].tool_uses()[0].id.clone();
    let second = history.messages()[3].tool_uses()[0].id.clone();
    assert_ne!(first, second);
    assert_eq!(history.messages()[4].tool_results()[0].tool_use_id, second);

    assert_eq!(desktop.commands.lock().unwrap().len(), 2);
    assert_eq!(host.received.lock().unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_host_failure_becomes_an_error_reply() -> Result<()> {
    struct BrokenHost;

    #[async_trait]
    impl HostModel for BrokenHost {
        fn is_loaded(&self) -> bool {
            true
        }
        async fn load(&self) -> Result<()> {
            Ok(())
        }
        fn supports_vision(&self) -> bool {
            false
        }
        fn supports_functions(&self) -> bool {
            false
        }
        fn settings(&self) -> HostModelSettings {
            HostModelSettings::default()
        }
        fn configure(&self, _settings: HostModelSettings) {}
        async fn run<'a>(
            &'a self,
            _messages: &'a [ChatMessage],
        ) -> Result<BoxStream<'a, Result<ResponseFragment>>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    let provider = get_provider(ProviderConfig::Custom(Arc::new(BrokenHost))).await?;
    let sampling_loop =
        SamplingLoop::new(provider, ToolCollection::new(), LoopOptions::default())?;
    let mut history = History::from_messages(vec![Message::user().with_text("hello")])?;

    run(&sampling_loop, &mut history).await?;

    let reply = history.last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert!(reply.text().starts_with("Error: "));
    assert!(reply.text().contains("connection refused"));
    Ok(())
}

fn anthropic_reply(content: Value, stop_reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-20241022",
        "content": content,
        "stop_reason": stop_reason,
        "usage": {"input_tokens": 10, "output_tokens": 5}
    }))
}

#[tokio::test]
async fn test_native_provider_round_trip() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(anthropic_reply(
            json!([
                {"type": "text", "text": "Taking a screenshot."},
                {"type": "tool_use", "id": "toolu_01", "name": "computer", "input": {"action": "screenshot"}}
            ]),
            "tool_use",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(anthropic_reply(
            json!([{"type": "text", "text": "I can see the desktop."}]),
            "end_turn",
        ))
        .mount(&server)
        .await;

    let config = AnthropicProviderConfig::direct(server.uri(), "test_api_key").with_stream(false);
    let provider = get_provider(ProviderConfig::Anthropic(config)).await?;
    let desktop = FakeDesktop::default();
    let sampling_loop = SamplingLoop::new(provider, computer(&desktop), LoopOptions::default())?;
    let mut history = History::from_messages(vec![Message::user().with_text("what is on screen?")])?;

    run(&sampling_loop, &mut history).await?;

    assert_eq!(history.len(), 4);
    assert_eq!(history.last().unwrap().text(), "I can see the desktop.");
    assert!(desktop.commands.lock().unwrap().is_empty());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[1].body)?;
    assert_eq!(body["tools"][0]["type"], "computer_20241022");
    let result = &body["messages"][2]["content"][0];
    assert_eq!(result["type"], "tool_result");
    assert_eq!(result["tool_use_id"], "toolu_01");
    assert_eq!(result["content"][0]["type"], "image");

    let blocks: Vec<&ContentBlock> = history.messages()[1].blocks().iter().collect();
    assert_eq!(blocks.len(), 2);
    Ok(())
}

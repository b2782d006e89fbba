use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use futures::StreamExt;
use pilot::models::content::ContentBlock;
use pilot::models::history::History;
use pilot::models::message::Message;
use pilot::providers::base::Provider;
use pilot::providers::factory::ApiProvider;
use pilot::sampling_loop::{LoopEvent, LoopOptions, SamplingLoop};
use pilot::tools::ToolCollection;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::watch;
use tracing::debug;

use crate::render;

/// An interactive conversation with the computer-use loop
pub struct Session {
    api_provider: ApiProvider,
    sampling_loop: SamplingLoop,
    history: History,
    editor: DefaultEditor,
    // set once model text has been printed as it streamed in
    streamed: Arc<AtomicBool>,
}

fn is_exit(input: &str) -> bool {
    ["exit", "quit", "/exit", "/quit"]
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}

/// Remember a line for arrow-key recall
fn record_input(editor: &mut DefaultEditor, input: &str) {
    if let Err(e) = editor.add_history_entry(input) {
        debug!("Failed to record input history: {}", e);
    }
}

impl Session {
    pub fn new(
        api_provider: ApiProvider,
        provider: Box<dyn Provider>,
        tools: ToolCollection,
        options: LoopOptions,
    ) -> Result<Self> {
        let streamed = Arc::new(AtomicBool::new(false));
        let text_streamed = streamed.clone();
        let tool_streamed = streamed.clone();

        let sampling_loop = SamplingLoop::new(provider, tools, options)?
            .on_output(move |block| match block {
                ContentBlock::Text(text) if !text_streamed.load(Ordering::SeqCst) => {
                    render::print_text(&text.text)
                }
                ContentBlock::ToolUse(tool_use) => render::print_tool_use(tool_use),
                _ => {}
            })
            .on_tool_output(move |result, _tool_use_id| {
                tool_streamed.store(false, Ordering::SeqCst);
                render::print_tool_result(result);
            });

        Ok(Session {
            api_provider,
            sampling_loop,
            history: History::new(),
            editor: DefaultEditor::new()?,
            streamed,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        self.print_header();

        loop {
            let line = match self.editor.readline(render::PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e).context("Failed to read input"),
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if is_exit(input) {
                break;
            }
            record_input(&mut self.editor, input);

            self.history
                .push(Message::user().with_text(input))
                .context("Conversation history is inconsistent")?;
            self.reply().await?;
        }

        println!("{}", style("Closing session.").dim());
        Ok(())
    }

    fn print_header(&self) {
        println!(
            "{} {}",
            style("pilot").bold(),
            style(format!(
                "{} | {}",
                self.api_provider,
                self.sampling_loop.model()
            ))
            .dim()
        );
        if self.api_provider == ApiProvider::Custom {
            let provider = self.sampling_loop.provider();
            if !provider.supports_vision() {
                render::print_warning(
                    "the host model does not support vision, screenshots will not reach it",
                );
            }
            if !provider.supports_tool_calling() {
                render::print_warning(
                    "the host model does not support function calling, actions are read from its replies",
                );
            }
        }
        println!(
            "{}",
            style("type \"exit\" to end the session, Ctrl-C interrupts a running turn").dim()
        );
        println!();
    }

    /// Run the loop for the latest user message; Ctrl-C cancels the turn, not the session
    async fn reply(&mut self) -> Result<()> {
        self.streamed.store(false, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                let _ = cancel_tx.send(true);
            }
        });

        let result = self.process_events(cancel_rx).await;
        interrupt.abort();
        result
    }

    async fn process_events(&mut self, cancel: watch::Receiver<bool>) -> Result<()> {
        let mut events = self.sampling_loop.run(&mut self.history, cancel);
        while let Some(event) = events.next().await {
            match event? {
                LoopEvent::Chunk(text) => {
                    self.streamed.store(true, Ordering::SeqCst);
                    print!("{}", text);
                    io::stdout().flush()?;
                }
                LoopEvent::Messages(_) => println!(),
                LoopEvent::Cancelled => println!(
                    "\n{}",
                    style("Interrupted, the conversation is back at the last complete turn.")
                        .yellow()
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_exit() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(is_exit("/exit"));
        assert!(!is_exit("exit the browser"));
    }

    #[test]
    fn test_record_input_keeps_history() -> Result<()> {
        use rustyline::history::History as _;

        let mut editor = DefaultEditor::new()?;
        record_input(&mut editor, "open the browser");
        record_input(&mut editor, "click the search box");
        assert_eq!(editor.history().len(), 2);
        Ok(())
    }
}

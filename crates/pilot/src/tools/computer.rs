//! Screen, keyboard and mouse control for the model.
//!
//! Screenshots come from `xcap`; input is injected with the `xdotool` binary. Both sit
//! behind [`Desktop`] so the tool's validation and sequencing can run without a display.
use std::io::ErrorKind;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tokio::process::Command;
use tracing::debug;

use super::Tool;
use crate::errors::{ToolCallResult, ToolError};
use crate::models::tool::{ToolResult, ToolSchema};

const TYPING_CHUNK_SIZE: usize = 50;
const TYPING_DELAY_MS: u64 = 12;
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Key,
    Type,
    MouseMove,
    LeftClick,
    LeftClickDrag,
    RightClick,
    MiddleClick,
    DoubleClick,
    Screenshot,
    CursorPosition,
}

/// Access to the screen and input devices
#[async_trait]
pub trait Desktop: Send + Sync {
    /// Capture the primary display as PNG bytes
    async fn screenshot(&self) -> ToolCallResult<Vec<u8>>;

    /// Run `xdotool` with the given arguments and return its stdout
    async fn xdotool(&self, args: Vec<String>) -> ToolCallResult<String>;
}

/// The local X display
pub struct SystemDesktop {
    display_num: Option<u32>,
}

impl SystemDesktop {
    pub fn new(display_num: Option<u32>) -> Self {
        Self { display_num }
    }
}

fn primary_monitor() -> ToolCallResult<xcap::Monitor> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| ToolError::Unavailable(format!("Unable to list monitors: {}", e)))?;
    let mut monitors = monitors.into_iter();
    let first = monitors
        .next()
        .ok_or_else(|| ToolError::Unavailable("No monitor found".to_string()))?;
    if first.is_primary() {
        return Ok(first);
    }
    Ok(monitors.find(|m| m.is_primary()).unwrap_or(first))
}

fn encode_png(width: u32, height: u32, rgba: &[u8]) -> ToolCallResult<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| ToolError::ExecutionError(format!("Failed to encode screenshot: {}", e)))?;
    Ok(png)
}

#[async_trait]
impl Desktop for SystemDesktop {
    async fn screenshot(&self) -> ToolCallResult<Vec<u8>> {
        tokio::task::spawn_blocking(|| {
            let monitor = primary_monitor()?;
            let capture = monitor.capture_image().map_err(|e| {
                ToolError::ExecutionError(format!("Failed to capture screen: {}", e))
            })?;
            encode_png(capture.width(), capture.height(), capture.as_raw())
        })
        .await
        .map_err(|e| ToolError::ExecutionError(format!("Screenshot task failed: {}", e)))?
    }

    async fn xdotool(&self, args: Vec<String>) -> ToolCallResult<String> {
        let mut command = Command::new("xdotool");
        command.args(&args);
        if let Some(display) = self.display_num {
            command.env("DISPLAY", format!(":{}", display));
        }

        let output = command.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ToolError::Unavailable("xdotool is not installed".to_string()),
            _ => ToolError::ExecutionError(format!("Failed to run xdotool: {}", e)),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::ExecutionError(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ComputerInput {
    action: String,
    #[serde(default)]
    coordinate: Option<Vec<i64>>,
    #[serde(default)]
    text: Option<String>,
}

pub struct ComputerTool {
    desktop: Box<dyn Desktop>,
    width: u32,
    height: u32,
    display_num: Option<u32>,
    settle_delay: Duration,
}

impl ComputerTool {
    /// Control the primary monitor of the local display
    pub fn new(display_num: Option<u32>) -> ToolCallResult<Self> {
        let monitor = primary_monitor()?;
        Ok(Self::with_desktop(
            Box::new(SystemDesktop::new(display_num)),
            monitor.width(),
            monitor.height(),
        )
        .with_display_num(display_num))
    }

    pub fn with_desktop(desktop: Box<dyn Desktop>, width: u32, height: u32) -> Self {
        Self {
            desktop,
            width,
            height,
            display_num: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_display_num(mut self, display_num: Option<u32>) -> Self {
        self.display_num = display_num;
        self
    }

    /// How long to wait after an action before taking the follow-up screenshot
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    fn native_definition(&self) -> Value {
        let mut definition = json!({
            "type": "computer_20241022",
            "name": "computer",
            "display_width_px": self.width,
            "display_height_px": self.height,
        });
        if let Some(display) = self.display_num {
            definition["display_number"] = json!(display);
        }
        definition
    }

    fn coordinate(&self, input: &ComputerInput) -> ToolCallResult<Option<(u32, u32)>> {
        let Some(coordinate) = &input.coordinate else {
            return Ok(None);
        };
        let [x, y] = coordinate.as_slice() else {
            return Err(ToolError::InvalidParameters(format!(
                "{:?} must be a list of two integers",
                coordinate
            )));
        };
        if *x < 0 || *y < 0 || *x >= i64::from(self.width) || *y >= i64::from(self.height) {
            return Err(ToolError::InvalidParameters(format!(
                "Coordinate ({}, {}) is outside the {}x{} display",
                x, y, self.width, self.height
            )));
        }
        Ok(Some((*x as u32, *y as u32)))
    }

    async fn screenshot(&self) -> ToolCallResult<String> {
        let png = self.desktop.screenshot().await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(png))
    }

    /// Run an input command, let the screen settle, then capture it
    async fn act(&self, args: Vec<String>) -> ToolCallResult<ToolResult> {
        let output = self.desktop.xdotool(args).await?;
        tokio::time::sleep(self.settle_delay).await;
        let image = self.screenshot().await?;
        let result = if output.is_empty() {
            ToolResult::default()
        } else {
            ToolResult::output(output)
        };
        Ok(result.with_image(image))
    }
}

fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: ToString,
{
    parts.into_iter().map(|part| part.to_string()).collect()
}

#[async_trait]
impl Tool for ComputerTool {
    fn schema(&self) -> ToolSchema {
        let actions: Vec<String> = Action::iter().map(|a| a.to_string()).collect();
        ToolSchema::new(
            "computer",
            "Control the computer screen, mouse, and keyboard",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": actions,
                        "description": "The action to perform"
                    },
                    "coordinate": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "The [x, y] coordinate for mouse actions"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text to type or key combination to press"
                    }
                },
                "required": ["action"]
            }),
        )
        .with_native(self.native_definition())
    }

    async fn call(&self, input: Value) -> ToolCallResult<ToolResult> {
        let input: ComputerInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        let action = Action::from_str(&input.action)
            .map_err(|_| ToolError::InvalidParameters(format!("Invalid action: {}", input.action)))?;
        let coordinate = self.coordinate(&input)?;
        debug!(%action, ?coordinate, "Computer action");

        match action {
            Action::Key | Action::Type => {
                let text = input.text.as_deref().ok_or_else(|| {
                    ToolError::InvalidParameters(format!("text is required for {}", action))
                })?;
                if coordinate.is_some() {
                    return Err(ToolError::InvalidParameters(format!(
                        "coordinate is not accepted for {}",
                        action
                    )));
                }
                if action == Action::Key {
                    return self.act(args(["key", "--", text])).await;
                }

                let chars: Vec<char> = text.chars().collect();
                let mut outputs = Vec::new();
                for chunk in chars.chunks(TYPING_CHUNK_SIZE) {
                    let chunk: String = chunk.iter().collect();
                    let delay = TYPING_DELAY_MS.to_string();
                    let output = self
                        .desktop
                        .xdotool(args(["type", "--delay", delay.as_str(), "--", chunk.as_str()]))
                        .await?;
                    if !output.is_empty() {
                        outputs.push(output);
                    }
                }
                tokio::time::sleep(self.settle_delay).await;
                let image = self.screenshot().await?;
                let result = if outputs.is_empty() {
                    ToolResult::default()
                } else {
                    ToolResult::output(outputs.join("\n"))
                };
                Ok(result.with_image(image))
            }
            Action::MouseMove | Action::LeftClickDrag => {
                let (x, y) = coordinate.ok_or_else(|| {
                    ToolError::InvalidParameters(format!("coordinate is required for {}", action))
                })?;
                if input.text.is_some() {
                    return Err(ToolError::InvalidParameters(format!(
                        "text is not accepted for {}",
                        action
                    )));
                }
                let (x, y) = (x.to_string(), y.to_string());
                if action == Action::MouseMove {
                    self.act(args(["mousemove", "--sync", x.as_str(), y.as_str()]))
                        .await
                } else {
                    self.act(args([
                        "mousedown", "1", "mousemove", "--sync", x.as_str(), y.as_str(), "mouseup", "1",
                    ]))
                    .await
                }
            }
            Action::LeftClick | Action::RightClick | Action::MiddleClick | Action::DoubleClick => {
                if input.text.is_some() {
                    return Err(ToolError::InvalidParameters(format!(
                        "text is not accepted for {}",
                        action
                    )));
                }
                // pseudo calls from text-only models carry the click target
                let mut command = match coordinate {
                    Some((x, y)) => args(["mousemove".to_string(), "--sync".to_string(), x.to_string(), y.to_string()]),
                    None => Vec::new(),
                };
                command.extend(args(match action {
                    Action::LeftClick => vec!["click", "1"],
                    Action::RightClick => vec!["click", "3"],
                    Action::MiddleClick => vec!["click", "2"],
                    _ => vec!["click", "--repeat", "2", "--delay", "500", "1"],
                }));
                self.act(command).await
            }
            Action::Screenshot => {
                if coordinate.is_some() || input.text.is_some() {
                    return Err(ToolError::InvalidParameters(
                        "screenshot takes no coordinate or text".to_string(),
                    ));
                }
                Ok(ToolResult::default().with_image(self.screenshot().await?))
            }
            Action::CursorPosition => {
                if coordinate.is_some() || input.text.is_some() {
                    return Err(ToolError::InvalidParameters(
                        "cursor_position takes no coordinate or text".to_string(),
                    ));
                }
                let output = self
                    .desktop
                    .xdotool(args(["getmouselocation", "--shell"]))
                    .await?;
                let field = |name: &str| {
                    output
                        .lines()
                        .find_map(|line| line.strip_prefix(name))
                        .map(str::trim)
                        .map(str::to_string)
                };
                match (field("X="), field("Y=")) {
                    (Some(x), Some(y)) => Ok(ToolResult::output(format!("X={},Y={}", x, y))),
                    _ => Err(ToolError::ExecutionError(format!(
                        "Unexpected xdotool output: {}",
                        output
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingDesktop {
        commands: Arc<Mutex<Vec<Vec<String>>>>,
        screenshots: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Desktop for RecordingDesktop {
        async fn screenshot(&self) -> ToolCallResult<Vec<u8>> {
            *self.screenshots.lock().unwrap() += 1;
            Ok(b"png".to_vec())
        }

        async fn xdotool(&self, args: Vec<String>) -> ToolCallResult<String> {
            let output = if args.first().map(String::as_str) == Some("getmouselocation") {
                "X=12\nY=34\nSCREEN=0\nWINDOW=1".to_string()
            } else {
                String::new()
            };
            self.commands.lock().unwrap().push(args);
            Ok(output)
        }
    }

    fn tool() -> (ComputerTool, RecordingDesktop) {
        let desktop = RecordingDesktop::default();
        let tool = ComputerTool::with_desktop(Box::new(desktop.clone()), 1024, 768)
            .with_settle_delay(Duration::ZERO);
        (tool, desktop)
    }

    fn png_base64() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"png")
    }

    #[tokio::test]
    async fn test_screenshot_returns_image() {
        let (tool, desktop) = tool();
        let result = tool.call(json!({"action": "screenshot"})).await.unwrap();
        assert_eq!(result.base64_image, Some(png_base64()));
        assert!(desktop.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_click_moves_then_clicks_and_captures() {
        let (tool, desktop) = tool();
        let result = tool
            .call(json!({"action": "left_click", "coordinate": [100, 200]}))
            .await
            .unwrap();
        assert_eq!(
            desktop.commands.lock().unwrap()[0],
            vec!["mousemove", "--sync", "100", "200", "click", "1"]
        );
        assert_eq!(*desktop.screenshots.lock().unwrap(), 1);
        assert!(result.base64_image.is_some());
        assert!(result.output.is_none());
    }

    #[tokio::test]
    async fn test_type_is_chunked() {
        let (tool, desktop) = tool();
        let text = "a".repeat(120);
        tool.call(json!({"action": "type", "text": text})).await.unwrap();
        let commands = desktop.commands.lock().unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[2].last().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_cursor_position() {
        let (tool, _) = tool();
        let result = tool.call(json!({"action": "cursor_position"})).await.unwrap();
        assert_eq!(result.output.as_deref(), Some("X=12,Y=34"));
        assert!(result.base64_image.is_none());
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let (tool, desktop) = tool();
        for input in [
            json!({"action": "fly"}),
            json!({"action": "type"}),
            json!({"action": "mouse_move"}),
            json!({"action": "mouse_move", "coordinate": [5000, 10]}),
            json!({"action": "mouse_move", "coordinate": [1]}),
            json!({"action": "key", "text": "Return", "coordinate": [1, 1]}),
            json!({"action": "screenshot", "text": "x"}),
            json!({"coordinate": [1, 1]}),
        ] {
            let err = tool.call(input.clone()).await.unwrap_err();
            assert!(
                matches!(err, ToolError::InvalidParameters(_)),
                "{} gave {:?}",
                input,
                err
            );
        }
        assert!(desktop.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn test_schema_carries_native_definition() {
        let (tool, _) = tool();
        let schema = tool.schema();
        let native = schema.native.unwrap();
        assert_eq!(native["type"], "computer_20241022");
        assert_eq!(native["display_width_px"], 1024);
        assert_eq!(schema.input_schema["properties"]["action"]["enum"][0], "key");
    }
}

use serde::Deserialize;
use serde_json::Value;

/// Events from the agent CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Folds stream-json lines into the final agent answer.
#[derive(Debug, Default)]
pub struct StreamCollector {
    accumulated_text: String,
    final_result: Option<String>,
    is_error: bool,
    session_id: Option<String>,
    tool_uses: usize,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(StreamEvent::Assistant {
                message,
                session_id,
            }) => {
                if !session_id.is_empty() {
                    self.session_id = Some(session_id);
                }
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.accumulated_text.push_str(&text);
                            self.accumulated_text.push('\n');
                        }
                        ContentBlock::ToolUse { .. } => self.tool_uses += 1,
                        ContentBlock::Other => {}
                    }
                }
            }
            Ok(StreamEvent::Result {
                result,
                is_error,
                session_id,
                ..
            }) => {
                self.final_result = result;
                self.is_error = is_error;
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            Ok(StreamEvent::User { .. } | StreamEvent::System { .. }) => {}
            Err(_) => {
                // Not stream-json; keep it as plain output.
                self.accumulated_text.push_str(line);
                self.accumulated_text.push('\n');
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn tool_uses(&self) -> usize {
        self.tool_uses
    }

    /// The result event's text if one arrived, otherwise everything printed.
    pub fn into_output(self) -> String {
        self.final_result
            .unwrap_or(self.accumulated_text)
            .trim()
            .to_string()
    }
}

//! Console Front-end
//!
//! A line-oriented stand-in for a chat front-end. Each input line is either a
//! chat message or a slash command. Replies, notices and previews are written
//! to the output stream.
//!
//! ```text
//! hello there            -> private message from the console user
//! /group marv, towel?    -> group message (goes through the reply policy)
//! /temp 0.3              -> per-conversation temperature
//! /help                  -> command list
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use relay_core::{
    ChatBackend, ChatKind, ChatRef, Conductor, ConductorError, ConversationKey,
    ConversationTarget, Delivery, DeliveryError, InboundMessage, Sender,
};

/// Chat id used for `/group` messages
pub const CONSOLE_GROUP_ID: i64 = -1;

const HELP: &str = "\
Commands:
  /group <text>             send <text> as a group message
  /reset                    forget this conversation
  /history                  show this conversation
  /temp <0.0-1.0>           set the temperature for this conversation
  /model <name>             switch the model for every conversation
  /models                   list installed models
  /pullmodel <name>         download a model
  /deletemodel <name>       remove a model
  /prompts                  list system prompts
  /addglobalprompt <text>   add a prompt everyone can use
  /addprivateprompt <text>  add a prompt only you can use
  /selectprompt <id|none>   select the system prompt for every conversation
  /deleteprompt <id>        delete a system prompt
  /about                    show relay status
  /quit                     save and exit";

// =============================================================================
// Delivery
// =============================================================================

/// [`Delivery`] that writes to an async output stream
pub struct ConsoleDelivery<W> {
    out: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> ConsoleDelivery<W> {
    /// Wrap an output stream
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), DeliveryError> {
        let mut out = self.out.lock().await;
        let written = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        }
        .await;
        written.map_err(|e| DeliveryError::Failed(e.to_string()))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Delivery for ConsoleDelivery<W> {
    async fn send_pages(
        &self,
        target: &ConversationTarget,
        pages: &[String],
    ) -> Result<(), DeliveryError> {
        let prefix = match target.reply_to {
            Some(id) => format!("bot [re #{id}]> "),
            None => "bot> ".to_string(),
        };
        for page in pages {
            self.write_line(&format!("{prefix}{page}")).await?;
        }
        Ok(())
    }

    async fn send_notice(
        &self,
        _target: &ConversationTarget,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.write_line(&format!("! {text}")).await
    }

    async fn send_typing(&self, target: &ConversationTarget) -> Result<(), DeliveryError> {
        debug!(chat_id = target.chat_id, "Typing");
        Ok(())
    }

    async fn clear_typing(&self, target: &ConversationTarget) -> Result<(), DeliveryError> {
        debug!(chat_id = target.chat_id, "Done typing");
        Ok(())
    }

    async fn send_preview(
        &self,
        _target: &ConversationTarget,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.write_line(&format!("... {text}")).await
    }
}

// =============================================================================
// Commands
// =============================================================================

/// One parsed input line
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Private chat message
    Say(String),
    /// Group chat message
    Group(String),
    /// Forget the conversation
    Reset,
    /// Show the conversation
    History,
    /// Set the conversation temperature
    Temperature(f32),
    /// Switch the model for every conversation
    SwitchModel(String),
    /// List installed models
    ListModels,
    /// Download a model
    PullModel(String),
    /// Remove a model
    DeleteModel(String),
    /// List prompts visible to the console user
    Prompts,
    /// Store a prompt
    AddPrompt {
        /// Prompt text
        text: String,
        /// Visible to everyone
        global: bool,
    },
    /// Select (or clear) the system prompt
    SelectPrompt(Option<i64>),
    /// Delete a prompt
    DeletePrompt(i64),
    /// Relay status
    About,
    /// Command list
    Help,
    /// Save and exit
    Quit,
}

/// Parse one input line
///
/// Blank lines yield `Ok(None)`. A malformed command yields its usage text.
pub fn parse_line(line: &str) -> Result<Option<Command>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    let parsed = match name {
        "group" => Command::Group(required(arg, "Usage: /group <text>")?),
        "reset" => Command::Reset,
        "history" => Command::History,
        "temp" => Command::Temperature(
            arg.parse()
                .map_err(|_| "Usage: /temp [temperature value between 0.0 and 1.0]")?,
        ),
        "model" => Command::SwitchModel(required(arg, "Please provide a model name.")?),
        "models" => Command::ListModels,
        "pullmodel" => Command::PullModel(required(arg, "Please provide a model name to pull.")?),
        "deletemodel" => {
            Command::DeleteModel(required(arg, "Please provide a model name to delete.")?)
        }
        "prompts" => Command::Prompts,
        "addglobalprompt" | "addprivateprompt" => Command::AddPrompt {
            text: required(arg, "Please provide a prompt text to add.")?,
            global: name == "addglobalprompt",
        },
        "selectprompt" => Command::SelectPrompt(match arg {
            "none" => None,
            id => Some(id.parse().map_err(|_| "Usage: /selectprompt <id|none>")?),
        }),
        "deleteprompt" => {
            Command::DeletePrompt(arg.parse().map_err(|_| "Usage: /deleteprompt <id>")?)
        }
        "about" => Command::About,
        "help" | "start" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err("Unknown command. Type /help for the command list."),
    };
    Ok(Some(parsed))
}

fn required(arg: &str, usage: &'static str) -> Result<String, &'static str> {
    if arg.is_empty() {
        Err(usage)
    } else {
        Ok(arg.to_string())
    }
}

// =============================================================================
// Console loop
// =============================================================================

enum Flow {
    Continue,
    Quit,
}

/// Drives a [`Conductor`] from lines of input
pub struct Console<B: ChatBackend, W> {
    conductor: Arc<Conductor<B>>,
    delivery: Arc<ConsoleDelivery<W>>,
    user: Sender,
    next_message_id: i64,
}

impl<B, W> Console<B, W>
where
    B: ChatBackend + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a console for one user
    pub fn new(conductor: Arc<Conductor<B>>, delivery: Arc<ConsoleDelivery<W>>, user: Sender) -> Self {
        Self {
            conductor,
            delivery,
            user,
            next_message_id: 1,
        }
    }

    /// Read lines until end of input or `/quit`
    ///
    /// Command failures are reported on the console and do not end the loop.
    ///
    /// # Errors
    ///
    /// Returns an error if input cannot be read.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> anyhow::Result<()> {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let command = match parse_line(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(usage) => {
                    self.notice(usage).await;
                    continue;
                }
            };

            match self.execute(command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => {
                    warn!(error = %e, "Command failed");
                    self.notice(&format!("Something went wrong: {e}")).await;
                }
            }
        }
        Ok(())
    }

    fn private_key(&self) -> ConversationKey {
        ConversationKey::derive(ChatKind::Private, self.user.id, self.user.id)
    }

    fn message(&mut self, kind: ChatKind, text: String) -> InboundMessage {
        let chat = match kind {
            ChatKind::Private => ChatRef {
                id: self.user.id,
                kind,
                title: None,
            },
            ChatKind::Group => ChatRef {
                id: CONSOLE_GROUP_ID,
                kind,
                title: Some("console".into()),
            },
        };
        let id = self.next_message_id;
        self.next_message_id += 1;
        InboundMessage::text(id, chat, self.user.clone(), text)
    }

    async fn notice(&self, text: &str) {
        let target = ConversationTarget::chat(self.user.id);
        if let Err(e) = self.delivery.send_notice(&target, text).await {
            warn!(error = %e, "Failed to write to console");
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Flow, ConductorError> {
        match command {
            Command::Say(text) => return self.chat(ChatKind::Private, text).await,
            Command::Group(text) => return self.chat(ChatKind::Group, text).await,
            Command::Reset => {
                if self.conductor.reset(&self.private_key()).await? {
                    self.notice("Chat has been reset").await;
                } else {
                    self.notice("No chat history available for this user").await;
                }
            }
            Command::History => match self.conductor.history(&self.private_key()).await {
                Some(history) if !history.is_empty() => self.notice(history.trim_end()).await,
                _ => self.notice("No chat history available for this user").await,
            },
            Command::Temperature(temperature) => {
                match self
                    .conductor
                    .set_temperature(&self.private_key(), temperature)
                    .await
                {
                    Ok(()) => {
                        self.notice(&format!("Temperature set to {temperature} for this chat."))
                            .await;
                    }
                    Err(ConductorError::InvalidTemperature(_)) => {
                        self.notice("Temperature must be between 0.0 and 1.0.").await;
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::SwitchModel(model) => {
                self.conductor.switch_model(&model).await?;
                self.notice(&format!("Chosen model: {model}")).await;
            }
            Command::ListModels => {
                let models = self.conductor.list_models().await?;
                if models.is_empty() {
                    self.notice("No models installed.").await;
                }
                for model in models {
                    let size = model.parameter_size.as_deref().unwrap_or("?");
                    self.notice(&format!("{} ({size})", model.name)).await;
                }
            }
            Command::PullModel(model) => match self.conductor.pull_model(&model).await {
                Ok(()) => self.notice(&format!("Model '{model}' is being pulled.")).await,
                Err(e) => {
                    self.notice(&format!("Failed to pull model '{model}': {e}"))
                        .await;
                }
            },
            Command::DeleteModel(model) => match self.conductor.delete_model(&model).await {
                Ok(()) => self.notice(&format!("Deleted model: {model}")).await,
                Err(e) => {
                    debug!(error = %e, "Model deletion failed");
                    self.notice(&format!("Failed to delete model: {model}")).await;
                }
            },
            Command::Prompts => {
                let prompts = self.conductor.prompts_for(self.user.id).await?;
                if prompts.is_empty() {
                    self.notice("No prompts available.").await;
                }
                for prompt in prompts {
                    let scope = if prompt.is_global { "global" } else { "private" };
                    self.notice(&format!("#{} [{scope}] {}", prompt.id, prompt.text))
                        .await;
                }
            }
            Command::AddPrompt { text, global } => {
                self.conductor.add_prompt(self.user.id, &text, global).await?;
                let scope = if global { "Global" } else { "Private" };
                self.notice(&format!("{scope} prompt added successfully."))
                    .await;
            }
            Command::SelectPrompt(prompt_id) => {
                match self.conductor.select_prompt(prompt_id).await {
                    Ok(count) => {
                        let text = match prompt_id {
                            Some(id) => format!("Prompt #{id} selected for {count} chats."),
                            None => "Prompt selection cleared.".to_string(),
                        };
                        self.notice(&text).await;
                    }
                    Err(ConductorError::UnknownPrompt(id)) => {
                        self.notice(&format!("Prompt ID {id} not found.")).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::DeletePrompt(id) => {
                if self.conductor.delete_prompt(id).await? {
                    self.notice(&format!("Deleted prompt ID: {id}")).await;
                } else {
                    self.notice(&format!("Prompt ID {id} not found.")).await;
                }
            }
            Command::About => {
                let about = self.conductor.about(&self.private_key()).await?;
                self.notice(&about).await;
            }
            Command::Help => self.notice(HELP).await,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn chat(&mut self, kind: ChatKind, text: String) -> Result<Flow, ConductorError> {
        let msg = self.message(kind, text);
        // Generation failures were already reported to the user by the conductor
        match self.conductor.handle_message(&msg).await {
            Ok(None) => debug!(message_id = msg.id, "No reply"),
            Ok(Some(reply)) => debug!(pages = reply.pages.len(), "Reply delivered"),
            Err(e) => debug!(error = %e, "Reply failed"),
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
impl ConsoleDelivery<Vec<u8>> {
    async fn written(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().await).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relay_core::backend::ByteStream;
    use relay_core::{BackendError, ChatRequest, ConductorConfig, MemoryStore, ModelInfo};

    struct OfflineBackend;

    #[async_trait]
    impl ChatBackend for OfflineBackend {
        fn name(&self) -> &str {
            "offline"
        }
        async fn health_check(&self) -> bool {
            false
        }
        async fn generate(&self, _request: &ChatRequest) -> Result<ByteStream, BackendError> {
            Err(BackendError::Transport("connection refused".into()))
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
            Ok(Vec::new())
        }
        async fn pull_model(&self, _name: &str) -> Result<(), BackendError> {
            Err(BackendError::Transport("connection refused".into()))
        }
        async fn delete_model(&self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn console() -> (Console<OfflineBackend, Vec<u8>>, Arc<ConsoleDelivery<Vec<u8>>>) {
        let delivery = Arc::new(ConsoleDelivery::new(Vec::new()));
        let conductor = Conductor::new(
            OfflineBackend,
            ConductorConfig::default(),
            Arc::new(MemoryStore::new()),
            delivery.clone(),
        );
        let user = Sender {
            id: 7,
            first_name: "Trillian".into(),
            last_name: None,
            is_bot: false,
        };
        (Console::new(Arc::new(conductor), delivery.clone(), user), delivery)
    }

    #[test]
    fn test_parse_plain_text_is_private_message() {
        assert_eq!(
            parse_line("  hello there "),
            Ok(Some(Command::Say("hello there".into())))
        );
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn test_parse_commands_with_arguments() {
        assert_eq!(parse_line("/temp 0.25"), Ok(Some(Command::Temperature(0.25))));
        assert_eq!(
            parse_line("/addprivateprompt Be  terse."),
            Ok(Some(Command::AddPrompt {
                text: "Be  terse.".into(),
                global: false,
            }))
        );
        assert_eq!(parse_line("/selectprompt none"), Ok(Some(Command::SelectPrompt(None))));
        assert_eq!(parse_line("/selectprompt 3"), Ok(Some(Command::SelectPrompt(Some(3)))));
        assert_eq!(parse_line("/group marv?"), Ok(Some(Command::Group("marv?".into()))));
    }

    #[test]
    fn test_parse_reports_usage() {
        assert_eq!(
            parse_line("/temp warm"),
            Err("Usage: /temp [temperature value between 0.0 and 1.0]")
        );
        assert_eq!(
            parse_line("/addglobalprompt"),
            Err("Please provide a prompt text to add.")
        );
        assert!(parse_line("/frobnicate").is_err());
    }

    #[tokio::test]
    async fn test_pages_quote_reply_target() {
        let delivery = ConsoleDelivery::new(Vec::new());
        let target = ConversationTarget {
            chat_id: -1,
            reply_to: Some(4),
        };
        delivery
            .send_pages(&target, &["one".into(), "two".into()])
            .await
            .unwrap();
        delivery.send_notice(&target, "careful").await.unwrap();

        assert_eq!(
            delivery.written().await,
            "bot [re #4]> one\nbot [re #4]> two\n! careful\n"
        );
    }

    #[tokio::test]
    async fn test_session_commands() {
        let (mut console, delivery) = console();
        let input: &[u8] = b"/temp 0.3\n/temp 2\n/history\n/reset\n/reset\n/quit\n/about\n";

        console.run(input).await.unwrap();

        assert_eq!(
            delivery.written().await,
            "! Temperature set to 0.3 for this chat.\n\
             ! Temperature must be between 0.0 and 1.0.\n\
             ! No chat history available for this user\n\
             ! Chat has been reset\n\
             ! No chat history available for this user\n"
        );
    }

    #[tokio::test]
    async fn test_prompt_commands() {
        let (mut console, delivery) = console();
        let input: &[u8] =
            b"/addglobalprompt Be kind.\n/prompts\n/selectprompt 9\n/selectprompt 1\n/deleteprompt 1\n";

        console.run(input).await.unwrap();

        let written = delivery.written().await;
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "! Global prompt added successfully.",
                "! #1 [global] Be kind.",
                "! Prompt ID 9 not found.",
                "! Prompt #1 selected for 0 chats.",
                "! Deleted prompt ID: 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_failures_are_reported_and_loop_continues() {
        let (mut console, delivery) = console();
        let input: &[u8] = b"hello\n/pullmodel qwen\n/models\n";

        console.run(input).await.unwrap();

        assert_eq!(
            delivery.written().await,
            "! Something went wrong: transport error: connection refused\n\
             ! Failed to pull model 'qwen': transport error: connection refused\n\
             ! No models installed.\n"
        );
    }
}

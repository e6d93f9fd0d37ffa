use std::io::Write as _;
use std::path::Path;

use colored::Colorize as _;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use plume_chat::{
    ActiveTurn, ChatController, EditorBuffer, MarkdownFormat, Message, MessageStatus, Role,
    TurnProgress,
};
use plume_llm::{ChatTransport, default_models};

use crate::settings::SettingsStore;

const PROMPT: &str = "you> ";
const EDIT_PROMPT: &str = "edit> ";

/// Thin command loop over the chat controller. Owns no business state; every
/// command maps onto one controller or editor-buffer operation.
pub struct ChatRepl {
    controller: ChatController<dyn ChatTransport>,
    settings: SettingsStore,
    line_editor: DefaultEditor,
}

impl ChatRepl {
    pub fn new(
        controller: ChatController<dyn ChatTransport>,
        settings: SettingsStore,
    ) -> Result<Self, ReadlineError> {
        Ok(Self {
            controller,
            settings,
            line_editor: DefaultEditor::new()?,
        })
    }

    pub async fn run(mut self) -> Result<(), ReadlineError> {
        println!(
            "{} — streaming chat with a markdown canvas. {} for commands.",
            "plume".bold(),
            "/help".cyan()
        );

        loop {
            let line = match self.read_line(PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(error) => return Err(error),
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            let _ = self.line_editor.add_history_entry(input);

            if let Some(command) = input.strip_prefix('/') {
                if !self.handle_command(command)? {
                    break;
                }
            } else {
                self.send(input).await;
            }
        }

        Ok(())
    }

    /// Drives one send to its terminal state, printing fragments as they
    /// arrive. Awaiting the stream is what keeps new input unavailable while
    /// a turn is in flight.
    async fn send(&mut self, text: &str) {
        let turn = match self.controller.begin_send(text) {
            Ok(turn) => turn,
            Err(error) => {
                println!("{}", error.to_string().red());
                return;
            }
        };

        let ActiveTurn {
            mut stream, worker, ..
        } = turn;
        let worker = tokio::spawn(worker);

        print!("{}", "assistant> ".bold());
        let _ = std::io::stdout().flush();

        while let Some(event) = stream.recv().await {
            match self.controller.apply_event(event) {
                TurnProgress::Fragment(chunk) => {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                }
                TurnProgress::Completed { .. } => println!(),
                TurnProgress::Failed { .. } => {
                    // The notice is already in the conversation; echo it.
                    println!();
                    println!("{}", plume_chat::ERROR_NOTICE_TEXT.yellow());
                }
                TurnProgress::Ignored => {}
            }
        }

        let _ = worker.await;
    }

    /// Returns false when the loop should exit.
    fn handle_command(&mut self, command: &str) -> Result<bool, ReadlineError> {
        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("help") => self.print_help(),
            Some("quit") | Some("exit") => return Ok(false),
            Some("new") => match self.controller.reset() {
                Ok(()) => println!("started a new conversation"),
                Err(error) => println!("{}", error.to_string().red()),
            },
            Some("history") => self.print_history(),
            Some("models") => {
                for model in default_models() {
                    let marker = if model.id == self.controller.session_config().model_id {
                        "*"
                    } else {
                        " "
                    };
                    let description = model.description.unwrap_or_default();
                    println!("{marker} {:<24} {description}", model.id);
                }
            }
            Some("model") => match parts.next() {
                Some(model_id) => self.switch_model(model_id),
                None => println!("usage: /model <id>"),
            },
            Some("copy") => match parts.next().and_then(|raw| raw.parse::<usize>().ok()) {
                Some(index) => self.copy_message(index),
                None => println!("usage: /copy <n>  (see /history for numbering)"),
            },
            Some("edit") => match parts.next().and_then(|raw| raw.parse::<usize>().ok()) {
                Some(index) => self.edit_message(index)?,
                None => println!("usage: /edit <n>  (see /history for numbering)"),
            },
            _ => println!("unknown command; {} lists the available ones", "/help".cyan()),
        }

        Ok(true)
    }

    fn print_help(&self) {
        println!("plain text    send a message");
        println!("/new          start a new conversation (fresh session)");
        println!("/history      list messages with their numbers");
        println!("/edit <n>     open assistant reply n in the markdown canvas");
        println!("/copy <n>     copy message n to the clipboard");
        println!("/models       list models; /model <id> switches (new conversation)");
        println!("/quit         leave");
    }

    fn print_history(&self) {
        if self.controller.conversation().is_empty() {
            println!("(no messages yet)");
            return;
        }

        for (index, message) in self.controller.conversation().messages().iter().enumerate() {
            let speaker = match message.role {
                Role::User => "you".cyan(),
                Role::Assistant => "assistant".green(),
            };
            let flag = match &message.status {
                MessageStatus::Streaming => " [streaming]".yellow(),
                MessageStatus::Failed(_) => " [failed]".red(),
                MessageStatus::Done => "".normal(),
            };
            println!("{:>3}. {speaker}{flag}: {}", index + 1, preview(&message.text));
        }
    }

    fn switch_model(&mut self, model_id: &str) {
        let mut settings = (*self.settings.settings()).clone();
        settings.model = model_id.to_string();

        if let Err(error) = self.settings.update(settings) {
            println!("{}", error.to_string().red());
            return;
        }

        let session_config = self.settings.settings().to_session_config();
        match self.controller.reconfigure(session_config) {
            Ok(()) => println!("switched to {model_id}; started a new conversation"),
            Err(error) => println!("{}", error.to_string().red()),
        }
    }

    fn copy_message(&self, index: usize) {
        let Some(message) = self.message_at(index) else {
            println!("no message {index}");
            return;
        };
        let text = message.text.clone();

        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text)) {
            Ok(()) => println!("copied message {index}"),
            Err(error) => {
                tracing::warn!(error = %error, "clipboard write failed");
                println!("{}", "clipboard unavailable".yellow());
            }
        }
    }

    fn message_at(&self, index: usize) -> Option<&Message> {
        index
            .checked_sub(1)
            .and_then(|index| self.controller.conversation().messages().get(index))
    }

    /// The canvas sub-loop: a scratch [`EditorBuffer`] seeded from the
    /// message, committed back only on `:save`.
    fn edit_message(&mut self, index: usize) -> Result<(), ReadlineError> {
        let (id, seed) = match self.message_at(index) {
            Some(message) if message.role == Role::Assistant && !message.is_streaming() => {
                (message.id, message.text.clone())
            }
            Some(_) => {
                println!("only finished assistant replies can be edited");
                return Ok(());
            }
            None => {
                println!("no message {index}");
                return Ok(());
            }
        };

        let mut buffer = EditorBuffer::from_text(seed);
        println!(
            "editing message {index}; {} inserts, {} commands, {} saves, {} discards",
            "plain text".cyan(),
            ":bold/:sel/:file/…".cyan(),
            ":save".cyan(),
            ":cancel".cyan()
        );

        loop {
            let line = match self.read_line(EDIT_PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    println!("discarded");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            let Some(command) = line.trim_end().strip_prefix(':') else {
                // Plain input flows through the cursor like typing.
                if !line.trim().is_empty() {
                    buffer.insert_at_cursor(line.trim_end());
                }
                continue;
            };

            let mut parts = command.split_whitespace();
            match parts.next() {
                Some("save") => {
                    match self.controller.commit_edit(id, buffer.text().to_string()) {
                        Ok(()) => println!("saved message {index}"),
                        Err(rejection) => println!("{}", rejection.to_string().red()),
                    }
                    return Ok(());
                }
                Some("cancel") => {
                    println!("discarded");
                    return Ok(());
                }
                Some("show") => {
                    let selection = buffer.selection();
                    println!("{}", buffer.text());
                    println!(
                        "(selection {}..{} of {})",
                        selection.start,
                        selection.end,
                        buffer.text().len()
                    );
                }
                Some("sel") => {
                    let start = parts.next().and_then(|raw| raw.parse::<usize>().ok());
                    let end = parts.next().and_then(|raw| raw.parse::<usize>().ok());
                    match (start, end) {
                        (Some(start), Some(end)) => buffer.set_selection(start, end),
                        _ => println!("usage: :sel <start> <end>"),
                    }
                }
                Some("insert") => {
                    let content = command.strip_prefix("insert").unwrap_or("").trim_start();
                    buffer.insert_at_cursor(content);
                }
                Some("file") => match parts.next() {
                    Some(path) => insert_file(&mut buffer, Path::new(path)),
                    None => println!("usage: :file <path>"),
                },
                Some(name) => match format_for(name) {
                    Some(format) => format.apply(&mut buffer),
                    None => println!("unknown editor command :{name}"),
                },
                None => {}
            }
        }
    }

    fn read_line(&mut self, prompt: &str) -> Result<String, ReadlineError> {
        // rustyline blocks; keep the runtime's other workers responsive.
        tokio::task::block_in_place(|| self.line_editor.readline(prompt))
    }
}

fn format_for(name: &str) -> Option<MarkdownFormat> {
    match name {
        "bold" => Some(MarkdownFormat::Bold),
        "italic" => Some(MarkdownFormat::Italic),
        "heading" => Some(MarkdownFormat::Heading),
        "list" => Some(MarkdownFormat::List),
        "code" => Some(MarkdownFormat::InlineCode),
        "codeblock" => Some(MarkdownFormat::CodeBlock),
        "link" => Some(MarkdownFormat::Link),
        _ => None,
    }
}

fn insert_file(buffer: &mut EditorBuffer, path: &Path) {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) => {
            println!("could not read {}: {error}", path.display());
            return;
        }
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    match plume_chat::insertable_fragment(&file_name, mime_type_for_path(path), &bytes) {
        Ok(fragment) => buffer.insert_at_cursor(&fragment),
        Err(error) => println!("{}", error.to_string().yellow()),
    }
}

/// Extension-based MIME guess feeding the ingestion boundary; anything
/// unrecognized is handed over as an opaque type and rejected there.
fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 72;
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= MAX {
        return flat;
    }
    let truncated = flat.chars().take(MAX).collect::<String>();
    format!("{truncated}…")
}

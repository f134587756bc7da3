//! Terminal surface
//!
//! Renders sessions progressively by writing the unseen tail of each
//! snapshot, and runs the interactive REPL on top of the dispatcher.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use buddy_core::{
    Action, CallerId, Difficulty, Dispatcher, Document, Marks, SessionId, SessionState,
};

const HELP: &str = "\
Commands:
  <text>                              ask about your study materials
  /summarize <url>                    summarize a YouTube video
  /mcq [count] [difficulty] [topics]  multiple-choice questions (1-20, easy|medium|hard)
  /long [count] [marks] [topics]      long-form questions (1-5, 5|10|15|20 marks)
  /ingest <file.pdf>...               upload study materials
  /history                            show the transcript
  /export                             print the transcript as JSON
  /sessions                           list open sessions
  /clear                              clear the transcript
  /help                               show this help
  /quit                               leave (Ctrl-D also works)
Ctrl-C cancels a response in progress.";

/// One parsed REPL line
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    /// Run an action
    Run(Action),
    /// Store documents
    Ingest(Vec<PathBuf>),
    /// Print the transcript
    History,
    /// Print the transcript as JSON
    Export,
    /// List registry sessions
    Sessions,
    /// Clear the transcript
    Clear,
    /// Print help
    Help,
    /// Leave the REPL
    Quit,
}

/// Parse one REPL line
///
/// # Errors
///
/// Returns a message for unknown commands or missing arguments.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Run(Action::chat(line)));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match name {
        "summarize" | "sum" => match args.as_slice() {
            [url] => Ok(Command::Run(Action::summarize(*url))),
            _ => Err("usage: /summarize <url>".to_string()),
        },
        "mcq" => {
            let (count, rest) = take_number(&args, 5)?;
            let (difficulty, rest) = match rest.first().map(|w| w.parse::<Difficulty>()) {
                Some(Ok(difficulty)) => (difficulty, &rest[1..]),
                _ => (Difficulty::default(), rest),
            };
            Ok(Command::Run(
                Action::mcq(count, difficulty).with_topics(rest.join(" ")),
            ))
        }
        "long" => {
            let (count, rest) = take_number(&args, 2)?;
            let (marks, rest) = match rest.first().map(|w| w.parse::<Marks>()) {
                Some(Ok(marks)) => (marks, &rest[1..]),
                Some(Err(e)) if rest[0].parse::<u8>().is_ok() => return Err(e),
                _ => (Marks::default(), rest),
            };
            Ok(Command::Run(
                Action::long_form(count, marks).with_topics(rest.join(" ")),
            ))
        }
        "ingest" if !args.is_empty() => {
            Ok(Command::Ingest(args.iter().map(PathBuf::from).collect()))
        }
        "ingest" => Err("usage: /ingest <file.pdf>...".to_string()),
        "history" => Ok(Command::History),
        "export" => Ok(Command::Export),
        "sessions" => Ok(Command::Sessions),
        "clear" => Ok(Command::Clear),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

fn take_number<'a>(args: &'a [&'a str], default: u8) -> Result<(u8, &'a [&'a str]), String> {
    match args.first() {
        Some(word) if word.chars().all(|c| c.is_ascii_digit()) => word
            .parse::<u8>()
            .map(|n| (n, &args[1..]))
            .map_err(|_| format!("{word} is too large")),
        _ => Ok((default, args)),
    }
}

/// Terminal front end over a dispatcher
pub struct Surface<W> {
    dispatcher: Dispatcher,
    caller: CallerId,
    out: W,
}

impl<W: AsyncWrite + Unpin> Surface<W> {
    /// Create a surface writing to `out`
    pub fn new(dispatcher: Dispatcher, caller: CallerId, out: W) -> Self {
        Self {
            dispatcher,
            caller,
            out,
        }
    }

    /// The dispatcher behind this surface
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Consume the surface, returning its writer
    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.out
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }

    /// Dispatch an action, stream its output and settle the session
    ///
    /// Returns the final state. Completed output is committed to the
    /// transcript; anything else is discarded with a notice.
    pub async fn run_action(&mut self, action: Action) -> Result<SessionState> {
        let id = self.dispatcher.dispatch(&self.caller, action).await?;
        let state = self.render(id).await?;

        if let Err(e) = self.dispatcher.commit(id) {
            self.dispatcher.discard(id)?;
            self.say(&format!("[{}] {e}", state.label())).await?;
        }
        Ok(state)
    }

    /// Stream a session to the writer until it is terminal
    async fn render(&mut self, id: SessionId) -> Result<SessionState> {
        let mut observer = self.dispatcher.observe(id)?;
        let mut printed = 0;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;

        loop {
            let snapshot = observer.snapshot();
            if snapshot.len() > printed {
                self.out.write_all(&snapshot.as_bytes()[printed..]).await?;
                self.out.flush().await?;
                printed = snapshot.len();
            }
            if observer.is_terminal() {
                break;
            }

            tokio::select! {
                more = observer.changed() => {
                    if !more {
                        break;
                    }
                }
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    self.dispatcher.cancel(id)?;
                }
            }
        }

        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(observer.state())
    }

    /// Store documents read from disk and report the outcome
    pub async fn ingest(&mut self, paths: &[PathBuf]) -> Result<usize> {
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            match Document::from_path(path).await {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    self.say(&format!("skipped {}: {e}", path.display())).await?;
                }
            }
        }

        let report = self.dispatcher.ingest(documents).await?;
        for name in &report.stored {
            self.say(&format!("stored {name}")).await?;
        }
        for (name, reason) in &report.rejected {
            self.say(&format!("rejected {name}: {reason}")).await?;
        }
        if !report.any_stored() {
            self.say("nothing stored").await?;
        }
        Ok(report.stored.len())
    }

    async fn history(&mut self) -> Result<()> {
        let entries = self.dispatcher.transcript().all();
        if entries.is_empty() {
            return self.say("(transcript is empty)").await;
        }
        for entry in entries {
            let line = format!(
                "[{}] {}: {}\n",
                entry.timestamp.format("%H:%M:%S"),
                entry.role.label(),
                entry.content
            );
            self.say(&line).await?;
        }
        Ok(())
    }

    async fn sessions(&mut self) -> Result<()> {
        let summary = self.dispatcher.registry().summary();
        self.say(&format!(
            "{} active, {} finished",
            summary.active, summary.terminal
        ))
        .await?;
        for session in summary.sessions {
            self.say(&format!(
                "  {} {} {} ({} bytes)",
                session.id, session.kind, session.state, session.bytes
            ))
            .await?;
        }
        Ok(())
    }

    /// Execute one parsed command; returns `false` when the REPL should stop
    pub async fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Empty => {}
            Command::Run(action) => {
                if let Err(e) = self.run_action(action).await {
                    self.say(&format!("error: {e}")).await?;
                }
            }
            Command::Ingest(paths) => {
                if let Err(e) = self.ingest(&paths).await {
                    self.say(&format!("error: {e}")).await?;
                }
            }
            Command::History => self.history().await?,
            Command::Export => {
                let json = self.dispatcher.transcript().export_json()?;
                self.say(&json).await?;
            }
            Command::Sessions => self.sessions().await?,
            Command::Clear => {
                let removed = self.dispatcher.clear_transcript();
                self.say(&format!("cleared {removed} entries")).await?;
            }
            Command::Help => self.say(HELP).await?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Read commands from stdin until `/quit`, end of input or Ctrl-C at the prompt
    pub async fn repl(&mut self) -> Result<()> {
        self.say("Exam Buddy. Type /help for commands.").await?;
        match self.dispatcher.has_documents().await {
            Ok(true) => {}
            Ok(false) => {
                self.say("No study materials yet; use /ingest <file.pdf> to add some.")
                    .await?;
            }
            Err(e) => self.say(&format!("study materials unavailable: {e}")).await?,
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.out.write_all(b"> ").await?;
            self.out.flush().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Ok(command) => {
                    if !self.execute(command).await? {
                        break;
                    }
                }
                Err(message) => self.say(&message).await?,
            }
        }
        Ok(())
    }
}

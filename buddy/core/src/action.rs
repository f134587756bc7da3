//! User Actions
//!
//! The four things a study surface can ask for, with their parameters
//! validated before any session is opened.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{BuddyError, Result};

/// Maximum number of MCQs per request
pub const MAX_MCQ_COUNT: u8 = 20;
/// Maximum number of long-form questions per request
pub const MAX_LONG_FORM_COUNT: u8 = 5;

/// Which agent an action is routed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Free-form question about the study materials
    Chat,
    /// Video summary
    Summarize,
    /// Multiple-choice question generation
    Mcq,
    /// Long-form (essay) question generation
    LongForm,
}

impl ActionKind {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Summarize => "summarize",
            Self::Mcq => "mcq",
            Self::LongForm => "long-form",
        }
    }

    /// Whether the action needs at least one ingested document
    #[must_use]
    pub fn requires_documents(&self) -> bool {
        !matches!(self, Self::Summarize)
    }

    /// Heading placed above committed output in the transcript
    #[must_use]
    pub fn transcript_heading(&self) -> Option<&'static str> {
        match self {
            Self::Chat => None,
            Self::Summarize => Some("**Video Summary:**"),
            Self::Mcq => Some("**Generated MCQs:**"),
            Self::LongForm => Some("**Generated Long-Form Questions:**"),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// MCQ difficulty level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    /// Easy
    Easy,
    /// Medium
    #[default]
    Medium,
    /// Hard
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        })
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty '{other}' (expected easy, medium or hard)")),
        }
    }
}

/// Marks awarded per long-form question
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marks(u8);

impl Marks {
    /// The accepted mark values
    pub const ALLOWED: [u8; 4] = [5, 10, 15, 20];

    /// Get the mark value
    #[must_use]
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Marks {
    fn default() -> Self {
        Self(10)
    }
}

impl TryFrom<u8> for Marks {
    type Error = BuddyError;

    fn try_from(value: u8) -> Result<Self> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(BuddyError::precondition(format!(
                "marks per question must be one of {:?}, got {value}",
                Self::ALLOWED
            )))
        }
    }
}

impl FromStr for Marks {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: u8 = s.trim().parse().map_err(|e| format!("invalid marks '{s}': {e}"))?;
        Self::try_from(value).map_err(|e| e.to_string())
    }
}

impl fmt::Display for Marks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user action submitted to the dispatcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Ask a question about the study materials
    Chat {
        /// The user's question
        prompt: String,
    },
    /// Summarize a YouTube video
    Summarize {
        /// Video URL as typed by the user
        video_url: String,
    },
    /// Generate multiple-choice questions
    Mcq {
        /// Number of questions (1..=20)
        count: u8,
        /// Difficulty level
        difficulty: Difficulty,
        /// Optional focus topics
        topics: Option<String>,
    },
    /// Generate long-form questions with model answers
    LongForm {
        /// Number of questions (1..=5)
        count: u8,
        /// Marks per question
        marks: Marks,
        /// Optional focus topics
        topics: Option<String>,
    },
}

impl Action {
    /// Create a chat action
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self::Chat {
            prompt: prompt.into(),
        }
    }

    /// Create a summarize action
    pub fn summarize(video_url: impl Into<String>) -> Self {
        Self::Summarize {
            video_url: video_url.into(),
        }
    }

    /// Create an MCQ action without focus topics
    #[must_use]
    pub fn mcq(count: u8, difficulty: Difficulty) -> Self {
        Self::Mcq {
            count,
            difficulty,
            topics: None,
        }
    }

    /// Create a long-form action without focus topics
    #[must_use]
    pub fn long_form(count: u8, marks: Marks) -> Self {
        Self::LongForm {
            count,
            marks,
            topics: None,
        }
    }

    /// Set focus topics (ignored for chat and summarize)
    ///
    /// Blank input means "all topics".
    #[must_use]
    pub fn with_topics(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        let normalized = if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        };
        match &mut self {
            Self::Mcq { topics, .. } | Self::LongForm { topics, .. } => *topics = normalized,
            Self::Chat { .. } | Self::Summarize { .. } => {}
        }
        self
    }

    /// The kind of this action
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Chat { .. } => ActionKind::Chat,
            Self::Summarize { .. } => ActionKind::Summarize,
            Self::Mcq { .. } => ActionKind::Mcq,
            Self::LongForm { .. } => ActionKind::LongForm,
        }
    }

    /// Check parameter ranges
    ///
    /// Document availability is checked by the dispatcher, not here.
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::PreconditionNotMet`] describing the first
    /// invalid parameter.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Chat { prompt } => {
                if prompt.trim().is_empty() {
                    return Err(BuddyError::precondition("chat prompt is empty"));
                }
            }
            Self::Summarize { video_url } => {
                VideoRef::parse(video_url)?;
            }
            Self::Mcq { count, .. } => check_count(*count, MAX_MCQ_COUNT, "multiple-choice")?,
            Self::LongForm { count, .. } => {
                check_count(*count, MAX_LONG_FORM_COUNT, "long-form")?;
            }
        }
        Ok(())
    }
}

fn check_count(count: u8, max: u8, what: &str) -> Result<()> {
    if (1..=max).contains(&count) {
        Ok(())
    } else {
        Err(BuddyError::precondition(format!(
            "number of {what} questions must be between 1 and {max}, got {count}"
        )))
    }
}

/// A syntactically valid YouTube video reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoRef {
    id: String,
}

impl VideoRef {
    /// Parse a YouTube URL (watch, short link, shorts, embed or live form)
    ///
    /// A scheme-less input such as `youtu.be/<id>` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::PreconditionNotMet`] when the input is not a
    /// YouTube URL or does not carry a well-formed video ID.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BuddyError::precondition("video URL is empty"));
        }

        let url = Url::parse(input)
            .or_else(|_| Url::parse(&format!("https://{input}")))
            .map_err(|e| BuddyError::precondition(format!("invalid video URL '{input}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(BuddyError::precondition(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let host = url.host_str().unwrap_or_default().to_lowercase();
        let host = host
            .strip_prefix("www.")
            .or_else(|| host.strip_prefix("m."))
            .or_else(|| host.strip_prefix("music."))
            .unwrap_or(&host);

        let mut segments = url.path_segments().into_iter().flatten();
        let id = match host {
            "youtu.be" => segments.next().map(str::to_string),
            "youtube.com" | "youtube-nocookie.com" => match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
                _ => None,
            },
            _ => {
                return Err(BuddyError::precondition(format!(
                    "'{input}' is not a YouTube URL"
                )))
            }
        };

        match id {
            Some(id) if is_video_id(&id) => Ok(Self { id }),
            _ => Err(BuddyError::precondition(format!(
                "'{input}' does not contain a valid video ID"
            ))),
        }
    }

    /// The 11-character video ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical watch URL
    #[must_use]
    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

//! Prompt Builders
//!
//! Agent personas and the per-action prompt templates sent to generators.

use crate::action::{Difficulty, Marks};

/// A pre-built agent's persona
#[derive(Clone, Copy, Debug)]
pub struct Persona {
    /// One-line role description
    pub description: &'static str,
    /// Behavioral rules, in order
    pub instructions: &'static [&'static str],
}

impl Persona {
    /// Render as a system prompt
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(self.description);
        if !self.instructions.is_empty() {
            prompt.push_str("\n\nInstructions:\n");
            for instruction in self.instructions {
                prompt.push_str("- ");
                prompt.push_str(instruction);
                prompt.push('\n');
            }
        }
        prompt
    }
}

/// Study-materials chat agent
pub const CHAT_PERSONA: Persona = Persona {
    description: "You are a study assistant that answers questions using the uploaded study materials.",
    instructions: &[
        "Search the knowledge base before answering.",
        "Prefer information found in the study materials over general knowledge.",
        "Say so when the materials do not cover the question.",
    ],
};

/// Video summarizer agent
pub const SUMMARIZER_PERSONA: Persona = Persona {
    description: "You are an AI agent that summarizes YouTube videos.",
    instructions: &[
        "When given a YouTube video URL, analyze the video and provide a detailed summary.",
        "Include key points, main topics, and important timestamps in your summary.",
        "Organize the summary in a clear and concise manner.",
        "If the video contains visual elements that are crucial to understanding, mention them.",
        "For educational content, highlight main concepts and learning objectives.",
        "For reviews or comparisons, summarize pros and cons or key comparison points.",
    ],
};

/// Exam question generator agent
pub const QUESTION_PERSONA: Persona = Persona {
    description: "You are an AI agent specialized in creating exam questions based on study materials in the knowledge base.",
    instructions: &[
        "Create high-quality academic questions based ONLY on the content from the knowledge base.",
        "Do NOT generate questions about topics or information not explicitly found in the retrieved documents.",
        "Each question MUST be tied directly to specific content from the knowledge base.",
        "For MCQs, include 4 options with exactly one correct answer that can be verified from the source material.",
        "For long-form questions, create questions that test understanding of specific content from the source materials.",
        "Include precise citations or page references for the information used in each question.",
        "If insufficient information is available on a requested topic, state this clearly rather than fabricating content.",
        "Include the specific source document and section for each question you generate.",
        "Organize questions by topic and difficulty level when appropriate.",
        "If asked to generate questions about a topic not covered in the knowledge base, explain that you cannot generate those questions due to lack of source material.",
    ],
};

const DEFAULT_LONG_FORM_TOPICS: &str = "the most important concepts in the study materials";

/// Prompt for a video summary
#[must_use]
pub fn summarize_prompt(video_url: &str) -> String {
    format!("Summarize this YouTube video: {video_url}")
}

/// Prompt for multiple-choice questions
#[must_use]
pub fn mcq_prompt(count: u8, difficulty: Difficulty, topics: Option<&str>) -> String {
    let mut prompt =
        format!("Generate {count} multiple-choice questions at {difficulty} difficulty level");
    if let Some(topics) = topics.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(" focusing on these topics: ");
        prompt.push_str(topics);
    }
    prompt.push_str(
        ". Format each question with a question number, the question text, 4 options labeled \
         A, B, C, D, and mark the correct answer. Provide an explanation for why the answer is \
         correct.",
    );
    prompt
}

/// Prompt for long-form questions with model answers and marking schemes
#[must_use]
pub fn long_form_prompt(count: u8, marks: Marks, topics: Option<&str>) -> String {
    let topics = topics
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_LONG_FORM_TOPICS);

    format!(
        "Generate {count} comprehensive long-form questions worth {marks} marks each.

IMPORTANT INSTRUCTIONS:
1. First, thoroughly search the knowledge base for detailed content on {topics}.
2. Generate questions ONLY about content you can find in the knowledge base. DO NOT invent or fabricate information.
3. Each question must be based on SPECIFIC sections, quotes, or passages from your knowledge base.
4. For each section of knowledge you use, include the exact document name and page/section reference.

For each question, please structure your response as follows:

### Question {marks} marks
[Clear, specific question that requires in-depth knowledge of the material]

### Source Material
[Specific document name(s) and exact page numbers/sections this question is based on]

### Key Concepts Tested
- [List 3-5 key concepts or terms from the knowledge base that this question tests]

### Model Answer
[A comprehensive model answer that would score full marks, containing ONLY information found in the knowledge base]

### Marking Scheme
- [Break down how marks would be awarded for different components of the answer]
- [Include specific terms, theories, or examples that must be mentioned]

---

If you cannot find enough relevant content in the knowledge base on the requested topics, clearly state which topics lack sufficient information rather than creating questions about them.
"
    )
}

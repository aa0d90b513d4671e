//! Prompt builders

pub const MAX_QUESTIONS: usize = 5;
pub const MAX_TAGS: usize = 5;

const QUESTION_CONTENT_CHARS: usize = 5_000;
const ANSWER_CONTENT_CHARS: usize = 10_000;
const TAG_CONTENT_CHARS: usize = 3_000;

const QUESTIONS_JSON_SHAPE: &str = r#"{"questions": [{"id": "q1", "text": "Question text", "type": "fact|analysis|exploratory", "confidence": 0.0-1.0}]}"#;

/// Output language named in prompts
pub fn language_label(lang: &str) -> &'static str {
    if crate::fingerprint::normalize_lang(lang) == "zh-tw" {
        "繁體中文"
    } else {
        "English"
    }
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn custom(prompt: Option<&str>) -> Option<&str> {
    prompt.map(str::trim).filter(|p| !p.is_empty())
}

pub fn questions_prompt(
    content: &str,
    lang: &str,
    previous_questions: &[String],
    custom_prompt: Option<&str>,
) -> String {
    let language = language_label(lang);

    let (instruction, requirements) = match custom(custom_prompt) {
        Some(instruction) => (
            instruction.to_string(),
            format!(
                "Requirements:\n\
                 1. Follow the instruction: {instruction}\n\
                 2. Generate {MAX_QUESTIONS} questions in {language}\n\
                 3. Keep questions short and simple (under 20 words for Chinese, under 15 words for English)\n\
                 4. Return JSON format: {QUESTIONS_JSON_SHAPE}"
            ),
        ),
        None => (
            format!("Generate {MAX_QUESTIONS} short, simple, direct questions in {language}"),
            format!(
                "Requirements:\n\
                 1. Questions must be short and simple (like: \"什麼是包冰？\" or \"Why does frozen shrimp have ice?\")\n\
                 2. Each question should be direct and easy to understand\n\
                 3. Avoid long, complex questions\n\
                 4. Return JSON format: {QUESTIONS_JSON_SHAPE}"
            ),
        ),
    };

    let previous = if previous_questions.is_empty() {
        String::new()
    } else {
        format!("Previous questions to avoid: {}", previous_questions.join(", "))
    };

    format!(
        "{instruction}\n\nContent:\n{content}\n\n{requirements}\n\n{previous}\n\nGenerate questions now:",
        content = truncate_chars(content, QUESTION_CONTENT_CHARS),
    )
}

/// Answer prompt. A custom prompt replaces the default instruction; the
/// content and question are always included.
pub fn answer_prompt(content: &str, question: &str, lang: &str, custom_prompt: Option<&str>) -> String {
    let language = language_label(lang);
    let instruction = match custom(custom_prompt) {
        Some(instruction) => instruction.to_string(),
        None => format!(
            "Based on the provided content, answer the question comprehensively in {language}."
        ),
    };

    format!(
        "{instruction}\n\n\
         Content:\n{content}\n\n\
         Question: {question}\n\n\
         Requirements:\n\
         1. Provide a clear, analytical answer\n\
         2. Cite specific parts of the content when relevant\n\
         3. If the content doesn't contain enough information, state that clearly\n\
         4. Format response in clear paragraphs\n\
         5. Use markdown for formatting if needed\n\n\
         Answer:",
        content = truncate_chars(content, ANSWER_CONTENT_CHARS),
        question = question.trim(),
    )
}

pub fn tags_prompt(content: &str, custom_prompt: Option<&str>) -> String {
    let instruction = custom(custom_prompt)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Generate {MAX_TAGS} concise topic tags for the following content."));

    format!(
        "{instruction}\nReturn only a comma-separated list of tags, no explanation.\n\n\
         Content:\n{content}\n\n\
         Tags:",
        content = truncate_chars(content, TAG_CONTENT_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_label() {
        assert_eq!(language_label("zh-tw"), "繁體中文");
        assert_eq!(language_label("ZH_TW"), "繁體中文");
        assert_eq!(language_label("en"), "English");
        assert_eq!(language_label("ja"), "English");
    }

    #[test]
    fn test_questions_prompt_truncates_and_lists_previous() {
        let content = "字".repeat(6_000);
        let prompt = questions_prompt(&content, "zh-tw", &["A?".to_string(), "B?".to_string()], None);

        assert!(prompt.contains(&"字".repeat(5_000)));
        assert!(!prompt.contains(&"字".repeat(5_001)));
        assert!(prompt.contains("Previous questions to avoid: A?, B?"));
        assert!(prompt.contains("繁體中文"));
    }

    #[test]
    fn test_custom_question_prompt_is_the_instruction() {
        let prompt = questions_prompt("text", "en", &[], Some("Ask about pricing"));
        assert!(prompt.starts_with("Ask about pricing"));
        assert!(prompt.contains("Follow the instruction: Ask about pricing"));
    }

    #[test]
    fn test_answer_prompt_keeps_question_with_custom_instruction() {
        let prompt = answer_prompt("body", "Why?", "en", Some("Answer like a pirate"));
        assert!(prompt.starts_with("Answer like a pirate"));
        assert!(prompt.contains("Question: Why?"));
        assert!(prompt.contains("Content:\nbody"));
    }

    #[test]
    fn test_blank_custom_prompt_is_ignored() {
        assert_eq!(
            answer_prompt("body", "Why?", "en", Some("   ")),
            answer_prompt("body", "Why?", "en", None)
        );
    }
}

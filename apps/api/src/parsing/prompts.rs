// Prompt templates for resume parsing.

use thiserror::Error;

use crate::extractors::ExtractedDocument;
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, NO_TRANSLATION_INSTRUCTION};

/// Inserted between the head and tail windows of an over-long resume.
pub const TRUNCATION_MARKER: &str = "\n\n[... middle of resume omitted ...]\n\n";

const CHARS_PER_TOKEN: usize = 4;

/// Smallest slice of resume text worth sending once the instructions are in place.
const MIN_RESUME_CHARS: usize = 400;

pub const PARSE_RESUME_INSTRUCTIONS: &str = r#"Extract the resume below into a JSON object with these keys:

- "contact": object with "name", "email", "phone", "location", "linkedin", "website"
- "summary": string, the professional summary or objective
- "experience": array of objects with "title", "company", "location", "start_date", "end_date", "description", "highlights" (array of strings)
- "education": array of objects with "institution", "degree", "field", "start_date", "end_date", "grade"
- "skills": array of strings
- "projects": array of objects with "name", "description", "technologies" (array of strings), "url"
- "certifications": array of objects with "name", "issuer", "date"
- "languages": array of strings such as "English (native)"

Use one array entry per job, degree, project or certificate, in the order they appear.
Omit any key whose section does not exist in the resume."#;

/// Fully built request for one parse. Identical documents give identical prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsingPrompt {
    pub system: String,
    pub user: String,
    pub truncated: bool,
    pub estimated_tokens: usize,
}

/// `ceil(chars / 4)`; close enough for budget checks across providers.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("input budget of {max_input_tokens} tokens is below the {min_input_tokens} tokens a parse prompt needs")]
pub struct BudgetTooSmall {
    pub max_input_tokens: usize,
    pub min_input_tokens: usize,
}

/// Fewest input tokens that still leave room for the instructions, the truncation
/// marker and some resume text.
pub fn min_input_tokens() -> usize {
    let chars = frame("").chars().count() + TRUNCATION_MARKER.chars().count() + MIN_RESUME_CHARS;
    chars.div_ceil(CHARS_PER_TOKEN)
}

pub fn build_parse_prompt(
    document: &ExtractedDocument,
    max_input_tokens: usize,
) -> Result<ParsingPrompt, BudgetTooSmall> {
    let min_input_tokens = min_input_tokens();
    if max_input_tokens < min_input_tokens {
        return Err(BudgetTooSmall {
            max_input_tokens,
            min_input_tokens,
        });
    }

    let frame_chars = frame("").chars().count();
    let budget_chars = max_input_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .saturating_sub(frame_chars);

    let (body, truncated) = fit_to_budget(&document.text, budget_chars);
    let user = frame(&body);

    Ok(ParsingPrompt {
        system: JSON_ONLY_SYSTEM.to_string(),
        estimated_tokens: estimate_tokens(&user),
        user,
        truncated,
    })
}

fn frame(resume_text: &str) -> String {
    format!(
        "{PARSE_RESUME_INSTRUCTIONS}\n{NO_TRANSLATION_INSTRUCTION}\n\nRESUME TEXT:\n<<<\n{resume_text}\n>>>"
    )
}

/// Keeps the text whole when it fits, otherwise the first two thirds and the last
/// third of the budget joined by `TRUNCATION_MARKER`.
fn fit_to_budget(text: &str, budget_chars: usize) -> (String, bool) {
    let total_chars = text.chars().count();
    if total_chars <= budget_chars {
        return (text.to_string(), false);
    }

    let window = budget_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let head_chars = window * 2 / 3;
    let tail_chars = window - head_chars;

    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total_chars - tail_chars).collect();
    (format!("{head}{TRUNCATION_MARKER}{tail}"), true)
}

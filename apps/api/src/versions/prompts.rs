// Prompt templates for tailoring a parsed resume to a job description.

use serde_json::{Map, Value};

use crate::llm_client::prompts::NO_TRANSLATION_INSTRUCTION;
use crate::resumes::models::{Section, SectionContent};

/// System prompt for section customization.
pub const CUSTOMIZE_SYSTEM: &str = "You are an expert resume writer tailoring an existing \
    resume to a job description. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT invent employers, degrees, dates or skills that are not in the resume.";

/// Replace `{sections_json}` and `{job_description}` before sending.
pub const CUSTOMIZE_PROMPT_TEMPLATE: &str = r#"Rewrite the resume sections below so they target the job description.

Return a JSON object with exactly the same keys as RESUME SECTIONS, each value in the same shape
as the input (objects stay objects, arrays stay arrays, strings stay strings).

Rules:
- Keep every entry. Reorder entries and highlights so the most relevant to the job come first.
- Rephrase summaries, descriptions and highlights using the job description's terminology where
  the resume supports it.
- List the skills the job asks for first, but only skills already present in the resume.
- Do NOT change names, employers, institutions, titles or dates.
{no_translation}

RESUME SECTIONS:
{sections_json}

JOB DESCRIPTION:
{job_description}"#;

/// System prompt for cover letter generation.
pub const COVER_LETTER_SYSTEM: &str = "You are an expert career writer. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT claim experience the resume does not show.";

/// Replace `{sections_json}` and `{job_description}` before sending.
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Write a cover letter for the candidate below, addressed to the hiring team of the job description.

Return a JSON object with this EXACT schema (no extra fields):
{"cover_letter": "full letter text, paragraphs separated by blank lines"}

Rules:
- Three or four short paragraphs, 250 to 400 words in total.
- Open with the role, connect two or three concrete achievements from the resume to the job's
  requirements, and close with a call to action.
- Write in the language of the job description.

RESUME SECTIONS:
{sections_json}

JOB DESCRIPTION:
{job_description}"#;

/// Sections as one `{kind: value}` object, without the storage tags.
pub fn sections_json(sections: &[Section]) -> String {
    let map: Map<String, Value> = sections
        .iter()
        .map(|section| {
            let value = match &section.content {
                SectionContent::Fields(fields) => Value::Object(fields.clone()),
                SectionContent::Text(text) => Value::String(text.clone()),
                SectionContent::Entries(entries) => Value::Array(entries.clone()),
                SectionContent::List(items) => {
                    Value::Array(items.iter().cloned().map(Value::String).collect())
                }
            };
            (section.kind.as_str().to_string(), value)
        })
        .collect();
    format!("{:#}", Value::Object(map))
}

pub fn build_customization_prompt(sections: &[Section], job_description: &str) -> String {
    CUSTOMIZE_PROMPT_TEMPLATE
        .replace("{no_translation}", NO_TRANSLATION_INSTRUCTION)
        .replace("{sections_json}", &sections_json(sections))
        .replace("{job_description}", job_description.trim())
}

pub fn build_cover_letter_prompt(sections: &[Section], job_description: &str) -> String {
    COVER_LETTER_PROMPT_TEMPLATE
        .replace("{sections_json}", &sections_json(sections))
        .replace("{job_description}", job_description.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resumes::models::SectionKind;
    use serde_json::json;

    fn sections() -> Vec<Section> {
        vec![
            Section {
                kind: SectionKind::Summary,
                content: SectionContent::Text("Backend engineer".into()),
            },
            Section {
                kind: SectionKind::Skills,
                content: SectionContent::List(vec!["Rust".into(), "SQL".into()]),
            },
        ]
    }

    #[test]
    fn test_sections_json_drops_storage_tags() {
        let value: Value = serde_json::from_str(&sections_json(&sections())).unwrap();
        assert_eq!(
            value,
            json!({"summary": "Backend engineer", "skills": ["Rust", "SQL"]})
        );
    }

    #[test]
    fn test_customization_prompt_fills_every_placeholder() {
        let prompt = build_customization_prompt(&sections(), "  Senior Rust developer  ");
        assert!(prompt.contains("\"skills\""));
        assert!(prompt.contains("JOB DESCRIPTION:\nSenior Rust developer"));
        assert!(prompt.contains(NO_TRANSLATION_INSTRUCTION));
        assert!(!prompt.contains("{sections_json}"));
        assert!(!prompt.contains("{job_description}"));
        assert!(!prompt.contains("{no_translation}"));
    }

    #[test]
    fn test_cover_letter_prompt_asks_for_cover_letter_key() {
        let prompt = build_cover_letter_prompt(&sections(), "Data engineer at Acme");
        assert!(prompt.contains(r#"{"cover_letter":"#));
        assert!(prompt.contains("Data engineer at Acme"));
        assert!(prompt.contains("Backend engineer"));
    }
}

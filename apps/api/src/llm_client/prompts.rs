// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to every extraction prompt so the model copies rather than rewrites.
pub const NO_TRANSLATION_INSTRUCTION: &str = "\
    Keep every value in the language it was written in. Do NOT translate, \
    summarize or embellish. If a value is unknown, omit the key instead of guessing.";

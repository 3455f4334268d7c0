//! Maps whatever JSON-ish text the model produced onto the fixed section schema.
//!
//! Models drift: they wrap the answer in envelopes, rename keys, return a list of
//! `{title, content}` objects, or pick a different shape for a section. Every key is
//! matched through `ALIASES` and every value is coerced through `coerce`; a section
//! that cannot be recovered is reported in `unrecovered` rather than failing the
//! whole parse.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm_client::strip_json_fences;
use crate::resumes::models::{Section, SectionContent, SectionKind};

/// Top-level wrappers some models put around the actual answer.
const ENVELOPE_KEYS: &[&str] = &["resume", "data", "result", "parsed_resume", "output"];
const SECTIONS_KEY: &str = "sections";
const MAX_ENVELOPE_DEPTH: usize = 4;

const SECTION_TITLE_KEYS: &[&str] = &["title", "heading", "name", "section"];
const SECTION_BODY_KEYS: &[&str] = &["content", "items", "entries", "raw_content", "value"];

/// Accepted keys per section, normalized (lowercase, `_` for spaces and hyphens).
/// Earlier aliases win when a response carries several.
const ALIASES: &[(SectionKind, &[&str])] = &[
    (
        SectionKind::Contact,
        &[
            "contact",
            "contact_info",
            "contact_information",
            "contact_details",
            "personal_info",
            "personal_information",
            "personal_details",
            "basics",
        ],
    ),
    (
        SectionKind::Summary,
        &[
            "summary",
            "professional_summary",
            "profile",
            "objective",
            "career_objective",
            "about",
            "about_me",
            "overview",
        ],
    ),
    (
        SectionKind::Experience,
        &[
            "experience",
            "work_experience",
            "professional_experience",
            "employment",
            "employment_history",
            "work_history",
            "work",
            "positions",
        ],
    ),
    (
        SectionKind::Education,
        &[
            "education",
            "education_history",
            "academic_background",
            "academics",
            "qualifications",
        ],
    ),
    (
        SectionKind::Skills,
        &[
            "skills",
            "technical_skills",
            "core_skills",
            "skill_set",
            "skillset",
            "competencies",
            "core_competencies",
            "expertise",
        ],
    ),
    (
        SectionKind::Projects,
        &["projects", "personal_projects", "key_projects", "side_projects", "portfolio"],
    ),
    (
        SectionKind::Certifications,
        &[
            "certifications",
            "certificates",
            "licenses_and_certifications",
            "certifications_and_licenses",
            "licenses",
            "accreditations",
        ],
    ),
    (
        SectionKind::Languages,
        &[
            "languages",
            "spoken_languages",
            "language_skills",
            "language_proficiency",
        ],
    ),
];

/// Flat contact fields some models put at the top level instead of under `contact`.
const LOOSE_CONTACT_KEYS: &[&str] = &[
    "name",
    "full_name",
    "email",
    "phone",
    "location",
    "linkedin",
    "website",
];

const ITEM_NAME_KEYS: &[&str] = &["name", "skill", "language", "title", "label", "value"];
const ITEM_LEVEL_KEYS: &[&str] = &["level", "proficiency", "fluency"];
const TEXT_KEYS: &[&str] = &["text", "summary", "content", "description"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("response contains no parseable JSON object")]
    NotJson,

    #[error("response JSON has no object or section list at the top level")]
    UnexpectedShape,

    #[error("no resume sections recognized (keys seen: {0})")]
    NoSections(String),
}

/// Sections recovered from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedSections {
    pub sections: Vec<Section>,
    pub unrecovered: Vec<SectionKind>,
}

/// Pure and deterministic: the same response text always maps to the same result.
pub fn map_response(raw: &str) -> Result<MappedSections, MapError> {
    let value = parse_lenient(raw).ok_or(MapError::NotJson)?;
    let flattened = flatten(value).ok_or(MapError::UnexpectedShape)?;
    let fields = normalize_keys(flattened);

    let mut sections = Vec::new();
    let mut unrecovered = Vec::new();
    for kind in SectionKind::ALL {
        let content = match lookup(&fields, kind) {
            Some(value) => coerce(kind, value),
            None if kind == SectionKind::Contact => loose_contact(&fields),
            None => None,
        };
        match content {
            Some(content) => sections.push(Section { kind, content }),
            None => unrecovered.push(kind),
        }
    }

    if sections.is_empty() {
        let seen: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        return Err(MapError::NoSections(if seen.is_empty() {
            "none".to_string()
        } else {
            seen.join(", ")
        }));
    }

    Ok(MappedSections {
        sections,
        unrecovered,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// JSON recovery
// ────────────────────────────────────────────────────────────────────────────

fn parse_lenient(raw: &str) -> Option<Value> {
    let text = strip_json_fences(raw);

    let parsed = serde_json::from_str::<Value>(raw.trim())
        .ok()
        .or_else(|| serde_json::from_str::<Value>(text).ok())
        .or_else(|| first_balanced_object(text).and_then(|s| serde_json::from_str(s).ok()))
        .or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (start < end)
                .then(|| serde_json::from_str(&text[start..=end]).ok())
                .flatten()
        })?;

    // A JSON document serialized into a string.
    match parsed {
        Value::String(inner) => serde_json::from_str(strip_json_fences(&inner)).ok(),
        other => Some(other),
    }
}

/// Returns the first `{...}` region whose braces balance, ignoring braces inside
/// string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ────────────────────────────────────────────────────────────────────────────
// Envelope unwrapping
// ────────────────────────────────────────────────────────────────────────────

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn is_section_key(normalized: &str) -> bool {
    ALIASES
        .iter()
        .any(|(_, aliases)| aliases.contains(&normalized))
}

fn find_key(map: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        map.keys()
            .find(|k| normalize_key(k) == *candidate)
            .cloned()
    })
}

/// Reduces the response to one flat key -> value map.
fn flatten(value: Value) -> Option<Map<String, Value>> {
    let mut current = value;
    for _ in 0..MAX_ENVELOPE_DEPTH {
        match current {
            Value::Array(items) => return Some(section_list_to_map(items)),
            Value::Object(mut map) => {
                let has_sections = map.keys().any(|k| is_section_key(&normalize_key(k)));
                if !has_sections {
                    if let Some(key) = find_key(&map, ENVELOPE_KEYS)
                        .filter(|k| matches!(map.get(k), Some(Value::Object(_) | Value::Array(_))))
                    {
                        if let Some(inner) = map.remove(&key) {
                            current = inner;
                            continue;
                        }
                    }
                }

                if let Some(key) = find_key(&map, &[SECTIONS_KEY]) {
                    match map.remove(&key) {
                        Some(Value::Object(inner)) => merge_missing(&mut map, inner),
                        Some(Value::Array(items)) => {
                            merge_missing(&mut map, section_list_to_map(items))
                        }
                        Some(other) => {
                            map.insert(key, other);
                        }
                        None => {}
                    }
                }
                return Some(map);
            }
            _ => return None,
        }
    }
    None
}

fn merge_missing(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        target.entry(key).or_insert(value);
    }
}

/// Turns `[{"title": "Skills", "content": [...]}, ...]` into `{"skills": [...]}`.
/// Titles are compared normalized; repeated titles are combined into one list.
fn section_list_to_map(items: Vec<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    for item in items {
        let Value::Object(mut object) = item else {
            continue;
        };

        let title = find_key(&object, SECTION_TITLE_KEYS)
            .and_then(|k| object.get(&k))
            .and_then(Value::as_str)
            .map(normalize_key)
            .filter(|t| !t.is_empty());
        let Some(title) = title else {
            // `[{"experience": [...]}, {"skills": [...]}]`
            merge_missing(&mut map, object);
            continue;
        };

        // `{"content": null, "raw_content": "..."}` is a valid section.
        let body = SECTION_BODY_KEYS.iter().find_map(|candidate| {
            let key = object
                .keys()
                .find(|k| normalize_key(k) == *candidate && !is_blank(&object[k.as_str()]))
                .cloned()?;
            object.remove(&key)
        });
        let Some(body) = body else {
            merge_missing(&mut map, object);
            continue;
        };

        match map.get_mut(&title) {
            Some(existing) => append_body(existing, body),
            None => {
                map.insert(title, body);
            }
        }
    }
    map
}

fn append_body(existing: &mut Value, more: Value) {
    if !existing.is_array() {
        let first = existing.take();
        *existing = Value::Array(vec![first]);
    }
    if let Value::Array(items) = existing {
        match more {
            Value::Array(more) => items.extend(more),
            other => items.push(other),
        }
    }
}

/// Normalized keys in map order; the first occurrence of a key wins.
fn normalize_keys(map: Map<String, Value>) -> Vec<(String, Value)> {
    let mut fields: Vec<(String, Value)> = Vec::with_capacity(map.len());
    for (key, value) in map {
        let key = normalize_key(&key);
        if !fields.iter().any(|(k, _)| *k == key) {
            fields.push((key, value));
        }
    }
    fields
}

fn lookup(fields: &[(String, Value)], kind: SectionKind) -> Option<&Value> {
    let aliases = ALIASES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, aliases)| *aliases)?;

    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .find(|(key, _)| key == alias)
            .map(|(_, value)| value)
    })
}

/// Collects top-level `name`/`email`/... strings when there is no contact object.
fn loose_contact(fields: &[(String, Value)]) -> Option<SectionContent> {
    let map: Map<String, Value> = fields
        .iter()
        .filter(|(key, value)| LOOSE_CONTACT_KEYS.contains(&key.as_str()) && !is_blank(value))
        .filter(|(_, value)| value.is_string())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!map.is_empty()).then_some(SectionContent::Fields(map))
}

// ────────────────────────────────────────────────────────────────────────────
// Shape coercion
// ────────────────────────────────────────────────────────────────────────────

fn coerce(kind: SectionKind, value: &Value) -> Option<SectionContent> {
    match kind {
        SectionKind::Contact => coerce_fields(value).map(SectionContent::Fields),
        SectionKind::Summary => coerce_text(value).map(SectionContent::Text),
        SectionKind::Experience
        | SectionKind::Education
        | SectionKind::Projects
        | SectionKind::Certifications => coerce_entries(value).map(SectionContent::Entries),
        SectionKind::Skills | SectionKind::Languages => {
            coerce_list(value).map(SectionContent::List)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_blank),
        Value::Object(map) => map.values().all(is_blank),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn coerce_fields(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) if !is_blank(value) => Some(map.clone()),
        Value::String(s) if !s.trim().is_empty() => {
            let mut map = Map::new();
            map.insert("text".to_string(), Value::String(s.trim().to_string()));
            Some(map)
        }
        // Contact split over several objects; earlier fields win.
        Value::Array(items) => {
            let mut merged = Map::new();
            for fields in items.iter().filter_map(coerce_fields) {
                for (key, value) in fields {
                    merged.entry(key).or_insert(value);
                }
            }
            (!merged.is_empty()).then_some(merged)
        }
        _ => None,
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => {
            let lines: Vec<String> = items.iter().filter_map(coerce_text).collect();
            lines.join("\n")
        }
        Value::Object(map) => {
            return TEXT_KEYS
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(coerce_text);
        }
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn coerce_entries(value: &Value) -> Option<Vec<Value>> {
    let entries: Vec<Value> = match value {
        Value::Array(items) => items.iter().filter(|v| !is_blank(v)).cloned().collect(),
        Value::Object(_) | Value::String(_) if !is_blank(value) => vec![value.clone()],
        _ => Vec::new(),
    };
    (!entries.is_empty()).then_some(entries)
}

fn coerce_list(value: &Value) -> Option<Vec<String>> {
    let mut items = Vec::new();
    collect_list_items(value, &mut items);
    (!items.is_empty()).then_some(items)
}

/// Flattens nested and categorized lists (`{"Backend": ["Rust", "Go"]}`) into strings.
fn collect_list_items(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
        }
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_list_items(item, out)),
        Value::Object(map) => {
            let name = ITEM_NAME_KEYS
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty());
            match name {
                Some(name) => {
                    let level = ITEM_LEVEL_KEYS
                        .iter()
                        .find_map(|k| map.get(*k))
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty());
                    out.push(match level {
                        Some(level) => format!("{name} ({level})"),
                        None => name.to_string(),
                    });
                }
                None => map.values().for_each(|v| collect_list_items(v, out)),
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

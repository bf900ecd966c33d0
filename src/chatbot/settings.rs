//! Per-chat generation settings merged with defaults and the active prompt.

use regex::Regex;
use std::sync::LazyLock;

use crate::chatbot::database::{Database, StoreError};

/// Leading "Your name is X." sentence written by the prompt registry.
static NAME_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Your name is (.+?)\.(?:\s|$)").unwrap());

/// The recognized generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigParam {
    Temperature,
    TopK,
    TopP,
    MaxOutputTokens,
}

impl ConfigParam {
    pub const ALL: [ConfigParam; 4] = [
        ConfigParam::Temperature,
        ConfigParam::TopK,
        ConfigParam::TopP,
        ConfigParam::MaxOutputTokens,
    ];

    /// Canonical user-facing name.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigParam::Temperature => "temperature",
            ConfigParam::TopK => "topK",
            ConfigParam::TopP => "topP",
            ConfigParam::MaxOutputTokens => "maxOutputTokens",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            ConfigParam::Temperature => "temperature",
            ConfigParam::TopK => "top_k",
            ConfigParam::TopP => "top_p",
            ConfigParam::MaxOutputTokens => "max_output_tokens",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

/// Generation parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_k: f64,
    pub top_p: f64,
    pub max_output_tokens: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.5,
            top_k: 100.0,
            top_p: 0.95,
            max_output_tokens: 1024.0,
        }
    }
}

impl GenerationParams {
    pub fn get(&self, param: ConfigParam) -> f64 {
        match param {
            ConfigParam::Temperature => self.temperature,
            ConfigParam::TopK => self.top_k,
            ConfigParam::TopP => self.top_p,
            ConfigParam::MaxOutputTokens => self.max_output_tokens,
        }
    }

    pub fn is_finite(&self) -> bool {
        ConfigParam::ALL.iter().all(|p| self.get(*p).is_finite())
    }
}

/// The resolved configuration for one request. Derived, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub params: GenerationParams,
    pub system_instructions: Option<String>,
    pub bot_name: String,
    /// Name of the prompt that supplied `system_instructions`.
    pub active_prompt: Option<String>,
}

/// Extract the display name from a leading "Your name is X." sentence.
pub fn bot_name_from_instructions(instructions: &str) -> Option<String> {
    NAME_SENTENCE
        .captures(instructions)
        .map(|c| c[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Merge defaults, stored overrides and the active prompt.
///
/// A dangling active prompt reference silently falls back to the defaults.
pub fn resolve(
    db: &Database,
    chat_id: i64,
    defaults: &GenerationParams,
    default_bot_name: &str,
) -> Result<EffectiveConfig, StoreError> {
    let stored = db.chat_settings(chat_id)?;

    let params = GenerationParams {
        temperature: stored.temperature.unwrap_or(defaults.temperature),
        top_k: stored.top_k.unwrap_or(defaults.top_k),
        top_p: stored.top_p.unwrap_or(defaults.top_p),
        max_output_tokens: stored.max_output_tokens.unwrap_or(defaults.max_output_tokens),
    };

    let mut effective = EffectiveConfig {
        params,
        system_instructions: None,
        bot_name: default_bot_name.to_string(),
        active_prompt: None,
    };

    if let Some(name) = stored.active_prompt
        && let Some(prompt) = db.get_prompt(chat_id, &name)?
    {
        effective.bot_name = bot_name_from_instructions(&prompt.text)
            .unwrap_or_else(|| default_bot_name.to_string());
        effective.system_instructions = Some(prompt.text);
        effective.active_prompt = Some(name);
    }

    Ok(effective)
}

/// Validate a `param`/`value` pair against the allow-list.
pub fn parse_setting(param: &str, value: &str) -> Result<(ConfigParam, f64), String> {
    let param = ConfigParam::parse(param).ok_or_else(|| format!("Unknown parameter: {param}"))?;
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok((param, v)),
        _ => Err(format!("Invalid value for {}. Use a number.", param.name())),
    }
}

/// Persist one validated parameter.
pub fn set_param(db: &Database, chat_id: i64, param: ConfigParam, value: f64) -> Result<(), StoreError> {
    db.set_setting(chat_id, param.column(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::in_memory(10).unwrap()
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let db = db();
        let defaults = GenerationParams::default();
        let effective = resolve(&db, 1, &defaults, "Amelie").unwrap();
        assert_eq!(effective.params, defaults);
        assert_eq!(effective.system_instructions, None);
        assert_eq!(effective.bot_name, "Amelie");
    }

    #[test]
    fn test_stored_fields_overlay_defaults() {
        let db = db();
        set_param(&db, 1, ConfigParam::TopP, 0.5).unwrap();
        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        assert_eq!(effective.params.top_p, 0.5);
        assert_eq!(effective.params.temperature, 1.5);
    }

    #[test]
    fn test_active_prompt_supplies_instructions_and_name() {
        let db = db();
        db.upsert_prompt(1, "Bob", "Your name is Bob. Be brief.").unwrap();
        db.set_active_prompt(1, Some("Bob")).unwrap();

        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        assert_eq!(effective.system_instructions.as_deref(), Some("Your name is Bob. Be brief."));
        assert_eq!(effective.bot_name, "Bob");
        assert_eq!(effective.active_prompt.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_prompt_without_name_sentence_keeps_default_name() {
        let db = db();
        db.upsert_prompt(1, "plain", "Be brief.").unwrap();
        db.set_active_prompt(1, Some("plain")).unwrap();

        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        assert_eq!(effective.system_instructions.as_deref(), Some("Be brief."));
        assert_eq!(effective.bot_name, "Amelie");
    }

    #[test]
    fn test_dangling_prompt_reference_falls_back() {
        let db = db();
        db.set_active_prompt(1, Some("gone")).unwrap();
        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        assert_eq!(effective.system_instructions, None);
        assert_eq!(effective.bot_name, "Amelie");
        assert_eq!(effective.active_prompt, None);
    }

    #[test]
    fn test_bot_name_extraction() {
        assert_eq!(bot_name_from_instructions("Your name is Lia. Hi").as_deref(), Some("Lia"));
        assert_eq!(bot_name_from_instructions("  Your name is Mr Smith.").as_deref(), Some("Mr Smith"));
        assert_eq!(bot_name_from_instructions("Hi. Your name is Lia."), None);
        assert_eq!(bot_name_from_instructions("Your name is Lia"), None);
    }

    #[test]
    fn test_bot_name_with_dots() {
        assert_eq!(
            bot_name_from_instructions("Your name is J.A.R.V.I.S. Be helpful.").as_deref(),
            Some("J.A.R.V.I.S")
        );
        assert_eq!(bot_name_from_instructions("Your name is Dr.Who.").as_deref(), Some("Dr.Who"));
        assert_eq!(
            bot_name_from_instructions("Your name is R2.D2.\nBeep.").as_deref(),
            Some("R2.D2")
        );
    }

    #[test]
    fn test_dotted_prompt_name_resolves_in_full() {
        let db = db();
        crate::chatbot::prompts::set(&db, 1, "J.A.R.V.I.S", "Be helpful.").unwrap();
        crate::chatbot::prompts::activate(&db, 1, "J.A.R.V.I.S").unwrap();

        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        assert_eq!(effective.bot_name, "J.A.R.V.I.S");
    }

    #[test]
    fn test_parse_setting_validation() {
        assert_eq!(parse_setting("TOPK", "40"), Ok((ConfigParam::TopK, 40.0)));
        assert_eq!(parse_setting("seed", "1"), Err("Unknown parameter: seed".to_string()));
        assert_eq!(
            parse_setting("temperature", "abc"),
            Err("Invalid value for temperature. Use a number.".to_string())
        );
        assert!(parse_setting("temperature", "NaN").is_err());
        assert!(parse_setting("temperature", "inf").is_err());
    }

    #[test]
    fn test_set_param_uses_matching_column() {
        let db = db();
        for (i, param) in ConfigParam::ALL.into_iter().enumerate() {
            set_param(&db, 1, param, i as f64).unwrap();
        }
        let effective = resolve(&db, 1, &GenerationParams::default(), "Amelie").unwrap();
        for (i, param) in ConfigParam::ALL.into_iter().enumerate() {
            assert_eq!(effective.params.get(param), i as f64);
        }
    }
}

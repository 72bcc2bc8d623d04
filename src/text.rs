//! Transcription clean-up with named regex substitution profiles.

use regex::Regex;
use tracing::debug;

use crate::config::{Config, Substitution};
use crate::error::{PrepareError, Result};
use crate::xhtml::collapse_whitespace;

/// Profiles available without any configuration.
pub const BUILTIN_PROFILES: &[&str] = &["default", "none"];

fn builtin_profile(name: &str) -> Option<Vec<(&'static str, &'static str)>> {
    match name {
        "default" => Some(vec![
            // UTF-8 right single quote decoded as cp1252
            ("â€™", "'"),
            ("[\u{2018}\u{2019}]", "'"),
            (r"[^a-zA-Z0-9.,?!']", " "),
        ]),
        "none" => Some(Vec::new()),
        _ => None,
    }
}

pub struct TextNormalizer {
    profile: String,
    rules: Vec<(Regex, String)>,
}

impl TextNormalizer {
    /// Build the normalizer for `config.subs`. Profiles from the
    /// configuration shadow built-in profiles of the same name.
    pub fn from_config(config: &Config) -> Result<Self> {
        let name = config.subs.as_str();

        if let Some(custom) = config.substitutions.get(name) {
            return Self::from_substitutions(name, custom);
        }

        let rules = builtin_profile(name).ok_or_else(|| {
            let mut known: Vec<&str> = BUILTIN_PROFILES.to_vec();
            known.extend(config.substitutions.keys().map(String::as_str));
            PrepareError::Config(format!(
                "unknown substitution profile {:?} (known: {})",
                name,
                known.join(", ")
            ))
        })?;

        let rules = rules
            .into_iter()
            .map(|(pattern, replacement)| -> Result<(Regex, String)> {
                Ok((Regex::new(pattern)?, replacement.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            profile: name.to_string(),
            rules,
        })
    }

    fn from_substitutions(name: &str, subs: &[Substitution]) -> Result<Self> {
        let mut rules = Vec::with_capacity(subs.len());
        for sub in subs {
            let regex = Regex::new(&sub.pattern).map_err(|e| {
                PrepareError::Config(format!("profile {:?}: bad pattern {:?}: {}", name, sub.pattern, e))
            })?;
            rules.push((regex, sub.replacement.clone()));
        }
        debug!("Loaded substitution profile {} ({} rules)", name, rules.len());

        Ok(Self {
            profile: name.to_string(),
            rules,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Apply the profile's substitutions in order, then collapse whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for (regex, replacement) in &self.rules {
            cleaned = regex.replace_all(&cleaned, replacement.as_str()).into_owned();
        }
        collapse_whitespace(&cleaned)
    }
}

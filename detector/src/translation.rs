//! Locale catalogues for the user-facing prompt strings.

use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::warn;

/// Key-to-string lookup with a locale fallback chain.
///
/// Keys are dot paths (`"gestures.blink.label"`). A missing path returns
/// the key itself so callers always have something to display. The fallback
/// chain is `<locale>` → the language part of the locale → `default`; if
/// none of those load, the translator degrades to identity.
pub struct Translator {
    translations: Value,
    locale_found: bool,
}

impl Translator {
    pub fn new(locale: &str, locales_dirs: &[PathBuf]) -> Self {
        match load_translations(locale, locales_dirs) {
            Some(translations) => Self {
                translations,
                locale_found: true,
            },
            None => {
                warn!(locale, "no locale file found, prompts will show raw keys");
                Self::identity()
            }
        }
    }

    /// Translator that maps every key to itself.
    pub fn identity() -> Self {
        Self {
            translations: Value::Object(Map::new()),
            locale_found: false,
        }
    }

    pub fn translate(&self, key: &str) -> String {
        if !self.locale_found {
            return key.to_owned();
        }
        let mut current = &self.translations;
        for part in key.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => return key.to_owned(),
            }
        }
        match current.as_str() {
            Some(text) => text.to_owned(),
            None => key.to_owned(),
        }
    }
}

fn load_translations(locale: &str, dirs: &[PathBuf]) -> Option<Value> {
    if let Some(translations) = load_locale_file(locale, dirs) {
        return Some(translations);
    }
    if let Some((language, _)) = locale.split_once('_') {
        warn!(locale, "locale not found, trying its language part");
        if let Some(translations) = load_locale_file(language, dirs) {
            return Some(translations);
        }
    }
    load_locale_file("default", dirs)
}

/// Loads `<name>.json` from every configured directory, merging shallowly.
/// Later directories win on overlapping top-level keys.
fn load_locale_file(name: &str, dirs: &[PathBuf]) -> Option<Value> {
    let mut merged = Map::new();
    let mut found_any = false;
    for dir in dirs {
        let path = dir.join(format!("{name}.json"));
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(object)) => {
                for (key, value) in object {
                    merged.insert(key, value);
                }
                found_any = true;
            }
            Ok(_) => warn!(path = %path.display(), "locale file is not a JSON object"),
            Err(err) => warn!(path = %path.display(), %err, "failed to parse locale file"),
        }
    }
    found_any.then(|| Value::Object(merged))
}

//! Closed set of source languages a unit may declare with `.language`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Language {
    EcmaScript,
    #[default]
    PandaAssembly,
}

impl Language {
    pub fn from_string(lang: &str) -> Option<Language> {
        match lang {
            "ECMAScript" => Some(Language::EcmaScript),
            "PandaAssembly" => Some(Language::PandaAssembly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::EcmaScript => "ECMAScript",
            Language::PandaAssembly => "PandaAssembly",
        }
    }

    /// Method-name item used for functions marked `<ctor>`.
    pub fn ctor_name(&self) -> &'static str {
        ".ctor"
    }

    /// Method-name item used for functions marked `<cctor>`.
    pub fn cctor_name(&self) -> &'static str {
        ".cctor"
    }

    /// Numeric tag stored in class and method items.
    pub fn value(&self) -> u8 {
        match self {
            Language::EcmaScript => 0,
            Language::PandaAssembly => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for lang in [Language::EcmaScript, Language::PandaAssembly] {
            assert_eq!(Language::from_string(lang.as_str()), Some(lang));
        }
    }

    #[test]
    fn test_unknown_language() {
        assert_eq!(Language::from_string("JavaScript"), None);
        assert_eq!(Language::from_string(""), None);
    }
}

//! Pattern registry
//!
//! The registry is plain data: patterns are kept in registration order, which
//! is also the tie-breaker when two detections share a file and an offset.
//! It is shared across jobs behind an async `RwLock` by the worker; the
//! detection engine only ever sees a snapshot.

use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sentinela_core::PatternCategory;

use crate::validators;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Pattern '{0}' is already registered")]
    DuplicateName(String),

    #[error("Pattern '{0}' not found")]
    NotFound(String),

    #[error("Pattern '{0}' is built in and can only be disabled")]
    BuiltinNotRemovable(String),

    #[error("Invalid regex for pattern '{name}': {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown validator '{0}'")]
    UnknownValidator(String),

    #[error("Invalid pattern definition: {0}")]
    InvalidDefinition(#[from] serde_json::Error),
}

/// Validators shipped with the crate, addressable by id from pattern files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinValidator {
    Cpf,
    Cnpj,
    BrazilianName,
    PisPasep,
    VoterId,
    Phone,
    Cep,
}

impl BuiltinValidator {
    pub fn id(self) -> &'static str {
        match self {
            BuiltinValidator::Cpf => "cpf",
            BuiltinValidator::Cnpj => "cnpj",
            BuiltinValidator::BrazilianName => "brazilian_name",
            BuiltinValidator::PisPasep => "pis_pasep",
            BuiltinValidator::VoterId => "voter_id",
            BuiltinValidator::Phone => "phone",
            BuiltinValidator::Cep => "cep",
        }
    }

    pub fn check(self, candidate: &str) -> bool {
        match self {
            BuiltinValidator::Cpf => validators::cpf(candidate),
            BuiltinValidator::Cnpj => validators::cnpj(candidate),
            BuiltinValidator::BrazilianName => validators::brazilian_name(candidate),
            BuiltinValidator::PisPasep => validators::pis_pasep(candidate),
            BuiltinValidator::VoterId => validators::voter_id(candidate),
            BuiltinValidator::Phone => validators::phone(candidate),
            BuiltinValidator::Cep => validators::cep(candidate),
        }
    }
}

impl FromStr for BuiltinValidator {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpf" => Ok(BuiltinValidator::Cpf),
            "cnpj" => Ok(BuiltinValidator::Cnpj),
            "brazilian_name" | "name" => Ok(BuiltinValidator::BrazilianName),
            "pis_pasep" | "pis" => Ok(BuiltinValidator::PisPasep),
            "voter_id" | "titulo_eleitor" => Ok(BuiltinValidator::VoterId),
            "phone" => Ok(BuiltinValidator::Phone),
            "cep" => Ok(BuiltinValidator::Cep),
            _ => Err(RegistryError::UnknownValidator(s.to_string())),
        }
    }
}

/// Confirms or rejects a regex candidate.
#[derive(Clone)]
pub enum Validator {
    Builtin(BuiltinValidator),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Validator {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Validator::Custom(Arc::new(check))
    }

    pub fn check(&self, candidate: &str) -> bool {
        match self {
            Validator::Builtin(builtin) => builtin.check(candidate),
            Validator::Custom(check) => check(candidate),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Builtin(builtin) => write!(f, "Builtin({})", builtin.id()),
            Validator::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionPattern {
    pub name: String,
    pub regex: Regex,
    pub category: PatternCategory,
    pub enabled: bool,
    pub validator: Option<Validator>,
    pub builtin: bool,
    pub description: String,
}

impl DetectionPattern {
    /// Fails with `InvalidRegex` when `regex` does not compile.
    pub fn new(
        name: impl Into<String>,
        regex: &str,
        category: PatternCategory,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let regex = Regex::new(regex).map_err(|source| RegistryError::InvalidRegex {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            regex,
            category,
            enabled: true,
            validator: None,
            builtin: false,
            description: String::new(),
        })
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn into_builtin(mut self) -> Self {
        self.builtin = true;
        self
    }
}

/// Custom pattern declared as data, e.g. in a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternSpec {
    pub name: String,
    pub regex: String,
    #[serde(default = "default_custom_category")]
    pub category: PatternCategory,
    /// Id of a [`BuiltinValidator`]
    #[serde(default)]
    pub validator: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_custom_category() -> PatternCategory {
    PatternCategory::Custom
}

fn default_enabled() -> bool {
    true
}

impl PatternSpec {
    pub fn into_pattern(self) -> Result<DetectionPattern, RegistryError> {
        let mut pattern = DetectionPattern::new(self.name, &self.regex, self.category)?
            .with_description(self.description);
        if let Some(id) = self.validator {
            pattern = pattern.with_validator(Validator::Builtin(id.parse()?));
        }
        pattern.enabled = self.enabled;
        Ok(pattern)
    }
}

// (name, regex, category, validator, description)
const BUILTIN_PATTERNS: &[(&str, &str, PatternCategory, Option<BuiltinValidator>, &str)] = &[
    (
        "CPF",
        r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b",
        PatternCategory::Document,
        Some(BuiltinValidator::Cpf),
        "Cadastro de Pessoas Físicas",
    ),
    (
        "CNPJ",
        r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b",
        PatternCategory::Document,
        Some(BuiltinValidator::Cnpj),
        "Cadastro Nacional da Pessoa Jurídica",
    ),
    (
        "RG",
        r"\b\d{1,2}\.\d{3}\.\d{3}-[\dXx]\b",
        PatternCategory::Document,
        None,
        "Registro Geral (identity card)",
    ),
    (
        "Email",
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        PatternCategory::Contact,
        None,
        "E-mail address",
    ),
    (
        "Phone",
        r"(?:\+55\s?)?(?:\(\d{2}\)|\b\d{2})[\s-]?9?\d{4}[\s-]?\d{4}\b",
        PatternCategory::Contact,
        Some(BuiltinValidator::Phone),
        "Brazilian landline or mobile number",
    ),
    (
        "CEP",
        r"\b\d{5}-\d{3}\b",
        PatternCategory::Contact,
        Some(BuiltinValidator::Cep),
        "Código de Endereçamento Postal",
    ),
    (
        "Name",
        r"\b[A-ZÀ-Ý][a-zà-ÿ]+(?:\s+(?:(?:da|de|do|dos|das|e|von|van|la|le|di)\s+)?[A-ZÀ-Ý][a-zà-ÿ]+)+\b",
        PatternCategory::Personal,
        Some(BuiltinValidator::BrazilianName),
        "Brazilian proper name",
    ),
    (
        "PIS/PASEP",
        r"\b\d{3}\.\d{5}\.\d{2}-\d\b",
        PatternCategory::Document,
        Some(BuiltinValidator::PisPasep),
        "Programa de Integração Social worker number",
    ),
    (
        "Titulo de Eleitor",
        r"\b\d{4}\s?\d{4}\s?\d{4}\b",
        PatternCategory::Document,
        Some(BuiltinValidator::VoterId),
        "Voter registration number",
    ),
];

/// Ordered set of detection patterns.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<DetectionPattern>,
}

impl PatternRegistry {
    /// Registry seeded with the built-in Brazilian patterns.
    pub fn new() -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .filter_map(|(name, regex, category, validator, description)| {
                let pattern = match DetectionPattern::new(*name, regex, *category) {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        tracing::error!(error = %e, "Built-in pattern failed to compile");
                        return None;
                    }
                };
                let pattern = pattern.with_description(*description).into_builtin();
                Some(match validator {
                    Some(v) => pattern.with_validator(Validator::Builtin(*v)),
                    None => pattern,
                })
            })
            .collect();
        Self { patterns }
    }

    /// Registry without any pattern.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn register(&mut self, pattern: DetectionPattern) -> Result<(), RegistryError> {
        if self.position(&pattern.name).is_some() {
            return Err(RegistryError::DuplicateName(pattern.name));
        }
        tracing::debug!(
            pattern = %pattern.name,
            category = %pattern.category,
            "Registered detection pattern"
        );
        self.patterns.push(pattern);
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        self.patterns[index].enabled = enabled;
        Ok(())
    }

    /// Removes a custom pattern. Built-ins can only be disabled.
    pub fn remove(&mut self, name: &str) -> Result<DetectionPattern, RegistryError> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if self.patterns[index].builtin {
            return Err(RegistryError::BuiltinNotRemovable(name.to_string()));
        }
        Ok(self.patterns.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&DetectionPattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    /// All patterns, disabled ones included, in registration order.
    pub fn patterns(&self) -> &[DetectionPattern] {
        &self.patterns
    }

    /// Enabled patterns in registration order.
    pub fn active_patterns(&self) -> impl Iterator<Item = &DetectionPattern> {
        self.patterns.iter().filter(|p| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Registers every pattern in a JSON array of [`PatternSpec`].
    ///
    /// Definitions are validated up front; nothing is registered if any of
    /// them is invalid or clashes with an existing name.
    pub fn load_custom_from_json(&mut self, json: &str) -> Result<usize, RegistryError> {
        let specs: Vec<PatternSpec> = serde_json::from_str(json)?;
        let mut staged: Vec<DetectionPattern> = Vec::with_capacity(specs.len());
        for spec in specs {
            let pattern = spec.into_pattern()?;
            if self.position(&pattern.name).is_some()
                || staged.iter().any(|p| p.name == pattern.name)
            {
                return Err(RegistryError::DuplicateName(pattern.name));
            }
            staged.push(pattern);
        }
        let count = staged.len();
        self.patterns.extend(staged);
        Ok(count)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.name == name)
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(registry: &PatternRegistry) -> Vec<&str> {
        registry
            .active_patterns()
            .map(|p| p.name.as_str())
            .collect()
    }

    #[test]
    fn test_builtins_are_seeded_in_order() {
        let registry = PatternRegistry::new();
        assert_eq!(
            names(&registry),
            vec![
                "CPF",
                "CNPJ",
                "RG",
                "Email",
                "Phone",
                "CEP",
                "Name",
                "PIS/PASEP",
                "Titulo de Eleitor"
            ]
        );
        assert!(registry.patterns().iter().all(|p| p.builtin && p.enabled));
    }

    #[test]
    fn test_name_pattern_accepts_every_connector() {
        let registry = PatternRegistry::new();
        let name = registry.get("Name").unwrap();
        for connector in crate::validators::NAME_CONNECTORS {
            let text = format!("Ana {} Souza", connector);
            let found = name.regex.find(&text).unwrap();
            assert_eq!(found.as_str(), text);
            assert!(name.validator.as_ref().unwrap().check(found.as_str()));
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = PatternRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(registry.active_patterns().count(), 0);
    }

    #[test]
    fn test_register_duplicate_name() {
        let mut registry = PatternRegistry::new();
        let pattern = DetectionPattern::new("CPF", r"\d+", PatternCategory::Custom).unwrap();
        let result = registry.register(pattern);
        assert!(matches!(result, Err(RegistryError::DuplicateName(name)) if name == "CPF"));
    }

    #[test]
    fn test_invalid_regex_fails_construction() {
        let result = DetectionPattern::new("broken", r"(\d+", PatternCategory::Custom);
        assert!(matches!(result, Err(RegistryError::InvalidRegex { .. })));
    }

    #[test]
    fn test_disable_and_reenable_keeps_position() {
        let mut registry = PatternRegistry::new();
        registry.set_enabled("CPF", false).unwrap();
        assert!(!names(&registry).contains(&"CPF"));
        assert!(registry.get("CPF").is_some());

        registry.set_enabled("CPF", true).unwrap();
        assert_eq!(names(&registry)[0], "CPF");
    }

    #[test]
    fn test_set_enabled_unknown() {
        let mut registry = PatternRegistry::new();
        assert!(matches!(
            registry.set_enabled("IBAN", false),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_custom_and_builtin() {
        let mut registry = PatternRegistry::new();
        let pattern =
            DetectionPattern::new("Matricula", r"\bMAT-\d{6}\b", PatternCategory::Custom).unwrap();
        registry.register(pattern).unwrap();
        assert_eq!(names(&registry).last(), Some(&"Matricula"));

        let removed = registry.remove("Matricula").unwrap();
        assert_eq!(removed.name, "Matricula");
        assert!(registry.get("Matricula").is_none());

        assert!(matches!(
            registry.remove("CPF"),
            Err(RegistryError::BuiltinNotRemovable(_))
        ));
        assert!(matches!(
            registry.remove("Matricula"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_custom_validator_closure() {
        let pattern = DetectionPattern::new("Even", r"\d+", PatternCategory::Custom)
            .unwrap()
            .with_validator(Validator::custom(|s| {
                s.parse::<u64>().map(|n| n % 2 == 0).unwrap_or(false)
            }));
        let validator = pattern.validator.unwrap();
        assert!(validator.check("42"));
        assert!(!validator.check("41"));
    }

    #[test]
    fn test_load_custom_from_json() {
        let mut registry = PatternRegistry::new();
        let json = r#"[
            {"name": "Matricula", "regex": "\\bMAT-\\d{6}\\b", "description": "Employee id"},
            {"name": "CPF sem pontos", "regex": "\\b\\d{11}\\b", "category": "document", "validator": "cpf", "enabled": false}
        ]"#;
        assert_eq!(registry.load_custom_from_json(json).unwrap(), 2);

        let matricula = registry.get("Matricula").unwrap();
        assert_eq!(matricula.category, PatternCategory::Custom);
        assert!(!matricula.builtin);

        let cpf = registry.get("CPF sem pontos").unwrap();
        assert!(!cpf.enabled);
        assert!(matches!(
            cpf.validator,
            Some(Validator::Builtin(BuiltinValidator::Cpf))
        ));
    }

    #[test]
    fn test_load_custom_is_all_or_nothing() {
        let mut registry = PatternRegistry::new();
        let before = registry.len();
        let json = r#"[
            {"name": "Ok", "regex": "ok"},
            {"name": "Broken", "regex": "("}
        ]"#;
        assert!(matches!(
            registry.load_custom_from_json(json),
            Err(RegistryError::InvalidRegex { .. })
        ));
        assert_eq!(registry.len(), before);

        let unknown = r#"[{"name": "X", "regex": "x", "validator": "iban"}]"#;
        assert!(matches!(
            registry.load_custom_from_json(unknown),
            Err(RegistryError::UnknownValidator(_))
        ));
        assert!(matches!(
            registry.load_custom_from_json("not json"),
            Err(RegistryError::InvalidDefinition(_))
        ));
    }
}

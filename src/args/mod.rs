//! # Service Arguments
//!
//! Service arguments travel as a flat list of strings (`-src /a -dst /b -mv`) so that they can be
//! persisted verbatim with the service record. Each service declares an ordered schema of
//! [`ArgSpec`]s; [`ParsedArgs::parse`] checks a raw list against the schema and typed argument
//! structs implementing [`ServiceArgs`] are built from the result.
//!
//! Validation happens before any work starts: a missing or blank required argument, an
//! unknown flag or a flag without its value is reported as an [`ArgumentError`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while validating service arguments
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required argument {flag}")]
    MissingRequired { flag: String },

    #[error("required argument {flag} is blank")]
    BlankRequired { flag: String },

    #[error("unknown argument {0}")]
    UnknownFlag(String),

    #[error("argument {flag} expects a value")]
    MissingValue { flag: String },

    #[error("invalid value '{value}' for {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("unexpected positional argument '{0}'")]
    UnexpectedPositional(String),
}

/// How many values a flag consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgArity {
    /// Boolean switch, no value
    Flag,
    Single,
    /// One or more values, up to the next known flag
    Multiple,
}

/// Schema entry for one argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Accepted spellings; the first one is canonical
    pub flags: Vec<String>,
    pub description: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub arity: ArgArity,
}

impl ArgSpec {
    fn build(flags: &[&str], description: &str, required: bool, arity: ArgArity) -> Self {
        Self {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            description: description.to_string(),
            required,
            default_value: None,
            arity,
        }
    }

    pub fn required(flags: &[&str], description: &str) -> Self {
        Self::build(flags, description, true, ArgArity::Single)
    }

    pub fn optional(flags: &[&str], description: &str) -> Self {
        Self::build(flags, description, false, ArgArity::Single)
    }

    pub fn flag(flags: &[&str], description: &str) -> Self {
        Self::build(flags, description, false, ArgArity::Flag)
    }

    pub fn repeated(flags: &[&str], description: &str, required: bool) -> Self {
        Self::build(flags, description, required, ArgArity::Multiple)
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn primary_flag(&self) -> &str {
        self.flags.first().map(String::as_str).unwrap_or_default()
    }

    fn matches(&self, token: &str) -> bool {
        self.flags.iter().any(|f| f == token)
    }
}

/// Public description of a registered service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetaData {
    pub service_name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
}

/// Argument list validated against a schema
#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    specs: Vec<ArgSpec>,
    values: HashMap<String, Vec<String>>,
    switches: HashSet<String>,
}

impl ParsedArgs {
    pub fn parse(specs: &[ArgSpec], args: &[String]) -> Result<Self, ArgumentError> {
        let mut parsed = ParsedArgs {
            specs: specs.to_vec(),
            ..Default::default()
        };
        let find = |token: &str| specs.iter().find(|s| s.matches(token));

        let mut i = 0;
        while i < args.len() {
            let token = args[i].as_str();
            let spec = match find(token) {
                Some(spec) => spec,
                None if token.starts_with('-') && token.len() > 1 => {
                    return Err(ArgumentError::UnknownFlag(token.to_string()))
                }
                None => return Err(ArgumentError::UnexpectedPositional(token.to_string())),
            };
            let key = spec.primary_flag().to_string();
            i += 1;

            match spec.arity {
                ArgArity::Flag => {
                    parsed.switches.insert(key);
                }
                ArgArity::Single => {
                    let value = args
                        .get(i)
                        .filter(|next| find(next).is_none())
                        .ok_or_else(|| ArgumentError::MissingValue { flag: key.clone() })?;
                    // a repeated single-valued flag keeps the last value
                    parsed.values.insert(key, vec![value.clone()]);
                    i += 1;
                }
                ArgArity::Multiple => {
                    let start = i;
                    while i < args.len() && find(&args[i]).is_none() {
                        i += 1;
                    }
                    if start == i {
                        return Err(ArgumentError::MissingValue { flag: key });
                    }
                    parsed
                        .values
                        .entry(key)
                        .or_default()
                        .extend(args[start..i].iter().cloned());
                }
            }
        }

        for spec in specs {
            let key = spec.primary_flag();
            if spec.arity == ArgArity::Flag {
                continue;
            }
            if !parsed.values.contains_key(key) {
                if let Some(default) = &spec.default_value {
                    parsed
                        .values
                        .insert(key.to_string(), vec![default.clone()]);
                }
            }
            if spec.required {
                match parsed.values.get(key) {
                    None => {
                        return Err(ArgumentError::MissingRequired {
                            flag: key.to_string(),
                        })
                    }
                    Some(values) if values.iter().all(|v| v.trim().is_empty()) => {
                        return Err(ArgumentError::BlankRequired {
                            flag: key.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(parsed)
    }

    fn key<'a>(&'a self, flag: &'a str) -> &'a str {
        self.specs
            .iter()
            .find(|s| s.matches(flag))
            .map(ArgSpec::primary_flag)
            .unwrap_or(flag)
    }

    /// Value of a single-valued argument; blank values read as absent
    pub fn value(&self, flag: &str) -> Option<&str> {
        self.values
            .get(self.key(flag))
            .and_then(|v| v.last())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn values(&self, flag: &str) -> &[String] {
        self.values
            .get(self.key(flag))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn flag(&self, flag: &str) -> bool {
        self.switches.contains(self.key(flag))
    }

    pub fn required_value(&self, flag: &str) -> Result<&str, ArgumentError> {
        self.value(flag).ok_or_else(|| ArgumentError::MissingRequired {
            flag: self.key(flag).to_string(),
        })
    }

    /// Parse an optional value into `T`
    pub fn parse_value<T>(&self, flag: &str) -> Result<Option<T>, ArgumentError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.value(flag)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ArgumentError::InvalidValue {
                    flag: self.key(flag).to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Optional filesystem path; must be absolute when present
    pub fn path(&self, flag: &str) -> Result<Option<PathBuf>, ArgumentError> {
        self.value(flag)
            .map(|raw| absolute_path(self.key(flag), raw))
            .transpose()
    }

    pub fn required_path(&self, flag: &str) -> Result<PathBuf, ArgumentError> {
        absolute_path(self.key(flag), self.required_value(flag)?)
    }
}

fn absolute_path(flag: &str, raw: &str) -> Result<PathBuf, ArgumentError> {
    let path = PathBuf::from(raw.trim());
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(ArgumentError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
            reason: "path must be absolute".to_string(),
        })
    }
}

/// Typed arguments of one service
pub trait ServiceArgs: Sized + Send + Sync + 'static {
    fn arg_specs() -> Vec<ArgSpec>;

    fn from_parsed(parsed: &ParsedArgs) -> Result<Self, ArgumentError>;

    fn parse(args: &[String]) -> Result<Self, ArgumentError> {
        let parsed = ParsedArgs::parse(&Self::arg_specs(), args)?;
        Self::from_parsed(&parsed)
    }

    fn metadata(service_name: &str, description: &str) -> ServiceMetaData {
        ServiceMetaData {
            service_name: service_name.to_string(),
            description: description.to_string(),
            args: Self::arg_specs(),
        }
    }
}

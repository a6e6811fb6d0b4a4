//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Declarative command parameter extraction."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Every command declares its parameters as a list of [`ParamSpec`]s and
//! [`extract`] turns an untyped JSON payload into typed [`Params`]:
//!
//! * a missing required parameter is a [`CommandError::Validation`];
//! * a missing optional parameter takes its default, if any;
//! * a value of the wrong type is logged and replaced by the default, or is a
//!   validation error when the parameter is required;
//! * a direction string other than `fw`/`bw` is always a validation error.
//!
//! A non-object payload (`42`, `"camera0"`) binds to the first parameter.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use thermoscan_common::Direction;
use tracing::warn;

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Bool,
    Direction,
    Text,
}

impl ParamKind {
    fn as_str(self) -> &'static str {
        match self {
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::Direction => "direction",
            ParamKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Bool(bool),
    Direction(Direction),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    Required,
    /// Absent unless supplied.
    Optional,
    Value(ParamValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ParamKind,
    pub default: ParamDefault,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
            default: ParamDefault::Required,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
            default: ParamDefault::Optional,
        }
    }

    pub fn float(name: &'static str, default: f64) -> Self {
        Self::with_default(name, ParamKind::Float, ParamValue::Float(default))
    }

    pub fn boolean(name: &'static str, default: bool) -> Self {
        Self::with_default(name, ParamKind::Bool, ParamValue::Bool(default))
    }

    pub fn direction(name: &'static str, default: Direction) -> Self {
        Self::with_default(name, ParamKind::Direction, ParamValue::Direction(default))
    }

    fn with_default(name: &'static str, kind: ParamKind, value: ParamValue) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
            default: ParamDefault::Value(value),
        }
    }

    /// Also accept the parameter under these keys.
    pub fn alias(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    fn lookup<'a>(&self, payload: &'a serde_json::Map<String, JsonValue>) -> Option<&'a JsonValue> {
        std::iter::once(self.name)
            .chain(self.aliases.iter().copied())
            .find_map(|key| payload.get(key))
            .filter(|value| !value.is_null())
    }
}

/// Typed parameters produced by [`extract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: IndexMap<&'static str, ParamValue>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParamValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn direction(&self, name: &str) -> Option<Direction> {
        match self.values.get(name) {
            Some(ParamValue::Direction(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn require_float(&self, name: &str) -> Result<f64, CommandError> {
        self.float(name).ok_or_else(|| missing(name))
    }

    pub fn require_bool(&self, name: &str) -> Result<bool, CommandError> {
        self.bool(name).ok_or_else(|| missing(name))
    }

    pub fn require_direction(&self, name: &str) -> Result<Direction, CommandError> {
        self.direction(name).ok_or_else(|| missing(name))
    }

    pub fn require_text(&self, name: &str) -> Result<&str, CommandError> {
        self.text(name).ok_or_else(|| missing(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn missing(name: &str) -> CommandError {
    CommandError::Validation(format!("missing required parameter '{name}'"))
}

enum Coerced {
    Value(ParamValue),
    Incompatible,
}

fn coerce(kind: ParamKind, raw: &JsonValue) -> Result<Coerced, CommandError> {
    let value = match (kind, raw) {
        (ParamKind::Float, JsonValue::Number(number)) => number.as_f64().map(ParamValue::Float),
        (ParamKind::Float, JsonValue::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(ParamValue::Float),
        (ParamKind::Bool, JsonValue::Bool(flag)) => Some(ParamValue::Bool(*flag)),
        (ParamKind::Bool, JsonValue::Number(number)) => match number.as_f64() {
            Some(value) if value == 0.0 => Some(ParamValue::Bool(false)),
            Some(value) if value == 1.0 => Some(ParamValue::Bool(true)),
            _ => None,
        },
        (ParamKind::Bool, JsonValue::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(ParamValue::Bool(true)),
            "false" | "0" => Some(ParamValue::Bool(false)),
            _ => None,
        },
        (ParamKind::Direction, JsonValue::String(text)) => {
            let direction = text
                .parse::<Direction>()
                .map_err(|err| CommandError::Validation(err.to_string()))?;
            Some(ParamValue::Direction(direction))
        }
        (ParamKind::Text, JsonValue::String(text)) => Some(ParamValue::Text(text.clone())),
        (ParamKind::Text, JsonValue::Number(number)) => Some(ParamValue::Text(number.to_string())),
        _ => None,
    };
    Ok(value.map_or(Coerced::Incompatible, Coerced::Value))
}

/// Validate `payload` against `specs` for `command`.
pub fn extract(command: &str, specs: &[ParamSpec], payload: &JsonValue) -> Result<Params, CommandError> {
    let object = match payload {
        JsonValue::Object(map) => map.clone(),
        JsonValue::Null => serde_json::Map::new(),
        scalar => {
            let mut map = serde_json::Map::new();
            if let Some(first) = specs.first() {
                map.insert(first.name.to_owned(), scalar.clone());
            }
            map
        }
    };

    let mut params = Params::default();
    for spec in specs {
        let coerced = match spec.lookup(&object) {
            Some(raw) => match coerce(spec.kind, raw)? {
                Coerced::Value(value) => Some(value),
                Coerced::Incompatible => {
                    if spec.default == ParamDefault::Required {
                        return Err(CommandError::Validation(format!(
                            "parameter '{}' must be a {}, got {}",
                            spec.name,
                            spec.kind.as_str(),
                            raw
                        )));
                    }
                    warn!(command, parameter = spec.name, value = %raw, expected = spec.kind.as_str(), "incompatible parameter replaced by its default");
                    None
                }
            },
            None if spec.default == ParamDefault::Required => {
                return Err(missing(spec.name));
            }
            None => None,
        };
        let value = match (coerced, &spec.default) {
            (Some(value), _) => Some(value),
            (None, ParamDefault::Value(default)) => Some(default.clone()),
            (None, _) => None,
        };
        if let Some(value) = value {
            params.values.insert(spec.name, value);
        }
    }
    Ok(params)
}

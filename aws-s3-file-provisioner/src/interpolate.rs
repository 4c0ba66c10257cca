/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use serde_json::Value;

/// Data generated by the host for a single provisioning run (e.g. the instance id or the
/// SSH host of the machine being provisioned).
pub type GeneratedData = serde_json::Map<String, Value>;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Context used to render `{{ ... }}` placeholders.
///
/// Supported actions:
///
/// * `{{ .Name }}` and ``{{ build `Name` }}`` look up `Name` in the generated data
/// * `{{ build_name }}` and `{{ build_type }}` expand to the host build name and builder type
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    data: GeneratedData,
    build_name: Option<String>,
    build_type: Option<String>,
}

/// Failure to render a template.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RenderError {
    /// An action was opened at the given byte offset but never closed
    Unclosed(usize),
    /// The action is not one this context understands
    UnknownAction(String),
    /// The named value is not available
    MissingValue(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Unclosed(offset) => write!(f, "unclosed action at offset {offset}"),
            RenderError::UnknownAction(action) => write!(f, "unknown action {action:?}"),
            RenderError::MissingValue(name) => write!(f, "no value for {name:?}"),
        }
    }
}

impl std::error::Error for RenderError {}

impl RenderContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host build name and builder type
    pub fn with_build(mut self, build_name: Option<&str>, build_type: Option<&str>) -> Self {
        self.build_name = build_name.map(str::to_owned);
        self.build_type = build_type.map(str::to_owned);
        self
    }

    /// Merge generated data into the context, replacing values with the same name
    pub fn merge_data(&mut self, data: GeneratedData) {
        self.data.extend(data);
    }

    /// Render every placeholder in `template`
    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(RenderError::Unclosed(offset + start))?;
            out.push_str(&self.eval(after_open[..end].trim())?);

            let consumed = start + OPEN.len() + end + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
        }
        out.push_str(rest);
        Ok(out)
    }

    fn eval(&self, action: &str) -> Result<String, RenderError> {
        if let Some(name) = action.strip_prefix('.') {
            if is_ident(name) {
                return self.lookup(name);
            }
            return Err(RenderError::UnknownAction(action.to_owned()));
        }

        match action {
            "build_name" => {
                return self
                    .build_name
                    .clone()
                    .ok_or_else(|| RenderError::MissingValue(action.to_owned()))
            }
            "build_type" => {
                return self
                    .build_type
                    .clone()
                    .ok_or_else(|| RenderError::MissingValue(action.to_owned()))
            }
            _ => {}
        }

        let mut words = action.splitn(2, char::is_whitespace);
        match (words.next(), words.next().map(str::trim)) {
            (Some("build"), Some(arg)) => match unquote(arg) {
                Some(name) => self.lookup(name),
                None => Err(RenderError::UnknownAction(action.to_owned())),
            },
            _ => Err(RenderError::UnknownAction(action.to_owned())),
        }
    }

    fn lookup(&self, name: &str) -> Result<String, RenderError> {
        match self.data.get(name) {
            None | Some(Value::Null) => Err(RenderError::MissingValue(name.to_owned())),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
        }
    }
}

fn is_ident(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(arg: &str) -> Option<&str> {
    ['`', '"']
        .into_iter()
        .find_map(|q| arg.strip_prefix(q)?.strip_suffix(q))
        .filter(|name| is_ident(name))
}

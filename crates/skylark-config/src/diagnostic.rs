// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Parse failures reported by figment and constraints broken after parsing
//! both end up as [`ConfigError`]s rendered through miette. Unknown keys point
//! at the line of the TOML file that introduced them.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::fmt::Write as _;

use miette::{Diagnostic, GraphicalReportHandler, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a candidate needs before it is offered as a fix.
const CLOSE_ENOUGH: f64 = 0.75;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {table}")]
    #[diagnostic(
        code(skylark::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), accepted))
    )]
    UnknownKey {
        key: String,
        /// `[section]`, or "the top level".
        table: String,
        suggestion: Option<String>,
        accepted: Vec<String>,
        #[label("not recognized here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` expects {expected}, found {found}")]
    #[diagnostic(code(skylark::config::invalid_value))]
    InvalidValue {
        key: String,
        found: String,
        expected: String,
    },

    #[error("missing key `{key}`")]
    #[diagnostic(
        code(skylark::config::missing_key),
        help("set `{key}` or drop the section to fall back to defaults")
    )]
    MissingKey { key: String },

    #[error("`{key}` must not be empty")]
    #[diagnostic(code(skylark::config::empty))]
    Empty { key: &'static str },

    #[error("`{key}` must be at least 1")]
    #[diagnostic(code(skylark::config::zero))]
    Zero { key: &'static str },

    #[error("log level `{value}` is not recognized")]
    #[diagnostic(
        code(skylark::config::log_level),
        help("{}", log_level_help(suggestion.as_deref()))
    )]
    LogLevel {
        value: String,
        suggestion: Option<&'static str>,
    },

    /// Two windows in seconds that must be ordered are not.
    #[error(
        "`{shorter}` ({shorter_secs} s) must be {} `{longer}` ({longer_secs} s)",
        ordering(.strict)
    )]
    #[diagnostic(
        code(skylark::config::window_order),
        help("raise `{longer}` or lower `{shorter}`")
    )]
    WindowOrder {
        shorter: &'static str,
        shorter_secs: u64,
        longer: &'static str,
        longer_secs: u64,
        /// Equal values are rejected too.
        strict: bool,
    },

    #[error("configuration error: {0}")]
    #[diagnostic(code(skylark::config::other))]
    Other(String),
}

/// Log level names accepted by `runtime.log_level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn ordering(strict: &bool) -> &'static str {
    if *strict { "shorter than" } else { "at most" }
}

fn unknown_key_help(suggestion: Option<&str>, accepted: &[String]) -> String {
    let mut help = String::new();
    if let Some(suggestion) = suggestion {
        let _ = write!(help, "did you mean `{suggestion}`? ");
    }
    if accepted.is_empty() {
        help.push_str("this table takes no keys");
    } else {
        let _ = write!(help, "accepted here: {}", accepted.join(", "));
    }
    help
}

fn log_level_help(suggestion: Option<&str>) -> String {
    match suggestion {
        Some(level) => format!("did you mean `{level}`?"),
        None => format!("use one of {}", LOG_LEVELS.join(", ")),
    }
}

impl ConfigError {
    /// An unrecognized `runtime.log_level`, with the closest known level.
    pub fn log_level(value: &str) -> Self {
        ConfigError::LogLevel {
            value: value.to_string(),
            suggestion: closest(&value.to_ascii_lowercase(), LOG_LEVELS),
        }
    }
}

/// The option most similar to `input`, when one is close enough.
pub fn closest<'a>(input: &str, options: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    options
        .into_iter()
        .map(|option| (strsim::jaro_winkler(input, option), option))
        .filter(|(score, _)| *score >= CLOSE_ENOUGH)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, option)| option)
}

fn table_name(path: &[String]) -> String {
    if path.is_empty() {
        "the top level".to_string()
    } else {
        format!("[{}]", path.join("."))
    }
}

/// Turn a figment extraction failure into diagnostics, one per error.
///
/// `sources` pairs each TOML origin (file path or custom provider name) with
/// its content; unknown keys found in one of them get a labelled span.
pub fn from_figment(err: figment::Error, sources: &[(String, String)]) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let (span, src) = locate(&error, field, sources).unzip();
                ConfigError::UnknownKey {
                    key: field.clone(),
                    table: table_name(&error.path),
                    suggestion: closest(field, expected.iter().copied()).map(str::to_string),
                    accepted: expected.iter().map(|key| key.to_string()).collect(),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => {
                let mut path = error.path.clone();
                path.push(field.to_string());
                ConfigError::MissingKey { key: path.join(".") }
            }
            Kind::InvalidType(found, expected) | Kind::InvalidValue(found, expected) => {
                ConfigError::InvalidValue {
                    key: error.path.join("."),
                    found: found.to_string(),
                    expected: expected.clone(),
                }
            }
            _ => ConfigError::Other(error.to_string()),
        })
        .collect()
}

fn locate(
    error: &figment::Error,
    field: &str,
    sources: &[(String, String)],
) -> Option<(SourceSpan, NamedSource<String>)> {
    let origin = match error.metadata.as_ref()?.source.as_ref()? {
        figment::Source::File(path) => path.display().to_string(),
        figment::Source::Custom(name) => name.clone(),
        _ => return None,
    };
    let (name, content) = sources.iter().find(|(name, _)| *name == origin)?;
    let offset = key_offset(content, &error.path, field)?;
    Some((
        SourceSpan::new(offset.into(), field.len()),
        NamedSource::new(name, content.clone()),
    ))
}

/// Byte offset of the line assigning `field` inside the table `table`.
///
/// Tracks `[a.b]` headers; keys before the first header belong to the root
/// table. Quoted keys and inline tables are not searched.
pub fn key_offset(content: &str, table: &[String], field: &str) -> Option<usize> {
    let wanted = table.join(".");
    let mut current = String::new();
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let text = line.trim_start();
        if let Some(header) = text.strip_prefix('[') {
            current = header.split(']').next().unwrap_or_default().trim().to_string();
            continue;
        }
        if current != wanted {
            continue;
        }
        let Some((key, _)) = text.split_once('=') else {
            continue;
        };
        if key.trim() == field {
            return Some(start + (line.len() - text.len()));
        }
    }
    None
}

/// Render every error as a miette report.
pub fn render_report(errors: &[ConfigError]) -> String {
    let handler = GraphicalReportHandler::new();
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error).is_err() {
            let _ = writeln!(out, "Error: {error}");
        }
    }
    out
}

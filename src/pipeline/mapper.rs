//! Input Mapper
//!
//! Resolves a phase's `inputMapping` (`{name: path}`) against the running
//! [`ExecutionContext`]. Paths follow a small grammar:
//!
//! ```text
//! path    := segment ("." segment)*
//! segment := name ("[" index "]")*
//! ```
//!
//! Supported roots are `user_query`, `search_results`,
//! `phases.<phaseId>...` and `metadata...`. A path that cannot be resolved
//! yields [`Resolved::Unset`]; resolution never fails.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::context::ExecutionContext;

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathRoot {
    UserQuery,
    SearchResults,
    Phase(String),
    Metadata,
}

/// A parsed input path
#[derive(Debug, Clone, PartialEq)]
pub struct InputPath {
    raw: String,
    root: PathRoot,
    rest: Vec<PathSegment>,
}

impl InputPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty path".to_string());
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            parse_segment(part, &mut segments)?;
        }

        let mut iter = segments.into_iter();
        let root = match iter.next() {
            Some(PathSegment::Key(name)) => match name.as_str() {
                "user_query" => PathRoot::UserQuery,
                "search_results" => PathRoot::SearchResults,
                "metadata" => PathRoot::Metadata,
                "phases" => match iter.next() {
                    Some(PathSegment::Key(phase_id)) => PathRoot::Phase(phase_id),
                    _ => return Err("`phases` must be followed by a phase id".to_string()),
                },
                other => return Err(format!("unknown root `{}`", other)),
            },
            _ => return Err("path must start with a name".to_string()),
        };

        Ok(Self {
            raw: trimmed.to_string(),
            root,
            rest: iter.collect(),
        })
    }

    pub fn root(&self) -> &PathRoot {
        &self.root
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn parse_segment(part: &str, out: &mut Vec<PathSegment>) -> Result<(), String> {
    let (name, mut tail) = match part.find('[') {
        Some(pos) => (&part[..pos], &part[pos..]),
        None => (part, ""),
    };

    if name.is_empty() {
        return Err(format!("empty segment in `{}`", part));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(format!("invalid segment name `{}`", name));
    }
    out.push(PathSegment::Key(name.to_string()));

    while !tail.is_empty() {
        let close = tail
            .find(']')
            .ok_or_else(|| format!("unclosed index in `{}`", part))?;
        if !tail.starts_with('[') {
            return Err(format!("unexpected `{}` in `{}`", tail, part));
        }
        let index = tail[1..close]
            .parse::<usize>()
            .map_err(|_| format!("invalid index in `{}`", part))?;
        out.push(PathSegment::Index(index));
        tail = &tail[close + 1..];
    }
    Ok(())
}

/// A resolved input: a concrete value, or the sentinel for a path that did
/// not resolve. Executors degrade on `Unset` rather than failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(Value),
    Unset,
}

impl Resolved {
    pub fn is_unset(&self) -> bool {
        matches!(self, Resolved::Unset)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Unset => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Unset => None,
        }
    }
}

pub type ResolvedInputs = BTreeMap<String, Resolved>;

/// Look up one input by name, treating a missing binding as unset
pub fn input<'a>(inputs: &'a ResolvedInputs, name: &str) -> Option<&'a Value> {
    inputs.get(name).and_then(Resolved::as_value)
}

/// Resolve every declared binding
pub fn map_inputs(mapping: &BTreeMap<String, String>, ctx: &ExecutionContext) -> ResolvedInputs {
    mapping
        .iter()
        .map(|(name, raw)| {
            let resolved = match InputPath::parse(raw) {
                Ok(path) => resolve(&path, ctx),
                Err(reason) => {
                    warn!(input = %name, path = %raw, reason = %reason, "Invalid input path");
                    Resolved::Unset
                }
            };
            if resolved.is_unset() {
                warn!(input = %name, path = %raw, "Input path did not resolve, continuing unset");
            } else {
                debug!(input = %name, path = %raw, "Resolved input");
            }
            (name.clone(), resolved)
        })
        .collect()
}

pub fn resolve(path: &InputPath, ctx: &ExecutionContext) -> Resolved {
    let base: Cow<'_, Value> = match &path.root {
        PathRoot::UserQuery => Cow::Owned(Value::String(ctx.user_query.clone())),
        PathRoot::SearchResults => match serde_json::to_value(&ctx.search_results) {
            Ok(v) => Cow::Owned(v),
            Err(_) => return Resolved::Unset,
        },
        PathRoot::Metadata => Cow::Owned(Value::Object(ctx.metadata.clone())),
        PathRoot::Phase(phase_id) => {
            let Some(result) = ctx.phase(phase_id) else {
                return Resolved::Unset;
            };
            match path.rest.first() {
                // Common case: walk the output without serializing the result
                Some(PathSegment::Key(k)) if k == "output" => {
                    return finish(walk(&result.output, &path.rest[1..]));
                }
                _ => match serde_json::to_value(result) {
                    Ok(v) => Cow::Owned(v),
                    Err(_) => return Resolved::Unset,
                },
            }
        }
    };

    finish(walk(base.as_ref(), &path.rest))
}

fn walk<'a>(mut current: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current)
}

fn finish(value: Option<&Value>) -> Resolved {
    match value {
        Some(Value::Null) | None => Resolved::Unset,
        Some(v) => Resolved::Value(v.clone()),
    }
}

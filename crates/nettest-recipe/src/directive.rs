//! Lexer for directive keys.
//!
//! A directive key looks like `<tag(start,end)(start,end)_suffix>`: a tag, zero
//! or more slice ranges (only meaningful for `extend`), and an optional suffix
//! that keeps several directives of the same kind unique inside one mapping.

use crate::error::RecipeError;

pub const REPEAT_LAST: &str = "<repeat_last>";
pub const REMOVE: &str = "<remove>";

const TAGS: &[(&str, DirectiveKind)] = &[
    ("replace", DirectiveKind::Replace),
    ("extend", DirectiveKind::Extend),
    ("repeat_last", DirectiveKind::RepeatLast),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Replace,
    Extend,
    RepeatLast,
}

/// Half-open range with Python slice semantics: negative bounds count from the
/// end, a missing bound runs to the edge, out-of-range bounds clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl SliceRange {
    pub fn apply<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let len = items.len();
        let start = self.start.map_or(0, |idx| clamp_index(idx, len));
        let end = self.end.map_or(len, |idx| clamp_index(idx, len));
        if start >= end {
            &items[0..0]
        } else {
            &items[start..end]
        }
    }
}

fn clamp_index(idx: i64, len: usize) -> usize {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if idx < 0 { idx.saturating_add(len) } else { idx };
    // Bounded by [0, len], which came from a usize.
    resolved.clamp(0, len) as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub slices: Vec<SliceRange>,
    pub suffix: Option<String>,
}

/// Parse a mapping key. Keys that do not start with a known tag are ordinary
/// keys (`Ok(None)`); keys that start with a known tag but are malformed are
/// errors.
pub fn parse_directive(key: &str) -> Result<Option<Directive>, RecipeError> {
    let Some(inner) = key.strip_prefix('<') else {
        return Ok(None);
    };
    let Some((tag, kind)) = TAGS.iter().find(|(tag, _)| inner.starts_with(tag)) else {
        return Ok(None);
    };
    let body = inner[tag.len()..]
        .strip_suffix('>')
        .ok_or_else(|| RecipeError::InvalidDirective(key.to_string()))?;

    let mut slices = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.strip_prefix('(') {
        let close = open
            .find(')')
            .ok_or_else(|| RecipeError::InvalidDirective(key.to_string()))?;
        slices.push(parse_slice(key, &open[..close])?);
        rest = &open[close + 1..];
    }
    if !slices.is_empty() && *kind != DirectiveKind::Extend {
        return Err(RecipeError::InvalidDirective(key.to_string()));
    }

    let suffix = if rest.is_empty() {
        None
    } else if let Some(suffix) = rest.strip_prefix('_') {
        Some(suffix.to_string())
    } else {
        return Err(RecipeError::InvalidDirective(key.to_string()));
    };

    Ok(Some(Directive {
        kind: *kind,
        slices,
        suffix,
    }))
}

pub fn is_repeat_last(key: &str) -> bool {
    matches!(
        parse_directive(key),
        Ok(Some(Directive {
            kind: DirectiveKind::RepeatLast,
            ..
        }))
    )
}

fn parse_slice(key: &str, args: &str) -> Result<SliceRange, RecipeError> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() > 2 {
        return Err(RecipeError::InvalidDirective(key.to_string()));
    }
    let bound = |raw: Option<&&str>| -> Result<Option<i64>, RecipeError> {
        match raw {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| RecipeError::InvalidSliceBound {
                    directive: key.to_string(),
                    bound: raw.to_string(),
                }),
        }
    };
    Ok(SliceRange {
        start: bound(parts.first())?,
        end: bound(parts.get(1))?,
    })
}

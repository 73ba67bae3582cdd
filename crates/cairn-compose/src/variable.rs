//! Variable expression parsing built on `nom`.
//!
//! A variable expression has the form `${path}`, where `path` addresses
//! another instance's output: `dotted.keys` optionally followed by
//! `[index]` selectors. Expressions may be embedded anywhere inside a
//! string; `$$` is a literal `$`.

use std::borrow::Cow;
use std::fmt;

use cairn_common::error::{CairnError, Result};
use cairn_common::types::is_key_char;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res},
    multi::many0,
    sequence::{delimited, preceded},
};

/// One step of a reference path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A named key (`.name`).
    Key(String),
    /// A sequence index (`[0]`).
    Index(usize),
}

impl PathSegment {
    /// Returns the segment as a declaration key.
    ///
    /// Children returned as a sequence are keyed by their index, so
    /// `routes[0]` and `routes.0` address the same instance.
    #[must_use]
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Self::Key(key) => Cow::Borrowed(key),
            Self::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// A `${...}` expression found inside an input value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableReference {
    expression: String,
    path: Vec<PathSegment>,
}

impl VariableReference {
    /// Parses a complete `${...}` expression.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `expression` is not exactly one
    /// well-formed variable expression.
    pub fn parse(expression: &str) -> Result<Self> {
        match reference(expression) {
            Ok(("", path)) => Ok(Self {
                expression: expression.to_owned(),
                path,
            }),
            _ => Err(malformed(expression)),
        }
    }

    /// The expression text as written, including `${` and `}`.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The parsed path segments.
    #[must_use]
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }
}

impl fmt::Display for VariableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// A piece of a string input: literal text or an embedded reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Text copied verbatim (escapes already applied).
    Literal(String),
    /// An embedded variable expression.
    Reference(VariableReference),
}

/// Splits a string into literal text and variable references.
///
/// Adjacent literal text is merged; a string without any reference yields
/// at most one [`TemplatePart::Literal`].
///
/// # Errors
///
/// Returns a structural error when a `${` does not start a well-formed
/// expression.
pub fn parse_template(input: &str) -> Result<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$$") {
            literal.push('$');
            rest = after;
        } else if tail.starts_with("${") {
            let Ok((after, path)) = reference(tail) else {
                return Err(malformed(input));
            };
            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            let expression = &tail[..tail.len() - after.len()];
            parts.push(TemplatePart::Reference(VariableReference {
                expression: expression.to_owned(),
                path,
            }));
            rest = after;
        } else {
            literal.push('$');
            rest = &tail[1..];
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

fn malformed(input: &str) -> CairnError {
    CairnError::structural(format!("malformed variable expression in \"{input}\""))
}

fn key_segment(input: &str) -> IResult<&str, PathSegment> {
    map(take_while1(is_key_char), |key: &str| {
        PathSegment::Key(key.to_owned())
    })
    .parse(input)
}

fn index_segment(input: &str) -> IResult<&str, PathSegment> {
    map_res(delimited(char('['), digit1, char(']')), |digits: &str| {
        digits.parse::<usize>().map(PathSegment::Index)
    })
    .parse(input)
}

fn path(input: &str) -> IResult<&str, Vec<PathSegment>> {
    let (input, first) = key_segment(input)?;
    let (input, rest) =
        many0(alt((preceded(char('.'), key_segment), index_segment))).parse(input)?;
    let mut segments = Vec::with_capacity(rest.len() + 1);
    segments.push(first);
    segments.extend(rest);
    Ok((input, segments))
}

fn reference(input: &str) -> IResult<&str, Vec<PathSegment>> {
    delimited(tag("${"), path, char('}')).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.into())
    }

    #[test]
    fn parses_dotted_path() {
        let r = VariableReference::parse("${api.role.arn}").expect("parse");
        assert_eq!(r.path(), &[key("api"), key("role"), key("arn")]);
        assert_eq!(r.expression(), "${api.role.arn}");
    }

    #[test]
    fn parses_index_selectors() {
        let r = VariableReference::parse("${routes[1].arn}").expect("parse");
        assert_eq!(r.path(), &[key("routes"), PathSegment::Index(1), key("arn")]);
    }

    #[test]
    fn rejects_trailing_text() {
        assert!(VariableReference::parse("${a.b} tail").is_err());
        assert!(VariableReference::parse("${}").is_err());
        assert!(VariableReference::parse("${a..b}").is_err());
    }

    #[test]
    fn plain_string_is_one_literal() {
        let parts = parse_template("us-east-1").expect("parse");
        assert_eq!(parts, vec![TemplatePart::Literal("us-east-1".into())]);
    }

    #[test]
    fn empty_string_has_no_parts() {
        assert!(parse_template("").expect("parse").is_empty());
    }

    #[test]
    fn splits_text_around_references() {
        let parts = parse_template("arn:${role.arn}/${stage}").expect("parse");
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], TemplatePart::Literal("arn:".into()));
        assert!(matches!(&parts[1], TemplatePart::Reference(r) if r.expression() == "${role.arn}"));
        assert_eq!(parts[2], TemplatePart::Literal("/".into()));
        assert!(matches!(&parts[3], TemplatePart::Reference(r) if r.path() == [key("stage")]));
    }

    #[test]
    fn dollar_escapes_and_lone_dollars_are_literal() {
        let parts = parse_template("cost $5 and $${not.a.ref}").expect("parse");
        assert_eq!(
            parts,
            vec![TemplatePart::Literal("cost $5 and ${not.a.ref}".into())]
        );
    }

    #[test]
    fn unterminated_expression_is_structural_error() {
        let err = parse_template("prefix ${a.b").unwrap_err();
        assert!(err.to_string().contains("malformed variable expression"), "got: {err}");
    }

    #[test]
    fn index_segment_doubles_as_key() {
        assert_eq!(PathSegment::Index(3).as_key(), "3");
        assert_eq!(key("id").as_key(), "id");
    }
}

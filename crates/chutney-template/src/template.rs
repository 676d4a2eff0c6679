//! Template parsing and substitution.

use std::collections::BTreeSet;

use crate::bindings::Bindings;
use crate::error::{RenderError, Result};

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `${name}` or `$name`.
    Var(String),
    /// `${include:other}`.
    Include(String),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

fn is_bare_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_braced_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':')
}

impl Template {
    /// Parse template text.
    ///
    /// Supported syntax: `$$` for a literal dollar, `$name`, `${name}` and
    /// `${include:other}`. Any other use of `$` is a syntax error.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        let syntax = |at: usize, message: String| RenderError::Syntax {
            template: name.clone(),
            line: text[..at].matches('\n').count() + 1,
            message,
        };

        while i < bytes.len() {
            if bytes[i] != b'$' {
                let next = text[i..].find('$').map_or(bytes.len(), |off| i + off);
                literal.push_str(&text[i..next]);
                i = next;
                continue;
            }

            match bytes.get(i + 1) {
                Some(b'$') => {
                    literal.push('$');
                    i += 2;
                }
                Some(b'{') => {
                    let start = i + 2;
                    let close = text[start..]
                        .find('}')
                        .map(|off| start + off)
                        .ok_or_else(|| syntax(i, "unterminated ${".to_string()))?;
                    let inner = &text[start..close];
                    let segment = if let Some(include) = inner.strip_prefix("include:") {
                        if include.is_empty() {
                            return Err(syntax(i, "empty include".to_string()));
                        }
                        Segment::Include(include.to_string())
                    } else if !inner.is_empty() && inner.chars().all(is_braced_char) {
                        Segment::Var(inner.to_string())
                    } else {
                        return Err(syntax(i, format!("invalid placeholder ${{{inner}}}")));
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    i = close + 1;
                }
                Some(&b) if is_bare_char(b) => {
                    let start = i + 1;
                    let end = bytes[start..]
                        .iter()
                        .position(|&b| !is_bare_char(b))
                        .map_or(bytes.len(), |off| start + off);
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(text[start..end].to_string()));
                    i = end;
                }
                _ => return Err(syntax(i, "invalid placeholder after $".to_string())),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { name, segments })
    }

    pub(crate) fn from_segments(name: String, segments: Vec<Segment>) -> Self {
        Self { name, segments }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Names of the variables this template refers to.
    pub fn free_vars(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Includes referenced directly by this template.
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Include(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Substitute every placeholder. Values are inserted verbatim and never
    /// re-scanned.
    pub fn render(&self, bindings: &Bindings, nick: &str) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => match bindings.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(RenderError::MissingVariable {
                            name: name.clone(),
                            template: self.name.clone(),
                            nick: nick.to_string(),
                        })
                    }
                },
                Segment::Include(include) => {
                    return Err(RenderError::UnresolvedInclude {
                        template: self.name.clone(),
                        include: include.clone(),
                    })
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::BindingSource;

    #[test]
    fn parses_all_placeholder_forms() {
        let t = Template::parse("t", "a $x ${y.z} $$5 ${include:common.i}\n").unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("a ".to_string()),
                Segment::Var("x".to_string()),
                Segment::Literal(" ".to_string()),
                Segment::Var("y.z".to_string()),
                Segment::Literal(" $5 ".to_string()),
                Segment::Include("common.i".to_string()),
                Segment::Literal("\n".to_string()),
            ]
        );
        assert_eq!(t.includes().collect::<Vec<_>>(), vec!["common.i"]);
    }

    #[test]
    fn values_are_not_rescanned() {
        let t = Template::parse("t", "Nickname ${nick}").unwrap();
        let mut b = Bindings::new();
        b.set(BindingSource::Node, "nick", "${evil}");
        assert_eq!(t.render(&b, "test000a").unwrap(), "Nickname ${evil}");
    }

    #[test]
    fn missing_variable_is_named() {
        let t = Template::parse("relay", "OrPort $orport\nDirPort $dirport\n").unwrap();
        let mut b = Bindings::new();
        b.set(BindingSource::Node, "orport", "5001");
        match t.render(&b, "test001r") {
            Err(RenderError::MissingVariable { name, nick, .. }) => {
                assert_eq!(name, "dirport");
                assert_eq!(nick, "test001r");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_carry_line() {
        let err = Template::parse("bad", "ok\n${oops\n").unwrap_err();
        assert!(matches!(err, RenderError::Syntax { line: 2, .. }));

        let err = Template::parse("bad", "cost: $ 5").unwrap_err();
        assert!(matches!(err, RenderError::Syntax { line: 1, .. }));
    }

    #[test]
    fn free_vars_lists_each_name_once() {
        let t = Template::parse("t", "$a ${b} $a").unwrap();
        let vars: Vec<String> = t.free_vars().into_iter().collect();
        assert_eq!(vars, vec!["a", "b"]);
    }
}

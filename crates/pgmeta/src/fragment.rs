//! SQL fragments: library text interleaved with parameter references.
//!
//! A [`Fragment`] never contains caller values as text. Values are held as
//! pieces and only turn into `$n` placeholders when the owning statement is
//! rendered against a [`ParamRegistry`].

use crate::error::{OrmResult, UsageError};
use crate::param::{ParamRegistry, Placeholder};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Anything that renders into SQL text, registering its values as it goes.
pub trait Render: Send + Sync {
    fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String>;
}

#[derive(Clone)]
enum Piece {
    Text(String),
    /// Positional template argument (`{0}`); repeated use shares one placeholder.
    Arg(usize),
    Bind(Value),
    Named(String),
    Nested(Arc<dyn Render>),
}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Piece::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Piece::Arg(i) => f.debug_tuple("Arg").field(i).finish(),
            Piece::Bind(v) => f.debug_tuple("Bind").field(v).finish(),
            Piece::Named(n) => f.debug_tuple("Named").field(n).finish(),
            Piece::Nested(_) => f.write_str("Nested(..)"),
        }
    }
}

/// A piece of SQL text with parameter references.
#[derive(Clone, Debug, Default)]
pub struct Fragment {
    pieces: Vec<Piece>,
    args: Vec<Value>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library-produced text, used verbatim.
    ///
    /// This is also the raw escape hatch: whatever is passed here reaches the
    /// server unchanged, so it must never contain caller data.
    pub fn raw(sql: impl Into<String>) -> Self {
        let mut f = Self::new();
        f.push(sql);
        f
    }

    /// Parse a template with `{0}`-style positional and `{name}` named references.
    ///
    /// `{{` and `}}` produce literal braces. Positional references must index
    /// into `args`; named references resolve against parameters declared on the
    /// statement (see `bind_named`).
    ///
    /// ```ignore
    /// let f = Fragment::template("p.age >= {0} AND p.age < {1}", args![18, 65])?;
    /// ```
    pub fn template(template: &str, args: Vec<Value>) -> Result<Self, UsageError> {
        let mut f = Self {
            pieces: Vec::new(),
            args,
        };
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '}' => {
                    return Err(UsageError::InvalidTemplate(format!(
                        "unmatched '}}' in `{template}`"
                    )));
                }
                '{' => {
                    let mut token = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => token.push(ch),
                            None => {
                                return Err(UsageError::InvalidTemplate(format!(
                                    "unclosed '{{' in `{template}`"
                                )));
                            }
                        }
                    }
                    let token = token.trim();
                    if !text.is_empty() {
                        f.pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    if let Ok(index) = token.parse::<usize>() {
                        if index >= f.args.len() {
                            return Err(UsageError::InvalidTemplate(format!(
                                "argument {{{index}}} out of range ({} given)",
                                f.args.len()
                            )));
                        }
                        f.pieces.push(Piece::Arg(index));
                    } else if is_identifier(token) {
                        f.pieces.push(Piece::Named(token.to_string()));
                    } else {
                        return Err(UsageError::InvalidTemplate(format!(
                            "bad reference {{{token}}} in `{template}`"
                        )));
                    }
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            f.pieces.push(Piece::Text(text));
        }
        Ok(f)
    }

    /// Append library text.
    pub fn push(&mut self, sql: impl Into<String>) -> &mut Self {
        let sql = sql.into();
        if sql.is_empty() {
            return self;
        }
        match self.pieces.last_mut() {
            Some(Piece::Text(s)) => s.push_str(&sql),
            _ => self.pieces.push(Piece::Text(sql)),
        }
        self
    }

    /// Append a bound value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.pieces.push(Piece::Bind(value.into()));
        self
    }

    /// Append a reference to a statement-level named parameter.
    pub fn push_named(&mut self, name: impl Into<String>) -> &mut Self {
        self.pieces.push(Piece::Named(name.into()));
        self
    }

    /// Append a nested statement (rendered without surrounding parentheses).
    pub fn push_nested(&mut self, nested: Arc<dyn Render>) -> &mut Self {
        self.pieces.push(Piece::Nested(nested));
        self
    }

    /// Append another fragment, keeping its arguments.
    pub fn append(&mut self, other: Fragment) -> &mut Self {
        let offset = self.args.len();
        self.args.extend(other.args);
        for piece in other.pieces {
            match piece {
                Piece::Arg(i) => self.pieces.push(Piece::Arg(i + offset)),
                Piece::Text(s) => {
                    self.push(s);
                }
                p => self.pieces.push(p),
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// No pieces besides whitespace.
    pub(crate) fn is_blank(&self) -> bool {
        self.pieces
            .iter()
            .all(|p| matches!(p, Piece::Text(s) if s.trim().is_empty()))
    }
}

impl Render for Fragment {
    fn render(&self, reg: &mut ParamRegistry) -> OrmResult<String> {
        let mut out = String::new();
        let mut arg_slots: Vec<Option<Placeholder>> = vec![None; self.args.len()];
        for piece in &self.pieces {
            match piece {
                Piece::Text(s) => out.push_str(s),
                Piece::Arg(i) => {
                    let placeholder = match arg_slots[*i] {
                        Some(p) => p,
                        None => {
                            let p = reg.add(self.args[*i].clone());
                            arg_slots[*i] = Some(p);
                            p
                        }
                    };
                    out.push_str(&placeholder.to_string());
                }
                Piece::Bind(v) => out.push_str(&reg.add(v.clone()).to_string()),
                Piece::Named(name) => out.push_str(&reg.named(name)?.to_string()),
                Piece::Nested(nested) => out.push_str(&nested.render(reg)?),
            }
        }
        Ok(out)
    }
}

impl From<&str> for Fragment {
    fn from(sql: &str) -> Self {
        Fragment::raw(sql)
    }
}

impl From<String> for Fragment {
    fn from(sql: String) -> Self {
        Fragment::raw(sql)
    }
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build a `Vec<Value>` of template arguments.
///
/// ```ignore
/// qb.where_tpl("a.age >= {0} AND a.name = {1}", args![18, "alice"])
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($value)),+]
    };
}

//! Statement-scoped parameter registry.
//!
//! Every caller-supplied value enters generated SQL through [`ParamRegistry`]:
//! the registry stores the value and hands back a [`Placeholder`] that is
//! embedded in the command text. Positions are minted strictly increasing in
//! render order, so the same builder state always yields the same numbering.

use crate::error::UsageError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// A positional placeholder (`$1`, `$2`, ...) unique within one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder(usize);

impl Placeholder {
    /// 1-based position in the parameter list.
    pub fn position(self) -> usize {
        self.0
    }

    /// Default parameter name derived from the position.
    pub fn default_name(self) -> String {
        format!("p{}", self.0)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// One bound parameter of an assembled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub placeholder: Placeholder,
    pub name: String,
    pub value: Value,
    /// Declared size (for fixed-width text/binary columns).
    pub size: Option<i32>,
    /// Engine type name, when the target column is known.
    pub type_tag: Option<&'static str>,
}

#[derive(Debug)]
enum Named {
    Pending(Value),
    Bound(Placeholder),
}

/// Ordered parameter list for a single statement.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    slots: Vec<Option<Param>>,
    named: HashMap<String, Named>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next placeholder without binding a value yet.
    ///
    /// A placeholder left unbound makes [`ParamRegistry::finish`] fail.
    pub fn next(&mut self) -> Placeholder {
        self.slots.push(None);
        Placeholder(self.slots.len())
    }

    fn bind_full(
        &mut self,
        placeholder: Placeholder,
        name: Option<String>,
        value: Value,
        size: Option<i32>,
        type_tag: Option<&'static str>,
    ) -> Result<(), UsageError> {
        let slot = self
            .slots
            .get_mut(placeholder.0 - 1)
            .ok_or_else(|| UsageError::DanglingPlaceholder(placeholder.to_string()))?;
        if slot.is_some() {
            return Err(UsageError::Conflict(placeholder.to_string()));
        }
        *slot = Some(Param {
            placeholder,
            name: name.unwrap_or_else(|| placeholder.default_name()),
            value,
            size,
            type_tag,
        });
        Ok(())
    }

    /// Store a value under a fresh placeholder.
    pub fn add(&mut self, value: impl Into<Value>) -> Placeholder {
        self.add_with(value, None, None)
    }

    /// Store a value with size and type hints under a fresh placeholder.
    pub fn add_with(
        &mut self,
        value: impl Into<Value>,
        size: Option<i32>,
        type_tag: Option<&'static str>,
    ) -> Placeholder {
        let placeholder = self.next();
        // A freshly minted slot is always empty.
        let _ = self.bind_full(placeholder, None, value.into(), size, type_tag);
        placeholder
    }

    /// Declare an explicitly named parameter.
    ///
    /// The value is only registered when a fragment first references the
    /// name, and every later reference reuses the same placeholder.
    pub fn declare(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), UsageError> {
        let name = name.into();
        if self.named.contains_key(&name) {
            return Err(UsageError::Conflict(name));
        }
        self.named.insert(name, Named::Pending(value.into()));
        Ok(())
    }

    /// Resolve a named reference to its placeholder.
    pub fn named(&mut self, name: &str) -> Result<Placeholder, UsageError> {
        if let Some(Named::Bound(placeholder)) = self.named.get(name) {
            return Ok(*placeholder);
        }
        let Some(Named::Pending(value)) = self.named.remove(name) else {
            return Err(UsageError::DanglingPlaceholder(format!("{{{name}}}")));
        };
        let placeholder = self.next();
        self.bind_full(placeholder, Some(name.to_string()), value, None, None)?;
        self.named.insert(name.to_string(), Named::Bound(placeholder));
        Ok(placeholder)
    }

    /// Look up a bound parameter by name.
    pub fn lookup(&self, name: &str) -> Option<&Param> {
        self.slots.iter().flatten().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Close the registry, failing if any minted placeholder is unbound.
    pub fn finish(self) -> Result<Vec<Param>, UsageError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| UsageError::DanglingPlaceholder(Placeholder(i + 1).to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_distinct_and_ordered() {
        let mut reg = ParamRegistry::new();
        let minted: Vec<_> = (0..5).map(|i| reg.add(i)).collect();
        for pair in minted.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        let names: Vec<_> = minted.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["$1", "$2", "$3", "$4", "$5"]);
        assert_eq!(reg.finish().unwrap().len(), 5);
    }

    #[test]
    fn unbound_placeholder_fails_finish() {
        let mut reg = ParamRegistry::new();
        reg.add(1);
        let _ = reg.next();
        assert_eq!(
            reg.finish().unwrap_err(),
            UsageError::DanglingPlaceholder("$2".into())
        );
    }

    #[test]
    fn named_parameters_are_reused() {
        let mut reg = ParamRegistry::new();
        reg.declare("since", 2020).unwrap();
        let a = reg.named("since").unwrap();
        let b = reg.named("since").unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.lookup("since").unwrap().value, Value::I32(2020));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_name_conflicts() {
        let mut reg = ParamRegistry::new();
        reg.declare("x", 1).unwrap();
        assert_eq!(reg.declare("x", 2), Err(UsageError::Conflict("x".into())));
    }

    #[test]
    fn undeclared_name_dangles() {
        let mut reg = ParamRegistry::new();
        assert!(matches!(
            reg.named("nope"),
            Err(UsageError::DanglingPlaceholder(_))
        ));
    }

    #[test]
    fn add_with_keeps_hints() {
        let mut reg = ParamRegistry::new();
        let p = reg.add_with("abc", Some(3), Some("bpchar"));
        let params = reg.finish().unwrap();
        assert_eq!(params[0].placeholder, p);
        assert_eq!(params[0].size, Some(3));
        assert_eq!(params[0].type_tag, Some("bpchar"));
        assert_eq!(params[0].name, "p1");
    }
}

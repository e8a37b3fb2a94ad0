use std::fmt;
use std::str::FromStr;

use crate::error::{MappingError, Result};
use crate::types::ValueKind;

/// Declared shape of a domain type, before mapping.
///
/// Generic instantiations of the built-in containers are canonicalized into the
/// dedicated `List`, `Map` and `Nullable` variants so that `List<Hat>` and
/// `Generic { definition: "IList", .. }` memoize to the same mapped type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeType {
    /// Primitive or string/date value.
    Value(ValueKind),
    /// Registered source type, enum or proxy alias.
    Named(String),
    /// Ordered sequence.
    List(Box<NativeType>),
    /// String-keyed dictionary.
    Map(Box<NativeType>, Box<NativeType>),
    /// Optional value.
    Nullable(Box<NativeType>),
    /// Instantiation of a registered generic definition.
    Generic {
        /// Name of the registered definition.
        definition: String,
        /// Type arguments in declaration order.
        arguments: Vec<NativeType>,
    },
    /// Reference to the n-th type parameter of the enclosing generic definition.
    Parameter(usize),
}

impl NativeType {
    /// Shorthand for a named type.
    pub fn named(name: impl Into<String>) -> Self {
        NativeType::Named(name.into())
    }

    /// Shorthand for `List<inner>`.
    pub fn list(inner: NativeType) -> Self {
        NativeType::List(Box::new(inner))
    }

    /// Shorthand for `Dictionary<key, value>`.
    pub fn map(key: NativeType, value: NativeType) -> Self {
        NativeType::Map(Box::new(key), Box::new(value))
    }

    /// Shorthand for `Nullable<inner>`.
    pub fn nullable(inner: NativeType) -> Self {
        NativeType::Nullable(Box::new(inner))
    }

    /// Shorthand for a generic instantiation.
    pub fn generic(definition: impl Into<String>, arguments: Vec<NativeType>) -> Self {
        NativeType::Generic {
            definition: definition.into(),
            arguments,
        }
    }

    /// Replaces type parameters with the supplied arguments.
    pub fn substitute(&self, arguments: &[NativeType]) -> NativeType {
        match self {
            NativeType::Parameter(index) => arguments
                .get(*index)
                .cloned()
                .unwrap_or(NativeType::Parameter(*index)),
            NativeType::List(inner) => NativeType::list(inner.substitute(arguments)),
            NativeType::Map(k, v) => NativeType::map(k.substitute(arguments), v.substitute(arguments)),
            NativeType::Nullable(inner) => NativeType::nullable(inner.substitute(arguments)),
            NativeType::Generic {
                definition,
                arguments: inner,
            } => NativeType::generic(
                definition.clone(),
                inner.iter().map(|a| a.substitute(arguments)).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Folds built-in container instantiations and value-kind names into their
    /// dedicated variants.
    pub fn canonical(&self) -> NativeType {
        match self {
            NativeType::Named(name) => match ValueKind::from_name(name) {
                Some(kind) => NativeType::Value(kind),
                None => self.clone(),
            },
            NativeType::List(inner) => NativeType::list(inner.canonical()),
            NativeType::Map(k, v) => NativeType::map(k.canonical(), v.canonical()),
            NativeType::Nullable(inner) => match inner.canonical() {
                nested @ NativeType::Nullable(_) => nested,
                inner => NativeType::nullable(inner),
            },
            NativeType::Generic {
                definition,
                arguments,
            } => {
                let args: Vec<NativeType> = arguments.iter().map(NativeType::canonical).collect();
                match (container_kind(definition), args.as_slice()) {
                    (Some(Container::List), [elem]) => NativeType::list(elem.clone()),
                    (Some(Container::Map), [k, v]) => NativeType::map(k.clone(), v.clone()),
                    (Some(Container::Nullable), [inner]) => {
                        NativeType::nullable(inner.clone()).canonical()
                    }
                    _ => NativeType::generic(definition.clone(), args),
                }
            }
            other => other.clone(),
        }
    }
}

enum Container {
    List,
    Map,
    Nullable,
}

fn container_kind(definition: &str) -> Option<Container> {
    match definition.to_ascii_lowercase().as_str() {
        "list" | "ilist" | "icollection" | "ienumerable" | "vec" | "set" | "iset" => {
            Some(Container::List)
        }
        "dictionary" | "idictionary" | "map" => Some(Container::Map),
        "nullable" | "option" => Some(Container::Nullable),
        _ => None,
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Value(kind) => f.write_str(kind.name()),
            NativeType::Named(name) => f.write_str(name),
            NativeType::List(inner) => write!(f, "List<{inner}>"),
            NativeType::Map(k, v) => write!(f, "Dictionary<{k},{v}>"),
            NativeType::Nullable(inner) => write!(f, "Nullable<{inner}>"),
            NativeType::Generic {
                definition,
                arguments,
            } => {
                write!(f, "{definition}<")?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            NativeType::Parameter(index) => write!(f, "T{index}"),
        }
    }
}

impl FromStr for NativeType {
    type Err = MappingError;

    /// Parses `Int32`, `Hat`, `List<Hat>`, `map<string,int32>`, `Int32?`,
    /// `Page<Critter>` and `T0` (type parameter) forms.
    fn from_str(s: &str) -> Result<Self> {
        let mut parser = TypeNameParser { src: s, pos: 0 };
        let ty = parser.parse()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(MappingError::Config(format!(
                "unexpected trailing input in type name '{s}'"
            )));
        }
        Ok(ty.canonical())
    }
}

struct TypeNameParser<'a> {
    src: &'a str,
    pos: usize,
}

impl TypeNameParser<'_> {
    fn skip_ws(&mut self) {
        while let Some(c) = self.src[self.pos..].chars().next().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&str> {
        self.skip_ws();
        let start = self.pos;
        let rest = &self.src[start..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(MappingError::Config(format!(
                "expected type name at offset {start} in '{}'",
                self.src
            )));
        }
        self.pos += len;
        Ok(&self.src[start..start + len])
    }

    fn parse(&mut self) -> Result<NativeType> {
        let name = self.ident()?.to_owned();
        let mut ty = if self.eat('<') {
            let mut arguments = vec![self.parse()?];
            while self.eat(',') {
                arguments.push(self.parse()?);
            }
            if !self.eat('>') {
                return Err(MappingError::Config(format!(
                    "unterminated generic argument list in '{}'",
                    self.src
                )));
            }
            NativeType::generic(name, arguments)
        } else if let Some(index) = parameter_index(&name) {
            NativeType::Parameter(index)
        } else {
            NativeType::Named(name)
        };
        while self.eat('?') {
            ty = NativeType::nullable(ty);
        }
        Ok(ty)
    }
}

fn parameter_index(name: &str) -> Option<usize> {
    name.strip_prefix('T')
        .filter(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse().ok())
}

use anyhow::{
    Error,
    Result,
};

use crate::core::types::{
    Dictionary,
    List,
    Value,
};

/// The kind of a procedure parameter.
///
/// Kinds mirror the parameter categories of dynamic call sites so that a
/// mirrored procedure can present the same external shape on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    VariadicPositional,
    KeywordOnly,
    VariadicKeyword,
}

impl ParameterKind {
    /// The kind name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::PositionalOnly => "POSITIONAL_ONLY",
            Self::PositionalOrKeyword => "POSITIONAL_OR_KEYWORD",
            Self::VariadicPositional => "VAR_POSITIONAL",
            Self::KeywordOnly => "KEYWORD_ONLY",
            Self::VariadicKeyword => "VAR_KEYWORD",
        }
    }
}

impl TryFrom<&str> for ParameterKind {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "POSITIONAL_ONLY" => Ok(Self::PositionalOnly),
            "POSITIONAL_OR_KEYWORD" => Ok(Self::PositionalOrKeyword),
            "VAR_POSITIONAL" => Ok(Self::VariadicPositional),
            "KEYWORD_ONLY" => Ok(Self::KeywordOnly),
            "VAR_KEYWORD" => Ok(Self::VariadicKeyword),
            _ => Err("unsupported parameter kind"),
        }
    }
}

/// How a procedure produces its result.
///
/// Recorded at registration time so invokers can dispatch on a tag rather
/// than inspecting the target at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// A single value, produced synchronously.
    Value,
    /// A single value, produced asynchronously.
    AsyncValue,
    /// A lazy sequence of values.
    Sequence,
    /// An asynchronous lazy sequence of values.
    AsyncSequence,
}

impl ResultKind {
    /// The kind name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::AsyncValue => "async_value",
            Self::Sequence => "sequence",
            Self::AsyncSequence => "async_sequence",
        }
    }

    /// Whether the result is a lazy sequence, transported as a cursor.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence | Self::AsyncSequence)
    }
}

impl TryFrom<&str> for ResultKind {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "value" => Ok(Self::Value),
            "async_value" => Ok(Self::AsyncValue),
            "sequence" => Ok(Self::Sequence),
            "async_sequence" => Ok(Self::AsyncSequence),
            _ => Err("unsupported result kind"),
        }
    }
}

/// The descriptor of a single procedure parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Option<Value>,
    pub annotation: Option<String>,
}

impl ParameterDescriptor {
    /// Creates a parameter descriptor of the given kind.
    pub fn new<S>(name: S, kind: ParameterKind) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            default: None,
            annotation: None,
        }
    }

    /// Attaches a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Attaches a stringified type annotation.
    pub fn with_annotation<S>(mut self, annotation: S) -> Self
    where
        S: Into<String>,
    {
        self.annotation = Some(annotation.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut dictionary = Dictionary::from_iter([
            ("name".to_owned(), Value::String(self.name.clone())),
            (
                "kind".to_owned(),
                Value::String(self.kind.wire_name().to_owned()),
            ),
        ]);
        if let Some(default) = &self.default {
            dictionary.insert("default".to_owned(), default.clone());
        }
        if let Some(annotation) = &self.annotation {
            dictionary.insert("annotation".to_owned(), Value::String(annotation.clone()));
        }
        Value::Dictionary(dictionary)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let dictionary = value
            .dictionary()
            .ok_or_else(|| Error::msg("parameter descriptor must be a dictionary"))?;
        let name = dictionary
            .get("name")
            .and_then(Value::string)
            .ok_or_else(|| Error::msg("parameter descriptor missing 'name'"))?;
        let kind = dictionary
            .get("kind")
            .and_then(Value::string)
            .ok_or_else(|| Error::msg("parameter descriptor missing 'kind'"))?;
        Ok(Self {
            name: name.to_owned(),
            kind: ParameterKind::try_from(kind).map_err(Error::msg)?,
            default: dictionary.get("default").cloned(),
            annotation: dictionary
                .get("annotation")
                .and_then(Value::string)
                .map(str::to_owned),
        })
    }
}

/// The descriptor of a registered procedure.
///
/// Immutable once registered. Descriptors travel in discovery responses so
/// that peers can mirror a procedure's external shape without holding its
/// implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDescriptor {
    pub name: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub result_kind: ResultKind,
}

impl ProcedureDescriptor {
    /// Creates a descriptor with no parameters.
    pub fn new<S>(name: S, result_kind: ResultKind) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameters: Vec::default(),
            result_kind,
        }
    }

    /// Appends a parameter.
    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Appends a plain positional-or-keyword parameter.
    pub fn positional<S>(self, name: S) -> Self
    where
        S: Into<String>,
    {
        self.with_parameter(ParameterDescriptor::new(
            name,
            ParameterKind::PositionalOrKeyword,
        ))
    }

    /// Encodes the descriptor for a discovery response.
    pub fn to_value(&self) -> Value {
        Value::Dictionary(Dictionary::from_iter([
            ("name".to_owned(), Value::String(self.name.clone())),
            (
                "parameters".to_owned(),
                Value::List(List::from_iter(
                    self.parameters.iter().map(ParameterDescriptor::to_value),
                )),
            ),
            (
                "result_kind".to_owned(),
                Value::String(self.result_kind.wire_name().to_owned()),
            ),
        ]))
    }

    /// Decodes a descriptor from a discovery response.
    pub fn from_value(value: &Value) -> Result<Self> {
        let dictionary = value
            .dictionary()
            .ok_or_else(|| Error::msg("procedure descriptor must be a dictionary"))?;
        let name = dictionary
            .get("name")
            .and_then(Value::string)
            .ok_or_else(|| Error::msg("procedure descriptor missing 'name'"))?;
        let parameters = match dictionary.get("parameters") {
            Some(Value::List(parameters)) => parameters
                .iter()
                .map(ParameterDescriptor::from_value)
                .collect::<Result<_>>()?,
            _ => Vec::default(),
        };
        let result_kind = dictionary
            .get("result_kind")
            .and_then(Value::string)
            .ok_or_else(|| Error::msg("procedure descriptor missing 'result_kind'"))?;
        Ok(Self {
            name: name.to_owned(),
            parameters,
            result_kind: ResultKind::try_from(result_kind).map_err(Error::msg)?,
        })
    }
}

#[cfg(test)]
mod descriptor_test {
    use crate::{
        core::types::Value,
        registry::descriptor::{
            ParameterDescriptor,
            ParameterKind,
            ProcedureDescriptor,
            ResultKind,
        },
    };

    #[test]
    fn descriptor_round_trips_through_value() {
        let descriptor = ProcedureDescriptor::new("add", ResultKind::Value)
            .with_parameter(
                ParameterDescriptor::new("a", ParameterKind::PositionalOrKeyword)
                    .with_annotation("int"),
            )
            .with_parameter(
                ParameterDescriptor::new("b", ParameterKind::PositionalOrKeyword)
                    .with_default(Value::Integer(0)),
            );
        pretty_assertions::assert_eq!(
            ProcedureDescriptor::from_value(&descriptor.to_value()).unwrap(),
            descriptor
        );
    }

    #[test]
    fn rejects_unknown_result_kind() {
        let mut value = ProcedureDescriptor::new("f", ResultKind::Value).to_value();
        if let Value::Dictionary(dictionary) = &mut value {
            dictionary.insert(
                "result_kind".to_owned(),
                Value::String("mystery".to_owned()),
            );
        }
        assert_matches::assert_matches!(ProcedureDescriptor::from_value(&value), Err(_));
    }
}

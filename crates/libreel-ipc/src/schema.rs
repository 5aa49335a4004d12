//! Schema registry
//!
//! The closed set of methods reachable over a transport, with the positional
//! parameter shape each one accepts. Registry content is fixed at compile
//! time; there is no runtime registration.

use std::fmt;
use std::str::FromStr;

use ciborium::Value;

use crate::error::RpcError;

/// Worker namespace a method belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Feed,
    Distribution,
    Ledger,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Feed, Namespace::Distribution, Namespace::Ledger];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Feed => "feed",
            Namespace::Distribution => "distribution",
            Namespace::Ledger => "ledger",
        }
    }

    /// Methods served by this namespace
    pub fn methods(self) -> impl Iterator<Item = Method> {
        Method::ALL.into_iter().filter(move |m| m.namespace() == self)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every callable method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    PublishPost,
    QueryFeed,
    SearchPosts,
    ReportPost,
    BlockUser,
    InitKeys,
    SeedFile,
    Stream,
    InitWallet,
    Mint,
    SendZap,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::PublishPost,
        Method::QueryFeed,
        Method::SearchPosts,
        Method::ReportPost,
        Method::BlockUser,
        Method::InitKeys,
        Method::SeedFile,
        Method::Stream,
        Method::InitWallet,
        Method::Mint,
        Method::SendZap,
    ];

    /// Wire name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Method::PublishPost => "publishPost",
            Method::QueryFeed => "queryFeed",
            Method::SearchPosts => "searchPosts",
            Method::ReportPost => "reportPost",
            Method::BlockUser => "blockUser",
            Method::InitKeys => "initKeys",
            Method::SeedFile => "seedFile",
            Method::Stream => "stream",
            Method::InitWallet => "initWallet",
            Method::Mint => "mint",
            Method::SendZap => "sendZap",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.as_str() == name)
    }

    pub fn namespace(self) -> Namespace {
        match self {
            Method::PublishPost
            | Method::QueryFeed
            | Method::SearchPosts
            | Method::ReportPost
            | Method::BlockUser
            | Method::InitKeys => Namespace::Feed,
            Method::SeedFile | Method::Stream => Namespace::Distribution,
            Method::InitWallet | Method::Mint | Method::SendZap => Namespace::Ledger,
        }
    }

    pub fn descriptor(self) -> &'static MethodDescriptor {
        &METHODS[self as usize]
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::from_name(s).ok_or_else(|| RpcError::UnknownMethod(s.to_string()))
    }
}

/// Accepted shape of one positional argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// UTF-8 string
    Text,
    /// Non-negative integer that fits in a u64
    Unsigned,
    /// Map with text keys; listed fields must be present and non-null
    Record { required: &'static [&'static str] },
    /// Binary payload
    Bytes,
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            ParamKind::Text => "a string",
            ParamKind::Unsigned => "a non-negative integer",
            ParamKind::Record { .. } => "a record",
            ParamKind::Bytes => "a byte string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSlot {
    ParamSlot { name, kind, required: true }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSlot {
    ParamSlot { name, kind, required: false }
}

/// A method and its positional parameter slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub method: Method,
    pub params: &'static [ParamSlot],
}

impl MethodDescriptor {
    /// Number of leading slots a caller must supply
    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| p.required).count()
    }
}

/// Indexed by `Method as usize`
static METHODS: [MethodDescriptor; 11] = [
    MethodDescriptor {
        method: Method::PublishPost,
        params: &[required("post", ParamKind::Record { required: &["magnet", "author"] })],
    },
    MethodDescriptor {
        method: Method::QueryFeed,
        params: &[optional("filter", ParamKind::Record { required: &[] })],
    },
    MethodDescriptor {
        method: Method::SearchPosts,
        params: &[required("query", ParamKind::Text), optional("limit", ParamKind::Unsigned)],
    },
    MethodDescriptor {
        method: Method::ReportPost,
        params: &[required("postId", ParamKind::Text), required("reason", ParamKind::Text)],
    },
    MethodDescriptor {
        method: Method::BlockUser,
        params: &[required("pubkey", ParamKind::Text)],
    },
    MethodDescriptor {
        method: Method::InitKeys,
        params: &[optional("secretKey", ParamKind::Text), optional("publicKey", ParamKind::Text)],
    },
    MethodDescriptor {
        method: Method::SeedFile,
        params: &[required("file", ParamKind::Bytes)],
    },
    MethodDescriptor {
        method: Method::Stream,
        params: &[required("locator", ParamKind::Text)],
    },
    MethodDescriptor {
        method: Method::InitWallet,
        params: &[optional("phrase", ParamKind::Text)],
    },
    MethodDescriptor {
        method: Method::Mint,
        params: &[required("amount", ParamKind::Unsigned)],
    },
    MethodDescriptor {
        method: Method::SendZap,
        params: &[
            required("receiver", ParamKind::Text),
            required("amount", ParamKind::Unsigned),
            required("reference", ParamKind::Text),
        ],
    },
];

/// Argument list rejected by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub method: Method,
    /// Offending slot, if the failure is about a single argument
    pub slot: Option<(usize, &'static str)>,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some((index, name)) => write!(f, "{}: argument {} ({}): {}", self.method, index, name, self.reason),
            None => write!(f, "{}: {}", self.method, self.reason),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for RpcError {
    fn from(err: ValidationError) -> Self {
        RpcError::Validation(err.to_string())
    }
}

/// Read-only view over the method table
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
    methods: &'static [MethodDescriptor],
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SchemaRegistry {
    pub const fn standard() -> Self {
        Self { methods: &METHODS }
    }

    pub fn methods(&self) -> impl Iterator<Item = &'static MethodDescriptor> {
        self.methods.iter()
    }

    /// Parameter shape of a method, by wire name
    pub fn describe(&self, name: &str) -> Result<&'static MethodDescriptor, RpcError> {
        self.methods
            .iter()
            .find(|d| d.method.as_str() == name)
            .ok_or_else(|| RpcError::UnknownMethod(name.to_string()))
    }

    /// Validate by wire name
    pub fn validate(&self, name: &str, args: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let descriptor = self.describe(name)?;
        Ok(check_args(descriptor, args)?)
    }

    /// Validate and normalize an argument list
    ///
    /// The result always has one entry per parameter slot: omitted optional
    /// arguments become `Null`, and integral floats in unsigned slots become
    /// integers.
    pub fn validate_method(&self, method: Method, args: Vec<Value>) -> Result<Vec<Value>, ValidationError> {
        check_args(method.descriptor(), args)
    }
}

fn check_args(descriptor: &MethodDescriptor, args: Vec<Value>) -> Result<Vec<Value>, ValidationError> {
    let method = descriptor.method;
    let params = descriptor.params;

    if args.len() > params.len() {
        return Err(ValidationError {
            method,
            slot: None,
            reason: format!("expected at most {} arguments, got {}", params.len(), args.len()),
        });
    }

    let mut normalized = Vec::with_capacity(params.len());
    let mut args = args.into_iter();
    for (index, slot) in params.iter().enumerate() {
        let fail = |reason: String| ValidationError {
            method,
            slot: Some((index, slot.name)),
            reason,
        };

        let value = match args.next() {
            None | Some(Value::Null) if slot.required => {
                return Err(fail("required argument is missing".to_string()));
            }
            None | Some(Value::Null) => Value::Null,
            Some(value) => check_slot(&slot.kind, value).map_err(fail)?,
        };
        normalized.push(value);
    }

    Ok(normalized)
}

fn check_slot(kind: &ParamKind, value: Value) -> Result<Value, String> {
    let mismatch = |value: &Value| format!("expected {}, got {}", kind.expected(), value_kind(value));

    match kind {
        ParamKind::Text => match value {
            Value::Text(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ParamKind::Unsigned => match value {
            Value::Integer(i) if u64::try_from(i).is_ok() => Ok(Value::Integer(i)),
            Value::Float(f) if f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64 => {
                Ok(Value::Integer((f as u64).into()))
            }
            other => Err(mismatch(&other)),
        },
        ParamKind::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ParamKind::Record { required } => {
            let entries = match &value {
                Value::Map(entries) => entries,
                other => return Err(mismatch(other)),
            };
            if let Some((key, _)) = entries.iter().find(|(k, _)| !k.is_text()) {
                return Err(format!("record keys must be strings, got {}", value_kind(key)));
            }
            for field in required.iter() {
                let present = entries
                    .iter()
                    .any(|(k, v)| k.as_text() == Some(*field) && !v.is_null());
                if !present {
                    return Err(format!("missing field `{}`", field));
                }
            }
            Ok(value)
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "byte string",
        Value::Float(_) => "float",
        Value::Text(_) => "string",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
        Value::Tag(_, _) => "tagged value",
        Value::Array(_) => "array",
        Value::Map(_) => "record",
        _ => "unknown value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn record(fields: &[(&str, Value)]) -> Value {
        Value::Map(fields.iter().map(|(k, v)| (text(k), v.clone())).collect())
    }

    #[test]
    fn test_descriptor_table_order() {
        for method in Method::ALL {
            assert_eq!(method.descriptor().method, method);
        }
    }

    #[test]
    fn test_names_unique_and_parse() {
        let mut names: Vec<_> = Method::ALL.iter().map(|m| m.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Method::ALL.len());

        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert!(matches!("explode".parse::<Method>(), Err(RpcError::UnknownMethod(_))));
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(Method::Mint.namespace(), Namespace::Ledger);
        assert_eq!(Method::Stream.namespace(), Namespace::Distribution);
        assert_eq!(Namespace::Feed.methods().count(), 6);
    }

    #[test]
    fn test_describe_unknown() {
        let registry = SchemaRegistry::standard();
        assert!(matches!(registry.describe("nope"), Err(RpcError::UnknownMethod(name)) if name == "nope"));
        assert_eq!(registry.describe("sendZap").unwrap().params.len(), 3);
    }

    #[test]
    fn test_optional_slots_padded() {
        let registry = SchemaRegistry::standard();
        let args = registry.validate_method(Method::InitWallet, vec![]).unwrap();
        assert_eq!(args, vec![Value::Null]);

        let args = registry.validate_method(Method::SearchPosts, vec![text("cats")]).unwrap();
        assert_eq!(args, vec![text("cats"), Value::Null]);
    }

    #[test]
    fn test_missing_required() {
        let err = SchemaRegistry::standard()
            .validate_method(Method::Mint, vec![])
            .unwrap_err();
        assert_eq!(err.slot, Some((0, "amount")));
        assert_eq!(err.to_string(), "mint: argument 0 (amount): required argument is missing");
    }

    #[test]
    fn test_too_many_args() {
        let err = SchemaRegistry::standard()
            .validate_method(Method::BlockUser, vec![text("a"), text("b")])
            .unwrap_err();
        assert_eq!(err.slot, None);
    }

    #[test]
    fn test_wrong_type() {
        let err = SchemaRegistry::standard()
            .validate_method(Method::Mint, vec![text("5")])
            .unwrap_err();
        assert!(err.reason.contains("non-negative integer"));

        let negative = Value::Integer((-1i64).into());
        assert!(SchemaRegistry::standard()
            .validate_method(Method::Mint, vec![negative])
            .is_err());
    }

    #[test]
    fn test_integral_float_normalized() {
        let args = SchemaRegistry::standard()
            .validate_method(Method::Mint, vec![Value::Float(5.0)])
            .unwrap();
        assert_eq!(args, vec![Value::Integer(5u64.into())]);

        assert!(SchemaRegistry::standard()
            .validate_method(Method::Mint, vec![Value::Float(5.5)])
            .is_err());
    }

    #[test]
    fn test_record_required_fields() {
        let registry = SchemaRegistry::standard();
        let author = record(&[("name", text("A")), ("pubkey", text("a"))]);

        let ok = record(&[("magnet", text("magnet:?xt=urn:btih:p1")), ("author", author.clone())]);
        assert!(registry.validate_method(Method::PublishPost, vec![ok]).is_ok());

        let missing = record(&[("author", author)]);
        let err = registry.validate_method(Method::PublishPost, vec![missing]).unwrap_err();
        assert!(err.reason.contains("magnet"));

        let err = registry
            .validate_method(Method::PublishPost, vec![text("not a post")])
            .unwrap_err();
        assert!(err.reason.contains("record"));
    }

    #[test]
    fn test_empty_filter_record() {
        let args = SchemaRegistry::standard()
            .validate_method(Method::QueryFeed, vec![Value::Map(vec![])])
            .unwrap();
        assert_eq!(args, vec![Value::Map(vec![])]);
    }

    #[test]
    fn test_bytes_slot() {
        let registry = SchemaRegistry::standard();
        assert!(registry
            .validate_method(Method::SeedFile, vec![Value::Bytes(vec![1, 2, 3])])
            .is_ok());
        assert!(registry.validate_method(Method::SeedFile, vec![text("file")]).is_err());
    }

    #[test]
    fn test_validation_error_converts() {
        let err: RpcError = SchemaRegistry::standard()
            .validate_method(Method::Stream, vec![])
            .unwrap_err()
            .into();
        assert!(matches!(err, RpcError::Validation(_)));
    }
}

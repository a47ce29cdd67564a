//! Minimal XML-RPC codec covering the value types XenAPI exchanges.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use roxmltree::{Document, Node};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Boolean(bool),
    Double(f64),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.as_struct().and_then(|members| members.get(name))
    }

    /// String member of a struct, empty when absent or not a string.
    pub fn member_str(&self, name: &str) -> &str {
        self.member(name).and_then(Value::as_str).unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum XmlRpcError {
    #[error("malformed XML-RPC response: {0}")]
    Malformed(String),

    #[error("XML-RPC fault {code}: {message}")]
    Fault { code: i64, message: String },
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::String(text) => {
            let _ = write!(out, "<string>{}</string>", escape(text));
        }
        Value::Int(number) => {
            let _ = write!(out, "<i4>{number}</i4>");
        }
        Value::Boolean(flag) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*flag));
        }
        Value::Double(number) => {
            let _ = write!(out, "<double>{number}</double>");
        }
        Value::DateTime(stamp) => {
            let _ = write!(out, "<dateTime.iso8601>{}</dateTime.iso8601>", escape(stamp));
        }
        Value::Base64(data) => {
            let _ = write!(out, "<base64>{}</base64>", escape(data));
        }
        Value::Array(values) => {
            out.push_str("<array><data>");
            for item in values {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name>", escape(name));
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Decodes a `<methodResponse>` into its single return value. A `<fault>`
/// becomes [`XmlRpcError::Fault`].
pub fn decode_response(body: &str) -> Result<Value, XmlRpcError> {
    let document =
        Document::parse(body).map_err(|err| XmlRpcError::Malformed(err.to_string()))?;
    let root = document.root_element();
    if !root.has_tag_name("methodResponse") {
        return Err(XmlRpcError::Malformed(format!(
            "unexpected root element '{}'",
            root.tag_name().name()
        )));
    }

    if let Some(fault) = child(root, "fault") {
        let value = decode_value(required_child(fault, "value")?)?;
        let code = match value.member("faultCode") {
            Some(Value::Int(code)) => *code,
            _ => 0,
        };
        return Err(XmlRpcError::Fault {
            code,
            message: value.member_str("faultString").to_string(),
        });
    }

    let params = required_child(root, "params")?;
    let param = required_child(params, "param")?;
    decode_value(required_child(param, "value")?)
}

fn decode_value(node: Node<'_, '_>) -> Result<Value, XmlRpcError> {
    // A <value> without a type element holds a plain string.
    let Some(typed) = node.children().find(|child| child.is_element()) else {
        return Ok(Value::String(text(node)));
    };

    let raw = text(typed);
    match typed.tag_name().name() {
        "string" => Ok(Value::String(raw)),
        "int" | "i4" | "i8" => raw
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| XmlRpcError::Malformed(format!("invalid integer '{raw}'"))),
        "boolean" => match raw.trim() {
            "1" => Ok(Value::Boolean(true)),
            "0" => Ok(Value::Boolean(false)),
            other => Err(XmlRpcError::Malformed(format!("invalid boolean '{other}'"))),
        },
        "double" => raw
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|_| XmlRpcError::Malformed(format!("invalid double '{raw}'"))),
        "dateTime.iso8601" => Ok(Value::DateTime(raw)),
        "base64" => Ok(Value::Base64(raw)),
        "nil" => Ok(Value::Nil),
        "array" => {
            let data = required_child(typed, "data")?;
            data.children()
                .filter(|item| item.is_element() && item.has_tag_name("value"))
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed
                .children()
                .filter(|item| item.is_element() && item.has_tag_name("member"))
            {
                let name = text(required_child(member, "name")?);
                let value = decode_value(required_child(member, "value")?)?;
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        other => Err(XmlRpcError::Malformed(format!("unknown value type '{other}'"))),
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|item| item.is_element() && item.has_tag_name(tag))
}

fn required_child<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
) -> Result<Node<'a, 'input>, XmlRpcError> {
    child(node, tag).ok_or_else(|| {
        XmlRpcError::Malformed(format!(
            "<{}> has no <{tag}> element",
            node.tag_name().name()
        ))
    })
}

fn text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|item| item.is_text())
        .filter_map(|item| item.text())
        .collect()
}

/// Outcome of a XenAPI call once the `{Status, Value | ErrorDescription}`
/// envelope is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum XapiReply {
    Success(Value),
    Failure(Vec<String>),
}

pub fn open_envelope(value: Value) -> Result<XapiReply, XmlRpcError> {
    let status = value.member_str("Status");
    match status {
        "Success" => Ok(XapiReply::Success(
            value.member("Value").cloned().unwrap_or(Value::Nil),
        )),
        "Failure" => Ok(XapiReply::Failure(string_list(
            value.member("ErrorDescription"),
        ))),
        other => Err(XmlRpcError::Malformed(format!(
            "XenAPI envelope has status '{other}'"
        ))),
    }
}

/// Flattens an array of scalar values into strings; anything else yields an
/// empty list.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    Value::Int(number) => number.to_string(),
                    Value::Boolean(flag) => flag.to_string(),
                    other => format!("{other:?}"),
                })
                .collect()
        })
        .unwrap_or_default()
}

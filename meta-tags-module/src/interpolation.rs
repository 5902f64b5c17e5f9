// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request variables in configured values

use http::HeaderName;
use module_utils::pingora::{RequestExt, RequestHeader};
use serde::Deserialize;
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Variable {
    Host,
    Path,
    Query,
    Header(HeaderName),
}

impl Variable {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "host" => Some(Self::Host),
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            name => {
                let name = name.strip_prefix("http_")?;
                HeaderName::try_from(name.replace('_', "-"))
                    .ok()
                    .map(Self::Header)
            }
        }
    }

    fn resolve<'r>(&self, request: &'r RequestHeader) -> Cow<'r, str> {
        match self {
            Self::Host => request.host().unwrap_or_default(),
            Self::Path => request.path().into(),
            Self::Query => request.uri.query().unwrap_or("").into(),
            Self::Header(name) => request
                .headers
                .get(name)
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Variable(Variable),
}

/// Parsed representation of a configured value that can refer to request properties
///
/// The following variables are resolved:
///
/// * `${host}`: the host name the request was addressed to, empty if unknown
/// * `${path}`: the path of the request URI
/// * `${query}`: the query string of the request URI, empty if there is none
/// * `${http_<header>}`: the value of an HTTP request header, underscores in the header name are
///   replaced by dashes. For example, `${http_accept_language}` is the value of the
///   `Accept-Language` header.
///
/// Anything else, including unknown variable names, is taken literally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct VariableInterpolation {
    parts: Vec<Part>,
}

impl VariableInterpolation {
    const VARIABLE_PREFIX: &'static str = "${";
    const VARIABLE_SUFFIX: &'static str = "}";

    /// Produces the value for a particular request.
    ///
    /// Values taken from the request are passed through `escape`, literal text is used as is.
    pub fn interpolate<F>(&self, request: &RequestHeader, escape: F) -> String
    where
        F: Fn(&str) -> Cow<'_, str>,
    {
        let mut result = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(value) => result.push_str(value),
                Part::Variable(variable) => {
                    result.push_str(&escape(variable.resolve(request).as_ref()))
                }
            }
        }
        result
    }
}

impl From<&str> for VariableInterpolation {
    fn from(mut value: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        while !value.is_empty() {
            let Some(start) = value.find(Self::VARIABLE_PREFIX) else {
                break;
            };
            let name_start = start + Self::VARIABLE_PREFIX.len();
            let variable = value[name_start..]
                .find(Self::VARIABLE_SUFFIX)
                .and_then(|len| Some((Variable::parse(&value[name_start..name_start + len])?, len)));

            if let Some((variable, len)) = variable {
                literal.push_str(&value[..start]);
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Part::Variable(variable));
                value = &value[name_start + len + Self::VARIABLE_SUFFIX.len()..];
            } else {
                // Not a variable, keep looking after the prefix
                literal.push_str(&value[..name_start]);
                value = &value[name_start..];
            }
        }

        literal.push_str(value);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Self { parts }
    }
}

impl From<String> for VariableInterpolation {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

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

//! Selection of the responses to be rewritten

use http::{HeaderMap, HeaderName, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

/// A pattern for a header value
///
/// `*` is a wildcard at the start or end of the pattern, e.g. `text/html*` matches any value
/// starting with `text/html`. A single `*` matches any value. Comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePattern {
    /// Matches any value
    Any,
    /// Matches the exact value
    Exact(String),
    /// Matches values starting with the string
    Prefix(String),
    /// Matches values ending with the string
    Suffix(String),
    /// Matches values containing the string
    Contains(String),
}

impl ValuePattern {
    /// Checks whether the value is matched.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_ascii_lowercase();
        match self {
            Self::Any => true,
            Self::Exact(pattern) => value == *pattern,
            Self::Prefix(pattern) => value.starts_with(pattern.as_str()),
            Self::Suffix(pattern) => value.ends_with(pattern.as_str()),
            Self::Contains(pattern) => value.contains(pattern.as_str()),
        }
    }
}

impl From<&str> for ValuePattern {
    fn from(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value == "*" {
            return Self::Any;
        }

        match (value.strip_prefix('*'), value.strip_suffix('*')) {
            (Some(_), Some(_)) => Self::Contains(value[1..value.len() - 1].to_owned()),
            (Some(suffix), None) => Self::Suffix(suffix.to_owned()),
            (None, Some(prefix)) => Self::Prefix(prefix.to_owned()),
            (None, None) => Self::Exact(value),
        }
    }
}

/// Decides which responses should be buffered and rewritten based on their status code and
/// headers
///
/// With the default settings, every response is matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseMatcher {
    /// Status codes of responses to match. Values `1` to `5` stand for a status class, e.g. `2`
    /// matches any `2xx` status. An empty list matches any status.
    pub status: Vec<u16>,

    /// Headers that must be present in the response, mapped to a list of patterns for their
    /// value. At least one value of the header needs to match any of the patterns. An empty list
    /// of patterns only requires the header to be present.
    pub headers: HeaderPatterns,
}

impl ResponseMatcher {
    /// Checks whether a response with the given status code and headers is matched.
    pub fn matches(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        self.status_matches(status) && self.headers.matches(headers)
    }

    fn status_matches(&self, status: StatusCode) -> bool {
        if self.status.is_empty() {
            return true;
        }

        let status = status.as_u16();
        self.status.iter().any(|&expected| {
            if (1..=5).contains(&expected) {
                status / 100 == expected
            } else {
                status == expected
            }
        })
    }
}

/// Header conditions of a [`ResponseMatcher`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "HashMap<String, Vec<String>>")]
pub struct HeaderPatterns {
    patterns: Vec<(HeaderName, Vec<ValuePattern>)>,
}

impl HeaderPatterns {
    /// Adds a header condition.
    pub fn with(mut self, name: HeaderName, patterns: Vec<ValuePattern>) -> Self {
        self.patterns.push((name, patterns));
        self
    }

    /// Checks whether all the header conditions are satisfied.
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        self.patterns.iter().all(|(name, patterns)| {
            let mut values = headers.get_all(name).iter().peekable();
            if values.peek().is_none() {
                return false;
            }
            if patterns.is_empty() {
                return true;
            }

            values.any(|value| {
                let value = String::from_utf8_lossy(value.as_bytes());
                patterns.iter().any(|pattern| pattern.matches(&value))
            })
        })
    }
}

impl TryFrom<HashMap<String, Vec<String>>> for HeaderPatterns {
    type Error = String;

    fn try_from(value: HashMap<String, Vec<String>>) -> Result<Self, Self::Error> {
        let mut patterns = value
            .into_iter()
            .map(|(name, values)| {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|err| format!("invalid header name {name:?}: {err}"))?;
                let values = values
                    .iter()
                    .map(|value| ValuePattern::from(value.as_str()))
                    .collect();
                Ok((name, values))
            })
            .collect::<Result<Vec<_>, Self::Error>>()?;
        patterns.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
        Ok(Self { patterns })
    }
}

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

//! Regular expression based lookups of the page image and the topic of the request path

use log::{trace, warn};
use percent_encoding::percent_decode_str;
use regex::{bytes, Regex};
use serde::Deserialize;
use std::str::FromStr;

/// Default expression for [`ImageLocator`]: the `src` attribute of the first `<img>` tag
/// pointing to a JPEG, PNG, GIF or WebP file
pub const DEFAULT_IMAGE_REGEX: &str = r#"<img\s[^>]*?\bsrc="([^"]+\.(?:jpg|png|gif|webp))""#;

/// Default expression for [`TopicLocator`]: the second segment of the path, e.g. `topic` in
/// `/en/topic/page`
pub const DEFAULT_TOPIC_REGEX: &str = r"^/[^/]+/([^/]+)";

/// Finds the first image referenced by a page
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct ImageLocator {
    regex: bytes::Regex,
}

impl ImageLocator {
    /// Returns the value of the first capture group for the first match in `body`.
    ///
    /// No match is a regular outcome, `None` is returned then. Matches that aren’t valid UTF-8
    /// are ignored.
    pub fn find<'b>(&self, body: &'b [u8]) -> Option<&'b str> {
        let image = self.regex.captures(body)?.get(1)?.as_bytes();
        match std::str::from_utf8(image) {
            Ok(image) => {
                trace!("Found image in page: {image}");
                Some(image)
            }
            Err(err) => {
                warn!("Ignoring image path that isn’t valid UTF-8: {err}");
                None
            }
        }
    }

    /// Returns the regular expression used.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl PartialEq for ImageLocator {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
    }
}

impl Eq for ImageLocator {}

impl TryFrom<&str> for ImageLocator {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let regex = bytes::Regex::new(value).map_err(|err| err.to_string())?;
        if regex.captures_len() < 2 {
            return Err(format!(
                "image regular expression {value:?} has no capture group"
            ));
        }
        Ok(Self { regex })
    }
}

impl TryFrom<String> for ImageLocator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl FromStr for ImageLocator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

/// Extracts a topic name from the request path
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct TopicLocator {
    regex: Regex,
}

impl TopicLocator {
    /// Matches the expression against `path` and returns the captured topic name, percent-decoded
    /// and in title case.
    ///
    /// No match or an empty capture is a regular outcome, `None` is returned then.
    pub fn find(&self, path: &str) -> Option<String> {
        let topic = self.regex.captures(path)?.get(1)?.as_str();
        if topic.is_empty() {
            return None;
        }

        let topic = title_case(&percent_decode_str(topic).decode_utf8_lossy());
        trace!("Extracted topic {topic:?} from path {path}");
        Some(topic)
    }

    /// Returns the regular expression used.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl PartialEq for TopicLocator {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
    }
}

impl Eq for TopicLocator {}

impl TryFrom<&str> for TopicLocator {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let regex = Regex::new(value).map_err(|err| err.to_string())?;
        if regex.captures_len() != 2 {
            return Err(format!(
                "topic regular expression {value:?} needs exactly one capture group"
            ));
        }
        Ok(Self { regex })
    }
}

impl TryFrom<String> for TopicLocator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl FromStr for TopicLocator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

/// Capitalizes the first letter of each word. Any character that isn’t a letter or digit
/// separates words.
pub fn title_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut word_start = true;
    for c in value.chars() {
        if word_start {
            result.extend(c.to_uppercase());
        } else {
            result.push(c);
        }
        word_start = !(c.is_alphanumeric() || c == '_');
    }
    result
}

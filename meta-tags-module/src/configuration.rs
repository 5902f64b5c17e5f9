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

//! Data structures required for `MetaTagsHandler` configuration

use clap::Parser;
use module_utils::pingora::{Error, ErrorType};
use serde::Deserialize;

use crate::locator::{ImageLocator, TopicLocator};
use crate::matcher::ResponseMatcher;

/// File extensions accepted for the default image
pub const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".png", ".gif", ".webp"];

/// Command line options of the meta tags module
#[derive(Debug, Default, Parser)]
pub struct MetaTagsOpt {
    /// Description to put into empty og:description tags, e.g. "A blog about woodworking".
    #[clap(long)]
    pub default_description: Option<String>,

    /// Image to put into empty og:image tags if the page contains no images, either an absolute
    /// path like /images/default.png or an https:// URL.
    #[clap(long)]
    pub default_image_path: Option<String>,

    /// Append the topic extracted from the request path to the description.
    #[clap(long)]
    pub insert_topic: Option<bool>,

    /// Regular expression with one capture group extracting the topic from the request path.
    #[clap(long)]
    pub topic_regex: Option<TopicLocator>,

    /// Regular expression locating the image in the page, the first capture group is the image
    /// URL.
    #[clap(long)]
    pub image_regex: Option<ImageLocator>,
}

/// Configuration file settings of the meta tags module
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetaTagsConf {
    /// Description to put into empty `og:description` tags. Request variables like `${host}` can
    /// be used here.
    pub default_description: String,

    /// Image to put into empty `og:image` tags if the page doesn’t contain any images. This is
    /// either a path starting with `/`, to be resolved relative to the request host, or an
    /// `https://` URL. The file extension has to be one of `.jpg`, `.png`, `.gif` or `.webp`.
    /// An empty value leaves `og:image` tags empty unless the page contains an image.
    #[serde(alias = "default_image_url")]
    pub default_image_path: String,

    /// If `true`, the topic extracted from the request path is appended to the description.
    pub insert_topic: bool,

    /// Regular expression extracting the topic from the request path. It needs to have exactly
    /// one capture group. By default, the second path segment is the topic.
    pub topic_regex: Option<TopicLocator>,

    /// Regular expression locating the first image in the page. The first capture group is the
    /// image URL. By default, the first `<img>` tag pointing to a supported image type is used.
    pub image_regex: Option<ImageLocator>,

    /// Restricts the responses to be rewritten. By default, all responses are rewritten.
    pub response_match: Option<ResponseMatcher>,
}

impl MetaTagsConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: MetaTagsOpt) {
        if let Some(default_description) = opt.default_description {
            self.default_description = default_description;
        }

        if let Some(default_image_path) = opt.default_image_path {
            self.default_image_path = default_image_path;
        }

        if let Some(insert_topic) = opt.insert_topic {
            self.insert_topic = insert_topic;
        }

        if opt.topic_regex.is_some() {
            self.topic_regex = opt.topic_regex;
        }

        if opt.image_regex.is_some() {
            self.image_regex = opt.image_regex;
        }
    }

    /// Checks whether the settings are valid.
    pub fn validate(&self) -> Result<(), Box<Error>> {
        validate_image_path(&self.default_image_path)
    }
}

fn validate_image_path(path: &str) -> Result<(), Box<Error>> {
    if path.is_empty() {
        return Ok(());
    }

    if !path.starts_with('/') && !path.starts_with("https://") {
        return Err(Error::explain(
            ErrorType::InternalError,
            format!("default image {path:?} has to start with / or https://"),
        ));
    }

    if !IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Err(Error::explain(
            ErrorType::InternalError,
            format!(
                "default image {path:?} has to end with one of {}",
                IMAGE_EXTENSIONS.join(", ")
            ),
        ));
    }

    Ok(())
}

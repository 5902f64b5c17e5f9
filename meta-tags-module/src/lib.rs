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

//! # Meta Tags Module
//!
//! This crate fills in empty social sharing meta tags of HTML pages. Responses produced by an
//! upstream are held back, and any `<meta property="og:description" content="">` or
//! `<meta property="og:image" content="">` tags in them are given a value before the response is
//! passed on. The configuration might look like this:
//!
//! ```yaml
//! default_description: "A blog about woodworking"
//! default_image_path: /images/default.png
//! insert_topic: true
//! response_match:
//!   status: [200]
//!   headers:
//!     Content-Type: ["text/html*"]
//! ```
//!
//! ## Settings
//!
//! * `default_description` is the text put into `og:description`. Variables like `${host}` or
//!   `${http_accept_language}` are replaced by request properties. Values taken from the request
//!   are HTML-escaped, the configured text itself is inserted as written.
//! * `default_image_path` is the image put into `og:image` if the page contains no image of its
//!   own. This is either a path starting with `/`, resolved into an `https://` URL for the host of
//!   the request, or an `https://` URL. It has to point to a `.jpg`, `.png`, `.gif` or `.webp`
//!   file.
//! * `insert_topic` appends ` - Topic` to the description, with the topic extracted from the
//!   request path by `topic_regex`. By default, this is the second path segment: `/en/hand-tools/`
//!   results in `Hand-Tools`.
//! * `image_regex` locates the page image, the first capture group being the image URL. By
//!   default, the first `<img>` tag pointing to a supported image type is used.
//! * `response_match` restricts the responses being processed by status code and header values.
//!   Other responses are passed on unchanged without being held back.
//!
//! Compressed responses aren’t supported, these have to be decompressed before being processed.
//!
//! ## Code example
//!
//! The handler wraps an [`Upstream`](module_utils::pingora::Upstream) producing the actual
//! responses:
//!
//! ```rust
//! use meta_tags_module::{MetaTagsConf, MetaTagsHandler, MetaTagsService};
//! use module_utils::pingora::{RequestHeader, Upstream};
//! use module_utils::test_utils::{TestSink, TestUpstream};
//! use module_utils::FromYaml;
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let conf = MetaTagsConf::from_yaml(r#"
//!     default_description: Foo
//!     default_image_path: /Bar.jpg
//! "#).unwrap();
//! let handler = MetaTagsHandler::try_from(conf).unwrap();
//!
//! let upstream = TestUpstream::new(200)
//!     .with_body(r#"<meta property="og:description" content="">"#);
//! let service = MetaTagsService::new(handler, upstream);
//!
//! let request = RequestHeader::build("GET", b"/", None).unwrap();
//! let mut sink = TestSink::new();
//! service.handle(&request, &mut sink).await.unwrap();
//! assert_eq!(sink.body_str(), r#"<meta property="og:description" content="Foo">"#);
//! # }
//! ```

mod capture;
pub mod configuration;
mod handler;
pub mod interpolation;
pub mod locator;
pub mod matcher;
pub mod pool;
pub mod replace;

#[cfg(test)]
mod tests;

pub use configuration::{MetaTagsConf, MetaTagsOpt};
pub use handler::{MetaTagsHandler, MetaTagsService};

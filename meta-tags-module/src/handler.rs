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

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use log::{debug, trace, Level, Log, Metadata, Record};
use module_utils::pingora::{
    Error, ErrorType, RequestExt, RequestHeader, ResponseSink, Upstream,
};
use std::borrow::Cow;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::capture::{CaptureSink, CaptureState};
use crate::configuration::MetaTagsConf;
use crate::interpolation::VariableInterpolation;
use crate::locator::{ImageLocator, TopicLocator, DEFAULT_IMAGE_REGEX, DEFAULT_TOPIC_REGEX};
use crate::matcher::ResponseMatcher;
use crate::pool::BufferPool;
use crate::replace::{ReplaceChain, Replacer};

const EMPTY_DESCRIPTION_TAG: &str = r#"<meta property="og:description" content="">"#;
const EMPTY_IMAGE_TAG: &str = r#"<meta property="og:image" content="">"#;

/// Forwards to whatever logger is installed for the process
#[derive(Debug)]
struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

#[derive(Clone)]
struct Logger(Arc<dyn Log>);

impl Logger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(module_path!())
            .module_path_static(Some(module_path!()))
            .file_static(Some(file!()))
            .build();
        if self.0.enabled(record.metadata()) {
            self.0.log(&record);
        }
    }
}

impl Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Logger")
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self(Arc::new(GlobalLogger))
    }
}

fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<', '>']) {
        return value.into();
    }

    let mut result = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            c => result.push(c),
        }
    }
    result.into()
}

/// Handler filling in empty `og:description` and `og:image` meta tags of responses
#[derive(Debug)]
pub struct MetaTagsHandler {
    default_description: VariableInterpolation,
    default_image: VariableInterpolation,
    insert_topic: bool,
    topic_locator: TopicLocator,
    image_locator: ImageLocator,
    response_match: Option<ResponseMatcher>,
    pool: BufferPool,
    logger: Logger,
}

impl MetaTagsHandler {
    /// Makes the handler send its diagnostic records to `logger` instead of the process-wide
    /// logger.
    pub fn with_logger(mut self, logger: Arc<dyn Log>) -> Self {
        self.logger = Logger(logger);
        self
    }

    /// The pool body buffers are taken from
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn description(&self, request: &RequestHeader) -> String {
        let mut description = self
            .default_description
            .interpolate(request, escape_attribute);
        if self.insert_topic {
            if let Some(topic) = self.topic_locator.find(request.path()) {
                description.push_str(" - ");
                description.push_str(&escape_attribute(&topic));
            }
        }
        description
    }

    fn image(&self, request: &RequestHeader, body: &[u8]) -> String {
        // Already HTML-encoded as it comes from the page
        if let Some(image) = self.image_locator.find(body) {
            return image.to_owned();
        }

        let image = self.default_image.interpolate(request, escape_attribute);
        if image.starts_with('/') {
            if let Some(host) = request.host() {
                return format!("https://{}{image}", escape_attribute(&host));
            }
        }
        image
    }

    /// Produces the response to `request` by calling `upstream`, filling in empty meta tags if
    /// the response is eligible.
    ///
    /// Upstream errors are returned unchanged. No rewriting happens then, and nothing held back
    /// is written to `sink`.
    pub async fn handle<U>(
        &self,
        request: &RequestHeader,
        sink: &mut dyn ResponseSink,
        upstream: &U,
    ) -> Result<(), Box<Error>>
    where
        U: Upstream + ?Sized,
    {
        let mut capture = CaptureSink::new(sink, self.response_match.as_ref(), self.pool.acquire());
        upstream.handle(request, &mut capture).await?;

        match capture.state() {
            CaptureState::Undecided => {
                trace!("Upstream produced no response, nothing to do");
                return Ok(());
            }
            CaptureState::Passthrough => {
                let status = capture
                    .response_written()
                    .map(|header| header.status.as_u16())
                    .unwrap_or_default();
                self.logger.log(
                    Level::Debug,
                    format_args!(
                        "not buffering body; skipping replacement (status {status}, path {})",
                        request.path()
                    ),
                );
                return Ok(());
            }
            CaptureState::Buffering => {}
        }

        let Some((mut header, body, sink)) = capture.into_buffered() else {
            return Ok(());
        };

        if body.is_empty() {
            trace!("Buffered response has no body, passing on header unchanged");
            drop(body);
            return sink.write_response_header(header).await;
        }

        let description = self.description(request);
        let image = self.image(request, &body);
        self.logger.log(
            Level::Debug,
            format_args!(
                "buffered body replacement (og:description {description:?}, og:image {image:?})"
            ),
        );

        let chain = ReplaceChain::new()
            .with(Replacer::new(
                EMPTY_DESCRIPTION_TAG,
                format!(r#"<meta property="og:description" content="{description}">"#),
            ))
            .with(Replacer::new(
                EMPTY_IMAGE_TAG,
                format!(r#"<meta property="og:image" content="{image}">"#),
            ));
        let result = chain.apply(&body)?;
        drop(body);

        if header.headers.contains_key(CONTENT_LENGTH) {
            header.insert_header(CONTENT_LENGTH, result.len().to_string())?;
        }

        sink.write_response_header(header).await?;
        if !result.is_empty() {
            sink.write_response_body(Bytes::from(result)).await?;
        }
        Ok(())
    }
}

impl TryFrom<MetaTagsConf> for MetaTagsHandler {
    type Error = Box<Error>;

    fn try_from(conf: MetaTagsConf) -> Result<Self, Self::Error> {
        debug!("Meta tags configuration received: {conf:#?}");

        conf.validate()?;

        let topic_locator = match conf.topic_regex {
            Some(locator) => locator,
            None => TopicLocator::try_from(DEFAULT_TOPIC_REGEX)
                .map_err(|err| Error::explain(ErrorType::InternalError, err))?,
        };
        let image_locator = match conf.image_regex {
            Some(locator) => locator,
            None => ImageLocator::try_from(DEFAULT_IMAGE_REGEX)
                .map_err(|err| Error::explain(ErrorType::InternalError, err))?,
        };

        Ok(Self {
            default_description: conf.default_description.into(),
            default_image: conf.default_image_path.into(),
            insert_topic: conf.insert_topic,
            topic_locator,
            image_locator,
            response_match: conf.response_match,
            pool: BufferPool::default(),
            logger: Logger::default(),
        })
    }
}

/// An [`Upstream`] implementation running another upstream through a [`MetaTagsHandler`]
#[derive(Debug)]
pub struct MetaTagsService<U> {
    handler: MetaTagsHandler,
    upstream: U,
}

impl<U> MetaTagsService<U> {
    /// Combines a handler with the upstream producing the responses.
    pub fn new(handler: MetaTagsHandler, upstream: U) -> Self {
        Self { handler, upstream }
    }
}

#[async_trait]
impl<U: Upstream> Upstream for MetaTagsService<U> {
    async fn handle(
        &self,
        request: &RequestHeader,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        self.handler.handle(request, sink, &self.upstream).await
    }
}

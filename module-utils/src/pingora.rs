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

//! Exposes some types from `pingora-http` and `pingora-error` crates, so that typical modules no
//! longer need them as direct dependencies. Also defines the traits a module uses to talk to the
//! server it runs in.

use async_trait::async_trait;
use bytes::Bytes;
use http::header;
pub use pingora_error::{Error, ErrorType};
pub use pingora_http::{RequestHeader, ResponseHeader};
use std::borrow::Cow;

/// The destination of a response, typically the connection to the client
///
/// A response consists of a single header write followed by any number of body writes.
#[async_trait]
pub trait ResponseSink: Send {
    /// Sends the response header.
    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>>;

    /// Sends a chunk of the response body.
    async fn write_response_body(&mut self, data: Bytes) -> Result<(), Box<Error>>;

    /// Returns the response header sent so far if any.
    fn response_written(&self) -> Option<&ResponseHeader>;
}

/// The upstream processing producing a response for a request
///
/// Response processing modules wrap the real [`ResponseSink`] before passing it on to upstream,
/// this allows them to inspect or modify the response.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Produces the response for `request`, writing it into `sink`.
    async fn handle(
        &self,
        request: &RequestHeader,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>>;
}

/// Convenience accessors for the request header
pub trait RequestExt {
    /// Attempts to determine the request host if one was specified.
    fn host(&self) -> Option<Cow<'_, str>>;

    /// Returns the path of the request URI without scheme, host or query.
    fn path(&self) -> &str;
}

impl RequestExt for RequestHeader {
    fn host(&self) -> Option<Cow<'_, str>> {
        fn host_from_header(request: &RequestHeader) -> Option<Cow<'_, str>> {
            let host = request.headers.get(header::HOST)?;
            host.to_str().ok().map(|h| h.into())
        }

        fn host_from_uri(request: &RequestHeader) -> Option<Cow<'_, str>> {
            let uri = &request.uri;
            let host = uri.host()?;
            if let Some(port) = uri.port() {
                let mut host = host.to_owned();
                host.push(':');
                host.push_str(port.as_str());
                Some(host.into())
            } else {
                Some(host.into())
            }
        }

        host_from_header(self).or_else(|| host_from_uri(self))
    }

    fn path(&self) -> &str {
        self.uri.path()
    }
}

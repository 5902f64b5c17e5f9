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

//! Stand-ins for the server side of a module, meant for tests

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, CONTENT_LENGTH};
use std::borrow::Cow;

use crate::pingora::{Error, ErrorType, RequestHeader, ResponseHeader, ResponseSink, Upstream};

/// A response sink recording everything written into it
#[derive(Debug, Default)]
pub struct TestSink {
    header: Option<ResponseHeader>,
    header_writes: usize,
    body: BytesMut,
    body_writes: usize,
    fail_writes: bool,
}

impl TestSink {
    /// Creates a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that rejects all writes with a `WriteError`.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Number of times the response header has been written
    pub fn header_writes(&self) -> usize {
        self.header_writes
    }

    /// Number of body chunks written
    pub fn body_writes(&self) -> usize {
        self.body_writes
    }

    /// Retrieves the response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the response body as string
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Retrieves the status code of the response
    pub fn response_status(&self) -> Option<u16> {
        self.header.as_ref().map(|header| header.status.as_u16())
    }

    /// Retrieves the value of a response header as string
    pub fn header_str(&self, name: impl AsRef<str>) -> Option<&str> {
        self.header
            .as_ref()?
            .headers
            .get(name.as_ref())
            .and_then(|value| value.to_str().ok())
    }

    fn check_failure(&self) -> Result<(), Box<Error>> {
        if self.fail_writes {
            Err(Error::explain(
                ErrorType::WriteError,
                "test sink rejects writes",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResponseSink for TestSink {
    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        self.check_failure()?;
        self.header = Some(*resp);
        self.header_writes += 1;
        Ok(())
    }

    async fn write_response_body(&mut self, data: Bytes) -> Result<(), Box<Error>> {
        self.check_failure()?;
        self.body.extend_from_slice(&data);
        self.body_writes += 1;
        Ok(())
    }

    fn response_written(&self) -> Option<&ResponseHeader> {
        self.header.as_ref()
    }
}

/// An upstream producing a fixed response
///
/// The body is written in chunks of configurable size, and upstream can be made to fail after
/// writing its response.
#[derive(Debug, Clone)]
pub struct TestUpstream {
    status: u16,
    headers: Vec<(HeaderName, String)>,
    body: Vec<u8>,
    chunk_size: usize,
    write_header: bool,
    failure: Option<ErrorType>,
}

impl TestUpstream {
    /// Creates an upstream producing an empty response with the given status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            chunk_size: 0,
            write_header: true,
            failure: None,
        }
    }

    /// Creates an upstream that writes nothing but fails with the given error type.
    pub fn failing(etype: ErrorType) -> Self {
        Self::new(200).without_header().with_failure(etype)
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Sets the response body, adding a `Content-Length` header for it.
    pub fn with_body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body = body.as_ref().to_vec();
        let len = self.body.len().to_string();
        self.with_header(CONTENT_LENGTH, len)
    }

    /// Sets the response body without declaring its length.
    pub fn with_unsized_body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body = body.as_ref().to_vec();
        self
    }

    /// Makes upstream write the body in chunks of the given size.
    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Makes upstream skip the header and write the body only.
    pub fn without_header(mut self) -> Self {
        self.write_header = false;
        self
    }

    /// Makes upstream fail with the given error type after writing its response.
    pub fn with_failure(mut self, etype: ErrorType) -> Self {
        self.failure = Some(etype);
        self
    }
}

#[async_trait]
impl Upstream for TestUpstream {
    async fn handle(
        &self,
        _request: &RequestHeader,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        if self.write_header {
            let mut header = ResponseHeader::build(self.status, Some(self.headers.len()))?;
            for (name, value) in &self.headers {
                header.append_header(name.clone(), value.as_str())?;
            }
            sink.write_response_header(Box::new(header)).await?;
        }

        if !self.body.is_empty() {
            let chunk_size = if self.chunk_size > 0 {
                self.chunk_size
            } else {
                self.body.len()
            };
            for chunk in self.body.chunks(chunk_size) {
                sink.write_response_body(Bytes::copy_from_slice(chunk))
                    .await?;
            }
        }

        if let Some(etype) = &self.failure {
            return Err(Error::new(etype.clone()));
        }

        Ok(())
    }
}

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
use log::trace;
use module_utils::pingora::{Error, ResponseHeader, ResponseSink};

use crate::matcher::ResponseMatcher;
use crate::pool::PooledBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureState {
    /// Nothing written yet
    Undecided,
    /// Response is held back for rewriting
    Buffering,
    /// Response is forwarded unchanged
    Passthrough,
}

/// Stands in for the real response sink while upstream produces its response. The first header
/// write decides whether the response is buffered or passed through.
pub(crate) struct CaptureSink<'a> {
    inner: &'a mut dyn ResponseSink,
    matcher: Option<&'a ResponseMatcher>,
    state: CaptureState,
    header: Option<Box<ResponseHeader>>,
    buffer: PooledBuffer<'a>,
}

impl<'a> CaptureSink<'a> {
    pub(crate) fn new(
        inner: &'a mut dyn ResponseSink,
        matcher: Option<&'a ResponseMatcher>,
        buffer: PooledBuffer<'a>,
    ) -> Self {
        Self {
            inner,
            matcher,
            state: CaptureState::Undecided,
            header: None,
            buffer,
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        self.state
    }

    /// Returns the held response header, the buffered body and the real sink if the response
    /// has been buffered.
    pub(crate) fn into_buffered(
        self,
    ) -> Option<(Box<ResponseHeader>, PooledBuffer<'a>, &'a mut dyn ResponseSink)> {
        if self.state != CaptureState::Buffering {
            return None;
        }
        Some((self.header?, self.buffer, self.inner))
    }

    async fn decide(&mut self, header: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        let buffer = self
            .matcher
            .map_or(true, |matcher| matcher.matches(header.status, &header.headers));
        if buffer {
            trace!("Buffering response with status {}", header.status);
            self.state = CaptureState::Buffering;
            self.header = Some(header);
            Ok(())
        } else {
            trace!("Passing through response with status {}", header.status);
            self.state = CaptureState::Passthrough;
            self.inner.write_response_header(header).await
        }
    }
}

#[async_trait]
impl ResponseSink for CaptureSink<'_> {
    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        match self.state {
            CaptureState::Undecided => self.decide(resp).await,
            CaptureState::Buffering => {
                self.header = Some(resp);
                Ok(())
            }
            CaptureState::Passthrough => self.inner.write_response_header(resp).await,
        }
    }

    async fn write_response_body(&mut self, data: Bytes) -> Result<(), Box<Error>> {
        if self.state == CaptureState::Undecided {
            // Body without header, this is an implicit 200 OK
            self.decide(Box::new(ResponseHeader::build(200, None)?))
                .await?;
        }

        match self.state {
            CaptureState::Passthrough => self.inner.write_response_body(data).await,
            _ => {
                self.buffer.extend_from_slice(&data);
                Ok(())
            }
        }
    }

    fn response_written(&self) -> Option<&ResponseHeader> {
        match self.state {
            CaptureState::Undecided => None,
            CaptureState::Buffering => self.header.as_deref(),
            CaptureState::Passthrough => self.inner.response_written(),
        }
    }
}

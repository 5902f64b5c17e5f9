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

//! Literal search and replace on byte streams
//!
//! A [`Replacer`] replaces all non-overlapping occurrences of a search string, scanning left to
//! right. Replacers are combined into a [`ReplaceChain`] where each replacer processes the output
//! of the previous one. A chain can be applied to a complete buffer or used as a [`Write`]
//! adapter via [`ReplaceChain::writer`], the result is the same regardless of how the input is
//! split into writes.

use memchr::memmem::Finder;
use module_utils::pingora::{Error, ErrorType};
use std::io::{self, Write};

/// Replaces all occurrences of a literal search string
#[derive(Debug, Clone)]
pub struct Replacer {
    finder: Finder<'static>,
    replacement: Vec<u8>,
}

impl Replacer {
    /// Creates a replacer substituting `search` by `replacement`. An empty `search` string
    /// makes this replacer leave its input unchanged.
    pub fn new(search: impl AsRef<[u8]>, replacement: impl AsRef<[u8]>) -> Self {
        Self {
            finder: Finder::new(search.as_ref()).into_owned(),
            replacement: replacement.as_ref().to_vec(),
        }
    }

    /// Processes `input`, appending the result to `output`. Data that might be the start of a
    /// match continuing in the next chunk is held back in `pending`.
    fn feed(&self, pending: &mut Vec<u8>, input: &[u8], output: &mut Vec<u8>) {
        let needle = self.finder.needle();
        if needle.is_empty() {
            output.extend_from_slice(input);
            return;
        }

        pending.extend_from_slice(input);

        let mut pos = 0;
        for start in self.finder.find_iter(pending.as_slice()) {
            output.extend_from_slice(&pending[pos..start]);
            output.extend_from_slice(&self.replacement);
            pos = start + needle.len();
        }

        let hold = self.partial_match_len(&pending[pos..]);
        let end = pending.len() - hold;
        output.extend_from_slice(&pending[pos..end]);
        pending.drain(..end);
    }

    /// Length of the longest suffix of `data` that is a proper prefix of the search string
    fn partial_match_len(&self, data: &[u8]) -> usize {
        let needle = self.finder.needle();
        let max = (needle.len() - 1).min(data.len());
        (1..=max)
            .rev()
            .find(|&len| data.ends_with(&needle[..len]))
            .unwrap_or(0)
    }
}

/// An ordered list of replacers
#[derive(Debug, Clone, Default)]
pub struct ReplaceChain {
    replacers: Vec<Replacer>,
}

impl ReplaceChain {
    /// Creates an empty chain, this one passes input through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a replacer to the chain.
    pub fn with(mut self, replacer: Replacer) -> Self {
        self.replacers.push(replacer);
        self
    }

    /// Applies all replacers to a complete buffer.
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>, Box<Error>> {
        let mut writer = self.writer(Vec::with_capacity(input.len()));
        writer
            .write_all(input)
            .and_then(|_| writer.finish())
            .map_err(|err| {
                Error::because(
                    ErrorType::InternalError,
                    "failed applying replacements",
                    err,
                )
            })
    }

    /// Creates a writer applying all replacers to the data written before passing it on to
    /// `inner`. [`ReplaceWriter::finish`] has to be called once all data is written.
    pub fn writer<W: Write>(&self, inner: W) -> ReplaceWriter<'_, W> {
        ReplaceWriter {
            chain: self,
            pending: vec![Vec::new(); self.replacers.len()],
            inner: Some(inner),
        }
    }
}

/// Streaming counterpart of [`ReplaceChain::apply`]
#[derive(Debug)]
pub struct ReplaceWriter<'a, W> {
    chain: &'a ReplaceChain,
    pending: Vec<Vec<u8>>,
    inner: Option<W>,
}

impl<W: Write> ReplaceWriter<'_, W> {
    fn inner(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already finished"))
    }

    /// Flushes data held back by the replacers and returns the inner writer.
    ///
    /// Calling this method again after it succeeded results in an error.
    pub fn finish(&mut self) -> io::Result<W> {
        self.inner()?;

        let mut data = Vec::new();
        for (replacer, pending) in self.chain.replacers.iter().zip(self.pending.iter_mut()) {
            let mut output = Vec::with_capacity(data.len() + pending.len());
            replacer.feed(pending, &data, &mut output);
            // No more input to complete a match
            output.append(pending);
            data = output;
        }

        let inner = self.inner()?;
        inner.write_all(&data)?;
        inner.flush()?;

        self.inner
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already finished"))
    }
}

impl<W: Write> Write for ReplaceWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?;

        let mut data = buf.to_vec();
        for (replacer, pending) in self.chain.replacers.iter().zip(self.pending.iter_mut()) {
            let mut output = Vec::with_capacity(data.len());
            replacer.feed(pending, &data, &mut output);
            data = output;
        }

        if !data.is_empty() {
            self.inner()?.write_all(&data)?;
        }
        Ok(buf.len())
    }

    /// Flushes the inner writer. Data held back because it might be part of a match is only
    /// written by [`ReplaceWriter::finish`].
    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

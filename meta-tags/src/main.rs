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

//! Runs a page stored on disk through the meta tags module and prints the resulting response.
//!
//! ```sh
//! meta-tags --conf meta-tags.yaml --url https://example.com/en/woodworking/ --input page.html
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use http::{header, Uri};
use log::{error, info};
use meta_tags_module::{MetaTagsConf, MetaTagsHandler, MetaTagsOpt};
use module_utils::pingora::{
    Error, ErrorType, RequestHeader, ResponseHeader, ResponseSink, Upstream,
};
use module_utils::FromYaml;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Fill in empty og:description and og:image meta tags of an HTML page
#[derive(Debug, Parser)]
struct Opt {
    /// Configuration file to load. This command line flag can be specified multiple times, later
    /// files override settings of earlier ones.
    #[clap(short, long)]
    conf: Vec<PathBuf>,

    /// Validate the configuration and exit.
    #[clap(long)]
    check: bool,

    /// The URL the page is supposedly requested from.
    #[clap(long, default_value = "http://localhost/")]
    url: Uri,

    /// File containing the page. Standard input is read if omitted.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Response status code of the page.
    #[clap(long, default_value_t = 200)]
    status: u16,

    /// Content type of the page.
    #[clap(long, default_value = "text/html; charset=utf-8")]
    content_type: String,

    #[clap(flatten)]
    meta_tags: MetaTagsOpt,
}

/// Produces the page as response
#[derive(Debug)]
struct PageUpstream {
    status: u16,
    content_type: String,
    body: Bytes,
}

#[async_trait]
impl Upstream for PageUpstream {
    async fn handle(
        &self,
        _request: &RequestHeader,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        let mut header = ResponseHeader::build(self.status, Some(2))?;
        header.insert_header(header::CONTENT_TYPE, self.content_type.as_str())?;
        header.insert_header(header::CONTENT_LENGTH, self.body.len().to_string())?;
        sink.write_response_header(Box::new(header)).await?;
        sink.write_response_body(self.body.clone()).await
    }
}

/// Prints the response in HTTP/1.1 format
#[derive(Debug)]
struct OutputSink<W> {
    output: W,
    header: Option<Box<ResponseHeader>>,
}

impl<W: Write> OutputSink<W> {
    fn new(output: W) -> Self {
        Self {
            output,
            header: None,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Box<Error>> {
        self.output
            .write_all(data)
            .and_then(|_| self.output.flush())
            .map_err(|err| Error::because(ErrorType::WriteError, "failed writing output", err))
    }
}

#[async_trait]
impl<W: Write + Send> ResponseSink for OutputSink<W> {
    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        let mut head = format!("HTTP/1.1 {}\r\n", resp.status).into_bytes();
        for (name, value) in resp.headers.iter() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        self.write(&head)?;

        self.header = Some(resp);
        Ok(())
    }

    async fn write_response_body(&mut self, data: Bytes) -> Result<(), Box<Error>> {
        self.write(&data)
    }

    fn response_written(&self) -> Option<&ResponseHeader> {
        self.header.as_deref()
    }
}

fn read_input(input: Option<&PathBuf>) -> Result<Bytes, Box<Error>> {
    if let Some(path) = input {
        std::fs::read(path).map(Bytes::from).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading {path:?}"),
                err,
            )
        })
    } else {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .map_err(|err| {
                Error::because(ErrorType::ReadError, "failed reading standard input", err)
            })?;
        Ok(body.into())
    }
}

fn build_request(url: Uri) -> Result<RequestHeader, Box<Error>> {
    let path = url
        .path_and_query()
        .map_or("/", |path| path.as_str())
        .to_owned();
    let mut request = RequestHeader::build("GET", path.as_bytes(), None)?;
    request.set_uri(url);
    Ok(request)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    let Opt {
        conf,
        check,
        url,
        input,
        status,
        content_type,
        meta_tags,
    } = Opt::parse();

    let mut conf = match MetaTagsConf::load_from_files(&conf) {
        Ok(conf) => conf,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    conf.merge_with_opt(meta_tags);

    let handler = match MetaTagsHandler::try_from(conf) {
        Ok(handler) => handler,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if check {
        info!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    let result = async {
        let upstream = PageUpstream {
            status,
            content_type,
            body: read_input(input.as_ref())?,
        };
        let request = build_request(url)?;
        let mut sink = OutputSink::new(std::io::stdout());
        handler.handle(&request, &mut sink, &upstream).await
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

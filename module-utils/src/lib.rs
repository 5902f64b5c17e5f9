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

//! # Module helpers
//!
//! This crate contains some helpers that are useful when writing response processing modules
//! such as `meta-tags-module`: the traits describing the host a module runs in, configuration
//! loading and test doubles for the host.

pub mod pingora;
pub mod test_utils;

use log::trace;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::fmt::Debug;
use std::path::Path;

use crate::pingora::{Error, ErrorType};

/// Trait for configuration structures that can be loaded from YAML files. This trait has a blanket
/// implementation for any structure implementing [`serde::Deserialize`].
pub trait FromYaml {
    /// Loads configuration from a YAML string.
    fn from_yaml<S>(yaml_conf: S) -> Result<Self, Box<Error>>
    where
        S: AsRef<str>,
        Self: Sized;

    /// Loads configuration from a YAML file.
    fn load_from_yaml<P>(path: P) -> Result<Self, Box<Error>>
    where
        P: AsRef<Path>,
        Self: Sized;

    /// Loads configuration from multiple YAML files. Top-level settings of files listed later
    /// override the same settings of files listed earlier. An empty list produces the
    /// configuration of an empty YAML map.
    fn load_from_files<I, P>(files: I) -> Result<Self, Box<Error>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        Self: Sized;
}

fn read_yaml(path: &Path) -> Result<Value, Box<Error>> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        Error::because(
            ErrorType::FileOpenError,
            format!("failed opening configuration file {path:?}"),
            err,
        )
    })?;
    if contents.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_yaml::from_str(&contents).map_err(|err| {
        Error::because(
            ErrorType::FileReadError,
            format!("failed reading configuration file {path:?}"),
            err,
        )
    })
}

impl<D> FromYaml for D
where
    D: DeserializeOwned + Debug + ?Sized,
{
    fn from_yaml<S: AsRef<str>>(yaml_conf: S) -> Result<Self, Box<Error>> {
        let conf = serde_yaml::from_str(yaml_conf.as_ref()).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                "failed parsing configuration",
                err,
            )
        })?;
        trace!("Loaded configuration: {conf:#?}");

        Ok(conf)
    }

    fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<Error>> {
        let value = read_yaml(path.as_ref())?;
        let conf = serde_yaml::from_value(value).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading configuration file {:?}", path.as_ref()),
                err,
            )
        })?;
        trace!("Loaded configuration file: {conf:#?}");

        Ok(conf)
    }

    fn load_from_files<I, P>(files: I) -> Result<Self, Box<Error>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut merged = Mapping::new();
        for path in files {
            let path = path.as_ref();
            match read_yaml(path)? {
                Value::Mapping(map) => {
                    for (key, value) in map {
                        merged.insert(key, value);
                    }
                }
                // An empty file
                Value::Null => {}
                _ => {
                    return Err(Error::explain(
                        ErrorType::FileReadError,
                        format!("configuration file {path:?} does not contain a map"),
                    ))
                }
            }
        }

        let conf = serde_yaml::from_value(Value::Mapping(merged)).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                "failed processing configuration files",
                err,
            )
        })?;
        trace!("Merged configuration files into: {conf:#?}");

        Ok(conf)
    }
}

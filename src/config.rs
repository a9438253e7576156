// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Runtime configuration.
//!
//! The environment is consulted only in `Default::default()`; explicit
//! constructors keep the scheduler testable without process-global state.

use std::env;
use std::path::PathBuf;

use crate::fuse::FuseModel;

/// Environment variable selecting the fusion model (case-insensitive).
pub const FUSE_MODEL_ENV: &str = "FUSE_MODEL";

/// Process-wide configuration handed to the scheduler at construction.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// The active fusion model
    pub fuse_model: FuseModel,
    /// Directory generated kernel sources are written to
    pub cache_dir: PathBuf,
    /// Chunk size of the single-rank parallel loop mode
    pub chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            fuse_model: fuse_model_from_env(),
            cache_dir: env::temp_dir().join("ndfuse-kernels"),
            chunk_size: 2048,
        }
    }
}

impl RuntimeConfig {
    /// A configuration with the given model and defaults otherwise; does not
    /// read the environment.
    pub fn with_model(fuse_model: FuseModel) -> RuntimeConfig {
        RuntimeConfig {
            fuse_model,
            cache_dir: env::temp_dir().join("ndfuse-kernels"),
            chunk_size: 2048,
        }
    }
}

fn fuse_model_from_env() -> FuseModel {
    match env::var(FUSE_MODEL_ENV) {
        Err(_) => FuseModel::default(),
        Ok(value) => match value.parse() {
            Ok(model) => model,
            Err(()) => {
                log::warn!(
                    "unknown fuse model {:?}, using the default model '{}' instead",
                    value,
                    FuseModel::default().name()
                );
                FuseModel::default()
            }
        },
    }
}

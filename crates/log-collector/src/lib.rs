// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector side of the log relay pipeline: an HTTP ingestion server
//! that validates forwarded records, persists them to an append-only
//! file through a single writer task, and serves a health endpoint.

pub mod config;
pub mod http_utils;
pub mod server;
pub mod sink;
pub mod validate;

pub use config::ServerConfig;
pub use server::Collector;

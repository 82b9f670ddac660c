// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer side of the log relay pipeline: captures application log
//! calls, batches them under size/time pressure and delivers them to
//! the collector over HTTP with bounded retries.

pub mod config;
pub mod delivery;
pub mod interceptor;
pub mod record;
pub mod scheduler;

pub use config::{ConfigUpdate, ForwarderConfig, Profile};
pub use delivery::{BatchTransport, HttpTransport};
pub use interceptor::{
    CaptureValue, ConsoleSink, LogInterceptor, NoSource, SourceAttribution, StaticSource,
    StdConsole,
};
pub use record::{LogBatch, LogLevel, LogRecord};
pub use scheduler::BatchScheduler;

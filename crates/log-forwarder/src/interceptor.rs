// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigUpdate, ForwarderConfig};
use crate::record::{now_rfc3339, LogLevel, LogRecord};
use crate::scheduler::BatchScheduler;

/// The underlying console the interceptor wraps. Every captured call
/// is forwarded here first, so user-visible output is unchanged
/// whether or not forwarding is active.
pub trait ConsoleSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// Default sink: warn/error to stderr, everything else to stdout.
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Warn | LogLevel::Error => eprintln!("{message}"),
            _ => println!("{message}"),
        }
    }
}

/// Best-effort call-site attribution. Implementations must never
/// panic; `None` means the call site could not be determined and the
/// record falls back to "unknown".
pub trait SourceAttribution: Send + Sync {
    fn source(&self) -> Option<String>;
}

/// Caller-supplied static tag, the capability-appropriate stand-in for
/// stack inspection.
pub struct StaticSource(pub String);

impl SourceAttribution for StaticSource {
    fn source(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Attribution that never resolves; records carry "unknown".
pub struct NoSource;

impl SourceAttribution for NoSource {
    fn source(&self) -> Option<String> {
        None
    }
}

/// One argument of a captured log call.
pub enum CaptureValue {
    Text(String),
    /// A failure rendered as `"Name: message"`.
    Failure { name: String, message: String },
    /// Any other value, serialized best-effort.
    Data(Value),
}

impl CaptureValue {
    pub fn text(s: impl Into<String>) -> Self {
        CaptureValue::Text(s.into())
    }

    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let name = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error");
        CaptureValue::Failure {
            name: name.to_string(),
            message: err.to_string(),
        }
    }

    fn render(&self) -> String {
        match self {
            CaptureValue::Text(s) => s.clone(),
            CaptureValue::Failure { name, message } => format!("{name}: {message}"),
            // Serialization failure falls back to the display form;
            // capture never raises.
            CaptureValue::Data(v) => {
                serde_json::to_string(v).unwrap_or_else(|_| v.to_string())
            }
        }
    }

    fn as_value(&self) -> Value {
        match self {
            CaptureValue::Text(s) => Value::String(s.clone()),
            CaptureValue::Failure { .. } => Value::String(self.render()),
            CaptureValue::Data(v) => v.clone(),
        }
    }
}

/// Wraps the console channels for the whitelisted levels, converting
/// each captured call into a record handed to the batch scheduler.
///
/// Each instance owns its installed state and console reference; there
/// is no module-level interception state, and independent instances
/// can coexist. `session_id` is assigned once per instance lifetime
/// and is purely a correlation key.
pub struct LogInterceptor {
    config: Arc<RwLock<ForwarderConfig>>,
    scheduler: BatchScheduler,
    console: Arc<dyn ConsoleSink>,
    attribution: Arc<dyn SourceAttribution>,
    session_id: String,
    installed: AtomicBool,
    page_url: Option<String>,
    user_agent: Option<String>,
}

impl LogInterceptor {
    pub fn new(
        config: Arc<RwLock<ForwarderConfig>>,
        scheduler: BatchScheduler,
        console: Arc<dyn ConsoleSink>,
        attribution: Arc<dyn SourceAttribution>,
    ) -> Self {
        LogInterceptor {
            config,
            scheduler,
            console,
            attribution,
            session_id: Uuid::new_v4().to_string(),
            installed: AtomicBool::new(false),
            page_url: None,
            user_agent: None,
        }
    }

    /// Producer's current page/location, forwarded when the config
    /// enables it.
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Begins intercepting. Idempotent: a second install warns and
    /// changes nothing; a disabled config leaves the interceptor
    /// uninstalled.
    pub fn install(&self) {
        if self.is_installed() {
            warn!("Log interceptor is already installed");
            return;
        }
        let enabled = {
            #[allow(clippy::expect_used)]
            let config = self.config.read().expect("lock poisoned");
            config.enabled
        };
        if !enabled {
            info!("Log forwarding is disabled, interceptor not installed");
            return;
        }
        self.installed.store(true, Ordering::SeqCst);
    }

    /// Stops intercepting, cancels any pending flush timer and makes a
    /// final best-effort delivery of the buffered tail. Idempotent.
    pub async fn uninstall(&self) {
        if !self.installed.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown().await;
    }

    /// Shallow-merges into the live config; takes effect on subsequent
    /// captures only.
    pub fn update_config(&self, update: ConfigUpdate) {
        #[allow(clippy::expect_used)]
        let mut config = self.config.write().expect("lock poisoned");
        config.apply(update);
    }

    /// Capture path for one log call. The console sees the call
    /// unconditionally; a record is buffered only when the interceptor
    /// is installed and the level passes the config whitelist.
    pub fn capture(&self, level: LogLevel, args: &[CaptureValue]) {
        let message = args
            .iter()
            .map(CaptureValue::render)
            .collect::<Vec<_>>()
            .join(" ");
        self.console.write(level, &message);

        if !self.is_installed() {
            return;
        }

        let record = {
            #[allow(clippy::expect_used)]
            let config = self.config.read().expect("lock poisoned");
            if !config.accepts(level) {
                return;
            }
            LogRecord {
                level,
                message,
                timestamp: now_rfc3339(),
                source: self
                    .attribution
                    .source()
                    .or_else(|| Some("unknown".to_string())),
                url: if config.include_url {
                    self.page_url.clone()
                } else {
                    None
                },
                user_agent: if config.include_user_agent {
                    self.user_agent.clone()
                } else {
                    None
                },
                session_id: Some(self.session_id.clone()),
                args: if args.len() > 1 {
                    Some(args.iter().map(CaptureValue::as_value).collect())
                } else {
                    None
                },
            }
        };
        self.scheduler.enqueue(record);
    }

    pub fn log(&self, args: &[CaptureValue]) {
        self.capture(LogLevel::Log, args);
    }

    pub fn info(&self, args: &[CaptureValue]) {
        self.capture(LogLevel::Info, args);
    }

    pub fn warn(&self, args: &[CaptureValue]) {
        self.capture(LogLevel::Warn, args);
    }

    pub fn error(&self, args: &[CaptureValue]) {
        self.capture(LogLevel::Error, args);
    }

    pub fn debug(&self, args: &[CaptureValue]) {
        self.capture(LogLevel::Debug, args);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::Profile;
    use crate::delivery::BatchTransport;
    use crate::record::LogBatch;

    struct RecordingConsole {
        calls: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingConsole {
        fn new() -> Arc<Self> {
            Arc::new(RecordingConsole {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(LogLevel, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConsoleSink for RecordingConsole {
        fn write(&self, level: LogLevel, message: &str) {
            self.calls.lock().unwrap().push((level, message.to_string()));
        }
    }

    struct RecordingTransport {
        batches: Mutex<Vec<LogBatch>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(RecordingTransport {
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<LogBatch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchTransport for RecordingTransport {
        async fn send(&self, batch: LogBatch) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    struct Fixture {
        interceptor: LogInterceptor,
        console: Arc<RecordingConsole>,
        transport: Arc<RecordingTransport>,
    }

    fn fixture(mut config: ForwarderConfig) -> Fixture {
        // large thresholds so tests control flushing explicitly
        config.batch_size = 100;
        config.batch_timeout = Duration::from_secs(60);
        let config = Arc::new(RwLock::new(config));
        let console = RecordingConsole::new();
        let transport = RecordingTransport::new();
        let scheduler = BatchScheduler::new(Arc::clone(&config), transport.clone());
        let interceptor = LogInterceptor::new(
            config,
            scheduler,
            console.clone(),
            Arc::new(StaticSource("app.rs".to_string())),
        );
        Fixture {
            interceptor,
            console,
            transport,
        }
    }

    fn text(s: &str) -> Vec<CaptureValue> {
        vec![CaptureValue::text(s)]
    }

    #[tokio::test]
    async fn test_console_output_is_unchanged_by_forwarding() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        for level in LogLevel::ALL {
            f.interceptor.capture(level, &text("hello"));
        }

        let calls = f.console.calls();
        assert_eq!(calls.len(), 5);
        for (i, level) in LogLevel::ALL.into_iter().enumerate() {
            assert_eq!(calls[i], (level, "hello".to_string()));
        }
    }

    #[tokio::test]
    async fn test_console_still_sees_calls_when_not_installed() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));

        f.interceptor.info(&text("before install"));

        assert_eq!(f.console.calls().len(), 1);
        f.interceptor.uninstall().await;
        assert!(f.transport.batches().is_empty());
    }

    #[tokio::test]
    async fn test_whitelist_filters_before_buffering() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Production));
        f.interceptor.install();

        f.interceptor.debug(&text("dropped"));
        f.interceptor.info(&text("dropped"));
        f.interceptor.warn(&text("kept"));
        f.interceptor.error(&text("kept"));
        f.interceptor.uninstall().await;

        // console saw all four, the buffer only warn+error
        assert_eq!(f.console.calls().len(), 4);
        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages.len(), 2);
        assert_eq!(batches[0].messages[0].level, LogLevel::Warn);
        assert_eq!(batches[0].messages[1].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_install_is_a_no_op_when_disabled() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Test));
        f.interceptor.install();
        assert!(!f.interceptor.is_installed());

        f.interceptor.error(&text("not forwarded"));
        f.interceptor.uninstall().await;
        assert!(f.transport.batches().is_empty());
        // the console is still served
        assert_eq!(f.console.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_install_and_uninstall_are_idempotent() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();
        f.interceptor.install();
        assert!(f.interceptor.is_installed());

        f.interceptor.uninstall().await;
        f.interceptor.uninstall().await;
        assert!(!f.interceptor.is_installed());
    }

    #[tokio::test]
    async fn test_uninstall_flushes_the_tail() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        f.interceptor.info(&text("one"));
        f.interceptor.info(&text("two"));
        assert!(f.transport.batches().is_empty());

        f.interceptor.uninstall().await;

        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_records_carry_session_and_attribution() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        f.interceptor.info(&text("attributed"));
        f.interceptor.uninstall().await;

        let batches = f.transport.batches();
        let record = &batches[0].messages[0];
        assert_eq!(record.source.as_deref(), Some("app.rs"));
        assert_eq!(record.session_id.as_deref(), Some(f.interceptor.session_id()));
    }

    #[tokio::test]
    async fn test_unattributed_source_falls_back_to_unknown() {
        let config = Arc::new(RwLock::new(ForwarderConfig::for_profile(
            Profile::Interactive,
        )));
        let transport = RecordingTransport::new();
        let scheduler = BatchScheduler::new(Arc::clone(&config), transport.clone());
        let interceptor = LogInterceptor::new(
            config,
            scheduler,
            RecordingConsole::new(),
            Arc::new(NoSource),
        );
        interceptor.install();

        interceptor.info(&text("anonymous"));
        interceptor.uninstall().await;

        let batches = transport.batches();
        assert_eq!(batches[0].messages[0].source.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_optional_fields_follow_include_flags() {
        let mut config = ForwarderConfig::for_profile(Profile::Interactive);
        config.include_url = false;
        config.include_user_agent = true;
        let f = fixture(config);
        let interceptor = f
            .interceptor
            .with_page_url("https://app.example/chat")
            .with_user_agent("agent/2.1");
        interceptor.install();

        interceptor.info(&text("flagged"));
        interceptor.uninstall().await;

        let batches = f.transport.batches();
        let record = &batches[0].messages[0];
        assert_eq!(record.url, None);
        assert_eq!(record.user_agent.as_deref(), Some("agent/2.1"));
    }

    #[tokio::test]
    async fn test_error_arguments_render_as_name_and_message() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        f.interceptor.error(&[
            CaptureValue::text("save failed"),
            CaptureValue::from_error(&err),
        ]);
        f.interceptor.uninstall().await;

        let batches = f.transport.batches();
        let record = &batches[0].messages[0];
        assert_eq!(record.message, "save failed Error: disk on fire");
        let args = record.args.as_ref().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], Value::String("save failed".to_string()));
    }

    #[tokio::test]
    async fn test_data_arguments_serialize_best_effort() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        f.interceptor.log(&[CaptureValue::Data(serde_json::json!({"k": 1}))]);
        f.interceptor.uninstall().await;

        assert_eq!(f.console.calls()[0].1, "{\"k\":1}");
        let batches = f.transport.batches();
        assert_eq!(batches[0].messages[0].message, "{\"k\":1}");
    }

    #[tokio::test]
    async fn test_update_config_affects_subsequent_captures() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        f.interceptor.info(&text("kept"));
        f.interceptor.update_config(ConfigUpdate {
            log_levels: Some([LogLevel::Error].into_iter().collect()),
            ..Default::default()
        });
        f.interceptor.info(&text("now filtered"));
        f.interceptor.uninstall().await;

        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].messages.len(), 1);
        assert_eq!(batches[0].messages[0].message, "kept");
    }

    #[tokio::test]
    async fn test_disabling_via_update_stops_buffering() {
        let f = fixture(ForwarderConfig::for_profile(Profile::Interactive));
        f.interceptor.install();

        f.interceptor.update_config(ConfigUpdate {
            enabled: Some(false),
            ..Default::default()
        });
        f.interceptor.warn(&text("suppressed from buffer"));
        f.interceptor.uninstall().await;

        assert!(f.transport.batches().is_empty());
        assert_eq!(f.console.calls().len(), 1);
    }
}

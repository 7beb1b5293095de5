// ABOUTME: Build orchestrator: fetches the folder list, resolves the project,
// dispatches the build request and relays the remote output until a terminal event

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, warn};

use crate::project;
use crate::protocol::{FolderConfig, MakeArgs, MakeOutMsg, FOLDERS_PATH, MAKE_PATH};
use crate::transport::{EventChannel, RequestChannel, SessionEvent};

/// One build invocation, assembled from the CLI surface.
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub project_id: String,
    pub relative_path: String,
    pub command_line: String,
    pub timeout_secs: u32,
    pub cwd: PathBuf,
}

/// Terminal result of a build: the process exit code plus the error text
/// to surface, if the server reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub code: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Prefix every relayed line with the server-side timestamp.
    pub with_timestamp: bool,
}

pub struct Orchestrator<R, E> {
    requests: R,
    events: E,
    options: OutputOptions,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl<R: RequestChannel, E: EventChannel> Orchestrator<R, E> {
    pub fn new(
        requests: R,
        events: E,
        options: OutputOptions,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            requests,
            events,
            options,
            stdout,
            stderr,
        }
    }

    /// Runs one build to completion. Fatal local errors come back as
    /// `Err` (exit 1); everything the server decides lands in the
    /// returned [`BuildOutcome`].
    pub async fn run(mut self, params: BuildParams) -> Result<BuildOutcome> {
        // Doubles as the liveness check on the server
        let raw = self
            .requests
            .get(FOLDERS_PATH)
            .await
            .context("fetching project list")?;
        debug!("result of {FOLDERS_PATH}: {}", String::from_utf8_lossy(&raw));

        // A malformed folder list is survivable: resolution soft-fails
        // and the server still validates the project ID on dispatch.
        let folders: Vec<FolderConfig> = match serde_json::from_slice(&raw) {
            Ok(folders) => folders,
            Err(e) => {
                warn!("unparseable folder list: {e}");
                Vec::new()
            }
        };

        if params.project_id.is_empty() {
            bail!(project::missing_id_message(&folders));
        }

        let folder = project::find_project(&folders, &params.project_id);

        let mut rpath = params.relative_path;
        if rpath.is_empty() {
            if let Some(folder) = folder {
                let cwd = params.cwd.to_string_lossy();
                if let Some(detected) = project::detect_relative_path(&cwd, &folder.relative_path)
                {
                    debug!("auto-setup rpath to: '{detected}'");
                    rpath = detected;
                }
            }
        }

        // Subscribe before dispatch: output or exit events racing the
        // request must not be lost.
        let mut events = self
            .events
            .subscribe()
            .await
            .context("connecting event channel")?;

        let args = MakeArgs {
            id: params.project_id,
            rpath,
            args: params.command_line,
            cmd_timeout: params.timeout_secs,
        };
        let body = serde_json::to_string(&args).context("serializing build request")?;
        self.requests
            .post_json(MAKE_PATH, body)
            .await
            .context("dispatching build request")?;

        // Wait for the terminal event; the first one wins.
        loop {
            match events.recv().await {
                Some(SessionEvent::Output(msg)) => self.relay_output(&msg)?,
                Some(SessionEvent::Error(e)) => error!("event channel error: {e}"),
                Some(SessionEvent::Exit(msg)) => {
                    if msg.code == 0 && msg.error.is_none() {
                        debug!("build exited successfully");
                    }
                    return Ok(BuildOutcome {
                        code: msg.code,
                        error: msg.error.filter(|e| !e.is_empty()),
                    });
                }
                Some(SessionEvent::Disconnected(reason)) => {
                    return Ok(BuildOutcome {
                        code: 2,
                        error: reason,
                    })
                }
                None => {
                    return Ok(BuildOutcome {
                        code: 2,
                        error: Some("event channel closed".to_string()),
                    })
                }
            }
        }
    }

    fn relay_output(&mut self, msg: &MakeOutMsg) -> Result<()> {
        let prefix = if self.options.with_timestamp {
            format!("{}| ", msg.timestamp)
        } else {
            String::new()
        };
        if !msg.stdout.is_empty() {
            writeln!(self.stdout, "{prefix}{}", msg.stdout)?;
            self.stdout.flush()?;
        }
        if !msg.stderr.is_empty() {
            writeln!(self.stderr, "{prefix}{}", msg.stderr)?;
            self.stderr.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MakeExitMsg, DEFAULT_CMD_TIMEOUT};
    use crate::transport::{MockEventChannel, MockRequestChannel, TransportError};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    const FOLDERS_JSON: &str = r#"[{"id":"p1","label":"Project One","relativePath":"proj1"}]"#;

    /// Write sink backed by shared memory so tests can inspect what the
    /// orchestrator printed.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn params(project_id: &str) -> BuildParams {
        BuildParams {
            project_id: project_id.to_string(),
            relative_path: String::new(),
            command_line: "clean all".to_string(),
            timeout_secs: DEFAULT_CMD_TIMEOUT,
            cwd: PathBuf::from("/home/u/work/proj1/src"),
        }
    }

    fn output(stdout: &str, stderr: &str) -> SessionEvent {
        SessionEvent::Output(MakeOutMsg {
            timestamp: "10:30:01".to_string(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }

    fn event_channel_with(events: Vec<SessionEvent>) -> MockEventChannel {
        let mut channel = MockEventChannel::new();
        channel.expect_subscribe().return_once(move || {
            let (tx, rx) = mpsc::unbounded_channel();
            for event in events {
                tx.send(event).unwrap();
            }
            Ok(rx)
        });
        channel
    }

    fn request_channel(expected_body: &str) -> MockRequestChannel {
        let expected_body = expected_body.to_string();
        let mut requests = MockRequestChannel::new();
        requests
            .expect_get()
            .withf(|path| path == FOLDERS_PATH)
            .return_once(|_| Ok(FOLDERS_JSON.as_bytes().to_vec()));
        requests
            .expect_post_json()
            .withf(move |path, body| path == MAKE_PATH && *body == expected_body)
            .return_once(|_, _| Ok(()));
        requests
    }

    #[tokio::test]
    async fn end_to_end_build_streams_output_and_exits_zero() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![
            output("CC main.o", ""),
            output("", "warning: unused variable"),
            output("LD app", ""),
            SessionEvent::Exit(MakeExitMsg { code: 0, error: None }),
        ]);
        let stdout = SharedBuf::default();
        let stderr = SharedBuf::default();

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(stdout.clone()),
            Box::new(stderr.clone()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome, BuildOutcome { code: 0, error: None });
        assert_eq!(stdout.contents(), "CC main.o\nLD app\n");
        assert_eq!(stderr.contents(), "warning: unused variable\n");
    }

    #[tokio::test]
    async fn subscribes_before_dispatching_the_build() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        let mut requests = MockRequestChannel::new();
        let get_log = log.clone();
        requests.expect_get().return_once(move |_| {
            get_log.lock().unwrap().push("get");
            Ok(FOLDERS_JSON.as_bytes().to_vec())
        });
        let post_log = log.clone();
        requests.expect_post_json().return_once(move |_, _| {
            post_log.lock().unwrap().push("post");
            Ok(())
        });

        let mut events = MockEventChannel::new();
        let subscribe_log = log.clone();
        events.expect_subscribe().return_once(move || {
            subscribe_log.lock().unwrap().push("subscribe");
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(SessionEvent::Exit(MakeExitMsg { code: 0, error: None }))
                .unwrap();
            Ok(rx)
        });

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["get", "subscribe", "post"]);
    }

    #[tokio::test]
    async fn exit_event_carries_code_and_error_text() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![SessionEvent::Exit(MakeExitMsg {
            code: 3,
            error: Some("build failed".to_string()),
        })]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(
            outcome,
            BuildOutcome {
                code: 3,
                error: Some("build failed".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn disconnection_defaults_to_exit_code_2() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![SessionEvent::Disconnected(None)]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome, BuildOutcome { code: 2, error: None });
    }

    #[tokio::test]
    async fn first_terminal_event_wins() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![
            SessionEvent::Exit(MakeExitMsg {
                code: 3,
                error: Some("build failed".to_string()),
            }),
            SessionEvent::Exit(MakeExitMsg { code: 0, error: None }),
            SessionEvent::Disconnected(None),
        ]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome.code, 3);
    }

    #[tokio::test]
    async fn advisory_errors_do_not_terminate_the_wait() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![
            SessionEvent::Error("transient transport hiccup".to_string()),
            output("still running", ""),
            SessionEvent::Exit(MakeExitMsg { code: 0, error: None }),
        ]);
        let stdout = SharedBuf::default();

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(stdout.clone()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome.code, 0);
        assert_eq!(stdout.contents(), "still running\n");
    }

    #[tokio::test]
    async fn missing_project_id_fails_with_project_listing() {
        let mut requests = MockRequestChannel::new();
        requests
            .expect_get()
            .return_once(|_| Ok(FOLDERS_JSON.as_bytes().to_vec()));
        let events = MockEventChannel::new();

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let err = orchestrator.run(params("")).await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("XDS_PROJECT_ID"));
        assert!(msg.contains("p1"));
    }

    #[tokio::test]
    async fn unknown_project_id_still_dispatches_with_empty_rpath() {
        let requests =
            request_channel(r#"{"id":"nope","rpath":"","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![SessionEvent::Exit(MakeExitMsg {
            code: 1,
            error: Some("unknown project".to_string()),
        })]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("nope")).await.unwrap();

        assert_eq!(outcome.code, 1);
    }

    #[tokio::test]
    async fn explicit_rpath_suppresses_auto_detection() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"tests","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![SessionEvent::Exit(MakeExitMsg {
            code: 0,
            error: None,
        })]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let mut p = params("p1");
        p.relative_path = "tests".to_string();
        let outcome = orchestrator.run(p).await.unwrap();

        assert_eq!(outcome.code, 0);
    }

    #[tokio::test]
    async fn timestamp_prefix_is_applied_when_enabled() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![
            output("CC main.o", ""),
            SessionEvent::Exit(MakeExitMsg { code: 0, error: None }),
        ]);
        let stdout = SharedBuf::default();

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions { with_timestamp: true },
            Box::new(stdout.clone()),
            Box::new(SharedBuf::default()),
        );
        orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(stdout.contents(), "10:30:01| CC main.o\n");
    }

    #[tokio::test]
    async fn unparseable_folder_list_is_tolerated() {
        let mut requests = MockRequestChannel::new();
        requests
            .expect_get()
            .return_once(|_| Ok(b"<html>not json</html>".to_vec()));
        requests
            .expect_post_json()
            .withf(|_, body| body.contains(r#""rpath":"""#))
            .return_once(|_, _| Ok(()));
        let events = event_channel_with(vec![SessionEvent::Exit(MakeExitMsg {
            code: 0,
            error: None,
        })]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome.code, 0);
    }

    #[tokio::test]
    async fn folder_fetch_failure_is_fatal() {
        let mut requests = MockRequestChannel::new();
        requests.expect_get().return_once(|path| {
            Err(TransportError::Status {
                status: 503,
                path: path.to_string(),
            })
        });
        let events = MockEventChannel::new();

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let err = orchestrator.run(params("p1")).await.unwrap_err();

        assert!(err.to_string().contains("fetching project list"));
    }

    #[tokio::test]
    async fn closed_event_channel_counts_as_disconnection() {
        let requests =
            request_channel(r#"{"id":"p1","rpath":"src","args":"clean all","cmdTimeout":60}"#);
        let events = event_channel_with(vec![output("CC main.o", "")]);

        let orchestrator = Orchestrator::new(
            requests,
            events,
            OutputOptions::default(),
            Box::new(SharedBuf::default()),
            Box::new(SharedBuf::default()),
        );
        let outcome = orchestrator.run(params("p1")).await.unwrap();

        assert_eq!(outcome.code, 2);
        assert!(outcome.error.is_some());
    }
}

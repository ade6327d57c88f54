use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::error::SpoError;
use crate::spo_client::{ODATA_NOMETADATA, Transport};

/// Opaque descriptor of one server-side copy job, issued by
/// CreateCopyJobs. Never introspected; echoed verbatim in every
/// GetCopyJobProgress request until the job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct CopyJobInfo(Value);

/// Polling budget for one copy job.
///
/// Transport retries are a separate, smaller budget than poll attempts:
/// a progress check that fails to reach the server is less severe than a
/// job failure, because the underlying copy can still succeed while the
/// status endpoint is transiently unavailable.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_transport_retries: u32,
}

impl Default for PollPolicy {
    // ~30 minutes of total budget at the default interval
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1800),
            max_poll_attempts: 1000,
            max_transport_retries: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobProgress {
    #[serde(rename = "JobState")]
    job_state: i64,
    #[serde(rename = "Logs", default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobLogEntry {
    #[serde(rename = "Event", default)]
    event: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Create a copy job for a single source uri.
///
/// Never retried: a second CreateCopyJobs request would start a second
/// job. Every other request in this module is safe to repeat.
pub async fn create_copy_job(
    transport: &dyn Transport,
    web_url: &str,
    source_absolute_url: &str,
    destination_uri: &str,
    ignore_version_history: bool,
    access_token: &str,
) -> Result<CopyJobInfo, SpoError> {
    let url = format!("{}/_api/site/CreateCopyJobs", web_url);
    let body = json!({
        "exportObjectUris": [source_absolute_url],
        "destinationUri": destination_uri,
        "options": { "IgnoreVersionHistory": ignore_version_history }
    });
    debug!(url = %url, body = %body, "CreateCopyJobs request");

    let bearer = format!("Bearer {}", access_token);
    let text = transport
        .post(
            &url,
            &[
                ("Authorization", bearer.as_str()),
                ("Accept", ODATA_NOMETADATA),
                ("Content-Type", "application/json"),
            ],
            body.to_string(),
        )
        .await?;
    debug!(response = %text, "CreateCopyJobs response");

    let mut response: Value = serde_json::from_str(&text)
        .map_err(|e| SpoError::Protocol(format!("Failed to parse CreateCopyJobs response: {}", e)))?;

    match response.get_mut("value").and_then(|jobs| jobs.get_mut(0)) {
        Some(job) => Ok(CopyJobInfo(job.take())),
        None => Err(SpoError::Protocol(
            "CreateCopyJobs response contained no job info".to_string(),
        )),
    }
}

enum PollStep {
    Done,
    Wait,
}

/// Drives a queued copy job until the server reports JobState 0.
///
/// One poller owns one job and its two counters; nothing is shared, so
/// independent jobs can be polled concurrently by separate pollers.
pub struct CopyJobPoller<'a> {
    transport: &'a dyn Transport,
    web_url: String,
    access_token: String,
    job: CopyJobInfo,
    policy: PollPolicy,
    attempts: u32,
    transport_failures: u32,
}

impl<'a> CopyJobPoller<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        web_url: &str,
        access_token: &str,
        job: CopyJobInfo,
        policy: PollPolicy,
    ) -> Self {
        Self {
            transport,
            web_url: web_url.to_string(),
            access_token: access_token.to_string(),
            job,
            policy,
            attempts: 0,
            transport_failures: 0,
        }
    }

    /// Poll until the job completes, fails, or the attempt budget runs out
    pub async fn run(mut self) -> Result<(), SpoError> {
        loop {
            match self.poll_once().await? {
                PollStep::Done => return Ok(()),
                PollStep::Wait => tokio::time::sleep(self.policy.poll_interval).await,
            }
        }
    }

    async fn poll_once(&mut self) -> Result<PollStep, SpoError> {
        let url = format!("{}/_api/site/GetCopyJobProgress", self.web_url);
        let bearer = format!("Bearer {}", self.access_token);

        match self
            .transport
            .post(
                &url,
                &[
                    ("Authorization", bearer.as_str()),
                    ("Accept", ODATA_NOMETADATA),
                    ("Content-Type", "application/json"),
                ],
                progress_request_body(&self.job),
            )
            .await
        {
            Ok(text) => {
                self.transport_failures = 0;
                self.attempts += 1;

                let progress: JobProgress = serde_json::from_str(&text).map_err(|e| {
                    SpoError::Protocol(format!("Failed to parse GetCopyJobProgress response: {}", e))
                })?;
                debug!(
                    attempt = self.attempts,
                    job_state = progress.job_state,
                    "copy job progress"
                );

                // An error logged by the job wins over the state code,
                // even when the same response reports JobState 0
                for raw in &progress.logs {
                    if let Ok(entry) = serde_json::from_str::<JobLogEntry>(raw) {
                        if entry.event == "JobError" || entry.event == "JobFatalError" {
                            return Err(SpoError::JobFailed(entry.message));
                        }
                    }
                }

                if progress.job_state == 0 {
                    return Ok(PollStep::Done);
                }

                if self.attempts < self.policy.max_poll_attempts {
                    Ok(PollStep::Wait)
                } else {
                    Err(SpoError::JobTimeout)
                }
            }
            Err(err) if err.is_transport() => {
                // Transport retries do not touch the attempt counter, so
                // a flaky status endpoint cannot exhaust the budget meant
                // for legitimate in-progress polling
                self.transport_failures += 1;
                if self.transport_failures <= self.policy.max_transport_retries {
                    debug!(
                        consecutive_failures = self.transport_failures,
                        "progress check failed, retrying"
                    );
                    Ok(PollStep::Wait)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn progress_request_body(job: &CopyJobInfo) -> String {
    json!({ "copyJobInfo": job.0 }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<String, SpoError>>>,
        posts: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<String, SpoError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                posts: AtomicU32::new(0),
            }
        }

        fn post_count(&self) -> u32 {
            self.posts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(
            &self,
            _url: &str,
            _headers: &[(&str, &str)],
            _body: String,
        ) -> Result<String, SpoError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("poller sent more requests than scripted")
        }

        async fn get(&self, _url: &str, _headers: &[(&str, &str)]) -> Result<String, SpoError> {
            unimplemented!("poller never issues GET requests")
        }
    }

    fn test_policy(max_poll_attempts: u32, max_transport_retries: u32) -> PollPolicy {
        PollPolicy {
            poll_interval: Duration::from_millis(1),
            max_poll_attempts,
            max_transport_retries,
        }
    }

    fn test_job() -> CopyJobInfo {
        CopyJobInfo(json!({
            "EncryptionKey": "6G35dpTMegtzqT3rsZ/av6agpsqx/SUyaAHBs9fJE6A=",
            "JobId": "cee65dc5-8d05-41cc-8657-92a12d213f76",
            "JobQueueUri": "https://spobn1sn1m001pr.queue.core.windows.net:443/1246pq20180429-5305d83990eb483bb93e7356252715b4"
        }))
    }

    fn in_progress() -> Result<String, SpoError> {
        Ok(json!({"JobState": 4, "Logs": []}).to_string())
    }

    fn done() -> Result<String, SpoError> {
        Ok(json!({"JobState": 0, "Logs": []}).to_string())
    }

    fn with_logs(job_state: i64, entries: Vec<Value>) -> Result<String, SpoError> {
        let logs: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        Ok(json!({"JobState": job_state, "Logs": logs}).to_string())
    }

    fn transport_error() -> Result<String, SpoError> {
        Err(SpoError::Transport("connection reset".to_string()))
    }

    fn poller<'a>(transport: &'a ScriptedTransport, policy: PollPolicy) -> CopyJobPoller<'a> {
        CopyJobPoller::new(
            transport,
            "https://contoso.sharepoint.com/sites/team-a",
            "ABC",
            test_job(),
            policy,
        )
    }

    #[tokio::test]
    async fn resolves_when_job_state_reaches_zero() {
        let transport = ScriptedTransport::new(vec![in_progress(), in_progress(), done()]);

        poller(&transport, test_policy(1000, 5)).run().await.unwrap();
        assert_eq!(transport.post_count(), 3);
    }

    #[tokio::test]
    async fn job_error_in_log_wins_over_in_progress_state() {
        let transport = ScriptedTransport::new(vec![with_logs(
            4,
            vec![json!({"Event": "JobFatalError", "Message": "File Not Found."})],
        )]);

        let err = poller(&transport, test_policy(1000, 5)).run().await.unwrap_err();
        match err {
            SpoError::JobFailed(message) => assert_eq!(message, "File Not Found."),
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn job_error_in_log_wins_over_done_state() {
        let transport = ScriptedTransport::new(vec![with_logs(
            0,
            vec![json!({"Event": "JobError", "Message": "Access denied."})],
        )]);

        let err = poller(&transport, test_policy(1000, 5)).run().await.unwrap_err();
        match err {
            SpoError::JobFailed(message) => assert_eq!(message, "Access denied."),
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn informational_log_entries_do_not_fail_completion() {
        let transport = ScriptedTransport::new(vec![with_logs(
            0,
            vec![
                json!({"Event": "JobStart", "Message": ""}),
                json!({"Event": "JobEnd", "Message": "Copied 1 item."}),
            ],
        )]);

        poller(&transport, test_policy(1000, 5)).run().await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_transport_retry_budget_is_exhausted() {
        // with a budget of 2 retries, the 3rd consecutive failure is fatal
        let transport = ScriptedTransport::new(vec![
            transport_error(),
            transport_error(),
            transport_error(),
        ]);

        let err = poller(&transport, test_policy(1000, 2)).run().await.unwrap_err();
        assert!(err.is_transport(), "expected Transport error, got {:?}", err);
        assert_eq!(transport.post_count(), 3);
    }

    #[tokio::test]
    async fn transport_retries_do_not_consume_attempt_budget() {
        // 3 transport failures before the first real poll; with an
        // attempt budget of only 2, the job still completes because
        // failed progress checks are tracked by a separate counter.
        // (Deliberate leniency: flaky transport plus a slow job can poll
        // longer than max_poll_attempts * poll_interval.)
        let transport = ScriptedTransport::new(vec![
            transport_error(),
            transport_error(),
            transport_error(),
            in_progress(),
            done(),
        ]);

        poller(&transport, test_policy(2, 5)).run().await.unwrap();
        assert_eq!(transport.post_count(), 5);
    }

    #[tokio::test]
    async fn transport_failure_counter_resets_on_success() {
        // single-retry budget, but failures are never consecutive
        let transport = ScriptedTransport::new(vec![
            transport_error(),
            in_progress(),
            transport_error(),
            in_progress(),
            transport_error(),
            done(),
        ]);

        poller(&transport, test_policy(1000, 1)).run().await.unwrap();
        assert_eq!(transport.post_count(), 6);
    }

    #[tokio::test]
    async fn times_out_on_final_attempt() {
        let transport = ScriptedTransport::new(vec![in_progress(), in_progress(), in_progress()]);

        let err = poller(&transport, test_policy(3, 5)).run().await.unwrap_err();
        assert!(matches!(err, SpoError::JobTimeout));
        assert_eq!(transport.post_count(), 3);
    }

    #[tokio::test]
    async fn does_not_time_out_before_final_attempt() {
        let transport = ScriptedTransport::new(vec![in_progress(), in_progress(), done()]);

        poller(&transport, test_policy(3, 5)).run().await.unwrap();
        assert_eq!(transport.post_count(), 3);
    }

    #[tokio::test]
    async fn create_copy_job_returns_first_job_info() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "value": [{
                "EncryptionKey": "6G35dpTMegtzqT3rsZ/av6agpsqx/SUyaAHBs9fJE6A=",
                "JobId": "cee65dc5-8d05-41cc-8657-92a12d213f76",
                "JobQueueUri": "https://spobn1sn1m001pr.queue.core.windows.net:443/1246pq"
            }]
        })
        .to_string())]);

        let job = create_copy_job(
            &transport,
            "https://contoso.sharepoint.com/sites/team-a",
            "https://contoso.sharepoint.com/sites/team-a/Shared Documents/sp1.pdf",
            "https://contoso.sharepoint.com/sites/team-b/Shared Documents",
            true,
            "ABC",
        )
        .await
        .unwrap();

        // the descriptor goes back to the server byte-for-byte
        let body = progress_request_body(&job);
        assert!(body.contains("cee65dc5-8d05-41cc-8657-92a12d213f76"));
        assert!(body.contains("6G35dpTMegtzqT3rsZ/av6agpsqx/SUyaAHBs9fJE6A="));
    }

    #[tokio::test]
    async fn create_copy_job_without_job_info_is_a_protocol_error() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"value": []}).to_string())]);

        let err = create_copy_job(
            &transport,
            "https://contoso.sharepoint.com/sites/team-a",
            "https://contoso.sharepoint.com/sites/team-a/Shared Documents/sp1.pdf",
            "https://contoso.sharepoint.com/sites/team-b/Shared Documents",
            true,
            "ABC",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SpoError::Protocol(_)));
    }

    #[tokio::test]
    async fn create_copy_job_with_non_object_response_is_a_protocol_error() {
        // valid JSON, but not the object shape the endpoint promises
        for body in ["[]", "\"queued\"", "42"] {
            let transport = ScriptedTransport::new(vec![Ok(body.to_string())]);

            let err = create_copy_job(
                &transport,
                "https://contoso.sharepoint.com/sites/team-a",
                "https://contoso.sharepoint.com/sites/team-a/Shared Documents/sp1.pdf",
                "https://contoso.sharepoint.com/sites/team-b/Shared Documents",
                true,
                "ABC",
            )
            .await
            .unwrap_err();

            assert!(
                matches!(err, SpoError::Protocol(_)),
                "body {:?} should yield a Protocol error, got {:?}",
                body,
                err
            );
        }
    }
}

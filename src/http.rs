use std::thread;
use std::time::Duration;

/// A failed request, classified for the caller's retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub(crate) struct RequestError {
    pub(crate) message: String,
    /// True when the failure was retryable but attempts ran out.
    pub(crate) retryable: bool,
}

impl RequestError {
    fn fatal(message: String) -> Self {
        Self {
            message,
            retryable: false,
        }
    }

    fn exhausted(message: String) -> Self {
        Self {
            message,
            retryable: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            attempts: 3,
            retry_delay: Duration::from_millis(750),
        }
    }
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn post_json_with_retries(
    url: &str,
    body: &serde_json::Value,
    policy: &RetryPolicy,
) -> Result<String, RequestError> {
    let attempts = policy.attempts.max(1);
    let payload = body.to_string();

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(policy.connect_timeout)
            .timeout_read(policy.read_timeout)
            .timeout_write(policy.read_timeout)
            .build();

        let request = agent
            .post(url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");

        match request.send_string(&payload) {
            Ok(response) => match response.into_string() {
                Ok(body) => return Ok(body),
                Err(err) => {
                    return Err(RequestError::fatal(format!(
                        "request failed: response decode failed: {err}"
                    )));
                }
            },
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let status_error = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let truncated = body.chars().take(240).collect::<String>();
                    format!("HTTP status {status} ({truncated})")
                };

                if should_retry_http_status(status) && attempt < attempts {
                    tracing::debug!(attempt, status, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }

                if should_retry_http_status(status) {
                    return Err(RequestError::exhausted(format!(
                        "request failed after {attempts} attempt(s): {status_error}"
                    )));
                }

                return Err(RequestError::fatal(format!(
                    "request failed: {status_error}"
                )));
            }
            Err(ureq::Error::Transport(err)) => {
                let transport_error = format!("transport error: {err}");
                if attempt < attempts {
                    tracing::debug!(attempt, error = %transport_error, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(RequestError::exhausted(format!(
                    "request failed after {attempts} attempt(s): {transport_error}"
                )));
            }
        }
    }

    Err(RequestError::fatal(
        "request failed: exhausted attempts without a concrete error".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    /// One scripted reply from the stub GraphQL endpoint.
    #[derive(Debug, Clone)]
    struct Reply {
        status: u16,
        body: &'static str,
        delay: Option<Duration>,
    }

    fn reply(status: u16, body: &'static str) -> Reply {
        Reply {
            status,
            body,
            delay: None,
        }
    }

    /// Local endpoint that answers POSTs from a script and keeps every request
    /// body it received. Replies past the end of the script are `200 {}`.
    struct StubEndpoint {
        url: String,
        bodies: Arc<Mutex<Vec<String>>>,
        stop: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl StubEndpoint {
        fn start(script: Vec<Reply>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub endpoint");
            listener.set_nonblocking(true).expect("nonblocking listener");
            let url = format!("http://{}/graphql", listener.local_addr().expect("local addr"));
            let bodies = Arc::new(Mutex::new(Vec::new()));
            let stop = Arc::new(AtomicBool::new(false));

            let handle = {
                let bodies = Arc::clone(&bodies);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut script = script.into_iter();
                    while !stop.load(Ordering::SeqCst) {
                        match listener.accept() {
                            Ok((stream, _)) => {
                                let next = script.next().unwrap_or_else(|| reply(200, "{}"));
                                let bodies = Arc::clone(&bodies);
                                std::thread::spawn(move || answer(stream, next, &bodies));
                            }
                            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                                std::thread::sleep(Duration::from_millis(5));
                            }
                            Err(_) => break,
                        }
                    }
                })
            };

            Self {
                url,
                bodies,
                stop,
                handle: Some(handle),
            }
        }

        fn received(&self) -> Vec<String> {
            self.bodies.lock().expect("bodies lock").clone()
        }
    }

    impl Drop for StubEndpoint {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn answer(stream: TcpStream, reply: Reply, bodies: &Mutex<Vec<String>>) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
        let Ok(body) = read_post_body(&stream) else {
            return;
        };
        if let Ok(mut bodies) = bodies.lock() {
            bodies.push(body);
        }
        if let Some(delay) = reply.delay {
            std::thread::sleep(delay);
        }
        let mut stream = stream;
        let _ = write!(
            stream,
            "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.status,
            reply.body.len(),
            reply.body
        );
        let _ = stream.flush();
    }

    fn read_post_body(stream: &TcpStream) -> std::io::Result<String> {
        let mut reader = BufReader::new(stream);
        let mut length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line.trim_end().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                length = value.trim().parse().unwrap_or(0);
            }
        }
        let mut body = vec![0_u8; length];
        reader.read_exact(&mut body)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn policy(attempts: usize, read_timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(read_timeout_ms),
            attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn search_query() -> serde_json::Value {
        serde_json::json!({
            "query": "query ($search: String) { Page { media(search: $search) { id } } }",
            "variables": {"search": "Frieren"}
        })
    }

    #[test]
    fn posts_the_query_and_returns_the_body() {
        let endpoint = StubEndpoint::start(vec![reply(200, r#"{"data":{}}"#)]);

        let body = post_json_with_retries(&endpoint.url, &search_query(), &policy(1, 200))
            .expect("request should succeed");

        assert_eq!(body, r#"{"data":{}}"#);
        let received = endpoint.received();
        assert_eq!(received.len(), 1);
        let sent: serde_json::Value = serde_json::from_str(&received[0]).expect("json body");
        assert_eq!(sent, search_query());
    }

    #[test]
    fn throttling_and_server_errors_are_retried() {
        let endpoint = StubEndpoint::start(vec![
            reply(500, "boom"),
            reply(429, "slow down"),
            reply(200, "ok"),
        ]);

        let result = post_json_with_retries(&endpoint.url, &search_query(), &policy(3, 200));

        assert_eq!(result.expect("third attempt succeeds"), "ok");
        assert_eq!(endpoint.received().len(), 3);
    }

    #[test]
    fn client_errors_fail_on_the_first_attempt() {
        let endpoint = StubEndpoint::start(vec![reply(400, "bad query")]);

        let err = post_json_with_retries(&endpoint.url, &search_query(), &policy(5, 200))
            .expect_err("400 is not retried");

        assert!(err.message.contains("HTTP status 400 (bad query)"), "{err}");
        assert!(!err.retryable);
        assert_eq!(endpoint.received().len(), 1);
    }

    #[test]
    fn read_timeout_is_retried() {
        let endpoint = StubEndpoint::start(vec![
            Reply {
                status: 200,
                body: "late",
                delay: Some(Duration::from_millis(150)),
            },
            reply(200, "ok"),
        ]);

        let result = post_json_with_retries(&endpoint.url, &search_query(), &policy(2, 30));

        assert_eq!(result.expect("retry after timeout"), "ok");
        assert_eq!(endpoint.received().len(), 2);
    }

    #[test]
    fn exhausted_retries_are_marked_retryable() {
        let endpoint = StubEndpoint::start(vec![reply(503, "down"), reply(503, "down")]);

        let err = post_json_with_retries(&endpoint.url, &search_query(), &policy(2, 200))
            .expect_err("every attempt fails");

        assert!(err.message.contains("after 2 attempt(s)"), "{err}");
        assert!(err.message.contains("HTTP status 503"), "{err}");
        assert!(err.retryable);
        assert_eq!(endpoint.received().len(), 2);
    }
}

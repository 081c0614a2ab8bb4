//! Client for the external alignment service.
//!
//! One request per connection: the client sends `{"origin": [...], "trans": {"label", "data"}}`
//! and reads JSON objects back until a verdict arrives. The service first acknowledges with
//! `{"status":"received"}`, then answers `{"status":"accepted","trans":[...]}` or
//! `{"status":"rejected"}`. There is no length prefix; a message is complete once it parses.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::progress::ConsoleProgress;
use crate::records::Record;

pub const DEFAULT_ALIGN_ADDR: &str = "localhost:12345";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
pub struct AlignmentConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    /// Silence longer than this is reported, then waiting continues.
    pub idle_timeout: Duration,
    /// Overall deadline for the reply; expiry falls back to the unaligned translation.
    pub reply_timeout: Duration,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ALIGN_ADDR.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlignmentOutcome {
    /// The service returned a (possibly corrected) translation.
    Aligned(Vec<Record>),
    /// No verdict; the model's translation is used as-is.
    Unaligned {
        translated: Vec<Record>,
        reason: String,
    },
}

/// Reconciles a translated chunk with its origin. Never mutates `origin`.
pub trait Aligner {
    fn align(&self, origin: &[Record], translated: Vec<Record>) -> Result<AlignmentOutcome>;
}

pub struct AlignmentClient {
    cfg: AlignmentConfig,
    label: String,
    progress: ConsoleProgress,
}

#[derive(Serialize)]
struct AlignRequest<'a> {
    origin: &'a [Record],
    trans: AlignTrans<'a>,
}

#[derive(Serialize)]
struct AlignTrans<'a> {
    label: &'a str,
    data: &'a [Record],
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Accepted(Vec<Record>),
    Rejected,
}

#[derive(Debug, PartialEq)]
enum Scan {
    Incomplete,
    Verdict { verdict: Verdict, trailing: usize },
}

enum ReplyEnd {
    Verdict(Verdict),
    Closed,
    TimedOut,
}

impl AlignmentClient {
    pub fn new(cfg: AlignmentConfig, label: impl Into<String>, progress: ConsoleProgress) -> Self {
        Self {
            cfg,
            label: label.into(),
            progress,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let unavailable = |reason: String| PipelineError::AlignmentServiceUnavailable {
            addr: self.cfg.addr.clone(),
            reason,
        };
        let addrs = self
            .cfg
            .addr
            .to_socket_addrs()
            .map_err(|err| unavailable(format!("resolve: {err}")))?;

        let mut last_err = "address resolved to nothing".to_string();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.cfg.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = format!("{addr}: {err}"),
            }
        }
        Err(unavailable(last_err))
    }

    fn await_verdict(&self, stream: &mut TcpStream, deadline: Instant) -> Result<ReplyEnd> {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(ReplyEnd::TimedOut);
            }
            let wait = (deadline - now)
                .min(self.cfg.idle_timeout)
                .max(Duration::from_millis(1));
            stream
                .set_read_timeout(Some(wait))
                .map_err(|err| PipelineError::Transport(format!("alignment socket: {err}")))?;

            match stream.read(&mut chunk) {
                Ok(0) => return Ok(ReplyEnd::Closed),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if let Scan::Verdict { verdict, trailing } = scan_reply(&buf)? {
                        if trailing > 0 {
                            self.progress.warn(format!(
                                "alignment service sent {trailing} byte(s) after its verdict; ignored"
                            ));
                        }
                        return Ok(ReplyEnd::Verdict(verdict));
                    }
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if Instant::now() < deadline {
                        self.progress.info(format!(
                            "No data from alignment service in {}s, still waiting...",
                            wait.as_secs()
                        ));
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    return Err(PipelineError::Transport(format!(
                        "read from alignment service: {err}"
                    )))
                }
            }
        }
    }
}

impl Aligner for AlignmentClient {
    fn align(&self, origin: &[Record], translated: Vec<Record>) -> Result<AlignmentOutcome> {
        let mut stream = match self.connect() {
            Ok(s) => s,
            Err(err) => {
                return Ok(AlignmentOutcome::Unaligned {
                    translated,
                    reason: err.to_string(),
                });
            }
        };

        let payload = serde_json::to_vec(&AlignRequest {
            origin,
            trans: AlignTrans {
                label: &self.label,
                data: &translated,
            },
        })
        .map_err(|err| PipelineError::Transport(format!("encode alignment request: {err}")))?;
        stream
            .write_all(&payload)
            .and_then(|()| stream.flush())
            .map_err(|err| PipelineError::Transport(format!("send to alignment service: {err}")))?;

        let deadline = Instant::now() + self.cfg.reply_timeout;
        let end = self.await_verdict(&mut stream, deadline);
        let _ = stream.shutdown(Shutdown::Both);

        match end? {
            ReplyEnd::Verdict(Verdict::Accepted(items)) => {
                self.progress.info("Accepted by alignment service.");
                Ok(AlignmentOutcome::Aligned(items))
            }
            ReplyEnd::Verdict(Verdict::Rejected) => Err(PipelineError::AlignmentRejected),
            ReplyEnd::Closed => {
                Ok(AlignmentOutcome::Unaligned {
                    translated,
                    reason: "alignment service closed the connection without a verdict".to_string(),
                })
            }
            ReplyEnd::TimedOut => {
                let reason = format!(
                    "no verdict from alignment service within {}s",
                    self.cfg.reply_timeout.as_secs()
                );
                Ok(AlignmentOutcome::Unaligned { translated, reason })
            }
        }
    }
}

/// Walks the complete JSON values in `buf`. Acknowledgements are skipped; the first verdict
/// wins and the count of non-whitespace bytes after it is reported as `trailing`.
fn scan_reply(buf: &[u8]) -> Result<Scan> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    loop {
        match values.next() {
            None => return Ok(Scan::Incomplete),
            Some(Ok(v)) => {
                if let Some(verdict) = interpret(v)? {
                    let rest = &buf[values.byte_offset()..];
                    let trailing = rest.iter().filter(|b| !b.is_ascii_whitespace()).count();
                    return Ok(Scan::Verdict { verdict, trailing });
                }
            }
            Some(Err(err)) if err.is_eof() => return Ok(Scan::Incomplete),
            Some(Err(err)) => {
                return Err(PipelineError::Transport(format!(
                    "alignment reply is not valid JSON: {err}"
                )))
            }
        }
    }
}

fn interpret(v: Value) -> Result<Option<Verdict>> {
    let Value::Object(mut obj) = v else {
        return Err(PipelineError::MalformedResponse(
            "alignment reply is not a JSON object".to_string(),
        ));
    };
    match obj.remove("trans") {
        Some(Value::Array(items)) => return Ok(Some(Verdict::Accepted(items))),
        Some(_) => {
            return Err(PipelineError::MalformedResponse(
                "alignment reply `trans` is not an array".to_string(),
            ))
        }
        None => {}
    }
    match obj.get("status").and_then(Value::as_str) {
        Some("rejected") => Ok(Some(Verdict::Rejected)),
        Some("accepted") => Err(PipelineError::MalformedResponse(
            "alignment reply accepted without a `trans` array".to_string(),
        )),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use std::thread;

    fn test_cfg(addr: String) -> AlignmentConfig {
        AlignmentConfig {
            addr,
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_millis(100),
            reply_timeout: Duration::from_secs(3),
        }
    }

    fn read_request(stream: &mut TcpStream) -> Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).expect("server read");
            assert!(n > 0, "client closed before sending a full request");
            buf.extend_from_slice(&chunk[..n]);
            if let Ok(v) = serde_json::from_slice::<Value>(&buf) {
                return v;
            }
        }
    }

    /// Accepts one connection, hands the parsed request to `script`, returns the address.
    fn serve_once<F>(script: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream, Value) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = read_request(&mut stream);
            script(stream, request);
        });
        (addr, handle)
    }

    fn client(addr: String) -> AlignmentClient {
        AlignmentClient::new(test_cfg(addr), "gpt-4o-mini", ConsoleProgress::quiet())
    }

    fn origin() -> Vec<Record> {
        vec![json!({"text":"Hello"}), json!({"text":"Bye"})]
    }

    fn translated() -> Vec<Record> {
        vec![json!({"text":"你好"}), json!({"text":"再见"})]
    }

    #[test]
    fn unreachable_service_returns_translation_unchanged() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").expect("bind");
            l.local_addr().expect("addr").to_string()
        };
        let out = client(addr).align(&origin(), translated()).expect("degrades");
        match out {
            AlignmentOutcome::Unaligned { translated: t, reason } => {
                assert_eq!(t, translated());
                assert!(reason.contains("alignment service unavailable"), "{reason}");
            }
            other => panic!("expected unaligned, got {other:?}"),
        }
    }

    #[test]
    fn ack_and_verdict_in_one_write_are_split_correctly() {
        let (addr, server) = serve_once(|mut s, req| {
            assert_eq!(req["origin"], json!([{"text":"Hello"},{"text":"Bye"}]));
            assert_eq!(req["trans"]["label"], "gpt-4o-mini");
            assert_eq!(req["trans"]["data"], json!([{"text":"你好"},{"text":"再见"}]));
            let reply = "{\n    \"status\": \"received\"\n}\n{\n    \"status\": \"accepted\",\n    \"trans\": [{\"text\":\"您好\"},{\"text\":\"再会\"}]\n}\n";
            s.write_all(reply.as_bytes()).expect("write");
        });
        let out = client(addr).align(&origin(), translated()).expect("align");
        assert_eq!(
            out,
            AlignmentOutcome::Aligned(vec![json!({"text":"您好"}), json!({"text":"再会"})])
        );
        server.join().expect("server");
    }

    #[test]
    fn verdict_split_across_slow_writes() {
        let (addr, server) = serve_once(|mut s, _| {
            s.write_all(br#"{"status":"received"}"#).expect("ack");
            thread::sleep(Duration::from_millis(250));
            s.write_all(br#"{"status":"accepted","tr"#).expect("head");
            thread::sleep(Duration::from_millis(150));
            s.write_all(br#"ans":["x","y"]}"#).expect("tail");
        });
        let out = client(addr).align(&origin(), translated()).expect("align");
        assert_eq!(out, AlignmentOutcome::Aligned(vec![json!("x"), json!("y")]));
        server.join().expect("server");
    }

    #[test]
    fn rejection_is_a_retryable_error() {
        let (addr, server) = serve_once(|mut s, _| {
            s.write_all(br#"{"status":"received"}{"status":"rejected"}"#)
                .expect("write");
        });
        let err = client(addr).align(&origin(), translated()).expect_err("rejected");
        assert!(matches!(err, PipelineError::AlignmentRejected));
        assert!(err.is_retryable());
        server.join().expect("server");
    }

    #[test]
    fn silent_service_hits_the_single_deadline() {
        let (addr, server) = serve_once(|mut s, _| {
            s.write_all(br#"{"status":"received"}"#).expect("ack");
            thread::sleep(Duration::from_millis(900));
        });
        let mut cfg = test_cfg(addr);
        cfg.reply_timeout = Duration::from_millis(400);
        let c = AlignmentClient::new(cfg, "m", ConsoleProgress::quiet());

        let started = Instant::now();
        let out = c.align(&origin(), translated()).expect("falls back");
        assert!(started.elapsed() < Duration::from_millis(850));
        let AlignmentOutcome::Unaligned { translated: kept, reason } = out else {
            panic!("expected unaligned outcome");
        };
        assert_eq!(kept, translated());
        assert!(reason.starts_with("no verdict"), "{reason}");
        server.join().expect("server");
    }

    #[test]
    fn closed_without_verdict_falls_back() {
        let (addr, server) = serve_once(|mut s, _| {
            s.write_all(br#"{"status":"received"}{"status":"acc"#).expect("partial");
        });
        let out = client(addr).align(&origin(), translated()).expect("falls back");
        let AlignmentOutcome::Unaligned { translated: kept, reason } = out else {
            panic!("expected unaligned outcome");
        };
        assert_eq!(kept, translated());
        assert!(reason.contains("closed the connection"), "{reason}");
        server.join().expect("server");
    }

    #[test]
    fn scan_waits_for_complete_values() {
        assert_eq!(scan_reply(b"").expect("empty"), Scan::Incomplete);
        assert_eq!(scan_reply(br#"{"status":"rece"#).expect("partial"), Scan::Incomplete);
        assert_eq!(
            scan_reply(br#"{"status":"received"} {"trans":["a"#).expect("ack only"),
            Scan::Incomplete
        );
    }

    #[test]
    fn scan_stops_at_first_verdict_and_counts_trailing_bytes() {
        let buf = br#"{"status":"received"}{"status":"accepted","trans":["a"]} {"status":"accepted","trans":["b"]}"#;
        match scan_reply(buf).expect("scan") {
            Scan::Verdict { verdict, trailing } => {
                assert_eq!(verdict, Verdict::Accepted(vec![json!("a")]));
                assert_eq!(trailing, r#"{"status":"accepted","trans":["b"]}"#.len());
            }
            other => panic!("expected verdict, got {other:?}"),
        }

        match scan_reply(b"{\"trans\":[]}\n  \n").expect("scan") {
            Scan::Verdict { trailing, .. } => assert_eq!(trailing, 0),
            other => panic!("expected verdict, got {other:?}"),
        }
    }

    #[test]
    fn scan_rejects_garbage_and_bad_trans() {
        assert!(matches!(
            scan_reply(b"{\"status\": oops}"),
            Err(PipelineError::Transport(_))
        ));
        assert!(matches!(
            scan_reply(br#"{"status":"accepted","trans":"nope"}"#),
            Err(PipelineError::MalformedResponse(_))
        ));
        assert!(matches!(
            scan_reply(br#"["not","an","object"]"#),
            Err(PipelineError::MalformedResponse(_))
        ));
    }

    #[test]
    fn accepted_without_translation_fails_fast() {
        assert!(matches!(
            scan_reply(br#"{"status":"received"}{"status":"accepted"}"#),
            Err(PipelineError::MalformedResponse(_))
        ));

        let (addr, server) = serve_once(|mut s, _| {
            s.write_all(br#"{"status":"received"}{"status":"accepted"}"#)
                .expect("write");
            thread::sleep(Duration::from_millis(900));
        });
        let started = Instant::now();
        let err = client(addr).align(&origin(), translated()).expect_err("malformed");
        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
        assert!(err.is_retryable());
        server.join().expect("server");
    }
}

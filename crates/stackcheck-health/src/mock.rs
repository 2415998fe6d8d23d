//! Scripted [`Network`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::net::{HttpResponse, Network, NetworkError, NetworkFuture};

/// What the scripted network answers for one call.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// 200 with this body. For TCP targets any `Body` means "connected".
    Body(String),
    /// Connection refused.
    Refused,
    /// Never answers.
    Hang,
}

pub(crate) fn body(s: &str) -> Reply {
    Reply::Body(s.to_string())
}

/// Per-endpoint reply queues. The last reply in a queue repeats forever;
/// unscripted endpoints refuse connections.
#[derive(Default)]
pub(crate) struct ScriptedNetwork {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedNetwork {
    pub(crate) fn script(self, endpoint: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), replies.into());
        self
    }

    pub(crate) fn calls(&self, endpoint: &str) -> u32 {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    fn next_reply(&self, endpoint: &str) -> Reply {
        *self.calls.lock().unwrap().entry(endpoint.to_string()).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(endpoint) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Refused),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Refused),
            None => Reply::Refused,
        }
    }
}

impl Network for ScriptedNetwork {
    fn http_get<'a>(
        &'a self,
        url: &'a str,
        _connect_timeout: Duration,
        _total_timeout: Duration,
    ) -> NetworkFuture<'a, HttpResponse> {
        let reply = self.next_reply(url);
        Box::pin(async move {
            match reply {
                Reply::Body(body) => Ok(HttpResponse { status: 200, body }),
                Reply::Refused => Err(NetworkError::Connect {
                    addr: url.to_string(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                }),
                Reply::Hang => std::future::pending().await,
            }
        })
    }

    fn tcp_connect<'a>(&'a self, host: &'a str, port: u16, _timeout: Duration) -> NetworkFuture<'a, ()> {
        let addr = format!("tcp://{host}:{port}");
        let reply = self.next_reply(&addr);
        Box::pin(async move {
            match reply {
                Reply::Body(_) => Ok(()),
                Reply::Refused => Err(NetworkError::Connect {
                    addr,
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                }),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

//! Scripted transport used by unit tests.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    core::transport::{Transport, TransportResponse},
    error::TransportError,
};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

pub(crate) enum MockReply {
    Response(TransportResponse),
    Error(TransportError),
    /// Wait out the request timeout, then fail with `Timeout`.
    Hang,
    /// Answer after a delay, ignoring the request timeout.
    Delayed(Duration, TransportResponse),
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Response(TransportResponse::json_body(status_code(status), &body))
    }

    pub fn status(status: u16) -> Self {
        Self::Response(TransportResponse::new(status_code(status), ""))
    }

    pub fn delayed(status: u16, delay: Duration) -> Self {
        Self::Delayed(delay, TransportResponse::new(status_code(status), ""))
    }

    pub fn refused() -> Self {
        Self::Error(TransportError::Connect("connection refused".to_string()))
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap()
}

type Responder = dyn Fn(&RecordedRequest) -> MockReply + Send + Sync;

pub(crate) struct MockTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
    open: AtomicBool,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    async fn handle(&self, request: RecordedRequest) -> Result<TransportResponse, TransportError> {
        self.open.store(true, Ordering::SeqCst);
        let timeout = request.timeout;
        let reply = (self.responder)(&request);
        self.requests.lock().push(request);
        match reply {
            MockReply::Response(response) => Ok(response),
            MockReply::Error(err) => Err(err),
            MockReply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
            MockReply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        self.handle(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            body: None,
            timeout,
        })
        .await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.handle(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
            timeout,
        })
        .await
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

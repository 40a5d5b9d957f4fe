//! Scripted transports for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use specprobe_core::{ExecutionPlan, ResponseData, TransportError, TransportErrorKind};

use crate::transport::Transport;

type Reply = Result<ResponseData, TransportError>;

pub(crate) fn refused() -> TransportError {
    TransportError::new(TransportErrorKind::ConnectionRefused, "connection refused")
}

enum Script {
    Queue(Mutex<VecDeque<Reply>>),
    Repeat(Reply),
    Hang,
}

/// Replies from a fixed script, recording every plan it was sent.
pub(crate) struct ScriptedTransport {
    script: Script,
    calls: AtomicUsize,
    sent: Mutex<Vec<ExecutionPlan>>,
}

impl ScriptedTransport {
    /// Replies in order; once drained, every call gets 200.
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(replies.into())))
    }

    pub(crate) fn repeating(reply: Reply) -> Self {
        Self::with_script(Script::Repeat(reply))
    }

    /// Never answers.
    pub(crate) fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<ExecutionPlan> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, plan: &ExecutionPlan) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(plan.clone());
        match &self.script {
            Script::Queue(queue) => {
                let next = queue.lock().unwrap().pop_front();
                next.unwrap_or_else(|| Ok(ResponseData::new(200)))
            }
            Script::Repeat(reply) => reply.clone(),
            Script::Hang => std::future::pending().await,
        }
    }
}

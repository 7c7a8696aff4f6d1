//! In-memory connection that answers with canned replies.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use redis::{ConnectionLike, ErrorKind, RedisError, RedisResult, Value};

/// Replies to commands in order and records each command's arguments.
///
/// Clones share the script, so a test can keep one handle and move another
/// into a driver.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnection {
    replies: Arc<Mutex<VecDeque<RedisResult<Value>>>>,
    sent: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedConnection {
    pub(crate) fn new(replies: impl IntoIterator<Item = Value>) -> Self {
        Self::from_results(replies.into_iter().map(Ok))
    }

    pub(crate) fn from_results(replies: impl IntoIterator<Item = RedisResult<Value>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            sent: Arc::default(),
        }
    }

    /// Commands received so far, name first.
    pub(crate) fn sent(&self) -> Vec<Vec<String>> {
        self.sent.lock().unwrap().clone()
    }
}

/// Arguments of a RESP-packed command: `*N`, then `$len` / value pairs.
fn unpack(packed: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(packed);
    let mut lines = text.split("\r\n").skip(1);
    let mut args = Vec::new();
    while let (Some(_len), Some(arg)) = (lines.next(), lines.next()) {
        args.push(arg.to_string());
    }
    args
}

impl ConnectionLike for ScriptedConnection {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        self.sent.lock().unwrap().push(unpack(cmd));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RedisError::from((ErrorKind::ClientError, "no reply queued"))))
    }

    fn req_packed_commands(
        &mut self,
        _cmd: &[u8],
        _offset: usize,
        _count: usize,
    ) -> RedisResult<Vec<Value>> {
        Err(RedisError::from((ErrorKind::ClientError, "pipelines are not scripted")))
    }

    fn get_db(&self) -> i64 {
        0
    }

    fn check_connection(&mut self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }
}

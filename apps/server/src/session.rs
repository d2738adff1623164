//! 会话管理模块
//!
//! An asynchronous request keeps its handler and the receiving end of its
//! response channel here, keyed by a UUID handed to the client. The client
//! drains responses by long polling; the session ends (and its handler is
//! cleaned up) once a terminal response has been delivered, when the client
//! closes it, when it sits idle past the timeout, or on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rpc::{Response, RpcError};
use search_core::RequestHandler;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use uuid::Uuid;

/// 查询会话
struct Session {
    handler: Mutex<Box<dyn RequestHandler>>,
    responses: tokio::sync::Mutex<UnboundedReceiver<Response>>,
    last_accessed: Mutex<Instant>,
}

impl Session {
    fn touch(&self) {
        *self.last_accessed.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(*self.last_accessed.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn cancel(&self) {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }

    fn cleanup(&self) {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner).cleanup();
    }
}

/// 会话管理器
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    session_timeout: Duration,
    /// How long one poll waits for the first response
    poll_timeout: Duration,
}

impl SessionManager {
    pub fn new(session_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_timeout,
            poll_timeout,
        }
    }

    fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned()?;
        session.touch();
        Some(session)
    }

    fn take(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id)
    }

    /// 创建会话
    pub fn open(&self, handler: Box<dyn RequestHandler>, responses: UnboundedReceiver<Response>) -> Uuid {
        let session_id = Uuid::new_v4();
        let session = Arc::new(Session {
            handler: Mutex::new(handler),
            responses: tokio::sync::Mutex::new(responses),
            last_accessed: Mutex::new(Instant::now()),
        });
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, session);
        debug!("session {} opened", session_id);
        session_id
    }

    /// 拉取响应
    ///
    /// Waits up to the poll timeout for the first response, then takes
    /// whatever else is already queued, at most `max` in total. Delivering a
    /// terminal response ends the session.
    pub async fn next_responses(&self, session_id: Uuid, max: usize) -> Result<Vec<Response>, RpcError> {
        let session = self.get(session_id).ok_or(RpcError::UnknownSession(session_id))?;
        let mut responses = session.responses.lock().await;
        let mut batch = Vec::new();

        let first = match tokio::time::timeout(self.poll_timeout, responses.recv()).await {
            Err(_) => return Ok(batch),
            Ok(None) => {
                drop(responses);
                self.end(session_id);
                return Err(RpcError::UnknownSession(session_id));
            }
            Ok(Some(response)) => response,
        };

        let mut terminal = first.is_terminal();
        batch.push(first);
        while !terminal && batch.len() < max.max(1) {
            match responses.try_recv() {
                Ok(response) => {
                    terminal = response.is_terminal();
                    batch.push(response);
                }
                Err(_) => break,
            }
        }
        drop(responses);

        if terminal {
            self.end(session_id);
        }
        Ok(batch)
    }

    /// 取消会话：a `Cancelled` response follows unless the query already ended.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.get(session_id) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// 删除会话
    pub fn close(&self, session_id: Uuid) -> bool {
        self.end(session_id)
    }

    fn end(&self, session_id: Uuid) -> bool {
        match self.take(session_id) {
            Some(session) => {
                session.cleanup();
                debug!("session {} closed", session_id);
                true
            }
            None => false,
        }
    }

    /// 关闭所有会话
    pub fn close_all(&self) -> usize {
        let sessions: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in &sessions {
            session.cleanup();
        }
        if !sessions.is_empty() {
            info!("Closed {} open session(s)", sessions.len());
        }
        sessions.len()
    }

    /// 清理过期会话
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, session)| session.idle_for(now) >= self.session_timeout)
            .map(|(id, _)| *id)
            .collect();

        let count = expired.into_iter().filter(|id| self.end(*id)).count();
        if count > 0 {
            info!("Reaped {} idle session(s)", count);
        }
        count
    }

    /// 获取活跃会话数
    pub fn active_sessions_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

//! WebSocket 实时分析通道
//!
//! 一条双工连接：写任务从 mpsc 取消息发送，读任务解析入站消息并按 type
//! 路由到最早登记的等待槽。连接断开（主动或被动）时所有等待槽立即失败。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::config::RealtimeSection;
use crate::core::AssistantError;
use crate::realtime::message::{decode_inbound, AnalysisKind, AnalysisRequest};

type Slot = oneshot::Sender<Result<Value, AssistantError>>;

/// 按类型排队的等待槽
#[derive(Default)]
struct Router {
    slots: Mutex<HashMap<AnalysisKind, VecDeque<(Uuid, Slot)>>>,
}

impl Router {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AnalysisKind, VecDeque<(Uuid, Slot)>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, kind: AnalysisKind, id: Uuid, slot: Slot) {
        self.lock().entry(kind).or_default().push_back((id, slot));
    }

    fn remove(&self, kind: AnalysisKind, id: Uuid) -> bool {
        let mut slots = self.lock();
        let Some(queue) = slots.get_mut(&kind) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|(slot_id, _)| *slot_id != id);
        before != queue.len()
    }

    /// 交给最早的仍在等待的槽；没有则返回 false
    fn resolve(&self, kind: AnalysisKind, payload: Value) -> bool {
        let mut slots = self.lock();
        let Some(queue) = slots.get_mut(&kind) else {
            return false;
        };
        while let Some((_, slot)) = queue.pop_front() {
            if slot.is_closed() {
                continue;
            }
            return slot.send(Ok(payload)).is_ok();
        }
        false
    }

    fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.lock().drain().flat_map(|(_, q)| q).collect();
        let n = drained.len();
        for (_, slot) in drained {
            let _ = slot.send(Err(AssistantError::Network(reason.to_string())));
        }
        n
    }

    fn pending(&self) -> usize {
        self.lock().values().map(|q| q.len()).sum()
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    /// 读任务退出前置位
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// 丢弃一条未投入使用的连接；不触碰共享的等待槽
    fn shutdown(self) {
        let _ = self.tx.send(WsMessage::Close(None));
        self.reader.abort();
    }
}

pub struct RealtimeChannel {
    url: String,
    request_timeout: Duration,
    router: Arc<Router>,
    conn: tokio::sync::Mutex<Option<Connection>>,
    /// 每次 close() 递增，进行中的握手据此放弃
    epoch: watch::Sender<u64>,
}

impl RealtimeChannel {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
            router: Arc::new(Router::default()),
            conn: tokio::sync::Mutex::new(None),
            epoch: watch::channel(0).0,
        }
    }

    /// 未配置 url 时返回 None
    pub fn from_config(cfg: &RealtimeSection) -> Option<Self> {
        cfg.url
            .as_ref()
            .filter(|u| !u.trim().is_empty())
            .map(|url| Self::new(url.clone(), Duration::from_secs(cfg.request_timeout_secs)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.as_ref().is_some_and(Connection::is_open)
    }

    /// 等待中的请求数
    pub fn pending(&self) -> usize {
        self.router.pending()
    }

    /// 建立连接；已连接时什么也不做
    ///
    /// 握手不持有连接锁，并受 request_timeout 限制；握手期间 close() 会使其失败。
    pub async fn connect(&self) -> Result<(), AssistantError> {
        if self.is_connected().await {
            return Ok(());
        }
        let mut epoch = self.epoch.subscribe();
        let handshake = tokio::time::timeout(self.request_timeout, self.handshake());
        let connection = tokio::select! {
            _ = epoch.changed() => return Err(AssistantError::Network("channel closed".to_string())),
            result = handshake => result.map_err(|_| {
                AssistantError::Network(format!(
                    "realtime connect to {} timed out after {} ms",
                    self.url,
                    self.request_timeout.as_millis()
                ))
            })??,
        };

        let mut conn = self.conn.lock().await;
        if epoch.has_changed().unwrap_or(true) {
            // 握手完成前通道已被关闭
            connection.shutdown();
            return Err(AssistantError::Network("channel closed".to_string()));
        }
        if conn.as_ref().is_some_and(Connection::is_open) {
            // 并发的 connect 已先完成
            connection.shutdown();
            return Ok(());
        }
        if let Some(stale) = conn.replace(connection) {
            stale.writer.abort();
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<Connection, AssistantError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| AssistantError::Network(format!("realtime connect to {} failed: {}", self.url, e)))?;
        tracing::info!(url = %self.url, "Realtime channel connected");

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let router = Arc::clone(&self.router);
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Realtime receive error: {}", e);
                        break;
                    }
                };
                match msg {
                    WsMessage::Text(text) => match decode_inbound(&text) {
                        Ok((kind, payload)) => {
                            if !router.resolve(kind, payload) {
                                tracing::debug!(kind = %kind, "Realtime result with no pending request dropped");
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring realtime message: {}", e),
                    },
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            reader_closed.store(true, Ordering::Release);
            let failed = router.fail_all("channel closed");
            tracing::info!(failed, "Realtime channel closed");
        });

        Ok(Connection {
            tx,
            reader,
            writer,
            closed,
        })
    }

    /// 发送分析请求，返回可等待、可取消的句柄
    pub async fn request(&self, request: AnalysisRequest) -> Result<PendingAnalysis, AssistantError> {
        self.connect().await?;
        let json = serde_json::to_string(&request)
            .map_err(|e| AssistantError::Protocol(format!("encode realtime request: {}", e)))?;

        let kind = request.kind();
        let id = Uuid::new_v4();
        let (slot, rx) = oneshot::channel();
        // 先登记再发送，回包再快也能找到槽
        self.router.register(kind, id, slot);

        let sent = match self.conn.lock().await.as_ref() {
            Some(c) => c.tx.send(WsMessage::Text(json)).is_ok(),
            None => false,
        };
        if !sent {
            self.router.remove(kind, id);
            return Err(AssistantError::Network("channel closed".to_string()));
        }
        tracing::debug!(kind = %kind, request_id = %id, "Realtime request sent");

        Ok(PendingAnalysis {
            id,
            kind,
            rx,
            router: Arc::clone(&self.router),
            timeout: self.request_timeout,
        })
    }

    pub async fn analyze_text(&self, text: &str) -> Result<Value, AssistantError> {
        self.request(AnalysisRequest::text(text)).await?.wait().await
    }

    pub async fn recognize_image(&self, image_url: &str) -> Result<Value, AssistantError> {
        self.request(AnalysisRequest::image(image_url)).await?.wait().await
    }

    /// 关闭连接，所有等待中的请求立即失败；之后可再次 connect
    pub async fn close(&self) {
        self.epoch.send_modify(|n| *n += 1);
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.tx.send(WsMessage::Close(None));
            conn.reader.abort();
            drop(conn.tx);
            tracing::info!(url = %self.url, "Realtime channel closing");
        }
        self.router.fail_all("channel closed");
    }
}

/// 一次分析请求的等待句柄
pub struct PendingAnalysis {
    id: Uuid,
    kind: AnalysisKind,
    rx: oneshot::Receiver<Result<Value, AssistantError>>,
    router: Arc<Router>,
    timeout: Duration,
}

impl PendingAnalysis {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    /// 等待结果；超时后移除等待槽
    pub async fn wait(self) -> Result<Value, AssistantError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AssistantError::Network("channel closed".to_string())),
            Err(_) => {
                self.router.remove(self.kind, self.id);
                Err(AssistantError::Timeout(self.kind.to_string()))
            }
        }
    }

    /// 放弃等待
    pub fn cancel(self) {
        self.router.remove(self.kind, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// 启动一个模拟服务端，每收到一条请求就交给 reply 生成回复（None 表示不回）
    async fn serve<F>(reply: F) -> String
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reply = Arc::new(reply);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = Arc::clone(&reply);
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if let WsMessage::Text(text) = msg {
                            let req: Value = serde_json::from_str(&text).unwrap();
                            for out in reply(req) {
                                if out == json!("close") {
                                    let _ = ws.close(None).await;
                                    return;
                                }
                                ws.send(WsMessage::Text(out.to_string())).await.unwrap();
                            }
                        }
                    }
                });
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_results_are_routed_by_type() {
        let url = serve(|req| match req["type"].as_str() {
            Some("textAnalysis") => vec![
                json!({"type": "weather", "x": 1}),
                json!({"type": "textAnalysis", "sentiment": "positive", "text": req["text"]}),
            ],
            _ => vec![json!({"type": "imageRecognition", "labels": ["cat"]})],
        })
        .await;
        let channel = RealtimeChannel::new(url, Duration::from_secs(5));

        let image = channel.request(AnalysisRequest::image("http://x/cat.png")).await.unwrap();
        let text = channel.request(AnalysisRequest::text("great day")).await.unwrap();
        let (image, text) = tokio::join!(image.wait(), text.wait());

        assert_eq!(image.unwrap(), json!({"labels": ["cat"]}));
        assert_eq!(text.unwrap(), json!({"sentiment": "positive", "text": "great day"}));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let url = serve(|_| vec![]).await;
        let channel = RealtimeChannel::new(url, Duration::from_secs(1));
        channel.connect().await.unwrap();
        channel.connect().await.unwrap();
        assert!(channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let url = serve(|_| vec![]).await;
        let channel = RealtimeChannel::new(url, Duration::from_millis(100));

        let err = channel.analyze_text("anyone?").await.unwrap_err();
        assert!(matches!(err, AssistantError::Timeout(ref k) if k == "textAnalysis"));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_slot() {
        let url = serve(|_| vec![]).await;
        let channel = RealtimeChannel::new(url, Duration::from_secs(5));
        let pending = channel.request(AnalysisRequest::text("x")).await.unwrap();
        assert_eq!(channel.pending(), 1);
        pending.cancel();
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let url = serve(|_| vec![]).await;
        let channel = RealtimeChannel::new(url, Duration::from_secs(30));
        let pending = channel.request(AnalysisRequest::text("x")).await.unwrap();

        channel.close().await;
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, AssistantError::Network(ref m) if m == "channel closed"));
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_server_close_fails_pending_and_reconnects() {
        let url = serve(|req| match req["type"].as_str() {
            Some("imageRecognition") => vec![json!("close")],
            _ => vec![json!({"type": "textAnalysis", "ok": true})],
        })
        .await;
        let channel = RealtimeChannel::new(url, Duration::from_secs(30));

        let err = channel.recognize_image("http://x/y.png").await.unwrap_err();
        assert!(matches!(err, AssistantError::Network(_)));

        // 下一次请求自动重连
        let mut attempts = 0;
        let ok = loop {
            attempts += 1;
            match channel.analyze_text("again").await {
                Ok(v) => break v,
                Err(_) if attempts < 5 => tokio::time::sleep(Duration::from_millis(20)).await,
                Err(e) => panic!("reconnect failed: {e}"),
            }
        };
        assert_eq!(ok, json!({"ok": true}));
    }

    /// 接受 TCP 连接但从不完成 WebSocket 握手
    async fn stalled_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let channel = RealtimeChannel::new(stalled_server().await, Duration::from_millis(100));

        let result = tokio::time::timeout(Duration::from_secs(3), channel.analyze_text("hi")).await;
        let err = result.expect("connect must be bounded").unwrap_err();
        assert!(matches!(err, AssistantError::Network(ref m) if m.contains("timed out")));

        let closed = tokio::time::timeout(Duration::from_secs(1), channel.close()).await;
        assert!(closed.is_ok());
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_interrupts_connect_in_progress() {
        let channel = Arc::new(RealtimeChannel::new(stalled_server().await, Duration::from_secs(30)));
        let connecting = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let closed = tokio::time::timeout(Duration::from_secs(1), channel.close()).await;
        assert!(closed.is_ok());
        let result = tokio::time::timeout(Duration::from_secs(1), connecting).await.unwrap().unwrap();
        assert!(matches!(result, Err(AssistantError::Network(ref m)) if m == "channel closed"));
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_error_is_network() {
        let channel = RealtimeChannel::new("ws://127.0.0.1:1", Duration::from_secs(1));
        assert!(matches!(channel.connect().await, Err(AssistantError::Network(_))));
    }
}

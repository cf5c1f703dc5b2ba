/// WebSocket handler for real-time message delivery.
/// Each authenticated connection is an actor registered under its
/// identity; inbound send intents are queued and routed in order.
use crate::auth::{bearer_credential, Session, SessionAuthenticator};
use crate::router::{Router, SendRequest};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 256;

/// Server configuration shared across handlers
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Send intents buffered per connection before new ones are dropped
    pub inbound_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Frame sent back when an inbound frame cannot be parsed
pub fn invalid_format_frame() -> String {
    json!({
        "event": "error",
        "data": { "error": "Invalid message format" }
    })
    .to_string()
}

/// WebSocket actor for one authenticated connection
pub struct WsSession {
    session: Session,
    router: web::Data<Router>,
    queue_capacity: usize,
    inbound: Option<mpsc::Sender<SendRequest>>,
}

impl WsSession {
    pub fn new(session: Session, router: web::Data<Router>, config: &ServerConfig) -> Self {
        WsSession {
            session,
            router,
            queue_capacity: config.inbound_queue_capacity.max(1),
            inbound: None,
        }
    }

    fn enqueue(&self, request: SendRequest) {
        let Some(inbound) = &self.inbound else {
            return;
        };

        match inbound.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "Inbound queue full for {}, dropping message",
                    self.session.identity()
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Inbound queue closed for {}", self.session.identity());
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!(
            "WebSocket connection started: {} ({})",
            self.session.identity(),
            self.session.connection_id()
        );

        // Outbound: registry -> socket
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                addr.do_send(OutboundFrame(frame));
            }
        });

        let router = self.router.clone();
        let identity = self.session.identity().to_string();
        let connection_id = self.session.connection_id();
        let _ = actix::spawn(async move {
            router.registry().register(&identity, connection_id, tx).await;
        });

        // Inbound: socket -> router, one intent at a time
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<SendRequest>(self.queue_capacity);
        self.inbound = Some(inbound_tx);
        let router = self.router.clone();
        let identity = self.session.identity().to_string();
        let _ = actix::spawn(async move {
            while let Some(request) = inbound_rx.recv().await {
                router.handle_send(Some(&identity), request).await;
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!(
            "WebSocket connection stopped: {} ({})",
            self.session.identity(),
            self.session.connection_id()
        );
        self.inbound = None;

        let router = self.router.clone();
        let identity = self.session.identity().to_string();
        let connection_id = self.session.connection_id();
        let _ = actix::spawn(async move {
            router.registry().unregister(&identity, connection_id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<SendRequest>(&text) {
                Ok(request) => self.enqueue(request),
                Err(e) => {
                    log::debug!(
                        "Failed to parse frame from {}: {}",
                        self.session.identity(),
                        e
                    );
                    ctx.text(invalid_format_frame());
                }
            },
            Ok(ws::Message::Ping(payload)) => {
                ctx.pong(&payload);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::error!("WebSocket error for {}: {}", self.session.identity(), e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct OutboundFrame(String);

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// WebSocket connection handler
/// GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    authenticator: web::Data<SessionAuthenticator>,
    router: web::Data<Router>,
    config: web::Data<ServerConfig>,
) -> actix_web::Result<HttpResponse> {
    let session = match authenticator.authenticate(bearer_credential(&req).as_deref()) {
        Ok(session) => session,
        Err(e) => {
            log::info!("Rejected WebSocket upgrade: {}", e);
            return Ok(HttpResponse::Unauthorized().json(json!({
                "error": "Unauthorized"
            })));
        }
    };

    ws::start(WsSession::new(session, router, &config), &req, stream)
}

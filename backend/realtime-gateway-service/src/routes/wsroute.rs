use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::events::{ClientEvent, ClientFrame};
use crate::websocket::handlers::run_connection;
use crate::websocket::{Connection, ConnectionId, Hub};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub identity: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

// Frame produced by the hub for this connection.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Outbound(String);

struct WsSession {
    connection_id: ConnectionId,
    room: String,
    hub: Hub,
    hb: Instant,
    outbound: Option<UnboundedReceiver<String>>,
    // Drained by the connection worker; dropping it stops the worker.
    inbound: Option<UnboundedSender<ClientEvent>>,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::info!(connection_id = %act.connection_id, room = %act.room, "websocket heartbeat timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&self, text: &str) {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "failed to parse websocket frame");
                return;
            }
        };

        let Some(inbound) = &self.inbound else {
            return;
        };
        if inbound.send(frame.into_event()).is_err() {
            tracing::warn!(connection_id = %self.connection_id, "connection worker gone, dropping frame");
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, room = %self.room, "websocket session started");
        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_message_stream(UnboundedReceiverStream::new(rx).map(Outbound));
        }

        let (tx, rx) = unbounded_channel();
        self.inbound = Some(tx);
        actix::spawn(run_connection(self.hub.clone(), self.connection_id, self.room.clone(), rx));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, room = %self.room, "websocket session stopped");
        // The worker leaves the room after draining queued events.
        self.inbound.take();
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.connection_id, "binary websocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// **Endpoint**: `GET /ws/{room}?identity=&name=&role=`
#[get("/ws/{room}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    room: web::Path<String>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let room = room.into_inner();
    let params = query.into_inner();
    let identity = params.identity.trim().to_string();
    if room.trim().is_empty() || identity.is_empty() {
        return Err(AppError::BadRequest("room and identity are required".into()).into());
    }

    let display_name = params.name.unwrap_or_else(|| identity.clone());
    let role = params.role.unwrap_or_default();
    let connection = Connection::new(room.clone(), identity, display_name, role);
    let connection_id = connection.id;

    // Registered before the upgrade so no frame for this connection is lost.
    let rx = state.hub.join_room(connection).await?;

    let session = WsSession {
        connection_id,
        room,
        hub: state.hub.clone(),
        hb: Instant::now(),
        outbound: Some(rx),
        inbound: None,
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            if let Err(leave_err) = state.hub.leave_room(connection_id).await {
                tracing::warn!(connection_id = %connection_id, error = %leave_err, "cleanup after failed upgrade");
            }
            Err(e)
        }
    }
}

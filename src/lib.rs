pub mod config;
pub mod connect;
pub mod dns;
pub mod error;
pub mod http;
pub mod policy;
pub mod protocol;
pub mod proxy;
pub mod socks5;
pub mod upstream;

#[cfg(target_arch = "wasm32")]
mod websocket;

pub use error::{Result, TunnelError};

#[cfg(target_arch = "wasm32")]
use std::sync::Arc;
#[cfg(target_arch = "wasm32")]
use worker::{console_error, event, Context, Env, Fetch, Request, Response, Url, WebSocketPair};

#[cfg(target_arch = "wasm32")]
#[event(fetch)]
async fn main(req: Request, env: Env, _: Context) -> worker::Result<Response> {
    use crate::config::SessionConfig;
    use crate::connect::WorkerConnector;
    use crate::proxy::{parse_early_data, run_tunnel};
    use crate::websocket::WebSocketStream;

    let config = Arc::new(SessionConfig::from_env(&env)?);

    let is_websocket = req
        .headers()
        .get("Upgrade")?
        .map(|up| up.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_websocket {
        return serve_decoy(&req, config.decoy_site.as_deref()).await;
    }

    // early data arrives on the subprotocol header, base64url-encoded
    let early_data = req.headers().get("sec-websocket-protocol")?;
    let early_data =
        parse_early_data(early_data).map_err(|e| worker::Error::RustError(e.to_string()))?;

    let pair = WebSocketPair::new()?;
    let server = pair.server;
    server.accept()?;

    wasm_bindgen_futures::spawn_local(async move {
        let events = match server.events() {
            Ok(events) => events,
            Err(err) => {
                console_error!("websocket events unavailable: {}", err);
                return;
            }
        };

        let socket = WebSocketStream::new(&server, events, early_data);
        if let Err(err) = run_tunnel(socket, config, &WorkerConnector).await {
            console_error!("session failed: {}", err);
            let _ = server.close(Some(1003), Some("Invalid request"));
        }
    });

    Response::from_websocket(pair.client)
}

// plain HTTP goes to the decoy site when one is configured, keeping the
// original path and query
#[cfg(target_arch = "wasm32")]
async fn serve_decoy(req: &Request, decoy_site: Option<&str>) -> worker::Result<Response> {
    let Some(decoy_site) = decoy_site else {
        return Response::error("Expected WebSocket upgrade", 426);
    };

    let base = Url::parse(decoy_site)?;
    let original = req.url()?;

    let mut target = Url::parse(&base.origin().ascii_serialization())?;
    target.set_path(original.path());
    target.set_query(original.query());

    Fetch::Url(target).send().await
}

//! # TM Server
//!
//! Accepts websocket connections on `/ws` and hands each one to the hub's client tasks. Any other
//! path is refused with `404 Not Found` during the handshake.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode
    }
};

use crate::hub::{
    client::{self, ClientParams},
    HubHandle
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Path of the websocket endpoint
pub const WS_PATH: &str = "/ws";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry server
pub struct TmServer {
    listener: TcpListener,
    hub: HubHandle,
    client_params: ClientParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TmServerError {
    #[error("Could not bind to {0}: {1}")]
    BindError(String, std::io::Error),

    #[error("Could not get the local address: {0}")]
    AddrError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TmServer {
    /// Bind the server to the given address.
    pub async fn bind(
        address: &str,
        hub: HubHandle,
        client_params: ClientParams
    ) -> Result<Self, TmServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TmServerError::BindError(address.into(), e))?;

        Ok(Self {
            listener,
            hub,
            client_params,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TmServerError> {
        self.listener.local_addr().map_err(TmServerError::AddrError)
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// Once signalled no new connections are accepted, and open connections get up to `grace` to
    /// close before they are aborted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        let mut conns = JoinSet::new();

        match self.local_addr() {
            Ok(a) => info!("TmServer listening on ws://{}{}", a, WS_PATH),
            Err(e) => warn!("TmServer listening on unknown address: {}", e)
        }

        loop {
            if *shutdown.borrow() {
                break
            }

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() {
                        break
                    }
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connection from {}", peer);
                        conns.spawn(handle_connection(
                            stream,
                            peer,
                            self.hub.clone(),
                            self.client_params.clone()
                        ));
                    },
                    Err(e) => warn!("Could not accept connection: {}", e)
                },
                Some(_) = conns.join_next(), if !conns.is_empty() => ()
            }
        }

        drop(self.listener);

        info!("TmServer stopping, waiting for {} connection(s)", conns.len());

        let drained = time::timeout(grace, async {
            while conns.join_next().await.is_some() {}
        }).await;

        if drained.is_err() {
            warn!("{} connection(s) did not close in {:?}, aborting", conns.len(), grace);
            conns.abort_all();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: HubHandle,
    params: ClientParams
) {
    let check_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == WS_PATH {
            Ok(resp)
        }
        else {
            let mut err = ErrorResponse::new(Some("Not Found".into()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    let handshake = accept_hdr_async_with_config(stream, check_path, Some(params.ws_config()));

    let ws = match time::timeout(params.write_wait(), handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("Websocket handshake with {} failed: {}", peer, e);
            return
        },
        Err(_) => {
            warn!("Websocket handshake with {} timed out", peer);
            return
        }
    };

    // Errors are logged by the connection itself
    client::serve_connection(ws, peer.to_string(), hub, params).await.ok();
}

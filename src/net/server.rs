//! One bound server instance.
//!
//! A [`RunningServer`] owns the accept loop for a single start attempt. The
//! listener throws it away on every restart and builds a new one from a fresh
//! [`ServerSetter`].

use std::io;
use std::net::SocketAddr;

use axum::Router;
use axum_server::Handle;
use tokio::task::JoinHandle;

use crate::net::listener::ListenerError;
use crate::net::setter::{Protocol, ProtocolDefinitions, ServerSetter};
use crate::net::tls;

pub struct RunningServer {
    name: String,
    local_addr: SocketAddr,
    handle: Handle,
    task: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    /// Bind and start serving. Returns once the socket is listening.
    pub async fn launch(
        setter: ServerSetter,
        definitions: Option<&ProtocolDefinitions>,
    ) -> Result<Self, ListenerError> {
        setter.check(definitions.is_some())?;
        let addr = setter.socket_addr().await?;
        let name = setter.display_name();
        let ServerSetter { protocol, handler, tls, .. } = setter;

        let app = match (protocol, definitions) {
            (Protocol::Rpc, Some(definitions)) => definitions(handler.unwrap_or_else(Router::new)),
            (_, _) => handler.ok_or_else(|| {
                ListenerError::Misconfigured(format!("listener {name}: no handler to serve"))
            })?,
        };
        let service = app.into_make_service_with_connect_info::<SocketAddr>();

        let handle = Handle::new();
        let task = match &tls {
            Some(tls) => {
                let rustls = tls::load_tls_config(tls).await.map_err(|source| ListenerError::Serve {
                    name: name.clone(),
                    source,
                })?;
                tokio::spawn(
                    axum_server::bind_rustls(addr, rustls)
                        .handle(handle.clone())
                        .serve(service),
                )
            }
            None => tokio::spawn(axum_server::bind(addr).handle(handle.clone()).serve(service)),
        };

        match handle.listening().await {
            Some(local_addr) => {
                tracing::info!(
                    listener = %name,
                    address = %local_addr,
                    protocol = ?protocol,
                    tls = tls.is_some(),
                    "Server listening"
                );
                Ok(Self { name, local_addr, handle, task })
            }
            // The server task ended before binding; its result says why.
            None => Err(ListenerError::Serve {
                source: exit_reason(task.await),
                name,
            }),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves when the server stops on its own. Any such stop is a failure.
    ///
    /// Must not be polled again after it has resolved.
    pub async fn wait(&mut self) -> ListenerError {
        ListenerError::Serve {
            name: self.name.clone(),
            source: exit_reason((&mut self.task).await),
        }
    }

    /// Stop accepting, let in-flight requests finish, and release the socket.
    pub async fn shutdown(self) -> Result<(), ListenerError> {
        self.handle.graceful_shutdown(None);
        match self.task.await {
            Ok(Ok(())) => {
                tracing::info!(listener = %self.name, address = %self.local_addr, "Server stopped");
                Ok(())
            }
            Ok(Err(source)) => Err(ListenerError::Serve { name: self.name, source }),
            Err(join) => Err(ListenerError::Unexpected(Box::new(join))),
        }
    }
}

fn exit_reason(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Error {
    match result {
        Ok(Ok(())) => io::Error::new(io::ErrorKind::Other, "server exited unexpectedly"),
        Ok(Err(err)) => err,
        Err(join) => io::Error::new(io::ErrorKind::Other, join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    fn setter(address: &str) -> ServerSetter {
        ServerSetter {
            name: "test".into(),
            address: address.into(),
            handler: Some(Router::new().route("/", get(|| async { "ok" }))),
            ..ServerSetter::new()
        }
    }

    #[tokio::test]
    async fn launch_binds_and_shutdown_releases() {
        let server = RunningServer::launch(setter("127.0.0.1:0"), None).await.unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);
        server.shutdown().await.unwrap();

        // The port is free again.
        let again = RunningServer::launch(setter(&addr.to_string()), None).await.unwrap();
        again.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn occupied_port_is_a_serve_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let err = RunningServer::launch(setter(&addr.to_string()), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::Serve { .. }), "{err}");
    }
}

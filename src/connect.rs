use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

// outbound dialing capability, injected into the session bridge
pub trait Connect {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Stream>>;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

#[cfg(target_arch = "wasm32")]
pub use wasm::WorkerConnector;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use super::*;
    use worker::{Delay, Socket};

    pub struct WorkerConnector;

    impl Connect for WorkerConnector {
        type Stream = Socket;

        async fn connect(&self, host: &str, port: u16) -> io::Result<Socket> {
            Socket::builder()
                .connect(host, port)
                .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))
        }

        async fn sleep(&self, duration: Duration) {
            Delay::from(duration).await;
        }
    }
}

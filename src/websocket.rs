use std::io::{Error, ErrorKind, Result};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, BytesMut};
use futures_util::Stream;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use worker::{EventStream, WebSocket, WebsocketEvent};

#[pin_project]
pub struct WebSocketStream<'a> {
    ws: &'a WebSocket,
    #[pin]
    events: EventStream<'a>,
    buffer: BytesMut,
    closed: bool,
}

impl<'a> WebSocketStream<'a> {
    pub fn new(ws: &'a WebSocket, events: EventStream<'a>, early_data: Option<Vec<u8>>) -> Self {
        let mut buffer = BytesMut::with_capacity(4096);
        // early data is the first chunk, ahead of any live frame
        if let Some(data) = early_data {
            buffer.put_slice(&data);
        }
        Self {
            ws,
            events,
            buffer,
            closed: false,
        }
    }
}

impl AsyncRead for WebSocketStream<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<()>> {
        let mut this = self.project();
        loop {
            if this.buffer.has_remaining() {
                let n = this.buffer.len().min(buf.remaining());
                buf.put_slice(&this.buffer.split_to(n));
                return Poll::Ready(Ok(()));
            }

            if *this.closed {
                return Poll::Ready(Ok(()));
            }

            match this.events.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(WebsocketEvent::Message(message)))) => {
                    // text frames carry no bytes and are skipped
                    if let Some(data) = message.bytes() {
                        this.buffer.put_slice(&data);
                    }
                }
                Poll::Ready(Some(Ok(WebsocketEvent::Close(_)))) => {
                    *this.closed = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(Error::new(ErrorKind::Other, e.to_string())));
                }
                Poll::Ready(None) => {
                    *this.closed = true;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl AsyncWrite for WebSocketStream<'_> {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Error::new(
                ErrorKind::BrokenPipe,
                "socket already closed",
            )));
        }
        if let Err(e) = this.ws.send_with_bytes(buf) {
            return Poll::Ready(Err(Error::new(ErrorKind::Other, e.to_string())));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.project();
        if *this.closed {
            return Poll::Ready(Err(Error::new(
                ErrorKind::BrokenPipe,
                "socket already closed",
            )));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.project();
        if !*this.closed {
            if let Err(e) = this.ws.close(None, Some("normal close")) {
                return Poll::Ready(Err(Error::new(ErrorKind::Other, e.to_string())));
            }
            *this.closed = true;
        }
        Poll::Ready(Ok(()))
    }
}

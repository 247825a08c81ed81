use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Wraps a connection's I/O so the server side disconnects a keep-alive
/// connection that has sat idle (no bytes read or written) for longer
/// than `timeout` (§4.7's 120 s idle bound). Activity resets the clock;
/// read-in-progress or write-in-progress connections are unaffected.
pub struct IdleTimeoutIo<T> {
  inner: T,
  timeout: Duration,
  deadline: Pin<Box<Sleep>>,
}

impl<T> IdleTimeoutIo<T> {
  pub fn new(inner: T, timeout: Duration) -> Self {
    Self { inner, timeout, deadline: Box::pin(tokio::time::sleep(timeout)) }
  }

  fn touch(&mut self) {
    self.deadline.as_mut().reset(Instant::now() + self.timeout);
  }

  fn timed_out(&mut self, cx: &mut Context<'_>) -> bool {
    self.deadline.as_mut().poll(cx).is_ready()
  }
}

fn idle_timeout_error() -> io::Error {
  io::Error::new(io::ErrorKind::TimedOut, "connection idle timeout")
}

impl<T: AsyncRead + Unpin> AsyncRead for IdleTimeoutIo<T> {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    if self.timed_out(cx) {
      return Poll::Ready(Err(idle_timeout_error()));
    }
    let before = buf.filled().len();
    let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
    if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
      self.touch();
    }
    poll
  }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IdleTimeoutIo<T> {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    if self.timed_out(cx) {
      return Poll::Ready(Err(idle_timeout_error()));
    }
    let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
    if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
      self.touch();
    }
    poll
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.inner).poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.inner).poll_shutdown(cx)
  }
}

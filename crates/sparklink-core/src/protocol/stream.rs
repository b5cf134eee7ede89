use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream the session talks over (serial port, pipe, TCP bridge)
///
/// Ordered and reliable; port setup happens before it gets here.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("failed to install log subscriber: {_0}")]
    Logging(#[error(not(source))] String),
    #[display("storage backend could not be created")]
    Storage,
    #[cfg_attr(feature = "s3", allow(dead_code))]
    #[display("storage backend `{_0}` is not compiled in")]
    Unsupported(#[error(not(source))] &'static str),
    #[display("failed to bind {_0}")]
    Bind(#[error(not(source))] std::net::SocketAddr),
    #[display("server error")]
    Serve,
    #[display("cache synchronization failed")]
    Sync,
}

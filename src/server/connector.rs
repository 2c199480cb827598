use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{future, Async, Future, Poll, Stream};
use futures::sync::oneshot;
use futures_cpupool::CpuPool;
use tokio_core::net::TcpListener;
use tokio_core::reactor::{Handle, Remote};

use crate::config::{ListenerConfig, Scheme};
use crate::error::Error;
use super::{Handler, Proto};


pub(crate) type StopHandle = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Listening side of the transport, created by `ConnectorFactory`
pub struct ServerConnector {
    config: Arc<ListenerConfig>,
    remote: Remote,
    pool: CpuPool,
    stop: StopHandle,
}

/// Resolves to the bound address once the listening socket is ready
pub struct ServerConnectorFuture {
    receiver: oneshot::Receiver<Result<SocketAddr, Error>>,
}

pub(crate) fn stop(handle: &StopHandle) -> bool {
    let sender = handle.lock().unwrap_or_else(|e| e.into_inner()).take();
    match sender {
        Some(sender) => sender.send(()).is_ok(),
        None => false,
    }
}

fn serve(handle: &Handle, listener: TcpListener,
    config: Arc<ListenerConfig>, handler: Arc<dyn Handler>, pool: CpuPool,
    stop: oneshot::Receiver<()>)
    -> Box<dyn Future<Item=(), Error=()>>
{
    let handle = handle.clone();
    let accept = listener.incoming()
        .map_err(|e| error!("Error accepting connection: {}", e))
        .for_each(move |(socket, peer_addr)| {
            debug!("Accepted connection from {}", peer_addr);
            let proto = Proto::new(socket, peer_addr, &config,
                handler.clone(), pool.clone(), &handle);
            handle.spawn(proto.map_err(move |e| {
                debug!("Connection from {} failed: {}", peer_addr, e);
            }));
            Ok(())
        });
    Box::new(accept.select(stop.then(|_| Ok(())))
        .map(|_| info!("Listener stopped"))
        .map_err(|_| ()))
}

impl ServerConnector {
    pub(crate) fn new(config: Arc<ListenerConfig>, remote: Remote,
        pool: CpuPool)
        -> ServerConnector
    {
        ServerConnector {
            config: config,
            remote: remote,
            pool: pool,
            stop: Arc::new(Mutex::new(None)),
        }
    }
    pub(crate) fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
    pub fn config(&self) -> &Arc<ListenerConfig> {
        &self.config
    }

    /// Binds the listening socket and serves every connection with `handler`
    ///
    /// Starting an already started connector stops the previous listener.
    pub fn start<H: Handler>(&self, handler: H) -> ServerConnectorFuture {
        let (tx, rx) = oneshot::channel();
        if self.config.scheme == Scheme::Https {
            tx.send(Err(Error::UnsupportedScheme)).ok();
            return ServerConnectorFuture { receiver: rx };
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let previous = self.stop.lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(stop_tx);
        if let Some(previous) = previous {
            previous.send(()).ok();
        }
        let config = self.config.clone();
        let pool = self.pool.clone();
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.remote.spawn(move |handle| {
            let addr = config.address();
            let listener = match TcpListener::bind(&addr, handle) {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Can't bind {}: {}", addr, e);
                    tx.send(Err(e.into())).ok();
                    return Box::new(future::ok::<(), ()>(()))
                        as Box<dyn Future<Item=(), Error=()>>;
                }
            };
            match listener.local_addr() {
                Ok(local) => {
                    info!("Listening on {} (HTTP/{})", local,
                          config.version.as_option());
                    tx.send(Ok(local)).ok();
                }
                Err(e) => {
                    tx.send(Err(e.into())).ok();
                    return Box::new(future::ok::<(), ()>(()))
                        as Box<dyn Future<Item=(), Error=()>>;
                }
            }
            serve(handle, listener, config, handler, pool, stop_rx)
        });
        ServerConnectorFuture { receiver: rx }
    }

    /// Stops accepting connections, returns false if it wasn't started
    ///
    /// Established connections are served until they close.
    pub fn stop(&self) -> bool {
        stop(&self.stop)
    }
}

impl Future for ServerConnectorFuture {
    type Item = SocketAddr;
    type Error = Error;
    fn poll(&mut self) -> Poll<SocketAddr, Error> {
        match self.receiver.poll() {
            Ok(Async::Ready(Ok(addr))) => Ok(Async::Ready(addr)),
            Ok(Async::Ready(Err(e))) => Err(e),
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(oneshot::Canceled) => Err(Error::Canceled),
        }
    }
}

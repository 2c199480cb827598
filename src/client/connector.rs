use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use futures::{Async, Future, Poll, Stream};
use futures::sync::{mpsc, oneshot};
use tokio_core::net::{TcpStream, TcpStreamNew};
use tokio_core::reactor::{Handle, Remote};
use url::{Host, Url};

use crate::config::{Scheme, SenderConfig};
use crate::error::Error;
use super::{Queued, Request, ResponseFuture, Proto};


pub(crate) enum Command {
    Send(Queued),
    Close,
}

/// Sending side of the transport, created by `ConnectorFactory`
///
/// Requests to the same address reuse the connection. Requests for a
/// different address wait until the current connection is closed.
pub struct HttpClientConnector {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<SenderConfig>,
}

enum Conn {
    Idle,
    Connecting(SocketAddr, TcpStreamNew),
    Connected(SocketAddr, Proto<TcpStream>),
}

/// Runs on the reactor, owns the connection of a single connector
struct Dispatcher {
    commands: mpsc::UnboundedReceiver<Command>,
    commands_done: bool,
    closing: bool,
    queue: VecDeque<Queued>,
    conn: Conn,
    config: Arc<SenderConfig>,
    handle: Handle,
}

fn resolve(url: &Url) -> Result<SocketAddr, Error> {
    let port = url.port_or_known_default().ok_or(Error::UnsupportedScheme)?;
    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Domain(name)) => {
            (name, port).to_socket_addrs()?.next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound,
                    format!("no address for {:?}", name)).into())
        }
        None => Err(url::ParseError::EmptyHost.into()),
    }
}

fn fail_all(queue: VecDeque<Queued>) {
    for queued in queue {
        queued.sender.send(Err(Error::Closed)).ok();
    }
}

impl HttpClientConnector {
    pub(crate) fn new(config: Arc<SenderConfig>, remote: &Remote)
        -> HttpClientConnector
    {
        let (tx, rx) = mpsc::unbounded();
        let cfg = config.clone();
        remote.spawn(move |handle| Dispatcher {
            commands: rx,
            commands_done: false,
            closing: false,
            queue: VecDeque::new(),
            conn: Conn::Idle,
            config: cfg,
            handle: handle.clone(),
        });
        HttpClientConnector {
            commands: tx,
            config: config,
        }
    }
    pub(crate) fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }
    pub fn config(&self) -> &Arc<SenderConfig> {
        &self.config
    }

    /// Sends a request, the future resolves when the response head arrives
    ///
    /// The host name is resolved on the calling thread.
    pub fn send(&self, request: Request) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        let future = ResponseFuture::new(rx);
        if self.config.scheme == Scheme::Https
            || request.url().scheme() != "http"
        {
            tx.send(Err(Error::UnsupportedScheme)).ok();
            return future;
        }
        let addr = match resolve(request.url()) {
            Ok(addr) => addr,
            Err(e) => {
                tx.send(Err(e)).ok();
                return future;
            }
        };
        request.prepare();
        let queued = Queued { request: request, sender: tx, addr: addr };
        if let Err(e) = self.commands.unbounded_send(Command::Send(queued)) {
            if let Command::Send(queued) = e.into_inner() {
                queued.sender.send(Err(Error::Closed)).ok();
            }
        }
        future
    }

    /// Lets in-flight requests finish and closes the connection
    ///
    /// Requests sent afterwards fail with `Error::Closed`.
    pub fn close(&self) {
        self.commands.unbounded_send(Command::Close).ok();
    }
}

impl Dispatcher {
    fn receive(&mut self) {
        while !self.commands_done {
            match self.commands.poll() {
                Ok(Async::Ready(Some(Command::Send(queued)))) => {
                    if self.closing {
                        queued.sender.send(Err(Error::Closed)).ok();
                    } else {
                        self.queue.push_back(queued);
                    }
                }
                Ok(Async::Ready(Some(Command::Close))) => {
                    debug!("Client connector is closing");
                    self.closing = true;
                }
                Ok(Async::Ready(None)) | Err(()) => {
                    self.commands_done = true;
                }
                Ok(Async::NotReady) => break,
            }
        }
    }
    /// Nothing more can arrive once the queue drains
    fn is_finishing(&self) -> bool {
        self.closing || self.commands_done
    }
}

impl Future for Dispatcher {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        self.receive();
        loop {
            match mem::replace(&mut self.conn, Conn::Idle) {
                Conn::Idle => {
                    if self.closing {
                        fail_all(mem::replace(&mut self.queue,
                                              VecDeque::new()));
                    }
                    match self.queue.front().map(|q| q.addr) {
                        Some(addr) => {
                            debug!("Connecting to {}", addr);
                            self.conn = Conn::Connecting(addr,
                                TcpStream::connect(&addr, &self.handle));
                        }
                        None if self.is_finishing() => {
                            return Ok(Async::Ready(()));
                        }
                        None => return Ok(Async::NotReady),
                    }
                }
                Conn::Connecting(addr, mut future) => {
                    match future.poll() {
                        Ok(Async::Ready(sock)) => {
                            debug!("Connected to {}", addr);
                            let proto = Proto::new(sock, &self.config,
                                                   &self.handle);
                            self.conn = Conn::Connected(addr, proto);
                        }
                        Ok(Async::NotReady) => {
                            if self.closing {
                                fail_all(mem::replace(&mut self.queue,
                                                      VecDeque::new()));
                                return Ok(Async::Ready(()));
                            }
                            self.conn = Conn::Connecting(addr, future);
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            info!("Can't connect to {}: {}", addr, e);
                            if let Some(queued) = self.queue.pop_front() {
                                queued.sender.send(Err(e.into())).ok();
                            }
                        }
                    }
                }
                Conn::Connected(addr, mut proto) => {
                    while self.queue.front().map_or(false, |q| q.addr == addr)
                    {
                        if let Some(queued) = self.queue.pop_front() {
                            proto.send(queued);
                        }
                    }
                    if self.closing || !self.queue.is_empty() {
                        proto.begin_close();
                    }
                    let result = proto.poll();
                    match result {
                        Ok(Async::NotReady) => {
                            self.conn = Conn::Connected(addr, proto);
                            return Ok(Async::NotReady);
                        }
                        Ok(Async::Ready(())) => {
                            debug!("Connection to {} closed", addr);
                        }
                        Err(e) => {
                            info!("Connection to {} failed: {}", addr, e);
                        }
                    }
                    let mut left = proto.take_queue();
                    drop(proto);
                    if self.closing {
                        fail_all(left);
                    } else {
                        left.extend(self.queue.drain(..));
                        self.queue = left;
                    }
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        fail_all(mem::replace(&mut self.queue, VecDeque::new()));
    }
}

#[cfg(test)]
mod test {
    use url::Url;
    use super::resolve;

    #[test]
    fn resolve_literal_hosts() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(resolve(&url).unwrap(), "127.0.0.1:8080".parse().unwrap());
        let url = Url::parse("http://[::1]/").unwrap();
        assert_eq!(resolve(&url).unwrap(), "[::1]:80".parse().unwrap());
    }
}

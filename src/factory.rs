//! Entry point owning the reactor thread and the handler pool
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures::Future;
use futures::sync::{mpsc as channel, oneshot};
use futures_cpupool::{Builder, CpuPool};
use tokio_core::reactor::{Core, Remote};

use crate::client::connector::Command;
use crate::client::HttpClientConnector;
use crate::config::{FactoryConfig, ListenerConfig, SenderConfig};
use crate::error::{Error, ErrorKind};
use crate::server::connector::{self, StopHandle};
use crate::server::ServerConnector;


/// Creates server and client connectors sharing one event loop
///
/// Handlers run on a thread pool, never on the event loop. Dropping the
/// factory shuts everything down.
pub struct ConnectorFactory {
    remote: Remote,
    pool: CpuPool,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    servers: Mutex<Vec<StopHandle>>,
    clients: Mutex<Vec<channel::UnboundedSender<Command>>>,
}

impl ConnectorFactory {
    /// Starts a factory with the default configuration
    pub fn new() -> Result<ConnectorFactory, Error> {
        ConnectorFactory::with_config(&FactoryConfig::new())
    }

    /// Starts the event loop thread and the handler pool
    pub fn with_config(config: &FactoryConfig)
        -> Result<ConnectorFactory, Error>
    {
        let (remote_tx, remote_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("http-transport-loop".into())
            .spawn(move || {
                let mut core = match Core::new() {
                    Ok(core) => core,
                    Err(e) => {
                        remote_tx.send(Err(e)).ok();
                        return;
                    }
                };
                remote_tx.send(Ok(core.remote())).ok();
                core.run(stop_rx.then(|_| Ok::<(), ()>(()))).ok();
                debug!("Event loop finished");
            })?;
        let remote = match remote_rx.recv() {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(Error::Canceled),
        };
        let pool = Builder::new()
            .pool_size(config.handler_threads)
            .name_prefix("http-handler-")
            .create();
        Ok(ConnectorFactory {
            remote: remote,
            pool: pool,
            stop: Some(stop_tx),
            thread: Some(thread),
            servers: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
        })
    }

    /// Returns a connector that starts listening on `ServerConnector::start`
    pub fn create_server_connector(&self, config: Arc<ListenerConfig>)
        -> ServerConnector
    {
        let connector = ServerConnector::new(config,
            self.remote.clone(), self.pool.clone());
        self.servers.lock().unwrap_or_else(|e| e.into_inner())
            .push(connector.stop_handle());
        connector
    }

    /// Returns a connector that sends requests with `config`
    pub fn create_client_connector(&self, config: Arc<SenderConfig>)
        -> HttpClientConnector
    {
        let connector = HttpClientConnector::new(config, &self.remote);
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
            .push(connector.commands());
        connector
    }

    /// Stops listeners, closes client connections and stops the event loop
    ///
    /// Exchanges still in flight fail with `ConnectionClosed`. Calling it
    /// more than once has no effect.
    pub fn shutdown(&mut self) {
        let stop = match self.stop.take() {
            Some(stop) => stop,
            None => return,
        };
        for server in self.servers.lock()
            .unwrap_or_else(|e| e.into_inner()).drain(..)
        {
            connector::stop(&server);
        }
        for client in self.clients.lock()
            .unwrap_or_else(|e| e.into_inner()).drain(..)
        {
            client.unbounded_send(Command::Close).ok();
        }
        stop.send(()).ok();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Shutdown: {}", ErrorKind::ShutdownInterrupted);
            }
        }
        info!("Connector factory is shut down");
    }
}

impl Drop for ConnectorFactory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::ConnectorFactory;

    #[test]
    fn shutdown_twice() {
        let mut factory = ConnectorFactory::new().unwrap();
        factory.shutdown();
        factory.shutdown();
    }
}

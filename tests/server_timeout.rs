extern crate env_logger;
extern crate futures;
extern crate tk_http_transport;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::Future;

use tk_http_transport::{Chunk, ConnectorFactory, ListenerConfig, Request};
use tk_http_transport::{SenderConfig, Status, Version};
use tk_http_transport::server;


fn start_server(factory: &ConnectorFactory) -> SocketAddr {
    let config = ListenerConfig::new()
        .http_version(Version::Http2)
        .socket_idle_timeout(Duration::from_millis(100))
        .done();
    let connector = factory.create_server_connector(config);
    // never responds, the idle timeout does
    connector.start(|req: server::Request, _: server::Responder| {
        let _ = req;
    }).wait().unwrap()
}

fn check_timeout(sender: &mut SenderConfig) {
    let _ = env_logger::init();
    let factory = ConnectorFactory::new().unwrap();
    let addr = start_server(&factory);
    let client = factory.create_client_connector(sender
        .socket_idle_timeout(Duration::from_millis(500_000))
        .done());
    let started = Instant::now();
    let request = Request::new("GET",
        &format!("http://{}/timeout", addr)).unwrap();
    let response = client.send(request).wait().unwrap();
    let elapsed = started.elapsed();
    assert_eq!(response.status(), Status::GatewayTimeout);
    assert_eq!(response.code(), 504);
    assert_eq!(response.text().unwrap(), "Server time out");
    assert!(elapsed >= Duration::from_millis(90), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "elapsed {:?}", elapsed);
}

#[test]
fn prior_knowledge() {
    check_timeout(SenderConfig::new()
        .set_option("httpVersion", "2.0").unwrap()
        .set_option("forceHttp2", "true").unwrap());
}

#[test]
fn upgrade() {
    check_timeout(SenderConfig::new().http_version(Version::Http2));
}

#[test]
fn http11() {
    check_timeout(SenderConfig::new().http_version(Version::Http11));
}

fn check_stalled_upload(sender: &mut SenderConfig) {
    let _ = env_logger::init();
    let factory = ConnectorFactory::new().unwrap();
    let addr = start_server(&factory);
    let client = factory.create_client_connector(sender
        .socket_idle_timeout(Duration::from_millis(500_000))
        .done());
    let mut request = Request::new("POST",
        &format!("http://{}/upload", addr)).unwrap();
    let body = request.streaming_body();
    let response = client.send(request);
    // the rest of the body never comes
    body.push(Chunk::new("partial")).unwrap();
    let response = response.wait().unwrap();
    assert_eq!(response.code(), 504);
    assert_eq!(response.text().unwrap(), "Server time out");
}

#[test]
fn stalled_upload_http11() {
    check_stalled_upload(SenderConfig::new().http_version(Version::Http11));
}

#[test]
fn stalled_upload_prior_knowledge() {
    check_stalled_upload(SenderConfig::new().force_http2(true));
}

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::enums::Status;
use crate::message::ResponseHead;


/// Body of the response synthesized when the connection idles out
pub const SERVER_TIMEOUT_MESSAGE: &'static str = "Server time out";

const PART1: &'static str = "\
    <!DOCTYPE html>\
    <html>\
        <head>\
            <title>\
    ";
const PART2: &'static str = "\
            </title>\
        </head>\
        <body>\
            <h1>\
    ";
const PART3: &'static str = concat!("\
            </h1>\
            <hr>\
            <p>Yours failthfully,<br>\
                tk-http-transport/", env!("CARGO_PKG_VERSION"), "\
            </p>\
        </body>\
    </html>\
    ");

/// A response generated by the transport itself
///
/// Used for the idle timeout response and for requests that can't be
/// parsed at all.
#[derive(Debug, Clone)]
pub struct SimpleErrorPage {
    status: Status,
    content_type: &'static str,
    body: Bytes,
}

impl SimpleErrorPage {
    /// Small html page naming the status
    pub fn new(status: Status) -> SimpleErrorPage {
        let body = format!("{p1}{code:03} {reason}{p2}{code:03} {reason}{p3}",
            code=status.code(), reason=status.reason(),
            p1=PART1, p2=PART2, p3=PART3);
        SimpleErrorPage {
            status: status,
            content_type: "text/html",
            body: Bytes::from(body),
        }
    }
    /// `504 Gateway Timeout` with a plain text body
    pub fn timeout() -> SimpleErrorPage {
        SimpleErrorPage {
            status: Status::GatewayTimeout,
            content_type: "text/plain",
            body: Bytes::from_static(SERVER_TIMEOUT_MESSAGE.as_bytes()),
        }
    }
    pub fn status(&self) -> Status {
        self.status
    }
    pub fn head(&self) -> ResponseHead {
        let mut head = ResponseHead::new(self.status);
        head.headers.add("Content-Type", self.content_type);
        head.headers.add("Content-Length", self.body.len().to_string());
        head
    }
    /// The whole body as a single last chunk
    pub fn body(&self) -> Chunk {
        Chunk::last(self.body.clone())
    }
}

#[cfg(test)]
mod test {
    use super::{SimpleErrorPage, SERVER_TIMEOUT_MESSAGE};

    #[test]
    fn timeout_page() {
        let page = SimpleErrorPage::timeout();
        let head = page.head();
        assert_eq!(head.code, 504);
        assert_eq!(head.content_length(), Some(15));
        assert_eq!(page.body().data(), SERVER_TIMEOUT_MESSAGE.as_bytes());
        assert!(page.body().is_last());
    }

    #[test]
    fn html_page() {
        let page = SimpleErrorPage::new(super::Status::BadRequest);
        let body = page.body();
        let text = String::from_utf8_lossy(body.data());
        assert!(text.contains("<title>400 Bad Request</title>"));
        assert_eq!(page.head().content_length(), Some(body.len() as u64));
    }
}

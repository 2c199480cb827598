/// Enum with some HTTP Status codes.
///
/// Codes without a named variant are kept in `Status::Raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue,
    SwitchingProtocol,
    Ok,
    Created,
    Accepted,
    NoContent,
    MovedPermanently,
    Found,
    NotModified,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RequestTimeout,
    LengthRequired,
    RequestEntityTooLarge,
    ExpectationFailed,
    UpgradeRequired,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    VersionNotSupported,
    Raw(u16),
}

impl Status {
    pub fn from_code(code: u16) -> Status {
        use self::Status::*;
        match code {
            100 => Continue,
            101 => SwitchingProtocol,
            200 => Ok,
            201 => Created,
            202 => Accepted,
            204 => NoContent,
            301 => MovedPermanently,
            302 => Found,
            304 => NotModified,
            400 => BadRequest,
            401 => Unauthorized,
            403 => Forbidden,
            404 => NotFound,
            405 => MethodNotAllowed,
            408 => RequestTimeout,
            411 => LengthRequired,
            413 => RequestEntityTooLarge,
            417 => ExpectationFailed,
            426 => UpgradeRequired,
            500 => InternalServerError,
            501 => NotImplemented,
            502 => BadGateway,
            503 => ServiceUnavailable,
            504 => GatewayTimeout,
            505 => VersionNotSupported,
            x => Raw(x),
        }
    }

    pub fn code(&self) -> u16 {
        use self::Status::*;
        match *self {
            Continue                => 100,
            SwitchingProtocol       => 101,
            Ok                      => 200,
            Created                 => 201,
            Accepted                => 202,
            NoContent               => 204,
            MovedPermanently        => 301,
            Found                   => 302,
            NotModified             => 304,
            BadRequest              => 400,
            Unauthorized            => 401,
            Forbidden               => 403,
            NotFound                => 404,
            MethodNotAllowed        => 405,
            RequestTimeout          => 408,
            LengthRequired          => 411,
            RequestEntityTooLarge   => 413,
            ExpectationFailed       => 417,
            UpgradeRequired         => 426,
            InternalServerError     => 500,
            NotImplemented          => 501,
            BadGateway              => 502,
            ServiceUnavailable      => 503,
            GatewayTimeout          => 504,
            VersionNotSupported     => 505,
            Raw(code)               => code,
        }
    }

    pub fn reason(&self) -> &'static str {
        use self::Status::*;
        match *self {
            Continue                => "Continue",
            SwitchingProtocol       => "Switching Protocols",
            Ok                      => "OK",
            Created                 => "Created",
            Accepted                => "Accepted",
            NoContent               => "No Content",
            MovedPermanently        => "Moved Permanently",
            Found                   => "Found",
            NotModified             => "Not Modified",
            BadRequest              => "Bad Request",
            Unauthorized            => "Unauthorized",
            Forbidden               => "Forbidden",
            NotFound                => "Not Found",
            MethodNotAllowed        => "Method Not Allowed",
            RequestTimeout          => "Request Timeout",
            LengthRequired          => "Length Required",
            RequestEntityTooLarge   => "Request Entity Too Large",
            ExpectationFailed       => "Expectation Failed",
            UpgradeRequired         => "Upgrade Required",
            InternalServerError     => "Internal Server Error",
            NotImplemented          => "Not Implemented",
            BadGateway              => "Bad Gateway",
            ServiceUnavailable      => "Service Unavailable",
            GatewayTimeout          => "Gateway Timeout",
            VersionNotSupported     => "HTTP Version Not Supported",
            Raw(_)                  => "Unknown",
        }
    }

    /// Responses with 1xx, 204 and 304 never carry a body
    pub fn has_body(&self) -> bool {
        let code = self.code();
        !((code >= 100 && code < 200) || code == 204 || code == 304)
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Status {
        Status::from_code(code)
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn codes() {
        assert_eq!(Status::from_code(504), Status::GatewayTimeout);
        assert_eq!(Status::GatewayTimeout.reason(), "Gateway Timeout");
        assert_eq!(Status::from_code(599).code(), 599);
        assert!(!Status::NoContent.has_body());
        assert!(Status::Ok.has_body());
    }
}

use std::fmt;
use std::str::FromStr;

use crate::error::Error;


/// Enum reprsenting HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    Http10,
    Http11,
    Http2,
}

impl Version {
    /// Converts the minor version reported by `httparse`
    pub fn from_httparse(v: u8) -> Version {
        match v {
            0 => Version::Http10,
            // httparse only accepts HTTP/1.0 and HTTP/1.1
            _ => Version::Http11,
        }
    }
    /// Version string as used in configuration (`1.1`, `2.0`)
    pub fn as_option(&self) -> &'static str {
        match *self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
            Version::Http2 => "2.0",
        }
    }
}

impl FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Version, Error> {
        match s.trim() {
            "1.0" => Ok(Version::Http10),
            "1.1" => Ok(Version::Http11),
            "2" | "2.0" => Ok(Version::Http2),
            _ => Err(Error::UnsupportedVersion),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
            Version::Http2 => f.write_str("HTTP/2.0"),
        }
    }
}

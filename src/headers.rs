use std::slice;


/// Header mapping: name to the ordered list of its values
///
/// Lookup is case-insensitive, the case of the first inserted name is kept
/// for serialization. Insertion order of names is preserved too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

/// Iterator over `(name, value)` pairs of `Headers`
pub struct Iter<'a> {
    entries: slice::Iter<'a, (String, Vec<String>)>,
    current: Option<(&'a str, slice::Iter<'a, String>)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }
    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|&(ref n, _)| n.eq_ignore_ascii_case(name))
    }
    /// Appends a value, keeping earlier values of the same header
    pub fn add<N, V>(&mut self, name: N, value: V)
        where N: Into<String> + AsRef<str>, V: Into<String>
    {
        match self.position(name.as_ref()) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name.into(), vec![value.into()])),
        }
    }
    /// Replaces all values of the header
    pub fn set<N, V>(&mut self, name: N, value: V)
        where N: Into<String> + AsRef<str>, V: Into<String>
    {
        match self.position(name.as_ref()) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((name.into(), vec![value.into()])),
        }
    }
    /// First value of the header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].1.first())
            .map(|v| &v[..])
    }
    /// All values of the header in the order they were added
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1[..],
            None => &[],
        }
    }
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }
    /// Removes the header returning its values
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.position(name) {
            Some(idx) => self.entries.remove(idx).1,
            None => Vec::new(),
        }
    }
    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// Iterates over every `(name, value)` pair
    pub fn iter(&self) -> Iter {
        Iter { entries: self.entries.iter(), current: None }
    }
    /// True if any value of the (comma-separated) header contains `token`
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);
    fn next(&mut self) -> Option<(&'a str, &'a str)> {
        loop {
            if let Some(&mut (name, ref mut values)) = self.current.as_mut() {
                if let Some(value) = values.next() {
                    return Some((name, &value[..]));
                }
            }
            let &(ref name, ref values) = self.entries.next()?;
            self.current = Some((&name[..], values.iter()));
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;
    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

pub fn is_transfer_encoding(val: &str) -> bool {
    val.eq_ignore_ascii_case("Transfer-Encoding")
}

pub fn is_content_length(val: &str) -> bool {
    val.eq_ignore_ascii_case("Content-Length")
}

pub fn is_connection(val: &str) -> bool {
    val.eq_ignore_ascii_case("Connection")
}

pub fn is_expect(val: &str) -> bool {
    val.eq_ignore_ascii_case("Expect")
}

/// Headers that are meaningful for a single HTTP/1.x hop only
///
/// These must not be forwarded into HTTP/2 header blocks.
pub fn is_hop_by_hop(val: &str) -> bool {
    is_connection(val) || is_transfer_encoding(val)
        || val.eq_ignore_ascii_case("Keep-Alive")
        || val.eq_ignore_ascii_case("Upgrade")
        || val.eq_ignore_ascii_case("HTTP2-Settings")
        || val.eq_ignore_ascii_case("Proxy-Connection")
}

fn is_space(ch: u8) -> bool {
    matches!(ch, b'\r' | b'\n' | b' ' | b'\t')
}

// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
fn is_token(val: &[u8], token: &[u8]) -> bool {
    let start = match val.iter().position(|&ch| !is_space(ch)) {
        Some(x) => x,
        None => return false,
    };
    let end = val.iter().rposition(|&ch| !is_space(ch)).unwrap_or(start) + 1;
    val[start..end].eq_ignore_ascii_case(token)
}

pub fn is_close(val: &[u8]) -> bool {
    is_token(val, b"close")
}

pub fn is_chunked(val: &[u8]) -> bool {
    is_token(val, b"chunked")
}

pub fn is_continue(val: &[u8]) -> bool {
    is_token(val, b"100-continue")
}

//! Scrubbing secret values out of log output.

use std::borrow::Cow;
use std::io;

use tracing_subscriber::fmt::MakeWriter;

use super::SecretStore;

/// What every secret occurrence is replaced with.
pub const CENSORED: &[u8] = b"CENSORED";

/// Replaces every occurrence of `needle` in `haystack`, or returns `None`
/// if there is none. An empty needle never matches.
pub(crate) fn replace_all(haystack: &[u8], needle: &[u8], with: &[u8]) -> Option<Vec<u8>> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    let mut found = false;
    while let Some(pos) = rest.windows(needle.len()).position(|w| w == needle) {
        found = true;
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(with);
        rest = &rest[pos + needle.len()..];
    }

    if !found {
        return None;
    }
    out.extend_from_slice(rest);
    Some(out)
}

/// Replaces each of `secrets` in `content`, longest first so that a secret
/// containing another is censored whole.
pub(crate) fn censor_all<'c>(content: &'c [u8], secrets: &mut Vec<&[u8]>) -> Cow<'c, [u8]> {
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut content = Cow::Borrowed(content);
    for secret in secrets.iter() {
        if let Some(replaced) = replace_all(&content, secret, CENSORED) {
            content = Cow::Owned(replaced);
        }
    }
    content
}

/// A [`MakeWriter`] that censors secrets from everything written through it.
///
/// The fmt layer writes each formatted event with a single `write_all`, so
/// a secret never straddles two writes.
pub struct CensoringMakeWriter<M> {
    store: SecretStore,
    inner: M,
}

impl<M> CensoringMakeWriter<M> {
    pub fn new(store: SecretStore, inner: M) -> Self {
        CensoringMakeWriter { store, inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for CensoringMakeWriter<M> {
    type Writer = CensoringWriter<'a, M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        CensoringWriter {
            store: &self.store,
            inner: self.inner.make_writer(),
        }
    }
}

pub struct CensoringWriter<'a, W> {
    store: &'a SecretStore,
    inner: W,
}

impl<W: io::Write> io::Write for CensoringWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(&self.store.censor(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

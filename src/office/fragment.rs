use bytes::Bytes;
use network::RouteHeader;

use crate::{Mail, MailHeader};

/// Split `data` into mails of at most `chunk_size` payload bytes each.
///
/// Every mail carries a copy of `route` and `header`, with the header's length
/// set to its own payload and `remaining_fragments` counting down to `0` on the
/// last one. Data that fits in one chunk, including empty data, becomes a single
/// mail.
///
/// # Panics
///
/// Panics if `chunk_size` is `0`.
pub fn fragment(route: RouteHeader, header: MailHeader, data: &Bytes, chunk_size: usize) -> Vec<Mail> {
    assert!(chunk_size > 0, "Fragments must carry at least one byte.");

    let count = data.len().div_ceil(chunk_size).max(1);

    (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(data.len());
            let payload = data.slice(start..end);

            let header = MailHeader {
                length: payload.len() as u32,
                remaining_fragments: (count - 1 - index) as u32,
                ..header
            };

            Mail::new(route, header, payload)
        })
        .collect()
}

//! Turns raw MIME bytes into header fields and inline text.
//!
//! Attachment parts are skipped on purpose: only inline content is imported.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail, addrparse_header};

use mailsync_core::{Error, Result};

/// Address headers loaded by default.
pub const ADDRESS_HEADS: [&str; 3] = ["From", "To", "Cc"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub date: DateTime<Utc>,
    pub subject: String,
    /// Keyed by the header names that were asked for.
    pub addresses: HashMap<String, Vec<Address>>,
}

fn parse_error(err: mailparse::MailParseError) -> Error {
    Error::Parse(err.to_string())
}

/// Reads the date, subject and the requested address headers.
///
/// Works on a bare header block as well as a full message. A missing or
/// unreadable `Date`, or an address header that does not parse, fails the
/// whole call.
pub fn parse_header(raw: &[u8], heads: &[&str]) -> Result<Header> {
    let (headers, _) = mailparse::parse_headers(raw).map_err(parse_error)?;

    let date = headers
        .get_first_value("Date")
        .ok_or_else(|| Error::Parse("missing Date header".to_string()))?;
    let ts = mailparse::dateparse(&date)
        .map_err(|reason| Error::Parse(format!("bad Date {:?}: {}", date, reason)))?;
    let date = DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| Error::Parse(format!("Date out of range: {:?}", date)))?;

    let subject = headers.get_first_value("Subject").unwrap_or_default();

    let mut addresses = HashMap::with_capacity(heads.len());
    for &head in heads {
        let list = match headers.get_first_header(head) {
            Some(header) => {
                let parsed = addrparse_header(header)
                    .map_err(|err| Error::Parse(format!("bad {} header: {}", head, err)))?;
                flatten_groups(&parsed)
            }
            None => Vec::new(),
        };
        addresses.insert(head.to_string(), list);
    }

    Ok(Header {
        date,
        subject,
        addresses,
    })
}

fn flatten_groups(addrs: &[MailAddr]) -> Vec<Address> {
    let mut out = Vec::new();
    for addr in addrs {
        match addr {
            MailAddr::Single(info) => out.push(Address {
                name: info.display_name.clone(),
                address: info.addr.trim().to_string(),
            }),
            MailAddr::Group(group) => {
                out.extend(group.addrs.iter().map(|info| Address {
                    name: info.display_name.clone(),
                    address: info.addr.trim().to_string(),
                }));
            }
        }
    }
    out.retain(|addr| !addr.address.is_empty());
    out
}

/// `a@x.com,b@x.com`: bare addresses, no spaces, original order.
pub fn flatten_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|addr| addr.address.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Concatenates the decoded bodies of every non-attachment leaf part.
pub fn inline_content(raw: &[u8]) -> Result<Vec<u8>> {
    let parsed = mailparse::parse_mail(raw).map_err(parse_error)?;
    let mut content = Vec::new();
    collect_inline(&parsed, &mut content)?;
    Ok(content)
}

fn collect_inline(parsed: &ParsedMail, out: &mut Vec<u8>) -> Result<()> {
    if matches!(
        parsed.get_content_disposition().disposition,
        DispositionType::Attachment
    ) {
        return Ok(());
    }
    if parsed.subparts.is_empty() {
        out.extend(parsed.get_body_raw().map_err(parse_error)?);
        return Ok(());
    }
    for part in &parsed.subparts {
        collect_inline(part, out)?;
    }
    Ok(())
}

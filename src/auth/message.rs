//! EIP-4361 message rendering and parsing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use super::signature::Address;
use crate::error::VerifyFailure;

const PREAMBLE: &str = " wants you to sign in with your Ethereum account:";
const URI_TAG: &str = "URI: ";
const VERSION_TAG: &str = "Version: ";
const CHAIN_TAG: &str = "Chain ID: ";
const NONCE_TAG: &str = "Nonce: ";
const ISSUED_AT_TAG: &str = "Issued At: ";
const EXPIRATION_TAG: &str = "Expiration Time: ";
const NOT_BEFORE_TAG: &str = "Not Before: ";
const REQUEST_ID_TAG: &str = "Request ID: ";
const RESOURCES_TAG: &str = "Resources:";

pub const MESSAGE_VERSION: &str = "1";

/// A structured sign-in message. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

impl SiweMessage {
    /// Time-window check against `now`.
    pub fn check_time(&self, now: DateTime<Utc>) -> Result<(), VerifyFailure> {
        if self.expiration_time.is_some_and(|exp| exp <= now) {
            return Err(VerifyFailure::Expired);
        }
        if self.not_before.is_some_and(|nbf| nbf > now) {
            return Err(VerifyFailure::NotYetValid);
        }
        Ok(())
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}", self.domain, PREAMBLE)?;
        writeln!(f, "{}", self.address.to_checksum())?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        writeln!(f, "{URI_TAG}{}", self.uri)?;
        writeln!(f, "{VERSION_TAG}{MESSAGE_VERSION}")?;
        writeln!(f, "{CHAIN_TAG}{}", self.chain_id)?;
        writeln!(f, "{NONCE_TAG}{}", self.nonce)?;
        write!(f, "{ISSUED_AT_TAG}{}", rfc3339(&self.issued_at))?;
        if let Some(exp) = &self.expiration_time {
            write!(f, "\n{EXPIRATION_TAG}{}", rfc3339(exp))?;
        }
        if let Some(nbf) = &self.not_before {
            write!(f, "\n{NOT_BEFORE_TAG}{}", rfc3339(nbf))?;
        }
        if let Some(rid) = &self.request_id {
            write!(f, "\n{REQUEST_ID_TAG}{rid}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\n{RESOURCES_TAG}")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

fn malformed(detail: impl Into<String>) -> VerifyFailure {
    VerifyFailure::Malformed(detail.into())
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, VerifyFailure> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| malformed(format!("{field} is not an RFC 3339 timestamp: {e}")))
}

struct Lines<'a> {
    inner: std::iter::Peekable<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    fn next_line(&mut self, what: &str) -> Result<&'a str, VerifyFailure> {
        self.inner
            .next()
            .ok_or_else(|| malformed(format!("message ended before {what}")))
    }

    fn tagged(&mut self, tag: &str) -> Result<&'a str, VerifyFailure> {
        let line = self.next_line(tag.trim_end_matches([':', ' ']))?;
        line.strip_prefix(tag)
            .ok_or_else(|| malformed(format!("expected '{}' line", tag.trim_end())))
    }

    fn optional_tagged(&mut self, tag: &str) -> Option<&'a str> {
        let line: &'a str = *self.inner.peek()?;
        let value = line.strip_prefix(tag)?;
        self.inner.next();
        Some(value)
    }
}

impl FromStr for SiweMessage {
    type Err = VerifyFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = Lines {
            inner: s.lines().peekable(),
        };

        let header = lines.next_line("the header")?;
        let domain = header
            .strip_suffix(PREAMBLE)
            .filter(|d| !d.is_empty() && !d.contains(char::is_whitespace))
            .ok_or_else(|| malformed("invalid header line"))?
            .to_string();

        let address = Address::parse(lines.next_line("the address")?)
            .ok_or_else(|| malformed("invalid address line"))?;

        if !lines.next_line("the statement")?.is_empty() {
            return Err(malformed("expected blank line after address"));
        }
        let statement = match lines.next_line("the statement")? {
            "" => None,
            text => {
                if !lines.next_line("the URI")?.is_empty() {
                    return Err(malformed("expected blank line after statement"));
                }
                Some(text.to_string())
            }
        };

        let uri = lines.tagged(URI_TAG)?;
        if uri.is_empty() {
            return Err(malformed("URI is empty"));
        }
        let version = lines.tagged(VERSION_TAG)?;
        if version != MESSAGE_VERSION {
            return Err(malformed(format!("unsupported version '{version}'")));
        }
        let chain_id = lines
            .tagged(CHAIN_TAG)?
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| malformed("chain id must be a positive integer"))?;
        let nonce = lines.tagged(NONCE_TAG)?;
        if nonce.len() < 8 || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("nonce must be at least 8 alphanumeric characters"));
        }
        let issued_at = parse_timestamp(lines.tagged(ISSUED_AT_TAG)?, "Issued At")?;

        let expiration_time = lines
            .optional_tagged(EXPIRATION_TAG)
            .map(|v| parse_timestamp(v, "Expiration Time"))
            .transpose()?;
        let not_before = lines
            .optional_tagged(NOT_BEFORE_TAG)
            .map(|v| parse_timestamp(v, "Not Before"))
            .transpose()?;
        let request_id = lines.optional_tagged(REQUEST_ID_TAG).map(str::to_string);

        let mut resources = Vec::new();
        if lines.optional_tagged(RESOURCES_TAG).is_some() {
            while let Some(resource) = lines.optional_tagged("- ") {
                resources.push(resource.to_string());
            }
        }

        if let Some(extra) = lines.inner.next() {
            return Err(malformed(format!("unexpected trailing line '{extra}'")));
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri: uri.to_string(),
            chain_id,
            nonce: nonce.to_string(),
            issued_at,
            expiration_time,
            not_before,
            request_id,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> SiweMessage {
        SiweMessage {
            domain: "app.example.com".to_string(),
            address: Address::parse("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").expect("address"),
            statement: Some("Sign in with Ethereum to the app.".to_string()),
            uri: "https://app.example.com".to_string(),
            chain_id: 1,
            nonce: "abcDEF1234567890x".to_string(),
            issued_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            expiration_time: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap()),
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        }
    }

    #[test]
    fn renders_canonical_layout() {
        let expected = "app.example.com wants you to sign in with your Ethereum account:\n\
                        0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266\n\
                        \n\
                        Sign in with Ethereum to the app.\n\
                        \n\
                        URI: https://app.example.com\n\
                        Version: 1\n\
                        Chain ID: 1\n\
                        Nonce: abcDEF1234567890x\n\
                        Issued At: 2026-03-01T12:00:00.000Z\n\
                        Expiration Time: 2026-03-01T12:05:00.000Z";
        assert_eq!(sample().to_string(), expected);
    }

    #[test]
    fn parses_what_it_renders() {
        let message = sample();
        let parsed: SiweMessage = message.to_string().parse().expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn parses_optional_fields_and_missing_statement() {
        let mut message = sample();
        message.statement = None;
        message.not_before = Some(message.issued_at);
        message.request_id = Some("req-42".to_string());
        message.resources = vec![
            "ipfs://bafybeiemxf5abjwjbikoz4mc3a3dla6ual3jsgpdr4cjr3oz3evfyavhwq".to_string(),
            "https://example.com/my-web2-claim.json".to_string(),
        ];
        let rendered = message.to_string();
        assert!(rendered.contains("account:\n0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266\n\n\nURI:"));
        let parsed: SiweMessage = rendered.parse().expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn rejects_malformed_messages() {
        let good = sample().to_string();
        let cases = [
            good.replace("wants you to sign in", "would like you to sign in"),
            good.replace("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266", "0x1234"),
            good.replace("Version: 1", "Version: 2"),
            good.replace("Chain ID: 1", "Chain ID: 0"),
            good.replace("Nonce: abcDEF1234567890x", "Nonce: short"),
            good.replace("2026-03-01T12:00:00.000Z", "yesterday"),
            format!("{good}\nTrailing: junk"),
            String::new(),
        ];
        for case in cases {
            assert!(
                matches!(case.parse::<SiweMessage>(), Err(VerifyFailure::Malformed(_))),
                "expected malformed for {case:?}"
            );
        }
    }

    #[test]
    fn time_window_checks() {
        let message = sample();
        let issued = message.issued_at;
        assert_eq!(message.check_time(issued), Ok(()));
        assert_eq!(
            message.check_time(issued + Duration::minutes(5)),
            Err(VerifyFailure::Expired)
        );

        let mut future = sample();
        future.not_before = Some(issued + Duration::minutes(1));
        assert_eq!(future.check_time(issued), Err(VerifyFailure::NotYetValid));
    }
}

//! RFC 1035 style parser for single record lines
//!
//! Record sets arrive from the zone management API as loose fields and are
//! rendered into one presentation line per set before being parsed here:
//!
//! ```text
//! name [ttl] [IN] type rdata[,rdata...]
//! ```
//!
//! Several data values of one set are joined with commas. Commas outside of
//! quoted strings separate values, so a single line yields one record per
//! value. TTLs accept the usual unit suffixes (`5m`, `1h`, `1d`, `1w`).

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::dns::names::normalize_name;
use crate::dns::protocol::{DnsRecord, QueryType, TransientTtl};

/// Parser errors carrying the offending token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidSyntax { message: String },
    InvalidRecordType { record_type: String },
    InvalidIpAddress { addr: String },
    InvalidTtl { ttl: String },
    MissingField { field: String },
    InvalidSoaSerial { serial: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidSyntax { message } => write!(f, "Invalid syntax: {}", message),
            ParseError::InvalidRecordType { record_type } => {
                write!(f, "Unsupported record type: {}", record_type)
            }
            ParseError::InvalidIpAddress { addr } => write!(f, "Invalid IP address: {}", addr),
            ParseError::InvalidTtl { ttl } => write!(f, "Invalid TTL value: {}", ttl),
            ParseError::MissingField { field } => write!(f, "Missing required field: {}", field),
            ParseError::InvalidSoaSerial { serial } => write!(f, "Invalid SOA serial: {}", serial),
        }
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

/// Parses record lines relative to an origin
#[derive(Debug, Clone)]
pub struct RecordParser {
    origin: String,
    default_ttl: u32,
}

impl Default for RecordParser {
    fn default() -> Self {
        RecordParser::new(".")
    }
}

impl RecordParser {
    /// Create a parser that completes relative names with `origin`
    pub fn new(origin: &str) -> Self {
        RecordParser {
            origin: normalize_name(origin),
            default_ttl: 3600, // Default 1 hour
        }
    }

    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Parse one record line into all the records it describes
    pub fn parse_line(&self, line: &str) -> Result<Vec<DnsRecord>> {
        let parts = split_fields(line);
        if parts.is_empty() {
            return Err(ParseError::MissingField {
                field: "domain name".to_string(),
            });
        }

        let domain = self.normalize_domain(&parts[0]);
        let mut idx = 1;
        let mut ttl = None;

        // TTL and class may come in either order
        for _ in 0..2 {
            if idx >= parts.len() {
                break;
            }
            if ttl.is_none() && starts_with_digit(&parts[idx]) {
                ttl = Some(self.parse_ttl(&parts[idx])?);
                idx += 1;
            } else if parts[idx].eq_ignore_ascii_case("IN") {
                idx += 1;
            }
        }

        if idx >= parts.len() {
            return Err(ParseError::MissingField {
                field: "record type".to_string(),
            });
        }

        let record_type = parts[idx].to_uppercase();
        idx += 1;

        let qtype = match QueryType::from_name(&record_type) {
            Some(QueryType::Any) | None => {
                return Err(ParseError::InvalidRecordType { record_type });
            }
            Some(qtype) => qtype,
        };

        let ttl = ttl.unwrap_or(self.default_ttl);

        let rdata = parts[idx..].join(" ");
        let mut records = Vec::new();
        for value in split_values(&rdata) {
            let fields = split_fields(&value);
            records.push(self.parse_rdata(qtype, domain.clone(), ttl, &fields)?);
        }

        if records.is_empty() {
            return Err(ParseError::MissingField {
                field: format!("{} data", record_type),
            });
        }

        Ok(records)
    }

    fn parse_rdata(
        &self,
        qtype: QueryType,
        domain: String,
        ttl: u32,
        parts: &[String],
    ) -> Result<DnsRecord> {
        match qtype {
            QueryType::A => self.parse_a_record(domain, ttl, parts),
            QueryType::Aaaa => self.parse_aaaa_record(domain, ttl, parts),
            QueryType::Cname => {
                let host = self.parse_host(parts, "canonical name")?;
                Ok(DnsRecord::Cname {
                    domain,
                    host,
                    ttl: TransientTtl(ttl),
                })
            }
            QueryType::Ns => {
                let host = self.parse_host(parts, "nameserver")?;
                Ok(DnsRecord::Ns {
                    domain,
                    host,
                    ttl: TransientTtl(ttl),
                })
            }
            QueryType::Ptr => {
                let host = self.parse_host(parts, "PTR target")?;
                Ok(DnsRecord::Ptr {
                    domain,
                    host,
                    ttl: TransientTtl(ttl),
                })
            }
            QueryType::Mx => self.parse_mx_record(domain, ttl, parts),
            QueryType::Txt => self.parse_txt_record(domain, ttl, parts),
            QueryType::Soa => self.parse_soa_record(domain, ttl, parts),
            QueryType::Srv => self.parse_srv_record(domain, ttl, parts),
            QueryType::Any | QueryType::Unknown(_) => Err(ParseError::InvalidRecordType {
                record_type: qtype.to_string(),
            }),
        }
    }

    /// Parse A record
    fn parse_a_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.is_empty() {
            return Err(ParseError::MissingField {
                field: "IPv4 address".to_string(),
            });
        }

        let addr = Ipv4Addr::from_str(&parts[0]).map_err(|_| ParseError::InvalidIpAddress {
            addr: parts[0].clone(),
        })?;

        Ok(DnsRecord::A {
            domain,
            addr,
            ttl: TransientTtl(ttl),
        })
    }

    /// Parse AAAA record
    fn parse_aaaa_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.is_empty() {
            return Err(ParseError::MissingField {
                field: "IPv6 address".to_string(),
            });
        }

        let addr = Ipv6Addr::from_str(&parts[0]).map_err(|_| ParseError::InvalidIpAddress {
            addr: parts[0].clone(),
        })?;

        Ok(DnsRecord::Aaaa {
            domain,
            addr,
            ttl: TransientTtl(ttl),
        })
    }

    fn parse_host(&self, parts: &[String], field: &str) -> Result<String> {
        match parts.first() {
            Some(host) => Ok(self.normalize_domain(host)),
            None => Err(ParseError::MissingField {
                field: field.to_string(),
            }),
        }
    }

    /// Parse MX record
    fn parse_mx_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.len() < 2 {
            return Err(ParseError::MissingField {
                field: "MX priority or host".to_string(),
            });
        }

        let priority = parse_u16(&parts[0], "MX priority")?;
        let host = self.normalize_domain(&parts[1]);

        Ok(DnsRecord::Mx {
            domain,
            priority,
            host,
            ttl: TransientTtl(ttl),
        })
    }

    /// Parse TXT record
    fn parse_txt_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.is_empty() {
            return Err(ParseError::MissingField {
                field: "text data".to_string(),
            });
        }

        // Concatenate all parts and handle quoted strings
        let mut data = String::new();
        for part in parts {
            if !data.is_empty() {
                data.push(' ');
            }
            if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
                data.push_str(&part[1..part.len() - 1]);
            } else {
                data.push_str(part);
            }
        }

        Ok(DnsRecord::Txt {
            domain,
            data,
            ttl: TransientTtl(ttl),
        })
    }

    /// Parse SOA record
    fn parse_soa_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.len() < 7 {
            return Err(ParseError::MissingField {
                field: "SOA fields".to_string(),
            });
        }

        let m_name = self.normalize_domain(&parts[0]);
        let r_name = self.normalize_domain(&parts[1]);

        let serial = parts[2]
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidSoaSerial {
                serial: parts[2].clone(),
            })?;

        let refresh = self.parse_ttl(&parts[3])?;
        let retry = self.parse_ttl(&parts[4])?;
        let expire = self.parse_ttl(&parts[5])?;
        let minimum = self.parse_ttl(&parts[6])?;

        Ok(DnsRecord::Soa {
            domain,
            m_name,
            r_name,
            serial,
            refresh,
            retry,
            expire,
            minimum,
            ttl: TransientTtl(ttl),
        })
    }

    /// Parse SRV record
    fn parse_srv_record(&self, domain: String, ttl: u32, parts: &[String]) -> Result<DnsRecord> {
        if parts.len() < 4 {
            return Err(ParseError::MissingField {
                field: "SRV fields".to_string(),
            });
        }

        let priority = parse_u16(&parts[0], "SRV priority")?;
        let weight = parse_u16(&parts[1], "SRV weight")?;
        let port = parse_u16(&parts[2], "SRV port")?;
        let host = self.normalize_domain(&parts[3]);

        Ok(DnsRecord::Srv {
            domain,
            priority,
            weight,
            port,
            host,
            ttl: TransientTtl(ttl),
        })
    }

    /// Parse TTL value (supports time units)
    pub fn parse_ttl(&self, ttl_str: &str) -> Result<u32> {
        let ttl_str = ttl_str.to_uppercase();
        let invalid = || ParseError::InvalidTtl {
            ttl: ttl_str.clone(),
        };

        if let Some(last_char) = ttl_str.chars().last() {
            if last_char.is_alphabetic() {
                let number_part = &ttl_str[..ttl_str.len() - last_char.len_utf8()];
                let value = number_part.parse::<u32>().map_err(|_| invalid())?;

                let factor = match last_char {
                    'S' => 1,
                    'M' => 60,
                    'H' => 3600,
                    'D' => 86400,
                    'W' => 604800,
                    _ => return Err(invalid()),
                };

                return value.checked_mul(factor).ok_or_else(invalid);
            }
        }

        // Plain number (seconds)
        ttl_str.parse::<u32>().map_err(|_| invalid())
    }

    /// Normalize domain name (handle @, relative names, etc.)
    fn normalize_domain(&self, domain: &str) -> String {
        let domain = domain.trim();

        if domain == "@" || domain.is_empty() {
            return self.origin.clone();
        }

        if domain.ends_with('.') || self.origin.is_empty() {
            normalize_name(domain)
        } else {
            normalize_name(&format!("{}.{}", domain, self.origin))
        }
    }
}

fn starts_with_digit(s: &str) -> bool {
    s.chars().next().map_or(false, |c| c.is_ascii_digit())
}

fn parse_u16(s: &str, what: &str) -> Result<u16> {
    s.parse::<u16>().map_err(|_| ParseError::InvalidSyntax {
        message: format!("Invalid {}: {}", what, s),
    })
}

/// Split on whitespace, keeping quoted strings together
fn split_fields(line: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
        } else if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                parts.push(current.clone());
                current.clear();
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Split joined data values on commas outside of quoted strings
fn split_values(rdata: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in rdata.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                values.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    values.push(current.trim().to_string());

    values.into_iter().filter(|v| !v.is_empty()).collect()
}

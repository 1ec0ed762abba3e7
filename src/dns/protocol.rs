//! implements the DNS record model in a transport agnostic fashion

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use serde_derive::{Deserialize, Serialize};

/// `QueryType` represents the requested Record Type of a query
///
/// The specific type Unknown carries the numeric id of a type this crate has no
/// variant for. The textual mnemonic used in zone files is available through
/// `from_name` and the `Display` impl.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Any,   // 255
}

impl QueryType {
    /// Looks up a record type by its zone file mnemonic, case insensitively.
    pub fn from_name(name: &str) -> Option<QueryType> {
        let qtype = match name.to_ascii_uppercase().as_str() {
            "A" => QueryType::A,
            "NS" => QueryType::Ns,
            "CNAME" => QueryType::Cname,
            "SOA" => QueryType::Soa,
            "PTR" => QueryType::Ptr,
            "MX" => QueryType::Mx,
            "TXT" => QueryType::Txt,
            "AAAA" => QueryType::Aaaa,
            "SRV" => QueryType::Srv,
            "ANY" => QueryType::Any,
            _ => return None,
        };

        Some(qtype)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QueryType::Unknown(x) => write!(f, "TYPE{}", x),
            QueryType::A => f.write_str("A"),
            QueryType::Ns => f.write_str("NS"),
            QueryType::Cname => f.write_str("CNAME"),
            QueryType::Soa => f.write_str("SOA"),
            QueryType::Ptr => f.write_str("PTR"),
            QueryType::Mx => f.write_str("MX"),
            QueryType::Txt => f.write_str("TXT"),
            QueryType::Aaaa => f.write_str("AAAA"),
            QueryType::Srv => f.write_str("SRV"),
            QueryType::Any => f.write_str("ANY"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, Serialize, Deserialize)]
pub struct TransientTtl(pub u32);

impl PartialEq<TransientTtl> for TransientTtl {
    fn eq(&self, _: &TransientTtl) -> bool {
        true
    }
}

impl PartialOrd<TransientTtl> for TransientTtl {
    fn partial_cmp(&self, other: &TransientTtl) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransientTtl {
    fn cmp(&self, _: &TransientTtl) -> Ordering {
        Ordering::Equal
    }
}

impl Hash for TransientTtl {
    fn hash<H>(&self, _: &mut H)
    where
        H: Hasher,
    {
        // purposely left empty
    }
}

/// `DnsRecord` is the primary representation of a DNS record
///
/// Owner names and target names are kept normalized: lowercase and without
/// the trailing dot. The `Display` impl renders the record back as a single
/// zone file line with fully qualified names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DnsRecord {
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: TransientTtl,
    }, // 1
    Ns {
        domain: String,
        host: String,
        ttl: TransientTtl,
    }, // 2
    Cname {
        domain: String,
        host: String,
        ttl: TransientTtl,
    }, // 5
    Soa {
        domain: String,
        m_name: String,
        r_name: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: TransientTtl,
    }, // 6
    Ptr {
        domain: String,
        host: String,
        ttl: TransientTtl,
    }, // 12
    Mx {
        domain: String,
        priority: u16,
        host: String,
        ttl: TransientTtl,
    }, // 15
    Txt {
        domain: String,
        data: String,
        ttl: TransientTtl,
    }, // 16
    Aaaa {
        domain: String,
        addr: Ipv6Addr,
        ttl: TransientTtl,
    }, // 28
    Srv {
        domain: String,
        priority: u16,
        weight: u16,
        port: u16,
        host: String,
        ttl: TransientTtl,
    }, // 33
}

impl DnsRecord {
    pub fn get_querytype(&self) -> QueryType {
        match *self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::Aaaa { .. } => QueryType::Aaaa,
            DnsRecord::Ns { .. } => QueryType::Ns,
            DnsRecord::Cname { .. } => QueryType::Cname,
            DnsRecord::Ptr { .. } => QueryType::Ptr,
            DnsRecord::Srv { .. } => QueryType::Srv,
            DnsRecord::Mx { .. } => QueryType::Mx,
            DnsRecord::Soa { .. } => QueryType::Soa,
            DnsRecord::Txt { .. } => QueryType::Txt,
        }
    }

    pub fn get_domain(&self) -> &str {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::Aaaa { ref domain, .. }
            | DnsRecord::Ns { ref domain, .. }
            | DnsRecord::Cname { ref domain, .. }
            | DnsRecord::Ptr { ref domain, .. }
            | DnsRecord::Srv { ref domain, .. }
            | DnsRecord::Mx { ref domain, .. }
            | DnsRecord::Soa { ref domain, .. }
            | DnsRecord::Txt { ref domain, .. } => domain,
        }
    }

    pub fn get_ttl(&self) -> u32 {
        match *self {
            DnsRecord::A {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Aaaa {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Ns {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Cname {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Ptr {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Srv {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Mx {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Soa {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Txt {
                ttl: TransientTtl(ttl),
                ..
            } => ttl,
        }
    }

    /// The name a record points at, for the types that point anywhere.
    pub fn get_target(&self) -> Option<&str> {
        match *self {
            DnsRecord::Ns { ref host, .. }
            | DnsRecord::Cname { ref host, .. }
            | DnsRecord::Ptr { ref host, .. }
            | DnsRecord::Mx { ref host, .. }
            | DnsRecord::Srv { ref host, .. } => Some(host),
            _ => None,
        }
    }

    /// Returns a copy of the record owned by `owner`, used for wildcard synthesis.
    pub fn with_domain(&self, owner: &str) -> DnsRecord {
        let mut rec = self.clone();
        match rec {
            DnsRecord::A { ref mut domain, .. }
            | DnsRecord::Aaaa { ref mut domain, .. }
            | DnsRecord::Ns { ref mut domain, .. }
            | DnsRecord::Cname { ref mut domain, .. }
            | DnsRecord::Ptr { ref mut domain, .. }
            | DnsRecord::Srv { ref mut domain, .. }
            | DnsRecord::Mx { ref mut domain, .. }
            | DnsRecord::Soa { ref mut domain, .. }
            | DnsRecord::Txt { ref mut domain, .. } => {
                *domain = owner.to_string();
            }
        }
        rec
    }
}

fn fqdn(name: &str) -> String {
    if name.is_empty() {
        ".".to_string()
    } else {
        format!("{}.", name)
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\tIN\t{}\t",
            fqdn(self.get_domain()),
            self.get_ttl(),
            self.get_querytype()
        )?;

        match *self {
            DnsRecord::A { ref addr, .. } => write!(f, "{}", addr),
            DnsRecord::Aaaa { ref addr, .. } => write!(f, "{}", addr),
            DnsRecord::Ns { ref host, .. }
            | DnsRecord::Cname { ref host, .. }
            | DnsRecord::Ptr { ref host, .. } => f.write_str(&fqdn(host)),
            DnsRecord::Mx {
                priority, ref host, ..
            } => write!(f, "{} {}", priority, fqdn(host)),
            DnsRecord::Srv {
                priority,
                weight,
                port,
                ref host,
                ..
            } => write!(f, "{} {} {} {}", priority, weight, port, fqdn(host)),
            DnsRecord::Txt { ref data, .. } => write!(f, "\"{}\"", data),
            DnsRecord::Soa {
                ref m_name,
                ref r_name,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ..
            } => write!(
                f,
                "{} {} {} {} {} {} {}",
                fqdn(m_name),
                fqdn(r_name),
                serial,
                refresh,
                retry,
                expire,
                minimum
            ),
        }
    }
}

/// The result code for a DNS query, as defined by RFC 1035
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion { name, qtype }
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IN {}", self.name, self.qtype)
    }
}

/// Representation of a complete DNS message
///
/// Requests arrive from the serving framework in this form and replies are
/// handed back to its response writer; the wire encoding lives outside this
/// crate.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    /// Builds a query packet with a single question.
    pub fn query(name: &str, qtype: QueryType) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.recursion_desired = true;
        packet
            .questions
            .push(DnsQuestion::new(name.to_string(), qtype));
        packet
    }

    /// Starts an empty reply to `request`, echoing its id, opcode and question.
    pub fn reply_to(request: &DnsPacket) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = request.header.id;
        packet.header.opcode = request.header.opcode;
        packet.header.recursion_desired = request.header.recursion_desired;
        packet.header.checking_disabled = request.header.checking_disabled;
        packet.header.response = true;
        packet.questions = request.questions.iter().take(1).cloned().collect();
        packet
    }
}

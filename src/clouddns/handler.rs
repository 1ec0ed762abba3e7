//! query handling against the published snapshots

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use tracing::{debug, trace, warn, Span};

use crate::clouddns::store::{GroupAnswer, ZoneStore};
use crate::dns::names::{Fallthrough, ZoneMatcher};
use crate::dns::protocol::{DnsPacket, ResultCode};
use crate::dns::zone::LookupKind;

#[derive(Debug, Display, From, Error)]
pub enum HandlerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, HandlerError>;

/// Destination of the reply to one request
pub trait ResponseWriter: Send {
    fn write_msg(&mut self, reply: DnsPacket) -> Result<()>;
}

/// Keeps every reply written to it
#[derive(Debug, Default)]
pub struct ReplyRecorder {
    pub replies: Vec<DnsPacket>,
}

impl ReplyRecorder {
    pub fn new() -> ReplyRecorder {
        ReplyRecorder::default()
    }

    pub fn last(&self) -> Option<&DnsPacket> {
        self.replies.last()
    }
}

impl ResponseWriter for ReplyRecorder {
    fn write_msg(&mut self, reply: DnsPacket) -> Result<()> {
        self.replies.push(reply);
        Ok(())
    }
}

/// A request handler in the host's handler chain
///
/// Returns the response code of the reply written, or of the reply the rest
/// of the chain wrote.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    async fn serve_dns(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
    ) -> Result<ResultCode>;
}

/// Answers queries for the mirrored zones
pub struct QueryServer {
    store: Arc<ZoneStore>,
    matcher: ZoneMatcher,
    fallthrough: Fallthrough,
    next: Option<Arc<dyn DnsHandler>>,
    span: Span,
}

impl QueryServer {
    pub fn new(store: Arc<ZoneStore>, span: Span) -> QueryServer {
        let matcher = ZoneMatcher::new(store.apexes());
        QueryServer {
            store,
            matcher,
            fallthrough: Fallthrough::none(),
            next: None,
            span,
        }
    }

    pub fn with_fallthrough(mut self, fallthrough: Fallthrough) -> QueryServer {
        self.fallthrough = fallthrough;
        self
    }

    pub fn with_next(mut self, next: Option<Arc<dyn DnsHandler>>) -> QueryServer {
        self.next = next;
        self
    }

    pub fn zones(&self) -> &[String] {
        self.matcher.zones()
    }

    fn write_failure(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
        rescode: ResultCode,
    ) -> Result<ResultCode> {
        let mut reply = DnsPacket::reply_to(request);
        reply.header.rescode = rescode;
        writer.write_msg(reply)?;
        Ok(rescode)
    }

    /// Hand the request to the next handler, or fail it if there is none
    async fn next_or_failure(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
    ) -> Result<ResultCode> {
        match self.next {
            Some(ref next) => next.serve_dns(writer, request).await,
            None => self.write_failure(writer, request, ResultCode::SERVFAIL),
        }
    }

    pub async fn handle(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
    ) -> Result<ResultCode> {
        let question = match request.questions.first() {
            Some(question) => question.clone(),
            None => {
                debug!(parent: &self.span, "FORMERR");
                return self.write_failure(writer, request, ResultCode::FORMERR);
            }
        };

        let apex = match self.matcher.matches(&question.name) {
            Some(apex) => apex.to_string(),
            None => {
                trace!(parent: &self.span, question = %question, "No zone matched");
                return self.next_or_failure(writer, request).await;
            }
        };

        let GroupAnswer {
            mut result,
            upstream,
        } = match self.store.lookup(&apex, &question.name, question.qtype) {
            Some(answer) => answer,
            None => {
                warn!(parent: &self.span, zone = %apex, "Matched zone has no data");
                return self.write_failure(writer, request, ResultCode::SERVFAIL);
            }
        };

        if result.answer.is_empty() && self.fallthrough.through(&question.name) {
            debug!(parent: &self.span, question = %question, "Falling through");
            return self.next_or_failure(writer, request).await;
        }

        if let (Some(target), Some(upstream)) = (result.external_target.take(), upstream) {
            match upstream.resolve(&target, question.qtype).await {
                Ok(records) => result.answer.extend(records),
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        question = %question,
                        target = %target,
                        "Failed to resolve CNAME target upstream: {}", e
                    );
                }
            }
        }

        let mut reply = DnsPacket::reply_to(request);
        reply.header.authoritative_answer = true;
        reply.header.recursion_available = true;

        match result.kind {
            LookupKind::Success | LookupKind::NoData => {}
            LookupKind::NameError => reply.header.rescode = ResultCode::NXDOMAIN,
            LookupKind::Delegation => reply.header.authoritative_answer = false,
            LookupKind::ServerFailure => {
                return self.write_failure(writer, request, ResultCode::SERVFAIL);
            }
        }

        reply.answers = result.answer;
        reply.authorities = result.authority;
        reply.resources = result.additional;

        debug!(
            parent: &self.span,
            question = %question,
            zone = %apex,
            rescode = ?reply.header.rescode,
            answers = reply.answers.len(),
            "Answered"
        );

        let rescode = reply.header.rescode;
        writer.write_msg(reply)?;
        Ok(rescode)
    }
}

#[async_trait]
impl DnsHandler for QueryServer {
    async fn serve_dns(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
    ) -> Result<ResultCode> {
        self.handle(writer, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clouddns::store::{ManagedZoneRef, ZoneApexGroup};
    use crate::dns::protocol::{DnsRecord, QueryType, TransientTtl};
    use crate::dns::resolve::{Upstream, UpstreamError};
    use crate::dns::zone::Zone;
    use crate::dns::zone_parser::RecordParser;
    use std::net::Ipv4Addr;

    struct FixedUpstream;

    #[async_trait]
    impl Upstream for FixedUpstream {
        async fn resolve(
            &self,
            qname: &str,
            _qtype: QueryType,
        ) -> std::result::Result<Vec<DnsRecord>, UpstreamError> {
            if qname == "www.example.net" {
                Ok(vec![DnsRecord::A {
                    domain: qname.to_string(),
                    addr: Ipv4Addr::new(192, 0, 2, 1),
                    ttl: TransientTtl(60),
                }])
            } else {
                Err(UpstreamError::Timeout)
            }
        }
    }

    fn build_server(upstream: Option<Arc<dyn Upstream>>) -> QueryServer {
        let groups = ZoneApexGroup::group_by_apex(vec![(
            "example.org.".to_string(),
            ManagedZoneRef::new("p", "z"),
        )]);
        let store = Arc::new(ZoneStore::new(groups, upstream.clone()));

        let parser = RecordParser::default();
        let mut zone = Zone::new("example.org").with_upstream(upstream);
        for line in [
            "example.org. 300 IN SOA ns1.example.org. hostmaster.example.org. 1 7200 900 1209600 86400",
            "example.org. 300 IN A 1.2.3.4",
            "www.example.org. 300 IN CNAME www.example.net.",
            "broken.example.org. 300 IN CNAME broken.example.net.",
            "sub.example.org. 300 IN NS ns.example.net.",
        ]
        .iter()
        {
            for rec in parser.parse_line(line).unwrap() {
                zone.insert(rec);
            }
        }
        store.publish("example.org", 0, zone);

        QueryServer::new(store, Span::none())
    }

    async fn ask(server: &QueryServer, name: &str, qtype: QueryType) -> (ResultCode, DnsPacket) {
        let mut writer = ReplyRecorder::new();
        let code = server
            .handle(&mut writer, &DnsPacket::query(name, qtype))
            .await
            .unwrap();
        assert_eq!(writer.replies.len(), 1);
        (code, writer.replies.remove(0))
    }

    #[tokio::test]
    async fn test_answer_flags() {
        let server = build_server(None);
        let (code, reply) = ask(&server, "example.org.", QueryType::A).await;

        assert_eq!(code, ResultCode::NOERROR);
        assert!(reply.header.response);
        assert!(reply.header.authoritative_answer);
        assert!(reply.header.recursion_available);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.questions[0].name, "example.org.");
    }

    #[tokio::test]
    async fn test_name_error_maps_to_nxdomain() {
        let server = build_server(None);
        let (code, reply) = ask(&server, "missing.example.org.", QueryType::A).await;

        assert_eq!(code, ResultCode::NXDOMAIN);
        assert_eq!(reply.header.rescode, ResultCode::NXDOMAIN);
        assert!(reply.answers.is_empty());
        assert_eq!(reply.authorities[0].get_querytype(), QueryType::Soa);
    }

    #[tokio::test]
    async fn test_delegation_is_not_authoritative() {
        let server = build_server(None);
        let (code, reply) = ask(&server, "host.sub.example.org.", QueryType::A).await;

        assert_eq!(code, ResultCode::NOERROR);
        assert!(!reply.header.authoritative_answer);
        assert_eq!(reply.authorities[0].get_querytype(), QueryType::Ns);
    }

    #[tokio::test]
    async fn test_formerr_without_question() {
        let server = build_server(None);
        let mut writer = ReplyRecorder::new();
        let code = server.handle(&mut writer, &DnsPacket::new()).await.unwrap();

        assert_eq!(code, ResultCode::FORMERR);
        assert_eq!(writer.replies.len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_without_next_is_servfail() {
        let server = build_server(None);
        let (code, reply) = ask(&server, "example.com.", QueryType::A).await;

        assert_eq!(code, ResultCode::SERVFAIL);
        assert!(reply.answers.is_empty());
    }

    #[tokio::test]
    async fn test_zone_without_soa_is_servfail() {
        let groups = ZoneApexGroup::group_by_apex(vec![
            ("example.org.".to_string(), ManagedZoneRef::new("p", "nosoa")),
            ("example.net.".to_string(), ManagedZoneRef::new("p", "unsynced")),
        ]);
        let store = Arc::new(ZoneStore::new(groups, None));

        let mut zone = Zone::new("example.org");
        for rec in RecordParser::default()
            .parse_line("www.example.org. 300 IN A 1.2.3.4")
            .unwrap()
        {
            zone.insert(rec);
        }
        store.publish("example.org", 0, zone);
        let server = QueryServer::new(store, Span::none());

        for (name, qtype) in [
            ("missing.example.org.", QueryType::A),
            ("www.example.org.", QueryType::A),
            // never populated
            ("www.example.net.", QueryType::A),
        ]
        .iter()
        {
            let (code, reply) = ask(&server, name, *qtype).await;
            assert_eq!(code, ResultCode::SERVFAIL, "{}", name);
            assert_eq!(reply.header.rescode, ResultCode::SERVFAIL);
            assert!(!reply.header.authoritative_answer);
            assert!(reply.answers.is_empty());
            assert!(reply.authorities.is_empty());
            assert!(reply.resources.is_empty());
        }
    }

    #[tokio::test]
    async fn test_external_cname_resolved_upstream() {
        let server = build_server(Some(Arc::new(FixedUpstream)));

        let (code, reply) = ask(&server, "www.example.org.", QueryType::A).await;
        assert_eq!(code, ResultCode::NOERROR);
        let types: Vec<QueryType> = reply.answers.iter().map(|r| r.get_querytype()).collect();
        assert_eq!(types, vec![QueryType::Cname, QueryType::A]);

        // upstream failure keeps the partial answer
        let (code, reply) = ask(&server, "broken.example.org.", QueryType::A).await;
        assert_eq!(code, ResultCode::NOERROR);
        assert_eq!(reply.answers.len(), 1);
    }
}

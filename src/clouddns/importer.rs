//! turns listed record sets into zone records

use tracing::{debug, warn, Span};

use crate::clouddns::api::ResourceRecordSet;
use crate::dns::zone::Zone;
use crate::dns::zone_parser::RecordParser;

/// Outcome of one import batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Records inserted into the zone
    pub records: usize,
    /// Record sets rejected by the parser
    pub skipped: usize,
}

pub struct RecordSetImporter {
    parser: RecordParser,
    span: Span,
}

impl RecordSetImporter {
    pub fn new(span: Span) -> RecordSetImporter {
        RecordSetImporter {
            parser: RecordParser::default(),
            span,
        }
    }

    /// Single zone file line for a record set, values joined with commas
    pub fn render(rrset: &ResourceRecordSet) -> String {
        format!(
            "{} {} IN {} {}",
            rrset.name,
            rrset.ttl,
            rrset.rtype,
            rrset.rrdatas.join(",")
        )
    }

    /// Insert every parsable record set of `rrsets` into `zone`
    ///
    /// Record sets that fail to parse are logged and skipped.
    pub fn import(&self, rrsets: &[ResourceRecordSet], zone: &mut Zone) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for rrset in rrsets {
            let line = RecordSetImporter::render(rrset);

            match self.parser.parse_line(&line) {
                Ok(records) => {
                    for record in records {
                        if zone.insert(record) {
                            summary.records += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        zone = %zone.apex(),
                        name = %rrset.name,
                        rtype = %rrset.rtype,
                        "Failed to parse record set, skipping: {}", e
                    );
                    summary.skipped += 1;
                }
            }
        }

        debug!(
            parent: &self.span,
            zone = %zone.apex(),
            records = summary.records,
            skipped = summary.skipped,
            "Imported record sets"
        );

        summary
    }
}

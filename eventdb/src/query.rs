use std::io;
use std::time::Duration;

use regex::Regex;

use crate::database::{Database, ZoneId};
use crate::error::QueryError;
use crate::iterator::EventIterator;

/// Compiled filter expression over event names. The syntax is chosen by the
/// first character:
///
/// - `/regex/` — a regex literal, anchored exactly as given;
/// - anything containing `/` — a path selector: matches names equal to the
///   path or ending with `/` + the path (descendant-or-self);
/// - anything else — a case-sensitive substring match.
pub struct Query {
    expression: QueryExpr,
    source: String,
}

enum QueryExpr {
    Regex(Regex),
    Path(String),
    Substring(String),
}

impl Query {
    pub fn compile(text: &str) -> Result<Self, QueryError> {
        if text.is_empty() {
            return Err(QueryError::Empty);
        }
        if let Some(rest) = text.strip_prefix('/') {
            let Some(body) = rest.strip_suffix('/') else {
                return Err(QueryError::UnterminatedRegex);
            };
            let regex = Regex::new(body)?;
            return Ok(Query {
                expression: QueryExpr::Regex(regex),
                source: text.to_owned(),
            });
        }
        if text.contains('/') {
            let path: String = text
                .split('/')
                .filter(|component| !component.is_empty())
                .collect::<Vec<_>>()
                .join("/");
            if path.is_empty() {
                return Err(QueryError::Empty);
            }
            return Ok(Query {
                expression: QueryExpr::Path(path),
                source: text.to_owned(),
            });
        }
        Ok(Query {
            expression: QueryExpr::Substring(text.to_owned()),
            source: text.to_owned(),
        })
    }

    /// The expression as typed, for display.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled representation, for display.
    pub fn display(&self) -> String {
        match &self.expression {
            QueryExpr::Regex(regex) => format!("regex:{}", regex.as_str()),
            QueryExpr::Path(path) => format!("path:{path}"),
            QueryExpr::Substring(text) => format!("substring:{text}"),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.expression {
            QueryExpr::Regex(regex) => regex.is_match(name),
            QueryExpr::Substring(text) => name.contains(text.as_str()),
            QueryExpr::Path(path) => {
                name == path || name.ends_with(&format!("/{path}"))
            }
        }
    }
}

/// Matches found in one zone, in post-sort record order.
pub struct ZoneMatches {
    pub(crate) zone: ZoneId,
    pub(crate) zone_name: String,
    pub(crate) indices: Vec<u32>,
}

impl ZoneMatches {
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn zone_name(&self) -> &str {
        &self.zone_name
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

/// Lazy result of a database scan: per-zone matching record indices, the
/// compiled expression for display, and the elapsed scan time.
pub struct QueryResult {
    query: Query,
    zones: Vec<ZoneMatches>,
    elapsed: Duration,
}

impl QueryResult {
    pub(crate) fn new(query: Query, zones: Vec<ZoneMatches>, elapsed: Duration) -> Self {
        QueryResult {
            query,
            zones,
            elapsed,
        }
    }

    pub fn expression(&self) -> String {
        self.query.display()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn zones(&self) -> &[ZoneMatches] {
        &self.zones
    }

    pub fn total_matches(&self) -> usize {
        self.zones.iter().map(|zone| zone.indices.len()).sum()
    }

    /// Cursor over one zone's matches, in match order.
    pub fn iter_zone<'a>(&'a self, db: &'a Database, zone: ZoneId) -> Option<EventIterator<'a>> {
        let matches = self.zones.iter().find(|candidate| candidate.zone == zone)?;
        let store = db.zone(zone)?.store();
        Some(EventIterator::with_table(
            store,
            db.event_types(),
            &matches.indices,
        ))
    }

    /// Serializes every match as CSV: one row per event with columns
    /// (zone, time_ms, type_name, duration_ms, arguments-as-JSON).
    pub fn dump_csv(&self, db: &Database, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "zone,time_ms,type_name,duration_ms,arguments")?;
        for matches in &self.zones {
            let Some(mut it) = self.iter_zone(db, matches.zone) else {
                continue;
            };
            while !it.done() {
                let arguments = it
                    .arguments()
                    .map(|args| args.to_json().to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "{},{},{},{},{}",
                    csv_field(&matches.zone_name),
                    it.time_ms(),
                    csv_field(it.name()),
                    it.total_duration_ms(),
                    csv_field(&arguments),
                )?;
                it.next();
            }
        }
        Ok(())
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_owned()
    }
}

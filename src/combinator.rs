//! Combine the geo part sub-select with the application's attribute filter.

use crate::indexer::GeoPartSelect;
use crate::query::{AttributeFilter, SqlStatement, SqlWriter};

pub const TOUR_DATA_TABLE: &str = "TOURDATA";

/// Whether tours touching the geo parts are selected or excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Include,
    Exclude,
}

impl From<bool> for Membership {
    fn from(include_geo_parts: bool) -> Self {
        if include_geo_parts {
            Membership::Include
        } else {
            Membership::Exclude
        }
    }
}

/// A complete query returning tour ids.
#[derive(Debug, Clone, PartialEq)]
pub enum TourQuery {
    /// The geo part sub-select on its own.
    GeoParts(GeoPartSelect),
    /// An outer select over the tour table.
    Tours {
        attribute: Option<AttributeFilter>,
        membership: Membership,
        geo: GeoPartSelect,
    },
}

/// Build the final query.
///
/// | attribute | include | shape |
/// |-----------|---------|-------|
/// | none      | yes     | geo sub-select verbatim |
/// | none      | no      | all tours with geo data `NOT IN` the sub-select |
/// | some      | either  | `<attribute> AND HasGeoData AND TourId [NOT] IN (<sub-select>)` |
///
/// Parameters come out attribute first, then geo parts, matching the text.
pub fn combine(
    geo: GeoPartSelect,
    attribute: Option<AttributeFilter>,
    include_geo_parts: bool,
) -> TourQuery {
    let membership = Membership::from(include_geo_parts);

    match (attribute, membership) {
        (None, Membership::Include) => TourQuery::GeoParts(geo),
        (attribute, membership) => TourQuery::Tours {
            attribute,
            membership,
            geo,
        },
    }
}

impl TourQuery {
    pub fn geo(&self) -> &GeoPartSelect {
        match self {
            TourQuery::GeoParts(geo) => geo,
            TourQuery::Tours { geo, .. } => geo,
        }
    }

    pub fn membership(&self) -> Membership {
        match self {
            TourQuery::GeoParts(_) => Membership::Include,
            TourQuery::Tours { membership, .. } => *membership,
        }
    }

    pub fn attribute(&self) -> Option<&AttributeFilter> {
        match self {
            TourQuery::GeoParts(_) => None,
            TourQuery::Tours { attribute, .. } => attribute.as_ref(),
        }
    }

    /// Predicate over the tour table, for callers that build their own select.
    pub fn write_predicate(&self, w: &mut SqlWriter) {
        if let Some(attribute) = self.attribute() {
            w.push("(").push_fragment(attribute).push(") AND ");
        }

        w.push("HasGeoData AND ");
        match self.membership() {
            Membership::Include => {
                w.push("TourId IN (");
            }
            Membership::Exclude => {
                w.push("TourId NOT IN (");
            }
        }

        self.geo().write_sql(w);
        w.push(")");
    }

    pub fn predicate(&self) -> SqlStatement {
        let mut w = SqlWriter::new();
        self.write_predicate(&mut w);
        w.finish()
    }

    pub fn to_sql(&self) -> SqlStatement {
        match self {
            TourQuery::GeoParts(geo) => geo.to_sql(),
            TourQuery::Tours { .. } => {
                let mut w = SqlWriter::new();
                w.push("SELECT TourId FROM ")
                    .push(TOUR_DATA_TABLE)
                    .push(" WHERE ");
                self.write_predicate(&mut w);
                w.finish()
            }
        }
    }
}

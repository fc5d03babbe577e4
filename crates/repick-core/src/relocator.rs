//! Relocation service: waits for events to mature, relocates their
//! preferred origin from re-picked P picks, and publishes improvements.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use repick_geo::{StationIndex, TravelTimeSource};
use repick_types::time::seconds_between;
use repick_types::{CatalogObject, CreationInfo, EventId, Notifier, Origin, PickId};
use tracing::{debug, info, warn};

use crate::association::associate;
use crate::catalog::Catalog;
use crate::collector::{AssociationContext, AssociationParams};
use crate::config::RelocationConfig;
use crate::publish::{PublishError, Publisher, relocation_message};
use crate::relocation::{RelocationParams, relocate, summarize};

/// Automatic origins whose TGap exceeds this are not relocated, in degrees.
pub const MAX_TGAP: f64 = 270.0;

/// Arrivals beyond this distance do not count towards the TGap, in degrees.
const TGAP_MAX_DISTANCE: f64 = 90.0;

/// Arrivals at or below this weight do not count towards the TGap.
const TGAP_MIN_WEIGHT: f64 = 0.5;

/// Sum of the two largest azimuthal gaps between arrivals with weight above
/// 0.5 and distance below 90 degrees. Fewer than two azimuths give 360.
pub fn tgap(origin: &Origin) -> f64 {
    let mut azimuths: Vec<f64> = origin
        .arrivals
        .iter()
        .filter(|a| {
            a.weight > TGAP_MIN_WEIGHT && a.distance.is_some_and(|d| d < TGAP_MAX_DISTANCE)
        })
        .filter_map(|a| a.azimuth)
        .map(|az| az.rem_euclid(360.0))
        .collect();
    if azimuths.len() < 2 {
        return 360.0;
    }
    azimuths.sort_by(f64::total_cmp);
    let mut gaps: Vec<f64> = azimuths
        .windows(2)
        .filter_map(|w| match w {
            [a, b] => Some(b - a),
            _ => None,
        })
        .collect();
    if let (Some(first), Some(last)) = (azimuths.first(), azimuths.last()) {
        gaps.push(first - last + 360.0);
    }
    gaps.sort_by(|a, b| b.total_cmp(a));
    gaps.iter().take(2).sum()
}

/// Manual origins always qualify; automatic origins with arrivals need a
/// TGap of at most 270 degrees.
pub fn is_qualified(origin: &Origin) -> bool {
    if origin.is_manual() || origin.arrivals.is_empty() {
        return true;
    }
    let gap = tgap(origin);
    if gap > MAX_TGAP {
        debug!(origin_id = %origin.id, tgap = gap, "Origin TGap too large");
        return false;
    }
    true
}

/// Depth to hold fixed when relocating `origin`, if any.
///
/// A configured region fixes the depth outright. An origin whose own depth
/// is fixed keeps it when it is a manual origin of `own_agency`, or when it
/// equals the default depth (the region depth inside a region).
pub fn choose_fixed_depth(
    origin: &Origin,
    config: &RelocationConfig,
    own_agency: &str,
) -> Option<f64> {
    let region_depth = config.region_depth(origin.latitude, origin.longitude);
    let default_depth = region_depth.unwrap_or(config.default_depth);
    let mut fixed = region_depth;
    if origin.depth_fixed {
        if origin.agency_id() == Some(own_agency) && origin.is_manual() {
            fixed = Some(origin.depth);
        } else if (origin.depth - default_depth).abs() < f64::EPSILON {
            fixed = Some(default_depth);
        }
    }
    fixed
}

fn used_pick_ids(origin: &Origin) -> BTreeSet<PickId> {
    origin.used_arrivals().map(|a| a.pick_id.clone()).collect()
}

/// Improvement figure of `candidate` over `previous`:
/// `(n2 / n1)^2 * max(rms1, 1) / max(rms2, 1)`, counting arrivals with
/// weight of at least 0.5. A missing RMS counts as 10 for the previous and
/// 1 for the candidate origin. `None` when the previous origin used no pick.
#[allow(clippy::cast_precision_loss)]
pub fn improvement(previous: &Origin, candidate: &Origin) -> Option<f64> {
    let picks1 = used_pick_ids(previous);
    let picks2 = used_pick_ids(candidate);
    let common = picks1.intersection(&picks2).count();
    let count1 = picks1.len();
    let count2 = common.saturating_add(picks2.difference(&picks1).count());
    if count1 == 0 {
        return None;
    }
    let rms1 = previous.rms().map_or(10.0, |r| r.max(1.0));
    let rms2 = candidate.rms().map_or(1.0, |r| r.max(1.0));
    let ratio = count2 as f64 / count1 as f64;
    Some(ratio * ratio * rms1 / rms2)
}

/// Whether `candidate` should replace `previous`.
pub fn is_improvement(previous: &Origin, candidate: &Origin) -> bool {
    improvement(previous, candidate).is_none_or(|q| {
        debug!(improvement = q, "Relocation compared with previous");
        q > 1.0
    })
}

/// Decision on a pending event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Not yet due.
    Wait,
    /// Due for relocation.
    Ready,
    /// Removed from the queue for the given reason.
    Drop(&'static str),
}

/// Outcome of relocating one event.
#[derive(Debug, Clone, PartialEq)]
pub enum RelocationOutcome {
    /// The event or its preferred origin is missing.
    Missing,
    /// The locator found no acceptable solution.
    Failed,
    /// The solution does not improve on the last one sent.
    NotImproved,
    /// The relocated origin was published.
    Sent(Box<Origin>),
}

/// Everything the service needs besides configuration.
pub struct RelocatorParts<'a> {
    /// Catalog to read events, origins, and picks from.
    pub catalog: Box<dyn Catalog + 'a>,
    /// Station coordinates.
    pub stations: StationIndex,
    /// Travel-time oracle.
    pub travel_times: &'a dyn TravelTimeSource,
    /// Outbound sink.
    pub publisher: &'a dyn Publisher,
    /// Name of the velocity model, recorded on relocated origins.
    pub earth_model: String,
}

/// The online relocator.
pub struct RelocationService<'a> {
    config: RelocationConfig,
    group: String,
    parts: RelocatorParts<'a>,
    pending: BTreeSet<EventId>,
    relocated: BTreeMap<EventId, Origin>,
}

impl core::fmt::Debug for RelocationService<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelocationService")
            .field("pending", &self.pending)
            .field("relocated", &self.relocated.len())
            .finish_non_exhaustive()
    }
}

impl<'a> RelocationService<'a> {
    /// Create a service publishing to `group`.
    pub fn new(config: RelocationConfig, group: &str, parts: RelocatorParts<'a>) -> Self {
        Self {
            config,
            group: group.to_owned(),
            parts,
            pending: BTreeSet::new(),
            relocated: BTreeMap::new(),
        }
    }

    /// Apply an inbound notifier and queue valid events.
    pub fn handle_notifier(&mut self, notifier: &Notifier) {
        self.parts.catalog.apply(notifier);
        if let CatalogObject::Event(event) = &notifier.object
            && event.is_valid()
        {
            debug!(event_id = %event.id, "Event queued");
            self.pending.insert(event.id.clone());
        }
    }

    /// Queue an event by ID.
    pub fn enqueue(&mut self, event_id: EventId) {
        self.pending.insert(event_id);
    }

    /// Number of queued events.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Last origin sent per event.
    pub const fn relocated(&self) -> &BTreeMap<EventId, Origin> {
        &self.relocated
    }

    /// Whether the preferred origin of `event_id` is due.
    pub fn readiness(&self, event_id: &EventId, now: DateTime<Utc>) -> Readiness {
        let Some(event) = self.parts.catalog.event(event_id) else {
            return Readiness::Drop("event missing");
        };
        let Some(origin) = event
            .preferred_origin_id
            .as_ref()
            .and_then(|id| self.parts.catalog.origin(id))
        else {
            return Readiness::Wait;
        };
        if seconds_between(now, origin.time) < self.config.min_delay {
            return Readiness::Wait;
        }
        if origin.author() == Some(self.config.author.as_str()) {
            return Readiness::Drop("own origin");
        }
        if !is_qualified(&origin) {
            return Readiness::Drop("unqualified origin");
        }
        Readiness::Ready
    }

    /// Process every queued event that is due, in event ID order.
    pub fn on_timer(&mut self, now: DateTime<Utc>) -> Vec<(EventId, RelocationOutcome)> {
        let mut outcomes = Vec::new();
        let queued: Vec<EventId> = self.pending.iter().cloned().collect();
        for event_id in queued {
            match self.readiness(&event_id, now) {
                Readiness::Wait => {}
                Readiness::Drop(reason) => {
                    debug!(event_id = %event_id, reason, "Event dropped");
                    self.pending.remove(&event_id);
                }
                Readiness::Ready => {
                    self.pending.remove(&event_id);
                    let outcome = self.process_event(&event_id, now);
                    outcomes.push((event_id, outcome));
                }
            }
        }
        outcomes
    }

    /// Relocate the preferred origin of `event_id` with the fixed depth
    /// chosen from region and origin, and publish it if it improves on the
    /// last one sent. A failed publication re-queues the event.
    pub fn process_event(&mut self, event_id: &EventId, now: DateTime<Utc>) -> RelocationOutcome {
        let Some(origin) = self.preferred_origin(event_id) else {
            warn!(event_id = %event_id, "Failed to load event");
            return RelocationOutcome::Missing;
        };
        let fixed_depth = choose_fixed_depth(&origin, &self.config, &self.config.agency);
        match fixed_depth {
            Some(depth) => debug!(event_id = %event_id, depth, "Setting fixed depth"),
            None => debug!(event_id = %event_id, "Not fixing depth"),
        }
        let Some(relocated) = self.relocate_origin(&origin, fixed_depth, now) else {
            return RelocationOutcome::Failed;
        };

        if let Some(previous) = self.relocated.get(event_id)
            && !is_improvement(previous, &relocated)
        {
            info!(event_id = %event_id, "No improvement, origin not sent");
            return RelocationOutcome::NotImproved;
        }

        match self.publish(event_id, &relocated) {
            Ok(()) => {
                self.relocated.insert(event_id.clone(), relocated.clone());
                RelocationOutcome::Sent(Box::new(relocated))
            }
            Err(error) => {
                warn!(event_id = %event_id, error = %error, "Failed to send relocation");
                self.pending.insert(event_id.clone());
                RelocationOutcome::Failed
            }
        }
    }

    /// Relocate the preferred origin of `event_id` once with an explicit
    /// fixed depth and publish the result without comparing.
    pub fn relocate_once(
        &mut self,
        event_id: &EventId,
        fixed_depth: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<RelocationOutcome, PublishError> {
        info!(event_id = %event_id, "Working on event");
        let Some(origin) = self.preferred_origin(event_id) else {
            warn!(event_id = %event_id, "Failed to load event");
            return Ok(RelocationOutcome::Missing);
        };
        let Some(relocated) = self.relocate_origin(&origin, fixed_depth, now) else {
            info!(event_id = %event_id, "No relocation result");
            return Ok(RelocationOutcome::Failed);
        };
        self.publish(event_id, &relocated)?;
        Ok(RelocationOutcome::Sent(Box::new(relocated)))
    }

    fn preferred_origin(&self, event_id: &EventId) -> Option<Origin> {
        let event = self.parts.catalog.event(event_id)?;
        let origin_id = event.preferred_origin_id?;
        self.parts.catalog.origin(&origin_id)
    }

    fn relocate_origin(
        &self,
        origin: &Origin,
        fixed_depth: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<Origin> {
        let ctx = AssociationContext {
            stations: &self.parts.stations,
            travel_times: self.parts.travel_times,
        };
        let params = AssociationParams {
            allowed_authors: self.config.pick_authors.clone(),
            max_distance: self.config.max_delta,
            max_residual: self.config.max_residual,
            keep_manual_picks: true,
        };
        let report = associate(self.parts.catalog.as_ref(), &ctx, origin, &params);
        debug!(
            origin_id = %origin.id,
            arrivals = report.origin.arrivals.len(),
            "Picks associated"
        );

        let relocation = RelocationParams {
            fixed_depth,
            min_depth: self.config.min_depth,
            max_residual: self.config.max_residual,
            max_rms: self.config.max_rms,
            min_arrivals: self.config.min_arrivals,
            earth_model: Some(self.parts.earth_model.clone()),
            ..RelocationParams::default()
        };
        let Some(mut relocated) = relocate(
            &report.origin,
            &report.picks_by_id(),
            &self.parts.stations,
            self.parts.travel_times,
            &relocation,
        ) else {
            warn!(origin_id = %origin.id, "Relocation failed");
            return None;
        };
        if relocated.arrivals.len() < self.config.min_arrivals {
            info!(origin_id = %origin.id, "Too few arrivals");
            return None;
        }
        relocated.creation_info = Some(CreationInfo::new(
            &self.config.author,
            &self.config.agency,
            now,
        ));
        info!(origin_id = %relocated.id, "Relocated\n{}", summarize(&relocated));
        Some(relocated)
    }

    fn publish(&self, event_id: &EventId, origin: &Origin) -> Result<(), PublishError> {
        let message = relocation_message(&self.group, event_id, origin);
        self.parts.publisher.publish(&message)?;
        info!(origin_id = %origin.id, event_id = %event_id, "Sent relocation");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use repick_types::{Arrival, CreationInfo, EvaluationMode, PHASE_P};

    use super::*;

    fn origin_with_azimuths(azimuths: &[f64]) -> Origin {
        let mut origin = Origin::default();
        for (i, az) in azimuths.iter().enumerate() {
            let mut arrival = Arrival::new(PickId::new(format!("p{i}")), PHASE_P, 1.0);
            arrival.azimuth = Some(*az);
            arrival.distance = Some(30.0);
            origin.arrivals.push(arrival);
        }
        origin
    }

    #[test]
    fn tgap_sums_two_largest_gaps() {
        let origin = origin_with_azimuths(&[10.0, 20.0, 200.0]);
        // Gaps 10, 180, 170.
        assert!((tgap(&origin) - 350.0).abs() < 1e-9);
        assert!(!is_qualified(&origin));

        let origin = origin_with_azimuths(&[0.0, 90.0, 180.0, 270.0]);
        assert!((tgap(&origin) - 180.0).abs() < 1e-9);
        assert!(is_qualified(&origin));

        assert!((tgap(&origin_with_azimuths(&[45.0])) - 360.0).abs() < f64::EPSILON);
    }

    #[test]
    fn manual_origins_are_always_qualified() {
        let mut origin = origin_with_azimuths(&[10.0]);
        origin.evaluation_mode = EvaluationMode::Manual;
        assert!(is_qualified(&origin));
        assert!(is_qualified(&Origin::default()));
    }

    #[test]
    fn fixed_depth_choice() {
        let config = RelocationConfig::default();
        let mut origin = Origin {
            latitude: 51.0,
            longitude: 16.0,
            depth: 5.0,
            ..Origin::default()
        };
        assert_eq!(choose_fixed_depth(&origin, &config, "GFZ"), Some(1.0));

        origin.latitude = 0.0;
        assert_eq!(choose_fixed_depth(&origin, &config, "GFZ"), None);

        origin.depth_fixed = true;
        assert_eq!(choose_fixed_depth(&origin, &config, "GFZ"), None);
        origin.depth = 10.0;
        assert_eq!(choose_fixed_depth(&origin, &config, "GFZ"), Some(10.0));

        origin.depth = 33.0;
        origin.evaluation_mode = EvaluationMode::Manual;
        origin.creation_info = Some(CreationInfo {
            agency_id: Some("GFZ".to_owned()),
            ..CreationInfo::default()
        });
        assert_eq!(choose_fixed_depth(&origin, &config, "GFZ"), Some(33.0));
        assert_eq!(choose_fixed_depth(&origin, &config, "USGS"), None);
    }

    #[test]
    fn improvement_weighs_counts_and_rms() {
        let previous = origin_with_azimuths(&[0.0, 90.0, 180.0, 270.0]);
        let mut candidate = origin_with_azimuths(&[0.0, 90.0, 180.0, 270.0, 300.0, 330.0]);
        // No RMS on either: (6/4)^2 * 10 / 1.
        assert!((improvement(&previous, &candidate).unwrap() - 22.5).abs() < 1e-9);
        assert!(is_improvement(&previous, &candidate));

        candidate.arrivals.truncate(3);
        candidate.quality = Some(repick_types::OriginQuality {
            standard_error: Some(2.0),
            ..repick_types::OriginQuality::default()
        });
        let mut previous_with_rms = previous.clone();
        previous_with_rms.quality = Some(repick_types::OriginQuality {
            standard_error: Some(0.5),
            ..repick_types::OriginQuality::default()
        });
        // (3/4)^2 * 1 / 2.
        assert!((improvement(&previous_with_rms, &candidate).unwrap() - 0.281_25).abs() < 1e-9);
        assert!(!is_improvement(&previous_with_rms, &candidate));

        assert!(is_improvement(&Origin::default(), &candidate));
    }
}

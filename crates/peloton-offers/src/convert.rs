//! Wire-to-domain conversion for offers.

use std::collections::HashMap;
use std::time::Instant;

use peloton_core::ResourceVector;
use peloton_mesos::Offer;

use crate::pool::HeldOffer;

/// Convert a wire offer into the held form the pool indexes. Returns
/// `None` for offers missing their id or agent id.
pub fn held_offer_from_wire(offer: &Offer, received_at: Instant) -> Option<HeldOffer> {
    let id = offer.id.as_ref()?.value.clone();
    let agent_id = offer.agent_id.as_ref()?.value.clone();

    let mut resources = ResourceVector::zero();
    let mut ports = Vec::new();
    for resource in &offer.resources {
        match resource.name.as_str() {
            "cpus" => resources.cpu += resource.scalar_value(),
            "mem" => resources.mem_mb += resource.scalar_value(),
            "disk" => resources.disk_mb += resource.scalar_value(),
            "gpus" => resources.gpu += resource.scalar_value(),
            "ports" => {
                if let Some(ranges) = &resource.ranges {
                    ports.extend(ranges.range.iter().map(|r| (r.begin, r.end)));
                }
            }
            _ => {}
        }
    }

    let attributes: HashMap<String, String> = offer
        .attributes
        .iter()
        .filter_map(|a| {
            let value = a.text.as_ref()?.value.clone();
            Some((a.name.clone(), value))
        })
        .collect();

    Some(HeldOffer {
        id,
        agent_id,
        hostname: offer.hostname.clone(),
        resources,
        ports,
        attributes,
        received_at,
    })
}

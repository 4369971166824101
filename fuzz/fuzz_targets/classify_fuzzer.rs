//! Fuzz target for destination classification
//!
//! # Strategy
//!
//! - Arbitrary sentinel bands (most rejected by validation)
//! - Destinations drawn near each threshold and from the full `u32` range
//!
//! # Invariants
//!
//! - `classify` is total for every validated band
//! - Every non-`Direct` class comes from the reserved space
//! - Indexed and zone classes recover the raw value from their offset

#![no_main]

use arbitrary::Arbitrary;
use busroute_core::{RoutingClass, SentinelBand};
use busroute_proto::BusId;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    custom_band: Option<[u32; 9]>,
    near: u8,
    delta: i8,
    raw: u32,
}

fn band(input: &Input) -> SentinelBand {
    let Some(v) = input.custom_band else {
        return SentinelBand::default();
    };
    SentinelBand {
        local_route: v[0],
        cross_route: v[1],
        local_route_zone: v[2],
        cross_route_zone: v[3],
        local_all_route: v[4],
        cross_all_route: v[5],
        local_and_cross_all_route: v[6],
        all_local_and_all_cross_route: v[7],
        reserved_max: v[8],
    }
}

fn thresholds(band: &SentinelBand) -> [u32; 9] {
    [
        band.local_route,
        band.cross_route,
        band.local_route_zone,
        band.cross_route_zone,
        band.local_all_route,
        band.cross_all_route,
        band.local_and_cross_all_route,
        band.all_local_and_all_cross_route,
        band.reserved_max,
    ]
}

fuzz_target!(|input: Input| {
    let band = band(&input);
    if band.validate().is_err() {
        return;
    }

    let anchor = thresholds(&band)[usize::from(input.near) % 9];
    for raw in [anchor.saturating_add_signed(i32::from(input.delta)), input.raw] {
        let dest = BusId::from_raw(raw);
        let class = band.classify(dest);

        if !matches!(class, RoutingClass::Direct(_)) {
            assert!(band.is_reserved(dest), "{class} from unreserved {raw}");
        }
        match class {
            RoutingClass::Direct(id) => assert_eq!(id, dest),
            RoutingClass::LocalIndexed(n) => assert_eq!(band.local_route + n, raw),
            RoutingClass::CrossIndexed(n) => assert_eq!(band.cross_route + n, raw),
            RoutingClass::LocalZone(z) => assert_eq!(band.local_route_zone + z, raw),
            RoutingClass::CrossZone(z) => assert_eq!(band.cross_route_zone + z, raw),
            _ => {},
        }
    }
});
